//! Selkie DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style simulation for the Selkie engine.
//!
//! # Overview
//!
//! - Deterministic time (`SimClock`)
//! - Reproducible randomness and PRNG entropy (`DeterministicRng`)
//! - Fault injection (`FaultInjector`)
//! - A stable store that fails on demand (`SimStableStore`)
//! - A transport that holds calls and replies in seeded order (`SimTransport`)
//!
//! # Example
//!
//! ```rust,ignore
//! use selkie_dst::{FaultConfig, FaultType, SimConfig, Simulation};
//!
//! #[test]
//! fn test_with_faults() {
//!     let config = SimConfig::from_env_or_random();
//!     let result = Simulation::new(config)
//!         .with_fault(FaultConfig::new(FaultType::TransportReject, 0.1))
//!         .run(|env| async move {
//!             let mut dispatcher = env.dispatcher()?;
//!             // register handlers, dispatch, env.settle(...)
//!             Ok(())
//!         });
//!     assert!(result.is_ok());
//! }
//! ```
//!
//! # TigerStyle
//!
//! - All operations are deterministic given the same seed
//! - Always log the seed for reproducibility
//! - Explicit fault types and probabilities

pub mod clock;
pub mod fault;
pub mod rng;
pub mod simulation;
pub mod storage;
pub mod transport;

pub use clock::SimClock;
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultStats, FaultType};
pub use rng::DeterministicRng;
pub use simulation::{SimConfig, SimEnvironment, Simulation, SimulationError};
pub use storage::SimStableStore;
pub use transport::{SimTransport, TransportStats};
