//! Simulation harness for deterministic testing
//!
//! TigerStyle: Reproducible test execution with explicit configuration.
//!
//! A simulation builds one seeded world: an RNG, a clock, a fault injector,
//! a stable store and a transport. Engines created from the environment use
//! the simulated clock and take their PRNG entropy from the seeded RNG, so a
//! failing seed replays exactly with `DST_SEED`.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultInjectorBuilder};
use crate::rng::DeterministicRng;
use crate::storage::SimStableStore;
use crate::transport::SimTransport;
use selkie_core::{
    CallReply, EngineConfig, EntropySource, Error, IoContext, Result, TimeProvider,
    DST_STEPS_COUNT_MAX,
};
use selkie_runtime::{Dispatcher, HandlerOutcome, OutboundCall};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Start of simulated time, 2024-01-01T00:00:00Z
const SIM_START_TIME_MS: u64 = 1_704_067_200_000;

/// Configuration for a simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Delivery steps `settle` may take before giving up
    pub max_steps: u64,
    /// Engine configuration for dispatchers built by the environment
    pub engine: EngineConfig,
}

impl SimConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_steps: DST_STEPS_COUNT_MAX,
            engine: EngineConfig::default(),
        }
    }

    /// Seed from `DST_SEED`, or a random seed
    pub fn from_env_or_random() -> Self {
        let seed = std::env::var("DST_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(rand::random);

        tracing::info!(seed = seed, "DST seed (set DST_SEED={} to replay)", seed);

        Self::new(seed)
    }

    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Environment handed to a simulation test
pub struct SimEnvironment {
    pub seed: u64,
    pub clock: SimClock,
    pub rng: DeterministicRng,
    /// Time and entropy for engines under test
    pub io_context: IoContext,
    pub stable: SimStableStore,
    pub transport: SimTransport,
    pub faults: Arc<FaultInjector>,
    engine: EngineConfig,
    max_steps: u64,
}

impl SimEnvironment {
    /// Create a dispatcher over the simulated store and transport
    ///
    /// The actor is freshly initialized with a PRNG seed drawn from the
    /// simulation RNG.
    pub fn dispatcher(&self) -> Result<Dispatcher> {
        let mut dispatcher = self.open()?;
        dispatcher.on_init(Some(self.rng.actor_seed()));
        Ok(dispatcher)
    }

    /// Open a dispatcher over the existing store without seeding its PRNG
    pub fn open(&self) -> Result<Dispatcher> {
        let dispatcher = Dispatcher::new(
            self.engine.clone(),
            Arc::new(self.stable.clone()),
            self.io_context.clone(),
        )?;
        Ok(dispatcher.with_transport(Arc::new(self.transport.clone())))
    }

    /// Restart `dispatcher` and run its restart hook
    ///
    /// Calls still in flight belong to the old epoch; they stay in the
    /// transport and resolve as `UnknownContinuation` if delivered.
    pub fn restart(&self, dispatcher: Dispatcher) -> Result<Dispatcher> {
        let mut dispatcher = dispatcher.restart()?;
        dispatcher.on_restart();
        Ok(dispatcher)
    }

    pub fn fork_rng(&self) -> DeterministicRng {
        self.rng.fork()
    }

    pub fn advance_time_ms(&self, ms: u64) {
        self.clock.advance_ms(ms);
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Deliver in-flight calls in seeded order until none remain
    ///
    /// Each step moves committed calls into the transport, then answers one
    /// in-flight call with `responder` (subject to injected faults). Returns
    /// every outcome produced, in order. Delivery errors such as
    /// `UnknownContinuation` are skipped.
    ///
    /// # Errors
    /// `Internal` if more than `max_steps` deliveries are needed.
    pub fn settle(
        &self,
        dispatcher: &mut Dispatcher,
        mut responder: impl FnMut(&OutboundCall) -> CallReply,
    ) -> Result<Vec<HandlerOutcome>> {
        let mut outcomes = self.transport.pump(dispatcher);
        let mut steps = 0u64;

        loop {
            let Some(delivered) = self.transport.deliver_next(dispatcher, &mut responder) else {
                return Ok(outcomes);
            };
            steps += 1;
            if steps > self.max_steps {
                return Err(Error::internal(format!(
                    "simulation did not settle within {} steps",
                    self.max_steps
                )));
            }

            self.clock.advance_ms(1);
            match delivered {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::debug!(error = %err, "Delivery dropped"),
            }
            outcomes.extend(self.transport.pump(dispatcher));
        }
    }
}

/// Main simulation harness
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
        }
    }

    pub fn with_fault(mut self, fault: FaultConfig) -> Self {
        self.fault_configs.push(fault);
        self
    }

    pub fn with_faults(mut self, faults: Vec<FaultConfig>) -> Self {
        self.fault_configs.extend(faults);
        self
    }

    fn build_environment(self) -> SimEnvironment {
        let rng = DeterministicRng::new(self.config.seed);
        let clock = SimClock::from_millis(SIM_START_TIME_MS);

        let mut fault_builder = FaultInjectorBuilder::new(rng.fork());
        for fault in self.fault_configs {
            fault_builder = fault_builder.with_fault(fault);
        }
        let faults = Arc::new(fault_builder.build());

        let io_context = IoContext::new(
            Arc::new(clock.clone()) as Arc<dyn TimeProvider>,
            Arc::new(rng.fork()) as Arc<dyn EntropySource>,
        );
        let stable = SimStableStore::new(
            self.config.engine.memory.stable_capacity_bytes_initial,
            self.config.engine.memory.stable_capacity_bytes_max,
            faults.clone(),
        );
        let transport = SimTransport::new(rng.fork(), faults.clone());

        SimEnvironment {
            seed: self.config.seed,
            clock,
            rng,
            io_context,
            stable,
            transport,
            faults,
            engine: self.config.engine,
            max_steps: self.config.max_steps,
        }
    }

    /// Run `test` on a current-thread runtime
    pub fn run<F, Fut, T>(self, test: F) -> std::result::Result<T, SimulationError>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let seed = self.config.seed;
        let env = self.build_environment();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SimulationError::RuntimeError(e.to_string()))?;

        runtime
            .block_on(test(env))
            .map_err(|source| SimulationError::TestFailed { seed, source })
    }

    /// Run `test` when already inside an async context
    pub async fn run_async<F, Fut, T>(self, test: F) -> std::result::Result<T, SimulationError>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let seed = self.config.seed;
        let env = self.build_environment();
        test(env)
            .await
            .map_err(|source| SimulationError::TestFailed { seed, source })
    }
}

/// Errors that can occur during simulation
#[derive(Debug, ThisError)]
pub enum SimulationError {
    #[error("test failed (DST_SEED={seed}): {source}")]
    TestFailed { seed: u64, source: Error },

    #[error("runtime error: {0}")]
    RuntimeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultType;
    use bytes::Bytes;
    use selkie_core::ActorId;
    use selkie_runtime::{handler_fn, Handler, HandlerContext, Step, StepResult};
    use selkie_storage::StableStore;

    struct Ping;

    impl Handler for Ping {
        type Suspended = ();

        fn start(&self, ctx: &mut HandlerContext<'_>, payload: Bytes) -> StepResult<()> {
            ctx.call(&ActorId::new("net", "pong")?, "ping", payload)?;
            Ok(Step::Await(()))
        }

        fn resume(
            &self,
            _ctx: &mut HandlerContext<'_>,
            _state: (),
            outcomes: Vec<CallReply>,
        ) -> StepResult<()> {
            match outcomes.into_iter().next() {
                Some(Ok(reply)) => Ok(Step::Complete(reply)),
                _ => Ok(Step::Complete(Bytes::from("rejected"))),
            }
        }
    }

    #[test]
    fn test_simulation_basic() {
        let result = Simulation::new(SimConfig::new(12345)).run(|env| async move {
            let mut dispatcher = env.dispatcher()?;
            dispatcher.register("ping", Ping)?;

            let message = dispatcher.inbound("ping", Bytes::from("hi"))?;
            dispatcher.dispatch(message)?;
            let outcomes = env.settle(&mut dispatcher, |call| Ok(call.payload.clone()))?;

            assert_eq!(outcomes.len(), 1);
            assert!(matches!(
                &outcomes[0],
                HandlerOutcome::Completed { reply, .. } if reply == &Bytes::from("hi")
            ));
            assert_eq!(env.transport.stats().delivered, 1);
            Ok(())
        });

        assert!(result.is_ok(), "Test failed: {:?}", result.err());
    }

    #[test]
    fn test_simulation_reports_seed_on_failure() {
        let result = Simulation::new(SimConfig::new(77))
            .run(|_env| async move { Err::<(), _>(Error::internal("boom")) });

        let err = result.unwrap_err();
        assert!(err.to_string().contains("DST_SEED=77"));
    }

    #[test]
    fn test_stable_fault_rolls_back_segment() {
        // The first stable write is the epoch record; fail the one after it
        let result = Simulation::new(SimConfig::new(5))
            .with_fault(
                FaultConfig::new(FaultType::StableWriteFail, 1.0)
                    .after(1)
                    .max_triggers(1),
            )
            .run(|env| async move {
                let mut dispatcher = env.dispatcher()?;
                dispatcher.register(
                    "put",
                    handler_fn(|ctx, payload| {
                        ctx.stable_write("value", payload)?;
                        Ok(Bytes::new())
                    }),
                )?;

                let first = dispatcher.inbound("put", Bytes::from("a"))?;
                assert!(matches!(
                    dispatcher.dispatch(first)?,
                    HandlerOutcome::Failed { .. }
                ));
                assert_eq!(env.stable.read("value")?, None);

                let second = dispatcher.inbound("put", Bytes::from("b"))?;
                assert!(dispatcher.dispatch(second)?.is_final());
                assert_eq!(env.stable.read("value")?, Some(Bytes::from("b")));
                assert_eq!(env.stable.failed_writes(), 1);
                Ok(())
            });

        assert!(result.is_ok(), "Test failed: {:?}", result.err());
    }

    #[test]
    fn test_environment_is_reproducible() {
        let draw = |seed| {
            Simulation::new(SimConfig::new(seed))
                .run(|env| async move {
                    let mut dispatcher = env.dispatcher()?;
                    dispatcher.register(
                        "roll",
                        handler_fn(|ctx, _payload| Ok(ctx.random_bytes(16)?)),
                    )?;
                    let message = dispatcher.inbound("roll", Bytes::new())?;
                    match dispatcher.dispatch(message)? {
                        HandlerOutcome::Completed { reply, .. } => Ok(reply),
                        other => Err(Error::internal(format!("unexpected {:?}", other))),
                    }
                })
                .unwrap()
        };

        assert_eq!(draw(1), draw(1));
        assert_ne!(draw(1), draw(2));
    }
}
