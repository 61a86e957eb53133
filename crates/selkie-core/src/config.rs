//! Configuration for Selkie
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main configuration for one engine instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Continuation scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.memory.validate()?;
        self.scheduler.validate()?;
        self.dispatcher.validate()?;
        Ok(())
    }

    /// Build a configuration from defaults overridden by `SELKIE_*` variables
    ///
    /// Reads:
    /// - `SELKIE_VOLATILE_CEILING_BYTES`
    /// - `SELKIE_STABLE_CAPACITY_BYTES_INITIAL`
    /// - `SELKIE_STABLE_CAPACITY_BYTES_MAX`
    /// - `SELKIE_MAX_SUSPENDED_CONTINUATIONS`
    /// - `SELKIE_MAX_PENDING_CALLS`
    /// - `SELKIE_MAILBOX_DEPTH_MAX`
    /// - `SELKIE_COMMAND_BUFFER_SIZE`
    /// - `SELKIE_COMMIT_LOG_ENTRIES_MAX`
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if a variable does not parse or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        override_from(
            &lookup,
            "SELKIE_VOLATILE_CEILING_BYTES",
            &mut config.memory.volatile_ceiling_bytes,
        )?;
        override_from(
            &lookup,
            "SELKIE_STABLE_CAPACITY_BYTES_INITIAL",
            &mut config.memory.stable_capacity_bytes_initial,
        )?;
        override_from(
            &lookup,
            "SELKIE_STABLE_CAPACITY_BYTES_MAX",
            &mut config.memory.stable_capacity_bytes_max,
        )?;
        override_from(
            &lookup,
            "SELKIE_MAX_SUSPENDED_CONTINUATIONS",
            &mut config.scheduler.max_suspended_continuations,
        )?;
        override_from(
            &lookup,
            "SELKIE_MAX_PENDING_CALLS",
            &mut config.scheduler.max_pending_calls,
        )?;
        override_from(
            &lookup,
            "SELKIE_MAILBOX_DEPTH_MAX",
            &mut config.dispatcher.mailbox_depth_max,
        )?;
        override_from(
            &lookup,
            "SELKIE_COMMAND_BUFFER_SIZE",
            &mut config.dispatcher.command_buffer_size,
        )?;
        override_from(
            &lookup,
            "SELKIE_COMMIT_LOG_ENTRIES_MAX",
            &mut config.dispatcher.commit_log_entries_max,
        )?;

        config.validate()?;
        Ok(config)
    }
}

fn override_from<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| Error::invalid_config(name, format!("cannot parse {:?}: {}", raw, e)))?;
    }
    Ok(())
}

fn exceeds(field: &str, value: impl std::fmt::Display, limit: impl std::fmt::Display) -> Error {
    Error::invalid_config(field, format!("{} exceeds limit {}", value, limit))
}

/// Volatile and stable memory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Ceiling for the volatile store in bytes
    #[serde(default = "default_volatile_ceiling")]
    pub volatile_ceiling_bytes: usize,

    /// Stable capacity allocated when the store is first created
    #[serde(default = "default_stable_initial")]
    pub stable_capacity_bytes_initial: u64,

    /// Largest capacity `grow` may reach
    #[serde(default = "default_stable_max")]
    pub stable_capacity_bytes_max: u64,
}

fn default_volatile_ceiling() -> usize {
    VOLATILE_MEMORY_BYTES_DEFAULT
}

fn default_stable_initial() -> u64 {
    STABLE_CAPACITY_BYTES_INITIAL_DEFAULT
}

fn default_stable_max() -> u64 {
    STABLE_CAPACITY_BYTES_MAX_DEFAULT
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            volatile_ceiling_bytes: default_volatile_ceiling(),
            stable_capacity_bytes_initial: default_stable_initial(),
            stable_capacity_bytes_max: default_stable_max(),
        }
    }
}

impl MemoryConfig {
    fn validate(&self) -> Result<()> {
        if self.volatile_ceiling_bytes == 0 {
            return Err(Error::invalid_config(
                "memory.volatile_ceiling_bytes",
                "must be positive",
            ));
        }
        if self.volatile_ceiling_bytes > VOLATILE_MEMORY_BYTES_MAX {
            return Err(exceeds(
                "memory.volatile_ceiling_bytes",
                self.volatile_ceiling_bytes,
                VOLATILE_MEMORY_BYTES_MAX,
            ));
        }
        if self.stable_capacity_bytes_max > STABLE_CAPACITY_BYTES_LIMIT {
            return Err(exceeds(
                "memory.stable_capacity_bytes_max",
                self.stable_capacity_bytes_max,
                STABLE_CAPACITY_BYTES_LIMIT,
            ));
        }
        if self.stable_capacity_bytes_initial > self.stable_capacity_bytes_max {
            return Err(Error::invalid_config(
                "memory.stable_capacity_bytes_initial",
                "must not exceed stable_capacity_bytes_max",
            ));
        }
        Ok(())
    }
}

/// Continuation scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of parked continuations
    #[serde(default = "default_max_suspended")]
    pub max_suspended_continuations: usize,

    /// Maximum number of in-flight outbound calls
    #[serde(default = "default_max_pending_calls")]
    pub max_pending_calls: usize,
}

fn default_max_suspended() -> usize {
    CONTINUATIONS_SUSPENDED_COUNT_DEFAULT
}

fn default_max_pending_calls() -> usize {
    CALLS_PENDING_COUNT_DEFAULT
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_suspended_continuations: default_max_suspended(),
            max_pending_calls: default_max_pending_calls(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if self.max_suspended_continuations > CONTINUATIONS_SUSPENDED_COUNT_MAX {
            return Err(exceeds(
                "scheduler.max_suspended_continuations",
                self.max_suspended_continuations,
                CONTINUATIONS_SUSPENDED_COUNT_MAX,
            ));
        }
        if self.max_pending_calls > CALLS_PENDING_COUNT_MAX {
            return Err(exceeds(
                "scheduler.max_pending_calls",
                self.max_pending_calls,
                CALLS_PENDING_COUNT_MAX,
            ));
        }
        Ok(())
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of queued messages
    #[serde(default = "default_mailbox_depth")]
    pub mailbox_depth_max: usize,

    /// Channel buffer size for dispatcher commands
    #[serde(default = "default_command_buffer_size")]
    pub command_buffer_size: usize,

    /// Number of commit log entries retained
    #[serde(default = "default_commit_log_entries")]
    pub commit_log_entries_max: usize,
}

fn default_mailbox_depth() -> usize {
    MAILBOX_DEPTH_MAX
}

fn default_command_buffer_size() -> usize {
    DISPATCHER_COMMAND_BUFFER_SIZE_DEFAULT
}

fn default_commit_log_entries() -> usize {
    COMMIT_LOG_ENTRIES_COUNT_DEFAULT
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mailbox_depth_max: default_mailbox_depth(),
            command_buffer_size: default_command_buffer_size(),
            commit_log_entries_max: default_commit_log_entries(),
        }
    }
}

impl DispatcherConfig {
    fn validate(&self) -> Result<()> {
        if self.mailbox_depth_max == 0 || self.mailbox_depth_max > MAILBOX_DEPTH_MAX {
            return Err(Error::invalid_config(
                "dispatcher.mailbox_depth_max",
                format!("must be in 1..={}", MAILBOX_DEPTH_MAX),
            ));
        }
        if self.command_buffer_size == 0 {
            return Err(Error::invalid_config(
                "dispatcher.command_buffer_size",
                "must be positive",
            ));
        }
        if self.commit_log_entries_max > COMMIT_LOG_ENTRIES_COUNT_MAX {
            return Err(exceeds(
                "dispatcher.commit_log_entries_max",
                self.commit_log_entries_max,
                COMMIT_LOG_ENTRIES_COUNT_MAX,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stable_initial_above_max_is_invalid() {
        let mut config = EngineConfig::default();
        config.memory.stable_capacity_bytes_initial = 2048;
        config.memory.stable_capacity_bytes_max = 1024;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"memory": {"volatile_ceiling_bytes": 4096}}"#).unwrap();
        assert_eq!(config.memory.volatile_ceiling_bytes, 4096);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.dispatcher.mailbox_depth_max, MAILBOX_DEPTH_MAX);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SELKIE_VOLATILE_CEILING_BYTES", "1024"),
            ("SELKIE_MAX_PENDING_CALLS", " 8 "),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.memory.volatile_ceiling_bytes, 1024);
        assert_eq!(config.scheduler.max_pending_calls, 8);
        assert_eq!(
            config.scheduler.max_suspended_continuations,
            CONTINUATIONS_SUSPENDED_COUNT_DEFAULT
        );
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = EngineConfig::from_lookup(|name| {
            (name == "SELKIE_MAILBOX_DEPTH_MAX").then(|| "lots".to_string())
        });
        match result {
            Err(Error::InvalidConfiguration { field, .. }) => {
                assert_eq!(field, "SELKIE_MAILBOX_DEPTH_MAX")
            }
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }
    }
}
