//! `EngineConfig`: the small set of tunables the core needs from its host
//! (job retry pacing, identity refresh cadence) expressed as a plain serde
//! struct with sane defaults, following the teacher's
//! `guard_core::settings::GuardSettings` pattern rather than reaching for a
//! dedicated configuration crate.

use serde::{Deserialize, Serialize};

/// Engine-wide tunables (spec.md's ambient engineering surface; not part of
/// the protocol itself). None of these affect wire compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// A job that has failed (non-poison, non-stash) this many times is
    /// itself poisoned rather than retried forever.
    pub max_job_attempts: u32,
    /// How long a failed job waits before its next retry.
    pub job_retry_backoff_secs: u64,
    /// How often a host should call `refreshIdentities` per known peer, as
    /// a default recommendation; the engine itself never schedules this.
    pub identity_refresh_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_job_attempts: 8,
            job_retry_backoff_secs: 5,
            identity_refresh_interval_secs: 3600,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_job_attempts == 0 {
            return Err("max_job_attempts must be at least 1".into());
        }
        if self.job_retry_backoff_secs == 0 {
            return Err("job_retry_backoff_secs must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.max_job_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
