//! Protocol configuration

use std::time::Duration;

use crate::error::{JodiError, Result};

/// Upper bound on `n_ev`; a derivation can yield up to `2^n_ev` candidates.
pub const MAX_EVALUATORS: usize = 16;

/// Tunables shared by providers and nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Evaluators contacted per call-id derivation
    pub n_ev: usize,
    /// Message stores contacted per publish/retrieve
    pub n_ms: usize,
    /// Number of OPRF key epochs (`KEYLIST_SIZE`)
    pub keylist_size: usize,
    pub rotation_interval: Duration,
    /// How long a rotated-out key stays usable
    pub liveness_window: Duration,
    /// Storage TTL (`T_MAX_SECONDS`)
    pub record_ttl: Duration,
    /// Stores per candidate when more than one call id exists
    pub stores_per_multi_cid: usize,
    /// Bound on the evaluator fan-out
    pub eval_timeout: Duration,
    /// Bound on the whole retrieval fan-out
    pub retrieve_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            n_ev: 3,
            n_ms: 3,
            keylist_size: 10,
            rotation_interval: Duration::from_secs(10),
            liveness_window: Duration::from_secs(4),
            record_ttl: Duration::from_secs(15),
            stores_per_multi_cid: 1,
            eval_timeout: Duration::from_millis(3000),
            retrieve_timeout: Duration::from_millis(3000),
        }
    }
}

impl ProtocolConfig {
    /// Read overrides from the process environment, defaulting anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ProtocolConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            n_ev: read_usize(&lookup, "n_ev", defaults.n_ev)?,
            n_ms: read_usize(&lookup, "n_ms", defaults.n_ms)?,
            keylist_size: read_usize(&lookup, "KEYLIST_SIZE", defaults.keylist_size)?,
            rotation_interval: read_secs(&lookup, "ROTATION_INTERVAL_SECONDS", defaults.rotation_interval)?,
            liveness_window: read_secs(&lookup, "LIVENESS_WINDOW_SECONDS", defaults.liveness_window)?,
            record_ttl: read_secs(&lookup, "T_MAX_SECONDS", defaults.record_ttl)?,
            stores_per_multi_cid: read_usize(&lookup, "STORES_PER_MULTI_CID", defaults.stores_per_multi_cid)?,
            eval_timeout: read_millis(&lookup, "EVAL_TIMEOUT_MS", defaults.eval_timeout)?,
            retrieve_timeout: read_millis(&lookup, "RETRIEVE_TIMEOUT_MS", defaults.retrieve_timeout)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints the protocol relies on.
    ///
    /// `rotation_interval > liveness_window` keeps at most two live epochs per
    /// index, which bounds every evaluator to two shares.
    pub fn validate(&self) -> Result<()> {
        if self.n_ev == 0 {
            return Err(JodiError::Config("n_ev must be at least 1".to_string()));
        }
        if self.n_ev > MAX_EVALUATORS {
            return Err(JodiError::Config(format!(
                "n_ev must be at most {}, got {}",
                MAX_EVALUATORS, self.n_ev
            )));
        }
        if self.n_ms == 0 {
            return Err(JodiError::Config("n_ms must be at least 1".to_string()));
        }
        if self.keylist_size == 0 {
            return Err(JodiError::Config("KEYLIST_SIZE must be at least 1".to_string()));
        }
        if self.stores_per_multi_cid == 0 {
            return Err(JodiError::Config(
                "STORES_PER_MULTI_CID must be at least 1".to_string(),
            ));
        }
        if self.rotation_interval <= self.liveness_window {
            return Err(JodiError::Config(format!(
                "rotation interval ({:?}) must exceed the liveness window ({:?})",
                self.rotation_interval, self.liveness_window
            )));
        }
        if self.record_ttl.is_zero() {
            return Err(JodiError::Config("T_MAX_SECONDS must be positive".to_string()));
        }
        Ok(())
    }

    /// Store fan-out per candidate for a retrieval over `candidates` call ids.
    pub fn stores_per_candidate(&self, candidates: usize) -> usize {
        if candidates > 1 {
            self.stores_per_multi_cid
        } else {
            self.n_ms
        }
    }
}

fn read_usize<F>(lookup: &F, name: &str, default: usize) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| JodiError::Config(format!("{} must be a non-negative integer, got {:?}", name, raw))),
        _ => Ok(default),
    }
}

fn read_secs<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    read_usize(lookup, name, default.as_secs() as usize).map(|s| Duration::from_secs(s as u64))
}

fn read_millis<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    read_usize(lookup, name, default.as_millis() as usize).map(|ms| Duration::from_millis(ms as u64))
}
