//! Configuration for the finalizer worker.
//!
//! Every field has a default matching the production worker, so an empty YAML
//! document (or no file at all) is a valid starting point. The CLI layers
//! flags and environment variables on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::{FinalizerError, Result, RetryPolicy};
use crate::ports::KeyPattern;

pub const DEFAULT_SESSION_KEY_PREFIX: &str = "slot_ptr_";
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "finalizer_lock:";

/// Connection settings for the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Full `redis://` URL. Takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    /// Reply deadline for every store command.
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            connect_timeout_ms: 5_000,
            op_timeout_ms: 2_000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Connection URL with credentials percent-encoded.
    pub fn connection_url(&self) -> Result<Url> {
        if let Some(url) = &self.url {
            return Url::parse(url)
                .map_err(|e| FinalizerError::Config(format!("store url `{url}`: {e}")));
        }
        let mut url = Url::parse(&format!("redis://{}:{}/", self.host, self.port)).map_err(
            |e| FinalizerError::Config(format!("store host `{}`: {e}", self.host)),
        )?;
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username)
                .map_err(|_| FinalizerError::Config("store username rejected".to_string()))?;
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| FinalizerError::Config("store password rejected".to_string()))?;
        }
        Ok(url)
    }
}

/// Ledger endpoint and outbound call limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            base_url: String::new(),
            timeout_ms: 10_000,
            max_attempts: retry.max_attempts,
            initial_backoff_ms: retry.base_delay.as_millis() as u64,
            max_backoff_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.initial_backoff_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Worst case time one reconcile call can take, retries included.
    pub fn worst_case_call(&self) -> Duration {
        let retry = self.retry_policy();
        let attempts = retry.max_attempts.max(1);
        let waits: Duration = (1..attempts).map(|n| retry.next_delay(n)).sum();
        self.timeout() * attempts + waits
    }

    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            FinalizerError::Config(format!("ledger base url `{}`: {e}", self.base_url))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(FinalizerError::Config(format!(
                "ledger base url scheme `{scheme}` (expected http or https)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinalizerConfig {
    pub inactivity_threshold_ms: u64,
    pub poll_interval_ms: u64,
    pub session_key_prefix: String,
    pub lock_key_prefix: String,
    pub scan_batch_size: usize,
    pub max_concurrency: usize,
    pub session_lease_ms: u64,
    pub cycle_lease_ms: u64,
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_ms: 30_000,
            poll_interval_ms: 30_000,
            session_key_prefix: DEFAULT_SESSION_KEY_PREFIX.to_string(),
            lock_key_prefix: DEFAULT_LOCK_KEY_PREFIX.to_string(),
            scan_batch_size: 100,
            max_concurrency: 8,
            session_lease_ms: 60_000,
            cycle_lease_ms: 300_000,
            store: StoreConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl FinalizerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FinalizerError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| FinalizerError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_millis(self.inactivity_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_lease(&self) -> Duration {
        Duration::from_millis(self.session_lease_ms)
    }

    pub fn cycle_lease(&self) -> Duration {
        Duration::from_millis(self.cycle_lease_ms)
    }

    pub fn sessions(&self) -> KeyPattern {
        KeyPattern::prefix(self.session_key_prefix.clone())
    }

    /// Longest a session lock is held: the record read, the ledger call and
    /// the sync write.
    pub fn session_work_budget(&self) -> Duration {
        self.ledger.worst_case_call() + self.store.op_timeout() * 2
    }

    /// Fail fast on settings that would make the worker misbehave silently.
    pub fn validate(&self) -> Result<()> {
        self.validate_worker()?;
        self.ledger.base_url()?;
        self.store.connection_url()?;
        Ok(())
    }

    /// The checks that do not depend on where the store and ledger live.
    pub fn validate_worker(&self) -> Result<()> {
        let positive = [
            ("inactivity_threshold_ms", self.inactivity_threshold_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("scan_batch_size", self.scan_batch_size as u64),
            ("max_concurrency", self.max_concurrency as u64),
            ("session_lease_ms", self.session_lease_ms),
            ("cycle_lease_ms", self.cycle_lease_ms),
            ("ledger.timeout_ms", self.ledger.timeout_ms),
            ("store.connect_timeout_ms", self.store.connect_timeout_ms),
            ("store.op_timeout_ms", self.store.op_timeout_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(FinalizerError::Config(format!("{name} must be greater than 0")));
        }
        if self.session_key_prefix.is_empty() {
            return Err(FinalizerError::Config(
                "session_key_prefix must not be empty".to_string(),
            ));
        }
        // lock entries must never match the session scan
        if self.lock_key_prefix.is_empty()
            || self.lock_key_prefix.starts_with(&self.session_key_prefix)
        {
            return Err(FinalizerError::Config(format!(
                "lock_key_prefix `{}` must be non-empty and must not start with session_key_prefix `{}`",
                self.lock_key_prefix, self.session_key_prefix
            )));
        }
        let budget = self.session_work_budget();
        if self.session_lease() <= budget {
            return Err(FinalizerError::Config(format!(
                "session_lease_ms ({}) must exceed the worst-case ledger call plus two store calls ({} ms)",
                self.session_lease_ms,
                budget.as_millis()
            )));
        }
        Ok(())
    }
}
