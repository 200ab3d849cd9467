//! Store configuration, persisted as `key=value` lines in `{root}/config`.

use crate::error::{Error, Result};
use crate::hash::Algorithm;
use crate::lock::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// File name of the config inside the store root.
pub const CONFIG_FILE: &str = "config";

/// Settings for a store handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub algorithm: Algorithm,
    /// How long an index update waits for the lock.
    pub lock_timeout: Duration,
    /// How often a waiting update retries the lock.
    pub lock_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Blake3,
            lock_timeout: DEFAULT_TIMEOUT,
            lock_poll: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Config {
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_poll(mut self, interval: Duration) -> Self {
        self.lock_poll = interval;
        self
    }

    /// Parse config file content. Unknown keys are ignored.
    pub fn parse(content: &str, root: &Path) -> Result<Self> {
        let mut version = None;
        let mut algo = None;
        let mut config = Config::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim();
                match key.trim() {
                    "version" => version = Some(value),
                    "algo" => algo = Some(value),
                    "lock_timeout_ms" => {
                        config.lock_timeout = Duration::from_millis(parse_millis(value, root)?)
                    }
                    "lock_poll_ms" => {
                        config.lock_poll = Duration::from_millis(parse_millis(value, root)?)
                    }
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(Error::invalid_store(
                root,
                format!("Unsupported config version: {:?}", version),
            ));
        }

        let algo = algo.ok_or_else(|| Error::invalid_store(root, "Missing algo in config"))?;
        config.algorithm = Algorithm::parse(algo)?;
        config.validate(root)?;
        Ok(config)
    }

    /// Check that the settings can drive a store.
    ///
    /// A zero poll interval would spin on a held lock, so it is rejected.
    pub fn validate(&self, root: &Path) -> Result<()> {
        if self.lock_poll.is_zero() {
            return Err(Error::invalid_store(root, "lock_poll_ms must be greater than zero"));
        }
        Ok(())
    }

    /// Render the config in its on-disk form.
    pub fn render(&self) -> String {
        format!(
            "version=1\nalgo={}\nlock_timeout_ms={}\nlock_poll_ms={}\n",
            self.algorithm.as_str(),
            self.lock_timeout.as_millis(),
            self.lock_poll.as_millis()
        )
    }

    /// Read `{root}/config`, or `None` if the store has none yet.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Self::parse(&content, root).map(Some)
    }

    /// Write `{root}/config`, replacing any existing file atomically.
    pub fn save(&self, root: &Path) -> Result<()> {
        let mut temp = NamedTempFile::new_in(root)?;
        temp.write_all(self.render().as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(root.join(CONFIG_FILE))?;
        Ok(())
    }
}

fn parse_millis(value: &str, root: &Path) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::invalid_store(root, format!("Invalid duration in config: {}", value)))
}
