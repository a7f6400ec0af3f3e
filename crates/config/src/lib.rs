//! # Config - statfile pool and classifier settings
//!
//! Two kinds of configuration feed the statfile pool:
//!
//! - [`PoolConfig`]: process-wide knobs (page locking, capacity, periodic
//!   flush timing), read from environment variables.
//! - [`ClassifierConfig`]: the statfiles owned by one classifier, each bound to
//!   a symbol, a path and a size in bytes. Loaded from a small text file.
//!
//! ## Environment
//!
//! ```text
//! STATFILE_MLOCK              lock mapped pages in RAM    (default: "false")
//! STATFILE_MAX_OPEN           open statfile hard limit    (default: 255)
//! STATFILE_INVALIDATE_SECS    periodic flush period       (default: 30)
//! STATFILE_INVALIDATE_JITTER  random extra delay, seconds (default: 30)
//! ```
//!
//! ## Classifier file format
//!
//! ```text
//! # <symbol> <path> <size-in-bytes>
//! BAYES_SPAM /var/lib/stat/bayes.spam 10485760
//! BAYES_HAM  /var/lib/stat/bayes.ham  10485760
//! ```
//!
//! Lines starting with `#` are comments. Empty lines are ignored.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard limit of simultaneously open statfiles.
pub const DEFAULT_MAX_OPEN: usize = 255;

/// Default period between two flushes of the pool, in seconds.
pub const DEFAULT_INVALIDATE_SECS: u64 = 30;

/// Default upper bound of the random delay added to each flush period.
pub const DEFAULT_INVALIDATE_JITTER: u64 = 30;

/// Process-wide settings of the statfile pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Try to `mlock` mapped statfiles.
    pub mlock: bool,
    /// Maximum number of statfiles open at once.
    pub max_open: usize,
    /// Base period of the background flush.
    pub invalidate_period: Duration,
    /// Upper bound of the random delay added to `invalidate_period`.
    pub invalidate_jitter: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mlock: false,
            max_open: DEFAULT_MAX_OPEN,
            invalidate_period: Duration::from_secs(DEFAULT_INVALIDATE_SECS),
            invalidate_jitter: Duration::from_secs(DEFAULT_INVALIDATE_JITTER),
        }
    }
}

impl PoolConfig {
    /// Reads the pool settings from the process environment.
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let mlock: bool = env_or("STATFILE_MLOCK", "false").parse().unwrap_or(false);
        let max_open: usize = env_or("STATFILE_MAX_OPEN", "255")
            .parse()
            .unwrap_or(DEFAULT_MAX_OPEN);
        let period: u64 = env_or("STATFILE_INVALIDATE_SECS", "30")
            .parse()
            .unwrap_or(DEFAULT_INVALIDATE_SECS);
        let jitter: u64 = env_or("STATFILE_INVALIDATE_JITTER", "30")
            .parse()
            .unwrap_or(DEFAULT_INVALIDATE_JITTER);

        Self {
            mlock,
            max_open,
            invalidate_period: Duration::from_secs(period),
            invalidate_jitter: Duration::from_secs(jitter),
        }
    }
}

/// One statfile owned by a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatfileConfig {
    /// Symbol the classifier registers for this statfile.
    pub symbol: String,
    /// Location of the backing file.
    pub path: PathBuf,
    /// Desired size of the file in bytes.
    pub size: u64,
}

/// The set of statfiles belonging to one classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Classifier name, used in diagnostics.
    pub name: String,
    /// Statfiles in declaration order.
    pub statfiles: Vec<StatfileConfig>,
}

impl ClassifierConfig {
    /// Creates an empty classifier configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statfiles: Vec::new(),
        }
    }

    /// Registers a statfile for `symbol`.
    pub fn add_statfile(
        &mut self,
        symbol: impl Into<String>,
        path: impl Into<PathBuf>,
        size: u64,
    ) -> &mut Self {
        self.statfiles.push(StatfileConfig {
            symbol: symbol.into(),
            path: path.into(),
            size,
        });
        self
    }

    /// Returns the statfile registered for `symbol`, if any.
    ///
    /// When a symbol is declared twice the first declaration wins.
    pub fn statfile(&self, symbol: &str) -> Option<&StatfileConfig> {
        self.statfiles.iter().find(|st| st.symbol == symbol)
    }

    /// Loads a classifier configuration from a `<symbol> <path> <size>` file.
    ///
    /// The classifier is named after the file stem.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open classifier config at {}", path.display()))?;
        let reader = BufReader::new(file);

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("classifier")
            .to_string();
        let mut cfg = Self::new(name);

        for (line_num, line) in reader.lines().enumerate() {
            let line =
                line.with_context(|| format!("failed to read config line {}", line_num + 1))?;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            let [symbol, st_path, size] = fields.as_slice() else {
                bail!(
                    "config line {}: expected '<symbol> <path> <size>': {}",
                    line_num + 1,
                    trimmed
                );
            };

            let size: u64 = size.parse().with_context(|| {
                format!("config line {}: invalid size '{}'", line_num + 1, size)
            })?;

            cfg.add_statfile(*symbol, *st_path, size);
        }

        Ok(cfg)
    }
}
