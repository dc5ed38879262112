use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    data_dir::{DATA_DIR_ENV, DataDir},
    error::{Error, Result},
    schema::Schema,
    store::{DEFAULT_TIMEOUT, Store},
};

pub const STORE_URL_ENV: &str = "LITVEC_STORE_URL";
pub const SCHEMA_ENV: &str = "LITVEC_SCHEMA";
pub const MODE_ENV: &str = "LITVEC_MODE";
pub const TIMEOUT_ENV: &str = "LITVEC_STORE_TIMEOUT_SECS";

/// Deployment mode. Decides the default schema and whether the schema may
/// be created on the fly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Production,
    #[default]
    Test,
}

impl Mode {
    pub fn is_production(&self) -> bool {
        *self == Mode::Production
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Production => "production",
            Mode::Test => "test",
        })
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Mode::Production),
            "test" | "testing" => Ok(Mode::Test),
            other => Err(Error::Config(format!(
                "unknown mode '{other}' (expected production or test)"
            ))),
        }
    }
}

/// Resolved store configuration.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub store_url: String,
    pub schema: Schema,
    pub mode: Mode,
    pub timeout: Duration,
}

impl StoreSettings {
    /// Read settings from the `LITVEC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup`, which maps a variable name to its
    /// value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = get(MODE_ENV)
            .map(|m| m.parse::<Mode>())
            .transpose()?
            .unwrap_or_default();

        let timeout = match get(TIMEOUT_ENV) {
            Some(raw) => parse_timeout(&raw)?,
            None => DEFAULT_TIMEOUT,
        };

        let store_url = match get(STORE_URL_ENV) {
            Some(url) => url,
            None => default_store_url(get(DATA_DIR_ENV).map(PathBuf::from))?,
        };

        Self::new(store_url, mode, get(SCHEMA_ENV).as_deref(), timeout)
    }

    pub fn new(
        store_url: String,
        mode: Mode,
        schema_override: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::Config("store timeout must be non-zero".into()));
        }
        Ok(Self {
            store_url,
            schema: Schema::for_mode(mode.is_production(), schema_override)?,
            mode,
            timeout,
        })
    }

    pub fn open_store(&self) -> Result<Store> {
        Store::open(&self.store_url, self.timeout)
    }
}

/// The store file inside the data directory.
pub fn default_store_url(data_dir: Option<PathBuf>) -> Result<String> {
    let dir = DataDir::resolve(data_dir.as_deref())?;
    Ok(dir.store_path().display().to_string())
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| {
            Error::Config(format!(
                "{TIMEOUT_ENV} must be whole seconds, got '{raw}'"
            ))
        })?;
    Ok(Duration::from_secs(secs))
}
