//! Process-wide configuration.
//!
//! Built once at startup and shared read-only by every request as an
//! `Arc<Config>`. A request that needs different settings clones it.

use std::env;

/// Application configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Value of the `x-powered-by` header. `None` disables the banner.
    pub powered_by: Option<String>,
    /// Deployment environment name, e.g. `development` or `production`.
    pub env: String,
}

impl Config {
    /// Reads `FERRULE_ENV` and `FERRULE_POWERED_BY` on top of the defaults.
    ///
    /// An empty `FERRULE_POWERED_BY` disables the banner.
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            powered_by: match var("FERRULE_POWERED_BY") {
                Some(by) if by.is_empty() => None,
                Some(by) => Some(by),
                None => Some("ferrule".to_owned()),
            },
            env: var("FERRULE_ENV").unwrap_or_else(|| "development".to_owned()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            powered_by: Some("ferrule".to_owned()),
            env: env::var("FERRULE_ENV").unwrap_or_else(|_| "development".to_owned()),
        }
    }
}
