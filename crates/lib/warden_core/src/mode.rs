//! Operating mode selection.
//!
//! The mode is decided once from configuration at startup and never changes
//! afterwards. Services pick their backend from it when they are built; no
//! request-path code branches on it.

use std::fmt;

use serde::Serialize;

use crate::config::{ConfigError, DelegatedConfig};

/// Which authority owns identity and quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// SQLite-backed identity and quota bookkeeping.
    Local,
    /// External provider authenticates and bills; we proxy and enforce.
    Delegated,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Delegated => "delegated",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, process-wide mode decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSelector {
    mode: Mode,
}

impl ModeSelector {
    /// Decide the mode from the delegated-provider section.
    ///
    /// Delegated mode is selected only when `enabled` is set. An enabled
    /// provider without a usable base URL or API key is a fatal error rather
    /// than a silent fallback to local mode.
    pub fn from_config(delegated: &DelegatedConfig) -> Result<Self, ConfigError> {
        if !delegated.enabled {
            return Ok(Self { mode: Mode::Local });
        }
        if delegated.api_key.trim().is_empty() {
            return Err(ConfigError::Delegated("api_key is required".into()));
        }
        if delegated.base_url.trim().is_empty() {
            return Err(ConfigError::Delegated("base_url is required".into()));
        }
        url::Url::parse(&delegated.base_url)
            .map_err(|e| ConfigError::Delegated(format!("invalid base_url: {e}")))?;
        if delegated.timeout_secs == 0 {
            return Err(ConfigError::Delegated("timeout_secs must be positive".into()));
        }
        Ok(Self {
            mode: Mode::Delegated,
        })
    }

    /// Fixed selector, for tests and embedding.
    pub fn fixed(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// `true` when this process is authoritative for identity and quota.
    pub fn use_local(&self) -> bool {
        self.mode == Mode::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delegated(api_key: &str, base_url: &str) -> DelegatedConfig {
        DelegatedConfig {
            enabled: true,
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..DelegatedConfig::default()
        }
    }

    #[test]
    fn disabled_provider_selects_local() {
        let selector = ModeSelector::from_config(&DelegatedConfig::default()).unwrap();
        assert!(selector.use_local());
        assert_eq!(selector.mode(), Mode::Local);
    }

    #[test]
    fn configured_provider_selects_delegated() {
        let selector =
            ModeSelector::from_config(&delegated("key", "https://provider.example")).unwrap();
        assert!(!selector.use_local());
    }

    #[test]
    fn enabled_provider_without_key_fails_fast() {
        let err = ModeSelector::from_config(&delegated("", "https://provider.example"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Delegated(_)));
    }

    #[test]
    fn enabled_provider_with_bad_url_fails_fast() {
        assert!(ModeSelector::from_config(&delegated("key", "not a url")).is_err());
    }
}
