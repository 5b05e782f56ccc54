use fogwar_common::{AppearanceError, FogAppearance, VisibilityState};
use fogwar_kernel::{PolicyError, StorePolicy};
use fogwar_stream::{ProximityConfig, ProximityError};
use fogwar_sync::{ClientOptions, ReconnectPolicy, normalize_endpoint};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/api/fog/ws";
pub const CONFIG_FILE_NAME: &str = "fog_of_war.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("websocket endpoint is empty")]
    EmptyEndpoint,
    #[error("default state: {0}")]
    DefaultState(#[from] PolicyError),
    #[error("default fog appearance: {0}")]
    Appearance(#[from] AppearanceError),
    #[error("proximity: {0}")]
    Proximity(#[from] ProximityError),
    #[error("reconnect: {0}")]
    Reconnect(String),
    #[error("{0} must be non-zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximitySettings {
    pub check_radius: u32,
    pub scan_radius: u32,
    pub period_ms: u64,
}

impl Default for ProximitySettings {
    fn default() -> Self {
        Self {
            check_radius: 1,
            scan_radius: 2,
            period_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

/// Session configuration, stored as pretty JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    pub websocket_endpoint: String,
    pub debug_mode: bool,
    pub default_state: VisibilityState,
    pub default_fog_appearance: String,
    pub data_dir: PathBuf,
    pub proximity: ProximitySettings,
    pub reconnect: ReconnectSettings,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            websocket_endpoint: DEFAULT_ENDPOINT.into(),
            debug_mode: false,
            default_state: VisibilityState::Visible,
            default_fog_appearance: FogAppearance::default().to_string(),
            data_dir: PathBuf::from("fog_data"),
            proximity: ProximitySettings::default(),
            reconnect: ReconnectSettings::default(),
            connect_timeout_ms: 5000,
            close_timeout_ms: 2000,
        }
    }
}

impl FogConfig {
    /// Read the config at `path`, writing the defaults there first if it does
    /// not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if let Some(config) = Self::load_existing(path)? {
            return Ok(config);
        }
        let config = Self::default();
        config.save(path)?;
        tracing::info!(path = %path.display(), "wrote default fog config");
        Ok(config)
    }

    /// Read and validate the config at `path`; `None` when there is no file.
    pub fn load_existing(path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        tracing::info!(path = %path.display(), endpoint = %config.websocket_endpoint, "fog config loaded");
        Ok(Some(config))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store_policy()?;
        self.fog_appearance()?;
        self.proximity_config().validate()?;
        if self.websocket_endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        let r = &self.reconnect;
        if r.multiplier < 1.0 || !r.multiplier.is_finite() {
            return Err(ConfigError::Reconnect(format!("multiplier {} must be at least 1", r.multiplier)));
        }
        if !(0.0..=1.0).contains(&r.jitter) {
            return Err(ConfigError::Reconnect(format!("jitter {} outside 0..=1", r.jitter)));
        }
        if r.initial_delay_ms > r.max_delay_ms {
            return Err(ConfigError::Reconnect(format!(
                "initial delay {}ms exceeds max delay {}ms",
                r.initial_delay_ms, r.max_delay_ms
            )));
        }
        if r.max_attempts == Some(0) {
            return Err(ConfigError::Reconnect("max_attempts must be positive".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("connect_timeout_ms"));
        }
        if self.close_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("close_timeout_ms"));
        }
        Ok(())
    }

    pub fn store_policy(&self) -> Result<StorePolicy, PolicyError> {
        StorePolicy::new(self.default_state)
    }

    pub fn fog_appearance(&self) -> Result<FogAppearance, AppearanceError> {
        FogAppearance::parse(&self.default_fog_appearance)
    }

    pub fn proximity_config(&self) -> ProximityConfig {
        ProximityConfig {
            check_radius: self.proximity.check_radius,
            scan_radius: self.proximity.scan_radius,
            period: Duration::from_millis(self.proximity.period_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.reconnect;
        ReconnectPolicy {
            initial_delay: Duration::from_millis(r.initial_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            multiplier: r.multiplier,
            jitter: r.jitter,
            max_attempts: r.max_attempts,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            endpoint: self.websocket_endpoint.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }

    /// The endpoint as the client will use it.
    pub fn normalized_endpoint(&self) -> Option<String> {
        normalize_endpoint(&self.websocket_endpoint).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = FogConfig::load_or_create(&path).unwrap();
        assert_eq!(config, FogConfig::default());
        assert!(path.exists());
        assert_eq!(FogConfig::load_or_create(&path).unwrap(), config);
    }

    #[test]
    fn load_existing_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert_eq!(FogConfig::load_existing(&path).unwrap(), None);
        assert!(!path.exists());

        let custom = FogConfig {
            websocket_endpoint: "ws://fog.example.net/api/fog/ws".into(),
            ..FogConfig::default()
        };
        custom.save(&path).unwrap();
        assert_eq!(FogConfig::load_existing(&path).unwrap(), Some(custom));

        std::fs::write(&path, r#"{"default_state":"FOGGED"}"#).unwrap();
        assert!(matches!(FogConfig::load_existing(&path), Err(ConfigError::DefaultState(_))));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"websocket_endpoint":"fog.example.net","default_state":"HIDDEN","proximity":{"scan_radius":4}}"#,
        )
        .unwrap();
        let config = FogConfig::load_or_create(&path).unwrap();
        assert_eq!(config.default_state, VisibilityState::Hidden);
        assert_eq!(config.proximity.scan_radius, 4);
        assert_eq!(config.proximity.check_radius, 1);
        assert_eq!(config.close_timeout_ms, 2000);
        assert_eq!(
            config.normalized_endpoint().as_deref(),
            Some("ws://fog.example.net/api/fog/ws")
        );
    }

    #[test]
    fn validation_rejects_inconsistent_values() {
        let fogged = FogConfig {
            default_state: VisibilityState::Fogged,
            ..FogConfig::default()
        };
        assert!(matches!(fogged.validate(), Err(ConfigError::DefaultState(_))));

        let mut radii = FogConfig::default();
        radii.proximity.check_radius = 3;
        assert!(matches!(radii.validate(), Err(ConfigError::Proximity(_))));

        let appearance = FogConfig {
            default_fog_appearance: "Gray Concrete".into(),
            ..FogConfig::default()
        };
        assert!(matches!(appearance.validate(), Err(ConfigError::Appearance(_))));

        let mut jitter = FogConfig::default();
        jitter.reconnect.jitter = 1.5;
        assert!(matches!(jitter.validate(), Err(ConfigError::Reconnect(_))));

        let endpoint = FogConfig {
            websocket_endpoint: " ".into(),
            ..FogConfig::default()
        };
        assert!(matches!(endpoint.validate(), Err(ConfigError::EmptyEndpoint)));
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(FogConfig::load_or_create(&path), Err(ConfigError::Parse(_))));
    }
}
