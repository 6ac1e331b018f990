use plr_types::{PlrError, PlrResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_BASE_URL: &str = "https://api.wandb.ai";

pub const ENV_API_KEY: &str = "WANDB_API_KEY";
pub const ENV_MODE: &str = "WANDB_MODE";
pub const ENV_ENTITY: &str = "WANDB_ENTITY";
pub const ENV_BASE_URL: &str = "WANDB_BASE_URL";
pub const ENV_RUN_NAME: &str = "WANDB_NAME";

/// Where run data goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingMode {
    #[default]
    Online,
    Offline,
    Disabled,
}

impl FromStr for TrackingMode {
    type Err = PlrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online" | "run" => Ok(TrackingMode::Online),
            "offline" | "dryrun" => Ok(TrackingMode::Offline),
            "disabled" => Ok(TrackingMode::Disabled),
            other => Err(PlrError::Config(format!(
                "{ENV_MODE} must be online, offline or disabled, got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMode::Online => write!(f, "online"),
            TrackingMode::Offline => write!(f, "offline"),
            TrackingMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// Tracking service settings, normally read from the environment
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSettings {
    pub mode: TrackingMode,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub entity: Option<String>,
    /// Display name for the run
    pub run_name: Option<String>,
    pub base_url: String,
}

// Keeps the API key out of logs
impl fmt::Debug for TrackingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSettings")
            .field("mode", &self.mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("entity", &self.entity)
            .field("run_name", &self.run_name)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            mode: TrackingMode::Online,
            api_key: None,
            entity: None,
            run_name: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl TrackingSettings {
    pub fn from_env() -> PlrResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> PlrResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = match non_empty(ENV_MODE) {
            Some(raw) => raw.parse()?,
            None => TrackingMode::default(),
        };

        Ok(Self {
            mode,
            api_key: non_empty(ENV_API_KEY).map(|k| k.trim().to_string()),
            entity: non_empty(ENV_ENTITY),
            run_name: non_empty(ENV_RUN_NAME),
            base_url: non_empty(ENV_BASE_URL)
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn with_mode(mut self, mode: TrackingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Mode actually used: online without a key falls back to offline
    pub fn effective_mode(&self) -> TrackingMode {
        match (self.mode, &self.api_key) {
            (TrackingMode::Online, None) => TrackingMode::Offline,
            (mode, _) => mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let settings = TrackingSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.mode, TrackingMode::Online);
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.effective_mode(), TrackingMode::Offline);
    }

    #[test]
    fn reads_all_variables() {
        let settings = TrackingSettings::from_lookup(lookup(&[
            (ENV_API_KEY, "abc123"),
            (ENV_MODE, "ONLINE"),
            (ENV_ENTITY, "lab"),
            (ENV_BASE_URL, "http://localhost:8080/"),
            (ENV_RUN_NAME, "baseline"),
        ]))
        .unwrap();

        assert_eq!(settings.run_name.as_deref(), Some("baseline"));

        assert_eq!(settings.api_key.as_deref(), Some("abc123"));
        assert_eq!(settings.entity.as_deref(), Some("lab"));
        assert_eq!(settings.base_url, "http://localhost:8080");
        assert_eq!(settings.effective_mode(), TrackingMode::Online);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("dryrun".parse::<TrackingMode>().unwrap(), TrackingMode::Offline);
        assert_eq!("disabled".parse::<TrackingMode>().unwrap(), TrackingMode::Disabled);
        assert!("sometimes".parse::<TrackingMode>().is_err());
        assert!(TrackingSettings::from_lookup(lookup(&[(ENV_MODE, "bogus")])).is_err());
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let settings = TrackingSettings::from_lookup(lookup(&[(ENV_API_KEY, "  ")])).unwrap();
        assert_eq!(settings.api_key, None);
    }

    #[test]
    fn debug_hides_key() {
        let settings = TrackingSettings::default().with_api_key("secret");
        assert!(!format!("{settings:?}").contains("secret"));
    }
}
