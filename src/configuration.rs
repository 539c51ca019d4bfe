use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_aux::field_attributes::{
    deserialize_bool_from_anything, deserialize_number_from_string,
};

use crate::{dispatch::RetryPolicy, importer::DuplicatePolicy};

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub dispatch: DispatchSettings,
    pub template: TemplateSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub name: String,
    pub preferences_path: PathBuf,
    pub template_store_path: PathBuf,
    pub data_path: Option<PathBuf>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DispatchSettings {
    /// Ceiling on attempts per recipient, the first one included.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_multiplier: f64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_backoff_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub retry_jitter: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub inter_send_delay_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub connect_attempts: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub connect_backoff_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub connect_timeout_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub send_timeout_milliseconds: u64,
    pub duplicate_policy: DuplicatePolicy,
}

impl DispatchSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_milliseconds),
            multiplier: self.retry_backoff_multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_milliseconds),
            jitter: self.retry_jitter,
        }
    }

    /// The connection gets a flat backoff between attempts.
    pub fn connection_policy(&self) -> RetryPolicy {
        let backoff = Duration::from_millis(self.connect_backoff_milliseconds);
        RetryPolicy {
            max_attempts: self.connect_attempts,
            initial_backoff: backoff,
            multiplier: 1.0,
            max_backoff: backoff,
            jitter: false,
        }
    }

    pub fn inter_send_delay(&self) -> Duration {
        Duration::from_millis(self.inter_send_delay_milliseconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_milliseconds)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_milliseconds)
    }

    pub fn overridden_by(&self, preferences: &Preferences) -> Self {
        let mut settings = self.clone();
        if let Some(max_attempts) = preferences.max_attempts {
            settings.max_attempts = max_attempts;
        }
        if let Some(delay) = preferences.inter_send_delay_milliseconds {
            settings.inter_send_delay_milliseconds = delay;
        }
        settings
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct TemplateSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub paragraph_spacing: u32,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment.
    // Default to `local` if unspecified.
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT.");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        // E.g. `APP_DISPATCH__MAX_ATTEMPTS=5` would set `Settings.dispatch.max_attempts`
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

/// User choices remembered between runs. Every field is optional so older
/// files keep loading; unset values fall back to `Settings`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Preferences {
    pub max_attempts: Option<u32>,
    pub inter_send_delay_milliseconds: Option<u64>,
    pub paragraph_spacing: Option<u32>,
    pub last_data_path: Option<PathBuf>,
    pub last_selected_template: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum PreferencesError {
    #[error("couldn't write preferences, io error {0}")]
    Io(#[from] std::io::Error),
    #[error("couldn't encode preferences, {0}")]
    Format(#[from] serde_json::Error),
}

/// Preferences bound to their file: loaded once at startup, saved on change.
#[derive(Debug)]
pub struct PreferencesFile {
    path: PathBuf,
    preferences: Preferences,
}

impl PreferencesFile {
    /// A missing or unreadable file yields defaults rather than an error.
    pub fn load(path: &Path) -> Self {
        let preferences = std::fs::read_to_string(path)
            .ok()
            .and_then(|contents| match serde_json::from_str(&contents) {
                Ok(preferences) => Some(preferences),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %path.display(),
                        "Ignoring unreadable preferences"
                    );
                    None
                }
            })
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            preferences,
        }
    }

    pub fn get(&self) -> &Preferences {
        &self.preferences
    }

    pub fn update(
        &mut self,
        change: impl FnOnce(&mut Preferences),
    ) -> Result<(), PreferencesError> {
        change(&mut self.preferences);
        self.save()
    }

    fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.preferences)?)?;
        Ok(())
    }
}
