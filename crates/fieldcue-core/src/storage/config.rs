//! TOML-based application configuration.
//!
//! Stores:
//! - Where recorded clips live on disk
//! - Playback defaults applied to states that do not override them
//! - Scenes, each a named state sequence with per-state settings
//! - Debrief questionnaires referenced by scenes
//!
//! Configuration is stored at `~/.config/fieldcue/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::{ConfigError, ValidationError};
use crate::journey::{
    AudioAssignment, ClipId, DebriefForm, DebriefId, DebriefQuestion, JourneyConfig, PlaybackMode,
    QuestionKind, Repetitions, StateName,
};

/// Per-state overrides inside a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSettings {
    pub name: StateName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// Empty means every clip recorded for the state.
    #[serde(default)]
    pub clips: Vec<ClipId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PlaybackMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<Repetitions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debrief: Option<DebriefId>,
}

impl StateSettings {
    pub fn named(name: impl Into<StateName>) -> Self {
        Self {
            name: name.into(),
            interval_ms: None,
            clips: Vec::new(),
            mode: None,
            repetitions: None,
            debrief: None,
        }
    }
}

/// A named state sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub states: Vec<StateSettings>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/fieldcue/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Clip library root; `<data dir>/audio` when empty.
    #[serde(default)]
    pub audio_root: String,
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    #[serde(default)]
    pub default_repetitions: Repetitions,
    #[serde(default)]
    pub default_mode: PlaybackMode,
    #[serde(default)]
    pub scenes: Vec<SceneConfig>,
    #[serde(default)]
    pub debriefs: Vec<DebriefForm>,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_scene() -> SceneConfig {
    let mut trigger = StateSettings::named("Trigger");
    trigger.debrief = Some("after_action".into());
    SceneConfig {
        name: "patrol".into(),
        description: "Approach drill from first contact to trigger".into(),
        states: vec![
            StateSettings::named("Active"),
            StateSettings::named("Spotted"),
            StateSettings::named("Proximity"),
            trigger,
        ],
    }
}

fn default_debrief() -> DebriefForm {
    DebriefForm {
        id: "after_action".into(),
        title: "After action".into(),
        questions: vec![
            DebriefQuestion {
                id: "stress".into(),
                prompt: "How stressful was the approach?".into(),
                kind: QuestionKind::Scale,
                min: Some(1),
                max: Some(5),
            },
            DebriefQuestion {
                id: "completed".into(),
                prompt: "Did you reach the trigger point?".into(),
                kind: QuestionKind::YesNo,
                min: None,
                max: None,
            },
            DebriefQuestion {
                id: "notes".into(),
                prompt: "Notes".into(),
                kind: QuestionKind::Text,
                min: None,
                max: None,
            },
        ],
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio_root: String::new(),
            default_interval_ms: default_interval_ms(),
            default_repetitions: Repetitions::default(),
            default_mode: PlaybackMode::default(),
            scenes: vec![default_scene()],
            debriefs: vec![default_debrief()],
        }
    }
}

impl SceneConfig {
    /// Build the journey configuration for this scene.
    ///
    /// States without their own interval, mode or repetitions inherit the
    /// defaults from `config`.
    ///
    /// # Errors
    /// Returns the validation failure of the resulting journey config, or
    /// `UnknownState` when a state references a debrief that does not exist.
    pub fn journey_config(&self, config: &Config) -> Result<JourneyConfig, ValidationError> {
        let states = self.states.iter().map(|s| s.name.clone()).collect();
        let mut journey = JourneyConfig::new(self.name.clone(), states);

        for state in &self.states {
            journey = journey
                .with_interval(
                    &state.name,
                    state.interval_ms.unwrap_or(config.default_interval_ms),
                )
                .with_audio(
                    &state.name,
                    AudioAssignment {
                        clips: state.clips.clone(),
                        mode: state.mode.unwrap_or(config.default_mode),
                        repetitions: state.repetitions.unwrap_or(config.default_repetitions),
                    },
                );
            if let Some(debrief) = &state.debrief {
                if config.debrief_form(debrief).is_none() {
                    return Err(ValidationError::UnknownState {
                        setting: format!("debrief '{debrief}'"),
                        state: state.name.clone(),
                    });
                }
                journey = journey.with_debrief(&state.name, debrief.clone());
            }
        }

        journey.validate()?;
        Ok(journey)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = match current {
                serde_json::Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let slot = match current {
                serde_json::Value::Array(items) => {
                    let index = part.parse::<usize>().map_err(|_| unknown())?;
                    items.get_mut(index).ok_or_else(unknown)?
                }
                serde_json::Value::Object(obj) => obj.get_mut(part).ok_or_else(unknown)?,
                _ => return Err(unknown()),
            };

            if parts.peek().is_none() {
                let new_value = match slot {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    // Repetitions serialize as a number but also accept "unbounded".
                    serde_json::Value::Number(_) => match value.parse::<u64>() {
                        Ok(n) => serde_json::Value::Number(n.into()),
                        Err(_) => serde_json::Value::String(value.into()),
                    },
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };
                *slot = new_value;
                return Ok(());
            }
            current = slot;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from `~/.config/fieldcue/config.toml`, writing defaults on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults there if it is missing.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Persist to an explicit path.
    ///
    /// # Errors
    ///
    /// Same as [`Config::save`].
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    ///
    /// Array elements are addressed by index, e.g. `scenes.0.name`.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Update a value by dot-separated key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit
    /// the field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Clip library root, resolved against the data directory when unset.
    ///
    /// # Errors
    ///
    /// Returns `NoDataDir` if no default location can be determined.
    pub fn audio_root(&self) -> Result<PathBuf, ConfigError> {
        if self.audio_root.trim().is_empty() {
            Ok(data_dir()?.join("audio"))
        } else {
            Ok(PathBuf::from(&self.audio_root))
        }
    }

    pub fn find_scene(&self, name: &str) -> Result<&SceneConfig, ConfigError> {
        self.scenes
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::SceneNotFound(name.to_string()))
    }

    pub fn debrief_form(&self, id: &str) -> Option<&DebriefForm> {
        self.debriefs.iter().find(|d| d.id == id)
    }
}
