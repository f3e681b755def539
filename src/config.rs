//! Konfiguration über Umgebungsvariablen
//!
//! | Variable            | Default                          |
//! |---------------------|----------------------------------|
//! | `RADIO_ID`          | Abfrage / zufällige ID           |
//! | `RADIO_AUTO_ANSWER` | `true`                           |
//! | `RADIO_VOLUME`      | `0.6`                            |
//! | `RADIO_DATA_DIR`    | Datenverzeichnis des Benutzers   |
//! | `RADIO_JSON_STATUS` | `false`                          |

use crate::audio::DEFAULT_VOLUME;
use crate::coordinator::CoordinatorConfig;
use std::path::PathBuf;

pub const ENV_ID: &str = "RADIO_ID";
pub const ENV_AUTO_ANSWER: &str = "RADIO_AUTO_ANSWER";
pub const ENV_VOLUME: &str = "RADIO_VOLUME";
pub const ENV_DATA_DIR: &str = "RADIO_DATA_DIR";
pub const ENV_JSON_STATUS: &str = "RADIO_JSON_STATUS";

#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    /// Antwort auf die Erststart-Abfrage
    pub identity: Option<String>,
    pub auto_answer: bool,
    pub volume: f32,
    /// `None` = Standardverzeichnis
    pub data_dir: Option<PathBuf>,
    /// Statusmeldungen als JSON-Zeilen ausgeben
    pub json_status: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            identity: None,
            auto_answer: true,
            volume: DEFAULT_VOLUME,
            data_dir: None,
            json_status: false,
        }
    }
}

impl RadioConfig {
    /// Liest die Konfiguration aus der Prozessumgebung
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Liest die Konfiguration über eine beliebige Lookup-Funktion
    ///
    /// Ungültige Werte werden mit einer Warnung durch den Default ersetzt.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let auto_answer = match value(ENV_AUTO_ANSWER) {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                tracing::warn!("Ignoring invalid {}='{}'", ENV_AUTO_ANSWER, raw);
                defaults.auto_answer
            }),
            None => defaults.auto_answer,
        };

        let volume = match value(ENV_VOLUME) {
            Some(raw) => match raw.parse::<f32>() {
                Ok(v) if !v.is_nan() => v.clamp(0.0, 1.0),
                _ => {
                    tracing::warn!("Ignoring invalid {}='{}'", ENV_VOLUME, raw);
                    defaults.volume
                }
            },
            None => defaults.volume,
        };

        let json_status = value(ENV_JSON_STATUS)
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(defaults.json_status);

        Self {
            identity: value(ENV_ID),
            auto_answer,
            volume,
            data_dir: value(ENV_DATA_DIR).map(PathBuf::from),
            json_status,
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            auto_answer: self.auto_answer,
            volume: self.volume,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> RadioConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RadioConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config, RadioConfig::default());
        assert!(config.auto_answer);
        assert_eq!(config.volume, 0.6);
        assert_eq!(config.coordinator(), CoordinatorConfig::default());
    }

    #[test]
    fn test_values_from_environment() {
        let config = config(&[
            (ENV_ID, " alice "),
            (ENV_AUTO_ANSWER, "off"),
            (ENV_VOLUME, "0.25"),
            (ENV_DATA_DIR, "/tmp/radio"),
            (ENV_JSON_STATUS, "1"),
        ]);

        assert_eq!(config.identity.as_deref(), Some("alice"));
        assert!(!config.auto_answer);
        assert_eq!(config.volume, 0.25);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/radio")));
        assert!(config.json_status);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[
            (ENV_ID, "   "),
            (ENV_AUTO_ANSWER, "maybe"),
            (ENV_VOLUME, "loud"),
        ]);

        assert_eq!(config.identity, None);
        assert!(config.auto_answer);
        assert_eq!(config.volume, 0.6);
    }

    #[test]
    fn test_volume_is_clamped() {
        assert_eq!(config(&[(ENV_VOLUME, "3")]).volume, 1.0);
        assert_eq!(config(&[(ENV_VOLUME, "-1")]).volume, 0.0);
    }
}
