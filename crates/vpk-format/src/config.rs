//! Sectioned key/value configuration.
//!
//! Values are stored as raw strings and coerced on access, so the same
//! getters work for TOML, JSON and sealed `.vcf` sources.

use crate::value::{parse_value, TypedValue};
use crate::vcf::VcfContainer;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Source syntax of a configuration blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

/// Section -> key -> raw value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Config {
    /// Load a `.toml`, `.json` or `.vcf` file.
    ///
    /// A `.vcf` file needs `key`; its plaintext may be JSON or TOML.
    pub fn load<P: AsRef<Path>>(path: P, key: Option<&[u8]>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        log::debug!("Loading config {}", path.display());

        match extension.as_str() {
            "toml" => Self::parse(&std::fs::read(path)?, ConfigFormat::Toml),
            "json" => Self::parse(&std::fs::read(path)?, ConfigFormat::Json),
            "vcf" => {
                let key = key.ok_or_else(|| {
                    Error::InvalidFormat(format!("{} is encrypted, a key is required", path.display()))
                })?;
                let blob = VcfContainer::load(path)?.open(key)?;
                Self::parse(&blob, ConfigFormat::Json)
                    .or_else(|_| Self::parse(&blob, ConfigFormat::Toml))
            }
            other => Err(Error::InvalidFormat(format!(
                "unsupported config extension '{}'",
                other
            ))),
        }
    }

    /// Parse a configuration blob whose top level is a map of sections.
    pub fn parse(data: &[u8], format: ConfigFormat) -> Result<Self> {
        let root: serde_json::Value = match format {
            ConfigFormat::Json => serde_json::from_slice(data)?,
            ConfigFormat::Toml => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| Error::TomlError(e.to_string()))?;
                let table: toml::Table =
                    toml::from_str(text).map_err(|e| Error::TomlError(e.to_string()))?;
                serde_json::to_value(table)?
            }
        };

        let serde_json::Value::Object(sections) = root else {
            return Err(Error::InvalidFormat("config root must be a map".to_string()));
        };

        let mut config = Config::default();
        for (section, values) in sections {
            let serde_json::Value::Object(values) = values else {
                return Err(Error::InvalidFormat(format!(
                    "config key '{}' is not inside a section",
                    section
                )));
            };
            for (key, value) in values {
                let raw = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                config.set(&section, &key, raw);
            }
        }
        Ok(config)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn sections(&self) -> impl Iterator<Item = &String> {
        self.sections.keys()
    }

    fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }

    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.raw(section, key).unwrap_or(default).to_string()
    }

    pub fn get_int(&self, section: &str, key: &str, default: i64) -> Result<i64> {
        self.coerce(section, key, default, "an integer", TypedValue::as_i64)
    }

    pub fn get_float(&self, section: &str, key: &str, default: f64) -> Result<f64> {
        self.coerce(section, key, default, "a number", TypedValue::as_f64)
    }

    pub fn get_boolean(&self, section: &str, key: &str, default: bool) -> Result<bool> {
        self.coerce(section, key, default, "a boolean", TypedValue::as_bool)
    }

    /// Raw values of a section; empty when the section is absent.
    pub fn get_dict(&self, section: &str) -> BTreeMap<String, String> {
        self.sections.get(section).cloned().unwrap_or_default()
    }

    fn coerce<T>(
        &self,
        section: &str,
        key: &str,
        default: T,
        expected: &str,
        convert: impl Fn(&TypedValue) -> Option<T>,
    ) -> Result<T> {
        let Some(raw) = self.raw(section, key) else {
            return Ok(default);
        };
        convert(&parse_value(raw)).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "[{}] {} = '{}' is not {}",
                section, key, raw, expected
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[package]
author = "Valkyrie"
compression = "lz4"

[kdf]
time_cost = 3
memory_cost = 1024

[sync]
workers = "8"
full = true
ratio = 0.5
mirrors = ["a", "b"]
"#;

    #[test]
    fn test_toml_getters() {
        let config = Config::parse(SAMPLE.as_bytes(), ConfigFormat::Toml).unwrap();
        assert_eq!(config.get_string("package", "author", ""), "Valkyrie");
        assert_eq!(config.get_string("package", "info", "none"), "none");
        assert_eq!(config.get_int("kdf", "time_cost", 2).unwrap(), 3);
        assert_eq!(config.get_int("sync", "workers", 1).unwrap(), 8);
        assert_eq!(config.get_int("kdf", "parallelism", 4).unwrap(), 4);
        assert!(config.get_boolean("sync", "full", false).unwrap());
        assert_eq!(config.get_float("sync", "ratio", 1.0).unwrap(), 0.5);
        assert_eq!(config.get_float("kdf", "time_cost", 1.0).unwrap(), 3.0);
        assert_eq!(
            parse_value(&config.get_string("sync", "mirrors", "")),
            TypedValue::List(vec![
                TypedValue::String("a".to_string()),
                TypedValue::String("b".to_string())
            ])
        );
    }

    #[test]
    fn test_uncoercible_value() {
        let config = Config::parse(SAMPLE.as_bytes(), ConfigFormat::Toml).unwrap();
        assert!(matches!(
            config.get_int("package", "author", 0),
            Err(Error::InvalidFormat(_))
        ));
        assert!(matches!(
            config.get_boolean("kdf", "time_cost", false),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_json_and_get_dict() {
        let data = br#"{"package": {"author": "me", "info": "demo"}, "sync": {"workers": 2}}"#;
        let config = Config::parse(data, ConfigFormat::Json).unwrap();
        let dict = config.get_dict("package");
        assert_eq!(dict.len(), 2);
        assert_eq!(dict["info"], "demo");
        assert!(config.get_dict("missing").is_empty());
        assert_eq!(config.get_int("sync", "workers", 0).unwrap(), 2);
    }

    #[test]
    fn test_root_must_be_sections() {
        assert!(Config::parse(b"[1, 2]", ConfigFormat::Json).is_err());
        assert!(Config::parse(br#"{"loose": 1}"#, ConfigFormat::Json).is_err());
        assert!(matches!(
            Config::parse(b"not = = toml", ConfigFormat::Toml),
            Err(Error::TomlError(_))
        ));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempdir().unwrap();
        let key = [3u8; 32];

        let toml_path = dir.path().join("vpk.toml");
        std::fs::write(&toml_path, SAMPLE).unwrap();
        let plain = Config::load(&toml_path, None).unwrap();

        let vcf_path = dir.path().join("vpk.vcf");
        VcfContainer::seal(&key, SAMPLE.as_bytes())
            .unwrap()
            .save(&vcf_path)
            .unwrap();
        assert_eq!(Config::load(&vcf_path, Some(&key)).unwrap(), plain);
        assert!(matches!(
            Config::load(&vcf_path, None),
            Err(Error::InvalidFormat(_))
        ));

        let ini_path = dir.path().join("vpk.ini");
        std::fs::write(&ini_path, "[a]\nb=c\n").unwrap();
        assert!(matches!(
            Config::load(&ini_path, None),
            Err(Error::InvalidFormat(_))
        ));
    }
}
