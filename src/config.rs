// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Sectioned key/value configuration persisted as a TOML file.
//!
//! Keys are addressed as `section.key`. Every typed getter takes a default: if the key is
//! missing or its value cannot be read as the requested type, the default is written back
//! into the store (and to disk when auto-save is enabled). A configuration file therefore
//! documents itself after the first run.
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use toml::value::Table;
use toml::Value;

use crate::exception::{TeleopException, TeleopResult};

/// Environment variable that overrides the default configuration path.
pub const CONFIG_PATH_VARIABLE: &str = "TELEOP_CONFIG";
/// Configuration file used when neither a path argument nor the environment variable is set.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

const FILE_HEADER: &str = "# Haptic teleoperation configuration\n\
# Missing keys are filled in with their defaults on first use.\n\n";

/// A configuration store shared between the tick contexts and the control context.
pub type SharedConfig = Arc<Mutex<ConfigStore>>;

/// In-memory view of the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    auto_save: bool,
    /// set when the file had syntax errors; it is never overwritten then
    read_only: bool,
    table: Table,
}

fn split_key(key: &str) -> TeleopResult<(&str, &str)> {
    match key.find('.') {
        Some(index) if index > 0 && index + 1 < key.len() => Ok((&key[..index], &key[index + 1..])),
        _ => Err(TeleopException::ConfigInvalid {
            key: key.to_string(),
            message: "keys must have the form section.key".to_string(),
        }),
    }
}

/// Keeps every line of `content` that still parses together with the lines before it.
fn salvage(content: &str, path: &Path) -> Table {
    let mut kept = String::new();
    for (number, line) in content.lines().enumerate() {
        let candidate = format!("{}{}\n", kept, line);
        if toml::from_str::<Table>(&candidate).is_ok() {
            kept = candidate;
        } else {
            warn!("{}:{}: ignoring {:?}", path.display(), number + 1, line.trim());
        }
    }
    toml::from_str::<Table>(&kept).unwrap_or_default()
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ConfigStore {
    /// Resolves the configuration path: explicit argument first, then the `TELEOP_CONFIG`
    /// environment variable, then `config.toml` in the working directory.
    pub fn resolve_path(argument: Option<&Path>) -> PathBuf {
        if let Some(path) = argument {
            return path.to_path_buf();
        }
        match env::var(CONFIG_PATH_VARIABLE) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Opens the configuration at `path`.
    ///
    /// A missing file is not an error: the store starts empty and every value falls back to
    /// its default. A file with syntax errors keeps the values of all readable lines and is
    /// opened read-only, so it is never replaced by defaults.
    pub fn open<P: AsRef<Path>>(path: P, auto_save: bool) -> ConfigStore {
        let path = path.as_ref().to_path_buf();
        let mut read_only = false;
        let table = match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<Table>(&content) {
                Ok(table) => {
                    info!("loaded configuration from {}", path.display());
                    table
                }
                Err(e) => {
                    warn!(
                        "cannot parse {}: {}, changes will not be saved",
                        path.display(),
                        e
                    );
                    read_only = true;
                    salvage(&content, &path)
                }
            },
            Err(e) => {
                warn!(
                    "cannot read {}: {}, using defaults",
                    path.display(),
                    e
                );
                Table::new()
            }
        };
        ConfigStore {
            path: Some(path),
            auto_save,
            read_only,
            table,
        }
    }

    /// A store that never touches the file system.
    pub fn in_memory() -> ConfigStore {
        ConfigStore {
            path: None,
            auto_save: false,
            read_only: false,
            table: Table::new(),
        }
    }

    /// Parses a store from TOML text without binding it to a file.
    pub fn from_toml_str(content: &str) -> TeleopResult<ConfigStore> {
        let table = toml::from_str::<Table>(content).map_err(|e| TeleopException::ConfigIo {
            message: e.to_string(),
        })?;
        Ok(ConfigStore {
            path: None,
            auto_save: false,
            read_only: false,
            table,
        })
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_auto_save(&mut self, auto_save: bool) {
        self.auto_save = auto_save;
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    /// True if the file could not be parsed completely.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Writes the store to its file.
    pub fn save(&self) -> TeleopResult<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        if self.read_only {
            return Err(TeleopException::ConfigIo {
                message: format!(
                    "{} has syntax errors, fix it by hand before saving",
                    path.display()
                ),
            });
        }
        let body = toml::to_string(&self.table).map_err(|e| TeleopException::ConfigIo {
            message: e.to_string(),
        })?;
        fs::write(path, format!("{}{}", FILE_HEADER, body)).map_err(|e| {
            TeleopException::ConfigIo {
                message: format!("{}: {}", path.display(), e),
            }
        })?;
        debug!("saved configuration to {}", path.display());
        Ok(())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// Names of all sections, sorted.
    pub fn sections(&self) -> Vec<String> {
        self.table
            .iter()
            .filter(|(_, value)| value.is_table())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Keys of a section, sorted. Empty if the section does not exist.
    pub fn keys(&self, section: &str) -> Vec<String> {
        match self.table.get(section).and_then(Value::as_table) {
            Some(table) => table.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn value(&self, key: &str) -> Option<&Value> {
        let (section, name) = split_key(key).ok()?;
        self.table.get(section)?.as_table()?.get(name)
    }

    fn set_value(&mut self, key: &str, value: Value) {
        let (section, name) = match split_key(key) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        let section_value = self
            .table
            .entry(section.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !section_value.is_table() {
            warn!("replacing non-table value of section {}", section);
            *section_value = Value::Table(Table::new());
        }
        if let Value::Table(table) = section_value {
            table.insert(name.to_string(), value);
        }
        if self.auto_save && !self.read_only {
            if let Err(e) = self.save() {
                warn!("{}", e);
            }
        }
    }

    /// Stores `default` under `key` and returns it.
    fn fill_default<T: Clone + Into<Value>>(&mut self, key: &str, default: T, invalid: bool) -> T {
        if invalid {
            warn!("invalid value for {}, falling back to default", key);
        } else {
            debug!("{} not configured, writing default", key);
        }
        self.set_value(key, default.clone().into());
        default
    }

    pub fn get_string(&mut self, key: &str, default: &str) -> String {
        let text = match self.value(key) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Integer(value)) => Some(value.to_string()),
            Some(Value::Float(value)) => Some(value.to_string()),
            Some(Value::Boolean(value)) => Some(value.to_string()),
            Some(_) => None,
            None => return self.fill_default(key, default.to_string(), false),
        };
        match text {
            Some(text) => text,
            None => self.fill_default(key, default.to_string(), true),
        }
    }

    pub fn get_i64(&mut self, key: &str, default: i64) -> i64 {
        let parsed = match self.value(key) {
            Some(Value::Integer(value)) => Some(*value),
            Some(Value::Float(value)) if value.fract() == 0. => Some(*value as i64),
            Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
            Some(_) => None,
            None => return self.fill_default(key, default, false),
        };
        match parsed {
            Some(value) => value,
            None => self.fill_default(key, default, true),
        }
    }

    pub fn get_f64(&mut self, key: &str, default: f64) -> f64 {
        let parsed = match self.value(key) {
            Some(Value::Float(value)) => Some(*value),
            Some(Value::Integer(value)) => Some(*value as f64),
            Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
            Some(_) => None,
            None => return self.fill_default(key, default, false),
        };
        match parsed {
            Some(value) if value.is_finite() => value,
            _ => self.fill_default(key, default, true),
        }
    }

    pub fn get_bool(&mut self, key: &str, default: bool) -> bool {
        let parsed = match self.value(key) {
            Some(Value::Boolean(value)) => Some(*value),
            Some(Value::Integer(value)) if *value == 0 || *value == 1 => Some(*value == 1),
            Some(Value::String(text)) => parse_bool(text),
            Some(_) => None,
            None => return self.fill_default(key, default, false),
        };
        match parsed {
            Some(value) => value,
            None => self.fill_default(key, default, true),
        }
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.set_value(key, Value::String(value.to_string()));
    }

    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.set_value(key, Value::Integer(value));
    }

    pub fn set_f64(&mut self, key: &str, value: f64) {
        self.set_value(key, Value::Float(value));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set_value(key, Value::Boolean(value));
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigStore;
    use std::fs;
    use std::path::PathBuf;

    fn temp_file(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("teleop-config-{}-{}.toml", std::process::id(), name));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn missing_key_persists_default() {
        let path = temp_file("missing");
        {
            let mut config = ConfigStore::open(&path, true);
            assert_eq!(config.get_f64("device1.position_scale", 1000.), 1000.);
            assert!(config.has_key("device1.position_scale"));
        }
        let mut reloaded = ConfigStore::open(&path, false);
        assert!(reloaded.has_key("device1.position_scale"));
        assert_eq!(reloaded.get_f64("device1.position_scale", 5.), 1000.);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn string_typed_values_are_accepted() {
        let mut config = ConfigStore::from_toml_str(
            r#"
            [robot1]
            ip = "10.0.0.2"
            port = "9090"
            [device1]
            rotation_scale = "0.5"
            [ui]
            auto_save_config = "yes"
            "#,
        )
        .unwrap();
        assert_eq!(config.get_string("robot1.ip", "x"), "10.0.0.2");
        assert_eq!(config.get_i64("robot1.port", 8080), 9090);
        assert_eq!(config.get_f64("device1.rotation_scale", 1.), 0.5);
        assert!(config.get_bool("ui.auto_save_config", false));
    }

    #[test]
    fn invalid_value_falls_back_and_is_replaced() {
        let mut config = ConfigStore::from_toml_str("[robot1]\nport = \"eighty\"\n").unwrap();
        assert_eq!(config.get_i64("robot1.port", 8080), 8080);
        assert_eq!(config.get_string("robot1.port", ""), "8080");
    }

    #[test]
    fn boolean_spellings() {
        let mut config = ConfigStore::in_memory();
        for (text, expected) in [("on", true), ("OFF", false), ("1", true), ("no", false)].iter() {
            config.set_string("gripper.block_mode", text);
            assert_eq!(config.get_bool("gripper.block_mode", !expected), *expected);
        }
    }

    #[test]
    fn sections_and_keys_are_listed() {
        let mut config = ConfigStore::in_memory();
        config.set_i64("system.control_frequency", 10);
        config.set_string("device_names.device1", "left");
        config.set_bool("system.use_debug", false);
        assert_eq!(config.sections(), vec!["device_names", "system"]);
        assert_eq!(
            config.keys("system"),
            vec!["control_frequency", "use_debug"]
        );
        assert!(config.keys("nothing").is_empty());
    }

    #[test]
    fn save_and_reload_keeps_values() {
        let path = temp_file("save");
        let mut config = ConfigStore::open(&path, false);
        config.set_f64("device2.spring_stiffness", 0.25);
        config.set_string("device2_mapping.end_effector_type", "scissors");
        assert!(!path.exists());
        config.save().unwrap();
        let mut reloaded = ConfigStore::open(&path, false);
        assert_eq!(reloaded.get_f64("device2.spring_stiffness", 0.), 0.25);
        assert_eq!(
            reloaded.get_string("device2_mapping.end_effector_type", "gripper"),
            "scissors"
        );
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_with_syntax_error_is_never_overwritten() {
        let path = temp_file("syntax");
        let content = "[robot1]\nip = \"10.1.2.3\"\nbad line here\n\n[device1]\nposition_scale = 250.0\n";
        fs::write(&path, content).unwrap();
        let mut config = ConfigStore::open(&path, true);
        assert!(config.is_read_only());
        assert_eq!(config.get_string("robot1.ip", "192.168.10.18"), "10.1.2.3");
        assert_eq!(config.get_f64("device1.position_scale", 1000.), 250.);
        assert_eq!(config.get_string("robot2.ip", "192.168.10.19"), "192.168.10.19");
        config.set_f64("device1.spring_stiffness", 0.3);
        assert!(config.save().is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unreadable_file_starts_empty() {
        let path = temp_file("garbage");
        fs::write(&path, "this is = = not toml").unwrap();
        let mut config = ConfigStore::open(&path, false);
        assert!(config.sections().is_empty());
        assert!(config.is_read_only());
        assert_eq!(config.get_i64("system.debug_frequency", 50), 50);
        fs::remove_file(&path).unwrap();
    }
}
