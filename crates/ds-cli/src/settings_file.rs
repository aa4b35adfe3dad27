use std::fs;
use std::path::{Path, PathBuf};

use ds_core::settings::{SettingsMap, SettingsStore, SpoofSettings};
use serde_json::Value;

pub fn read_settings(path: &Path) -> Result<SpoofSettings, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    SpoofSettings::from_json(&content)
        .map_err(|e| format!("Failed to parse '{}': {}", path.display(), e))
}

pub fn read_whitelist(path: &Path) -> Result<String, String> {
    fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

/// Settings store backed by a JSON file. A missing file reads as an empty
/// document.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<SettingsMap, String> {
        if !self.path.exists() {
            return Ok(SettingsMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read '{}': {}", self.path.display(), e))?;
        match serde_json::from_str(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(format!("'{}' is not a JSON object", self.path.display())),
            Err(e) => Err(format!("Failed to parse '{}': {}", self.path.display(), e)),
        }
    }

    fn save(&self, map: &SettingsMap) -> Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| format!("Failed to serialize JSON: {}", e))?;
        fs::write(&self.path, json)
            .map_err(|e| format!("Failed to write '{}': {}", self.path.display(), e))
    }
}

impl SettingsStore for FileStore {
    fn get(&self, keys: &[&str]) -> SettingsMap {
        match self.load() {
            Ok(map) => map.into_iter().filter(|(k, _)| keys.contains(&k.as_str())).collect(),
            Err(e) => {
                eprintln!("Warning: {e}");
                SettingsMap::new()
            }
        }
    }

    fn set(&self, items: SettingsMap) -> bool {
        let result = self.load().and_then(|mut map| {
            map.extend(items);
            self.save(&map)
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                eprintln!("Warning: {e}");
                false
            }
        }
    }

    fn clear(&self) -> bool {
        match self.save(&SettingsMap::new()) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("Warning: {e}");
                false
            }
        }
    }
}
