//! Persistence of per-detector calibration and description.
use std::collections::BTreeMap;
use std::path::PathBuf;

use mcb_config::{DetectorSettings, SettingsFile};

use crate::atomic::write_atomic;
use crate::error::{McbError, Result};

/// Settings key for a detector: zero-padded id and configured name.
pub fn identity_key(id: u32, name: &str) -> String {
    format!("{id:04} {name}")
}

pub trait SettingsStore {
    fn load(&mut self, key: &str) -> Result<Option<DetectorSettings>>;
    fn save(&mut self, key: &str, settings: &DetectorSettings) -> Result<()>;
}

/// Store that lives only as long as the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, DetectorSettings>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&DetectorSettings> {
        self.entries.get(key)
    }
}

impl SettingsStore for MemoryStore {
    fn load(&mut self, key: &str) -> Result<Option<DetectorSettings>> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, settings: &DetectorSettings) -> Result<()> {
        self.entries.insert(key.to_string(), settings.clone());
        Ok(())
    }
}

/// TOML settings file, re-read on every access and rewritten atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<SettingsFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => SettingsFile::from_toml(&text).map_err(|e| {
                eyre::Report::new(McbError::Config(format!("{}: {e}", self.path.display())))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
            Err(e) => Err(eyre::Report::new(McbError::Io(format!(
                "read {}: {e}",
                self.path.display()
            )))),
        }
    }
}

impl SettingsStore for FileStore {
    fn load(&mut self, key: &str) -> Result<Option<DetectorSettings>> {
        Ok(self.read()?.detectors.remove(key))
    }

    fn save(&mut self, key: &str, settings: &DetectorSettings) -> Result<()> {
        let mut file = self.read()?;
        file.detectors.insert(key.to_string(), settings.clone());
        let text = file
            .to_toml()
            .map_err(|e| eyre::Report::new(McbError::Config(e.to_string())))?;
        write_atomic(&self.path, text.as_bytes()).map_err(|e| {
            eyre::Report::new(McbError::Io(format!("write {}: {e}", self.path.display())))
        })?;
        tracing::debug!(key, path = %self.path.display(), "settings saved");
        Ok(())
    }
}
