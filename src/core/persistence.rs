//! Configuration persistence
//!
//! The device configuration is stored as a pretty-printed JSON document with
//! the same layout `GET /config` returns. Saves go through a temporary file
//! in the same directory followed by a rename, so a crash or a full disk
//! leaves either the old file or the new one, never a truncated mix.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    core::error::{GatewayError, GatewayResult},
    protocol::settings::Configuration,
};

/// Storage backend of the configuration store.
pub trait ConfigPersistence: Send + Sync {
    /// Returns `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> GatewayResult<Option<Configuration>>;

    fn save(&self, config: &Configuration) -> GatewayResult<()>;
}

pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigPersistence for JsonFilePersistence {
    fn load(&self) -> GatewayResult<Option<Configuration>> {
        if !self.path.exists() {
            log::debug!("No saved configuration at {:?}", self.path);
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path).map_err(|err| {
            GatewayError::Io(format!("failed to read {:?}: {err}", self.path))
        })?;
        let config: Configuration = serde_json::from_str(&json).map_err(|err| {
            GatewayError::Io(format!("failed to parse {:?}: {err}", self.path))
        })?;

        log::info!(
            "Loaded configuration with {} mapping entries from {:?}",
            config.items.len(),
            self.path
        );
        Ok(Some(config))
    }

    fn save(&self, config: &Configuration) -> GatewayResult<()> {
        let json = serde_json::to_string_pretty(config)?;
        let temp = self.temp_path();

        let written = (|| -> std::io::Result<()> {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let mut file = fs::File::create(&temp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        })();

        if let Err(err) = written {
            let _ = fs::remove_file(&temp);
            return Err(GatewayError::Io(format!(
                "failed to write {:?}: {err}",
                self.path
            )));
        }

        log::debug!(
            "Saved configuration with {} mapping entries to {:?}",
            config.items.len(),
            self.path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mapping::{MappingEntry, MappingTable};

    fn temp_file() -> PathBuf {
        std::env::temp_dir()
            .join(format!("rtu2tcp-{}", uuid::Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn test_missing_file_loads_none() {
        let persistence = JsonFilePersistence::new(temp_file());
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_file();
        let persistence = JsonFilePersistence::new(&path);
        let mut config = Configuration::default();
        config.items = MappingTable::new(vec![
            MappingEntry::new(1, 0, 5, 0),
            MappingEntry::new(2, 10, 3, 6),
        ]);

        persistence.save(&config).unwrap();
        assert!(!persistence.temp_path().exists());
        assert_eq!(persistence.load().unwrap(), Some(config));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_is_an_io_error() {
        let path = temp_file();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let persistence = JsonFilePersistence::new(&path);
        assert!(matches!(persistence.load(), Err(GatewayError::Io(_))));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
