//! Instance id persisted in a plain text file

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;
use wsreg_client_core::{Error, InstanceIdStore, Result};

/// Keeps the instance UUID in a file so it survives restarts
#[derive(Debug, Clone)]
pub struct FileInstanceIdStore {
    path: PathBuf,
}

impl FileInstanceIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self) -> Result<Uuid> {
        let id = Uuid::new_v4();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::instance_store(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        fs::write(&self.path, format!("{}\n", id)).map_err(|e| {
            Error::instance_store(format!("cannot write {}: {}", self.path.display(), e))
        })?;
        info!("Created instance id {} in {}", id, self.path.display());
        Ok(id)
    }
}

impl InstanceIdStore for FileInstanceIdStore {
    fn load_or_create(&self) -> Result<Uuid> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = Uuid::parse_str(contents.trim()).map_err(|e| {
                    Error::instance_store(format!(
                        "{} does not hold a UUID: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                debug!("Loaded instance id {} from {}", id, self.path.display());
                Ok(id)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => self.create(),
            Err(e) => Err(Error::instance_store(format!(
                "cannot read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
