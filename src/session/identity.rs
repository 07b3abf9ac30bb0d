//! Stable per-installation client identifier.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const APP_DIR: &str = "palwire";
const FILE_NAME: &str = "client.id";

/// Default location of the client id file.
///
/// `<config_dir>/palwire/client.id`, or `~/.palwire/client.id` where no
/// config directory is known.
pub fn default_client_id_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(FILE_NAME))
        .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{APP_DIR}")).join(FILE_NAME)))
}

/// Client id persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    id: String,
    persisted: bool,
}

impl ClientIdentity {
    /// Read the id at `path`, creating it on first run.
    ///
    /// Storage failures never fail startup: an in-memory id is used instead
    /// and the failure is logged.
    pub fn load_or_create(path: &Path) -> Self {
        match Self::try_load_or_create(path) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!("Client id file {:?} unusable ({}), using ephemeral id", path, e);
                Self::ephemeral()
            },
        }
    }

    fn try_load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let existing = fs::read_to_string(path)?;
            let existing = existing.trim();
            if !existing.is_empty() {
                tracing::debug!("Loaded client id from {:?}", path);
                return Ok(Self {
                    id: existing.to_string(),
                    persisted: true,
                });
            }
        }

        let id = new_id();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &id)?;
        tracing::info!("Generated client id at {:?}", path);
        Ok(Self { id, persisted: true })
    }

    /// Identity that lives only for this process.
    pub fn ephemeral() -> Self {
        Self {
            id: new_id(),
            persisted: false,
        }
    }

    /// The identifier (32 lowercase hex characters when generated here).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the id is backed by a file.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
