//! Durable identity record: load, validate, or provision and atomically replace.

use crate::error::ProvisioningError;
use crate::register::{Registrar, RegistrationTransport};
use crate::Identity;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const DEFAULT_IDENTITY_PATH: &str = "warp-identity.json";

#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl Default for IdentityStore {
    fn default() -> Self {
        IdentityStore::new(DEFAULT_IDENTITY_PATH)
    }
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IdentityStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_err(&self, source: io::Error) -> ProvisioningError {
        ProvisioningError::Store { path: self.path.clone(), source }
    }

    /// The persisted identity, if present and usable. Missing, corrupt or
    /// partial records yield `None`.
    pub fn load(&self) -> Option<Identity> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no identity on disk");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identity unreadable");
                return None;
            }
        };
        let id: Identity = match serde_json::from_str(&raw) {
            Ok(id) => id,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identity record invalid");
                return None;
            }
        };
        if !id.is_complete() || !id.keys_match() {
            warn!(path = %self.path.display(), "identity record incomplete");
            return None;
        }
        Some(id)
    }

    /// Reuse the stored identity, or provision a new one and persist it.
    /// Nothing is written when provisioning fails.
    pub async fn load_or_create<T: RegistrationTransport>(
        &self,
        registrar: &Registrar<T>,
    ) -> Result<Identity, ProvisioningError> {
        if let Some(id) = self.load() {
            info!(path = %self.path.display(), client_id = %id.client_id, "using stored identity");
            return Ok(id);
        }
        self.regenerate(registrar).await
    }

    /// Provision unconditionally and replace whatever is stored.
    pub async fn regenerate<T: RegistrationTransport>(
        &self,
        registrar: &Registrar<T>,
    ) -> Result<Identity, ProvisioningError> {
        let id = registrar.provision().await?;
        self.save(&id)?;
        info!(path = %self.path.display(), "identity saved");
        Ok(id)
    }

    /// Write to a sibling temp file, sync, then rename over the target.
    pub fn save(&self, id: &Identity) -> Result<(), ProvisioningError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.store_err(e))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.store_err(e))?;
        serde_json::to_writer_pretty(&mut tmp, id)?;
        tmp.write_all(b"\n").map_err(|e| self.store_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.store_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.store_err(e.error))?;
        Ok(())
    }
}
