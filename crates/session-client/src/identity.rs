//! Participant identity store.
//!
//! The id is assigned on first visit and reused afterwards; it is the only
//! key the coordinator knows a participant by. Loading never creates an id,
//! so a client without one can be sent back to the landing flow.

use crate::errors::ClientError;
use common::types::ParticipantId;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

enum Backend {
    File(PathBuf),
    Memory(Mutex<Option<ParticipantId>>),
}

pub struct IdentityStore {
    backend: Backend,
}

impl IdentityStore {
    /// Store persisting the id in a file.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
        }
    }

    /// Store holding the id for the lifetime of the process.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(None)),
        }
    }

    /// Store seeded with an existing id.
    #[must_use]
    pub fn with_id(id: ParticipantId) -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(Some(id))),
        }
    }

    /// The stored id, if any. A blank stored value counts as none.
    pub async fn load(&self) -> Result<Option<ParticipantId>, ClientError> {
        let id = match &self.backend {
            Backend::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(contents) => Some(ParticipantId::new(contents.trim())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    return Err(ClientError::Internal(format!(
                        "failed to read identity from {}: {e}",
                        path.display()
                    )))
                }
            },
            Backend::Memory(slot) => slot.lock().await.clone(),
        };
        Ok(id.filter(|id| !id.is_blank()))
    }

    /// The stored id, generating and persisting one on first use.
    pub async fn load_or_create(&self) -> Result<ParticipantId, ClientError> {
        if let Some(id) = self.load().await? {
            debug!(target: "client.identity", participant_id = %id, "Identity loaded");
            return Ok(id);
        }

        let id = ParticipantId::generate();
        self.save(&id).await?;
        info!(target: "client.identity", participant_id = %id, "New identity created");
        Ok(id)
    }

    async fn save(&self, id: &ParticipantId) -> Result<(), ClientError> {
        match &self.backend {
            Backend::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        ClientError::Internal(format!("failed to create identity directory: {e}"))
                    })?;
                }
                tokio::fs::write(path, id.as_str()).await.map_err(|e| {
                    ClientError::Internal(format!(
                        "failed to write identity to {}: {e}",
                        path.display()
                    ))
                })
            }
            Backend::Memory(slot) => {
                *slot.lock().await = Some(id.clone());
                Ok(())
            }
        }
    }
}
