use crate::errors::DomainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to an attachment held by the external byte store. The store
/// owns the bytes; this crate only ever sees the keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub record_id: Uuid,
    pub activity_index: usize,
    pub filename: String,
}

/// Collaborator interface to the external attachment storage. Consulted at
/// submit time for activities flagged `requires_attachment`.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn list_for(&self, record_id: Uuid, activity_index: usize)
        -> DomainResult<Vec<AttachmentRef>>;
}

/// Store stub for deployments without attachment support; every listing is
/// empty, so activities requiring attachments cannot be submitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAttachmentStore;

#[async_trait]
impl AttachmentStore for NullAttachmentStore {
    async fn list_for(
        &self,
        _record_id: Uuid,
        _activity_index: usize,
    ) -> DomainResult<Vec<AttachmentRef>> {
        Ok(Vec::new())
    }
}
