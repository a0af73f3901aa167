use crate::errors::ServiceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of workflow event emitted after a committed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEventKind {
    ActivitySubmitted,
    ActivityValidated,
    ActivityRejected,
    ActivityStatusForced,
    PhaseStatusChanged,
    ProgressInitialized,
}

impl DomainEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventKind::ActivitySubmitted => "actividad_completada",
            DomainEventKind::ActivityValidated => "actividad_validada",
            DomainEventKind::ActivityRejected => "actividad_rechazada",
            DomainEventKind::ActivityStatusForced => "actividad_forzada",
            DomainEventKind::PhaseStatusChanged => "fase_actualizada",
            DomainEventKind::ProgressInitialized => "progreso_inicializado",
        }
    }
}

/// Domain event handed to the external notification dispatcher after a
/// state transition has committed. Delivery is best-effort: the transition
/// is the source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent {
    pub kind: DomainEventKind,
    pub record_id: Uuid,
    pub activity_index: Option<usize>,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Collaborator interface to the external notification transport
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn emit(&self, event: DomainEvent) -> ServiceResult<()>;
}

/// Dispatcher that only logs the event. Default wiring for deployments
/// without a notification transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn emit(&self, event: DomainEvent) -> ServiceResult<()> {
        match serde_json::to_string(&event) {
            Ok(payload) => log::info!("Domain event {}: {}", event.kind.as_str(), payload),
            Err(e) => log::warn!(
                "Domain event {} for record {} could not be serialized: {}",
                event.kind.as_str(),
                event.record_id,
                e
            ),
        }
        Ok(())
    }
}
