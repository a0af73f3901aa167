pub mod types;
pub mod machine;
pub mod events;
pub mod repository;
pub mod service;

pub use types::{ActivityProgress, ActivityStatus, PhaseStatus, ProgressRecord};
pub use events::{DomainEvent, DomainEventKind, LoggingDispatcher, NotificationDispatcher};
pub use repository::{ProgressRepository, SqliteProgressRepository};
pub use service::{ProgressService, ProgressServiceImpl};
