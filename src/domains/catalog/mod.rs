pub mod types;
pub mod repository;
pub mod service;

pub use types::{ActivityDef, ActivityKind, Phase};
pub use repository::{CatalogRepository, SqliteCatalogRepository};
pub use service::{CatalogService, CatalogServiceImpl};
