//! Sighting ingestion pipeline and its collaborators.

// ============ Pure rules ============
pub mod geo;
pub mod proximity;
pub mod validator;

// ============ Storage ============
pub mod image;
pub mod repository;

// ============ Pipeline ============
pub mod dispatcher;
pub mod ingest;

pub use dispatcher::{DispatchStats, LogNotifier, NotificationDispatcher, Notifier};
pub use image::{FsImageStore, ImageStore};
pub use ingest::{IngestError, SightingIngestor};
pub use repository::{MemoryRepository, SightingRepository};
