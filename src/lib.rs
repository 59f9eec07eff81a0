pub mod api;
pub mod core;
pub mod export;
pub mod extraction;
pub mod lifecycle;
pub mod models;
pub mod repository;
pub mod storage;

// Re-export commonly used types
pub use crate::core::{AppConfig, InvoiceError, InvoiceResult};
pub use lifecycle::{LifecycleManager, LifecycleOptions};
pub use models::{Invoice, InvoiceField, InvoiceStatus, Session, UploadedFile};
pub use repository::InvoiceRepository;
pub use storage::{MemoryStore, StorageGateway};
