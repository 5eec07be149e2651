//! Domain entities and business rules
//!
//! This module contains the core domain types for cloudbak:
//! - Local and remote inventory records
//! - Identity hashing for files and archive units
//! - Storage tier selection and the retention rule
//! - Local path to bucket key mapping
//! - Domain-specific error types

pub mod entry;
pub mod errors;
pub mod remote_key;
pub mod retention;

// Re-export commonly used types
pub use entry::{
    archive_identity, file_identity, sha256_hex, EntryType, LocalEntry, RemoteEntry,
    RemovalCandidate, DELETED,
};
pub use errors::DomainError;
pub use remote_key::{database_key, normalize_prefix, remote_key_for};
pub use retention::{can_remove, StorageClass, IA_MIN_RETENTION_MS, IA_MIN_SIZE};
