//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IContentStore`] - Local/remote inventories, settings and planner queries
//! - [`IObjectStore`] - The backup bucket (upload, download, delete, list)
//! - [`ICrypter`] / [`IArchiver`] - Payload encryption and directory archives
//! - [`IFileWalker`] - Enumeration of files under a source root
//! - [`INotifier`] / [`IConfirm`] - Operator notifications and prompts

pub mod codec;
pub mod content_store;
pub mod file_walker;
pub mod notification;
pub mod object_store;

pub use codec::{EncryptedFile, IArchiver, ICrypter};
pub use content_store::{
    IContentStore, StoreCounts, StoreSnapshot, SETTING_LAST_SCAN, SETTING_VERSION,
};
pub use file_walker::IFileWalker;
pub use notification::{AssumeYes, IConfirm, INotifier, NoopNotifier};
pub use object_store::{IObjectStore, ObjectInfo, UploadRequest};
