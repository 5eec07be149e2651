//! cloudbak core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `LocalEntry`, `RemoteEntry`, `RemovalCandidate`
//! - **Policies** - identity hashing, storage tier selection, retention, key mapping
//! - **Port definitions** - Traits for adapters: `IContentStore`, `IObjectStore`,
//!   `ICrypter`, `IArchiver`, `IFileWalker`, `INotifier`
//! - **Configuration** - the YAML configuration file
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement.

pub mod config;
pub mod domain;
pub mod ports;
