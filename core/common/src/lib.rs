//! Common utilities and types shared across the docsync crates.
//!
//! This module provides the error taxonomy and the data model exchanged
//! between backend helpers, the reconciliation service and sync providers.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{
    encode_component, fingerprint, GitPath, ImgStorage, ItemType, RemoteTree, Revision, Secret, SyncData, Token,
    TreeEntry, TreeEntryType, DATA_PREFIX,
};
