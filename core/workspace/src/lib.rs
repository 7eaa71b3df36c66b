//! Reconciliation between a local document workspace and a remote git tree.
//!
//! This crate provides:
//! - [`WorkspaceItem`] and [`WorkspaceState`]: local items and their sync data
//! - Item ↔ repository path mapping ([`git_path_for_item`], [`GitPaths`])
//! - The injectable path → SHA store ([`ShaStore`])
//! - [`Reconciler`]: change computation from a [`RemoteTree`](docsync_common::RemoteTree)

pub mod item;
pub mod paths;
pub mod reconcile;
pub mod sha_store;
pub mod state;

pub use item::{hash_value, WorkspaceItem, FORCE_HASH, TRASH_ID};
pub use paths::{content_id, content_path, data_path, git_path_for_item, GitPaths, TRASH_PATH};
pub use reconcile::{is_synced_data, Reconciler, TEMPLATES_DATA_ID};
pub use sha_store::{MemoryShaStore, ShaStore};
pub use state::{Change, WorkspaceState};
