//! Workspace synchronization over git app-data repositories.
//!
//! This crate provides:
//! - The [`SyncProvider`] contract shared by every hosting backend
//! - [`AppDataProvider`]: the provider over a GitHub or Gitee app-data repository
//! - [`Content`]: markdown bodies with their embedded workspace data
//! - [`SyncCycle`]: one full download/upload/remove pass with a per-item report

pub mod app_data;
pub mod content;
pub mod cycle;
pub mod provider;

pub use app_data::AppDataProvider;
pub use content::Content;
pub use cycle::{ItemFailure, SyncCycle, SyncReport};
pub use provider::{
    ContentDownload, ContentUpload, DataDownload, SyncProvider, WorkspaceDescriptor,
    MAIN_WORKSPACE_ID,
};
