//! Git hosting backends for docsync.
//!
//! This crate provides:
//! - The [`GitBackend`] trait: tree, history, blob and gist operations
//! - GitHub and Gitee implementations over a pluggable [`HttpTransport`]
//! - OAuth2 sign-in and account persistence ([`OAuthBackend`], [`AccountStore`])
//! - User identity resolvers in a frozen [`IdentityRegistry`]
//! - An in-memory backend for testing

pub mod account;
pub mod backend;
pub mod config;
pub mod gitee;
pub mod github;
pub mod identity;
pub mod memory;
pub mod oauth;
pub mod registry;
pub mod rest;
pub mod retry;
pub mod transport;

pub use account::{AccountManager, AccountStore, FileAccountStore, MemoryAccountStore};
pub use backend::{
    CommitDetail, CommitEntry, CommitSignature, CommitUser, DownloadedFile, FileContent, Gist,
    GistCommit, GistUpload, GitBackend, RepoInfo, RepoRef, UploadedFile,
};
pub use config::{BackendConfig, CommitAction, CommitMessages, OAuthConfig};
pub use identity::{IdentityRegistry, IdentityRegistryBuilder, UserDirectory, UserInfo, UserInfoResolver};
pub use memory::MemoryBackend;
pub use oauth::{AuthorizationCode, AuthorizationPrompt, OAuthBackend};
pub use registry::{
    build_identity_registry, create_default_registry, BackendContext, BackendHandle,
    BackendRegistry,
};
pub use retry::{RetryConfig, RetryExecutor};
pub use transport::{
    should_retry, HttpRequest, HttpResponse, HttpTransport, Method, MockTransport,
    ReqwestTransport, RetryingTransport,
};
