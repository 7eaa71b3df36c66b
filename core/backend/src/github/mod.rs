//! GitHub backend.
//!
//! This module provides:
//! - Git data and contents operations over the REST v3 API
//! - OAuth2 sign-in with app-data repository provisioning
//! - User lookup by numeric id

pub mod auth;
pub mod client;

pub use auth::{GitHubAccounts, GitHubUserResolver};
pub use client::GitHubBackend;

use serde_json::Value;
use std::sync::Arc;

use docsync_common::Result;

use crate::account::{AccountManager, SponsorClient};
use crate::config::BackendConfig;
use crate::oauth::{OAuthContext, OAuthEndpoints, OAuthFlow};
use crate::registry::{BackendContext, BackendHandle};
use crate::rest::{AuthStyle, RestClient};

/// Public GitHub API base URL.
pub const GITHUB_API_BASE: &str = "https://api.github.com";
/// OAuth2 authorization endpoint.
pub const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
/// OAuth2 token endpoint.
pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
/// Prefix of GitHub user subjects.
pub const GITHUB_SUB_PREFIX: &str = "gh";
/// Repository the app-data repository is generated from.
pub const DEFAULT_TEMPLATE_REPO: &str = "mafgwo/stackeditplus-appdata-template";

/// Create a GitHub backend from configuration.
pub fn create_github_backend(config: Value, context: &BackendContext) -> Result<BackendHandle> {
    let config = BackendConfig::from_value(config)?;
    let rest = Arc::new(RestClient::new(
        context.transport.clone(),
        config.api_base_or(GITHUB_API_BASE),
        AuthStyle::TokenHeader,
    ));

    let mut accounts = AccountManager::new("github", context.accounts.clone());
    if let Some(server_url) = &config.server_url {
        accounts = accounts.with_sponsor(SponsorClient::new(context.transport.clone(), server_url));
    }

    let oauth = OAuthContext {
        flow: OAuthFlow::new(
            config.oauth.clone(),
            OAuthEndpoints {
                authorize_url: GITHUB_AUTHORIZE_URL.to_string(),
                token_url: GITHUB_TOKEN_URL.to_string(),
            },
            context.transport.clone(),
        ),
        prompt: context.prompt.clone(),
        accounts,
        directory: context.directory.clone(),
    };

    Ok(BackendHandle {
        git: Arc::new(GitHubBackend::new(rest.clone(), config.commit_messages.clone())),
        oauth: Some(Arc::new(GitHubAccounts::new(
            rest.clone(),
            oauth,
            config.app_data_repo.clone(),
            config.template_repo.clone(),
        ))),
        resolver: Some(Arc::new(GitHubUserResolver::new(rest))),
        app_data_repo: config.app_data_repo,
        app_data_branch: config.app_data_branch,
    })
}
