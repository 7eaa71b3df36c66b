//! Gitee backend.

pub mod auth;
pub mod client;

pub use auth::{GiteeAccounts, GiteeUserResolver};
pub use client::GiteeBackend;

use serde_json::Value;
use std::sync::Arc;

use docsync_common::Result;

use crate::account::{AccountManager, SponsorClient};
use crate::config::BackendConfig;
use crate::oauth::{OAuthContext, OAuthEndpoints, OAuthFlow};
use crate::registry::{BackendContext, BackendHandle};
use crate::rest::{AuthStyle, RestClient};

/// Public Gitee API base URL.
pub const GITEE_API_BASE: &str = "https://gitee.com/api/v5";
pub const GITEE_AUTHORIZE_URL: &str = "https://gitee.com/oauth/authorize";
pub const GITEE_TOKEN_URL: &str = "https://gitee.com/oauth/token";
/// Prefix of Gitee user subjects.
pub const GITEE_SUB_PREFIX: &str = "gt";

/// Create a Gitee backend from configuration.
pub fn create_gitee_backend(config: Value, context: &BackendContext) -> Result<BackendHandle> {
    let config = BackendConfig::from_value(config)?;
    let rest = Arc::new(RestClient::new(
        context.transport.clone(),
        config.api_base_or(GITEE_API_BASE),
        AuthStyle::QueryParam,
    ));

    let mut accounts = AccountManager::new("gitee", context.accounts.clone());
    if let Some(server_url) = &config.server_url {
        accounts = accounts.with_sponsor(SponsorClient::new(context.transport.clone(), server_url));
    }

    let oauth = OAuthContext {
        flow: OAuthFlow::new(
            config.oauth.clone(),
            OAuthEndpoints {
                authorize_url: GITEE_AUTHORIZE_URL.to_string(),
                token_url: GITEE_TOKEN_URL.to_string(),
            },
            context.transport.clone(),
        ),
        prompt: context.prompt.clone(),
        accounts,
        directory: context.directory.clone(),
    };

    Ok(BackendHandle {
        git: Arc::new(GiteeBackend::new(rest.clone(), config.commit_messages.clone())),
        oauth: Some(Arc::new(GiteeAccounts::new(
            rest.clone(),
            oauth,
            config.app_data_repo.clone(),
        ))),
        resolver: Some(Arc::new(GiteeUserResolver::new(rest))),
        app_data_repo: config.app_data_repo,
        app_data_branch: config.app_data_branch,
    })
}
