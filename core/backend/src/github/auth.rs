//! GitHub sign-in, app-data repository provisioning and user resolution.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use docsync_common::{encode_component, Error, Result, Token};

use super::{DEFAULT_TEMPLATE_REPO, GITHUB_SUB_PREFIX};
use crate::account::SignedInIdentity;
use crate::identity::{classify_resolver_error, UserInfo, UserInfoResolver};
use crate::oauth::{OAuthBackend, OAuthContext};
use crate::rest::{RemoteUser, RestClient};
use crate::transport::{HttpRequest, Method};

/// Scope granting access to private repositories.
const FULL_ACCESS_SCOPE: &str = "repo";

fn user_info(user: &RemoteUser) -> UserInfo {
    UserInfo {
        id: format!("{}:{}", GITHUB_SUB_PREFIX, user.id),
        name: user.login.clone(),
        image_url: user.avatar_url.clone().unwrap_or_default(),
    }
}

/// GitHub account operations.
pub struct GitHubAccounts {
    rest: Arc<RestClient>,
    oauth: OAuthContext,
    app_data_repo: String,
    template_repo: String,
}

impl GitHubAccounts {
    pub fn new(
        rest: Arc<RestClient>,
        oauth: OAuthContext,
        app_data_repo: impl Into<String>,
        template_repo: Option<String>,
    ) -> Self {
        Self {
            rest,
            oauth,
            app_data_repo: app_data_repo.into(),
            template_repo: template_repo.unwrap_or_else(|| DEFAULT_TEMPLATE_REPO.to_string()),
        }
    }

    /// Make sure the app-data repository exists, generating it from the
    /// template repository when it does not.
    pub async fn ensure_app_data_repo(&self, token: &Token) -> Result<()> {
        match self
            .rest
            .repo_info(&token.access_token, &token.name, &self.app_data_repo)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::NotFound(_)) => {
                let (owner, repo) = self.template_repo.split_once('/').ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Template repository must be owner/repo: {}",
                        self.template_repo
                    ))
                })?;
                info!(
                    "Creating {}/{} from template {}",
                    token.name, self.app_data_repo, self.template_repo
                );
                let request = HttpRequest::new(
                    Method::Post,
                    self.rest.url(&format!(
                        "repos/{}/{}/generate",
                        encode_component(owner),
                        encode_component(repo)
                    )),
                )
                .json(serde_json::json!({
                    "owner": token.name,
                    "name": self.app_data_repo,
                    "description": "Workspace data repository.",
                    "include_all_branches": false,
                    "private": true,
                }));
                self.rest
                    .send(Some(&token.access_token), request, &self.app_data_repo, false)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl OAuthBackend for GitHubAccounts {
    fn oauth(&self) -> &OAuthContext {
        &self.oauth
    }

    fn default_scopes(&self, repo_full_access: bool) -> Vec<String> {
        let repo_scope = if repo_full_access { "repo" } else { "public_repo" };
        vec![repo_scope.to_string(), "gist".to_string()]
    }

    fn sign_in_scopes(&self) -> Vec<String> {
        vec!["repo".to_string(), "gist".to_string()]
    }

    async fn start_oauth2(
        &self,
        scopes: &[String],
        expected_sub: Option<&str>,
        silent: bool,
        is_primary: bool,
    ) -> Result<Token> {
        let access_token = self
            .oauth
            .flow
            .authorize(self.oauth.prompt.as_ref(), scopes, silent)
            .await?;
        let user = self.rest.current_user(&access_token).await?;

        let identity = SignedInIdentity {
            access_token,
            scopes: scopes.to_vec(),
            sub: user.id.to_string(),
            name: user.login.clone(),
        };
        let token = self
            .oauth
            .admit(
                user_info(&user),
                identity,
                expected_sub,
                is_primary,
                FULL_ACCESS_SCOPE,
            )
            .await?;

        if is_primary {
            self.ensure_app_data_repo(&token).await?;
        }
        self.refresh_sponsor_info(token).await
    }
}

/// Resolves GitHub users by numeric id.
pub struct GitHubUserResolver {
    rest: Arc<RestClient>,
}

impl GitHubUserResolver {
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl UserInfoResolver for GitHubUserResolver {
    async fn resolve(&self, sub: &str) -> Result<UserInfo> {
        // Lookup by id is an undocumented endpoint of API v3
        let user: RemoteUser = self
            .rest
            .get_json(None, self.rest.url(&format!("user/{}", encode_component(sub))), sub)
            .await
            .map_err(classify_resolver_error)?;
        Ok(user_info(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountManager, AccountStore, MemoryAccountStore};
    use crate::config::OAuthConfig;
    use crate::identity::UserDirectory;
    use crate::oauth::{AuthorizationCode, AuthorizationPrompt, OAuthEndpoints, OAuthFlow};
    use crate::rest::AuthStyle;
    use crate::transport::MockTransport;
    use serde_json::json;

    struct PastedCode;

    #[async_trait]
    impl AuthorizationPrompt for PastedCode {
        async fn request_code(&self, _url: &str, _silent: bool) -> Result<AuthorizationCode> {
            Ok(AuthorizationCode {
                code: "code-1".to_string(),
                state: None,
            })
        }
    }

    fn accounts(transport: Arc<MockTransport>, store: Arc<MemoryAccountStore>) -> GitHubAccounts {
        let rest = Arc::new(RestClient::new(
            transport.clone(),
            "https://api.github.com",
            AuthStyle::TokenHeader,
        ));
        let flow = OAuthFlow::new(
            OAuthConfig {
                client_id: "client-1".to_string(),
                client_secret: String::new(),
                redirect_url: String::new(),
            },
            OAuthEndpoints {
                authorize_url: super::super::GITHUB_AUTHORIZE_URL.to_string(),
                token_url: super::super::GITHUB_TOKEN_URL.to_string(),
            },
            transport,
        );
        GitHubAccounts::new(
            rest,
            OAuthContext {
                flow,
                prompt: Arc::new(PastedCode),
                accounts: AccountManager::new("github", store),
                directory: Arc::new(UserDirectory::new()),
            },
            "stackedit-app-data",
            None,
        )
    }

    fn queue_sign_in(transport: &MockTransport, user_id: u64) {
        transport.push_json(200, json!({ "access_token": "gho_abc", "token_type": "bearer" }));
        transport.push_json(
            200,
            json!({ "id": user_id, "login": "octo", "avatar_url": "https://avatars/u/42" }),
        );
    }

    #[tokio::test]
    async fn test_sign_in_provisions_missing_repo() {
        let transport = Arc::new(MockTransport::new());
        queue_sign_in(&transport, 42);
        transport.push_json(404, json!({ "message": "Not Found" }));
        transport.push_json(201, json!({ "full_name": "octo/stackedit-app-data" }));
        let store = Arc::new(MemoryAccountStore::new());
        let accounts = accounts(transport.clone(), store.clone());

        let token = accounts.sign_in().await.unwrap();
        assert_eq!(token.sub, "42");
        assert!(token.is_login);
        assert!(token.repo_full_access);
        assert!(store.token("github", "42").await.unwrap().is_some());
        assert!(accounts.oauth().directory.get("gh:42").is_some());

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[2].url.ends_with("/repos/octo/stackedit-app-data"));
        assert!(requests[3]
            .url
            .ends_with("/repos/mafgwo/stackeditplus-appdata-template/generate"));
        assert_eq!(requests[3].json_body().unwrap()["owner"], "octo");
    }

    #[tokio::test]
    async fn test_sign_in_propagates_other_repo_errors() {
        let transport = Arc::new(MockTransport::new());
        queue_sign_in(&transport, 42);
        transport.push_json(403, json!({ "message": "Forbidden" }));
        let store = Arc::new(MemoryAccountStore::new());
        let accounts = accounts(transport.clone(), store.clone());

        let result = accounts.sign_in().await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert!(store.token("github", "42").await.unwrap().is_none());
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn test_reauthorization_with_other_account_fails() {
        let transport = Arc::new(MockTransport::new());
        queue_sign_in(&transport, 99);
        let store = Arc::new(MemoryAccountStore::new());
        let accounts = accounts(transport, store.clone());

        let result = accounts
            .start_oauth2(&["repo".to_string()], Some("42"), true, false)
            .await;
        assert!(matches!(result, Err(Error::IdentityMismatch { .. })));
        assert!(store.tokens("github").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_account_skips_provisioning() {
        let transport = Arc::new(MockTransport::new());
        queue_sign_in(&transport, 7);
        let accounts = accounts(transport.clone(), Arc::new(MemoryAccountStore::new()));

        let token = accounts.add_account(false).await.unwrap();
        assert!(!token.is_login);
        assert!(!token.repo_full_access);
        assert_eq!(token.scopes, vec!["public_repo", "gist"]);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_resolver_classification() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "id": 42, "login": "octo" }));
        transport.push_json(404, json!({ "message": "Not Found" }));
        transport.push_json(403, json!({ "message": "rate limit exceeded" }));
        let rest = Arc::new(RestClient::new(
            transport.clone(),
            "https://api.github.com",
            AuthStyle::TokenHeader,
        ));
        let resolver = GitHubUserResolver::new(rest);

        let user = resolver.resolve("42").await.unwrap();
        assert_eq!(user.id, "gh:42");
        assert!(transport.requests()[0].header_value("Authorization").is_none());

        assert!(matches!(
            resolver.resolve("0").await,
            Err(Error::PermanentlyUnresolvable(_))
        ));
        assert!(matches!(
            resolver.resolve("1").await,
            Err(Error::Retryable(_))
        ));
    }
}
