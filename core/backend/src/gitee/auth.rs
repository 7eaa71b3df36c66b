//! Gitee sign-in, app-data repository provisioning and user resolution.
//!
//! Gitee users are identified by login rather than numeric id.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use docsync_common::{encode_component, Error, Result, Token};

use super::client::avatar_thumbnail;
use super::GITEE_SUB_PREFIX;
use crate::account::SignedInIdentity;
use crate::identity::{classify_resolver_error, UserInfo, UserInfoResolver};
use crate::oauth::{OAuthBackend, OAuthContext};
use crate::rest::{RemoteUser, RestClient};
use crate::transport::{HttpRequest, Method};

const FULL_ACCESS_SCOPE: &str = "projects";

fn user_info(user: &RemoteUser) -> UserInfo {
    UserInfo {
        id: format!("{}:{}", GITEE_SUB_PREFIX, user.login),
        name: user.login.clone(),
        image_url: user
            .avatar_url
            .as_deref()
            .map(avatar_thumbnail)
            .unwrap_or_default(),
    }
}

/// Gitee account operations.
pub struct GiteeAccounts {
    rest: Arc<RestClient>,
    oauth: OAuthContext,
    app_data_repo: String,
}

impl GiteeAccounts {
    pub fn new(rest: Arc<RestClient>, oauth: OAuthContext, app_data_repo: impl Into<String>) -> Self {
        Self {
            rest,
            oauth,
            app_data_repo: app_data_repo.into(),
        }
    }

    /// Make sure the app-data repository exists, creating an initialized
    /// private repository when it does not.
    pub async fn ensure_app_data_repo(&self, token: &Token) -> Result<()> {
        match self
            .rest
            .repo_info(&token.access_token, &token.name, &self.app_data_repo)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::NotFound(_)) => {
                info!("Creating {}/{}", token.name, self.app_data_repo);
                let request = HttpRequest::new(Method::Post, self.rest.url("user/repos")).json(
                    serde_json::json!({
                        "name": self.app_data_repo,
                        "description": "Workspace data repository.",
                        "private": true,
                        "auto_init": true,
                    }),
                );
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
impl OAuthBackend for GiteeAccounts {
    fn oauth(&self) -> &OAuthContext {
        &self.oauth
    }

    // Gitee has no public-only repository scope.
    fn default_scopes(&self, _repo_full_access: bool) -> Vec<String> {
        self.sign_in_scopes()
    }

    fn sign_in_scopes(&self) -> Vec<String> {
        vec![
            "user_info".to_string(),
            "projects".to_string(),
            "gists".to_string(),
        ]
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
            sub: user.login.clone(),
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

/// Resolves Gitee users by login.
pub struct GiteeUserResolver {
    rest: Arc<RestClient>,
}

impl GiteeUserResolver {
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl UserInfoResolver for GiteeUserResolver {
    async fn resolve(&self, sub: &str) -> Result<UserInfo> {
        let user: RemoteUser = self
            .rest
            .get_json(None, self.rest.url(&format!("users/{}", encode_component(sub))), sub)
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

    fn accounts(transport: Arc<MockTransport>, store: Arc<MemoryAccountStore>) -> GiteeAccounts {
        let rest = Arc::new(RestClient::new(
            transport.clone(),
            "https://gitee.com/api/v5",
            AuthStyle::QueryParam,
        ));
        let flow = OAuthFlow::new(
            OAuthConfig {
                client_id: "client-1".to_string(),
                client_secret: "secret".to_string(),
                redirect_url: "http://localhost:8080/callback".to_string(),
            },
            OAuthEndpoints {
                authorize_url: super::super::GITEE_AUTHORIZE_URL.to_string(),
                token_url: super::super::GITEE_TOKEN_URL.to_string(),
            },
            transport,
        );
        GiteeAccounts::new(
            rest,
            OAuthContext {
                flow,
                prompt: Arc::new(PastedCode),
                accounts: AccountManager::new("gitee", store),
                directory: Arc::new(UserDirectory::new()),
            },
            "stackedit-app-data",
        )
    }

    #[tokio::test]
    async fn test_sign_in_creates_repo_and_uses_login_as_sub() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "access_token": "gt-abc", "token_type": "bearer" }));
        transport.push_json(
            200,
            json!({ "id": 5, "login": "octo", "avatar_url": "https://portrait.gitee.com/octo.png" }),
        );
        transport.push_json(404, json!({ "message": "Not Found Project" }));
        transport.push_json(201, json!({ "full_name": "octo/stackedit-app-data" }));
        let store = Arc::new(MemoryAccountStore::new());
        let accounts = accounts(transport.clone(), store.clone());

        let token = accounts.sign_in().await.unwrap();
        assert_eq!(token.sub, "octo");
        assert!(token.repo_full_access);
        assert!(store.token("gitee", "octo").await.unwrap().is_some());

        let user = accounts.oauth().directory.get("gt:octo").unwrap();
        assert_eq!(user.image_url, "https://portrait.gitee.com/octo.png!avatar60");

        let requests = transport.requests();
        assert!(requests[3].url.ends_with("/user/repos"));
        assert_eq!(requests[3].json_body().unwrap()["auto_init"], true);
        assert_eq!(requests[3].query_value("access_token"), Some("gt-abc"));
    }

    #[tokio::test]
    async fn test_existing_repo_is_left_alone() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "access_token": "gt-abc", "token_type": "bearer" }));
        transport.push_json(200, json!({ "id": 5, "login": "octo" }));
        transport.push_json(200, json!({ "full_name": "octo/stackedit-app-data", "private": true }));
        let accounts = accounts(transport.clone(), Arc::new(MemoryAccountStore::new()));

        accounts.sign_in().await.unwrap();
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_resolver_by_login() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "id": 5, "login": "octo" }));
        transport.push_json(404, json!({ "message": "Not Found" }));
        let rest = Arc::new(RestClient::new(
            transport.clone(),
            "https://gitee.com/api/v5",
            AuthStyle::QueryParam,
        ));
        let resolver = GiteeUserResolver::new(rest);

        assert_eq!(resolver.resolve("octo").await.unwrap().id, "gt:octo");
        assert!(transport.requests()[0].url.ends_with("/users/octo"));
        assert!(matches!(
            resolver.resolve("ghost").await,
            Err(Error::PermanentlyUnresolvable(_))
        ));
    }
}
