//! OAuth2 authorization-code flow and the account operations built on it.

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope, TokenResponse};
use std::sync::Arc;
use tracing::debug;

use docsync_common::{Error, ImgStorage, Result, Secret, Token};

use crate::account::{merge_token, AccountManager, SignedInIdentity};
use crate::config::OAuthConfig;
use crate::identity::{UserDirectory, UserInfo};
use crate::rest::cache_buster;
use crate::transport::{HttpRequest, HttpTransport, Method};

/// Authorization code returned by the provider redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    /// CSRF state echoed by the provider, when the prompt captured it.
    pub state: Option<String>,
}

/// Presents the authorization URL to the user and collects the code.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// `silent` asks for a flow without user interaction, if the prompt supports one.
    async fn request_code(&self, authorize_url: &str, silent: bool) -> Result<AuthorizationCode>;
}

/// Provider authorization and token endpoints.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
}

/// Authorization-code flow against one provider.
pub struct OAuthFlow {
    config: OAuthConfig,
    endpoints: OAuthEndpoints,
    transport: Arc<dyn HttpTransport>,
}

impl OAuthFlow {
    pub fn new(
        config: OAuthConfig,
        endpoints: OAuthEndpoints,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            endpoints,
            transport,
        }
    }

    /// Build the authorization URL for `scopes`.
    ///
    /// Returns the URL and the CSRF state it carries.
    pub fn authorize_url(&self, scopes: &[String]) -> Result<(String, CsrfToken)> {
        if self.config.client_id.is_empty() {
            return Err(Error::InvalidInput(
                "OAuth client id is not configured".to_string(),
            ));
        }

        let mut client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(self.endpoints.authorize_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            );
        if !self.config.redirect_url.is_empty() {
            client = client.set_redirect_uri(
                RedirectUrl::new(self.config.redirect_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
            );
        }

        let (url, csrf_token) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .url();

        Ok((url.to_string(), csrf_token))
    }

    /// Exchange an authorization code for an access token.
    ///
    /// # Errors
    /// - `Authentication` if the provider rejects the code
    pub async fn exchange_code(&self, code: &str) -> Result<BasicTokenResponse> {
        let mut form = vec![
            ("client_id".to_string(), self.config.client_id.clone()),
            ("code".to_string(), code.to_string()),
            ("grant_type".to_string(), "authorization_code".to_string()),
        ];
        if !self.config.client_secret.is_empty() {
            form.push(("client_secret".to_string(), self.config.client_secret.clone()));
        }
        if !self.config.redirect_url.is_empty() {
            form.push(("redirect_uri".to_string(), self.config.redirect_url.clone()));
        }

        let request = HttpRequest::new(Method::Post, self.endpoints.token_url.clone())
            .header("Accept", "application/json")
            .query("t", cache_buster())
            .form(form);
        let response = self.transport.send(request).await?;

        // GitHub reports a rejected code as 200 with an error body
        if response.is_success() {
            if let Ok(token) = response.json::<BasicTokenResponse>() {
                return Ok(token);
            }
        }
        match serde_json::from_slice::<BasicErrorResponse>(&response.body) {
            Ok(err) => Err(Error::Authentication(format!("Token exchange failed: {}", err))),
            Err(_) => Err(Error::Authentication(format!(
                "Token exchange failed with status {}: {}",
                response.status,
                response.text()
            ))),
        }
    }

    /// Run the whole flow: prompt for a code, check the state, exchange it.
    pub async fn authorize(
        &self,
        prompt: &dyn AuthorizationPrompt,
        scopes: &[String],
        silent: bool,
    ) -> Result<Secret> {
        let (url, csrf_token) = self.authorize_url(scopes)?;
        debug!("Requesting authorization for scopes {:?}", scopes);

        let response = prompt.request_code(&url, silent).await?;
        if let Some(state) = &response.state {
            if state != csrf_token.secret() {
                return Err(Error::Authentication(
                    "OAuth2 state does not match the authorization request".to_string(),
                ));
            }
        }

        let token = self.exchange_code(&response.code).await?;
        Ok(Secret::new(token.access_token().secret().clone()))
    }
}

/// Everything a backend needs to turn a sign-in into a persisted token.
pub struct OAuthContext {
    pub flow: OAuthFlow,
    pub prompt: Arc<dyn AuthorizationPrompt>,
    pub accounts: AccountManager,
    pub directory: Arc<UserDirectory>,
}

impl OAuthContext {
    /// Record the resolved user and build the token for it.
    ///
    /// # Errors
    /// - `IdentityMismatch` if `expected_sub` is set and differs from `identity.sub`
    pub async fn admit(
        &self,
        user: UserInfo,
        identity: SignedInIdentity,
        expected_sub: Option<&str>,
        is_primary: bool,
        full_access_scope: &str,
    ) -> Result<Token> {
        self.directory.add(user);

        if let Some(expected) = expected_sub {
            if expected != identity.sub {
                return Err(Error::IdentityMismatch {
                    expected: expected.to_string(),
                    actual: identity.sub,
                });
            }
        }

        let previous = self.accounts.existing(&identity.sub).await?;
        Ok(merge_token(
            identity,
            previous.as_ref(),
            is_primary,
            full_access_scope,
        ))
    }
}

/// Account operations of a hosting backend.
#[async_trait]
pub trait OAuthBackend: Send + Sync {
    fn oauth(&self) -> &OAuthContext;

    /// Scopes requested when adding a secondary account.
    fn default_scopes(&self, repo_full_access: bool) -> Vec<String>;

    /// Scopes requested when signing in to the main workspace.
    fn sign_in_scopes(&self) -> Vec<String>;

    /// Authorize, resolve the remote user and persist the resulting token.
    ///
    /// # Errors
    /// - `IdentityMismatch` if `expected_sub` does not match the signed-in account
    async fn start_oauth2(
        &self,
        scopes: &[String],
        expected_sub: Option<&str>,
        silent: bool,
        is_primary: bool,
    ) -> Result<Token>;

    async fn sign_in(&self) -> Result<Token> {
        let scopes = self.sign_in_scopes();
        self.start_oauth2(&scopes, None, false, true).await
    }

    async fn add_account(&self, repo_full_access: bool) -> Result<Token> {
        let scopes = self.default_scopes(repo_full_access);
        self.start_oauth2(&scopes, None, false, false).await
    }

    async fn refresh_sponsor_info(&self, token: Token) -> Result<Token> {
        self.oauth().accounts.refresh_sponsor_info(token).await
    }

    async fn update_token_img_storage(&self, token: &mut Token, storage: ImgStorage) -> Result<()> {
        self.oauth().accounts.update_img_storage(token, storage).await
    }

    async fn remove_token_img_storage(&self, token: &mut Token, sid: &str) -> Result<()> {
        self.oauth().accounts.remove_img_storage(token, sid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MemoryAccountStore;
    use crate::transport::{MockTransport, RequestBody};
    use serde_json::json;

    fn flow(transport: Arc<MockTransport>) -> OAuthFlow {
        OAuthFlow::new(
            OAuthConfig {
                client_id: "client-1".to_string(),
                client_secret: "shh".to_string(),
                redirect_url: "http://localhost:8080/callback".to_string(),
            },
            OAuthEndpoints {
                authorize_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
            },
            transport,
        )
    }

    struct FixedPrompt {
        code: &'static str,
        state: Option<&'static str>,
    }

    #[async_trait]
    impl AuthorizationPrompt for FixedPrompt {
        async fn request_code(&self, _url: &str, _silent: bool) -> Result<AuthorizationCode> {
            Ok(AuthorizationCode {
                code: self.code.to_string(),
                state: self.state.map(str::to_string),
            })
        }
    }

    #[test]
    fn test_authorize_url_carries_client_and_scopes() {
        let flow = flow(Arc::new(MockTransport::new()));
        let (url, csrf) = flow
            .authorize_url(&["repo".to_string(), "gist".to_string()])
            .unwrap();

        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("scope=repo+gist"));
        assert!(url.contains(&format!("state={}", csrf.secret())));
    }

    #[test]
    fn test_authorize_url_requires_client_id() {
        let flow = OAuthFlow::new(
            OAuthConfig::default(),
            OAuthEndpoints {
                authorize_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
            },
            Arc::new(MockTransport::new()),
        );
        assert!(matches!(
            flow.authorize_url(&[]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_posts_form() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            json!({ "access_token": "gho_abc", "token_type": "bearer", "scope": "repo,gist" }),
        );
        let flow = flow(transport.clone());

        let token = flow.exchange_code("code-1").await.unwrap();
        assert_eq!(token.access_token().secret(), "gho_abc");

        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.header_value("accept"), Some("application/json"));
        match &request.body {
            Some(RequestBody::Form(pairs)) => {
                assert!(pairs.contains(&("code".to_string(), "code-1".to_string())));
                assert!(pairs.contains(&("client_secret".to_string(), "shh".to_string())));
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            json!({ "error": "bad_verification_code", "error_description": "The code passed is incorrect or expired." }),
        );
        let flow = flow(transport);

        let result = flow.exchange_code("stale").await;
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[tokio::test]
    async fn test_authorize_rejects_state_mismatch() {
        let transport = Arc::new(MockTransport::new());
        let flow = flow(transport.clone());
        let prompt = FixedPrompt {
            code: "code-1",
            state: Some("forged"),
        };

        let result = flow.authorize(&prompt, &["repo".to_string()], false).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_authorize_without_state_exchanges_code() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "access_token": "gho_abc", "token_type": "bearer" }));
        let flow = flow(transport);
        let prompt = FixedPrompt {
            code: "code-1",
            state: None,
        };

        let secret = flow.authorize(&prompt, &["repo".to_string()], false).await.unwrap();
        assert_eq!(secret.expose(), "gho_abc");
    }

    #[tokio::test]
    async fn test_admit_detects_identity_mismatch() {
        let context = OAuthContext {
            flow: flow(Arc::new(MockTransport::new())),
            prompt: Arc::new(FixedPrompt {
                code: "c",
                state: None,
            }),
            accounts: AccountManager::new("github", Arc::new(MemoryAccountStore::new())),
            directory: Arc::new(UserDirectory::new()),
        };
        let identity = SignedInIdentity {
            access_token: Secret::new("abc"),
            scopes: vec!["repo".to_string()],
            sub: "2".to_string(),
            name: "other".to_string(),
        };
        let user = UserInfo {
            id: "gh:2".to_string(),
            name: "other".to_string(),
            image_url: String::new(),
        };

        let result = context
            .admit(user, identity, Some("1"), false, "repo")
            .await;
        match result {
            Err(Error::IdentityMismatch { expected, actual }) => {
                assert_eq!(expected, "1");
                assert_eq!(actual, "2");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // The resolved user is still recorded
        assert!(context.directory.get("gh:2").is_some());
    }
}
