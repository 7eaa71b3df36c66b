//! Account persistence.
//!
//! Tokens are stored per provider, keyed by subject. Every mutation replaces
//! the whole token, so concurrent updates never interleave field by field.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use docsync_common::{Error, ImgStorage, Result, Secret, Token};

use crate::rest::{check_status, cache_buster};
use crate::transport::{HttpRequest, HttpTransport};

/// Persistence for remote account tokens.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert or replace the token of `token.sub`.
    async fn add_token(&self, provider: &str, token: Token) -> Result<()>;

    async fn token(&self, provider: &str, sub: &str) -> Result<Option<Token>>;

    /// All tokens of a provider, ordered by subject.
    async fn tokens(&self, provider: &str) -> Result<Vec<Token>>;

    /// Remove a token. Returns whether one was stored.
    async fn remove_token(&self, provider: &str, sub: &str) -> Result<bool>;
}

type TokenMap = BTreeMap<String, BTreeMap<String, Token>>;

/// In-memory account store.
#[derive(Default)]
pub struct MemoryAccountStore {
    tokens: RwLock<TokenMap>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn add_token(&self, provider: &str, token: Token) -> Result<()> {
        self.tokens
            .write()
            .await
            .entry(provider.to_string())
            .or_default()
            .insert(token.sub.clone(), token);
        Ok(())
    }

    async fn token(&self, provider: &str, sub: &str) -> Result<Option<Token>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(provider)
            .and_then(|tokens| tokens.get(sub))
            .cloned())
    }

    async fn tokens(&self, provider: &str) -> Result<Vec<Token>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(provider)
            .map(|tokens| tokens.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_token(&self, provider: &str, sub: &str) -> Result<bool> {
        Ok(self
            .tokens
            .write()
            .await
            .get_mut(provider)
            .map(|tokens| tokens.remove(sub).is_some())
            .unwrap_or(false))
    }
}

/// Account store backed by a JSON file.
pub struct FileAccountStore {
    path: PathBuf,
    tokens: RwLock<TokenMap>,
}

impl FileAccountStore {
    /// Default location under the user's configuration directory.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("docsync").join("accounts.json"))
            .ok_or_else(|| Error::InvalidInput("No configuration directory available".to_string()))
    }

    /// Open a store, loading existing accounts if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tokens = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TokenMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded account store from {}", path.display());
        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Write to a sibling file, then rename over the original.
    async fn persist(&self, tokens: &TokenMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(tokens)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn add_token(&self, provider: &str, token: Token) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        tokens
            .entry(provider.to_string())
            .or_default()
            .insert(token.sub.clone(), token);
        self.persist(&tokens).await
    }

    async fn token(&self, provider: &str, sub: &str) -> Result<Option<Token>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(provider)
            .and_then(|tokens| tokens.get(sub))
            .cloned())
    }

    async fn tokens(&self, provider: &str) -> Result<Vec<Token>> {
        Ok(self
            .tokens
            .read()
            .await
            .get(provider)
            .map(|tokens| tokens.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_token(&self, provider: &str, sub: &str) -> Result<bool> {
        let mut tokens = self.tokens.write().await;
        let removed = tokens
            .get_mut(provider)
            .map(|tokens| tokens.remove(sub).is_some())
            .unwrap_or(false);
        if removed {
            self.persist(&tokens).await?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorInfo {
    #[serde(default)]
    sponsor_until: i64,
}

/// Looks up sponsorship on the application server.
pub struct SponsorClient {
    transport: Arc<dyn HttpTransport>,
    server_url: String,
}

impl SponsorClient {
    pub fn new(transport: Arc<dyn HttpTransport>, server_url: &str) -> Self {
        Self {
            transport,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Whether the account behind `access_token` sponsors the project now.
    pub async fn is_sponsor(&self, access_token: &Secret) -> Result<bool> {
        let request = HttpRequest::get(format!("{}/userInfo", self.server_url))
            .query("idToken", access_token.expose())
            .query("t", cache_buster());
        let response = check_status(self.transport.send(request).await?, "userInfo", false)?;
        let info: SponsorInfo = response.json()?;
        Ok(info.sponsor_until > Utc::now().timestamp_millis())
    }
}

/// Token bookkeeping for one provider.
pub struct AccountManager {
    provider: String,
    store: Arc<dyn AccountStore>,
    sponsor: Option<SponsorClient>,
}

impl AccountManager {
    pub fn new(provider: impl Into<String>, store: Arc<dyn AccountStore>) -> Self {
        Self {
            provider: provider.into(),
            store,
            sponsor: None,
        }
    }

    pub fn with_sponsor(mut self, sponsor: SponsorClient) -> Self {
        self.sponsor = Some(sponsor);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub async fn existing(&self, sub: &str) -> Result<Option<Token>> {
        self.store.token(&self.provider, sub).await
    }

    /// Refresh the sponsor flag of a primary token, then persist the token.
    ///
    /// Lookup failures leave the flag unset and are not reported.
    pub async fn refresh_sponsor_info(&self, mut token: Token) -> Result<Token> {
        if token.is_login {
            if let Some(sponsor) = &self.sponsor {
                match sponsor.is_sponsor(&token.access_token).await {
                    Ok(is_sponsor) => token.is_sponsor = is_sponsor,
                    Err(e) => debug!("Sponsor lookup for {} failed: {}", token.name, e),
                }
            }
        }
        self.store.add_token(&self.provider, token.clone()).await?;
        Ok(token)
    }

    /// Upsert a storage location on the token and persist it.
    pub async fn update_img_storage(&self, token: &mut Token, storage: ImgStorage) -> Result<()> {
        token.upsert_img_storage(storage);
        self.store.add_token(&self.provider, token.clone()).await
    }

    /// Remove a storage location by fingerprint and persist the token.
    pub async fn remove_img_storage(&self, token: &mut Token, sid: &str) -> Result<()> {
        if token.img_storages.as_ref().map_or(true, |s| s.is_empty()) {
            return Ok(());
        }
        token.remove_img_storage(sid);
        self.store.add_token(&self.provider, token.clone()).await
    }
}

/// Freshly authenticated identity, before it becomes a [`Token`].
#[derive(Debug, Clone)]
pub struct SignedInIdentity {
    pub access_token: Secret,
    pub scopes: Vec<String>,
    pub sub: String,
    pub name: String,
}

/// Build a token for a new sign-in, carrying over state of a previous token
/// for the same subject.
pub fn merge_token(
    identity: SignedInIdentity,
    previous: Option<&Token>,
    is_primary: bool,
    full_access_scope: &str,
) -> Token {
    let repo_full_access = identity.scopes.iter().any(|s| s == full_access_scope);
    let token = Token {
        access_token: identity.access_token,
        scopes: identity.scopes,
        sub: identity.sub,
        name: identity.name,
        is_login: is_primary || previous.map_or(false, |t| t.is_login),
        is_sponsor: false,
        repo_full_access,
        img_storages: previous.and_then(|t| t.img_storages.clone()),
    };
    info!("Signed in as {} ({})", token.name, token.sub);
    token
}
