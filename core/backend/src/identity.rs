//! User identity resolution.
//!
//! Each backend registers a [`UserInfoResolver`] under its provider name and
//! subject prefix. The registry is assembled once at startup and frozen behind
//! an `Arc`; resolved users are cached in a shared [`UserDirectory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use docsync_common::{Error, Result};

/// Display record for a remote user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// `{prefix}:{subject}`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_url: String,
}

/// Fetches user details for a subject id on one backend.
#[async_trait]
pub trait UserInfoResolver: Send + Sync {
    /// Resolve a bare subject (without prefix).
    ///
    /// # Errors
    /// - `PermanentlyUnresolvable` when the user does not exist
    /// - `Retryable` for any other failure
    async fn resolve(&self, sub: &str) -> Result<UserInfo>;
}

/// Map a backend failure to the resolver taxonomy.
pub fn classify_resolver_error(err: Error) -> Error {
    match err {
        Error::NotFound(msg) => Error::PermanentlyUnresolvable(msg),
        Error::PermanentlyUnresolvable(msg) => Error::PermanentlyUnresolvable(msg),
        other => Error::Retryable(other.to_string()),
    }
}

/// Cache of resolved users, keyed by `{prefix}:{subject}`.
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, UserInfo>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace a user.
    pub fn add(&self, user: UserInfo) {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.id.clone(), user);
    }

    pub fn get(&self, id: &str) -> Option<UserInfo> {
        self.users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Registration {
    provider: String,
    resolver: Arc<dyn UserInfoResolver>,
}

/// Collects resolver registrations before the registry is frozen.
#[derive(Default)]
pub struct IdentityRegistryBuilder {
    by_prefix: HashMap<String, Registration>,
}

impl IdentityRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for a provider and its subject prefix.
    ///
    /// # Errors
    /// - `AlreadyExists` if the provider or the prefix is already taken
    pub fn register(
        &mut self,
        provider: impl Into<String>,
        prefix: impl Into<String>,
        resolver: Arc<dyn UserInfoResolver>,
    ) -> Result<()> {
        let provider = provider.into();
        let prefix = prefix.into();
        if self.by_prefix.contains_key(&prefix)
            || self.by_prefix.values().any(|r| r.provider == provider)
        {
            return Err(Error::AlreadyExists(format!(
                "Resolver for '{}' ({}) is already registered",
                provider, prefix
            )));
        }
        self.by_prefix.insert(prefix, Registration { provider, resolver });
        Ok(())
    }

    /// Freeze the registrations.
    pub fn build(self, directory: Arc<UserDirectory>) -> Arc<IdentityRegistry> {
        Arc::new(IdentityRegistry {
            by_prefix: self.by_prefix,
            directory,
        })
    }
}

/// Read-only registry of user resolvers.
pub struct IdentityRegistry {
    by_prefix: HashMap<String, Registration>,
    directory: Arc<UserDirectory>,
}

impl IdentityRegistry {
    /// Resolve a `{prefix}:{subject}` id, serving cached users first.
    pub async fn resolve(&self, id: &str) -> Result<UserInfo> {
        if let Some(user) = self.directory.get(id) {
            return Ok(user);
        }

        let (prefix, sub) = id
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("Malformed user id: {}", id)))?;
        let registration = self.by_prefix.get(prefix).ok_or_else(|| {
            Error::NotFound(format!("No user resolver registered for prefix '{}'", prefix))
        })?;

        debug!("Resolving user {} through {}", id, registration.provider);
        let user = registration.resolver.resolve(sub).await?;
        self.directory.add(user.clone());
        Ok(user)
    }

    /// Registered provider names.
    pub fn providers(&self) -> Vec<String> {
        self.by_prefix.values().map(|r| r.provider.clone()).collect()
    }

    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingResolver {
        calls: AtomicU32,
        outcome: fn(&str) -> Result<UserInfo>,
    }

    #[async_trait]
    impl UserInfoResolver for CountingResolver {
        async fn resolve(&self, sub: &str) -> Result<UserInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(sub)
        }
    }

    fn found(sub: &str) -> Result<UserInfo> {
        Ok(UserInfo {
            id: format!("gh:{}", sub),
            name: "octo".to_string(),
            image_url: String::new(),
        })
    }

    fn gone(_: &str) -> Result<UserInfo> {
        Err(classify_resolver_error(Error::NotFound("user".to_string())))
    }

    #[tokio::test]
    async fn test_resolve_caches_users() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
            outcome: found,
        });
        let mut builder = IdentityRegistryBuilder::new();
        builder.register("github", "gh", resolver.clone()).unwrap();
        let registry = builder.build(Arc::new(UserDirectory::new()));

        let first = registry.resolve("gh:42").await.unwrap();
        let second = registry.resolve("gh:42").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.directory().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_is_not_cached() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
            outcome: gone,
        });
        let mut builder = IdentityRegistryBuilder::new();
        builder.register("github", "gh", resolver.clone()).unwrap();
        let registry = builder.build(Arc::new(UserDirectory::new()));

        let result = registry.resolve("gh:404").await;
        assert!(matches!(result, Err(Error::PermanentlyUnresolvable(_))));
        assert!(registry.directory().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_prefix_and_malformed_id() {
        let registry = IdentityRegistryBuilder::new().build(Arc::new(UserDirectory::new()));
        assert!(matches!(
            registry.resolve("gt:someone").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve("nocolon").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
            outcome: found,
        });
        let mut builder = IdentityRegistryBuilder::new();
        builder.register("github", "gh", resolver.clone()).unwrap();

        assert!(matches!(
            builder.register("github", "gh2", resolver.clone()),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            builder.register("other", "gh", resolver),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_classify_resolver_error() {
        assert!(matches!(
            classify_resolver_error(Error::NotFound("x".to_string())),
            Error::PermanentlyUnresolvable(_)
        ));
        assert!(matches!(
            classify_resolver_error(Error::Http {
                status: 403,
                message: "rate limited".to_string()
            }),
            Error::Retryable(_)
        ));
        assert!(matches!(
            classify_resolver_error(Error::Network("reset".to_string())),
            Error::Retryable(_)
        ));
    }
}
