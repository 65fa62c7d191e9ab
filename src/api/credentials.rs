use crate::error::{PodError, PodResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Opaque bearer credential attached to outbound calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Supplies credentials for calls to a remote node.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential_for(&self, remote_id: &str) -> PodResult<Credential>;
}

/// Fixed credentials: one default token plus optional per-remote overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    default: Option<Credential>,
    per_remote: HashMap<String, Credential>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            default: Some(Credential::new(token)),
            per_remote: HashMap::new(),
        }
    }

    pub fn with_remote(mut self, remote_id: &str, token: impl Into<String>) -> Self {
        self.per_remote
            .insert(remote_id.to_string(), Credential::new(token));
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential_for(&self, remote_id: &str) -> PodResult<Credential> {
        self.per_remote
            .get(remote_id)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| PodError::Config(format!("No credential for remote {}", remote_id)))
    }
}
