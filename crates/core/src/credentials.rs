use crate::error::VoiceError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Speech-service credentials shared read-only by every session of one
/// controller. The key is only reachable through [`ExposeSecret`].
#[derive(Debug)]
pub struct Credentials {
    key: SecretString,
    region: String,
    endpoint: Option<String>,
}

impl Credentials {
    pub fn new(key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
            region: region.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn key(&self) -> &SecretString {
        &self.key
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Rejects credentials a backend could never authenticate with.
    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.key.expose_secret().trim().is_empty() {
            return Err(VoiceError::Credential("speech key is empty".to_string()));
        }
        if self.region.trim().is_empty() && self.endpoint.is_none() {
            return Err(VoiceError::Credential(
                "speech region is empty and no endpoint was given".to_string(),
            ));
        }
        Ok(())
    }
}

/// Response of the credential endpoint: `{status, key, region, endpoint?}`.
#[derive(Debug)]
pub struct TokenGrant {
    pub status: String,
    pub key: Option<SecretString>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl TokenGrant {
    pub const SUCCESS: &'static str = "success";

    pub fn into_credentials(self) -> Result<Credentials, VoiceError> {
        if self.status != Self::SUCCESS {
            return Err(VoiceError::Credential(format!(
                "credential endpoint answered with status '{}'",
                self.status
            )));
        }
        let key = self
            .key
            .ok_or_else(|| VoiceError::Credential("grant carries no key".to_string()))?;
        let region = self.region.unwrap_or_default();
        let credentials = Credentials {
            key,
            region,
            endpoint: self.endpoint,
        };
        credentials.validate()?;
        Ok(credentials)
    }
}

/// Supplies ephemeral speech-service credentials.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<TokenGrant, VoiceError>;
}

/// Provider used when no credential endpoint is configured; only the static
/// fallback can then be used.
pub struct NoCredentialEndpoint;

#[async_trait]
impl CredentialProvider for NoCredentialEndpoint {
    async fn fetch(&self) -> Result<TokenGrant, VoiceError> {
        Err(VoiceError::Credential(
            "no credential endpoint configured".to_string(),
        ))
    }
}

/// Fetches credentials from `provider`, falling back to the statically
/// configured ones. `None` means the controller cannot start.
pub async fn resolve_credentials(
    provider: &dyn CredentialProvider,
    fallback: Option<Arc<Credentials>>,
) -> Option<Arc<Credentials>> {
    match provider.fetch().await.and_then(TokenGrant::into_credentials) {
        Ok(credentials) => {
            tracing::info!(
                "speech credentials fetched for region '{}'",
                credentials.region()
            );
            Some(Arc::new(credentials))
        }
        Err(e) => {
            let fallback = fallback.filter(|c| c.validate().is_ok());
            if fallback.is_some() {
                tracing::warn!("{}; using statically configured speech credentials", e);
            } else {
                tracing::warn!("{}; no static speech credentials configured", e);
            }
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(status: &str, key: Option<&str>, region: Option<&str>) -> TokenGrant {
        TokenGrant {
            status: status.to_string(),
            key: key.map(|k| SecretString::from(k.to_string())),
            region: region.map(str::to_string),
            endpoint: None,
        }
    }

    #[tokio::test]
    async fn fetched_grant_wins_over_fallback() {
        let mut provider = MockCredentialProvider::new();
        provider
            .expect_fetch()
            .returning(|| Box::pin(async { Ok(grant("success", Some("k-1"), Some("westus2"))) }))
            .once();
        let fallback = Some(Arc::new(Credentials::new("static", "eastus")));

        let resolved = resolve_credentials(&provider, fallback).await.unwrap();

        assert_eq!(resolved.region(), "westus2");
        assert_eq!(resolved.key().expose_secret(), "k-1");
    }

    #[tokio::test]
    async fn failed_fetch_uses_static_fallback() {
        let mut provider = MockCredentialProvider::new();
        provider
            .expect_fetch()
            .returning(|| Box::pin(async { Err(VoiceError::Credential("offline".to_string())) }));
        let fallback = Some(Arc::new(Credentials::new("static", "eastus")));

        let resolved = resolve_credentials(&provider, fallback).await.unwrap();

        assert_eq!(resolved.region(), "eastus");
    }

    #[tokio::test]
    async fn unsuccessful_status_without_fallback_yields_none() {
        let mut provider = MockCredentialProvider::new();
        provider
            .expect_fetch()
            .returning(|| Box::pin(async { Ok(grant("error", None, None)) }));

        assert!(resolve_credentials(&provider, None).await.is_none());
    }

    #[tokio::test]
    async fn invalid_fallback_is_ignored() {
        let resolved = resolve_credentials(
            &NoCredentialEndpoint,
            Some(Arc::new(Credentials::new("", "eastus"))),
        )
        .await;

        assert!(resolved.is_none());
    }

    #[test]
    fn grant_without_region_but_with_endpoint_is_valid() {
        let mut g = grant("success", Some("k"), None);
        g.endpoint = Some("wss://speech.example.test".to_string());

        let credentials = g.into_credentials().unwrap();
        assert_eq!(credentials.endpoint(), Some("wss://speech.example.test"));
    }

    #[test]
    fn debug_output_never_contains_the_key() {
        let credentials = Credentials::new("super-secret-key", "westus2");
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("super-secret-key"));
    }
}
