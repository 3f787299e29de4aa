use async_trait::async_trait;
use secrecy::SecretString;
use speech_service_types::TokenResponse;
use voice_coach_core::{CredentialProvider, TokenGrant, VoiceError};

/// Fetches ephemeral speech credentials from an HTTP token endpoint.
pub struct HttpCredentialProvider {
    http: reqwest::Client,
    token_url: String,
}

impl HttpCredentialProvider {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn request(&self) -> anyhow::Result<TokenResponse> {
        let response = self.http.get(&self.token_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("token endpoint answered {}", status);
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> Result<TokenGrant, VoiceError> {
        tracing::debug!("requesting speech credentials from {}", self.token_url);
        let response = self
            .request()
            .await
            .map_err(|e| VoiceError::Credential(format!("{:#}", e)))?;
        Ok(grant_from(response))
    }
}

fn grant_from(response: TokenResponse) -> TokenGrant {
    TokenGrant {
        status: response.status().to_string(),
        key: response
            .secret()
            .map(|secret| SecretString::from(secret.to_string())),
        region: response.region().map(str::to_string),
        endpoint: response.endpoint().map(str::to_string),
    }
}
