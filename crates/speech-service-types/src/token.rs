/// Body returned by the credential endpoint.
///
/// The endpoint names the secret `token` or `key` depending on deployment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    token_expiration: Option<u64>,
}

impl TokenResponse {
    /// Missing status is read as success when a secret is present.
    pub fn status(&self) -> &str {
        match (&self.status, self.secret()) {
            (Some(status), _) => status,
            (None, Some(_)) => "success",
            (None, None) => "error",
        }
    }

    pub fn secret(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or(self.key.as_deref())
            .filter(|secret| !secret.is_empty())
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Expiry as seconds since the Unix epoch, when the endpoint reports one.
    pub fn token_expiration(&self) -> Option<u64> {
        self.token_expiration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_token_shaped_grant() {
        let grant: TokenResponse = serde_json::from_str(
            r#"{"status":"success","token":"abc","region":"westus2","tokenExpiration":1700000000}"#,
        )
        .unwrap();

        assert_eq!(grant.status(), "success");
        assert_eq!(grant.secret(), Some("abc"));
        assert_eq!(grant.region(), Some("westus2"));
        assert_eq!(grant.token_expiration(), Some(1_700_000_000));
    }

    #[test]
    fn reads_key_shaped_grant_without_status() {
        let grant: TokenResponse =
            serde_json::from_str(r#"{"key":"k","region":"eastus","endpoint":"wss://x"}"#).unwrap();

        assert_eq!(grant.status(), "success");
        assert_eq!(grant.secret(), Some("k"));
        assert_eq!(grant.endpoint(), Some("wss://x"));
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let grant: TokenResponse = serde_json::from_str(r#"{"token":""}"#).unwrap();

        assert_eq!(grant.secret(), None);
        assert_eq!(grant.status(), "error");
    }
}
