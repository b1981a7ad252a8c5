//! Client-credentials token acquisition against Azure AD.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::EnvFile;
use crate::error::{AuthError, ConfigError, DeployError, Result};

/// Azure AD authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Lifetime assumed when the authority does not report one.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Credentials of the application registration.
#[derive(Clone)]
pub struct AuthSettings {
    /// Directory (tenant) id.
    pub tenant_id: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Scope override; defaults to the application's own `.default` scope.
    pub scope: Option<String>,
}

impl AuthSettings {
    /// Reads the credentials from the environment file.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` for the first missing credential.
    pub fn from_env_file(env: &EnvFile) -> Result<Self> {
        let required = |name: &str| -> Result<String> {
            env.get(name).map(ToString::to_string).ok_or_else(|| {
                DeployError::from(ConfigError::MissingEnvVar {
                    name: name.to_string(),
                })
            })
        };

        Ok(Self {
            tenant_id: required("AZURE_AD_TENANT_ID")?,
            client_id: required("AZURE_AD_CLIENT_ID")?,
            client_secret: required("AZURE_AD_CLIENT_SECRET")?,
            scope: env.get("AZURE_AD_SCOPE").map(ToString::to_string),
        })
    }

    /// Scope requested for the token.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scope
            .clone()
            .unwrap_or_else(|| format!("api://{}/.default", self.client_id))
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

/// A bearer token.
#[derive(Clone)]
pub struct AccessToken {
    /// The raw token.
    pub token: String,
    /// Token type, normally `Bearer`.
    pub token_type: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// The token with everything but the edges hidden.
    #[must_use]
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        if chars.len() <= 16 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 8..].iter().collect();
        format!("{head}...{tail}")
    }

    /// Returns true if the token expires within `margin`.
    #[must_use]
    pub fn expires_within(&self, margin: ChronoDuration) -> bool {
        self.expires_at - margin <= Utc::now()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &self.masked())
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Fetches tokens from an authority.
#[derive(Debug, Clone)]
pub struct TokenClient {
    client: Client,
    authority: String,
}

impl TokenClient {
    /// Creates a client for the public Azure AD authority.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_authority(DEFAULT_AUTHORITY)
    }

    /// Creates a client for another authority.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_authority(authority: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AuthError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            authority: authority.into().trim_end_matches('/').to_string(),
        })
    }

    /// Token endpoint of a tenant.
    #[must_use]
    pub fn token_url(&self, tenant_id: &str) -> String {
        format!("{}/{tenant_id}/oauth2/v2.0/token", self.authority)
    }

    /// Requests a token with the client-credentials grant.
    ///
    /// # Errors
    ///
    /// Returns `TokenRequest` if the authority rejects the request, or a
    /// network error.
    pub async fn fetch(&self, settings: &AuthSettings) -> Result<AccessToken> {
        let url = self.token_url(&settings.tenant_id);
        let scope = settings.scope();
        debug!("Requesting token for scope {scope}");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", settings.client_id.as_str()),
                ("client_secret", settings.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::network(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenRequest {
                status: status.as_u16(),
                message: body,
            }
            .into());
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| AuthError::InvalidResponse {
                    message: format!("Failed to parse token response: {e}"),
                })?;

        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = Utc::now() + ChronoDuration::seconds(expires_in);

        info!("Obtained access token, expires at {expires_at}");
        Ok(AccessToken {
            token: body.access_token,
            token_type: body.token_type.unwrap_or_else(|| String::from("Bearer")),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> AuthSettings {
        AuthSettings {
            tenant_id: String::from("tenant-1"),
            client_id: String::from("client-1"),
            client_secret: String::from("s3cret"),
            scope: None,
        }
    }

    #[test]
    fn test_settings_from_env_file() {
        let env = EnvFile::from_pairs([
            ("AZURE_AD_TENANT_ID", "t"),
            ("AZURE_AD_CLIENT_ID", "c"),
            ("AZURE_AD_CLIENT_SECRET", "s"),
        ]);
        let settings = AuthSettings::from_env_file(&env).expect("complete settings");
        assert_eq!(settings.scope(), "api://c/.default");
        assert!(!format!("{settings:?}").contains("\"s\""));
    }

    #[test]
    fn test_missing_secret() {
        let env = EnvFile::from_pairs([("AZURE_AD_TENANT_ID", "t"), ("AZURE_AD_CLIENT_ID", "c")]);
        let err = AuthSettings::from_env_file(&env).expect_err("secret is missing");
        assert!(err.to_string().contains("AZURE_AD_CLIENT_SECRET"));
    }

    #[test]
    fn test_masked_token() {
        let token = AccessToken {
            token: String::from("eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9.payload.signature"),
            token_type: String::from("Bearer"),
            expires_at: Utc::now(),
        };
        assert_eq!(token.masked(), "eyJ0eXAi...ignature");
        assert!(!format!("{token:?}").contains("payload"));
    }

    #[tokio::test]
    async fn test_fetch_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=api%3A%2F%2Fclient-1%2F.default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "abc.def.ghi"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TokenClient::with_authority(server.uri()).expect("client");
        let token = client.fetch(&settings()).await.expect("token");

        assert_eq!(token.token, "abc.def.ghi");
        assert_eq!(token.token_type, "Bearer");
        assert!(!token.expires_within(ChronoDuration::seconds(60)));
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_client"}"#),
            )
            .mount(&server)
            .await;

        let client = TokenClient::with_authority(server.uri()).expect("client");
        let err = client.fetch(&settings()).await.expect_err("rejected");

        assert!(matches!(
            err,
            DeployError::Auth(AuthError::TokenRequest { status: 401, .. })
        ));
        assert!(err.to_string().contains("invalid_client"));
    }
}
