/// Conta Azul OAuth2 client
///
/// Authorization-code grant with client credentials passed as HTTP
/// Basic auth, plus refresh-token rotation. The provider rotates both
/// tokens on every refresh.
use crate::{
    config::ProviderConfig,
    error::{PayflowError, PayflowResult},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

const OAUTH_SCOPES: &str = "openid profile aws.cognito.signin.user.admin";
const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Who the connected account belongs to, best-effort from the
/// Cognito id_token claims.
#[derive(Debug, Clone, Default)]
pub struct AccountIdentity {
    pub subject: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub company_name: Option<String>,
}

pub struct OAuthClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl OAuthClient {
    pub fn new(config: ProviderConfig) -> PayflowResult<Self> {
        let http = reqwest::Client::builder().timeout(TOKEN_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    /// Build the provider login URL and a fresh CSRF state value.
    pub fn authorization_url(&self) -> (String, String) {
        let mut state_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut state_bytes);
        let state = URL_SAFE_NO_PAD.encode(state_bytes);

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", OAUTH_SCOPES)
            .append_pair("state", &state)
            .finish();

        let separator = if self.config.auth_url.contains('?') {
            '&'
        } else {
            '?'
        };
        (
            format!("{}{}{}", self.config.auth_url, separator, query),
            state,
        )
    }

    /// Exchange an authorization code for the initial token pair.
    pub async fn exchange_code(&self, code: &str) -> PayflowResult<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        self.token_request(&form).await
    }

    /// Trade a refresh token for a new token pair. The old refresh
    /// token is invalidated by the provider on success.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> PayflowResult<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> PayflowResult<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token endpoint rejected request");
            return Err(PayflowError::Auth(format!(
                "Token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let raw: RawTokenResponse = response.json().await?;
        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PayflowError::Auth("Token response missing access_token".to_string()))?;
        let refresh_token = raw
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PayflowError::Auth("Token response missing refresh_token".to_string())
            })?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            expires_in: raw.expires_in.unwrap_or(3600),
            id_token: raw.id_token,
        })
    }

    /// Resolve the identity behind a fresh token pair.
    ///
    /// Verifies the access token against a cheap API call, then reads
    /// the id_token claims for display fields. The claims are not
    /// signature-verified; they came over TLS from the token endpoint
    /// moments ago and are used for display only.
    pub async fn account_info(
        &self,
        access_token: &str,
        api_base_url: &str,
        tokens: &TokenResponse,
    ) -> PayflowResult<AccountIdentity> {
        let url = format!(
            "{}/v1/pessoas?pagina=1&tamanho_pagina=1",
            api_base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PayflowError::Auth(format!(
                "Access token rejected by API: HTTP {}",
                response.status().as_u16()
            )));
        }

        let identity = tokens
            .id_token
            .as_deref()
            .and_then(decode_jwt_claims)
            .unwrap_or_else(|| {
                warn!("No usable id_token claims, generating fallback identity");
                fallback_identity()
            });

        info!(
            subject = identity.subject.as_deref().unwrap_or("unknown"),
            "Verified connected account"
        );
        Ok(identity)
    }
}

/// Identity of last resort when the token endpoint sent no id_token.
/// The generated id is stable for this connection only; reconnecting
/// without an id_token creates a fresh account row.
fn fallback_identity() -> AccountIdentity {
    let mut id_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id_bytes);
    AccountIdentity {
        subject: Some(format!("conta_azul_user_{}", hex::encode(id_bytes))),
        ..Default::default()
    }
}

/// Decode the claims segment of a JWT without signature verification.
fn decode_jwt_claims(token: &str) -> Option<AccountIdentity> {
    let payload = token.split('.').nth(1)?;

    // JWTs use unpadded base64url; tolerate padded and standard
    // alphabets from nonconforming issuers.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(payload))
        .or_else(|_| STANDARD.decode(payload))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    let get = |key: &str| {
        claims
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Some(AccountIdentity {
        subject: get("sub"),
        email: get("email"),
        name: get("name"),
        username: get("cognito:username"),
        company_name: get("custom:company_name"),
    })
}

impl AccountIdentity {
    /// Stable account key: the Cognito subject, falling back to the
    /// username, then the email.
    pub fn account_id(&self) -> Option<&str> {
        self.subject
            .as_deref()
            .or(self.username.as_deref())
            .or(self.email.as_deref())
    }
}
