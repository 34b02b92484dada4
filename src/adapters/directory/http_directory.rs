use std::time::Duration;

use ed25519_dalek::Signer;
use log::{debug, info};
use serde::Serialize;

use crate::core::errors::{KeycardError, Result, ResultExt};
use crate::core::models::card::{Card, CardRequest, RevocationReason, validate_card_id};
use crate::core::models::keys::Keypair;
use crate::core::traits::directory::Directory;

/// Default timeout for one directory request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How requests to the directory are authorized.
pub enum DirectoryCredentials {
    /// No credentials; read-mostly public access.
    Anonymous,
    /// Bearer access token.
    Token(String),
    /// Access token plus an application key that co-signs published cards.
    App {
        token: String,
        app_id: String,
        key: Keypair,
    },
}

impl DirectoryCredentials {
    fn token(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Token(token) | Self::App { token, .. } => Some(token.as_str()),
        }
    }

    /// Human-readable tier name for logs.
    pub fn tier(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Token(_) => "token",
            Self::App { .. } => "application",
        }
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    identities: &'a [String],
}

#[derive(Serialize)]
struct RevokeRequest {
    revocation_reason: RevocationReason,
}

/// Directory client speaking JSON over HTTP.
///
/// Calls are async `reqwest` driven by a private current-thread tokio
/// runtime, so every method blocks the caller until the response arrives.
pub struct HttpDirectory {
    base_url: String,
    credentials: DirectoryCredentials,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpDirectory {
    pub fn new(base_url: &str, credentials: DirectoryCredentials, timeout: Duration) -> Result<Self> {
        let client = Self::client_builder(timeout)
            .build()
            .map_err(|e| KeycardError::Configuration {
                detail: format!("Failed to create HTTP client: {e}"),
            })?;
        Self::with_client(base_url, credentials, client)
    }

    fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("keycard/{}", env!("CARGO_PKG_VERSION")))
    }

    fn with_client(
        base_url: &str,
        credentials: DirectoryCredentials,
        client: reqwest::Client,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        debug!(
            "directory client for {base_url} using {} credentials",
            credentials.tier()
        );
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
            runtime,
        })
    }

    /// Full URL for a path under the directory base.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Add the application co-signature when app credentials are configured.
    fn countersign(&self, request: &CardRequest) -> Result<CardRequest> {
        let mut request = request.clone();
        if let DirectoryCredentials::App { app_id, key, .. } = &self.credentials {
            let signature = key.signing_key().sign(&request.snapshot_bytes()?);
            request.add_signature(app_id, &signature.to_bytes());
        }
        Ok(request)
    }

    /// Send a request and map transport failures and non-2xx statuses.
    async fn send(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| KeycardError::remote(operation, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(KeycardError::NotFound {
                what: format!("{operation}: {}", body.trim()),
            });
        }
        Err(KeycardError::remote(
            operation,
            format!("{status}: {}", body.trim()),
        ))
    }
}

impl Directory for HttpDirectory {
    fn publish(&self, request: &CardRequest) -> Result<Card> {
        let request = self.countersign(request)?;
        let url = self.endpoint("cards");

        let card: Card = self.runtime.block_on(async {
            let response = self
                .send("publish", self.client.post(&url).json(&request))
                .await?;
            response
                .json()
                .await
                .map_err(|e| KeycardError::remote("publish", format!("invalid card: {e}")))
        })?;

        card.verify().context("directory returned an invalid card")?;
        info!("published card {} for '{}'", card.id, card.identity);
        Ok(card)
    }

    fn get(&self, id: &str) -> Result<Card> {
        validate_card_id(id)?;
        let url = self.endpoint(&format!("cards/{id}"));
        let card: Card = self.runtime.block_on(async {
            let response = self.send("get", self.client.get(&url)).await?;
            response
                .json()
                .await
                .map_err(|e| KeycardError::remote("get", format!("invalid card: {e}")))
        })?;

        if card.id != id {
            return Err(KeycardError::remote(
                "get",
                format!("asked for card {id}, got {}", card.id),
            ));
        }
        card.verify().context("directory returned an invalid card")?;
        Ok(card)
    }

    fn find(&self, identities: &[String]) -> Result<Vec<Card>> {
        let url = self.endpoint("cards/actions/search");
        let body = SearchRequest { identities };

        let cards: Vec<Card> = self.runtime.block_on(async {
            let response = self
                .send("find", self.client.post(&url).json(&body))
                .await?;
            response
                .json()
                .await
                .map_err(|e| KeycardError::remote("find", format!("invalid card list: {e}")))
        })?;

        debug!("directory returned {} card(s)", cards.len());
        for card in &cards {
            card.verify().context("directory returned an invalid card")?;
        }
        Ok(cards)
    }

    fn revoke(&self, id: &str, reason: RevocationReason) -> Result<()> {
        validate_card_id(id)?;
        let url = self.endpoint(&format!("cards/{id}"));
        let body = RevokeRequest {
            revocation_reason: reason,
        };

        self.runtime.block_on(async {
            self.send("revoke", self.client.delete(&url).json(&body))
                .await
                .map(|_| ())
        })?;

        info!("revoked card {id} ({reason})");
        Ok(())
    }
}
