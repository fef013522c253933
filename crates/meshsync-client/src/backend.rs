//! REST calls against the dashboard backend.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use meshsync_core::{DeliveryState, EntityId, Event, OutgoingMessage};

use crate::config::{Dashboard, SyncConfig};
use crate::error::ClientError;

/// The local node as reported by `GET /api/config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub node_id: EntityId,
    pub node_name: String,
}

#[derive(Serialize)]
struct LinkToggle<'a> {
    sender: &'a EntityId,
    receiver: &'a EntityId,
}

#[derive(Debug, Clone)]
pub struct Backend {
    http: Client,
    base: String,
    dashboard: Dashboard,
}

impl Backend {
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, config: &SyncConfig) -> Self {
        Backend {
            http,
            base: config.http_base(),
            dashboard: config.dashboard,
        }
    }

    pub fn dashboard(&self) -> Dashboard {
        self.dashboard
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// GETs `path` and decodes the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.http.get(self.url(path)).send().await?;
        decode(path, response).await
    }

    /// Submits one message. A 2xx answer whose record reports `failed` is
    /// returned as [`ClientError::Rejected`].
    pub async fn post_message(&self, message: &OutgoingMessage) -> Result<Event, ClientError> {
        self.require(Dashboard::Chat, "sending messages")?;
        let path = "/api/messages";
        let response = self.http.post(self.url(path)).json(message).send().await?;
        let event: Event = decode(path, response).await?;
        if event.delivery == DeliveryState::Failed {
            warn!(id = %event.id, "backend recorded the message but the radio send failed");
            return Err(ClientError::Rejected {
                id: event.id.to_string(),
            });
        }
        Ok(event)
    }

    /// Flips the directed link `from -> to` on the testbed.
    pub async fn toggle_link(&self, from: &EntityId, to: &EntityId) -> Result<(), ClientError> {
        self.require(Dashboard::Visualizer, "toggling links")?;
        let path = "/toggle-link";
        let response = self
            .http
            .post(self.url(path))
            .json(&LinkToggle {
                sender: from,
                receiver: to,
            })
            .send()
            .await?;
        check_status(path, response).await.map(|_| ())
    }

    pub async fn fetch_identity(&self) -> Result<Identity, ClientError> {
        self.require(Dashboard::Chat, "identity lookup")?;
        self.get_json("/api/config").await
    }

    fn require(&self, dashboard: Dashboard, operation: &'static str) -> Result<(), ClientError> {
        if self.dashboard == dashboard {
            Ok(())
        } else {
            Err(ClientError::Unsupported {
                operation,
                dashboard: self.dashboard.as_str(),
            })
        }
    }
}

async fn check_status(path: &str, response: reqwest::Response) -> Result<String, ClientError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ClientError::Status {
            endpoint: path.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

async fn decode<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let body = check_status(path, response).await?;
    serde_json::from_str(&body).map_err(|source| ClientError::Decode {
        endpoint: path.to_string(),
        source,
    })
}
