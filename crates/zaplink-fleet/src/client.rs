// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet trait and reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::types::{
    AckResponse, CreateSessionRequest, FleetHealth, FleetSession, QrCode, QrResponse,
    SessionList, SessionStatus,
};

/// Access to the worker fleet.
#[async_trait]
pub trait Fleet: Send + Sync {
    /// Fleet liveness and active session count.
    async fn health(&self) -> Result<FleetHealth>;

    /// All sessions currently known to the fleet.
    async fn list_instances(&self) -> Result<Vec<FleetSession>>;

    /// Ground-truth raw status of one session.
    async fn instance_status(&self, worker_instance_id: &str) -> Result<String>;

    /// Provision a new session on the fleet.
    async fn create_instance(&self, request: &CreateSessionRequest) -> Result<()>;

    /// Tear down a session on the fleet.
    async fn delete_instance(&self, worker_instance_id: &str) -> Result<()>;

    /// Fetch the pairing QR code for a session.
    async fn qr_code(&self, worker_instance_id: &str) -> Result<QrCode>;
}

/// Connection settings for [`HttpFleet`].
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Base URL of the fleet API, e.g. `http://10.0.4.7:3002`.
    pub base_url: String,
    /// Bearer token expected by the fleet.
    pub auth_token: String,
    /// Hard per-request timeout, independent of caller-level backoff.
    pub request_timeout: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3002".to_string(),
            auth_token: String::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// reqwest-backed fleet client.
#[derive(Clone)]
pub struct HttpFleet {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpFleet {
    /// Build a client from config. Fails only if the TLS backend cannot be
    /// initialized.
    pub fn new(config: FleetConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| FleetError::Connect {
                endpoint: "client".to_string(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| classify(endpoint, e))?;

        decode(endpoint, response).await
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await
            .map_err(|e| classify(endpoint, e))?;

        decode(endpoint, response).await
    }
}

fn classify(endpoint: &str, error: reqwest::Error) -> FleetError {
    if error.is_timeout() {
        FleetError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        FleetError::Connect {
            endpoint: endpoint.to_string(),
            source: error,
        }
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect();
        return Err(FleetError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    response.json::<T>().await.map_err(|source| FleetError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

fn check_ack(endpoint: &str, ack: AckResponse) -> Result<()> {
    if ack.success {
        Ok(())
    } else {
        Err(FleetError::Rejected {
            endpoint: endpoint.to_string(),
            message: ack.error.unwrap_or_else(|| "unspecified failure".to_string()),
        })
    }
}

#[async_trait]
impl Fleet for HttpFleet {
    async fn health(&self) -> Result<FleetHealth> {
        self.get_json("health", "/health").await
    }

    async fn list_instances(&self) -> Result<Vec<FleetSession>> {
        let list: SessionList = self.get_json("instances", "/instances").await?;
        debug!(count = list.instances.len(), "Fetched fleet session list");
        Ok(list.instances)
    }

    async fn instance_status(&self, worker_instance_id: &str) -> Result<String> {
        let endpoint = "instance-status";
        let path = format!("/instance/{worker_instance_id}/status");
        let status: SessionStatus = self.get_json(endpoint, &path).await?;

        if !status.success {
            return Err(FleetError::Rejected {
                endpoint: endpoint.to_string(),
                message: status
                    .error
                    .unwrap_or_else(|| "session not available".to_string()),
            });
        }

        Ok(status.status.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn create_instance(&self, request: &CreateSessionRequest) -> Result<()> {
        let ack: AckResponse = self
            .post_json("instance-create", "/instance/create", request)
            .await?;
        check_ack("instance-create", ack)
    }

    async fn delete_instance(&self, worker_instance_id: &str) -> Result<()> {
        let body = serde_json::json!({ "instanceId": worker_instance_id });
        let ack: AckResponse = self
            .post_json("instance-delete", "/instance/delete", &body)
            .await?;
        check_ack("instance-delete", ack)
    }

    async fn qr_code(&self, worker_instance_id: &str) -> Result<QrCode> {
        let endpoint = "instance-qr";
        let path = format!("/instance/{worker_instance_id}/qr");
        let qr: QrResponse = self.get_json(endpoint, &path).await?;

        if let Some(image) = qr.qr_code.filter(|q| !q.is_empty()) {
            return Ok(QrCode::Image(image));
        }
        if qr.waiting || qr.success {
            return Ok(QrCode::Waiting);
        }
        Err(FleetError::Rejected {
            endpoint: endpoint.to_string(),
            message: qr.error.unwrap_or_else(|| "QR code unavailable".to_string()),
        })
    }
}
