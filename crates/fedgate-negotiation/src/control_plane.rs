//! Access to the consumer connector's management API.

use crate::error::NegotiationError;
use crate::types::{
    CatalogRequest, ContractRequest, DataAddress, IdResponse, NegotiationStatus, TransferRequest,
    TransferStatus,
};
use async_trait::async_trait;
use fedgate_types::join_url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Header carrying the management API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// The six control-plane operations the handshake is built from.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// `POST /catalog/request`; returns the raw catalog document.
    async fn request_catalog(&self, request: &CatalogRequest) -> Result<Value, NegotiationError>;

    /// `POST /contractnegotiations`.
    async fn start_negotiation(
        &self,
        request: &ContractRequest,
    ) -> Result<IdResponse, NegotiationError>;

    /// `GET /contractnegotiations/{id}`.
    async fn negotiation_status(
        &self,
        negotiation_id: &str,
    ) -> Result<NegotiationStatus, NegotiationError>;

    /// `POST /transferprocesses`.
    async fn start_transfer(&self, request: &TransferRequest)
        -> Result<IdResponse, NegotiationError>;

    /// `GET /transferprocesses/{id}`.
    async fn transfer_status(
        &self,
        transfer_process_id: &str,
    ) -> Result<TransferStatus, NegotiationError>;

    /// `GET /edrs/{id}/dataaddress`.
    async fn data_address(&self, transfer_process_id: &str)
        -> Result<DataAddress, NegotiationError>;
}

/// HTTP client for the management API.
#[derive(Clone)]
pub struct ManagementClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ManagementClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fedgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn decode<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, NegotiationError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NegotiationError::Protocol(format!(
                "{path} returned {status}: {body}"
            )));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            NegotiationError::Protocol(format!("unexpected response shape from {path}: {e}"))
        })
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NegotiationError> {
        let response = self
            .client
            .post(join_url(&self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;
        Self::decode(path, response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, NegotiationError> {
        let response = self
            .client
            .get(join_url(&self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::decode(path, response).await
    }
}

#[async_trait]
impl ControlPlane for ManagementClient {
    async fn request_catalog(&self, request: &CatalogRequest) -> Result<Value, NegotiationError> {
        self.post("/catalog/request", request).await
    }

    async fn start_negotiation(
        &self,
        request: &ContractRequest,
    ) -> Result<IdResponse, NegotiationError> {
        self.post("/contractnegotiations", request).await
    }

    async fn negotiation_status(
        &self,
        negotiation_id: &str,
    ) -> Result<NegotiationStatus, NegotiationError> {
        self.get(&format!("/contractnegotiations/{negotiation_id}"))
            .await
    }

    async fn start_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<IdResponse, NegotiationError> {
        self.post("/transferprocesses", request).await
    }

    async fn transfer_status(
        &self,
        transfer_process_id: &str,
    ) -> Result<TransferStatus, NegotiationError> {
        self.get(&format!("/transferprocesses/{transfer_process_id}"))
            .await
    }

    async fn data_address(
        &self,
        transfer_process_id: &str,
    ) -> Result<DataAddress, NegotiationError> {
        self.get(&format!("/edrs/{transfer_process_id}/dataaddress"))
            .await
    }
}
