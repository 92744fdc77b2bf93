use std::sync::Arc;

use super::km_client::KmClient;
use super::verified::Verified;
use crate::error::{QkdError, QkdResult};
use crate::protocol::{CreateKeyRequest, KeyInfo, StatusResponse};

/// Async front of a [`KmClient`].
///
/// Each call runs on tokio's blocking pool so an async caller never stalls
/// its executor while the client waits on the network.
#[derive(Debug, Clone)]
pub struct KmHandle {
    client: Arc<KmClient>,
}

impl KmHandle {
    pub fn new(client: KmClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn from_arc(client: Arc<KmClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<KmClient> {
        &self.client
    }

    async fn run<T, F>(&self, operation: &str, call: F) -> QkdResult<T>
    where
        F: FnOnce(&KmClient) -> QkdResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || call(&client))
            .await
            .map_err(|e| QkdError::IoError(format!("KM {} worker failed: {}", operation, e)))?
    }

    pub async fn status(&self) -> QkdResult<StatusResponse> {
        self.run("status", |client| client.status()).await
    }

    pub async fn request_key(&self, length: usize) -> QkdResult<Verified<KeyInfo>> {
        self.run("request_key", move |client| client.request_key(length))
            .await
    }

    pub async fn create_key(&self, request: CreateKeyRequest) -> QkdResult<Verified<KeyInfo>> {
        self.run("create_key", move |client| client.create_key(&request))
            .await
    }

    pub async fn get_key(&self, key_id: String) -> QkdResult<KeyInfo> {
        self.run("get_key", move |client| client.get_key(&key_id)).await
    }

    pub async fn consume(&self, key_id: String, n: usize) -> QkdResult<Verified<usize>> {
        self.run("consume", move |client| client.consume(&key_id, n))
            .await
    }

    pub async fn material(
        &self,
        key_id: String,
        offset: usize,
        n: usize,
    ) -> QkdResult<Verified<usize>> {
        self.run("material", move |client| client.material(&key_id, offset, n))
            .await
    }

    pub async fn set_intrusion(&self, enabled: bool) -> QkdResult<bool> {
        self.run("set_intrusion", move |client| client.set_intrusion(enabled))
            .await
    }
}
