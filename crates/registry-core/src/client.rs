//! HTTP client for a running registry daemon.
//!
//! Every call posts JSON to `/rpc/<Operation>` and unwraps the envelope. The
//! body is decoded regardless of HTTP status, so the client works against
//! both error modes.

use std::time::Duration;

use registry_state::{Context, DataRecord, Model, ProtocolDef, Record};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::facade::*;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:50051";

#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryClient {
    /// `base_url` may omit the scheme (`localhost:50051`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            base_url = format!("http://{base_url}");
        }
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Config(format!("cannot build http client: {e}")))?;
        Ok(RegistryClient { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Invoke one operation.
    pub async fn call<Req, Resp>(&self, op: Operation, req: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, op.path());
        debug!(%url, "rpc call");

        let response = self.http.post(&url).json(req).send().await?;
        let status = response.status();
        let envelope: Envelope<Resp> = response.json().await.map_err(|e| {
            RegistryError::Protocol(format!("{} returned HTTP {status}: {e}", op.name()))
        })?;
        envelope.into_result()
    }

    /// `GET /healthz`.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::Transport(format!(
                "health check returned HTTP {}",
                response.status()
            )))
        }
    }

    pub async fn create_model(&self, req: &CreateModelRequest) -> Result<Record<Model>> {
        self.call(Operation::CreateModel, req).await
    }

    pub async fn get_model(&self, id: &str) -> Result<Record<Model>> {
        self.call(Operation::GetModel, &IdRequest::new(id)).await
    }

    pub async fn list_models(&self, req: &ListRequest) -> Result<ListModelsResponse> {
        self.call(Operation::ListModels, req).await
    }

    pub async fn create_context(&self, req: &CreateContextRequest) -> Result<Record<Context>> {
        self.call(Operation::CreateContext, req).await
    }

    pub async fn get_context(&self, id: &str) -> Result<Record<Context>> {
        self.call(Operation::GetContext, &IdRequest::new(id)).await
    }

    pub async fn list_contexts(&self, req: &ListRequest) -> Result<ListContextsResponse> {
        self.call(Operation::ListContexts, req).await
    }

    pub async fn create_protocol(
        &self,
        req: &CreateProtocolRequest,
    ) -> Result<Record<ProtocolDef>> {
        self.call(Operation::CreateProtocol, req).await
    }

    pub async fn get_protocol(&self, id: &str) -> Result<Record<ProtocolDef>> {
        self.call(Operation::GetProtocol, &IdRequest::new(id)).await
    }

    pub async fn list_protocols(&self, req: &ListRequest) -> Result<ListProtocolsResponse> {
        self.call(Operation::ListProtocols, req).await
    }

    pub async fn execute_protocol(
        &self,
        req: &ExecuteProtocolRequest,
    ) -> Result<ExecuteProtocolResponse> {
        self.call(Operation::ExecuteProtocol, req).await
    }

    pub async fn get_protocol_status(&self, execution_id: &str) -> Result<ProtocolStatusResponse> {
        let req = GetProtocolStatusRequest {
            execution_id: execution_id.to_string(),
        };
        self.call(Operation::GetProtocolStatus, &req).await
    }

    pub async fn list_executions(
        &self,
        req: &ListExecutionsRequest,
    ) -> Result<ListExecutionsResponse> {
        self.call(Operation::ListExecutions, req).await
    }

    pub async fn add_data(&self, req: &AddDataRequest) -> Result<Record<DataRecord>> {
        self.call(Operation::AddData, req).await
    }

    pub async fn get_data(&self, id: &str) -> Result<Record<DataRecord>> {
        self.call(Operation::GetData, &IdRequest::new(id)).await
    }

    pub async fn list_data(&self, req: &ListDataRequest) -> Result<ListDataResponse> {
        self.call(Operation::ListData, req).await
    }

    pub async fn delete_data(&self, id: &str) -> Result<DeleteDataResponse> {
        self.call(Operation::DeleteData, &IdRequest::new(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn base_url_is_normalised() {
        let client = RegistryClient::new("localhost:50051/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:50051");

        let client = RegistryClient::new("https://registry.internal").unwrap();
        assert_eq!(client.base_url(), "https://registry.internal");
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        // Port 9 (discard) is closed on loopback in test environments.
        let client =
            RegistryClient::with_timeout("127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.get_model("x").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn non_envelope_response_is_internal() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let body = "<html><body>502 Bad Gateway</body></html>";
            let response = format!(
                "HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/html\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        let client = RegistryClient::new(addr.to_string()).unwrap();
        let err = client.get_model("x").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(!err.is_retryable());
    }
}
