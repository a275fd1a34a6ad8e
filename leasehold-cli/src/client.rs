use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use leasehold_core::client::LockClient;
use leasehold_core::types::{Resource, TypeFilter};
use leasehold_core::{LockError, LockResult};

use crate::handlers::{error_from_code, AcquireRequest, ApiResponse, ReleaseRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`LockClient`] over the server's HTTP/JSON surface.
pub struct HttpLockClient {
    http: Client,
    base: Url,
    api_key: Option<String>,
}

impl HttpLockClient {
    pub fn new(server: &str, api_key: Option<String>) -> LockResult<Self> {
        let base = Url::parse(server).map_err(|e| LockError::Transport(format!("invalid server url '{server}': {e}")))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            base,
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    fn url(&self, segments: &[&str]) -> LockResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| LockError::Transport(format!("server url '{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> LockResult<Option<T>> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;

        let body: ApiResponse<T> = serde_json::from_slice(&bytes)
            .map_err(|_| LockError::Transport(format!("unexpected response ({status})")))?;
        if body.success {
            Ok(body.data)
        } else {
            Err(error_from_code(body.code.as_deref(), body.error))
        }
    }

    async fn send_for_data<T: DeserializeOwned>(&self, request: RequestBuilder) -> LockResult<T> {
        self.send(request)
            .await?
            .ok_or_else(|| LockError::Transport("response carried no data".to_string()))
    }
}

fn transport(err: reqwest::Error) -> LockError {
    LockError::Transport(err.to_string())
}

fn filter_query(filter: &TypeFilter) -> [(&'static str, String); 2] {
    [
        ("type", filter.resource_type.clone()),
        ("type_code", i32::from(filter.type_code).to_string()),
    ]
}

#[async_trait]
impl LockClient for HttpLockClient {
    async fn acquire(&self, resource: &Resource, ttl_in_seconds: i64) -> LockResult<()> {
        let body = AcquireRequest {
            resource: resource.clone(),
            ttl_in_seconds,
        };
        let request = self.http.post(self.url(&["locks"])?).json(&body);
        self.send::<()>(request).await.map(|_| ())
    }

    async fn release(&self, resource: &Resource) -> LockResult<()> {
        let body = ReleaseRequest {
            resource: resource.clone(),
        };
        let request = self.http.post(self.url(&["locks", "release"])?).json(&body);
        self.send::<()>(request).await.map(|_| ())
    }

    async fn fetch(&self, key: &str) -> LockResult<Resource> {
        let request = self.http.get(self.url(&["locks", key])?);
        self.send_for_data(request).await
    }

    async fn fetch_all(&self, filter: &TypeFilter) -> LockResult<Vec<Resource>> {
        let request = self.http.get(self.url(&["locks"])?).query(&filter_query(filter));
        self.send_for_data(request).await
    }

    async fn count(&self, filter: &TypeFilter) -> LockResult<usize> {
        let request = self
            .http
            .get(self.url(&["locks", "count"])?)
            .query(&filter_query(filter));
        self.send_for_data(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leasehold_core::handler::LockHandler;
    use leasehold_core::infrastructure_in_memory::InMemoryLeaseStore;
    use leasehold_core::lock_pick::LockPick;
    use leasehold_core::repository::LockRepository;
    use leasehold_core::types::{TypeCode, PRESENCE_TYPE};

    use super::*;
    use crate::server::router;

    async fn spawn_server(api_key: Option<&str>) -> String {
        let db = Arc::new(LockRepository::new(InMemoryLeaseStore::new()));
        let handler = Arc::new(LockHandler::new(db.clone(), LockPick::new(db)));
        let app = router(handler, api_key.map(str::to_string));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn test_url_keeps_base_path_and_encodes_keys() {
        let client = HttpLockClient::new("http://localhost:3100/api/", None).unwrap();
        let url = client.url(&["locks", "cells/cell 1"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3100/api/locks/cells%2Fcell%201");
    }

    #[test]
    fn test_rejects_invalid_server_url() {
        assert!(matches!(
            HttpLockClient::new("not a url", None),
            Err(LockError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_round_trips_verbs_against_server() {
        let server = spawn_server(None).await;
        let client = HttpLockClient::new(&server, None).unwrap();
        let cell = Resource::presence("cell-1", "cell-1", "10.0.0.1");

        client.acquire(&cell, 10).await.unwrap();
        client.acquire(&Resource::lock("leader", "A", ""), 10).await.unwrap();

        assert_eq!(client.fetch("cell-1").await.unwrap(), cell);
        assert_eq!(
            client.fetch_all(&TypeFilter::of(PRESENCE_TYPE)).await.unwrap(),
            vec![cell.clone()]
        );
        assert_eq!(client.count(&TypeFilter::of_code(TypeCode::Lock)).await.unwrap(), 1);
        assert_eq!(
            client.acquire(&Resource::lock("leader", "B", ""), 10).await,
            Err(LockError::LockCollision)
        );

        client.release(&cell).await.unwrap();
        assert_eq!(client.fetch("cell-1").await, Err(LockError::ResourceNotFound));
    }

    #[tokio::test]
    async fn test_sends_bearer_token() {
        let server = spawn_server(Some("s3cret")).await;

        let anonymous = HttpLockClient::new(&server, None).unwrap();
        assert!(matches!(
            anonymous.count(&TypeFilter::any()).await,
            Err(LockError::Transport(_))
        ));

        let authorized = HttpLockClient::new(&server, Some("s3cret".to_string())).unwrap();
        assert_eq!(authorized.count(&TypeFilter::any()).await.unwrap(), 0);
    }
}
