//! HTTP legacy remote client
//!
//! Talks to any endpoint that serves the state document on GET, accepts it
//! on PUT (or a configurable method), and removes it on DELETE.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};

use crate::backend::{BackendError, BackendResult};
use crate::remote::RemoteClient;

#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    url: Url,
    update_method: Method,
    username: Option<String>,
    password: Option<String>,
}

impl HttpClient {
    pub fn from_config(config: &BTreeMap<String, String>) -> BackendResult<Self> {
        let address = config
            .get("address")
            .ok_or_else(|| BackendError::configuration("missing required attribute: address"))?;
        let url = Url::parse(address)
            .map_err(|e| BackendError::configuration(format!("invalid address {address:?}: {e}")))?;

        let update_method = match config.get("update_method") {
            Some(method) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| BackendError::configuration(format!("invalid update_method {method:?}")))?,
            None => Method::PUT,
        };

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            update_method,
            username: config.get("username").cloned(),
            password: config.get("password").cloned(),
        })
    }

    fn request(&self, method: Method) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, self.url.clone());
        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_deref());
        }
        builder
    }
}

#[async_trait]
impl RemoteClient for HttpClient {
    async fn get(&self) -> BackendResult<Option<Vec<u8>>> {
        let response = self
            .request(Method::GET)
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| BackendError::Http(e.to_string()))?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(BackendError::Http(format!(
                "unexpected status {status} reading state from {}",
                self.url
            ))),
        }
    }

    async fn put(&self, data: &[u8]) -> BackendResult<()> {
        let response = self
            .request(self.update_method.clone())
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Http(format!(
                "unexpected status {} writing state to {}",
                response.status(),
                self.url
            )))
        }
    }

    async fn delete(&self) -> BackendResult<()> {
        let response = self
            .request(Method::DELETE)
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(BackendError::Http(format!(
                "unexpected status {status} deleting state at {}",
                self.url
            ))),
        }
    }
}
