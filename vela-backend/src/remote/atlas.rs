//! Atlas legacy remote client
//!
//! Stores state under a `user/environment` slug in an Atlas-compatible
//! service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};

use crate::backend::{BackendError, BackendResult};
use crate::remote::RemoteClient;

#[derive(Debug)]
pub struct AtlasClient {
    client: reqwest::Client,
    state_url: Url,
}

impl AtlasClient {
    pub fn from_config(config: &BTreeMap<String, String>) -> BackendResult<Self> {
        let name = config
            .get("name")
            .ok_or_else(|| BackendError::configuration("missing required attribute: name"))?;
        if name.split('/').filter(|part| !part.is_empty()).count() != 2 {
            return Err(BackendError::configuration(format!(
                "name must take the form user/environment, got {name:?}"
            )));
        }

        let address = config
            .get("address")
            .ok_or_else(|| BackendError::configuration("missing required attribute: address"))?;
        let mut state_url = Url::parse(&format!("{address}/api/v1/state/{name}"))
            .map_err(|e| BackendError::configuration(format!("invalid atlas address: {e}")))?;
        if let Some(token) = config.get("access_token") {
            state_url
                .query_pairs_mut()
                .append_pair("access_token", token);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            state_url,
        })
    }
}

#[async_trait]
impl RemoteClient for AtlasClient {
    async fn get(&self) -> BackendResult<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.state_url.clone())
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
                "unexpected status {status} reading atlas state"
            ))),
        }
    }

    async fn put(&self, data: &[u8]) -> BackendResult<()> {
        let response = self
            .client
            .request(Method::PUT, self.state_url.clone())
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Http(format!(
                "unexpected status {} writing atlas state",
                response.status()
            )))
        }
    }

    async fn delete(&self) -> BackendResult<()> {
        let response = self
            .client
            .request(Method::DELETE, self.state_url.clone())
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(BackendError::Http(format!(
                "unexpected status {} deleting atlas state",
                response.status()
            )))
        }
    }
}
