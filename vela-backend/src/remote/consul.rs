//! Consul KV legacy remote client

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};

use crate::backend::{BackendError, BackendResult};
use crate::remote::RemoteClient;

const DEFAULT_ADDRESS: &str = "127.0.0.1:8500";
const DEFAULT_SCHEME: &str = "http";

#[derive(Debug)]
pub struct ConsulClient {
    client: reqwest::Client,
    kv_url: Url,
    token: Option<String>,
}

impl ConsulClient {
    pub fn from_config(config: &BTreeMap<String, String>) -> BackendResult<Self> {
        let path = config
            .get("path")
            .ok_or_else(|| BackendError::configuration("missing required attribute: path"))?;

        let address = config.get("address").map(String::as_str).unwrap_or(DEFAULT_ADDRESS);
        let scheme = config.get("scheme").map(String::as_str).unwrap_or(DEFAULT_SCHEME);

        let mut kv_url = Url::parse(&format!("{scheme}://{address}/v1/kv/{path}"))
            .map_err(|e| BackendError::configuration(format!("invalid consul address: {e}")))?;
        {
            let mut query = kv_url.query_pairs_mut();
            query.append_pair("raw", "true");
            if let Some(dc) = config.get("datacenter") {
                query.append_pair("dc", dc);
            }
        }

        Ok(Self {
            client: reqwest::Client::new(),
            kv_url,
            token: config.get("access_token").cloned(),
        })
    }

    fn request(&self, method: Method) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, self.kv_url.clone());
        if let Some(token) = &self.token {
            builder = builder.header("X-Consul-Token", token);
        }
        builder
    }
}

#[async_trait]
impl RemoteClient for ConsulClient {
    async fn get(&self) -> BackendResult<Option<Vec<u8>>> {
        let response = self
            .request(Method::GET)
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| BackendError::Http(e.to_string()))?;
                if bytes.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(bytes.to_vec()))
                }
            }
            status => Err(BackendError::Http(format!(
                "unexpected status {status} reading consul key"
            ))),
        }
    }

    async fn put(&self, data: &[u8]) -> BackendResult<()> {
        let response = self
            .request(Method::PUT)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Http(format!(
                "unexpected status {} writing consul key",
                response.status()
            )))
        }
    }

    async fn delete(&self) -> BackendResult<()> {
        let response = self
            .request(Method::DELETE)
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(BackendError::Http(format!(
                "unexpected status {} deleting consul key",
                response.status()
            )))
        }
    }
}
