//! HTTP transport for the `/v2/keys` wire contract.
//!
//! GET parameters travel in the query string, PUT parameters as a
//! form-encoded body, and every response reports the store-wide index in
//! the `X-Etcd-Index` header. Error responses are a JSON payload decoded
//! into the closed [`crate::Error`] set.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use super::DeleteOptions;
use super::GetOptions;
use super::SetOptions;
use super::Store;
use super::WatchOptions;
use crate::config::StoreConfig;
use crate::errors::Error;
use crate::errors::KeysError;
use crate::errors::Result;
use crate::node::RawResponse;
use crate::node::Response;

/// Store daemon version, from `GET /version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub etcdserver: String,
    pub etcdcluster: String,
}

/// Store client speaking the `/v2/keys` HTTP protocol.
pub struct HttpStore {
    client: reqwest::Client,
    endpoint: Url,
    watch_timeout: Duration,
}

type Params = Vec<(&'static str, String)>;

impl HttpStore {
    /// Connect to the endpoint named by [`StoreConfig`].
    ///
    /// # Errors
    /// [`Error::Invalid`] for an unparseable endpoint URL.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Invalid(format!("endpoint {}: {e}", config.endpoint)))?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(HttpStore {
            client,
            endpoint,
            watch_timeout: config.watch_timeout(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Query and parse the store daemon version.
    pub async fn version(&self) -> Result<VersionInfo> {
        let url = self.url("/version");
        let body = self.client.get(url).send().await?.error_for_status()?.text().await?;

        serde_json::from_str(&body).map_err(|e| Error::Invalid(format!("version response: {e}")))
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(path);
        url
    }

    fn keys_url(&self, key: &str) -> Url {
        let mut path = String::from("/v2/keys");
        if !key.starts_with('/') {
            path.push('/');
        }
        path.push_str(key);
        self.url(&path)
    }

    /// One `/v2/keys` request: query or form parameters in, typed response
    /// or decoded wire error out.
    async fn keys_request(
        &self,
        op: &'static str,
        method: Method,
        key: &str,
        query: Params,
        form: Option<Params>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let mut request = self.client.request(method, self.keys_url(key)).query(&query);
        if let Some(form) = &form {
            request = request.form(form);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let http_response = request.send().await?;
        let status = http_response.status();
        let etcd_index = etcd_index(http_response.headers());
        let json = is_json(http_response.headers());
        let body = http_response.text().await?;

        if !(status.is_success()) {
            return Err(decode_error(op, key, status, json, &body));
        }

        let raw: RawResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Invalid(format!("{op} {key}: response body: {e}")))?;
        let response = Response::from_raw(raw, etcd_index)?;

        debug!(
            "{op} {key} {:?}: {} {}@{}",
            form.unwrap_or(query),
            response.action,
            response.node.key,
            response.node.modified_index,
        );

        Ok(response)
    }
}

fn etcd_index(headers: &HeaderMap) -> u64 {
    headers
        .get("X-Etcd-Index")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

fn decode_error(op: &str, key: &str, status: StatusCode, json: bool, body: &str) -> Error {
    if json {
        if let Ok(keys_error) = serde_json::from_str::<KeysError>(body) {
            let error = Error::from_keys(keys_error);
            debug!("{op} {key}: error {error}");
            return error;
        }
    }

    Error::Invalid(format!("{op} {key}: unexpected HTTP {status}"))
}

fn push_bool(params: &mut Params, name: &'static str, value: bool) {
    if value {
        params.push((name, "true".to_string()));
    }
}

#[async_trait]
impl Store for HttpStore {
    async fn get(&self, key: &str, options: GetOptions) -> Result<Response> {
        let mut query = Params::new();
        push_bool(&mut query, "recursive", options.recursive);
        push_bool(&mut query, "sorted", options.sorted);

        self.keys_request("get", Method::GET, key, query, None, None).await
    }

    async fn set(&self, key: &str, options: SetOptions) -> Result<Response> {
        let mut form = Params::new();
        if let Some(value) = options.value {
            form.push(("value", value));
        }
        push_bool(&mut form, "dir", options.dir);
        if let Some(ttl) = options.ttl {
            form.push(("ttl", ttl.to_string()));
        }
        push_bool(&mut form, "refresh", options.refresh);
        if let Some(prev_exist) = options.prev_exist {
            form.push(("prevExist", prev_exist.to_string()));
        }
        if let Some(prev_index) = options.prev_index {
            form.push(("prevIndex", prev_index.to_string()));
        }
        if let Some(prev_value) = options.prev_value {
            form.push(("prevValue", prev_value));
        }

        self.keys_request("set", Method::PUT, key, Params::new(), Some(form), None).await
    }

    async fn delete(&self, key: &str, options: DeleteOptions) -> Result<Response> {
        let mut query = Params::new();
        push_bool(&mut query, "recursive", options.recursive);
        push_bool(&mut query, "dir", options.dir);
        if let Some(prev_index) = options.prev_index {
            query.push(("prevIndex", prev_index.to_string()));
        }
        if let Some(prev_value) = options.prev_value {
            query.push(("prevValue", prev_value));
        }

        self.keys_request("delete", Method::DELETE, key, query, None, None).await
    }

    async fn watch(&self, key: &str, options: WatchOptions) -> Result<Option<Response>> {
        let mut query = Params::new();
        query.push(("wait", "true".to_string()));
        push_bool(&mut query, "recursive", options.recursive);
        if let Some(wait_index) = options.wait_index {
            query.push(("waitIndex", wait_index.to_string()));
        }

        let timeout = options.timeout.unwrap_or(self.watch_timeout);

        match self
            .keys_request("watch", Method::GET, key, query, None, Some(timeout))
            .await
        {
            Ok(response) => Ok(Some(response)),
            // bounded wait elapsed without an event
            Err(Error::Transport(e)) if e.is_timeout() => Ok(None),
            Err(error) => Err(error),
        }
    }
}
