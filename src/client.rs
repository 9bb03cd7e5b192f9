//! HTTP client for a key-by-date document service.
//!
//! One [`ResourceClient`] serves one resource path; the JSON shape is chosen
//! per call, so the same client works for every tracked domain.

use crate::config::ClientConfig;
use crate::date_key::DateKey;
use crate::errors::TransportError;
use crate::models::{DatedRecord, Mutation};
use crate::sync::Persistence;
use reqwest::{Client, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;

pub struct ResourceClient {
    base: Url,
    resource: Vec<String>,
    client: Client,
}

impl ResourceClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let base = Url::parse(&config.base_url)
            .map_err(|err| TransportError::InvalidUrl(format!("{}: {err}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(config.base_url));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base,
            resource: config.resource_segments().map(str::to_string).collect(),
            client,
        })
    }

    /// `<base>/<resource>/<segments...>`, each segment percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(&self.resource)
            .extend(segments);
        Ok(url)
    }

    /// 404 means "nothing there yet" and maps to `None`.
    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>, TransportError> {
        let response = self.client.get(self.url(segments)?).send().await?;
        match Self::handle_response(response).await {
            Ok(body) => Ok(Some(body)),
            Err(TransportError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn list_json<T: DeserializeOwned>(&self, limit: usize) -> Result<Vec<T>, TransportError> {
        let mut url = self.url(&[])?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        let response = self.client.get(url).send().await?;
        Self::handle_response(response).await
    }

    pub async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.client.post(self.url(segments)?).json(body).send().await?;
        Self::handle_response(response).await
    }

    pub async fn patch_json<B, T>(&self, segments: &[&str], body: Option<&B>) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.patch(self.url(segments)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::handle_response(request.send().await?).await
    }

    /// Deleting something already gone is not a failure.
    pub async fn delete(&self, segments: &[&str]) -> Result<(), TransportError> {
        let response = self.client.delete(self.url(segments)?).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(TransportError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound);
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Persistence for ResourceClient {
    async fn fetch(&self, key: DateKey) -> Result<Option<DatedRecord>, TransportError> {
        self.get_json(&[key.to_string().as_str()]).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<DatedRecord>, TransportError> {
        self.list_json(limit).await
    }

    async fn send(&self, key: DateKey, mutation: &Mutation) -> Result<Option<DatedRecord>, TransportError> {
        let date = key.to_string();
        debug!(%key, mutation = mutation.name(), "sending mutation");
        match mutation {
            Mutation::SaveFields(fields) => self.patch_json(&[date.as_str()], Some(fields)).await.map(Some),
            Mutation::SaveRecord(record) => self.post_json(&[], record).await.map(Some),
            Mutation::AddItem(item) => self.post_json(&[date.as_str(), "items"], item).await.map(Some),
            Mutation::ToggleItem(id) => self
                .patch_json::<(), _>(&[date.as_str(), "items", id.as_str()], None)
                .await
                .map(Some),
            Mutation::RemoveItem(id) => self.delete(&[date.as_str(), "items", id.as_str()]).await.map(|_| None),
            Mutation::DeleteRecord => self.delete(&[date.as_str()]).await.map(|_| None),
        }
    }
}
