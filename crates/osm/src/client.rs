//! HTTP client for the OSM API v0.6 JSON endpoints.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use subarea_core::EntityId;
use subarea_core::config::RemoteConfig;
use tracing::{debug, instrument};

use crate::error::RemoteError;
use crate::model::{Document, FullRelation, Relation};

/// Read access to the remote hierarchical dataset.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Fetch a relation with its member list.
    async fn fetch_relation(&self, id: EntityId) -> Result<Relation, RemoteError>;

    /// Fetch a relation with every node and way it references.
    async fn fetch_relation_full(&self, id: EntityId) -> Result<FullRelation, RemoteError>;
}

#[derive(Clone)]
pub struct OsmClient {
    http: reqwest::Client,
    base_url: Url,
}

impl OsmClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| RemoteError::Config(format!("invalid base URL: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()?;

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::Config(format!("failed to build API URL: {e}")))
    }

    async fn get_document(&self, id: EntityId, path: &str) -> Result<Document, RemoteError> {
        let url = self.url(path)?;
        debug!(%url, "requesting");

        let response = self.http.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(RemoteError::NotFound(id)),
            StatusCode::FORBIDDEN => return Err(RemoteError::Forbidden(id)),
            StatusCode::GONE => return Err(RemoteError::Gone(id)),
            status if !status.is_success() => {
                return Err(RemoteError::Status {
                    id,
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| RemoteError::Decode { id, source })
    }
}

#[async_trait]
impl EntitySource for OsmClient {
    #[instrument(skip(self), fields(id = %id))]
    async fn fetch_relation(&self, id: EntityId) -> Result<Relation, RemoteError> {
        self.get_document(id, &format!("api/0.6/relation/{id}.json"))
            .await?
            .into_relation(id)
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn fetch_relation_full(&self, id: EntityId) -> Result<FullRelation, RemoteError> {
        self.get_document(id, &format!("api/0.6/relation/{id}/full.json"))
            .await?
            .into_full(id)
    }
}
