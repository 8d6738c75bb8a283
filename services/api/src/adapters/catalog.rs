//! services/api/src/adapters/catalog.rs
//!
//! This module contains the adapter for the external ERP/MES catalog provider.
//! It implements the `CatalogService` port on top of a plain HTTP transport and
//! keeps read-through caches for the manifest and the per-stream listings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use proscientia_core::cache::{Clock, SystemClock, TtlCache};
use proscientia_core::domain::{CatalogStream, Listing, Manifest};
use proscientia_core::ports::{CatalogService, PortError, PortResult};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::config::CatalogConfig;

//=========================================================================================
// Transport
//=========================================================================================

/// One GET against the provider. Any non-2xx status or network failure is a
/// `CatalogUnavailable`; retries are left to the caller.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn get(&self, path: &str, query: &[(&'static str, String)]) -> PortResult<Bytes>;
}

/// `CatalogTransport` backed by `reqwest` with a fixed per-request timeout.
#[derive(Clone)]
pub struct HttpCatalogTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PortResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Unexpected(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CatalogTransport for HttpCatalogTransport {
    async fn get(&self, path: &str, query: &[(&'static str, String)]) -> PortResult<Bytes> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                error!("Catalog request to {} failed: {}", url, e);
                PortError::CatalogUnavailable(format!("GET {}: {}", path, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Catalog returned HTTP {} for {}: {}", status, url, body);
            return Err(PortError::CatalogUnavailable(format!(
                "GET {} returned HTTP {}",
                path, status
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| PortError::CatalogUnavailable(format!("GET {}: {}", path, e)))
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Caching client for the catalog provider.
///
/// The manifest and each `(stream, date)` listing are cached for their own TTL; file
/// bytes are always fetched fresh. A listing requested without a date is cached under
/// `latest`, independently of the same day requested explicitly.
pub struct CatalogClient {
    transport: Arc<dyn CatalogTransport>,
    manifest_cache: TtlCache<Manifest>,
    listing_cache: TtlCache<Listing>,
}

const MANIFEST_KEY: &str = "manifest";

fn listing_key(stream: CatalogStream, date: Option<NaiveDate>) -> String {
    match date {
        Some(date) => format!("{}:listing:{}", stream, date.format("%Y-%m-%d")),
        None => format!("{}:listing:latest", stream),
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> PortResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        PortError::CatalogUnavailable(format!("Malformed response from {}: {}", path, e))
    })
}

impl CatalogClient {
    /// Creates a new `CatalogClient` with explicit cache clock.
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        config: &CatalogConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            manifest_cache: TtlCache::new(config.manifest_ttl, clock.clone()),
            listing_cache: TtlCache::new(config.listing_ttl, clock),
        }
    }

    /// Creates a client talking HTTP to `config.base_url` on the wall clock.
    pub fn from_config(config: &CatalogConfig) -> PortResult<Self> {
        let transport = HttpCatalogTransport::new(config.base_url.clone(), config.request_timeout)?;
        Ok(Self::new(Arc::new(transport), config, Arc::new(SystemClock)))
    }
}

//=========================================================================================
// `CatalogService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CatalogService for CatalogClient {
    async fn get_manifest(&self) -> PortResult<Manifest> {
        if let Some(manifest) = self.manifest_cache.get(MANIFEST_KEY) {
            debug!("Manifest served from cache");
            return Ok(manifest);
        }
        let body = self.transport.get("/manifest", &[]).await?;
        let manifest: Manifest = decode("/manifest", &body)?;
        self.manifest_cache.insert(MANIFEST_KEY, manifest.clone());
        Ok(manifest)
    }

    async fn get_listing(
        &self,
        stream: CatalogStream,
        date: Option<NaiveDate>,
    ) -> PortResult<Listing> {
        if !stream.is_versioned() {
            return Err(PortError::InvalidInput(format!(
                "Stream '{}' has no versioned listing",
                stream
            )));
        }

        let key = listing_key(stream, date);
        if let Some(listing) = self.listing_cache.get(&key) {
            debug!("Listing {} served from cache", key);
            return Ok(listing);
        }

        let path = format!("/{}", stream);
        let query: Vec<(&'static str, String)> = date
            .map(|d| vec![("date", d.format("%Y-%m-%d").to_string())])
            .unwrap_or_default();
        let body = self.transport.get(&path, &query).await?;
        let listing: Listing = decode(&path, &body)?;
        self.listing_cache.insert(key, listing.clone());
        Ok(listing)
    }

    async fn get_file_bytes(
        &self,
        stream: CatalogStream,
        name: &str,
        date: Option<NaiveDate>,
    ) -> PortResult<Vec<u8>> {
        let mut query = vec![("stream", stream.to_string()), ("name", name.to_string())];
        if stream.is_versioned() {
            let date = date.ok_or_else(|| {
                PortError::InvalidInput(format!("A date is required for {} files", stream))
            })?;
            query.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        let body = self.transport.get("/files", &query).await?;
        Ok(body.to_vec())
    }
}
