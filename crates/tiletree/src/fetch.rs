//! Fetch abstractions for retrieving external buffer bytes.
//!
//! Subtree decoding never talks to the network directly; it goes through
//! a [`Fetcher`] chosen by the caller. This keeps the loader
//! runtime-agnostic and makes failure injection in tests trivial.
//!
//! # Implementations
//!
//! - [`HttpFetcher`]: HTTP range requests via reqwest
//! - [`MemoryFetcher`]: in-memory byte map for tests and local datasets

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

use crate::error::{Error, Result};

/// Future type for fetch operations.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// A source of external buffer bytes.
///
/// `fetch` retrieves `byte_length` bytes starting at `byte_offset` of
/// the resource named by `uri`. Implementations may be backed by HTTP,
/// the filesystem, or anything else; the loader only ever awaits the
/// returned future.
pub trait Fetcher: Send + Sync {
    /// Fetch a byte range of a resource.
    fn fetch(&self, uri: &str, byte_offset: u64, byte_length: u64) -> FetchFuture<'_>;
}

/// An HTTP fetcher issuing range requests.
///
/// Relative URIs are joined onto the configured base URL. The fetcher is
/// runtime-agnostic and works with any async executor.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// Create a fetcher resolving relative URIs against `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Create a fetcher with a custom HTTP client.
    #[must_use]
    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, uri: &str) -> String {
        if uri.contains("://") {
            uri.to_string()
        } else {
            format!("{}{}", self.base_url, uri)
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, uri: &str, byte_offset: u64, byte_length: u64) -> FetchFuture<'_> {
        let url = self.url_for(uri);
        let uri = uri.to_string();
        Box::pin(async move {
            if byte_length == 0 {
                return Ok(Vec::new());
            }

            tracing::debug!(url, byte_offset, byte_length, "fetching");

            let end = byte_offset + byte_length - 1;
            let response = self
                .http
                .get(&url)
                .header(reqwest::header::RANGE, format!("bytes={byte_offset}-{end}"))
                .send()
                .await
                .map_err(|e| Error::Fetch {
                    uri: uri.clone(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    uri,
                    status: status.as_u16(),
                });
            }

            let data = response.bytes().await.map_err(|e| Error::Fetch {
                uri: uri.clone(),
                message: e.to_string(),
            })?;

            // A server that ignores the range header returns the whole
            // resource; trim it down to the requested window.
            let data = if status == reqwest::StatusCode::OK && data.len() as u64 > byte_length {
                let start = usize::try_from(byte_offset).map_err(|_| Error::Fetch {
                    uri: uri.clone(),
                    message: "byte offset exceeds addressable memory".to_owned(),
                })?;
                let len = usize::try_from(byte_length).map_err(|_| Error::Fetch {
                    uri: uri.clone(),
                    message: "byte length exceeds addressable memory".to_owned(),
                })?;
                if start + len > data.len() {
                    return Err(Error::Fetch {
                        uri,
                        message: format!(
                            "resource holds {} bytes, range ends at {}",
                            data.len(),
                            start + len
                        ),
                    });
                }
                data[start..start + len].to_vec()
            } else {
                data.to_vec()
            };

            Ok(data)
        })
    }
}

/// An in-memory fetcher backed by a byte map.
///
/// Resources are registered up front with [`insert`](Self::insert).
/// Every fetch is counted per URI so tests can assert deduplication and
/// that unreferenced resources are never touched.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    data: Arc<RwLock<MemoryFetcherInner>>,
}

#[derive(Debug, Default)]
struct MemoryFetcherInner {
    resources: HashMap<String, Arc<[u8]>>,
    fetch_counts: HashMap<String, usize>,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bytes of a resource.
    pub fn insert(&self, uri: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        let mut inner = self.data.write().unwrap();
        inner.resources.insert(uri.into(), bytes.into());
    }

    /// Number of times `uri` has been fetched.
    #[must_use]
    pub fn fetch_count(&self, uri: &str) -> usize {
        self.data
            .read()
            .unwrap()
            .fetch_counts
            .get(uri)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of fetches across all resources.
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.data.read().unwrap().fetch_counts.values().sum()
    }
}

impl Clone for MemoryFetcher {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, uri: &str, byte_offset: u64, byte_length: u64) -> FetchFuture<'_> {
        let result = {
            let mut inner = self.data.write().unwrap();
            *inner.fetch_counts.entry(uri.to_string()).or_insert(0) += 1;
            match inner.resources.get(uri) {
                None => Err(Error::Fetch {
                    uri: uri.to_string(),
                    message: "resource not registered".to_owned(),
                }),
                Some(bytes) => {
                    let available = bytes.len() as u64;
                    if byte_offset + byte_length > available {
                        Err(Error::Fetch {
                            uri: uri.to_string(),
                            message: format!(
                                "resource holds {available} bytes, range ends at {}",
                                byte_offset + byte_length
                            ),
                        })
                    } else {
                        #[allow(clippy::cast_possible_truncation)]
                        let start = byte_offset as usize;
                        #[allow(clippy::cast_possible_truncation)]
                        let len = byte_length as usize;
                        Ok(bytes[start..start + len].to_vec())
                    }
                }
            }
        };
        Box::pin(async move { result })
    }
}
