//! Client handle abstraction
//!
//! Every remote call made by catalogs and array sources goes through the
//! [`Transport`] trait. The trait is deliberately narrow: one blocking GET that
//! returns a status and a body. Connection pooling, TLS and retries belong to
//! the implementation behind it.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpTransport`]: a `reqwest` blocking client pointed at a server
//! - [`MockServer`]: an in-memory server used by tests and demos

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::{MockServer, RecordedRequest};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::{CatalogError, Result};

/// Shared, immutable client handle
pub type SharedTransport = Arc<dyn Transport>;

/// Blocking request/response transport to a catalog server
///
/// Implementations must be safe to call from several threads at once: lazy
/// arrays may fetch blocks in parallel through the same handle.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Stable identifier of the server this transport talks to
    fn endpoint(&self) -> &str;

    /// Issue a GET request. Non-success statuses are returned, not raised;
    /// callers decide via [`Response::error_for_status`].
    fn get(&self, request: &Request) -> Result<Response>;
}

/// Server route families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// `GET /metadata/{path}`
    Metadata,
    /// `GET /search/{path}`
    Search,
    /// `GET /blob/array/{path}`
    ArrayBlob,
}

impl Route {
    fn segments(&self) -> &'static [&'static str] {
        match self {
            Route::Metadata => &["metadata"],
            Route::Search => &["search"],
            Route::ArrayBlob => &["blob", "array"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Metadata => "metadata",
            Route::Search => "search",
            Route::ArrayBlob => "blob/array",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response representation requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accept {
    #[default]
    Json,
    OctetStream,
}

impl Accept {
    pub fn mime(&self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::OctetStream => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Route { route: Route, path: Vec<String> },
    /// Opaque pagination link handed out by the server
    Link(String),
}

/// A GET request against the catalog server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    target: Target,
    params: Vec<(String, String)>,
    accept: Accept,
}

impl Request {
    /// Request for `route` scoped to `path`
    pub fn new(route: Route, path: &[String]) -> Self {
        Self {
            target: Target::Route {
                route,
                path: path.to_vec(),
            },
            params: Vec::new(),
            accept: Accept::Json,
        }
    }

    /// Request that follows a server-issued link (e.g. `links.next`)
    pub fn follow(link: impl Into<String>) -> Self {
        Self {
            target: Target::Link(link.into()),
            params: Vec::new(),
            accept: Accept::Json,
        }
    }

    /// Append a query parameter. Repeating a key sends it several times.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn accept(mut self, accept: Accept) -> Self {
        self.accept = accept;
        self
    }

    pub fn accept_kind(&self) -> Accept {
        self.accept
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Build the absolute URL for this request.
    ///
    /// Route requests are appended to `base`'s path. Links are used as given
    /// when absolute; relative links are placed under `base`'s path, so
    /// `/search/a` against `http://host/api` becomes
    /// `http://host/api/search/a`. Parameters set on the
    /// request replace any parameter of the same name already present in a
    /// link's query string; other link parameters (page cursors) are kept.
    pub fn resolve(&self, base: &Url) -> Result<Url> {
        let mut url = match &self.target {
            Target::Route { route, path } => {
                let mut url = base.clone();
                url.set_query(None);
                url.set_fragment(None);
                {
                    let mut segments = url.path_segments_mut().map_err(|_| {
                        CatalogError::Config(format!("base URL '{}' cannot carry a path", base))
                    })?;
                    segments.pop_if_empty();
                    segments.extend(route.segments());
                    if path.is_empty() {
                        segments.push("");
                    } else {
                        segments.extend(path);
                    }
                }
                url
            }
            Target::Link(link) => match Url::parse(link) {
                Ok(url) => url,
                Err(url::ParseError::RelativeUrlWithoutBase) => {
                    let prefix = base.path().trim_end_matches('/');
                    base.join(&format!("{}/{}", prefix, link.trim_start_matches('/')))?
                }
                Err(e) => return Err(e.into()),
            },
        };

        let overridden: HashSet<&str> = self.params.iter().map(|(k, _)| k.as_str()).collect();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !overridden.contains(k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() && self.params.is_empty() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            pairs.extend_pairs(kept.iter());
            pairs.extend_pairs(self.params.iter());
        }

        Ok(url)
    }
}

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    url: String,
    body: Bytes,
}

impl Response {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into [`CatalogError::Http`]
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            tracing::warn!(status = self.status, url = %self.url, "request failed");
            Err(CatalogError::Http {
                status: self.status,
                url: self.url,
            })
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
