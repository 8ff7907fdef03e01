//! HTTP transport backed by `reqwest`'s blocking client

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use tracing::debug;
use url::Url;

use super::{Request, Response, Transport};
use crate::config::ClientConfig;
use crate::error::Result;

/// Blocking HTTP client for a single catalog server
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    /// Connect to `base_url` with default settings
    pub fn new(base_url: &str) -> Result<Self> {
        Self::from_config(&ClientConfig::for_url(base_url))
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let base = Url::parse(config.base_url.trim_end_matches('/'))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        debug!(endpoint = %base, "HTTP transport ready");
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }
}

impl Transport for HttpTransport {
    fn endpoint(&self) -> &str {
        self.base.as_str()
    }

    fn get(&self, request: &Request) -> Result<Response> {
        let url = request.resolve(&self.base)?;
        debug!(url = %url, accept = request.accept_kind().mime(), "GET");

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, request.accept_kind().mime())
            .send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?;

        debug!(url = %url, status, bytes = body.len(), "response");
        Ok(Response::new(status, url.to_string(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use crate::transport::Route;

    #[test]
    fn test_from_config_normalises_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:8000/api/").unwrap();
        assert_eq!(transport.base_url().path(), "/api");

        let url = Request::new(Route::Metadata, &[])
            .resolve(transport.base_url())
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/metadata/");
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(matches!(
            HttpTransport::new("ftp://localhost"),
            Err(CatalogError::Config(_))
        ));
    }

    #[test]
    fn test_unreachable_server_is_transport_error() {
        let mut config = ClientConfig::for_url("http://127.0.0.1:9");
        config.timeout_secs = 1;
        let transport = HttpTransport::from_config(&config).unwrap();
        let result = transport.get(&Request::new(Route::Metadata, &[]));
        assert!(matches!(result, Err(CatalogError::Transport(_))));
    }
}
