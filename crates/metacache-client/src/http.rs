//! Shared HTTP transport for the fetch strategies

use crate::error::{ClientError, Result};
use metacache_common::{FetchError, FetchResult, FetcherConfig};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

/// JSON-over-HTTP transport rooted at the configured endpoint
#[derive(Clone)]
pub(crate) struct HttpTransport {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub(crate) fn new(config: &FetcherConfig) -> Result<Self> {
        let base_url = Url::parse(config.base_url())
            .map_err(|e| ClientError::invalid_endpoint(&config.endpoint, e.to_string()))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::invalid_endpoint(
                &config.endpoint,
                "expected an http(s) URL",
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClientError::HttpClient(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Endpoint URL with `segments` appended as escaped path segments
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET a JSON document
    ///
    /// A 404 becomes the error built by `not_found`; other non-success
    /// statuses are `Unavailable`.
    pub(crate) async fn get_json<T, F>(&self, url: Url, not_found: F) -> FetchResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> FetchError,
    {
        debug!("GET {}", url);
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Unavailable(format!(
                "metadata service returned status {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::deserialization(e.to_string()))
    }
}

fn map_send_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_escapes_segments() {
        let transport = HttpTransport::new(&FetcherConfig::new("http://router:7777/api/")).unwrap();
        let url = transport.url(&["meta_store", "orders v2", "store_properties"]);
        assert_eq!(
            url.as_str(),
            "http://router:7777/api/meta_store/orders%20v2/store_properties"
        );
    }

    #[test]
    fn test_rejects_invalid_endpoints() {
        assert!(matches!(
            HttpTransport::new(&FetcherConfig::new("not a url")),
            Err(ClientError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            HttpTransport::new(&FetcherConfig::new("mailto:ops@example.com")),
            Err(ClientError::InvalidEndpoint { .. })
        ));
    }
}
