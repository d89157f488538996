//! HTTP client wrapper for streaming SSE requests.

use crate::config::HttpConfig;
use crate::error::Error;
use crate::stream::StreamSource;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::pin::Pin;
use std::time::Duration;

/// Authentication configuration.
#[derive(Clone)]
pub enum AuthConfig {
    /// Bearer token authentication (Authorization: Bearer {token}).
    Bearer(String),
    /// Custom header authentication (e.g., x-api-key: {key}).
    ApiKey { header: String, key: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"[REDACTED]").finish(),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Response body as a chunk source.
pub type BodySource =
    StreamSource<Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>>;

/// HTTP client that opens event streams.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    auth: Option<AuthConfig>,
    headers: HeaderMap,
}

impl HttpClient {
    /// Create a client from HTTP settings.
    ///
    /// No overall timeout is set unless configured: event streams may stay
    /// open indefinitely.
    pub fn new(config: &HttpConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            headers.insert(parse_header_name(name)?, parse_header_value(name, value)?);
        }

        Ok(Self {
            client,
            auth: config.bearer_token.clone().map(AuthConfig::Bearer),
            headers,
        })
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Add one extra header to every request.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.headers
            .insert(parse_header_name(name)?, parse_header_value(name, value)?);
        Ok(())
    }

    /// Build headers including authentication.
    fn build_headers(&self, has_body: bool) -> Result<HeaderMap, Error> {
        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if has_body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        match &self.auth {
            Some(AuthConfig::Bearer(token)) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| Error::Config("Bearer token contains invalid header characters".into()))?;
                headers.insert(AUTHORIZATION, value);
            }
            Some(AuthConfig::ApiKey { header, key }) => {
                headers.insert(parse_header_name(header)?, parse_header_value(header, key)?);
            }
            None => {}
        }

        Ok(headers)
    }

    /// Send a request and return its body as a chunk source.
    ///
    /// Automatically sets `Accept: text/event-stream`. A non-2xx status is
    /// returned as [`Error::Api`] with the response body.
    pub async fn open_stream(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<BodySource, Error> {
        let headers = self.build_headers(body.is_some())?;

        tracing::debug!(%method, url, has_body = body.is_some(), "Opening event stream");

        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }

        Ok(StreamSource::new(Box::pin(response.bytes_stream())))
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    HeaderName::try_from(name).map_err(|_| Error::Config(format!("Invalid header name: {name}")))
}

fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Config(format!("Header {name} contains invalid characters")))
}

/// Parse a `Name: value` header argument.
pub fn split_header(raw: &str) -> Result<(&str, &str), Error> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| Error::Config(format!("Expected 'Name: value', got {raw:?}")))
}
