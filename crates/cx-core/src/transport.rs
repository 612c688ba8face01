//! Fetching index documents over HTTP(S) or from `file:` URLs.

use std::{
    collections::BTreeMap,
    fmt, fs,
    io::{self, Cursor, Read},
    path::PathBuf,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use reqwest::{
    blocking::{Client, Response},
    header::{IF_MODIFIED_SINCE, IF_NONE_MATCH},
    Certificate, Proxy,
};
use serde_json::json;
use time::{macros::format_description, OffsetDateTime};
use tracing::debug;
use url::Url;

use crate::config::{Config, SslVerify};

pub(crate) const USER_AGENT: &str = concat!("cx/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_ATTEMPTS: usize = 3;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid URL `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("`{url}` does not name a local path")]
    NotALocalPath { url: String },
    #[error("invalid proxy `{proxy}` for `{scheme}`")]
    InvalidProxy {
        scheme: String,
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to load CA bundle {}", path.display())]
    CaBundle {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// A GET request, optionally conditional on cached validators.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportRequest<'a> {
    pub url: &'a str,
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
}

impl<'a> TransportRequest<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            url,
            ..Self::default()
        }
    }
}

pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body: Box::new(Cursor::new(body)),
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn from_http(response: Response) -> Self {
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        Self {
            status: response.status().as_u16(),
            headers,
            body: Box::new(response),
        }
    }
}

/// Anything that can answer a GET for an index document.
///
/// Non-success statuses are returned as responses, not errors; callers decide
/// which statuses they tolerate.
pub trait Transport {
    fn fetch(&self, request: &TransportRequest<'_>) -> Result<TransportResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn fetch(&self, request: &TransportRequest<'_>) -> Result<TransportResponse> {
        (**self).fetch(request)
    }
}

/// HTTP(S) client honouring the configured proxies and SSL settings, with a
/// `file:` adapter for local channels.
#[derive(Debug, Clone)]
pub struct SessionTransport {
    client: Client,
    attempts: usize,
}

impl SessionTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT);
        for (scheme, proxy) in &config.proxy_servers {
            let built = match scheme.as_str() {
                "http" => Proxy::http(proxy.as_str()),
                "https" => Proxy::https(proxy.as_str()),
                _ => Proxy::all(proxy.as_str()),
            }
            .map_err(|source| TransportError::InvalidProxy {
                scheme: scheme.clone(),
                proxy: proxy.clone(),
                source,
            })?;
            builder = builder.proxy(built);
        }
        match &config.ssl_verify {
            SslVerify::Enabled(true) => {}
            SslVerify::Enabled(false) => {
                debug!("SSL verification disabled");
                builder = builder.danger_accept_invalid_certs(true);
            }
            SslVerify::Bundle(path) => {
                let cert = load_certificate(path).map_err(|source| TransportError::CaBundle {
                    path: path.clone(),
                    source,
                })?;
                builder = builder
                    .add_root_certificate(cert)
                    .tls_built_in_root_certs(false);
            }
        }
        let client = builder.build().context("failed to build http client")?;
        Ok(Self {
            client,
            attempts: DEFAULT_ATTEMPTS,
        })
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    fn fetch_http(&self, request: &TransportRequest<'_>) -> Result<TransportResponse> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            let mut builder = self.client.get(request.url);
            if let Some(etag) = request.etag {
                builder = builder.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = request.last_modified {
                builder = builder.header(IF_MODIFIED_SINCE, modified);
            }
            match builder.send() {
                Ok(response) => return Ok(TransportResponse::from_http(response)),
                Err(err) if err.is_connect() || err.is_timeout() => {
                    debug!(url = request.url, attempt, error = %err, "request failed; retrying");
                    last_err = Some(err);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to fetch {}", request.url))
                }
            }
        }
        match last_err {
            Some(err) => Err(err).with_context(|| {
                format!("failed to fetch {} after {} attempts", request.url, self.attempts)
            }),
            None => Err(anyhow!("failed to fetch {}; no attempts made", request.url)),
        }
    }
}

impl Transport for SessionTransport {
    fn fetch(&self, request: &TransportRequest<'_>) -> Result<TransportResponse> {
        if request.url.starts_with("file:") {
            fetch_file(request.url)
        } else {
            self.fetch_http(request)
        }
    }
}

fn load_certificate(path: &std::path::Path) -> Result<Certificate> {
    let pem = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Certificate::from_pem(&pem).context("invalid PEM certificate")
}

pub fn url_to_path(url: &str) -> Result<PathBuf, TransportError> {
    let parsed = Url::parse(url).map_err(|source| TransportError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    parsed
        .to_file_path()
        .map_err(|()| TransportError::NotALocalPath {
            url: url.to_string(),
        })
}

/// Serve a `file:` URL from the local filesystem.
///
/// A missing path is a 404 whose JSON body describes the failure; anything
/// else answers 200 with `content-type`, `content-length` and
/// `last-modified` headers.
pub fn fetch_file(url: &str) -> Result<TransportResponse> {
    let path = url_to_path(url)?;
    let metadata = match fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "local channel file missing");
            let body = json!({
                "error": "file does not exist",
                "path": path.display().to_string(),
                "exception": err.to_string(),
            });
            let headers = BTreeMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]);
            return Ok(TransportResponse::new(404, headers, serde_json::to_vec(&body)?));
        }
    };

    let content_type = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or("text/plain");
    let modified = metadata
        .modified()
        .with_context(|| format!("failed to read mtime of {}", path.display()))?;
    let http_date = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    let last_modified = OffsetDateTime::from(modified)
        .format(http_date)
        .context("failed to format last-modified date")?;
    let file = fs::File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;

    let headers = BTreeMap::from([
        ("content-type".to_string(), content_type.to_string()),
        ("content-length".to_string(), metadata.len().to_string()),
        ("last-modified".to_string(), last_modified),
    ]);
    Ok(TransportResponse {
        status: 200,
        headers,
        body: Box::new(file),
    })
}
