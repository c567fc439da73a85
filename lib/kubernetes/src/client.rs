use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;

use super::config::{self, Auth, Config};
use super::resource::Resource;
use super::version::Version;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("build http request failed, {0}")]
    BuildRequest(http::Error),
    #[error("read http response failed, {0}")]
    ReadResponse(hyper::Error),
    #[error(transparent)]
    Http(hyper_util::client::legacy::Error),
    #[error("api server error, status: {}, reason: {}, message: {}", .0.status, .0.reason, .0.message)]
    Api(ErrorResponse),
    #[error("deserialize response failed, {0}")]
    Deserialize(serde_json::Error),
    #[error("refresh token failed, {0}")]
    RefreshToken(std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialize(err)
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::ReadResponse(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::BuildRequest(err)
    }
}

/// An error response from the API.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// The status
    #[serde(default)]
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    pub code: u16,
}

#[derive(Clone)]
pub struct Client {
    http_client: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    auth: Auth,
    endpoint: String,
}

impl Client {
    pub fn new(config: Config) -> Self {
        let builder = HttpsConnectorBuilder::new()
            .with_tls_config(config.tls)
            .https_or_http();
        let mut inner = HttpConnector::new();
        inner.enforce_http(false);
        let connector = builder.enable_http1().wrap_connector(inner);

        let http_client =
            hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(connector);

        let endpoint = config
            .cluster_url
            .to_string()
            .trim_end_matches('/')
            .to_string();

        Client {
            http_client,
            endpoint,
            auth: config.auth,
        }
    }

    /// Retrieve version info of the API server, so we can check the compatibility
    pub async fn version(&self) -> Result<Version, Error> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("{}/version", self.endpoint))
            .body(Full::<Bytes>::default())?;

        self.send(req).await
    }

    /// Fetch a single namespaced object by name.
    pub async fn get<R: Resource>(&self, namespace: &str, name: &str) -> Result<R, Error> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(format!(
                "{}{}/{}",
                self.endpoint,
                R::url_path(Some(namespace)),
                name
            ))
            .body(Full::<Bytes>::default())?;

        self.send(req).await
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        mut req: Request<Full<Bytes>>,
    ) -> Result<T, Error> {
        self.auth.apply(&mut req).map_err(Error::RefreshToken)?;

        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        let (parts, incoming) = resp.into_parts();
        let body = incoming.collect().await?.to_bytes();

        if parts.status.is_success() {
            serde_json::from_slice(&body).map_err(Error::Deserialize)
        } else {
            // The API server answers errors with a JSON Status object, but
            // proxies in front of it might not.
            match serde_json::from_slice::<ErrorResponse>(&body) {
                Ok(err) => Err(Error::Api(err)),
                Err(_) => Err(Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: String::from_utf8_lossy(&body).into_owned(),
                    reason: parts
                        .status
                        .canonical_reason()
                        .unwrap_or_default()
                        .to_string(),
                    code: parts.status.as_u16(),
                })),
            }
        }
    }
}

impl Error {
    /// The HTTP status code of an API error, if this is one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api(resp) => StatusCode::from_u16(resp.code).ok(),
            _ => None,
        }
    }
}
