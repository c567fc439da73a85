mod file;
mod incluster;
mod tls;

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use headers::{Authorization, HeaderMapExt};
use http::Request;

/// Errors from loading data from a base64 string or a file
#[derive(Debug, thiserror::Error)]
pub enum LoadDataError {
    /// Failed to decode base64 data
    #[error("failed to decode base64 data: {0}")]
    DecodeBase64(#[source] base64::DecodeError),

    /// Failed to read file
    #[error("failed to read file '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),

    /// No base64 data or file path was provided
    #[error("missing base64 data or file")]
    MissingDataOrFile,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InCluster(#[from] incluster::Error),

    #[error(transparent)]
    File(#[from] file::Error),
}

struct Inner {
    token: String,
    expire_at: Instant,
}

/// A bearer token re-read from its mounted file periodically, since the
/// kubelet rotates service account tokens.
#[derive(Clone)]
pub struct RefreshableToken {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl Debug for RefreshableToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableToken")
            .field("path", &self.path)
            .finish()
    }
}

impl RefreshableToken {
    pub(crate) fn new(path: PathBuf) -> std::io::Result<Self> {
        let token = std::fs::read_to_string(&path)?;

        Ok(RefreshableToken {
            path,
            inner: Arc::new(Mutex::new(Inner {
                token,
                expire_at: Instant::now() + Duration::from_secs(60),
            })),
        })
    }

    pub fn token(&self) -> std::io::Result<String> {
        let now = Instant::now();

        let mut inner = self.inner.lock().unwrap();

        if now > inner.expire_at {
            inner.token = std::fs::read_to_string(&self.path)?;
            inner.expire_at = now + Duration::from_secs(60);
        }

        Ok(inner.token.clone())
    }
}

#[derive(Clone, Debug)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    RefreshableToken(RefreshableToken),
}

impl Auth {
    pub fn apply<T>(&self, req: &mut Request<T>) -> std::io::Result<()> {
        match self {
            Auth::None => {}
            Auth::Basic { username, password } => {
                req.headers_mut()
                    .typed_insert(Authorization::basic(username, password));
            }
            Auth::Bearer { token } => {
                if let Ok(auth) = Authorization::bearer(token) {
                    req.headers_mut().typed_insert(auth);
                }
            }
            Auth::RefreshableToken(refreshable) => {
                let token = refreshable.token()?;
                if let Ok(auth) = Authorization::bearer(&token) {
                    req.headers_mut().typed_insert(auth);
                }
            }
        }

        Ok(())
    }
}

/// Everything a [`Client`](crate::Client) needs to reach one cluster: the
/// apiserver url, credentials and the TLS setup.
#[derive(Debug)]
pub struct Config {
    /// The configured cluster url.
    pub cluster_url: http::Uri,

    /// The configured default namespace.
    pub default_namespace: String,

    /// Stores information to tell the cluster who you are.
    pub auth: Auth,

    pub tls: rustls::ClientConfig,
}

impl Config {
    /// Load a config the way kubectl does: an explicit `KUBECONFIG` path,
    /// then `$HOME/.kube/config`, then the in-cluster service account
    /// environment.
    pub fn load() -> Result<Config, Error> {
        if let Ok(path) = std::env::var("KUBECONFIG") {
            return file::from_kubeconfig(path).map_err(Into::into);
        }

        if let Ok(home) = std::env::var("HOME") {
            let path = format!("{home}/.kube/config");
            if Path::new(&path).exists() {
                return file::from_kubeconfig(path).map_err(Into::into);
            }
        }

        incluster::incluster_env().map_err(Into::into)
    }

    /// Load a config from an explicit kubeconfig file.
    pub fn from_kubeconfig(path: impl AsRef<Path>) -> Result<Config, Error> {
        file::from_kubeconfig(path).map_err(Into::into)
    }
}
