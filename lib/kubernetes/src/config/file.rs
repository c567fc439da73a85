use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_native_certs::CertificateResult;
use serde::Deserialize;
use tracing::{debug, warn};

use super::tls::client_auth;
use super::{Auth, Config, LoadDataError, RefreshableToken};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read kube config
    #[error("failed to read '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),
    /// Failed to parse kube config YAML
    #[error("failed to parse kube config YAML: {0}")]
    Parse(#[source] serde_yaml::Error),
    /// Failed to determine current context
    #[error("failed to determine current context")]
    CurrentContextNotSet,
    /// Failed to load current context
    #[error("failed to load current context: {0}")]
    LoadContext(String),
    /// Failed to load the cluster of context
    #[error("failed to load the cluster of context: {0}")]
    LoadClusterOfContext(String),
    /// Failed to find named user
    #[error("failed to find named user: {0}")]
    FindUser(String),
    /// Cluster url is missing on selected cluster
    #[error("cluster url is missing on selected cluster")]
    MissingClusterUrl,
    /// Failed to parse cluster uri
    #[error("failed to parse cluster url: {0}")]
    ParseClusterUri(#[source] http::uri::InvalidUri),
    #[error("build tls config failed, {0}")]
    Tls(#[from] super::tls::Error),
    /// Client certificate and key must be provided together
    #[error("client certificate and client key must both be set")]
    IncompleteClientAuth,
    /// Failed to load client certificate
    #[error("failed to load client certificate: {0}")]
    LoadClientCertificate(#[source] LoadDataError),
    /// Failed to load client key
    #[error("failed to load client key: {0}")]
    LoadClientKey(#[source] LoadDataError),
    /// Failed to load certificate authority
    #[error("failed to load certificate authority: {0}")]
    LoadCertificateAuthority(#[source] LoadDataError),
    /// Failed to parse PEM-encoded certificates
    #[error("failed to parse PEM-encoded certificates: {0}")]
    ParseCertificates(#[source] pem::PemError),
    /// Load native certificates failed
    #[error("load native certificates: {0:?}")]
    LoadNativeCertificates(Vec<rustls_native_certs::Error>),
    /// Invalid client certificate or key
    #[error("invalid client certificate or key: {0}")]
    InvalidClientAuth(#[source] rustls::Error),
    /// Failed to add a root certificate
    #[error("failed to add a root certificate: {0}")]
    AddRootCertificate(#[source] rustls::Error),
    /// Failed to read a bearer token file
    #[error("failed to read token file '{1:?}': {0}")]
    ReadTokenFile(#[source] std::io::Error, PathBuf),
}

/// User credentials, a subset of the `users[].user` section.
#[derive(Clone, Debug, Default, Deserialize)]
struct AuthInfo {
    /// The username for basic authentication to the kubernetes cluster.
    username: Option<String>,
    /// The password for basic authentication to the kubernetes cluster.
    password: Option<String>,

    /// The bearer token for authentication to the kubernetes cluster.
    token: Option<String>,
    /// Pointer to a file that contains a bearer token.
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,

    /// Path to a client cert file for TLS.
    #[serde(rename = "client-certificate")]
    client_certificate: Option<PathBuf>,
    /// PEM-encoded data from a client cert file for TLS. Overrides `client_certificate`
    #[serde(rename = "client-certificate-data")]
    client_certificate_data: Option<String>,

    /// Path to a client key file for TLS
    #[serde(rename = "client-key")]
    client_key: Option<PathBuf>,
    /// PEM-encoded data from a client key file for TLS. Overrides `client_key`
    #[serde(rename = "client-key-data")]
    client_key_data: Option<String>,
}

#[derive(Deserialize)]
struct NamedAuthInfo {
    name: String,

    #[serde(rename = "user")]
    auth_info: Option<AuthInfo>,
}

/// How to reach one cluster, a subset of the `clusters[].cluster` section.
#[derive(Clone, Debug, Deserialize)]
struct Cluster {
    /// The address of the kubernetes cluster (https://hostname:port)
    server: Option<String>,

    /// Skips the validity check for the server's certificate. This will make
    /// your HTTPS connections insecure.
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,

    /// The path to a cert file for the certificate authority.
    #[serde(rename = "certificate-authority")]
    certificate_authority: Option<PathBuf>,

    /// PEM-encoded certificate authority certificates. Overrides `certificate_authority`
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
}

#[derive(Deserialize)]
struct NamedCluster {
    name: String,

    cluster: Option<Cluster>,
}

/// Context stores tuple of cluster and user information.
#[derive(Clone, Debug, Deserialize)]
struct Context {
    /// Name of the cluster for this context.
    cluster: String,

    /// Name of the `AuthInfo` for this context.
    user: String,

    /// The default namespace to use on unspecified requests
    namespace: Option<String>,
}

#[derive(Deserialize)]
struct NamedContext {
    name: String,

    context: Option<Context>,
}

/// The parts of a kubeconfig file this crate cares about.
///
/// Stored in `~/.kube/config` by default. An analogue of the
/// [config type from client-go](https://github.com/kubernetes/client-go/blob/master/tools/clientcmd/api/types.go).
#[derive(Deserialize)]
struct KubeConfig {
    clusters: Vec<NamedCluster>,

    #[serde(rename = "users")]
    auth_infos: Vec<NamedAuthInfo>,

    contexts: Vec<NamedContext>,

    /// The name of the context that you would like to use by default
    #[serde(rename = "current-context")]
    current_context: Option<String>,
}

pub fn from_kubeconfig(path: impl AsRef<Path>) -> Result<Config, Error> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|err| Error::ReadFile(err, path.into()))?;
    let config = serde_yaml::from_slice::<KubeConfig>(&data).map_err(Error::Parse)?;

    let (cluster, context, auth_info) = resolve_current_context(config)?;

    let cluster_url = cluster
        .server
        .clone()
        .ok_or(Error::MissingClusterUrl)?
        .parse::<http::Uri>()
        .map_err(Error::ParseClusterUri)?;
    let default_namespace = context.namespace.unwrap_or_else(|| String::from("default"));

    let root_store = load_root_store(&cluster)?;
    let tls_builder = ClientConfig::builder().with_root_certificates(root_store);

    let mut tls = match load_identity_pem(&auth_info)? {
        Some(identity_pem) => {
            let (chain, pkey) = client_auth(&identity_pem)?;
            tls_builder
                .with_client_auth_cert(chain, pkey)
                .map_err(Error::InvalidClientAuth)?
        }
        None => tls_builder.with_no_client_auth(),
    };

    if cluster.insecure_skip_tls_verify {
        tls.dangerous()
            .set_certificate_verifier(Arc::new(NoCertificateVerification));
    }

    let auth = if let (Some(username), Some(password)) = (auth_info.username, auth_info.password) {
        Auth::Basic { username, password }
    } else if let Some(path) = auth_info.token_file {
        let refreshable =
            RefreshableToken::new(path.clone()).map_err(|err| Error::ReadTokenFile(err, path))?;

        Auth::RefreshableToken(refreshable)
    } else if let Some(token) = auth_info.token {
        Auth::Bearer { token }
    } else {
        Auth::None
    };

    Ok(Config {
        cluster_url,
        default_namespace,
        auth,
        tls,
    })
}

fn resolve_current_context(config: KubeConfig) -> Result<(Cluster, Context, AuthInfo), Error> {
    let context_name = config.current_context.ok_or(Error::CurrentContextNotSet)?;
    let context = config
        .contexts
        .iter()
        .find(|ctx| ctx.name == context_name)
        .and_then(|ctx| ctx.context.clone())
        .ok_or_else(|| Error::LoadContext(context_name))?;
    let cluster = config
        .clusters
        .iter()
        .find(|cluster| cluster.name == context.cluster)
        .and_then(|named| named.cluster.clone())
        .ok_or_else(|| Error::LoadClusterOfContext(context.cluster.clone()))?;
    let auth_info = config
        .auth_infos
        .iter()
        .find(|named| named.name == context.user)
        .and_then(|named| named.auth_info.clone())
        .ok_or_else(|| Error::FindUser(context.user.clone()))?;

    Ok((cluster, context, auth_info))
}

/// Client certificates are optional, a kubeconfig with only a token is fine.
/// Setting one half of the pair is not.
fn load_identity_pem(auth_info: &AuthInfo) -> Result<Option<Vec<u8>>, Error> {
    let has_cert =
        auth_info.client_certificate.is_some() || auth_info.client_certificate_data.is_some();
    let has_key = auth_info.client_key.is_some() || auth_info.client_key_data.is_some();

    match (has_cert, has_key) {
        (false, false) => Ok(None),
        (true, true) => {
            let cert = load_base64_or_file(
                auth_info.client_certificate_data.as_ref(),
                auth_info.client_certificate.as_ref(),
            )
            .map_err(Error::LoadClientCertificate)?;
            let key = load_base64_or_file(
                auth_info.client_key_data.as_ref(),
                auth_info.client_key.as_ref(),
            )
            .map_err(Error::LoadClientKey)?;

            let mut identity = key;
            identity.extend_from_slice(&cert);
            Ok(Some(identity))
        }
        _ => Err(Error::IncompleteClientAuth),
    }
}

fn load_root_store(cluster: &Cluster) -> Result<RootCertStore, Error> {
    if cluster.certificate_authority.is_none() && cluster.certificate_authority_data.is_none() {
        // No CA pinned in the kubeconfig, trust whatever the system trusts.
        let CertificateResult { certs, errors, .. } = rustls_native_certs::load_native_certs();
        if !errors.is_empty() {
            return Err(Error::LoadNativeCertificates(errors));
        }

        let mut root_store = RootCertStore::empty();
        for cert in certs {
            if let Err(err) = root_store.add(cert) {
                debug!(message = "certificate parse failed", %err);
            }
        }

        if root_store.is_empty() {
            debug!(message = "no valid native root CA certificates found");
        }

        return Ok(root_store);
    }

    let data = load_base64_or_file(
        cluster.certificate_authority_data.as_ref(),
        cluster.certificate_authority.as_ref(),
    )
    .map_err(Error::LoadCertificateAuthority)?;

    let mut root_store = RootCertStore::empty();
    let certs = pem::parse_many(data)
        .map_err(Error::ParseCertificates)?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE");
    for cert in certs {
        root_store
            .add(CertificateDer::from(cert.into_contents()))
            .map_err(Error::AddRootCertificate)?;
    }

    Ok(root_store)
}

/// Inline `*-data` fields hold base64-encoded PEM; referenced files hold
/// plain PEM.
fn load_base64_or_file(
    data: Option<&String>,
    file: Option<&PathBuf>,
) -> Result<Vec<u8>, LoadDataError> {
    use base64::Engine;

    if let Some(data) = data {
        return base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(LoadDataError::DecodeBase64);
    }

    match file {
        Some(path) => std::fs::read(path).map_err(|err| LoadDataError::ReadFile(err, path.clone())),
        None => Err(LoadDataError::MissingDataOrFile),
    }
}

#[derive(Debug)]
pub struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer,
        _intermediates: &[CertificateDer],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        warn!(message = "server certificate verification bypassed");
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJ
    server: https://127.0.0.1:34139
  name: kind-kind
contexts:
- context:
    cluster: kind-kind
    user: kind-kind
    namespace: testing
  name: kind-kind
current-context: kind-kind
kind: Config
preferences: {}
users:
- name: kind-kind
  user:
    client-certificate-data: LS0tLS1CRUdJTiBDRVJUSUZ
    client-key-data: LS0tLS1CRUdJTiBSU0EgUFJJVkFURSB
"#;

    #[test]
    fn deserialize() {
        let config = serde_yaml::from_str::<KubeConfig>(KUBECONFIG).unwrap();

        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.clusters[0].name, "kind-kind");
        let cluster = config.clusters.first().unwrap().cluster.as_ref().unwrap();
        assert_eq!(cluster.server.as_ref().unwrap(), "https://127.0.0.1:34139");
        assert_eq!(
            cluster.certificate_authority_data.as_ref().unwrap(),
            "LS0tLS1CRUdJTiBDRVJ"
        );

        assert_eq!(config.auth_infos.len(), 1);
        let auth_info = config.auth_infos.first().unwrap();
        assert_eq!(auth_info.name, "kind-kind");
        let user = auth_info.auth_info.as_ref().unwrap();
        assert_eq!(
            user.client_certificate_data.as_ref().unwrap(),
            "LS0tLS1CRUdJTiBDRVJUSUZ"
        );
        assert_eq!(
            user.client_key_data.as_ref().unwrap(),
            "LS0tLS1CRUdJTiBSU0EgUFJJVkFURSB"
        );
    }

    #[test]
    fn resolve_context() {
        let config = serde_yaml::from_str::<KubeConfig>(KUBECONFIG).unwrap();
        let (cluster, context, auth_info) = resolve_current_context(config).unwrap();

        assert_eq!(cluster.server.as_deref(), Some("https://127.0.0.1:34139"));
        assert_eq!(context.namespace.as_deref(), Some("testing"));
        assert!(auth_info.client_certificate_data.is_some());
    }

    #[test]
    fn missing_current_context() {
        let data = KUBECONFIG.replace("current-context: kind-kind\n", "");
        let config = serde_yaml::from_str::<KubeConfig>(&data).unwrap();

        let err = resolve_current_context(config).unwrap_err();
        assert!(matches!(err, Error::CurrentContextNotSet));
    }

    #[test]
    fn token_only_user_needs_no_client_certs() {
        let auth_info = AuthInfo {
            token: Some("abcdef".into()),
            ..Default::default()
        };

        assert!(load_identity_pem(&auth_info).unwrap().is_none());
    }

    #[test]
    fn half_configured_client_auth_is_rejected() {
        let auth_info = AuthInfo {
            client_certificate_data: Some("LS0tLS1CRUdJTiBDRVJ".into()),
            ..Default::default()
        };

        let err = load_identity_pem(&auth_info).unwrap_err();
        assert!(matches!(err, Error::IncompleteClientAuth));
    }
}
