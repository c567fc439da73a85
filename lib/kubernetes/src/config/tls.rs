use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Identity PEM is invalid
    #[error("identity PEM is invalid: {0}")]
    InvalidIdentityPem(#[source] rustls::pki_types::pem::Error),

    /// Identity PEM is missing a private key: the key must be PKCS8, RSA/PKCS1 or SEC1
    #[error("identity PEM is missing a private key: the key must be PKCS8, RSA/PKCS1 or SEC1")]
    MissingPrivateKey,

    /// Identity PEM is missing a certificate
    #[error("identity PEM is missing a certificate")]
    MissingCertificate,

    /// Unknown private key format
    #[error("unknown private key format")]
    UnknownPrivateKeyFormat,
}

/// Split a combined identity PEM into the certificate chain and the
/// private key rustls wants.
pub fn client_auth(
    data: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    use rustls::pki_types::pem::{self, SectionKind};

    let mut cert_chain = Vec::new();
    let mut pkcs8_key = None;
    let mut pkcs1_key = None;
    let mut sec1_key = None;
    let mut reader = std::io::Cursor::new(data);
    while let Some((kind, der)) = pem::from_buf(&mut reader).map_err(Error::InvalidIdentityPem)? {
        match kind {
            SectionKind::Certificate => cert_chain.push(der.into()),
            SectionKind::PrivateKey => pkcs8_key = Some(PrivateKeyDer::Pkcs8(der.into())),
            SectionKind::RsaPrivateKey => pkcs1_key = Some(PrivateKeyDer::Pkcs1(der.into())),
            SectionKind::EcPrivateKey => sec1_key = Some(PrivateKeyDer::Sec1(der.into())),
            _ => return Err(Error::UnknownPrivateKeyFormat),
        }
    }

    let private_key = pkcs8_key
        .or(pkcs1_key)
        .or(sec1_key)
        .ok_or(Error::MissingPrivateKey)?;

    if cert_chain.is_empty() {
        return Err(Error::MissingCertificate);
    }

    Ok((cert_chain, private_key))
}
