//! Client-facing TLS: the proxy presents its own identity to clients

use std::pin::Pin;

use log::{debug, info};
use openssl::ssl::{Ssl, SslAcceptor, SslMethod, SslVerifyMode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_openssl::SslStream;

use crate::common::{ProxyError, Result};
use crate::config::TlsSettings;

use super::cert::{get_cert_fingerprint, get_cert_subject, load_identity};
use super::apply_algorithm;

/// Create the TLS acceptor presented to clients
///
/// Client certificates are not requested.
///
/// # Parameters
///
/// * `settings` - Identity and protocol settings
///
/// # Errors
///
/// Returns an error if the identity cannot be loaded or does not match its key.
pub fn create_tls_acceptor(settings: &TlsSettings) -> Result<SslAcceptor> {
    let identity = load_identity(settings)?;

    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
    acceptor.set_certificate(&identity.cert)?;
    acceptor.set_private_key(&identity.key)?;
    for cert in identity.chain {
        acceptor.add_extra_chain_cert(cert)?;
    }
    acceptor.check_private_key()?;
    apply_algorithm(&mut acceptor, settings.algorithm)?;
    acceptor.set_verify(SslVerifyMode::NONE);

    info!(
        "TLS identity: {} (SHA-256 {}), protocol {}",
        get_cert_subject(&identity.cert),
        get_cert_fingerprint(&identity.cert)?,
        settings.algorithm
    );

    Ok(acceptor.build())
}

/// Run the server side of a TLS handshake over `stream`
///
/// # Errors
///
/// Returns `ProxyError::TlsHandshake` when the handshake fails.
pub async fn accept<S>(acceptor: &SslAcceptor, stream: S) -> Result<SslStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ssl = Ssl::new(acceptor.context())?;
    let mut stream = SslStream::new(ssl, stream)?;

    Pin::new(&mut stream)
        .accept()
        .await
        .map_err(|e| ProxyError::TlsHandshake(e.to_string()))?;

    debug!("TLS handshake with client successful ({})", stream.ssl().version_str());
    Ok(stream)
}
