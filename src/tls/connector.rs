//! Target-facing TLS
//!
//! The proxy accepts any certificate the target presents: intercepting traffic to
//! servers with self-signed or otherwise untrusted certificates is the point.

use std::net::IpAddr;
use std::pin::Pin;

use log::{debug, info};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_openssl::SslStream;

use crate::common::{ProxyError, Result};
use crate::config::TlsSettings;

use super::cert::{get_cert_subject, load_identity};
use super::apply_algorithm;

/// Create a connector that trusts every server certificate
///
/// When `settings` carry an identity it is presented as client certificate.
pub fn create_trusting_connector(settings: Option<&TlsSettings>) -> Result<SslConnector> {
    let mut connector = SslConnector::builder(SslMethod::tls_client())?;
    connector.set_verify(SslVerifyMode::NONE);

    if let Some(settings) = settings {
        apply_algorithm(&mut connector, settings.algorithm)?;

        if settings.has_identity() {
            let identity = load_identity(settings)?;
            connector.set_certificate(&identity.cert)?;
            connector.set_private_key(&identity.key)?;
            for cert in identity.chain {
                connector.add_extra_chain_cert(cert)?;
            }
            connector.check_private_key()?;
            info!("TLS client identity: {}", get_cert_subject(&identity.cert));
        }
    }

    Ok(connector.build())
}

/// Run the client side of a TLS handshake over `stream`
///
/// `host` is sent as SNI unless it is an IP address; it is never verified.
///
/// # Errors
///
/// Returns `ProxyError::TlsHandshake` when the handshake fails.
pub async fn connect<S>(connector: &SslConnector, host: &str, stream: S) -> Result<SslStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut config = connector.configure()?;
    config.set_verify_hostname(false);
    config.set_use_server_name_indication(host.parse::<IpAddr>().is_err());
    let ssl = config.into_ssl(host)?;
    let mut stream = SslStream::new(ssl, stream)?;

    Pin::new(&mut stream)
        .connect()
        .await
        .map_err(|e| ProxyError::TlsHandshake(e.to_string()))?;

    debug!("TLS handshake with target {} successful ({})", host, stream.ssl().version_str());
    Ok(stream)
}
