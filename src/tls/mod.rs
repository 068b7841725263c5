//! TLS handling module
//!
//! Identity loading, the client-facing acceptor and the target-facing connector.

mod acceptor;
mod cert;
mod connector;

use openssl::ssl::{SslContextBuilder, SslVersion};

use crate::common::Result;
use crate::config::TlsAlgorithm;

pub use acceptor::{accept, create_tls_acceptor};
pub use cert::{get_cert_fingerprint, get_cert_subject, load_cert, load_identity, Identity};
pub use connector::{connect, create_trusting_connector};

#[cfg(test)]
pub(crate) use cert::test_support;

/// Restrict a context to the protocol versions selected by `algorithm`
pub(crate) fn apply_algorithm(builder: &mut SslContextBuilder, algorithm: TlsAlgorithm) -> Result<()> {
    let version = match algorithm {
        TlsAlgorithm::Tls => return Ok(()),
        TlsAlgorithm::TlsV12 => SslVersion::TLS1_2,
        TlsAlgorithm::TlsV13 => SslVersion::TLS1_3,
    };
    builder.set_min_proto_version(Some(version))?;
    builder.set_max_proto_version(Some(version))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsSettings;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_handshake_with_self_signed_target() {
        let (cert, key) = test_support::self_signed("localhost");
        let mut cert_file = tempfile::NamedTempFile::new().unwrap();
        cert_file.write_all(&cert.to_pem().unwrap()).unwrap();
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        key_file.write_all(&key.private_key_to_pem_pkcs8().unwrap()).unwrap();

        let settings = TlsSettings {
            cert: Some(cert_file.path().to_path_buf()),
            key: Some(key_file.path().to_path_buf()),
            algorithm: TlsAlgorithm::TlsV12,
            ..TlsSettings::default()
        };
        let acceptor = create_tls_acceptor(&settings).unwrap();
        let connector = create_trusting_connector(Some(&TlsSettings::default())).unwrap();

        let (client, server) = tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(async move {
            let mut stream = accept(&acceptor, server).await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
            stream.flush().await.unwrap();
            stream.ssl().version_str().to_string()
        });

        let mut stream = connect(&connector, "localhost", client).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();
        let mut echoed = [0u8; 4];
        stream.read_exact(&mut echoed).await.unwrap();

        assert_eq!(&echoed, b"ping");
        assert_eq!(server.await.unwrap(), "TLSv1.2");
    }
}
