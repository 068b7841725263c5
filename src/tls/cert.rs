//! Certificate handling module
//!
//! Loads TLS identities from PKCS#12 keystores or PEM files and describes certificates
//! for logging.

use std::fs;
use std::path::Path;

use log::debug;
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509Ref};

use crate::common::{ProxyError, Result};
use crate::config::TlsSettings;

/// Certificate, private key and intermediate chain of one TLS endpoint
pub struct Identity {
    pub cert: X509,
    pub key: PKey<Private>,
    pub chain: Vec<X509>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &get_cert_subject(&self.cert))
            .field("chain", &self.chain.len())
            .finish()
    }
}

/// Load the identity configured in `settings`
///
/// A keystore takes precedence over PEM files.
///
/// # Errors
///
/// Returns an error if no identity is configured, or if the files cannot be read or parsed.
pub fn load_identity(settings: &TlsSettings) -> Result<Identity> {
    if let Some(keystore) = &settings.keystore {
        return load_keystore(keystore, settings.keystore_password.as_deref().unwrap_or(""));
    }

    match (&settings.cert, &settings.key) {
        (Some(cert), Some(key)) => load_pem(cert, key),
        _ => Err(ProxyError::Config(
            "TLS identity requires a keystore or a certificate and key".to_string(),
        )),
    }
}

/// Load an identity from a PKCS#12 keystore
pub fn load_keystore(path: &Path, password: &str) -> Result<Identity> {
    debug!("Loading PKCS#12 keystore {}", path.display());
    let der = fs::read(path)?;
    let parsed = Pkcs12::from_der(&der)?.parse2(password)?;

    let cert = parsed
        .cert
        .ok_or_else(|| ProxyError::Config(format!("Keystore {} has no certificate", path.display())))?;
    let key = parsed
        .pkey
        .ok_or_else(|| ProxyError::Config(format!("Keystore {} has no private key", path.display())))?;
    let chain = parsed.ca.map(|ca| ca.into_iter().collect()).unwrap_or_default();

    Ok(Identity { cert, key, chain })
}

/// Load an identity from a PEM certificate chain and a PEM private key
pub fn load_pem(cert_path: &Path, key_path: &Path) -> Result<Identity> {
    debug!("Loading PEM identity {} / {}", cert_path.display(), key_path.display());
    let mut certs = X509::stack_from_pem(&fs::read(cert_path)?)?;
    if certs.is_empty() {
        return Err(ProxyError::Config(format!("No certificate in {}", cert_path.display())));
    }
    let cert = certs.remove(0);
    let key = PKey::private_key_from_pem(&fs::read(key_path)?)?;

    Ok(Identity { cert, key, chain: certs })
}

/// Load a single PEM certificate
pub fn load_cert(cert_path: &Path) -> Result<X509> {
    Ok(X509::from_pem(&fs::read(cert_path)?)?)
}

/// Render the subject name as `CN=..., O=...`
pub fn get_cert_subject(cert: &X509Ref) -> String {
    cert.subject_name()
        .entries()
        .map(|entry| {
            let name = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|value| value.to_string())
                .unwrap_or_default();
            format!("{}={}", name, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// SHA-256 fingerprint as colon separated upper-case hex
pub fn get_cert_fingerprint(cert: &X509Ref) -> Result<String> {
    let digest = cert.digest(MessageDigest::sha256())?;
    Ok(digest
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(":"))
}
