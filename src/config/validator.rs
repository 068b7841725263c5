//! Configuration validation

use std::collections::HashSet;
use std::path::Path;

use log::warn;

use super::error::{ConfigError, Result};
use super::types::{CoreConfig, InterceptorConfig, InterceptorKind, TcpProxyConfig, TlsSettings};

/// Trait for validating configuration
pub trait ConfigValidator {
    /// Validate configuration
    ///
    /// Returns an error describing the first problem found.
    fn validate(&self) -> Result<()>;

    /// Check configuration for potential issues
    ///
    /// Unlike `validate()`, problems are reported as warnings and never fail.
    fn check(&self) -> Vec<String>;
}

impl ConfigValidator for CoreConfig {
    fn validate(&self) -> Result<()> {
        validate_unique(self.proxies.iter().map(|proxy| proxy.code.as_str()), "proxies")?;
        for proxy in &self.proxies {
            validate_proxy(proxy)?;
        }

        for (name, list) in [("interceptors_c2s", &self.interceptors_c2s), ("interceptors_s2c", &self.interceptors_s2c)] {
            validate_unique(list.iter().map(|interceptor| interceptor.code.as_str()), name)?;
            for interceptor in list {
                validate_interceptor(interceptor)?;
            }
        }

        Ok(())
    }

    fn check(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        match self.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            level => warnings.push(format!("Invalid log level: {}. Using default: info", level)),
        }

        if !self.proxies.iter().any(|proxy| proxy.enabled) {
            warnings.push("No enabled proxy; nothing will be intercepted".to_string());
        }

        for proxy in &self.proxies {
            if proxy.charset.to_uppercase() != "UTF-8" {
                warnings.push(format!(
                    "Proxy {} uses charset {}; text rendering assumes UTF-8",
                    proxy.code, proxy.charset
                ));
            }
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        warnings
    }
}

fn validate_unique<'a>(codes: impl Iterator<Item = &'a str>, what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for code in codes {
        if code.is_empty() {
            return Err(ConfigError::MissingRequiredValue(format!("{}.code", what)));
        }
        if !seen.insert(code) {
            return Err(ConfigError::InvalidValue(
                what.to_string(),
                format!("duplicate code '{}'", code),
            ));
        }
    }
    Ok(())
}

fn validate_proxy(proxy: &TcpProxyConfig) -> Result<()> {
    let field = |name: &str| format!("proxies.{}.{}", proxy.code, name);

    if proxy.listen.is_empty() {
        return Err(ConfigError::MissingRequiredValue(field("listen")));
    }
    if proxy.target.is_empty() {
        return Err(ConfigError::MissingRequiredValue(field("target")));
    }
    if proxy.listen == proxy.target {
        return Err(ConfigError::InvalidCombination(format!(
            "Proxy {}: listen and target addresses must be different",
            proxy.code
        )));
    }
    if proxy.buffer_size == 0 {
        return Err(ConfigError::InvalidValue(
            field("buffer_size"),
            "Buffer size must be greater than 0".to_string(),
        ));
    }
    if proxy.connect_timeout == 0 {
        return Err(ConfigError::InvalidValue(
            field("connect_timeout"),
            "Connect timeout must be greater than 0".to_string(),
        ));
    }

    if proxy.starttls && proxy.server_tls.is_none() {
        return Err(ConfigError::InvalidCombination(format!(
            "Proxy {}: starttls requires server_tls",
            proxy.code
        )));
    }

    if let Some(tls) = &proxy.server_tls {
        if !tls.has_identity() {
            return Err(ConfigError::MissingRequiredValue(field("server_tls.keystore or server_tls.cert")));
        }
        validate_tls(tls, &field("server_tls"))?;
    }
    if let Some(tls) = &proxy.client_tls {
        validate_tls(tls, &field("client_tls"))?;
    }

    Ok(())
}

fn validate_tls(tls: &TlsSettings, field: &str) -> Result<()> {
    if let Some(keystore) = &tls.keystore {
        validate_file_exists(keystore, &format!("{}.keystore", field))?;
    }

    match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => {
            validate_file_exists(cert, &format!("{}.cert", field))?;
            validate_file_exists(key, &format!("{}.key", field))?;
        }
        (Some(_), None) => return Err(ConfigError::MissingRequiredValue(format!("{}.key", field))),
        (None, Some(_)) => return Err(ConfigError::MissingRequiredValue(format!("{}.cert", field))),
        (None, None) => {}
    }

    Ok(())
}

fn validate_interceptor(interceptor: &InterceptorConfig) -> Result<()> {
    let field = |name: &str| format!("interceptors.{}.{}", interceptor.code, name);

    match &interceptor.kind {
        InterceptorKind::Log { .. } => {}
        InterceptorKind::Tag { tag, pattern } => {
            if tag.is_empty() {
                return Err(ConfigError::MissingRequiredValue(field("tag")));
            }
            if pattern.is_empty() {
                return Err(ConfigError::MissingRequiredValue(field("pattern")));
            }
        }
        InterceptorKind::Replace { find, .. } => {
            if find.is_empty() {
                return Err(ConfigError::MissingRequiredValue(field("find")));
            }
        }
        InterceptorKind::Drop { tag, pattern } => {
            if tag.is_none() && pattern.is_none() {
                return Err(ConfigError::MissingRequiredValue(field("tag or pattern")));
            }
        }
    }

    Ok(())
}

/// Validate that a file exists
fn validate_file_exists(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    if !path.is_file() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("{} is not a file", path.display()),
        ));
    }

    Ok(())
}
