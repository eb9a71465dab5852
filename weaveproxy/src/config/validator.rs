//! Configuration validation, run before the proxy is built

use super::schema::ProxyConfig;
use crate::error::{Result, ValidationError};
use crate::proxy::listener::split_listen_addr;
use regex::Regex;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate entire proxy configuration
    pub fn validate(config: &ProxyConfig) -> Result<()> {
        Self::validate_listen_addrs(config)?;
        Self::validate_hostname_match(config)?;
        Self::validate_dns(config)?;
        Self::validate_tls(config)?;
        Ok(())
    }

    fn validate_listen_addrs(config: &ProxyConfig) -> Result<()> {
        if config.listen_addrs.is_empty() {
            return Err(ValidationError::NoListenAddrs.into());
        }

        for addr in &config.listen_addrs {
            let (proto, _) = split_listen_addr(addr);
            if proto != "tcp" && proto != "unix" {
                return Err(ValidationError::InvalidProtocol {
                    proto: proto.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    fn validate_hostname_match(config: &ProxyConfig) -> Result<()> {
        Regex::new(&config.hostname_match).map_err(|e| ValidationError::InvalidPattern {
            pattern: config.hostname_match.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn validate_dns(config: &ProxyConfig) -> Result<()> {
        if config.with_dns && config.without_dns {
            return Err(ValidationError::ConflictingDns.into());
        }
        Ok(())
    }

    /// TLS material must exist when TLS is requested
    fn validate_tls(config: &ProxyConfig) -> Result<()> {
        let tls = &config.tls;
        if !tls.enabled() {
            return Ok(());
        }

        let mut required = vec![("certificate", tls.cert_path()), ("key", tls.key_path())];
        if tls.tls_verify {
            required.push(("CA certificate", tls.ca_cert_path()));
        }

        for (what, path) in required {
            if !path.exists() {
                return Err(ValidationError::MissingTlsFile { what, path }.into());
            }
        }

        Ok(())
    }
}
