use std::env;
use std::fmt;

use reqwest::Proxy;

pub const PROXY_HOST_ENV: &str = "HTTP_PROXY_HOST";
pub const PROXY_PORT_ENV: &str = "HTTP_PROXY_PORT";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy port {value:?} is not a valid port number")]
    InvalidPort { value: String },
    #[error("invalid proxy address: {0}")]
    Address(#[from] reqwest::Error),
}

/// An HTTP proxy that every factory-built client routes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
}

impl ProxySettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Read the proxy from `HTTP_PROXY_HOST` and `HTTP_PROXY_PORT`.
    pub fn from_env() -> Result<Option<Self>, ProxyError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve the proxy through `lookup`. Both the host and the port must be
    /// present for a proxy to be configured.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ProxyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = non_blank(lookup(PROXY_HOST_ENV));
        let port = non_blank(lookup(PROXY_PORT_ENV));
        match (host, port) {
            (Some(host), Some(port)) => Self::parse(host, &port).map(Some),
            _ => Ok(None),
        }
    }

    pub fn parse(host: impl Into<String>, port: &str) -> Result<Self, ProxyError> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ProxyError::InvalidPort {
                value: port.to_string(),
            })?;
        Ok(Self::new(host, port))
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub(crate) fn to_proxy(&self) -> Result<Proxy, ProxyError> {
        Ok(Proxy::all(self.url())?)
    }
}

impl fmt::Display for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn requires_both_host_and_port() {
        let none = ProxySettings::from_lookup(lookup_from(&[])).unwrap();
        assert!(none.is_none());

        let host_only =
            ProxySettings::from_lookup(lookup_from(&[(PROXY_HOST_ENV, "proxy.local")])).unwrap();
        assert!(host_only.is_none());

        let port_only =
            ProxySettings::from_lookup(lookup_from(&[(PROXY_PORT_ENV, "3128")])).unwrap();
        assert!(port_only.is_none());
    }

    #[test]
    fn builds_proxy_when_both_present() {
        let proxy = ProxySettings::from_lookup(lookup_from(&[
            (PROXY_HOST_ENV, "proxy.local"),
            (PROXY_PORT_ENV, "3128"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(proxy, ProxySettings::new("proxy.local", 3128));
        assert_eq!(proxy.url(), "http://proxy.local:3128");
    }

    #[test]
    fn blank_values_count_as_missing() {
        let proxy = ProxySettings::from_lookup(lookup_from(&[
            (PROXY_HOST_ENV, "  "),
            (PROXY_PORT_ENV, "3128"),
        ]))
        .unwrap();
        assert!(proxy.is_none());
    }

    #[test]
    fn rejects_unparseable_port() {
        let err = ProxySettings::from_lookup(lookup_from(&[
            (PROXY_HOST_ENV, "proxy.local"),
            (PROXY_PORT_ENV, "http"),
        ]))
        .unwrap_err();

        match err {
            ProxyError::InvalidPort { value } => assert_eq!(value, "http"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
