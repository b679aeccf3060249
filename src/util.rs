use std::time::Duration;

use sysinfo::System;

use crate::config::ConfigError;

const HTTP_PROXY: &str = "HTTP_PROXY";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const FALLBACK_HOST: &str = "localhost";

/// Host name reported in every measurement unless configured otherwise
pub fn host_name() -> String {
    System::host_name().unwrap_or_else(|| FALLBACK_HOST.to_string())
}

pub fn get_proxy() -> Option<String> {
    std::env::var(HTTP_PROXY).ok().filter(|proxy| !proxy.is_empty())
}

/// HTTP client for the batch sink
///
/// Routes all requests through `proxy` when given.
pub fn http_client(proxy: Option<&str>) -> Result<reqwest::Client, ConfigError> {
    let invalid = |what: &'static str| {
        move |e: reqwest::Error| ConfigError::InvalidValue {
            what,
            reason: e.to_string(),
        }
    };

    let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(invalid(HTTP_PROXY))?);
    }
    builder.build().map_err(invalid("HTTP client"))
}
