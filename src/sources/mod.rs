use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

pub mod crtsh;

pub use self::crtsh::{extract_subdomains, CrtShSource, DEFAULT_BASE_URL};

const USER_AGENT: &str = concat!("certfinder/", env!("CARGO_PKG_VERSION"));

/// Creates the HTTP client shared by every lookup of a run
pub(crate) fn create_client(timeout: Duration, proxy: Option<&str>) -> Result<Arc<Client>> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(30)))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(20)
        .tcp_keepalive(Duration::from_secs(30))
        .http1_only(); // crt.sh drops long-running HTTP/2 streams

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .with_context(|| format!("Invalid proxy URL: {}", proxy_url))?;
        builder = builder.proxy(proxy);
    }

    let client = builder.build().context("Failed to build HTTP client")?;
    Ok(Arc::new(client))
}

/// Expands the `host:port:user:pass` proxy shorthand into a URL.
pub(crate) fn format_proxy(proxy: &str) -> String {
    if proxy.contains('@') {
        return proxy.to_string();
    }

    let parts: Vec<&str> = proxy.split(':').collect();
    if parts.len() == 4 {
        format!("http://{}:{}@{}:{}", parts[2], parts[3], parts[0], parts[1])
    } else {
        proxy.to_string()
    }
}

// crt.sh serves an HTML error page instead of JSON when overloaded
pub(crate) fn is_html_response(text: &str) -> bool {
    let head = text.trim_start();
    head.starts_with('<') && (text.contains("<html") || text.contains("<!DOCTYPE"))
}
