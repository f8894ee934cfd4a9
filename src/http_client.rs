use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, Url};

/// True for URLs that point at this machine.
pub fn is_loopback_url(url: &str) -> bool {
    let Ok(u) = Url::parse(url) else {
        return false;
    };
    let Some(host) = u.host_str() else {
        return false;
    };
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => host == "localhost" || host.ends_with(".localhost"),
    }
}

pub fn client_for_url_with_timeout(url: &str, timeout: Duration) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("prompthub/", env!("CARGO_PKG_VERSION")));
    // 本地模型服务（ollama 等）不走系统代理
    if is_loopback_url(url) {
        builder = builder.no_proxy();
    }
    builder.build()
}
