//! Caller origin extraction for session and audit records.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use warden_core::auth::session::ClientInfo;

/// Caller IP and user agent. Never rejects.
///
/// The IP is the first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer when the server was started with connect info.
#[derive(Debug, Clone, Default)]
pub struct Client(pub ClientInfo);

impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Client(client_info(&parts.headers, peer)))
    }
}

fn client_info(headers: &HeaderMap, peer: Option<String>) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let ip = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| header("x-real-ip").map(str::to_string))
        .or(peer);
    let device = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.chars().take(255).collect());
    ClientInfo { ip, device }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let info = client_info(&headers, Some("127.0.0.1".into()));
        assert_eq!(info.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.device.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn falls_back_to_peer_address() {
        let info = client_info(&HeaderMap::new(), Some("192.0.2.1".into()));
        assert_eq!(info.ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(info.device, None);
    }
}
