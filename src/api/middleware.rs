use crate::app_state::AppState;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::net::{IpAddr, SocketAddr};
use tracing::{error, warn};

pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri().clone();
    let method = req.method().clone();
    let client = request_client(&req);

    let response = next.run(req).await;
    let status = response.status();
    if status.is_client_error() {
        warn!(%method, %uri, %status, client = ?client, "Gateway rejected request");
    } else if status.is_server_error() {
        error!(%method, %uri, %status, client = ?client, "Gateway failed request");
    }

    response
}

/// Client address of a request as the rate limiter sees it
fn request_client(req: &Request<Body>) -> Option<IpAddr> {
    let ConnectInfo(peer) = req.extensions().get::<ConnectInfo<SocketAddr>>()?;
    let behind_proxy = req
        .extensions()
        .get::<AppState>()
        .is_some_and(|state| state.behind_proxy);
    Some(client_addr(req.headers(), *peer, behind_proxy))
}

/// Address the rate limiter keys on.
///
/// Behind a reverse proxy the socket peer is the proxy itself, so the first
/// `X-Forwarded-For` hop is used instead when it parses.
pub fn client_addr(headers: &HeaderMap, peer: SocketAddr, behind_proxy: bool) -> IpAddr {
    if behind_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(addr) = forwarded {
            return addr;
        }
    }
    peer.ip()
}
