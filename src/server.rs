//! HTTP front end
//!
//! A plain HTTP/1 forward proxy. Requests in absolute form (or origin form
//! with a `Host` header) are turned into [`InterceptRequest`]s and handed to
//! the relay; bypassed requests are forwarded untouched. `POST
//! /__relay/control` accepts a JSON [`ControlMessage`].

use crate::control::ControlMessage;
use crate::error::{RelayError, Result};
use crate::models::{InterceptRequest, InterceptResponse};
use crate::relay::OfflineRelay;
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use url::Url;

/// Path of the control endpoint
pub const CONTROL_PATH: &str = "/__relay/control";

/// Headers that describe the hop, not the response
const HOP_BY_HOP: [header::HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
];

pub struct RelayServer {
    relay: OfflineRelay,
    addr: SocketAddr,
}

impl RelayServer {
    pub fn new(relay: OfflineRelay, addr: SocketAddr) -> Self {
        RelayServer { relay, addr }
    }

    /// Bind the configured address and accept connections until the process exits
    pub async fn serve(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        Self::serve_on(self.relay, listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve_on(relay: OfflineRelay, listener: TcpListener) -> std::io::Result<()> {
        info!("Relay listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let relay = relay.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let relay = relay.clone();
                    async move { Ok::<_, hyper::Error>(handle(relay, req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}

/// Route one inbound request
pub async fn handle(relay: OfflineRelay, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "unreadable request body");
        }
    };

    if parts.uri.authority().is_none() && parts.uri.path() == CONTROL_PATH {
        return handle_control(&relay, &parts.method, &body).await;
    }

    if parts.method == Method::CONNECT {
        return error_response(StatusCode::NOT_IMPLEMENTED, "CONNECT tunnels are not supported");
    }

    let request = match to_intercept_request(&parts) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    if let Some(response) = relay.intercept(&request).await {
        return to_hyper_response(response);
    }

    debug!("Forwarding bypassed request: {} {}", request.method, request.url);
    match relay.forward(&request, body).await {
        Ok(upstream) => to_hyper_response(upstream.into_response()),
        Err(e) => {
            warn!("Bypass forward failed for {}: {}", request.url, e);
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}

async fn handle_control(
    relay: &OfflineRelay,
    method: &Method,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    if method != Method::POST {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "control messages must be POSTed");
    }

    let message: ControlMessage = match serde_json::from_slice(body) {
        Ok(message) => message,
        Err(e) => {
            debug!("Rejected control message: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid control message: {}", e),
            );
        }
    };

    match relay.control().dispatch(message).await {
        Ok(Some(report)) => match serde_json::to_vec(&report) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        },
        Ok(None) => json_response(StatusCode::ACCEPTED, br#"{"accepted":true}"#.to_vec()),
        Err(e) => {
            let status = StatusCode::from_u16(e.to_http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_response(status, &e.to_string())
        }
    }
}

/// Build the absolute URL of a proxied request
pub fn to_intercept_request(parts: &http::request::Parts) -> Result<InterceptRequest> {
    let url = if parts.uri.scheme().is_some() {
        parts.uri.to_string()
    } else {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                RelayError::InvalidRequest("request has no absolute URL or Host header".into())
            })?;
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("http://{}{}", host, path)
    };

    let url = Url::parse(&url)
        .map_err(|e| RelayError::InvalidRequest(format!("invalid url '{}': {}", url, e)))?;
    let mut request = InterceptRequest::new(parts.method.clone(), url);
    request.headers = parts.headers.clone();
    Ok(request)
}

fn to_hyper_response(response: InterceptResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    for name in &HOP_BY_HOP {
        out.headers_mut().remove(name);
    }
    out
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(Bytes::from(body)));
    *out.status_mut() = status;
    out.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    out
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({ "error": message }).to_string().into_bytes())
}
