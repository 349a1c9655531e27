//! Metrics HTTP endpoint
//!
//! Serves the relay counters in Prometheus text format on a separate port,
//! along with a health check.

use crate::metrics::{MetricsSnapshot, RelayMetrics};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<RelayMetrics>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    pub fn new(metrics: Arc<RelayMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Serve `/metrics`, `/health` and `/` until the process exits
    pub async fn start(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics available at http://{}/metrics", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    async move { handle_request(req, metrics).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<RelayMetrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics.get_stats()),
        ),
        "/health" => text_response(
            StatusCode::OK,
            "application/json",
            r#"{"status":"healthy"}"#.to_string(),
        ),
        "/" => text_response(
            StatusCode::OK,
            "text/plain; charset=utf-8",
            "offline-relay metrics\n\n/metrics  Prometheus metrics\n/health   health check\n"
                .to_string(),
        ),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string()),
    };
    Ok(response)
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn metric(output: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "# HELP relay_{} {}", name, help);
    let _ = writeln!(output, "# TYPE relay_{} {}", name, kind);
    let _ = writeln!(output, "relay_{} {}\n", name, value);
}

/// Render a snapshot in the Prometheus exposition format
fn format_prometheus_metrics(s: &MetricsSnapshot) -> String {
    let mut out = String::new();

    let counters = [
        ("requests_total", "Requests seen by the interception hook", s.total_requests),
        ("media_requests_total", "Requests classified as media", s.media_requests),
        ("image_requests_total", "Requests classified as image", s.image_requests),
        ("api_requests_total", "Requests classified as API data", s.api_requests),
        ("static_requests_total", "Requests classified as static assets", s.static_requests),
        ("bypassed_requests_total", "Requests left to the caller", s.bypassed_requests),
        ("cache_hits_total", "Store hits", s.cache_hits),
        ("cache_misses_total", "Store misses", s.cache_misses),
        ("store_errors_total", "Store reads or writes that failed", s.store_errors),
        ("evictions_total", "Entries removed by capacity limits", s.evictions),
        ("upstream_fetches_total", "Outbound fetch attempts", s.upstream_fetches),
        ("retried_fetches_total", "Outbound attempts that were retried", s.retried_fetches),
        ("failed_fetches_total", "Logical fetches that gave up", s.failed_fetches),
        ("fallback_hits_total", "Media served by the path-only fallback", s.fallback_hits),
        ("offline_responses_total", "Synthesized offline responses", s.offline_responses),
        ("partial_responses_total", "206 responses sliced from stored media", s.partial_responses),
        ("unsatisfiable_ranges_total", "416 responses", s.unsatisfiable_ranges),
        ("bytes_from_origin_total", "Body bytes received from upstream", s.bytes_from_origin),
        ("bytes_from_cache_total", "Body bytes served from the store", s.bytes_from_cache),
    ];
    for (name, help, value) in counters {
        metric(&mut out, name, "counter", help, value);
    }

    let gauges = [
        ("cache_hit_rate", "Store hit rate percentage", s.cache_hit_rate()),
        ("fetch_failure_rate", "Failed logical fetch percentage", s.fetch_failure_rate()),
        (
            "request_duration_ms_avg",
            "Average intercepted request duration in milliseconds",
            s.avg_request_duration_ms(),
        ),
    ];
    for (name, help, value) in gauges {
        metric(&mut out, name, "gauge", help, format!("{:.2}", value));
    }

    out
}
