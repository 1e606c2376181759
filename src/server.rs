//! HTTP server exposing the flux API
//!
//! Two routes are served: `/` returns a plain-text description of the API and
//! `/solar-flux.json` returns the cached `ApiResponse`. Connections are
//! handled with hyper's HTTP/1.1 server, one task per connection.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::cache::{ApiError, Clock, FluxCache, FluxSource};

/// Path of the JSON endpoint
pub const FLUX_PATH: &str = "/solar-flux.json";

/// Plain-text description served at `/`
pub const README: &str = concat!(
    "Solar Flux API\n",
    "==============\n",
    "GET /solar-flux.json returns the latest solar X-ray flux readings from NOAA,\n",
    "refreshed at most once per minute.\n",
    "\n",
    "Fields:\n",
    "  timestamp   time of the latest 0.05-0.4nm reading\n",
    "  flux_short  latest flux of the 0.05-0.4nm band (W/m^2)\n",
    "  flux_long   latest flux of the 0.1-0.8nm band (W/m^2)\n",
    "  raw         latest upstream record of every band\n",
    "\n",
    "Data source: https://services.swpc.noaa.gov/json/goes/primary/xrays-6-hour.json\n",
    "The NOAA data is usually 3-5 minutes behind.\n",
    "\n",
    "This API is provided for free, and without warranties.\n",
    "Source: https://github.com/chendo/solar-flux-api\n",
    "License: MIT\n",
);

/// Body returned with non-200 responses
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// HTTP status for an API error
pub fn error_status(err: &ApiError) -> StatusCode {
    match err {
        ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ApiError::MalformedPayload(_) | ApiError::MissingSeries(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Route a request to its handler
///
/// Only the method and path matter; request bodies are ignored.
pub async fn handle<S, C>(
    cache: &FluxCache<S, C>,
    method: &Method,
    path: &str,
) -> Response<Full<Bytes>>
where
    S: FluxSource,
    C: Clock,
{
    match (method, path) {
        (&Method::GET, "/") => text_response(README, StatusCode::OK),
        (&Method::GET, FLUX_PATH) => match cache.get_response().await {
            Ok(response) => json_response(&*response, StatusCode::OK),
            Err(e) => {
                let status = error_status(&e);
                warn!(status = status.as_u16(), error = %e, "Serving flux error");
                json_response(&ErrorBody { error: e.to_string() }, status)
            }
        },
        (_, "/") | (_, FLUX_PATH) => {
            text_response("method not allowed", StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => text_response("not found", StatusCode::NOT_FOUND),
    }
}

/// Accept connections forever, serving each on its own task
///
/// Accept errors are logged and skipped.
pub async fn serve<S, C>(listener: TcpListener, cache: Arc<FluxCache<S, C>>)
where
    S: FluxSource + 'static,
    C: Clock + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Serving solar flux API");
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Accept failed");
                continue;
            }
        };

        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let cache = Arc::clone(&cache);
                async move {
                    debug!(method = %req.method(), path = req.uri().path(), "Request");
                    Ok::<_, Infallible>(handle(&*cache, req.method(), req.uri().path()).await)
                }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, error = %e, "Connection error");
            }
        });
    }
}

fn text_response(body: &'static str, status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json_response<T: Serialize + ?Sized>(value: &T, status: StatusCode) -> Response<Full<Bytes>> {
    let (body, status) = match serde_json::to_vec(value) {
        Ok(body) => (body, status),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            (br#"{"error":"serialization failed"}"#.to_vec(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
