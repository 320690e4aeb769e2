use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::metrics::HttpMetrics;

/// Health checks and scrapes, kept out of the request histogram
const UNTRACKED_ROUTES: &[&str] = &["/health", "/metrics"];

/// Records request duration by method, matched route and status.
///
/// Must be installed with `route_layer` so the matched path is available.
pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = match req.extensions().get::<MatchedPath>() {
        Some(path) if !UNTRACKED_ROUTES.contains(&path.as_str()) => path.as_str().to_owned(),
        _ => return next.run(req).await,
    };
    let method = req.method().clone();

    let start = Instant::now();
    let response = next.run(req).await;

    HttpMetrics::observe_request(
        method.as_str(),
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
