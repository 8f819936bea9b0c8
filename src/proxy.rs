//! Referer-spoofing egress proxy for manifests and media segments.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use log::{debug, warn};

use crate::{error::ApiError, models::ProxiedRequest, utils};

const CACHE_CONTROL: &str = "public, max-age=300";

/// Upstream headers copied onto the proxied response.
const FORWARDED_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

pub struct EgressProxy {
    client: reqwest::Client,
    default_referer: String,
    timeout: Duration,
}

impl EgressProxy {
    pub fn new(default_referer: &str, timeout: Duration) -> Self {
        Self {
            // bytes are relayed as sent, so no transparent decompression
            client: utils::create_client_builder()
                .no_gzip()
                .no_brotli()
                .build()
                .unwrap_or_default(),
            default_referer: default_referer.to_owned(),
            timeout,
        }
    }

    /// Streams the upstream body back unchanged. Only an unreachable upstream is an error.
    pub async fn forward(
        &self,
        req: ProxiedRequest,
        range: Option<&HeaderValue>,
    ) -> Result<Response, ApiError> {
        let referer = req
            .referer_override
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.default_referer);

        let mut request = self
            .client
            .get(&req.target_url)
            .timeout(self.timeout)
            .header(header::ACCEPT, "*/*")
            .header(header::REFERER, referer);
        if let Some(origin) = utils::origin_of(referer) {
            request = request.header(header::ORIGIN, origin);
        }
        if let Some(range) = range {
            request = request.header(header::RANGE, range.clone());
        }

        let upstream = request.send().await.map_err(|err| {
            warn!("[proxy] {} unreachable: {err}", req.target_url);
            ApiError::Upstream {
                message: "Failed to reach upstream".into(),
                details: Some(err.to_string()),
            }
        })?;

        let status = upstream.status();
        if status.is_success() {
            debug!("[proxy] {} -> {status}", req.target_url);
        } else {
            warn!("[proxy] {} -> {status}", req.target_url);
        }

        let headers = response_headers(upstream.headers(), &req.target_url);
        let body = Body::from_stream(upstream.bytes_stream());

        Ok((status, headers, body).into_response())
    }
}

fn response_headers(upstream: &HeaderMap, target_url: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(infer_content_type(target_url)),
        );
    }

    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    headers
}

pub fn infer_content_type(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or_default().to_lowercase();

    if path.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if path.ends_with(".ts") {
        "video/mp2t"
    } else if path.ends_with(".mp4") {
        "video/mp4"
    } else {
        "application/octet-stream"
    }
}
