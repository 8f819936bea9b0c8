//! Outbound HTTP through a rotating list of CORS relays.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use log::{debug, warn};
use reqwest::header;
use serde::de::DeserializeOwned;

use crate::{
    error::FetchError,
    utils::{self, origin_of},
};

/// Ordered relay prefixes plus a shared cursor. Selection is a load of the cursor;
/// a failed relay bumps it (wrap-around) so later calls move away from it.
#[derive(Debug, Default)]
pub struct ProxyRotation {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
}

impl ProxyRotation {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn current_index(&self) -> usize {
        match self.endpoints.len() {
            0 => 0,
            n => self.cursor.load(Ordering::Relaxed) % n,
        }
    }

    /// Moves away from `failed`. A no-op if another request already advanced past it.
    pub fn advance_from(&self, failed: usize) {
        let n = self.endpoints.len();
        if n == 0 {
            return;
        }
        let _ = self.cursor.compare_exchange(
            failed,
            (failed + 1) % n,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Wraps `url` with the relay at `index`; with no relays the url is used directly.
    pub fn wrap(&self, index: usize, url: &str) -> String {
        match self.endpoints.get(index) {
            Some(prefix) => format!("{prefix}{}", urlencoding::encode(url)),
            None => url.to_owned(),
        }
    }
}

/// Page loads look like a browser navigation, API calls like the embed player's XHR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Page,
    Json,
}

pub struct Fetcher {
    client: reqwest::Client,
    rotation: ProxyRotation,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(proxies: Vec<String>, timeout: Duration) -> Self {
        Self {
            client: utils::create_client_builder()
                .default_headers(utils::get_default_headers())
                .build()
                .unwrap_or_default(),
            rotation: ProxyRotation::new(proxies),
            timeout,
        }
    }

    pub fn rotation(&self) -> &ProxyRotation {
        &self.rotation
    }

    /// One attempt through the current relay. Transient failures advance the rotation.
    pub async fn fetch_through_proxy(
        &self,
        url: &str,
        referer: &str,
        timeout: Duration,
    ) -> Option<String> {
        match self.attempt(url, referer, timeout, RequestKind::Page).await {
            Ok(body) => Some(body),
            Err(err) => {
                warn!("[fetcher] {err}");
                None
            }
        }
    }

    /// Retries across relays, at most once per known relay.
    pub async fn fetch_text(&self, url: &str, referer: &str) -> Option<String> {
        self.fetch_with_retries(url, referer, self.timeout, RequestKind::Page)
            .await
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str, referer: &str) -> Option<T> {
        let body = self
            .fetch_with_retries(url, referer, self.timeout, RequestKind::Json)
            .await?;
        match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("[fetcher] malformed json from {url}: {err}");
                None
            }
        }
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        referer: &str,
        timeout: Duration,
        kind: RequestKind,
    ) -> Option<String> {
        let max_attempts = self.rotation.len().max(1);
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            match self.attempt(url, referer, timeout, kind).await {
                Ok(body) => return Some(body),
                Err(err) if err.is_transient() => {
                    debug!("[fetcher] attempt {attempt}/{max_attempts} failed: {err}");
                    last_err = Some(err);
                }
                Err(err) => {
                    last_err = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = last_err {
            warn!("[fetcher] giving up on {url}: {err}");
        }
        None
    }

    async fn attempt(
        &self,
        url: &str,
        referer: &str,
        timeout: Duration,
        kind: RequestKind,
    ) -> Result<String, FetchError> {
        let index = self.rotation.current_index();
        let target = self.rotation.wrap(index, url);

        let mut request = self.client.get(&target).timeout(timeout);
        request = match kind {
            RequestKind::Page => request.header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            RequestKind::Json => request
                .header(header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
                .header("X-Requested-With", "XMLHttpRequest"),
        };
        if !referer.is_empty() {
            request = request.header(header::REFERER, referer);
            if let Some(origin) = origin_of(referer) {
                request = request.header(header::ORIGIN, origin);
            }
        }

        let result = async {
            let response = request
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(url, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_owned(),
                    status: status.as_u16(),
                });
            }

            response.text().await.map_err(|e| FetchError::from_reqwest(url, e))
        }
        .await;

        if let Err(err) = &result {
            if err.is_transient() {
                self.rotation.advance_from(index);
            }
        }

        result
    }
}
