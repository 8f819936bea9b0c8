use std::sync::{Arc, OnceLock};

use futures::{future::BoxFuture, FutureExt};
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{host_has_marker, Extractor};
use crate::{
    cipher::{resolve_client_key, KeyResolver},
    fetcher::Fetcher,
    models::{EmbedReference, SourceDescriptor},
    utils::text::to_full_url,
};

const MARKERS: [&str; 3] = ["megacloud", "rapid-cloud", "videostr"];

const ENDPOINTS: [&str; 3] = [
    "embed-2/v3/e-1/getSources",
    "embed-2/v2/e-1/getSources",
    "embed-2/ajax/e-1/getSources",
];

#[derive(Debug, Deserialize)]
struct GetSourcesResponse {
    sources: Value,
    #[serde(default)]
    encrypted: bool,
}

/// Megacloud-style players: per-video client key plus an (optionally encrypted) `getSources` API.
pub struct MegacloudExtractor {
    fetcher: Arc<Fetcher>,
    keys: Arc<KeyResolver>,
}

impl MegacloudExtractor {
    pub fn new(fetcher: Arc<Fetcher>, keys: Arc<KeyResolver>) -> Self {
        Self { fetcher, keys }
    }

    async fn extract_sources(&self, embed: &EmbedReference) -> Option<SourceDescriptor> {
        let referer = format!("{}/", embed.origin());

        let Some(id) = video_id(embed) else {
            warn!("[megacloud] no video id in {}", embed.as_str());
            return Some(SourceDescriptor::passthrough(embed, &referer));
        };

        let client_key = resolve_client_key(&self.fetcher, embed, &referer).await;

        for url in endpoint_urls(&embed.origin(), &id, client_key.as_deref()) {
            let Some(res) = self
                .fetcher
                .fetch_json::<GetSourcesResponse>(&url, embed.as_str())
                .await
            else {
                debug!("[megacloud] no sources at {url}");
                continue;
            };

            return self.read_sources(res, client_key.as_deref(), embed, &referer);
        }

        warn!("[megacloud] every getSources variant failed for {id}");
        Some(SourceDescriptor::passthrough(embed, &referer))
    }

    fn read_sources(
        &self,
        res: GetSourcesResponse,
        client_key: Option<&str>,
        embed: &EmbedReference,
        referer: &str,
    ) -> Option<SourceDescriptor> {
        let url = match res.sources {
            Value::String(ciphertext) => {
                if !res.encrypted {
                    debug!("[megacloud] string sources without encrypted flag, decrypting anyway");
                }
                self.keys.decrypt(&ciphertext, client_key)?
            }
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.get("file").or_else(|| item.get("url")))
                .filter_map(Value::as_str)
                .find(|file| !file.is_empty())
                .map(to_full_url)?,
            _ => return None,
        };

        info!("[megacloud] resolved {}", embed.as_str());
        Some(SourceDescriptor::manifest(url, embed, referer))
    }
}

impl Extractor for MegacloudExtractor {
    fn name(&self) -> &'static str {
        "megacloud"
    }

    fn matches(&self, embed: &EmbedReference) -> bool {
        host_has_marker(embed, &MARKERS)
    }

    fn extract<'a>(&'a self, embed: &'a EmbedReference) -> BoxFuture<'a, Option<SourceDescriptor>> {
        self.extract_sources(embed).boxed()
    }
}

fn video_id(embed: &EmbedReference) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();

    REG_EX
        .get_or_init(|| Regex::new(r#"/e(?:-\d+)?/([A-Za-z0-9]+)"#).unwrap())
        .captures(embed.path())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
        .or_else(|| embed.last_segment().map(String::from))
}

/// Keyed variants first, then the same paths without the key.
fn endpoint_urls(origin: &str, id: &str, client_key: Option<&str>) -> Vec<String> {
    let mut urls = vec![];

    if let Some(key) = client_key {
        urls.extend(
            ENDPOINTS
                .iter()
                .map(|path| format!("{origin}/{path}?id={id}&_k={key}")),
        );
    }
    urls.extend(ENDPOINTS.iter().map(|path| format!("{origin}/{path}?id={id}")));

    urls
}
