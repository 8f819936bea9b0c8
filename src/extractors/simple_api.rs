use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};
use log::{debug, warn};
use serde::Deserialize;

use super::{host_has_marker, Extractor};
use crate::{
    fetcher::Fetcher,
    models::{EmbedReference, SourceDescriptor, SourceType},
    utils::text::to_full_url,
};

#[derive(Debug, Deserialize)]
struct LinkResponse {
    link: String,
}

/// Providers exposing a single JSON endpoint that returns `{ link }` for a video id.
pub struct SimpleApiExtractor {
    name: &'static str,
    markers: &'static [&'static str],
    endpoint: fn(&str, &str) -> String,
    fetcher: Arc<Fetcher>,
}

impl SimpleApiExtractor {
    pub fn tcloud(fetcher: Arc<Fetcher>) -> Self {
        Self {
            name: "tcloud",
            markers: &["t-cloud", "tcloud"],
            endpoint: |origin, id| format!("{origin}/ajax/embed/getSource?id={id}"),
            fetcher,
        }
    }

    pub fn vidsrc(fetcher: Arc<Fetcher>) -> Self {
        Self {
            name: "vidsrc",
            markers: &["vidsrc", "vidplay"],
            endpoint: |origin, id| format!("{origin}/api/source/{id}"),
            fetcher,
        }
    }

    async fn extract_link(&self, embed: &EmbedReference) -> Option<SourceDescriptor> {
        let id = embed.last_segment()?;
        let referer = format!("{}/", embed.origin());
        let url = (self.endpoint)(&embed.origin(), id);

        let res: LinkResponse = self.fetcher.fetch_json(&url, embed.as_str()).await?;
        let link = to_full_url(res.link.trim());

        if link.is_empty() {
            warn!("[{}] empty link for {id}", self.name);
            return None;
        }

        if SourceType::is_manifest_url(&link) {
            Some(SourceDescriptor::manifest(link, embed, &referer))
        } else {
            debug!("[{}] {link} is another player page", self.name);
            Some(SourceDescriptor::iframe(&link, embed, &referer))
        }
    }
}

impl Extractor for SimpleApiExtractor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, embed: &EmbedReference) -> bool {
        host_has_marker(embed, self.markers)
    }

    fn extract<'a>(&'a self, embed: &'a EmbedReference) -> BoxFuture<'a, Option<SourceDescriptor>> {
        self.extract_link(embed).boxed()
    }
}
