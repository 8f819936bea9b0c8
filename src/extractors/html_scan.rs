use std::sync::{Arc, OnceLock};

use futures::{future::BoxFuture, FutureExt};
use log::{debug, info};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::{host_has_marker, Extractor};
use crate::{
    fetcher::Fetcher,
    models::{EmbedReference, SourceDescriptor},
    utils::text::{extract_manifest_property, to_full_url},
};

const GENERIC_REFERER: &str = "https://www.google.com/";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Candidate {
    Manifest(String),
    Ciphertext(String),
}

/// Scans inline scripts of an embed page for a manifest assignment.
pub struct HtmlScanExtractor {
    name: &'static str,
    markers: &'static [&'static str],
    /// `None` means the embed's own origin.
    referer: Option<&'static str>,
    fetcher: Arc<Fetcher>,
}

impl HtmlScanExtractor {
    pub fn decoder(fetcher: Arc<Fetcher>) -> Self {
        Self {
            name: "decoder",
            markers: &["decoder", "megaplay"],
            referer: None,
            fetcher,
        }
    }

    /// Registry fallback; matches nothing on its own.
    pub fn generic(fetcher: Arc<Fetcher>) -> Self {
        Self {
            name: "generic",
            markers: &[],
            referer: Some(GENERIC_REFERER),
            fetcher,
        }
    }

    fn referer_for(&self, embed: &EmbedReference) -> String {
        match self.referer {
            Some(referer) => referer.to_owned(),
            None => format!("{}/", embed.origin()),
        }
    }

    async fn scan(&self, embed: &EmbedReference) -> Option<SourceDescriptor> {
        let referer = self.referer_for(embed);

        let Some(html) = self.fetcher.fetch_text(embed.as_str(), &referer).await else {
            return Some(SourceDescriptor::passthrough(embed, &referer));
        };

        let source = match find_candidate(&html) {
            Some(Candidate::Manifest(file)) => {
                let url = resolve_relative(embed, &file);
                info!("[{}] manifest found in {}", self.name, embed.as_str());
                SourceDescriptor::manifest(url, embed, &referer)
            }
            Some(Candidate::Ciphertext(payload)) => {
                debug!("[{}] encrypted payload in {}", self.name, embed.as_str());
                let mut source = SourceDescriptor::manifest(payload, embed, &referer);
                source.encrypted = true;
                source
            }
            None => {
                debug!("[{}] no manifest in {}", self.name, embed.as_str());
                SourceDescriptor::passthrough(embed, &referer)
            }
        };

        Some(source)
    }
}

impl Extractor for HtmlScanExtractor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, embed: &EmbedReference) -> bool {
        !self.markers.is_empty() && host_has_marker(embed, self.markers)
    }

    fn extract<'a>(&'a self, embed: &'a EmbedReference) -> BoxFuture<'a, Option<SourceDescriptor>> {
        self.scan(embed).boxed()
    }
}

fn find_candidate(html: &str) -> Option<Candidate> {
    static SCRIPT_SELECTOR: OnceLock<Selector> = OnceLock::new();
    static MEDIA_SELECTOR: OnceLock<Selector> = OnceLock::new();

    let document = Html::parse_document(html);

    let scripts = document
        .select(SCRIPT_SELECTOR.get_or_init(|| Selector::parse("script").unwrap()))
        .map(|el| el.text().collect::<String>());

    for script in scripts {
        if script.contains("encrypted") {
            if let Some(payload) = extract_ciphertext(&script) {
                return Some(Candidate::Ciphertext(payload.to_owned()));
            }
        }
        if let Some(file) = extract_manifest_property(&script) {
            return Some(Candidate::Manifest(file.to_owned()));
        }
    }

    document
        .select(MEDIA_SELECTOR.get_or_init(|| {
            Selector::parse("video[src], video source[src], source[src]").unwrap()
        }))
        .filter_map(|el| el.attr("src"))
        .find(|src| src.contains(".m3u8"))
        .map(|src| Candidate::Manifest(src.to_owned()))
}

fn extract_ciphertext(script: &str) -> Option<&str> {
    static CIPHERTEXT_RE: OnceLock<Regex> = OnceLock::new();
    CIPHERTEXT_RE
        .get_or_init(|| {
            Regex::new(r#"["']?(?:sources|file)["']?\s*:\s*["'](?<payload>[A-Za-z0-9+/]{24,}={0,2})["']"#)
                .unwrap()
        })
        .captures(script)
        .and_then(|m| Some(m.name("payload")?.as_str()))
}

fn resolve_relative(embed: &EmbedReference, file: &str) -> String {
    let file = to_full_url(file);
    if Url::parse(&file).is_ok() {
        return file;
    }
    Url::parse(embed.as_str())
        .and_then(|base| base.join(&file))
        .map(|url| url.to_string())
        .unwrap_or(file)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{response::Html as HtmlBody, routing::get, Router};

    use super::*;
    use crate::{models::SourceType, test_support::spawn_server};

    #[test]
    fn should_find_manifest_in_script() {
        let html = r#"<html><body>
            <script>var x = 1;</script>
            <script>jwplayer("p").setup({ sources: [{ file: "https://cdn.test/a/master.m3u8" }] });</script>
        </body></html>"#;

        assert_eq!(
            find_candidate(html),
            Some(Candidate::Manifest("https://cdn.test/a/master.m3u8".into()))
        );
    }

    #[test]
    fn should_flag_encrypted_payload() {
        let html = r#"<script>
            const cfg = { encrypted: true, sources: "U2FsdGVkX19vbWFkZWJ5bWVzb21lY2lwaGVydGV4dA==" };
        </script>"#;

        assert_eq!(
            find_candidate(html),
            Some(Candidate::Ciphertext(
                "U2FsdGVkX19vbWFkZWJ5bWVzb21lY2lwaGVydGV4dA==".into()
            ))
        );
    }

    #[test]
    fn should_fall_back_to_video_tag() {
        let html = r#"<video controls><source src="/media/ep1.m3u8" type="application/x-mpegURL"></video>"#;
        assert_eq!(find_candidate(html), Some(Candidate::Manifest("/media/ep1.m3u8".into())));
        assert_eq!(find_candidate("<p>nothing here</p>"), None);
    }

    #[test]
    fn should_resolve_relative_manifest() {
        let embed = EmbedReference::parse("https://decoder.watch/e/123abc").unwrap();
        assert_eq!(
            resolve_relative(&embed, "/hls/123abc.m3u8"),
            "https://decoder.watch/hls/123abc.m3u8"
        );
        assert_eq!(
            resolve_relative(&embed, "//cdn.test/x.m3u8"),
            "https://cdn.test/x.m3u8"
        );
    }

    #[test_log::test(tokio::test)]
    async fn should_scan_embed_page() {
        let app = Router::new().route(
            "/e/{id}",
            get(|| async {
                HtmlBody(r#"<script>player.load({ "file": "/hls/ep.m3u8?t=9" });</script>"#)
            }),
        );
        let base = spawn_server(app).await;
        let embed = EmbedReference::parse(&format!("{base}/e/123abc")).unwrap();
        let fetcher = Arc::new(Fetcher::new(vec![], Duration::from_secs(5)));

        let source = HtmlScanExtractor::decoder(fetcher.clone())
            .extract(&embed)
            .await
            .unwrap();
        assert_eq!(source.url, format!("{base}/hls/ep.m3u8?t=9"));
        assert_eq!(source.source_type, SourceType::M3u8);
        assert_eq!(source.referer, format!("{base}/"));

        let generic = HtmlScanExtractor::generic(fetcher);
        assert!(!generic.matches(&embed));
        let source = generic.extract(&embed).await.unwrap();
        assert_eq!(source.referer, GENERIC_REFERER);
    }

    #[test_log::test(tokio::test)]
    async fn page_without_manifest_is_passthrough() {
        let app = Router::new().route("/e/{id}", get(|| async { HtmlBody("<p>maintenance</p>") }));
        let base = spawn_server(app).await;
        let embed = EmbedReference::parse(&format!("{base}/e/1")).unwrap();
        let fetcher = Arc::new(Fetcher::new(vec![], Duration::from_secs(5)));

        let source = HtmlScanExtractor::decoder(fetcher).extract(&embed).await.unwrap();
        assert_eq!(source.source_type, SourceType::Iframe);
        assert_eq!(source.url, embed.as_str());
    }
}
