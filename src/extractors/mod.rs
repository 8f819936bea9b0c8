//! Provider extractors: embed url in, source descriptor out.
//!
//! Each provider family implements [`Extractor`]. The [`ExtractorRegistry`] tries
//! them in registration order and falls back to a generic HTML scan.

pub mod html_scan;
pub mod megacloud;
pub mod simple_api;

use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, warn};

use crate::{
    cipher::KeyResolver,
    fetcher::Fetcher,
    models::{EmbedReference, SourceDescriptor},
};

pub use html_scan::HtmlScanExtractor;
pub use megacloud::MegacloudExtractor;
pub use simple_api::SimpleApiExtractor;

pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(&self, embed: &EmbedReference) -> bool;

    /// Never fails: problems are logged and reported as `None` or a passthrough.
    fn extract<'a>(&'a self, embed: &'a EmbedReference) -> BoxFuture<'a, Option<SourceDescriptor>>;
}

/// Host substring match, the classification rule every family uses.
pub(crate) fn host_has_marker(embed: &EmbedReference, markers: &[&str]) -> bool {
    let host = embed.host().to_lowercase();
    markers.iter().any(|marker| host.contains(marker))
}

pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    fallback: Arc<dyn Extractor>,
    keys: Arc<KeyResolver>,
}

impl ExtractorRegistry {
    pub fn new(fallback: Arc<dyn Extractor>, keys: Arc<KeyResolver>) -> Self {
        Self {
            extractors: vec![],
            fallback,
            keys,
        }
    }

    pub fn register(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Families A to D in priority order, with the generic scanner as fallback.
    pub fn standard(fetcher: Arc<Fetcher>, keys: Arc<KeyResolver>) -> Self {
        Self::new(
            Arc::new(HtmlScanExtractor::generic(fetcher.clone())),
            keys.clone(),
        )
        .register(Arc::new(MegacloudExtractor::new(fetcher.clone(), keys)))
        .register(Arc::new(SimpleApiExtractor::tcloud(fetcher.clone())))
        .register(Arc::new(SimpleApiExtractor::vidsrc(fetcher.clone())))
        .register(Arc::new(HtmlScanExtractor::decoder(fetcher)))
    }

    pub fn classify(&self, embed: &EmbedReference) -> &dyn Extractor {
        self.extractors
            .iter()
            .find(|e| e.matches(embed))
            .unwrap_or(&self.fallback)
            .as_ref()
    }

    /// Dispatches to the matching family. Payloads still flagged encrypted get one keyless
    /// decryption attempt and are turned into a passthrough if that fails.
    pub async fn extract(&self, embed: &EmbedReference) -> Option<SourceDescriptor> {
        let extractor = self.classify(embed);
        debug!("[extractors] {} -> {}", embed.as_str(), extractor.name());

        let mut source = extractor.extract(embed).await?;
        if source.source_name.is_none() {
            source.source_name = Some(extractor.name().to_owned());
        }

        if source.encrypted {
            match self.keys.decrypt(&source.url, None) {
                Some(url) => {
                    source.source_type = crate::models::SourceType::from_url(&url);
                    source.url = url;
                    source.encrypted = false;
                }
                None => {
                    warn!(
                        "[extractors] {}: undecryptable payload, using passthrough",
                        extractor.name()
                    );
                    let name = source.source_name.take();
                    source = SourceDescriptor::passthrough(embed, &source.referer);
                    source.source_name = name;
                }
            }
        }

        Some(source)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::{cipher::testing::seal, config::Config, models::SourceType};

    fn registry() -> ExtractorRegistry {
        let fetcher = Arc::new(Fetcher::new(vec![], Duration::from_secs(1)));
        let keys = Arc::new(KeyResolver::new(Config::default().decryption_keys));
        ExtractorRegistry::standard(fetcher, keys)
    }

    #[test]
    fn every_known_shape_selects_exactly_one_family() {
        let registry = registry();
        let cases = [
            ("https://megacloud.blog/embed-2/v3/e-1/heQfyQKzZW3S?k=1", "megacloud"),
            ("https://rapid-cloud.co/embed-6-v2/e-1/AbC123?z=", "megacloud"),
            ("https://videostr.net/embed-1/e-1/xyz", "megacloud"),
            ("https://t-cloud.top/e/8f7a6b", "tcloud"),
            ("https://vidsrc.xyz/embed/tv/4411", "vidsrc"),
            ("https://vidplay.site/e/QWERTY", "vidsrc"),
            ("https://decoder.watch/e/123abc", "decoder"),
            ("https://megaplay.buzz/stream/s-2/92705/sub", "decoder"),
        ];

        for (raw, family) in cases {
            let embed = EmbedReference::parse(raw).unwrap();
            let matching = registry
                .extractors
                .iter()
                .filter(|e| e.matches(&embed))
                .count();
            assert_eq!(matching, 1, "{raw}");
            assert_eq!(registry.classify(&embed).name(), family, "{raw}");
        }
    }

    #[test]
    fn unknown_shapes_fall_back_to_generic_scan() {
        let registry = registry();
        for raw in ["https://streamtape.com/e/abc", "https://example.org/player?id=1"] {
            let embed = EmbedReference::parse(raw).unwrap();
            assert_eq!(registry.classify(&embed).name(), "generic", "{raw}");
        }
    }

    struct Canned(SourceDescriptor);

    impl Extractor for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn matches(&self, _embed: &EmbedReference) -> bool {
            true
        }

        fn extract<'a>(
            &'a self,
            _embed: &'a EmbedReference,
        ) -> BoxFuture<'a, Option<SourceDescriptor>> {
            let source = self.0.clone();
            async move { Some(source) }.boxed()
        }
    }

    fn registry_with(source: SourceDescriptor) -> (ExtractorRegistry, Vec<String>) {
        let keys = Config::default().decryption_keys;
        let registry = ExtractorRegistry::new(
            Arc::new(Canned(source)),
            Arc::new(KeyResolver::new(keys.clone())),
        );
        (registry, keys)
    }

    #[tokio::test]
    async fn should_decrypt_flagged_payload() {
        let embed = EmbedReference::parse("https://unknown.host/e/1").unwrap();
        let keys = Config::default().decryption_keys;

        let mut flagged = SourceDescriptor::manifest(
            seal(r#"[{"file":"https://cdn.test/v.mp4"}]"#, &keys[2], None),
            &embed,
            "https://unknown.host/",
        );
        flagged.encrypted = true;
        let (registry, _) = registry_with(flagged);

        let source = registry.extract(&embed).await.unwrap();
        assert!(!source.encrypted);
        assert_eq!(source.url, "https://cdn.test/v.mp4");
        assert_eq!(source.source_type, SourceType::Mp4);
        assert_eq!(source.source_name.as_deref(), Some("canned"));
    }

    #[tokio::test]
    async fn undecryptable_payload_becomes_passthrough() {
        let embed = EmbedReference::parse("https://unknown.host/e/1").unwrap();
        let mut flagged = SourceDescriptor::manifest("not-ciphertext.m3u8", &embed, "");
        flagged.encrypted = true;
        let (registry, _) = registry_with(flagged);

        let source = registry.extract(&embed).await.unwrap();
        assert!(!source.encrypted);
        assert_eq!(source.source_type, SourceType::Iframe);
        assert_eq!(source.url, embed.as_str());
    }
}
