use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use url::Url;

/// Requested audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    #[default]
    Sub,
    Dub,
    Hindi,
}

impl TrackType {
    /// Unknown or missing values fall back to `sub`, the always-available track.
    pub fn parse_or_default(value: Option<&str>) -> Self {
        value
            .and_then(|v| TrackType::from_str(v.trim()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeReference {
    pub episode_id: String,
    pub track: TrackType,
}

/// A candidate streaming backend for one episode, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub id: String,
    pub name: String,
    pub track: TrackType,
}

/// A third-party embed page url, parsed once so extractors can classify it and read
/// the provider's video id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedReference {
    url: Url,
}

impl EmbedReference {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = Url::parse(&crate::utils::text::to_full_url(raw.trim()))?;
        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn path_segments(&self) -> Vec<&str> {
        self.url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Last non-empty path segment, the video id for most providers.
    pub fn last_segment(&self) -> Option<&str> {
        self.path_segments().pop()
    }

    pub fn without_query(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }

    /// Path or query carries a dead-link marker as a whole word. The host is not checked.
    pub fn looks_dead(&self) -> bool {
        const DEAD_MARKERS: [&[&str]; 3] = [&["404"], &["deleted"], &["not", "found"]];

        let path = self.url.path().to_lowercase();
        let query = self.url.query().unwrap_or_default().to_lowercase();
        let words: Vec<&str> = path
            .split(|c: char| !c.is_ascii_alphanumeric())
            .chain(query.split(|c: char| !c.is_ascii_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();

        DEAD_MARKERS
            .iter()
            .any(|marker| words.windows(marker.len()).any(|w| w == *marker))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    M3u8,
    Mp4,
    /// The embed page itself; only renderable in an iframe.
    Iframe,
}

impl SourceType {
    /// Path points at an HLS playlist or a progressive mp4.
    pub fn is_manifest_url(url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        path.contains(".m3u8") || path.ends_with(".mp4")
    }

    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.ends_with(".mp4") {
            SourceType::Mp4
        } else {
            SourceType::M3u8
        }
    }
}

/// The resolved result of one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub url: String,
    pub source_type: SourceType,
    /// `url` is still ciphertext.
    pub encrypted: bool,
    pub embed_url: String,
    pub referer: String,
    pub source_name: Option<String>,
}

impl SourceDescriptor {
    pub fn manifest(url: impl Into<String>, embed: &EmbedReference, referer: &str) -> Self {
        let url = url.into();
        Self {
            source_type: SourceType::from_url(&url),
            url,
            encrypted: false,
            embed_url: embed.as_str().to_owned(),
            referer: referer.to_owned(),
            source_name: None,
        }
    }

    /// Extraction failed; hand the embed page back so it can be shown in an iframe.
    pub fn passthrough(embed: &EmbedReference, referer: &str) -> Self {
        Self::iframe(embed.as_str(), embed, referer)
    }

    /// A page that can only be rendered in an iframe.
    pub fn iframe(url: &str, embed: &EmbedReference, referer: &str) -> Self {
        Self {
            url: url.to_owned(),
            source_type: SourceType::Iframe,
            encrypted: false,
            embed_url: embed.as_str().to_owned(),
            referer: referer.to_owned(),
            source_name: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.source_name = Some(name.to_owned());
        self
    }

    /// Directly playable by a native player.
    pub fn is_playable(&self) -> bool {
        !self.url.is_empty() && !self.encrypted && self.source_type != SourceType::Iframe
    }
}

/// One unit of work for the egress proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedRequest {
    pub target_url: String,
    pub referer_override: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceQuery {
    pub episode_id: Option<String>,
    pub server_type: Option<String>,
    pub anime_id: Option<String>,
    pub episode_number: Option<String>,
}

impl SourceQuery {
    /// `None` when no usable episode id was supplied.
    pub fn episode(&self) -> Option<EpisodeReference> {
        let episode_id = self.episode_id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
        Some(EpisodeReference {
            episode_id: episode_id.to_owned(),
            track: TrackType::parse_or_default(self.server_type.as_deref()),
        })
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourcePayload {
    pub url: String,
    pub proxy_url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub encrypted: bool,
    pub embed_url: String,
    pub referer: String,
    pub source_name: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub success: bool,
    pub source: Option<SourcePayload>,
    pub use_iframe: bool,
    pub iframe_url: String,
}

#[derive(Debug, Deserialize)]
pub struct HindiQuery {
    pub title: Option<String>,
    pub ep: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HindiStream {
    pub url: String,
    #[serde(rename = "isM3U8")]
    pub is_m3u8: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
    pub referer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_track_type() {
        assert_eq!(TrackType::parse_or_default(Some("DUB")), TrackType::Dub);
        assert_eq!(TrackType::parse_or_default(Some("hindi")), TrackType::Hindi);
        assert_eq!(TrackType::parse_or_default(Some("raw")), TrackType::Sub);
        assert_eq!(TrackType::parse_or_default(None), TrackType::Sub);
        assert_eq!(TrackType::Dub.to_string(), "dub");
    }

    #[test]
    fn should_read_embed_structure() {
        let raw = "https://megacloud.blog/embed-2/v3/e-1/heQfyQKzZW3S?k=1";
        let embed = EmbedReference::parse(raw).unwrap();

        assert_eq!(embed.host(), "megacloud.blog");
        assert_eq!(embed.origin(), "https://megacloud.blog");
        assert_eq!(embed.last_segment(), Some("heQfyQKzZW3S"));
        assert_eq!(
            embed.without_query(),
            "https://megacloud.blog/embed-2/v3/e-1/heQfyQKzZW3S"
        );
        assert!(!embed.looks_dead());
    }

    #[test]
    fn should_flag_dead_embeds() {
        for raw in [
            "https://host.to/404",
            "https://host.to/e/deleted-file",
            "https://host.to/not-found?x=1",
        ] {
            assert!(EmbedReference::parse(raw).unwrap().looks_dead(), "{raw}");
        }
        assert!(EmbedReference::parse("https://host.to/e/abc?err=404").unwrap().looks_dead());

        for raw in [
            "https://megacloud.blog/embed-2/v3/e-1/x404Ab?k=1",
            "https://cdn404.host.to/e/abc",
            "https://host.to/e/undeleted1",
        ] {
            assert!(!EmbedReference::parse(raw).unwrap().looks_dead(), "{raw}");
        }
    }

    #[test]
    fn should_infer_source_type() {
        assert_eq!(SourceType::from_url("https://a/b/master.m3u8?x=.mp4"), SourceType::M3u8);
        assert_eq!(SourceType::from_url("https://a/b/video.mp4?t=1"), SourceType::Mp4);
    }

    #[test]
    fn passthrough_is_not_playable() {
        let embed = EmbedReference::parse("https://x.to/e/abc").unwrap();
        assert!(!SourceDescriptor::passthrough(&embed, "").is_playable());
        assert!(SourceDescriptor::manifest("https://cdn/a.m3u8", &embed, "").is_playable());

        let mut encrypted = SourceDescriptor::manifest("https://cdn/a.m3u8", &embed, "");
        encrypted.encrypted = true;
        assert!(!encrypted.is_playable());
    }

    #[test]
    fn should_read_episode_from_query() {
        let query: SourceQuery =
            serde_json::from_str(r#"{"episodeId":" 2142 ","serverType":"DUB"}"#).unwrap();
        assert_eq!(
            query.episode(),
            Some(EpisodeReference {
                episode_id: "2142".into(),
                track: TrackType::Dub
            })
        );

        let query: SourceQuery = serde_json::from_str(r#"{"episodeId":""}"#).unwrap();
        assert_eq!(query.episode(), None);
    }

    #[test]
    fn should_serialize_hindi_stream() {
        let json = serde_json::to_value(HindiStream {
            url: "https://a/b.m3u8".into(),
            is_m3u8: true,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"url": "https://a/b.m3u8", "isM3U8": true}));
    }
}
