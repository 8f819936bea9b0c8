//! Hindi-dub resolution against a separate catalog site.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use futures::{future::BoxFuture, FutureExt};
use log::{debug, info, warn};
use reqwest::header;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::ApiError,
    extractors::ExtractorRegistry,
    fetcher::Fetcher,
    models::{EmbedReference, HindiStream, SourceType},
    utils::{
        self,
        fallback::{first_match, first_success, FallbackStep, RankRule},
        text::{sanitize_text, slugify},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HindiServer {
    pub name: String,
    pub url: String,
}

impl HindiServer {
    pub fn is_hindi(&self) -> bool {
        self.name.to_lowercase().contains("hindi")
    }

    pub fn is_multi(&self) -> bool {
        self.name.trim().eq_ignore_ascii_case("multi")
    }
}

pub trait HindiCatalog: Send + Sync {
    /// Slug of the best search hit.
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Option<String>>;

    fn episode_servers<'a>(
        &'a self,
        slug: &'a str,
        episode: u32,
    ) -> BoxFuture<'a, anyhow::Result<Vec<HindiServer>>>;
}

pub trait SlugGuesser: Send + Sync {
    fn guess<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Option<String>>;
}

pub struct HindiSiteCatalog {
    fetcher: Arc<Fetcher>,
    base_url: String,
}

impl HindiSiteCatalog {
    pub fn new(fetcher: Arc<Fetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn search_slug(&self, query: &str) -> Option<String> {
        let url = format!("{}/?s={}", self.base_url, urlencoding::encode(query));
        let html = self.fetcher.fetch_text(&url, &format!("{}/", self.base_url)).await?;

        let slug = parse_search_results(&html).into_iter().next();
        debug!("[hindi] search '{query}' -> {slug:?}");
        slug
    }

    async fn load_episode_servers(
        &self,
        slug: &str,
        episode: u32,
    ) -> anyhow::Result<Vec<HindiServer>> {
        let url = format!("{}/episode/{slug}-1x{episode}/", self.base_url);
        let html = self
            .fetcher
            .fetch_text(&url, &format!("{}/series/{slug}/", self.base_url))
            .await
            .ok_or_else(|| anyhow!("episode page {url} unavailable"))?;

        Ok(parse_episode_servers(&html))
    }
}

impl HindiCatalog for HindiSiteCatalog {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Option<String>> {
        self.search_slug(query).boxed()
    }

    fn episode_servers<'a>(
        &'a self,
        slug: &'a str,
        episode: u32,
    ) -> BoxFuture<'a, anyhow::Result<Vec<HindiServer>>> {
        self.load_episode_servers(slug, episode).boxed()
    }
}

fn parse_search_results(html: &str) -> Vec<String> {
    static RESULT_SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = RESULT_SELECTOR.get_or_init(|| Selector::parse("article a[href]").unwrap());

    let document = Html::parse_document(html);
    let mut slugs: Vec<String> = vec![];

    for href in document.select(selector).filter_map(|el| el.attr("href")) {
        let path = href.split(['?', '#']).next().unwrap_or_default();
        let slug = path
            .split_once("/series/")
            .or_else(|| path.split_once("/movies/"))
            .map(|(_, rest)| rest.trim_matches('/'))
            .filter(|s| !s.is_empty() && !s.contains('/'));

        if let Some(slug) = slug {
            if !slugs.iter().any(|s| s == slug) {
                slugs.push(slug.to_owned());
            }
        }
    }

    slugs
}

fn parse_episode_servers(html: &str) -> Vec<HindiServer> {
    static NAME_SELECTOR: OnceLock<Selector> = OnceLock::new();
    static FRAME_SELECTOR: OnceLock<Selector> = OnceLock::new();

    let document = Html::parse_document(html);

    let names: Vec<String> = document
        .select(NAME_SELECTOR.get_or_init(|| Selector::parse(".aa-tbs-video li a").unwrap()))
        .map(|el| sanitize_text(&el.text().collect::<String>()))
        .collect();

    // tab names line up with the raw iframe list, placeholders included
    document
        .select(FRAME_SELECTOR.get_or_init(|| Selector::parse(".video-player iframe").unwrap()))
        .enumerate()
        .filter_map(|(idx, el)| {
            let src = el.attr("data-src").or_else(|| el.attr("src"))?.trim();
            if src.is_empty() || src == "about:blank" {
                return None;
            }

            Some(HindiServer {
                name: names
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| format!("Server {}", idx + 1)),
                url: utils::text::to_full_url(src),
            })
        })
        .collect()
}

/// Asks an OpenAI-compatible chat endpoint for the catalog slug of a title.
pub struct AiSlugGuesser {
    client: &'static reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl AiSlugGuesser {
    pub fn new(api_url: &str, api_key: Option<String>, model: &str, timeout: Duration) -> Self {
        Self {
            client: utils::create_json_client(),
            api_url: api_url.to_owned(),
            api_key,
            model: model.to_owned(),
            timeout,
        }
    }

    async fn ask(&self, title: &str) -> Option<String> {
        let Some(api_key) = &self.api_key else {
            debug!("[hindi] slug guessing disabled, no api key");
            return None;
        };

        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {
                    "role": "system",
                    "content": "Reply with only the lowercase, dash separated URL slug an anime streaming site would use for the given title. No explanation."
                },
                { "role": "user", "content": title }
            ]
        });

        let result = async {
            self.client
                .post(&self.api_url)
                .timeout(self.timeout)
                .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<ChatResponse>()
                .await
        }
        .await;

        match result {
            Ok(res) => {
                let guess = res
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| slugify(c.message.content.trim().trim_matches(['"', '`', '\''])))
                    .filter(|slug| !slug.is_empty());
                info!("[hindi] slug guess for '{title}': {guess:?}");
                guess
            }
            Err(err) => {
                warn!("[hindi] slug guess failed: {err}");
                None
            }
        }
    }
}

impl SlugGuesser for AiSlugGuesser {
    fn guess<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Option<String>> {
        self.ask(title).boxed()
    }
}

/// Highest ranked server: exact "multi", then hindi servers other than `excluded`,
/// then any hindi server, then whatever is listed first.
pub fn rank_servers<'a>(servers: &'a [HindiServer], excluded: &str) -> Option<&'a HindiServer> {
    let excluded = excluded.to_lowercase();

    let multi = |s: &[HindiServer]| s.iter().position(HindiServer::is_multi);
    let hindi_not_excluded = |s: &[HindiServer]| {
        s.iter().position(|x| {
            x.is_hindi() && (excluded.is_empty() || !x.name.to_lowercase().contains(&excluded))
        })
    };
    let hindi = |s: &[HindiServer]| s.iter().position(HindiServer::is_hindi);
    let first = |s: &[HindiServer]| (!s.is_empty()).then_some(0);

    let rules: [RankRule<'_, HindiServer>; 4] = [&multi, &hindi_not_excluded, &hindi, &first];
    first_match(servers, &rules)
}

pub struct HindiResolver {
    catalog: Arc<dyn HindiCatalog>,
    guesser: Arc<dyn SlugGuesser>,
    registry: Arc<ExtractorRegistry>,
    excluded_server: String,
}

impl HindiResolver {
    pub fn new(
        catalog: Arc<dyn HindiCatalog>,
        guesser: Arc<dyn SlugGuesser>,
        registry: Arc<ExtractorRegistry>,
        excluded_server: &str,
    ) -> Self {
        Self {
            catalog,
            guesser,
            registry,
            excluded_server: excluded_server.to_owned(),
        }
    }

    pub async fn resolve(&self, title: &str, episode: u32) -> Result<HindiStream, ApiError> {
        let slug = self
            .find_slug(title)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("No Hindi match for '{title}'")))?;

        let servers = self
            .catalog
            .episode_servers(&slug, episode)
            .await
            .map_err(|err| ApiError::Upstream {
                message: "Failed to load Hindi episode".into(),
                details: Some(err.to_string()),
            })?;

        let server = rank_servers(&servers, &self.excluded_server).ok_or_else(|| {
            ApiError::NotFound(format!("No Hindi servers for {slug} episode {episode}"))
        })?;
        info!("[hindi] {slug} #{episode}: using server '{}'", server.name);

        Ok(self.stream_for(server).await)
    }

    /// Native search first; an AI guess is only trusted once the native search confirms it.
    async fn find_slug(&self, title: &str) -> Option<String> {
        let steps: Vec<(&'static str, FallbackStep<'_, String>)> = vec![
            (
                "native-search",
                Box::new(move || self.catalog.search(title)) as FallbackStep<'_, String>,
            ),
            (
                "ai-guess",
                Box::new(move || {
                    async move {
                        let guess = self.guesser.guess(title).await?;
                        let query = guess.replace('-', " ");
                        self.catalog.search(&query).await
                    }
                    .boxed()
                }) as FallbackStep<'_, String>,
            ),
        ];

        first_success(steps).await
    }

    async fn stream_for(&self, server: &HindiServer) -> HindiStream {
        if SourceType::is_manifest_url(&server.url) {
            return HindiStream {
                is_m3u8: SourceType::from_url(&server.url) == SourceType::M3u8,
                url: server.url.clone(),
            };
        }

        let source = match EmbedReference::parse(&server.url) {
            Ok(embed) => self.registry.extract(&embed).await,
            Err(err) => {
                warn!("[hindi] bad server url {}: {err}", server.url);
                None
            }
        };

        match source {
            Some(source) if source.is_playable() => HindiStream {
                is_m3u8: source.source_type == SourceType::M3u8,
                url: source.url,
            },
            _ => HindiStream {
                url: server.url.clone(),
                is_m3u8: false,
            },
        }
    }
}
