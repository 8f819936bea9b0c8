//! Server discovery for an episode.

use std::sync::{Arc, OnceLock};

use futures::{future::BoxFuture, FutureExt};
use log::{debug, warn};
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::{
    fetcher::Fetcher,
    models::{ServerDescriptor, TrackType},
    utils::text::sanitize_text,
};

pub trait ServerCatalog: Send + Sync {
    /// Servers in listing order. Failures are logged and reported as an empty list.
    fn list_servers<'a>(&'a self, episode_id: &'a str) -> BoxFuture<'a, Vec<ServerDescriptor>>;

    fn embed_url<'a>(&'a self, server: &'a ServerDescriptor) -> BoxFuture<'a, Option<String>>;
}

pub struct HianimeCatalog {
    fetcher: Arc<Fetcher>,
    base_url: String,
}

#[derive(Deserialize)]
struct ServersResponse {
    html: String,
}

#[derive(Deserialize)]
struct SourcesResponse {
    link: String,
}

impl HianimeCatalog {
    pub fn new(fetcher: Arc<Fetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn referer(&self) -> String {
        format!("{}/", self.base_url)
    }

    async fn load_servers(&self, episode_id: &str) -> Vec<ServerDescriptor> {
        let episode_id = normalize_episode_id(episode_id);
        let url = format!(
            "{}/ajax/v2/episode/servers?episodeId={}",
            self.base_url,
            urlencoding::encode(episode_id)
        );

        let Some(res) = self
            .fetcher
            .fetch_json::<ServersResponse>(&url, &self.referer())
            .await
        else {
            warn!("[catalog] no server list for episode {episode_id}");
            return vec![];
        };

        let servers = parse_servers(&res.html);
        debug!("[catalog] episode {episode_id}: {} server(s)", servers.len());
        servers
    }

    async fn load_embed_url(&self, server: &ServerDescriptor) -> Option<String> {
        let url = format!(
            "{}/ajax/v2/episode/sources?id={}",
            self.base_url,
            urlencoding::encode(&server.id)
        );

        let res: SourcesResponse = self.fetcher.fetch_json(&url, &self.referer()).await?;
        let link = res.link.trim();
        (!link.is_empty()).then(|| link.to_owned())
    }
}

impl ServerCatalog for HianimeCatalog {
    fn list_servers<'a>(&'a self, episode_id: &'a str) -> BoxFuture<'a, Vec<ServerDescriptor>> {
        self.load_servers(episode_id).boxed()
    }

    fn embed_url<'a>(&'a self, server: &'a ServerDescriptor) -> BoxFuture<'a, Option<String>> {
        self.load_embed_url(server).boxed()
    }
}

/// `slug-123?ep=4567` and `4567` both name episode 4567.
pub fn normalize_episode_id(episode_id: &str) -> &str {
    match episode_id.split_once("ep=") {
        Some((_, rest)) => rest.split('&').next().unwrap_or(rest),
        None => episode_id,
    }
}

fn parse_servers(html: &str) -> Vec<ServerDescriptor> {
    static GROUP_SELECTORS: OnceLock<[(Selector, TrackType); 3]> = OnceLock::new();
    let groups = GROUP_SELECTORS.get_or_init(|| {
        [
            (Selector::parse(".servers-sub .server-item").unwrap(), TrackType::Sub),
            (Selector::parse(".servers-dub .server-item").unwrap(), TrackType::Dub),
            (Selector::parse(".servers-raw .server-item").unwrap(), TrackType::Sub),
        ]
    });

    let document = Html::parse_fragment(html);

    groups
        .iter()
        .flat_map(|(selector, track)| {
            document.select(selector).filter_map(move |el| {
                let id = el.attr("data-id")?;
                let name = sanitize_text(&el.text().collect::<String>());
                Some(ServerDescriptor {
                    id: id.to_owned(),
                    name,
                    track: *track,
                })
            })
        })
        .collect()
}
