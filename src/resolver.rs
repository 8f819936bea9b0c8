//! Picks the first server of an episode that yields a directly playable source.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    catalog::ServerCatalog,
    extractors::ExtractorRegistry,
    models::{EmbedReference, ServerDescriptor, SourceDescriptor, TrackType},
};

pub struct SourceResolver {
    catalog: Arc<dyn ServerCatalog>,
    registry: Arc<ExtractorRegistry>,
}

impl SourceResolver {
    pub fn new(catalog: Arc<dyn ServerCatalog>, registry: Arc<ExtractorRegistry>) -> Self {
        Self { catalog, registry }
    }

    /// Servers are tried one at a time in listing order. A passthrough only wins when no
    /// server produced a playable manifest.
    pub async fn resolve_source(
        &self,
        episode_id: &str,
        track: TrackType,
    ) -> Option<SourceDescriptor> {
        let servers = self.catalog.list_servers(episode_id).await;
        if servers.is_empty() {
            info!("[resolver] no servers for {episode_id}");
            return None;
        }

        let mut passthrough = None;

        for server in servers.iter().filter(|s| accepts(track, s)) {
            let Some(embed) = self.embed_for(server).await else {
                continue;
            };

            match self.registry.extract(&embed).await {
                Some(source) if source.is_playable() => {
                    info!(
                        "[resolver] {episode_id}: server {} ({}) resolved",
                        server.name, server.id
                    );
                    return Some(source.with_name(&server.name));
                }
                Some(source) => {
                    debug!("[resolver] server {} gave passthrough only", server.name);
                    passthrough.get_or_insert(source.with_name(&server.name));
                }
                None => debug!("[resolver] server {} yielded nothing", server.name),
            }
        }

        if passthrough.is_none() {
            warn!("[resolver] every server failed for {episode_id} ({track})");
        }
        passthrough
    }

    async fn embed_for(&self, server: &ServerDescriptor) -> Option<EmbedReference> {
        let raw = self.catalog.embed_url(server).await?;

        let embed = match EmbedReference::parse(&raw) {
            Ok(embed) => embed,
            Err(err) => {
                warn!("[resolver] bad embed url {raw}: {err}");
                return None;
            }
        };

        if embed.looks_dead() {
            debug!("[resolver] skipping dead embed {raw}");
            return None;
        }

        Some(embed)
    }
}

/// `sub` accepts every server; other tracks need an exact match.
fn accepts(track: TrackType, server: &ServerDescriptor) -> bool {
    track == TrackType::Sub || server.track == track
}
