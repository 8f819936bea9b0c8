//! HTTP surface: source resolution, Hindi resolution and the egress proxy.

use std::{any::Any, sync::Arc};

use anyhow::anyhow;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::debug;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};

use crate::{
    catalog::{normalize_episode_id, HianimeCatalog},
    cipher::KeyResolver,
    config::Config,
    error::ApiError,
    extractors::ExtractorRegistry,
    fetcher::Fetcher,
    hindi::{AiSlugGuesser, HindiResolver, HindiSiteCatalog},
    models::{
        HindiQuery, HindiStream, ProxiedRequest, ProxyQuery, SourceDescriptor, SourcePayload,
        SourceQuery, SourceResponse, SourceType, TrackType,
    },
    proxy::EgressProxy,
    resolver::SourceResolver,
};

pub struct AppState {
    pub config: Config,
    pub resolver: SourceResolver,
    pub hindi: HindiResolver,
    pub proxy: EgressProxy,
}

impl AppState {
    /// Wires every component from `config`. Remote keys, if configured, are fetched here.
    pub async fn from_config(config: Config) -> Self {
        let fetcher = Arc::new(Fetcher::new(config.cors_proxies.clone(), config.fetch_timeout));
        let keys = Arc::new(
            KeyResolver::load(
                config.decryption_keys.clone(),
                config.keys_url.as_deref(),
                &fetcher,
            )
            .await,
        );
        let registry = Arc::new(ExtractorRegistry::standard(fetcher.clone(), keys));

        let resolver = SourceResolver::new(
            Arc::new(HianimeCatalog::new(fetcher.clone(), &config.catalog_base_url)),
            registry.clone(),
        );
        let hindi = HindiResolver::new(
            Arc::new(HindiSiteCatalog::new(fetcher, &config.hindi_base_url)),
            Arc::new(AiSlugGuesser::new(
                &config.ai_api_url,
                config.ai_api_key.clone(),
                &config.ai_model,
                config.fetch_timeout,
            )),
            registry,
            &config.hindi_excluded_server,
        );
        let proxy = EgressProxy::new(&config.proxy_referer, config.proxy_timeout);

        Self {
            config,
            resolver,
            hindi,
            proxy,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/source", get(get_source))
        .route("/api/hindi", get(get_hindi))
        .route("/api/proxy", get(get_proxy))
        .route("/health", get(|| async { "ok" }))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".into());

    ApiError::Internal(anyhow!("handler panicked: {detail}")).into_response()
}

async fn get_source(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourceQuery>,
) -> Result<Json<SourceResponse>, ApiError> {
    let episode = query.episode().ok_or(ApiError::MissingParam("episodeId"))?;
    debug!(
        "[api] source {} ({}), anime {:?} ep {:?}",
        episode.episode_id, episode.track, query.anime_id, query.episode_number
    );

    let source = state
        .resolver
        .resolve_source(&episode.episode_id, episode.track)
        .await;

    Ok(Json(build_source_response(
        &state.config,
        &episode.episode_id,
        episode.track,
        source,
    )))
}

async fn get_hindi(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HindiQuery>,
) -> Result<Json<HindiStream>, ApiError> {
    let title = required(query.title.as_deref(), "title")?;
    let episode = query
        .ep
        .as_deref()
        .and_then(|ep| ep.trim().parse::<u32>().ok())
        .filter(|ep| *ep > 0)
        .unwrap_or(1);

    Ok(Json(state.hindi.resolve(title, episode).await?))
}

async fn get_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let target_url = required(query.url.as_deref(), "url")?.to_owned();

    state
        .proxy
        .forward(
            ProxiedRequest {
                target_url,
                referer_override: query.referer,
            },
            headers.get(header::RANGE),
        )
        .await
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingParam(name))
}

/// Only playable manifests get a proxy url; everything else tells the client to use an iframe.
pub fn build_source_response(
    config: &Config,
    episode_id: &str,
    track: TrackType,
    source: Option<SourceDescriptor>,
) -> SourceResponse {
    let iframe_url = match &source {
        Some(s) if s.source_type == SourceType::Iframe => s.url.clone(),
        _ => config.iframe_url(normalize_episode_id(episode_id), track.as_ref()),
    };

    let payload = source.map(|s| SourcePayload {
        proxy_url: if s.is_playable() {
            proxy_url(&config.public_proxy_path, &s.url, &s.referer)
        } else {
            String::new()
        },
        url: s.url,
        source_type: s.source_type,
        encrypted: s.encrypted,
        embed_url: s.embed_url,
        referer: s.referer,
        source_name: s.source_name,
    });

    SourceResponse {
        success: payload.is_some(),
        use_iframe: payload.as_ref().map_or(true, |p| p.proxy_url.is_empty()),
        source: payload,
        iframe_url,
    }
}

fn proxy_url(proxy_path: &str, url: &str, referer: &str) -> String {
    let mut proxied = format!("{proxy_path}?url={}", urlencoding::encode(url));
    if !referer.is_empty() {
        proxied.push_str("&referer=");
        proxied.push_str(&urlencoding::encode(referer));
    }
    proxied
}
