use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

/// Public CORS relays; the url-encoded target is appended to each prefix.
const DEFAULT_CORS_PROXIES: [&str; 3] = [
    "https://corsproxy.io/?url=",
    "https://api.allorigins.win/raw?url=",
    "https://api.codetabs.com/v1/proxy?quest=",
];

/// Shared secrets tried, in order, against encrypted source payloads.
const DEFAULT_DECRYPTION_KEYS: [&str; 3] = [
    "dBe5ZkUuTNsXfhgRDbqMR8yiAPj2kXcf",
    "3AlttPAF1Zwn2l63meMeGMIvlWOXgm9ZXNk3glEzLTGOr1F113",
    "mYzQ7aKj2bLfCpWx9vTnRs4uE8gHdVoy",
];

const DEFAULT_IFRAME_TEMPLATE: &str = "https://megaplay.buzz/stream/s-2/{episode}/{track}";
const DEFAULT_AI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub public_proxy_path: String,
    pub catalog_base_url: String,
    pub cors_proxies: Vec<String>,
    pub decryption_keys: Vec<String>,
    pub keys_url: Option<String>,
    pub iframe_template: String,
    pub proxy_referer: String,
    pub fetch_timeout: Duration,
    pub proxy_timeout: Duration,
    pub hindi_base_url: String,
    pub hindi_excluded_server: String,
    pub ai_api_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            public_proxy_path: "/api/proxy".into(),
            catalog_base_url: "https://hianime.to".into(),
            cors_proxies: DEFAULT_CORS_PROXIES.iter().map(|s| s.to_string()).collect(),
            decryption_keys: DEFAULT_DECRYPTION_KEYS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keys_url: None,
            iframe_template: DEFAULT_IFRAME_TEMPLATE.into(),
            proxy_referer: "https://megacloud.blog/".into(),
            fetch_timeout: Duration::from_secs(10),
            proxy_timeout: Duration::from_secs(30),
            hindi_base_url: "https://animesalt.cc".into(),
            hindi_excluded_server: "abyss".into(),
            ai_api_url: DEFAULT_AI_API_URL.into(),
            ai_api_key: None,
            ai_model: "gpt-4o-mini".into(),
        }
    }
}

impl Config {
    /// Reads `.env` (if present) and the process environment on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr: parse_or(get("BIND_ADDR"), "BIND_ADDR", defaults.bind_addr)?,
            public_proxy_path: get("PUBLIC_PROXY_PATH").unwrap_or(defaults.public_proxy_path),
            catalog_base_url: trim_slash(get("CATALOG_BASE_URL"))
                .unwrap_or(defaults.catalog_base_url),
            cors_proxies: get("CORS_PROXIES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.cors_proxies),
            decryption_keys: get("DECRYPTION_KEYS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.decryption_keys),
            keys_url: get("KEYS_URL"),
            iframe_template: get("IFRAME_TEMPLATE").unwrap_or(defaults.iframe_template),
            proxy_referer: get("PROXY_REFERER").unwrap_or(defaults.proxy_referer),
            fetch_timeout: secs_or(
                get("FETCH_TIMEOUT_SECS"),
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout,
            )?,
            proxy_timeout: secs_or(
                get("PROXY_TIMEOUT_SECS"),
                "PROXY_TIMEOUT_SECS",
                defaults.proxy_timeout,
            )?,
            hindi_base_url: trim_slash(get("HINDI_BASE_URL")).unwrap_or(defaults.hindi_base_url),
            hindi_excluded_server: get("HINDI_EXCLUDED_SERVER")
                .unwrap_or(defaults.hindi_excluded_server),
            ai_api_url: get("AI_API_URL").unwrap_or(defaults.ai_api_url),
            ai_api_key: get("AI_API_KEY"),
            ai_model: get("AI_MODEL").unwrap_or(defaults.ai_model),
        })
    }

    /// Direct iframe url for an episode, used when nothing playable was extracted.
    pub fn iframe_url(&self, episode_id: &str, track: &str) -> String {
        self.iframe_template
            .replace("{episode}", episode_id)
            .replace("{track}", track)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {key} '{v}': {e}")),
        None => Ok(default),
    }
}

fn secs_or(value: Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    match value {
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .with_context(|| format!("invalid {key} '{v}'")),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn trim_slash(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim_end_matches('/').to_owned())
}
