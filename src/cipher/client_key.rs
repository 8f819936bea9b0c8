use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;

use crate::{fetcher::Fetcher, models::EmbedReference};

// Known surface forms of the per-video client key, in priority order:
// <meta name="_gg_fb" content="KEY">
// <!-- _is_th:KEY -->
// <div data-dpi="KEY"></div>  /  data-key="KEY"
// <script>window._xy_ws = "KEY";</script>
// <script>window._lk_db = {x: "P1", y: "P2", z: "P3"};</script>
// <script nonce="KEY">
// {"_k": "KEY"} / {"clientKey": "KEY"}
type KeyPattern = fn(&str) -> Option<String>;

const KEY_PATTERNS: [(&str, KeyPattern); 7] = [
    ("meta", try_meta_tag),
    ("comment", try_comment),
    ("data-attr", try_data_attribute),
    ("js-var", try_js_variable),
    ("js-parts", try_three_part_variable),
    ("nonce", try_script_nonce),
    ("json", try_json_field),
];

pub fn try_extract_key(html: &str) -> Option<String> {
    KEY_PATTERNS.iter().find_map(|(name, pattern)| {
        let key = pattern(html)?;
        debug!("[client_key] found key via {name}");
        Some(key)
    })
}

/// Probes embed page variants for a client key.
pub async fn resolve_client_key(
    fetcher: &Fetcher,
    embed: &EmbedReference,
    referer: &str,
) -> Option<String> {
    let bare = embed.without_query();
    let mut variants = vec![embed.as_str().to_owned(), bare.clone(), format!("{bare}?k=1")];
    variants.dedup();

    for variant in variants {
        let Some(html) = fetcher.fetch_text(&variant, referer).await else {
            continue;
        };

        if let Some(key) = try_extract_key(&html) {
            return Some(key);
        }
    }

    warn!("[client_key] no key found for {}", embed.as_str());
    None
}

fn capture(re: &'static OnceLock<Regex>, pattern: &str, html: &str) -> Option<String> {
    re.get_or_init(|| Regex::new(pattern).unwrap())
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn try_meta_tag(html: &str) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();
    capture(&REG_EX, r#"<meta\s+name="_gg_fb"\s+content="([a-zA-Z0-9]+)"\s*/?>"#, html)
}

fn try_data_attribute(html: &str) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();
    capture(&REG_EX, r#"<div[^>]*\sdata-(?:dpi|key)="([0-9a-zA-Z]+)"[^>]*>"#, html)
}

fn try_script_nonce(html: &str) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();
    capture(&REG_EX, r#"<script\s+nonce="([0-9a-zA-Z]+)">"#, html)
}

fn try_comment(html: &str) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();
    capture(&REG_EX, r#"<!--\s+_is_th:([0-9a-zA-Z]+)\s+-->"#, html)
}

fn try_js_variable(html: &str) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();
    capture(
        &REG_EX,
        r#"window\._xy_ws\s*=\s*['"`]([0-9a-zA-Z]+)['"`]\s*;"#,
        html,
    )
}

fn try_three_part_variable(html: &str) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();

    fn get_idx(p: &str) -> usize {
        match p {
            "x" | "X" => 0,
            "y" | "Y" => 1,
            _ => 2,
        }
    }

    REG_EX
        .get_or_init(|| {
            Regex::new(r#"window\._lk_db\s*=\s*\{\s*([xyzXYZ]):\s*["']([a-zA-Z0-9]+)["'],\s*([xyzXYZ]):\s*["']([a-zA-Z0-9]+)["'],\s*([xyzXYZ]):\s*["']([a-zA-Z0-9]+)["']\s*\}"#).unwrap()
        })
        .captures(html)
        .and_then(|c| {
            let mut parts: [&str; 3] = Default::default();
            for (name, value) in [(1, 2), (3, 4), (5, 6)] {
                parts[get_idx(c.get(name)?.as_str())] = c.get(value)?.as_str();
            }
            Some(parts.join(""))
        })
}

fn try_json_field(html: &str) -> Option<String> {
    static REG_EX: OnceLock<Regex> = OnceLock::new();
    capture(
        &REG_EX,
        r#""(?:_k|clientKey|client_key)"\s*:\s*"([0-9a-zA-Z]+)""#,
        html,
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{routing::get, Router};

    use super::*;
    use crate::test_support::spawn_server;

    #[test]
    fn should_find_each_surface_form() {
        let cases = [
            r#"<meta name="_gg_fb" content="aB0">"#,
            r#"<div class="x" data-dpi="aB0"></div>"#,
            r#"<div data-key="aB0"></div>"#,
            r#"<script nonce="aB0">"#,
            r#"<!-- _is_th:aB0 --> "#,
            r#"<script>window._xy_ws = "aB0";</script>"#,
            r#"<script>window._lk_db = {z: "0", x: "a", y: "B"};</script>"#,
            r#"<script>var player = {"clientKey": "aB0"};</script>"#,
        ];

        for html in cases {
            assert_eq!(try_extract_key(html).as_deref(), Some("aB0"), "{html}");
        }
    }

    #[test]
    fn should_prefer_attribute_over_json() {
        let html = r#"<script>var c = {"_k":"fromjson"}</script><meta name="_gg_fb" content="frommeta">"#;
        assert_eq!(try_extract_key(html).as_deref(), Some("frommeta"));
    }

    #[test]
    fn js_variable_wins_over_script_nonce() {
        let html = r#"<script nonce="fromnonce">window._xy_ws = "fromvar";</script>"#;
        assert_eq!(try_extract_key(html).as_deref(), Some("fromvar"));
    }

    #[test]
    fn should_return_none_without_key() {
        assert_eq!(try_extract_key("<html><body>nothing here</body></html>"), None);
    }

    #[test_log::test(tokio::test)]
    async fn should_probe_variants_until_key_found() {
        let app = Router::new().route(
            "/embed-2/v3/e-1/{id}",
            get(|axum::extract::RawQuery(q): axum::extract::RawQuery| async move {
                match q.as_deref() {
                    Some("k=1") => r#"<meta name="_gg_fb" content="c0ffee00">"#.to_string(),
                    _ => "<html>no key</html>".to_string(),
                }
            }),
        );
        let base = spawn_server(app).await;

        let fetcher = Fetcher::new(vec![], Duration::from_secs(5));
        let embed =
            EmbedReference::parse(&format!("{base}/embed-2/v3/e-1/abc?autoPlay=1")).unwrap();

        let key = resolve_client_key(&fetcher, &embed, "").await;
        assert_eq!(key.as_deref(), Some("c0ffee00"));
    }
}
