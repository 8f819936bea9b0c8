use std::sync::OnceLock;

use regex::Regex;

/// Finds the first `file:`, `src:` or `url:` assignment whose value points at an HLS playlist.
pub fn extract_manifest_property(script: &str) -> Option<&str> {
    static MANIFEST_PROPERTY_RE: OnceLock<Regex> = OnceLock::new();
    MANIFEST_PROPERTY_RE
        .get_or_init(|| {
            Regex::new(r#"["']?(?:file|src|url)["']?\s*:\s*["'](?<file>[^"']+\.m3u8[^"']*)["']"#)
                .unwrap()
        })
        .captures(script)
        .and_then(|m| Some(m.name("file")?.as_str()))
}

pub fn to_full_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.into()
    }
}

pub fn sanitize_text(text: &str) -> String {
    static SANITIZE_TEXT_REGEXP: OnceLock<regex::Regex> = OnceLock::new();
    let re = SANITIZE_TEXT_REGEXP.get_or_init(|| Regex::new(r#"[\n\t\s]+"#).unwrap());

    re.replace_all(text, " ").into_owned().trim().into()
}

/// Lowercase, dash separated slug.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }

    slug
}
