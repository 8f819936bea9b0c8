//! Decryption of obfuscated `sources` payloads.
//!
//! Providers encrypt the stream list with one of a few shared secrets. Two layouts exist:
//! a plain OpenSSL `Salted__` blob, and a variant where the salt is the hex-decoded
//! per-video client key and the 16-byte header of the blob is junk.

mod client_key;

pub use client_key::{resolve_client_key, try_extract_key};

use std::sync::OnceLock;

use base64::{prelude::BASE64_STANDARD, Engine};
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;

use crate::{
    fetcher::Fetcher,
    utils::{crypto_js, text::to_full_url},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// `Salted__` blob, salt read from the payload.
    Direct,
    /// Salt supplied by the hex client key; payload header discarded.
    Salted(Vec<u8>),
}

impl Strategy {
    pub fn for_client_key(client_key: Option<&str>) -> Self {
        match client_key.map(hex::decode) {
            Some(Ok(salt)) if !salt.is_empty() => Strategy::Salted(salt),
            Some(_) => {
                debug!("[cipher] client key is not hex, using direct decryption");
                Strategy::Direct
            }
            None => Strategy::Direct,
        }
    }
}

/// Fixed, ordered set of shared secrets.
#[derive(Debug, Clone, Default)]
pub struct KeyResolver {
    keys: Vec<String>,
}

impl KeyResolver {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    /// Built-in keys, preceded by any published at `keys_url`.
    pub async fn load(keys: Vec<String>, keys_url: Option<&str>, fetcher: &Fetcher) -> Self {
        let mut all = vec![];

        if let Some(url) = keys_url {
            match fetcher.fetch_text(url, "").await {
                Some(text) => {
                    let remote = parse_key_list(&text);
                    info!("[cipher] loaded {} remote key(s)", remote.len());
                    all.extend(remote);
                }
                None => warn!("[cipher] remote keys unavailable at {url}"),
            }
        }

        for key in keys {
            if !all.contains(&key) {
                all.push(key);
            }
        }

        Self::new(all)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Tries every key in order; the first payload that yields a stream url wins.
    pub fn decrypt(&self, ciphertext: &str, client_key: Option<&str>) -> Option<String> {
        let strategy = Strategy::for_client_key(client_key);

        for (idx, key) in self.keys.iter().enumerate() {
            match decrypt_with_key(ciphertext, key, &strategy) {
                Ok(url) => {
                    debug!("[cipher] key #{idx} succeeded");
                    return Some(url);
                }
                Err(err) => debug!("[cipher] key #{idx} failed: {err}"),
            }
        }

        warn!("[cipher] decryption failed with all {} key(s)", self.keys.len());
        None
    }
}

pub fn decrypt_with_key(
    ciphertext: &str,
    secret: &str,
    strategy: &Strategy,
) -> anyhow::Result<String> {
    let raw = BASE64_STANDARD.decode(ciphertext.trim().as_bytes())?;

    let plaintext = match strategy {
        Strategy::Direct => crypto_js::decrypt_aes_no_salt(secret.as_bytes(), &raw)?,
        Strategy::Salted(salt) => crypto_js::decrypt_aes_with_salt(secret.as_bytes(), salt, &raw)?,
    };

    interpret_plaintext(&plaintext)
        .ok_or_else(|| anyhow::anyhow!("plaintext holds no stream url"))
}

/// A JSON array of `{file|url}` entries, a JSON string, or bare text holding an `.m3u8` url.
pub fn interpret_plaintext(plaintext: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Entry {
        #[serde(alias = "url")]
        file: String,
    }

    let trimmed = plaintext.trim();

    if let Ok(entries) = serde_json::from_str::<Vec<Entry>>(trimmed) {
        return entries
            .into_iter()
            .map(|e| e.file)
            .find(|f| !f.is_empty())
            .map(|f| to_full_url(&f));
    }

    let candidate = serde_json::from_str::<String>(trimmed).unwrap_or_else(|_| trimmed.to_owned());
    if candidate.contains(".m3u8") && !candidate.contains(char::is_whitespace) {
        return Some(to_full_url(&candidate));
    }

    None
}

fn parse_key_list(text: &str) -> Vec<String> {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_RE.get_or_init(|| Regex::new(r#"^[\x21-\x7e]{8,}$"#).unwrap());

    text.split(['\n', ','])
        .map(|s| s.trim().trim_matches('"'))
        .filter(|s| re.is_match(s))
        .map(String::from)
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use base64::{prelude::BASE64_STANDARD, Engine};

    use crate::utils::{crypto, crypto_js};

    /// Produces the payload a provider would serve for `plaintext` under `secret`.
    pub fn seal(plaintext: &str, secret: &str, client_key: Option<&str>) -> String {
        let raw = match client_key {
            None => {
                crypto_js::encrypt_aes(secret.as_bytes(), b"8bytes!!", plaintext.as_bytes())
                    .unwrap()
            }
            Some(client_key) => {
                let salt = hex::decode(client_key).unwrap();
                let (key, iv) = crypto_js::derive_key_and_iv(secret.as_bytes(), &salt);
                let mut raw = b"0123456789abcdef".to_vec();
                raw.extend(crypto::encrypt_aes(&key, &iv, plaintext.as_bytes()).unwrap());
                raw
            }
        };
        BASE64_STANDARD.encode(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::seal, *};
    use crate::config::Config;

    const PAYLOAD: &str = r#"[{"file":"https://cdn.test/hls/master.m3u8","type":"hls"}]"#;
    const CLIENT_KEY: &str = "a1b2c3d4e5f60718";

    fn resolver() -> KeyResolver {
        KeyResolver::new(Config::default().decryption_keys)
    }

    #[test]
    fn should_open_payload_sealed_with_any_known_key_directly() {
        let resolver = resolver();
        for key in resolver.keys() {
            let ct = seal(PAYLOAD, key, None);
            assert_eq!(
                resolver.decrypt(&ct, None).as_deref(),
                Some("https://cdn.test/hls/master.m3u8"),
                "key {key}"
            );
        }
    }

    #[test]
    fn should_open_payload_sealed_with_any_known_key_and_client_key() {
        let resolver = resolver();
        for key in resolver.keys() {
            let ct = seal(PAYLOAD, key, Some(CLIENT_KEY));
            assert_eq!(
                resolver.decrypt(&ct, Some(CLIENT_KEY)).as_deref(),
                Some("https://cdn.test/hls/master.m3u8"),
                "key {key}"
            );
        }
    }

    #[test]
    fn should_accept_bare_manifest_plaintext() {
        let resolver = resolver();
        let ct = seal("https://cdn.test/a/index.m3u8", &resolver.keys()[1], None);
        assert_eq!(
            resolver.decrypt(&ct, None).as_deref(),
            Some("https://cdn.test/a/index.m3u8")
        );
    }

    #[test]
    fn should_fail_with_unknown_secret() {
        let ct = seal(PAYLOAD, "not-one-of-the-known-keys", None);
        assert_eq!(resolver().decrypt(&ct, None), None);

        let ct = seal(PAYLOAD, "not-one-of-the-known-keys", Some(CLIENT_KEY));
        assert_eq!(resolver().decrypt(&ct, Some(CLIENT_KEY)), None);
    }

    #[test]
    fn should_fail_on_garbage() {
        assert_eq!(resolver().decrypt("%%%", None), None);
        assert_eq!(resolver().decrypt("c2hvcnQ=", None), None);
    }

    #[test]
    fn should_pick_strategy_from_client_key() {
        assert_eq!(Strategy::for_client_key(None), Strategy::Direct);
        assert_eq!(Strategy::for_client_key(Some("zz-not-hex")), Strategy::Direct);
        assert_eq!(
            Strategy::for_client_key(Some("0a0b")),
            Strategy::Salted(vec![0x0a, 0x0b])
        );
    }

    #[test]
    fn should_interpret_plaintext() {
        assert_eq!(
            interpret_plaintext(r#"[{"url":"//cdn.x/a.m3u8"}]"#).as_deref(),
            Some("https://cdn.x/a.m3u8")
        );
        assert_eq!(
            interpret_plaintext(r#""https://cdn.x/b.m3u8""#).as_deref(),
            Some("https://cdn.x/b.m3u8")
        );
        assert_eq!(interpret_plaintext("[]"), None);
        assert_eq!(interpret_plaintext("hello world"), None);
    }

    #[test]
    fn should_parse_remote_key_list() {
        let keys = parse_key_list("\"dBe5ZkUuTNsXfhgR\"\n\nshort\n, another-key-value ");
        assert_eq!(keys, vec!["dBe5ZkUuTNsXfhgR", "another-key-value"]);
    }
}
