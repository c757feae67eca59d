//! Bot-protection challenge solving, per spec §4.4.
//!
//! Two strategies in order: an inline AES-128-CBC cookie decoder for a
//! known challenge shape, then an external browser-emulator collaborator
//! treated as an oracle. Solved cookies are cached per-domain, bound to
//! the user-agent used to obtain them, both in-memory and in `ByteStore`
//! under service `cf_cookie` so a restart doesn't force re-solving every
//! domain from scratch.

use std::sync::Arc;
use std::time::Duration;

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use dashmap::DashMap;
use regex::Regex;
use thiserror::Error;

use streamrelay_core::cache::{ByteStore, KeyBuilder};
use streamrelay_core::config::ChallengeConfig;
use streamrelay_core::models::{now_unix_secs, CacheRecord};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("challenge html had no known extractable shape and no emulator is configured")]
    Unsolvable,
    #[error("emulator returned a malformed response")]
    EmulatorMalformed,
}

#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub body_html: String,
    pub cookie_header: String,
    pub user_agent: String,
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Recognizes well-known bot-challenge response markers.
#[must_use]
pub fn is_challenge(html: &str) -> bool {
    const MARKERS: &[&str] = &["Just a moment", "cf-browser-verification", "Checking your browser", "challenge-platform"];
    MARKERS.iter().any(|marker| html.contains(marker))
}

/// Extracts the obfuscated key/IV/ciphertext triple from the inline
/// challenge HTML shape this decoder targets:
/// `<div id="challenge-data" data-key="HEX" data-iv="HEX" data-ct="HEX"></div>`.
fn extract_challenge_data(html: &str) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let re = Regex::new(r#"data-key="([0-9a-fA-F]+)"[^>]*data-iv="([0-9a-fA-F]+)"[^>]*data-ct="([0-9a-fA-F]+)""#).ok()?;
    let caps = re.captures(html)?;
    let key = hex::decode(&caps[1]).ok()?;
    let iv = hex::decode(&caps[2]).ok()?;
    let ct = hex::decode(&caps[3]).ok()?;
    Some((key, iv, ct))
}

/// Strategy 1: decode the inline AES-128-CBC challenge, yielding
/// `Cookie: cf_clearance=<hex plaintext>`.
fn decode_inline_challenge(html: &str) -> Option<String> {
    let (key, iv, ct) = extract_challenge_data(html)?;
    if key.len() != 16 || iv.len() != 16 || ct.is_empty() || ct.len() % 16 != 0 {
        return None;
    }
    let decryptor = Aes128CbcDec::new_from_slices(&key, &iv).ok()?;
    let mut buf = ct.clone();
    let plaintext = decryptor.decrypt_padded_mut::<NoPadding>(&mut buf).ok()?;
    Some(format!("cf_clearance={}", hex::encode(plaintext)))
}

#[derive(serde::Deserialize)]
struct EmulatorResponse {
    #[serde(rename = "bodyHtml")]
    body_html: String,
    #[serde(rename = "cookieHeader")]
    cookie_header: String,
    #[serde(rename = "userAgent", default)]
    user_agent: Option<String>,
}

struct CachedCookie {
    cookie_header: String,
    user_agent: String,
}

/// Solves and caches per-domain challenge cookies.
pub struct ChallengeSolver {
    http: reqwest::Client,
    byte_store: Arc<ByteStore>,
    key_builder: KeyBuilder,
    cookies: DashMap<String, CachedCookie>,
    config: ChallengeConfig,
}

impl ChallengeSolver {
    #[must_use]
    pub fn new(byte_store: Arc<ByteStore>, key_builder: KeyBuilder, config: ChallengeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            byte_store,
            key_builder,
            cookies: DashMap::new(),
            config,
        }
    }

    /// Drops the cached cookie for `domain`, both in-memory and durable.
    /// Callers invoke this on a stale-cookie hit (403/challenge html on
    /// reuse) before calling `solve` again.
    pub async fn clear(&self, domain: &str) {
        self.cookies.remove(domain);
        self.byte_store.delete("cf_cookie", domain).await;
    }

    async fn cached_cookie(&self, domain: &str) -> Option<CachedCookie> {
        if let Some(entry) = self.cookies.get(domain) {
            return Some(CachedCookie {
                cookie_header: entry.cookie_header.clone(),
                user_agent: entry.user_agent.clone(),
            });
        }
        let record = self.byte_store.get("cf_cookie", domain).await.ok().flatten()?;
        let cookie_header = record.data.get("cookie_header")?.as_str()?.to_string();
        let user_agent = record.data.get("user_agent")?.as_str()?.to_string();
        self.cookies.insert(
            domain.to_string(),
            CachedCookie {
                cookie_header: cookie_header.clone(),
                user_agent: user_agent.clone(),
            },
        );
        Some(CachedCookie { cookie_header, user_agent })
    }

    async fn persist_cookie(&self, domain: &str, cookie_header: &str, user_agent: &str) {
        self.cookies.insert(
            domain.to_string(),
            CachedCookie {
                cookie_header: cookie_header.to_string(),
                user_agent: user_agent.to_string(),
            },
        );
        let now = now_unix_secs();
        self.byte_store
            .upsert(CacheRecord {
                service: "cf_cookie".to_string(),
                hash: domain.to_string(),
                file_name: None,
                size_bytes: None,
                data: serde_json::json!({"cookie_header": cookie_header, "user_agent": user_agent, "key": self.key_builder.cookie_key(domain)}),
                release_key: None,
                category: None,
                resolution: None,
                created_at: now,
                updated_at: now,
                expires_at: now + 86_400,
            })
            .await;
    }

    async fn call_emulator(&self, emulator_url: &str, url: &str) -> Result<EmulatorResponse, ChallengeError> {
        let response = self
            .http
            .post(emulator_url)
            .timeout(Duration::from_secs(self.config.emulator_timeout_secs))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| ChallengeError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChallengeError::Network(format!("emulator returned {}", response.status())));
        }
        response.json().await.map_err(|_| ChallengeError::EmulatorMalformed)
    }

    /// Resolves a domain's challenge and returns a replayable cookie.
    /// A cached cookie is trusted and returned without re-solving — the
    /// caller is responsible for invoking [`Self::clear`] on a stale hit.
    pub async fn solve(&self, domain: &str, url: &str) -> Result<SolveOutcome, ChallengeError> {
        if let Some(cached) = self.cached_cookie(domain).await {
            return Ok(SolveOutcome {
                body_html: String::new(),
                cookie_header: cached.cookie_header,
                user_agent: cached.user_agent,
            });
        }

        let user_agent = DEFAULT_USER_AGENT.to_string();
        let response = self
            .http
            .get(url)
            .header("User-Agent", &user_agent)
            .send()
            .await
            .map_err(|e| ChallengeError::Network(e.to_string()))?;
        let body_html = response.text().await.map_err(|e| ChallengeError::Network(e.to_string()))?;

        if !is_challenge(&body_html) {
            return Ok(SolveOutcome {
                body_html,
                cookie_header: String::new(),
                user_agent,
            });
        }

        if let Some(cookie_header) = decode_inline_challenge(&body_html) {
            self.persist_cookie(domain, &cookie_header, &user_agent).await;
            return Ok(SolveOutcome { body_html, cookie_header, user_agent });
        }

        let Some(emulator_url) = &self.config.emulator_url else {
            return Err(ChallengeError::Unsolvable);
        };
        let emulated = self.call_emulator(emulator_url, url).await?;
        let user_agent = emulated.user_agent.unwrap_or(user_agent);
        self.persist_cookie(domain, &emulated.cookie_header, &user_agent).await;
        Ok(SolveOutcome {
            body_html: emulated.body_html,
            cookie_header: emulated.cookie_header,
            user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_challenge_markers() {
        assert!(is_challenge("<title>Just a moment...</title>"));
        assert!(!is_challenge("<html><body>ok</body></html>"));
    }

    #[test]
    fn inline_decoder_round_trips_known_shape() {
        use cbc::cipher::BlockEncryptMut;
        type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let plaintext = b"0123456789abcdef";
        let mut buf = *plaintext;
        let ciphertext = Aes128CbcEnc::new_from_slices(&key, &iv).unwrap().encrypt_padded_mut::<NoPadding>(&mut buf, plaintext.len()).unwrap().to_vec();

        let html = format!(
            r#"<div id="challenge-data" data-key="{}" data-iv="{}" data-ct="{}"></div>"#,
            hex::encode(key),
            hex::encode(iv),
            hex::encode(&ciphertext)
        );
        let cookie = decode_inline_challenge(&html).unwrap();
        assert_eq!(cookie, format!("cf_clearance={}", hex::encode(plaintext)));
    }

    #[test]
    fn malformed_challenge_data_yields_none() {
        assert!(decode_inline_challenge("<div id=\"challenge-data\"></div>").is_none());
    }
}
