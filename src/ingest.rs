//! Ingestor (§4.1): concurrent subscription fetch + lenient base64 decode.
//!
//! The client stack mirrors the teacher's `network::service::HttpService` —
//! a `reqwest_middleware` client wrapping a plain `reqwest::Client` with a
//! `RetryTransientMiddleware` exponential-backoff policy — minus the
//! teacher's upstream-proxy and anti-block middlewares, which have no
//! counterpart here.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::sources::SourceEntry;
use crate::uri::extract_uris;

/// Fixed desktop-browser UA (§4.1), reused verbatim for Stage 3's
/// `generate_204` probes (see `SPEC_FULL.md` §12).
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub struct Ingestor {
    client: ClientWithMiddleware,
    semaphore: Arc<Semaphore>,
    fetch_timeout: Duration,
}

impl Ingestor {
    pub fn new(fetch_timeout: Duration, fetch_workers: usize) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let base = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(fetch_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("reqwest client builds with static config");

        let client = ClientBuilder::new(base)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            semaphore: Arc::new(Semaphore::new(fetch_workers.max(1))),
            fetch_timeout,
        }
    }

    /// Fetch and decode every source concurrently, bounded by `FETCH_WORKERS`.
    /// Failing sources contribute nothing and never abort the run.
    pub async fn fetch_all(&self, sources: &[SourceEntry]) -> Vec<String> {
        let mut set = tokio::task::JoinSet::new();

        for entry in sources.to_vec() {
            let client = self.client.clone();
            let permit = self.semaphore.clone();
            let timeout = self.fetch_timeout;
            set.spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                fetch_one(&client, &entry, timeout).await
            });
        }

        let mut bodies = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(body)) => bodies.push(body),
                Ok(None) => {}
                Err(e) => warn!("ingest task panicked: {e}"),
            }
        }
        bodies
    }
}

async fn fetch_one(
    client: &ClientWithMiddleware,
    entry: &SourceEntry,
    timeout: Duration,
) -> Option<String> {
    let resp = tokio::time::timeout(timeout, client.get(&entry.url).send())
        .await
        .ok()?
        .ok()?;

    let bytes = tokio::time::timeout(timeout, resp.bytes()).await.ok()?.ok()?;
    let truncated = bytes.len() > MAX_BODY_BYTES;
    let slice = if truncated { &bytes[..MAX_BODY_BYTES] } else { &bytes[..] };
    if truncated {
        debug!(url = %entry.url, size = bytes.len(), "source body over limit, parsing first 10 MiB");
    }
    let raw = String::from_utf8_lossy(slice).into_owned();
    decode_body(&raw, entry.base64_hint)
}

fn has_uri(text: &str) -> bool {
    !extract_uris(text).is_empty()
}

fn try_base64_rounds(text: &str, rounds: usize) -> Option<String> {
    let mut current = text.to_string();
    for _ in 0..rounds {
        current = decode_base64_lenient(&current)?;
        if has_uri(&current) {
            return Some(current);
        }
    }
    None
}

fn decode_base64_lenient(input: &str) -> Option<String> {
    let clean: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    for engine in [&STANDARD as &dyn base64::Engine, &URL_SAFE, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(&clean) {
            if let Ok(s) = String::from_utf8(bytes) {
                return Some(s);
            }
        }
    }
    None
}

/// Decoding algorithm per §4.1: hinted sources try up to two base64 rounds
/// before falling back to the raw body; unhinted sources prefer the raw
/// body if it already contains URIs, else attempt the same rounds.
fn decode_body(raw: &str, base64_hint: bool) -> Option<String> {
    if base64_hint {
        if let Some(decoded) = try_base64_rounds(raw, 2) {
            return Some(decoded);
        }
        return Some(raw.to_string());
    }

    if has_uri(raw) {
        return Some(raw.to_string());
    }
    try_base64_rounds(raw, 2).or_else(|| Some(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_body_with_uris_passes_through_unhinted() {
        let body = "vless://a@1.2.3.4:443?security=tls#n1\n";
        assert_eq!(decode_body(body, false), Some(body.to_string()));
    }

    #[test]
    fn base64_hinted_body_decodes_to_uri_list() {
        let inner = "vmess://abc\ntrojan://pass@h:443#t\n";
        let encoded = STANDARD.encode(inner);
        assert_eq!(decode_body(&encoded, true), Some(inner.to_string()));
    }

    #[test]
    fn unhinted_body_without_uris_attempts_decode() {
        let inner = "ss://x@1.2.3.4:1080#a\n";
        let encoded = STANDARD.encode(inner);
        assert_eq!(decode_body(&encoded, false), Some(inner.to_string()));
    }

    #[test]
    fn garbage_falls_back_to_raw_text() {
        let body = "not base64 and no uris here";
        assert_eq!(decode_body(body, false), Some(body.to_string()));
    }

    #[test]
    fn double_encoded_body_resolves_within_two_rounds() {
        let inner = "trojan://pass@h:443#t\n";
        let once = STANDARD.encode(inner);
        let twice = STANDARD.encode(once);
        assert_eq!(decode_body(&twice, true), Some(inner.to_string()));
    }
}
