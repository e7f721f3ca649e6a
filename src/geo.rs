//! Geo-Tagger (§4.9). Country-code resolution for a validated host.
//!
//! The GeoLite2 MMDB reader is explicitly out of scope (§1: "treat as
//! external collaborators") — `GeoLookup` is the seam a caller could plug
//! an MMDB-backed implementation into. What we fully implement here is the
//! documented HTTP fallback: a single `ip-api.com` lookup with a small
//! in-memory cache. Unknown resolves to `"XX"`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::debug;

const UNKNOWN_CC: &str = "XX";

/// A pluggable country-code resolver. The MMDB-backed variant (local
/// database, no network call) is left unimplemented per §1 — only the
/// HTTP-fallback path below has a concrete implementation.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Option<String>;
}

#[derive(Deserialize)]
struct IpApiResponse {
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

/// Batch response shape for `ip-api.com/batch`. Documented in §6's
/// on-wire-formats list, but no caller currently needs batched lookups — a
/// single cache-checked call per host is enough at our request volume. Kept
/// here so a future caller can switch without inventing the wire shape.
#[derive(Deserialize)]
#[allow(dead_code)]
struct IpApiBatchEntry {
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
}

pub struct HttpGeoTagger {
    client: ClientWithMiddleware,
    cache: Arc<Mutex<HashMap<IpAddr, String>>>,
}

impl HttpGeoTagger {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self {
            client,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn resolve(&self, ip: IpAddr) -> String {
        if let Some(cc) = self.cache.lock().get(&ip).cloned() {
            return cc;
        }

        let cc = self.fetch(ip).await.unwrap_or_else(|| UNKNOWN_CC.to_string());
        self.cache.lock().insert(ip, cc.clone());
        cc
    }

    async fn fetch(&self, ip: IpAddr) -> Option<String> {
        let url = format!("http://ip-api.com/json/{ip}?fields=countryCode");
        let resp = self.client.get(&url).send().await.ok()?;
        let body: IpApiResponse = resp.json().await.ok()?;
        let cc = body.country_code?;
        if cc.len() == 2 {
            debug!(%ip, %cc, "geo-tagged via ip-api");
            Some(cc.to_uppercase())
        } else {
            None
        }
    }
}

/// Resolve a country code for a hostname: try each resolved address against
/// `lookup` first (MMDB seam), falling back to the HTTP tagger. Unknown
/// addresses (or unresolvable hosts) yield `"XX"`.
pub async fn resolve_country(
    host: &str,
    mmdb: Option<&dyn GeoLookup>,
    http: &HttpGeoTagger,
) -> String {
    let addrs = crate::net_util::resolve_ordered(host, 0).await;
    let Some(first) = addrs.first() else {
        return UNKNOWN_CC.to_string();
    };
    let ip = first.ip();

    if let Some(mmdb) = mmdb {
        if let Some(cc) = mmdb.lookup(ip) {
            return cc;
        }
    }
    http.resolve(ip).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysDe;
    impl GeoLookup for AlwaysDe {
        fn lookup(&self, _ip: IpAddr) -> Option<String> {
            Some("DE".to_string())
        }
    }

    #[test]
    fn cache_starts_empty() {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let tagger = HttpGeoTagger::new(client);
        assert!(tagger.cache.lock().is_empty());
    }

    #[tokio::test]
    async fn mmdb_seam_short_circuits_http_lookup() {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let tagger = HttpGeoTagger::new(client);
        let mmdb = AlwaysDe;
        let cc = resolve_country("localhost", Some(&mmdb), &tagger).await;
        assert_eq!(cc, "DE");
    }
}
