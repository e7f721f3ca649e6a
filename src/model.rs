//! Data model (§3)
//!
//! `ProxyUri` / `ParsedProxy` / `HostStreak` / `CheckCount` — the value
//! types flowing through the pipeline. Dynamic typing in the original
//! (`scheme` as a bare string, poked dictionaries) becomes a tagged
//! variant here, per §9's "Dynamic typing → tagged variants" design note.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// An opaque scheme-prefixed proxy URI. Immutable; identified by its full
/// string and by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyUri(pub String);

impl ProxyUri {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 20-byte SHA-1 digest of the UTF-8 bytes of the URI.
    pub fn content_hash(&self) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(self.0.as_bytes());
        hasher.finalize().into()
    }

    pub fn content_hash_hex(&self) -> String {
        hex_encode(&self.content_hash())
    }

    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(s, _)| s)
    }
}

impl fmt::Display for ProxyUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        out.push((hi * 16 + lo) as u8);
    }
    Some(out)
}

/// Ten supported proxy-URI scheme variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Vmess,
    Vless,
    Trojan,
    Ss,
    Ssr,
    Hysteria,
    Hysteria2,
    Hy2,
    Tuic,
    Juicity,
}

impl Scheme {
    pub const ALL: [Scheme; 10] = [
        Scheme::Vmess,
        Scheme::Vless,
        Scheme::Trojan,
        Scheme::Ss,
        Scheme::Ssr,
        Scheme::Hysteria,
        Scheme::Hysteria2,
        Scheme::Hy2,
        Scheme::Tuic,
        Scheme::Juicity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Vmess => "vmess",
            Scheme::Vless => "vless",
            Scheme::Trojan => "trojan",
            Scheme::Ss => "ss",
            Scheme::Ssr => "ssr",
            Scheme::Hysteria => "hysteria",
            Scheme::Hysteria2 => "hysteria2",
            Scheme::Hy2 => "hy2",
            Scheme::Tuic => "tuic",
            Scheme::Juicity => "juicity",
        }
    }

    pub fn parse(s: &str) -> Option<Scheme> {
        Scheme::ALL.into_iter().find(|sc| sc.as_str().eq_ignore_ascii_case(s))
    }

    /// Schemes with a genuine TCP-native transport, eligible for Stage 2.
    pub fn is_tcp_native(&self) -> bool {
        matches!(
            self,
            Scheme::Vmess | Scheme::Vless | Scheme::Trojan | Scheme::Ss | Scheme::Ssr
        )
    }
}

/// Derived, transient-per-run view of a `ProxyUri`.
#[derive(Debug, Clone)]
pub struct ParsedProxy {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    pub tls_hint: bool,
    pub remark: String,
    /// Scheme-dependent credential: vmess/vless UUID, trojan/ss password
    /// (`method:pass` for ss). Opaque outside `stage3::config`, which is
    /// the only consumer that needs to render it into a core config.
    pub auth: String,
}

/// Per-host success-streak record (§3, §4.7).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HostStreak {
    pub streak: u64,
    pub last_test: u64,
    pub last_success: u64,
}

impl HostStreak {
    pub fn record_success(&mut self, now: u64) {
        self.last_test = now;
        self.streak += 1;
        self.last_success = now;
    }

    pub fn record_failure(&mut self, now: u64) {
        self.last_test = now;
        self.streak = 0;
    }
}

/// Per-URI revalidation counter used only by the geo-restricted "Iran
/// variant" selection (§3). Incremented once per incumbent-revalidation
/// cycle for URIs that are still present in the incumbent ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckCount(pub u64);

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_round_trips_through_hex() {
        let uri = ProxyUri::new("ss://YWVzLTI1Ni1nY206cGFzcw==@5.6.7.8:8388#x");
        let hex = uri.content_hash_hex();
        let bytes = hex_decode(&hex).unwrap();
        assert_eq!(bytes, uri.content_hash().to_vec());
    }

    #[test]
    fn streak_resets_on_failure_and_increments_on_success() {
        let mut h = HostStreak::default();
        h.record_success(10);
        h.record_success(20);
        h.record_success(30);
        assert_eq!(h.streak, 3);
        h.record_failure(40);
        assert_eq!(h.streak, 0);
        assert_eq!(h.last_success, 30);
        assert_eq!(h.last_test, 40);
    }

    #[test]
    fn scheme_round_trips_through_str() {
        for sc in Scheme::ALL {
            assert_eq!(Scheme::parse(sc.as_str()), Some(sc));
        }
    }
}
