//! URI extraction and per-scheme parsing (§4.2)

pub mod parse;

pub use parse::parse_proxy;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{ProxyUri, Scheme};

/// Trailing characters stripped from a matched URI (spec §4.2).
const TRAILING_STRIP: &[char] = &[')', '>', ',', ';', '"', '\'', '\n', '\r'];

static URI_REGEX: Lazy<Regex> = Lazy::new(|| {
    let schemes = Scheme::ALL
        .iter()
        .map(|s| regex::escape(s.as_str()))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r#"(?i)\b(?:{schemes})://[^\s<>"']+"#)).expect("static regex is valid")
});

/// Extract an order-preserving, deduplicated list of proxy URIs from free
/// text. Matches `(?i)\b(SCHEME)://[^\s<>"']+` for each supported scheme.
pub fn extract_uris(text: &str) -> Vec<ProxyUri> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for m in URI_REGEX.find_iter(text) {
        let trimmed = m.as_str().trim_end_matches(TRAILING_STRIP);
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(ProxyUri::new(trimmed));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_dedupes_preserving_order() {
        let text = "see vless://a@1.2.3.4:443?security=tls#n1 and also \
                     trojan://p@h:443#t), then vless://a@1.2.3.4:443?security=tls#n1 again";
        let uris = extract_uris(text);
        assert_eq!(uris.len(), 2);
        assert_eq!(uris[0].as_str(), "vless://a@1.2.3.4:443?security=tls#n1");
        assert_eq!(uris[1].as_str(), "trojan://p@h:443#t");
    }

    #[test]
    fn strips_trailing_punctuation() {
        let text = "(see vless://a@1.2.3.4:443#n1), done.";
        let uris = extract_uris(text);
        assert_eq!(uris[0].as_str(), "vless://a@1.2.3.4:443#n1");
    }

    #[test]
    fn duplicate_multiplicity_collapses_to_unique_count() {
        let text = "ss://x@1:1#a ss://x@1:1#a ss://x@1:1#a ss://y@2:2#b";
        let uris = extract_uris(text);
        assert_eq!(uris.len(), 2);
    }

    #[test]
    fn is_case_insensitive_on_scheme() {
        let text = "VLESS://a@1.2.3.4:443#n";
        let uris = extract_uris(text);
        assert_eq!(uris.len(), 1);
    }
}
