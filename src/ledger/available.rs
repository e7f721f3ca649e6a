//! AvailableLedger (§4.9): the flat `output/all_valid_proxies.txt` file,
//! plus its `kind/<scheme>.txt` and `country/<CC>.txt` grouped views.
//!
//! Remark format: `[OpenRay] <flag> <CC>-<N>`, `N` a per-country monotonic
//! counter recovered by scanning existing remarks for the highest `N` seen.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::ledger::atomic_write;
use crate::model::{ProxyUri, Scheme};
use crate::uri::parse::decode_base64_auto;

static REMARK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[OpenRay\] .+ ([A-Z]{2})-(\d+)").expect("valid regex"));

fn cc_flag_emoji(cc: &str) -> String {
    let upper = cc.to_ascii_uppercase();
    let mut chars = upper.chars();
    match (chars.next(), chars.next()) {
        (Some(a), Some(b)) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            let base = 0x1F1E6u32 - b'A' as u32;
            let ra = char::from_u32(base + a as u32);
            let rb = char::from_u32(base + b as u32);
            match (ra, rb) {
                (Some(ra), Some(rb)) => format!("{ra}{rb}"),
                _ => "🏳".to_string(),
            }
        }
        _ => "🏳".to_string(),
    }
}

pub struct AvailableLedger {
    path: PathBuf,
    output_dir: PathBuf,
}

impl AvailableLedger {
    pub fn new(path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn load(&self) -> Vec<String> {
        std::fs::read_to_string(&self.path)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Highest per-country counter observed across the current lines, keyed
    /// by country code, so the next append can pick `max+1`.
    pub fn country_counters(lines: &[String]) -> HashMap<String, u64> {
        let mut counters = HashMap::new();
        for line in lines {
            let Some(remark) = line_remark(line) else { continue };
            if let Some(caps) = REMARK_REGEX.captures(&remark) {
                let cc = caps[1].to_string();
                let n: u64 = caps[2].parse().unwrap_or(0);
                let entry = counters.entry(cc).or_insert(0u64);
                if n >= *entry {
                    *entry = n + 1;
                }
            }
        }
        counters
    }

    /// Rewrite a validated URI's remark to `[OpenRay] <flag> <CC>-<N>`.
    pub fn rewrite_remark(uri: &ProxyUri, scheme: Scheme, cc: &str, n: u64) -> ProxyUri {
        let label = format!("[OpenRay] {} {cc}-{n}", cc_flag_emoji(cc));
        match scheme {
            Scheme::Vmess => rewrite_vmess_remark(uri, &label).unwrap_or_else(|| uri.clone()),
            _ => rewrite_fragment_remark(uri, &label).unwrap_or_else(|| uri.clone()),
        }
    }

    /// Append newly geo-tagged URIs, then regroup the whole ledger by
    /// country (preserving first-seen CC order and within-CC order), and
    /// rewrite the `kind/` and `country/` grouped views.
    pub fn append_and_regroup(
        &self,
        existing: Vec<String>,
        new_entries: Vec<(String, Scheme, String)>,
    ) -> std::io::Result<()> {
        let mut all: Vec<(String, Scheme, String)> = Vec::with_capacity(existing.len() + new_entries.len());
        for line in existing {
            let scheme = line
                .split_once("://")
                .and_then(|(s, _)| Scheme::parse(s))
                .unwrap_or(Scheme::Vless);
            let cc = line_remark(&line)
                .and_then(|r| REMARK_REGEX.captures(&r).map(|c| c[1].to_string()))
                .unwrap_or_else(|| "XX".to_string());
            all.push((line, scheme, cc));
        }
        all.extend(new_entries);

        let mut order: Vec<String> = Vec::new();
        let mut by_cc: HashMap<String, Vec<String>> = HashMap::new();
        for (line, _, cc) in &all {
            by_cc.entry(cc.clone()).or_insert_with(|| {
                order.push(cc.clone());
                Vec::new()
            });
            by_cc.get_mut(cc).unwrap().push(line.clone());
        }

        let mut regrouped = Vec::with_capacity(all.len());
        for cc in &order {
            regrouped.extend(by_cc[cc].iter().cloned());
        }

        let body = regrouped.join("\n");
        let body = if body.is_empty() { body } else { format!("{body}\n") };
        atomic_write(&self.path, body.as_bytes())?;

        self.write_kind_views(&all)?;
        self.write_country_views(&all)?;
        Ok(())
    }

    fn write_kind_views(&self, all: &[(String, Scheme, String)]) -> std::io::Result<()> {
        let mut by_kind: HashMap<Scheme, Vec<&str>> = HashMap::new();
        for (line, scheme, _) in all {
            by_kind.entry(*scheme).or_default().push(line.as_str());
        }
        let dir = self.output_dir.join("kind");
        std::fs::create_dir_all(&dir)?;
        if let Ok(existing) = std::fs::read_dir(&dir) {
            for entry in existing.flatten() {
                let _ = std::fs::remove_file(entry.path());
            }
        }
        for (scheme, lines) in by_kind {
            let path = dir.join(format!("{}.txt", scheme.as_str()));
            let body = format!("{}\n", lines.join("\n"));
            atomic_write(&path, body.as_bytes())?;
        }
        Ok(())
    }

    fn write_country_views(&self, all: &[(String, Scheme, String)]) -> std::io::Result<()> {
        let mut by_cc: HashMap<&str, Vec<&str>> = HashMap::new();
        for (line, _, cc) in all {
            by_cc.entry(cc.as_str()).or_default().push(line.as_str());
        }
        let dir = self.output_dir.join("country");
        std::fs::create_dir_all(&dir)?;
        if let Ok(existing) = std::fs::read_dir(&dir) {
            for entry in existing.flatten() {
                let _ = std::fs::remove_file(entry.path());
            }
        }
        for (cc, lines) in by_cc {
            let path = dir.join(format!("{cc}.txt"));
            let body = format!("{}\n", lines.join("\n"));
            atomic_write(&path, body.as_bytes())?;
        }
        Ok(())
    }
}

/// Recover a line's decoded remark the same way `uri::parse::parse_proxy`
/// derives it, so country-counter scans see `[OpenRay] ...` text rather
/// than the raw percent-encoded URL fragment.
fn line_remark(line: &str) -> Option<String> {
    crate::uri::parse_proxy(&ProxyUri::new(line.to_string())).map(|p| p.remark)
}

fn rewrite_vmess_remark(uri: &ProxyUri, label: &str) -> Option<ProxyUri> {
    let body = uri.as_str().strip_prefix("vmess://")?;
    let decoded = decode_base64_auto(body)?;
    let mut v: Value = serde_json::from_str(&decoded).ok()?;
    v["ps"] = Value::String(label.to_string());
    let reencoded = serde_json::to_string(&v).ok()?;
    Some(ProxyUri::new(format!("vmess://{}", STANDARD.encode(reencoded))))
}

fn rewrite_fragment_remark(uri: &ProxyUri, label: &str) -> Option<ProxyUri> {
    let mut url = Url::parse(uri.as_str()).ok()?;
    url.set_fragment(Some(label));
    Some(ProxyUri::new(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_emoji_encodes_regional_indicators() {
        let flag = cc_flag_emoji("us");
        assert_eq!(flag.chars().count(), 2);
    }

    #[test]
    fn country_counters_picks_max_plus_one() {
        let high = AvailableLedger::rewrite_remark(
            &ProxyUri::new("vless://a@h.example:443#old".to_string()),
            Scheme::Vless,
            "US",
            3,
        );
        let low = AvailableLedger::rewrite_remark(
            &ProxyUri::new("vless://a@h.example:443#old".to_string()),
            Scheme::Vless,
            "US",
            1,
        );
        let lines = vec![high.as_str().to_string(), low.as_str().to_string()];
        let counters = AvailableLedger::country_counters(&lines);
        assert_eq!(counters.get("US"), Some(&4));
    }

    #[test]
    fn rewrite_fragment_remark_replaces_label() {
        let uri = ProxyUri::new("vless://a@h.example:443#old".to_string());
        let rewritten = AvailableLedger::rewrite_remark(&uri, Scheme::Vless, "US", 1);
        assert!(rewritten.as_str().contains("OpenRay"));
        assert!(!rewritten.as_str().ends_with("#old"));
    }

    #[test]
    fn rewrite_vmess_remark_edits_ps_field() {
        let json = r#"{"add":"1.2.3.4","port":443,"id":"u","ps":"old"}"#;
        let uri = ProxyUri::new(format!("vmess://{}", STANDARD.encode(json)));
        let rewritten = AvailableLedger::rewrite_remark(&uri, Scheme::Vmess, "DE", 2);
        let body = rewritten.as_str().strip_prefix("vmess://").unwrap();
        let decoded = decode_base64_auto(body).unwrap();
        assert!(decoded.contains("DE-2"));
    }

    #[test]
    fn regroup_preserves_first_seen_country_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AvailableLedger::new(dir.path().join("all.txt"), dir.path().join("out"));
        let entries = vec![
            ("line-de".to_string(), Scheme::Vless, "DE".to_string()),
            ("line-us".to_string(), Scheme::Vless, "US".to_string()),
            ("line-de-2".to_string(), Scheme::Vless, "DE".to_string()),
        ];
        ledger.append_and_regroup(Vec::new(), entries).unwrap();
        let body = std::fs::read_to_string(dir.path().join("all.txt")).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines, vec!["line-de", "line-de-2", "line-us"]);
    }
}
