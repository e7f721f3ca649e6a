//! Sources file parsing (§6): `URL[,flag]*` lines, `#` starts a comment.

use std::path::Path;

use crate::error::{HarvestError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub url: String,
    pub base64_hint: bool,
}

pub fn parse_source_line(line: &str) -> Option<SourceEntry> {
    let mut parts = line.split(',').map(str::trim).filter(|p| !p.is_empty());
    let url = parts.next()?.to_string();
    let base64_hint = parts.any(|p| p.eq_ignore_ascii_case("base64"));
    Some(SourceEntry { url, base64_hint })
}

pub async fn load_sources(path: &Path) -> Result<Vec<SourceEntry>> {
    if !path.exists() {
        return Err(HarvestError::MissingSources(path.display().to_string()));
    }
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(parse_source_line)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_url() {
        let e = parse_source_line("https://example/sub").unwrap();
        assert_eq!(e.url, "https://example/sub");
        assert!(!e.base64_hint);
    }

    #[test]
    fn parses_base64_flag() {
        let e = parse_source_line("https://example/sub,base64").unwrap();
        assert_eq!(e.url, "https://example/sub");
        assert!(e.base64_hint);
    }

    #[test]
    fn ignores_unknown_flags() {
        let e = parse_source_line("https://example/sub, weird , base64").unwrap();
        assert!(e.base64_hint);
    }

    #[test]
    fn empty_line_yields_none() {
        assert!(parse_source_line("").is_none());
    }
}
