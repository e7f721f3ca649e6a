//! Dedup Ledger (§4.3): rotated hash segments, binary-or-text, union-of-all
//! semantics. Binary format is canonical (`uint64 BE timestamp || 20-byte
//! SHA-1 digest`, no header, no separator); text format is a fallback of
//! one hex digest per line, used when a binary append fails.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::model::{hex_decode, hex_encode, now_unix};

const ROTATE_AT_BYTES: u64 = 50 * 1024 * 1024;
const ENTRY_LEN: usize = 8 + 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentFormat {
    Binary,
    Text,
}

#[derive(Debug, Clone)]
struct Segment {
    path: PathBuf,
    format: SegmentFormat,
    index: u32,
}

pub struct TestedLedger {
    dir: PathBuf,
    base_name: String,
}

impl TestedLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base_name: "tested".to_string(),
        }
    }

    fn segment_name(&self, index: u32, format: SegmentFormat) -> PathBuf {
        let ext = match format {
            SegmentFormat::Binary => "bin",
            SegmentFormat::Text => "txt",
        };
        let name = if index == 0 {
            format!("{}.{ext}", self.base_name)
        } else {
            format!("{}_{index}.{ext}", self.base_name)
        };
        self.dir.join(name)
    }

    fn discover_segments(&self) -> Vec<Segment> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
                continue;
            };
            let format = match ext {
                "bin" => SegmentFormat::Binary,
                "txt" => SegmentFormat::Text,
                _ => continue,
            };
            let index = if stem == self.base_name {
                Some(0)
            } else {
                stem.strip_prefix(&format!("{}_", self.base_name))
                    .and_then(|n| n.parse::<u32>().ok())
            };
            if let Some(index) = index {
                out.push(Segment { path, format, index });
            }
        }
        out.sort_by_key(|s| s.index);
        out
    }

    /// Read all rotation segments (binary and text), return their union.
    pub fn load(&self) -> HashSet<[u8; 20]> {
        let mut set = HashSet::new();
        for seg in self.discover_segments() {
            match seg.format {
                SegmentFormat::Binary => {
                    if let Ok(bytes) = std::fs::read(&seg.path) {
                        for chunk in bytes.chunks_exact(ENTRY_LEN) {
                            let mut digest = [0u8; 20];
                            digest.copy_from_slice(&chunk[8..]);
                            set.insert(digest);
                        }
                    }
                }
                SegmentFormat::Text => {
                    if let Ok(text) = std::fs::read_to_string(&seg.path) {
                        for line in text.lines() {
                            if let Some(bytes) = hex_decode(line.trim()) {
                                if bytes.len() == 20 {
                                    let mut digest = [0u8; 20];
                                    digest.copy_from_slice(&bytes);
                                    set.insert(digest);
                                }
                            }
                        }
                    }
                }
            }
        }
        set
    }

    pub fn contains(&self, set: &HashSet<[u8; 20]>, digest: &[u8; 20]) -> bool {
        set.contains(digest)
    }

    fn active_segment(&self) -> Segment {
        let segments = self.discover_segments();
        match segments.into_iter().max_by_key(|s| s.index) {
            Some(seg) => seg,
            None => Segment {
                path: self.segment_name(0, SegmentFormat::Binary),
                format: SegmentFormat::Binary,
                index: 0,
            },
        }
    }

    fn rotated(&self, seg: &Segment) -> Segment {
        Segment {
            path: self.segment_name(seg.index + 1, seg.format),
            format: seg.format,
            index: seg.index + 1,
        }
    }

    /// Append only hashes not already present in `known`. Rotates to a new
    /// segment first if the active segment is at or past 50 MB.
    pub fn append(&self, known: &mut HashSet<[u8; 20]>, hashes: &[[u8; 20]]) -> std::io::Result<()> {
        let fresh: Vec<[u8; 20]> = hashes.iter().copied().filter(|h| !known.contains(h)).collect();
        if fresh.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir)?;
        let mut seg = self.active_segment();
        if let Ok(meta) = std::fs::metadata(&seg.path) {
            if meta.len() >= ROTATE_AT_BYTES {
                seg = self.rotated(&seg);
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        use std::io::Write;
        let result = (|| -> std::io::Result<()> {
            match seg.format {
                SegmentFormat::Binary => {
                    let mut file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&seg.path)?;
                    for digest in &fresh {
                        file.write_all(&now.to_be_bytes())?;
                        file.write_all(digest)?;
                    }
                    Ok(())
                }
                SegmentFormat::Text => {
                    let mut file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&seg.path)?;
                    for digest in &fresh {
                        writeln!(file, "{}", hex_encode(digest))?;
                    }
                    Ok(())
                }
            }
        })();

        if let Err(e) = &result {
            warn!("binary tested-ledger append failed, falling back to text: {e}");
            let text_path = self.segment_name(seg.index, SegmentFormat::Text);
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&text_path)?;
            for digest in &fresh {
                writeln!(file, "{}", hex_encode(digest))?;
            }
        }

        known.extend(fresh);
        Ok(())
    }

    /// Best-effort one-shot conversion of text segments to binary.
    /// Failure is non-fatal: the text segment is left in place.
    pub fn migrate(&self) {
        let now = now_unix();
        for seg in self.discover_segments() {
            if seg.format != SegmentFormat::Text {
                continue;
            }
            if let Err(e) = self.migrate_one(&seg, now) {
                warn!(path = %seg.path.display(), "tested-ledger migration failed: {e}");
            }
        }
    }

    fn migrate_one(&self, seg: &Segment, now: u64) -> std::io::Result<()> {
        let text = std::fs::read_to_string(&seg.path)?;
        let mut binary = Vec::new();
        for line in text.lines() {
            if let Some(bytes) = hex_decode(line.trim()) {
                if bytes.len() == 20 {
                    binary.extend_from_slice(&now.to_be_bytes());
                    binary.extend_from_slice(&bytes);
                }
            }
        }
        let bin_path = self.segment_name(seg.index, SegmentFormat::Binary);
        crate::ledger::atomic_write(&bin_path, &binary)?;
        std::fs::remove_file(&seg.path)?;
        Ok(())
    }

    /// Drop entries older than `days`. Requires binary segments (text
    /// entries carry no timestamp and are left untouched).
    pub fn cleanup(&self, days: u64) -> std::io::Result<()> {
        let cutoff = now_unix().saturating_sub(days * 86_400);
        for seg in self.discover_segments() {
            if seg.format != SegmentFormat::Binary {
                continue;
            }
            let bytes = std::fs::read(&seg.path)?;
            let mut kept = Vec::with_capacity(bytes.len());
            for chunk in bytes.chunks_exact(ENTRY_LEN) {
                let ts = u64::from_be_bytes(chunk[..8].try_into().unwrap());
                if ts >= cutoff {
                    kept.extend_from_slice(chunk);
                }
            }
            crate::ledger::atomic_write(&seg.path, &kept)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn path_for_test(&self, index: u32, binary: bool) -> PathBuf {
        self.segment_name(
            index,
            if binary { SegmentFormat::Binary } else { SegmentFormat::Text },
        )
    }
}

pub fn digests_for(uris: &[crate::model::ProxyUri]) -> Vec<[u8; 20]> {
    uris.iter().map(|u| u.content_hash()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProxyUri;

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TestedLedger::new(dir.path());
        let mut known = ledger.load();
        assert!(known.is_empty());

        let uris = vec![ProxyUri::new("ss://a@1:1#a"), ProxyUri::new("ss://b@2:2#b")];
        let hashes = digests_for(&uris);
        ledger.append(&mut known, &hashes).unwrap();

        let reloaded = ledger.load();
        assert_eq!(reloaded.len(), 2);
        for h in &hashes {
            assert!(reloaded.contains(h));
        }
    }

    #[test]
    fn append_skips_already_known_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TestedLedger::new(dir.path());
        let mut known = ledger.load();
        let h = ProxyUri::new("ss://a@1:1#a").content_hash();
        ledger.append(&mut known, &[h]).unwrap();
        ledger.append(&mut known, &[h]).unwrap();

        let bytes = std::fs::read(ledger.path_for_test(0, true)).unwrap();
        assert_eq!(bytes.len(), ENTRY_LEN);
    }

    #[test]
    fn migrate_converts_text_segment_to_binary() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TestedLedger::new(dir.path());
        let h = ProxyUri::new("ss://a@1:1#a").content_hash();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(ledger.path_for_test(0, false), format!("{}\n", hex_encode(&h))).unwrap();

        ledger.migrate();

        assert!(!ledger.path_for_test(0, false).exists());
        assert!(ledger.path_for_test(0, true).exists());
        let reloaded = ledger.load();
        assert!(reloaded.contains(&h));
    }

    #[test]
    fn cleanup_drops_stale_binary_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TestedLedger::new(dir.path());
        let old_digest = [1u8; 20];
        let fresh_digest = [2u8; 20];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&old_digest);
        bytes.extend_from_slice(&now_unix().to_be_bytes());
        bytes.extend_from_slice(&fresh_digest);
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(ledger.path_for_test(0, true), bytes).unwrap();

        ledger.cleanup(1).unwrap();

        let reloaded = ledger.load();
        assert!(!reloaded.contains(&old_digest));
        assert!(reloaded.contains(&fresh_digest));
    }
}
