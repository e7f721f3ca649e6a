//! Persistent state (§4.3, §4.7, §4.9, §6 persistent paths).

pub mod available;
pub mod streaks;
pub mod tested;

pub use available::AvailableLedger;
pub use streaks::StreakStore;
pub use tested::TestedLedger;

use std::path::{Path, PathBuf};

/// Write `contents` to `path` atomically: write to a sibling temp file, then
/// rename over the destination. Matches the write-temp-then-rename
/// discipline spec §5/§7 requires of every non-append write.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp: PathBuf = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
