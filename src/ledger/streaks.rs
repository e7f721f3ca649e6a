//! Streak store (§4.7): `.state/streaks.json`, `{ host: HostStreak }`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::ledger::atomic_write;
use crate::model::HostStreak;

pub struct StreakStore {
    path: PathBuf,
}

impl StreakStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the streak map; a missing or corrupt file yields an empty map
    /// (JSON state-save failures are logged and swallowed, never fatal).
    pub fn load(&self) -> HashMap<String, HostStreak> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, streaks: &HashMap<String, HostStreak>) -> std::io::Result<()> {
        let body = serde_json::to_vec_pretty(streaks)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        atomic_write(&self.path, &body)
    }

    /// Apply one observation per host this run. Outage guard: if `outage`
    /// is true (zero successes and pre-flight connectivity would now
    /// fail), the whole update is skipped to avoid resetting every streak
    /// during a local network outage.
    pub fn apply_observations(
        &self,
        streaks: &mut HashMap<String, HostStreak>,
        observations: &HashMap<String, bool>,
        now: u64,
        outage: bool,
    ) {
        if outage {
            return;
        }
        for (host, &success) in observations {
            let entry = streaks.entry(host.clone()).or_default();
            if success {
                entry.record_success(now);
            } else {
                entry.record_failure(now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StreakStore::new(dir.path().join("streaks.json"));
        let mut streaks = HashMap::new();
        streaks.insert("host.example".to_string(), HostStreak { streak: 3, last_test: 10, last_success: 10 });
        store.save(&streaks).unwrap();

        let reloaded = store.load();
        assert_eq!(reloaded["host.example"].streak, 3);
    }

    #[test]
    fn missing_file_loads_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = StreakStore::new(dir.path().join("missing.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn outage_guard_skips_update() {
        let mut streaks = HashMap::new();
        streaks.insert("h".to_string(), HostStreak { streak: 5, last_test: 1, last_success: 1 });
        let store = StreakStore::new("unused.json");
        let mut obs = HashMap::new();
        obs.insert("h".to_string(), false);
        store.apply_observations(&mut streaks, &obs, 99, true);
        assert_eq!(streaks["h"].streak, 5);
        assert_eq!(streaks["h"].last_test, 1);
    }

    #[test]
    fn success_increments_and_failure_resets() {
        let mut streaks = HashMap::new();
        let store = StreakStore::new("unused.json");
        let mut obs = HashMap::new();
        obs.insert("h".to_string(), true);
        store.apply_observations(&mut streaks, &obs, 10, false);
        assert_eq!(streaks["h"].streak, 1);

        let mut obs2 = HashMap::new();
        obs2.insert("h".to_string(), false);
        store.apply_observations(&mut streaks, &obs2, 20, false);
        assert_eq!(streaks["h"].streak, 0);
        assert_eq!(streaks["h"].last_test, 20);
    }
}
