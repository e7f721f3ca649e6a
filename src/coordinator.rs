//! Pipeline Coordinator (§4.10): a sequential per-run state machine, not a
//! concurrent actor system — each stage fully completes before the next
//! begins, with the Coordinator alone owning ledger writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::geo::{self, HttpGeoTagger};
use crate::ingest::Ingestor;
use crate::ledger::{AvailableLedger, StreakStore, TestedLedger};
use crate::model::{ProxyUri, Scheme, now_unix};
use crate::revalidate::revalidate;
use crate::sources::load_sources;
use crate::uri::{extract_uris, parse_proxy};

pub const EXIT_OK: i32 = 0;
pub const EXIT_MISSING_SOURCES: i32 = 1;
pub const EXIT_NO_CONNECTIVITY: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

const CONNECTIVITY_PROBES: [(&str, u16); 2] = [("1.1.1.1", 443), ("8.8.8.8", 53)];

async fn connectivity_ok() -> bool {
    for (ip, port) in CONNECTIVITY_PROBES {
        let addr = format!("{ip}:{port}");
        if tokio::time::timeout(Duration::from_secs(2), tokio::net::TcpStream::connect(&addr))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

pub struct Coordinator {
    cfg: AppConfig,
}

impl Coordinator {
    pub fn new(cfg: AppConfig) -> Self {
        Self { cfg }
    }

    pub async fn run(&self, cancel: CancellationToken) -> i32 {
        info!("pipeline starting");

        if !self.cfg.sources_path.exists() {
            warn!(path = %self.cfg.sources_path.display(), "sources file missing");
            return EXIT_MISSING_SOURCES;
        }

        if !connectivity_ok().await {
            warn!("no connectivity at pre-flight; no ledger touched");
            return EXIT_NO_CONNECTIVITY;
        }
        if cancel.is_cancelled() {
            return EXIT_INTERRUPTED;
        }

        let state_dir = std::path::PathBuf::from(".state");
        let output_dir = std::path::PathBuf::from("output");

        let tested = TestedLedger::new(&state_dir);
        tested.migrate();
        let mut known_hashes = tested.load();

        let available = AvailableLedger::new(output_dir.join("all_valid_proxies.txt"), &output_dir);
        let streaks_store = StreakStore::new(state_dir.join("streaks.json"));
        let mut streaks = streaks_store.load();

        let stage3_semaphore = Arc::new(Semaphore::new(self.cfg.stage3_workers));

        // Revalidate incumbents (§4.8) before touching new URIs, unless
        // OPENRAY_RECHECK_EXISTING=0 asked us to leave the ledger alone
        // entirely (`original_source/src/main.py`'s `do_recheck` gate). The
        // outage guard re-checks connectivity at this point in time rather
        // than reusing the pre-flight result, since a run can span minutes.
        let mut host_observations: HashMap<String, bool> = HashMap::new();
        let survivors = if self.cfg.recheck_existing {
            let existing_lines = available.load();
            let connectivity_at_revalidate = connectivity_ok().await;
            let (survivors, revalidated_hosts) =
                revalidate(existing_lines, &self.cfg, &stage3_semaphore, connectivity_at_revalidate).await;
            for (host, ok) in revalidated_hosts {
                let entry = host_observations.entry(host).or_insert(false);
                *entry = *entry || ok;
            }
            survivors
        } else {
            available.load()
        };
        if cancel.is_cancelled() {
            return EXIT_INTERRUPTED;
        }

        // Ingest + extract (§4.1, §4.2).
        let Ok(sources) = load_sources(&self.cfg.sources_path).await else {
            return EXIT_MISSING_SOURCES;
        };
        let ingestor = Ingestor::new(self.cfg.fetch_timeout, self.cfg.fetch_workers);
        let bodies = ingestor.fetch_all(&sources).await;
        info!(count = bodies.len(), "fetched source bodies");

        let mut all_uris = Vec::new();
        let mut seen_in_run = std::collections::HashSet::new();
        for body in &bodies {
            for uri in extract_uris(body) {
                if seen_in_run.insert(uri.content_hash()) {
                    all_uris.push(uri);
                }
            }
        }

        // Dedup against the tested ledger (§4.3).
        let mut new_uris: Vec<ProxyUri> = all_uris
            .into_iter()
            .filter(|u| !known_hashes.contains(&u.content_hash()))
            .collect();

        if self.cfg.new_uris_limit_enabled && new_uris.len() > self.cfg.new_uris_limit {
            warn!(
                total = new_uris.len(),
                limit = self.cfg.new_uris_limit,
                "truncating new-URI list to the configured limit"
            );
            new_uris.truncate(self.cfg.new_uris_limit);
        }
        info!(kept = new_uris.len(), "kept X of Y new URIs after dedup");

        if cancel.is_cancelled() {
            return EXIT_INTERRUPTED;
        }

        // Stage 1/2/3 against the new candidates. `host_observations` already
        // carries any incumbent-revalidation results from above; both loops
        // feed the same map, mirroring the single `host_success_run` dict in
        // `original_source/src/main.py`.
        let mut validated: Vec<(ProxyUri, Scheme, String)> = Vec::new();
        let mut stage3_remaining = self.cfg.stage3_max;

        let http_client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let geo_tagger = HttpGeoTagger::new(http_client);

        for uri in &new_uris {
            if cancel.is_cancelled() {
                return EXIT_INTERRUPTED;
            }
            let Some(parsed) = parse_proxy(uri) else { continue };

            // Mirrors pipeline_probe::probe_survives but tracks per-host
            // observations and respects the STAGE3_MAX budget, which the
            // shared helper (used by revalidation) doesn't need to know about.
            let reachable = crate::stage1::is_reachable(&parsed.host, &self.cfg).await;
            let entry = host_observations.entry(parsed.host.clone()).or_insert(false);
            *entry = *entry || reachable;
            if !reachable {
                continue;
            }

            let stage2_ok = if parsed.scheme.is_tcp_native() {
                crate::stage2::probe(&parsed, &self.cfg).await
            } else {
                true
            };
            if !stage2_ok {
                continue;
            }

            let verdict = if self.cfg.enable_stage3 && stage3_remaining > 0 {
                stage3_remaining -= 1;
                crate::stage3::validate(&parsed, &self.cfg, &stage3_semaphore)
                    .await
                    .unwrap_or(stage2_ok)
            } else {
                stage2_ok
            };

            let entry = host_observations.entry(parsed.host.clone()).or_insert(false);
            *entry = *entry || verdict;

            if verdict {
                let cc = geo::resolve_country(&parsed.host, None, &geo_tagger).await;
                validated.push((uri.clone(), parsed.scheme, cc));
            }
        }

        // Geo-tag + append (§4.9), regroup. `survivors` already reflects the
        // §4.8 outage guard (revalidate() leaves the original lines alone
        // when it would otherwise wipe the ledger during an outage).
        let mut counters = AvailableLedger::country_counters(&survivors);
        let mut new_lines = Vec::new();
        for (uri, scheme, cc) in &validated {
            let n = counters.entry(cc.clone()).or_insert(1);
            let rewritten = AvailableLedger::rewrite_remark(uri, *scheme, cc, *n);
            *n += 1;
            new_lines.push((rewritten.as_str().to_string(), *scheme, cc.clone()));
        }

        if let Err(e) = available.append_and_regroup(survivors, new_lines) {
            warn!("failed to persist AvailableLedger: {e}");
        }

        // Streak update (§4.7): re-check connectivity since a run can span
        // minutes and the pre-flight result may be stale by now. `any_success`
        // sums over the combined incumbent+new-candidate host observations,
        // matching `total_successes` in `original_source/src/main.py`.
        let any_success = host_observations.values().any(|&ok| ok);
        let connectivity_at_streak_update = connectivity_ok().await;
        let outage = !any_success && !connectivity_at_streak_update;
        let now = now_unix();
        streaks_store.apply_observations(&mut streaks, &host_observations, now, outage);
        if let Err(e) = streaks_store.save(&streaks) {
            warn!("failed to persist streak store: {e}");
        }

        // Persist the tested-hash ledger last.
        let new_hashes: Vec<[u8; 20]> = new_uris.iter().map(|u| u.content_hash()).collect();
        if let Err(e) = tested.append(&mut known_hashes, &new_hashes) {
            warn!("failed to persist tested ledger: {e}");
        }

        info!(validated = validated.len(), "pipeline finished");
        EXIT_OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(sources_path: std::path::PathBuf) -> AppConfig {
        AppConfig::builder()
            .sources_path(sources_path)
            .fetch_timeout(Duration::from_secs(1))
            .fetch_workers(1)
            .ping_workers(1)
            .ping_timeout_ms(100)
            .connect_timeout_ms(100)
            .probe_timeout_ms(100)
            .enable_stage2(false)
            .enable_stage3(false)
            .stage3_max(0)
            .stage3_workers(1)
            .v2ray_core(None)
            .streak_required(5)
            .recheck_existing(true)
            .new_uris_limit_enabled(true)
            .new_uris_limit(100)
            .debug(false)
            .ci_mode(true)
            .build()
    }

    #[tokio::test]
    async fn missing_sources_file_returns_exit_code() {
        let cfg = test_config(std::path::PathBuf::from("/nonexistent/sources.txt"));
        let coordinator = Coordinator::new(cfg);
        let cancel = CancellationToken::new();
        let code = coordinator.run(cancel).await;
        assert_eq!(code, EXIT_MISSING_SOURCES);
    }
}
