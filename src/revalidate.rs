//! Incumbent Revalidator (§4.8): re-run Stages 1–3 against every entry
//! already in the AvailableLedger before processing new URIs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::config::AppConfig;
use crate::ledger::AvailableLedger;
use crate::model::ProxyUri;
use crate::pipeline_probe::probe_survives;
use crate::uri::parse_proxy;

/// Revalidate every ledger line. Returns the survivor lines in their
/// original order, plus a per-host pass/fail map (`true` iff at least one of
/// that host's entries survived) meant to be merged into the same
/// `host_observations` the Coordinator's new-URI loop builds — both loops
/// feed one shared streak/outage-guard view, mirroring the single
/// `host_success_run` dict in `original_source/src/main.py`.
///
/// Stage 3 invocations are capped at `cfg.stage3_max` for this call, the
/// same per-loop budget the original applies to `alive[:STAGE3_MAX]`;
/// it is independent of whatever budget the Coordinator's own new-URI loop
/// tracks for itself.
///
/// Outage guard: if the original set was non-empty, zero survivors emerged,
/// and connectivity is currently absent, returns the original lines
/// untouched (caller must not persist an empty rewrite).
pub async fn revalidate(
    lines: Vec<String>,
    cfg: &AppConfig,
    stage3_semaphore: &Arc<Semaphore>,
    connectivity_ok: bool,
) -> (Vec<String>, HashMap<String, bool>) {
    if lines.is_empty() {
        return (lines, HashMap::new());
    }

    let mut stage3_budget = cfg.stage3_max;
    let mut host_observations: HashMap<String, bool> = HashMap::new();
    let mut survivors = Vec::with_capacity(lines.len());
    for line in &lines {
        let uri = ProxyUri::new(line.clone());
        let host = parse_proxy(&uri).map(|p| p.host);
        if let Some(host) = &host {
            host_observations.entry(host.clone()).or_insert(false);
        }

        let ok = probe_survives(&uri, cfg, stage3_semaphore, &mut stage3_budget).await;
        if ok {
            survivors.push(line.clone());
            if let Some(host) = host {
                host_observations.insert(host, true);
            }
        }
    }

    if survivors.is_empty() && !connectivity_ok {
        info!(
            count = lines.len(),
            "incumbent revalidation found zero survivors during an apparent outage; keeping prior ledger"
        );
        return (lines, host_observations);
    }

    (survivors, host_observations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_ledger_short_circuits() {
        let cfg = test_config();
        let sem = Arc::new(Semaphore::new(1));
        let (lines, hosts) = revalidate(Vec::new(), &cfg, &sem, true).await;
        assert!(lines.is_empty());
        assert!(hosts.is_empty());
    }

    fn test_config() -> AppConfig {
        AppConfig::builder()
            .sources_path("sources.txt".into())
            .fetch_timeout(std::time::Duration::from_secs(1))
            .fetch_workers(1)
            .ping_workers(1)
            .ping_timeout_ms(100)
            .connect_timeout_ms(100)
            .probe_timeout_ms(100)
            .enable_stage2(false)
            .enable_stage3(false)
            .stage3_max(0)
            .stage3_workers(8)
            .v2ray_core(None)
            .streak_required(5)
            .recheck_existing(true)
            .new_uris_limit_enabled(true)
            .new_uris_limit(100)
            .debug(false)
            .ci_mode(true)
            .build()
    }
}
