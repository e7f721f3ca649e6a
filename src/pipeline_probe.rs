//! Shared per-URI Stage 1 → Stage 2 → Stage 3 survival check, used by both
//! the Incumbent Revalidator (§4.8) and the main Coordinator pipeline
//! (§4.10) so the two don't drift into different verdict logic.

use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::model::ProxyUri;
use crate::uri::parse_proxy;
use crate::{stage1, stage2, stage3};

/// Does `uri` survive the full validation pipeline with the given config?
/// A `None` Stage 3 verdict (core unavailable or unsupported scheme) is
/// treated as "pass through on the Stage 2 verdict" per §4.6.
///
/// `stage3_budget` bounds how many of these calls may actually invoke the
/// external core: once it reaches zero, remaining candidates pass through on
/// the Stage 2 verdict alone, mirroring `STAGE3_MAX`'s per-loop cap in
/// `original_source/src/main.py` (`subset = alive[:STAGE3_MAX]`).
pub async fn probe_survives(
    uri: &ProxyUri,
    cfg: &AppConfig,
    stage3_semaphore: &Semaphore,
    stage3_budget: &mut usize,
) -> bool {
    let Some(parsed) = parse_proxy(uri) else {
        return false;
    };

    if !stage1::is_reachable(&parsed.host, cfg).await {
        return false;
    }

    let stage2_ok = if parsed.scheme.is_tcp_native() {
        stage2::probe(&parsed, cfg).await
    } else {
        true
    };
    if !stage2_ok {
        return false;
    }

    if !cfg.enable_stage3 || *stage3_budget == 0 {
        return stage2_ok;
    }
    *stage3_budget -= 1;

    match stage3::validate(&parsed, cfg, stage3_semaphore).await {
        Some(verdict) => verdict,
        None => stage2_ok,
    }
}
