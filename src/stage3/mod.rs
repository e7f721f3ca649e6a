//! Stage 3 — Core Validator (§4.6).
//!
//! Delegates protocol correctness to an external `xray`/`v2ray` binary:
//! render a minimal config, spawn the core against a kernel-assigned local
//! HTTP inbound, and issue `generate_204` probes through it. Concurrency is
//! bounded by `STAGE3_WORKERS`; `STAGE3_MAX` hard-caps how many candidates
//! are even attempted in a run.

pub mod config;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::ingest::USER_AGENT;
use crate::model::ParsedProxy;

const GENERATE_204_ENDPOINTS: [&str; 3] = [
    "http://cp.cloudflare.com/generate_204",
    "http://www.gstatic.com/generate_204",
    "http://connectivitycheck.gstatic.com/generate_204",
];

const STARTUP_DELAY: Duration = Duration::from_millis(250);
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// Locate the external core binary: an explicit config override first,
/// then `xray`/`v2ray` on `PATH`.
pub fn discover_core(configured: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.clone());
        }
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in ["xray", "v2ray"] {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Three-valued Stage 3 verdict: `Some(true)` validated, `Some(false)` the
/// core ran and validation failed, `None` the core is unavailable or the
/// scheme is unsupported.
pub async fn validate(parsed: &ParsedProxy, cfg: &AppConfig, semaphore: &Semaphore) -> Option<bool> {
    let core = discover_core(cfg.v2ray_core.as_ref())?;
    let _permit = semaphore.acquire().await.ok()?;

    let listener = TcpListener::bind(("127.0.0.1", 0)).await.ok()?;
    let inbound_port = listener.local_addr().ok()?.port();
    drop(listener); // release the port for the core subprocess to bind

    let rendered = config::render(parsed, inbound_port)?;
    // `inbound_port` is unique per concurrent call (a fresh ephemeral bind
    // above), so keying the config filename on it keeps STAGE3_WORKERS
    // concurrent `validate()` invocations from overwriting each other's file.
    let config_path =
        std::env::temp_dir().join(format!("openray-core-{}-{}.json", std::process::id(), inbound_port));
    let config_bytes = serde_json::to_vec(&rendered.json).ok()?;

    if write_config(&config_path, &config_bytes).await.is_err() {
        return Some(false);
    }

    let mut child = match spawn_core(&core, &config_path) {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to spawn core subprocess: {e}");
            let _ = tokio::fs::remove_file(&config_path).await;
            return Some(false);
        }
    };

    tokio::time::sleep(STARTUP_DELAY).await;

    let timeout = Duration::from_millis(cfg.probe_timeout_ms);
    let ok = probe_through(inbound_port, timeout).await;

    terminate(&mut child).await;
    let _ = tokio::fs::remove_file(&config_path).await;

    Some(ok)
}

async fn write_config(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    Ok(())
}

fn spawn_core(core: &std::path::Path, config_path: &std::path::Path) -> std::io::Result<tokio::process::Child> {
    Command::new(core)
        .arg("-c")
        .arg(config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

async fn probe_through(inbound_port: u16, timeout: Duration) -> bool {
    let proxy_url = format!("http://127.0.0.1:{inbound_port}");
    let Ok(proxy) = reqwest::Proxy::http(&proxy_url) else {
        return false;
    };
    let Ok(client) = reqwest::Client::builder()
        .proxy(proxy)
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
    else {
        return false;
    };

    let deadline = tokio::time::Instant::now() + timeout;
    for endpoint in GENERATE_204_ENDPOINTS {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        if let Ok(Ok(resp)) = tokio::time::timeout(timeout, client.get(endpoint).send()).await {
            let status = resp.status().as_u16();
            if status == 200 || status == 204 {
                return true;
            }
        }
    }
    false
}

/// Give the core a short grace window to exit on its own (it was only ever
/// asked to serve our one probe); past that, kill it outright.
async fn terminate(child: &mut tokio::process::Child) {
    if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_core_prefers_explicit_override() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("xray");
        std::fs::write(&bin, b"").unwrap();
        assert_eq!(discover_core(Some(&bin)), Some(bin));
    }

    #[test]
    fn discover_core_falls_back_to_path_search() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("xray");
        std::fs::write(&bin, b"").unwrap();
        let path_value = std::env::join_paths([dir.path()]).unwrap();
        let found = unsafe {
            let prev = std::env::var_os("PATH");
            std::env::set_var("PATH", &path_value);
            let result = discover_core(None);
            if let Some(prev) = prev {
                std::env::set_var("PATH", prev);
            }
            result
        };
        assert_eq!(found, Some(bin));
    }
}
