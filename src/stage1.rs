//! Stage 1 — Host Reachability (§4.4).
//!
//! ICMP via the platform `ping` binary (skipped under CI, which lacks raw
//! socket capability), falling back to a TCP-connect sweep of commonly-open
//! ports. An optional `fping` batch path is used when the tool is present
//! on `PATH`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::config::AppConfig;
use crate::net_util::resolve_ordered;

const FALLBACK_PORTS: [u16; 8] = [80, 443, 8080, 8443, 2052, 2082, 2086, 2095];
const BATCH_CHUNK: usize = 100;

/// Given an IDNA host, return reachability within `ping_timeout_ms`.
pub async fn is_reachable(host: &str, cfg: &AppConfig) -> bool {
    if !cfg.ci_mode && icmp_ping(host, cfg.ping_timeout_ms).await {
        return true;
    }
    tcp_fallback(host, cfg.ping_timeout_ms).await
}

async fn icmp_ping(host: &str, timeout_ms: u64) -> bool {
    icmp_ping_family(host, timeout_ms, false).await || icmp_ping_family(host, timeout_ms, true).await
}

async fn icmp_ping_family(host: &str, timeout_ms: u64, v6: bool) -> bool {
    let secs = (timeout_ms.max(100) as f64 / 1000.0).ceil() as u64;
    let (program, mut args): (&str, Vec<String>) = if cfg!(target_os = "macos") {
        if v6 {
            ("ping6", vec!["-c".into(), "1".into()])
        } else {
            ("ping", vec!["-c".into(), "1".into(), "-t".into(), secs.to_string()])
        }
    } else if cfg!(target_os = "windows") {
        ("ping", vec!["-n".into(), "1".into(), "-w".into(), timeout_ms.to_string()])
    } else {
        let family = if v6 { "-6" } else { "-4" };
        (
            "ping",
            vec![family.into(), "-c".into(), "1".into(), "-W".into(), secs.to_string()],
        )
    };
    args.push(host.to_string());

    let run = Command::new(program)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    matches!(tokio::time::timeout(Duration::from_millis(timeout_ms.max(1000) * 2), run).await, Ok(Ok(status)) if status.success())
}

async fn tcp_fallback(host: &str, timeout_ms: u64) -> bool {
    let per_attempt = Duration::from_millis(timeout_ms.clamp(200, 2000));
    for port in FALLBACK_PORTS {
        let addrs = resolve_ordered(host, port).await;
        for addr in addrs {
            if tokio::time::timeout(per_attempt, tokio::net::TcpStream::connect(addr))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false)
            {
                return true;
            }
        }
    }
    false
}

/// Probe many hosts at once, preferring an `fping`-compatible batch tool
/// and falling back to per-host `is_reachable` on any batch failure.
pub async fn batch_reachable(hosts: &[String], cfg: &AppConfig) -> HashMap<String, bool> {
    if let Some(result) = fping_batch(hosts, cfg).await {
        return result;
    }

    let mut out = HashMap::with_capacity(hosts.len());
    for host in hosts {
        out.insert(host.clone(), is_reachable(host, cfg).await);
    }
    out
}

async fn fping_batch(hosts: &[String], cfg: &AppConfig) -> Option<HashMap<String, bool>> {
    which_on_path("fping")?;

    let mut results = HashMap::with_capacity(hosts.len());
    for chunk in hosts.chunks(BATCH_CHUNK) {
        let output = Command::new("fping")
            .arg("-a")
            .arg("-q")
            .arg("-r").arg("1")
            .arg("-p").arg("10")
            .arg("-t").arg(cfg.ping_timeout_ms.to_string())
            .args(chunk)
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;

        let alive: std::collections::HashSet<&str> = std::str::from_utf8(&output.stdout)
            .ok()?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        for host in chunk {
            results.insert(host.clone(), alive.contains(host.as_str()));
        }
    }
    debug!(count = results.len(), "fping batch probe completed");
    Some(results)
}

fn which_on_path(bin: &str) -> Option<()> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|p| p.is_file())
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_on_path_finds_a_real_binary() {
        assert!(which_on_path("ls").is_some() || which_on_path("sh").is_some());
    }

    #[test]
    fn which_on_path_rejects_unknown_binary() {
        assert!(which_on_path("definitely-not-a-real-binary-xyz").is_none());
    }
}
