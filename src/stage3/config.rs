//! Minimal core config rendering (§4.6 step 1).
//!
//! Renders a single-outbound xray/v2ray-style JSON config: one outbound for
//! the candidate proxy, one locally-bound HTTP inbound on a kernel-assigned
//! port. Only VLESS, VMess, and Trojan are supported — other schemes yield
//! `None`, which Stage 3 turns into a `null` verdict.
//!
//! This is distinct from the subscription-format/client-config emitter
//! named out of scope in §1: that's a full multi-node exporter for
//! external clients, whereas this is a single-outbound config scoped
//! entirely to driving one local probe (see `SPEC_FULL.md` §12).

use serde_json::{Value, json};

use crate::model::{ParsedProxy, Scheme};

pub struct RenderedConfig {
    pub json: Value,
    pub inbound_port: u16,
}

/// Render a minimal core config for `parsed`, binding the HTTP inbound to
/// `inbound_port` (kernel-assigned by the caller via a bound ephemeral
/// listener it then hands off to the core subprocess).
pub fn render(parsed: &ParsedProxy, inbound_port: u16) -> Option<RenderedConfig> {
    let Some(port) = parsed.port else { return None };
    let outbound = match parsed.scheme {
        Scheme::Vless => vless_outbound(parsed, port),
        Scheme::Vmess => vmess_outbound(parsed, port),
        Scheme::Trojan => trojan_outbound(parsed, port),
        _ => return None,
    };

    let json = json!({
        "log": { "loglevel": "none" },
        "inbounds": [{
            "tag": "probe-in",
            "listen": "127.0.0.1",
            "port": inbound_port,
            "protocol": "http",
            "settings": {},
        }],
        "outbounds": [outbound],
    });

    Some(RenderedConfig { json, inbound_port })
}

fn stream_settings(parsed: &ParsedProxy) -> Value {
    if parsed.tls_hint {
        json!({
            "network": "tcp",
            "security": "tls",
            "tlsSettings": { "serverName": parsed.host, "allowInsecure": true },
        })
    } else {
        json!({ "network": "tcp", "security": "none" })
    }
}

fn vless_outbound(parsed: &ParsedProxy, port: u16) -> Value {
    json!({
        "tag": "probe-out",
        "protocol": "vless",
        "settings": {
            "vnext": [{
                "address": parsed.host,
                "port": port,
                "users": [{ "id": parsed.auth, "encryption": "none" }],
            }],
        },
        "streamSettings": stream_settings(parsed),
    })
}

fn vmess_outbound(parsed: &ParsedProxy, port: u16) -> Value {
    json!({
        "tag": "probe-out",
        "protocol": "vmess",
        "settings": {
            "vnext": [{
                "address": parsed.host,
                "port": port,
                "users": [{ "id": parsed.auth, "alterId": 0, "security": "auto" }],
            }],
        },
        "streamSettings": stream_settings(parsed),
    })
}

fn trojan_outbound(parsed: &ParsedProxy, port: u16) -> Value {
    json!({
        "tag": "probe-out",
        "protocol": "trojan",
        "settings": {
            "servers": [{
                "address": parsed.host,
                "port": port,
                "password": parsed.auth,
            }],
        },
        "streamSettings": stream_settings(parsed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(scheme: Scheme, tls: bool) -> ParsedProxy {
        ParsedProxy {
            scheme,
            host: "example.com".to_string(),
            port: Some(443),
            tls_hint: tls,
            remark: "r".to_string(),
            auth: "uuid-or-pass".to_string(),
        }
    }

    #[test]
    fn vless_renders_with_tls_settings() {
        let rendered = render(&parsed(Scheme::Vless, true), 18080).unwrap();
        let s = rendered.json.to_string();
        assert!(s.contains("\"vless\""));
        assert!(s.contains("\"tls\""));
        assert_eq!(rendered.inbound_port, 18080);
    }

    #[test]
    fn unsupported_scheme_yields_none() {
        assert!(render(&parsed(Scheme::Hysteria2, false), 18080).is_none());
    }

    #[test]
    fn missing_port_yields_none() {
        let mut p = parsed(Scheme::Trojan, false);
        p.port = None;
        assert!(render(&p, 18080).is_none());
    }
}
