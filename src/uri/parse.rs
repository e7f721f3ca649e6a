//! Per-scheme host/port extraction (§4.2).
//!
//! Ported from the teacher's `utils::subscription` decoders (vmess JSON,
//! `ss`/`ssr` base64 payloads, URL-form parsing for the rest) and widened to
//! the ten schemes the spec requires, including the `HOSTPORT_REGEX`
//! fallback from `original_source/proxy_checker.py::host_from_generic`.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::model::{ParsedProxy, ProxyUri, Scheme};

static HOSTPORT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9_.\-\[\]:]+):(\d{2,5})").expect("valid regex"));

/// Lenient base64 decode: tries standard, URL-safe, and unpadded URL-safe
/// engines in turn, ignoring embedded whitespace.
pub fn decode_base64_auto(input: &str) -> Option<String> {
    let clean: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    for engine in [&STANDARD as &dyn base64::Engine, &URL_SAFE, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(&clean) {
            return Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    None
}

fn idna_encode(host: &str) -> String {
    match url::Host::parse(host) {
        Ok(url::Host::Domain(d)) => d,
        Ok(url::Host::Ipv4(ip)) => ip.to_string(),
        Ok(url::Host::Ipv6(ip)) => ip.to_string(),
        Err(_) => host.to_string(),
    }
}

fn valid_port(n: i64) -> Option<u16> {
    if (1..=65535).contains(&n) { Some(n as u16) } else { None }
}

fn json_port(v: &Value) -> Option<u16> {
    let n = v.as_i64().or_else(|| v.as_str()?.trim().parse::<i64>().ok())?;
    valid_port(n)
}

const TLS_LIKELY_PORTS: [u16; 8] = [443, 8443, 2053, 2083, 2087, 2096, 444, 10443];

fn tls_hint_from_query(query: &str) -> bool {
    query.contains("security=tls")
        || query.contains("tls=1")
        || query.contains("tls=true")
        || query.contains("security=xtls")
        || query.contains("security=reality")
}

/// Parse a single proxy URI into its scheme/host/port/tls-hint/remark view.
/// Returns `None` on any malformed input — parse failures are dropped
/// silently per spec §7, never propagated.
pub fn parse_proxy(uri: &ProxyUri) -> Option<ParsedProxy> {
    let s = uri.as_str();
    let (scheme_str, _) = s.split_once("://")?;
    let scheme = Scheme::parse(scheme_str)?;

    match scheme {
        Scheme::Vmess => parse_vmess(s, scheme),
        Scheme::Ss => parse_ss(s, scheme),
        Scheme::Ssr => parse_ssr(s, scheme),
        _ => parse_generic(s, scheme),
    }
}

fn parse_vmess(uri: &str, scheme: Scheme) -> Option<ParsedProxy> {
    let body = uri.strip_prefix("vmess://")?;
    let decoded = decode_base64_auto(body)?;
    let v: Value = serde_json::from_str(&decoded).ok()?;

    let host = v
        .get("add")
        .or_else(|| v.get("address"))
        .or_else(|| v.get("host"))
        .and_then(|x| x.as_str())?
        .trim()
        .to_string();
    if host.is_empty() {
        return None;
    }
    let port = v.get("port").and_then(json_port);
    let tls_hint = matches!(v.get("tls").and_then(|x| x.as_str()), Some("tls"));
    let remark = v
        .get("ps")
        .and_then(|x| x.as_str())
        .unwrap_or("vmess")
        .to_string();
    let auth = v.get("id").and_then(|x| x.as_str()).unwrap_or("").to_string();

    Some(ParsedProxy {
        scheme,
        host: idna_encode(&host),
        port,
        tls_hint,
        remark,
        auth,
    })
}

fn split_host_port(hostport: &str) -> (String, Option<u16>) {
    if let Some(rest) = hostport.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &rest[..end];
            let tail = &rest[end + 1..];
            let port = tail.strip_prefix(':').and_then(|p| p.parse::<u16>().ok());
            return (host.to_string(), port);
        }
    }
    match hostport.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse::<u16>().ok()),
        None => (hostport.to_string(), None),
    }
}

fn parse_ss(uri: &str, scheme: Scheme) -> Option<ParsedProxy> {
    // Direct-URL form: ss://base64(method:pass)@host:port#remark
    if let Ok(url) = Url::parse(uri) {
        if let Some(host) = url.host_str() {
            let remark = percent_encoding::percent_decode_str(url.fragment().unwrap_or("ss"))
                .decode_utf8()
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| "ss".to_string());
            let userinfo = url.username().to_string();
            let auth = decode_base64_auto(&userinfo).unwrap_or(userinfo);
            return Some(ParsedProxy {
                scheme,
                host: idna_encode(host),
                port: url.port(),
                tls_hint: false,
                remark,
                auth,
            });
        }
    }

    // Legacy fully-base64 form: ss://base64(method:pass@host:port)
    let body = uri.strip_prefix("ss://")?;
    let main = body.split('#').next()?.split('?').next()?;
    let decoded = decode_base64_auto(main)?;
    let (auth, addr) = decoded.rsplit_once('@')?;
    let (host, port) = split_host_port(addr);
    Some(ParsedProxy {
        scheme,
        host: idna_encode(&host),
        port,
        tls_hint: false,
        remark: "ss".to_string(),
        auth: auth.to_string(),
    })
}

fn parse_ssr(uri: &str, scheme: Scheme) -> Option<ParsedProxy> {
    let body = uri.strip_prefix("ssr://")?;
    let decoded = decode_base64_auto(body)?;
    let first = decoded.split('/').next()?;
    let mut parts = first.split(':');
    let host = parts.next()?.to_string();
    let port = parts.next().and_then(|p| p.parse::<u16>().ok());
    if host.is_empty() {
        return None;
    }
    let auth = parts.collect::<Vec<_>>().join(":");
    Some(ParsedProxy {
        scheme,
        host: idna_encode(&host),
        port,
        tls_hint: false,
        remark: "ssr".to_string(),
        auth,
    })
}

/// vless / trojan / hysteria(2) / hy2 / tuic / juicity: RFC 3986 parse with
/// a `server=`/`sv=` query fallback, then a raw `host:port` regex fallback.
fn parse_generic(uri: &str, scheme: Scheme) -> Option<ParsedProxy> {
    if let Ok(url) = Url::parse(uri) {
        let query = url.query().unwrap_or("");
        let tls_hint = tls_hint_from_query(query)
            || url.port().is_some_and(|p| TLS_LIKELY_PORTS.contains(&p));
        let remark = percent_encoding::percent_decode_str(url.fragment().unwrap_or(scheme.as_str()))
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| scheme.as_str().to_string());
        let auth = percent_encoding::percent_decode_str(url.username())
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_default();

        if let Some(host) = url.host_str() {
            return Some(ParsedProxy {
                scheme,
                host: idna_encode(host),
                port: url.port(),
                tls_hint,
                remark,
                auth,
            });
        }

        // `server=`/`sv=` query fallback (hysteria2-style)
        for key in ["server", "sv"] {
            if let Some((_, val)) = url.query_pairs().find(|(k, _)| k == key) {
                if let Some(caps) = HOSTPORT_REGEX.captures(val.as_ref()) {
                    let host = caps.get(1)?.as_str().to_string();
                    let port = caps.get(2)?.as_str().parse::<u16>().ok();
                    return Some(ParsedProxy {
                        scheme,
                        host: idna_encode(&host),
                        port,
                        tls_hint,
                        remark,
                        auth,
                    });
                }
            }
        }
    }

    // Last resort: find any `host:port` anywhere in the raw URI text.
    let caps = HOSTPORT_REGEX.captures(uri)?;
    let host = caps.get(1)?.as_str().to_string();
    let port = caps.get(2)?.as_str().parse::<u16>().ok();
    Some(ParsedProxy {
        scheme,
        host: idna_encode(&host),
        port,
        tls_hint: false,
        remark: scheme.as_str().to_string(),
        auth: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn parses_vmess_json_payload() {
        let json = r#"{"add":"1.2.3.4","port":"443","id":"u","ps":"node1","tls":"tls"}"#;
        let uri = ProxyUri::new(format!("vmess://{}", b64(json)));
        let p = parse_proxy(&uri).unwrap();
        assert_eq!(p.host, "1.2.3.4");
        assert_eq!(p.port, Some(443));
        assert!(p.tls_hint);
        assert_eq!(p.remark, "node1");
    }

    #[test]
    fn parses_vless_query_tls() {
        let uri = ProxyUri::new("vless://uuid@example.com:443?security=tls&type=ws#n1".to_string());
        let p = parse_proxy(&uri).unwrap();
        assert_eq!(p.host, "example.com");
        assert_eq!(p.port, Some(443));
        assert!(p.tls_hint);
    }

    #[test]
    fn parses_ss_direct_url_form() {
        let uri = ProxyUri::new("ss://YWVzLTI1Ni1nY206cGFzcw==@5.6.7.8:8388#x".to_string());
        let p = parse_proxy(&uri).unwrap();
        assert_eq!(p.host, "5.6.7.8");
        assert_eq!(p.port, Some(8388));
    }

    #[test]
    fn parses_trojan_sni_and_default_tls() {
        let uri = ProxyUri::new("trojan://pass@h.example:443?sni=alt.example#t".to_string());
        let p = parse_proxy(&uri).unwrap();
        assert_eq!(p.host, "h.example");
        assert!(p.tls_hint); // port 443 is TLS-likely
    }

    #[test]
    fn hysteria2_server_query_fallback() {
        let uri = ProxyUri::new("hysteria2://auth@_?server=198.51.100.9:4433#h2".to_string());
        let p = parse_proxy(&uri).unwrap();
        assert_eq!(p.host, "198.51.100.9");
        assert_eq!(p.port, Some(4433));
    }

    #[test]
    fn rejects_invalid_port_zero() {
        let json = r#"{"add":"1.2.3.4","port":0,"id":"u"}"#;
        let uri = ProxyUri::new(format!("vmess://{}", b64(json)));
        let p = parse_proxy(&uri).unwrap();
        assert_eq!(p.port, None);
    }
}
