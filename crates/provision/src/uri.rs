//! Connection link assembly

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Reality parameters carried in a VLESS link
#[derive(Debug, Clone, Copy)]
pub struct RealityLink<'a> {
    pub public_key: &'a str,
    pub sni: &'a str,
    pub short_id: &'a str,
    pub flow: &'a str,
}

/// `host:port`, bracketing bare IPv6 addresses
fn authority(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    }
}

/// `vless://<uuid>@<host>:<port>?security=reality&sni=..&pbk=..&sid=..[&flow=..]#<tag>`
///
/// Query keys always appear in the order security, sni, pbk, sid, flow;
/// empty values are left out.
pub fn vless_uri(client_id: &str, address: &str, port: u16, reality: &RealityLink<'_>, tag: &str) -> String {
    let params = [
        ("security", "reality"),
        ("sni", reality.sni),
        ("pbk", reality.public_key),
        ("sid", reality.short_id),
        ("flow", reality.flow),
    ];
    let query = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut uri = format!("vless://{}@{}", client_id, authority(address, port));
    if !query.is_empty() {
        uri.push('?');
        uri.push_str(&query);
    }
    uri.push('#');
    uri.push_str(tag);
    uri
}

/// `ss://<base64url(method:password)>@<host>:<port>#<tag>` (SIP002, no padding)
pub fn shadowsocks_uri(method: &str, password: &str, address: &str, port: u16, tag: &str) -> String {
    let userinfo = URL_SAFE_NO_PAD.encode(format!("{}:{}", method, password));
    format!("ss://{}@{}#{}", userinfo, authority(address, port), tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vless_without_flow() {
        let reality = RealityLink {
            public_key: "pbk1",
            sni: "sni1",
            short_id: "sid1",
            flow: "",
        };
        let uri = vless_uri("11111111-2222-4333-8444-555555555555", "203.0.113.1", 443, &reality, "tg_1_x@bot.local");
        assert_eq!(
            uri,
            "vless://11111111-2222-4333-8444-555555555555@203.0.113.1:443?security=reality&sni=sni1&pbk=pbk1&sid=sid1#tg_1_x@bot.local"
        );
    }

    #[test]
    fn test_vless_with_flow_is_last() {
        let reality = RealityLink {
            public_key: "pbk1",
            sni: "sni1",
            short_id: "sid1",
            flow: "xtls-rprx-vision",
        };
        let uri = vless_uri("id", "host", 8443, &reality, "tag");
        assert!(uri.ends_with("?security=reality&sni=sni1&pbk=pbk1&sid=sid1&flow=xtls-rprx-vision#tag"));
    }

    #[test]
    fn test_shadowsocks() {
        let uri = shadowsocks_uri("aes-256-gcm", "pw", "host", 8388, "identifier");
        let expected = format!("ss://{}@host:8388#identifier", URL_SAFE_NO_PAD.encode("aes-256-gcm:pw"));
        assert_eq!(uri, expected);
        assert_eq!(uri, "ss://YWVzLTI1Ni1nY206cHc@host:8388#identifier");
    }

    #[test]
    fn test_ipv6_authority() {
        let uri = shadowsocks_uri("m", "p", "2001:db8::1", 1, "t");
        assert!(uri.contains("@[2001:db8::1]:1#"));
    }
}
