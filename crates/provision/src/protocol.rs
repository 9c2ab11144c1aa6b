use crate::ProvisionError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Credential flavours the provisioner can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// VLESS over Reality
    Vless,
    /// Shadowsocks (AEAD / 2022 ciphers)
    Shadowsocks,
    /// Legacy Outline server, managed through its own API
    Outline,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Vless, Protocol::Shadowsocks, Protocol::Outline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vless => "vless",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Outline => "outline",
        }
    }

    /// Whether the credential lives in a 3x-ui inbound
    pub fn uses_panel(&self) -> bool {
        !matches!(self, Protocol::Outline)
    }
}

impl FromStr for Protocol {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vless" | "reality" => Ok(Protocol::Vless),
            "shadowsocks" | "ss" => Ok(Protocol::Shadowsocks),
            "outline" => Ok(Protocol::Outline),
            _ => Err(ProvisionError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tags() {
        assert_eq!("vless".parse::<Protocol>().unwrap(), Protocol::Vless);
        assert_eq!("Reality".parse::<Protocol>().unwrap(), Protocol::Vless);
        assert_eq!(" shadowsocks ".parse::<Protocol>().unwrap(), Protocol::Shadowsocks);
        assert_eq!("ss".parse::<Protocol>().unwrap(), Protocol::Shadowsocks);
        assert_eq!("outline".parse::<Protocol>().unwrap(), Protocol::Outline);
    }

    #[test]
    fn test_unknown_tag() {
        let err = "wireguard".parse::<Protocol>().unwrap_err();
        assert!(matches!(err, ProvisionError::UnknownProtocol(ref t) if t == "wireguard"));
    }

    #[test]
    fn test_display_roundtrip() {
        for protocol in Protocol::ALL {
            assert_eq!(protocol.to_string().parse::<Protocol>().unwrap(), protocol);
        }
    }
}
