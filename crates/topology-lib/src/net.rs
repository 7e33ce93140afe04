//! Address helpers shared by the connection loaders

use crate::error::{ResolveError, Result};
use std::net::IpAddr;

/// Split `host:port` (or `[v6]:port`) into its parts
///
/// The port is kept as a string; it is only used as a lookup key.
pub fn split_host_port(addr: &str) -> Result<(String, String)> {
    let invalid = || ResolveError::InvalidAddress(addr.to_string());

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = tail.strip_prefix(':').ok_or_else(invalid)?;
        if port.contains(':') || port.contains(']') {
            return Err(invalid());
        }
        return Ok((host.to_string(), port.to_string()));
    }

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return Err(invalid());
    }
    Ok((host.to_string(), port.to_string()))
}

/// Parse a literal IP address, `None` for hostnames
pub fn parse_ip(host: &str) -> Option<IpAddr> {
    host.parse().ok()
}

pub fn is_loopback(host: &str) -> bool {
    parse_ip(host).map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Check whether an address is publicly routable
pub fn is_ip_external(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            let shared = o[0] == 100 && (o[1] & 0xc0) == 64; // 100.64.0.0/10
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || shared)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_ip_external(IpAddr::V4(v4));
            }
            let s0 = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (s0 & 0xfe00) == 0xfc00 // fc00::/7
                || (s0 & 0xffc0) == 0xfe80) // fe80::/10
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("10.0.0.5:6379").unwrap(),
            ("10.0.0.5".to_string(), "6379".to_string())
        );
        assert_eq!(
            split_host_port("[::1]:80").unwrap(),
            ("::1".to_string(), "80".to_string())
        );
        assert_eq!(
            split_host_port("db.example.com:5432").unwrap(),
            ("db.example.com".to_string(), "5432".to_string())
        );
    }

    #[test]
    fn test_split_host_port_invalid() {
        assert!(split_host_port("10.0.0.5").is_err());
        assert!(split_host_port("::1:80").is_err());
        assert!(split_host_port("[::1]80").is_err());
        assert!(split_host_port("").is_err());
    }

    #[test]
    fn test_is_ip_external() {
        let ext = |s: &str| is_ip_external(s.parse().unwrap());
        assert!(ext("8.8.8.8"));
        assert!(ext("2606:4700::1111"));
        assert!(!ext("10.1.2.3"));
        assert!(!ext("192.168.0.1"));
        assert!(!ext("172.16.5.4"));
        assert!(!ext("127.0.0.1"));
        assert!(!ext("169.254.169.254"));
        assert!(!ext("100.64.1.1"));
        assert!(!ext("fd00::1"));
        assert!(!ext("::ffff:10.0.0.1"));
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("::1"));
        assert!(!is_loopback("10.0.0.1"));
        assert!(!is_loopback("localhost"));
    }
}
