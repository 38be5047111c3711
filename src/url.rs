//! Collector address parsing: `host`, `host:port`, or `harvest://host[:port]`

use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorAddr {
    pub host: String,
    pub port: u16,
}

impl CollectorAddr {
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for CollectorAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.authority())
    }
}

pub fn parse_collector_addr(raw: &str, default_port: u16) -> Option<CollectorAddr> {
    let s = raw.trim();
    let lower = s.to_ascii_lowercase();
    let mut rest = if lower.starts_with("harvest://") {
        &s["harvest://".len()..]
    } else if lower.contains("://") {
        return None;
    } else {
        s
    };
    rest = rest.trim_end_matches('/');
    if rest.is_empty() || rest.contains('/') {
        return None;
    }

    if let Ok(sa) = rest.parse::<SocketAddr>() {
        return Some(CollectorAddr {
            host: sa.ip().to_string(),
            port: sa.port(),
        });
    }
    // Bare IPv6 literal, with or without brackets
    let unbracketed = rest.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = unbracketed.parse::<std::net::Ipv6Addr>() {
        return Some(CollectorAddr {
            host: ip.to_string(),
            port: default_port,
        });
    }

    let (host, port) = match rest.split_once(':') {
        Some((h, p)) => (h, p.parse().ok()?),
        None => (rest, default_port),
    };
    if host.is_empty() {
        return None;
    }
    Some(CollectorAddr {
        host: host.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str, port: u16) -> Option<CollectorAddr> {
        Some(CollectorAddr {
            host: host.to_string(),
            port,
        })
    }

    #[test]
    fn test_accepted_forms() {
        assert_eq!(parse_collector_addr("192.168.2.50", 8080), addr("192.168.2.50", 8080));
        assert_eq!(parse_collector_addr("192.168.2.50:9000", 8080), addr("192.168.2.50", 9000));
        assert_eq!(parse_collector_addr("lab-server", 8080), addr("lab-server", 8080));
        assert_eq!(
            parse_collector_addr("HARVEST://lab-server:81/", 8080),
            addr("lab-server", 81)
        );
        assert_eq!(parse_collector_addr("[::1]:7000", 8080), addr("::1", 7000));
        assert_eq!(parse_collector_addr("::1", 8080), addr("::1", 8080));
    }

    #[test]
    fn test_rejected_forms() {
        assert_eq!(parse_collector_addr("", 8080), None);
        assert_eq!(parse_collector_addr("http://x", 8080), None);
        assert_eq!(parse_collector_addr("host:notaport", 8080), None);
        assert_eq!(parse_collector_addr(":8080", 8080), None);
        assert_eq!(parse_collector_addr("host/path", 8080), None);
    }

    #[test]
    fn test_authority_brackets_ipv6() {
        assert_eq!(addr("::1", 8080).unwrap().authority(), "[::1]:8080");
        assert_eq!(addr("pc", 8080).unwrap().to_string(), "pc:8080");
    }
}
