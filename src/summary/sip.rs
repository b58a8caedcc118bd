use std::sync::OnceLock;

use log::error;
use regex::Regex;

/// Hosts taken from the `From` and `To` headers of a SIP message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SipHosts {
    pub from_host: Option<String>,
    pub to_host: Option<String>,
}

static HEADER_HOST: OnceLock<Option<Regex>> = OnceLock::new();

// Header name, then the host part of the first sip/sips URI on the line.
fn header_host() -> Option<&'static Regex> {
    HEADER_HOST
        .get_or_init(|| {
            Regex::new(r"(?i)^\s*(from|f|to|t)\s*:.*?sips?:(?:[^@>;\s]*@)?(\[[^\]]+\]|[^:;>\s?]+)")
                .map_err(|e| error!("SIP header pattern does not compile, host extraction is off: {}", e))
                .ok()
        })
        .as_ref()
}

/// Reads the `From`/`To` hosts out of the message headers. Parsing stops at
/// the blank line that ends the header block.
pub fn parse_hosts(message: &str) -> SipHosts {
    let mut hosts = SipHosts::default();
    let Some(re) = header_host() else {
        return hosts;
    };
    for line in message.lines().skip(1) {
        if line.trim().is_empty() {
            break;
        }
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let host = caps[2].trim_start_matches('[').trim_end_matches(']').to_string();
        match caps[1].to_ascii_lowercase().as_str() {
            "from" | "f" if hosts.from_host.is_none() => hosts.from_host = Some(host),
            "to" | "t" if hosts.to_host.is_none() => hosts.to_host = Some(host),
            _ => {}
        }
        if hosts.from_host.is_some() && hosts.to_host.is_some() {
            break;
        }
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_pattern_compiles() {
        assert!(header_host().is_some());
    }

    #[test]
    fn from_and_to_hosts() {
        let msg = "INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
                   Via: SIP/2.0/UDP pc33.atlanta.example.com\r\n\
                   From: \"Alice\" <sip:alice@atlanta.example.com>;tag=1928301774\r\n\
                   To: Bob <sip:bob@biloxi.example.com:5060>\r\n\
                   Call-ID: a84b4c76e66710\r\n\r\n\
                   To: sip:body@ignored.example\r\n";
        let hosts = parse_hosts(msg);
        assert_eq!(hosts.from_host.as_deref(), Some("atlanta.example.com"));
        assert_eq!(hosts.to_host.as_deref(), Some("biloxi.example.com"));
    }

    #[test]
    fn compact_headers_and_ipv6() {
        let msg = "BYE sip:x SIP/2.0\nf: <sips:[2001:db8::1]:5061>;tag=a\nt: sip:10.0.0.2\n\n";
        let hosts = parse_hosts(msg);
        assert_eq!(hosts.from_host.as_deref(), Some("2001:db8::1"));
        assert_eq!(hosts.to_host.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn non_sip_payload_yields_nothing() {
        assert_eq!(parse_hosts("{\"event\":\"rtcp\"}"), SipHosts::default());
    }
}
