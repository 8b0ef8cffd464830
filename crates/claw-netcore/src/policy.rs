//! Parsing for `AllowConnections`/`ExposePorts` policy grammar
//! (spec §4.4.3/§4.4.4).

use crate::error::{NetCoreError, Result};
use crate::types::{ExposedPort, Protocol};

/// One parsed `AllowConnections` entry: `"serviceID/port"` or
/// `"serviceID/port/proto"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowConnectionsEntry {
    /// Target service identifier.
    pub service_id: String,
    /// Destination port.
    pub port: u16,
    /// Transport protocol, defaulting to TCP.
    pub proto: Protocol,
}

/// Parses a single `AllowConnections` entry.
///
/// # Errors
///
/// Returns [`NetCoreError::MalformedPolicy`] for any arity other than
/// two or three `/`-separated fields, a non-numeric port, or an unknown
/// protocol token.
pub fn parse_allow_connections(entry: &str) -> Result<AllowConnectionsEntry> {
    let fields: Vec<&str> = entry.split('/').collect();
    match fields.as_slice() {
        [service_id, port] => Ok(AllowConnectionsEntry {
            service_id: (*service_id).to_string(),
            port: parse_port(port)?,
            proto: Protocol::Tcp,
        }),
        [service_id, port, proto] => Ok(AllowConnectionsEntry {
            service_id: (*service_id).to_string(),
            port: parse_port(port)?,
            proto: Protocol::parse(proto)?,
        }),
        _ => Err(NetCoreError::MalformedPolicy {
            reason: format!("invalid AllowConnections entry: {entry}"),
        }),
    }
}

/// Parses a single `ExposePorts` entry: `"port"` or `"port/proto"`.
///
/// # Errors
///
/// Returns [`NetCoreError::MalformedPolicy`] for any arity other than
/// one or two `/`-separated fields, a non-numeric port, or an unknown
/// protocol token.
pub fn parse_expose_port(entry: &str) -> Result<ExposedPort> {
    let fields: Vec<&str> = entry.split('/').collect();
    match fields.as_slice() {
        [port] => Ok(ExposedPort {
            protocol: Protocol::Tcp,
            port: parse_port(port)?,
        }),
        [port, proto] => Ok(ExposedPort {
            protocol: Protocol::parse(proto)?,
            port: parse_port(port)?,
        }),
        _ => Err(NetCoreError::MalformedPolicy {
            reason: format!("invalid ExposePorts entry: {entry}"),
        }),
    }
}

fn parse_port(token: &str) -> Result<u16> {
    token.parse::<u16>().map_err(|_| NetCoreError::MalformedPolicy {
        reason: format!("invalid port '{token}'"),
    })
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn allow_connections_defaults_to_tcp() {
        let entry = parse_allow_connections("svc-a/8080").expect("parse");
        assert_eq!(entry.service_id, "svc-a");
        assert_eq!(entry.port, 8080);
        assert_eq!(entry.proto, Protocol::Tcp);
    }

    #[test]
    fn allow_connections_accepts_explicit_proto() {
        let entry = parse_allow_connections("svc-a/53/udp").expect("parse");
        assert_eq!(entry.proto, Protocol::Udp);
    }

    #[test]
    fn allow_connections_rejects_bad_arity() {
        assert!(parse_allow_connections("svc-a").is_err());
        assert!(parse_allow_connections("svc-a/80/tcp/extra").is_err());
    }

    #[test]
    fn allow_connections_rejects_unknown_proto() {
        assert!(parse_allow_connections("svc-a/80/sctp").is_err());
    }

    #[test]
    fn allow_connections_rejects_non_numeric_port() {
        assert!(parse_allow_connections("svc-a/notaport").is_err());
    }

    #[test]
    fn expose_ports_defaults_to_tcp() {
        let port = parse_expose_port("80").expect("parse");
        assert_eq!(port.port, 80);
        assert_eq!(port.protocol, Protocol::Tcp);
    }

    #[test]
    fn expose_ports_accepts_explicit_proto() {
        let port = parse_expose_port("53/udp").expect("parse");
        assert_eq!(port.protocol, Protocol::Udp);
    }

    #[test]
    fn expose_ports_rejects_bad_arity() {
        assert!(parse_expose_port("80/tcp/extra").is_err());
        assert!(parse_expose_port("").is_err());
    }

    #[test_case("svc-a/8080", "svc-a", 8080, Protocol::Tcp; "bare port defaults to tcp")]
    #[test_case("svc-a/53/udp", "svc-a", 53, Protocol::Udp; "explicit udp")]
    #[test_case("svc-a/443/TCP", "svc-a", 443, Protocol::Tcp; "proto token is case insensitive")]
    fn allow_connections_parses_expected_fields(
        input: &str,
        service_id: &str,
        port: u16,
        proto: Protocol,
    ) {
        let parsed = parse_allow_connections(input).expect("parse");
        assert_eq!(parsed.service_id, service_id);
        assert_eq!(parsed.port, port);
        assert_eq!(parsed.proto, proto);
    }
}
