use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ice_transport::ice_candidate_type::RTCIceCandidateType;

pub(crate) const COMPONENT_RTP: u16 = 1;
pub(crate) const ICE_PROTOCOL_UDP: &str = "udp";

const CANDIDATE_PREFIX: &str = "candidate:";
const DEFAULT_LOCAL_PREFERENCE: u16 = 65535;

/// RTCIceCandidate is a parsed local or remote candidate.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RTCIceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub address: String,
    pub protocol: String,
    pub port: u16,
    pub typ: RTCIceCandidateType,
    pub component: u16,
    pub related_address: String,
    pub related_port: u16,
}

impl RTCIceCandidate {
    pub(crate) fn new_host(addr: SocketAddr) -> Self {
        RTCIceCandidate::new(RTCIceCandidateType::Host, addr, None)
    }

    /// new_server_reflexive builds the candidate a STUN server mapped `base` to.
    pub(crate) fn new_server_reflexive(mapped: SocketAddr, base: SocketAddr) -> Self {
        RTCIceCandidate::new(RTCIceCandidateType::Srflx, mapped, Some(base))
    }

    /// new_peer_reflexive is the candidate learned from the source of an
    /// inbound check that matched no signaled candidate.
    pub(crate) fn new_peer_reflexive(addr: SocketAddr) -> Self {
        RTCIceCandidate::new(RTCIceCandidateType::Prflx, addr, None)
    }

    fn new(typ: RTCIceCandidateType, addr: SocketAddr, related: Option<SocketAddr>) -> Self {
        let address = addr.ip().to_string();

        let mut buf = vec![];
        buf.extend_from_slice(typ.to_string().as_bytes());
        buf.extend_from_slice(address.as_bytes());
        buf.extend_from_slice(ICE_PROTOCOL_UDP.as_bytes());
        let foundation = Crc::<u32>::new(&CRC_32_ISCSI).checksum(&buf).to_string();

        let (related_address, related_port) = match related {
            Some(r) => (r.ip().to_string(), r.port()),
            None => (String::new(), 0),
        };

        RTCIceCandidate {
            foundation,
            priority: candidate_priority(typ, DEFAULT_LOCAL_PREFERENCE, COMPONENT_RTP),
            address,
            protocol: ICE_PROTOCOL_UDP.to_owned(),
            port: addr.port(),
            typ,
            component: COMPONENT_RTP,
            related_address,
            related_port,
        }
    }

    /// marshal renders the candidate attribute value, without the
    /// `candidate:` prefix, as it appears in an `a=candidate` line.
    pub fn marshal(&self) -> String {
        let mut val = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.address,
            self.port,
            self.typ
        );

        if !self.related_address.is_empty() {
            val += format!(
                " raddr {} rport {}",
                self.related_address, self.related_port
            )
            .as_str();
        }

        val
    }

    /// addr returns the transport address checks are sent to. Hostnames and
    /// addresses no packet can be routed to are rejected.
    pub fn addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|_| Error::ErrICECandidateUnroutable(self.address.clone()))?;

        let unroutable = ip.is_unspecified()
            || ip.is_multicast()
            || matches!(ip, IpAddr::V4(v4) if v4.is_broadcast())
            || self.port == 0;
        if unroutable {
            return Err(Error::ErrICECandidateUnroutable(format!(
                "{}:{}",
                self.address, self.port
            )));
        }

        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn to_json(&self, sdp_mid: &str, sdp_mline_index: u16) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: format!("{CANDIDATE_PREFIX}{}", self.marshal()),
            sdp_mid: Some(sdp_mid.to_owned()),
            sdp_mline_index: Some(sdp_mline_index),
            username_fragment: None,
        }
    }
}

impl fmt::Display for RTCIceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}:{}",
            self.protocol, self.typ, self.address, self.port
        )?;
        if !self.related_address.is_empty() {
            write!(f, " related {}:{}", self.related_address, self.related_port)?;
        }
        Ok(())
    }
}

pub(crate) fn candidate_priority(typ: RTCIceCandidateType, local_preference: u16, component: u16) -> u32 {
    (1 << 24) * u32::from(typ.preference())
        + (1 << 8) * u32::from(local_preference)
        + (256 - u32::from(component))
}

/// unmarshal_candidate parses a candidate attribute, accepting the value with
/// or without the `a=` and `candidate:` prefixes.
pub fn unmarshal_candidate(raw: &str) -> Result<RTCIceCandidate> {
    let value = raw.trim();
    let value = value.strip_prefix("a=").unwrap_or(value);
    let value = value.strip_prefix(CANDIDATE_PREFIX).unwrap_or(value);

    let split: Vec<&str> = value.split_whitespace().collect();
    if split.len() < 8 {
        return Err(Error::ErrICECandidateMalformed(format!(
            "attribute too short ({})",
            split.len()
        )));
    }

    let malformed = |field: &str| Error::ErrICECandidateMalformed(format!("invalid {field}"));

    // Foundation
    let foundation = split[0].to_owned();

    // Component
    let component: u16 = split[1].parse().map_err(|_| malformed("component"))?;

    // Network
    let protocol = split[2].to_lowercase();
    if protocol != ICE_PROTOCOL_UDP {
        return Err(Error::ErrICEProtocolUnknown);
    }

    // Priority
    let priority: u32 = split[3].parse().map_err(|_| malformed("priority"))?;

    // Address
    let address = split[4].to_owned();

    // Port
    let port: u16 = split[5].parse().map_err(|_| malformed("port"))?;

    if split[6] != "typ" {
        return Err(malformed("type keyword"));
    }
    let typ = RTCIceCandidateType::from(split[7]);
    if typ == RTCIceCandidateType::Unspecified {
        return Err(Error::ErrICECandidateTypeUnknown);
    }

    let mut related_address = String::new();
    let mut related_port = 0;

    // extension attributes come as key/value pairs
    for pair in split[8..].chunks(2) {
        match pair {
            ["raddr", addr] => related_address = (*addr).to_owned(),
            ["rport", p] => related_port = p.parse().map_err(|_| malformed("related port"))?,
            [key, _] => log::trace!("ignoring candidate extension {key}"),
            _ => return Err(malformed("extension attribute")),
        }
    }

    Ok(RTCIceCandidate {
        foundation,
        priority,
        address,
        protocol,
        port,
        typ,
        component,
        related_address,
        related_port,
    })
}

/// RTCIceCandidateInit is the candidate as exchanged over the signaling
/// channel, tagged with the media section it belongs to.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RTCIceCandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_ice_candidate_serialization() {
        let tests = vec![
            (
                RTCIceCandidateInit {
                    candidate: "candidate:abc123".to_string(),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                    username_fragment: Some("def".to_string()),
                },
                r#"{"candidate":"candidate:abc123","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"def"}"#,
            ),
            (
                RTCIceCandidateInit {
                    candidate: "candidate:abc123".to_string(),
                    sdp_mid: None,
                    sdp_mline_index: None,
                    username_fragment: None,
                },
                r#"{"candidate":"candidate:abc123","sdpMid":null,"sdpMLineIndex":null,"usernameFragment":null}"#,
            ),
        ];

        for (candidate_init, expected_string) in tests {
            let result = serde_json::to_string(&candidate_init);
            assert!(result.is_ok(), "testCase: marshal err: {result:?}");
            let candidate_data = result.unwrap();
            assert_eq!(candidate_data, expected_string, "string is not expected");

            let result = serde_json::from_str::<RTCIceCandidateInit>(&candidate_data);
            assert!(result.is_ok(), "testCase: unmarshal err: {result:?}");
            if let Ok(actual_candidate_init) = result {
                assert_eq!(actual_candidate_init, candidate_init);
            }
        }
    }

    #[test]
    fn test_ice_candidate_marshal() -> Result<()> {
        let host = RTCIceCandidate::new_host("192.168.1.20:50000".parse()?);
        assert_eq!(host.typ, RTCIceCandidateType::Host);
        assert_eq!(host.priority, 2130706431);

        let parsed = unmarshal_candidate(&host.marshal())?;
        assert_eq!(parsed, host);

        let srflx = RTCIceCandidate::new_server_reflexive(
            "203.0.113.7:61000".parse()?,
            "192.168.1.20:50000".parse()?,
        );
        let init = srflx.to_json("audio", 0);
        assert!(init.candidate.starts_with("candidate:"));
        assert!(init.candidate.ends_with("typ srflx raddr 192.168.1.20 rport 50000"));
        assert_eq!(unmarshal_candidate(&init.candidate)?, srflx);
        assert!(host.priority > srflx.priority);

        Ok(())
    }

    #[test]
    fn test_unmarshal_candidate() -> Result<()> {
        let c = unmarshal_candidate(
            "a=candidate:842163049 1 UDP 1677729535 198.51.100.3 61665 typ srflx raddr 10.0.1.1 rport 8998 generation 0",
        )?;
        assert_eq!(c.foundation, "842163049");
        assert_eq!(c.protocol, "udp");
        assert_eq!(c.typ, RTCIceCandidateType::Srflx);
        assert_eq!(c.related_address, "10.0.1.1");
        assert_eq!(c.related_port, 8998);
        assert_eq!(c.addr()?, "198.51.100.3:61665".parse::<SocketAddr>()?);

        Ok(())
    }

    #[test]
    fn test_unmarshal_candidate_invalid() {
        let tests = vec![
            ("", "empty"),
            ("candidate:1 1 udp 2130706431 127.0.0.1 typ host", "too short"),
            ("candidate:1 x udp 2130706431 127.0.0.1 5000 typ host", "bad component"),
            ("candidate:1 1 sctp 2130706431 127.0.0.1 5000 typ host", "bad protocol"),
            ("candidate:1 1 udp 2130706431 127.0.0.1 99999 typ host", "bad port"),
            ("candidate:1 1 udp 2130706431 127.0.0.1 5000 kind host", "no typ"),
            ("candidate:1 1 udp 2130706431 127.0.0.1 5000 typ bogus", "bad type"),
            ("candidate:1 1 udp 2130706431 127.0.0.1 5000 typ host raddr", "dangling ext"),
        ];

        for (raw, name) in tests {
            match unmarshal_candidate(raw) {
                Ok(c) => panic!("{name}: expected error, got {c:?}"),
                Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidCandidate, "{name}: {err}"),
            }
        }
    }

    #[test]
    fn test_ice_candidate_unroutable() -> Result<()> {
        let tests = vec![
            "candidate:1 1 udp 2130706431 0.0.0.0 5000 typ host",
            "candidate:1 1 udp 2130706431 224.0.0.1 5000 typ host",
            "candidate:1 1 udp 2130706431 255.255.255.255 5000 typ host",
            "candidate:1 1 udp 2130706431 127.0.0.1 0 typ host",
            "candidate:1 1 udp 2130706431 abcd.local 5000 typ host",
        ];

        for raw in tests {
            let c = unmarshal_candidate(raw)?;
            let result = c.addr();
            assert!(
                matches!(result, Err(Error::ErrICECandidateUnroutable(_))),
                "{raw}: {result:?}"
            );
        }

        Ok(())
    }
}
