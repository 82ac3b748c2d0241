use std::fmt;

use url::Url;

use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 3478;
const DEFAULT_TLS_PORT: u16 = 5349;

/// SchemeType indicates the type of server used in an ICE server URL.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RTCIceServerScheme {
    Stun,
    Stuns,
    Turn,
    Turns,
}

impl RTCIceServerScheme {
    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "stun" => Some(RTCIceServerScheme::Stun),
            "stuns" => Some(RTCIceServerScheme::Stuns),
            "turn" => Some(RTCIceServerScheme::Turn),
            "turns" => Some(RTCIceServerScheme::Turns),
            _ => None,
        }
    }

    fn is_secure(self) -> bool {
        matches!(self, RTCIceServerScheme::Stuns | RTCIceServerScheme::Turns)
    }

    fn is_turn(self) -> bool {
        matches!(self, RTCIceServerScheme::Turn | RTCIceServerScheme::Turns)
    }
}

impl fmt::Display for RTCIceServerScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCIceServerScheme::Stun => "stun",
            RTCIceServerScheme::Stuns => "stuns",
            RTCIceServerScheme::Turn => "turn",
            RTCIceServerScheme::Turns => "turns",
        };
        write!(f, "{s}")
    }
}

/// RTCIceServerUrl is one validated `stun:`/`turn:` URL (RFC 7064, RFC 7065).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RTCIceServerUrl {
    pub scheme: RTCIceServerScheme,
    pub host: String,
    pub port: u16,
    pub transport: Option<String>,
    pub username: String,
    pub password: String,
}

impl RTCIceServerUrl {
    pub fn parse_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)?;

        let scheme = RTCIceServerScheme::from_str(url.scheme())
            .ok_or_else(|| Error::ErrICEServerSchemeUnknown(url.scheme().to_owned()))?;

        // stun:host:port has no authority, the host and port live in the path
        let (host, port) = split_host_port(url.path())?;
        if host.is_empty() {
            return Err(Error::ErrICEServerNoHost);
        }
        let port = port.unwrap_or(if scheme.is_secure() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        });

        let transport = url
            .query_pairs()
            .find(|(k, _)| k == "transport")
            .map(|(_, v)| v.into_owned());

        Ok(RTCIceServerUrl {
            scheme,
            host,
            port,
            transport,
            username: String::new(),
            password: String::new(),
        })
    }

    /// host_port renders the address in a form `lookup_host` accepts.
    pub(crate) fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(raw: &str) -> Result<(String, Option<u16>)> {
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or(Error::ErrICEServerNoHost)?;
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p.parse::<u16>()?),
            None => None,
        };
        return Ok((host.to_owned(), port));
    }

    match raw.rsplit_once(':') {
        Some((host, p)) => Ok((host.to_owned(), Some(p.parse::<u16>()?))),
        None => Ok((raw.to_owned(), None)),
    }
}

/// ICEServer describes a single STUN and TURN server that can be used by
/// the ICEAgent to establish a connection with a peer.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RTCIceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl RTCIceServer {
    pub(crate) fn validate(&self) -> Result<()> {
        self.urls()?;
        Ok(())
    }

    pub(crate) fn urls(&self) -> Result<Vec<RTCIceServerUrl>> {
        let mut urls = vec![];

        for url_str in &self.urls {
            let mut url = RTCIceServerUrl::parse_url(url_str)?;
            if url.scheme.is_turn() {
                // https://www.w3.org/TR/webrtc/#set-the-configuration (step #11.3.2)
                if self.username.is_empty() || self.credential.is_empty() {
                    return Err(Error::ErrNoTurnCredentials);
                }
                url.username = self.username.clone();
                url.password = self.credential.clone();
            }

            urls.push(url);
        }

        Ok(urls)
    }
}

/// stun_server_urls returns the URLs server reflexive candidates can be
/// gathered from. Secure and TURN URLs are skipped.
pub(crate) fn stun_server_urls(servers: &[RTCIceServer]) -> Vec<RTCIceServerUrl> {
    let mut out = vec![];
    for server in servers {
        match server.urls() {
            Ok(urls) => out.extend(
                urls.into_iter()
                    .filter(|u| u.scheme == RTCIceServerScheme::Stun),
            ),
            Err(err) => log::warn!("skipping ICE server {:?}: {}", server.urls, err),
        }
    }
    out
}
