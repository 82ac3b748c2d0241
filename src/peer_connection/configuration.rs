use crate::ice_transport::ice_server::RTCIceServer;
use crate::peer_connection::offer_answer_options::MediaConstraints;

/// A Configuration defines how peer-to-peer communication via PeerConnection
/// is established or re-established.
/// Configurations may be set up once and reused across multiple connections.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RTCConfiguration {
    /// ice_servers defines a slice describing servers available to be used by
    /// ICE, such as STUN and TURN servers.
    pub ice_servers: Vec<RTCIceServer>,

    /// constraints are the session-wide defaults for offer creation.
    pub constraints: MediaConstraints,
}

impl RTCConfiguration {
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        for server in &self.ice_servers {
            server.validate()?;
        }
        Ok(())
    }
}
