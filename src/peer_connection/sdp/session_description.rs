use std::io::Cursor;

use sdp::description::session::SessionDescription;
use serde::{Deserialize, Serialize};

use super::sdp_type::RTCSdpType;
use crate::error::{Error, Result};

/// SessionDescription is used to expose local and remote session descriptions.
///
/// ## Specifications
///
/// * [MDN]
/// * [W3C]
///
/// [MDN]: https://developer.mozilla.org/en-US/docs/Web/API/RTCSessionDescription
/// [W3C]: https://w3c.github.io/webrtc-pc/#rtcsessiondescription-class
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct RTCSessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: RTCSdpType,

    pub sdp: String,

    /// This will never be initialized by callers, internal use only
    #[serde(skip)]
    pub(crate) parsed: Option<SessionDescription>,
}

/// Two descriptions are equal when type and body match, the parsed cache is ignored.
impl PartialEq for RTCSessionDescription {
    fn eq(&self, other: &Self) -> bool {
        self.sdp_type == other.sdp_type && self.sdp == other.sdp
    }
}

impl Eq for RTCSessionDescription {}

impl RTCSessionDescription {
    /// Given SDP representing an answer, wrap it in an RTCSessionDescription
    /// that can be given to an RTCPeerConnection.
    pub fn answer(sdp: String) -> Result<RTCSessionDescription> {
        RTCSessionDescription::with_type(RTCSdpType::Answer, sdp)
    }

    /// Given SDP representing an offer, wrap it in an RTCSessionDescription
    /// that can be given to an RTCPeerConnection.
    pub fn offer(sdp: String) -> Result<RTCSessionDescription> {
        RTCSessionDescription::with_type(RTCSdpType::Offer, sdp)
    }

    /// Given SDP representing an answer, wrap it in an RTCSessionDescription
    /// that can be given to an RTCPeerConnection. `pranswer` is used when the
    /// answer may not be final, or when updating a previously sent pranswer.
    pub fn pranswer(sdp: String) -> Result<RTCSessionDescription> {
        RTCSessionDescription::with_type(RTCSdpType::Pranswer, sdp)
    }

    fn with_type(sdp_type: RTCSdpType, sdp: String) -> Result<RTCSessionDescription> {
        let mut desc = RTCSessionDescription {
            sdp_type,
            sdp,
            parsed: None,
        };

        let parsed = desc.unmarshal()?;
        desc.parsed = Some(parsed);

        Ok(desc)
    }

    /// serialize renders the description as the `{"type":..,"sdp":..}` text
    /// exchanged over the signaling channel.
    pub fn serialize(&self) -> Result<String> {
        if self.sdp_type == RTCSdpType::Unspecified {
            return Err(Error::ErrPeerConnSDPTypeInvalidValue);
        }
        serde_json::to_string(self).map_err(|e| Error::ErrSessionDescriptionMalformed(e.to_string()))
    }

    /// parse reads a description produced by `serialize`. The envelope, the
    /// type token and the SDP body are all validated, so a description that
    /// parses can be applied without further format errors.
    pub fn parse(text: &str) -> Result<RTCSessionDescription> {
        let mut desc: RTCSessionDescription = serde_json::from_str(text)
            .map_err(|e| Error::ErrSessionDescriptionMalformed(e.to_string()))?;
        if desc.sdp_type == RTCSdpType::Unspecified {
            return Err(Error::ErrPeerConnSDPTypeInvalidValue);
        }

        let parsed = desc.unmarshal()?;
        desc.parsed = Some(parsed);

        Ok(desc)
    }

    /// Unmarshal is a helper to deserialize the sdp
    pub fn unmarshal(&self) -> Result<SessionDescription> {
        let mut reader = Cursor::new(self.sdp.as_bytes());
        let parsed = SessionDescription::unmarshal(&mut reader)?;
        Ok(parsed)
    }
}
