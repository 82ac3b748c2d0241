use std::fmt;

use crate::error::{Error, Result};
use crate::peer_connection::sdp::sdp_type::RTCSdpType;

/// Which side of the negotiation a description is applied to.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StateChangeOp {
    #[default]
    SetLocal,
    SetRemote,
}

impl fmt::Display for StateChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StateChangeOp::SetLocal => write!(f, "SetLocal"),
            StateChangeOp::SetRemote => write!(f, "SetRemote"),
        }
    }
}

/// SignalingState indicates the signaling state of the offer/answer process.
///
/// ## Specifications
///
/// * [W3C]
/// * [RFC 8829 §4.1.11]
///
/// [W3C]: https://w3c.github.io/webrtc-pc/#dom-peerconnection-signaling-state
/// [RFC 8829 §4.1.11]: https://www.rfc-editor.org/rfc/rfc8829#section-4.1.11
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RTCSignalingState {
    #[default]
    Unspecified = 0,

    /// Stable indicates there is no offer/answer exchange in progress. This
    /// is also the initial state, in which case the local and remote
    /// descriptions are empty.
    Stable,

    /// HaveLocalOffer indicates that a local description, of type "offer",
    /// has been successfully applied.
    HaveLocalOffer,

    /// HaveRemoteOffer indicates that a remote description, of type "offer",
    /// has been successfully applied.
    HaveRemoteOffer,

    /// HaveLocalPranswer indicates that a remote description of type "offer"
    /// and a local description of type "pranswer" have been applied.
    HaveLocalPranswer,

    /// HaveRemotePranswer indicates that a local description of type "offer"
    /// and a remote description of type "pranswer" have been applied.
    HaveRemotePranswer,

    /// Closed is terminal, the PeerConnection has been closed.
    Closed,
}

const SIGNALING_STATE_STABLE_STR: &str = "stable";
const SIGNALING_STATE_HAVE_LOCAL_OFFER_STR: &str = "have-local-offer";
const SIGNALING_STATE_HAVE_REMOTE_OFFER_STR: &str = "have-remote-offer";
const SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR: &str = "have-local-pranswer";
const SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR: &str = "have-remote-pranswer";
const SIGNALING_STATE_CLOSED_STR: &str = "closed";

impl From<&str> for RTCSignalingState {
    fn from(raw: &str) -> Self {
        match raw {
            SIGNALING_STATE_STABLE_STR => RTCSignalingState::Stable,
            SIGNALING_STATE_HAVE_LOCAL_OFFER_STR => RTCSignalingState::HaveLocalOffer,
            SIGNALING_STATE_HAVE_REMOTE_OFFER_STR => RTCSignalingState::HaveRemoteOffer,
            SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR => RTCSignalingState::HaveLocalPranswer,
            SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR => RTCSignalingState::HaveRemotePranswer,
            SIGNALING_STATE_CLOSED_STR => RTCSignalingState::Closed,
            _ => RTCSignalingState::Unspecified,
        }
    }
}

impl fmt::Display for RTCSignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCSignalingState::Stable => SIGNALING_STATE_STABLE_STR,
            RTCSignalingState::HaveLocalOffer => SIGNALING_STATE_HAVE_LOCAL_OFFER_STR,
            RTCSignalingState::HaveRemoteOffer => SIGNALING_STATE_HAVE_REMOTE_OFFER_STR,
            RTCSignalingState::HaveLocalPranswer => SIGNALING_STATE_HAVE_LOCAL_PRANSWER_STR,
            RTCSignalingState::HaveRemotePranswer => SIGNALING_STATE_HAVE_REMOTE_PRANSWER_STR,
            RTCSignalingState::Closed => SIGNALING_STATE_CLOSED_STR,
            RTCSignalingState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

impl From<u8> for RTCSignalingState {
    fn from(v: u8) -> Self {
        match v {
            1 => RTCSignalingState::Stable,
            2 => RTCSignalingState::HaveLocalOffer,
            3 => RTCSignalingState::HaveRemoteOffer,
            4 => RTCSignalingState::HaveLocalPranswer,
            5 => RTCSignalingState::HaveRemotePranswer,
            6 => RTCSignalingState::Closed,
            _ => RTCSignalingState::Unspecified,
        }
    }
}

impl RTCSignalingState {
    /// An offer can be created while no remote offer is pending.
    pub(crate) fn can_create_offer(self) -> bool {
        matches!(
            self,
            RTCSignalingState::Stable | RTCSignalingState::HaveLocalOffer
        )
    }

    /// An answer (or pranswer) needs a pending remote offer.
    pub(crate) fn can_create_answer(self) -> bool {
        matches!(
            self,
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer
        )
    }
}

/// next_signaling_state returns the state reached by applying a description
/// of `sdp_type` on the `op` side while in `cur`, or the invalid transition
/// error when the offer/answer rules forbid it.
pub(crate) fn next_signaling_state(
    cur: RTCSignalingState,
    op: StateChangeOp,
    sdp_type: RTCSdpType,
) -> Result<RTCSignalingState> {
    use RTCSdpType::*;
    use RTCSignalingState::*;
    use StateChangeOp::*;

    let next = match (cur, op, sdp_type) {
        (Stable, SetLocal, Offer) => Some(HaveLocalOffer),
        (Stable, SetRemote, Offer) => Some(HaveRemoteOffer),

        // re-offer before the answer arrived
        (HaveLocalOffer, SetLocal, Offer) => Some(HaveLocalOffer),
        (HaveLocalOffer, SetRemote, Answer) => Some(Stable),
        (HaveLocalOffer, SetRemote, Pranswer) => Some(HaveRemotePranswer),

        (HaveRemotePranswer, SetRemote, Answer) => Some(Stable),

        (HaveRemoteOffer, SetLocal, Answer) => Some(Stable),
        (HaveRemoteOffer, SetLocal, Pranswer) => Some(HaveLocalPranswer),

        (HaveLocalPranswer, SetLocal, Answer) => Some(Stable),

        _ => None,
    };

    next.ok_or(Error::ErrSignalingStateProposedTransitionInvalid {
        from: cur,
        applying: sdp_type,
        is_local: op == SetLocal,
    })
}
