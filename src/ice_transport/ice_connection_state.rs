use std::fmt;

/// Indicates the connectivity state of the ICE agent.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RTCIceConnectionState {
    #[default]
    Unspecified,

    /// Indicates the agent has not started gathering or checking.
    New,

    /// Indicates local candidates are being gathered and no check is running yet.
    Gathering,

    /// Indicates remote credentials and at least one remote candidate are
    /// known and connectivity checks are in progress.
    Checking,

    /// Indicates a check succeeded and a candidate pair was selected.
    Connected,

    /// Indicates the selected pair was also confirmed by the peer's checks.
    Completed,

    /// Indicates no pair succeeded before the failed timeout.
    Failed,

    /// Indicates the agent released its sockets. Closed is terminal.
    Closed,
}

const ICE_CONNECTION_STATE_NEW_STR: &str = "new";
const ICE_CONNECTION_STATE_GATHERING_STR: &str = "gathering";
const ICE_CONNECTION_STATE_CHECKING_STR: &str = "checking";
const ICE_CONNECTION_STATE_CONNECTED_STR: &str = "connected";
const ICE_CONNECTION_STATE_COMPLETED_STR: &str = "completed";
const ICE_CONNECTION_STATE_FAILED_STR: &str = "failed";
const ICE_CONNECTION_STATE_CLOSED_STR: &str = "closed";

/// takes a string and converts it to iceconnection_state
impl From<&str> for RTCIceConnectionState {
    fn from(raw: &str) -> Self {
        match raw {
            ICE_CONNECTION_STATE_NEW_STR => RTCIceConnectionState::New,
            ICE_CONNECTION_STATE_GATHERING_STR => RTCIceConnectionState::Gathering,
            ICE_CONNECTION_STATE_CHECKING_STR => RTCIceConnectionState::Checking,
            ICE_CONNECTION_STATE_CONNECTED_STR => RTCIceConnectionState::Connected,
            ICE_CONNECTION_STATE_COMPLETED_STR => RTCIceConnectionState::Completed,
            ICE_CONNECTION_STATE_FAILED_STR => RTCIceConnectionState::Failed,
            ICE_CONNECTION_STATE_CLOSED_STR => RTCIceConnectionState::Closed,
            _ => RTCIceConnectionState::Unspecified,
        }
    }
}

impl From<u8> for RTCIceConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => RTCIceConnectionState::New,
            2 => RTCIceConnectionState::Gathering,
            3 => RTCIceConnectionState::Checking,
            4 => RTCIceConnectionState::Connected,
            5 => RTCIceConnectionState::Completed,
            6 => RTCIceConnectionState::Failed,
            7 => RTCIceConnectionState::Closed,
            _ => RTCIceConnectionState::Unspecified,
        }
    }
}

impl RTCIceConnectionState {
    /// Completed, Failed and Closed are only ever left for Closed.
    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            RTCIceConnectionState::Completed
                | RTCIceConnectionState::Failed
                | RTCIceConnectionState::Closed
        )
    }

    /// can_transition_to reports whether the agent may move from self to
    /// `next`. States only move forward, Closed is reachable from anywhere.
    pub(crate) fn can_transition_to(self, next: RTCIceConnectionState) -> bool {
        if self == next {
            return false;
        }
        if next == RTCIceConnectionState::Closed {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        (next as u8) > (self as u8)
    }
}

impl fmt::Display for RTCIceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RTCIceConnectionState::New => ICE_CONNECTION_STATE_NEW_STR,
            RTCIceConnectionState::Gathering => ICE_CONNECTION_STATE_GATHERING_STR,
            RTCIceConnectionState::Checking => ICE_CONNECTION_STATE_CHECKING_STR,
            RTCIceConnectionState::Connected => ICE_CONNECTION_STATE_CONNECTED_STR,
            RTCIceConnectionState::Completed => ICE_CONNECTION_STATE_COMPLETED_STR,
            RTCIceConnectionState::Failed => ICE_CONNECTION_STATE_FAILED_STR,
            RTCIceConnectionState::Closed => ICE_CONNECTION_STATE_CLOSED_STR,
            RTCIceConnectionState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}
