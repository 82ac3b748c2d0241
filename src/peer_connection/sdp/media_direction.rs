use std::fmt;

/// MediaDirection is the `a=sendrecv|sendonly|recvonly|inactive` attribute
/// of a media section.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaDirection {
    #[default]
    Unspecified,

    /// Sendrecv indicates the local side offers to both send and receive.
    Sendrecv,

    /// Sendonly indicates the local side offers to send only.
    Sendonly,

    /// Recvonly indicates the local side offers to receive only.
    Recvonly,

    /// Inactive indicates the section carries no media in either direction.
    Inactive,
}

const MEDIA_DIRECTION_SENDRECV_STR: &str = "sendrecv";
const MEDIA_DIRECTION_SENDONLY_STR: &str = "sendonly";
const MEDIA_DIRECTION_RECVONLY_STR: &str = "recvonly";
const MEDIA_DIRECTION_INACTIVE_STR: &str = "inactive";

impl From<&str> for MediaDirection {
    fn from(raw: &str) -> Self {
        match raw {
            MEDIA_DIRECTION_SENDRECV_STR => MediaDirection::Sendrecv,
            MEDIA_DIRECTION_SENDONLY_STR => MediaDirection::Sendonly,
            MEDIA_DIRECTION_RECVONLY_STR => MediaDirection::Recvonly,
            MEDIA_DIRECTION_INACTIVE_STR => MediaDirection::Inactive,
            _ => MediaDirection::Unspecified,
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            MediaDirection::Sendrecv => MEDIA_DIRECTION_SENDRECV_STR,
            MediaDirection::Sendonly => MEDIA_DIRECTION_SENDONLY_STR,
            MediaDirection::Recvonly => MEDIA_DIRECTION_RECVONLY_STR,
            MediaDirection::Inactive => MEDIA_DIRECTION_INACTIVE_STR,
            MediaDirection::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

impl MediaDirection {
    /// reverse indicate the opposite direction
    pub fn reverse(&self) -> MediaDirection {
        match *self {
            MediaDirection::Sendonly => MediaDirection::Recvonly,
            MediaDirection::Recvonly => MediaDirection::Sendonly,
            _ => *self,
        }
    }

    pub fn intersect(&self, other: MediaDirection) -> MediaDirection {
        Self::from_send_recv(
            self.has_send() && other.has_send(),
            self.has_recv() && other.has_recv(),
        )
    }

    pub fn from_send_recv(send: bool, recv: bool) -> MediaDirection {
        match (send, recv) {
            (true, true) => Self::Sendrecv,
            (true, false) => Self::Sendonly,
            (false, true) => Self::Recvonly,
            (false, false) => Self::Inactive,
        }
    }

    pub fn has_send(&self) -> bool {
        matches!(self, Self::Sendrecv | Self::Sendonly)
    }

    pub fn has_recv(&self) -> bool {
        matches!(self, Self::Sendrecv | Self::Recvonly)
    }
}
