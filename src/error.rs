use std::io;
use std::net::AddrParseError;
use std::num::ParseIntError;
use std::string::FromUtf8Error;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError as MpscSendError;

use crate::peer_connection::sdp::sdp_type::RTCSdpType;
use crate::peer_connection::signaling_state::RTCSignalingState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// ErrConnectionClosed indicates an operation executed after connection
    /// has already been closed.
    #[error("connection closed")]
    ErrConnectionClosed,

    /// ErrSessionAlreadyDisposed indicates dispose was called twice on the
    /// same PeerConnection.
    #[error("peer connection has already been disposed")]
    ErrSessionAlreadyDisposed,

    /// ErrEngineNotInitialized indicates a PeerConnection was requested before
    /// the process-wide engine was initialized with `api::initialize`.
    #[error("engine not initialized, call api::initialize first")]
    ErrEngineNotInitialized,

    /// ErrNoRemoteDescription indicates that an operation was rejected because
    /// the remote description is not set
    #[error("remote description is not set")]
    ErrNoRemoteDescription,

    /// ErrIncorrectSignalingState indicates that the signaling state of PeerConnection is not correct
    #[error("operation can not be run in current signaling state {0}")]
    ErrIncorrectSignalingState(RTCSignalingState),

    #[error(
        "invalid proposed signaling state transition from {} applying {} {}",
        from,
        if *is_local { "local" } else { "remote" },
        applying
    )]
    ErrSignalingStateProposedTransitionInvalid {
        from: RTCSignalingState,
        applying: RTCSdpType,
        is_local: bool,
    },

    #[error("new sdp does not match previous offer")]
    ErrSDPDoesNotMatchOffer,
    #[error("new sdp does not match previous answer")]
    ErrSDPDoesNotMatchAnswer,

    #[error("provided value is not a valid enum value of type SDPType")]
    ErrPeerConnSDPTypeInvalidValue,
    #[error("malformed session description: {0}")]
    ErrSessionDescriptionMalformed(String),

    /// ErrSessionDescriptionMissingIceUfrag indicates set_remote_description was called with a SessionDescription that
    /// is missing an ice-ufrag value
    #[error("set_remote_description called with no ice-ufrag")]
    ErrSessionDescriptionMissingIceUfrag,

    /// ErrSessionDescriptionMissingIcePwd indicates set_remote_description was called with a SessionDescription that
    /// is missing an ice-pwd value
    #[error("set_remote_description called with no ice-pwd")]
    ErrSessionDescriptionMissingIcePwd,

    /// ErrSessionDescriptionConflictingIceUfrag  indicates set_remote_description was called with a SessionDescription that
    /// contains multiple conflicting ice-ufrag values
    #[error("set_remote_description called with multiple conflicting ice-ufrag values")]
    ErrSessionDescriptionConflictingIceUfrag,

    /// ErrSessionDescriptionConflictingIcePwd indicates set_remote_description was called with a SessionDescription that
    /// contains multiple conflicting ice-pwd values
    #[error("set_remote_description called with multiple conflicting ice-pwd values")]
    ErrSessionDescriptionConflictingIcePwd,

    #[error("answer media sections do not match the offer")]
    ErrSDPMediaSectionsMismatch,

    #[error("malformed ice candidate: {0}")]
    ErrICECandidateMalformed(String),
    #[error("unknown candidate type")]
    ErrICECandidateTypeUnknown,
    #[error("unknown protocol")]
    ErrICEProtocolUnknown,
    #[error("unroutable ice candidate address {0}")]
    ErrICECandidateUnroutable(String),
    #[error("unsupported ice candidate transport: {0}")]
    ErrICECandidateUnsupported(String),
    #[error("ice candidate refers to an unknown media section")]
    ErrICECandidateMediaSectionUnknown,

    #[error("unknown ICE server scheme {0}")]
    ErrICEServerSchemeUnknown(String),
    #[error("ICE server url has no host")]
    ErrICEServerNoHost,

    /// ErrNoTurnCredentials indicates that a TURN server URL was provided
    /// without required credentials.
    #[error("turn server credentials required")]
    ErrNoTurnCredentials,

    /// ErrICEAgentClosed indicates the agent has released its sockets.
    #[error("ICE agent closed")]
    ErrICEAgentClosed,

    /// ErrTransportRejected indicates a local stream could not be handed to
    /// the transport.
    #[error("stream rejected by transport")]
    ErrTransportRejected,

    /// ErrExistingStream indicates a stream with the same label is already registered.
    #[error("stream with label {0} already exists")]
    ErrExistingStream(String),

    /// ErrExistingTrack indicates that a track already exists.
    #[error("track already exists")]
    ErrExistingTrack,

    #[error("{0}")]
    Sdp(#[from] sdp::Error),
    #[error("{0}")]
    Stun(#[from] stun::Error),

    #[error("io: {0}")]
    Io(String),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("mpsc send: {0}")]
    MpscSend(String),
    #[error("parse int: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("parse addr: {0}")]
    ParseAddr(#[from] AddrParseError),
    #[error("parse url: {0}")]
    ParseUrl(#[from] url::ParseError),

    #[allow(non_camel_case_types)]
    #[error("{0}")]
    new(String),
}

/// ErrorKind groups errors by how the caller is expected to react to them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed session description text. State is unchanged, the caller
    /// may retry with corrected input.
    Format,
    /// Operation illegal in the current signaling state.
    InvalidState,
    /// Malformed or unroutable ICE candidate. State is unchanged.
    InvalidCandidate,
    /// Operation attempted after close.
    Closed,
    /// Local stream rejected by the transport.
    TransportRejected,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ErrPeerConnSDPTypeInvalidValue
            | Error::ErrSessionDescriptionMalformed(_)
            | Error::ErrSessionDescriptionMissingIceUfrag
            | Error::ErrSessionDescriptionMissingIcePwd
            | Error::ErrSessionDescriptionConflictingIceUfrag
            | Error::ErrSessionDescriptionConflictingIcePwd
            | Error::ErrSDPMediaSectionsMismatch
            | Error::Sdp(_) => ErrorKind::Format,

            Error::ErrNoRemoteDescription
            | Error::ErrIncorrectSignalingState(_)
            | Error::ErrSignalingStateProposedTransitionInvalid { .. }
            | Error::ErrSDPDoesNotMatchOffer
            | Error::ErrSDPDoesNotMatchAnswer => ErrorKind::InvalidState,

            Error::ErrICECandidateMalformed(_)
            | Error::ErrICECandidateTypeUnknown
            | Error::ErrICEProtocolUnknown
            | Error::ErrICECandidateUnroutable(_)
            | Error::ErrICECandidateUnsupported(_)
            | Error::ErrICECandidateMediaSectionUnknown => ErrorKind::InvalidCandidate,

            Error::ErrConnectionClosed | Error::ErrICEAgentClosed => ErrorKind::Closed,

            Error::ErrTransportRejected | Error::ErrExistingStream(_) => {
                ErrorKind::TransportRejected
            }

            _ => ErrorKind::Other,
        }
    }
}

// Because Tokio SendError is parameterized, we sadly lose the backtrace.
impl<T> From<MpscSendError<T>> for Error {
    fn from(e: MpscSendError<T>) -> Self {
        Error::MpscSend(e.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// flatten_errs flattens multiple errors into one
pub fn flatten_errs(errs: Vec<impl Into<Error>>) -> Result<()> {
    if errs.is_empty() {
        Ok(())
    } else {
        let errs_strs: Vec<String> = errs.into_iter().map(|e| e.into().to_string()).collect();
        Err(Error::new(errs_strs.join("\n")))
    }
}
