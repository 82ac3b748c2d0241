//! Observer trait for session events

use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::ice_transport::ice_candidate::RTCIceCandidateInit;
use crate::ice_transport::ice_connection_state::RTCIceConnectionState;
use crate::media_stream::MediaStream;
use crate::peer_connection::signaling_state::RTCSignalingState;

/// StateType names which state a [`PeerConnectionObserver::on_state_change`]
/// notification refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StateType {
    Signaling(RTCSignalingState),
    Ice(RTCIceConnectionState),
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateType::Signaling(s) => write!(f, "signaling:{s}"),
            StateType::Ice(s) => write!(f, "ice:{s}"),
        }
    }
}

/// Trait for handling session events asynchronously
///
/// Callbacks run on the session's tasks, one at a time and in the order the
/// underlying changes happened. All methods have default no-op
/// implementations.
///
/// # Example
///
/// ```no_run
/// use rtc_session::ice_transport::ice_candidate::RTCIceCandidateInit;
/// use rtc_session::peer_connection::observer::PeerConnectionObserver;
///
/// struct MyObserver;
///
/// #[async_trait::async_trait]
/// impl PeerConnectionObserver for MyObserver {
///     async fn on_ice_candidate(&self, candidate: RTCIceCandidateInit) {
///         println!("New ICE candidate: {}", candidate.candidate);
///         // Send to remote peer via signaling
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait PeerConnectionObserver: Send + Sync + 'static {
    /// Called for each gathered local candidate. Never called after close.
    async fn on_ice_candidate(&self, _candidate: RTCIceCandidateInit) {}

    /// Called once candidate gathering has finished
    async fn on_ice_gathering_complete(&self) {}

    /// Called for errors that have no pending call to report them to
    async fn on_error(&self, _err: Error) {}

    /// Called once per signaling or ICE connection state change
    async fn on_state_change(&self, _state: StateType) {}

    /// Called when a remote stream appears in a remote description
    async fn on_add_stream(&self, _stream: Arc<MediaStream>) {}

    /// Called when a previously announced remote stream disappears
    async fn on_remove_stream(&self, _stream: Arc<MediaStream>) {}

    /// Called when local streams changed while the session was stable
    async fn on_renegotiation_needed(&self) {}
}

/// NoopObserver ignores every event.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoopObserver {}

impl PeerConnectionObserver for NoopObserver {}
