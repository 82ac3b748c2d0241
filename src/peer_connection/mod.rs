#[cfg(test)]
pub(crate) mod peer_connection_test;

pub mod completion;
pub mod configuration;
pub mod observer;
pub mod offer_answer_options;
pub(crate) mod operation;
mod peer_connection_internal;
pub mod sdp;
pub mod signaling_state;

use std::sync::Arc;

use completion::{completion, Completion};
use configuration::RTCConfiguration;
use observer::{PeerConnectionObserver, StateType};
use offer_answer_options::{RTCAnswerOptions, RTCOfferOptions};
use operation::{Operation, Operations};
use peer_connection_internal::PeerConnectionInternal;
use signaling_state::RTCSignalingState;

use crate::api::API;
use crate::error::{Error, Result};
use crate::ice_transport::ice_candidate::{unmarshal_candidate, RTCIceCandidate, RTCIceCandidateInit};
use crate::ice_transport::ice_connection_state::RTCIceConnectionState;
use crate::ice_transport::ice_gathering_state::RTCIceGatheringState;
use crate::ice_transport::ice_parameters::RTCIceParameters;
use crate::media_stream::MediaStream;
use crate::peer_connection::sdp::sdp_type::RTCSdpType;
use crate::peer_connection::sdp::session_description::RTCSessionDescription;

/// PeerConnection is one negotiated session with a remote peer: it owns the
/// offer/answer state machine, the ICE agent and the registry of local and
/// remote streams.
///
/// Negotiation calls return a [`Completion`] right away and are run one at
/// a time, in call order. Events are reported to the observer given at
/// construction.
pub struct RTCPeerConnection {
    pub(crate) internal: Arc<PeerConnectionInternal>,
}

impl RTCPeerConnection {
    /// creates a PeerConnection from a validated configuration. Use
    /// api.new_peer_connection instead of this function.
    pub(crate) async fn new(
        api: &API,
        session_id: u64,
        configuration: RTCConfiguration,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> Result<Self> {
        configuration.validate()?;

        let internal = PeerConnectionInternal::new(
            api.setting_engine(),
            session_id,
            configuration,
            observer,
        );
        log::debug!("session {session_id} created");

        Ok(RTCPeerConnection { internal })
    }

    /// session_id identifies the session within the process.
    pub fn session_id(&self) -> u64 {
        self.internal.session_id
    }

    /// enqueue_negotiation runs `f` on the operations queue and resolves the
    /// returned completion with its result.
    fn enqueue_negotiation<T, A, F, Fut>(
        &self,
        description: &'static str,
        arg: A,
        f: F,
    ) -> Completion<T>
    where
        T: Send + 'static,
        A: Send + Sync + 'static,
        F: Fn(Arc<PeerConnectionInternal>, A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        if self
            .internal
            .is_closed
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Completion::ready(Err(Error::ErrConnectionClosed));
        }

        let (sink, completion) = completion();
        let pci = Arc::clone(&self.internal);
        let f = Arc::new(f);
        let mut pending = Some((sink, arg));

        let op = Operation::new(
            move || {
                let pci = Arc::clone(&pci);
                let f = Arc::clone(&f);
                let pending = pending.take();
                Box::pin(async move {
                    if let Some((sink, arg)) = pending {
                        let mut result = (*f)(Arc::clone(&pci), arg).await;
                        // a close that landed mid-operation wins over its outcome
                        if pci.is_closed.load(std::sync::atomic::Ordering::SeqCst) {
                            result = Err(Error::ErrConnectionClosed);
                        }
                        if let Err(err) = &result {
                            log::debug!("{description} failed: {err}");
                        }
                        sink.resolve(result);
                    }
                })
            },
            description,
        );

        // a rejected operation drops its sink, the completion resolves as closed
        if let Err(err) = self.internal.ops.enqueue(op) {
            log::debug!("{description} not queued: {err}");
        }

        completion
    }

    /// create_offer starts the PeerConnection and generates the localDescription
    /// <https://w3c.github.io/webrtc-pc/#dom-rtcpeerconnection-createoffer>
    pub fn create_offer(
        &self,
        options: Option<RTCOfferOptions>,
    ) -> Completion<RTCSessionDescription> {
        self.enqueue_negotiation("create_offer", options, |pci, options| async move {
            pci.create_offer(options).await
        })
    }

    /// create_answer starts the PeerConnection and generates the localDescription
    pub fn create_answer(
        &self,
        options: Option<RTCAnswerOptions>,
    ) -> Completion<RTCSessionDescription> {
        self.enqueue_negotiation("create_answer", options, |pci, options| async move {
            pci.create_answer(options).await
        })
    }

    /// set_local_description sets the SessionDescription of the local peer.
    /// An empty body applies the last created offer or answer.
    pub fn set_local_description(&self, desc: RTCSessionDescription) -> Completion<()> {
        self.enqueue_negotiation("set_local_description", desc, |pci, desc| async move {
            pci.set_local_description(desc).await
        })
    }

    /// set_remote_description sets the SessionDescription of the remote peer.
    /// Candidates it carries are added to the ICE agent, and remote streams
    /// it describes are announced once the signaling change was reported.
    pub fn set_remote_description(&self, desc: RTCSessionDescription) -> Completion<()> {
        self.enqueue_negotiation("set_remote_description", desc, |pci, desc| async move {
            pci.set_remote_description(desc).await
        })
    }

    /// add_ice_candidate accepts an ICE candidate string and adds it
    /// to the existing set of candidates.
    pub async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.internal.add_ice_candidate(candidate).await
    }

    /// add_stream hands a local stream to the session. The stream is offered
    /// by the next negotiation.
    pub fn add_stream(&self, stream: Arc<MediaStream>) -> Result<()> {
        self.internal.add_stream(stream)
    }

    /// remove_stream stops offering a local stream. Removing a stream that is
    /// not registered does nothing.
    pub fn remove_stream(&self, stream: &MediaStream) {
        self.internal.remove_stream(stream)
    }

    /// update_ice replaces the ICE servers and constraints used from now on.
    pub fn update_ice(&self, configuration: RTCConfiguration) -> Result<()> {
        self.internal.update_ice(configuration)
    }

    /// get_configuration returns a copy of the current configuration.
    pub fn get_configuration(&self) -> RTCConfiguration {
        self.internal.configuration.lock().clone()
    }

    /// local_description returns PendingLocalDescription if it is not null and
    /// otherwise it returns CurrentLocalDescription. This property is used to
    /// determine if set_local_description has already been called.
    /// <https://www.w3.org/TR/webrtc/#dom-rtcpeerconnection-localdescription>
    pub async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.internal.local_description().await
    }

    /// remote_description returns pending_remote_description if it is not null and
    /// otherwise it returns current_remote_description. This property is used to
    /// determine if setRemoteDescription has already been called.
    /// <https://www.w3.org/TR/webrtc/#dom-rtcpeerconnection-remotedescription>
    pub async fn remote_description(&self) -> Option<RTCSessionDescription> {
        self.internal.remote_description().await
    }

    pub async fn current_local_description(&self) -> Option<RTCSessionDescription> {
        self.internal.current_local_description.lock().await.clone()
    }

    pub async fn pending_local_description(&self) -> Option<RTCSessionDescription> {
        self.internal.pending_local_description.lock().await.clone()
    }

    pub async fn current_remote_description(&self) -> Option<RTCSessionDescription> {
        self.internal.current_remote_description.lock().await.clone()
    }

    pub async fn pending_remote_description(&self) -> Option<RTCSessionDescription> {
        self.internal.pending_remote_description.lock().await.clone()
    }

    pub fn local_streams(&self) -> Vec<Arc<MediaStream>> {
        self.internal.registry.lock().local_streams()
    }

    pub fn remote_streams(&self) -> Vec<Arc<MediaStream>> {
        self.internal.registry.lock().remote_streams()
    }

    /// signaling_state attribute returns the signaling state of the
    /// PeerConnection instance.
    pub fn signaling_state(&self) -> RTCSignalingState {
        self.internal.signaling_state()
    }

    /// ice_connection_state returns the ICE connection state of the
    /// PeerConnection instance.
    pub fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.internal.ice_agent.connection_state()
    }

    /// ice_gathering_state attribute returns the ICE gathering state of the
    /// PeerConnection instance.
    pub fn ice_gathering_state(&self) -> RTCIceGatheringState {
        self.internal.ice_agent.gathering_state()
    }

    /// close ends the PeerConnection. Queued negotiation calls resolve with
    /// the closed error. Calling close again is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.internal.close().await
    }

    /// dispose releases every resource owned by the session, exactly once:
    /// local streams, the ICE agent, then the operations queue.
    pub async fn dispose(&self) -> Result<()> {
        if self
            .internal
            .is_disposed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            log::warn!("session {} disposed twice", self.internal.session_id);
            return Err(Error::ErrSessionAlreadyDisposed);
        }

        self.internal.close().await
    }
}
