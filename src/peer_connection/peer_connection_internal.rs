use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use ::sdp::description::session::{Origin, SessionDescription};
use portable_atomic::{AtomicBool, AtomicU8};
use tokio::sync::{mpsc, Mutex};
use util::sync::Mutex as SyncMutex;

use super::*;
use crate::api::setting_engine::SettingEngine;
use crate::error::flatten_errs;
use crate::ice_transport::ice_parameters::math_rand_alpha;
use crate::ice_transport::RTCIceAgent;
use crate::media_stream::stream_registry::StreamRegistry;
use crate::peer_connection::sdp::{
    answer_media_sections, check_answer_matches_offer, extract_ice_details, get_mid_value,
    media_index_of, offer_media_sections, populate_local_sdp, stream_details_from_sdp,
    update_sdp_origin, MediaSection, PopulateSdpParams,
};
use crate::peer_connection::signaling_state::{next_signaling_state, StateChangeOp};

const CNAME_LEN: usize = 16;

/// Events delivered to the observer from the session's notifier task, in the
/// order they were raised.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Candidate(RTCIceCandidateInit),
    GatheringComplete,
    IceState(RTCIceConnectionState),
    RenegotiationNeeded,
    Error(Error),
}

pub(crate) struct PeerConnectionInternal {
    pub(crate) session_id: u64,
    pub(crate) setting_engine: Arc<SettingEngine>,
    pub(crate) configuration: SyncMutex<RTCConfiguration>,
    pub(crate) observer: Arc<dyn PeerConnectionObserver>,

    pub(crate) ops: Arc<Operations>,
    pub(crate) ice_agent: RTCIceAgent,
    pub(crate) registry: SyncMutex<StreamRegistry>,

    pub(crate) signaling_state: AtomicU8,
    pub(crate) is_closed: AtomicBool,
    pub(crate) is_disposed: AtomicBool,

    pub(crate) current_local_description: Mutex<Option<RTCSessionDescription>>,
    pub(crate) current_remote_description: Mutex<Option<RTCSessionDescription>>,
    pub(crate) pending_local_description: Mutex<Option<RTCSessionDescription>>,
    pub(crate) pending_remote_description: Mutex<Option<RTCSessionDescription>>,

    pub(crate) last_offer: Mutex<String>,
    pub(crate) last_answer: Mutex<String>,
    sdp_origin: Mutex<Origin>,
    cname: String,

    events_tx: SyncMutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
}

impl PeerConnectionInternal {
    pub(crate) fn new(
        setting_engine: Arc<SettingEngine>,
        session_id: u64,
        configuration: RTCConfiguration,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> Arc<Self> {
        let ice_agent = RTCIceAgent::new(
            Arc::clone(&setting_engine),
            configuration.ice_servers.clone(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pc = Arc::new(PeerConnectionInternal {
            session_id,
            setting_engine,
            configuration: SyncMutex::new(configuration),
            observer,
            ops: Arc::new(Operations::new()),
            ice_agent,
            registry: SyncMutex::new(StreamRegistry::new()),
            signaling_state: AtomicU8::new(RTCSignalingState::Stable as u8),
            is_closed: AtomicBool::new(false),
            is_disposed: AtomicBool::new(false),
            current_local_description: Mutex::new(None),
            current_remote_description: Mutex::new(None),
            pending_local_description: Mutex::new(None),
            pending_remote_description: Mutex::new(None),
            last_offer: Mutex::new(String::new()),
            last_answer: Mutex::new(String::new()),
            sdp_origin: Mutex::new(Origin::default()),
            cname: math_rand_alpha(CNAME_LEN),
            events_tx: SyncMutex::new(Some(events_tx)),
        });

        PeerConnectionInternal::start_notifier(Arc::downgrade(&pc), events_rx);
        pc.bind_ice_handlers();

        pc
    }

    fn bind_ice_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.ice_agent
            .on_local_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
                let weak = Weak::clone(&weak);
                Box::pin(async move {
                    if let Some(pc) = weak.upgrade() {
                        pc.on_local_candidate(c).await;
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        self.ice_agent
            .on_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let weak = Weak::clone(&weak);
                Box::pin(async move {
                    if let Some(pc) = weak.upgrade() {
                        log::info!("ICE connection state changed: {state}");
                        pc.send_event(SessionEvent::IceState(state));
                    }
                })
            }));
    }

    /// start_notifier delivers queued events to the observer one at a time.
    /// It ends once the session is gone or its event sender was dropped.
    fn start_notifier(
        weak: Weak<PeerConnectionInternal>,
        mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let pc = match weak.upgrade() {
                    Some(pc) => pc,
                    None => break,
                };
                pc.deliver(event).await;
            }
            log::trace!("session notifier exited");
        });
    }

    async fn deliver(&self, event: SessionEvent) {
        let closed = self.is_closed.load(Ordering::SeqCst);
        match event {
            SessionEvent::Candidate(c) => {
                if closed {
                    log::trace!("dropping candidate {} after close", c.candidate);
                    return;
                }
                self.observer.on_ice_candidate(c).await;
            }
            SessionEvent::GatheringComplete => {
                if !closed {
                    self.observer.on_ice_gathering_complete().await;
                }
            }
            SessionEvent::IceState(state) => {
                self.observer.on_state_change(StateType::Ice(state)).await;
            }
            SessionEvent::RenegotiationNeeded => {
                if !closed {
                    self.observer.on_renegotiation_needed().await;
                }
            }
            SessionEvent::Error(err) => self.observer.on_error(err).await,
        }
    }

    pub(crate) fn send_event(&self, event: SessionEvent) {
        if let Some(events_tx) = &*self.events_tx.lock() {
            if let Err(err) = events_tx.send(event) {
                log::trace!("session notifier gone, dropping {:?}", err.0);
            }
        }
    }

    async fn on_local_candidate(&self, c: Option<RTCIceCandidate>) {
        if self.is_closed.load(Ordering::SeqCst) {
            return;
        }

        let c = match c {
            Some(c) => c,
            None => {
                log::debug!("ICE gathering complete for session {}", self.session_id);
                self.send_event(SessionEvent::GatheringComplete);
                return;
            }
        };

        // candidates are bundled on the first media section
        let sdp_mid = match self.local_description().await {
            Some(desc) => desc
                .parsed
                .as_ref()
                .and_then(|p| p.media_descriptions.first())
                .and_then(get_mid_value)
                .cloned()
                .unwrap_or_default(),
            None => String::new(),
        };

        self.send_event(SessionEvent::Candidate(c.to_json(&sdp_mid, 0)));
    }

    pub(crate) fn signaling_state(&self) -> RTCSignalingState {
        self.signaling_state.load(Ordering::SeqCst).into()
    }

    pub(crate) async fn local_description(&self) -> Option<RTCSessionDescription> {
        if let Some(pending) = &*self.pending_local_description.lock().await {
            return Some(pending.clone());
        }
        self.current_local_description.lock().await.clone()
    }

    pub(crate) async fn remote_description(&self) -> Option<RTCSessionDescription> {
        if let Some(pending) = &*self.pending_remote_description.lock().await {
            return Some(pending.clone());
        }
        self.current_remote_description.lock().await.clone()
    }

    fn check_closed(&self) -> Result<()> {
        if self.is_closed.load(Ordering::SeqCst) {
            Err(Error::ErrConnectionClosed)
        } else {
            Ok(())
        }
    }

    async fn generate_sdp(
        &self,
        media_sections: &[MediaSection],
        remote_media: Option<&[String]>,
        streams: &[Arc<MediaStream>],
    ) -> Result<SessionDescription> {
        let mut d = SessionDescription::new_jsep_session_description(false);
        {
            let mut sdp_origin = self.sdp_origin.lock().await;
            update_sdp_origin(&mut sdp_origin, &mut d);
        }

        let ice_params = self.ice_agent.local_parameters();
        let candidates = self.ice_agent.local_candidates();

        populate_local_sdp(
            d,
            media_sections,
            remote_media,
            PopulateSdpParams {
                ice_params: &ice_params,
                candidates: &candidates,
                ice_gathering_state: self.ice_agent.gathering_state(),
                streams,
                cname: &self.cname,
            },
        )
    }

    pub(crate) async fn create_offer(
        &self,
        options: Option<RTCOfferOptions>,
    ) -> Result<RTCSessionDescription> {
        self.check_closed()?;

        let state = self.signaling_state();
        if !state.can_create_offer() {
            return Err(Error::ErrIncorrectSignalingState(state));
        }

        let options = options.unwrap_or_else(|| self.configuration.lock().constraints.into());
        let streams = self.registry.lock().local_streams();
        let media_sections = offer_media_sections(&streams, &options);

        let d = self.generate_sdp(&media_sections, None, &streams).await?;
        let sdp = d.marshal();

        {
            let mut last_offer = self.last_offer.lock().await;
            *last_offer = sdp.clone();
        }
        log::debug!(
            "session {} created offer with {} media sections",
            self.session_id,
            media_sections.len()
        );

        Ok(RTCSessionDescription {
            sdp_type: RTCSdpType::Offer,
            sdp,
            parsed: Some(d),
        })
    }

    pub(crate) async fn create_answer(
        &self,
        options: Option<RTCAnswerOptions>,
    ) -> Result<RTCSessionDescription> {
        self.check_closed()?;

        let state = self.signaling_state();
        if !state.can_create_answer() {
            return Err(Error::ErrIncorrectSignalingState(state));
        }

        let remote = self
            .remote_description()
            .await
            .ok_or(Error::ErrNoRemoteDescription)?;
        let parsed = match remote.parsed {
            Some(parsed) => parsed,
            None => remote.unmarshal()?,
        };

        if let Some(options) = options {
            log::trace!(
                "answer voice activity detection: {}",
                options.voice_activity_detection
            );
        }

        let streams = self.registry.lock().local_streams();
        let media_sections = answer_media_sections(&parsed, &streams);
        let remote_media: Vec<String> = parsed
            .media_descriptions
            .iter()
            .map(|m| m.media_name.media.clone())
            .collect();

        let d = self
            .generate_sdp(&media_sections, Some(remote_media.as_slice()), &streams)
            .await?;
        let sdp = d.marshal();

        {
            let mut last_answer = self.last_answer.lock().await;
            *last_answer = sdp.clone();
        }
        log::debug!("session {} created answer", self.session_id);

        Ok(RTCSessionDescription {
            sdp_type: RTCSdpType::Answer,
            sdp,
            parsed: Some(d),
        })
    }

    /// commit_state moves the signaling state from `cur` to `next_state` and
    /// announces it. Operations are serialized, so only close can have moved
    /// the state since `cur` was read; the terminal state is never overwritten.
    async fn commit_state(
        &self,
        cur: RTCSignalingState,
        next_state: RTCSignalingState,
    ) -> Result<()> {
        if let Err(actual) = self.signaling_state.compare_exchange(
            cur as u8,
            next_state as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            log::debug!(
                "signaling state moved to {} while applying {next_state}",
                RTCSignalingState::from(actual)
            );
            return Err(Error::ErrConnectionClosed);
        }
        if cur == next_state {
            return Ok(());
        }

        log::info!("signaling state changed to {next_state}");
        self.observer
            .on_state_change(StateType::Signaling(next_state))
            .await;

        self.check_closed()
    }

    pub(crate) async fn set_local_description(&self, mut desc: RTCSessionDescription) -> Result<()> {
        self.check_closed()?;

        // JSEP 5.4
        if desc.sdp.is_empty() {
            desc.sdp = match desc.sdp_type {
                RTCSdpType::Answer | RTCSdpType::Pranswer => self.last_answer.lock().await.clone(),
                RTCSdpType::Offer => self.last_offer.lock().await.clone(),
                RTCSdpType::Unspecified => return Err(Error::ErrPeerConnSDPTypeInvalidValue),
            };
        }
        if desc.sdp_type == RTCSdpType::Unspecified {
            return Err(Error::ErrPeerConnSDPTypeInvalidValue);
        }

        let cur = self.signaling_state();
        let next_state = next_signaling_state(cur, StateChangeOp::SetLocal, desc.sdp_type)?;

        match desc.sdp_type {
            RTCSdpType::Offer => {
                if desc.sdp != *self.last_offer.lock().await {
                    return Err(Error::ErrSDPDoesNotMatchOffer);
                }
            }
            _ => {
                if desc.sdp != *self.last_answer.lock().await {
                    return Err(Error::ErrSDPDoesNotMatchAnswer);
                }
            }
        }

        if desc.parsed.is_none() {
            desc.parsed = Some(desc.unmarshal()?);
        }

        self.check_closed()?;
        // stable->SetLocal(offer)->have-local-offer
        // have-remote-offer->SetLocal(pranswer)->have-local-pranswer
        if desc.sdp_type.is_provisional() {
            let mut pending_local_description = self.pending_local_description.lock().await;
            *pending_local_description = Some(desc);
        } else {
            // have-remote-offer->SetLocal(answer)->stable
            // have-local-pranswer->SetLocal(answer)->stable
            let pending_remote_description = self.pending_remote_description.lock().await.take();
            self.pending_local_description.lock().await.take();

            *self.current_local_description.lock().await = Some(desc);
            *self.current_remote_description.lock().await = pending_remote_description;
        }

        self.commit_state(cur, next_state).await?;

        self.ice_agent.gather().await
    }

    pub(crate) async fn set_remote_description(&self, mut desc: RTCSessionDescription) -> Result<()> {
        self.check_closed()?;

        if desc.sdp_type == RTCSdpType::Unspecified {
            return Err(Error::ErrPeerConnSDPTypeInvalidValue);
        }

        let cur = self.signaling_state();
        let next_state = next_signaling_state(cur, StateChangeOp::SetRemote, desc.sdp_type)?;

        let parsed = match desc.parsed.take() {
            Some(parsed) => parsed,
            None => desc.unmarshal()?,
        };

        if desc.sdp_type != RTCSdpType::Offer {
            let local_offer = self
                .pending_local_description
                .lock()
                .await
                .clone()
                .ok_or(Error::ErrNoRemoteDescription)?;
            let local_parsed = match local_offer.parsed {
                Some(p) => p,
                None => local_offer.unmarshal()?,
            };
            check_answer_matches_offer(&local_parsed, &parsed)?;
        }

        let ice = extract_ice_details(&parsed)?;
        let details = stream_details_from_sdp(&parsed);

        self.check_closed()?;
        self.ice_agent
            .set_remote_credentials(RTCIceParameters {
                username_fragment: ice.ufrag,
                password: ice.pwd,
            })
            .await?;

        self.check_closed()?;
        desc.parsed = Some(parsed);
        // stable->SetRemote(offer)->have-remote-offer
        // have-local-offer->SetRemote(pranswer)->have-remote-pranswer
        if desc.sdp_type.is_provisional() {
            let mut pending_remote_description = self.pending_remote_description.lock().await;
            *pending_remote_description = Some(desc);
        } else {
            // have-local-offer->SetRemote(answer)->stable
            // have-remote-pranswer->SetRemote(answer)->stable
            let pending_local_description = self.pending_local_description.lock().await.take();
            self.pending_remote_description.lock().await.take();

            *self.current_remote_description.lock().await = Some(desc);
            *self.current_local_description.lock().await = pending_local_description;
        }

        self.commit_state(cur, next_state).await?;

        for err in ice.unsupported {
            log::warn!("skipping remote candidate from description: {err}");
            self.send_event(SessionEvent::Error(err));
        }
        for c in ice.candidates {
            self.check_closed()?;
            if let Err(err) = self.ice_agent.add_remote_candidate(c).await {
                log::warn!("skipping remote candidate from description: {err}");
                self.send_event(SessionEvent::Error(err));
            }
        }

        let changes = {
            let mut registry = self.registry.lock();
            // close sets is_closed before it empties the registry under this lock
            self.check_closed()?;
            registry.update_remote(&details)
        };
        for stream in changes.added {
            self.check_closed()?;
            log::debug!("remote stream {} added", stream.label());
            self.observer.on_add_stream(stream).await;
        }
        for stream in changes.removed {
            log::debug!("remote stream {} removed", stream.label());
            stream.end();
            self.check_closed()?;
            self.observer.on_remove_stream(stream).await;
        }

        self.check_closed()
    }

    pub(crate) async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.check_closed()?;

        let remote = self
            .remote_description()
            .await
            .ok_or(Error::ErrNoRemoteDescription)?;
        let parsed = match remote.parsed {
            Some(parsed) => parsed,
            None => remote.unmarshal()?,
        };
        media_index_of(
            &parsed,
            candidate.sdp_mid.as_deref(),
            candidate.sdp_mline_index,
        )?;

        let raw = candidate.candidate.trim();
        if raw.is_empty() {
            log::trace!("remote end of candidates");
            return Ok(());
        }

        let c = unmarshal_candidate(raw)?;
        self.ice_agent.add_remote_candidate(c).await
    }

    pub(crate) fn add_stream(&self, stream: Arc<MediaStream>) -> Result<()> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrTransportRejected);
        }

        let label = stream.label().to_owned();
        self.registry.lock().add_local(stream)?;
        log::debug!("local stream {label} added");

        self.renegotiation_needed();
        Ok(())
    }

    pub(crate) fn remove_stream(&self, stream: &MediaStream) {
        let removed = self.registry.lock().remove_local(stream.label());
        if removed.is_none() {
            log::trace!("local stream {} not registered", stream.label());
            return;
        }
        log::debug!("local stream {} removed", stream.label());

        self.renegotiation_needed();
    }

    fn renegotiation_needed(&self) {
        if self.is_closed.load(Ordering::SeqCst) {
            return;
        }
        if self.signaling_state() == RTCSignalingState::Stable {
            self.send_event(SessionEvent::RenegotiationNeeded);
        }
    }

    pub(crate) fn update_ice(&self, configuration: RTCConfiguration) -> Result<()> {
        self.check_closed()?;
        configuration.validate()?;

        self.ice_agent
            .update_ice_servers(configuration.ice_servers.clone())?;
        *self.configuration.lock() = configuration;
        Ok(())
    }

    /// close releases the session's resources: local streams first, then the
    /// ICE agent, then the operations queue. Closing twice is a no-op.
    pub(crate) async fn close(&self) -> Result<()> {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // <https://www.w3.org/TR/webrtc/#dom-rtcpeerconnection-close> (step #4)
        self.signaling_state
            .store(RTCSignalingState::Closed as u8, Ordering::SeqCst);

        let mut close_errs = vec![];

        {
            let mut registry = self.registry.lock();
            for stream in registry.take_local() {
                stream.end();
            }
            for stream in registry.take_remote() {
                stream.end();
            }
        }

        if let Err(err) = self.ice_agent.close().await {
            close_errs.push(err);
        }

        if let Err(err) = self.ops.close().await {
            close_errs.push(err);
        }

        // let the notifier drain what was raised before close
        self.events_tx.lock().take();

        log::debug!("session {} closed", self.session_id);
        flatten_errs(close_errs)
    }
}
