use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use super::*;
use crate::api::setting_engine::SettingEngine;
use crate::api::{initialize, APIBuilder};
use crate::error::ErrorKind;
use crate::ice_transport::ice_server::RTCIceServer;
use crate::media_stream::{MediaKind, MediaStreamTrack, MediaStreamTrackState};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Candidate(RTCIceCandidateInit),
    GatheringComplete,
    State(StateType),
    AddStream(String),
    RemoveStream(String),
    RenegotiationNeeded,
    Error(String),
}

/// RecordingObserver forwards every callback to a channel. With `stall`
/// set, the matching state change is held for the given time after it is
/// recorded.
pub(crate) struct RecordingObserver {
    events_tx: mpsc::UnboundedSender<Event>,
    stall: Option<(StateType, Duration)>,
}

#[async_trait::async_trait]
impl PeerConnectionObserver for RecordingObserver {
    async fn on_ice_candidate(&self, candidate: RTCIceCandidateInit) {
        let _ = self.events_tx.send(Event::Candidate(candidate));
    }

    async fn on_ice_gathering_complete(&self) {
        let _ = self.events_tx.send(Event::GatheringComplete);
    }

    async fn on_error(&self, err: Error) {
        let _ = self.events_tx.send(Event::Error(err.to_string()));
    }

    async fn on_state_change(&self, state: StateType) {
        let delay = match &self.stall {
            Some((stalled, delay)) if *stalled == state => Some(*delay),
            _ => None,
        };
        let _ = self.events_tx.send(Event::State(state));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn on_add_stream(&self, stream: Arc<MediaStream>) {
        let _ = self
            .events_tx
            .send(Event::AddStream(stream.label().to_owned()));
    }

    async fn on_remove_stream(&self, stream: Arc<MediaStream>) {
        let _ = self
            .events_tx
            .send(Event::RemoveStream(stream.label().to_owned()));
    }

    async fn on_renegotiation_needed(&self) {
        let _ = self.events_tx.send(Event::RenegotiationNeeded);
    }
}

fn new_api() -> API {
    let _ = env_logger::builder().is_test(true).try_init();
    initialize();

    let mut s = SettingEngine::default();
    s.set_ice_timeouts(Some(Duration::from_millis(20)), Some(Duration::from_secs(5)));
    APIBuilder::new().with_setting_engine(s).build()
}

pub(crate) async fn new_pc(
    api: &API,
) -> Result<(RTCPeerConnection, mpsc::UnboundedReceiver<Event>)> {
    new_stalling_pc(api, None).await
}

async fn new_stalling_pc(
    api: &API,
    stall: Option<(StateType, Duration)>,
) -> Result<(RTCPeerConnection, mpsc::UnboundedReceiver<Event>)> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let pc = api
        .new_peer_connection(
            RTCConfiguration::default(),
            Arc::new(RecordingObserver { events_tx, stall }),
        )
        .await?;
    Ok((pc, events_rx))
}

/// assert_invalid_state checks every result failed as an invalid-state
/// error and that `pc` stayed in `state`.
fn assert_invalid_state(
    pc: &RTCPeerConnection,
    state: RTCSignalingState,
    results: Vec<(&str, Result<()>)>,
) {
    for (name, result) in results {
        match result {
            Ok(()) => panic!("{name}: expected error"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidState, "{name}: {err}"),
        }
        assert_eq!(pc.signaling_state(), state, "{name}");
    }
}

fn new_stream(label: &str, tracks: &[(&str, MediaKind)]) -> Result<Arc<MediaStream>> {
    let stream = Arc::new(MediaStream::new(label.to_owned()));
    for (id, kind) in tracks {
        stream.add_track(Arc::new(MediaStreamTrack::new((*id).to_owned(), *kind)))?;
    }
    Ok(stream)
}

/// negotiation_events drains the signaling and stream events received so
/// far, in order.
fn negotiation_events(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::State(StateType::Signaling(_)) | Event::AddStream(_) | Event::RemoveStream(_) => {
                events.push(event)
            }
            _ => {}
        }
    }
    events
}

fn signaling(s: RTCSignalingState) -> Event {
    Event::State(StateType::Signaling(s))
}

/// wire_roundtrip sends a description through its serialized form, as a
/// signaling channel would.
fn wire_roundtrip(desc: &RTCSessionDescription) -> Result<RTCSessionDescription> {
    RTCSessionDescription::parse(&desc.serialize()?)
}

/// signal_pair runs a full offer/answer from `offerer` to `answerer`.
pub(crate) async fn signal_pair(
    offerer: &RTCPeerConnection,
    answerer: &RTCPeerConnection,
) -> Result<()> {
    let offer = offerer.create_offer(None).await?;
    offerer.set_local_description(offer.clone()).await?;
    answerer
        .set_remote_description(wire_roundtrip(&offer)?)
        .await?;

    let answer = answerer.create_answer(None).await?;
    answerer.set_local_description(answer.clone()).await?;
    offerer
        .set_remote_description(wire_roundtrip(&answer)?)
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_offer_answer_end_to_end() -> Result<()> {
    let api = new_api();
    let (pc_a, mut a_rx) = new_pc(&api).await?;
    let (pc_b, mut b_rx) = new_pc(&api).await?;

    pc_a.add_stream(new_stream(
        "stream-a",
        &[("a-audio", MediaKind::Audio), ("a-video", MediaKind::Video)],
    )?)?;
    pc_b.add_stream(new_stream("stream-b", &[("b-audio", MediaKind::Audio)])?)?;

    // offer
    let offer = pc_a.create_offer(None).await?;
    assert_eq!(offer.sdp_type, RTCSdpType::Offer);
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::Stable);
    pc_a.set_local_description(offer.clone()).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::HaveLocalOffer);
    assert_eq!(
        negotiation_events(&mut a_rx),
        vec![signaling(RTCSignalingState::HaveLocalOffer)]
    );

    // remote offer with add-stream
    pc_b.set_remote_description(wire_roundtrip(&offer)?).await?;
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::HaveRemoteOffer);
    assert_eq!(
        negotiation_events(&mut b_rx),
        vec![
            signaling(RTCSignalingState::HaveRemoteOffer),
            Event::AddStream("stream-a".to_owned()),
        ]
    );

    // answer
    let answer = pc_b.create_answer(None).await?;
    assert_eq!(answer.sdp_type, RTCSdpType::Answer);

    // local answer
    pc_b.set_local_description(answer.clone()).await?;
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::Stable);
    assert_eq!(
        negotiation_events(&mut b_rx),
        vec![signaling(RTCSignalingState::Stable)]
    );

    // remote answer with add-stream
    pc_a.set_remote_description(wire_roundtrip(&answer)?).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::Stable);
    assert_eq!(
        negotiation_events(&mut a_rx),
        vec![
            signaling(RTCSignalingState::Stable),
            Event::AddStream("stream-b".to_owned()),
        ]
    );

    let remote_a = pc_b.remote_streams();
    assert_eq!(remote_a.len(), 1);
    assert_eq!(remote_a[0].label(), "stream-a");
    let mut ids: Vec<String> = remote_a[0]
        .tracks()
        .iter()
        .map(|t| t.id().to_owned())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["a-audio".to_owned(), "a-video".to_owned()]);

    let remote_b = pc_a.remote_streams();
    assert_eq!(remote_b.len(), 1);
    assert_eq!(remote_b[0].audio_tracks().len(), 1);
    assert_eq!(remote_b[0].audio_tracks()[0].id(), "b-audio");
    assert!(remote_b[0].video_tracks().is_empty());

    assert_eq!(pc_a.local_description().await, Some(offer.clone()));
    assert_eq!(pc_a.remote_description().await, Some(answer.clone()));
    assert_eq!(pc_b.local_description().await, Some(answer));
    assert_eq!(pc_b.remote_description().await, Some(offer));
    assert!(pc_a.pending_local_description().await.is_none());
    assert!(pc_b.pending_remote_description().await.is_none());

    pc_a.dispose().await?;
    pc_b.dispose().await?;

    Ok(())
}

#[tokio::test]
async fn test_candidate_exchange_reaches_connected() -> Result<()> {
    let api = new_api();
    let (pc_a, mut a_rx) = new_pc(&api).await?;
    let (pc_b, mut b_rx) = new_pc(&api).await?;

    signal_pair(&pc_a, &pc_b).await?;

    let connected = |e: &Event| {
        matches!(
            e,
            Event::State(StateType::Ice(
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
            ))
        )
    };

    let exchange = async {
        let (mut a_connected, mut b_connected) = (false, false);
        let (mut a_candidates, mut b_candidates) = (0, 0);
        while !(a_connected && b_connected) {
            tokio::select! {
                Some(event) = a_rx.recv() => {
                    a_connected |= connected(&event);
                    if let Event::Candidate(c) = event {
                        pc_b.add_ice_candidate(c).await?;
                        a_candidates += 1;
                    }
                }
                Some(event) = b_rx.recv() => {
                    b_connected |= connected(&event);
                    if let Event::Candidate(c) = event {
                        pc_a.add_ice_candidate(c).await?;
                        b_candidates += 1;
                    }
                }
            }
        }
        Ok::<_, Error>((a_candidates, b_candidates))
    };

    let (a_candidates, b_candidates) = timeout(TEST_TIMEOUT, exchange)
        .await
        .map_err(|_| Error::new("peers did not connect".to_owned()))??;
    assert!(a_candidates > 0);
    assert!(b_candidates > 0);
    assert!(matches!(
        pc_a.ice_connection_state(),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
    ));

    pc_a.dispose().await?;
    pc_b.dispose().await?;

    Ok(())
}

#[tokio::test]
async fn test_candidates_embedded_in_later_descriptions() -> Result<()> {
    let api = new_api();
    let (pc_a, mut a_rx) = new_pc(&api).await?;
    let (pc_b, _b_rx) = new_pc(&api).await?;

    let offer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(offer).await?;

    // wait for gathering to finish
    timeout(TEST_TIMEOUT, async {
        while let Some(event) = a_rx.recv().await {
            if event == Event::GatheringComplete {
                break;
            }
        }
    })
    .await
    .map_err(|_| Error::new("gathering did not complete".to_owned()))?;

    // a re-offer carries the gathered candidates
    let reoffer = pc_a.create_offer(None).await?;
    assert!(reoffer.sdp.contains("a=candidate:"));
    assert!(reoffer.sdp.contains("a=end-of-candidates"));
    pc_a.set_local_description(reoffer.clone()).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::HaveLocalOffer);

    pc_b.set_remote_description(wire_roundtrip(&reoffer)?).await?;
    assert_eq!(pc_b.internal.ice_agent.remote_candidates().len(), 1);

    pc_a.close().await?;
    pc_b.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_invalid_state_operations() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, _b_rx) = new_pc(&api).await?;

    let offer = pc_a.create_offer(None).await?;
    let answer_body = RTCSessionDescription::answer(offer.sdp.clone())?;
    let pranswer_body = RTCSessionDescription::pranswer(offer.sdp.clone())?;

    // (name, operation result, state before and after)
    let stable_results = vec![
        (
            "create_answer in stable",
            pc_b.create_answer(None).await.map(|_| ()),
        ),
        (
            "local answer in stable",
            pc_b.set_local_description(answer_body.clone()).await,
        ),
        (
            "local pranswer in stable",
            pc_b.set_local_description(pranswer_body.clone()).await,
        ),
        (
            "remote answer in stable",
            pc_b.set_remote_description(answer_body.clone()).await,
        ),
        (
            "remote pranswer in stable",
            pc_b.set_remote_description(pranswer_body.clone()).await,
        ),
    ];
    for (name, result) in stable_results {
        match result {
            Ok(()) => panic!("{name}: expected error"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidState, "{name}: {err}"),
        }
        assert_eq!(pc_b.signaling_state(), RTCSignalingState::Stable, "{name}");
    }

    pc_a.set_local_description(offer.clone()).await?;
    let have_local_offer_results = vec![
        (
            "create_answer in have-local-offer",
            pc_a.create_answer(None).await.map(|_| ()),
        ),
        (
            "remote offer in have-local-offer",
            pc_a.set_remote_description(offer.clone()).await,
        ),
        (
            "local answer in have-local-offer",
            pc_a.set_local_description(answer_body.clone()).await,
        ),
    ];
    for (name, result) in have_local_offer_results {
        match result {
            Ok(()) => panic!("{name}: expected error"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidState, "{name}: {err}"),
        }
        assert_eq!(
            pc_a.signaling_state(),
            RTCSignalingState::HaveLocalOffer,
            "{name}"
        );
    }

    // an offer may still be created and re-applied
    let reoffer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(reoffer).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::HaveLocalOffer);

    pc_a.close().await?;
    pc_b.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_invalid_state_operations_while_answering() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, _b_rx) = new_pc(&api).await?;

    let offer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(offer.clone()).await?;
    pc_b.set_remote_description(offer.clone()).await?;
    let answer = pc_b.create_answer(None).await?;
    let pranswer = RTCSessionDescription::pranswer(answer.sdp.clone())?;
    let offer_body = RTCSessionDescription::offer(answer.sdp.clone())?;

    assert_invalid_state(
        &pc_b,
        RTCSignalingState::HaveRemoteOffer,
        vec![
            (
                "create_offer in have-remote-offer",
                pc_b.create_offer(None).await.map(|_| ()),
            ),
            (
                "local offer in have-remote-offer",
                pc_b.set_local_description(offer_body.clone()).await,
            ),
            (
                "remote offer in have-remote-offer",
                pc_b.set_remote_description(offer.clone()).await,
            ),
            (
                "remote answer in have-remote-offer",
                pc_b.set_remote_description(answer.clone()).await,
            ),
        ],
    );

    pc_b.set_local_description(pranswer.clone()).await?;
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::HaveLocalPranswer);
    assert_invalid_state(
        &pc_b,
        RTCSignalingState::HaveLocalPranswer,
        vec![
            (
                "create_offer in have-local-pranswer",
                pc_b.create_offer(None).await.map(|_| ()),
            ),
            (
                "local offer in have-local-pranswer",
                pc_b.set_local_description(offer_body.clone()).await,
            ),
            (
                "local pranswer in have-local-pranswer",
                pc_b.set_local_description(pranswer.clone()).await,
            ),
            (
                "remote offer in have-local-pranswer",
                pc_b.set_remote_description(offer.clone()).await,
            ),
            (
                "remote answer in have-local-pranswer",
                pc_b.set_remote_description(answer.clone()).await,
            ),
        ],
    );

    // a final answer may be created after the provisional one
    let final_answer = pc_b.create_answer(None).await?;
    assert_eq!(final_answer.sdp_type, RTCSdpType::Answer);
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::HaveLocalPranswer);

    pc_a.set_remote_description(pranswer).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::HaveRemotePranswer);
    assert_invalid_state(
        &pc_a,
        RTCSignalingState::HaveRemotePranswer,
        vec![
            (
                "create_offer in have-remote-pranswer",
                pc_a.create_offer(None).await.map(|_| ()),
            ),
            (
                "create_answer in have-remote-pranswer",
                pc_a.create_answer(None).await.map(|_| ()),
            ),
            (
                "local offer in have-remote-pranswer",
                pc_a.set_local_description(offer.clone()).await,
            ),
            (
                "remote offer in have-remote-pranswer",
                pc_a.set_remote_description(offer.clone()).await,
            ),
        ],
    );

    pc_b.set_local_description(final_answer.clone()).await?;
    pc_a.set_remote_description(final_answer).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::Stable);
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::Stable);

    pc_a.close().await?;
    pc_b.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_set_local_description_must_match_created() -> Result<()> {
    let api = new_api();
    let (pc, _rx) = new_pc(&api).await?;

    let offer = pc.create_offer(None).await?;
    let tampered = RTCSessionDescription::offer(offer.sdp.replace("a=recvonly", "a=inactive"))?;
    assert_eq!(
        pc.set_local_description(tampered).await,
        Err(Error::ErrSDPDoesNotMatchOffer)
    );
    assert_eq!(pc.signaling_state(), RTCSignalingState::Stable);

    // an empty body applies the last created offer
    pc.set_local_description(RTCSessionDescription {
        sdp_type: RTCSdpType::Offer,
        ..Default::default()
    })
    .await?;
    assert_eq!(pc.signaling_state(), RTCSignalingState::HaveLocalOffer);
    assert_eq!(pc.local_description().await, Some(offer));

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_malformed_remote_description() -> Result<()> {
    let api = new_api();
    let (pc, mut rx) = new_pc(&api).await?;

    let tests = vec![
        ("garbage body", "not an sdp"),
        ("missing ice credentials", "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=mid:0\r\n"),
    ];
    for (name, sdp) in tests {
        let desc = RTCSessionDescription {
            sdp_type: RTCSdpType::Offer,
            sdp: sdp.to_owned(),
            parsed: None,
        };
        match pc.set_remote_description(desc).await {
            Ok(()) => panic!("{name}: expected error"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::Format, "{name}: {err}"),
        }
        assert_eq!(pc.signaling_state(), RTCSignalingState::Stable, "{name}");
    }
    assert!(negotiation_events(&mut rx).is_empty());

    assert!(RTCSessionDescription::parse("{\"type\":\"offer\"").is_err());
    assert!(RTCSessionDescription::parse("{\"type\":\"bogus\",\"sdp\":\"\"}").is_err());

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_description_serialize_parse() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, _b_rx) = new_pc(&api).await?;
    pc_a.add_stream(new_stream("s", &[("t", MediaKind::Video)])?)?;

    let offer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(offer.clone()).await?;
    pc_b.set_remote_description(offer.clone()).await?;
    let answer = pc_b.create_answer(None).await?;

    for desc in [offer, answer] {
        let text = desc.serialize()?;
        let parsed = RTCSessionDescription::parse(&text)?;
        assert_eq!(parsed, desc);
        assert_eq!(parsed.sdp_type, desc.sdp_type);
        assert_eq!(parsed.sdp, desc.sdp);
    }

    pc_a.close().await?;
    pc_b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_pranswer_flow() -> Result<()> {
    let api = new_api();
    let (pc_a, mut a_rx) = new_pc(&api).await?;
    let (pc_b, mut b_rx) = new_pc(&api).await?;

    let offer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(offer.clone()).await?;
    pc_b.set_remote_description(offer).await?;

    let answer = pc_b.create_answer(None).await?;
    let pranswer = RTCSessionDescription::pranswer(answer.sdp.clone())?;

    pc_b.set_local_description(pranswer.clone()).await?;
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::HaveLocalPranswer);
    pc_a.set_remote_description(pranswer).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::HaveRemotePranswer);

    pc_b.set_local_description(answer.clone()).await?;
    pc_a.set_remote_description(answer).await?;
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::Stable);
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::Stable);

    assert_eq!(
        negotiation_events(&mut a_rx),
        vec![
            signaling(RTCSignalingState::HaveLocalOffer),
            signaling(RTCSignalingState::HaveRemotePranswer),
            signaling(RTCSignalingState::Stable),
        ]
    );
    assert_eq!(
        negotiation_events(&mut b_rx),
        vec![
            signaling(RTCSignalingState::HaveRemoteOffer),
            signaling(RTCSignalingState::HaveLocalPranswer),
            signaling(RTCSignalingState::Stable),
        ]
    );

    pc_a.close().await?;
    pc_b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_remote_answer_must_match_offer() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, _b_rx) = new_pc(&api).await?;

    let offer = pc_a.create_offer(Some(RTCOfferOptions {
        offer_to_receive_video: false,
        ..Default::default()
    }))
    .await?;
    pc_a.set_local_description(offer).await?;

    // an answer to a different offer
    let other = pc_b.create_offer(None).await?;
    pc_b.set_local_description(other.clone()).await?;
    let (pc_c, _c_rx) = new_pc(&api).await?;
    pc_c.set_remote_description(other).await?;
    let answer = pc_c.create_answer(None).await?;

    assert_eq!(
        pc_a.set_remote_description(answer).await,
        Err(Error::ErrSDPMediaSectionsMismatch)
    );
    assert_eq!(pc_a.signaling_state(), RTCSignalingState::HaveLocalOffer);

    pc_a.close().await?;
    pc_b.close().await?;
    pc_c.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_add_ice_candidate() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, _b_rx) = new_pc(&api).await?;

    let candidate = |mid: Option<&str>, index: Option<u16>, raw: &str| RTCIceCandidateInit {
        candidate: raw.to_owned(),
        sdp_mid: mid.map(|m| m.to_owned()),
        sdp_mline_index: index,
        username_fragment: None,
    };
    let host = "candidate:1 1 udp 2130706431 127.0.0.1 5000 typ host";

    assert_eq!(
        pc_b.add_ice_candidate(candidate(Some("audio"), Some(0), host))
            .await,
        Err(Error::ErrNoRemoteDescription)
    );

    let offer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(offer.clone()).await?;
    pc_b.set_remote_description(offer).await?;

    let tests = vec![
        ("by mid", candidate(Some("audio"), None, host), None),
        ("by index", candidate(None, Some(1), host), None),
        ("end of candidates", candidate(Some("audio"), Some(0), ""), None),
        (
            "unknown mid",
            candidate(Some("data"), None, host),
            Some(ErrorKind::InvalidCandidate),
        ),
        (
            "index out of range",
            candidate(None, Some(7), host),
            Some(ErrorKind::InvalidCandidate),
        ),
        (
            "malformed",
            candidate(Some("audio"), Some(0), "candidate:1 1 udp"),
            Some(ErrorKind::InvalidCandidate),
        ),
        (
            "unroutable",
            candidate(
                Some("audio"),
                Some(0),
                "candidate:1 1 udp 2130706431 0.0.0.0 5000 typ host",
            ),
            Some(ErrorKind::InvalidCandidate),
        ),
    ];

    for (name, c, expected) in tests {
        let result = pc_b.add_ice_candidate(c).await;
        match (result, expected) {
            (Ok(()), None) => {}
            (Err(err), Some(kind)) => assert_eq!(err.kind(), kind, "{name}: {err}"),
            (result, expected) => panic!("{name}: got {result:?}, expected {expected:?}"),
        }
    }
    assert_eq!(pc_b.internal.ice_agent.remote_candidates().len(), 1);

    pc_a.close().await?;
    pc_b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_add_and_remove_stream() -> Result<()> {
    let api = new_api();
    let (pc, mut rx) = new_pc(&api).await?;
    let stream = new_stream("local", &[("mic", MediaKind::Audio)])?;

    pc.add_stream(Arc::clone(&stream))?;
    let duplicate = new_stream("local", &[])?;
    let err = match pc.add_stream(duplicate) {
        Ok(()) => panic!("expected duplicate label error"),
        Err(err) => err,
    };
    assert_eq!(err, Error::ErrExistingStream("local".to_owned()));
    assert_eq!(err.kind(), ErrorKind::TransportRejected);
    assert_eq!(pc.local_streams().len(), 1);

    pc.remove_stream(&stream);
    pc.remove_stream(&stream);
    assert!(pc.local_streams().is_empty());

    // one renegotiation for the add, one for the first remove
    let mut renegotiations = 0;
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), rx.recv()).await {
        if event == Event::RenegotiationNeeded {
            renegotiations += 1;
        }
    }
    assert_eq!(renegotiations, 2);

    pc.close().await?;
    assert_eq!(
        pc.add_stream(new_stream("late", &[])?),
        Err(Error::ErrTransportRejected)
    );
    Ok(())
}

#[tokio::test]
async fn test_remote_stream_removed_on_renegotiation() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, mut b_rx) = new_pc(&api).await?;
    let stream = new_stream("removable", &[("cam", MediaKind::Video)])?;

    pc_a.add_stream(Arc::clone(&stream))?;
    signal_pair(&pc_a, &pc_b).await?;
    let remote = pc_b.remote_streams();
    assert_eq!(remote.len(), 1);
    negotiation_events(&mut b_rx);

    pc_a.remove_stream(&stream);
    signal_pair(&pc_a, &pc_b).await?;

    assert_eq!(
        negotiation_events(&mut b_rx),
        vec![
            signaling(RTCSignalingState::HaveRemoteOffer),
            Event::RemoveStream("removable".to_owned()),
            signaling(RTCSignalingState::Stable),
        ]
    );
    assert!(pc_b.remote_streams().is_empty());
    assert_eq!(
        remote[0].tracks()[0].ready_state(),
        MediaStreamTrackState::Ended
    );

    pc_a.close().await?;
    pc_b.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_update_ice() -> Result<()> {
    let api = new_api();
    let (pc, _rx) = new_pc(&api).await?;

    let stun = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["stun:stun.example.org:3478".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    };
    pc.update_ice(stun.clone())?;
    assert_eq!(pc.get_configuration(), stun);

    let turn_without_credentials = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["turn:turn.example.org".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    };
    assert_eq!(
        pc.update_ice(turn_without_credentials),
        Err(Error::ErrNoTurnCredentials)
    );
    assert_eq!(pc.get_configuration(), stun);

    pc.close().await?;
    assert_eq!(pc.update_ice(stun), Err(Error::ErrConnectionClosed));
    Ok(())
}

#[tokio::test]
async fn test_new_peer_connection_invalid_configuration() -> Result<()> {
    let api = new_api();
    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["http://example.org".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    };

    let result = api
        .new_peer_connection(config, Arc::new(observer::NoopObserver {}))
        .await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_dispose() -> Result<()> {
    let api = new_api();
    let (pc, _rx) = new_pc(&api).await?;
    let track = Arc::new(MediaStreamTrack::new("mic".to_owned(), MediaKind::Audio));
    let stream = Arc::new(MediaStream::new("local".to_owned()));
    stream.add_track(Arc::clone(&track))?;
    pc.add_stream(stream)?;

    let offer = pc.create_offer(None);
    let queued = pc.create_offer(None);

    pc.dispose().await?;
    assert_eq!(pc.signaling_state(), RTCSignalingState::Closed);
    assert_eq!(track.ready_state(), MediaStreamTrackState::Ended);
    assert!(pc.local_streams().is_empty());

    // calls that had not finished when dispose started fail as closed
    assert_eq!(offer.await.map(|_| ()), Err(Error::ErrConnectionClosed));
    assert_eq!(queued.await.map(|_| ()), Err(Error::ErrConnectionClosed));

    assert_eq!(pc.dispose().await, Err(Error::ErrSessionAlreadyDisposed));

    assert_eq!(
        pc.create_offer(None).await.map(|_| ()),
        Err(Error::ErrConnectionClosed)
    );
    assert_eq!(
        pc.set_remote_description(RTCSessionDescription::default())
            .await,
        Err(Error::ErrConnectionClosed)
    );
    assert_eq!(
        pc.add_ice_candidate(RTCIceCandidateInit::default()).await,
        Err(Error::ErrConnectionClosed)
    );
    assert_eq!(
        pc.ice_connection_state(),
        RTCIceConnectionState::Closed
    );

    Ok(())
}

#[tokio::test]
async fn test_no_candidates_after_close() -> Result<()> {
    let api = new_api();
    let (pc, mut rx) = new_pc(&api).await?;

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;
    pc.close().await?;

    // give the notifier time to drain what was raised before close
    let mut events = vec![];
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), rx.recv()).await {
        events.push(event);
    }
    let closed_at = events
        .iter()
        .position(|e| *e == Event::State(StateType::Ice(RTCIceConnectionState::Closed)));
    if let Some(closed_at) = closed_at {
        assert!(
            !events[closed_at..]
                .iter()
                .any(|e| matches!(e, Event::Candidate(_))),
            "{events:?}"
        );
    }

    Ok(())
}

#[tokio::test]
async fn test_close_during_set_remote_description() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, mut b_rx) = new_stalling_pc(
        &api,
        Some((
            StateType::Signaling(RTCSignalingState::HaveRemoteOffer),
            Duration::from_millis(300),
        )),
    )
    .await?;

    pc_a.add_stream(new_stream("stalled", &[("mic", MediaKind::Audio)])?)?;
    let offer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(offer.clone()).await?;

    // the observer holds the operation inside its signaling notification
    let pending = pc_b.set_remote_description(wire_roundtrip(&offer)?);
    tokio::time::sleep(Duration::from_millis(100)).await;
    pc_b.close().await?;

    assert_eq!(
        timeout(TEST_TIMEOUT, pending)
            .await
            .map_err(|_| Error::new("set_remote_description did not resolve".to_owned()))?,
        Err(Error::ErrConnectionClosed)
    );
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::Closed);
    assert!(pc_b.remote_streams().is_empty());

    let mut events = vec![];
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), b_rx.recv()).await {
        events.push(event);
    }
    assert!(
        events
            .contains(&Event::State(StateType::Ice(RTCIceConnectionState::Closed))),
        "{events:?}"
    );
    assert!(
        !events.iter().any(|e| matches!(e, Event::AddStream(_))),
        "{events:?}"
    );

    pc_a.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_remote_description_with_unsupported_candidate() -> Result<()> {
    let api = new_api();
    let (pc_a, _a_rx) = new_pc(&api).await?;
    let (pc_b, mut b_rx) = new_pc(&api).await?;

    let offer = pc_a.create_offer(None).await?;
    pc_a.set_local_description(offer.clone()).await?;

    // a tcp candidate next to a usable udp one in the first media section
    let pwd_at = offer
        .sdp
        .find("a=ice-pwd:")
        .ok_or_else(|| Error::new("offer without ice-pwd".to_owned()))?;
    let line_end = pwd_at
        + offer.sdp[pwd_at..]
            .find("\r\n")
            .ok_or_else(|| Error::new("unterminated ice-pwd".to_owned()))?
        + 2;
    let mut sdp = offer.sdp.clone();
    sdp.insert_str(
        line_end,
        "a=candidate:2 1 tcp 1518280447 127.0.0.1 9 typ host tcptype active\r\n\
         a=candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host\r\n",
    );

    pc_b.set_remote_description(RTCSessionDescription::offer(sdp)?)
        .await?;
    assert_eq!(pc_b.signaling_state(), RTCSignalingState::HaveRemoteOffer);

    let remote = pc_b.internal.ice_agent.remote_candidates();
    assert_eq!(remote.len(), 1, "{remote:?}");
    assert_eq!(remote[0].port, 50000);

    let reported = timeout(TEST_TIMEOUT, async {
        while let Some(event) = b_rx.recv().await {
            if let Event::Error(err) = event {
                return Some(err);
            }
        }
        None
    })
    .await
    .map_err(|_| Error::new("unsupported candidate not reported".to_owned()))?;
    assert!(
        matches!(&reported, Some(err) if err.contains("unsupported")),
        "{reported:?}"
    );

    pc_a.close().await?;
    pc_b.close().await?;
    Ok(())
}
