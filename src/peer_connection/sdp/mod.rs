
pub mod media_direction;
pub mod sdp_type;
pub mod session_description;

use std::sync::Arc;

use sdp::description::common::{Address, ConnectionInformation};
use sdp::description::media::{MediaDescription, MediaName, RangedPort};
use sdp::description::session::*;
use smol_str::SmolStr;

use crate::error::{Error, Result};
use crate::ice_transport::ice_candidate::{unmarshal_candidate, RTCIceCandidate};
use crate::ice_transport::ice_gathering_state::RTCIceGatheringState;
use crate::ice_transport::ice_parameters::RTCIceParameters;
use crate::media_stream::{MediaKind, MediaStream, SSRC};
use crate::peer_connection::offer_answer_options::RTCOfferOptions;
use media_direction::MediaDirection;

pub(crate) const MEDIA_SECTION_AUDIO: &str = "audio";
pub(crate) const MEDIA_SECTION_VIDEO: &str = "video";

/// Codec offered for every audio section
pub(crate) const OPUS_PAYLOAD_TYPE: u8 = 111;
/// Codec offered for every video section
pub(crate) const VP8_PAYLOAD_TYPE: u8 = 96;

/// TrackDetails represents any media source that can be represented in a SDP
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct TrackDetails {
    pub(crate) mid: SmolStr,
    pub(crate) kind: MediaKind,
    pub(crate) stream_id: String,
    pub(crate) id: String,
    pub(crate) ssrc: SSRC,
}

/// stream_details_from_sdp extracts the tracks a remote peer sends, in the
/// order they are described. Sections the remote does not send on
/// (recvonly, inactive or rejected) are skipped, as are ssrcs without a
/// stream label.
pub(crate) fn stream_details_from_sdp(s: &SessionDescription) -> Vec<TrackDetails> {
    let mut incoming_tracks = vec![];

    for media in &s.media_descriptions {
        let mut tracks_in_media_section: Vec<TrackDetails> = vec![];

        let mut stream_id = "";
        let mut track_id = "";

        if media.media_name.port.value == 0
            || media.attribute(ATTR_KEY_RECV_ONLY).is_some()
            || media.attribute(ATTR_KEY_INACTIVE).is_some()
        {
            continue;
        }

        let mid_value = match get_mid_value(media) {
            Some(mid_value) => mid_value,
            None => continue,
        };

        let kind = MediaKind::from(media.media_name.media.as_str());
        if kind == MediaKind::Unspecified {
            continue;
        }

        for attr in &media.attributes {
            match attr.key.as_str() {
                // `a=msid:<stream_id> <track_id>`
                ATTR_KEY_MSID => {
                    if let Some(value) = &attr.value {
                        let mut split = value.split(' ');

                        if let (Some(sid), Some(tid), None) =
                            (split.next(), split.next(), split.next())
                        {
                            stream_id = sid;
                            track_id = tid;
                        }
                    }
                }

                ATTR_KEY_SSRC => {
                    if let Some(value) = &attr.value {
                        let split: Vec<&str> = value.split(' ').collect();
                        let ssrc = match split[0].parse::<u32>() {
                            Ok(ssrc) => ssrc,
                            Err(err) => {
                                log::warn!("Failed to parse SSRC: {}", err);
                                continue;
                            }
                        };

                        if split.len() == 3 && split[1].starts_with("msid:") {
                            stream_id = &split[1]["msid:".len()..];
                            track_id = split[2];
                        }

                        if let Some(t) = tracks_in_media_section.iter_mut().find(|t| t.ssrc == ssrc)
                        {
                            stream_id.clone_into(&mut t.stream_id);
                            track_id.clone_into(&mut t.id);
                        } else {
                            tracks_in_media_section.push(TrackDetails {
                                mid: SmolStr::from(mid_value),
                                kind,
                                stream_id: stream_id.to_owned(),
                                id: track_id.to_owned(),
                                ssrc,
                            });
                        }
                    }
                }
                _ => {}
            };
        }

        tracks_in_media_section.retain(|t| {
            let complete = !t.stream_id.is_empty() && !t.id.is_empty();
            if !complete {
                log::debug!("ignoring ssrc {} without msid in mid {}", t.ssrc, t.mid);
            }
            complete
        });

        incoming_tracks.extend(tracks_in_media_section);
    }

    incoming_tracks
}

/// MediaSection is one m= line of a description being generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MediaSection {
    pub(crate) mid: String,
    pub(crate) kind: MediaKind,
    pub(crate) direction: MediaDirection,
}

impl MediaSection {
    /// Sections of unknown kind are answered with port 0.
    fn is_rejected(&self) -> bool {
        self.kind == MediaKind::Unspecified
    }
}

fn has_tracks_of_kind(streams: &[Arc<MediaStream>], kind: MediaKind) -> bool {
    streams
        .iter()
        .any(|s| s.tracks().iter().any(|t| t.kind() == kind))
}

/// offer_media_sections decides the sections of a local offer: a kind is
/// offered when a local track of that kind exists or receiving it is requested.
pub(crate) fn offer_media_sections(
    streams: &[Arc<MediaStream>],
    options: &RTCOfferOptions,
) -> Vec<MediaSection> {
    let kinds = [
        (MediaKind::Audio, MEDIA_SECTION_AUDIO, options.offer_to_receive_audio),
        (MediaKind::Video, MEDIA_SECTION_VIDEO, options.offer_to_receive_video),
    ];

    let mut sections = vec![];
    for (kind, mid, recv) in kinds {
        let send = has_tracks_of_kind(streams, kind);
        if !send && !recv {
            continue;
        }
        sections.push(MediaSection {
            mid: mid.to_owned(),
            kind,
            direction: MediaDirection::from_send_recv(send, recv),
        });
    }

    sections
}

/// answer_media_sections mirrors the sections of the remote offer, in order.
pub(crate) fn answer_media_sections(
    remote: &SessionDescription,
    streams: &[Arc<MediaStream>],
) -> Vec<MediaSection> {
    remote
        .media_descriptions
        .iter()
        .enumerate()
        .map(|(i, media)| {
            let kind = MediaKind::from(media.media_name.media.as_str());
            let mid = get_mid_value(media)
                .cloned()
                .unwrap_or_else(|| i.to_string());

            let direction = if kind == MediaKind::Unspecified || media.media_name.port.value == 0 {
                MediaDirection::Inactive
            } else {
                let offered = match get_peer_direction(media) {
                    MediaDirection::Unspecified => MediaDirection::Sendrecv,
                    d => d,
                };
                MediaDirection::from_send_recv(has_tracks_of_kind(streams, kind), true)
                    .intersect(offered.reverse())
            };

            MediaSection {
                mid,
                kind,
                direction,
            }
        })
        .collect()
}

pub(crate) fn add_candidates_to_media_description(
    candidates: &[RTCIceCandidate],
    mut m: MediaDescription,
    ice_gathering_state: RTCIceGatheringState,
) -> MediaDescription {
    let append_candidate_if_new = |c: &RTCIceCandidate, m: MediaDescription| -> MediaDescription {
        let marshaled = c.marshal();
        for a in &m.attributes {
            if let Some(value) = &a.value {
                if &marshaled == value {
                    return m;
                }
            }
        }

        m.with_candidate(marshaled)
    };

    for c in candidates {
        m = append_candidate_if_new(c, m);
    }

    if ice_gathering_state != RTCIceGatheringState::Complete {
        return m;
    }
    for a in &m.attributes {
        if a.key == ATTR_KEY_END_OF_CANDIDATES {
            return m;
        }
    }

    m.with_property_attribute(ATTR_KEY_END_OF_CANDIDATES.to_owned())
}

fn add_codecs(media: MediaDescription, kind: MediaKind) -> MediaDescription {
    match kind {
        MediaKind::Audio => media.with_codec(
            OPUS_PAYLOAD_TYPE,
            "opus".to_owned(),
            48000,
            2,
            "minptime=10;useinbandfec=1".to_owned(),
        ),
        MediaKind::Video => media.with_codec(VP8_PAYLOAD_TYPE, "VP8".to_owned(), 90000, 0, String::new()),
        MediaKind::Unspecified => media,
    }
}

fn rejected_media_description(section: &MediaSection, media: &str) -> MediaDescription {
    MediaDescription {
        media_name: MediaName {
            media: media.to_owned(),
            port: RangedPort {
                value: 0,
                range: None,
            },
            protos: vec![
                "UDP".to_owned(),
                "TLS".to_owned(),
                "RTP".to_owned(),
                "SAVPF".to_owned(),
            ],
            formats: vec!["0".to_owned()],
        },
        media_title: None,
        connection_information: Some(ConnectionInformation {
            network_type: "IN".to_owned(),
            address_type: "IP4".to_owned(),
            address: Some(Address {
                address: "0.0.0.0".to_owned(),
                ttl: None,
                range: None,
            }),
        }),
        bandwidth: vec![],
        encryption_key: None,
        attributes: vec![],
    }
    .with_value_attribute(ATTR_KEY_MID.to_owned(), section.mid.clone())
    .with_property_attribute(MediaDirection::Inactive.to_string())
}

pub(crate) struct PopulateSdpParams<'a> {
    pub(crate) ice_params: &'a RTCIceParameters,
    pub(crate) candidates: &'a [RTCIceCandidate],
    pub(crate) ice_gathering_state: RTCIceGatheringState,
    pub(crate) streams: &'a [Arc<MediaStream>],
    pub(crate) cname: &'a str,
}

/// populate_local_sdp serializes the local session state into an SDP.
/// `remote_media` names the m= line media of the remote offer when answering,
/// so rejected sections keep the media token they were offered with.
pub(crate) fn populate_local_sdp(
    mut d: SessionDescription,
    media_sections: &[MediaSection],
    remote_media: Option<&[String]>,
    params: PopulateSdpParams<'_>,
) -> Result<SessionDescription> {
    let mut bundle_value = "BUNDLE".to_owned();
    let mut bundle_count = 0;
    let mut wms_labels: Vec<&str> = vec![];

    for (i, section) in media_sections.iter().enumerate() {
        if section.is_rejected() {
            let media = remote_media
                .and_then(|r| r.get(i))
                .map(|s| s.as_str())
                .unwrap_or("application");
            d = d.with_media(rejected_media_description(section, media));
            continue;
        }

        let mut media = MediaDescription::new_jsep_media_description(section.kind.to_string(), vec![])
            .with_value_attribute(ATTR_KEY_MID.to_owned(), section.mid.clone())
            .with_ice_credentials(
                params.ice_params.username_fragment.clone(),
                params.ice_params.password.clone(),
            )
            .with_property_attribute(ATTR_KEY_RTCPMUX.to_owned())
            .with_property_attribute(section.direction.to_string());

        media = add_codecs(media, section.kind);

        if section.direction.has_send() {
            for stream in params.streams {
                let tracks: Vec<_> = stream
                    .tracks()
                    .into_iter()
                    .filter(|t| t.kind() == section.kind)
                    .collect();
                if tracks.is_empty() {
                    continue;
                }
                if !wms_labels.contains(&stream.label()) {
                    wms_labels.push(stream.label());
                }
                for track in tracks {
                    media = media.with_media_source(
                        track.ssrc(),
                        params.cname.to_owned(),
                        stream.label().to_owned(),
                        track.id().to_owned(),
                    );
                }
            }
        }

        if i == 0 {
            media = add_candidates_to_media_description(
                params.candidates,
                media,
                params.ice_gathering_state,
            );
        }

        d = d.with_media(media);
        bundle_value = bundle_value + " " + &section.mid;
        bundle_count += 1;
    }

    if bundle_count > 0 {
        d = d.with_value_attribute(ATTR_KEY_GROUP.to_owned(), bundle_value);
    }

    let mut wms = SEMANTIC_TOKEN_WEBRTC_MEDIA_STREAMS.to_owned();
    for label in wms_labels {
        wms = wms + " " + label;
    }
    d = d.with_value_attribute(ATTR_KEY_MSID_SEMANTIC.to_owned(), format!(" {wms}"));

    Ok(d)
}

pub(crate) fn get_mid_value(media: &MediaDescription) -> Option<&String> {
    for attr in &media.attributes {
        if attr.key == ATTR_KEY_MID {
            return attr.value.as_ref();
        }
    }
    None
}

pub(crate) fn get_peer_direction(media: &MediaDescription) -> MediaDirection {
    for a in &media.attributes {
        let direction = MediaDirection::from(a.key.as_str());
        if direction != MediaDirection::Unspecified {
            return direction;
        }
    }
    MediaDirection::Unspecified
}

/// media_index_of returns the m= line index a candidate belongs to, looked
/// up by mid first and by index second.
pub(crate) fn media_index_of(
    desc: &SessionDescription,
    sdp_mid: Option<&str>,
    sdp_mline_index: Option<u16>,
) -> Result<usize> {
    if let Some(mid) = sdp_mid.filter(|m| !m.is_empty()) {
        return desc
            .media_descriptions
            .iter()
            .position(|m| get_mid_value(m).map(|v| v.as_str()) == Some(mid))
            .ok_or(Error::ErrICECandidateMediaSectionUnknown);
    }

    match sdp_mline_index {
        Some(index) if usize::from(index) < desc.media_descriptions.len() => Ok(usize::from(index)),
        _ => Err(Error::ErrICECandidateMediaSectionUnknown),
    }
}

/// check_answer_matches_offer verifies the answer has one m= line per offered
/// section, in the same order and of the same media.
pub(crate) fn check_answer_matches_offer(
    offer: &SessionDescription,
    answer: &SessionDescription,
) -> Result<()> {
    if offer.media_descriptions.len() != answer.media_descriptions.len() {
        return Err(Error::ErrSDPMediaSectionsMismatch);
    }

    for (o, a) in offer
        .media_descriptions
        .iter()
        .zip(answer.media_descriptions.iter())
    {
        if o.media_name.media != a.media_name.media {
            return Err(Error::ErrSDPMediaSectionsMismatch);
        }
        if let (Some(om), Some(am)) = (get_mid_value(o), get_mid_value(a)) {
            if om != am {
                return Err(Error::ErrSDPMediaSectionsMismatch);
            }
        }
    }

    Ok(())
}

/// RemoteIceDetails is the ICE information carried by a remote description.
#[derive(Debug, PartialEq)]
pub(crate) struct RemoteIceDetails {
    pub(crate) ufrag: String,
    pub(crate) pwd: String,
    pub(crate) candidates: Vec<RTCIceCandidate>,
    /// well-formed candidates on a transport the agent does not run
    pub(crate) unsupported: Vec<Error>,
}

/// extract_ice_details returns the remote credentials and every candidate
/// carried in the description. Malformed candidates fail the extraction,
/// candidates on an unsupported protocol are set aside.
pub(crate) fn extract_ice_details(desc: &SessionDescription) -> Result<RemoteIceDetails> {
    let mut candidates = vec![];
    let mut unsupported = vec![];

    // Backup ufrag/pwd is the first inactive credentials found, for the
    // case where all media lines are set to inactive.
    let mut backup_ufrag = None;
    let mut backup_pwd = None;

    let mut remote_ufrag = desc.attribute(ATTR_KEY_ICE_UFRAG).map(|s| s.as_str());
    let mut remote_pwd = desc.attribute(ATTR_KEY_ICE_PWD).map(|s| s.as_str());

    for m in &desc.media_descriptions {
        let ufrag = m.attribute(ATTR_KEY_ICE_UFRAG).and_then(|o| o);
        let pwd = m.attribute(ATTR_KEY_ICE_PWD).and_then(|o| o);

        if m.attribute(ATTR_KEY_INACTIVE).is_some() {
            if backup_ufrag.is_none() {
                backup_ufrag = ufrag;
            }
            if backup_pwd.is_none() {
                backup_pwd = pwd;
            }
            continue;
        }

        if remote_ufrag.is_none() {
            remote_ufrag = ufrag;
        }
        if remote_pwd.is_none() {
            remote_pwd = pwd;
        }

        if ufrag.is_some() && ufrag != remote_ufrag {
            return Err(Error::ErrSessionDescriptionConflictingIceUfrag);
        }
        if pwd.is_some() && pwd != remote_pwd {
            return Err(Error::ErrSessionDescriptionConflictingIcePwd);
        }

        for a in &m.attributes {
            if a.is_ice_candidate() {
                if let Some(value) = &a.value {
                    match unmarshal_candidate(value) {
                        Ok(c) => candidates.push(c),
                        Err(Error::ErrICEProtocolUnknown) => {
                            unsupported.push(Error::ErrICECandidateUnsupported(value.clone()))
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    let remote_ufrag = remote_ufrag
        .or(backup_ufrag)
        .ok_or(Error::ErrSessionDescriptionMissingIceUfrag)?;
    let remote_pwd = remote_pwd
        .or(backup_pwd)
        .ok_or(Error::ErrSessionDescriptionMissingIcePwd)?;

    Ok(RemoteIceDetails {
        ufrag: remote_ufrag.to_owned(),
        pwd: remote_pwd.to_owned(),
        candidates,
        unsupported,
    })
}

/// update_sdp_origin saves the Origin of the first local SDP; for
/// subsequent calls, it updates the Origin of the SessionDescription from
/// the saved one and increments the session version by one.
/// <https://tools.ietf.org/html/draft-ietf-rtcweb-jsep-25#section-5.2.2>
pub(crate) fn update_sdp_origin(origin: &mut Origin, d: &mut SessionDescription) {
    if origin.session_version == 0 {
        origin.session_version = d.origin.session_version;
        origin.session_id = d.origin.session_id;
    } else {
        d.origin.session_id = origin.session_id;

        origin.session_version += 1;
        d.origin.session_version = origin.session_version;
    }
}

const ATTR_KEY_ICE_UFRAG: &str = crate::SDP_ATTRIBUTE_ICE_UFRAG;
const ATTR_KEY_ICE_PWD: &str = crate::SDP_ATTRIBUTE_ICE_PWD;
