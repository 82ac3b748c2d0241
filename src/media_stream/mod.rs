pub mod stream_registry;

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use portable_atomic::{AtomicBool, AtomicU8};
use util::sync::Mutex as SyncMutex;

use crate::error::{Error, Result};

/// SSRC identifies the source a track is sent from in the session description.
pub type SSRC = u32;

/// MediaKind is the kind of media a track carries, matching the SDP media
/// section it is described in.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MediaKind {
    #[default]
    Unspecified = 0,

    /// Audio indicates the track carries audio
    Audio = 1,

    /// Video indicates the track carries video
    Video = 2,
}

const MEDIA_KIND_AUDIO_STR: &str = "audio";
const MEDIA_KIND_VIDEO_STR: &str = "video";

impl From<&str> for MediaKind {
    fn from(raw: &str) -> Self {
        match raw {
            MEDIA_KIND_AUDIO_STR => MediaKind::Audio,
            MEDIA_KIND_VIDEO_STR => MediaKind::Video,
            _ => MediaKind::Unspecified,
        }
    }
}

impl From<u8> for MediaKind {
    fn from(v: u8) -> Self {
        match v {
            1 => MediaKind::Audio,
            2 => MediaKind::Video,
            _ => MediaKind::Unspecified,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            MediaKind::Audio => MEDIA_KIND_AUDIO_STR,
            MediaKind::Video => MEDIA_KIND_VIDEO_STR,
            MediaKind::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// MediaStreamTrackState is the ready state of a track.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaStreamTrackState {
    #[default]
    Unspecified = 0,

    /// Live indicates the track is producing (or able to produce) media.
    Live = 1,

    /// Ended indicates the track was stopped or its owner released it. Ended
    /// is terminal.
    Ended = 2,
}

impl From<u8> for MediaStreamTrackState {
    fn from(v: u8) -> Self {
        match v {
            1 => MediaStreamTrackState::Live,
            2 => MediaStreamTrackState::Ended,
            _ => MediaStreamTrackState::Unspecified,
        }
    }
}

impl fmt::Display for MediaStreamTrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MediaStreamTrackState::Live => write!(f, "live"),
            MediaStreamTrackState::Ended => write!(f, "ended"),
            MediaStreamTrackState::Unspecified => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}

/// MediaStreamTrack is a single audio or video source inside a MediaStream.
#[derive(Debug)]
pub struct MediaStreamTrack {
    id: String,
    kind: MediaKind,
    ssrc: SSRC,
    enabled: AtomicBool,
    ready_state: AtomicU8, //MediaStreamTrackState
}

impl MediaStreamTrack {
    /// new creates a live, enabled track with a random SSRC.
    pub fn new(id: String, kind: MediaKind) -> Self {
        MediaStreamTrack::with_ssrc(id, kind, rand::random::<u32>())
    }

    pub(crate) fn with_ssrc(id: String, kind: MediaKind, ssrc: SSRC) -> Self {
        MediaStreamTrack {
            id,
            kind,
            ssrc,
            enabled: AtomicBool::new(true),
            ready_state: AtomicU8::new(MediaStreamTrackState::Live as u8),
        }
    }

    /// id is unique within the owning stream
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn ssrc(&self) -> SSRC {
        self.ssrc
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// set_enabled returns true if the flag changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst) != enabled
    }

    pub fn ready_state(&self) -> MediaStreamTrackState {
        self.ready_state.load(Ordering::SeqCst).into()
    }

    /// stop ends the track. Returns false if it had already ended.
    pub fn stop(&self) -> bool {
        let prev = self
            .ready_state
            .swap(MediaStreamTrackState::Ended as u8, Ordering::SeqCst);
        prev != MediaStreamTrackState::Ended as u8
    }
}

/// MediaStream groups tracks under a label that is unique per session.
#[derive(Debug)]
pub struct MediaStream {
    label: String,
    tracks: SyncMutex<Vec<Arc<MediaStreamTrack>>>,
}

impl MediaStream {
    pub fn new(label: String) -> Self {
        MediaStream {
            label,
            tracks: SyncMutex::new(vec![]),
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    /// add_track appends a track, failing if a track with the same id is
    /// already part of the stream.
    pub fn add_track(&self, track: Arc<MediaStreamTrack>) -> Result<()> {
        let mut tracks = self.tracks.lock();
        if tracks.iter().any(|t| t.id() == track.id()) {
            return Err(Error::ErrExistingTrack);
        }
        tracks.push(track);
        Ok(())
    }

    /// remove_track returns the removed track, if any.
    pub fn remove_track(&self, id: &str) -> Option<Arc<MediaStreamTrack>> {
        let mut tracks = self.tracks.lock();
        let index = tracks.iter().position(|t| t.id() == id)?;
        Some(tracks.remove(index))
    }

    pub fn find_track(&self, id: &str) -> Option<Arc<MediaStreamTrack>> {
        let tracks = self.tracks.lock();
        tracks.iter().find(|t| t.id() == id).cloned()
    }

    /// tracks returns the tracks in insertion order
    pub fn tracks(&self) -> Vec<Arc<MediaStreamTrack>> {
        let tracks = self.tracks.lock();
        tracks.clone()
    }

    pub fn audio_tracks(&self) -> Vec<Arc<MediaStreamTrack>> {
        self.tracks_of_kind(MediaKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<Arc<MediaStreamTrack>> {
        self.tracks_of_kind(MediaKind::Video)
    }

    fn tracks_of_kind(&self, kind: MediaKind) -> Vec<Arc<MediaStreamTrack>> {
        let tracks = self.tracks.lock();
        tracks.iter().filter(|t| t.kind() == kind).cloned().collect()
    }

    /// end stops every track of the stream.
    pub(crate) fn end(&self) {
        let tracks = self.tracks.lock();
        for t in tracks.iter() {
            if t.stop() {
                log::trace!("track {} of stream {} ended", t.id(), self.label);
            }
        }
    }
}
