use std::sync::Arc;

use super::{MediaStream, MediaStreamTrack};
use crate::error::{Error, Result};
use crate::peer_connection::sdp::TrackDetails;

/// RemoteStreamChanges lists the streams that appeared and disappeared when a
/// remote description was applied, in the order they are described.
#[derive(Default, Debug)]
pub(crate) struct RemoteStreamChanges {
    pub(crate) added: Vec<Arc<MediaStream>>,
    pub(crate) removed: Vec<Arc<MediaStream>>,
}

impl RemoteStreamChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// StreamRegistry keeps the local streams handed to a session and the remote
/// streams discovered from remote descriptions. Labels are unique per side.
#[derive(Default, Debug)]
pub struct StreamRegistry {
    local: Vec<Arc<MediaStream>>,
    remote: Vec<Arc<MediaStream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        StreamRegistry::default()
    }

    pub fn add_local(&mut self, stream: Arc<MediaStream>) -> Result<()> {
        if self.local.iter().any(|s| s.label() == stream.label()) {
            return Err(Error::ErrExistingStream(stream.label().to_owned()));
        }
        self.local.push(stream);
        Ok(())
    }

    /// remove_local returns None when no stream with this label is registered.
    pub fn remove_local(&mut self, label: &str) -> Option<Arc<MediaStream>> {
        let index = self.local.iter().position(|s| s.label() == label)?;
        Some(self.local.remove(index))
    }

    pub fn local_streams(&self) -> Vec<Arc<MediaStream>> {
        self.local.clone()
    }

    pub fn remote_streams(&self) -> Vec<Arc<MediaStream>> {
        self.remote.clone()
    }

    pub fn find_remote(&self, label: &str) -> Option<Arc<MediaStream>> {
        self.remote.iter().find(|s| s.label() == label).cloned()
    }

    /// take_local drains the local streams, used at teardown.
    pub(crate) fn take_local(&mut self) -> Vec<Arc<MediaStream>> {
        std::mem::take(&mut self.local)
    }

    pub(crate) fn take_remote(&mut self) -> Vec<Arc<MediaStream>> {
        std::mem::take(&mut self.remote)
    }

    /// update_remote reconciles the remote streams with the tracks described
    /// by the latest remote description. Streams that keep their label are
    /// reused and only their track set is synced.
    pub(crate) fn update_remote(&mut self, details: &[TrackDetails]) -> RemoteStreamChanges {
        let mut labels: Vec<&str> = vec![];
        for d in details {
            if !d.stream_id.is_empty() && !labels.contains(&d.stream_id.as_str()) {
                labels.push(d.stream_id.as_str());
            }
        }

        let mut changes = RemoteStreamChanges::default();

        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.remote)
            .into_iter()
            .partition(|s| labels.contains(&s.label()));
        self.remote = kept;
        changes.removed = removed;

        for label in labels {
            let tracks: Vec<&TrackDetails> =
                details.iter().filter(|d| d.stream_id == label).collect();

            let stream = match self.find_remote(label) {
                Some(stream) => stream,
                None => {
                    let stream = Arc::new(MediaStream::new(label.to_owned()));
                    self.remote.push(Arc::clone(&stream));
                    changes.added.push(Arc::clone(&stream));
                    stream
                }
            };

            for t in stream.tracks() {
                if !tracks.iter().any(|d| d.id == t.id()) {
                    stream.remove_track(t.id());
                    t.stop();
                }
            }
            for d in tracks {
                if stream.find_track(&d.id).is_none() {
                    let track = MediaStreamTrack::with_ssrc(d.id.clone(), d.kind, d.ssrc);
                    if let Err(err) = stream.add_track(Arc::new(track)) {
                        log::warn!("remote stream {label}: {err}");
                    }
                }
            }
        }

        for s in &changes.removed {
            s.end();
        }

        changes
    }
}
