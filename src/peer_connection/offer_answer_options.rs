/// AnswerOptions structure describes the options used to control the answer
/// creation process.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct RTCAnswerOptions {
    /// voice_activity_detection allows the application to provide information
    /// about whether it wishes voice detection feature to be enabled or disabled.
    pub voice_activity_detection: bool,
}

/// OfferOptions structure describes the options used to control the offer
/// creation process
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct RTCOfferOptions {
    /// voice_activity_detection allows the application to provide information
    /// about whether it wishes voice detection feature to be enabled or disabled.
    pub voice_activity_detection: bool,

    /// offer_to_receive_audio adds an audio section even when no local audio
    /// track is attached.
    pub offer_to_receive_audio: bool,

    /// offer_to_receive_video adds a video section even when no local video
    /// track is attached.
    pub offer_to_receive_video: bool,
}

impl Default for RTCOfferOptions {
    fn default() -> Self {
        MediaConstraints::default().into()
    }
}

/// Mandatory constraint keys understood by [`MediaConstraints`].
pub const OFFER_TO_RECEIVE_AUDIO: &str = "OfferToReceiveAudio";
pub const OFFER_TO_RECEIVE_VIDEO: &str = "OfferToReceiveVideo";
pub const VOICE_ACTIVITY_DETECTION: &str = "VoiceActivityDetection";

/// MediaConstraints are the session-wide media hints. Both receive hints
/// default to true.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct MediaConstraints {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
    pub voice_activity_detection: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        MediaConstraints {
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
            voice_activity_detection: false,
        }
    }
}

impl MediaConstraints {
    /// from_pairs builds constraints from `key=value` mandatory entries.
    /// Unknown keys are ignored, values other than `true`/`false` too.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut c = MediaConstraints::default();
        for (key, value) in pairs {
            let v = match value.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    log::warn!("ignoring constraint {key} with value {value}");
                    continue;
                }
            };
            match key {
                OFFER_TO_RECEIVE_AUDIO => c.offer_to_receive_audio = v,
                OFFER_TO_RECEIVE_VIDEO => c.offer_to_receive_video = v,
                VOICE_ACTIVITY_DETECTION => c.voice_activity_detection = v,
                _ => log::warn!("ignoring unknown constraint {key}"),
            }
        }
        c
    }
}

impl From<MediaConstraints> for RTCOfferOptions {
    fn from(c: MediaConstraints) -> Self {
        RTCOfferOptions {
            voice_activity_detection: c.voice_activity_detection,
            offer_to_receive_audio: c.offer_to_receive_audio,
            offer_to_receive_video: c.offer_to_receive_video,
        }
    }
}

impl From<MediaConstraints> for RTCAnswerOptions {
    fn from(c: MediaConstraints) -> Self {
        RTCAnswerOptions {
            voice_activity_detection: c.voice_activity_detection,
        }
    }
}
