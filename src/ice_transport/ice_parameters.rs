use rand::Rng;
use serde::{Deserialize, Serialize};

const RUNES_ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RUNES_CANDIDATE_ID_FOUNDATION: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/+";

/// RFC 8445 §5.3 minimums are 24 bits for the ufrag and 128 bits for the pwd.
const LEN_UFRAG: usize = 16;
const LEN_PWD: usize = 32;

/// ICEParameters includes the ICE username fragment
/// and password and other ICE-related parameters.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RTCIceParameters {
    pub username_fragment: String,
    pub password: String,
}

impl RTCIceParameters {
    /// generate returns fresh random credentials.
    pub(crate) fn generate() -> Self {
        RTCIceParameters {
            username_fragment: generate_rand_string(LEN_UFRAG, RUNES_CANDIDATE_ID_FOUNDATION),
            password: generate_rand_string(LEN_PWD, RUNES_CANDIDATE_ID_FOUNDATION),
        }
    }
}

/// math_rand_alpha generates a mathematical random alphabet sequence of specified length.
pub(crate) fn math_rand_alpha(n: usize) -> String {
    generate_rand_string(n, RUNES_ALPHA)
}

fn generate_rand_string(n: usize, runes: &[u8]) -> String {
    let mut rng = rand::rng();

    let rand_string: String = (0..n)
        .map(|_| {
            let idx = rng.random_range(0..runes.len());
            runes[idx] as char
        })
        .collect();

    rand_string
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generate_ice_parameters() {
        let a = RTCIceParameters::generate();
        let b = RTCIceParameters::generate();

        assert_eq!(a.username_fragment.len(), LEN_UFRAG);
        assert_eq!(a.password.len(), LEN_PWD);
        assert_ne!(a, b);
        assert!(a
            .password
            .bytes()
            .all(|c| RUNES_CANDIDATE_ID_FOUNDATION.contains(&c)));
    }

    #[test]
    fn test_math_rand_alpha() {
        let s = math_rand_alpha(10);
        assert_eq!(s.len(), 10);
        assert!(s.chars().all(|c| c.is_ascii_alphabetic()));
    }
}
