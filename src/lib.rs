#![warn(rust_2018_idioms)]
#![allow(dead_code)]

// re-export the protocol crates the core delegates to
pub use {sdp, stun};

pub mod api;
pub mod error;
pub mod ice_transport;
pub mod media_stream;
pub mod peer_connection;

pub use error::{Error, ErrorKind, Result};

#[macro_use]
extern crate lazy_static;

pub(crate) const UNSPECIFIED_STR: &str = "Unspecified";

/// Equal to UDP MTU
pub(crate) const RECEIVE_MTU: usize = 1460;

pub(crate) const SDP_ATTRIBUTE_ICE_UFRAG: &str = "ice-ufrag";
pub(crate) const SDP_ATTRIBUTE_ICE_PWD: &str = "ice-pwd";
