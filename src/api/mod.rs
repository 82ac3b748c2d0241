
pub mod setting_engine;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use portable_atomic::{AtomicBool, AtomicU64};
use setting_engine::*;

use crate::error::{Error, Result};
use crate::peer_connection::configuration::RTCConfiguration;
use crate::peer_connection::observer::PeerConnectionObserver;
use crate::peer_connection::RTCPeerConnection;

/// Engine is the process-wide state shared by every API instance.
#[derive(Default, Debug)]
pub(crate) struct Engine {
    initialized: AtomicBool,
    next_session_id: AtomicU64,
}

impl Engine {
    /// initialize returns true only for the call that initialized the engine.
    pub(crate) fn initialize(&self) -> bool {
        !self.initialized.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

lazy_static! {
    static ref ENGINE: Engine = Engine::default();
}

/// initialize prepares the process-wide engine. It must be called once
/// before the first PeerConnection is created, further calls are no-ops.
pub fn initialize() {
    if ENGINE.initialize() {
        log::debug!("session engine initialized");
    }
}

/// is_initialized reports whether `initialize` has been called.
pub fn is_initialized() -> bool {
    ENGINE.is_initialized()
}

/// API bundles the factory functions of the session core. Each API carries
/// its own SettingEngine, every PeerConnection it creates shares it.
pub struct API {
    pub(crate) setting_engine: Arc<SettingEngine>,
}

impl API {
    /// new_peer_connection creates a new PeerConnection with the provided configuration
    /// against the received API object. Events are delivered to `observer`.
    pub async fn new_peer_connection(
        &self,
        configuration: RTCConfiguration,
        observer: Arc<dyn PeerConnectionObserver>,
    ) -> Result<RTCPeerConnection> {
        if !ENGINE.is_initialized() {
            return Err(Error::ErrEngineNotInitialized);
        }

        RTCPeerConnection::new(self, ENGINE.next_session_id(), configuration, observer).await
    }

    /// Returns the internal [`SettingEngine`].
    pub fn setting_engine(&self) -> Arc<SettingEngine> {
        Arc::clone(&self.setting_engine)
    }
}

#[derive(Default)]
pub struct APIBuilder {
    setting_engine: Option<Arc<SettingEngine>>,
}

impl APIBuilder {
    pub fn new() -> Self {
        APIBuilder::default()
    }

    pub fn build(mut self) -> API {
        API {
            setting_engine: if let Some(setting_engine) = self.setting_engine.take() {
                setting_engine
            } else {
                Arc::new(SettingEngine::default())
            },
        }
    }

    /// WithSettingEngine allows providing a SettingEngine to the API.
    /// Settings should not be changed after passing the engine to an API.
    pub fn with_setting_engine(mut self, setting_engine: SettingEngine) -> Self {
        self.setting_engine = Some(Arc::new(setting_engine));
        self
    }
}
