
pub mod ice_candidate;
pub mod ice_candidate_type;
pub mod ice_connection_state;
pub mod ice_gathering_state;
pub mod ice_parameters;
pub mod ice_server;

mod agent_internal;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use agent_internal::AgentInternal;
use ice_candidate::RTCIceCandidate;
use ice_connection_state::RTCIceConnectionState;
use ice_gathering_state::RTCIceGatheringState;
use ice_parameters::RTCIceParameters;
use ice_server::RTCIceServer;
use tokio::sync::Mutex;

use crate::api::setting_engine::SettingEngine;
use crate::error::{Error, Result};

/// Called for every gathered local candidate, and with `None` once
/// gathering is complete.
pub type OnLocalCandidateHdlrFn = Box<
    dyn (FnMut(Option<RTCIceCandidate>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnConnectionStateChangeHdlrFn = Box<
    dyn (FnMut(RTCIceConnectionState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// RTCIceAgent gathers local UDP candidates, answers and sends STUN
/// connectivity checks, and selects the first pair that succeeds.
///
/// A single component is negotiated, every media section is bundled on it.
pub struct RTCIceAgent {
    internal: Arc<AgentInternal>,
}

impl RTCIceAgent {
    /// new creates an agent with the credentials pinned in the SettingEngine,
    /// or freshly generated ones.
    pub(crate) fn new(setting_engine: Arc<SettingEngine>, ice_servers: Vec<RTCIceServer>) -> Self {
        let local_params = if !setting_engine.candidates.username_fragment.is_empty()
            && !setting_engine.candidates.password.is_empty()
        {
            RTCIceParameters {
                username_fragment: setting_engine.candidates.username_fragment.clone(),
                password: setting_engine.candidates.password.clone(),
            }
        } else {
            RTCIceParameters::generate()
        };

        RTCIceAgent {
            internal: Arc::new(AgentInternal::new(setting_engine, ice_servers, local_params)),
        }
    }

    /// on_local_candidate sets a handler that is fired when a new local candidate
    /// is gathered, and with `None` when gathering is complete.
    pub fn on_local_candidate(&self, f: OnLocalCandidateHdlrFn) {
        self.internal
            .on_local_candidate_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_connection_state_change sets a handler that is fired when the
    /// connection state changes.
    pub fn on_connection_state_change(&self, f: OnConnectionStateChangeHdlrFn) {
        self.internal
            .on_connection_state_change_hdlr
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// gather binds a socket per host address and starts gathering
    /// candidates in the background. Calling it again is a no-op.
    pub async fn gather(&self) -> Result<()> {
        self.internal.gather().await
    }

    pub async fn set_remote_credentials(&self, params: RTCIceParameters) -> Result<()> {
        self.internal.set_remote_credentials(params).await
    }

    /// add_remote_candidate adds a candidate checks may be sent to.
    /// Duplicates are ignored.
    pub async fn add_remote_candidate(&self, c: RTCIceCandidate) -> Result<()> {
        self.internal.add_remote_candidate(c).await
    }

    /// update_ice_servers replaces the STUN servers used by the next gathering.
    pub fn update_ice_servers(&self, ice_servers: Vec<RTCIceServer>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ErrICEAgentClosed);
        }
        *self.internal.ice_servers.lock() = ice_servers;
        Ok(())
    }

    pub fn local_parameters(&self) -> RTCIceParameters {
        self.internal.local_params.clone()
    }

    pub fn remote_parameters(&self) -> Option<RTCIceParameters> {
        self.internal.remote_params.lock().clone()
    }

    pub fn connection_state(&self) -> RTCIceConnectionState {
        self.internal.connection_state()
    }

    pub fn gathering_state(&self) -> RTCIceGatheringState {
        self.internal.gathering_state()
    }

    /// local_candidates returns the candidates gathered so far.
    pub fn local_candidates(&self) -> Vec<RTCIceCandidate> {
        self.internal
            .local_candidates
            .lock()
            .iter()
            .map(|l| l.candidate.clone())
            .collect()
    }

    pub fn remote_candidates(&self) -> Vec<RTCIceCandidate> {
        self.internal
            .remote_candidates
            .lock()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// selected_pair returns the local base and remote address of the pair
    /// media flows over, once one succeeded.
    pub fn selected_pair(&self) -> Option<(SocketAddr, SocketAddr)> {
        *self.internal.selected_pair.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.internal
            .closed
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// close releases every socket. No candidate is announced once close
    /// returns. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.internal.close().await
    }
}
