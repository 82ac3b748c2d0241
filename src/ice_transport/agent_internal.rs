use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use portable_atomic::{AtomicBool, AtomicU8};
use stun::agent::*;
use stun::attributes::*;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::*;
use stun::message::*;
use stun::textattrs::*;
use stun::xoraddr::*;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::{Duration, Instant};
use util::sync::Mutex as SyncMutex;

use super::*;
use crate::api::setting_engine::SettingEngine;
use crate::ice_transport::ice_server::{stun_server_urls, RTCIceServer, RTCIceServerUrl};

/// Outbound requests older than this are forgotten, their responses dropped.
/// reference: <https://tools.ietf.org/html/rfc8445#appendix-B.1>
const MAX_BINDING_REQUEST_TIMEOUT: Duration = Duration::from_millis(4000);

/// LocalCandidate is a gathered candidate and the socket it is reached on.
#[derive(Clone)]
pub(crate) struct LocalCandidate {
    pub(crate) candidate: RTCIceCandidate,
    pub(crate) base: SocketAddr,
    pub(crate) conn: Arc<UdpSocket>,
}

enum PendingKind {
    /// Request to a STUN server while gathering
    Srflx(oneshot::Sender<SocketAddr>),
    /// Connectivity check from `local` to `remote`
    Check { local: SocketAddr, remote: SocketAddr },
}

struct PendingRequest {
    timestamp: Instant,
    kind: PendingKind,
}

pub(crate) struct AgentInternal {
    pub(crate) setting_engine: Arc<SettingEngine>,
    pub(crate) ice_servers: SyncMutex<Vec<RTCIceServer>>,

    pub(crate) local_params: RTCIceParameters,
    pub(crate) remote_params: SyncMutex<Option<RTCIceParameters>>,

    pub(crate) connection_state: AtomicU8, //RTCIceConnectionState
    pub(crate) gathering_state: AtomicU8,  //RTCIceGatheringState
    // serializes state changes with their notification
    state_mu: Mutex<()>,

    pub(crate) closed: AtomicBool,
    gather_started: AtomicBool,
    checks_started: AtomicBool,
    close_tx: broadcast::Sender<()>,

    pub(crate) local_candidates: SyncMutex<Vec<LocalCandidate>>,
    pub(crate) remote_candidates: SyncMutex<Vec<(RTCIceCandidate, SocketAddr)>>,
    pending_binding_requests: SyncMutex<HashMap<TransactionId, PendingRequest>>,

    pub(crate) selected_pair: SyncMutex<Option<(SocketAddr, SocketAddr)>>,
    // pairs the remote side has sent a valid check on
    peer_validated: SyncMutex<HashSet<(SocketAddr, SocketAddr)>>,

    pub(crate) on_local_candidate_hdlr: ArcSwapOption<Mutex<OnLocalCandidateHdlrFn>>,
    pub(crate) on_connection_state_change_hdlr: ArcSwapOption<Mutex<OnConnectionStateChangeHdlrFn>>,
}

impl AgentInternal {
    pub(crate) fn new(
        setting_engine: Arc<SettingEngine>,
        ice_servers: Vec<RTCIceServer>,
        local_params: RTCIceParameters,
    ) -> Self {
        let (close_tx, _) = broadcast::channel(1);
        AgentInternal {
            setting_engine,
            ice_servers: SyncMutex::new(ice_servers),
            local_params,
            remote_params: SyncMutex::new(None),
            connection_state: AtomicU8::new(RTCIceConnectionState::New as u8),
            gathering_state: AtomicU8::new(RTCIceGatheringState::New as u8),
            state_mu: Mutex::new(()),
            closed: AtomicBool::new(false),
            gather_started: AtomicBool::new(false),
            checks_started: AtomicBool::new(false),
            close_tx,
            local_candidates: SyncMutex::new(vec![]),
            remote_candidates: SyncMutex::new(vec![]),
            pending_binding_requests: SyncMutex::new(HashMap::new()),
            selected_pair: SyncMutex::new(None),
            peer_validated: SyncMutex::new(HashSet::new()),
            on_local_candidate_hdlr: ArcSwapOption::empty(),
            on_connection_state_change_hdlr: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn connection_state(&self) -> RTCIceConnectionState {
        self.connection_state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn gathering_state(&self) -> RTCIceGatheringState {
        self.gathering_state.load(Ordering::SeqCst).into()
    }

    /// update_connection_state stores and announces `new_state` unless the
    /// move would go backwards or leave a terminal state.
    pub(crate) async fn update_connection_state(&self, new_state: RTCIceConnectionState) {
        let _guard = self.state_mu.lock().await;

        let current = self.connection_state();
        if !current.can_transition_to(new_state) {
            log::trace!("ICE connection state {current} -> {new_state} ignored");
            return;
        }

        self.connection_state
            .store(new_state as u8, Ordering::SeqCst);
        log::debug!("ICE connection state changed: {current} -> {new_state}");

        if let Some(handler) = &*self.on_connection_state_change_hdlr.load() {
            let mut f = handler.lock().await;
            f(new_state).await;
        }
    }

    /// emit_local_candidate announces a gathered candidate, `None` once
    /// gathering is complete. Nothing is announced after close.
    async fn emit_local_candidate(&self, c: Option<RTCIceCandidate>) {
        if let Some(handler) = &*self.on_local_candidate_hdlr.load() {
            let mut f = handler.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            f(c).await;
        }
    }

    /// fence_candidate_handler waits for an in-flight candidate announcement.
    pub(crate) async fn fence_candidate_handler(&self) {
        if let Some(handler) = &*self.on_local_candidate_hdlr.load() {
            let _f = handler.lock().await;
        }
    }

    pub(crate) fn close_signal(&self) -> broadcast::Receiver<()> {
        self.close_tx.subscribe()
    }

    pub(crate) fn signal_close(&self) {
        let _ = self.close_tx.send(());
    }

    pub(crate) async fn gather(self: &Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrICEAgentClosed);
        }
        if self.gather_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.gathering_state
            .store(RTCIceGatheringState::Gathering as u8, Ordering::SeqCst);
        self.update_connection_state(RTCIceConnectionState::Gathering)
            .await;

        let mut bound = vec![];
        for ip in self.setting_engine.host_ips() {
            let conn = match UdpSocket::bind(SocketAddr::new(ip, 0)).await {
                Ok(conn) => Arc::new(conn),
                Err(err) => {
                    log::warn!("failed to bind host candidate on {ip}: {err}");
                    continue;
                }
            };
            let base = conn.local_addr()?;

            let ai = Arc::clone(self);
            let c = Arc::clone(&conn);
            let closed_ch_rx = self.close_signal();
            tokio::spawn(async move {
                if let Err(err) = ai.recv_loop(c, base, closed_ch_rx).await {
                    log::trace!("recv loop on {base} stopped: {err}");
                }
            });

            bound.push((conn, base));
        }

        let servers = stun_server_urls(&self.ice_servers.lock());
        let ai = Arc::clone(self);
        tokio::spawn(async move {
            for (conn, base) in &bound {
                let candidate = RTCIceCandidate::new_host(*base);
                log::debug!("gathered local candidate {candidate}");
                ai.local_candidates.lock().push(LocalCandidate {
                    candidate: candidate.clone(),
                    base: *base,
                    conn: Arc::clone(conn),
                });
                ai.emit_local_candidate(Some(candidate)).await;
            }

            for url in &servers {
                for (conn, base) in &bound {
                    if ai.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    ai.gather_srflx(url, conn, *base).await;
                }
            }

            if ai.closed.load(Ordering::SeqCst) {
                return;
            }
            ai.gathering_state
                .store(RTCIceGatheringState::Complete as u8, Ordering::SeqCst);
            log::debug!("ICE gathering complete");
            ai.emit_local_candidate(None).await;
        });

        self.start_connectivity_checks().await;

        Ok(())
    }

    async fn gather_srflx(&self, url: &RTCIceServerUrl, conn: &Arc<UdpSocket>, base: SocketAddr) {
        let server_addr = match tokio::net::lookup_host(url.host_port()).await {
            Ok(mut addrs) => match addrs.find(|a| a.is_ipv4() == base.is_ipv4()) {
                Some(addr) => addr,
                None => {
                    log::debug!("no {} address for STUN server {}", family(base), url.host);
                    return;
                }
            },
            Err(err) => {
                log::warn!("failed to resolve STUN server {}: {}", url.host, err);
                return;
            }
        };

        let mut msg = Message::new();
        if let Err(err) = msg.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())]) {
            log::error!("{err}");
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.pending_binding_requests.lock().insert(
            msg.transaction_id,
            PendingRequest {
                timestamp: Instant::now(),
                kind: PendingKind::Srflx(tx),
            },
        );

        if let Err(err) = conn.send_to(&msg.raw, server_addr).await {
            log::warn!("failed to send STUN request to {server_addr}: {err}");
            self.pending_binding_requests
                .lock()
                .remove(&msg.transaction_id);
            return;
        }

        let mapped = match tokio::time::timeout(self.setting_engine.stun_gather_timeout(), rx).await {
            Ok(Ok(mapped)) => mapped,
            Ok(Err(_)) => return,
            Err(_) => {
                log::warn!("STUN server {server_addr} did not answer from {base}");
                self.pending_binding_requests
                    .lock()
                    .remove(&msg.transaction_id);
                return;
            }
        };

        if mapped == base {
            log::debug!("server reflexive address {mapped} equals its base, skipped");
            return;
        }

        let candidate = RTCIceCandidate::new_server_reflexive(mapped, base);
        log::debug!("gathered local candidate {candidate}");
        self.local_candidates.lock().push(LocalCandidate {
            candidate: candidate.clone(),
            base,
            conn: Arc::clone(conn),
        });
        self.emit_local_candidate(Some(candidate)).await;
    }

    pub(crate) async fn set_remote_credentials(
        self: &Arc<Self>,
        params: RTCIceParameters,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrICEAgentClosed);
        }
        if params.username_fragment.is_empty() {
            return Err(Error::ErrSessionDescriptionMissingIceUfrag);
        }
        if params.password.is_empty() {
            return Err(Error::ErrSessionDescriptionMissingIcePwd);
        }

        {
            let mut remote_params = self.remote_params.lock();
            if let Some(current) = &*remote_params {
                if *current != params {
                    log::warn!("remote ICE credentials changed without a restart, replacing them");
                }
            }
            *remote_params = Some(params);
        }

        self.start_connectivity_checks().await;
        Ok(())
    }

    pub(crate) async fn add_remote_candidate(self: &Arc<Self>, c: RTCIceCandidate) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrICEAgentClosed);
        }
        let addr = c.addr()?;

        {
            let mut remote_candidates = self.remote_candidates.lock();
            if remote_candidates.iter().any(|(_, a)| *a == addr) {
                log::trace!("remote candidate {c} already known");
                return Ok(());
            }
            log::debug!("added remote candidate {c}");
            remote_candidates.push((c, addr));
        }

        self.start_connectivity_checks().await;
        Ok(())
    }

    /// start_connectivity_checks moves to checking once gathering has
    /// started, the remote credentials are known and a remote candidate
    /// exists. Checks are started only once.
    async fn start_connectivity_checks(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst)
            || !self.gather_started.load(Ordering::SeqCst)
            || self.remote_params.lock().is_none()
            || self.remote_candidates.lock().is_empty()
        {
            return;
        }
        if self.checks_started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.update_connection_state(RTCIceConnectionState::Checking)
            .await;

        let ai = Arc::clone(self);
        let mut closed_ch_rx = self.close_signal();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(ai.setting_engine.ice_check_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = closed_ch_rx.recv() => break,
                }

                match ai.connection_state() {
                    RTCIceConnectionState::Checking => {
                        if started.elapsed() > ai.setting_engine.ice_failed_timeout() {
                            log::warn!("no candidate pair succeeded, ICE failed");
                            ai.update_connection_state(RTCIceConnectionState::Failed)
                                .await;
                            break;
                        }
                        ai.ping_all_candidates().await;
                    }
                    RTCIceConnectionState::Connected => {
                        // keep the selected pair alive until the peer validated it
                        let selected = *ai.selected_pair.lock();
                        if let Some((local, remote)) = selected {
                            ai.ping_pair(local, remote).await;
                        }
                    }
                    s if s.is_terminal() => break,
                    _ => {}
                }
            }
        });
    }

    /// check_bases lists each local base address once, in gathering order.
    /// Server reflexive candidates share the base of the host they came from.
    pub(crate) fn check_bases(&self) -> Vec<SocketAddr> {
        let mut seen = HashSet::new();
        self.local_candidates
            .lock()
            .iter()
            .map(|l| l.base)
            .filter(|base| seen.insert(*base))
            .collect()
    }

    async fn ping_all_candidates(&self) {
        let locals = self.check_bases();
        let remotes: Vec<SocketAddr> = self
            .remote_candidates
            .lock()
            .iter()
            .map(|(_, a)| *a)
            .collect();

        for local in &locals {
            for remote in remotes.iter().filter(|r| r.is_ipv4() == local.is_ipv4()) {
                self.ping_pair(*local, *remote).await;
            }
        }
    }

    async fn ping_pair(&self, local: SocketAddr, remote: SocketAddr) {
        let conn = match self.conn_for(local) {
            Some(conn) => conn,
            None => return,
        };
        let remote_params = match self.remote_params.lock().clone() {
            Some(p) => p,
            None => return,
        };

        let username =
            remote_params.username_fragment.clone() + ":" + self.local_params.username_fragment.as_str();
        let mut msg = Message::new();
        let result = msg.build(&[
            Box::new(BINDING_REQUEST),
            Box::new(TransactionId::new()),
            Box::new(Username::new(ATTR_USERNAME, username)),
            Box::new(MessageIntegrity::new_short_term_integrity(
                remote_params.password,
            )),
            Box::new(FINGERPRINT),
        ]);
        if let Err(err) = result {
            log::error!("{}", err);
            return;
        }

        log::trace!("ping STUN from {local} to {remote}");
        self.invalidate_pending_binding_requests(Instant::now());
        self.pending_binding_requests.lock().insert(
            msg.transaction_id,
            PendingRequest {
                timestamp: Instant::now(),
                kind: PendingKind::Check { local, remote },
            },
        );

        self.send_stun(&msg, &conn, remote).await;
    }

    fn conn_for(&self, base: SocketAddr) -> Option<Arc<UdpSocket>> {
        self.local_candidates
            .lock()
            .iter()
            .find(|l| l.base == base)
            .map(|l| Arc::clone(&l.conn))
    }

    async fn send_stun(&self, msg: &Message, conn: &UdpSocket, remote: SocketAddr) {
        if let Err(err) = conn.send_to(&msg.raw, remote).await {
            log::trace!("failed to send STUN message to {remote}: {err}");
        }
    }

    /// Removes pending binding requests that are over MAX_BINDING_REQUEST_TIMEOUT old.
    fn invalidate_pending_binding_requests(&self, filter_time: Instant) {
        let mut pending_binding_requests = self.pending_binding_requests.lock();
        let initial_size = pending_binding_requests.len();

        pending_binding_requests.retain(|_, r| {
            filter_time
                .checked_duration_since(r.timestamp)
                .map(|duration| duration < MAX_BINDING_REQUEST_TIMEOUT)
                .unwrap_or(true)
        });

        let removed = initial_size - pending_binding_requests.len();
        if removed > 0 {
            log::trace!("Discarded {removed} binding requests because they expired");
        }
    }

    async fn recv_loop(
        self: &Arc<Self>,
        conn: Arc<UdpSocket>,
        base: SocketAddr,
        mut closed_ch_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrICEAgentClosed);
        }

        let mut buffer = vec![0_u8; self.setting_engine.get_receive_mtu()];
        loop {
            let (n, src_addr) = tokio::select! {
                result = conn.recv_from(&mut buffer) => result?,
                _ = closed_ch_rx.recv() => return Err(Error::ErrICEAgentClosed),
            };

            self.handle_inbound_candidate_msg(&conn, &buffer[..n], src_addr, base)
                .await;
        }
    }

    async fn handle_inbound_candidate_msg(
        self: &Arc<Self>,
        conn: &Arc<UdpSocket>,
        buf: &[u8],
        src_addr: SocketAddr,
        base: SocketAddr,
    ) {
        if !is_message(buf) {
            log::trace!("discarded non-STUN packet from {src_addr} to {base}");
            return;
        }

        let mut m = Message {
            raw: vec![],
            ..Message::default()
        };
        // Explicitly copy raw buffer so Message can own the memory.
        m.raw.extend_from_slice(buf);

        if let Err(err) = m.decode() {
            log::warn!("Failed to handle decode ICE from {src_addr} to {base}: {err}");
            return;
        }

        if m.typ.method != METHOD_BINDING {
            log::trace!("unhandled STUN method({}) from {}", m.typ.method, src_addr);
            return;
        }

        if m.typ.class == CLASS_REQUEST {
            self.handle_binding_request(&mut m, conn, src_addr, base)
                .await;
        } else if m.typ.class == CLASS_SUCCESS_RESPONSE {
            self.handle_success_response(&mut m, src_addr, base).await;
        } else {
            log::trace!("unhandled STUN class({}) from {}", m.typ.class, src_addr);
        }
    }

    async fn handle_binding_request(
        self: &Arc<Self>,
        m: &mut Message,
        conn: &Arc<UdpSocket>,
        src_addr: SocketAddr,
        base: SocketAddr,
    ) {
        let remote_params = self.remote_params.lock().clone();

        let mut username = Username::new(ATTR_USERNAME, String::new());
        if let Err(err) = username.get_from(m) {
            log::warn!("discard message from ({src_addr}), {err}");
            return;
        }
        let username = username.to_string();
        let valid_username = match &remote_params {
            Some(p) => {
                username
                    == self.local_params.username_fragment.clone()
                        + ":"
                        + p.username_fragment.as_str()
            }
            // the answer may still be in flight, only our half can be checked
            None => username
                .strip_prefix(self.local_params.username_fragment.as_str())
                .is_some_and(|rest| rest.starts_with(':')),
        };
        if !valid_username {
            log::warn!("discard message from ({src_addr}), username mismatch {username}");
            return;
        }

        let integrity = MessageIntegrity::new_short_term_integrity(self.local_params.password.clone());
        if let Err(err) = integrity.check(m) {
            log::warn!("discard message from ({src_addr}), {err}");
            return;
        }

        let mut out = Message::new();
        let result = out.build(&[
            Box::new(m.clone()),
            Box::new(BINDING_SUCCESS),
            Box::new(XorMappedAddress {
                ip: src_addr.ip(),
                port: src_addr.port(),
            }),
            Box::new(MessageIntegrity::new_short_term_integrity(
                self.local_params.password.clone(),
            )),
            Box::new(FINGERPRINT),
        ]);
        match result {
            Ok(()) => self.send_stun(&out, conn, src_addr).await,
            Err(err) => {
                log::warn!("Failed to handle inbound ICE from: {src_addr} to: {base} error: {err}");
                return;
            }
        }

        if remote_params.is_none() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let known = self
            .remote_candidates
            .lock()
            .iter()
            .any(|(_, a)| *a == src_addr);
        if !known {
            log::debug!("adding a new peer-reflexive candidate: {src_addr}");
            let _ = self
                .add_remote_candidate(RTCIceCandidate::new_peer_reflexive(src_addr))
                .await;
        }

        log::trace!("inbound STUN (Request) from {src_addr} to {base}");
        self.peer_validated.lock().insert((base, src_addr));

        let selected = *self.selected_pair.lock();
        if selected == Some((base, src_addr))
            && self.connection_state() == RTCIceConnectionState::Connected
        {
            self.update_connection_state(RTCIceConnectionState::Completed)
                .await;
        }
    }

    async fn handle_success_response(&self, m: &mut Message, src_addr: SocketAddr, base: SocketAddr) {
        self.invalidate_pending_binding_requests(Instant::now());
        let pending = self
            .pending_binding_requests
            .lock()
            .remove(&m.transaction_id);
        let pending = match pending {
            Some(p) => p,
            None => {
                log::trace!("discard success message from ({src_addr}), unknown transaction");
                return;
            }
        };

        match pending.kind {
            PendingKind::Srflx(tx) => {
                let mut addr = XorMappedAddress::default();
                match addr.get_from(m) {
                    Ok(()) => {
                        let _ = tx.send(SocketAddr::new(addr.ip, addr.port));
                    }
                    Err(err) => log::warn!("STUN server {src_addr} sent no mapped address: {err}"),
                }
            }
            PendingKind::Check { local, remote } => {
                if remote != src_addr || local != base {
                    log::debug!(
                        "discard message: transaction source and destination does not match expected({remote}), actual({src_addr})"
                    );
                    return;
                }

                let remote_pwd = match &*self.remote_params.lock() {
                    Some(p) => p.password.clone(),
                    None => return,
                };
                let integrity = MessageIntegrity::new_short_term_integrity(remote_pwd);
                if let Err(err) = integrity.check(m) {
                    log::warn!("discard message from ({src_addr}), {err}");
                    return;
                }

                log::trace!("inbound STUN (SuccessResponse) from {remote} to {local}");

                let newly_selected = {
                    let mut selected = self.selected_pair.lock();
                    if selected.is_none() {
                        *selected = Some((local, remote));
                        true
                    } else {
                        false
                    }
                };
                if newly_selected {
                    log::debug!("selected candidate pair {local} <-> {remote}");
                    self.update_connection_state(RTCIceConnectionState::Connected)
                        .await;
                }

                let selected = *self.selected_pair.lock();
                if selected == Some((local, remote))
                    && self.peer_validated.lock().contains(&(local, remote))
                {
                    self.update_connection_state(RTCIceConnectionState::Completed)
                        .await;
                }
            }
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.signal_close();
        self.pending_binding_requests.lock().clear();
        self.local_candidates.lock().clear();
        self.remote_candidates.lock().clear();
        *self.selected_pair.lock() = None;

        self.fence_candidate_handler().await;
        self.update_connection_state(RTCIceConnectionState::Closed)
            .await;
        log::debug!("ICE agent closed");

        Ok(())
    }
}

fn family(addr: SocketAddr) -> &'static str {
    if addr.is_ipv4() {
        "IPv4"
    } else {
        "IPv6"
    }
}
