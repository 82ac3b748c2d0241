
use std::net::{IpAddr, Ipv4Addr};

use tokio::time::Duration;

use crate::RECEIVE_MTU;

const DEFAULT_ICE_CHECK_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_ICE_FAILED_TIMEOUT: Duration = Duration::from_secs(25);
const DEFAULT_STUN_GATHER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default, Clone, Debug)]
pub struct Timeout {
    pub ice_check_interval: Option<Duration>,
    pub ice_failed_timeout: Option<Duration>,
    pub stun_gather_timeout: Option<Duration>,
}

#[derive(Default, Clone, Debug)]
pub struct Candidates {
    pub host_ips: Vec<IpAddr>,
    pub username_fragment: String,
    pub password: String,
}

/// SettingEngine allows influencing behavior in ways that are not
/// supported by the session API. This allows us to support additional
/// use-cases, tests in particular, without deviating from it elsewhere.
#[derive(Default, Clone, Debug)]
pub struct SettingEngine {
    pub(crate) timeout: Timeout,
    pub(crate) candidates: Candidates,
    pub(crate) receive_mtu: usize,
}

impl SettingEngine {
    /// get_receive_mtu returns the configured MTU. If SettingEngine's MTU is configured to 0 it returns the default
    pub(crate) fn get_receive_mtu(&self) -> usize {
        if self.receive_mtu != 0 {
            self.receive_mtu
        } else {
            RECEIVE_MTU
        }
    }

    /// set_receive_mtu sets the size of read buffer that copies incoming packets. This is optional.
    /// Leave this 0 for the default receive_mtu
    pub fn set_receive_mtu(&mut self, receive_mtu: usize) {
        self.receive_mtu = receive_mtu;
    }

    /// set_ice_timeouts sets the behavior around ICE Timeouts
    /// * check_interval is how often connectivity checks are sent while checking. Default is 50 milliseconds
    /// * failed_timeout is the duration of checking without a successful pair before the agent is considered failed. Default is 25 Seconds
    pub fn set_ice_timeouts(
        &mut self,
        check_interval: Option<Duration>,
        failed_timeout: Option<Duration>,
    ) {
        self.timeout.ice_check_interval = check_interval;
        self.timeout.ice_failed_timeout = failed_timeout;
    }

    /// set_stun_gather_timeout bounds how long a STUN server is waited for
    /// while gathering server reflexive candidates. Default is 5 Seconds
    pub fn set_stun_gather_timeout(&mut self, t: Option<Duration>) {
        self.timeout.stun_gather_timeout = t;
    }

    /// set_host_ips sets the addresses host candidates are gathered on.
    /// Default is the IPv4 loopback address.
    pub fn set_host_ips(&mut self, ips: Vec<IpAddr>) {
        self.candidates.host_ips = ips;
    }

    /// set_ice_credentials sets a static uFrag/uPwd to be used by the agent.
    /// This is useful if you want to do signalless WebRTC session, or deterministic tests.
    pub fn set_ice_credentials(&mut self, username_fragment: String, password: String) {
        self.candidates.username_fragment = username_fragment;
        self.candidates.password = password;
    }

    pub(crate) fn ice_check_interval(&self) -> Duration {
        self.timeout
            .ice_check_interval
            .unwrap_or(DEFAULT_ICE_CHECK_INTERVAL)
    }

    pub(crate) fn ice_failed_timeout(&self) -> Duration {
        self.timeout
            .ice_failed_timeout
            .unwrap_or(DEFAULT_ICE_FAILED_TIMEOUT)
    }

    pub(crate) fn stun_gather_timeout(&self) -> Duration {
        self.timeout
            .stun_gather_timeout
            .unwrap_or(DEFAULT_STUN_GATHER_TIMEOUT)
    }

    pub(crate) fn host_ips(&self) -> Vec<IpAddr> {
        if self.candidates.host_ips.is_empty() {
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
        } else {
            self.candidates.host_ips.clone()
        }
    }
}
