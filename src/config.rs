use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::TcpState;

/// Per-state flow deadlines, installed on every state transition and
/// enforced by the external timer wheel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateTimeouts {
    pub none: Duration,
    pub established: Duration,
    pub syn_sent: Duration,
    pub syn_recv: Duration,
    pub fin_wait: Duration,
    pub time_wait: Duration,
    pub close: Duration,
    pub close_wait: Duration,
    pub last_ack: Duration,
    pub listen: Duration,
    pub syn_ack: Duration,
}

impl Default for StateTimeouts {
    fn default() -> StateTimeouts {
        StateTimeouts {
            none: Duration::from_secs(2),
            established: Duration::from_secs(90),
            syn_sent: Duration::from_secs(3),
            syn_recv: Duration::from_secs(30),
            fin_wait: Duration::from_secs(3),
            time_wait: Duration::from_secs(3),
            close: Duration::from_secs(3),
            close_wait: Duration::from_secs(3),
            last_ack: Duration::from_secs(3),
            listen: Duration::from_secs(2 * 60),
            syn_ack: Duration::from_secs(30),
        }
    }
}

impl StateTimeouts {
    pub fn get(&self, state: TcpState) -> Duration {
        use TcpState::*;
        match state {
            None => self.none,
            Established => self.established,
            SynSent => self.syn_sent,
            SynRecv => self.syn_recv,
            FinWait => self.fin_wait,
            TimeWait => self.time_wait,
            Close => self.close,
            CloseWait => self.close_wait,
            LastAck => self.last_ack,
            Listen => self.listen,
            SynAck => self.syn_ack,
        }
    }

    pub fn set(&mut self, state: TcpState, timeout: Duration) {
        use TcpState::*;
        match state {
            None => self.none = timeout,
            Established => self.established = timeout,
            SynSent => self.syn_sent = timeout,
            SynRecv => self.syn_recv = timeout,
            FinWait => self.fin_wait = timeout,
            TimeWait => self.time_wait = timeout,
            Close => self.close = timeout,
            CloseWait => self.close_wait = timeout,
            LastAck => self.last_ack = timeout,
            Listen => self.listen = timeout,
            SynAck => self.syn_ack = timeout,
        }
    }
}

/// Control-plane configuration of the TCP steering core.
///
/// The control plane installs a new value atomically; the data path
/// loads it once per packet, so a packet never observes a mid-flight
/// change.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Drop packets aimed at a registered virtual address but at a port
    /// no service listens on (stray-VIP shield).
    pub drop_stray_to_vip: bool,
    /// Reduce the MSS announced in backend SYN-ACKs by the length of the
    /// client address option.
    pub adjust_syn_ack_mss: bool,
    /// Erase the timestamp option from client SYNs (local addresses
    /// shared between clients would otherwise mix timestamp spaces).
    pub strip_timestamp_on_syn: bool,
    /// Insert the client address option into the first FullNAT ingress
    /// segments (IPv4 only).
    pub insert_client_addr: bool,
    /// Synthesise RSTs towards both peers when a NAT/FullNAT flow
    /// expires.
    pub rst_on_expire: bool,
    /// Allow the FullNAT sequence record to be regenerated when a fresh
    /// SYN reuses a half-open flow.
    pub allow_conn_reuse: bool,
    /// Per-state flow deadlines.
    pub timeouts: StateTimeouts,
}

impl Default for TcpConfig {
    fn default() -> TcpConfig {
        TcpConfig {
            drop_stray_to_vip: true,
            adjust_syn_ack_mss: true,
            strip_timestamp_on_syn: true,
            insert_client_addr: true,
            rst_on_expire: true,
            allow_conn_reuse: true,
            timeouts: StateTimeouts::default(),
        }
    }
}
