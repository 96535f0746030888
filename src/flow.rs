use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::AtomicIsize;
use std::sync::Arc;
use std::time::Duration;

use crate::framework::AppHelper;
use crate::net::{IpVersion, PacketBuf};
use crate::seq::{FnatSeq, SynProxySeq};
use crate::state::TcpState;

/// How packets of a flow are forwarded to the backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ForwardMode {
    /// Rewrite the destination on ingress and the source on egress.
    Masq,
    /// Additionally rewrite the source on ingress to a pool-owned local
    /// address, so any balancer node sees both directions.
    FullNat,
    /// Steer without header rewrites (direct routing).
    Direct,
}

/// Per-flow flag bits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlowFlags(u16);

impl FlowFlags {
    /// The flow is counted as inactive on its backend.
    pub const INACTIVE: FlowFlags = FlowFlags(0x0001);
    /// No egress packet has been observed yet.
    pub const NOOUTPUT: FlowFlags = FlowFlags(0x0002);
    /// The client address option has been inserted (or permanently
    /// skipped) on this flow.
    pub const CIP_INSERTED: FlowFlags = FlowFlags(0x0004);

    #[inline]
    pub fn contains(&self, other: FlowFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: FlowFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: FlowFlags) {
        self.0 &= !other.0;
    }
}

/// Connection counters of a backend (real server). The flow only flips
/// its own contribution between the two counters; everything else about
/// backends lives outside the crate.
#[derive(Debug, Default)]
pub struct Backend {
    pub active_conns: AtomicIsize,
    pub inactive_conns: AtomicIsize,
}

/// One balanced connection.
///
/// The entry is owned by the external flow table; the steering core
/// receives an exclusive borrow for the duration of one packet (the
/// table's match-then-mutate contract keeps the entry alive and
/// serialises access while a packet is in flight).
pub struct Flow {
    /// Client address and port.
    pub caddr: IpAddr,
    pub cport: u16,
    /// Virtual (advertised) address and port.
    pub vaddr: IpAddr,
    pub vport: u16,
    /// Pool-owned local address and port (FullNAT only).
    pub laddr: IpAddr,
    pub lport: u16,
    /// Backend (real server) address and port.
    pub daddr: IpAddr,
    pub dport: u16,

    pub fwd_mode: ForwardMode,
    pub state: TcpState,
    /// State before the most recent transition.
    pub old_state: TcpState,
    /// Deadline installed by the last state transition; enforced by the
    /// external timer wheel.
    pub timeout: Duration,
    pub flags: FlowFlags,

    /// Backend the flow is scheduled onto, if any.
    pub dest: Option<Arc<Backend>>,
    /// Bound application helper, if any.
    pub app: Option<Arc<dyn AppHelper>>,
    /// Ingress ACK packets held by the SYN proxy while the backend
    /// handshake is pending; peeked for RST synthesis.
    pub ack_queue: VecDeque<PacketBuf>,

    pub fnat_seq: FnatSeq,
    pub syn_proxy_seq: SynProxySeq,
    /// End sequence of the last recorded backend segment.
    pub rs_end_seq: u32,
    /// Acknowledgment number of the last recorded backend segment.
    pub rs_ack_seq: u32,
}

impl Flow {
    /// Creates a flow in its initial state (`NONE`, no helper, empty
    /// sequence records).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fwd_mode: ForwardMode,
        caddr: IpAddr,
        cport: u16,
        vaddr: IpAddr,
        vport: u16,
        laddr: IpAddr,
        lport: u16,
        daddr: IpAddr,
        dport: u16,
    ) -> Flow {
        let mut flags = FlowFlags::default();
        // direct routing never produces an egress packet through the
        // balancer
        if fwd_mode == ForwardMode::Direct {
            flags.insert(FlowFlags::NOOUTPUT);
        }
        Flow {
            caddr,
            cport,
            vaddr,
            vport,
            laddr,
            lport,
            daddr,
            dport,
            fwd_mode,
            state: TcpState::None,
            old_state: TcpState::None,
            timeout: Duration::ZERO,
            flags,
            dest: None,
            app: None,
            ack_queue: VecDeque::new(),
            fnat_seq: FnatSeq::default(),
            syn_proxy_seq: SynProxySeq::default(),
            rs_end_seq: 0,
            rs_ack_seq: 0,
        }
    }

    #[inline]
    pub fn ip_version(&self) -> IpVersion {
        match self.caddr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    #[inline]
    pub fn is_fullnat(&self) -> bool {
        self.fwd_mode == ForwardMode::FullNat
    }

    /// Releases the helper binding (flow teardown path; the refcount on
    /// the helper drops with the `Arc`).
    pub fn unbind_app(&mut self) {
        self.app = None;
    }
}
