use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::flow::Flow;
use crate::net::{IpVersion, PacketBuf};
use crate::seq::SynProxySeq;
use crate::state::TcpState;
use crate::transport::TcpSliceMut;

/// A flow entry shared with the external flow table. The table hands the
/// steering core exclusive access per packet by locking the entry.
pub type SharedFlow = Arc<Mutex<Flow>>;

/// Final decision on a packet that was not steered onto a flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Accept,
    Drop,
}

/// Per-packet result of a rewrite handler: keep steering the packet or
/// discard it. Every error kind of the data path collapses into this.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum Disposition {
    Keep,
    Drop,
}

/// Result of offering an unmatched ingress packet to the scheduling
/// gate.
pub enum GateOutcome {
    /// Not ours; the surrounding pipeline continues.
    Pass,
    /// A new flow was created; steer the packet with it.
    Scheduled(SharedFlow),
    /// Final verdict without a flow (drop, or consumed by the
    /// SYN-proxy).
    Finished(Verdict),
}

impl core::fmt::Debug for GateOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GateOutcome::Pass => f.write_str("Pass"),
            GateOutcome::Scheduled(_) => f.write_str("Scheduled(..)"),
            GateOutcome::Finished(verdict) => f.debug_tuple("Finished").field(verdict).finish(),
        }
    }
}

/// One virtual service, as far as the scheduling gate is concerned.
pub trait VirtualService: Send + Sync {
    /// Selects a backend and creates a flow for the packet.
    fn schedule(&self, pkt: &PacketBuf) -> Option<SharedFlow>;

    /// Policy verdict when scheduling produced no flow (no backend
    /// available).
    fn leave(&self, pkt: &PacketBuf) -> Verdict;
}

/// Application (layer-7) helper bound to flows of one service port, e.g.
/// an FTP command-channel tracker.
///
/// Helpers see packets before the rewrite mutations; a `false` return
/// from a packet callback drops the packet.
pub trait AppHelper: Send + Sync {
    fn name(&self) -> &str;

    /// Service port this helper incarnation is registered for.
    fn port(&self) -> u16;

    /// Runs once when the helper is bound to a new flow; `false` fails
    /// the binding.
    fn init_conn(&self, flow: &mut Flow) -> bool {
        let _ = flow;
        true
    }

    /// Pre-mutation callback for ingress packets.
    fn pkt_in(&self, flow: &mut Flow, pkt: &mut PacketBuf) -> bool {
        let _ = (flow, pkt);
        true
    }

    /// Pre-mutation callback for egress packets.
    fn pkt_out(&self, flow: &mut Flow, pkt: &mut PacketBuf) -> bool {
        let _ = (flow, pkt);
        true
    }
}

/// Everything the steering core consumes from the surrounding balancer:
/// flow and service lookup, scheduling, the secure initial-sequence
/// generator, the SYN-proxy hooks and the transmit path.
///
/// All methods are called on the packet-processing context and must not
/// block.
pub trait Framework: Send + Sync {
    /// Looks up the flow of an ingress (client to backend) packet.
    fn flow_lookup_in(&self, pkt: &PacketBuf) -> Option<SharedFlow> {
        let _ = pkt;
        None
    }

    /// Looks up the flow of an egress (backend to client) packet.
    fn flow_lookup_out(&self, pkt: &PacketBuf) -> Option<SharedFlow> {
        let _ = pkt;
        None
    }

    /// Finds the virtual service for a (mark, destination, port) match.
    fn service_lookup(
        &self,
        version: IpVersion,
        mark: u32,
        addr: IpAddr,
        port: u16,
    ) -> Option<Arc<dyn VirtualService>> {
        let _ = (version, mark, addr, port);
        None
    }

    /// `true` when the address is a registered virtual address,
    /// regardless of port.
    fn vip_exists(&self, version: IpVersion, addr: IpAddr) -> bool {
        let _ = (version, addr);
        false
    }

    /// Admission control: `true` when the balancer is too loaded to
    /// accept new flows.
    fn overloaded(&self) -> bool {
        false
    }

    /// Secure initial sequence number for an IPv4 local/backend tuple.
    fn secure_seq_v4(&self, laddr: [u8; 4], daddr: [u8; 4], lport: u16, dport: u16) -> u32;

    /// Secure initial sequence number for an IPv6 local/backend tuple.
    fn secure_seq_v6(&self, laddr: [u8; 16], daddr: [u8; 16], lport: u16, dport: u16) -> u32;

    /// SYN-proxy step 2: may claim an unmatched ACK, resurrect the
    /// pending flow and decide the packet's fate. `None` declines.
    fn synproxy_ack_rcv(&self, pkt: &mut PacketBuf) -> Option<Verdict> {
        let _ = pkt;
        None
    }

    /// SYN-proxy egress translation. A `false` return signals an ack
    /// storm; the packet must be dropped without further work.
    fn synproxy_snat(&self, tcp: &mut TcpSliceMut<'_>, flow: &mut Flow) -> bool {
        let _ = (tcp, flow);
        true
    }

    /// SYN-proxy ingress translation (acknowledgment and SACK edges);
    /// always succeeds in place.
    fn synproxy_dnat(&self, tcp: &mut TcpSliceMut<'_>, seq: &SynProxySeq) {
        let _ = (tcp, seq);
    }

    /// Reports a sanctioned connection reuse together with the state the
    /// flow was in before the reusing SYN (statistics are external).
    fn conn_reused(&self, prior_state: TcpState) {
        let _ = prior_state;
    }

    /// Hands a packet to the backend-side transmit path.
    fn xmit(&self, pkt: PacketBuf, flow: &mut Flow);

    /// Hands a packet to the client-side (response) transmit path.
    fn response_xmit(&self, pkt: PacketBuf, flow: &mut Flow);
}
