use std::net::IpAddr;

use tracing::{debug, trace};

use crate::config::TcpConfig;
use crate::flow::{Flow, FlowFlags};
use crate::framework::{Disposition, Framework};
use crate::state::TcpState;
use crate::transport::{tcp_opts, TcpSliceMut};

/// FullNAT sequence record of a flow.
///
/// `delta` is frozen once `init_seq` is picked; the only sanctioned
/// regeneration is the connection-reuse path in [`init_ingress_seq`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FnatSeq {
    /// Balancer-chosen initial sequence sent to the backend.
    pub init_seq: u32,
    /// `init_seq - client_initial_seq`, applied to every translated
    /// sequence number.
    pub delta: u32,
    /// Sequence at which the first non-SYN byte is expected; gates the
    /// one-shot client address option insertion.
    pub fdata_seq: u32,
}

/// SYN-proxy sequence record. Opaque to the steering core except for the
/// delta consumed when synthesising an RST towards the client; the
/// cookie handshake itself is translated by the framework hooks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SynProxySeq {
    pub init_seq: u32,
    pub delta: u32,
}

/// `true` when sequence `a` is before `b` (mod 2^32).
#[inline]
pub(crate) fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub(crate) fn seq_after(a: u32, b: u32) -> bool {
    seq_before(b, a)
}

/// Initialises the FullNAT sequence record from an ingress SYN.
///
/// Picks `init_seq` from the secure sequence generator seeded by the
/// local/backend 4-tuple and freezes the delta. When connection reuse is
/// allowed and a fresh SYN hits a flow that already carries a sequence
/// record while half-open, the record is regenerated and the reuse is
/// reported against the pre-transition state.
pub(crate) fn init_ingress_seq(flow: &mut Flow, fw: &dyn Framework, cfg: &TcpConfig, client_seq: u32) {
    flow.fnat_seq.fdata_seq = client_seq.wrapping_add(1);
    flow.flags.remove(FlowFlags::CIP_INSERTED);

    let reused = cfg.allow_conn_reuse
        && flow.fnat_seq.init_seq != 0
        && matches!(flow.state, TcpState::SynRecv | TcpState::SynSent);

    if flow.fnat_seq.init_seq == 0 || reused {
        let init_seq = match (flow.laddr, flow.daddr) {
            (IpAddr::V4(l), IpAddr::V4(d)) => {
                fw.secure_seq_v4(l.octets(), d.octets(), flow.lport, flow.dport)
            }
            (IpAddr::V6(l), IpAddr::V6(d)) => {
                fw.secure_seq_v6(l.octets(), d.octets(), flow.lport, flow.dport)
            }
            _ => {
                debug_assert!(false, "mixed address families in flow");
                return;
            }
        };
        flow.fnat_seq.init_seq = init_seq;
        flow.fnat_seq.delta = init_seq.wrapping_sub(client_seq);

        if reused {
            debug!(prior_state = %flow.old_state, "half-open flow reused, regenerated initial sequence");
            fw.conn_reused(flow.old_state);
        }
    }
}

/// Ingress (client to backend) sequence adjustment: the FullNAT delta on
/// the sequence number, then the SYN-proxy ingress hook (which may touch
/// the acknowledgment number and SACK edges).
pub(crate) fn adjust_ingress(flow: &mut Flow, tcp: &mut TcpSliceMut<'_>, fw: &dyn Framework) {
    let seq = tcp.sequence_number().wrapping_add(flow.fnat_seq.delta);
    tcp.set_sequence_number(seq);
    fw.synproxy_dnat(tcp, &flow.syn_proxy_seq);
}

/// Egress (backend to client) sequence adjustment: the SYN-proxy egress
/// hook first (its drop signal means an ack storm and is terminal), then
/// the FullNAT delta on the acknowledgment number and on every SACK
/// block edge.
pub(crate) fn adjust_egress(
    flow: &mut Flow,
    tcp: &mut TcpSliceMut<'_>,
    fw: &dyn Framework,
) -> Disposition {
    if !fw.synproxy_snat(tcp, flow) {
        return Disposition::Drop;
    }

    let ack = tcp
        .acknowledgment_number()
        .wrapping_sub(flow.fnat_seq.delta);
    tcp.set_acknowledgment_number(ack);
    tcp_opts::rewrite_sack_blocks(tcp.options_mut(), flow.fnat_seq.delta);
    Disposition::Keep
}

/// Records the backend-side end sequence and acknowledgment of an egress
/// segment for later RST synthesis. Skipped for RST segments and when
/// the acknowledgment would move backwards.
pub(crate) fn record_reverse_path(flow: &mut Flow, tcp: &TcpSliceMut<'_>, enabled: bool) {
    let flags = tcp.flags();
    if !enabled || flags.rst {
        return;
    }

    let ack_seq = tcp.acknowledgment_number();
    // out of order, just skip
    if seq_before(ack_seq, flow.rs_ack_seq) && flow.rs_ack_seq != 0 {
        return;
    }

    let seq = tcp.sequence_number();
    flow.rs_end_seq = if flags.is_syn_ack() {
        seq.wrapping_add(1)
    } else {
        seq.wrapping_add(tcp.payload_len() as u32)
    };
    flow.rs_ack_seq = ack_seq;
    trace!(seq, ack_seq, "recorded reverse path sequence from backend");
}
