//! The four packet-mutation entry points. All share the same skeleton:
//! locate the transport header, give a bound helper its pre-mutation
//! look (with a checksum validation first), mutate, then settle the
//! checksum with the cheapest method the offload marker allows.

use std::net::IpAddr;

use crate::checksum::{
    full_tcp_checksum, rewrite_delta_addr, rewrite_delta_u16, update_complemented,
    update_pseudo_only, verify_input_checksum,
};
use crate::config::TcpConfig;
use crate::flow::{Flow, FlowFlags};
use crate::framework::{Disposition, Framework};
use crate::net::{CsumState, PacketBuf};
use crate::seq;
use crate::transport::{tcp_opts, TcpSliceMut};

/// Offset plus writability check shared by every handler.
fn transport_offset(pkt: &PacketBuf) -> Option<usize> {
    let tcphoff = pkt.l4_offset().ok()?;
    if pkt.len() < tcphoff + TcpSliceMut::MIN_LEN {
        return None;
    }
    Some(tcphoff)
}

/// Checksum validation and helper pre-mutation callback, only when a
/// helper is bound. A helper rejection is fatal for the packet.
fn helper_gate(pkt: &mut PacketBuf, flow: &mut Flow, ingress: bool) -> Disposition {
    let Some(app) = flow.app.clone() else {
        return Disposition::Keep;
    };
    if !verify_input_checksum(pkt) {
        return Disposition::Drop;
    }
    let accepted = if ingress {
        app.pkt_in(flow, pkt)
    } else {
        app.pkt_out(flow, pkt)
    };
    if accepted {
        Disposition::Keep
    } else {
        Disposition::Drop
    }
}

#[inline]
fn read_checksum(pkt: &PacketBuf, tcphoff: usize) -> u16 {
    u16::from_be_bytes([pkt.data()[tcphoff + 16], pkt.data()[tcphoff + 17]])
}

#[inline]
fn write_checksum(pkt: &mut PacketBuf, tcphoff: usize, check: u16) {
    pkt.data_mut()[tcphoff + 16..tcphoff + 18].copy_from_slice(&check.to_be_bytes());
}

/// Settles the checksum of a NAT rewrite (only addresses and ports
/// changed, plus whatever a helper did to the payload length).
#[allow(clippy::too_many_arguments)]
fn settle_nat_checksum(
    pkt: &mut PacketBuf,
    flow: &Flow,
    tcphoff: usize,
    old_len: u16,
    old_addr: IpAddr,
    new_addr: IpAddr,
    old_port: u16,
    new_port: u16,
    pseudo_src: IpAddr,
    pseudo_dst: IpAddr,
    trusted_after_full: bool,
) {
    let new_len = (pkt.len() - tcphoff) as u16;
    match pkt.csum_state() {
        CsumState::Partial => {
            // hardware finishes the sum; only the pseudo header parts
            // (addresses, length) need fixing
            let delta =
                rewrite_delta_addr(&old_addr, &new_addr) + rewrite_delta_u16(old_len, new_len);
            let check = update_pseudo_only(read_checksum(pkt, tcphoff), delta);
            write_checksum(pkt, tcphoff, check);
        }
        state if flow.app.is_none() => {
            // only ports and addresses changed, fast incremental update
            let delta = rewrite_delta_addr(&old_addr, &new_addr)
                + rewrite_delta_u16(old_port, new_port);
            let check = update_complemented(read_checksum(pkt, tcphoff), delta);
            write_checksum(pkt, tcphoff, check);
            if state == CsumState::Complete {
                // the cached segment sum no longer matches
                pkt.set_csum_state(CsumState::None);
            }
        }
        _ => {
            write_checksum(pkt, tcphoff, 0);
            let check = full_tcp_checksum(&pseudo_src, &pseudo_dst, &pkt.data()[tcphoff..]);
            write_checksum(pkt, tcphoff, check);
            if trusted_after_full {
                pkt.set_csum_state(CsumState::Unnecessary);
            }
        }
    }
}

/// Full recompute used by the FullNAT handlers, which always change the
/// sequence space as well.
fn settle_full_checksum(pkt: &mut PacketBuf, tcphoff: usize, pseudo_src: IpAddr, pseudo_dst: IpAddr) {
    write_checksum(pkt, tcphoff, 0);
    let check = full_tcp_checksum(&pseudo_src, &pseudo_dst, &pkt.data()[tcphoff..]);
    write_checksum(pkt, tcphoff, check);
}

/// Egress rewrite of a NAT flow: source becomes the virtual endpoint.
pub(crate) fn snat_out(
    pkt: &mut PacketBuf,
    flow: &mut Flow,
    fw: &dyn Framework,
    cfg: &TcpConfig,
) -> Disposition {
    let Some(tcphoff) = transport_offset(pkt) else {
        return Disposition::Drop;
    };
    let old_len = (pkt.len() - tcphoff) as u16;

    if let Disposition::Drop = helper_gate(pkt, flow, false) {
        return Disposition::Drop;
    }

    {
        let Ok(mut tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return Disposition::Drop;
        };
        seq::record_reverse_path(flow, &tcp, cfg.rst_on_expire);
        tcp.set_source_port(flow.vport);
        // ack storm detected by the SYN proxy is terminal
        if !fw.synproxy_snat(&mut tcp, flow) {
            return Disposition::Drop;
        }
    }

    settle_nat_checksum(
        pkt,
        flow,
        tcphoff,
        old_len,
        flow.daddr,
        flow.vaddr,
        flow.dport,
        flow.vport,
        flow.vaddr,
        flow.caddr,
        false,
    );
    Disposition::Keep
}

/// Ingress rewrite of a NAT flow: destination becomes the backend.
pub(crate) fn dnat_in(
    pkt: &mut PacketBuf,
    flow: &mut Flow,
    fw: &dyn Framework,
    _cfg: &TcpConfig,
) -> Disposition {
    let Some(tcphoff) = transport_offset(pkt) else {
        return Disposition::Drop;
    };
    let old_len = (pkt.len() - tcphoff) as u16;

    if let Disposition::Drop = helper_gate(pkt, flow, true) {
        return Disposition::Drop;
    }

    {
        let Ok(mut tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return Disposition::Drop;
        };
        tcp.set_destination_port(flow.dport);
        fw.synproxy_dnat(&mut tcp, &flow.syn_proxy_seq);
    }

    settle_nat_checksum(
        pkt,
        flow,
        tcphoff,
        old_len,
        flow.vaddr,
        flow.daddr,
        flow.vport,
        flow.dport,
        flow.caddr,
        flow.daddr,
        true,
    );
    Disposition::Keep
}

/// Ingress rewrite of a FullNAT flow: the packet leaves with the
/// pool-owned local source, the backend destination, a translated
/// sequence number and (one-shot) the client address option.
pub(crate) fn fnat_in(
    pkt: &mut PacketBuf,
    flow: &mut Flow,
    fw: &dyn Framework,
    cfg: &TcpConfig,
) -> Disposition {
    let Some(tcphoff) = transport_offset(pkt) else {
        return Disposition::Drop;
    };

    if let Disposition::Drop = helper_gate(pkt, flow, true) {
        return Disposition::Drop;
    }

    let flags = {
        let Ok(mut tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return Disposition::Drop;
        };
        tcp.set_source_port(flow.lport);
        tcp.set_destination_port(flow.dport);

        let flags = tcp.flags();
        if flags.syn && !flags.ack {
            // shared local addresses must not leak per-client timestamp
            // spaces, and the backend-facing sequence starts here
            if cfg.strip_timestamp_on_syn {
                tcp_opts::strip_timestamp(tcp.options_mut());
            }
            let client_seq = tcp.sequence_number();
            seq::init_ingress_seq(flow, fw, cfg, client_seq);
        }
        flags
    };

    // may grow the buffer; views are re-taken afterwards
    if cfg.insert_client_addr
        && !flow.flags.contains(FlowFlags::CIP_INSERTED)
        && !flags.rst
        && !flags.fin
    {
        tcp_opts::insert_client_addr(pkt, flow);
    }

    {
        let Ok(mut tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return Disposition::Drop;
        };
        seq::adjust_ingress(flow, &mut tcp, fw);
    }

    settle_full_checksum(pkt, tcphoff, flow.laddr, flow.daddr);
    pkt.set_csum_state(CsumState::Unnecessary);
    Disposition::Keep
}

/// Egress rewrite of a FullNAT flow: the packet leaves as if sent by the
/// virtual endpoint, with acknowledgment and SACK edges translated back
/// into the client's sequence space.
pub(crate) fn fnat_out(
    pkt: &mut PacketBuf,
    flow: &mut Flow,
    fw: &dyn Framework,
    cfg: &TcpConfig,
) -> Disposition {
    let Some(tcphoff) = transport_offset(pkt) else {
        return Disposition::Drop;
    };

    if let Disposition::Drop = helper_gate(pkt, flow, false) {
        return Disposition::Drop;
    }

    {
        let Ok(mut tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return Disposition::Drop;
        };
        seq::record_reverse_path(flow, &tcp, cfg.rst_on_expire);
        tcp.set_source_port(flow.vport);
        tcp.set_destination_port(flow.cport);

        // leave room for the client address option in what the backend
        // offers the client
        if tcp.flags().is_syn_ack() && cfg.adjust_syn_ack_mss {
            tcp_opts::adjust_mss(tcp.options_mut());
        }

        if let Disposition::Drop = seq::adjust_egress(flow, &mut tcp, fw) {
            return Disposition::Drop;
        }
    }

    settle_full_checksum(pkt, tcphoff, flow.vaddr, flow.caddr);
    Disposition::Keep
}
