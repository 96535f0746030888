//! RST synthesis on flow expiry. When the balancer evicts a NAT or
//! FullNAT entry the two peers would otherwise keep a half of the
//! session alive until their own timers fire; a pair of RSTs breaks both
//! sides eagerly.

use std::net::IpAddr;

use arrayvec::ArrayVec;
use tracing::debug;

use crate::checksum::{full_tcp_checksum, Sum16, IP_PROTO_TCP};
use crate::config::TcpConfig;
use crate::flow::{Flow, ForwardMode};
use crate::framework::Framework;
use crate::net::{CsumState, PacketBuf};
use crate::state::TcpState;
use crate::transport::TcpSliceMut;

/// Largest packet the synthesiser builds: IPv6 base header plus a
/// minimal TCP header.
const MAX_RST_LEN: usize = 60;

/// Called by the flow table exactly once when a flow expires.
pub(crate) fn conn_expire(flow: &mut Flow, fw: &dyn Framework, cfg: &TcpConfig) {
    if !cfg.rst_on_expire {
        return;
    }
    if !matches!(flow.fwd_mode, ForwardMode::Masq | ForwardMode::FullNat) {
        return;
    }
    send_rst_to_backend(flow, fw);
    send_rst_to_client(flow, fw);
}

/// Peeks the sequence numbers of the ACK packet held by the SYN proxy.
/// The packet always goes back to the head of the queue.
fn queued_ack_seqs(flow: &mut Flow) -> Option<(u32, u32)> {
    let mut pkt = flow.ack_queue.pop_front()?;
    let seqs = (|| {
        let tcphoff = pkt.l4_offset().ok()?;
        let tcp = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]).ok()?;
        Some((tcp.sequence_number(), tcp.acknowledgment_number()))
    })();
    flow.ack_queue.push_front(pkt);
    seqs
}

/// Resets the backend half of the session. Addressed with the client
/// endpoints; the transmit path re-applies the NAT on its way out.
fn send_rst_to_backend(flow: &mut Flow, fw: &dyn Framework) {
    let seq = match flow.state {
        TcpState::SynSent => match queued_ack_seqs(flow) {
            Some((seq, _)) => seq,
            None => {
                debug!("no held handshake ACK, backend reset skipped");
                return;
            }
        },
        TcpState::Established => {
            let mut seq = flow.rs_ack_seq;
            if flow.is_fullnat() {
                seq = seq.wrapping_sub(flow.fnat_seq.delta);
            }
            seq
        }
        state => {
            debug!(%state, "flow is neither half-open nor established, backend reset skipped");
            return;
        }
    };

    debug!(seq, "sending reset towards the backend");
    let Some(pkt) = build_rst(flow.caddr, flow.vaddr, flow.cport, flow.vport, seq) else {
        return;
    };
    fw.xmit(pkt, flow);
}

/// Resets the client half of the session.
fn send_rst_to_client(flow: &mut Flow, fw: &dyn Framework) {
    let seq = match flow.state {
        TcpState::SynSent => match queued_ack_seqs(flow) {
            // perhaps the proxy delta is 0
            Some((_, ack_seq)) => ack_seq.wrapping_sub(flow.syn_proxy_seq.delta),
            None => {
                debug!("no held handshake ACK, client reset skipped");
                return;
            }
        },
        TcpState::Established => flow.rs_end_seq,
        state => {
            debug!(%state, "flow is neither half-open nor established, client reset skipped");
            return;
        }
    };

    let (daddr, dport) = if flow.is_fullnat() {
        (flow.laddr, flow.lport)
    } else {
        (flow.caddr, flow.cport)
    };

    debug!(seq, "sending reset towards the client");
    let Some(pkt) = build_rst(flow.daddr, daddr, flow.dport, dport, seq) else {
        return;
    };
    fw.response_xmit(pkt, flow);
}

/// Builds a minimal RST segment with a full IP header and a valid
/// pseudo-header checksum.
fn build_rst(source: IpAddr, destination: IpAddr, sport: u16, dport: u16, seq: u32) -> Option<PacketBuf> {
    let mut tcp = [0u8; TcpSliceMut::MIN_LEN];
    tcp[0..2].copy_from_slice(&sport.to_be_bytes());
    tcp[2..4].copy_from_slice(&dport.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    // ack_seq stays zero
    tcp[12] = 0x50; // doff 5
    tcp[13] = 0x04; // rst
    let check = full_tcp_checksum(&source, &destination, &tcp);
    tcp[16..18].copy_from_slice(&check.to_be_bytes());

    let mut bytes = ArrayVec::<u8, MAX_RST_LEN>::new();
    match (source, destination) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            let mut ip = [0u8; 20];
            ip[0] = 0x45;
            ip[2..4].copy_from_slice(&40u16.to_be_bytes());
            ip[6] = 0x40; // don't fragment
            ip[8] = 64; // ttl
            ip[9] = IP_PROTO_TCP;
            ip[12..16].copy_from_slice(&s.octets());
            ip[16..20].copy_from_slice(&d.octets());
            let header_check = Sum16::new().add_slice(&ip).finish();
            ip[10..12].copy_from_slice(&header_check.to_be_bytes());
            bytes.try_extend_from_slice(&ip).ok()?;
        }
        (IpAddr::V6(s), IpAddr::V6(d)) => {
            let mut ip = [0u8; 40];
            ip[0] = 0x60;
            ip[4..6].copy_from_slice(&(TcpSliceMut::MIN_LEN as u16).to_be_bytes());
            ip[6] = IP_PROTO_TCP;
            ip[7] = 64; // hop limit
            ip[8..24].copy_from_slice(&s.octets());
            ip[24..40].copy_from_slice(&d.octets());
            bytes.try_extend_from_slice(&ip).ok()?;
        }
        _ => {
            debug_assert!(false, "mixed address families in reset");
            return None;
        }
    }
    bytes.try_extend_from_slice(&tcp).ok()?;

    let mut pkt = PacketBuf::new(bytes.as_slice().to_vec());
    pkt.set_csum_state(CsumState::Unnecessary);
    Some(pkt)
}
