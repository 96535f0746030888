//! Single traversal of the TCP option area, shared by all option
//! mutators. Malformed options end the walk silently; a middlebox never
//! rejects a packet for strange options it does not need to touch.

use std::net::IpAddr;

use tracing::debug;

use crate::flow::{Flow, FlowFlags};
use crate::net::{Ipv4HeaderSliceMut, PacketBuf};
use crate::seq::seq_after;
use crate::transport::TcpSliceMut;

/// TCP option kind numbers touched by the steering core.
pub(crate) mod kind {
    pub const END: u8 = 0;
    pub const NOP: u8 = 1;
    pub const MSS: u8 = 2;
    pub const SACK: u8 = 5;
    pub const TIMESTAMP: u8 = 8;
    /// Carries the original client address/port to the backend.
    pub const CLIENT_ADDR: u8 = 254;
}

pub(crate) const MSS_LEN: usize = 4;
pub(crate) const SACK_BASE_LEN: usize = 2;
pub(crate) const SACK_BLOCK_LEN: usize = 8;
pub(crate) const TIMESTAMP_LEN: usize = 10;
/// kind + len + be16 port + be32 IPv4 address.
pub(crate) const CLIENT_ADDR_LEN: usize = 8;

/// Visitor decision after seeing one option.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WalkCtl {
    Continue,
    Stop,
}

/// Walks the option area, handing every well-formed TLV option to the
/// visitor (including its kind and length bytes). `END` stops the walk,
/// `NOP` advances a single byte, a length below 2 or beyond the
/// remaining area ends the walk without error.
pub(crate) fn walk(options: &mut [u8], mut visit: impl FnMut(u8, &mut [u8]) -> WalkCtl) {
    let mut i = 0;
    while i < options.len() {
        match options[i] {
            kind::END => return,
            kind::NOP => i += 1,
            opcode => {
                if i + 1 >= options.len() {
                    return;
                }
                let opsize = usize::from(options[i + 1]);
                // "silly options" and partial options end the walk
                if opsize < 2 || opsize > options.len() - i {
                    return;
                }
                if let WalkCtl::Stop = visit(opcode, &mut options[i..i + opsize]) {
                    return;
                }
                i += opsize;
            }
        }
    }
}

/// Reduces the advertised MSS by the client address option length, so
/// the backend leaves room for it. First match wins.
pub(crate) fn adjust_mss(options: &mut [u8]) {
    walk(options, |opcode, opt| {
        if opcode == kind::MSS && opt.len() == MSS_LEN {
            let mss = u16::from_be_bytes([opt[2], opt[3]]).wrapping_sub(CLIENT_ADDR_LEN as u16);
            opt[2..4].copy_from_slice(&mss.to_be_bytes());
            return WalkCtl::Stop;
        }
        WalkCtl::Continue
    });
}

/// Overwrites the timestamp option with NOPs in place. Local addresses
/// are shared between clients, whose timestamp spaces must not mix.
pub(crate) fn strip_timestamp(options: &mut [u8]) {
    walk(options, |opcode, opt| {
        if opcode == kind::TIMESTAMP && opt.len() == TIMESTAMP_LEN {
            opt.fill(kind::NOP);
            return WalkCtl::Stop;
        }
        WalkCtl::Continue
    });
}

/// Subtracts the FullNAT delta from both edges of every SACK block of
/// the first SACK option.
pub(crate) fn rewrite_sack_blocks(options: &mut [u8], delta: u32) {
    walk(options, |opcode, opt| {
        if opcode == kind::SACK
            && opt.len() >= SACK_BASE_LEN + SACK_BLOCK_LEN
            && (opt.len() - SACK_BASE_LEN) % SACK_BLOCK_LEN == 0
        {
            for edge in opt[SACK_BASE_LEN..].chunks_exact_mut(4) {
                let value = u32::from_be_bytes([edge[0], edge[1], edge[2], edge[3]])
                    .wrapping_sub(delta);
                edge.copy_from_slice(&value.to_be_bytes());
            }
            return WalkCtl::Stop;
        }
        WalkCtl::Continue
    });
}

/// Inserts the client address option right after the fixed TCP header of
/// a FullNAT ingress segment, shifting existing options towards the
/// tail.
///
/// At most one insertion happens per flow; once data may already have
/// flowed (`seq` past `fdata_seq`) the flow is marked so the question
/// never comes up again. All failures leave the packet unchanged. The
/// transport checksum is not touched here; the caller recomputes it
/// after the sequence adjustments anyway.
pub(crate) fn insert_client_addr(pkt: &mut PacketBuf, flow: &mut Flow) {
    if flow.flags.contains(FlowFlags::CIP_INSERTED) {
        return;
    }
    // only expressible for IPv4
    let IpAddr::V4(caddr) = flow.caddr else {
        debug!("client address option skipped: not IPv4");
        return;
    };
    let Ok(tcphoff) = pkt.l4_offset() else {
        return;
    };

    let (seq, data_offset) = {
        let Ok(tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return;
        };
        (tcp.sequence_number(), tcp.data_offset())
    };

    // data has already flowed; never insert on this flow again
    if seq_after(seq, flow.fnat_seq.fdata_seq) {
        flow.flags.insert(FlowFlags::CIP_INSERTED);
        return;
    }

    if pkt.len() + CLIENT_ADDR_LEN > pkt.mtu() {
        debug!(len = pkt.len(), mtu = pkt.mtu(), "client address option skipped: no room");
        return;
    }
    if data_offset + 2 > TcpSliceMut::MAX_DATA_OFFSET {
        debug!("client address option skipped: option area full");
        return;
    }

    let port = flow.cport.to_be_bytes();
    let addr = caddr.octets();
    pkt.insert_bytes(
        tcphoff + TcpSliceMut::MIN_LEN,
        &[
            kind::CLIENT_ADDR,
            CLIENT_ADDR_LEN as u8,
            port[0],
            port[1],
            addr[0],
            addr[1],
            addr[2],
            addr[3],
        ],
    );

    {
        let Ok(mut tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return;
        };
        tcp.set_data_offset(data_offset + 2);
    }
    if let Ok(mut ip) = Ipv4HeaderSliceMut::from_slice(pkt.data_mut()) {
        let total_len = ip.total_len().wrapping_add(CLIENT_ADDR_LEN as u16);
        ip.set_total_len(total_len);
        ip.update_header_checksum();
    }

    flow.flags.insert(FlowFlags::CIP_INSERTED);
    debug!(client = %flow.caddr, port = flow.cport, "inserted client address option");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::ForwardMode;
    use proptest::prelude::*;
    use std::net::IpAddr;

    #[test]
    fn walk_stops_at_end() {
        let mut opts = [kind::END, kind::MSS, 4, 0x05, 0xb4];
        let mut seen = Vec::new();
        walk(&mut opts, |opcode, _| {
            seen.push(opcode);
            WalkCtl::Continue
        });
        assert!(seen.is_empty());
    }

    #[test]
    fn walk_skips_nops() {
        let mut opts = [kind::NOP, kind::NOP, kind::MSS, 4, 0x05, 0xb4];
        let mut seen = Vec::new();
        walk(&mut opts, |opcode, opt| {
            seen.push((opcode, opt.len()));
            WalkCtl::Continue
        });
        assert_eq!(vec![(kind::MSS, 4)], seen);
    }

    #[test]
    fn walk_aborts_on_malformed_lengths() {
        // length below 2
        let mut silly = [3, 1, 0, 0];
        walk(&mut silly, |_, _| panic!("must not visit"));
        // length beyond the remaining area
        let mut partial = [kind::MSS, 10, 0, 0];
        walk(&mut partial, |_, _| panic!("must not visit"));
    }

    #[test]
    fn adjust_mss_first_match_only() {
        let mut opts = [
            kind::NOP,
            kind::MSS,
            4,
            0x05,
            0xb4, // 1460
            kind::MSS,
            4,
            0x05,
            0xb4,
        ];
        adjust_mss(&mut opts);
        assert_eq!(1460 - 8, u16::from_be_bytes([opts[3], opts[4]]));
        // the second one is untouched
        assert_eq!(1460, u16::from_be_bytes([opts[7], opts[8]]));
    }

    #[test]
    fn strip_timestamp_nops_in_place() {
        let mut opts = [0u8; 12];
        opts[0] = kind::NOP;
        opts[1] = kind::NOP;
        opts[2] = kind::TIMESTAMP;
        opts[3] = 10;
        opts[4..12].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        strip_timestamp(&mut opts);
        assert_eq!([kind::NOP; 12], opts);
    }

    #[test]
    fn sack_blocks_both_edges_rewritten() {
        let delta = 0xdead_beefu32;
        let left = 0x1000_0000u32;
        let right = left + 1460;
        let mut opts = vec![kind::SACK, 10];
        opts.extend_from_slice(&left.to_be_bytes());
        opts.extend_from_slice(&right.to_be_bytes());
        opts.extend_from_slice(&[kind::END, 0]);
        rewrite_sack_blocks(&mut opts, delta);
        assert_eq!(
            left.wrapping_sub(delta),
            u32::from_be_bytes([opts[2], opts[3], opts[4], opts[5]])
        );
        assert_eq!(
            right.wrapping_sub(delta),
            u32::from_be_bytes([opts[6], opts[7], opts[8], opts[9]])
        );
    }

    #[test]
    fn sack_with_ragged_length_is_ignored_but_walk_goes_on() {
        // length 12 is not 2 + k*8, the option must stay untouched
        let mut opts = vec![kind::SACK, 12];
        opts.extend_from_slice(&[0xaa; 10]);
        let before = opts.clone();
        rewrite_sack_blocks(&mut opts, 42);
        assert_eq!(before, opts);
    }

    fn fnat_flow() -> Flow {
        let mut flow = Flow::new(
            ForwardMode::FullNat,
            IpAddr::from([1, 1, 1, 1]),
            5000,
            IpAddr::from([10, 0, 0, 1]),
            80,
            IpAddr::from([10, 0, 2, 1]),
            40000,
            IpAddr::from([10, 0, 1, 1]),
            80,
        );
        flow.fnat_seq.fdata_seq = 101;
        flow
    }

    fn syn_packet(seq: u32) -> PacketBuf {
        let mut data = vec![
            0x45, 0x00, 0x00, 0x28, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 1, 1, 1, 1,
            10, 0, 0, 1,
        ];
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&5000u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[12] = 0x50;
        tcp[13] = 0x02;
        data.extend_from_slice(&tcp);
        PacketBuf::new(data)
    }

    #[test]
    fn client_addr_inserted_once() {
        let mut flow = fnat_flow();
        let mut pkt = syn_packet(100);
        insert_client_addr(&mut pkt, &mut flow);

        assert!(flow.flags.contains(FlowFlags::CIP_INSERTED));
        assert_eq!(48, pkt.len());
        let tcp_bytes = &pkt.data()[20..];
        assert_eq!(7, tcp_bytes[12] >> 4);
        assert_eq!(
            &[kind::CLIENT_ADDR, 8, 0x13, 0x88, 1, 1, 1, 1],
            &tcp_bytes[20..28]
        );
        // IP total length follows the growth and the header checksum is
        // valid again
        assert_eq!(48, u16::from_be_bytes([pkt.data()[2], pkt.data()[3]]));
        assert_eq!(
            0,
            crate::checksum::Sum16::new()
                .add_slice(&pkt.data()[..20])
                .finish()
        );

        // a second call must not insert again
        let before = pkt.data().to_vec();
        insert_client_addr(&mut pkt, &mut flow);
        assert_eq!(before, pkt.data());
    }

    #[test]
    fn client_addr_keeps_existing_options_behind_it() {
        let mut flow = fnat_flow();
        let mut pkt = syn_packet(100);
        // append an MSS option to the syn
        let mut data = pkt.into_data();
        data[32] = 0x60; // doff 6
        data.extend_from_slice(&[kind::MSS, 4, 0x05, 0xb4]);
        data[3] = 44; // total_len
        let mut pkt = PacketBuf::new(data);

        insert_client_addr(&mut pkt, &mut flow);
        let tcp_bytes = &pkt.data()[20..];
        assert_eq!(8, tcp_bytes[12] >> 4);
        assert_eq!(kind::CLIENT_ADDR, tcp_bytes[20]);
        // the MSS option moved tailward
        assert_eq!(&[kind::MSS, 4, 0x05, 0xb4], &tcp_bytes[28..32]);
    }

    #[test]
    fn client_addr_skipped_after_first_data() {
        let mut flow = fnat_flow();
        let mut pkt = syn_packet(500); // past fdata_seq = 101
        insert_client_addr(&mut pkt, &mut flow);
        assert_eq!(40, pkt.len());
        // permanently disabled for this flow
        assert!(flow.flags.contains(FlowFlags::CIP_INSERTED));
    }

    #[test]
    fn client_addr_skipped_without_room() {
        let mut flow = fnat_flow();
        let mut pkt = syn_packet(100);
        pkt.set_mtu(44);
        insert_client_addr(&mut pkt, &mut flow);
        assert_eq!(40, pkt.len());
        // recoverable: a later, smaller packet may still insert
        assert!(!flow.flags.contains(FlowFlags::CIP_INSERTED));
    }

    #[test]
    fn client_addr_requires_ipv4() {
        let mut flow = fnat_flow();
        flow.caddr = IpAddr::from([0xfe, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let mut pkt = syn_packet(100);
        insert_client_addr(&mut pkt, &mut flow);
        assert_eq!(40, pkt.len());
        assert!(!flow.flags.contains(FlowFlags::CIP_INSERTED));
    }

    proptest! {
        /// The walker terminates on arbitrary byte soup and every option
        /// it hands out lies within the area.
        #[test]
        fn walk_is_safe_on_arbitrary_bytes(mut opts in proptest::collection::vec(any::<u8>(), 0..40)) {
            let len = opts.len();
            let mut visited = Vec::new();
            walk(&mut opts, |opcode, opt| {
                visited.push((opcode, opt.len()));
                WalkCtl::Continue
            });
            prop_assert!(visited.len() <= len);
            for (_, opt_len) in visited {
                prop_assert!(opt_len >= 2);
                prop_assert!(opt_len <= len);
            }
        }
    }
}
