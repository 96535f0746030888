use std::net::IpAddr;

use crate::*;

/// IP protocol number of TCP.
pub const IP_PROTO_TCP: u8 = 6;

/// Helper for calculating one's complement sums of 16 bit words as used
/// by the TCP checksum over IPv4 and IPv6 pseudo headers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sum16 {
    /// Partial non folded sum.
    sum: u64,
}

impl Sum16 {
    pub fn new() -> Sum16 {
        Sum16 { sum: 0 }
    }

    /// Add a 2 byte word.
    #[inline]
    pub fn add_2bytes(self, value: [u8; 2]) -> Sum16 {
        Sum16 {
            sum: self.sum + u64::from(u16::from_be_bytes(value)),
        }
    }

    /// Add a 4 byte word.
    #[inline]
    pub fn add_4bytes(self, value: [u8; 4]) -> Sum16 {
        self.add_2bytes([value[0], value[1]])
            .add_2bytes([value[2], value[3]])
    }

    /// Add 16 bytes.
    #[inline]
    pub fn add_16bytes(self, value: [u8; 16]) -> Sum16 {
        let mut next = self;
        for word in value.chunks_exact(2) {
            next = next.add_2bytes([word[0], word[1]]);
        }
        next
    }

    /// Add the given slice. In case the slice has a length that is not
    /// a multiple of 2 the last byte is padded with 0.
    pub fn add_slice(self, slice: &[u8]) -> Sum16 {
        let mut next = self;
        let mut words = slice.chunks_exact(2);
        for word in words.by_ref() {
            next = next.add_2bytes([word[0], word[1]]);
        }
        if let [last] = words.remainder() {
            next = next.add_2bytes([*last, 0]);
        }
        next
    }

    /// Add the IPv4 TCP/UDP pseudo header (source, destination, zero +
    /// protocol, upper layer length).
    #[inline]
    pub fn add_pseudo_ipv4(self, source: [u8; 4], destination: [u8; 4], protocol: u8, len: u16) -> Sum16 {
        self.add_4bytes(source)
            .add_4bytes(destination)
            .add_2bytes([0, protocol])
            .add_2bytes(len.to_be_bytes())
    }

    /// Add the IPv6 pseudo header (source, destination, upper layer
    /// length, zero + next header).
    #[inline]
    pub fn add_pseudo_ipv6(self, source: [u8; 16], destination: [u8; 16], protocol: u8, len: u32) -> Sum16 {
        self.add_16bytes(source)
            .add_16bytes(destination)
            .add_4bytes(len.to_be_bytes())
            .add_2bytes([0, protocol])
    }

    /// Folds the partial sum down to 16 bits (without complementing it).
    #[inline]
    pub fn fold(self) -> u16 {
        fold_u64(self.sum)
    }

    /// Returns the one's complement of the folded sum. This is the value
    /// that goes into a TCP checksum field.
    #[inline]
    pub fn finish(self) -> u16 {
        !self.fold()
    }
}

#[inline]
fn fold_u64(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Accumulates the checksum delta caused by replacing `old` with `new`
/// in checksummed data. Both slices must have the same, even length.
///
/// The result feeds [`update_complemented`] and [`update_pseudo_only`],
/// so a header rewrite does not have to re-sum the whole segment.
pub fn rewrite_delta(old: &[u8], new: &[u8]) -> u64 {
    debug_assert_eq!(old.len(), new.len());
    debug_assert_eq!(0, old.len() % 2);
    let mut delta = 0u64;
    for (o, n) in old.chunks_exact(2).zip(new.chunks_exact(2)) {
        delta += u64::from(!u16::from_be_bytes([o[0], o[1]]));
        delta += u64::from(u16::from_be_bytes([n[0], n[1]]));
    }
    delta
}

/// Delta for a replaced 16 bit value (ports, lengths).
#[inline]
pub fn rewrite_delta_u16(old: u16, new: u16) -> u64 {
    u64::from(!old) + u64::from(new)
}

/// Delta for a replaced address pair; the addresses must belong to the
/// same family.
pub fn rewrite_delta_addr(old: &IpAddr, new: &IpAddr) -> u64 {
    match (old, new) {
        (IpAddr::V4(o), IpAddr::V4(n)) => rewrite_delta(&o.octets(), &n.octets()),
        (IpAddr::V6(o), IpAddr::V6(n)) => rewrite_delta(&o.octets(), &n.octets()),
        // A flow never mixes address families.
        _ => {
            debug_assert!(false, "mixed address families in rewrite");
            0
        }
    }
}

/// Applies a rewrite delta to a checksum field stored in the usual
/// complemented form (RFC 1624 incremental update).
#[inline]
pub fn update_complemented(check: u16, delta: u64) -> u16 {
    !fold_u64(u64::from(!check) + delta)
}

/// Applies a rewrite delta to a checksum field that holds only the non
/// complemented pseudo header sum, as left by partial hardware offload.
#[inline]
pub fn update_pseudo_only(check: u16, delta: u64) -> u16 {
    fold_u64(u64::from(check) + delta)
}

/// Computes the full TCP checksum of `segment` (checksum field must be
/// zeroed beforehand) under the pseudo header of the given address pair.
pub fn full_tcp_checksum(source: &IpAddr, destination: &IpAddr, segment: &[u8]) -> u16 {
    match (source, destination) {
        (IpAddr::V4(s), IpAddr::V4(d)) => Sum16::new()
            .add_pseudo_ipv4(s.octets(), d.octets(), IP_PROTO_TCP, segment.len() as u16)
            .add_slice(segment)
            .finish(),
        (IpAddr::V6(s), IpAddr::V6(d)) => Sum16::new()
            .add_pseudo_ipv6(s.octets(), d.octets(), IP_PROTO_TCP, segment.len() as u32)
            .add_slice(segment)
            .finish(),
        _ => {
            debug_assert!(false, "mixed address families in checksum");
            0
        }
    }
}

/// Verifies the transport checksum of an ingress packet against its own
/// addresses, honoring the hardware offload marker.
///
/// * [`CsumState::None`] — the segment sum is computed here first and
///   cached on the buffer.
/// * [`CsumState::Complete`] — the cached sum is trusted and only the
///   pseudo header is added for verification.
/// * [`CsumState::Partial`] / [`CsumState::Unnecessary`] — nothing to
///   verify.
///
/// An invalid checksum causes the packet to be dropped by the caller;
/// this only reports it.
pub fn verify_input_checksum(pkt: &mut PacketBuf) -> bool {
    let tcphoff = match pkt.l4_offset() {
        Ok(off) => off,
        Err(_) => return false,
    };
    let (source, destination) = match (pkt.source_addr(), pkt.destination_addr()) {
        (Ok(s), Ok(d)) => (s, d),
        _ => return false,
    };

    let segment_sum = match pkt.csum_state() {
        CsumState::None => {
            let sum = Sum16::new().add_slice(&pkt.data()[tcphoff..]).fold();
            pkt.set_stored_sum(u32::from(sum));
            sum
        }
        CsumState::Complete => fold_u64(u64::from(pkt.stored_sum())),
        // Nothing to verify.
        CsumState::Partial | CsumState::Unnecessary => return true,
    };

    let tcp_len = pkt.len() - tcphoff;
    let total = match (source, destination) {
        (IpAddr::V4(s), IpAddr::V4(d)) => Sum16::new()
            .add_pseudo_ipv4(s.octets(), d.octets(), IP_PROTO_TCP, tcp_len as u16),
        (IpAddr::V6(s), IpAddr::V6(d)) => Sum16::new()
            .add_pseudo_ipv6(s.octets(), d.octets(), IP_PROTO_TCP, tcp_len as u32),
        _ => return false,
    };
    let ok = total.add_2bytes(segment_sum.to_be_bytes()).finish() == 0;
    if !ok {
        tracing::debug!("failed checksum on ingress packet");
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn new() {
        assert_eq!(0xffff, Sum16::new().finish());
    }

    #[test]
    fn add_2bytes() {
        assert_eq!(
            !u16::from_be_bytes([0xf0, 0x0f]),
            Sum16::new().add_2bytes([0xf0, 0x0f]).finish()
        );
    }

    #[test]
    fn add_4bytes() {
        assert_eq!(
            !(u16::from_be_bytes([0x12, 0x34]) + u16::from_be_bytes([0x56, 0x78])),
            Sum16::new().add_4bytes([0x12, 0x34, 0x56, 0x78]).finish()
        );
    }

    #[test]
    fn add_slice_pads_last_byte() {
        assert_eq!(
            Sum16::new().add_2bytes([0xab, 0x00]).finish(),
            Sum16::new().add_slice(&[0xab]).finish()
        );
    }

    #[test]
    fn fold_carries_wrap_around() {
        // 0xffff + 0x0001 folds to 0x0001 in one's complement.
        assert_eq!(
            1,
            Sum16::new()
                .add_2bytes([0xff, 0xff])
                .add_2bytes([0x00, 0x01])
                .fold()
        );
    }

    #[test]
    fn full_checksum_verifies_against_itself() {
        let src = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        let dst = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
        let mut segment = vec![
            0x13, 0x88, 0x00, 0x50, // ports 5000 -> 80
            0x00, 0x00, 0x00, 0x64, // seq 100
            0x00, 0x00, 0x00, 0x00, // ack 0
            0x50, 0x02, 0xff, 0xff, // doff 5, syn, window
            0x00, 0x00, 0x00, 0x00, // checksum 0, urg 0
        ];
        let check = full_tcp_checksum(&src, &dst, &segment);
        segment[16..18].copy_from_slice(&check.to_be_bytes());

        // summing the segment with the checksum in place folds to all ones
        let verify = match (src, dst) {
            (IpAddr::V4(s), IpAddr::V4(d)) => Sum16::new()
                .add_pseudo_ipv4(s.octets(), d.octets(), IP_PROTO_TCP, segment.len() as u16)
                .add_slice(&segment)
                .finish(),
            _ => unreachable!(),
        };
        assert_eq!(0, verify);
    }

    #[test]
    fn update_pseudo_only_matches_recomputed_pseudo_sum() {
        let old_src = Ipv4Addr::new(10, 0, 0, 1).octets();
        let new_src = Ipv4Addr::new(10, 0, 2, 1).octets();
        let dst = Ipv4Addr::new(10, 0, 1, 1).octets();

        let before = Sum16::new().add_pseudo_ipv4(old_src, dst, IP_PROTO_TCP, 40).fold();
        let expected = Sum16::new().add_pseudo_ipv4(new_src, dst, IP_PROTO_TCP, 48).fold();

        let delta = rewrite_delta(&old_src, &new_src) + rewrite_delta_u16(40, 48);
        assert_eq!(expected, update_pseudo_only(before, delta));
    }

    proptest! {
        /// An incremental 4-tuple update must be indistinguishable from
        /// zeroing the field and recomputing the full checksum.
        #[test]
        fn incremental_update_equals_full_recompute(
            payload in proptest::collection::vec(any::<u8>(), 0..128),
            old_src in any::<[u8; 4]>(),
            new_src in any::<[u8; 4]>(),
            dst in any::<[u8; 4]>(),
            old_port in any::<u16>(),
            new_port in any::<u16>(),
        ) {
            let mut segment = vec![
                0x00, 0x00, 0x00, 0x50,
                0x00, 0x00, 0x00, 0x64,
                0x00, 0x00, 0x00, 0x00,
                0x50, 0x10, 0x20, 0x00,
                0x00, 0x00, 0x00, 0x00,
            ];
            segment[0..2].copy_from_slice(&old_port.to_be_bytes());
            segment.extend_from_slice(&payload);

            // checksum valid under the old tuple
            let src = IpAddr::V4(old_src.into());
            let dstip = IpAddr::V4(dst.into());
            let check = full_tcp_checksum(&src, &dstip, &segment);
            segment[16..18].copy_from_slice(&check.to_be_bytes());

            // incremental update to the new tuple
            let delta = rewrite_delta(&old_src, &new_src)
                + rewrite_delta_u16(old_port, new_port);
            let updated = update_complemented(check, delta);

            // the updated checksum must verify under the new tuple
            segment[0..2].copy_from_slice(&new_port.to_be_bytes());
            segment[16..18].copy_from_slice(&updated.to_be_bytes());
            let verify = Sum16::new()
                .add_pseudo_ipv4(new_src, dst, IP_PROTO_TCP, segment.len() as u16)
                .add_slice(&segment)
                .finish();
            prop_assert_eq!(0, verify);
        }
    }

    #[test]
    fn verify_input_checksum_detects_corruption() {
        let src = Ipv4Addr::new(1, 1, 1, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 1);
        let mut data = vec![
            0x45, 0x00, 0x00, 0x28, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00,
        ];
        data.extend_from_slice(&src.octets());
        data.extend_from_slice(&dst.octets());
        let mut tcp = vec![
            0x13, 0x88, 0x00, 0x50, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00,
            0x50, 0x02, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00,
        ];
        let check = full_tcp_checksum(&IpAddr::V4(src), &IpAddr::V4(dst), &tcp);
        tcp[16..18].copy_from_slice(&check.to_be_bytes());
        data.extend_from_slice(&tcp);

        let mut pkt = PacketBuf::new(data.clone());
        assert!(verify_input_checksum(&mut pkt));

        // flip one payload-adjacent bit
        data[22] ^= 0x01;
        let mut bad = PacketBuf::new(data);
        assert!(!verify_input_checksum(&mut bad));
    }

    #[test]
    fn verify_input_checksum_trusts_offloaded() {
        // garbage packet, but the offload marker says there is nothing to do
        let mut pkt = PacketBuf::new(vec![0x45; 40]);
        pkt.set_csum_state(CsumState::Unnecessary);
        assert!(verify_input_checksum(&mut pkt));
    }

    #[test]
    fn mixed_families_rejected() {
        let v4 = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        // release builds return a neutral delta instead of panicking
        if cfg!(not(debug_assertions)) {
            assert_eq!(0, rewrite_delta_addr(&v4, &v6));
        }
        let _ = (v4, v6);
    }
}
