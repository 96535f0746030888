use std::net::IpAddr;

use crate::err::HeaderError;
use crate::net::Ipv6HeaderSliceMut;

/// IP version of a packet or flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

/// Hardware checksum offload marker carried by a packet buffer.
///
/// Mirrors the states a receive or transmit offload engine can leave a
/// buffer in, which decides how much checksum work a rewrite has to do.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum CsumState {
    /// No checksum work was done by hardware.
    #[default]
    None,
    /// Hardware computed the full one's complement sum over the
    /// transport segment; it is cached via [`PacketBuf::stored_sum`].
    Complete,
    /// The checksum field only holds the pseudo header sum; hardware
    /// will finish the job on transmit.
    Partial,
    /// The checksum is known to be valid, nothing left to do.
    Unnecessary,
}

/// An owned layer-3 packet buffer (IP header and everything after it).
///
/// The steering core mutates packets in place through this type. The
/// buffer may grow when an option is inserted; ownership stays with the
/// caller for the whole packet lifetime.
#[derive(Clone, Debug)]
pub struct PacketBuf {
    data: Vec<u8>,
    csum_state: CsumState,
    /// Cached transport segment sum (non folded meaning preserving, used
    /// with [`CsumState::Complete`]).
    stored_sum: u32,
    /// MTU of the route the packet will leave on.
    mtu: usize,
    /// Firewall mark, part of the virtual service match.
    mark: u32,
}

impl PacketBuf {
    /// Default route MTU assumed when the caller does not provide one.
    pub const DEFAULT_MTU: usize = 1500;

    pub fn new(data: Vec<u8>) -> PacketBuf {
        PacketBuf {
            data,
            csum_state: CsumState::None,
            stored_sum: 0,
            mtu: PacketBuf::DEFAULT_MTU,
            mark: 0,
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn csum_state(&self) -> CsumState {
        self.csum_state
    }

    #[inline]
    pub fn set_csum_state(&mut self, state: CsumState) {
        self.csum_state = state;
    }

    #[inline]
    pub fn stored_sum(&self) -> u32 {
        self.stored_sum
    }

    #[inline]
    pub fn set_stored_sum(&mut self, sum: u32) {
        self.stored_sum = sum;
    }

    #[inline]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    #[inline]
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    #[inline]
    pub fn mark(&self) -> u32 {
        self.mark
    }

    #[inline]
    pub fn set_mark(&mut self, mark: u32) {
        self.mark = mark;
    }

    /// Grows the buffer by splicing `bytes` in at `at`, shifting the
    /// tail. Used by the one-shot client address option insertion.
    pub fn insert_bytes(&mut self, at: usize, bytes: &[u8]) {
        debug_assert!(at <= self.data.len());
        self.data.splice(at..at, bytes.iter().copied());
    }

    /// IP version from the first header nibble.
    pub fn ip_version(&self) -> Result<IpVersion, HeaderError> {
        let first = *self.data.first().ok_or(HeaderError::LenTooSmall {
            required: 1,
            actual: 0,
        })?;
        match first >> 4 {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            version => Err(HeaderError::UnsupportedIpVersion { version }),
        }
    }

    /// Offset of the transport header: the IPv4 header length, or the
    /// fixed 40 bytes of the IPv6 base header (extension headers are not
    /// steered).
    pub fn l4_offset(&self) -> Result<usize, HeaderError> {
        match self.ip_version()? {
            IpVersion::V4 => {
                let ihl = self.data[0] & 0x0f;
                if ihl < 5 {
                    return Err(HeaderError::IhlTooSmall { ihl });
                }
                let off = usize::from(ihl) * 4;
                if self.data.len() < off {
                    return Err(HeaderError::LenTooSmall {
                        required: off,
                        actual: self.data.len(),
                    });
                }
                Ok(off)
            }
            IpVersion::V6 => {
                if self.data.len() < Ipv6HeaderSliceMut::LEN {
                    return Err(HeaderError::LenTooSmall {
                        required: Ipv6HeaderSliceMut::LEN,
                        actual: self.data.len(),
                    });
                }
                Ok(Ipv6HeaderSliceMut::LEN)
            }
        }
    }

    /// Source address from the packet's own IP header.
    pub fn source_addr(&self) -> Result<IpAddr, HeaderError> {
        self.addr_at(12, 8)
    }

    /// Destination address from the packet's own IP header.
    pub fn destination_addr(&self) -> Result<IpAddr, HeaderError> {
        self.addr_at(16, 24)
    }

    fn addr_at(&self, v4_off: usize, v6_off: usize) -> Result<IpAddr, HeaderError> {
        match self.ip_version()? {
            IpVersion::V4 => {
                if self.data.len() < v4_off + 4 {
                    return Err(HeaderError::LenTooSmall {
                        required: v4_off + 4,
                        actual: self.data.len(),
                    });
                }
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.data[v4_off..v4_off + 4]);
                Ok(IpAddr::from(octets))
            }
            IpVersion::V6 => {
                if self.data.len() < v6_off + 16 {
                    return Err(HeaderError::LenTooSmall {
                        required: v6_off + 16,
                        actual: self.data.len(),
                    });
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.data[v6_off..v6_off + 16]);
                Ok(IpAddr::from(octets))
            }
        }
    }
}
