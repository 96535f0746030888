use crate::checksum::Sum16;
use crate::err::HeaderError;

/// Mutable in-place view of an IPv4 header.
///
/// Only the fields a steering rewrite touches are exposed: total length
/// and header checksum. Addresses are read-only here; address rewrites
/// happen in the surrounding transmit path.
pub struct Ipv4HeaderSliceMut<'a> {
    slice: &'a mut [u8],
}

impl<'a> Ipv4HeaderSliceMut<'a> {
    /// Minimum length of an IPv4 header in bytes/octets.
    pub const MIN_LEN: usize = 20;

    /// Creates a view over the given slice, narrowed to the header
    /// length announced by the ihl field.
    pub fn from_slice(slice: &'a mut [u8]) -> Result<Ipv4HeaderSliceMut<'a>, HeaderError> {
        if slice.len() < Ipv4HeaderSliceMut::MIN_LEN {
            return Err(HeaderError::LenTooSmall {
                required: Ipv4HeaderSliceMut::MIN_LEN,
                actual: slice.len(),
            });
        }
        let version = slice[0] >> 4;
        if version != 4 {
            return Err(HeaderError::UnsupportedIpVersion { version });
        }
        let ihl = slice[0] & 0x0f;
        if ihl < 5 {
            return Err(HeaderError::IhlTooSmall { ihl });
        }
        let header_len = usize::from(ihl) * 4;
        if slice.len() < header_len {
            return Err(HeaderError::LenTooSmall {
                required: header_len,
                actual: slice.len(),
            });
        }
        Ok(Ipv4HeaderSliceMut {
            slice: &mut slice[..header_len],
        })
    }

    #[inline]
    pub fn header_len(&self) -> usize {
        self.slice.len()
    }

    #[inline]
    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes([self.slice[2], self.slice[3]])
    }

    #[inline]
    pub fn set_total_len(&mut self, value: u16) {
        self.slice[2..4].copy_from_slice(&value.to_be_bytes());
    }

    #[inline]
    pub fn protocol(&self) -> u8 {
        self.slice[9]
    }

    #[inline]
    pub fn source(&self) -> [u8; 4] {
        [self.slice[12], self.slice[13], self.slice[14], self.slice[15]]
    }

    #[inline]
    pub fn destination(&self) -> [u8; 4] {
        [self.slice[16], self.slice[17], self.slice[18], self.slice[19]]
    }

    /// Recomputes the header checksum from the current header bytes and
    /// writes it into the checksum field.
    pub fn update_header_checksum(&mut self) {
        self.slice[10..12].copy_from_slice(&[0, 0]);
        let check = Sum16::new().add_slice(self.slice).finish();
        self.slice[10..12].copy_from_slice(&check.to_be_bytes());
    }
}
