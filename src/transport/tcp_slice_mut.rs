use crate::err::HeaderError;

/// Decoded TCP flag bits of a segment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
}

impl TcpFlags {
    /// Decodes the flag byte of a TCP header (offset 13).
    #[inline]
    pub fn from_bits(bits: u8) -> TcpFlags {
        TcpFlags {
            fin: 0 != bits & 0x01,
            syn: 0 != bits & 0x02,
            rst: 0 != bits & 0x04,
            psh: 0 != bits & 0x08,
            ack: 0 != bits & 0x10,
        }
    }

    /// `true` for a bare connection request (SYN set, everything that
    /// would disqualify it clear).
    #[inline]
    pub fn is_pure_syn(&self) -> bool {
        self.syn && !self.ack && !self.fin && !self.rst
    }

    /// `true` for the second step of a handshake.
    #[inline]
    pub fn is_syn_ack(&self) -> bool {
        self.syn && self.ack
    }
}

/// Mutable in-place view of a TCP segment (header, options and payload).
///
/// All accessors read and write network byte order directly in the
/// underlying buffer; nothing is deserialized up front.
pub struct TcpSliceMut<'a> {
    slice: &'a mut [u8],
}

impl<'a> TcpSliceMut<'a> {
    /// Minimum length of a TCP header in bytes/octets.
    pub const MIN_LEN: usize = 20;

    /// The minimum data offset (size of the tcp header itself in words).
    pub const MIN_DATA_OFFSET: u8 = 5;

    /// The maximum allowed value for the data offset (4 bit value).
    pub const MAX_DATA_OFFSET: u8 = 0xf;

    /// Creates a view over a whole transport segment. The slice must
    /// contain at least the fixed header and the options area announced
    /// by the data offset.
    pub fn from_slice(slice: &'a mut [u8]) -> Result<TcpSliceMut<'a>, HeaderError> {
        if slice.len() < TcpSliceMut::MIN_LEN {
            return Err(HeaderError::LenTooSmall {
                required: TcpSliceMut::MIN_LEN,
                actual: slice.len(),
            });
        }
        let data_offset = slice[12] >> 4;
        if data_offset < TcpSliceMut::MIN_DATA_OFFSET {
            return Err(HeaderError::DataOffsetTooSmall { data_offset });
        }
        let header_len = usize::from(data_offset) * 4;
        if slice.len() < header_len {
            return Err(HeaderError::LenTooSmall {
                required: header_len,
                actual: slice.len(),
            });
        }
        Ok(TcpSliceMut { slice })
    }

    #[inline]
    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.slice[0], self.slice[1]])
    }

    #[inline]
    pub fn set_source_port(&mut self, port: u16) {
        self.slice[0..2].copy_from_slice(&port.to_be_bytes());
    }

    #[inline]
    pub fn destination_port(&self) -> u16 {
        u16::from_be_bytes([self.slice[2], self.slice[3]])
    }

    #[inline]
    pub fn set_destination_port(&mut self, port: u16) {
        self.slice[2..4].copy_from_slice(&port.to_be_bytes());
    }

    #[inline]
    pub fn sequence_number(&self) -> u32 {
        u32::from_be_bytes([self.slice[4], self.slice[5], self.slice[6], self.slice[7]])
    }

    #[inline]
    pub fn set_sequence_number(&mut self, value: u32) {
        self.slice[4..8].copy_from_slice(&value.to_be_bytes());
    }

    #[inline]
    pub fn acknowledgment_number(&self) -> u32 {
        u32::from_be_bytes([self.slice[8], self.slice[9], self.slice[10], self.slice[11]])
    }

    #[inline]
    pub fn set_acknowledgment_number(&mut self, value: u32) {
        self.slice[8..12].copy_from_slice(&value.to_be_bytes());
    }

    /// The number of 32 bit words in the TCP header.
    #[inline]
    pub fn data_offset(&self) -> u8 {
        self.slice[12] >> 4
    }

    /// Overwrites the data offset nibble. The caller must have grown the
    /// options area to match.
    #[inline]
    pub fn set_data_offset(&mut self, value: u8) {
        debug_assert!(TcpSliceMut::MIN_DATA_OFFSET <= value);
        debug_assert!(value <= TcpSliceMut::MAX_DATA_OFFSET);
        self.slice[12] = (self.slice[12] & 0x0f) | (value << 4);
    }

    /// Length of the header including options.
    #[inline]
    pub fn header_len(&self) -> usize {
        usize::from(self.data_offset()) * 4
    }

    #[inline]
    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits(self.slice[13])
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.slice[16], self.slice[17]])
    }

    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        self.slice[16..18].copy_from_slice(&value.to_be_bytes());
    }

    /// The options area of the header.
    #[inline]
    pub fn options(&self) -> &[u8] {
        &self.slice[TcpSliceMut::MIN_LEN..self.header_len()]
    }

    /// Mutable access to the options area of the header.
    #[inline]
    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.slice[TcpSliceMut::MIN_LEN..header_len]
    }

    /// Number of payload bytes after the header and options.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.slice.len() - self.header_len()
    }

    /// The whole segment (for checksum computation).
    #[inline]
    pub fn segment(&self) -> &[u8] {
        self.slice
    }
}
