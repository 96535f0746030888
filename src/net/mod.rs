mod packet_buf;
pub use packet_buf::*;

mod ipv4_header_slice_mut;
pub use ipv4_header_slice_mut::*;

mod ipv6_header_slice_mut;
pub use ipv6_header_slice_mut::*;
