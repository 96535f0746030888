mod tcp_slice_mut;
pub use tcp_slice_mut::*;

pub(crate) mod tcp_opts;
