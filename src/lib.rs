//! TCP packet-steering core for a layer-4 virtual-server load balancer.
//!
//! This crate implements the per-packet TCP logic of a virtual-server
//! balancer: it inspects every segment of a balanced flow, rewrites
//! addresses, ports and sequence numbers according to the flow's
//! forwarding mode, keeps a per-flow pseudo TCP state machine and fences
//! expired flows by synthesising RST segments towards both peers.
//!
//! Three forwarding modes are supported:
//!
//! * *NAT / masquerade* — destination is rewritten on ingress, source on
//!   egress.
//! * *FullNAT* — both source and destination are rewritten on ingress so
//!   that any balancer node can observe both directions; sequence numbers
//!   are translated and the original client address travels to the
//!   backend in a TCP option.
//! * *Direct* — packets are steered without header rewrites.
//!
//! The crate never terminates TCP; it is a middlebox. Flow-table
//! management, backend scheduling, SYN-proxy cookies, routing and
//! statistics all live outside, behind the [`Framework`] trait. The only
//! surface the surrounding framework consumes is the [`L4Proto`]
//! descriptor, implemented here by [`TcpProto`].
//!
//! # Usage
//!
//! ```
//! use vsteer::{TcpConfig, TcpProto, L4Proto};
//!
//! let proto = TcpProto::new(TcpConfig::default());
//! assert_eq!("TCP", proto.name());
//! ```
//!
//! Packet mutation happens in place on caller-owned buffers
//! ([`PacketBuf`]); every handler collapses its failure modes to a binary
//! keep/drop [`Disposition`], mirroring how a packet-processing pipeline
//! consumes verdicts.

/// Module containing error types that can be triggered.
pub mod err;

mod checksum;
pub use crate::checksum::*;

mod net;
pub use crate::net::*;

mod transport;
pub use crate::transport::*;

mod config;
pub use crate::config::*;

mod flow;
pub use crate::flow::*;

mod seq;
pub use crate::seq::*;

mod state;
pub use crate::state::*;

mod framework;
pub use crate::framework::*;

mod app;

mod gate;

mod rewrite;

mod rst;

mod proto;
pub use crate::proto::*;
