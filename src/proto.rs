use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::app::AppTable;
use crate::checksum::{verify_input_checksum, IP_PROTO_TCP};
use crate::config::TcpConfig;
use crate::err::{RegisterAppError, UnknownStateNameError};
use crate::flow::Flow;
use crate::framework::{AppHelper, Disposition, Framework, GateOutcome, SharedFlow};
use crate::net::PacketBuf;
use crate::state::{set_state, Direction, StateTable, TcpState, TCP_STATES, TCP_STATES_SECURE};
use crate::transport::{TcpFlags, TcpSliceMut};
use crate::{gate, rewrite, rst};

/// The protocol descriptor: the one surface the surrounding framework
/// consumes. A transport protocol plugs into the balancer by
/// implementing this.
pub trait L4Proto: Send + Sync {
    fn name(&self) -> &'static str;

    /// IP protocol number handled by this descriptor.
    fn protocol(&self) -> u8;

    /// Module bring-up hook.
    fn init(&self) {}

    /// Module teardown hook.
    fn exit(&self) {}

    /// Registers an application helper incarnation.
    fn register_app(&self, inc: Arc<dyn AppHelper>) -> Result<(), RegisterAppError>;

    /// Removes an application helper incarnation.
    fn unregister_app(&self, inc: &Arc<dyn AppHelper>);

    /// Offers an unmatched ingress packet for scheduling (see
    /// [`GateOutcome`]).
    fn conn_schedule(&self, pkt: &mut PacketBuf, fw: &dyn Framework) -> GateOutcome;

    /// Flow lookup for ingress packets; delegated to the framework's
    /// flow table.
    fn conn_in_get(&self, pkt: &PacketBuf, fw: &dyn Framework) -> Option<SharedFlow> {
        fw.flow_lookup_in(pkt)
    }

    /// Flow lookup for egress packets; delegated to the framework's
    /// flow table.
    fn conn_out_get(&self, pkt: &PacketBuf, fw: &dyn Framework) -> Option<SharedFlow> {
        fw.flow_lookup_out(pkt)
    }

    /// Egress rewrite for NAT flows.
    fn snat_handler(&self, pkt: &mut PacketBuf, flow: &mut Flow, fw: &dyn Framework)
        -> Disposition;

    /// Ingress rewrite for NAT flows.
    fn dnat_handler(&self, pkt: &mut PacketBuf, flow: &mut Flow, fw: &dyn Framework)
        -> Disposition;

    /// Ingress rewrite for FullNAT flows.
    fn fnat_in_handler(
        &self,
        pkt: &mut PacketBuf,
        flow: &mut Flow,
        fw: &dyn Framework,
    ) -> Disposition;

    /// Egress rewrite for FullNAT flows.
    fn fnat_out_handler(
        &self,
        pkt: &mut PacketBuf,
        flow: &mut Flow,
        fw: &dyn Framework,
    ) -> Disposition;

    /// Verifies the transport checksum of an ingress packet.
    fn csum_check(&self, pkt: &mut PacketBuf) -> bool;

    /// Display name of a flow state.
    fn state_name(&self, state: TcpState) -> &'static str {
        state.name()
    }

    /// Advances the flow state from one observed segment.
    fn state_transition(
        &self,
        flow: &mut Flow,
        direction: Direction,
        pkt: &PacketBuf,
    ) -> Disposition;

    /// Binds the registered application helper to a freshly created
    /// flow, if one matches its virtual port.
    fn app_conn_bind(&self, flow: &mut Flow) -> bool;

    /// Renders a packet into the debug log.
    fn debug_packet(&self, pkt: &PacketBuf, msg: &str);

    /// Control-plane reconfiguration; bit 0 selects the flood-hardened
    /// state transition table.
    fn timeout_change(&self, flags: u32);

    /// Updates the deadline of one state, addressed by display name.
    fn set_state_timeout(&self, name: &str, timeout: Duration)
        -> Result<(), UnknownStateNameError>;

    /// Called by the flow table when a flow expires.
    fn conn_expire_handler(&self, flow: &mut Flow, fw: &dyn Framework);

    /// Pins a passive (listening) flow to the LISTEN state.
    fn conn_listen(&self, flow: &mut Flow);
}

/// TCP implementation of the protocol descriptor.
pub struct TcpProto {
    config: ArcSwap<TcpConfig>,
    /// Active transition table; swapped atomically by the control
    /// plane, loaded once per packet.
    table: ArcSwap<StateTable>,
    apps: Mutex<AppTable>,
}

impl TcpProto {
    pub fn new(config: TcpConfig) -> TcpProto {
        TcpProto {
            config: ArcSwap::from_pointee(config),
            table: ArcSwap::from_pointee(TCP_STATES.clone()),
            apps: Mutex::new(AppTable::new()),
        }
    }

    /// Currently installed configuration.
    pub fn config(&self) -> Arc<TcpConfig> {
        self.config.load_full()
    }

    /// Atomically installs a new configuration. Packets already in
    /// flight finish under the old one.
    pub fn set_config(&self, config: TcpConfig) {
        self.config.store(Arc::new(config));
    }
}

impl Default for TcpProto {
    fn default() -> TcpProto {
        TcpProto::new(TcpConfig::default())
    }
}

impl L4Proto for TcpProto {
    fn name(&self) -> &'static str {
        "TCP"
    }

    fn protocol(&self) -> u8 {
        IP_PROTO_TCP
    }

    fn init(&self) {
        debug!("TCP steering protocol initialised");
    }

    fn exit(&self) {
        debug!("TCP steering protocol shut down");
    }

    fn register_app(&self, inc: Arc<dyn AppHelper>) -> Result<(), RegisterAppError> {
        self.apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(inc)
    }

    fn unregister_app(&self, inc: &Arc<dyn AppHelper>) {
        self.apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(inc);
    }

    fn conn_schedule(&self, pkt: &mut PacketBuf, fw: &dyn Framework) -> GateOutcome {
        gate::conn_schedule(pkt, fw, &self.config.load())
    }

    fn snat_handler(
        &self,
        pkt: &mut PacketBuf,
        flow: &mut Flow,
        fw: &dyn Framework,
    ) -> Disposition {
        rewrite::snat_out(pkt, flow, fw, &self.config.load())
    }

    fn dnat_handler(
        &self,
        pkt: &mut PacketBuf,
        flow: &mut Flow,
        fw: &dyn Framework,
    ) -> Disposition {
        rewrite::dnat_in(pkt, flow, fw, &self.config.load())
    }

    fn fnat_in_handler(
        &self,
        pkt: &mut PacketBuf,
        flow: &mut Flow,
        fw: &dyn Framework,
    ) -> Disposition {
        rewrite::fnat_in(pkt, flow, fw, &self.config.load())
    }

    fn fnat_out_handler(
        &self,
        pkt: &mut PacketBuf,
        flow: &mut Flow,
        fw: &dyn Framework,
    ) -> Disposition {
        rewrite::fnat_out(pkt, flow, fw, &self.config.load())
    }

    fn csum_check(&self, pkt: &mut PacketBuf) -> bool {
        verify_input_checksum(pkt)
    }

    fn state_transition(
        &self,
        flow: &mut Flow,
        direction: Direction,
        pkt: &PacketBuf,
    ) -> Disposition {
        let Ok(tcphoff) = pkt.l4_offset() else {
            return Disposition::Drop;
        };
        if pkt.len() < tcphoff + TcpSliceMut::MIN_LEN {
            return Disposition::Drop;
        }
        let flags = TcpFlags::from_bits(pkt.data()[tcphoff + 13]);

        let table = self.table.load();
        let config = self.config.load();
        set_state(flow, direction, flags, &table, &config.timeouts);
        Disposition::Keep
    }

    fn app_conn_bind(&self, flow: &mut Flow) -> bool {
        self.apps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bind(flow)
    }

    fn debug_packet(&self, pkt: &PacketBuf, msg: &str) {
        debug!(packet = %render_packet(pkt), "{}", msg);
    }

    fn timeout_change(&self, flags: u32) {
        let secure = flags & 1 != 0;
        self.table.store(Arc::new(if secure {
            TCP_STATES_SECURE.clone()
        } else {
            TCP_STATES.clone()
        }));
        debug!(secure, "state transition table switched");
    }

    fn set_state_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<(), UnknownStateNameError> {
        let state = TcpState::from_name(name).ok_or_else(|| UnknownStateNameError {
            name: name.to_string(),
        })?;
        self.config.rcu(|config| {
            let mut next = TcpConfig::clone(config);
            next.timeouts.set(state, timeout);
            next
        });
        Ok(())
    }

    fn conn_expire_handler(&self, flow: &mut Flow, fw: &dyn Framework) {
        rst::conn_expire(flow, fw, &self.config.load());
    }

    fn conn_listen(&self, flow: &mut Flow) {
        flow.state = TcpState::Listen;
        flow.timeout = self.config.load().timeouts.get(TcpState::Listen);
    }
}

/// Renders the 4-tuple and flags of a packet for log output.
fn render_packet(pkt: &PacketBuf) -> String {
    let Ok(tcphoff) = pkt.l4_offset() else {
        return "TCP [unparseable]".to_string();
    };
    let (Ok(source), Ok(destination)) = (pkt.source_addr(), pkt.destination_addr()) else {
        return "TCP [unparseable]".to_string();
    };
    if pkt.len() < tcphoff + TcpSliceMut::MIN_LEN {
        return format!("TCP {source}->{destination} [truncated]");
    }
    let data = pkt.data();
    let sport = u16::from_be_bytes([data[tcphoff], data[tcphoff + 1]]);
    let dport = u16::from_be_bytes([data[tcphoff + 2], data[tcphoff + 3]]);
    let flags = TcpFlags::from_bits(data[tcphoff + 13]);
    format!(
        "TCP {}:{}->{}:{} [{}{}{}{}]",
        source,
        sport,
        destination,
        dport,
        if flags.syn { 'S' } else { '.' },
        if flags.fin { 'F' } else { '.' },
        if flags.ack { 'A' } else { '.' },
        if flags.rst { 'R' } else { '.' },
    )
}
