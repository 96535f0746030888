use tracing::debug;

use crate::config::TcpConfig;
use crate::framework::{Framework, GateOutcome, Verdict};
use crate::net::PacketBuf;
use crate::transport::TcpSliceMut;

/// Classifies an ingress packet that matched no existing flow: gives the
/// SYN-proxy first refusal, schedules a new flow for a qualifying SYN,
/// shields stray packets aimed at a virtual address, and passes
/// everything else back to the surrounding pipeline.
pub(crate) fn conn_schedule(
    pkt: &mut PacketBuf,
    fw: &dyn Framework,
    cfg: &TcpConfig,
) -> GateOutcome {
    let Ok(tcphoff) = pkt.l4_offset() else {
        return GateOutcome::Finished(Verdict::Drop);
    };
    let (flags, destination_port) = {
        let Ok(tcp) = TcpSliceMut::from_slice(&mut pkt.data_mut()[tcphoff..]) else {
            return GateOutcome::Finished(Verdict::Drop);
        };
        (tcp.flags(), tcp.destination_port())
    };

    // SYN-proxy step 2: the proxy may claim the client's handshake ACK
    // and resurrect the pending flow
    if let Some(verdict) = fw.synproxy_ack_rcv(pkt) {
        return GateOutcome::Finished(verdict);
    }

    let Ok(version) = pkt.ip_version() else {
        return GateOutcome::Finished(Verdict::Drop);
    };
    let Ok(destination) = pkt.destination_addr() else {
        return GateOutcome::Finished(Verdict::Drop);
    };

    if flags.is_pure_syn() {
        if let Some(service) = fw.service_lookup(version, pkt.mark(), destination, destination_port)
        {
            if fw.overloaded() {
                // very loaded, shed the new connection
                debug!("dropping new connection under overload");
                return GateOutcome::Finished(Verdict::Drop);
            }
            return match service.schedule(pkt) {
                Some(flow) => GateOutcome::Scheduled(flow),
                None => GateOutcome::Finished(service.leave(pkt)),
            };
        }
    }

    // packets to a virtual address without a matching service
    if cfg.drop_stray_to_vip && fw.vip_exists(version, destination) {
        debug!(%destination, port = destination_port, "dropping stray packet to virtual address");
        return GateOutcome::Finished(Verdict::Drop);
    }

    GateOutcome::Pass
}
