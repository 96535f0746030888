use std::sync::atomic::Ordering;

use tracing::debug;

use crate::config::StateTimeouts;
use crate::flow::{Flow, FlowFlags};
use crate::transport::TcpFlags;

/// Number of TCP pseudo-states a flow can be in.
pub const TCP_STATE_COUNT: usize = 11;

/// Pseudo TCP state of a balanced flow.
///
/// The balancer never terminates TCP; these states only track how far
/// the two endpoints have come so the flow can be timed out accordingly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TcpState {
    None = 0,
    Established,
    SynSent,
    SynRecv,
    FinWait,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    SynAck,
}

impl TcpState {
    /// Display name, matching the wire-format-independent convention
    /// used by control-plane tooling.
    pub fn name(self) -> &'static str {
        use TcpState::*;
        match self {
            None => "NONE",
            Established => "ESTABLISHED",
            SynSent => "SYN_SENT",
            SynRecv => "SYN_RECV",
            FinWait => "FIN_WAIT",
            TimeWait => "TIME_WAIT",
            Close => "CLOSE",
            CloseWait => "CLOSE_WAIT",
            LastAck => "LAST_ACK",
            Listen => "LISTEN",
            SynAck => "SYNACK",
        }
    }

    /// Resolves a display name back to a state.
    pub fn from_name(name: &str) -> Option<TcpState> {
        use TcpState::*;
        Some(match name {
            "NONE" => None,
            "ESTABLISHED" => Established,
            "SYN_SENT" => SynSent,
            "SYN_RECV" => SynRecv,
            "FIN_WAIT" => FinWait,
            "TIME_WAIT" => TimeWait,
            "CLOSE" => Close,
            "CLOSE_WAIT" => CloseWait,
            "LAST_ACK" => LastAck,
            "LISTEN" => Listen,
            "SYNACK" => SynAck,
            _ => return Option::None,
        })
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl core::fmt::Display for TcpState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of a packet relative to the balancer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Client to backend.
    Input,
    /// Backend to client.
    Output,
    /// Input while no output packet has ever been seen; keeps half-open
    /// flows from being prematurely marked established.
    InputOnly,
}

impl Direction {
    #[inline]
    fn row_offset(self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 4,
            Direction::InputOnly => 8,
        }
    }
}

/// Flag class of a segment, in decreasing match priority.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FlagClass {
    Syn = 0,
    Fin = 1,
    Ack = 2,
    Rst = 3,
}

impl FlagClass {
    /// Priority order: RST over SYN over FIN over ACK.
    pub(crate) fn of(flags: TcpFlags) -> Option<FlagClass> {
        if flags.rst {
            Some(FlagClass::Rst)
        } else if flags.syn {
            Some(FlagClass::Syn)
        } else if flags.fin {
            Some(FlagClass::Fin)
        } else if flags.ack {
            Some(FlagClass::Ack)
        } else {
            None
        }
    }
}

/// One transition table: 12 rows (3 directions x 4 flag classes), 11
/// columns (current state).
#[derive(Clone, Debug)]
pub struct StateTable {
    rows: [[TcpState; TCP_STATE_COUNT]; 12],
}

impl StateTable {
    #[inline]
    fn next(&self, direction: Direction, class: FlagClass, current: TcpState) -> TcpState {
        self.rows[direction.row_offset() + class as usize][current.index()]
    }
}

use TcpState::{
    Close as CL, CloseWait as CW, Established as ES, FinWait as FW, LastAck as LA, Listen as LI,
    None as NO, SynAck as SA, SynRecv as SR, SynSent as SS, TimeWait as TW,
};

/// Transition table used in normal operation.
pub static TCP_STATES: StateTable = StateTable {
    rows: [
        //  INPUT
        //  NO, ES, SS, SR, FW, TW, CL, CW, LA, LI, SA
        /*syn*/ [SR, ES, ES, SR, SR, SR, SR, SR, SR, SR, SR],
        /*fin*/ [CL, CW, SS, TW, TW, TW, CL, CW, LA, LI, TW],
        /*ack*/ [CL, ES, SS, ES, FW, TW, CL, CW, CL, LI, ES],
        /*rst*/ [CL, CL, CL, SR, CL, CL, CL, CL, LA, LI, SR],
        //  OUTPUT
        //  NO, ES, SS, SR, FW, TW, CL, CW, LA, LI, SA
        /*syn*/ [SS, ES, SS, SR, SS, SS, SS, SS, SS, LI, SR],
        /*fin*/ [TW, FW, SS, TW, FW, TW, CL, TW, LA, LI, TW],
        /*ack*/ [ES, ES, SS, ES, FW, TW, CL, CW, LA, ES, ES],
        /*rst*/ [CL, CL, SS, CL, CL, TW, CL, CL, CL, CL, CL],
        //  INPUT-ONLY
        //  NO, ES, SS, SR, FW, TW, CL, CW, LA, LI, SA
        /*syn*/ [SR, ES, ES, SR, SR, SR, SR, SR, SR, SR, SR],
        /*fin*/ [CL, FW, SS, TW, FW, TW, CL, CW, LA, LI, TW],
        /*ack*/ [CL, ES, SS, ES, FW, TW, CL, CW, CL, LI, ES],
        /*rst*/ [CL, CL, CL, SR, CL, CL, CL, CL, LA, LI, CL],
    ],
};

/// Stricter transition table used under SYN flood: SYNACK is sticky and
/// transitions out of half-open states are damped, so incomplete
/// handshakes commit fewer resources.
pub static TCP_STATES_SECURE: StateTable = StateTable {
    rows: [
        //  INPUT
        //  NO, ES, SS, SR, FW, TW, CL, CW, LA, LI, SA
        /*syn*/ [SR, ES, ES, SR, SR, SR, SR, SR, SR, SR, SA],
        /*fin*/ [CL, CW, SS, TW, TW, TW, CL, CW, LA, LI, SA],
        /*ack*/ [CL, ES, SS, SR, FW, TW, CL, CW, CL, LI, SA],
        /*rst*/ [CL, CL, CL, SR, CL, CL, CL, CL, LA, LI, CL],
        //  OUTPUT
        //  NO, ES, SS, SR, FW, TW, CL, CW, LA, LI, SA
        /*syn*/ [SS, ES, SS, SA, SS, SS, SS, SS, SS, LI, SA],
        /*fin*/ [TW, FW, SS, TW, FW, TW, CL, TW, LA, LI, TW],
        /*ack*/ [ES, ES, SS, ES, FW, TW, CL, CW, LA, ES, ES],
        /*rst*/ [CL, CL, SS, CL, CL, TW, CL, CL, CL, CL, CL],
        //  INPUT-ONLY
        //  NO, ES, SS, SR, FW, TW, CL, CW, LA, LI, SA
        /*syn*/ [SA, ES, ES, SR, SA, SA, SA, SA, SA, SA, SA],
        /*fin*/ [CL, FW, SS, TW, FW, TW, CL, CW, LA, LI, TW],
        /*ack*/ [CL, ES, SS, ES, FW, TW, CL, CW, CL, LI, ES],
        /*rst*/ [CL, CL, CL, SR, CL, CL, CL, CL, LA, LI, CL],
    ],
};

/// Advances the flow state from one observed segment.
///
/// The framework serialises calls per flow (the `&mut` borrow carries
/// that guarantee), so the snapshot of `old_state` and the commit of the
/// new state happen atomically from the point of view of other packets.
pub(crate) fn set_state(
    flow: &mut Flow,
    direction: Direction,
    flags: TcpFlags,
    table: &StateTable,
    timeouts: &StateTimeouts,
) {
    let mut effective = direction;
    if flow.flags.contains(FlowFlags::NOOUTPUT) {
        if direction == Direction::Output {
            flow.flags.remove(FlowFlags::NOOUTPUT);
        } else {
            effective = Direction::InputOnly;
        }
    }

    // segments with no classifiable flag close the flow defensively
    let new_state = match FlagClass::of(flags) {
        Some(class) => table.next(effective, class, flow.state),
        None => {
            debug!("segment without classifiable flags");
            TcpState::Close
        }
    };

    if new_state != flow.state {
        debug!(
            direction = ?effective,
            syn = flags.syn,
            fin = flags.fin,
            ack = flags.ack,
            rst = flags.rst,
            from = %flow.state,
            to = %new_state,
            "flow state transition"
        );

        if let Some(dest) = flow.dest.as_ref() {
            if !flow.flags.contains(FlowFlags::INACTIVE) && new_state != TcpState::Established {
                dest.active_conns.fetch_sub(1, Ordering::Relaxed);
                dest.inactive_conns.fetch_add(1, Ordering::Relaxed);
                flow.flags.insert(FlowFlags::INACTIVE);
            } else if flow.flags.contains(FlowFlags::INACTIVE)
                && new_state == TcpState::Established
            {
                dest.active_conns.fetch_add(1, Ordering::Relaxed);
                dest.inactive_conns.fetch_sub(1, Ordering::Relaxed);
                flow.flags.remove(FlowFlags::INACTIVE);
            }
        }
    }

    // snapshot before commit: the reuse path reads the pre-transition
    // state through old_state
    flow.old_state = flow.state;
    flow.state = new_state;
    flow.timeout = timeouts.get(new_state);
}
