//! DnD states and the transition table.
//!
//! Every engine operation is looked up here before it touches anything.
//! Keeping the table in one function makes the reset-on-bad-state rule
//! checkable for every `(state, operation)` pair.

use crate::engine::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DndState {
    /// No supported transport. The engine is inert.
    Invalid,
    /// Idle, ready for the next cycle.
    Ready,
    /// HG: host drag has entered the guest; detection window shown.
    Entering,
    /// Reserved for legacy-version drag-begin handshakes; V3 never enters it.
    #[allow(dead_code)]
    Starting,
    /// HG: UI confirmed the local drag.
    DraggingInside,
    /// GH: host asked whether a guest drag is leaving; watchdog armed.
    QueryExiting,
    /// Reserved for legacy-version ungrab handshakes; V3 never enters it.
    #[allow(dead_code)]
    Ungrabbing,
    /// GH: guest drag is over the host.
    DraggingOutside,
    /// GH: the outgoing drag came back over the guest desktop.
    DraggingPrivate,
}

impl DndState {
    #[cfg(test)]
    pub const ALL: [DndState; 9] = [
        DndState::Invalid,
        DndState::Ready,
        DndState::Entering,
        DndState::Starting,
        DndState::DraggingInside,
        DndState::QueryExiting,
        DndState::Ungrabbing,
        DndState::DraggingOutside,
        DndState::DraggingPrivate,
    ];

    /// States in which a host→guest drag session is live.
    pub fn is_hg(self) -> bool {
        matches!(
            self,
            DndState::Entering | DndState::Starting | DndState::DraggingInside
        )
    }
}

/// Table keys: one per operation that the state gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DndOp {
    HgDragEnter,
    HgDragStart,
    ConfirmStart,
    HgCancel,
    HgDrop,
    FileCopyDone,
    SetFeedback,
    QueryExiting,
    /// `overlay` is true while the Unity detection window is shown.
    GhDragEnter { overlay: bool },
    WatchdogFired,
    GhCancel,
    UnityWindow { show: bool },
    PrivDragEnter,
    PrivDragLeave,
    PrivDrop,
}

impl DndOp {
    #[cfg(test)]
    pub const ALL: [DndOp; 17] = [
        DndOp::HgDragEnter,
        DndOp::HgDragStart,
        DndOp::ConfirmStart,
        DndOp::HgCancel,
        DndOp::HgDrop,
        DndOp::FileCopyDone,
        DndOp::SetFeedback,
        DndOp::QueryExiting,
        DndOp::GhDragEnter { overlay: false },
        DndOp::GhDragEnter { overlay: true },
        DndOp::WatchdogFired,
        DndOp::GhCancel,
        DndOp::UnityWindow { show: true },
        DndOp::UnityWindow { show: false },
        DndOp::PrivDragEnter,
        DndOp::PrivDragLeave,
        DndOp::PrivDrop,
    ];
}

/// Look up what `op` does in `state`.
pub fn transition(state: DndState, op: DndOp) -> Transition<DndState> {
    use DndState::*;

    if state == Invalid {
        return Transition::Ignore;
    }

    match (op, state) {
        (DndOp::HgDragEnter, Ready | Entering) => Transition::To(Entering),
        (DndOp::HgDragStart, Entering) => Transition::Stay,
        (DndOp::ConfirmStart, Entering) => Transition::To(DraggingInside),
        (DndOp::HgCancel, Entering | DraggingInside) => Transition::To(Ready),
        (DndOp::HgCancel, Ready) => Transition::Ignore,
        (DndOp::HgDrop, DraggingInside) => Transition::To(Ready),
        (DndOp::FileCopyDone, _) => Transition::Stay,
        (DndOp::SetFeedback, _) => Transition::Stay,

        (DndOp::QueryExiting, Ready) => Transition::To(QueryExiting),
        (DndOp::GhDragEnter { .. }, QueryExiting) => Transition::To(DraggingOutside),
        (DndOp::GhDragEnter { overlay: true }, Ready) => Transition::To(DraggingOutside),
        (DndOp::WatchdogFired, QueryExiting) => Transition::To(Ready),
        (DndOp::WatchdogFired, _) => Transition::Ignore,
        (DndOp::GhCancel, _) => Transition::To(Ready),
        (DndOp::UnityWindow { show: true }, Ready) => Transition::Stay,
        (DndOp::UnityWindow { show: true }, _) => Transition::ResetFirst,
        (DndOp::UnityWindow { show: false }, _) => Transition::Stay,
        (DndOp::PrivDragEnter, DraggingOutside) => Transition::To(DraggingPrivate),
        (DndOp::PrivDragLeave, DraggingPrivate) => Transition::To(DraggingOutside),
        (DndOp::PrivDrop, DraggingPrivate) => Transition::To(Ready),

        _ => Transition::Reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_inert() {
        for op in DndOp::ALL {
            assert_eq!(transition(DndState::Invalid, op), Transition::Ignore, "{op:?}");
        }
    }

    #[test]
    fn hg_happy_path() {
        assert_eq!(
            transition(DndState::Ready, DndOp::HgDragEnter),
            Transition::To(DndState::Entering)
        );
        assert_eq!(
            transition(DndState::Entering, DndOp::HgDragStart),
            Transition::Stay
        );
        assert_eq!(
            transition(DndState::Entering, DndOp::ConfirmStart),
            Transition::To(DndState::DraggingInside)
        );
        assert_eq!(
            transition(DndState::DraggingInside, DndOp::HgDrop),
            Transition::To(DndState::Ready)
        );
    }

    #[test]
    fn gh_drag_enter_from_ready_needs_overlay() {
        assert_eq!(
            transition(DndState::Ready, DndOp::GhDragEnter { overlay: false }),
            Transition::Reset
        );
        assert_eq!(
            transition(DndState::Ready, DndOp::GhDragEnter { overlay: true }),
            Transition::To(DndState::DraggingOutside)
        );
    }

    #[test]
    fn stale_watchdog_is_ignored_everywhere_but_query_exiting() {
        for state in DndState::ALL {
            let expected = if state == DndState::QueryExiting {
                Transition::To(DndState::Ready)
            } else {
                Transition::Ignore
            };
            assert_eq!(transition(state, DndOp::WatchdogFired), expected, "{state:?}");
        }
    }

    #[test]
    fn unity_show_outside_ready_resets_first() {
        assert_eq!(
            transition(DndState::DraggingOutside, DndOp::UnityWindow { show: true }),
            Transition::ResetFirst
        );
        assert_eq!(
            transition(DndState::DraggingOutside, DndOp::UnityWindow { show: false }),
            Transition::Stay
        );
    }

    #[test]
    fn reserved_states_only_accept_global_operations() {
        for state in [DndState::Starting, DndState::Ungrabbing] {
            assert_eq!(transition(state, DndOp::HgDragEnter), Transition::Reset);
            assert_eq!(transition(state, DndOp::HgDrop), Transition::Reset);
            assert_eq!(transition(state, DndOp::GhCancel), Transition::To(DndState::Ready));
            assert_eq!(transition(state, DndOp::FileCopyDone), Transition::Stay);
        }
    }
}
