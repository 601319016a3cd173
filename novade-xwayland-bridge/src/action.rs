//! Drag-and-drop actions shared by both protocol sides.

use bitflags::bitflags;

use crate::atoms::Atoms;
use crate::x11::{Atom, NONE};

bitflags! {
    /// Same bit values as `wl_data_device_manager.dnd_action`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DndAction: u32 {
        const COPY = 1;
        const MOVE = 2;
        const ASK = 4;
    }
}

impl DndAction {
    /// Picks the action both sides support, honoring the target's preference.
    ///
    /// Falls back to copy, then move, then ask; an empty result means no
    /// action was selected.
    pub fn negotiate(source: DndAction, target: DndAction, preferred: DndAction) -> DndAction {
        let common = source & target;
        if !preferred.is_empty() && preferred.bits().count_ones() == 1 && common.contains(preferred) {
            return preferred;
        }
        [DndAction::COPY, DndAction::MOVE, DndAction::ASK]
            .into_iter()
            .find(|action| common.contains(*action))
            .unwrap_or(DndAction::empty())
    }

    /// Maps an XDND action atom. `XdndActionPrivate` degrades to copy.
    pub fn from_xdnd_atom(atoms: &Atoms, atom: Atom) -> DndAction {
        if atom == atoms.xdnd_action_copy || atom == atoms.xdnd_action_private {
            DndAction::COPY
        } else if atom == atoms.xdnd_action_move {
            DndAction::MOVE
        } else if atom == atoms.xdnd_action_ask {
            DndAction::ASK
        } else {
            DndAction::empty()
        }
    }

    /// The XDND atom for a single action, [`NONE`] for no action.
    pub fn to_xdnd_atom(self, atoms: &Atoms) -> Atom {
        if self.contains(DndAction::COPY) {
            atoms.xdnd_action_copy
        } else if self.contains(DndAction::MOVE) {
            atoms.xdnd_action_move
        } else if self.contains(DndAction::ASK) {
            atoms.xdnd_action_ask
        } else {
            NONE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DndAction::all(), DndAction::MOVE, DndAction::MOVE, DndAction::MOVE)]
    #[case(DndAction::COPY | DndAction::MOVE, DndAction::all(), DndAction::ASK, DndAction::COPY)]
    #[case(DndAction::MOVE | DndAction::ASK, DndAction::all(), DndAction::empty(), DndAction::MOVE)]
    #[case(DndAction::COPY, DndAction::MOVE, DndAction::MOVE, DndAction::empty())]
    #[case(DndAction::all(), DndAction::ASK, DndAction::ASK, DndAction::ASK)]
    fn test_negotiate(
        #[case] source: DndAction,
        #[case] target: DndAction,
        #[case] preferred: DndAction,
        #[case] expected: DndAction,
    ) {
        assert_eq!(DndAction::negotiate(source, target, preferred), expected);
    }
}
