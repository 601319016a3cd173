//! The process-wide table of well-known atoms.
//!
//! All names are interned with a single batched request when the bridge
//! starts. The resulting [`Atoms`] value never changes afterwards and is
//! shared as `Arc<Atoms>`, so any component (and any thread) can read it
//! without synchronization.
//!
//! # Examples
//!
//! ```
//! use novade_xwayland_bridge::atoms::Atoms;
//! use novade_xwayland_bridge::x11::memory::MemoryDisplay;
//!
//! let display = MemoryDisplay::new(1024, 768);
//! let conn = display.connect();
//! let atoms = Atoms::intern(&conn).unwrap();
//! assert_ne!(atoms.clipboard, atoms.primary);
//! assert_eq!(atoms.name_of(atoms.xdnd_aware), Some("XdndAware"));
//! ```

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::AtomTableError;
use crate::x11::{Atom, XConnection};

macro_rules! atom_table {
    ($($field:ident => $name:literal,)+) => {
        /// Interned values of every well-known name used by the bridge.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct Atoms {
            $(pub $field: Atom,)+
        }

        impl Atoms {
            /// Names in registry order.
            pub const NAMES: &'static [&'static str] = &[$($name,)+];

            fn from_resolved(values: &[Atom]) -> Option<Self> {
                let mut values = values.iter().copied();
                Some(Self {
                    $($field: values.next()?,)+
                })
            }

            /// Reverse lookup for logging and for atoms that have a fixed mime meaning.
            pub fn name_of(&self, atom: Atom) -> Option<&'static str> {
                $(if self.$field == atom {
                    return Some($name);
                })+
                None
            }
        }
    };
}

atom_table! {
    clipboard => "CLIPBOARD",
    primary => "PRIMARY",
    targets => "TARGETS",
    timestamp => "TIMESTAMP",
    multiple => "MULTIPLE",
    incr => "INCR",
    text => "TEXT",
    utf8_string => "UTF8_STRING",
    string => "STRING",
    integer => "INTEGER",
    atom => "ATOM",
    window => "WINDOW",
    text_plain => "text/plain",
    text_plain_utf8 => "text/plain;charset=utf-8",
    uri_list => "text/uri-list",
    text_x_uri => "text/x-uri",
    netscape_url => "_NETSCAPE_URL",
    moz_url => "text/x-moz-url",
    delete => "DELETE",
    xdnd_aware => "XdndAware",
    xdnd_selection => "XdndSelection",
    xdnd_type_list => "XdndTypeList",
    xdnd_enter => "XdndEnter",
    xdnd_position => "XdndPosition",
    xdnd_status => "XdndStatus",
    xdnd_leave => "XdndLeave",
    xdnd_drop => "XdndDrop",
    xdnd_finished => "XdndFinished",
    xdnd_proxy => "XdndProxy",
    xdnd_action_copy => "XdndActionCopy",
    xdnd_action_move => "XdndActionMove",
    xdnd_action_ask => "XdndActionAsk",
    xdnd_action_private => "XdndActionPrivate",
    xdnd_action_list => "XdndActionList",
    xdnd_action_description => "XdndActionDescription",
    wl_selection => "_WL_SELECTION",
    wl_surface_id => "WL_SURFACE_ID",
    wm_protocols => "WM_PROTOCOLS",
    wm_delete_window => "WM_DELETE_WINDOW",
    wm_state => "WM_STATE",
    wm_class => "WM_CLASS",
    wm_name => "WM_NAME",
    net_wm_name => "_NET_WM_NAME",
    net_active_window => "_NET_ACTIVE_WINDOW",
    net_wm_sync_request_counter => "_NET_WM_SYNC_REQUEST_COUNTER",
    net_wm_window_type => "_NET_WM_WINDOW_TYPE",
    net_wm_window_type_dnd => "_NET_WM_WINDOW_TYPE_DND",
}

impl Atoms {
    /// Resolves the whole registry in one round trip.
    ///
    /// # Errors
    ///
    /// Any failure is fatal for the bridge and reported as [`AtomTableError`].
    pub fn intern(conn: &dyn XConnection) -> Result<Arc<Self>, AtomTableError> {
        let count = Self::NAMES.len();
        let values = conn.intern_atoms(Self::NAMES).map_err(|source| {
            error!(count, error = %source, "Interning well-known atoms failed");
            AtomTableError { count, source }
        })?;
        let atoms = Self::from_resolved(&values).ok_or_else(|| AtomTableError {
            count,
            source: crate::error::XError::Protocol(format!("expected {count} atoms, got {}", values.len())),
        })?;
        debug!(count, "Atom table resolved");
        Ok(Arc::new(atoms))
    }

    /// Targets that describe the conversion protocol rather than data.
    pub fn is_meta_target(&self, atom: Atom) -> bool {
        atom == self.targets || atom == self.timestamp || atom == self.multiple || atom == self.delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XError;
    use crate::x11::memory::MemoryDisplay;
    use crate::x11::predefined;
    use std::collections::HashSet;

    #[test]
    fn test_registry_has_unique_names() {
        let unique: HashSet<_> = Atoms::NAMES.iter().collect();
        assert_eq!(unique.len(), Atoms::NAMES.len());
        assert!(Atoms::NAMES.contains(&"_NET_WM_SYNC_REQUEST_COUNTER"));
        assert!(Atoms::NAMES.contains(&"XdndAware"));
    }

    #[test]
    fn test_intern_matches_predefined_atoms() {
        let display = MemoryDisplay::new(800, 600);
        let conn = display.connect();
        let atoms = Atoms::intern(&conn).unwrap();
        assert_eq!(atoms.primary, predefined::PRIMARY);
        assert_eq!(atoms.string, predefined::STRING);
        assert_eq!(atoms.integer, predefined::INTEGER);
        assert_eq!(atoms.window, predefined::WINDOW);
    }

    #[test]
    fn test_interning_is_stable_across_connections() {
        let display = MemoryDisplay::new(800, 600);
        let first = Atoms::intern(&display.connect()).unwrap();
        let second = Atoms::intern(&display.connect()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_name_of_unknown_atom() {
        let display = MemoryDisplay::new(800, 600);
        let conn = display.connect();
        let atoms = Atoms::intern(&conn).unwrap();
        let custom = conn.intern_atom("application/x-custom").unwrap();
        assert_eq!(atoms.name_of(atoms.incr), Some("INCR"));
        assert_eq!(atoms.name_of(custom), None);
    }

    #[test]
    fn test_intern_failure_is_reported() {
        let display = MemoryDisplay::new(800, 600);
        let conn = display.connect();
        display.close();
        let err = Atoms::intern(&conn).unwrap_err();
        assert_eq!(err.source, XError::ConnectionClosed);
        assert_eq!(err.count, Atoms::NAMES.len());
    }
}
