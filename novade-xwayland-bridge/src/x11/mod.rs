//! The X11 side of the bridge.
//!
//! Everything here talks to the X server through the [`XConnection`] trait,
//! a deliberately small slice of the core protocol plus the XFixes
//! selection-owner notification. Two implementations exist: the in-memory
//! display in [`memory`], which the test-suite and headless setups use, and
//! (behind the `x11rb-backend` feature) a wrapper around an `x11rb`
//! connection to a real Xwayland server.
//!
//! ## Key Components
//!
//! - [`transport`]: typed property reads/writes including INCR chunking.
//! - [`selection`]: ICCCM selection owner and requestor state machines.
//! - [`xdnd`]: the XDND client-message codec and the source/target roles.

use bitflags::bitflags;

use crate::error::XError;

pub mod memory;
pub mod selection;
pub mod transport;
pub mod xdnd;
#[cfg(feature = "x11rb-backend")]
pub mod x11rb_backend;

pub type Atom = u32;
pub type Window = u32;
pub type Timestamp = u32;

/// The `None` resource / atom.
pub const NONE: u32 = 0;
pub const CURRENT_TIME: Timestamp = 0;
pub const ANY_PROPERTY_TYPE: Atom = 0;

/// Atoms with fixed values in the core protocol.
pub mod predefined {
    use super::Atom;

    pub const PRIMARY: Atom = 1;
    pub const ATOM: Atom = 4;
    pub const CARDINAL: Atom = 6;
    pub const INTEGER: Atom = 19;
    pub const STRING: Atom = 31;
    pub const WINDOW: Atom = 33;
}

bitflags! {
    /// Core event-mask bits used by the bridge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const BUTTON_PRESS = 1 << 2;
        const BUTTON_RELEASE = 1 << 3;
        const ENTER_WINDOW = 1 << 4;
        const LEAVE_WINDOW = 1 << 5;
        const POINTER_MOTION = 1 << 6;
        const STRUCTURE_NOTIFY = 1 << 17;
        const SUBSTRUCTURE_NOTIFY = 1 << 19;
        const PROPERTY_CHANGE = 1 << 22;
    }
}

/// Position and size of a window relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Geometry {
    pub const fn new(x: i16, y: i16, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }

    /// Whether a point in parent coordinates lies inside the window.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (left, top) = (i32::from(self.x), i32::from(self.y));
        x >= left && y >= top && x < left + i32::from(self.width) && y < top + i32::from(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    NewValue,
    Deleted,
}

/// A property value as returned by `GetProperty`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyReply {
    pub type_: Atom,
    pub format: u8,
    pub value: Vec<u8>,
}

impl PropertyReply {
    /// The value as 32-bit items; trailing bytes that do not form an item are ignored.
    pub fn value32(&self) -> Vec<u32> {
        bytes_to_u32s(&self.value)
    }
}

/// Result of `TranslateCoordinates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translated {
    /// Mapped child of the destination window containing the point, or [`NONE`].
    pub child: Window,
    pub dst_x: i16,
    pub dst_y: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    pub time: Timestamp,
    pub owner: Window,
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    pub property: Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionNotify {
    pub time: Timestamp,
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    /// [`NONE`] when the conversion was refused.
    pub property: Atom,
}

/// A 32-bit format client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMessage {
    pub window: Window,
    pub type_: Atom,
    pub data: [u32; 5],
}

/// The events the bridge consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XEvent {
    SelectionRequest(SelectionRequest),
    SelectionNotify(SelectionNotify),
    SelectionClear {
        time: Timestamp,
        owner: Window,
        selection: Atom,
    },
    /// XFixes `SelectionNotify`: the owner of a watched selection changed.
    SelectionOwnerChanged {
        window: Window,
        owner: Window,
        selection: Atom,
        timestamp: Timestamp,
    },
    PropertyNotify {
        window: Window,
        atom: Atom,
        time: Timestamp,
        state: PropertyState,
    },
    ClientMessage(ClientMessage),
    DestroyNotify {
        window: Window,
    },
}

impl XEvent {
    /// Server time carried by the event, if any.
    pub fn time(&self) -> Option<Timestamp> {
        match self {
            XEvent::SelectionRequest(r) => Some(r.time),
            XEvent::SelectionNotify(n) => Some(n.time),
            XEvent::SelectionClear { time, .. } | XEvent::PropertyNotify { time, .. } => Some(*time),
            XEvent::SelectionOwnerChanged { timestamp, .. } => Some(*timestamp),
            XEvent::ClientMessage(_) | XEvent::DestroyNotify { .. } => None,
        }
    }
}

/// The subset of the X11 protocol the bridge needs.
///
/// Methods take `&self`: requests are buffered by the connection and sent on
/// [`flush`](XConnection::flush), replies are waited for inline.
pub trait XConnection {
    fn root(&self) -> Window;

    fn create_window(&self, parent: Window, geometry: Geometry) -> Result<Window, XError>;
    fn destroy_window(&self, window: Window) -> Result<(), XError>;
    fn configure_window(&self, window: Window, geometry: Geometry) -> Result<(), XError>;
    fn map_window(&self, window: Window) -> Result<(), XError>;
    fn unmap_window(&self, window: Window) -> Result<(), XError>;
    /// Moves the window to the top of its siblings.
    fn raise_window(&self, window: Window) -> Result<(), XError>;
    fn select_input(&self, window: Window, mask: EventMask) -> Result<(), XError>;
    /// XFixes: report owner changes of `selection` to this client, tagged with `window`.
    fn select_selection_input(&self, window: Window, selection: Atom) -> Result<(), XError>;

    /// Interns all names with one round trip, in order.
    fn intern_atoms(&self, names: &[&str]) -> Result<Vec<Atom>, XError>;
    fn intern_atom(&self, name: &str) -> Result<Atom, XError> {
        let atoms = self.intern_atoms(&[name])?;
        atoms.first().copied().ok_or_else(|| XError::Protocol(format!("no reply for atom {name}")))
    }
    fn atom_name(&self, atom: Atom) -> Result<String, XError>;

    /// Reads a whole property. `None` when it does not exist.
    fn get_property(
        &self,
        delete: bool,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<PropertyReply>, XError>;
    fn change_property(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: &[u8],
    ) -> Result<(), XError>;
    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError>;

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: Timestamp) -> Result<(), XError>;
    fn get_selection_owner(&self, selection: Atom) -> Result<Window, XError>;
    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<(), XError>;
    fn send_selection_notify(&self, notify: &SelectionNotify) -> Result<(), XError>;
    fn send_client_message(&self, destination: Window, message: &ClientMessage) -> Result<(), XError>;

    fn translate_coordinates(&self, src: Window, dst: Window, x: i16, y: i16) -> Result<Translated, XError>;
    /// Children of `window`, bottom to top.
    fn query_tree(&self, window: Window) -> Result<Vec<Window>, XError>;
    /// Position relative to the parent, and size.
    fn get_geometry(&self, window: Window) -> Result<Geometry, XError>;
    /// Mapped, with every ancestor mapped too.
    fn is_viewable(&self, window: Window) -> Result<bool, XError>;

    fn poll_for_event(&self) -> Result<Option<XEvent>, XError>;
    fn flush(&self) -> Result<(), XError>;
}

/// Encodes 32-bit items the way a client library hands them to the server.
pub fn u32s_to_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub fn bytes_to_u32s(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
