//! [`XConnection`] over a real X server, through `x11rb`.
//!
//! Requests are sent unchecked; errors caused by them show up later in the
//! event stream and are only logged, mirroring how the in-memory display
//! fails silently for vanished peers.

use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::xfixes::{self, ConnectionExt as _, SelectionEventMask};
use x11rb::protocol::xproto::{
    self, ChangeWindowAttributesAux, ClientMessageEvent, ConfigureWindowAux, ConnectionExt as _, CreateWindowAux,
    SelectionNotifyEvent, StackMode, WindowClass,
};
use x11rb::protocol::{ErrorKind, Event};
use x11rb::rust_connection::RustConnection;
use tracing::{debug, trace};

use super::{
    ClientMessage, EventMask, Geometry, PropMode, PropertyReply, PropertyState, SelectionNotify, SelectionRequest,
    Timestamp, Translated, Window, XConnection, XEvent, Atom, NONE,
};
use crate::error::XError;

impl From<ConnectionError> for XError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::IoError(_) => XError::ConnectionClosed,
            other => XError::Protocol(other.to_string()),
        }
    }
}

impl From<ReplyError> for XError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => e.into(),
            ReplyError::X11Error(e) => match e.error_kind {
                ErrorKind::Window => XError::BadWindow(e.bad_value),
                ErrorKind::Atom => XError::BadAtom(e.bad_value),
                ErrorKind::Match => XError::BadMatch(format!("{:?}", e.major_opcode)),
                ErrorKind::Value => XError::BadValue(format!("{}", e.bad_value)),
                other => XError::Protocol(format!("{other:?}")),
            },
        }
    }
}

impl From<ReplyOrIdError> for XError {
    fn from(e: ReplyOrIdError) -> Self {
        match e {
            ReplyOrIdError::ConnectionError(e) => e.into(),
            ReplyOrIdError::X11Error(e) => ReplyError::X11Error(e).into(),
            ReplyOrIdError::IdsExhausted => XError::Protocol("X resource ids exhausted".to_string()),
        }
    }
}

/// An `x11rb` connection with XFixes initialised.
#[derive(Debug)]
pub struct X11rbConnection<C: Connection = RustConnection> {
    conn: C,
    root: Window,
}

impl X11rbConnection<RustConnection> {
    /// Connects to `display` (or `$DISPLAY`).
    pub fn connect(display: Option<&str>) -> Result<Self, XError> {
        let (conn, screen) =
            RustConnection::connect(display).map_err(|e| XError::Protocol(format!("cannot connect to X: {e}")))?;
        Self::new(conn, screen)
    }
}

impl<C: Connection> X11rbConnection<C> {
    /// Wraps an established connection, using `screen`'s root window.
    pub fn new(conn: C, screen: usize) -> Result<Self, XError> {
        let root = conn
            .setup()
            .roots
            .get(screen)
            .map(|screen| screen.root)
            .ok_or_else(|| XError::Protocol(format!("no screen {screen}")))?;
        let version = conn.xfixes_query_version(5, 0)?.reply()?;
        debug!(root, major = version.major_version, minor = version.minor_version, "XFixes ready");
        Ok(Self { conn, root })
    }

    pub fn inner(&self) -> &C {
        &self.conn
    }
}

fn convert_event(event: Event) -> Option<XEvent> {
    Some(match event {
        Event::SelectionRequest(e) => XEvent::SelectionRequest(SelectionRequest {
            time: e.time,
            owner: e.owner,
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
        }),
        Event::SelectionNotify(e) => XEvent::SelectionNotify(SelectionNotify {
            time: e.time,
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
        }),
        Event::SelectionClear(e) => XEvent::SelectionClear { time: e.time, owner: e.owner, selection: e.selection },
        Event::XfixesSelectionNotify(e) => XEvent::SelectionOwnerChanged {
            window: e.window,
            owner: e.owner,
            selection: e.selection,
            // The time the owner acquired it; the server fills in CurrentTime claims.
            timestamp: e.selection_timestamp,
        },
        Event::PropertyNotify(e) => XEvent::PropertyNotify {
            window: e.window,
            atom: e.atom,
            time: e.time,
            state: if e.state == xproto::Property::DELETE { PropertyState::Deleted } else { PropertyState::NewValue },
        },
        Event::ClientMessage(e) if e.format == 32 => {
            XEvent::ClientMessage(ClientMessage { window: e.window, type_: e.type_, data: e.data.as_data32() })
        }
        Event::DestroyNotify(e) => XEvent::DestroyNotify { window: e.window },
        Event::Error(e) => {
            debug!(kind = ?e.error_kind, bad_value = e.bad_value, "Asynchronous X error");
            return None;
        }
        other => {
            trace!(?other, "Ignoring X event");
            return None;
        }
    })
}

impl<C: Connection> XConnection for X11rbConnection<C> {
    fn root(&self) -> Window {
        self.root
    }

    fn create_window(&self, parent: Window, geometry: Geometry) -> Result<Window, XError> {
        let window = self.conn.generate_id()?;
        self.conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            parent,
            geometry.x,
            geometry.y,
            geometry.width,
            geometry.height,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new().event_mask(xproto::EventMask::PROPERTY_CHANGE),
        )?;
        Ok(window)
    }

    fn destroy_window(&self, window: Window) -> Result<(), XError> {
        self.conn.destroy_window(window)?;
        Ok(())
    }

    fn configure_window(&self, window: Window, geometry: Geometry) -> Result<(), XError> {
        let aux = ConfigureWindowAux::new()
            .x(i32::from(geometry.x))
            .y(i32::from(geometry.y))
            .width(u32::from(geometry.width))
            .height(u32::from(geometry.height));
        self.conn.configure_window(window, &aux)?;
        Ok(())
    }

    fn map_window(&self, window: Window) -> Result<(), XError> {
        self.conn.map_window(window)?;
        Ok(())
    }

    fn unmap_window(&self, window: Window) -> Result<(), XError> {
        self.conn.unmap_window(window)?;
        Ok(())
    }

    fn raise_window(&self, window: Window) -> Result<(), XError> {
        self.conn.configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        Ok(())
    }

    fn select_input(&self, window: Window, mask: EventMask) -> Result<(), XError> {
        let aux = ChangeWindowAttributesAux::new().event_mask(xproto::EventMask::from(mask.bits()));
        self.conn.change_window_attributes(window, &aux)?;
        Ok(())
    }

    fn select_selection_input(&self, window: Window, selection: Atom) -> Result<(), XError> {
        let mask = SelectionEventMask::SET_SELECTION_OWNER
            | SelectionEventMask::SELECTION_WINDOW_DESTROY
            | SelectionEventMask::SELECTION_CLIENT_CLOSE;
        xfixes::select_selection_input(&self.conn, window, selection, mask)?;
        Ok(())
    }

    fn intern_atoms(&self, names: &[&str]) -> Result<Vec<Atom>, XError> {
        let cookies = names
            .iter()
            .map(|name| self.conn.intern_atom(false, name.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        cookies.into_iter().map(|cookie| Ok(cookie.reply()?.atom)).collect()
    }

    fn atom_name(&self, atom: Atom) -> Result<String, XError> {
        let reply = self.conn.get_atom_name(atom)?.reply()?;
        Ok(String::from_utf8_lossy(&reply.name).into_owned())
    }

    fn get_property(
        &self,
        delete: bool,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<PropertyReply>, XError> {
        let reply = self.conn.get_property(delete, window, property, type_, 0, u32::MAX / 4)?.reply()?;
        if reply.type_ == NONE {
            return Ok(None);
        }
        Ok(Some(PropertyReply { type_: reply.type_, format: reply.format, value: reply.value }))
    }

    fn change_property(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: &[u8],
    ) -> Result<(), XError> {
        let size = usize::from(format / 8).max(1);
        if data.len() % size != 0 {
            return Err(XError::BadMatch(format!("{} bytes in format {format}", data.len())));
        }
        let mode = match mode {
            PropMode::Replace => xproto::PropMode::REPLACE,
            PropMode::Append => xproto::PropMode::APPEND,
        };
        let len = u32::try_from(data.len() / size).map_err(|_| XError::BadValue("property too long".to_string()))?;
        self.conn.change_property(mode, window, property, type_, format, len, data)?;
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError> {
        self.conn.delete_property(window, property)?;
        Ok(())
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: Timestamp) -> Result<(), XError> {
        self.conn.set_selection_owner(owner, selection, time)?;
        Ok(())
    }

    fn get_selection_owner(&self, selection: Atom) -> Result<Window, XError> {
        Ok(self.conn.get_selection_owner(selection)?.reply()?.owner)
    }

    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<(), XError> {
        self.conn.convert_selection(requestor, selection, target, property, time)?;
        Ok(())
    }

    fn send_selection_notify(&self, notify: &SelectionNotify) -> Result<(), XError> {
        let event = SelectionNotifyEvent {
            response_type: xproto::SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: notify.time,
            requestor: notify.requestor,
            selection: notify.selection,
            target: notify.target,
            property: notify.property,
        };
        self.conn.send_event(false, notify.requestor, xproto::EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn send_client_message(&self, destination: Window, message: &ClientMessage) -> Result<(), XError> {
        let event = ClientMessageEvent::new(32, message.window, message.type_, message.data);
        self.conn.send_event(false, destination, xproto::EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn translate_coordinates(&self, src: Window, dst: Window, x: i16, y: i16) -> Result<Translated, XError> {
        let reply = self.conn.translate_coordinates(src, dst, x, y)?.reply()?;
        Ok(Translated { child: reply.child, dst_x: reply.dst_x, dst_y: reply.dst_y })
    }

    fn query_tree(&self, window: Window) -> Result<Vec<Window>, XError> {
        Ok(self.conn.query_tree(window)?.reply()?.children)
    }

    fn get_geometry(&self, window: Window) -> Result<Geometry, XError> {
        let reply = self.conn.get_geometry(window)?.reply()?;
        Ok(Geometry::new(reply.x, reply.y, reply.width, reply.height))
    }

    fn is_viewable(&self, window: Window) -> Result<bool, XError> {
        let reply = self.conn.get_window_attributes(window)?.reply()?;
        Ok(reply.map_state == xproto::MapState::VIEWABLE)
    }

    fn poll_for_event(&self) -> Result<Option<XEvent>, XError> {
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(event) = convert_event(event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn flush(&self) -> Result<(), XError> {
        self.conn.flush()?;
        Ok(())
    }
}
