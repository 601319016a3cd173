//! An in-process X display.
//!
//! [`MemoryDisplay`] models the parts of an X server that selections and
//! XDND depend on: a window tree with geometry and stacking, typed
//! properties with `PropertyNotify`, selection ownership with `SelectionClear`
//! and XFixes owner-change notifications, `SendEvent` delivery to the
//! window's creator and one event queue per client connection. Dropping a
//! [`MemoryConnection`] destroys the windows that client created, just like
//! a client disconnecting from a real server.
//!
//! The display is single-threaded (`Rc<RefCell<_>>`), matching the bridge's
//! event-loop model.
//!
//! # Examples
//!
//! ```
//! use novade_xwayland_bridge::x11::memory::MemoryDisplay;
//! use novade_xwayland_bridge::x11::{Geometry, PropMode, XConnection, ANY_PROPERTY_TYPE};
//!
//! let display = MemoryDisplay::new(1280, 1024);
//! let client = display.connect();
//! let window = client.create_window(client.root(), Geometry::new(0, 0, 100, 100)).unwrap();
//! let utf8 = client.intern_atom("UTF8_STRING").unwrap();
//! let prop = client.intern_atom("_MY_PROP").unwrap();
//! client.change_property(PropMode::Replace, window, prop, utf8, 8, b"hello").unwrap();
//! let reply = client.get_property(false, window, prop, ANY_PROPERTY_TYPE).unwrap().unwrap();
//! assert_eq!(reply.value, b"hello");
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::trace;

use super::{
    Atom, ClientMessage, EventMask, Geometry, PropMode, PropertyReply, PropertyState, SelectionNotify,
    SelectionRequest, Timestamp, Translated, Window, XConnection, XEvent, ANY_PROPERTY_TYPE, CURRENT_TIME, NONE,
};
use crate::error::XError;

/// Atoms 1..=68 of the core protocol, in value order.
const PREDEFINED_ATOMS: [&str; 68] = [
    "PRIMARY", "SECONDARY", "ARC", "ATOM", "BITMAP", "CARDINAL", "COLORMAP", "CURSOR",
    "CUT_BUFFER0", "CUT_BUFFER1", "CUT_BUFFER2", "CUT_BUFFER3", "CUT_BUFFER4", "CUT_BUFFER5",
    "CUT_BUFFER6", "CUT_BUFFER7", "DRAWABLE", "FONT", "INTEGER", "PIXMAP", "POINT", "RECTANGLE",
    "RESOURCE_MANAGER", "RGB_COLOR_MAP", "RGB_BEST_MAP", "RGB_BLUE_MAP", "RGB_DEFAULT_MAP",
    "RGB_GRAY_MAP", "RGB_GREEN_MAP", "RGB_RED_MAP", "STRING", "VISUALID", "WINDOW", "WM_COMMAND",
    "WM_HINTS", "WM_CLIENT_MACHINE", "WM_ICON_NAME", "WM_ICON_SIZE", "WM_NAME", "WM_NORMAL_HINTS",
    "WM_SIZE_HINTS", "WM_ZOOM_HINTS", "MIN_SPACE", "NORM_SPACE", "MAX_SPACE", "END_SPACE",
    "SUPERSCRIPT_X", "SUPERSCRIPT_Y", "SUBSCRIPT_X", "SUBSCRIPT_Y", "UNDERLINE_POSITION",
    "UNDERLINE_THICKNESS", "STRIKEOUT_ASCENT", "STRIKEOUT_DESCENT", "ITALIC_ANGLE", "X_HEIGHT",
    "QUAD_WIDTH", "WEIGHT", "POINT_SIZE", "RESOLUTION", "COPYRIGHT", "NOTICE", "FONT_NAME",
    "FAMILY_NAME", "FULL_NAME", "CAP_HEIGHT", "WM_CLASS", "WM_TRANSIENT_FOR",
];

const ROOT_WINDOW: Window = 0x100;
const FIRST_RESOURCE_ID: u32 = 0x0020_0000;

type ConnId = u32;

#[derive(Debug)]
struct WindowState {
    parent: Window,
    children: Vec<Window>,
    geometry: Geometry,
    mapped: bool,
    creator: Option<ConnId>,
    properties: HashMap<Atom, PropertyReply>,
    masks: HashMap<ConnId, EventMask>,
}

impl WindowState {
    fn new(parent: Window, geometry: Geometry, creator: Option<ConnId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            geometry,
            mapped: false,
            creator,
            properties: HashMap::new(),
            masks: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OwnerState {
    window: Window,
    time: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FixesWatch {
    conn: ConnId,
    window: Window,
    selection: Atom,
}

#[derive(Debug)]
struct Server {
    closed: bool,
    time: Timestamp,
    next_resource: u32,
    next_conn: ConnId,
    atom_names: Vec<String>,
    atoms: HashMap<String, Atom>,
    windows: HashMap<Window, WindowState>,
    selections: HashMap<Atom, OwnerState>,
    fixes: Vec<FixesWatch>,
    queues: HashMap<ConnId, VecDeque<XEvent>>,
}

impl Server {
    fn new(width: u16, height: u16) -> Self {
        let mut root = WindowState::new(NONE, Geometry::new(0, 0, width, height), None);
        root.mapped = true;
        let atom_names: Vec<String> = PREDEFINED_ATOMS.iter().map(|name| name.to_string()).collect();
        let atoms = atom_names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index as Atom + 1))
            .collect();
        Self {
            closed: false,
            time: 1,
            next_resource: FIRST_RESOURCE_ID,
            next_conn: 1,
            atom_names,
            atoms,
            windows: HashMap::from([(ROOT_WINDOW, root)]),
            selections: HashMap::new(),
            fixes: Vec::new(),
            queues: HashMap::new(),
        }
    }

    fn check_open(&self) -> Result<(), XError> {
        if self.closed {
            Err(XError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn tick(&mut self) -> Timestamp {
        self.time = self.time.wrapping_add(1);
        self.time
    }

    fn window(&self, window: Window) -> Result<&WindowState, XError> {
        self.windows.get(&window).ok_or(XError::BadWindow(window))
    }

    fn window_mut(&mut self, window: Window) -> Result<&mut WindowState, XError> {
        self.windows.get_mut(&window).ok_or(XError::BadWindow(window))
    }

    fn deliver(&mut self, conn: ConnId, event: XEvent) {
        if let Some(queue) = self.queues.get_mut(&conn) {
            trace!(conn, ?event, "Queueing X event");
            queue.push_back(event);
        }
    }

    fn deliver_to_creator(&mut self, window: Window, event: XEvent) -> Result<(), XError> {
        if let Some(conn) = self.window(window)?.creator {
            self.deliver(conn, event);
        }
        Ok(())
    }

    fn listeners(&self, window: Window, mask: EventMask) -> Vec<ConnId> {
        self.windows
            .get(&window)
            .map(|state| {
                state
                    .masks
                    .iter()
                    .filter(|(_, selected)| selected.contains(mask))
                    .map(|(conn, _)| *conn)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify_property(&mut self, window: Window, atom: Atom, state: PropertyState) {
        let time = self.tick();
        for conn in self.listeners(window, EventMask::PROPERTY_CHANGE) {
            self.deliver(conn, XEvent::PropertyNotify { window, atom, time, state });
        }
    }

    fn notify_owner_change(&mut self, selection: Atom, owner: Window, timestamp: Timestamp) {
        let watches: Vec<FixesWatch> = self.fixes.iter().filter(|w| w.selection == selection).copied().collect();
        for watch in watches {
            self.deliver(
                watch.conn,
                XEvent::SelectionOwnerChanged { window: watch.window, owner, selection, timestamp },
            );
        }
    }

    fn absolute_origin(&self, window: Window) -> Result<(i32, i32), XError> {
        let mut current = window;
        let (mut x, mut y) = (0i32, 0i32);
        while current != NONE {
            let state = self.window(current)?;
            x += i32::from(state.geometry.x);
            y += i32::from(state.geometry.y);
            current = state.parent;
        }
        Ok((x, y))
    }

    fn subtree(&self, window: Window) -> Vec<Window> {
        let mut order = Vec::new();
        let mut stack = vec![window];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(state) = self.windows.get(&current) {
                stack.extend(state.children.iter().copied());
            }
        }
        // Children are destroyed before their parents.
        order.reverse();
        order
    }

    fn destroy(&mut self, window: Window) -> Result<(), XError> {
        if window == ROOT_WINDOW {
            return Err(XError::BadMatch("the root window cannot be destroyed".to_string()));
        }
        self.window(window)?;
        for doomed in self.subtree(window) {
            let Some(state) = self.windows.get(&doomed) else {
                continue;
            };
            let parent = state.parent;
            let mut listeners = self.listeners(doomed, EventMask::STRUCTURE_NOTIFY);
            for conn in self.listeners(parent, EventMask::SUBSTRUCTURE_NOTIFY) {
                if !listeners.contains(&conn) {
                    listeners.push(conn);
                }
            }
            for conn in listeners {
                self.deliver(conn, XEvent::DestroyNotify { window: doomed });
            }
            self.windows.remove(&doomed);
            if let Some(parent_state) = self.windows.get_mut(&parent) {
                parent_state.children.retain(|child| *child != doomed);
            }
            self.fixes.retain(|watch| watch.window != doomed);

            let owned: Vec<Atom> = self
                .selections
                .iter()
                .filter(|(_, owner)| owner.window == doomed)
                .map(|(selection, _)| *selection)
                .collect();
            for selection in owned {
                self.selections.remove(&selection);
                let time = self.tick();
                self.notify_owner_change(selection, NONE, time);
            }
        }
        Ok(())
    }
}

/// The display: creates client connections and exposes a few server-side knobs.
#[derive(Debug, Clone)]
pub struct MemoryDisplay {
    server: Rc<RefCell<Server>>,
}

impl MemoryDisplay {
    /// A display whose root window is `width`×`height`.
    pub fn new(width: u16, height: u16) -> Self {
        Self { server: Rc::new(RefCell::new(Server::new(width, height))) }
    }

    /// Opens a new client connection with its own event queue.
    pub fn connect(&self) -> MemoryConnection {
        let mut server = self.server.borrow_mut();
        let id = server.next_conn;
        server.next_conn += 1;
        server.queues.insert(id, VecDeque::new());
        MemoryConnection { id, server: Rc::clone(&self.server) }
    }

    /// Simulates the server going away: every request fails afterwards.
    pub fn close(&self) {
        self.server.borrow_mut().closed = true;
    }

    pub fn root(&self) -> Window {
        ROOT_WINDOW
    }

    /// Current server time.
    pub fn time(&self) -> Timestamp {
        self.server.borrow().time
    }

    pub fn window_exists(&self, window: Window) -> bool {
        self.server.borrow().windows.contains_key(&window)
    }

    pub fn is_mapped(&self, window: Window) -> bool {
        self.server.borrow().windows.get(&window).map(|state| state.mapped).unwrap_or(false)
    }

    /// Geometry relative to the parent window.
    pub fn geometry(&self, window: Window) -> Option<Geometry> {
        self.server.borrow().windows.get(&window).map(|state| state.geometry)
    }
}

/// One client's connection to a [`MemoryDisplay`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnId,
    server: Rc<RefCell<Server>>,
}

impl MemoryConnection {
    /// Number of queued, not yet polled events.
    pub fn pending_events(&self) -> usize {
        self.server.borrow().queues.get(&self.id).map(VecDeque::len).unwrap_or(0)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut server = self.server.borrow_mut();
        let owned: Vec<Window> = server
            .windows
            .iter()
            .filter(|(_, state)| state.creator == Some(self.id))
            .map(|(window, _)| *window)
            .collect();
        for window in owned {
            // Already gone when an ancestor created by the same client was destroyed first.
            if server.windows.contains_key(&window) {
                let _ = server.destroy(window);
            }
        }
        let id = self.id;
        server.fixes.retain(|watch| watch.conn != id);
        for state in server.windows.values_mut() {
            state.masks.remove(&id);
        }
        server.queues.remove(&id);
    }
}

impl XConnection for MemoryConnection {
    fn root(&self) -> Window {
        ROOT_WINDOW
    }

    fn create_window(&self, parent: Window, geometry: Geometry) -> Result<Window, XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.window(parent)?;
        let window = server.next_resource;
        server.next_resource += 1;
        server.windows.insert(window, WindowState::new(parent, geometry, Some(self.id)));
        server.window_mut(parent)?.children.push(window);
        Ok(window)
    }

    fn destroy_window(&self, window: Window) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.destroy(window)
    }

    fn configure_window(&self, window: Window, geometry: Geometry) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.window_mut(window)?.geometry = geometry;
        Ok(())
    }

    fn map_window(&self, window: Window) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.window_mut(window)?.mapped = true;
        Ok(())
    }

    fn unmap_window(&self, window: Window) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.window_mut(window)?.mapped = false;
        Ok(())
    }

    fn raise_window(&self, window: Window) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        let parent = server.window(window)?.parent;
        if let Ok(parent_state) = server.window_mut(parent) {
            parent_state.children.retain(|child| *child != window);
            parent_state.children.push(window);
        }
        Ok(())
    }

    fn select_input(&self, window: Window, mask: EventMask) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        let state = server.window_mut(window)?;
        if mask.is_empty() {
            state.masks.remove(&self.id);
        } else {
            state.masks.insert(self.id, mask);
        }
        Ok(())
    }

    fn select_selection_input(&self, window: Window, selection: Atom) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.window(window)?;
        let watch = FixesWatch { conn: self.id, window, selection };
        if !server.fixes.contains(&watch) {
            server.fixes.push(watch);
        }
        Ok(())
    }

    fn intern_atoms(&self, names: &[&str]) -> Result<Vec<Atom>, XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            if let Some(atom) = server.atoms.get(*name) {
                resolved.push(*atom);
                continue;
            }
            server.atom_names.push(name.to_string());
            let atom = server.atom_names.len() as Atom;
            server.atoms.insert(name.to_string(), atom);
            resolved.push(atom);
        }
        Ok(resolved)
    }

    fn atom_name(&self, atom: Atom) -> Result<String, XError> {
        let server = self.server.borrow();
        server.check_open()?;
        let index = (atom as usize).checked_sub(1).ok_or(XError::BadAtom(atom))?;
        server.atom_names.get(index).cloned().ok_or(XError::BadAtom(atom))
    }

    fn get_property(
        &self,
        delete: bool,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<PropertyReply>, XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        let Some(value) = server.window(window)?.properties.get(&property).cloned() else {
            return Ok(None);
        };
        if type_ != ANY_PROPERTY_TYPE && type_ != value.type_ {
            return Ok(Some(PropertyReply { type_: value.type_, format: value.format, value: Vec::new() }));
        }
        if delete {
            server.window_mut(window)?.properties.remove(&property);
            server.notify_property(window, property, PropertyState::Deleted);
        }
        Ok(Some(value))
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
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        if !matches!(format, 8 | 16 | 32) {
            return Err(XError::BadValue(format!("property format {format}")));
        }
        if data.len() % usize::from(format / 8) != 0 {
            return Err(XError::BadMatch(format!("{} bytes are not {format}-bit aligned", data.len())));
        }
        let state = server.window_mut(window)?;
        match (mode, state.properties.get_mut(&property)) {
            (PropMode::Append, Some(existing)) => {
                if existing.type_ != type_ || existing.format != format {
                    return Err(XError::BadMatch("append with a different type or format".to_string()));
                }
                existing.value.extend_from_slice(data);
            }
            _ => {
                state.properties.insert(property, PropertyReply { type_, format, value: data.to_vec() });
            }
        }
        server.notify_property(window, property, PropertyState::NewValue);
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        if server.window_mut(window)?.properties.remove(&property).is_some() {
            server.notify_property(window, property, PropertyState::Deleted);
        }
        Ok(())
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom, time: Timestamp) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        if owner != NONE {
            server.window(owner)?;
        }
        let time = if time == CURRENT_TIME { server.tick() } else { time };
        let previous = server.selections.get(&selection).copied();
        if let Some(previous) = previous {
            if previous.window != owner && server.windows.contains_key(&previous.window) {
                server.deliver_to_creator(
                    previous.window,
                    XEvent::SelectionClear { time, owner: previous.window, selection },
                )?;
            }
        }
        if owner == NONE {
            server.selections.remove(&selection);
        } else {
            server.selections.insert(selection, OwnerState { window: owner, time });
        }
        server.notify_owner_change(selection, owner, time);
        Ok(())
    }

    fn get_selection_owner(&self, selection: Atom) -> Result<Window, XError> {
        let server = self.server.borrow();
        server.check_open()?;
        Ok(server.selections.get(&selection).map(|owner| owner.window).unwrap_or(NONE))
    }

    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.window(requestor)?;
        let time = if time == CURRENT_TIME { server.time } else { time };
        match server.selections.get(&selection).copied() {
            Some(owner) => server.deliver_to_creator(
                owner.window,
                XEvent::SelectionRequest(SelectionRequest {
                    time,
                    owner: owner.window,
                    requestor,
                    selection,
                    target,
                    property,
                }),
            ),
            None => server.deliver_to_creator(
                requestor,
                XEvent::SelectionNotify(SelectionNotify { time, requestor, selection, target, property: NONE }),
            ),
        }
    }

    fn send_selection_notify(&self, notify: &SelectionNotify) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.deliver_to_creator(notify.requestor, XEvent::SelectionNotify(*notify))
    }

    fn send_client_message(&self, destination: Window, message: &ClientMessage) -> Result<(), XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        server.deliver_to_creator(destination, XEvent::ClientMessage(*message))
    }

    fn translate_coordinates(&self, src: Window, dst: Window, x: i16, y: i16) -> Result<Translated, XError> {
        let server = self.server.borrow();
        server.check_open()?;
        let (src_x, src_y) = server.absolute_origin(src)?;
        let (dst_origin_x, dst_origin_y) = server.absolute_origin(dst)?;
        let dst_x = src_x + i32::from(x) - dst_origin_x;
        let dst_y = src_y + i32::from(y) - dst_origin_y;
        let child = server
            .window(dst)?
            .children
            .iter()
            .rev()
            .copied()
            .find(|child| {
                server
                    .windows
                    .get(child)
                    .map(|state| state.mapped && state.geometry.contains(dst_x, dst_y))
                    .unwrap_or(false)
            })
            .unwrap_or(NONE);
        let clamp = |v: i32| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        Ok(Translated { child, dst_x: clamp(dst_x), dst_y: clamp(dst_y) })
    }

    fn query_tree(&self, window: Window) -> Result<Vec<Window>, XError> {
        let server = self.server.borrow();
        server.check_open()?;
        Ok(server.window(window)?.children.clone())
    }

    fn get_geometry(&self, window: Window) -> Result<Geometry, XError> {
        let server = self.server.borrow();
        server.check_open()?;
        Ok(server.window(window)?.geometry)
    }

    fn is_viewable(&self, window: Window) -> Result<bool, XError> {
        let server = self.server.borrow();
        server.check_open()?;
        let mut current = window;
        while current != NONE {
            let state = server.window(current)?;
            if !state.mapped {
                return Ok(false);
            }
            current = state.parent;
        }
        Ok(true)
    }

    fn poll_for_event(&self) -> Result<Option<XEvent>, XError> {
        let mut server = self.server.borrow_mut();
        server.check_open()?;
        Ok(server.queues.get_mut(&self.id).and_then(VecDeque::pop_front))
    }

    fn flush(&self) -> Result<(), XError> {
        self.server.borrow().check_open()
    }
}
