//! XDND (version 5) drag-and-drop between X windows.
//!
//! The protocol is six client messages exchanged between the source window
//! and the target window, plus the `XdndSelection` selection through which
//! the target fetches the data. [`XdndMessage`] is the wire codec,
//! [`XdndSource`] drives a drag from our side into X clients and
//! [`XdndTarget`] receives drags started by X clients.
//!
//! Only windows carrying `XdndAware` take part; everything else under the
//! pointer is looked through.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::{predefined, u32s_to_bytes, Atom, ClientMessage, Geometry, PropMode, Timestamp, Window, XConnection, XEvent, NONE};
use crate::action::DndAction;
use crate::atoms::Atoms;
use crate::error::XError;

pub const XDND_VERSION: u32 = 5;

/// One XDND client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdndMessage {
    Enter { source: Window, version: u32, more_types: bool, types: [Atom; 3] },
    Position { source: Window, x: i16, y: i16, time: Timestamp, action: Atom },
    Status { target: Window, accept: bool, want_position: bool, rect: Geometry, action: Atom },
    Leave { source: Window },
    Drop { source: Window, time: Timestamp },
    Finished { target: Window, accepted: bool, action: Atom },
}

fn pack(hi: u16, lo: u16) -> u32 {
    (u32::from(hi) << 16) | u32::from(lo)
}

fn unpack(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, (value & 0xffff) as u16)
}

impl XdndMessage {
    /// Builds the event addressed to `window`, the peer the message is about.
    pub fn encode(&self, atoms: &Atoms, window: Window) -> ClientMessage {
        let (type_, data) = match *self {
            XdndMessage::Enter { source, version, more_types, types } => (
                atoms.xdnd_enter,
                [source, (version << 24) | u32::from(more_types), types[0], types[1], types[2]],
            ),
            XdndMessage::Position { source, x, y, time, action } => {
                (atoms.xdnd_position, [source, 0, pack(x as u16, y as u16), time, action])
            }
            XdndMessage::Status { target, accept, want_position, rect, action } => (
                atoms.xdnd_status,
                [
                    target,
                    u32::from(accept) | (u32::from(want_position) << 1),
                    pack(rect.x as u16, rect.y as u16),
                    pack(rect.width, rect.height),
                    action,
                ],
            ),
            XdndMessage::Leave { source } => (atoms.xdnd_leave, [source, 0, 0, 0, 0]),
            XdndMessage::Drop { source, time } => (atoms.xdnd_drop, [source, 0, time, 0, 0]),
            XdndMessage::Finished { target, accepted, action } => {
                (atoms.xdnd_finished, [target, u32::from(accepted), action, 0, 0])
            }
        };
        ClientMessage { window, type_, data }
    }

    /// Parses an XDND message; `None` for any other client message.
    pub fn decode(atoms: &Atoms, message: &ClientMessage) -> Option<Self> {
        let d = message.data;
        let type_ = message.type_;
        if type_ == atoms.xdnd_enter {
            Some(XdndMessage::Enter {
                source: d[0],
                version: d[1] >> 24,
                more_types: d[1] & 1 != 0,
                types: [d[2], d[3], d[4]],
            })
        } else if type_ == atoms.xdnd_position {
            let (x, y) = unpack(d[2]);
            Some(XdndMessage::Position { source: d[0], x: x as i16, y: y as i16, time: d[3], action: d[4] })
        } else if type_ == atoms.xdnd_status {
            let (x, y) = unpack(d[2]);
            let (width, height) = unpack(d[3]);
            Some(XdndMessage::Status {
                target: d[0],
                accept: d[1] & 1 != 0,
                want_position: d[1] & 2 != 0,
                rect: Geometry::new(x as i16, y as i16, width, height),
                action: d[4],
            })
        } else if type_ == atoms.xdnd_leave {
            Some(XdndMessage::Leave { source: d[0] })
        } else if type_ == atoms.xdnd_drop {
            Some(XdndMessage::Drop { source: d[0], time: d[2] })
        } else if type_ == atoms.xdnd_finished {
            Some(XdndMessage::Finished { target: d[0], accepted: d[1] & 1 != 0, action: d[2] })
        } else {
            None
        }
    }
}

/// A window that accepts drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropTarget {
    pub window: Window,
    /// Where messages go; differs from `window` when `XdndProxy` is set.
    pub proxy: Window,
    pub version: u32,
}

fn property_u32(conn: &dyn XConnection, window: Window, property: Atom, type_: Atom) -> Result<Option<u32>, XError> {
    Ok(conn
        .get_property(false, window, property, type_)?
        .and_then(|reply| reply.value32().first().copied()))
}

/// Looks up the XDND-aware window under the root position `(x, y)`.
///
/// Walks down the stacking order and stops at the first window carrying
/// `XdndAware`. Windows in `ignore` are looked through: the search goes on
/// with whatever lies beneath them.
pub fn find_xdnd_target(
    conn: &dyn XConnection,
    atoms: &Atoms,
    x: i16,
    y: i16,
    ignore: &[Window],
) -> Result<Option<DropTarget>, XError> {
    let root = conn.root();
    let mut parent = root;
    loop {
        let hit = conn.translate_coordinates(root, parent, x, y)?;
        let child = if ignore.contains(&hit.child) {
            child_beneath(conn, parent, hit.dst_x, hit.dst_y, ignore)?
        } else {
            hit.child
        };
        if child == NONE {
            return Ok(None);
        }
        if let Some(version) = property_u32(conn, child, atoms.xdnd_aware, predefined::ATOM)? {
            let proxy = property_u32(conn, child, atoms.xdnd_proxy, predefined::WINDOW)?
                .filter(|proxy| *proxy != NONE)
                .unwrap_or(child);
            return Ok(Some(DropTarget { window: child, proxy, version: version.min(XDND_VERSION) }));
        }
        parent = child;
    }
}

/// The topmost viewable child of `parent` containing `(x, y)` (in
/// `parent`'s coordinates) that is not in `ignore`.
fn child_beneath(conn: &dyn XConnection, parent: Window, x: i16, y: i16, ignore: &[Window]) -> Result<Window, XError> {
    for child in conn.query_tree(parent)?.into_iter().rev() {
        if ignore.contains(&child) || !conn.is_viewable(child)? {
            continue;
        }
        if conn.get_geometry(child)?.contains(i32::from(x), i32::from(y)) {
            return Ok(child);
        }
    }
    Ok(NONE)
}

/// Marks `window` as a drop target.
pub fn set_xdnd_aware(conn: &dyn XConnection, atoms: &Atoms, window: Window) -> Result<(), XError> {
    conn.change_property(PropMode::Replace, window, atoms.xdnd_aware, predefined::ATOM, 32, &XDND_VERSION.to_ne_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    accept: bool,
    want_position: bool,
    rect: Geometry,
    action: DndAction,
}

#[derive(Debug)]
struct Hover {
    target: DropTarget,
    status: Option<Status>,
    awaiting_status: bool,
    queued_position: Option<(i16, i16, Timestamp)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Dragging,
    Dropped { deadline: Instant },
    Finished,
    Cancelled,
}

/// Result of feeding an event to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    Ignored,
    /// The hovered target answered a position.
    Status { accept: bool, action: DndAction },
    /// The target is done with the data.
    Finished { accepted: bool, action: DndAction },
}

/// How a drop attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// `XdndDrop` sent; wait for `XdndFinished`.
    Dropped,
    /// Nothing would take the drop; `XdndLeave` was sent if anything was hovered.
    Cancelled,
}

/// Our side of a drag into X windows.
#[derive(Debug)]
pub struct XdndSource {
    atoms: Arc<Atoms>,
    window: Window,
    types: Vec<Atom>,
    hover: Option<Hover>,
    state: SourceState,
    finish_timeout: Duration,
}

impl XdndSource {
    /// Starts a drag offering `types` from `window`, which must own `XdndSelection`.
    pub fn begin(
        conn: &dyn XConnection,
        atoms: Arc<Atoms>,
        window: Window,
        types: Vec<Atom>,
        finish_timeout: Duration,
    ) -> Result<Self, XError> {
        if types.len() > 3 {
            conn.change_property(
                PropMode::Replace,
                window,
                atoms.xdnd_type_list,
                predefined::ATOM,
                32,
                &u32s_to_bytes(&types),
            )?;
        } else {
            conn.delete_property(window, atoms.xdnd_type_list)?;
        }
        debug!(window, types = types.len(), "Starting XDND drag");
        Ok(Self { atoms, window, types, hover: None, state: SourceState::Dragging, finish_timeout })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// The window currently hovered, if it is XDND aware.
    pub fn current_target(&self) -> Option<Window> {
        self.hover.as_ref().map(|hover| hover.target.window)
    }

    /// Whether the hovered target accepts the drop right now.
    pub fn accepted(&self) -> bool {
        self.hover.as_ref().and_then(|h| h.status).map(|s| s.accept).unwrap_or(false)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SourceState::Finished | SourceState::Cancelled)
    }

    fn send(&self, conn: &dyn XConnection, target: &DropTarget, message: XdndMessage) -> Result<(), XError> {
        trace!(target = target.window, ?message, "Sending XDND message");
        match conn.send_client_message(target.proxy, &message.encode(&self.atoms, target.window)) {
            Err(XError::BadWindow(window)) => {
                debug!(window, "XDND target vanished");
                Ok(())
            }
            other => other,
        }
    }

    fn send_position(&mut self, conn: &dyn XConnection, x: i16, y: i16, time: Timestamp, action: DndAction) -> Result<(), XError> {
        let message = XdndMessage::Position {
            source: self.window,
            x,
            y,
            time,
            action: action.to_xdnd_atom(&self.atoms),
        };
        let Some(hover) = &self.hover else {
            return Ok(());
        };
        let target = hover.target;
        self.send(conn, &target, message)?;
        if let Some(hover) = &mut self.hover {
            hover.awaiting_status = true;
        }
        Ok(())
    }

    /// Pointer moved to root position `(x, y)` proposing `action`.
    pub fn motion(
        &mut self,
        conn: &dyn XConnection,
        x: i16,
        y: i16,
        time: Timestamp,
        action: DndAction,
    ) -> Result<(), XError> {
        if self.state != SourceState::Dragging {
            return Ok(());
        }
        let found = find_xdnd_target(conn, &self.atoms, x, y, &[self.window])?;
        if found.map(|t| t.window) != self.current_target() {
            if let Some(old) = self.hover.take() {
                self.send(conn, &old.target, XdndMessage::Leave { source: self.window })?;
            }
            if let Some(target) = found {
                let mut inline = [NONE; 3];
                for (slot, type_) in inline.iter_mut().zip(&self.types) {
                    *slot = *type_;
                }
                let enter = XdndMessage::Enter {
                    source: self.window,
                    version: target.version,
                    more_types: self.types.len() > 3,
                    types: inline,
                };
                self.send(conn, &target, enter)?;
                self.hover = Some(Hover { target, status: None, awaiting_status: false, queued_position: None });
            }
        }

        let Some(hover) = &mut self.hover else {
            return Ok(());
        };
        if hover.awaiting_status {
            hover.queued_position = Some((x, y, time));
            return Ok(());
        }
        if let Some(status) = hover.status {
            let quiet = !status.want_position && status.rect.width > 0 && status.rect.height > 0;
            if quiet && status.rect.contains(i32::from(x), i32::from(y)) {
                return Ok(());
            }
        }
        self.send_position(conn, x, y, time, action)
    }

    pub fn handle_event(&mut self, conn: &dyn XConnection, event: &XEvent, action: DndAction) -> Result<SourceEvent, XError> {
        let XEvent::ClientMessage(message) = event else {
            return Ok(SourceEvent::Ignored);
        };
        if message.window != self.window {
            return Ok(SourceEvent::Ignored);
        }
        match XdndMessage::decode(&self.atoms, message) {
            Some(XdndMessage::Status { target, accept, want_position, rect, action: status_action }) => {
                let Some(hover) = self.hover.as_mut().filter(|h| h.target.window == target) else {
                    return Ok(SourceEvent::Ignored);
                };
                let accepted_action = DndAction::from_xdnd_atom(&self.atoms, status_action);
                hover.status = Some(Status { accept, want_position, rect, action: accepted_action });
                hover.awaiting_status = false;
                if let Some((x, y, time)) = hover.queued_position.take() {
                    if self.state == SourceState::Dragging {
                        self.send_position(conn, x, y, time, action)?;
                    }
                }
                Ok(SourceEvent::Status { accept, action: accepted_action })
            }
            Some(XdndMessage::Finished { target, accepted, action: finished_action }) => {
                let expected = self.hover.as_ref().map(|h| h.target.window);
                if !matches!(self.state, SourceState::Dropped { .. }) || expected != Some(target) {
                    return Ok(SourceEvent::Ignored);
                }
                self.state = SourceState::Finished;
                let action = DndAction::from_xdnd_atom(&self.atoms, finished_action);
                debug!(target, accepted, ?action, "XDND drop finished");
                Ok(SourceEvent::Finished { accepted, action })
            }
            _ => Ok(SourceEvent::Ignored),
        }
    }

    /// The button was released.
    pub fn drop(&mut self, conn: &dyn XConnection, time: Timestamp) -> Result<DropOutcome, XError> {
        if self.state != SourceState::Dragging {
            return Ok(DropOutcome::Cancelled);
        }
        let accepted = self.accepted();
        match &self.hover {
            Some(hover) if accepted => {
                let target = hover.target;
                self.send(conn, &target, XdndMessage::Drop { source: self.window, time })?;
                self.state = SourceState::Dropped { deadline: Instant::now() + self.finish_timeout };
                Ok(DropOutcome::Dropped)
            }
            _ => {
                self.cancel(conn)?;
                Ok(DropOutcome::Cancelled)
            }
        }
    }

    /// Abandons the drag, telling the hovered target.
    pub fn cancel(&mut self, conn: &dyn XConnection) -> Result<(), XError> {
        if let Some(hover) = self.hover.take() {
            if self.state == SourceState::Dragging {
                self.send(conn, &hover.target, XdndMessage::Leave { source: self.window })?;
            }
        }
        self.state = SourceState::Cancelled;
        Ok(())
    }

    /// Returns true once if a dropped drag waited too long for `XdndFinished`.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            SourceState::Dropped { deadline } if now >= deadline => {
                warn!(window = self.window, "XDND target never sent XdndFinished");
                self.state = SourceState::Cancelled;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Incoming {
    source: Window,
    version: u32,
    types: Vec<Atom>,
    dropped: bool,
}

/// Result of feeding an event to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Ignored,
    Enter { source: Window, types: Vec<Atom> },
    Position { x: i16, y: i16, time: Timestamp, action: DndAction },
    Leave,
    Drop { time: Timestamp },
}

/// Receives drags from X sources on one window.
#[derive(Debug)]
pub struct XdndTarget {
    atoms: Arc<Atoms>,
    window: Window,
    incoming: Option<Incoming>,
}

impl XdndTarget {
    pub fn new(atoms: Arc<Atoms>, window: Window) -> Self {
        Self { atoms, window, incoming: None }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn source(&self) -> Option<Window> {
        self.incoming.as_ref().map(|incoming| incoming.source)
    }

    pub fn types(&self) -> &[Atom] {
        self.incoming.as_ref().map(|incoming| incoming.types.as_slice()).unwrap_or(&[])
    }

    pub fn is_dropped(&self) -> bool {
        self.incoming.as_ref().map(|incoming| incoming.dropped).unwrap_or(false)
    }

    pub fn handle_event(&mut self, conn: &dyn XConnection, event: &XEvent) -> Result<TargetEvent, XError> {
        let XEvent::ClientMessage(message) = event else {
            return Ok(TargetEvent::Ignored);
        };
        if message.window != self.window {
            return Ok(TargetEvent::Ignored);
        }
        let Some(decoded) = XdndMessage::decode(&self.atoms, message) else {
            return Ok(TargetEvent::Ignored);
        };
        let current = self.source();
        match decoded {
            XdndMessage::Enter { source, version, more_types, types } => {
                let types = if more_types {
                    conn.get_property(false, source, self.atoms.xdnd_type_list, predefined::ATOM)?
                        .map(|reply| reply.value32())
                        .unwrap_or_default()
                } else {
                    types.iter().copied().filter(|t| *t != NONE).collect()
                };
                debug!(source, version, types = types.len(), "XDND enter");
                self.incoming = Some(Incoming { source, version, types: types.clone(), dropped: false });
                Ok(TargetEvent::Enter { source, types })
            }
            XdndMessage::Position { source, x, y, time, action } if current == Some(source) => {
                let action = DndAction::from_xdnd_atom(&self.atoms, action);
                Ok(TargetEvent::Position { x, y, time, action })
            }
            XdndMessage::Leave { source } if current == Some(source) => {
                self.incoming = None;
                Ok(TargetEvent::Leave)
            }
            XdndMessage::Drop { source, time } if current == Some(source) => {
                if let Some(incoming) = &mut self.incoming {
                    incoming.dropped = true;
                }
                Ok(TargetEvent::Drop { time })
            }
            other => {
                trace!(?other, "Ignoring XDND message from a foreign source");
                Ok(TargetEvent::Ignored)
            }
        }
    }

    /// Answers the last position.
    pub fn send_status(&self, conn: &dyn XConnection, accept: bool, action: DndAction) -> Result<(), XError> {
        let Some(incoming) = &self.incoming else {
            return Ok(());
        };
        let status = XdndMessage::Status {
            target: self.window,
            accept,
            want_position: true,
            rect: Geometry::default(),
            action: if accept { action.to_xdnd_atom(&self.atoms) } else { NONE },
        };
        conn.send_client_message(incoming.source, &status.encode(&self.atoms, incoming.source))
    }

    /// Ends the drop and forgets the source.
    pub fn send_finished(&mut self, conn: &dyn XConnection, accepted: bool, action: DndAction) -> Result<(), XError> {
        let Some(incoming) = self.incoming.take() else {
            return Ok(());
        };
        let finished = XdndMessage::Finished {
            target: self.window,
            accepted,
            action: if accepted { action.to_xdnd_atom(&self.atoms) } else { NONE },
        };
        debug!(source = incoming.source, accepted, "Sending XdndFinished");
        match conn.send_client_message(incoming.source, &finished.encode(&self.atoms, incoming.source)) {
            Err(XError::BadWindow(window)) => {
                debug!(window, "XDND source vanished before XdndFinished");
                Ok(())
            }
            other => other,
        }
    }

    /// Forgets the current drag without telling the source.
    pub fn reset(&mut self) {
        self.incoming = None;
    }
}
