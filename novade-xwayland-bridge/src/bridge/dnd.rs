//! Drag-and-drop across the protocol boundary.
//!
//! Wayland to X: a Wayland drag entering an Xwayland surface reaches us as a
//! data-device `enter`. We claim `XdndSelection`, drive an [`XdndSource`]
//! with the drag's motion and translate the X target's status replies into
//! `accept` and `set_actions` on the Wayland offer. X clients get no pointer
//! input until the drop.
//!
//! X to Wayland: an X client taking `XdndSelection` while it holds the
//! pointer starts a compositor drag with a bridge source. Whenever the
//! pointer is over a Wayland surface a proxy window carrying `XdndAware` is
//! mapped over it, so the X source talks XDND to us and we move the Wayland
//! drag accordingly.

use std::collections::{HashMap, VecDeque};
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use novade_core::config::DataBridgeConfig;
use tracing::{debug, info, warn};

use super::{Context, DataOrigin, WaylandData};
use crate::action::DndAction;
use crate::atoms::Atoms;
use crate::error::Result;
use crate::transfer::write_all_async;
use crate::wayland::{DataDeviceEvent, OfferId, Point, SeatNotification, SourceId, SurfaceId};
use crate::x11::selection::{OwnerChange, RequestEvent, SelectionOwner, SelectionRequestor, SelectionWatcher};
use crate::x11::transport::SelectionData;
use crate::x11::xdnd::{set_xdnd_aware, DropOutcome, SourceEvent, TargetEvent, XdndSource, XdndTarget};
use crate::x11::{Atom, Geometry, Timestamp, Window, XConnection, XEvent, NONE};

/// A Wayland drag hovering X windows.
#[derive(Debug)]
struct Outgoing {
    offer: OfferId,
    /// Root position of the entered Xwayland surface.
    origin: (i32, i32),
    mimes: Vec<String>,
    source_actions: DndAction,
    xdnd: XdndSource,
    dropped: bool,
}

impl Outgoing {
    fn proposed_action(&self) -> DndAction {
        let action = DndAction::negotiate(self.source_actions, DndAction::all(), DndAction::COPY);
        if action.is_empty() {
            DndAction::COPY
        } else {
            action
        }
    }
}

/// An X drag running as a compositor drag.
#[derive(Debug)]
struct Incoming {
    source: SourceId,
    /// Mime type and the X type it is read as.
    types: Vec<(String, Atom)>,
    accepted: Option<String>,
    action: DndAction,
    positioned: bool,
    dropped: bool,
    drop_time: Timestamp,
    /// Set once the button is released or the drop happened.
    deadline: Option<Instant>,
    reads: VecDeque<(Atom, OwnedFd)>,
}

impl Incoming {
    fn accepts(&self) -> bool {
        self.accepted.is_some() && !self.action.is_empty()
    }
}

#[derive(Debug)]
pub(super) struct DndBridge {
    atoms: Arc<Atoms>,
    window: Window,
    proxy: Window,
    proxy_mapped: bool,
    owner: SelectionOwner,
    watcher: SelectionWatcher,
    target: XdndTarget,
    requestor: SelectionRequestor,
    finish_timeout: Duration,
    /// Offers announced to Xwayland but not entered yet.
    offers: HashMap<OfferId, (Vec<String>, DndAction)>,
    outgoing: Option<Outgoing>,
    incoming: Option<Incoming>,
}

fn to_root(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

impl DndBridge {
    pub(super) fn new(conn: &dyn XConnection, atoms: Arc<Atoms>, config: &DataBridgeConfig) -> Result<Self> {
        let root = conn.root();
        let window = conn.create_window(root, Geometry::new(-1, -1, 1, 1))?;
        let proxy = conn.create_window(root, Geometry::new(0, 0, 1, 1))?;
        set_xdnd_aware(conn, &atoms, proxy)?;
        let owner = SelectionOwner::new(
            Arc::clone(&atoms),
            window,
            atoms.xdnd_selection,
            config.incr_chunk_size,
            config.transfer_timeout(),
        );
        let watcher = SelectionWatcher::new(conn, window, atoms.xdnd_selection)?;
        let requestor =
            SelectionRequestor::new(conn, Arc::clone(&atoms), proxy, atoms.xdnd_selection, config.transfer_timeout())?;
        debug!(window, proxy, "Drag-and-drop windows created");
        Ok(Self {
            target: XdndTarget::new(Arc::clone(&atoms), proxy),
            atoms,
            window,
            proxy,
            proxy_mapped: false,
            owner,
            watcher,
            requestor,
            finish_timeout: config.drag_finish_timeout(),
            offers: HashMap::new(),
            outgoing: None,
            incoming: None,
        })
    }

    pub(super) fn window(&self) -> Window {
        self.window
    }

    pub(super) fn proxy(&self) -> Window {
        self.proxy
    }

    pub(super) fn x11_input_suppressed(&self) -> bool {
        self.outgoing.as_ref().is_some_and(|out| !out.dropped)
    }

    pub(super) fn forget_offer(&mut self, offer: OfferId) {
        self.offers.remove(&offer);
    }

    pub(super) fn handle_x_event(&mut self, cx: &mut Context<'_>, event: &XEvent) -> Result<()> {
        if let Some(change) = self.watcher.handle_event(event) {
            self.xdnd_owner_changed(cx, change)?;
        }

        let conn = cx.conn;
        let origin = self.outgoing.as_ref().map(|out| DataOrigin::DragOffer(out.offer));
        let mut handler = WaylandData { cx: &mut *cx, origin };
        self.owner.handle_event(conn, event, &mut handler)?;

        if let Some(out) = self.outgoing.as_mut() {
            let proposed = out.proposed_action();
            match out.xdnd.handle_event(cx.conn, event, proposed)? {
                SourceEvent::Status { accept, action } => {
                    let mime = out.mimes.first().filter(|_| accept).cloned();
                    let action = match (accept, action.is_empty()) {
                        (false, _) => DndAction::empty(),
                        (true, true) => DndAction::COPY,
                        (true, false) => action,
                    };
                    cx.wl.offer_accept(out.offer, mime.as_deref())?;
                    cx.wl.offer_set_actions(out.offer, action, action)?;
                }
                SourceEvent::Finished { accepted, .. } => self.end_outgoing(cx, accepted)?,
                SourceEvent::Ignored => {}
            }
        }

        match self.target.handle_event(cx.conn, event)? {
            TargetEvent::Ignored => {}
            TargetEvent::Enter { source, types } => self.x_enter(cx, source, &types)?,
            TargetEvent::Position { x, y, .. } => self.x_position(cx, x, y)?,
            TargetEvent::Leave => self.x_leave(cx),
            TargetEvent::Drop { time } => self.x_drop(cx, time)?,
        }

        if let RequestEvent::Done { data, .. } = self.requestor.handle_event(cx.conn, event)? {
            self.read_done(cx, data)?;
        }
        Ok(())
    }

    pub(super) fn handle_seat(&mut self, cx: &mut Context<'_>, notification: SeatNotification) -> Result<()> {
        match notification {
            SeatNotification::PointerMoved(position) => self.place_proxy(cx, position),
            SeatNotification::PointerButton { pressed: false } => {
                if let Some(inc) = self.incoming.as_mut().filter(|inc| !inc.dropped && inc.deadline.is_none()) {
                    inc.deadline = Some(Instant::now() + self.finish_timeout);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(super) fn handle_wayland_event(&mut self, cx: &mut Context<'_>, event: DataDeviceEvent) -> Result<()> {
        match event {
            DataDeviceEvent::DataOffer { offer, mime_types } => {
                self.offers.insert(offer, (mime_types, DndAction::empty()));
            }
            DataDeviceEvent::OfferSourceActions { offer, actions } => {
                if let Some(entry) = self.offers.get_mut(&offer) {
                    entry.1 = actions;
                }
                if let Some(out) = self.outgoing.as_mut().filter(|out| out.offer == offer) {
                    out.source_actions = actions;
                }
            }
            DataDeviceEvent::Enter { surface, position, offer: Some(offer), .. } => {
                self.wayland_enter(cx, surface, position, offer)?;
            }
            DataDeviceEvent::Motion { position } => {
                if let Some(out) = self.outgoing.as_mut() {
                    let x = to_root(f64::from(out.origin.0) + position.x);
                    let y = to_root(f64::from(out.origin.1) + position.y);
                    let proposed = out.proposed_action();
                    out.xdnd.motion(cx.conn, x, y, cx.time, proposed)?;
                }
            }
            DataDeviceEvent::Leave => {
                if self.outgoing.as_ref().is_some_and(|out| !out.dropped) {
                    if let Some(out) = self.outgoing.as_mut() {
                        out.xdnd.cancel(cx.conn)?;
                    }
                    self.end_outgoing(cx, false)?;
                }
            }
            DataDeviceEvent::Drop => self.wayland_drop(cx)?,
            DataDeviceEvent::SourceTarget { source, mime_type } => {
                if let Some(inc) = self.incoming.as_mut().filter(|inc| inc.source == source) {
                    inc.accepted = mime_type;
                    self.send_status(cx)?;
                }
            }
            DataDeviceEvent::SourceAction { source, action } => {
                if let Some(inc) = self.incoming.as_mut().filter(|inc| inc.source == source) {
                    inc.action = action;
                    self.send_status(cx)?;
                }
            }
            DataDeviceEvent::SourceDndFinished { source } => {
                if let Some(inc) = self.incoming.as_ref().filter(|inc| inc.source == source) {
                    let action = inc.action;
                    self.target.send_finished(cx.conn, true, action)?;
                    self.end_incoming(cx);
                }
            }
            _ => {}
        }
        Ok(())
    }

    // Wayland to X

    fn wayland_enter(&mut self, cx: &mut Context<'_>, surface: SurfaceId, position: Point, offer: OfferId) -> Result<()> {
        if let Some(mut previous) = self.outgoing.take() {
            debug!(offer = %previous.offer, "Replacing the previous drag into X");
            previous.xdnd.cancel(cx.conn)?;
            cx.wl.destroy_offer(previous.offer)?;
        }
        let (mimes, source_actions) = self.offers.remove(&offer).unwrap_or_default();
        let rect = cx.wl.surface_geometry(surface).unwrap_or_default();
        let mut types = Vec::with_capacity(mimes.len());
        for mime in &mimes {
            types.push(cx.mimes.intern(cx.conn, mime)?);
        }
        let targets = cx.mimes.mimes_to_targets(cx.conn, &mimes)?;
        if !self.owner.claim(cx.conn, targets, cx.time)? {
            warn!("Could not take XdndSelection; the drag will carry no data");
        }
        let xdnd = XdndSource::begin(cx.conn, Arc::clone(&self.atoms), self.window, types, self.finish_timeout)?;
        info!(%offer, %surface, mimes = mimes.len(), "Wayland drag entered Xwayland");
        let mut out = Outgoing { offer, origin: (rect.x, rect.y), mimes, source_actions, xdnd, dropped: false };
        let x = to_root(f64::from(rect.x) + position.x);
        let y = to_root(f64::from(rect.y) + position.y);
        let proposed = out.proposed_action();
        out.xdnd.motion(cx.conn, x, y, cx.time, proposed)?;
        self.outgoing = Some(out);
        Ok(())
    }

    fn wayland_drop(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let Some(out) = self.outgoing.as_mut() else {
            return Ok(());
        };
        out.dropped = true;
        match out.xdnd.drop(cx.conn, cx.time)? {
            DropOutcome::Dropped => {
                debug!(offer = %out.offer, "Dropped on an X window; waiting for XdndFinished");
                Ok(())
            }
            DropOutcome::Cancelled => self.end_outgoing(cx, false),
        }
    }

    /// Ends the Wayland-to-X drag. A dropped offer that was not finished
    /// cancels its source when destroyed.
    fn end_outgoing(&mut self, cx: &mut Context<'_>, accepted: bool) -> Result<()> {
        let Some(out) = self.outgoing.take() else {
            return Ok(());
        };
        let finished = if accepted { cx.wl.offer_finish(out.offer) } else { Ok(()) };
        let destroyed = cx.wl.destroy_offer(out.offer);
        if self.owner.is_owner() {
            self.owner.release(cx.conn, cx.time)?;
        }
        debug!(offer = %out.offer, accepted, "Wayland drag into X ended");
        finished?;
        destroyed?;
        Ok(())
    }

    // X to Wayland

    fn xdnd_owner_changed(&mut self, cx: &mut Context<'_>, change: OwnerChange) -> Result<()> {
        if change.owner == self.window {
            return Ok(());
        }
        if change.owner == NONE {
            if self.incoming.as_ref().is_some_and(|inc| !inc.dropped) {
                info!("X drag source went away; cancelling the drag");
                cx.wl.cancel_drag();
            }
            return Ok(());
        }
        if cx.wl.drag_active() || !cx.wl.pointer_pressed() {
            return Ok(());
        }
        let from_x = cx.wl.pointer_focus().and_then(|surface| cx.wl.surface_x11_window(surface)).is_some();
        if !from_x {
            return Ok(());
        }
        let source = cx.wl.create_data_source()?;
        cx.wl.source_set_actions(source, DndAction::all())?;
        if !cx.wl.start_drag(source)? {
            cx.wl.destroy_source(source);
            return Ok(());
        }
        info!(owner = change.owner, %source, "X client started a drag");
        self.incoming = Some(Incoming {
            source,
            types: Vec::new(),
            accepted: None,
            action: DndAction::empty(),
            positioned: false,
            dropped: false,
            drop_time: change.timestamp,
            deadline: None,
            reads: VecDeque::new(),
        });
        Ok(())
    }

    /// Keeps the proxy over the Wayland surface under the pointer while an
    /// X drag is in progress.
    fn place_proxy(&mut self, cx: &mut Context<'_>, position: Point) -> Result<()> {
        if !self.incoming.as_ref().is_some_and(|inc| !inc.dropped) {
            return Ok(());
        }
        let wayland_surface = cx.wl.surface_at(position).filter(|surface| cx.wl.surface_x11_window(*surface).is_none());
        match wayland_surface.and_then(|surface| cx.wl.surface_geometry(surface)) {
            Some(rect) => {
                let geometry = Geometry::new(
                    to_root(f64::from(rect.x)),
                    to_root(f64::from(rect.y)),
                    rect.width.clamp(1, i32::from(u16::MAX)) as u16,
                    rect.height.clamp(1, i32::from(u16::MAX)) as u16,
                );
                cx.conn.configure_window(self.proxy, geometry)?;
                if !self.proxy_mapped {
                    cx.conn.map_window(self.proxy)?;
                    self.proxy_mapped = true;
                }
                cx.conn.raise_window(self.proxy)?;
            }
            None => self.unmap_proxy(cx)?,
        }
        Ok(())
    }

    fn unmap_proxy(&mut self, cx: &mut Context<'_>) -> Result<()> {
        if self.proxy_mapped {
            cx.conn.unmap_window(self.proxy)?;
            self.proxy_mapped = false;
        }
        Ok(())
    }

    fn x_enter(&mut self, cx: &mut Context<'_>, source: Window, types: &[Atom]) -> Result<()> {
        let Some(inc) = self.incoming.as_mut() else {
            debug!(source, "XDND enter without a compositor drag");
            return Ok(());
        };
        let mimes = cx.mimes.targets_to_mimes(cx.conn, types)?;
        for (mime, _) in &mimes {
            cx.wl.source_offer(inc.source, mime)?;
        }
        debug!(source, mimes = mimes.len(), "X drag entered a Wayland surface");
        inc.types = mimes;
        Ok(())
    }

    fn x_position(&mut self, cx: &mut Context<'_>, x: i16, y: i16) -> Result<()> {
        let Some(inc) = self.incoming.as_mut() else {
            return self.target.send_status(cx.conn, false, DndAction::empty()).map_err(Into::into);
        };
        let point = Point::new(f64::from(x), f64::from(y));
        let surface = cx.wl.surface_at(point).filter(|surface| cx.wl.surface_x11_window(*surface).is_none());
        if surface == cx.wl.drag_focus() {
            cx.wl.drag_motion(point);
        } else {
            inc.accepted = None;
            inc.action = DndAction::empty();
            cx.wl.drag_set_focus(surface, point);
        }
        inc.positioned = true;
        self.send_status(cx)
    }

    fn send_status(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let Some(inc) = self.incoming.as_ref().filter(|inc| inc.positioned && !inc.dropped) else {
            return Ok(());
        };
        self.target.send_status(cx.conn, inc.accepts(), inc.action)?;
        Ok(())
    }

    fn x_leave(&mut self, cx: &mut Context<'_>) {
        let Some(inc) = self.incoming.as_mut() else {
            return;
        };
        inc.positioned = false;
        inc.accepted = None;
        inc.action = DndAction::empty();
        if cx.wl.pointer_pressed() {
            let position = cx.wl.pointer_position();
            cx.wl.drag_set_focus(None, position);
        } else {
            debug!("X drag left after the button was released; cancelling");
            cx.wl.cancel_drag();
        }
    }

    fn x_drop(&mut self, cx: &mut Context<'_>, time: Timestamp) -> Result<()> {
        let Some(inc) = self.incoming.as_mut() else {
            self.target.send_finished(cx.conn, false, DndAction::empty())?;
            return Ok(());
        };
        inc.dropped = true;
        inc.drop_time = time;
        inc.deadline = Some(Instant::now() + self.finish_timeout);
        info!(accepted = inc.accepts(), "X drag dropped on a Wayland surface");
        cx.wl.drag_drop();
        Ok(())
    }

    pub(super) fn send_requested(
        &mut self,
        cx: &mut Context<'_>,
        source: SourceId,
        mime_type: &str,
        fd: OwnedFd,
    ) -> Result<()> {
        let Some(inc) = self.incoming.as_mut().filter(|inc| inc.source == source) else {
            debug!(%source, "Data requested from an unknown bridge source");
            return Ok(());
        };
        let Some(target) = inc.types.iter().find(|(mime, _)| mime == mime_type).map(|(_, target)| *target) else {
            debug!(%source, mime_type, "Refusing read of a type the X drag does not offer");
            return Ok(());
        };
        inc.reads.push_back((target, fd));
        self.start_next_read(cx)
    }

    fn start_next_read(&mut self, cx: &mut Context<'_>) -> Result<()> {
        if self.requestor.is_busy() {
            return Ok(());
        }
        if let Some(inc) = self.incoming.as_ref() {
            if let Some((target, _)) = inc.reads.front() {
                self.requestor.request(cx.conn, *target, inc.drop_time)?;
            }
        }
        Ok(())
    }

    fn read_done(&mut self, cx: &mut Context<'_>, data: SelectionData) -> Result<()> {
        if let Some((_, fd)) = self.incoming.as_mut().and_then(|inc| inc.reads.pop_front()) {
            debug!(bytes = data.bytes.len(), "Drag data read from X");
            write_all_async(fd, data.bytes, cx.timeout)?;
        }
        self.start_next_read(cx)
    }

    pub(super) fn source_cancelled(&mut self, cx: &mut Context<'_>, source: SourceId) -> Result<()> {
        let Some(inc) = self.incoming.as_ref().filter(|inc| inc.source == source) else {
            return Ok(());
        };
        if inc.dropped {
            self.target.send_finished(cx.conn, false, DndAction::empty())?;
        }
        self.end_incoming(cx);
        Ok(())
    }

    fn end_incoming(&mut self, cx: &mut Context<'_>) {
        let Some(inc) = self.incoming.take() else {
            return;
        };
        self.requestor.cancel();
        cx.wl.destroy_source(inc.source);
        if let Err(e) = self.unmap_proxy(cx) {
            warn!(error = %e, "Unmapping the XDND proxy failed");
        }
        debug!(source = %inc.source, "X drag ended");
    }

    pub(super) fn poll(&mut self, cx: &mut Context<'_>, now: Instant) -> Result<()> {
        self.owner.poll(cx.conn, now)?;

        if self.outgoing.as_mut().is_some_and(|out| out.xdnd.poll(now)) {
            self.end_outgoing(cx, false)?;
        }

        let expired = self.incoming.as_ref().and_then(|inc| inc.deadline.filter(|d| now >= *d).map(|_| inc.dropped));
        match expired {
            Some(true) => {
                warn!("Wayland target never finished the X drag");
                self.target.send_finished(cx.conn, false, DndAction::empty())?;
                self.end_incoming(cx);
            }
            Some(false) => {
                debug!("X drag was released without a drop; cancelling");
                cx.wl.cancel_drag();
                self.end_incoming(cx);
            }
            None => {}
        }

        if let RequestEvent::Done { data, .. } = self.requestor.poll(now) {
            self.read_done(cx, data)?;
        }
        Ok(())
    }
}
