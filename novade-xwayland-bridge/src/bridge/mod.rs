//! The Xwayland data bridge.
//!
//! [`DataBridge`] sits between the compositor seat, seen through
//! [`WaylandSeat`], and the X server Xwayland runs. It acts as the Xwayland
//! client on the Wayland side and as an ordinary X client on the X side,
//! mirroring:
//!
//! - `CLIPBOARD` (and optionally `PRIMARY`) in both directions,
//! - drags from Wayland clients onto X windows through XDND,
//! - drags from X clients onto Wayland surfaces through an XDND proxy window.
//!
//! Everything is driven from [`DataBridge::dispatch`], which never blocks:
//! data moves through pipes drained on helper threads and is picked up on a
//! later dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use novade_core::config::DataBridgeConfig;
use tracing::{debug, info, warn};

use crate::atoms::Atoms;
use crate::error::{BridgeError, Result};
use crate::mime::MimeMapper;
use crate::transfer::receive_via_pipe;
use crate::wayland::{DataDeviceEvent, OfferId, SelectionKind, SourceId, Subscription, WaylandSeat};
use crate::x11::selection::{Render, SelectionHandler};
use crate::x11::{Atom, SelectionRequest, Timestamp, Window, XConnection, CURRENT_TIME};

mod clipboard;
mod dnd;

use clipboard::SelectionBridge;
use dnd::DndBridge;

/// What the bridge's handlers get to work with during one dispatch.
pub(crate) struct Context<'a> {
    pub(crate) conn: &'a dyn XConnection,
    pub(crate) atoms: &'a Atoms,
    pub(crate) mimes: &'a mut MimeMapper,
    pub(crate) wl: &'a mut dyn WaylandSeat,
    /// Latest X server time seen.
    pub(crate) time: Timestamp,
    /// How long a pipe transfer may stall.
    pub(crate) timeout: Duration,
}

/// Where the bytes behind an X conversion come from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DataOrigin {
    /// A Wayland selection source; only readable while an X11 window has
    /// keyboard focus.
    Selection(SourceId),
    /// The offer of a Wayland drag over an X window.
    DragOffer(OfferId),
}

/// Serves X conversions from Wayland data, through a pipe per request.
pub(crate) struct WaylandData<'a, 'b> {
    pub(crate) cx: &'a mut Context<'b>,
    pub(crate) origin: Option<DataOrigin>,
}

impl SelectionHandler for WaylandData<'_, '_> {
    fn allow(&mut self, request: &SelectionRequest) -> bool {
        match self.origin {
            Some(DataOrigin::Selection(_)) => {
                let wl = &self.cx.wl;
                let focused = wl.keyboard_focus().and_then(|surface| wl.surface_x11_window(surface)).is_some();
                if !focused {
                    debug!(requestor = request.requestor, "Refusing selection read while no X11 window has focus");
                }
                focused
            }
            _ => true,
        }
    }

    fn render(&mut self, target: Atom) -> Render {
        let Some(origin) = self.origin else {
            return Render::Refuse;
        };
        let offered: Vec<String> = match origin {
            DataOrigin::Selection(source) => self.cx.wl.source_mime_types(source),
            DataOrigin::DragOffer(offer) => self.cx.wl.offer_mime_types(offer),
        }
        .map(<[String]>::to_vec)
        .unwrap_or_default();
        let mime = match self.cx.mimes.resolve_target(self.cx.conn, target, &offered) {
            Ok(Some(mime)) => mime,
            Ok(None) => return Render::Refuse,
            Err(e) => {
                warn!(target, error = %e, "Resolving conversion target failed");
                return Render::Refuse;
            }
        };
        let (fd, future) = match receive_via_pipe(self.cx.timeout) {
            Ok(pipe) => pipe,
            Err(e) => {
                warn!(error = %e, "Could not open a transfer pipe");
                return Render::Refuse;
            }
        };
        let requested = match origin {
            DataOrigin::Selection(source) => self.cx.wl.source_request_send(source, &mime, fd),
            DataOrigin::DragOffer(offer) => self.cx.wl.offer_receive(offer, &mime, fd).is_ok(),
        };
        if !requested {
            return Render::Refuse;
        }
        debug!(target, mime, "Fetching Wayland data for an X client");
        Render::Deferred { future, type_: target, format: 8 }
    }
}

/// Logs and swallows recoverable errors; only fatal ones stop the dispatch.
fn absorb(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(error = %e, "Data bridge operation failed");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// Clipboard and drag-and-drop bridge for one Xwayland server.
pub struct DataBridge<C: XConnection> {
    conn: C,
    atoms: Arc<Atoms>,
    mimes: MimeMapper,
    seat: Subscription,
    selections: Vec<SelectionBridge>,
    dnd: DndBridge,
    time: Timestamp,
    transfer_timeout: Duration,
}

impl<C: XConnection> DataBridge<C> {
    /// Sets up the bridge's windows and subscriptions.
    ///
    /// Failing to intern the well-known atoms is fatal.
    pub fn new<W: WaylandSeat + ?Sized>(conn: C, wl: &mut W, config: &DataBridgeConfig) -> Result<Self> {
        let atoms = Atoms::intern(&conn)?;
        let mut selections =
            vec![SelectionBridge::new(&conn, Arc::clone(&atoms), SelectionKind::Clipboard, atoms.clipboard, config)?];
        if config.primary_selection {
            selections.push(SelectionBridge::new(&conn, Arc::clone(&atoms), SelectionKind::Primary, atoms.primary, config)?);
        }
        let dnd = DndBridge::new(&conn, Arc::clone(&atoms), config)?;
        conn.flush()?;
        info!(primary = config.primary_selection, "Xwayland data bridge started");
        Ok(Self {
            mimes: MimeMapper::new(Arc::clone(&atoms)),
            conn,
            atoms,
            seat: wl.subscribe(),
            selections,
            dnd,
            time: CURRENT_TIME,
            transfer_timeout: config.transfer_timeout(),
        })
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn atoms(&self) -> &Arc<Atoms> {
        &self.atoms
    }

    /// The window owning `kind` on behalf of Wayland clients.
    pub fn selection_window(&self, kind: SelectionKind) -> Option<Window> {
        self.selections.iter().find(|selection| selection.kind() == kind).map(SelectionBridge::window)
    }

    /// The source window of drags from Wayland into X.
    pub fn drag_window(&self) -> Window {
        self.dnd.window()
    }

    /// The XDND proxy covering Wayland surfaces during drags from X.
    pub fn proxy_window(&self) -> Window {
        self.dnd.proxy()
    }

    /// Whether X clients must not get pointer input right now: a Wayland drag
    /// is hovering X windows and has not been dropped yet.
    pub fn x11_input_suppressed(&self) -> bool {
        self.dnd.x11_input_suppressed()
    }

    /// Processes everything pending on both sides.
    ///
    /// Order: X events, seat notifications, events for the Xwayland client,
    /// timers and finished transfers, then a flush. Errors from a single
    /// transfer are logged; only a lost X connection is returned.
    pub fn dispatch<W: WaylandSeat>(&mut self, wl: &mut W) -> Result<()> {
        let Self { conn, atoms, mimes, seat, selections, dnd, time, transfer_timeout } = self;
        let wl: &mut dyn WaylandSeat = wl;
        let conn: &dyn XConnection = conn;

        while let Some(event) = conn.poll_for_event()? {
            if let Some(t) = event.time().filter(|t| *t != CURRENT_TIME) {
                *time = t;
            }
            let mut cx =
                Context { conn, atoms, mimes: &mut *mimes, wl: &mut *wl, time: *time, timeout: *transfer_timeout };
            for selection in selections.iter_mut() {
                absorb(selection.handle_x_event(&mut cx, &event))?;
            }
            absorb(dnd.handle_x_event(&mut cx, &event))?;
        }

        let mut cx =
            Context { conn, atoms, mimes: &mut *mimes, wl: &mut *wl, time: *time, timeout: *transfer_timeout };
        for notification in seat.take() {
            for selection in selections.iter_mut() {
                absorb(selection.handle_seat(&mut cx, notification))?;
            }
            absorb(dnd.handle_seat(&mut cx, notification))?;
        }

        for event in cx.wl.take_events() {
            absorb(route_wayland_event(&mut cx, selections, dnd, event))?;
        }

        let now = Instant::now();
        for selection in selections.iter_mut() {
            absorb(selection.poll(&mut cx, now))?;
        }
        absorb(dnd.poll(&mut cx, now))?;

        conn.flush()?;
        Ok(())
    }
}

fn route_wayland_event(
    cx: &mut Context<'_>,
    selections: &mut [SelectionBridge],
    dnd: &mut DndBridge,
    event: DataDeviceEvent,
) -> Result<()> {
    match event {
        // Selections offered to Xwayland itself are served from the sources.
        DataDeviceEvent::Selection { offer: Some(offer), .. } => {
            dnd.forget_offer(offer);
            cx.wl.destroy_offer(offer).map_err(BridgeError::from)
        }
        DataDeviceEvent::SourceSend { source, mime_type, fd } => {
            if let Some(selection) = selections.iter_mut().find(|selection| selection.owns_source(source)) {
                selection.send_requested(cx, &mime_type, fd)
            } else {
                dnd.send_requested(cx, source, &mime_type, fd)
            }
        }
        DataDeviceEvent::SourceCancelled { source } => {
            for selection in selections.iter_mut() {
                selection.source_cancelled(cx, source);
            }
            dnd.source_cancelled(cx, source)
        }
        other => dnd.handle_wayland_event(cx, other),
    }
}
