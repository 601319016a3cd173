//! [`WaylandSeat`] on top of smithay's data-device and primary-selection
//! globals.
//!
//! The bridge stands in for Xwayland's data device. The compositor owns the
//! smithay handler traits and forwards the calls that concern the bridge:
//!
//! ```rust,ignore
//! impl SelectionHandler for NovaState {
//!     type SelectionUserData = SourceId;
//!
//!     fn new_selection(&mut self, target: SelectionTarget, source: Option<SelectionSource>, _seat: Seat<Self>) {
//!         self.bridge_seat.new_selection(target, source.as_ref());
//!     }
//!
//!     fn send_selection(&mut self, target: SelectionTarget, mime: String, fd: OwnedFd, _seat: Seat<Self>, source: &SourceId) {
//!         self.bridge_seat.send_selection(target, mime, fd, *source);
//!     }
//! }
//!
//! impl ServerDndGrabHandler for NovaState {
//!     fn accept(&mut self, mime: Option<String>, _seat: Seat<Self>) {
//!         self.bridge_seat.server_dnd_accept(mime);
//!     }
//!     // action, dropped, cancelled, send and finished forward the same way
//! }
//! ```
//!
//! Input arrives through [`map_surface`](SmithaySeat::map_surface),
//! [`set_keyboard_focus`](SmithaySeat::set_keyboard_focus),
//! [`pointer_moved`](SmithaySeat::pointer_moved) and
//! [`pointer_button`](SmithaySeat::pointer_button). Drags started by X
//! clients need the compositor's pointer grab, so they are handed back as
//! [`GrabRequest`]s to be passed to `start_dnd`.

use std::collections::{HashMap, VecDeque};
use std::os::fd::{AsFd, OwnedFd};

use smithay::input::{Seat, SeatHandler};
use smithay::utils::SERIAL_COUNTER;
use smithay::wayland::selection::data_device::{
    clear_data_device_selection, request_data_device_client_selection, set_data_device_selection,
    with_source_metadata, DataDeviceHandler,
};
use smithay::wayland::selection::primary_selection::{
    clear_primary_selection, request_primary_client_selection, set_primary_selection, PrimarySelectionHandler,
};
use smithay::wayland::selection::{SelectionHandler, SelectionSource, SelectionTarget};
use tracing::{debug, trace, warn};
use wayland_server::protocol::wl_data_device_manager::DndAction as WlDndAction;
use wayland_server::protocol::wl_data_source::WlDataSource;
use wayland_server::protocol::wl_surface::WlSurface;
use wayland_server::{DisplayHandle, Resource};

use super::subscription::Subscribers;
use super::{
    DataDeviceError, DataDeviceEvent, OfferId, Point, Rect, SeatNotification, SelectionKind, Serial, SourceId,
    Subscription, SurfaceId, WaylandSeat,
};
use crate::action::DndAction;
use crate::x11::Window;

type Result<T> = std::result::Result<T, DataDeviceError>;

/// `wl_data_source.action`, `dnd_drop_performed` and `dnd_finished`.
const DND_SOURCE_VERSION: u32 = 3;

/// Work only the compositor can do, collected with
/// [`SmithaySeat::take_grab_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabRequest {
    /// Start a server-side drag: `start_dnd` with
    /// `SourceMetadata { mime_types, dnd_action }`.
    StartDrag { mime_types: Vec<String>, dnd_action: WlDndAction },
    /// Remove the server-side drag grab from the pointer.
    CancelDrag,
}

pub(crate) fn to_wl_action(action: DndAction) -> WlDndAction {
    WlDndAction::from_bits_truncate(action.bits())
}

pub(crate) fn from_wl_action(action: WlDndAction) -> DndAction {
    DndAction::from_bits_truncate(action.bits())
}

pub(crate) fn selection_kind(target: SelectionTarget) -> SelectionKind {
    match target {
        SelectionTarget::Clipboard => SelectionKind::Clipboard,
        SelectionTarget::Primary => SelectionKind::Primary,
    }
}

#[derive(Debug)]
struct MappedSurface {
    id: SurfaceId,
    surface: WlSurface,
    geometry: Rect,
    x11_window: Option<Window>,
}

/// A source created by the bridge. Lives in the compositor as the
/// selection's user data or a server-side drag.
#[derive(Debug, Default)]
struct BridgeSource {
    mime_types: Vec<String>,
    actions: DndAction,
}

/// A selection owned by some Wayland client.
#[derive(Debug)]
struct ClientSelection {
    kind: SelectionKind,
    mime_types: Vec<String>,
}

/// A drag started by a Wayland client.
#[derive(Debug)]
struct ClientDrag {
    source: Option<WlDataSource>,
    mime_types: Vec<String>,
    actions: DndAction,
    /// The Xwayland surface under the drag and the offer made for it.
    focus: Option<(SurfaceId, OfferId)>,
    /// Released over Xwayland; the offer waits for the X target.
    dropped: bool,
}

#[derive(Debug)]
struct DragOffer {
    live: bool,
    accepted: Option<String>,
    action: DndAction,
    dropped: bool,
    finished: bool,
}

#[derive(Debug)]
enum ServerDrag {
    /// Waiting for its first mime type before the grab can start.
    Pending(SourceId),
    Active { source: SourceId, focus: Option<SurfaceId> },
}

impl ServerDrag {
    fn source(&self) -> SourceId {
        match self {
            ServerDrag::Pending(source) | ServerDrag::Active { source, .. } => *source,
        }
    }
}

pub struct SmithaySeat<D: SeatHandler + 'static> {
    display: DisplayHandle,
    seat: Seat<D>,
    subscribers: Subscribers,
    events: VecDeque<DataDeviceEvent>,
    grab_requests: VecDeque<GrabRequest>,
    next_id: u32,

    /// Bottom to top.
    surfaces: Vec<MappedSurface>,
    keyboard_focus: Option<SurfaceId>,
    pointer_focus: Option<SurfaceId>,
    pointer: Point,
    pressed: bool,

    sources: HashMap<SourceId, BridgeSource>,
    client_selections: HashMap<SourceId, ClientSelection>,
    clipboard: Option<SourceId>,
    primary: Option<SourceId>,

    server_drag: Option<ServerDrag>,
    client_drag: Option<ClientDrag>,
    offers: HashMap<OfferId, DragOffer>,
}

impl<D: SeatHandler + 'static> std::fmt::Debug for SmithaySeat<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmithaySeat")
            .field("surfaces", &self.surfaces.len())
            .field("keyboard_focus", &self.keyboard_focus)
            .field("clipboard", &self.clipboard)
            .field("primary", &self.primary)
            .field("server_drag", &self.server_drag)
            .field("client_drag", &self.client_drag)
            .finish_non_exhaustive()
    }
}

impl<D> SmithaySeat<D>
where
    D: DataDeviceHandler + PrimarySelectionHandler + SelectionHandler<SelectionUserData = SourceId> + SeatHandler + 'static,
{
    pub fn new(display: DisplayHandle, seat: Seat<D>) -> Self {
        Self {
            display,
            seat,
            subscribers: Subscribers::default(),
            events: VecDeque::new(),
            grab_requests: VecDeque::new(),
            next_id: 1,
            surfaces: Vec::new(),
            keyboard_focus: None,
            pointer_focus: None,
            pointer: Point::default(),
            pressed: false,
            sources: HashMap::new(),
            client_selections: HashMap::new(),
            clipboard: None,
            primary: None,
            server_drag: None,
            client_drag: None,
            offers: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    // Surfaces

    /// Registers a mapped surface on top of the stack. `x11_window` is the
    /// window an Xwayland surface shows.
    pub fn map_surface(&mut self, surface: &WlSurface, geometry: Rect, x11_window: Option<Window>) -> SurfaceId {
        if let Some(id) = self.surface_id(surface) {
            self.configure_surface(id, geometry);
            return id;
        }
        let id = SurfaceId(self.next_id());
        self.surfaces.push(MappedSurface { id, surface: surface.clone(), geometry, x11_window });
        id
    }

    pub fn configure_surface(&mut self, id: SurfaceId, geometry: Rect) {
        if let Some(mapped) = self.surfaces.iter_mut().find(|mapped| mapped.id == id) {
            mapped.geometry = geometry;
        }
    }

    pub fn raise_surface(&mut self, id: SurfaceId) {
        if let Some(index) = self.surfaces.iter().position(|mapped| mapped.id == id) {
            let mapped = self.surfaces.remove(index);
            self.surfaces.push(mapped);
        }
    }

    pub fn unmap_surface(&mut self, surface: &WlSurface) {
        let Some(id) = self.surface_id(surface) else {
            return;
        };
        self.surfaces.retain(|mapped| mapped.id != id);
        if self.keyboard_focus == Some(id) {
            self.set_keyboard_focus(None);
        }
        if self.pointer_focus == Some(id) {
            self.pointer_focus = None;
        }
        if self.client_drag.as_ref().and_then(|drag| drag.focus).is_some_and(|(focus, _)| focus == id) {
            self.client_drag_leave();
        }
    }

    pub fn surface_id(&self, surface: &WlSurface) -> Option<SurfaceId> {
        self.surfaces.iter().find(|mapped| mapped.surface == *surface).map(|mapped| mapped.id)
    }

    fn is_xwayland(&self, id: SurfaceId) -> bool {
        self.surfaces.iter().any(|mapped| mapped.id == id && mapped.x11_window.is_some())
    }

    // Input

    pub fn set_keyboard_focus(&mut self, surface: Option<&WlSurface>) {
        let focus = surface.and_then(|surface| self.surface_id(surface));
        if focus != self.keyboard_focus {
            self.keyboard_focus = focus;
            self.subscribers.notify(SeatNotification::KeyboardFocusChanged(focus));
        }
    }

    /// Global pointer motion, also while a grab is active.
    pub fn pointer_moved(&mut self, position: Point) {
        self.pointer = position;
        if !self.pressed {
            self.pointer_focus = WaylandSeat::surface_at(self, position);
        }
        if self.client_drag.is_some() {
            self.client_drag_motion(position);
        }
        self.subscribers.notify(SeatNotification::PointerMoved(position));
    }

    /// A button press holds the pointer focus until the last release.
    pub fn pointer_button(&mut self, pressed: bool) {
        self.pressed = pressed;
        if !pressed {
            self.pointer_focus = WaylandSeat::surface_at(self, self.pointer);
        }
        self.subscribers.notify(SeatNotification::PointerButton { pressed });
    }

    /// The next grab the compositor has to start or end.
    pub fn take_grab_request(&mut self) -> Option<GrabRequest> {
        if let Some(request) = self.grab_requests.pop_front() {
            return Some(request);
        }
        let ServerDrag::Pending(source) = self.server_drag.as_ref()? else {
            return None;
        };
        let source = *source;
        let state = self.sources.get(&source)?;
        if state.mime_types.is_empty() {
            return None;
        }
        let request =
            GrabRequest::StartDrag { mime_types: state.mime_types.clone(), dnd_action: to_wl_action(state.actions) };
        debug!(%source, "Handing the X drag to the compositor");
        self.server_drag = Some(ServerDrag::Active { source, focus: None });
        Some(request)
    }

    // Selections

    /// A Wayland client set or cleared a selection.
    pub fn new_selection(&mut self, target: SelectionTarget, source: Option<&SelectionSource>) {
        let kind = selection_kind(target);
        let id = source.map(|source| {
            let id = SourceId(self.next_id());
            self.client_selections.insert(id, ClientSelection { kind, mime_types: source.mime_types() });
            id
        });
        debug!(?kind, source = ?id, "Wayland client changed the selection");
        self.replace_selection(kind, id);
    }

    /// A Wayland client reads a selection the bridge set.
    pub fn send_selection(&mut self, target: SelectionTarget, mime_type: String, fd: OwnedFd, source: SourceId) {
        trace!(kind = ?selection_kind(target), %source, mime_type, "Selection read from the bridge");
        self.events.push_back(DataDeviceEvent::SourceSend { source, mime_type, fd });
    }

    fn selection_slot(&mut self, kind: SelectionKind) -> &mut Option<SourceId> {
        match kind {
            SelectionKind::Clipboard => &mut self.clipboard,
            SelectionKind::Primary => &mut self.primary,
        }
    }

    fn replace_selection(&mut self, kind: SelectionKind, source: Option<SourceId>) {
        let previous = std::mem::replace(self.selection_slot(kind), source);
        if let Some(previous) = previous.filter(|previous| Some(*previous) != source) {
            if self.sources.contains_key(&previous) {
                self.events.push_back(DataDeviceEvent::SourceCancelled { source: previous });
            }
            self.client_selections.remove(&previous);
        }
        self.subscribers.notify(SeatNotification::SelectionChanged(kind));
    }

    // Server-side drags (X to Wayland)

    fn server_drag_source(&self) -> Option<SourceId> {
        match self.server_drag.as_ref()? {
            ServerDrag::Active { source, .. } => Some(*source),
            ServerDrag::Pending(_) => None,
        }
    }

    fn queue_for_server_drag(&mut self, event: impl FnOnce(SourceId) -> DataDeviceEvent) {
        match self.server_drag_source() {
            Some(source) => self.events.push_back(event(source)),
            None => trace!("Drag callback without a bridge drag"),
        }
    }

    pub fn server_dnd_accept(&mut self, mime_type: Option<String>) {
        self.queue_for_server_drag(|source| DataDeviceEvent::SourceTarget { source, mime_type });
    }

    pub fn server_dnd_action(&mut self, action: WlDndAction) {
        let action = from_wl_action(action);
        self.queue_for_server_drag(|source| DataDeviceEvent::SourceAction { source, action });
    }

    pub fn server_dnd_dropped(&mut self) {
        self.queue_for_server_drag(|source| DataDeviceEvent::SourceDndDropPerformed { source });
    }

    pub fn server_dnd_send(&mut self, mime_type: String, fd: OwnedFd) {
        self.queue_for_server_drag(|source| DataDeviceEvent::SourceSend { source, mime_type, fd });
    }

    pub fn server_dnd_cancelled(&mut self) {
        self.queue_for_server_drag(|source| DataDeviceEvent::SourceCancelled { source });
        self.end_server_drag();
    }

    pub fn server_dnd_finished(&mut self) {
        self.queue_for_server_drag(|source| DataDeviceEvent::SourceDndFinished { source });
        self.end_server_drag();
    }

    fn end_server_drag(&mut self) {
        if self.server_drag.take().is_some() {
            self.subscribers.notify(SeatNotification::DragEnded);
        }
    }

    // Client drags (Wayland to X)

    /// A Wayland client started a drag. `None` is a drag within the client.
    pub fn client_drag_started(&mut self, source: Option<WlDataSource>) {
        let (mime_types, actions) = match &source {
            Some(source) => with_source_metadata(source, |meta| (meta.mime_types.clone(), from_wl_action(meta.dnd_action)))
                .unwrap_or_else(|_| {
                    warn!("Drag started with an unknown data source");
                    (Vec::new(), DndAction::empty())
                }),
            None => (Vec::new(), DndAction::empty()),
        };
        debug!(mimes = mime_types.len(), ?actions, "Wayland client started a drag");
        self.client_drag = Some(ClientDrag { source, mime_types, actions, focus: None, dropped: false });
        self.subscribers.notify(SeatNotification::DragStarted);
        self.client_drag_motion(self.pointer);
    }

    fn client_drag_motion(&mut self, position: Point) {
        let under = WaylandSeat::surface_at(self, position).filter(|id| self.is_xwayland(*id));
        let Some(drag) = self.client_drag.as_ref() else {
            return;
        };
        if drag.source.is_none() || drag.dropped {
            return;
        }
        let current = drag.focus.map(|(surface, _)| surface);
        if under == current {
            if let Some(local) = under.and_then(|id| self.local_position(id, position)) {
                self.events.push_back(DataDeviceEvent::Motion { position: local });
            }
            return;
        }
        if current.is_some() {
            self.client_drag_leave();
        }
        if let Some(surface) = under {
            self.client_drag_enter(surface, position);
        }
    }

    fn client_drag_enter(&mut self, surface: SurfaceId, position: Point) {
        let offer = OfferId(self.next_id());
        let local = self.local_position(surface, position).unwrap_or_default();
        let Some(drag) = self.client_drag.as_mut() else {
            return;
        };
        drag.focus = Some((surface, offer));
        let (mime_types, actions) = (drag.mime_types.clone(), drag.actions);
        self.offers.insert(
            offer,
            DragOffer { live: true, accepted: None, action: DndAction::empty(), dropped: false, finished: false },
        );
        let serial = Serial(u32::from(SERIAL_COUNTER.next_serial()));
        self.events.push_back(DataDeviceEvent::DataOffer { offer, mime_types });
        self.events.push_back(DataDeviceEvent::OfferSourceActions { offer, actions });
        self.events.push_back(DataDeviceEvent::Enter { serial, surface, position: local, offer: Some(offer) });
        trace!(%offer, %surface, "Drag entered an Xwayland surface");
    }

    fn client_drag_leave(&mut self) {
        let Some((_, offer)) = self.client_drag.as_mut().and_then(|drag| drag.focus.take()) else {
            return;
        };
        if let Some(state) = self.offers.get_mut(&offer) {
            state.live = false;
        }
        if let Some(source) = self.client_drag.as_ref().and_then(|drag| drag.source.as_ref()) {
            source.target(None);
        }
        self.events.push_back(DataDeviceEvent::Leave);
    }

    /// The client drag ended with a button release.
    pub fn client_drag_dropped(&mut self) {
        let Some(drag) = self.client_drag.take() else {
            return;
        };
        self.subscribers.notify(SeatNotification::DragEnded);
        let Some((_, offer)) = drag.focus else {
            return;
        };
        let Some(state) = self.offers.get_mut(&offer) else {
            return;
        };
        let Some(source) = drag.source.as_ref() else {
            return;
        };
        if state.accepted.is_none() || state.action.is_empty() {
            debug!(%offer, "Drop on Xwayland was not accepted");
            state.live = false;
            self.events.push_back(DataDeviceEvent::Leave);
            return;
        }
        state.dropped = true;
        if source.version() >= DND_SOURCE_VERSION {
            source.dnd_drop_performed();
        }
        self.events.push_back(DataDeviceEvent::Drop);
        // The offer outlives the grab until the X target finishes.
        self.client_drag = Some(ClientDrag { dropped: true, ..drag });
    }

    fn drag_source_for(&self, offer: OfferId) -> Option<&WlDataSource> {
        self.client_drag
            .as_ref()
            .filter(|drag| drag.focus.is_some_and(|(_, focused)| focused == offer))
            .and_then(|drag| drag.source.as_ref())
    }

    fn local_position(&self, id: SurfaceId, position: Point) -> Option<Point> {
        self.surfaces.iter().find(|mapped| mapped.id == id).map(|mapped| mapped.geometry.to_local(position))
    }
}

impl<D> WaylandSeat for SmithaySeat<D>
where
    D: DataDeviceHandler + PrimarySelectionHandler + SelectionHandler<SelectionUserData = SourceId> + SeatHandler + 'static,
{
    fn take_events(&mut self) -> Vec<DataDeviceEvent> {
        self.events.drain(..).collect()
    }

    fn subscribe(&mut self) -> Subscription {
        self.subscribers.subscribe()
    }

    fn keyboard_focus(&self) -> Option<SurfaceId> {
        self.keyboard_focus
    }

    fn pointer_focus(&self) -> Option<SurfaceId> {
        self.pointer_focus
    }

    fn pointer_position(&self) -> Point {
        self.pointer
    }

    fn pointer_pressed(&self) -> bool {
        self.pressed
    }

    fn surface_at(&self, point: Point) -> Option<SurfaceId> {
        self.surfaces.iter().rev().find(|mapped| mapped.geometry.contains(point)).map(|mapped| mapped.id)
    }

    fn surface_geometry(&self, surface: SurfaceId) -> Option<Rect> {
        self.surfaces.iter().find(|mapped| mapped.id == surface).map(|mapped| mapped.geometry)
    }

    fn surface_x11_window(&self, surface: SurfaceId) -> Option<Window> {
        self.surfaces.iter().find(|mapped| mapped.id == surface).and_then(|mapped| mapped.x11_window)
    }

    fn selection(&self, kind: SelectionKind) -> Option<SourceId> {
        match kind {
            SelectionKind::Clipboard => self.clipboard,
            SelectionKind::Primary => self.primary,
        }
    }

    fn create_data_source(&mut self) -> Result<SourceId> {
        let source = SourceId(self.next_id());
        self.sources.insert(source, BridgeSource::default());
        Ok(source)
    }

    fn source_offer(&mut self, source: SourceId, mime_type: &str) -> Result<()> {
        let state = self.sources.get_mut(&source).ok_or(DataDeviceError::UnknownSource(source))?;
        if !state.mime_types.iter().any(|known| known == mime_type) {
            state.mime_types.push(mime_type.to_owned());
        }
        Ok(())
    }

    fn source_set_actions(&mut self, source: SourceId, actions: DndAction) -> Result<()> {
        let state = self.sources.get_mut(&source).ok_or(DataDeviceError::UnknownSource(source))?;
        state.actions = actions;
        Ok(())
    }

    fn source_mime_types(&self, source: SourceId) -> Option<&[String]> {
        match self.sources.get(&source) {
            Some(state) => Some(&state.mime_types),
            None => self.client_selections.get(&source).map(|selection| selection.mime_types.as_slice()),
        }
    }

    fn source_request_send(&mut self, source: SourceId, mime_type: &str, fd: OwnedFd) -> bool {
        let Some(selection) = self.client_selections.get(&source) else {
            return false;
        };
        let kind = selection.kind;
        if !selection.mime_types.iter().any(|known| known == mime_type) || self.selection(kind) != Some(source) {
            return false;
        }
        let requested = match kind {
            SelectionKind::Clipboard => request_data_device_client_selection::<D>(&self.seat, mime_type.to_owned(), fd),
            SelectionKind::Primary => request_primary_client_selection::<D>(&self.seat, mime_type.to_owned(), fd),
        };
        match requested {
            Ok(()) => true,
            Err(e) => {
                debug!(?kind, mime_type, error = ?e, "Compositor refused the selection read");
                false
            }
        }
    }

    fn set_selection(&mut self, kind: SelectionKind, source: Option<SourceId>) -> Result<()> {
        match source {
            Some(source) => {
                let mime_types = self.sources.get(&source).ok_or(DataDeviceError::UnknownSource(source))?.mime_types.clone();
                match kind {
                    SelectionKind::Clipboard => set_data_device_selection(&self.display, &self.seat, mime_types, source),
                    SelectionKind::Primary => set_primary_selection(&self.display, &self.seat, mime_types, source),
                }
            }
            None => match kind {
                SelectionKind::Clipboard => clear_data_device_selection(&self.display, &self.seat),
                SelectionKind::Primary => clear_primary_selection(&self.display, &self.seat),
            },
        }
        self.replace_selection(kind, source);
        Ok(())
    }

    fn destroy_source(&mut self, source: SourceId) {
        if self.sources.remove(&source).is_none() {
            return;
        }
        for kind in [SelectionKind::Clipboard, SelectionKind::Primary] {
            if self.selection(kind) == Some(source) {
                match kind {
                    SelectionKind::Clipboard => clear_data_device_selection(&self.display, &self.seat),
                    SelectionKind::Primary => clear_primary_selection(&self.display, &self.seat),
                }
                *self.selection_slot(kind) = None;
                self.subscribers.notify(SeatNotification::SelectionChanged(kind));
            }
        }
        if self.server_drag.as_ref().is_some_and(|drag| drag.source() == source) {
            WaylandSeat::cancel_drag(self);
        }
    }

    fn offer_mime_types(&self, offer: OfferId) -> Option<&[String]> {
        self.drag_source_for(offer)?;
        self.client_drag.as_ref().map(|drag| drag.mime_types.as_slice())
    }

    fn offer_receive(&mut self, offer: OfferId, mime_type: &str, fd: OwnedFd) -> Result<()> {
        let state = self.offers.get(&offer).ok_or(DataDeviceError::UnknownOffer(offer))?;
        if !(state.live || state.dropped) || state.finished {
            debug!(%offer, "Refusing receive on an inert offer");
            return Ok(());
        }
        let offered = self.client_drag.as_ref().is_some_and(|drag| drag.mime_types.iter().any(|m| m == mime_type));
        match self.drag_source_for(offer).filter(|_| offered) {
            Some(source) => source.send(mime_type.to_owned(), fd.as_fd()),
            None => debug!(%offer, mime_type, "Refusing receive of a type that is not offered"),
        }
        Ok(())
    }

    fn offer_accept(&mut self, offer: OfferId, mime_type: Option<&str>) -> Result<()> {
        let offered = self.client_drag.as_ref().map(|drag| drag.mime_types.clone()).unwrap_or_default();
        let state = self.offers.get_mut(&offer).ok_or(DataDeviceError::UnknownOffer(offer))?;
        if !state.live || state.dropped {
            trace!(%offer, "Ignoring accept");
            return Ok(());
        }
        let accepted = mime_type.filter(|mime| offered.iter().any(|m| m == mime)).map(str::to_owned);
        state.accepted = accepted.clone();
        if let Some(source) = self.drag_source_for(offer) {
            source.target(accepted);
        }
        Ok(())
    }

    fn offer_set_actions(&mut self, offer: OfferId, actions: DndAction, preferred: DndAction) -> Result<()> {
        let source_actions = self.client_drag.as_ref().map(|drag| drag.actions).unwrap_or_default();
        let state = self.offers.get_mut(&offer).ok_or(DataDeviceError::UnknownOffer(offer))?;
        if !state.live || state.dropped {
            trace!(%offer, "Ignoring set_actions");
            return Ok(());
        }
        let action = DndAction::negotiate(source_actions, actions, preferred);
        if action == state.action {
            return Ok(());
        }
        state.action = action;
        if let Some(source) = self.drag_source_for(offer).filter(|source| source.version() >= DND_SOURCE_VERSION) {
            source.action(to_wl_action(action));
        }
        self.events.push_back(DataDeviceEvent::OfferAction { offer, action });
        Ok(())
    }

    fn offer_finish(&mut self, offer: OfferId) -> Result<()> {
        let state = self.offers.get_mut(&offer).ok_or(DataDeviceError::UnknownOffer(offer))?;
        if !state.dropped || state.finished || state.accepted.is_none() {
            return Err(DataDeviceError::InvalidFinish(offer));
        }
        state.finished = true;
        if let Some(source) = self.drag_source_for(offer).filter(|source| source.version() >= DND_SOURCE_VERSION) {
            source.dnd_finished();
        }
        Ok(())
    }

    fn destroy_offer(&mut self, offer: OfferId) -> Result<()> {
        let state = self.offers.remove(&offer).ok_or(DataDeviceError::UnknownOffer(offer))?;
        if state.dropped {
            if !state.finished {
                if let Some(source) = self.drag_source_for(offer) {
                    source.cancelled();
                }
            }
            self.client_drag = None;
        } else if let Some(drag) = self.client_drag.as_mut().filter(|drag| drag.focus.is_some_and(|(_, o)| o == offer)) {
            drag.focus = None;
        }
        Ok(())
    }

    fn start_drag(&mut self, source: SourceId) -> Result<bool> {
        if !self.sources.contains_key(&source) {
            return Err(DataDeviceError::UnknownSource(source));
        }
        if self.server_drag.is_some() || self.client_drag.is_some() {
            return Ok(false);
        }
        self.server_drag = Some(ServerDrag::Pending(source));
        self.subscribers.notify(SeatNotification::DragStarted);
        Ok(true)
    }

    fn drag_active(&self) -> bool {
        self.server_drag.is_some() || self.client_drag.is_some()
    }

    fn drag_focus(&self) -> Option<SurfaceId> {
        match self.server_drag.as_ref()? {
            ServerDrag::Active { focus, .. } => *focus,
            ServerDrag::Pending(_) => None,
        }
    }

    // The grab follows the compositor's pointer; only the focus is tracked.
    fn drag_set_focus(&mut self, surface: Option<SurfaceId>, _position: Point) {
        if let Some(ServerDrag::Active { focus, .. }) = self.server_drag.as_mut() {
            *focus = surface;
        }
    }

    fn drag_motion(&mut self, _position: Point) {}

    fn drag_drop(&mut self) {}

    fn cancel_drag(&mut self) {
        match self.server_drag.take() {
            Some(ServerDrag::Active { source, .. }) => {
                self.grab_requests.push_back(GrabRequest::CancelDrag);
                self.events.push_back(DataDeviceEvent::SourceCancelled { source });
                self.subscribers.notify(SeatNotification::DragEnded);
            }
            Some(ServerDrag::Pending(source)) => {
                self.events.push_back(DataDeviceEvent::SourceCancelled { source });
                self.subscribers.notify(SeatNotification::DragEnded);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_bits_match_wayland() {
        assert_eq!(to_wl_action(DndAction::COPY | DndAction::ASK), WlDndAction::Copy | WlDndAction::Ask);
        assert_eq!(from_wl_action(WlDndAction::Move), DndAction::MOVE);
        assert_eq!(from_wl_action(WlDndAction::empty()), DndAction::empty());
    }

    #[test]
    fn test_selection_targets_map_to_kinds() {
        assert_eq!(selection_kind(SelectionTarget::Clipboard), SelectionKind::Clipboard);
        assert_eq!(selection_kind(SelectionTarget::Primary), SelectionKind::Primary);
    }
}
