use std::collections::{HashMap, VecDeque};
use std::os::fd::OwnedFd;

use tracing::{debug, info, trace, warn};

use super::drag::{DragDevice, DragSession};
use super::subscription::{Subscribers, Subscription};
use super::{
    ClientId, DataDeviceError, DataDeviceEvent, OfferId, Point, Rect, SeatNotification, SelectionKind, Serial,
    SourceId, SurfaceId,
};
use crate::action::DndAction;
use crate::x11::Window;

/// How many input serials per client stay valid for requests.
const SERIAL_HISTORY: usize = 32;

type Result<T> = std::result::Result<T, DataDeviceError>;

#[derive(Debug, Default)]
pub(super) struct ClientState {
    events: VecDeque<DataDeviceEvent>,
    serials: VecDeque<Serial>,
    selection_offers: HashMap<SelectionKind, OfferId>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SurfaceState {
    pub(super) client: ClientId,
    pub(super) rect: Rect,
    x11_window: Option<Window>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SourceRole {
    Unused,
    Selection(SelectionKind),
    Drag,
}

#[derive(Debug)]
pub(super) struct SourceState {
    pub(super) client: ClientId,
    pub(super) mime_types: Vec<String>,
    pub(super) actions: DndAction,
    pub(super) role: SourceRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum OfferKind {
    Selection(SelectionKind),
    Drag,
}

#[derive(Debug)]
pub(super) struct OfferState {
    pub(super) client: ClientId,
    pub(super) source: SourceId,
    pub(super) kind: OfferKind,
    /// Inert offers ignore every request.
    pub(super) live: bool,
    pub(super) accepted: Option<String>,
    pub(super) target_actions: DndAction,
    pub(super) preferred: DndAction,
    pub(super) action: DndAction,
    pub(super) dropped: bool,
    pub(super) finished: bool,
}

impl OfferState {
    pub(super) fn drop_allowed(&self) -> bool {
        self.live && self.accepted.is_some() && !self.action.is_empty()
    }
}

#[derive(Debug, Default)]
pub(super) struct PointerState {
    pub(super) position: Point,
    pub(super) focus: Option<SurfaceId>,
    /// Serial of the press holding the implicit grab.
    pub(super) pressed: Option<Serial>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct TouchPoint {
    pub(super) serial: Serial,
    pub(super) surface: Option<SurfaceId>,
    pub(super) position: Point,
}

#[derive(Debug, Default)]
pub(super) struct TabletState {
    pub(super) position: Point,
    pub(super) surface: Option<SurfaceId>,
    pub(super) down: Option<Serial>,
}

/// Data-device state of a single seat. See the [module docs](super).
#[derive(Debug, Default)]
pub struct DataDeviceState {
    next_id: u32,
    serial: u32,
    clients: HashMap<ClientId, ClientState>,
    xwayland: Option<ClientId>,
    pub(super) surfaces: HashMap<SurfaceId, SurfaceState>,
    /// Bottom to top.
    stacking: Vec<SurfaceId>,
    pub(super) sources: HashMap<SourceId, SourceState>,
    pub(super) offers: HashMap<OfferId, OfferState>,
    clipboard: Option<SourceId>,
    primary: Option<SourceId>,
    keyboard_focus: Option<SurfaceId>,
    pub(super) pointer: PointerState,
    pub(super) touch: HashMap<i32, TouchPoint>,
    pub(super) tablet: TabletState,
    pub(super) drag: Option<DragSession>,
    pub(super) subscribers: Subscribers,
}

impl DataDeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub(super) fn bump_serial(&mut self) -> Serial {
        self.serial = self.serial.wrapping_add(1);
        Serial(self.serial)
    }

    /// Issues a serial for an input event delivered to `client`.
    pub(super) fn next_serial(&mut self, client: ClientId) -> Serial {
        let serial = self.bump_serial();
        if let Some(state) = self.clients.get_mut(&client) {
            if state.serials.len() == SERIAL_HISTORY {
                state.serials.pop_front();
            }
            state.serials.push_back(serial);
        }
        serial
    }

    fn serial_valid(&self, client: ClientId, serial: Serial) -> bool {
        self.clients.get(&client).is_some_and(|state| state.serials.contains(&serial))
    }

    pub(super) fn push(&mut self, client: ClientId, event: DataDeviceEvent) {
        match self.clients.get_mut(&client) {
            Some(state) => state.events.push_back(event),
            None => trace!(%client, ?event, "Dropping event for a disconnected client"),
        }
    }

    /// Queues an event for the client owning `source`.
    pub(super) fn send_to_source(&mut self, source: SourceId, event: DataDeviceEvent) {
        if let Some(client) = self.sources.get(&source).map(|state| state.client) {
            self.push(client, event);
        }
    }

    /// Drains everything queued for `client`.
    pub fn take_events(&mut self, client: ClientId) -> Vec<DataDeviceEvent> {
        self.clients.get_mut(&client).map(|state| state.events.drain(..).collect()).unwrap_or_default()
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.subscribers.subscribe()
    }

    // Clients and surfaces

    pub fn create_client(&mut self) -> ClientId {
        let client = ClientId(self.alloc());
        self.clients.insert(client, ClientState::default());
        debug!(%client, "Client connected");
        client
    }

    /// Connects the client the data bridge acts as.
    pub fn create_xwayland_client(&mut self) -> ClientId {
        let client = self.create_client();
        self.xwayland = Some(client);
        client
    }

    pub fn xwayland_client(&self) -> Option<ClientId> {
        self.xwayland
    }

    pub fn destroy_client(&mut self, client: ClientId) {
        if !self.clients.contains_key(&client) {
            return;
        }
        let sources: Vec<SourceId> =
            self.sources.iter().filter(|(_, state)| state.client == client).map(|(id, _)| *id).collect();
        for source in sources {
            self.destroy_source(source);
        }
        let surfaces: Vec<SurfaceId> =
            self.surfaces.iter().filter(|(_, state)| state.client == client).map(|(id, _)| *id).collect();
        for surface in surfaces {
            self.destroy_surface(surface);
        }
        self.offers.retain(|_, offer| offer.client != client);
        if self.drag.as_ref().is_some_and(|drag| drag.client == client) {
            self.cancel_drag();
        }
        self.clients.remove(&client);
        if self.xwayland == Some(client) {
            self.xwayland = None;
        }
        debug!(%client, "Client disconnected");
    }

    fn check_client(&self, client: ClientId) -> Result<()> {
        if self.clients.contains_key(&client) {
            Ok(())
        } else {
            Err(DataDeviceError::UnknownClient(client))
        }
    }

    /// Maps a surface on top of the stack. Xwayland surfaces name the X
    /// window they show.
    pub fn create_surface(&mut self, client: ClientId, rect: Rect, x11_window: Option<Window>) -> Result<SurfaceId> {
        self.check_client(client)?;
        let surface = SurfaceId(self.alloc());
        self.surfaces.insert(surface, SurfaceState { client, rect, x11_window });
        self.stacking.push(surface);
        Ok(surface)
    }

    pub fn destroy_surface(&mut self, surface: SurfaceId) {
        if !self.surfaces.contains_key(&surface) {
            return;
        }
        if self.keyboard_focus == Some(surface) {
            self.set_keyboard_focus(None);
        }
        if self.pointer.focus == Some(surface) {
            self.pointer.focus = None;
        }
        if self.tablet.surface == Some(surface) {
            self.tablet.surface = None;
        }
        for point in self.touch.values_mut() {
            if point.surface == Some(surface) {
                point.surface = None;
            }
        }
        if self.drag_focus() == Some(surface) {
            let position = self.drag.as_ref().map(|drag| drag.position).unwrap_or_default();
            self.set_drag_focus(None, position);
        }
        self.surfaces.remove(&surface);
        self.stacking.retain(|id| *id != surface);
    }

    /// The topmost surface containing `point`.
    pub fn surface_at(&self, point: Point) -> Option<SurfaceId> {
        self.stacking
            .iter()
            .rev()
            .copied()
            .find(|id| self.surfaces.get(id).is_some_and(|state| state.rect.contains(point)))
    }

    pub fn surface_geometry(&self, surface: SurfaceId) -> Option<Rect> {
        self.surfaces.get(&surface).map(|state| state.rect)
    }

    pub fn surface_client(&self, surface: SurfaceId) -> Option<ClientId> {
        self.surfaces.get(&surface).map(|state| state.client)
    }

    pub fn surface_x11_window(&self, surface: SurfaceId) -> Option<Window> {
        self.surfaces.get(&surface).and_then(|state| state.x11_window)
    }

    /// Moves a surface to the top of the stack.
    pub fn raise_surface(&mut self, surface: SurfaceId) {
        if self.surfaces.contains_key(&surface) {
            self.stacking.retain(|id| *id != surface);
            self.stacking.push(surface);
        }
    }

    // Keyboard

    pub fn keyboard_focus(&self) -> Option<SurfaceId> {
        self.keyboard_focus
    }

    fn focus_client(&self) -> Option<ClientId> {
        self.keyboard_focus.and_then(|surface| self.surface_client(surface))
    }

    /// Moves keyboard focus. The current selections are offered to the new
    /// client only when focus changes client.
    pub fn set_keyboard_focus(&mut self, surface: Option<SurfaceId>) {
        if surface == self.keyboard_focus {
            return;
        }
        if let Some(id) = surface {
            if !self.surfaces.contains_key(&id) {
                warn!(surface = %id, "Ignoring keyboard focus on an unknown surface");
                return;
            }
        }
        let old_client = self.focus_client();
        if let Some(old) = self.keyboard_focus.take() {
            if let Some(client) = self.surface_client(old) {
                self.push(client, DataDeviceEvent::KeyboardLeave { surface: old });
            }
        }
        self.keyboard_focus = surface;
        let new_client = self.focus_client();
        if let (Some(surface), Some(client)) = (surface, new_client) {
            let serial = self.next_serial(client);
            self.push(client, DataDeviceEvent::KeyboardEnter { serial, surface });
        }
        if old_client != new_client {
            if let Some(old) = old_client {
                self.invalidate_selection_offers(old);
            }
            if let Some(new) = new_client {
                self.send_selection(new, SelectionKind::Clipboard);
                self.send_selection(new, SelectionKind::Primary);
            }
        }
        self.subscribers.notify(SeatNotification::KeyboardFocusChanged(surface));
    }

    // Pointer

    pub fn pointer_position(&self) -> Point {
        self.pointer.position
    }

    pub fn pointer_focus(&self) -> Option<SurfaceId> {
        self.pointer.focus
    }

    pub fn pointer_pressed(&self) -> bool {
        self.pointer.pressed.is_some()
    }

    pub fn pointer_motion(&mut self, position: Point) {
        self.pointer.position = position;
        self.subscribers.notify(SeatNotification::PointerMoved(position));
        if self.drag_follows(DragDevice::Pointer) {
            self.drag_device_motion(position);
        } else {
            self.update_pointer_focus();
        }
    }

    /// Presses or releases the (single) pointer button.
    pub fn pointer_button(&mut self, pressed: bool) -> Serial {
        self.subscribers.notify(SeatNotification::PointerButton { pressed });
        if !pressed && self.drag_follows(DragDevice::Pointer) {
            self.pointer.pressed = None;
            let serial = self.bump_serial();
            self.drag_drop();
            return serial;
        }
        let serial = match self.pointer.focus.and_then(|surface| self.surface_client(surface)) {
            Some(client) => {
                let serial = self.next_serial(client);
                self.push(client, DataDeviceEvent::PointerButton { serial, pressed });
                serial
            }
            None => self.bump_serial(),
        };
        self.pointer.pressed = pressed.then_some(serial);
        if !pressed {
            self.update_pointer_focus();
        }
        serial
    }

    /// Delivers enter/leave/motion for the current position. An implicit
    /// grab keeps focus on the pressed surface.
    pub(super) fn update_pointer_focus(&mut self) {
        let position = self.pointer.position;
        let target = if self.pointer.pressed.is_some() { self.pointer.focus } else { self.surface_at(position) };
        if target == self.pointer.focus {
            if let Some((client, rect)) = target.and_then(|surface| self.surfaces.get(&surface)).map(|s| (s.client, s.rect)) {
                self.push(client, DataDeviceEvent::PointerMotion { position: rect.to_local(position) });
            }
            return;
        }
        if let Some(old) = self.pointer.focus.take() {
            if let Some(client) = self.surface_client(old) {
                self.push(client, DataDeviceEvent::PointerLeave { surface: old });
            }
        }
        if let Some(surface) = target {
            if let Some(state) = self.surfaces.get(&surface).copied() {
                let serial = self.next_serial(state.client);
                self.push(
                    state.client,
                    DataDeviceEvent::PointerEnter { serial, surface, position: state.rect.to_local(position) },
                );
                self.pointer.focus = Some(surface);
            }
        }
    }

    pub(super) fn pointer_leave(&mut self) {
        if let Some(old) = self.pointer.focus.take() {
            if let Some(client) = self.surface_client(old) {
                self.push(client, DataDeviceEvent::PointerLeave { surface: old });
            }
        }
    }

    // Touch

    pub fn touch_down(&mut self, id: i32, position: Point) -> Serial {
        let surface = self.surface_at(position);
        let serial = match surface.and_then(|s| self.surfaces.get(&s).map(|state| (s, *state))) {
            Some((surface, state)) => {
                let serial = self.next_serial(state.client);
                self.push(
                    state.client,
                    DataDeviceEvent::TouchDown { serial, surface, id, position: state.rect.to_local(position) },
                );
                serial
            }
            None => self.bump_serial(),
        };
        self.touch.insert(id, TouchPoint { serial, surface, position });
        serial
    }

    pub fn touch_motion(&mut self, id: i32, position: Point) {
        if let Some(point) = self.touch.get_mut(&id) {
            point.position = position;
        }
        if self.drag_follows(DragDevice::Touch(id)) {
            self.drag_device_motion(position);
            return;
        }
        let Some(surface) = self.touch.get(&id).and_then(|point| point.surface) else {
            return;
        };
        if let Some(state) = self.surfaces.get(&surface).copied() {
            self.push(state.client, DataDeviceEvent::TouchMotion { id, position: state.rect.to_local(position) });
        }
    }

    pub fn touch_up(&mut self, id: i32) {
        let point = self.touch.remove(&id);
        if self.drag_follows(DragDevice::Touch(id)) {
            self.drag_drop();
            return;
        }
        if let Some(client) = point.and_then(|point| point.surface).and_then(|s| self.surface_client(s)) {
            self.push(client, DataDeviceEvent::TouchUp { id });
        }
    }

    pub fn touch_cancel(&mut self) {
        if self.drag.as_ref().is_some_and(|drag| matches!(drag.device, DragDevice::Touch(_))) {
            self.cancel_drag();
        }
        let mut clients: Vec<ClientId> = self
            .touch
            .drain()
            .filter_map(|(_, point)| point.surface)
            .filter_map(|surface| self.surfaces.get(&surface).map(|state| state.client))
            .collect();
        clients.sort();
        clients.dedup();
        for client in clients {
            self.push(client, DataDeviceEvent::TouchCancel);
        }
    }

    // Tablet tool

    pub fn tablet_tool_down(&mut self, position: Point) -> Serial {
        self.tablet.position = position;
        self.tablet.surface = self.surface_at(position);
        let serial = match self.tablet.surface.and_then(|s| self.surface_client(s).map(|c| (s, c))) {
            Some((surface, client)) => {
                let serial = self.next_serial(client);
                self.push(client, DataDeviceEvent::TabletToolDown { serial, surface });
                serial
            }
            None => self.bump_serial(),
        };
        self.tablet.down = Some(serial);
        serial
    }

    pub fn tablet_tool_motion(&mut self, position: Point) {
        self.tablet.position = position;
        if self.drag_follows(DragDevice::Tablet) {
            self.drag_device_motion(position);
            return;
        }
        if let Some(state) = self.tablet.surface.and_then(|s| self.surfaces.get(&s)).copied() {
            self.push(state.client, DataDeviceEvent::TabletToolMotion { position: state.rect.to_local(position) });
        }
    }

    pub fn tablet_tool_up(&mut self) {
        self.tablet.down = None;
        if self.drag_follows(DragDevice::Tablet) {
            self.drag_drop();
            return;
        }
        if let Some(client) = self.tablet.surface.and_then(|s| self.surface_client(s)) {
            self.push(client, DataDeviceEvent::TabletToolUp);
        }
    }

    /// The input device whose press issued `serial` to `client`.
    pub(super) fn device_for_serial(&self, client: ClientId, serial: Serial) -> Option<DragDevice> {
        let owned_by = |surface: Option<SurfaceId>| surface.and_then(|s| self.surface_client(s)) == Some(client);
        if self.pointer.pressed == Some(serial) && owned_by(self.pointer.focus) {
            return Some(DragDevice::Pointer);
        }
        if let Some((id, _)) = self.touch.iter().find(|(_, point)| point.serial == serial && owned_by(point.surface)) {
            return Some(DragDevice::Touch(*id));
        }
        if self.tablet.down == Some(serial) && owned_by(self.tablet.surface) {
            return Some(DragDevice::Tablet);
        }
        None
    }

    // Data sources

    pub fn create_data_source(&mut self, client: ClientId) -> Result<SourceId> {
        self.check_client(client)?;
        let source = SourceId(self.alloc());
        self.sources.insert(
            source,
            SourceState { client, mime_types: Vec::new(), actions: DndAction::empty(), role: SourceRole::Unused },
        );
        Ok(source)
    }

    fn source_mut(&mut self, source: SourceId) -> Result<&mut SourceState> {
        self.sources.get_mut(&source).ok_or(DataDeviceError::UnknownSource(source))
    }

    /// Adds a mime type; duplicates are ignored.
    pub fn source_offer(&mut self, source: SourceId, mime_type: &str) -> Result<()> {
        let state = self.source_mut(source)?;
        if !state.mime_types.iter().any(|m| m == mime_type) {
            state.mime_types.push(mime_type.to_owned());
        }
        Ok(())
    }

    /// Sets the drag actions the source supports. A live drag offer of the
    /// source learns about the change and renegotiates.
    pub fn source_set_actions(&mut self, source: SourceId, actions: DndAction) -> Result<()> {
        let state = self.source_mut(source)?;
        if state.actions == actions {
            return Ok(());
        }
        state.actions = actions;
        let offer = self.drag.as_ref().filter(|drag| drag.source == Some(source)).and_then(|drag| drag.focus_offer());
        if let Some(offer) = offer {
            if let Some(client) = self.offers.get(&offer).map(|state| state.client) {
                self.push(client, DataDeviceEvent::OfferSourceActions { offer, actions });
            }
            self.renegotiate(offer);
        }
        Ok(())
    }

    pub fn source_mime_types(&self, source: SourceId) -> Option<&[String]> {
        self.sources.get(&source).map(|state| state.mime_types.as_slice())
    }

    pub fn source_client(&self, source: SourceId) -> Option<ClientId> {
        self.sources.get(&source).map(|state| state.client)
    }

    /// Destroying a source clears the selection it owns and ends its drag.
    pub fn destroy_source(&mut self, source: SourceId) {
        let Some(state) = self.sources.remove(&source) else {
            return;
        };
        for offer in self.offers.values_mut().filter(|offer| offer.source == source) {
            offer.live = false;
        }
        match state.role {
            SourceRole::Selection(kind) if self.selection(kind) == Some(source) => {
                debug!(%source, ?kind, "Selection source destroyed");
                self.replace_selection(kind, None);
            }
            SourceRole::Drag => self.drag_source_destroyed(source),
            _ => {}
        }
    }

    /// Asks the owner of `source` to write `mime_type` into `fd`, bypassing
    /// offers. Returns `false` (and closes `fd`) when the source is gone or
    /// does not offer the type.
    pub fn source_request_send(&mut self, source: SourceId, mime_type: &str, fd: OwnedFd) -> bool {
        let offered = self.sources.get(&source).is_some_and(|state| state.mime_types.iter().any(|m| m == mime_type));
        if offered {
            self.send_to_source(source, DataDeviceEvent::SourceSend { source, mime_type: mime_type.to_owned(), fd });
        }
        offered
    }

    // Selections

    pub fn selection(&self, kind: SelectionKind) -> Option<SourceId> {
        match kind {
            SelectionKind::Clipboard => self.clipboard,
            SelectionKind::Primary => self.primary,
        }
    }

    /// `wl_data_device.set_selection`.
    ///
    /// Requires keyboard focus on one of the client's surfaces and a serial
    /// from one of its recent input events; otherwise the request is ignored
    /// and `Ok(false)` returned. Unsetting only clears a selection the client
    /// itself owns.
    pub fn set_selection(
        &mut self,
        client: ClientId,
        kind: SelectionKind,
        source: Option<SourceId>,
        serial: Serial,
    ) -> Result<bool> {
        self.check_client(client)?;
        if let Some(source) = source {
            self.check_unused_source(source, Some(client))?;
        }
        if self.focus_client() != Some(client) || !self.serial_valid(client, serial) {
            debug!(%client, ?kind, serial = serial.0, "Ignoring selection request without focus or valid serial");
            return Ok(false);
        }
        match source {
            Some(source) => self.replace_selection(kind, Some(source)),
            None => {
                let owns = self.selection(kind).and_then(|current| self.source_client(current)) == Some(client);
                if !owns {
                    trace!(%client, ?kind, "Ignoring unset from a client that does not own the selection");
                    return Ok(false);
                }
                self.replace_selection(kind, None);
            }
        }
        Ok(true)
    }

    /// Sets a selection on the compositor's behalf, without focus or serial
    /// checks.
    pub fn set_selection_internal(&mut self, kind: SelectionKind, source: Option<SourceId>) -> Result<()> {
        if let Some(source) = source {
            self.check_unused_source(source, None)?;
        }
        self.replace_selection(kind, source);
        Ok(())
    }

    pub(super) fn check_unused_source(&self, source: SourceId, client: Option<ClientId>) -> Result<()> {
        let state = self.sources.get(&source).ok_or(DataDeviceError::UnknownSource(source))?;
        if let Some(client) = client {
            if state.client != client {
                return Err(DataDeviceError::NotOwner(source.to_string(), client));
            }
        }
        if state.role != SourceRole::Unused {
            return Err(DataDeviceError::SourceAlreadyUsed(source));
        }
        Ok(())
    }

    fn replace_selection(&mut self, kind: SelectionKind, source: Option<SourceId>) {
        let slot = match kind {
            SelectionKind::Clipboard => &mut self.clipboard,
            SelectionKind::Primary => &mut self.primary,
        };
        let previous = std::mem::replace(slot, source);
        if let Some(source) = source {
            if let Some(state) = self.sources.get_mut(&source) {
                state.role = SourceRole::Selection(kind);
            }
        }
        if let Some(previous) = previous.filter(|previous| Some(*previous) != source) {
            self.send_to_source(previous, DataDeviceEvent::SourceCancelled { source: previous });
        }
        info!(?kind, ?source, "Selection changed");
        if let Some(client) = self.focus_client() {
            self.send_selection(client, kind);
        }
        self.subscribers.notify(SeatNotification::SelectionChanged(kind));
    }

    /// Offers the current selection to `client`, replacing its older offer.
    fn send_selection(&mut self, client: ClientId, kind: SelectionKind) {
        let previous = self.clients.get_mut(&client).and_then(|state| state.selection_offers.remove(&kind));
        if let Some(offer) = previous.and_then(|previous| self.offers.get_mut(&previous)) {
            offer.live = false;
        }
        let offer = self.selection(kind).map(|source| self.create_offer(client, source, OfferKind::Selection(kind)));
        if let (Some(offer), Some(state)) = (offer, self.clients.get_mut(&client)) {
            state.selection_offers.insert(kind, offer);
        }
        self.push(client, DataDeviceEvent::Selection { kind, offer });
    }

    fn invalidate_selection_offers(&mut self, client: ClientId) {
        let offers: Vec<OfferId> = self
            .clients
            .get_mut(&client)
            .map(|state| state.selection_offers.drain().map(|(_, offer)| offer).collect())
            .unwrap_or_default();
        for offer in offers {
            if let Some(state) = self.offers.get_mut(&offer) {
                state.live = false;
            }
        }
    }

    // Offers

    /// Creates an offer for `client` and announces it with its mime types
    /// (and source actions, for drags).
    pub(super) fn create_offer(&mut self, client: ClientId, source: SourceId, kind: OfferKind) -> OfferId {
        let offer = OfferId(self.alloc());
        let (mime_types, actions) = self
            .sources
            .get(&source)
            .map(|state| (state.mime_types.clone(), state.actions))
            .unwrap_or_default();
        self.offers.insert(
            offer,
            OfferState {
                client,
                source,
                kind,
                live: true,
                accepted: None,
                target_actions: DndAction::empty(),
                preferred: DndAction::empty(),
                action: DndAction::empty(),
                dropped: false,
                finished: false,
            },
        );
        self.push(client, DataDeviceEvent::DataOffer { offer, mime_types });
        if kind == OfferKind::Drag {
            self.push(client, DataDeviceEvent::OfferSourceActions { offer, actions });
        }
        offer
    }

    fn offer_mut(&mut self, client: ClientId, offer: OfferId) -> Result<&mut OfferState> {
        let state = self.offers.get_mut(&offer).ok_or(DataDeviceError::UnknownOffer(offer))?;
        if state.client != client {
            return Err(DataDeviceError::NotOwner(offer.to_string(), client));
        }
        Ok(state)
    }

    pub fn offer_mime_types(&self, offer: OfferId) -> Option<&[String]> {
        self.offers.get(&offer).and_then(|state| self.source_mime_types(state.source))
    }

    pub fn offer_is_live(&self, offer: OfferId) -> bool {
        self.offers.get(&offer).is_some_and(|state| state.live)
    }

    /// The action negotiated for a drag offer.
    pub fn offer_action(&self, offer: OfferId) -> Option<DndAction> {
        self.offers.get(&offer).map(|state| state.action)
    }

    /// `wl_data_offer.receive`. The fd is closed without a transfer when the
    /// offer is inert, the type is not offered, or a selection offer's client
    /// no longer has keyboard focus.
    pub fn offer_receive(&mut self, client: ClientId, offer: OfferId, mime_type: &str, fd: OwnedFd) -> Result<()> {
        let focus_client = self.focus_client();
        let state = self.offer_mut(client, offer)?;
        let allowed = match state.kind {
            OfferKind::Selection(_) => state.live && focus_client == Some(client),
            OfferKind::Drag => state.live && !state.finished,
        };
        let source = state.source;
        if !allowed {
            debug!(%client, %offer, "Refusing receive on an inert offer");
            return Ok(());
        }
        if !self.source_request_send(source, mime_type, fd) {
            debug!(%client, %offer, mime_type, "Refusing receive of a type that is not offered");
        }
        Ok(())
    }

    /// `wl_data_offer.accept`. Every accept on a live drag offer is
    /// forwarded to the source, even when nothing changed.
    pub fn offer_accept(&mut self, client: ClientId, offer: OfferId, mime_type: Option<&str>) -> Result<()> {
        let state = self.offer_mut(client, offer)?;
        if state.kind != OfferKind::Drag || !state.live || state.dropped {
            trace!(%offer, "Ignoring accept");
            return Ok(());
        }
        let source = state.source;
        let offered = self.sources.get(&source).map(|s| s.mime_types.clone()).unwrap_or_default();
        let accepted = mime_type.filter(|mime| offered.iter().any(|m| m == mime)).map(str::to_owned);
        if let Some(state) = self.offers.get_mut(&offer) {
            state.accepted = accepted.clone();
        }
        self.send_to_source(source, DataDeviceEvent::SourceTarget { source, mime_type: accepted });
        Ok(())
    }

    /// `wl_data_offer.set_actions`. After a drop only an `ASK` result may
    /// still be changed.
    pub fn offer_set_actions(
        &mut self,
        client: ClientId,
        offer: OfferId,
        actions: DndAction,
        preferred: DndAction,
    ) -> Result<()> {
        let state = self.offer_mut(client, offer)?;
        if state.kind != OfferKind::Drag || !state.live || state.finished {
            trace!(%offer, "Ignoring set_actions");
            return Ok(());
        }
        if state.dropped && state.action != DndAction::ASK {
            debug!(%offer, "Ignoring set_actions after drop");
            return Ok(());
        }
        state.target_actions = actions;
        state.preferred = if actions.contains(preferred) { preferred } else { DndAction::empty() };
        self.renegotiate(offer);
        Ok(())
    }

    pub(super) fn renegotiate(&mut self, offer: OfferId) {
        let Some(state) = self.offers.get(&offer) else {
            return;
        };
        let source_actions = self.sources.get(&state.source).map(|s| s.actions).unwrap_or_default();
        let action = DndAction::negotiate(source_actions, state.target_actions, state.preferred);
        if action == state.action {
            return;
        }
        let (client, source) = (state.client, state.source);
        if let Some(state) = self.offers.get_mut(&offer) {
            state.action = action;
        }
        self.push(client, DataDeviceEvent::OfferAction { offer, action });
        self.send_to_source(source, DataDeviceEvent::SourceAction { source, action });
    }

    /// `wl_data_offer.finish`: only valid on a dropped drag offer with an
    /// accepted type and a selected action.
    pub fn offer_finish(&mut self, client: ClientId, offer: OfferId) -> Result<()> {
        let state = self.offer_mut(client, offer)?;
        if !state.live {
            trace!(%offer, "Ignoring finish on an inert offer");
            return Ok(());
        }
        if state.kind != OfferKind::Drag || !state.dropped || state.finished || !state.drop_allowed() {
            return Err(DataDeviceError::InvalidFinish(offer));
        }
        state.finished = true;
        let source = state.source;
        self.send_to_source(source, DataDeviceEvent::SourceDndFinished { source });
        Ok(())
    }

    /// Destroying a dropped but unfinished drag offer cancels its source.
    pub fn destroy_offer(&mut self, client: ClientId, offer: OfferId) -> Result<()> {
        self.offer_mut(client, offer)?;
        let Some(state) = self.offers.remove(&offer) else {
            return Ok(());
        };
        if state.kind == OfferKind::Drag && state.live && state.dropped && !state.finished {
            let source = state.source;
            self.send_to_source(source, DataDeviceEvent::SourceCancelled { source });
        }
        if let Some(client) = self.clients.get_mut(&client) {
            client.selection_offers.retain(|_, id| *id != offer);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(super) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::pipe;

    struct Fixture {
        state: DataDeviceState,
        a: ClientId,
        b: ClientId,
        surface_a: SurfaceId,
        surface_b: SurfaceId,
    }

    fn fixture() -> Fixture {
        let mut state = DataDeviceState::new();
        let a = state.create_client();
        let b = state.create_client();
        let surface_a = state.create_surface(a, Rect::new(0, 0, 100, 100), None).unwrap();
        let surface_b = state.create_surface(b, Rect::new(100, 0, 100, 100), None).unwrap();
        Fixture { state, a, b, surface_a, surface_b }
    }

    fn key_serial(state: &mut DataDeviceState, client: ClientId) -> Serial {
        state
            .take_events(client)
            .into_iter()
            .rev()
            .find_map(|event| match event {
                DataDeviceEvent::KeyboardEnter { serial, .. } => Some(serial),
                _ => None,
            })
            .expect("no keyboard enter")
    }

    fn selection_offers(events: Vec<DataDeviceEvent>, kind: SelectionKind) -> Vec<Option<OfferId>> {
        events
            .into_iter()
            .filter_map(|event| match event {
                DataDeviceEvent::Selection { kind: k, offer } if k == kind => Some(offer),
                _ => None,
            })
            .collect()
    }

    fn own_clipboard(f: &mut Fixture) -> SourceId {
        f.state.set_keyboard_focus(Some(f.surface_a));
        let serial = key_serial(&mut f.state, f.a);
        let source = f.state.create_data_source(f.a).unwrap();
        f.state.source_offer(source, "text/plain").unwrap();
        assert!(f.state.set_selection(f.a, SelectionKind::Clipboard, Some(source), serial).unwrap());
        source
    }

    #[test]
    fn test_selection_requires_focus_and_serial() {
        let mut f = fixture();
        f.state.set_keyboard_focus(Some(f.surface_a));
        let serial = key_serial(&mut f.state, f.a);
        let source = f.state.create_data_source(f.a).unwrap();
        assert!(!f.state.set_selection(f.a, SelectionKind::Clipboard, Some(source), Serial(9999)).unwrap());
        assert_eq!(f.state.selection(SelectionKind::Clipboard), None);

        let other = f.state.create_data_source(f.b).unwrap();
        assert!(!f.state.set_selection(f.b, SelectionKind::Clipboard, Some(other), serial).unwrap());
        assert!(f.state.set_selection(f.a, SelectionKind::Clipboard, Some(source), serial).unwrap());
        assert_eq!(f.state.selection(SelectionKind::Clipboard), Some(source));
        assert_eq!(
            f.state.set_selection(f.a, SelectionKind::Clipboard, Some(source), serial),
            Err(DataDeviceError::SourceAlreadyUsed(source))
        );
    }

    #[test]
    fn test_replaced_selection_cancels_previous_source() {
        let mut f = fixture();
        let first = own_clipboard(&mut f);
        f.state.set_keyboard_focus(Some(f.surface_b));
        let serial = key_serial(&mut f.state, f.b);
        let second = f.state.create_data_source(f.b).unwrap();
        f.state.set_selection(f.b, SelectionKind::Clipboard, Some(second), serial).unwrap();
        let cancelled = f
            .state
            .take_events(f.a)
            .into_iter()
            .filter(|event| matches!(event, DataDeviceEvent::SourceCancelled { source } if *source == first))
            .count();
        assert_eq!(cancelled, 1);
    }

    #[test]
    fn test_unset_from_stale_owner_is_ignored() {
        let mut f = fixture();
        let source = own_clipboard(&mut f);
        f.state.set_keyboard_focus(Some(f.surface_b));
        let serial = key_serial(&mut f.state, f.b);
        assert!(!f.state.set_selection(f.b, SelectionKind::Clipboard, None, serial).unwrap());
        assert_eq!(f.state.selection(SelectionKind::Clipboard), Some(source));

        f.state.set_keyboard_focus(Some(f.surface_a));
        let serial = key_serial(&mut f.state, f.a);
        assert!(f.state.set_selection(f.a, SelectionKind::Clipboard, None, serial).unwrap());
        assert_eq!(f.state.selection(SelectionKind::Clipboard), None);
    }

    #[test]
    fn test_selection_offered_only_to_focused_client() {
        let mut f = fixture();
        own_clipboard(&mut f);
        assert!(selection_offers(f.state.take_events(f.b), SelectionKind::Clipboard).is_empty());
        let offers_a = selection_offers(f.state.take_events(f.a), SelectionKind::Clipboard);
        assert!(matches!(offers_a.last(), Some(Some(_))));

        f.state.set_keyboard_focus(Some(f.surface_b));
        let offers_b = selection_offers(f.state.take_events(f.b), SelectionKind::Clipboard);
        assert_eq!(offers_b.len(), 1);
        let offer = offers_b[0].unwrap();
        assert_eq!(f.state.offer_mime_types(offer), Some(&["text/plain".to_owned()][..]));
    }

    #[test]
    fn test_focus_within_client_does_not_resend() {
        let mut f = fixture();
        own_clipboard(&mut f);
        let second_surface = f.state.create_surface(f.a, Rect::new(0, 100, 100, 100), None).unwrap();
        f.state.take_events(f.a);
        f.state.set_keyboard_focus(Some(second_surface));
        assert!(selection_offers(f.state.take_events(f.a), SelectionKind::Clipboard).is_empty());
    }

    #[test]
    fn test_focus_loss_makes_offer_inert() {
        let mut f = fixture();
        own_clipboard(&mut f);
        f.state.set_keyboard_focus(Some(f.surface_b));
        let offer = selection_offers(f.state.take_events(f.b), SelectionKind::Clipboard)[0].unwrap();
        f.state.take_events(f.a);

        f.state.set_keyboard_focus(Some(f.surface_a));
        assert!(!f.state.offer_is_live(offer));
        let (_read, write) = pipe().unwrap();
        f.state.offer_receive(f.b, offer, "text/plain", write).unwrap();
        assert!(f.state.take_events(f.a).iter().all(|event| !matches!(event, DataDeviceEvent::SourceSend { .. })));
    }

    #[test]
    fn test_receive_forwards_to_source() {
        let mut f = fixture();
        let source = own_clipboard(&mut f);
        let offer = selection_offers(f.state.take_events(f.a), SelectionKind::Clipboard)
            .into_iter()
            .flatten()
            .last()
            .unwrap();
        let (_read, write) = pipe().unwrap();
        f.state.offer_receive(f.a, offer, "text/plain", write).unwrap();
        let (_read, write) = pipe().unwrap();
        f.state.offer_receive(f.a, offer, "image/png", write).unwrap();
        let sends: Vec<_> = f
            .state
            .take_events(f.a)
            .into_iter()
            .filter_map(|event| match event {
                DataDeviceEvent::SourceSend { source: s, mime_type, .. } => Some((s, mime_type)),
                _ => None,
            })
            .collect();
        assert_eq!(sends, vec![(source, "text/plain".to_owned())]);
    }

    #[test]
    fn test_destroying_selection_source_clears_selection() {
        let mut f = fixture();
        let source = own_clipboard(&mut f);
        let subscription = f.state.subscribe();
        f.state.take_events(f.a);
        f.state.destroy_source(source);
        assert_eq!(f.state.selection(SelectionKind::Clipboard), None);
        assert_eq!(selection_offers(f.state.take_events(f.a), SelectionKind::Clipboard), vec![None]);
        assert_eq!(subscription.take(), vec![SeatNotification::SelectionChanged(SelectionKind::Clipboard)]);
        drop(subscription);
        f.state.set_selection_internal(SelectionKind::Primary, None).unwrap();
        assert_eq!(f.state.subscriber_count(), 0);
    }

    #[test]
    fn test_pointer_enter_leave_and_grab() {
        let mut f = fixture();
        f.state.pointer_motion(Point::new(50.0, 50.0));
        f.state.pointer_button(true);
        f.state.pointer_motion(Point::new(150.0, 50.0));
        let events = f.state.take_events(f.a);
        assert!(matches!(events[0], DataDeviceEvent::PointerEnter { position, .. } if position == Point::new(50.0, 50.0)));
        assert!(matches!(events[1], DataDeviceEvent::PointerButton { pressed: true, .. }));
        assert!(matches!(events[2], DataDeviceEvent::PointerMotion { position } if position == Point::new(150.0, 50.0)));
        assert!(f.state.take_events(f.b).is_empty());

        f.state.pointer_button(false);
        assert!(matches!(f.state.take_events(f.b)[0], DataDeviceEvent::PointerEnter { surface, .. } if surface == f.surface_b));
    }
}
