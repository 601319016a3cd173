//! The bridge's view of the compositor seat.
//!
//! [`WaylandSeat`] is everything [`DataBridge`](crate::DataBridge) needs from
//! the Wayland side: it acts as the Xwayland client for offers and sources,
//! reads the seat's focus and pointer, and drives compositor-internal drags.
//! [`DataDeviceState`] implements it for the in-memory seat used in tests;
//! with the `smithay-backend` feature,
//! [`SmithaySeat`](super::smithay_seat::SmithaySeat) implements it on top of
//! smithay's data-device and primary-selection globals.

use std::os::fd::OwnedFd;

use super::{
    DataDeviceError, DataDeviceEvent, DataDeviceState, OfferId, Point, Rect, SelectionKind, SourceId, Subscription,
    SurfaceId,
};
use crate::action::DndAction;
use crate::x11::Window;

type Result<T> = std::result::Result<T, DataDeviceError>;

pub trait WaylandSeat {
    /// Drains everything queued for the Xwayland client.
    fn take_events(&mut self) -> Vec<DataDeviceEvent>;

    fn subscribe(&mut self) -> Subscription;

    // Focus and geometry

    fn keyboard_focus(&self) -> Option<SurfaceId>;

    fn pointer_focus(&self) -> Option<SurfaceId>;

    /// Global pointer position.
    fn pointer_position(&self) -> Point;

    /// Whether a button press holds the implicit grab.
    fn pointer_pressed(&self) -> bool;

    /// Topmost surface under a global position.
    fn surface_at(&self, point: Point) -> Option<SurfaceId>;

    fn surface_geometry(&self, surface: SurfaceId) -> Option<Rect>;

    /// The X window an Xwayland surface shows, `None` for native surfaces.
    fn surface_x11_window(&self, surface: SurfaceId) -> Option<Window>;

    // Sources

    fn selection(&self, kind: SelectionKind) -> Option<SourceId>;

    /// A new source owned by the Xwayland client.
    fn create_data_source(&mut self) -> Result<SourceId>;

    fn source_offer(&mut self, source: SourceId, mime_type: &str) -> Result<()>;

    fn source_set_actions(&mut self, source: SourceId, actions: DndAction) -> Result<()>;

    fn source_mime_types(&self, source: SourceId) -> Option<&[String]>;

    /// Asks the source's owner to write `mime_type` into `fd`. Returns
    /// `false`, closing `fd`, when the source is gone or lacks the type.
    fn source_request_send(&mut self, source: SourceId, mime_type: &str, fd: OwnedFd) -> bool;

    /// Sets a selection on the compositor's behalf.
    fn set_selection(&mut self, kind: SelectionKind, source: Option<SourceId>) -> Result<()>;

    fn destroy_source(&mut self, source: SourceId);

    // Offers made to the Xwayland client

    fn offer_mime_types(&self, offer: OfferId) -> Option<&[String]>;

    fn offer_receive(&mut self, offer: OfferId, mime_type: &str, fd: OwnedFd) -> Result<()>;

    fn offer_accept(&mut self, offer: OfferId, mime_type: Option<&str>) -> Result<()>;

    fn offer_set_actions(&mut self, offer: OfferId, actions: DndAction, preferred: DndAction) -> Result<()>;

    fn offer_finish(&mut self, offer: OfferId) -> Result<()>;

    fn destroy_offer(&mut self, offer: OfferId) -> Result<()>;

    // Compositor-driven drags

    /// Starts a drag of `source` that follows the pointer. `Ok(false)` when
    /// another drag is in progress.
    fn start_drag(&mut self, source: SourceId) -> Result<bool>;

    fn drag_active(&self) -> bool;

    fn drag_focus(&self) -> Option<SurfaceId>;

    /// Moves the drag onto `surface` (or off every surface) at a global position.
    fn drag_set_focus(&mut self, surface: Option<SurfaceId>, position: Point);

    fn drag_motion(&mut self, position: Point);

    fn drag_drop(&mut self);

    fn cancel_drag(&mut self);
}

impl DataDeviceState {
    fn bridge_client(&self) -> Result<super::ClientId> {
        self.xwayland_client().ok_or(DataDeviceError::NoXwaylandClient)
    }
}

impl WaylandSeat for DataDeviceState {
    fn take_events(&mut self) -> Vec<DataDeviceEvent> {
        match self.xwayland_client() {
            Some(client) => DataDeviceState::take_events(self, client),
            None => Vec::new(),
        }
    }

    fn subscribe(&mut self) -> Subscription {
        DataDeviceState::subscribe(self)
    }

    fn keyboard_focus(&self) -> Option<SurfaceId> {
        DataDeviceState::keyboard_focus(self)
    }

    fn pointer_focus(&self) -> Option<SurfaceId> {
        DataDeviceState::pointer_focus(self)
    }

    fn pointer_position(&self) -> Point {
        DataDeviceState::pointer_position(self)
    }

    fn pointer_pressed(&self) -> bool {
        DataDeviceState::pointer_pressed(self)
    }

    fn surface_at(&self, point: Point) -> Option<SurfaceId> {
        DataDeviceState::surface_at(self, point)
    }

    fn surface_geometry(&self, surface: SurfaceId) -> Option<Rect> {
        DataDeviceState::surface_geometry(self, surface)
    }

    fn surface_x11_window(&self, surface: SurfaceId) -> Option<Window> {
        DataDeviceState::surface_x11_window(self, surface)
    }

    fn selection(&self, kind: SelectionKind) -> Option<SourceId> {
        DataDeviceState::selection(self, kind)
    }

    fn create_data_source(&mut self) -> Result<SourceId> {
        let client = self.bridge_client()?;
        DataDeviceState::create_data_source(self, client)
    }

    fn source_offer(&mut self, source: SourceId, mime_type: &str) -> Result<()> {
        DataDeviceState::source_offer(self, source, mime_type)
    }

    fn source_set_actions(&mut self, source: SourceId, actions: DndAction) -> Result<()> {
        DataDeviceState::source_set_actions(self, source, actions)
    }

    fn source_mime_types(&self, source: SourceId) -> Option<&[String]> {
        DataDeviceState::source_mime_types(self, source)
    }

    fn source_request_send(&mut self, source: SourceId, mime_type: &str, fd: OwnedFd) -> bool {
        DataDeviceState::source_request_send(self, source, mime_type, fd)
    }

    fn set_selection(&mut self, kind: SelectionKind, source: Option<SourceId>) -> Result<()> {
        self.set_selection_internal(kind, source)
    }

    fn destroy_source(&mut self, source: SourceId) {
        DataDeviceState::destroy_source(self, source)
    }

    fn offer_mime_types(&self, offer: OfferId) -> Option<&[String]> {
        DataDeviceState::offer_mime_types(self, offer)
    }

    fn offer_receive(&mut self, offer: OfferId, mime_type: &str, fd: OwnedFd) -> Result<()> {
        let client = self.bridge_client()?;
        DataDeviceState::offer_receive(self, client, offer, mime_type, fd)
    }

    fn offer_accept(&mut self, offer: OfferId, mime_type: Option<&str>) -> Result<()> {
        let client = self.bridge_client()?;
        DataDeviceState::offer_accept(self, client, offer, mime_type)
    }

    fn offer_set_actions(&mut self, offer: OfferId, actions: DndAction, preferred: DndAction) -> Result<()> {
        let client = self.bridge_client()?;
        DataDeviceState::offer_set_actions(self, client, offer, actions, preferred)
    }

    fn offer_finish(&mut self, offer: OfferId) -> Result<()> {
        let client = self.bridge_client()?;
        DataDeviceState::offer_finish(self, client, offer)
    }

    fn destroy_offer(&mut self, offer: OfferId) -> Result<()> {
        let client = self.bridge_client()?;
        DataDeviceState::destroy_offer(self, client, offer)
    }

    fn start_drag(&mut self, source: SourceId) -> Result<bool> {
        self.start_drag_internal(source)
    }

    fn drag_active(&self) -> bool {
        DataDeviceState::drag_active(self)
    }

    fn drag_focus(&self) -> Option<SurfaceId> {
        DataDeviceState::drag_focus(self)
    }

    fn drag_set_focus(&mut self, surface: Option<SurfaceId>, position: Point) {
        DataDeviceState::drag_set_focus(self, surface, position)
    }

    fn drag_motion(&mut self, position: Point) {
        DataDeviceState::drag_motion(self, position)
    }

    fn drag_drop(&mut self) {
        DataDeviceState::drag_drop(self)
    }

    fn cancel_drag(&mut self) {
        DataDeviceState::cancel_drag(self)
    }
}
