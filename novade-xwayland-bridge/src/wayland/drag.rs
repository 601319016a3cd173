//! The seat's drag-and-drop session.
//!
//! A drag follows the input device whose press started it: entering a
//! surface creates a fresh offer for that surface's client and leaving makes
//! it inert. Drags started by the compositor itself (for Xwayland) are moved
//! with [`DataDeviceState::drag_set_focus`] and [`DataDeviceState::drag_motion`]
//! instead, while the pointer keeps delivering events to its focus.

use tracing::{debug, info, warn};

use super::data_device::{DataDeviceState, OfferKind, SourceRole};
use super::{
    ClientId, DataDeviceError, DataDeviceEvent, OfferId, Point, SeatNotification, Serial, SourceId, SurfaceId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DragDevice {
    Pointer,
    Touch(i32),
    Tablet,
}

#[derive(Debug, Clone, Copy)]
struct DragFocus {
    surface: SurfaceId,
    client: ClientId,
    offer: Option<OfferId>,
}

#[derive(Debug)]
pub(super) struct DragSession {
    pub(super) source: Option<SourceId>,
    /// The client that started the drag.
    pub(super) client: ClientId,
    pub(super) device: DragDevice,
    external: bool,
    pub(super) position: Point,
    focus: Option<DragFocus>,
}

impl DragSession {
    pub(super) fn focus_offer(&self) -> Option<OfferId> {
        self.focus.and_then(|focus| focus.offer)
    }
}

impl DataDeviceState {
    /// `wl_data_device.start_drag`.
    ///
    /// `serial` must belong to a press that is still held on one of the
    /// client's surfaces. A drag with a stale serial, or one requested while
    /// another drag is in progress, is refused by cancelling its source and
    /// `Ok(false)` is returned.
    pub fn start_drag(
        &mut self,
        client: ClientId,
        source: Option<SourceId>,
        origin: SurfaceId,
        serial: Serial,
    ) -> Result<bool, DataDeviceError> {
        match self.surface_client(origin) {
            None => return Err(DataDeviceError::UnknownSurface(origin)),
            Some(owner) if owner != client => return Err(DataDeviceError::NotOwner(origin.to_string(), client)),
            Some(_) => {}
        }
        if let Some(source) = source {
            self.check_unused_source(source, Some(client))?;
        }
        if self.drag.is_some() {
            warn!(%client, "Refusing a drag while another one is in progress");
            self.refuse_drag_source(source);
            return Ok(false);
        }
        let Some(device) = self.device_for_serial(client, serial) else {
            debug!(%client, serial = serial.0, "Refusing a drag with a stale serial");
            self.refuse_drag_source(source);
            return Ok(false);
        };
        let position = match device {
            DragDevice::Pointer => self.pointer.position,
            DragDevice::Touch(id) => self.touch.get(&id).map(|point| point.position).unwrap_or_default(),
            DragDevice::Tablet => self.tablet.position,
        };
        self.begin_drag(DragSession { source, client, device, external: false, position, focus: None });
        let target = self.surface_at(position);
        self.set_drag_focus(target, position);
        Ok(true)
    }

    /// Starts a drag on the compositor's behalf. Its focus is moved with
    /// [`drag_set_focus`](Self::drag_set_focus) and it ends only through
    /// [`drag_drop`](Self::drag_drop) or [`cancel_drag`](Self::cancel_drag).
    pub fn start_drag_internal(&mut self, source: SourceId) -> Result<bool, DataDeviceError> {
        self.check_unused_source(source, None)?;
        let client = self.source_client(source).ok_or(DataDeviceError::UnknownSource(source))?;
        if self.drag.is_some() {
            warn!(%source, "Refusing an internal drag while another one is in progress");
            self.refuse_drag_source(Some(source));
            return Ok(false);
        }
        let position = self.pointer.position;
        self.begin_drag(DragSession {
            source: Some(source),
            client,
            device: DragDevice::Pointer,
            external: true,
            position,
            focus: None,
        });
        Ok(true)
    }

    fn refuse_drag_source(&mut self, source: Option<SourceId>) {
        if let Some(source) = source {
            if let Some(state) = self.sources.get_mut(&source) {
                state.role = SourceRole::Drag;
            }
            self.send_to_source(source, DataDeviceEvent::SourceCancelled { source });
        }
    }

    fn begin_drag(&mut self, session: DragSession) {
        if let Some(state) = session.source.and_then(|source| self.sources.get_mut(&source)) {
            state.role = SourceRole::Drag;
        }
        if session.device == DragDevice::Pointer && !session.external {
            self.pointer_leave();
        }
        info!(source = ?session.source, device = ?session.device, external = session.external, "Drag started");
        self.drag = Some(session);
        self.subscribers.notify(SeatNotification::DragStarted);
    }

    pub fn drag_active(&self) -> bool {
        self.drag.is_some()
    }

    pub fn drag_source(&self) -> Option<SourceId> {
        self.drag.as_ref().and_then(|drag| drag.source)
    }

    pub fn drag_focus(&self) -> Option<SurfaceId> {
        self.drag.as_ref().and_then(|drag| drag.focus).map(|focus| focus.surface)
    }

    /// Whether `device` moves the current drag.
    pub(super) fn drag_follows(&self, device: DragDevice) -> bool {
        self.drag.as_ref().is_some_and(|drag| !drag.external && drag.device == device)
    }

    pub(super) fn drag_device_motion(&mut self, position: Point) {
        let target = self.surface_at(position);
        self.set_drag_focus(target, position);
    }

    /// Moves a compositor-driven drag onto `surface` (or off every surface).
    pub fn drag_set_focus(&mut self, surface: Option<SurfaceId>, position: Point) {
        self.set_drag_focus(surface, position);
    }

    /// Moves a compositor-driven drag within its current focus.
    pub fn drag_motion(&mut self, position: Point) {
        let focus = self.drag_focus();
        self.set_drag_focus(focus, position);
    }

    pub(super) fn set_drag_focus(&mut self, surface: Option<SurfaceId>, position: Point) {
        let Some(drag) = self.drag.as_mut() else {
            return;
        };
        drag.position = position;
        let current = drag.focus;
        if current.map(|focus| focus.surface) == surface {
            if let Some(focus) = current {
                if let Some(rect) = self.surface_geometry(focus.surface) {
                    self.push(focus.client, DataDeviceEvent::Motion { position: rect.to_local(position) });
                }
            }
            return;
        }
        let (source, origin_client) = (drag.source, drag.client);
        drag.focus = None;
        self.leave_drag_focus(current);

        let Some(surface) = surface else {
            return;
        };
        let Some(state) = self.surfaces.get(&surface).copied() else {
            return;
        };
        // Drags without a source stay within their own client.
        if source.is_none() && state.client != origin_client {
            return;
        }
        let offer = source.map(|source| self.create_offer(state.client, source, OfferKind::Drag));
        let serial = self.next_serial(state.client);
        self.push(
            state.client,
            DataDeviceEvent::Enter { serial, surface, position: state.rect.to_local(position), offer },
        );
        if let Some(drag) = self.drag.as_mut() {
            drag.focus = Some(DragFocus { surface, client: state.client, offer });
        }
    }

    fn leave_drag_focus(&mut self, focus: Option<DragFocus>) {
        let Some(focus) = focus else {
            return;
        };
        self.push(focus.client, DataDeviceEvent::Leave);
        if let Some(state) = focus.offer.and_then(|offer| self.offers.get_mut(&offer)) {
            state.live = false;
        }
    }

    /// Ends the drag over its current focus.
    ///
    /// The drop is delivered when the focused offer has an accepted mime type
    /// and a selected action: the target gets `drop` then `leave` and its
    /// offer stays usable for `receive` and `finish`. Otherwise the target
    /// only gets `leave` and the source is cancelled. The source is told
    /// `dnd_drop_performed` either way.
    pub fn drag_drop(&mut self) {
        let Some(drag) = self.drag.take() else {
            return;
        };
        let delivered = match drag.focus {
            Some(focus) => {
                let accepted = match focus.offer {
                    Some(offer) => self.offers.get(&offer).is_some_and(|state| state.drop_allowed()),
                    None => true,
                };
                if accepted {
                    if let Some(state) = focus.offer.and_then(|offer| self.offers.get_mut(&offer)) {
                        state.dropped = true;
                    }
                    self.push(focus.client, DataDeviceEvent::Drop);
                    self.push(focus.client, DataDeviceEvent::Leave);
                } else {
                    self.leave_drag_focus(Some(focus));
                }
                accepted
            }
            None => false,
        };
        if let Some(source) = drag.source {
            self.send_to_source(source, DataDeviceEvent::SourceDndDropPerformed { source });
            if !delivered {
                self.send_to_source(source, DataDeviceEvent::SourceCancelled { source });
            }
        }
        info!(delivered, "Drag dropped");
        self.end_drag(&drag);
    }

    /// Aborts the drag, e.g. on Escape. The source is cancelled and the
    /// focused target gets `leave`.
    pub fn cancel_drag(&mut self) {
        let Some(drag) = self.drag.take() else {
            return;
        };
        self.leave_drag_focus(drag.focus);
        if let Some(source) = drag.source {
            self.send_to_source(source, DataDeviceEvent::SourceCancelled { source });
        }
        info!("Drag cancelled");
        self.end_drag(&drag);
    }

    pub(super) fn drag_source_destroyed(&mut self, source: SourceId) {
        if self.drag_source() != Some(source) {
            return;
        }
        if let Some(drag) = self.drag.take() {
            self.leave_drag_focus(drag.focus);
            info!(%source, "Drag source destroyed");
            self.end_drag(&drag);
        }
    }

    fn end_drag(&mut self, drag: &DragSession) {
        self.subscribers.notify(SeatNotification::DragEnded);
        if drag.device == DragDevice::Pointer && !drag.external {
            self.update_pointer_focus();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::action::DndAction;
    use crate::wayland::*;

    struct Fixture {
        state: DataDeviceState,
        origin: ClientId,
        target: ClientId,
        origin_surface: SurfaceId,
        target_surface: SurfaceId,
    }

    fn fixture() -> Fixture {
        let mut state = DataDeviceState::new();
        let origin = state.create_client();
        let target = state.create_client();
        let origin_surface = state.create_surface(origin, Rect::new(0, 0, 100, 100), None).unwrap();
        let target_surface = state.create_surface(target, Rect::new(100, 0, 100, 100), None).unwrap();
        Fixture { state, origin, target, origin_surface, target_surface }
    }

    impl Fixture {
        fn source(&mut self, actions: DndAction) -> SourceId {
            let source = self.state.create_data_source(self.origin).unwrap();
            self.state.source_offer(source, "text/plain").unwrap();
            self.state.source_set_actions(source, actions).unwrap();
            source
        }

        /// Presses on the origin surface and starts dragging `source`.
        fn start(&mut self, source: SourceId) -> bool {
            self.state.pointer_motion(Point::new(50.0, 50.0));
            let serial = self.state.pointer_button(true);
            self.state.start_drag(self.origin, Some(source), self.origin_surface, serial).unwrap()
        }

        /// Moves over the target surface and returns its offer.
        fn enter_target(&mut self) -> OfferId {
            self.state.take_events(self.target);
            self.state.pointer_motion(Point::new(150.0, 50.0));
            self.state
                .take_events(self.target)
                .into_iter()
                .find_map(|event| match event {
                    DataDeviceEvent::Enter { offer, .. } => offer,
                    _ => None,
                })
                .expect("target was not entered")
        }
    }

    fn count(events: &[DataDeviceEvent], matcher: impl Fn(&DataDeviceEvent) -> bool) -> usize {
        events.iter().filter(|event| matcher(event)).count()
    }

    #[test]
    fn test_drop_with_accept_delivers_drop_then_leave() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY | DndAction::MOVE);
        assert!(f.start(source));
        let offer = f.enter_target();
        f.state.offer_accept(f.target, offer, Some("text/plain")).unwrap();
        f.state.offer_set_actions(f.target, offer, DndAction::MOVE, DndAction::MOVE).unwrap();
        f.state.take_events(f.target);
        f.state.pointer_button(false);

        let target_events = f.state.take_events(f.target);
        assert!(matches!(target_events[0], DataDeviceEvent::Drop));
        assert!(matches!(target_events[1], DataDeviceEvent::Leave));
        assert!(f.state.offer_is_live(offer));
        assert!(!f.state.drag_active());

        f.state.offer_finish(f.target, offer).unwrap();
        let source_events = f.state.take_events(f.origin);
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceTarget { mime_type: Some(_), .. })), 1);
        assert_eq!(
            count(&source_events, |e| matches!(e, DataDeviceEvent::SourceAction { action, .. } if *action == DndAction::MOVE)),
            1
        );
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceDndDropPerformed { .. })), 1);
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceDndFinished { .. })), 1);
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceCancelled { .. })), 0);
    }

    #[test]
    fn test_drop_without_accept_cancels_source() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        assert!(f.start(source));
        let offer = f.enter_target();
        f.state.offer_set_actions(f.target, offer, DndAction::COPY, DndAction::COPY).unwrap();
        f.state.take_events(f.target);
        f.state.pointer_button(false);

        let target_events = f.state.take_events(f.target);
        assert_eq!(count(&target_events, |e| matches!(e, DataDeviceEvent::Drop)), 0);
        assert_eq!(count(&target_events, |e| matches!(e, DataDeviceEvent::Leave)), 1);
        let source_events = f.state.take_events(f.origin);
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceDndDropPerformed { .. })), 1);
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceCancelled { .. })), 1);
        assert_eq!(f.state.offer_finish(f.target, offer), Ok(()));
    }

    #[test]
    fn test_drop_without_common_action_cancels_source() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        assert!(f.start(source));
        let offer = f.enter_target();
        f.state.offer_accept(f.target, offer, Some("text/plain")).unwrap();
        f.state.offer_set_actions(f.target, offer, DndAction::MOVE, DndAction::MOVE).unwrap();
        f.state.pointer_button(false);
        let source_events = f.state.take_events(f.origin);
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceAction { .. })), 0);
        assert_eq!(count(&source_events, |e| matches!(e, DataDeviceEvent::SourceCancelled { .. })), 1);
    }

    #[test]
    fn test_second_drag_cancels_new_source() {
        let mut f = fixture();
        let first = f.source(DndAction::COPY);
        assert!(f.start(first));
        let second = f.source(DndAction::COPY);
        let serial = f.state.pointer_button(true);
        assert!(!f.state.start_drag(f.origin, Some(second), f.origin_surface, serial).unwrap());
        assert_eq!(f.state.drag_source(), Some(first));
        let events = f.state.take_events(f.origin);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::SourceCancelled { source } if *source == second)), 1);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::SourceCancelled { source } if *source == first)), 0);
    }

    #[test]
    fn test_stale_serial_is_refused() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        f.state.pointer_motion(Point::new(50.0, 50.0));
        let serial = f.state.pointer_button(true);
        f.state.pointer_button(false);
        f.state.take_events(f.origin);
        assert!(!f.state.start_drag(f.origin, Some(source), f.origin_surface, serial).unwrap());
        assert!(!f.state.drag_active());
        let events = f.state.take_events(f.origin);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::SourceCancelled { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::Enter { .. })), 0);
    }

    #[test]
    fn test_leaving_makes_offer_inert() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY | DndAction::MOVE);
        f.state.source_offer(source, "text/html").unwrap();
        assert!(f.start(source));
        let stale = f.enter_target();
        f.state.pointer_motion(Point::new(50.0, 50.0));
        assert!(!f.state.offer_is_live(stale));

        let live = f.enter_target();
        assert_ne!(live, stale);
        f.state.offer_accept(f.target, live, Some("text/plain")).unwrap();
        f.state.offer_set_actions(f.target, live, DndAction::COPY, DndAction::COPY).unwrap();
        f.state.take_events(f.origin);
        f.state.take_events(f.target);

        f.state.offer_accept(f.target, stale, Some("text/html")).unwrap();
        f.state.offer_set_actions(f.target, stale, DndAction::MOVE, DndAction::MOVE).unwrap();
        f.state.offer_finish(f.target, stale).unwrap();

        assert_eq!(f.state.offers[&live].accepted.as_deref(), Some("text/plain"));
        assert_eq!(f.state.offer_action(live), Some(DndAction::COPY));
        assert!(f.state.take_events(f.origin).is_empty());
        assert!(f.state.take_events(f.target).is_empty());
    }

    #[test]
    fn test_accept_is_forwarded_every_time() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        assert!(f.start(source));
        let offer = f.enter_target();
        f.state.take_events(f.origin);
        for _ in 0..3 {
            f.state.offer_accept(f.target, offer, Some("text/plain")).unwrap();
            f.state.offer_set_actions(f.target, offer, DndAction::COPY, DndAction::COPY).unwrap();
        }
        let events = f.state.take_events(f.origin);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::SourceTarget { .. })), 3);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::SourceAction { .. })), 1);
    }

    #[test]
    fn test_only_ask_can_change_after_drop() {
        let mut f = fixture();
        let source = f.source(DndAction::all());
        assert!(f.start(source));
        let offer = f.enter_target();
        f.state.offer_accept(f.target, offer, Some("text/plain")).unwrap();
        f.state.offer_set_actions(f.target, offer, DndAction::ASK, DndAction::ASK).unwrap();
        f.state.pointer_button(false);
        assert_eq!(f.state.offer_action(offer), Some(DndAction::ASK));

        f.state.offer_set_actions(f.target, offer, DndAction::MOVE, DndAction::MOVE).unwrap();
        assert_eq!(f.state.offer_action(offer), Some(DndAction::MOVE));
        f.state.offer_set_actions(f.target, offer, DndAction::COPY, DndAction::COPY).unwrap();
        assert_eq!(f.state.offer_action(offer), Some(DndAction::MOVE));
        f.state.offer_finish(f.target, offer).unwrap();
    }

    #[test]
    fn test_cancel_sends_cancelled_and_leave() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        assert!(f.start(source));
        f.enter_target();
        f.state.take_events(f.origin);
        f.state.cancel_drag();
        assert_eq!(count(&f.state.take_events(f.target), |e| matches!(e, DataDeviceEvent::Leave)), 1);
        let events = f.state.take_events(f.origin);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::SourceCancelled { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::SourceDndDropPerformed { .. })), 0);
    }

    #[test]
    fn test_destroyed_source_ends_drag_without_drop() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        assert!(f.start(source));
        let offer = f.enter_target();
        f.state.offer_accept(f.target, offer, Some("text/plain")).unwrap();
        f.state.destroy_source(source);
        assert!(!f.state.drag_active());
        f.state.pointer_button(false);
        let events = f.state.take_events(f.target);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::Leave)), 1);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::Drop)), 0);
    }

    #[test]
    fn test_pointer_is_suppressed_during_drag_and_reenters_after() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        assert!(f.start(source));
        f.enter_target();
        f.state.pointer_motion(Point::new(160.0, 50.0));
        let events = f.state.take_events(f.target);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::PointerMotion { .. })), 0);
        f.state.pointer_button(false);
        let events = f.state.take_events(f.target);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::PointerEnter { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, DataDeviceEvent::PointerButton { .. })), 0);
    }

    #[test]
    fn test_touch_drag_drops_on_up() {
        let mut f = fixture();
        let source = f.source(DndAction::COPY);
        let serial = f.state.touch_down(0, Point::new(50.0, 50.0));
        assert!(f.state.start_drag(f.origin, Some(source), f.origin_surface, serial).unwrap());
        f.state.touch_motion(0, Point::new(150.0, 50.0));
        let offer = f
            .state
            .take_events(f.target)
            .into_iter()
            .find_map(|event| match event {
                DataDeviceEvent::Enter { offer, position, .. } => {
                    assert_eq!(position, Point::new(50.0, 50.0));
                    offer
                }
                _ => None,
            })
            .unwrap();
        f.state.offer_accept(f.target, offer, Some("text/plain")).unwrap();
        f.state.offer_set_actions(f.target, offer, DndAction::COPY, DndAction::COPY).unwrap();
        f.state.touch_up(0);
        assert!(f.state.take_events(f.target).iter().any(|e| matches!(e, DataDeviceEvent::Drop)));
    }

    #[test]
    fn test_sourceless_drag_stays_in_client() {
        let mut f = fixture();
        f.state.pointer_motion(Point::new(50.0, 50.0));
        let serial = f.state.pointer_button(true);
        assert!(f.state.start_drag(f.origin, None, f.origin_surface, serial).unwrap());
        f.state.pointer_motion(Point::new(150.0, 50.0));
        assert_eq!(count(&f.state.take_events(f.target), |e| matches!(e, DataDeviceEvent::Enter { .. })), 0);
        assert_eq!(f.state.drag_focus(), None);
        f.state.pointer_motion(Point::new(40.0, 50.0));
        f.state.take_events(f.origin);
        f.state.pointer_button(false);
        assert!(f.state.take_events(f.origin).iter().any(|e| matches!(e, DataDeviceEvent::Drop)));
    }
}
