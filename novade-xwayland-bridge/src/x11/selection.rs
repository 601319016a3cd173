//! ICCCM selection ownership and conversion.
//!
//! [`SelectionOwner`] owns one selection on behalf of data that lives
//! elsewhere (a Wayland data source). It answers `TARGETS` and `TIMESTAMP`
//! itself and asks a [`SelectionHandler`] for everything else, lazily, only
//! when a peer actually converts. Payloads too large for one property are
//! handed to the `INCR` writer.
//!
//! [`SelectionRequestor`] converts a selection owned by an X client into a
//! property on our own window. It never waits: the caller feeds it events and
//! gets [`RequestEvent::Done`] once the data, or the refusal, has arrived.
//!
//! [`SelectionWatcher`] reports XFixes owner changes for one selection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::transport::{
    read_property, write_property, IncrProgress, IncrReader, IncrWriter, ReadOutcome, SelectionData, WriteOutcome,
};
use super::{
    predefined, u32s_to_bytes, Atom, EventMask, SelectionNotify, SelectionRequest, Timestamp, Window, XConnection,
    XEvent, CURRENT_TIME, NONE,
};
use crate::atoms::Atoms;
use crate::error::{TransferError, XError};
use crate::transfer::TransferFuture;

/// How a handler answers a conversion request.
#[derive(Debug)]
pub enum Render {
    Data(SelectionData),
    /// The bytes arrive later; the reply is sent once the future resolves.
    Deferred { future: TransferFuture, type_: Atom, format: u8 },
    /// Target not available.
    Refuse,
}

/// Supplies the data behind an owned selection.
pub trait SelectionHandler {
    /// Whether `request` may be answered at all.
    fn allow(&mut self, _request: &SelectionRequest) -> bool {
        true
    }

    fn render(&mut self, target: Atom) -> Render;
}

/// What an event meant for the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerEvent {
    Ignored,
    Handled,
    /// Another client took the selection.
    Lost,
}

#[derive(Debug)]
struct Ownership {
    time: Timestamp,
    targets: Vec<Atom>,
}

#[derive(Debug)]
struct DeferredReply {
    request: SelectionRequest,
    property: Atom,
    future: TransferFuture,
    type_: Atom,
    format: u8,
    deadline: Instant,
}

/// Owner of one X selection.
#[derive(Debug)]
pub struct SelectionOwner {
    atoms: Arc<Atoms>,
    window: Window,
    selection: Atom,
    chunk_size: usize,
    timeout: Duration,
    owned: Option<Ownership>,
    deferred: Vec<DeferredReply>,
    writers: Vec<IncrWriter>,
}

impl SelectionOwner {
    /// `window` is the bridge-owned window that will hold the selection.
    pub fn new(atoms: Arc<Atoms>, window: Window, selection: Atom, chunk_size: usize, timeout: Duration) -> Self {
        Self {
            atoms,
            window,
            selection,
            chunk_size,
            timeout,
            owned: None,
            deferred: Vec::new(),
            writers: Vec::new(),
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn selection(&self) -> Atom {
        self.selection
    }

    pub fn is_owner(&self) -> bool {
        self.owned.is_some()
    }

    /// Targets advertised in `TARGETS`, without the protocol targets.
    pub fn targets(&self) -> &[Atom] {
        self.owned.as_ref().map(|o| o.targets.as_slice()).unwrap_or(&[])
    }

    /// Number of conversions still in flight.
    pub fn pending_transfers(&self) -> usize {
        self.deferred.len() + self.writers.len()
    }

    /// Takes ownership and advertises `targets`. Returns whether the server
    /// actually made us the owner.
    pub fn claim(&mut self, conn: &dyn XConnection, targets: Vec<Atom>, time: Timestamp) -> Result<bool, XError> {
        conn.set_selection_owner(self.window, self.selection, time)?;
        if conn.get_selection_owner(self.selection)? != self.window {
            warn!(selection = self.selection, "Selection claim was not honoured");
            self.owned = None;
            return Ok(false);
        }
        debug!(selection = self.selection, window = self.window, targets = targets.len(), "Claimed selection");
        self.owned = Some(Ownership { time, targets });
        Ok(true)
    }

    /// Records the server time of a claim made with `CURRENT_TIME`, as
    /// reported by the owner-change notification for our own window.
    pub fn confirm_time(&mut self, time: Timestamp) {
        if let Some(ownership) = self.owned.as_mut().filter(|o| o.time == CURRENT_TIME) {
            trace!(selection = self.selection, time, "Selection acquisition time confirmed");
            ownership.time = time;
        }
    }

    /// Gives the selection up, unless someone else already owns it.
    pub fn release(&mut self, conn: &dyn XConnection, time: Timestamp) -> Result<(), XError> {
        if self.owned.take().is_none() {
            return Ok(());
        }
        if conn.get_selection_owner(self.selection)? == self.window {
            conn.set_selection_owner(NONE, self.selection, time)?;
            debug!(selection = self.selection, "Released selection");
        } else {
            trace!(selection = self.selection, "Selection already taken over; nothing to release");
        }
        Ok(())
    }

    pub fn handle_event(
        &mut self,
        conn: &dyn XConnection,
        event: &XEvent,
        handler: &mut dyn SelectionHandler,
    ) -> Result<OwnerEvent, XError> {
        match event {
            XEvent::SelectionRequest(request)
                if request.owner == self.window && request.selection == self.selection =>
            {
                self.handle_request(conn, request, handler)?;
                Ok(OwnerEvent::Handled)
            }
            XEvent::SelectionClear { owner, selection, .. } if *owner == self.window && *selection == self.selection => {
                if self.owned.take().is_some() {
                    debug!(selection = self.selection, "Lost selection ownership");
                    Ok(OwnerEvent::Lost)
                } else {
                    Ok(OwnerEvent::Handled)
                }
            }
            XEvent::PropertyNotify { .. } | XEvent::DestroyNotify { .. } => self.route_to_writers(conn, event),
            _ => Ok(OwnerEvent::Ignored),
        }
    }

    fn route_to_writers(&mut self, conn: &dyn XConnection, event: &XEvent) -> Result<OwnerEvent, XError> {
        let mut outcome = OwnerEvent::Ignored;
        let mut index = 0;
        while index < self.writers.len() {
            match self.writers[index].handle_event(conn, event) {
                Ok(IncrProgress::Ignored) => index += 1,
                Ok(IncrProgress::Progress) => {
                    outcome = OwnerEvent::Handled;
                    index += 1;
                }
                Ok(IncrProgress::Done(())) => {
                    outcome = OwnerEvent::Handled;
                    self.writers.swap_remove(index);
                }
                Err(TransferError::X(e)) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(selection = self.selection, error = %e, "Abandoning INCR write");
                    outcome = OwnerEvent::Handled;
                    self.writers.swap_remove(index);
                }
            }
        }
        Ok(outcome)
    }

    fn handle_request(
        &mut self,
        conn: &dyn XConnection,
        request: &SelectionRequest,
        handler: &mut dyn SelectionHandler,
    ) -> Result<(), XError> {
        // Obsolete clients pass None and expect the target name to be used.
        let property = if request.property == NONE { request.target } else { request.property };
        let Some(ownership) = &self.owned else {
            return self.notify(conn, request, NONE);
        };
        if !handler.allow(request) {
            debug!(requestor = request.requestor, target = request.target, "Refusing selection request");
            return self.notify(conn, request, NONE);
        }

        let atoms = Arc::clone(&self.atoms);
        if request.target == atoms.targets {
            let mut list = vec![atoms.targets, atoms.timestamp];
            list.extend(ownership.targets.iter().copied().filter(|t| !atoms.is_meta_target(*t)));
            let data = SelectionData::new(predefined::ATOM, 32, u32s_to_bytes(&list));
            self.reply(conn, request, property, data)
        } else if request.target == atoms.timestamp {
            let data = SelectionData::new(predefined::INTEGER, 32, ownership.time.to_ne_bytes().to_vec());
            self.reply(conn, request, property, data)
        } else if request.target == atoms.multiple {
            debug!(requestor = request.requestor, "MULTIPLE conversions are not supported");
            self.notify(conn, request, NONE)
        } else {
            match handler.render(request.target) {
                Render::Data(data) => self.reply(conn, request, property, data),
                Render::Deferred { future, type_, format } => {
                    trace!(requestor = request.requestor, target = request.target, "Deferring selection reply");
                    self.deferred.push(DeferredReply {
                        request: *request,
                        property,
                        future,
                        type_,
                        format,
                        deadline: Instant::now() + self.timeout,
                    });
                    Ok(())
                }
                Render::Refuse => self.notify(conn, request, NONE),
            }
        }
    }

    fn reply(
        &mut self,
        conn: &dyn XConnection,
        request: &SelectionRequest,
        property: Atom,
        data: SelectionData,
    ) -> Result<(), XError> {
        let len = data.bytes.len();
        match write_property(conn, &self.atoms, request.requestor, property, data, self.chunk_size, self.timeout) {
            Ok(WriteOutcome::Complete) => {
                trace!(requestor = request.requestor, target = request.target, bytes = len, "Answered conversion");
                self.notify(conn, request, property)
            }
            Ok(WriteOutcome::Incremental(writer)) => {
                self.writers.push(writer);
                self.notify(conn, request, property)
            }
            Err(TransferError::X(e)) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(requestor = request.requestor, target = request.target, error = %e, "Cannot write selection data");
                self.notify(conn, request, NONE)
            }
        }
    }

    fn notify(&self, conn: &dyn XConnection, request: &SelectionRequest, property: Atom) -> Result<(), XError> {
        let notify = SelectionNotify {
            time: request.time,
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property,
        };
        match conn.send_selection_notify(&notify) {
            // The requestor may be gone already.
            Err(XError::BadWindow(window)) => {
                debug!(window, "Requestor vanished before the reply");
                Ok(())
            }
            other => other,
        }
    }

    /// Completes deferred replies whose data has arrived and drops stalled transfers.
    pub fn poll(&mut self, conn: &dyn XConnection, now: Instant) -> Result<(), XError> {
        let mut index = 0;
        while index < self.deferred.len() {
            let entry = &mut self.deferred[index];
            if let Some(bytes) = entry.future.try_take() {
                let entry = self.deferred.swap_remove(index);
                let data = SelectionData::new(entry.type_, entry.format, bytes);
                self.reply(conn, &entry.request, entry.property, data)?;
            } else if now >= entry.deadline {
                let entry = self.deferred.swap_remove(index);
                warn!(requestor = entry.request.requestor, target = entry.request.target, "Selection data timed out");
                self.notify(conn, &entry.request, NONE)?;
            } else {
                index += 1;
            }
        }

        self.writers.retain(|writer| {
            let expired = writer.is_expired(now);
            if expired {
                warn!(
                    requestor = writer.requestor(),
                    written = writer.bytes_written(),
                    "INCR write stalled; abandoning"
                );
            }
            !expired
        });
        Ok(())
    }
}

#[derive(Debug)]
enum RequestState {
    Idle,
    Converting { target: Atom, deadline: Instant },
    Reading { target: Atom, reader: IncrReader },
}

/// What an event meant for the requestor.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestEvent {
    Ignored,
    Pending,
    /// The conversion finished; refused or failed conversions carry empty data.
    Done { target: Atom, data: SelectionData },
}

/// Converts one selection into a property on a bridge-owned window.
///
/// One conversion is in flight at a time; callers queue the rest.
#[derive(Debug)]
pub struct SelectionRequestor {
    atoms: Arc<Atoms>,
    window: Window,
    selection: Atom,
    property: Atom,
    timeout: Duration,
    state: RequestState,
}

impl SelectionRequestor {
    pub fn new(
        conn: &dyn XConnection,
        atoms: Arc<Atoms>,
        window: Window,
        selection: Atom,
        timeout: Duration,
    ) -> Result<Self, XError> {
        conn.select_input(window, EventMask::PROPERTY_CHANGE)?;
        let property = atoms.wl_selection;
        Ok(Self { atoms, window, selection, property, timeout, state: RequestState::Idle })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.state, RequestState::Idle)
    }

    /// Target of the conversion in flight.
    pub fn current_target(&self) -> Option<Atom> {
        match &self.state {
            RequestState::Idle => None,
            RequestState::Converting { target, .. } | RequestState::Reading { target, .. } => Some(*target),
        }
    }

    /// Asks the owner to convert the selection to `target`. Any conversion
    /// already in flight is abandoned.
    pub fn request(&mut self, conn: &dyn XConnection, target: Atom, time: Timestamp) -> Result<(), XError> {
        if let Some(previous) = self.current_target() {
            debug!(selection = self.selection, target = previous, "Abandoning previous conversion");
        }
        conn.delete_property(self.window, self.property)?;
        conn.convert_selection(self.window, self.selection, target, self.property, time)?;
        trace!(selection = self.selection, target, "Requested conversion");
        self.state = RequestState::Converting { target, deadline: Instant::now() + self.timeout };
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.state = RequestState::Idle;
    }

    pub fn handle_event(&mut self, conn: &dyn XConnection, event: &XEvent) -> Result<RequestEvent, XError> {
        match (&mut self.state, event) {
            (RequestState::Converting { target, .. }, XEvent::SelectionNotify(notify))
                if notify.requestor == self.window && notify.selection == self.selection && notify.target == *target =>
            {
                let target = *target;
                if notify.property == NONE {
                    debug!(selection = self.selection, target, "Conversion refused");
                    self.state = RequestState::Idle;
                    return Ok(RequestEvent::Done { target, data: SelectionData::empty() });
                }
                match read_property(conn, &self.atoms, self.window, notify.property, self.timeout) {
                    Ok(ReadOutcome::Complete(data)) => {
                        self.state = RequestState::Idle;
                        Ok(RequestEvent::Done { target, data })
                    }
                    Ok(ReadOutcome::Incremental(reader)) => {
                        self.state = RequestState::Reading { target, reader };
                        Ok(RequestEvent::Pending)
                    }
                    Err(e) => self.abandon(target, e),
                }
            }
            (RequestState::Reading { target, reader }, XEvent::PropertyNotify { .. }) => {
                let target = *target;
                match reader.handle_event(conn, event) {
                    Ok(IncrProgress::Ignored) => Ok(RequestEvent::Ignored),
                    Ok(IncrProgress::Progress) => Ok(RequestEvent::Pending),
                    Ok(IncrProgress::Done(data)) => {
                        self.state = RequestState::Idle;
                        Ok(RequestEvent::Done { target, data })
                    }
                    Err(e) => self.abandon(target, e),
                }
            }
            _ => Ok(RequestEvent::Ignored),
        }
    }

    fn abandon(&mut self, target: Atom, error: TransferError) -> Result<RequestEvent, XError> {
        self.state = RequestState::Idle;
        if let TransferError::X(e) = &error {
            if e.is_fatal() {
                return Err(e.clone());
            }
        }
        warn!(selection = self.selection, target, error = %error, "Abandoning selection transfer");
        Ok(RequestEvent::Done { target, data: SelectionData::empty() })
    }

    /// Gives up on a conversion whose owner stopped answering.
    pub fn poll(&mut self, now: Instant) -> RequestEvent {
        let expired = match &self.state {
            RequestState::Idle => None,
            RequestState::Converting { target, deadline } => (now >= *deadline).then_some(*target),
            RequestState::Reading { target, reader } => reader.is_expired(now).then_some(*target),
        };
        match expired {
            Some(target) => {
                warn!(selection = self.selection, target, error = %TransferError::Timeout, "Conversion timed out");
                self.state = RequestState::Idle;
                RequestEvent::Done { target, data: SelectionData::empty() }
            }
            None => RequestEvent::Ignored,
        }
    }
}

/// A change of owner seen through XFixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerChange {
    pub owner: Window,
    pub timestamp: Timestamp,
}

/// Watches one selection for owner changes.
#[derive(Debug)]
pub struct SelectionWatcher {
    window: Window,
    selection: Atom,
}

impl SelectionWatcher {
    pub fn new(conn: &dyn XConnection, window: Window, selection: Atom) -> Result<Self, XError> {
        conn.select_selection_input(window, selection)?;
        Ok(Self { window, selection })
    }

    pub fn selection(&self) -> Atom {
        self.selection
    }

    pub fn handle_event(&self, event: &XEvent) -> Option<OwnerChange> {
        match event {
            XEvent::SelectionOwnerChanged { window, owner, selection, timestamp }
                if *window == self.window && *selection == self.selection =>
            {
                Some(OwnerChange { owner: *owner, timestamp: *timestamp })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x11::memory::{MemoryConnection, MemoryDisplay};
    use crate::x11::{bytes_to_u32s, Geometry, CURRENT_TIME};
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct StaticHandler {
        payload: Vec<u8>,
        rendered: Vec<Atom>,
        deny: bool,
        defer: Option<TransferFuture>,
    }

    impl SelectionHandler for StaticHandler {
        fn allow(&mut self, _request: &SelectionRequest) -> bool {
            !self.deny
        }

        fn render(&mut self, target: Atom) -> Render {
            self.rendered.push(target);
            if let Some(future) = self.defer.take() {
                return Render::Deferred { future, type_: target, format: 8 };
            }
            if self.payload.is_empty() {
                Render::Refuse
            } else {
                Render::Data(SelectionData::new(target, 8, self.payload.clone()))
            }
        }
    }

    struct Fixture {
        display: MemoryDisplay,
        bridge: MemoryConnection,
        client: MemoryConnection,
        atoms: Arc<Atoms>,
        owner: SelectionOwner,
        requestor: SelectionRequestor,
    }

    fn fixture(chunk_size: usize) -> Fixture {
        let display = MemoryDisplay::new(640, 480);
        let bridge = display.connect();
        let client = display.connect();
        let atoms = Atoms::intern(&bridge).unwrap();
        let owner_window = bridge.create_window(bridge.root(), Geometry::new(0, 0, 1, 1)).unwrap();
        let client_window = client.create_window(client.root(), Geometry::new(0, 0, 1, 1)).unwrap();
        let owner = SelectionOwner::new(atoms.clone(), owner_window, atoms.clipboard, chunk_size, TIMEOUT);
        let requestor =
            SelectionRequestor::new(&client, atoms.clone(), client_window, atoms.clipboard, TIMEOUT).unwrap();
        Fixture { display, bridge, client, atoms, owner, requestor }
    }

    fn convert(f: &mut Fixture, handler: &mut StaticHandler, target: Atom) -> SelectionData {
        f.requestor.request(&f.client, target, CURRENT_TIME).unwrap();
        for _ in 0..10_000 {
            while let Some(event) = f.bridge.poll_for_event().unwrap() {
                f.owner.handle_event(&f.bridge, &event, handler).unwrap();
            }
            f.owner.poll(&f.bridge, Instant::now()).unwrap();
            while let Some(event) = f.client.poll_for_event().unwrap() {
                if let RequestEvent::Done { data, .. } = f.requestor.handle_event(&f.client, &event).unwrap() {
                    return data;
                }
            }
        }
        panic!("conversion did not finish");
    }

    #[test]
    fn test_targets_lists_protocol_targets_first() {
        let mut f = fixture(1024);
        let mut handler = StaticHandler::default();
        let html = f.bridge.intern_atom("text/html").unwrap();
        assert!(f.owner.claim(&f.bridge, vec![html, f.atoms.utf8_string], 42).unwrap());
        let targets = f.atoms.targets;
        let data = convert(&mut f, &mut handler, targets);
        assert_eq!(
            bytes_to_u32s(&data.bytes),
            vec![f.atoms.targets, f.atoms.timestamp, html, f.atoms.utf8_string]
        );
        assert!(handler.rendered.is_empty());
    }

    #[test]
    fn test_timestamp_reports_acquisition_time() {
        let mut f = fixture(1024);
        let mut handler = StaticHandler::default();
        f.owner.claim(&f.bridge, vec![], 1234).unwrap();
        let timestamp = f.atoms.timestamp;
        let data = convert(&mut f, &mut handler, timestamp);
        assert_eq!(data.type_, predefined::INTEGER);
        assert_eq!(bytes_to_u32s(&data.bytes), vec![1234]);
    }

    #[test]
    fn test_timestamp_of_current_time_claim_uses_server_time() {
        let mut f = fixture(1024);
        let mut handler = StaticHandler::default();
        f.owner.claim(&f.bridge, vec![], CURRENT_TIME).unwrap();
        f.owner.confirm_time(5678);
        // Only a CURRENT_TIME claim is rewritten.
        f.owner.confirm_time(9999);
        let timestamp = f.atoms.timestamp;
        let data = convert(&mut f, &mut handler, timestamp);
        assert_eq!(bytes_to_u32s(&data.bytes), vec![5678]);
    }

    #[test]
    fn test_data_is_rendered_lazily_and_chunked() {
        let mut f = fixture(256);
        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        let mut handler = StaticHandler { payload: payload.clone(), ..Default::default() };
        f.owner.claim(&f.bridge, vec![f.atoms.utf8_string], CURRENT_TIME).unwrap();
        assert!(handler.rendered.is_empty());
        let utf8 = f.atoms.utf8_string;
        let data = convert(&mut f, &mut handler, utf8);
        assert_eq!(data.bytes, payload);
        assert_eq!(handler.rendered, vec![f.atoms.utf8_string]);
    }

    #[test]
    fn test_refusals_read_as_empty() {
        let mut f = fixture(1024);
        let mut handler = StaticHandler { payload: b"secret".to_vec(), deny: true, ..Default::default() };
        f.owner.claim(&f.bridge, vec![f.atoms.utf8_string], CURRENT_TIME).unwrap();
        let utf8 = f.atoms.utf8_string;
        assert!(convert(&mut f, &mut handler, utf8).is_empty());

        handler.deny = false;
        let multiple = f.atoms.multiple;
        assert!(convert(&mut f, &mut handler, multiple).is_empty());
        assert!(handler.rendered.is_empty());
    }

    #[test]
    fn test_deferred_render_replies_when_data_arrives() {
        let mut f = fixture(1024);
        let (tx, future) = TransferFuture::channel();
        let mut handler = StaticHandler { defer: Some(future), ..Default::default() };
        f.owner.claim(&f.bridge, vec![f.atoms.utf8_string], CURRENT_TIME).unwrap();
        f.requestor.request(&f.client, f.atoms.utf8_string, CURRENT_TIME).unwrap();
        while let Some(event) = f.bridge.poll_for_event().unwrap() {
            f.owner.handle_event(&f.bridge, &event, &mut handler).unwrap();
        }
        assert_eq!(f.owner.pending_transfers(), 1);
        assert_eq!(f.client.pending_events(), 0);

        tx.send(b"foo".to_vec()).unwrap();
        f.owner.poll(&f.bridge, Instant::now()).unwrap();
        let done = std::iter::from_fn(|| f.client.poll_for_event().unwrap())
            .map(|event| f.requestor.handle_event(&f.client, &event).unwrap())
            .find(|event| matches!(event, RequestEvent::Done { .. }));
        assert_eq!(
            done,
            Some(RequestEvent::Done {
                target: f.atoms.utf8_string,
                data: SelectionData::new(f.atoms.utf8_string, 8, b"foo".to_vec())
            })
        );
    }

    #[test]
    fn test_release_does_not_disturb_newer_owner() {
        let mut f = fixture(1024);
        let mut handler = StaticHandler::default();
        f.owner.claim(&f.bridge, vec![], CURRENT_TIME).unwrap();
        let other = f.client.create_window(f.client.root(), Geometry::new(0, 0, 1, 1)).unwrap();
        f.client.set_selection_owner(other, f.atoms.clipboard, CURRENT_TIME).unwrap();

        let lost = std::iter::from_fn(|| f.bridge.poll_for_event().unwrap())
            .map(|event| f.owner.handle_event(&f.bridge, &event, &mut handler).unwrap())
            .any(|outcome| outcome == OwnerEvent::Lost);
        assert!(lost);
        f.owner.release(&f.bridge, CURRENT_TIME).unwrap();
        assert_eq!(f.bridge.get_selection_owner(f.atoms.clipboard).unwrap(), other);
    }

    #[test]
    fn test_requestor_times_out_without_owner_reply() {
        let mut f = fixture(1024);
        // Owned, but nobody ever handles the request.
        f.owner.claim(&f.bridge, vec![f.atoms.utf8_string], CURRENT_TIME).unwrap();
        f.requestor.request(&f.client, f.atoms.utf8_string, CURRENT_TIME).unwrap();
        assert_eq!(f.requestor.poll(Instant::now()), RequestEvent::Ignored);
        let late = Instant::now() + TIMEOUT + Duration::from_millis(1);
        assert_eq!(
            f.requestor.poll(late),
            RequestEvent::Done { target: f.atoms.utf8_string, data: SelectionData::empty() }
        );
        assert!(!f.requestor.is_busy());
        assert!(f.display.window_exists(f.owner.window()));
    }

    #[test]
    fn test_watcher_reports_owner_changes() {
        let f = fixture(1024);
        let watch_window = f.bridge.create_window(f.bridge.root(), Geometry::new(0, 0, 1, 1)).unwrap();
        let watcher = SelectionWatcher::new(&f.bridge, watch_window, f.atoms.clipboard).unwrap();
        let other = f.client.create_window(f.client.root(), Geometry::new(0, 0, 1, 1)).unwrap();
        f.client.set_selection_owner(other, f.atoms.clipboard, 77).unwrap();
        let change = std::iter::from_fn(|| f.bridge.poll_for_event().unwrap()).find_map(|e| watcher.handle_event(&e));
        assert_eq!(change, Some(OwnerChange { owner: other, timestamp: 77 }));
    }
}
