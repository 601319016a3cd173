//! Shared fixtures for the bridge integration tests: an in-memory X display,
//! a seat model with an Xwayland client, the bridge between them, and small
//! X and Wayland test clients.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use novade_core::config::DataBridgeConfig;
use novade_xwayland_bridge::atoms::Atoms;
use novade_xwayland_bridge::transfer::{pipe, spawn_pipe_reader};
use novade_xwayland_bridge::wayland::{
    ClientId, DataDeviceEvent, DataDeviceState, OfferId, Point, Rect, SelectionKind, Serial, SourceId, SurfaceId,
};
use novade_xwayland_bridge::x11::memory::{MemoryConnection, MemoryDisplay};
use novade_xwayland_bridge::x11::selection::{
    Render, RequestEvent, SelectionHandler, SelectionOwner, SelectionRequestor,
};
use novade_xwayland_bridge::x11::transport::SelectionData;
use novade_xwayland_bridge::x11::xdnd::set_xdnd_aware;
use novade_xwayland_bridge::x11::{Atom, Geometry, Window, XConnection, XEvent, CURRENT_TIME};
use novade_xwayland_bridge::DataBridge;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(chunk_size: usize) -> DataBridgeConfig {
    DataBridgeConfig { incr_chunk_size: chunk_size, ..DataBridgeConfig::default() }
}

/// The compositor side: seat model, Xwayland client and the bridge.
pub struct Harness {
    pub display: MemoryDisplay,
    pub wl: DataDeviceState,
    pub xwayland: ClientId,
    pub bridge: DataBridge<MemoryConnection>,
}

impl Harness {
    pub fn new(config: &DataBridgeConfig) -> Self {
        init_tracing();
        let display = MemoryDisplay::new(1000, 1000);
        let mut wl = DataDeviceState::new();
        let xwayland = wl.create_xwayland_client();
        let bridge = DataBridge::new(display.connect(), &mut wl, config).unwrap();
        Self { display, wl, xwayland, bridge }
    }

    pub fn dispatch(&mut self) {
        self.bridge.dispatch(&mut self.wl).unwrap();
    }

    pub fn atoms(&self) -> Arc<Atoms> {
        Arc::clone(self.bridge.atoms())
    }

    /// Maps an X window and its Xwayland surface at `rect`.
    pub fn x_client(&mut self, rect: Rect) -> XClient {
        let conn = self.display.connect();
        let atoms = Atoms::intern(&conn).unwrap();
        let geometry = Geometry::new(rect.x as i16, rect.y as i16, rect.width as u16, rect.height as u16);
        let window = conn.create_window(conn.root(), geometry).unwrap();
        conn.map_window(window).unwrap();
        let surface = self.wl.create_surface(self.xwayland, rect, Some(window)).unwrap();
        XClient { conn, atoms, window, surface }
    }

    pub fn wayland_client(&mut self, rect: Rect) -> WaylandClient {
        let id = self.wl.create_client();
        let surface = self.wl.create_surface(id, rect, None).unwrap();
        WaylandClient { id, surface, events: Vec::new(), payloads: HashMap::new() }
    }

    /// Events queued for the Xwayland client that the bridge has not consumed.
    pub fn xwayland_events(&mut self) -> Vec<DataDeviceEvent> {
        self.wl.take_events(self.xwayland)
    }

    /// Dispatches until `step` yields something or the timeout runs out.
    pub fn wait_for<T>(&mut self, what: &str, mut step: impl FnMut(&mut Self) -> Option<T>) -> T {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            self.dispatch();
            if let Some(value) = step(self) {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Serves fixed payloads per target.
#[derive(Debug, Default)]
pub struct Payloads {
    pub data: Vec<(Atom, Vec<u8>)>,
    pub rendered: Vec<Atom>,
}

impl SelectionHandler for Payloads {
    fn render(&mut self, target: Atom) -> Render {
        self.rendered.push(target);
        match self.data.iter().find(|(atom, _)| *atom == target) {
            Some((_, bytes)) => Render::Data(SelectionData::new(target, 8, bytes.clone())),
            None => Render::Refuse,
        }
    }
}

/// An X client with one mapped top-level window shown by an Xwayland surface.
pub struct XClient {
    pub conn: MemoryConnection,
    pub atoms: Arc<Atoms>,
    pub window: Window,
    pub surface: SurfaceId,
}

impl XClient {
    pub fn drain(&self) -> Vec<XEvent> {
        std::iter::from_fn(|| self.conn.poll_for_event().unwrap()).collect()
    }

    pub fn atom(&self, name: &str) -> Atom {
        self.conn.intern_atom(name).unwrap()
    }

    pub fn make_xdnd_aware(&self) {
        set_xdnd_aware(&self.conn, &self.atoms, self.window).unwrap();
    }

    /// Takes `selection` with `targets`, serving `data` on request.
    pub fn own(&self, selection: Atom, data: Vec<(Atom, Vec<u8>)>, chunk_size: usize) -> XOwner {
        let mut owner = SelectionOwner::new(Arc::clone(&self.atoms), self.window, selection, chunk_size, TIMEOUT);
        let targets = data.iter().map(|(atom, _)| *atom).collect();
        assert!(owner.claim(&self.conn, targets, CURRENT_TIME).unwrap());
        XOwner { owner, handler: Payloads { data, rendered: Vec::new() } }
    }

    /// Feeds pending events to `owner`.
    pub fn serve(&self, owner: &mut XOwner) {
        for event in self.drain() {
            owner.owner.handle_event(&self.conn, &event, &mut owner.handler).unwrap();
        }
        owner.owner.poll(&self.conn, Instant::now()).unwrap();
    }

    /// Converts `selection` to `target` the way an X application pasting
    /// would. `serve` runs on every iteration so Wayland sources can answer.
    pub fn read(
        &self,
        h: &mut Harness,
        selection: Atom,
        target: Atom,
        mut serve: impl FnMut(&mut Harness),
    ) -> SelectionData {
        let mut requestor =
            SelectionRequestor::new(&self.conn, Arc::clone(&self.atoms), self.window, selection, TIMEOUT).unwrap();
        requestor.request(&self.conn, target, CURRENT_TIME).unwrap();
        h.wait_for("an X conversion", |h| {
            serve(h);
            for event in self.drain() {
                if let RequestEvent::Done { data, .. } = requestor.handle_event(&self.conn, &event).unwrap() {
                    return Some(data);
                }
            }
            None
        })
    }
}

pub struct XOwner {
    pub owner: SelectionOwner,
    pub handler: Payloads,
}

/// A native Wayland client with one surface.
pub struct WaylandClient {
    pub id: ClientId,
    pub surface: SurfaceId,
    /// Everything received, minus the `send` requests already answered.
    pub events: Vec<DataDeviceEvent>,
    /// What the client's sources write per mime type.
    pub payloads: HashMap<String, Vec<u8>>,
}

impl WaylandClient {
    /// Receives pending events, answering `send` requests from `payloads`.
    pub fn sync(&mut self, wl: &mut DataDeviceState) {
        for event in wl.take_events(self.id) {
            match event {
                DataDeviceEvent::SourceSend { mime_type, fd, .. } => {
                    let bytes = self.payloads.get(&mime_type).cloned().unwrap_or_default();
                    // The reader may already be gone.
                    let _ = File::from(fd).write_all(&bytes);
                }
                other => self.events.push(other),
            }
        }
    }

    pub fn take(&mut self, wl: &mut DataDeviceState) -> Vec<DataDeviceEvent> {
        self.sync(wl);
        std::mem::take(&mut self.events)
    }

    /// Focuses the client's surface and returns the keyboard enter serial.
    pub fn focus(&mut self, wl: &mut DataDeviceState) -> Serial {
        wl.set_keyboard_focus(Some(self.surface));
        self.sync(wl);
        self.events
            .iter()
            .rev()
            .find_map(|event| match event {
                DataDeviceEvent::KeyboardEnter { serial, .. } => Some(*serial),
                _ => None,
            })
            .unwrap()
    }

    /// Creates a source offering `payloads` (in order).
    pub fn source(&mut self, wl: &mut DataDeviceState, payloads: &[(&str, &[u8])]) -> SourceId {
        let source = wl.create_data_source(self.id).unwrap();
        for (mime, bytes) in payloads {
            wl.source_offer(source, mime).unwrap();
            self.payloads.insert(mime.to_string(), bytes.to_vec());
        }
        source
    }

    pub fn set_selection(&mut self, wl: &mut DataDeviceState, kind: SelectionKind, payloads: &[(&str, &[u8])]) -> SourceId {
        let serial = self.focus(wl);
        let source = self.source(wl, payloads);
        assert!(wl.set_selection(self.id, kind, Some(source), serial).unwrap());
        source
    }

    /// The newest selection offer of `kind` and its mime types.
    pub fn selection_offer(&mut self, wl: &mut DataDeviceState, kind: SelectionKind) -> Option<(OfferId, Vec<String>)> {
        self.sync(wl);
        let offer = self.events.iter().rev().find_map(|event| match event {
            DataDeviceEvent::Selection { kind: k, offer } if *k == kind => Some(*offer),
            _ => None,
        })??;
        let mimes = self.events.iter().find_map(|event| match event {
            DataDeviceEvent::DataOffer { offer: o, mime_types } if *o == offer => Some(mime_types.clone()),
            _ => None,
        })?;
        Some((offer, mimes))
    }

    /// Reads `mime` from `offer`, dispatching until the pipe closes.
    /// `serve` runs on every iteration so X owners can answer.
    pub fn receive(
        &self,
        h: &mut Harness,
        offer: OfferId,
        mime: &str,
        mut serve: impl FnMut(&mut Harness),
    ) -> Vec<u8> {
        let (read, write) = pipe().unwrap();
        let mut future = spawn_pipe_reader(read, TIMEOUT).unwrap();
        h.wl.offer_receive(self.id, offer, mime, write).unwrap();
        h.wait_for("a Wayland receive", |h| {
            serve(h);
            future.try_take()
        })
    }

    pub fn count(&self, matches: impl Fn(&DataDeviceEvent) -> bool) -> usize {
        self.events.iter().filter(|event| matches(event)).count()
    }
}

pub fn point(x: f64, y: f64) -> Point {
    Point::new(x, y)
}
