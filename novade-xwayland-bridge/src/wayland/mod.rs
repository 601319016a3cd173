//! The Wayland side of the bridge.
//!
//! [`WaylandSeat`] is the seam the bridge talks to. With the
//! `smithay-backend` feature, `SmithaySeat` implements it on a running
//! compositor. [`DataDeviceState`] is
//! an in-memory `wl_data_device_manager` for one seat that the tests drive
//! as the compositor: it tracks clients, their surfaces, the seat's input
//! focus and serials, data sources, data offers, the clipboard and primary
//! selections and the (single) drag-and-drop session. Requests arrive as
//! method calls named after the protocol requests; everything the protocol
//! would send to a client is queued per client and collected with
//! [`DataDeviceState::take_events`]. Compositor-internal listeners such as
//! the Xwayland bridge observe seat changes through a [`Subscription`].
//!
//! An Xwayland server is an ordinary client here whose surfaces carry the X
//! window they display.

use std::fmt;
use std::os::fd::OwnedFd;

use thiserror::Error;

use crate::action::DndAction;

mod data_device;
mod drag;
mod seat;
#[cfg(feature = "smithay-backend")]
pub mod smithay_seat;
mod subscription;

pub use data_device::DataDeviceState;
pub use seat::WaylandSeat;
#[cfg(feature = "smithay-backend")]
pub use smithay_seat::{GrabRequest, SmithaySeat};
pub use subscription::Subscription;

macro_rules! object_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}@{}", stringify!($name), self.0)
                }
            }
        )+
    };
}

object_id! {
    /// A connected Wayland client.
    ClientId,
    /// A mapped `wl_surface`.
    SurfaceId,
    /// A `wl_data_source`.
    SourceId,
    /// A `wl_data_offer`.
    OfferId,
    /// An input event serial.
    Serial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionKind {
    Clipboard,
    Primary,
}

/// A position in compositor (global) or surface-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A surface's placement in global coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= f64::from(self.x)
            && point.y >= f64::from(self.y)
            && point.x < f64::from(self.x + self.width)
            && point.y < f64::from(self.y + self.height)
    }

    /// Converts a global position into this surface's coordinates.
    pub fn to_local(&self, point: Point) -> Point {
        Point::new(point.x - f64::from(self.x), point.y - f64::from(self.y))
    }
}

/// Everything the protocol sends to a client.
#[derive(Debug)]
pub enum DataDeviceEvent {
    /// `wl_data_device.data_offer` followed by the offer's `offer` events.
    DataOffer { offer: OfferId, mime_types: Vec<String> },
    /// `wl_data_device.selection` (or the primary-selection equivalent).
    Selection { kind: SelectionKind, offer: Option<OfferId> },
    Enter { serial: Serial, surface: SurfaceId, position: Point, offer: Option<OfferId> },
    Leave,
    Motion { position: Point },
    Drop,

    /// `wl_data_offer.source_actions`
    OfferSourceActions { offer: OfferId, actions: DndAction },
    /// `wl_data_offer.action`
    OfferAction { offer: OfferId, action: DndAction },

    /// `wl_data_source.target`
    SourceTarget { source: SourceId, mime_type: Option<String> },
    /// `wl_data_source.send`: write the data into `fd` and close it.
    SourceSend { source: SourceId, mime_type: String, fd: OwnedFd },
    SourceCancelled { source: SourceId },
    SourceDndDropPerformed { source: SourceId },
    SourceDndFinished { source: SourceId },
    SourceAction { source: SourceId, action: DndAction },

    PointerEnter { serial: Serial, surface: SurfaceId, position: Point },
    PointerLeave { surface: SurfaceId },
    PointerMotion { position: Point },
    PointerButton { serial: Serial, pressed: bool },
    KeyboardEnter { serial: Serial, surface: SurfaceId },
    KeyboardLeave { surface: SurfaceId },
    TouchDown { serial: Serial, surface: SurfaceId, id: i32, position: Point },
    TouchMotion { id: i32, position: Point },
    TouchUp { id: i32 },
    TouchCancel,
    TabletToolDown { serial: Serial, surface: SurfaceId },
    TabletToolMotion { position: Point },
    TabletToolUp,
}

/// Seat changes reported to compositor-internal listeners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeatNotification {
    SelectionChanged(SelectionKind),
    KeyboardFocusChanged(Option<SurfaceId>),
    /// Global pointer position, also sent while a drag is in progress.
    PointerMoved(Point),
    PointerButton { pressed: bool },
    DragStarted,
    DragEnded,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataDeviceError {
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),

    #[error("unknown data source {0}")]
    UnknownSource(SourceId),

    #[error("unknown data offer {0}")]
    UnknownOffer(OfferId),

    #[error("{0} does not belong to {1}")]
    NotOwner(String, ClientId),

    #[error("data source {0} was already used for a selection or drag")]
    SourceAlreadyUsed(SourceId),

    #[error("finish on offer {0} is not allowed in its current state")]
    InvalidFinish(OfferId),

    #[error("no Xwayland client is connected")]
    NoXwaylandClient,

    /// The compositor refused a request made on the bridge's behalf.
    #[error("compositor refused the request: {0}")]
    Refused(String),
}
