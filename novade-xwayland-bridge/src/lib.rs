//! # NovaDE Xwayland Data Bridge (`novade-xwayland-bridge`)
//!
//! Lets X11 applications running under Xwayland share the clipboard and take
//! part in drag-and-drop with native Wayland clients.
//!
//! - **Selections**: `CLIPBOARD` and `PRIMARY` are mirrored both ways. Large
//!   values use the ICCCM `INCR` protocol.
//! - **Drag-and-drop**: Wayland drags over X windows speak XDND version 5 to
//!   them, and X drags over Wayland surfaces become compositor drags.
//! - **Wayland seam**: [`wayland::WaylandSeat`], implemented with the
//!   `smithay-backend` feature on smithay's data-device and
//!   primary-selection globals, and by the in-memory
//!   [`wayland::DataDeviceState`] the tests drive.
//! - **X11 seam**: [`x11::XConnection`], implemented by the in-memory
//!   [`x11::memory::MemoryDisplay`] and, with the `x11rb-backend` feature, by
//!   a real server connection.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use novade_core::config::ConfigLoader;
//! use novade_xwayland_bridge::wayland::{GrabRequest, SmithaySeat};
//! use novade_xwayland_bridge::x11::x11rb_backend::X11rbConnection;
//! use novade_xwayland_bridge::DataBridge;
//!
//! let config = ConfigLoader::load()?;
//! let mut seat = SmithaySeat::new(display.handle(), smithay_seat.clone());
//! let conn = X11rbConnection::connect(None)?;
//! let mut bridge = DataBridge::new(conn, &mut seat, &config.data_bridge)?;
//! loop {
//!     // ... forward selection, drag and input callbacks into `seat` ...
//!     bridge.dispatch(&mut seat)?;
//!     while let Some(request) = seat.take_grab_request() {
//!         // start_dnd(..) or pointer.unset_grab(..)
//!     }
//! }
//! ```

pub mod action;
pub mod atoms;
pub mod bridge;
pub mod error;
pub mod mime;
pub mod transfer;
pub mod wayland;
pub mod x11;

pub use action::DndAction;
pub use bridge::DataBridge;
pub use error::{BridgeError, Result, TransferError, XError};
pub use wayland::{DataDeviceError, DataDeviceState};
