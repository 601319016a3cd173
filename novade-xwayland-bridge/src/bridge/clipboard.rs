//! One bridged selection (`CLIPBOARD` or `PRIMARY`).
//!
//! X to Wayland: when an X client takes the selection the bridge asks it for
//! `TARGETS` and publishes a Wayland source with the matching mime types.
//! Reads from Wayland clients are queued and converted one at a time.
//!
//! Wayland to X: when a Wayland client sets the selection the bridge claims
//! it on its own window and converts lazily, only when an X client asks.

use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Instant;

use novade_core::config::DataBridgeConfig;
use tracing::{debug, info, warn};

use super::{Context, DataOrigin, WaylandData};
use crate::atoms::Atoms;
use crate::error::Result;
use crate::transfer::write_all_async;
use crate::wayland::{SeatNotification, SelectionKind, SourceId};
use crate::x11::selection::{OwnerChange, OwnerEvent, RequestEvent, SelectionOwner, SelectionRequestor, SelectionWatcher};
use crate::x11::transport::SelectionData;
use crate::x11::{bytes_to_u32s, Atom, Geometry, Window, XConnection, XEvent, NONE};

/// The Wayland stand-in for an X owner's data.
#[derive(Debug)]
struct XSelectionSource {
    source: SourceId,
    /// Mime type and the X target it is read from.
    targets: Vec<(String, Atom)>,
}

#[derive(Debug)]
struct PendingRead {
    target: Atom,
    fd: OwnedFd,
}

#[derive(Debug)]
pub(super) struct SelectionBridge {
    kind: SelectionKind,
    atoms: Arc<Atoms>,
    window: Window,
    owner: SelectionOwner,
    requestor: SelectionRequestor,
    watcher: SelectionWatcher,
    x_source: Option<XSelectionSource>,
    /// The Wayland source mirrored into X while we own the X selection.
    wl_source: Option<SourceId>,
    fetching_targets: bool,
    reads: VecDeque<PendingRead>,
}

impl SelectionBridge {
    pub(super) fn new(
        conn: &dyn XConnection,
        atoms: Arc<Atoms>,
        kind: SelectionKind,
        selection: Atom,
        config: &DataBridgeConfig,
    ) -> Result<Self> {
        let window = conn.create_window(conn.root(), Geometry::new(-1, -1, 1, 1))?;
        let owner =
            SelectionOwner::new(Arc::clone(&atoms), window, selection, config.incr_chunk_size, config.transfer_timeout());
        let requestor =
            SelectionRequestor::new(conn, Arc::clone(&atoms), window, selection, config.transfer_timeout())?;
        let watcher = SelectionWatcher::new(conn, window, selection)?;
        debug!(?kind, window, "Selection bridge window created");
        Ok(Self {
            kind,
            atoms,
            window,
            owner,
            requestor,
            watcher,
            x_source: None,
            wl_source: None,
            fetching_targets: false,
            reads: VecDeque::new(),
        })
    }

    pub(super) fn kind(&self) -> SelectionKind {
        self.kind
    }

    pub(super) fn window(&self) -> Window {
        self.window
    }

    pub(super) fn owns_source(&self, source: SourceId) -> bool {
        self.x_source.as_ref().is_some_and(|x| x.source == source)
    }

    pub(super) fn handle_x_event(&mut self, cx: &mut Context<'_>, event: &XEvent) -> Result<()> {
        if let Some(change) = self.watcher.handle_event(event) {
            self.owner_changed(cx, change)?;
        }

        let conn = cx.conn;
        let origin = self.wl_source.map(DataOrigin::Selection);
        let mut handler = WaylandData { cx: &mut *cx, origin };
        if self.owner.handle_event(conn, event, &mut handler)? == OwnerEvent::Lost {
            debug!(kind = ?self.kind, "An X client took over the selection");
            self.wl_source = None;
        }

        if let RequestEvent::Done { target, data } = self.requestor.handle_event(cx.conn, event)? {
            self.conversion_done(cx, target, data)?;
        }
        Ok(())
    }

    fn owner_changed(&mut self, cx: &mut Context<'_>, change: OwnerChange) -> Result<()> {
        if change.owner == self.window {
            self.owner.confirm_time(change.timestamp);
            return Ok(());
        }
        self.abort_reads();
        if change.owner == NONE {
            debug!(kind = ?self.kind, "X selection cleared");
            if let Some(x) = self.x_source.take() {
                // Only clears the Wayland selection if it is still ours.
                cx.wl.destroy_source(x.source);
            }
            return Ok(());
        }
        debug!(kind = ?self.kind, owner = change.owner, "X client owns the selection; fetching targets");
        self.fetching_targets = true;
        self.requestor.request(cx.conn, self.atoms.targets, change.timestamp)?;
        Ok(())
    }

    fn abort_reads(&mut self) {
        if !self.reads.is_empty() {
            debug!(kind = ?self.kind, dropped = self.reads.len(), "Dropping pending selection reads");
        }
        self.reads.clear();
        self.requestor.cancel();
        self.fetching_targets = false;
    }

    fn conversion_done(&mut self, cx: &mut Context<'_>, target: Atom, data: SelectionData) -> Result<()> {
        if self.fetching_targets && target == self.atoms.targets {
            self.fetching_targets = false;
            self.publish_targets(cx, &data)?;
        } else if let Some(read) = self.reads.pop_front() {
            debug!(kind = ?self.kind, target, bytes = data.bytes.len(), "Selection data read from X");
            write_all_async(read.fd, data.bytes, cx.timeout)?;
        }
        self.start_next_read(cx)
    }

    /// Replaces the Wayland selection with a source for the X owner's targets.
    fn publish_targets(&mut self, cx: &mut Context<'_>, data: &SelectionData) -> Result<()> {
        let targets = if data.format == 32 { bytes_to_u32s(&data.bytes) } else { Vec::new() };
        let mimes = cx.mimes.targets_to_mimes(cx.conn, &targets)?;
        let source = cx.wl.create_data_source()?;
        for (mime, _) in &mimes {
            cx.wl.source_offer(source, mime)?;
        }
        info!(kind = ?self.kind, mimes = mimes.len(), "Publishing X selection to Wayland");
        let previous = self.x_source.replace(XSelectionSource { source, targets: mimes });
        cx.wl.set_selection(self.kind, Some(source))?;
        if let Some(previous) = previous {
            cx.wl.destroy_source(previous.source);
        }
        Ok(())
    }

    fn start_next_read(&mut self, cx: &mut Context<'_>) -> Result<()> {
        if self.requestor.is_busy() {
            return Ok(());
        }
        if let Some(read) = self.reads.front() {
            self.requestor.request(cx.conn, read.target, cx.time)?;
        }
        Ok(())
    }

    /// A Wayland client wants our X-backed source's data.
    pub(super) fn send_requested(&mut self, cx: &mut Context<'_>, mime_type: &str, fd: OwnedFd) -> Result<()> {
        let known = self
            .x_source
            .as_ref()
            .and_then(|x| x.targets.iter().find(|(mime, _)| mime == mime_type))
            .map(|(_, target)| *target);
        // Dropping `fd` hands the reader an empty transfer.
        let Some(target) = known else {
            debug!(kind = ?self.kind, mime_type, "Refusing read of a type the X owner does not offer");
            return Ok(());
        };
        self.reads.push_back(PendingRead { target, fd });
        self.start_next_read(cx)
    }

    /// Our X-backed source was replaced by a Wayland client's.
    pub(super) fn source_cancelled(&mut self, cx: &mut Context<'_>, source: SourceId) {
        if self.owns_source(source) {
            self.x_source = None;
            self.abort_reads();
            cx.wl.destroy_source(source);
        }
    }

    pub(super) fn handle_seat(&mut self, cx: &mut Context<'_>, notification: SeatNotification) -> Result<()> {
        match notification {
            SeatNotification::SelectionChanged(kind) if kind == self.kind => self.wayland_selection_changed(cx),
            _ => Ok(()),
        }
    }

    fn wayland_selection_changed(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let current = cx.wl.selection(self.kind);
        if current.is_some() && current == self.x_source.as_ref().map(|x| x.source) {
            return Ok(());
        }
        match current {
            Some(source) => {
                let mimes = cx.wl.source_mime_types(source).map(<[String]>::to_vec).unwrap_or_default();
                let targets = cx.mimes.mimes_to_targets(cx.conn, &mimes)?;
                if self.owner.claim(cx.conn, targets, cx.time)? {
                    info!(kind = ?self.kind, %source, mimes = mimes.len(), "Publishing Wayland selection to X");
                    self.wl_source = Some(source);
                } else {
                    warn!(kind = ?self.kind, "X server refused selection ownership");
                    self.wl_source = None;
                }
            }
            None => {
                self.wl_source = None;
                if self.owner.is_owner() {
                    debug!(kind = ?self.kind, "Wayland selection cleared; releasing X selection");
                    self.owner.release(cx.conn, cx.time)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn poll(&mut self, cx: &mut Context<'_>, now: Instant) -> Result<()> {
        self.owner.poll(cx.conn, now)?;
        if let RequestEvent::Done { target, data } = self.requestor.poll(now) {
            self.conversion_done(cx, target, data)?;
        }
        Ok(())
    }
}
