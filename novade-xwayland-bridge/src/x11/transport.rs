//! Moving typed byte buffers through window properties.
//!
//! Small values are written in one `ChangeProperty`. Anything larger than the
//! configured chunk size goes through the ICCCM `INCR` protocol: the writer
//! first stores an `INCR` property holding the total length, then writes one
//! chunk each time the peer deletes the property, and ends with a zero-length
//! write. The reader mirrors this by deleting the property after every chunk
//! it consumes until it sees the empty terminator.
//!
//! Neither side blocks. [`IncrWriter`] and [`IncrReader`] are fed the
//! `PropertyNotify`/`DestroyNotify` events the dispatcher receives and report
//! when they are done; [`is_expired`](IncrWriter::is_expired) lets the owner
//! abandon a transfer whose peer went quiet.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::{Atom, EventMask, PropMode, PropertyState, Window, XConnection, XEvent, ANY_PROPERTY_TYPE, NONE};
use crate::atoms::Atoms;
use crate::error::TransferError;

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionData {
    pub type_: Atom,
    pub format: u8,
    pub bytes: Vec<u8>,
}

impl SelectionData {
    pub fn new(type_: Atom, format: u8, bytes: Vec<u8>) -> Self {
        Self { type_, format, bytes }
    }

    /// The "no data" answer.
    pub fn empty() -> Self {
        Self { type_: NONE, format: 8, bytes: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Bytes per element for a property format.
pub fn element_size(format: u8) -> Result<usize, TransferError> {
    match format {
        8 => Ok(1),
        16 => Ok(2),
        32 => Ok(4),
        other => Err(TransferError::InvalidFormat(other)),
    }
}

fn check_alignment(len: usize, format: u8) -> Result<usize, TransferError> {
    let size = element_size(format)?;
    if len % size != 0 {
        return Err(TransferError::Misaligned { len, format });
    }
    Ok(size)
}

#[derive(Debug)]
pub enum WriteOutcome {
    /// The whole value is in place.
    Complete,
    /// The `INCR` header was written; feed events to the writer.
    Incremental(IncrWriter),
}

/// Writes `data` into `property` on `requestor`, switching to `INCR` above `chunk_size` bytes.
pub fn write_property(
    conn: &dyn XConnection,
    atoms: &Atoms,
    requestor: Window,
    property: Atom,
    data: SelectionData,
    chunk_size: usize,
    timeout: Duration,
) -> Result<WriteOutcome, TransferError> {
    let element = check_alignment(data.bytes.len(), data.format)?;
    if data.bytes.len() <= chunk_size {
        conn.change_property(PropMode::Replace, requestor, property, data.type_, data.format, &data.bytes)?;
        trace!(window = requestor, property, bytes = data.bytes.len(), "Wrote property in one piece");
        return Ok(WriteOutcome::Complete);
    }

    let total = u32::try_from(data.bytes.len())
        .map_err(|_| TransferError::MalformedIncr(format!("{} bytes do not fit an INCR header", data.bytes.len())))?;
    conn.select_input(requestor, EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY)?;
    conn.change_property(PropMode::Replace, requestor, property, atoms.incr, 32, &total.to_ne_bytes())?;
    debug!(window = requestor, property, bytes = total, "Starting INCR write");

    // Chunks never split an element.
    let chunk = (chunk_size / element).max(1) * element;
    Ok(WriteOutcome::Incremental(IncrWriter {
        requestor,
        property,
        data,
        offset: 0,
        chunk,
        terminated: false,
        timeout,
        deadline: Instant::now() + timeout,
    }))
}

/// Progress reported by an INCR state machine for one event.
#[derive(Debug, PartialEq, Eq)]
pub enum IncrProgress<T> {
    /// The event does not concern this transfer.
    Ignored,
    /// A chunk moved; more are expected.
    Progress,
    Done(T),
}

/// The owner side of an `INCR` transfer.
#[derive(Debug)]
pub struct IncrWriter {
    requestor: Window,
    property: Atom,
    data: SelectionData,
    offset: usize,
    chunk: usize,
    terminated: bool,
    timeout: Duration,
    deadline: Instant,
}

impl IncrWriter {
    pub fn requestor(&self) -> Window {
        self.requestor
    }

    pub fn property(&self) -> Atom {
        self.property
    }

    pub fn bytes_written(&self) -> usize {
        self.offset
    }

    /// Writes the next chunk once the peer has consumed the previous one.
    pub fn on_property_deleted(&mut self, conn: &dyn XConnection) -> Result<IncrProgress<()>, TransferError> {
        if self.terminated {
            return Ok(IncrProgress::Done(()));
        }
        let end = (self.offset + self.chunk).min(self.data.bytes.len());
        let slice = &self.data.bytes[self.offset..end];
        conn.change_property(
            PropMode::Replace,
            self.requestor,
            self.property,
            self.data.type_,
            self.data.format,
            slice,
        )?;
        self.deadline = Instant::now() + self.timeout;
        if slice.is_empty() {
            self.terminated = true;
            debug!(window = self.requestor, bytes = self.offset, "INCR write finished");
            return Ok(IncrProgress::Done(()));
        }
        trace!(window = self.requestor, offset = self.offset, len = slice.len(), "Wrote INCR chunk");
        self.offset = end;
        Ok(IncrProgress::Progress)
    }

    /// Routes an X event to the writer.
    pub fn handle_event(&mut self, conn: &dyn XConnection, event: &XEvent) -> Result<IncrProgress<()>, TransferError> {
        match event {
            XEvent::PropertyNotify { window, atom, state: PropertyState::Deleted, .. }
                if *window == self.requestor && *atom == self.property =>
            {
                self.on_property_deleted(conn)
            }
            XEvent::DestroyNotify { window } if *window == self.requestor => {
                warn!(window = self.requestor, written = self.offset, "Requestor vanished during INCR write");
                Err(TransferError::PeerGone(self.requestor))
            }
            _ => Ok(IncrProgress::Ignored),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Complete(SelectionData),
    Incremental(IncrReader),
}

/// Reads and deletes `property` on our own `window`.
///
/// A missing property reads as empty data. An `INCR` header starts an
/// incremental read; the caller must already be selecting `PropertyChange`
/// on `window`.
pub fn read_property(
    conn: &dyn XConnection,
    atoms: &Atoms,
    window: Window,
    property: Atom,
    timeout: Duration,
) -> Result<ReadOutcome, TransferError> {
    let Some(reply) = conn.get_property(true, window, property, ANY_PROPERTY_TYPE)? else {
        return Ok(ReadOutcome::Complete(SelectionData::empty()));
    };
    if reply.type_ == atoms.incr {
        let expected = reply.value32().first().copied().unwrap_or(0) as usize;
        debug!(window, property, expected, "Starting INCR read");
        return Ok(ReadOutcome::Incremental(IncrReader {
            window,
            property,
            type_: NONE,
            format: 0,
            bytes: Vec::with_capacity(expected),
            timeout,
            deadline: Instant::now() + timeout,
        }));
    }
    check_alignment(reply.value.len(), reply.format)?;
    Ok(ReadOutcome::Complete(SelectionData::new(reply.type_, reply.format, reply.value)))
}

/// The requestor side of an `INCR` transfer.
#[derive(Debug)]
pub struct IncrReader {
    window: Window,
    property: Atom,
    type_: Atom,
    format: u8,
    bytes: Vec<u8>,
    timeout: Duration,
    deadline: Instant,
}

impl IncrReader {
    pub fn window(&self) -> Window {
        self.window
    }

    pub fn property(&self) -> Atom {
        self.property
    }

    /// Consumes the chunk the owner just wrote.
    pub fn on_property_new_value(
        &mut self,
        conn: &dyn XConnection,
    ) -> Result<IncrProgress<SelectionData>, TransferError> {
        let Some(reply) = conn.get_property(true, self.window, self.property, ANY_PROPERTY_TYPE)? else {
            return Ok(IncrProgress::Ignored);
        };
        self.deadline = Instant::now() + self.timeout;
        if reply.value.is_empty() {
            debug!(window = self.window, bytes = self.bytes.len(), "INCR read finished");
            let type_ = if self.type_ == NONE { reply.type_ } else { self.type_ };
            let format = if self.format == 0 { reply.format } else { self.format };
            return Ok(IncrProgress::Done(SelectionData::new(type_, format, std::mem::take(&mut self.bytes))));
        }
        check_alignment(reply.value.len(), reply.format)?;
        if self.format == 0 {
            self.type_ = reply.type_;
            self.format = reply.format;
        } else if reply.format != self.format || reply.type_ != self.type_ {
            return Err(TransferError::MalformedIncr(format!(
                "chunk changed from type {} format {} to type {} format {}",
                self.type_, self.format, reply.type_, reply.format
            )));
        }
        trace!(window = self.window, len = reply.value.len(), "Read INCR chunk");
        self.bytes.extend_from_slice(&reply.value);
        Ok(IncrProgress::Progress)
    }

    pub fn handle_event(
        &mut self,
        conn: &dyn XConnection,
        event: &XEvent,
    ) -> Result<IncrProgress<SelectionData>, TransferError> {
        match event {
            XEvent::PropertyNotify { window, atom, state: PropertyState::NewValue, .. }
                if *window == self.window && *atom == self.property =>
            {
                self.on_property_new_value(conn)
            }
            _ => Ok(IncrProgress::Ignored),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}
