//! A fixed-byte-budget FIFO of variably sized snapshots.
//!
//! The buffer owns a circular byte arena sized to its budget. A capture is
//! first checked against the cadence policy, then staged into a reusable
//! scratch buffer, and finally committed to the arena; entries that must be
//! overwritten to make room are copied out and returned to the caller, which
//! decides whether to demote or drop them.
//!
//! Entry offsets are logical and monotonically increasing; the physical
//! position of a byte is `offset % capacity`, so a snapshot may wrap across
//! the arena boundary. [`StateView`] and [`StateReader`] account for the
//! split.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use tracing::{trace, warn};

use crate::config::RingConfig;
use crate::reader::StateReader;

struct Entry {
    frame: u32,
    /// Logical offset of the first payload byte.
    start: u64,
    length: u64,
}

/// An owned copy of a snapshot dropped to make room for a newer one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedState {
    pub frame: u32,
    pub bytes: Vec<u8>,
}

/// Outcome of a capture attempt.
#[derive(Debug, Default)]
pub struct CaptureResult {
    /// Whether the snapshot was admitted into the ring.
    pub admitted: bool,
    /// Entries dropped from the old end to make room, oldest first.
    pub evicted: Vec<EvictedState>,
}

/// Borrowed view of one stored snapshot.
pub struct StateView<'a> {
    frame: u32,
    first: &'a [u8],
    second: &'a [u8],
}

impl<'a> StateView<'a> {
    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a fresh byte stream over the snapshot.
    pub fn reader(&self) -> StateReader<'a> {
        StateReader::split(self.first, self.second)
    }

    /// Copies the snapshot into an owned buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(self.first);
        bytes.extend_from_slice(self.second);
        bytes
    }
}

/// A decaying ring of snapshots under a strict byte budget.
pub struct ZwinderBuffer {
    config: RingConfig,
    arena: Vec<u8>,
    /// Oldest first, frames strictly increasing.
    entries: VecDeque<Entry>,
    /// Logical offset where the next snapshot begins.
    head: u64,
    /// Staging area reused across captures.
    scratch: Vec<u8>,
}

impl ZwinderBuffer {
    pub fn new(config: &RingConfig) -> Self {
        Self {
            config: *config,
            arena: vec![0; config.buffer_bytes as usize],
            entries: VecDeque::new(),
            head: 0,
            scratch: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Payload bytes currently held.
    pub fn used(&self) -> u64 {
        match self.entries.front() {
            Some(first) => self.head - first.start,
            None => 0,
        }
    }

    pub fn rewind_frequency(&self) -> u32 {
        self.config.rewind_frequency
    }

    pub fn newest_frame(&self) -> Option<u32> {
        self.entries.back().map(|entry| entry.frame)
    }

    pub fn matches_settings(&self, config: &RingConfig) -> bool {
        self.config == *config
    }

    fn admits(&self, frame: u32, force: bool) -> bool {
        let Some(newest) = self.newest_frame() else {
            return true;
        };
        if frame <= newest {
            // Entries are kept in increasing frame order; a capture at or
            // behind the newest entry is refused even when forced.
            trace!(frame, newest, "refusing out-of-order capture");
            return false;
        }
        force || frame - newest >= self.config.rewind_frequency
    }

    /// Captures a snapshot produced by `fill`.
    ///
    /// Admission is decided before `fill` runs, so a refused capture never
    /// serializes the state. Entries dropped to make room come back in the
    /// result, oldest first.
    pub fn capture<F>(&mut self, frame: u32, fill: F, force: bool) -> io::Result<CaptureResult>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        if !self.admits(frame, force) {
            return Ok(CaptureResult::default());
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let filled = fill(&mut scratch);
        let outcome = match filled {
            Ok(()) => Ok(self.commit(frame, &scratch)),
            Err(err) => Err(err),
        };
        self.scratch = scratch;
        outcome
    }

    /// Infallible capture from an in-memory snapshot. Used for demotions,
    /// settings rebuilds and deserialization.
    pub fn capture_bytes(&mut self, frame: u32, bytes: &[u8], force: bool) -> CaptureResult {
        if !self.admits(frame, force) {
            return CaptureResult::default();
        }
        self.commit(frame, bytes)
    }

    fn commit(&mut self, frame: u32, bytes: &[u8]) -> CaptureResult {
        let length = bytes.len() as u64;
        if length > self.config.buffer_bytes {
            warn!(
                frame,
                length,
                budget = self.config.buffer_bytes,
                "snapshot exceeds the ring budget, dropping"
            );
            return CaptureResult::default();
        }
        let mut evicted = Vec::new();
        while self.config.buffer_bytes - self.used() < length {
            let Some(old) = self.pop_oldest() else { break };
            evicted.push(old);
        }
        let start = self.head;
        self.write_arena(start, bytes);
        self.head = start + length;
        self.entries.push_back(Entry {
            frame,
            start,
            length,
        });
        CaptureResult {
            admitted: true,
            evicted,
        }
    }

    fn pop_oldest(&mut self) -> Option<EvictedState> {
        let entry = self.entries.pop_front()?;
        let (first, second) = self.segments(entry.start, entry.length);
        let mut bytes = Vec::with_capacity(entry.length as usize);
        bytes.extend_from_slice(first);
        bytes.extend_from_slice(second);
        trace!(frame = entry.frame, "evicting oldest ring entry");
        Some(EvictedState {
            frame: entry.frame,
            bytes,
        })
    }

    /// Physical segments of a stored payload, second one non-empty only when
    /// the payload wraps.
    fn segments(&self, start: u64, length: u64) -> (&[u8], &[u8]) {
        if length == 0 {
            return (&[], &[]);
        }
        let capacity = self.arena.len();
        let at = (start % capacity as u64) as usize;
        let length = length as usize;
        if at + length <= capacity {
            (&self.arena[at..at + length], &[])
        } else {
            let first = &self.arena[at..];
            (first, &self.arena[..length - first.len()])
        }
    }

    fn write_arena(&mut self, start: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let capacity = self.arena.len();
        let at = (start % capacity as u64) as usize;
        let n = bytes.len().min(capacity - at);
        self.arena[at..at + n].copy_from_slice(&bytes[..n]);
        self.arena[..bytes.len() - n].copy_from_slice(&bytes[n..]);
    }

    /// Returns the `index`-th entry, oldest first.
    ///
    /// # Panics
    ///
    /// Panics when `index >= count()`.
    pub fn get(&self, index: usize) -> StateView<'_> {
        let entry = &self.entries[index];
        let (first, second) = self.segments(entry.start, entry.length);
        StateView {
            frame: entry.frame,
            first,
            second,
        }
    }

    /// Looks up the entry holding exactly `frame`.
    pub fn find_frame(&self, frame: u32) -> Option<StateView<'_>> {
        let index = self
            .entries
            .binary_search_by_key(&frame, |entry| entry.frame)
            .ok()?;
        Some(self.get(index))
    }

    /// Stored frames, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|entry| entry.frame)
    }

    /// Drops entries `index..` (the newest side), rolling the write head
    /// back so the space is reused.
    pub fn invalidate_end(&mut self, index: usize) {
        self.entries.truncate(index);
        self.head = match self.entries.back() {
            Some(last) => last.start + last.length,
            None => 0,
        };
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.head = 0;
    }

    /// Writes the contents as a self-delimiting little-endian blob:
    /// `count: i32`, then `{frame: i32, len: i32, bytes}` per entry.
    pub fn save<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_all(&(self.entries.len() as i32).to_le_bytes())?;
        for index in 0..self.entries.len() {
            let view = self.get(index);
            sink.write_all(&(view.frame() as i32).to_le_bytes())?;
            sink.write_all(&(view.len() as i32).to_le_bytes())?;
            sink.write_all(view.first)?;
            sink.write_all(view.second)?;
        }
        Ok(())
    }

    /// Reads a blob written by [`save`](Self::save) into a fresh buffer
    /// configured with `config`.
    ///
    /// Entries are re-admitted in order with force, so a smaller budget than
    /// the writer's sheds the oldest entries exactly as a live buffer would.
    pub fn create<R: Read + ?Sized>(source: &mut R, config: &RingConfig) -> io::Result<Self> {
        let mut buffer = Self::new(config);
        let count = read_i32(source)?;
        if count < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "negative ring entry count",
            ));
        }
        let mut bytes = Vec::new();
        for _ in 0..count {
            let frame = read_i32(source)?;
            let length = read_i32(source)?;
            if frame < 0 || length < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "negative ring entry field",
                ));
            }
            bytes.resize(length as usize, 0);
            source.read_exact(&mut bytes)?;
            buffer.capture_bytes(frame as u32, &bytes, true);
        }
        Ok(buffer)
    }
}

fn read_i32<R: Read + ?Sized>(source: &mut R) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    source.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}
