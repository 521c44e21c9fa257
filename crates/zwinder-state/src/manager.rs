//! The frame-indexed state store: three decaying rings plus a reserved map.
//!
//! Captures past the head land in the current ring. As newer captures push
//! entries out of it, they demote to the recent ring, and entries falling
//! off the recent ring are either kept as long-term anchors in the reserved
//! map (when they cover an otherwise empty stretch of the movie) or dropped.
//! The gap ring fills holes re-opened behind the head after backward seeks.
//!
//! A sorted [`FrameIndex`] mirrors every addressable frame, so membership
//! tests and closest-at-or-before queries never touch the stores. The index
//! is derived data: bulk operations rebuild it from the rings and the
//! reserved map.
//!
//! The store is single-threaded by contract; every mutator takes
//! `&mut self` and callers that multiplex producers serialize externally.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::ops::Bound::Excluded;

use tracing::{debug, trace};
use zwinder_ring::{EvictedState, RingConfig, StateReader, ZwinderBuffer};

use crate::error::StateError;
use crate::index::FrameIndex;
use crate::settings::StateManagerSettings;

/// Anything that can serialize the running emulator into a byte sink.
///
/// The store asks its producer for exactly one thing: write the current
/// state as an opaque blob. Closures get a blanket impl, so call sites can
/// pass `|sink| core.save_state(sink)` directly.
pub trait Snapshotter {
    fn write_state(&mut self, sink: &mut dyn Write) -> io::Result<()>;
}

impl<F> Snapshotter for F
where
    F: FnMut(&mut dyn Write) -> io::Result<()>,
{
    fn write_state(&mut self, sink: &mut dyn Write) -> io::Result<()> {
        self(sink)
    }
}

/// Decides which frames are pinned into the reserved map (markers, branch
/// points). Consulted many times per capture, so it must be cheap. The
/// answer may evolve as the user edits markers; displaced ring entries are
/// re-checked against it before they decay.
pub type ReserveCallback = Box<dyn Fn(u32) -> bool>;

/// A bounded store of emulator snapshots indexed by frame.
pub struct StateManager {
    current: ZwinderBuffer,
    recent: ZwinderBuffer,
    gap: ZwinderBuffer,
    /// Frame to owned snapshot bytes. Never decays; only explicit eviction
    /// or invalidation removes entries, and frame 0 survives even those.
    reserved: BTreeMap<u32, Vec<u8>>,
    index: FrameIndex,
    ancient_interval: u32,
    reserve: ReserveCallback,
}

impl StateManager {
    pub fn new(settings: &StateManagerSettings, reserve: ReserveCallback) -> Self {
        Self {
            current: ZwinderBuffer::new(&settings.current),
            recent: ZwinderBuffer::new(&settings.recent),
            gap: ZwinderBuffer::new(&settings.gap),
            reserved: BTreeMap::new(),
            index: FrameIndex::new(),
            ancient_interval: settings.ancient_interval,
            reserve,
        }
    }

    /// Pins the frame-0 snapshot. Must run before the store is queried; on
    /// an already engaged store this is a no-op.
    pub fn engage(&mut self, frame_zero: Vec<u8>) {
        if !self.reserved.contains_key(&0) {
            self.reserved.insert(0, frame_zero);
            self.index.insert(0);
        }
    }

    pub fn has_state(&self, frame: u32) -> bool {
        self.index.contains(frame)
    }

    /// Newest addressable frame. Reserved frames count, so a branch point
    /// sitting ahead of the replay head is included.
    pub fn last(&self) -> u32 {
        self.index.max().unwrap_or(0)
    }

    /// Total snapshots across all four stores.
    pub fn count(&self) -> usize {
        self.current.count() + self.recent.count() + self.gap.count() + self.reserved.len()
    }

    /// Per-store snapshot counts: current, recent, gap, reserved.
    pub fn store_counts(&self) -> [usize; 4] {
        [
            self.current.count(),
            self.recent.count(),
            self.gap.count(),
            self.reserved.len(),
        ]
    }

    /// Aggregate payload footprint in bytes.
    pub fn used_bytes(&self) -> u64 {
        self.current.used()
            + self.recent.used()
            + self.gap.used()
            + self
                .reserved
                .values()
                .map(|bytes| bytes.len() as u64)
                .sum::<u64>()
    }

    /// Spacing target currently in effect for ancient anchors.
    pub fn ancient_interval(&self) -> u32 {
        self.ancient_interval
    }

    /// The nearest stored state at or before `frame`, with a fresh byte
    /// stream over its snapshot.
    ///
    /// After [`engage`](Self::engage) frame 0 is always present, so this
    /// returns `Some` for every input; `None` means the store was never
    /// engaged.
    pub fn get_closest(&self, frame: u32) -> Option<(u32, StateReader<'_>)> {
        let found = self.index.closest_at_or_before(frame)?;
        let reader = self.open_state(found)?;
        Some((found, reader))
    }

    /// Exact-match accessor: a fresh copy of the snapshot stored precisely
    /// at `frame`, or an empty vector when there is none.
    pub fn state_at(&self, frame: u32) -> Vec<u8> {
        self.copy_state(frame).unwrap_or_default()
    }

    fn open_state(&self, frame: u32) -> Option<StateReader<'_>> {
        if let Some(bytes) = self.reserved.get(&frame) {
            return Some(StateReader::contiguous(bytes));
        }
        for ring in [&self.current, &self.recent, &self.gap] {
            if let Some(view) = ring.find_frame(frame) {
                return Some(view.reader());
            }
        }
        None
    }

    fn copy_state(&self, frame: u32) -> Option<Vec<u8>> {
        if let Some(bytes) = self.reserved.get(&frame) {
            return Some(bytes.clone());
        }
        for ring in [&self.current, &self.recent, &self.gap] {
            if let Some(view) = ring.find_frame(frame) {
                return Some(view.to_vec());
            }
        }
        None
    }

    /// Stores a snapshot for `frame`.
    ///
    /// Routing, in order: duplicate frames are ignored; frames the reserve
    /// callback claims go straight to the reserved map; frames at or behind
    /// the head refill the gap ring when coverage there is sparse; anything
    /// else advances the head through the current ring, with displaced
    /// entries cascading towards the recent ring and the reserved map.
    pub fn capture<S>(&mut self, frame: u32, source: &mut S, force: bool) -> io::Result<()>
    where
        S: Snapshotter + ?Sized,
    {
        if self.index.contains(frame) {
            trace!(frame, "capture skipped, frame already stored");
            return Ok(());
        }
        if (self.reserve)(frame) {
            return self.capture_reserved(frame, source);
        }
        if let Some(head) = self.head_frame() {
            if frame <= head {
                if self.needs_gap(frame) {
                    let result = self
                        .gap
                        .capture(frame, |sink| source.write_state(sink), force)?;
                    if result.admitted {
                        self.index.insert(frame);
                    }
                    for evicted in result.evicted {
                        self.unindex_unless_reserved(evicted.frame);
                    }
                } else {
                    trace!(frame, head, "capture behind head dropped, coverage is dense");
                }
                return Ok(());
            }
        }
        let result = self
            .current
            .capture(frame, |sink| source.write_state(sink), force)?;
        if result.admitted {
            self.index.insert(frame);
        }
        for evicted in result.evicted {
            self.demote_to_recent(evicted);
        }
        Ok(())
    }

    /// Newest frame across the current and recent rings. The reserved map
    /// is not consulted: reserved frames may sit ahead of the replay head.
    fn head_frame(&self) -> Option<u32> {
        match (self.current.newest_frame(), self.recent.newest_frame()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether a backfill capture at `frame` lands in genuinely sparse
    /// territory: no stored frame strictly inside `(frame - freq, frame)`.
    fn needs_gap(&self, frame: u32) -> bool {
        let frequency = if self.gap.count() > 0 {
            self.gap.rewind_frequency()
        } else {
            self.current.rewind_frequency()
        };
        !self
            .index
            .any_between(frame.saturating_sub(frequency), frame)
    }

    fn unindex_unless_reserved(&mut self, frame: u32) {
        if !self.reserved.contains_key(&frame) {
            self.index.remove(frame);
        }
    }

    fn demote_to_recent(&mut self, evicted: EvictedState) {
        if self.reserved.contains_key(&evicted.frame) {
            // A pinned copy already owns this frame; the ring copy was
            // redundant.
            return;
        }
        self.index.remove(evicted.frame);
        if (self.reserve)(evicted.frame) {
            debug!(frame = evicted.frame, "promoting displaced state to reserved");
            self.reserved.insert(evicted.frame, evicted.bytes);
            self.index.insert(evicted.frame);
            return;
        }
        // Demotions bypass the cadence check.
        let result = self.recent.capture_bytes(evicted.frame, &evicted.bytes, true);
        if result.admitted {
            self.index.insert(evicted.frame);
        }
        for next in result.evicted {
            self.retire_from_recent(next);
        }
    }

    fn retire_from_recent(&mut self, evicted: EvictedState) {
        if self.reserved.contains_key(&evicted.frame) {
            return;
        }
        self.index.remove(evicted.frame);
        if (self.reserve)(evicted.frame) || !self.has_nearby_reserved(evicted.frame) {
            debug!(frame = evicted.frame, "keeping ancient anchor");
            self.reserved.insert(evicted.frame, evicted.bytes);
            self.index.insert(evicted.frame);
        }
    }

    /// True when a reserved anchor already covers the neighbourhood of
    /// `frame`: anything below `ancient_interval` counts as near frame 0,
    /// otherwise any reserved key strictly inside
    /// `(frame - interval, frame + interval)` qualifies.
    fn has_nearby_reserved(&self, frame: u32) -> bool {
        if frame < self.ancient_interval {
            return true;
        }
        if self.ancient_interval == 0 {
            return false;
        }
        let lo = frame - self.ancient_interval;
        let hi = frame.saturating_add(self.ancient_interval);
        self.reserved
            .range((Excluded(lo), Excluded(hi)))
            .next()
            .is_some()
    }

    /// Pins a snapshot for `frame` regardless of ring cadence. An existing
    /// key is left untouched.
    pub fn capture_reserved<S>(&mut self, frame: u32, source: &mut S) -> io::Result<()>
    where
        S: Snapshotter + ?Sized,
    {
        if self.reserved.contains_key(&frame) {
            return Ok(());
        }
        let mut bytes = Vec::new();
        source.write_state(&mut bytes)?;
        self.reserved.insert(frame, bytes);
        self.index.insert(frame);
        Ok(())
    }

    /// Unpins `frame`. An absent key is not an error; frame 0 is.
    pub fn evict_reserved(&mut self, frame: u32) -> Result<(), StateError> {
        if frame == 0 {
            return Err(StateError::FrameZeroPinned);
        }
        if self.reserved.remove(&frame).is_some() {
            // A ring may still hold its own copy of a frame that was pinned
            // after capture; the frame stays addressable through it.
            if !self.frame_in_rings(frame) {
                self.index.remove(frame);
            }
            debug!(frame, "reserved state evicted");
        }
        Ok(())
    }

    fn frame_in_rings(&self, frame: u32) -> bool {
        [&self.current, &self.recent, &self.gap]
            .iter()
            .any(|ring| ring.find_frame(frame).is_some())
    }

    /// Drops every snapshot with a frame strictly greater than `frame`.
    /// Returns whether anything was removed.
    pub fn invalidate_after(&mut self, frame: u32) -> bool {
        let rings = self.invalidate_rings(frame);
        let gaps = self.invalidate_gaps(frame);
        let reserved = self.invalidate_reserved(frame);
        self.index.remove_after(frame);
        let removed = rings || gaps || reserved;
        if removed {
            debug!(frame, "history invalidated");
        }
        removed
    }

    /// All of the current ring post-dates all of the recent ring, so a cut
    /// anywhere in recent truncates current wholesale.
    fn invalidate_rings(&mut self, frame: u32) -> bool {
        let recent_position = self.recent.frames().position(|f| f > frame);
        if let Some(position) = recent_position {
            self.recent.invalidate_end(position);
            self.current.clear();
            return true;
        }
        let current_position = self.current.frames().position(|f| f > frame);
        if let Some(position) = current_position {
            self.current.invalidate_end(position);
            return true;
        }
        false
    }

    fn invalidate_gaps(&mut self, frame: u32) -> bool {
        let gap_position = self.gap.frames().position(|f| f > frame);
        if let Some(position) = gap_position {
            self.gap.invalidate_end(position);
            return true;
        }
        false
    }

    fn invalidate_reserved(&mut self, frame: u32) -> bool {
        let Some(split) = frame.checked_add(1) else {
            return false;
        };
        let dropped = self.reserved.split_off(&split);
        !dropped.is_empty()
    }

    /// Resets the store to its engaged baseline: only frame 0 survives.
    pub fn clear(&mut self) {
        self.current.clear();
        self.recent.clear();
        self.gap.clear();
        self.reserved.retain(|&frame, _| frame == 0);
        self.index.clear();
        if self.reserved.contains_key(&0) {
            self.index.insert(0);
        }
    }

    /// Consumes the store, releasing the ring arenas and reserved buffers.
    /// Any outstanding read handle has already ended its borrow by then.
    pub fn dispose(self) {}

    /// Applies a new configuration, rebuilding any ring whose config
    /// changed.
    ///
    /// With `keep_old_states`, entries of a rebuilt ring are re-admitted in
    /// their original order (reserve-callback hits divert to the reserved
    /// map so an unbounded capture loop cannot decay them), and a grown
    /// `ancient_interval` re-thins the anchors. Without it, rebuilt rings
    /// start empty and every non-pinned reserved state except frame 0 is
    /// dropped.
    pub fn update_settings(&mut self, settings: &StateManagerSettings, keep_old_states: bool) {
        Self::rebuild_ring(
            &mut self.current,
            &settings.current,
            keep_old_states,
            &self.reserve,
            &mut self.reserved,
        );
        Self::rebuild_ring(
            &mut self.recent,
            &settings.recent,
            keep_old_states,
            &self.reserve,
            &mut self.reserved,
        );
        Self::rebuild_ring(
            &mut self.gap,
            &settings.gap,
            keep_old_states,
            &self.reserve,
            &mut self.reserved,
        );

        if keep_old_states {
            if settings.ancient_interval > self.ancient_interval {
                self.thin_reserved(settings.ancient_interval);
            }
        } else {
            let reserve = &self.reserve;
            self.reserved
                .retain(|&frame, _| frame == 0 || reserve(frame));
        }

        self.ancient_interval = settings.ancient_interval;
        self.rebuild_index();
        debug!(
            ancient_interval = self.ancient_interval,
            kept = keep_old_states,
            "settings updated"
        );
    }

    fn rebuild_ring(
        ring: &mut ZwinderBuffer,
        config: &RingConfig,
        keep_old_states: bool,
        reserve: &ReserveCallback,
        reserved: &mut BTreeMap<u32, Vec<u8>>,
    ) {
        if ring.matches_settings(config) {
            return;
        }
        let old = std::mem::replace(ring, ZwinderBuffer::new(config));
        if keep_old_states {
            for index in 0..old.count() {
                let view = old.get(index);
                let frame = view.frame();
                if reserve(frame) {
                    reserved.insert(frame, view.to_vec());
                } else {
                    // Entries displaced here are dropped; the index is
                    // rebuilt from the survivors afterwards.
                    let bytes = view.to_vec();
                    ring.capture_bytes(frame, &bytes, true);
                }
            }
        }
    }

    /// Walks the anchors in ascending order, dropping every key that is not
    /// caller-reserved and sits closer than `interval` to the last kept one.
    fn thin_reserved(&mut self, interval: u32) {
        let keys: Vec<u32> = self.reserved.keys().copied().collect();
        let Some((&first, rest)) = keys.split_first() else {
            return;
        };
        let mut last_kept = first;
        for &key in rest {
            if !(self.reserve)(key) && key - last_kept < interval {
                self.reserved.remove(&key);
            } else {
                last_kept = key;
            }
        }
    }

    /// Rebuilds the derived index from the authoritative stores.
    pub(crate) fn rebuild_index(&mut self) {
        self.index.clear();
        for frame in self.current.frames() {
            self.index.insert(frame);
        }
        for frame in self.recent.frames() {
            self.index.insert(frame);
        }
        for frame in self.gap.frames() {
            self.index.insert(frame);
        }
        for &frame in self.reserved.keys() {
            self.index.insert(frame);
        }
    }

    /// Writes the whole store as a little-endian blob: the three ring blobs
    /// in current/recent/gap order, then the ancient interval and the
    /// reserved records. Settings are not persisted; pass them again on
    /// [`load`](Self::load).
    pub fn save<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        self.current.save(sink)?;
        self.recent.save(sink)?;
        self.gap.save(sink)?;
        sink.write_all(&(self.ancient_interval as i32).to_le_bytes())?;
        sink.write_all(&(self.reserved.len() as i32).to_le_bytes())?;
        for (&frame, bytes) in &self.reserved {
            sink.write_all(&(frame as i32).to_le_bytes())?;
            sink.write_all(&(bytes.len() as i32).to_le_bytes())?;
            sink.write_all(bytes)?;
        }
        Ok(())
    }

    /// Restores a store written by [`save`](Self::save).
    ///
    /// Ring configs come from `settings`; the persisted ancient interval
    /// overrides the one in `settings`. The frame index is rebuilt from the
    /// restored stores.
    pub fn load<R: Read + ?Sized>(
        source: &mut R,
        settings: &StateManagerSettings,
        reserve: ReserveCallback,
    ) -> io::Result<Self> {
        let current = ZwinderBuffer::create(source, &settings.current)?;
        let recent = ZwinderBuffer::create(source, &settings.recent)?;
        let gap = ZwinderBuffer::create(source, &settings.gap)?;
        let ancient_interval = read_i32(source)?;
        let count = read_i32(source)?;
        if ancient_interval < 0 || count < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "negative field in state blob",
            ));
        }
        let mut reserved = BTreeMap::new();
        for _ in 0..count {
            let frame = read_i32(source)?;
            let length = read_i32(source)?;
            if frame < 0 || length < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "negative reserved record field",
                ));
            }
            let mut bytes = vec![0; length as usize];
            source.read_exact(&mut bytes)?;
            reserved.insert(frame as u32, bytes);
        }
        let mut manager = Self {
            current,
            recent,
            gap,
            reserved,
            index: FrameIndex::new(),
            ancient_interval: ancient_interval as u32,
            reserve,
        };
        manager.rebuild_index();
        Ok(manager)
    }
}

fn read_i32<R: Read + ?Sized>(source: &mut R) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    source.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}
