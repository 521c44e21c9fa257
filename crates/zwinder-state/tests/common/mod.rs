#![allow(dead_code)]

use std::io::{self, Write};
use std::ops::RangeInclusive;

use zwinder_state::{RingConfig, StateManager, StateManagerSettings};

/// One-byte snapshots and entry-sized budgets keep eviction math exact:
/// the current ring holds 4 states, the recent ring 2, the gap ring 2.
pub fn tiny_settings() -> StateManagerSettings {
    StateManagerSettings {
        current: RingConfig {
            buffer_bytes: 4,
            rewind_frequency: 1,
        },
        recent: RingConfig {
            buffer_bytes: 2,
            rewind_frequency: 1,
        },
        gap: RingConfig {
            buffer_bytes: 2,
            rewind_frequency: 1,
        },
        ancient_interval: 10,
    }
}

/// A snapshotter producing a single-byte state.
pub fn byte_source(byte: u8) -> impl FnMut(&mut dyn Write) -> io::Result<()> {
    move |sink| sink.write_all(&[byte])
}

/// A snapshotter producing the frame number as four little-endian bytes.
pub fn frame_source(frame: u32) -> impl FnMut(&mut dyn Write) -> io::Result<()> {
    move |sink| sink.write_all(&frame.to_le_bytes())
}

pub fn engaged(settings: &StateManagerSettings) -> StateManager {
    let mut manager = StateManager::new(settings, Box::new(|_| false));
    manager.engage(vec![0x00]);
    manager
}

/// Captures `frames` in order with one-byte states `[frame as u8]`.
pub fn capture_linear(manager: &mut StateManager, frames: RangeInclusive<u32>) {
    for frame in frames {
        manager
            .capture(frame, &mut byte_source(frame as u8), false)
            .unwrap();
    }
}
