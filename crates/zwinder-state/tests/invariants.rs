//! Randomized op sequences checked against the public-surface contracts:
//! frame 0 is always addressable, closest-state queries agree with
//! membership, invalidation is total, and a save/load round trip
//! reproduces the store.

mod common;

use proptest::prelude::*;
use zwinder_state::{ReserveCallback, RingConfig, StateManager, StateManagerSettings};

use common::frame_source;

#[derive(Debug, Clone)]
enum Op {
    /// Step the emulator forward, capturing every frame.
    Advance(u8),
    /// Seek backward and replay over the re-opened region.
    SeekReplay(u8),
    Invalidate(u16),
    Reserve(u16),
    Unreserve(u16),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (1u8..20).prop_map(Op::Advance),
        2 => (1u8..30).prop_map(Op::SeekReplay),
        1 => (0u16..600).prop_map(Op::Invalidate),
        1 => (0u16..700).prop_map(Op::Reserve),
        1 => (0u16..700).prop_map(Op::Unreserve),
        1 => Just(Op::Clear),
    ]
}

/// Small budgets so eviction and promotion churn constantly.
fn churn_settings() -> StateManagerSettings {
    StateManagerSettings {
        current: RingConfig {
            buffer_bytes: 64,
            rewind_frequency: 2,
        },
        recent: RingConfig {
            buffer_bytes: 32,
            rewind_frequency: 4,
        },
        gap: RingConfig {
            buffer_bytes: 16,
            rewind_frequency: 2,
        },
        ancient_interval: 25,
    }
}

fn marker_rule() -> ReserveCallback {
    Box::new(|frame| frame != 0 && frame % 37 == 0)
}

proptest! {
    #[test]
    fn random_ops_uphold_the_store_contracts(ops in prop::collection::vec(op(), 1..60)) {
        let mut manager = StateManager::new(&churn_settings(), marker_rule());
        manager.engage(0u32.to_le_bytes().to_vec());
        let mut cursor = 0u32;

        for op in ops {
            match op {
                Op::Advance(n) => {
                    for _ in 0..n {
                        cursor += 1;
                        manager.capture(cursor, &mut frame_source(cursor), false).unwrap();
                    }
                }
                Op::SeekReplay(n) => {
                    let target = cursor.saturating_sub(n as u32);
                    for frame in target..=cursor {
                        manager.capture(frame, &mut frame_source(frame), false).unwrap();
                    }
                }
                Op::Invalidate(at) => {
                    let at = at as u32;
                    manager.invalidate_after(at);
                    prop_assert!(manager.last() <= at);
                    cursor = cursor.min(at);
                }
                Op::Reserve(frame) => {
                    let frame = frame as u32;
                    manager.capture_reserved(frame, &mut frame_source(frame)).unwrap();
                    prop_assert!(manager.has_state(frame));
                }
                Op::Unreserve(frame) => {
                    let frame = frame as u32;
                    if frame == 0 {
                        prop_assert!(manager.evict_reserved(0).is_err());
                    } else {
                        manager.evict_reserved(frame).unwrap();
                    }
                }
                Op::Clear => {
                    manager.clear();
                    cursor = 0;
                    prop_assert_eq!(manager.count(), 1);
                }
            }

            prop_assert!(manager.has_state(0));
            let last = manager.last();
            prop_assert!(manager.has_state(last));
            prop_assert_eq!(manager.get_closest(last).unwrap().0, last);
            prop_assert_eq!(manager.get_closest(last.saturating_add(10)).unwrap().0, last);
        }

        // Every stored snapshot reads back as the frame that produced it,
        // and closest-state queries track membership exactly.
        let last = manager.last();
        let mut newest_seen = 0u32;
        for frame in 0..=last {
            if manager.has_state(frame) {
                newest_seen = frame;
                prop_assert_eq!(manager.state_at(frame), frame.to_le_bytes().to_vec());
            } else {
                prop_assert!(manager.state_at(frame).is_empty());
            }
            prop_assert_eq!(manager.get_closest(frame).unwrap().0, newest_seen);
        }

        // A round trip through the persisted form reproduces the store.
        let mut blob = Vec::new();
        manager.save(&mut blob).unwrap();
        let restored =
            StateManager::load(&mut blob.as_slice(), &churn_settings(), marker_rule()).unwrap();
        prop_assert_eq!(restored.store_counts(), manager.store_counts());
        prop_assert_eq!(restored.last(), manager.last());
        for frame in 0..=last {
            prop_assert_eq!(restored.state_at(frame), manager.state_at(frame));
        }
    }
}
