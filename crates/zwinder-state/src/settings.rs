use zwinder_ring::RingConfig;

/// Configuration for the whole state store.
///
/// Each ring gets its own byte budget and cadence. `ancient_interval` is the
/// target minimum spacing, in frames, between the long-term anchors that are
/// kept when states fall off the recent ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateManagerSettings {
    /// Head buffer; every capture past the previous head is offered here.
    pub current: RingConfig,
    /// Takes the overflow from the current ring's old edge, usually with a
    /// coarser cadence.
    pub recent: RingConfig,
    /// Fills holes re-opened behind the head after backward seeks.
    pub gap: RingConfig,
    /// Target minimum spacing between auto-promoted anchors.
    pub ancient_interval: u32,
}

impl Default for StateManagerSettings {
    fn default() -> Self {
        Self {
            current: RingConfig {
                buffer_bytes: 256 << 20,
                rewind_frequency: 1,
            },
            recent: RingConfig {
                buffer_bytes: 128 << 20,
                rewind_frequency: 16,
            },
            gap: RingConfig {
                buffer_bytes: 1 << 20,
                rewind_frequency: 1,
            },
            ancient_interval: 5000,
        }
    }
}
