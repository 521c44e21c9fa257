/// Sizing and cadence for one ring buffer.
///
/// Two buffers with equal configs are interchangeable; the state manager
/// uses that to decide whether a settings change requires a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Byte budget for stored snapshot payloads.
    pub buffer_bytes: u64,
    /// Minimum frame delta between admitted captures. A capture closer than
    /// this to the newest entry is refused unless forced.
    pub rewind_frequency: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 256 << 20,
            rewind_frequency: 1,
        }
    }
}
