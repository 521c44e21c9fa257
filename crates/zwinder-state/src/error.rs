use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    /// Frame 0 anchors every closest-state query and can never be evicted.
    #[error("frame 0 is permanently reserved and cannot be evicted")]
    FrameZeroPinned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
