pub mod buffer;
pub mod config;
pub mod reader;

pub use buffer::{CaptureResult, EvictedState, StateView, ZwinderBuffer};
pub use config::RingConfig;
pub use reader::StateReader;
