pub mod error;
pub mod index;
pub mod manager;
pub mod settings;

pub use error::StateError;
pub use index::FrameIndex;
pub use manager::{ReserveCallback, Snapshotter, StateManager};
pub use settings::StateManagerSettings;
pub use zwinder_ring::{RingConfig, StateReader};

#[cfg(test)]
mod tests {
    use ctor::ctor;
    use tracing::Level;
    use tracing_subscriber::FmtSubscriber;

    #[ctor]
    fn init_tracing() {
        let subscriber = FmtSubscriber::builder()
            .with_file(true)
            .with_line_number(true)
            .with_max_level(Level::TRACE)
            .pretty()
            .finish();
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
    }
}
