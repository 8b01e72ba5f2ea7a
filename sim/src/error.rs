//! Simulator error types.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] tandem_engine::Error),

    #[error("replica {store_id} diverged from replica {reference}")]
    Diverged { store_id: u32, reference: u32 },
}
