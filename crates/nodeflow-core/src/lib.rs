pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use envelope::{MergeEnvelope, SourceMeta};
pub use error::{NodeflowError, Result};
pub use event::EventBus;
pub use state::SharedState;
pub use traits::{ExecutionContext, IterationInfo, NodeExecutor};
pub use types::*;
