pub mod accumulator;
pub mod builtin;
pub mod condition;
pub mod engine;
pub mod graph;
pub mod loops;
pub mod merge;
pub mod parallel;
pub mod registry;
pub mod run_log;
pub mod scheduler;
pub mod skip;
pub mod topo;

pub use engine::{Engine, RunOptions};
pub use graph::GraphModel;
pub use registry::ExecutorRegistry;
pub use run_log::RunLogger;
pub use topo::{topological_order, CycleDetected};
