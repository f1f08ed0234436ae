pub mod store;
pub mod worker;

pub use store::TaskStore;
pub use worker::{spawn, GenerationJob, WorkerContext};
