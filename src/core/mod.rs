// Sequential execution engine: joinable queue, workers and the action runner

pub mod executor;
pub mod queue;
pub mod scheduler;

pub use executor::*;
pub use queue::JoinableQueue;
pub use scheduler::*;
