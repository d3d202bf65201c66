pub mod executor;
pub mod interval;
pub mod scheduler;

pub use executor::{PushExecutor, PushOutcome};
pub use interval::PushInterval;
pub use scheduler::PushScheduler;
