pub mod admission;
pub mod discovery;
pub mod orchestrator;
pub mod progress;
pub mod values;

pub use orchestrator::IngestService;
pub use progress::{Progress, ProgressSnapshot};
