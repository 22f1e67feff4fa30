pub mod process;
pub mod stats;

pub use process::{ProcessDefinition, ProcessRecord, ProcessState, StatusSnapshot};
pub use stats::ProcessStats;
