pub mod builder;
pub mod process_control;
pub mod registry;
pub mod stats_collector;
pub mod store;
pub mod supervisor;

pub use builder::{Builder, GoBuilder, PrebuiltBuilder};
pub use registry::Registry;
pub use stats_collector::StatsCollector;
pub use store::Store;
pub use supervisor::Supervisor;
