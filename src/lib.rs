pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

pub use client::RemoteClient;
pub use error::{ErrorKind, Result, SupervisorError};
pub use services::Supervisor;
