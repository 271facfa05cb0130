//! # Worker
//!
//! The composition root ([`Worker`]), its construction from configuration
//! ([`WorkerBootstrap`]), and the multi-process [`Supervisor`].

pub mod bootstrap;
pub mod service;
pub mod supervisor;

pub use bootstrap::WorkerBootstrap;
pub use service::{ControlDispatcher, ShutdownReport, Worker, WorkerComponents};
pub use supervisor::{Supervisor, SupervisorReport};
