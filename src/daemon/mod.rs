//! Everything that talks to, or about, the edenfs daemon process.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Supervisor                   │
//! │   start (spawn / exec)  │  stop  │  poll     │
//! ├─────────────────────────────────────────────┤
//! │                HealthOracle                  │
//! │  EdenControl (socket)  │  lock file + ps     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The control channel is behind the [`EdenControl`] trait and the OS
//! process table behind [`ProcessTable`], so both can be replaced in tests.

pub mod client;
pub mod control;
pub mod environment;
pub mod health;
pub mod privilege;
pub mod process;
pub mod protocol;
pub mod supervisor;

pub use client::SocketClient;
pub use control::{ControlError, ControlResult, EdenControl};
pub use health::{HealthOracle, HealthStatus};
pub use process::{ProcessTable, SystemProcessTable};
pub use protocol::{DaemonStatus, Request, Response};
pub use supervisor::{StartOptions, StopOutcome, Supervisor};
