//! # Rover Canary Library
//!
//! Hardware-in-the-loop canary for a wheeled rover: each test case commands a
//! motion primitive (base or motor), samples telemetry concurrently while the
//! command runs, and judges the achieved displacement and speed against
//! tolerance bands. Outcomes are collected into a run summary and delivered to
//! configurable report sinks.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: async capability traits (`Base`, `Motor`, `Encoder`,
//!   `MovementSensor`, `PowerSensor`) and a simulated rover implementing them.
//! - **`sampling`**: tolerance bands, direction and angle-wrap helpers, and the
//!   Telemetry Sampler with its convergence judge.
//! - **`procedures`**: the motion runners, static sensor checks, the grid path
//!   test and the sequencer that runs the fixed catalogue.
//! - **`report`**: diagnostic trace sinks (CSV) and result reporters (tracing,
//!   chat webhook).
//! - **`config`**: layered configuration loaded with figment.
//! - **`logging`**: tracing-subscriber initialisation.
//! - **`error`**: the `CanaryError` taxonomy.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod procedures;
pub mod report;
pub mod sampling;

pub use error::{AppResult, CanaryError};
