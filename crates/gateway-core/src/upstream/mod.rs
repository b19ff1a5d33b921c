//! Upstream provider management: health probing, taint control, rolling
//! success windows, and the per-target HTTP adapter.
//!
//! The supervisor owns one (prober, taint controller, rolling window) triple
//! per configured target and exposes the [`HealthView`] capability the
//! dispatcher selects candidates through.

pub mod errors;
pub mod prober;
pub mod rolling_window;
pub mod supervisor;
pub mod taint;
pub mod target;

pub use errors::UpstreamError;
pub use prober::{HealthProber, ProberConfig};
pub use rolling_window::RollingWindow;
pub use supervisor::{HealthSupervisor, HealthView, TargetRuntime};
pub use taint::{TaintController, INITIAL_BACK_OFF, MAX_BACK_OFF, RESET_WINDOW};
pub use target::UpstreamTarget;
