//! Operator surface: layered settings and an in-process lifecycle run.

pub mod settings;
pub mod simulate;

pub use settings::{Settings, SimulationSettings};
pub use simulate::{run_lifecycle, LifecycleReport};
