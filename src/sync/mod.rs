pub mod reconciler;

pub use reconciler::{CycleReport, Reconciler};
