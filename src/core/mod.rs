//! Core change-detection modules

pub mod change;
pub mod classify;
pub mod cloud_mask;
pub mod selector;

// Re-export main types
pub use change::{aggregate_change, ChangeMasks, ChangeSummary, EpochData, RasterProducts};
pub use classify::{classify, NDVI_THRESHOLD, NDWI_THRESHOLD};
pub use cloud_mask::{build_validity_mask, ValidityReport};
pub use selector::{baseline_window, current_window, select_epochs, SelectedEpochs};
