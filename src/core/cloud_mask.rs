use ndarray::Array2;

use crate::types::{AnalysisResult, Band, BoolMask, ImageComposite};

/// Sentinel-2 scene classification (SCL) values relevant to masking
pub mod scl {
    pub const NO_DATA: u8 = 0;
    pub const CLOUD_SHADOW: u8 = 3;
    pub const CLOUD_MEDIUM: u8 = 8;
    pub const CLOUD_HIGH: u8 = 9;
    pub const CIRRUS: u8 = 10;
}

/// Per-pixel validity plus the scalar cloud estimate for one composite
#[derive(Debug, Clone)]
pub struct ValidityReport {
    pub mask: BoolMask,
    /// Residual cloud/shadow contamination in percent, clamped to [0, 100]
    pub cloud_coverage: f64,
}

fn is_bad_class(value: f32) -> bool {
    let class = value.round() as i64;
    class == scl::CLOUD_SHADOW as i64
        || class == scl::CLOUD_MEDIUM as i64
        || class == scl::CLOUD_HIGH as i64
        || class == scl::CIRRUS as i64
}

fn is_no_data(value: f32) -> bool {
    value.round() as i64 == scl::NO_DATA as i64 || value.is_nan()
}

/// Derive the validity mask and cloud coverage from a composite's SCL band.
///
/// A pixel is valid when it lies inside the geometry footprint, is not
/// classified as cloud, shadow or cirrus, and carries data. Coverage is the
/// share of footprint pixels hit by the bad set; an empty footprint reports
/// 0.0 rather than dividing by zero.
///
/// Median compositing already suppresses transient clouds, so the reported
/// figure measures residual contamination. Pure function of its input.
pub fn build_validity_mask(composite: &ImageComposite) -> AnalysisResult<ValidityReport> {
    let scl_band = composite.band(Band::Scl)?;
    let (rows, cols) = composite.dims();

    let mut mask = Array2::<bool>::from_elem((rows, cols), false);
    let mut footprint_count: u64 = 0;
    let mut bad_count: u64 = 0;

    for i in 0..rows {
        for j in 0..cols {
            if !composite.footprint[[i, j]] {
                continue;
            }
            footprint_count += 1;

            let value = scl_band[[i, j]];
            let bad = is_bad_class(value);
            if bad {
                bad_count += 1;
            }
            mask[[i, j]] = !bad && !is_no_data(value);
        }
    }

    let cloud_coverage = if footprint_count == 0 {
        0.0
    } else {
        (bad_count as f64 / footprint_count as f64 * 100.0).clamp(0.0, 100.0)
    };

    log::debug!(
        "Validity mask built for {}: {:.2}% cloud over {} footprint pixels",
        composite.representative_date,
        cloud_coverage,
        footprint_count
    );

    Ok(ValidityReport {
        mask,
        cloud_coverage,
    })
}
