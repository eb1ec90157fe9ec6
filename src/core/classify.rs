use ndarray::Array2;

use crate::types::{AnalysisResult, AnalysisType, Band, BandImage, BoolMask, ImageComposite};

/// NDVI threshold above which a pixel counts as vegetation
pub const NDVI_THRESHOLD: f32 = 0.40;

/// NDWI threshold above which a pixel counts as open water
pub const NDWI_THRESHOLD: f32 = 0.30;

/// Normalized difference of two bands, (a - b) / (a + b), in [-1, 1].
///
/// A zero denominator yields 0.0 for that pixel instead of NaN.
fn normalized_difference(a: &BandImage, b: &BandImage) -> BandImage {
    let mut index = Array2::<f32>::zeros(a.dim());
    for ((i, j), out) in index.indexed_iter_mut() {
        let sum = a[[i, j]] + b[[i, j]];
        if sum.abs() > f32::EPSILON {
            *out = (a[[i, j]] - b[[i, j]]) / sum;
        }
    }
    index
}

/// Threshold the composite's class index into a binary class mask for one
/// epoch, restricted to the epoch's validity mask.
///
/// Each classification type binds to exactly one index and one fixed
/// threshold: vegetation uses NDVI = (B08 - B04) / (B08 + B04), water uses
/// NDWI = (B03 - B08) / (B03 + B08). Thresholds are configuration constants,
/// never request-supplied.
pub fn classify(
    composite: &ImageComposite,
    validity: &BoolMask,
    analysis_type: AnalysisType,
) -> AnalysisResult<BoolMask> {
    let (index, threshold) = match analysis_type {
        AnalysisType::Vegetation => {
            let nir = composite.band(Band::B08)?;
            let red = composite.band(Band::B04)?;
            (normalized_difference(nir, red), NDVI_THRESHOLD)
        }
        AnalysisType::Water => {
            let green = composite.band(Band::B03)?;
            let nir = composite.band(Band::B08)?;
            (normalized_difference(green, nir), NDWI_THRESHOLD)
        }
    };

    let mut class_mask = Array2::<bool>::from_elem(index.dim(), false);
    for ((i, j), out) in class_mask.indexed_iter_mut() {
        *out = validity[[i, j]] && index[[i, j]] > threshold;
    }

    log::debug!(
        "Classified {} epoch as {}: {} positive pixels",
        composite.representative_date,
        analysis_type,
        class_mask.iter().filter(|&&v| v).count()
    );

    Ok(class_mask)
}
