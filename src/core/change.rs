use ndarray::{Array2, Array3};

use crate::core::cloud_mask::ValidityReport;
use crate::types::{
    AnalysisError, AnalysisMetrics, AnalysisResult, AnalysisType, Band, BoolMask, BoundingBox,
    Geometry, ImageComposite, VisualImage, PIXEL_AREA_HECTARES,
};

/// Denominator clamp that keeps percentage math free of division by zero
pub const AREA_EPSILON_HECTARES: f64 = 1e-6;

/// Reflectance mapped to full intensity in visual products
pub const VISUAL_MAX_REFLECTANCE: f32 = 3000.0;

/// Everything derived for one epoch before aggregation
#[derive(Debug, Clone)]
pub struct EpochData {
    pub composite: ImageComposite,
    pub validity: ValidityReport,
    pub class_mask: BoolMask,
}

/// Mutually-exclusive change partitions restricted to combined validity
///
/// At any pixel at most one of loss/gain/stable is true; a pixel excluded by
/// either epoch's validity mask is false in all three.
#[derive(Debug, Clone)]
pub struct ChangeMasks {
    pub loss: BoolMask,
    pub gain: BoolMask,
    pub stable: BoolMask,
}

/// The five raster products handed to the export coordinator
#[derive(Debug, Clone)]
pub struct RasterProducts {
    pub baseline_visual: VisualImage,
    pub current_visual: VisualImage,
    pub baseline_class: BoolMask,
    pub current_class: BoolMask,
    /// 3-channel inspection image: channel 1 loss, channel 2 stable,
    /// channel 3 gain, each 0 or 255
    pub difference: VisualImage,
}

/// Full output of the aggregation stage
#[derive(Debug, Clone)]
pub struct ChangeSummary {
    pub metrics: AnalysisMetrics,
    pub change_masks: ChangeMasks,
    pub products: RasterProducts,
    pub bounds: BoundingBox,
}

/// Render a composite's visual bands (B04/B03/B02) as an 8-bit RGB image.
fn to_visual_rgb(composite: &ImageComposite) -> AnalysisResult<VisualImage> {
    let red = composite.band(Band::B04)?;
    let green = composite.band(Band::B03)?;
    let blue = composite.band(Band::B02)?;

    let (rows, cols) = composite.dims();
    let mut rgb = Array3::<u8>::zeros((3, rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            if !composite.footprint[[i, j]] {
                continue;
            }
            for (c, band) in [red, green, blue].into_iter().enumerate() {
                let scaled = (band[[i, j]] / VISUAL_MAX_REFLECTANCE * 255.0).clamp(0.0, 255.0);
                rgb[[c, i, j]] = scaled as u8;
            }
        }
    }
    Ok(rgb)
}

fn difference_image(masks: &ChangeMasks) -> VisualImage {
    let (rows, cols) = masks.loss.dim();
    let mut diff = Array3::<u8>::zeros((3, rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            if masks.loss[[i, j]] {
                diff[[0, i, j]] = 255;
            }
            if masks.stable[[i, j]] {
                diff[[1, i, j]] = 255;
            }
            if masks.gain[[i, j]] {
                diff[[2, i, j]] = 255;
            }
        }
    }
    diff
}

/// Combine the two epochs into change partitions, area-weighted metrics and
/// the raster products.
///
/// The total is derived from the three partitions themselves, never from a
/// separately measured band, so `total == loss + gain + stable` holds by
/// construction. A fully-invalid comparison (complete cloud cover in both
/// epochs, or disjoint validity) yields all-zero hectares and 0% everywhere;
/// that is a completed result, not an error.
pub fn aggregate_change(
    geometry: &Geometry,
    baseline: &EpochData,
    current: &EpochData,
    analysis_type: AnalysisType,
) -> AnalysisResult<ChangeSummary> {
    let dims = baseline.composite.dims();
    if dims != current.composite.dims() {
        return Err(AnalysisError::Platform(format!(
            "epoch rasters have mismatched shapes: {:?} vs {:?}",
            dims,
            current.composite.dims()
        )));
    }
    let (rows, cols) = dims;

    let mut loss = Array2::<bool>::from_elem(dims, false);
    let mut gain = Array2::<bool>::from_elem(dims, false);
    let mut stable = Array2::<bool>::from_elem(dims, false);

    let mut footprint_count: u64 = 0;
    let mut combined_count: u64 = 0;
    let mut loss_count: u64 = 0;
    let mut gain_count: u64 = 0;
    let mut stable_count: u64 = 0;

    for i in 0..rows {
        for j in 0..cols {
            let in_footprint =
                baseline.composite.footprint[[i, j]] && current.composite.footprint[[i, j]];
            if !in_footprint {
                continue;
            }
            footprint_count += 1;

            // Combined validity: both epochs must have a usable pixel here
            if !(baseline.validity.mask[[i, j]] && current.validity.mask[[i, j]]) {
                continue;
            }
            combined_count += 1;

            let was = baseline.class_mask[[i, j]];
            let is = current.class_mask[[i, j]];
            match (was, is) {
                (true, false) => {
                    loss[[i, j]] = true;
                    loss_count += 1;
                }
                (false, true) => {
                    gain[[i, j]] = true;
                    gain_count += 1;
                }
                (true, true) => {
                    stable[[i, j]] = true;
                    stable_count += 1;
                }
                (false, false) => {}
            }
        }
    }

    let valid_pixels_percentage = if footprint_count == 0 {
        0.0
    } else {
        (combined_count as f64 / footprint_count as f64 * 100.0).clamp(0.0, 100.0)
    };

    let loss_hectares = loss_count as f64 * PIXEL_AREA_HECTARES;
    let gain_hectares = gain_count as f64 * PIXEL_AREA_HECTARES;
    let stable_hectares = stable_count as f64 * PIXEL_AREA_HECTARES;
    let total_hectares = loss_hectares + gain_hectares + stable_hectares;

    // Epsilon clamp keeps the percentages finite when nothing was classified
    let denominator = total_hectares.max(AREA_EPSILON_HECTARES);
    let loss_percentage = loss_hectares / denominator * 100.0;
    let gain_percentage = gain_hectares / denominator * 100.0;
    let net_change_percentage = gain_percentage - loss_percentage;

    let metrics = AnalysisMetrics {
        analysis_type,
        baseline_date: baseline.composite.representative_date,
        current_date: current.composite.representative_date,
        baseline_cloud_coverage: baseline.validity.cloud_coverage,
        current_cloud_coverage: current.validity.cloud_coverage,
        valid_pixels_percentage,
        loss_hectares,
        gain_hectares,
        stable_hectares,
        total_hectares,
        loss_percentage,
        gain_percentage,
        net_change_percentage,
    };

    log::info!(
        "Change aggregated - loss: {:.2} ha, gain: {:.2} ha, stable: {:.2} ha, net: {:.2}%",
        metrics.loss_hectares,
        metrics.gain_hectares,
        metrics.stable_hectares,
        metrics.net_change_percentage
    );

    let change_masks = ChangeMasks { loss, gain, stable };
    let products = RasterProducts {
        baseline_visual: to_visual_rgb(&baseline.composite)?,
        current_visual: to_visual_rgb(&current.composite)?,
        baseline_class: baseline.class_mask.clone(),
        current_class: current.class_mask.clone(),
        difference: difference_image(&change_masks),
    };

    Ok(ChangeSummary {
        metrics,
        change_masks,
        products,
        bounds: geometry.bounding_box(),
    })
}
