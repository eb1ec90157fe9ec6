use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Single spectral band clipped to an area of interest
pub type BandImage = Array2<f32>;

/// Boolean raster (validity mask, class mask, footprint)
pub type BoolMask = Array2<bool>;

/// 3-channel 8-bit visual product (channel x row x col)
pub type VisualImage = Array3<u8>;

/// Native resolution of the source imagery, in meters per pixel
pub const ANALYSIS_SCALE_METERS: f64 = 10.0;

/// Hectares covered by one pixel at the analysis scale
pub const PIXEL_AREA_HECTARES: f64 = ANALYSIS_SCALE_METERS * ANALYSIS_SCALE_METERS / 10_000.0;

/// Sentinel-2 bands consumed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    /// Blue (490 nm)
    B02,
    /// Green (560 nm)
    B03,
    /// Red (665 nm)
    B04,
    /// Near infrared (842 nm)
    B08,
    /// Scene classification layer
    Scl,
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Band::B02 => write!(f, "B02"),
            Band::B03 => write!(f, "B03"),
            Band::B04 => write!(f, "B04"),
            Band::B08 => write!(f, "B08"),
            Band::Scl => write!(f, "SCL"),
        }
    }
}

/// Supported classification types, matching the wire contract of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisType {
    /// Vegetation-like cover, thresholded on NDVI
    #[serde(rename = "classA")]
    Vegetation,
    /// Water-like cover, thresholded on NDWI
    #[serde(rename = "classB")]
    Water,
}

impl AnalysisType {
    pub fn parse(s: &str) -> AnalysisResult<Self> {
        match s {
            "classA" => Ok(AnalysisType::Vegetation),
            "classB" => Ok(AnalysisType::Water),
            other => Err(AnalysisError::UnsupportedClassification(other.to_string())),
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisType::Vegetation => write!(f, "classA"),
            AnalysisType::Water => write!(f, "classB"),
        }
    }
}

/// Half-open date interval [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of whole days covered by the window
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Bounds as [west, south, east, north], the ordering map clients expect
    pub fn as_bounds(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// Closed polygon ring in (longitude, latitude) order
///
/// Immutable once constructed. The ring is assumed non-self-intersecting;
/// that property is not validated here.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    ring: Vec<[f64; 2]>,
}

impl Geometry {
    /// Build a closed geometry from raw vertices, closing the ring if the
    /// caller did not. Fails with `InvalidGeometry` on degenerate input.
    pub fn from_vertices(vertices: &[[f64; 2]]) -> AnalysisResult<Self> {
        if vertices.is_empty() {
            return Err(AnalysisError::InvalidGeometry(
                "polygon has no vertices".to_string(),
            ));
        }

        let mut ring = vertices.to_vec();
        if ring.first() != ring.last() {
            ring.push(ring[0]);
        }

        // A closed ring needs at least a triangle: 3 distinct vertices + closure
        if ring.len() < 4 {
            return Err(AnalysisError::InvalidGeometry(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                ring.len() - 1
            )));
        }

        Ok(Self { ring })
    }

    /// Vertices of the closed ring, first == last
    pub fn ring(&self) -> &[[f64; 2]] {
        &self.ring
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for [lon, lat] in &self.ring {
            bbox.min_lon = bbox.min_lon.min(*lon);
            bbox.max_lon = bbox.max_lon.max(*lon);
            bbox.min_lat = bbox.min_lat.min(*lat);
            bbox.max_lat = bbox.max_lat.max(*lat);
        }
        bbox
    }
}

/// Temporally-aggregated multi-band raster clipped to a geometry
///
/// Owned by the window selector and never mutated after creation. The
/// footprint marks pixels that fall inside the geometry; bands and footprint
/// share the same shape.
#[derive(Debug, Clone)]
pub struct ImageComposite {
    pub representative_date: NaiveDate,
    pub bands: HashMap<Band, BandImage>,
    pub footprint: BoolMask,
}

impl ImageComposite {
    /// Fetch a band, failing with `MissingBand` rather than defaulting
    pub fn band(&self, band: Band) -> AnalysisResult<&BandImage> {
        self.bands.get(&band).ok_or(AnalysisError::MissingBand(band))
    }

    /// Raster shape as (rows, cols)
    pub fn dims(&self) -> (usize, usize) {
        self.footprint.dim()
    }
}

/// The five raster products exported per job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductKind {
    BaselineImage,
    CurrentImage,
    BaselineComputed,
    CurrentComputed,
    DifferenceImage,
}

impl ProductKind {
    pub const ALL: [ProductKind; 5] = [
        ProductKind::BaselineImage,
        ProductKind::CurrentImage,
        ProductKind::BaselineComputed,
        ProductKind::CurrentComputed,
        ProductKind::DifferenceImage,
    ];
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductKind::BaselineImage => write!(f, "baseline_image"),
            ProductKind::CurrentImage => write!(f, "current_image"),
            ProductKind::BaselineComputed => write!(f, "baseline_computed"),
            ProductKind::CurrentComputed => write!(f, "current_computed"),
            ProductKind::DifferenceImage => write!(f, "difference_image"),
        }
    }
}

/// Scalar results of one change-detection job
///
/// This record is the payload contract with the backend; immutable once
/// computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetrics {
    pub analysis_type: AnalysisType,
    pub baseline_date: NaiveDate,
    pub current_date: NaiveDate,
    pub baseline_cloud_coverage: f64,
    pub current_cloud_coverage: f64,
    pub valid_pixels_percentage: f64,
    pub loss_hectares: f64,
    pub gain_hectares: f64,
    pub stable_hectares: f64,
    pub total_hectares: f64,
    pub loss_percentage: f64,
    pub gain_percentage: f64,
    pub net_change_percentage: f64,
}

/// Storage locators for the exported raster products
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrls {
    pub baseline_image: String,
    pub current_image: String,
    pub baseline_computed: String,
    pub current_computed: String,
    pub difference_image: String,
}

impl ImageUrls {
    /// Build from a per-product locator map; `None` if any product is absent
    pub fn from_map(mut urls: HashMap<ProductKind, String>) -> Option<Self> {
        Some(Self {
            baseline_image: urls.remove(&ProductKind::BaselineImage)?,
            current_image: urls.remove(&ProductKind::CurrentImage)?,
            baseline_computed: urls.remove(&ProductKind::BaselineComputed)?,
            current_computed: urls.remove(&ProductKind::CurrentComputed)?,
            difference_image: urls.remove(&ProductKind::DifferenceImage)?,
        })
    }
}

/// Inbound job request, as posted by the orchestrating backend
///
/// The backend stores lat/lng pairs and transposes to [lon, lat] before
/// invoking the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub area_id: String,
    pub result_id: String,
    pub polygon: Vec<[f64; 2]>,
    #[serde(rename = "type")]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub is_baseline: bool,
}

/// Terminal status reported back to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Outbound callback payload, the unit of `callback-or-bust` delivery
///
/// On failure only `result_id`, `status` and `error_message` are populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub result_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_urls: Option<ImageUrls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AnalysisMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[f64; 4]>,
}

impl CallbackPayload {
    pub fn failed(result_id: &str, error_message: String) -> Self {
        Self {
            result_id: result_id.to_string(),
            status: JobStatus::Failed,
            error_message: Some(error_message),
            image_urls: None,
            metrics: None,
            bounds: None,
        }
    }
}

/// Pipeline stages, used to tag errors with their origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Selector,
    CloudMask,
    Classifier,
    Aggregator,
    Export,
    Callback,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Selector => write!(f, "selector"),
            Stage::CloudMask => write!(f, "cloud-mask"),
            Stage::Classifier => write!(f, "classifier"),
            Stage::Aggregator => write!(f, "aggregator"),
            Stage::Export => write!(f, "export"),
            Stage::Callback => write!(f, "callback"),
        }
    }
}

/// Error types for the change-detection pipeline
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("no imagery available for window {0}")]
    NoImageryAvailable(TimeWindow),

    #[error("unsupported classification type: {0}")]
    UnsupportedClassification(String),

    #[error("missing band {0} in composite")]
    MissingBand(Band),

    #[error("export of {product} failed: {reason}")]
    ExportFailed { product: ProductKind, reason: String },

    #[error("export timed out; pending products: {}", format_products(.0))]
    ExportTimeout(Vec<ProductKind>),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("imagery platform error: {0}")]
    Platform(String),

    #[error("callback delivery exhausted after {attempts} attempts for result {result_id}")]
    CallbackDeliveryExhausted { result_id: String, attempts: u32 },
}

fn format_products(products: &[ProductKind]) -> String {
    products
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A stage error carrying the originating pipeline stage for diagnostics
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: AnalysisError,
}

impl StageError {
    pub fn new(stage: Stage, source: AnalysisError) -> Self {
        Self { stage, source }
    }
}

/// Result type for pipeline operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<[f64; 2]> {
        vec![[-74.0, 40.7], [-73.9, 40.7], [-73.9, 40.8], [-74.0, 40.8]]
    }

    #[test]
    fn test_geometry_closes_open_ring() {
        let geom = Geometry::from_vertices(&square()).unwrap();
        assert_eq!(geom.ring().len(), 5);
        assert_eq!(geom.ring().first(), geom.ring().last());
    }

    #[test]
    fn test_geometry_keeps_closed_ring() {
        let mut ring = square();
        ring.push(ring[0]);
        let geom = Geometry::from_vertices(&ring).unwrap();
        assert_eq!(geom.ring().len(), 5);
    }

    #[test]
    fn test_geometry_rejects_empty() {
        let err = Geometry::from_vertices(&[]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidGeometry(_)));
    }

    #[test]
    fn test_geometry_rejects_degenerate() {
        let err = Geometry::from_vertices(&[[0.0, 0.0], [1.0, 1.0]]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidGeometry(_)));
    }

    #[test]
    fn test_bounding_box_ordering() {
        let geom = Geometry::from_vertices(&square()).unwrap();
        let bounds = geom.bounding_box().as_bounds();
        assert_eq!(bounds, [-74.0, 40.7, -73.9, 40.8]);
    }

    #[test]
    fn test_analysis_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&AnalysisType::Vegetation).unwrap(),
            "\"classA\""
        );
        assert_eq!(AnalysisType::parse("classB").unwrap(), AnalysisType::Water);
        assert!(matches!(
            AnalysisType::parse("forest"),
            Err(AnalysisError::UnsupportedClassification(_))
        ));
    }

    #[test]
    fn test_failed_payload_is_minimal() {
        let payload = CallbackPayload::failed("r-1", "selector stage failed".to_string());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json.get("metrics").is_none());
        assert!(json.get("image_urls").is_none());
        assert!(json.get("bounds").is_none());
    }

    #[test]
    fn test_request_decodes_wire_format() {
        let raw = r#"{
            "area_id": "a-1",
            "result_id": "r-1",
            "polygon": [[-74.0, 40.7], [-73.9, 40.7], [-73.9, 40.8], [-74.0, 40.8]],
            "type": "classA",
            "is_baseline": true
        }"#;
        let req: AnalysisRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.analysis_type, AnalysisType::Vegetation);
        assert!(req.is_baseline);
        assert_eq!(req.polygon.len(), 4);
    }
}
