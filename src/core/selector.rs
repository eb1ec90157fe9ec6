use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::io::imagery::ImageryProvider;
use crate::types::{AnalysisError, AnalysisResult, Geometry, ImageComposite, TimeWindow};

/// Lookback for the current epoch, ending at "now"
pub const CURRENT_LOOKBACK_DAYS: i64 = 45;

/// Baseline and current composites resolved for one job
#[derive(Debug)]
pub struct SelectedEpochs {
    pub geometry: Geometry,
    pub baseline: ImageComposite,
    pub current: ImageComposite,
    pub baseline_window: TimeWindow,
    pub current_window: TimeWindow,
}

/// Current window: the 45 days ending at "now", today exclusive.
///
/// Deterministic given the same "now", so re-running a job later rolls the
/// window forward naturally.
pub fn current_window(now: DateTime<Utc>) -> TimeWindow {
    let end = now.date_naive();
    TimeWindow::new(end - Duration::days(CURRENT_LOOKBACK_DAYS), end)
}

/// Baseline window: the full calendar month preceding the month of the
/// current composite's representative date.
pub fn baseline_window(current_date: NaiveDate) -> TimeWindow {
    let first_of_month = NaiveDate::from_ymd_opt(current_date.year(), current_date.month(), 1)
        .unwrap_or(current_date);
    let (prev_year, prev_month) = if current_date.month() == 1 {
        (current_date.year() - 1, 12)
    } else {
        (current_date.year(), current_date.month() - 1)
    };
    let first_of_prev = NaiveDate::from_ymd_opt(prev_year, prev_month, 1).unwrap_or(first_of_month);
    TimeWindow::new(first_of_prev, first_of_month)
}

/// Resolve a polygon and "now" into a closed geometry plus two composites.
///
/// The windows may overlap when the current composite resolves early in a
/// month; the pairing rule is deterministic either way. A window with zero
/// source scenes fails the job with `NoImageryAvailable`.
pub async fn select_epochs<P: ImageryProvider + ?Sized>(
    provider: &P,
    polygon: &[[f64; 2]],
    now: DateTime<Utc>,
) -> AnalysisResult<SelectedEpochs> {
    let geometry = Geometry::from_vertices(polygon)?;

    let cur_window = current_window(now);
    log::info!("Selecting current composite over {}", cur_window);
    let current = provider
        .median_composite(&geometry, &cur_window)
        .await?
        .ok_or(AnalysisError::NoImageryAvailable(cur_window))?;

    let base_window = baseline_window(current.representative_date);
    log::info!(
        "Current composite resolved to {}; selecting baseline over {}",
        current.representative_date,
        base_window
    );
    let baseline = provider
        .median_composite(&geometry, &base_window)
        .await?
        .ok_or(AnalysisError::NoImageryAvailable(base_window))?;

    log::info!(
        "Epochs selected - baseline: {}, current: {}",
        baseline.representative_date,
        current.representative_date
    );

    Ok(SelectedEpochs {
        geometry,
        baseline,
        current,
        baseline_window: base_window,
        current_window: cur_window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 20, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_current_window_lookback() {
        let window = current_window(fixed_now());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 8, 20).unwrap());
        assert_eq!(window.num_days(), CURRENT_LOOKBACK_DAYS);
        assert!(!window.contains(window.end)); // half-open
        assert!(window.contains(window.start));
    }

    #[test]
    fn test_window_selection_is_deterministic() {
        let a = current_window(fixed_now());
        let b = current_window(fixed_now());
        assert_eq!(a, b);

        let date = NaiveDate::from_ymd_opt(2024, 8, 15).unwrap();
        assert_eq!(baseline_window(date), baseline_window(date));
    }

    #[test]
    fn test_baseline_is_previous_calendar_month() {
        let date = NaiveDate::from_ymd_opt(2024, 8, 15).unwrap();
        let window = baseline_window(date);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 8, 1).unwrap());
    }

    #[test]
    fn test_baseline_crosses_year_boundary() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let window = baseline_window(date);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_windows_roll_forward_with_now() {
        let later = fixed_now() + Duration::days(30);
        let w1 = current_window(fixed_now());
        let w2 = current_window(later);
        assert_eq!(w2.start - w1.start, Duration::days(30));
        assert_eq!(w2.end - w1.end, Duration::days(30));
    }
}
