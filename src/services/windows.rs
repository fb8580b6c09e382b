//! Fixed-size query windows over a date range.

use chrono::{NaiveDate, TimeDelta};

use crate::errors::AppError;
use crate::models::QueryWindow;

/// Window length used by the batch extractor unless overridden.
pub const DEFAULT_WINDOW_DAYS: i64 = 20;

/// First day queried by the batch extractor unless overridden.
pub fn default_range_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

/// Exclusive boundary for window starts unless overridden.
pub fn default_range_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 30).unwrap_or_default()
}

/// Split `[start, end)` into contiguous windows of `window_days` days.
///
/// A window is emitted for every cursor position strictly before `end`, so
/// the last window may run up to `window_days - 1` days past the boundary.
/// The count is always `ceil((end - start) / window_days)`.
pub fn compute_windows(
    start: NaiveDate,
    end: NaiveDate,
    window_days: i64,
) -> Result<Vec<QueryWindow>, AppError> {
    if window_days <= 0 {
        return Err(AppError::BadRequest(format!(
            "window length must be positive, got {} days",
            window_days
        )));
    }

    let step = TimeDelta::try_days(window_days).ok_or_else(|| {
        AppError::BadRequest(format!("window length of {} days is too large", window_days))
    })?;
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let window_end = cursor.checked_add_signed(step).ok_or_else(|| {
            AppError::BadRequest(format!(
                "window starting {} runs past the last representable date",
                cursor
            ))
        })?;
        windows.push(QueryWindow {
            start_date: cursor,
            end_date: window_end,
        });
        cursor = window_end;
    }

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_range_window_count() {
        let start = default_range_start();
        let end = default_range_end();
        let windows = compute_windows(start, end, DEFAULT_WINDOW_DAYS).unwrap();

        let days = (end - start).num_days();
        assert_eq!(days, 1825);
        let expected = (days + DEFAULT_WINDOW_DAYS - 1) / DEFAULT_WINDOW_DAYS;
        assert_eq!(windows.len() as i64, expected);
        assert_eq!(windows.len(), 92);
    }

    #[test]
    fn test_windows_are_contiguous_and_fixed_size() {
        let windows =
            compute_windows(default_range_start(), default_range_end(), DEFAULT_WINDOW_DAYS)
                .unwrap();
        assert_eq!(windows[0].start_date, date(2020, 1, 1));
        assert_eq!(windows[0].end_date, date(2020, 1, 21));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end_date, pair[1].start_date);
        }
        for w in &windows {
            assert_eq!((w.end_date - w.start_date).num_days(), DEFAULT_WINDOW_DAYS);
        }
    }

    #[test]
    fn test_last_window_overshoot_is_bounded() {
        let end = default_range_end();
        let windows = compute_windows(default_range_start(), end, DEFAULT_WINDOW_DAYS).unwrap();
        let last = windows.last().unwrap();
        assert_eq!(last.start_date, date(2024, 12, 25));
        assert_eq!(last.end_date, date(2025, 1, 14));
        let overshoot = (last.end_date - end).num_days();
        assert!((0..DEFAULT_WINDOW_DAYS).contains(&overshoot));
    }

    #[test]
    fn test_exact_multiple_has_no_overshoot() {
        let start = date(2021, 1, 1);
        let end = start + TimeDelta::days(40);
        let windows = compute_windows(start, end, 20).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].end_date, end);
    }

    #[test]
    fn test_empty_range() {
        let d = date(2022, 6, 1);
        assert!(compute_windows(d, d, 20).unwrap().is_empty());
        assert!(compute_windows(d, date(2022, 1, 1), 20).unwrap().is_empty());
    }

    #[test]
    fn test_non_positive_window_rejected() {
        let d = date(2022, 6, 1);
        assert!(compute_windows(d, date(2022, 7, 1), 0).is_err());
        assert!(compute_windows(d, date(2022, 7, 1), -5).is_err());
    }

    #[test]
    fn test_oversized_window_is_rejected() {
        let result = compute_windows(date(2020, 1, 1), date(2021, 1, 1), i64::MAX);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_window_past_max_date_is_rejected() {
        let end = NaiveDate::MAX;
        let start = end - TimeDelta::days(5);
        let result = compute_windows(start, end, 20);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
