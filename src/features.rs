//! Pure feature derivation for the AKI classifier: maps a new creatinine result plus
//! patient demographics plus full result history to the fixed 9-field feature vector
//! the model was trained against (SPEC_FULL.md §4.4, §6 "Feature column order").

use chrono::{Duration, NaiveDateTime};

use crate::store::HistoryEntry;

/// Feature vector in the model's fixed column order:
/// `age, sex, C1, RV1, RV1_ratio, RV2, RV2_ratio, change_within_48hrs, D`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub age: i32,
    pub sex_encoded: u8,
    pub c1: f64,
    pub rv1: f64,
    pub rv1_ratio: f64,
    pub rv2: f64,
    pub rv2_ratio: f64,
    pub change_within_48h: bool,
    pub d: f64,
}

impl FeatureVector {
    /// Flattens to the numeric row order the classifier expects.
    pub fn as_row(&self) -> [f64; 9] {
        [
            self.age as f64,
            self.sex_encoded as f64,
            self.c1,
            self.rv1,
            self.rv1_ratio,
            self.rv2,
            self.rv2_ratio,
            if self.change_within_48h { 1.0 } else { 0.0 },
            self.d,
        ]
    }
}

/// Encodes the patient's sex to the numeric domain the model was trained on. Fixed to
/// the training convention, not a general sex representation — see the open question
/// recorded in SPEC_FULL.md §9 / DESIGN.md about reconciling this with the upstream
/// feed's raw M/F field.
pub fn encode_sex(sex: char) -> u8 {
    match sex.to_ascii_uppercase() {
        'F' => 0,
        'M' => 1,
        _ => 0,
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Derives the feature vector for a new creatinine observation `(c1, observed_at)`
/// against a patient's demographics and their full prior result history.
///
/// Window semantics (strict, per SPEC_FULL.md §4.4):
/// - RV1: min result with `T - 7d < date <= T`.
/// - RV2: median result with `T - 365d <= date <= T - 7d`.
/// - change_within_48h / D: over entries with `date >= T - 48h`.
///
/// The incoming observation itself is excluded from history by exact
/// `(date, value)` match before any window is computed, preventing self-interference.
pub fn derive(
    age: i32,
    sex: char,
    c1: f64,
    observed_at: NaiveDateTime,
    history: &[HistoryEntry],
) -> FeatureVector {
    let t = observed_at;
    let filtered: Vec<&HistoryEntry> = history
        .iter()
        .filter(|h| !(h.observed_at == t && h.result == c1))
        .collect();

    let rv1_window: Vec<f64> = filtered
        .iter()
        .filter(|h| h.observed_at > t - Duration::days(7) && h.observed_at <= t)
        .map(|h| h.result)
        .collect();
    let rv1 = if rv1_window.is_empty() {
        0.0
    } else {
        rv1_window.iter().cloned().fold(f64::INFINITY, f64::min)
    };
    let rv1_ratio = if rv1 != 0.0 && c1 != 0.0 { c1 / rv1 } else { 0.0 };

    let rv2_window: Vec<f64> = filtered
        .iter()
        .filter(|h| h.observed_at >= t - Duration::days(365) && h.observed_at <= t - Duration::days(7))
        .map(|h| h.result)
        .collect();
    let rv2 = median(rv2_window);
    let rv2_ratio = if rv2 != 0.0 && c1 != 0.0 { c1 / rv2 } else { 0.0 };

    let recent_window: Vec<f64> = filtered
        .iter()
        .filter(|h| h.observed_at >= t - Duration::hours(48))
        .map(|h| h.result)
        .collect();
    let change_within_48h = recent_window.len() > 1;
    let d = if change_within_48h {
        let min_recent = recent_window
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        c1 - min_recent
    } else {
        0.0
    };

    FeatureVector {
        age,
        sex_encoded: encode_sex(sex),
        c1,
        rv1,
        rv1_ratio,
        rv2,
        rv2_ratio,
        change_within_48h,
        d,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn entry(y: i32, m: u32, d: u32, result: f64) -> HistoryEntry {
        HistoryEntry {
            observed_at: dt(y, m, d, 0, 0, 0),
            result,
        }
    }

    #[test]
    fn empty_history_yields_zeroed_reference_values() {
        let t = dt(2024, 9, 24, 15, 36, 0);
        let fv = derive(50, 'M', 103.57, t, &[]);
        assert_eq!(fv.c1, 103.57);
        assert_eq!(fv.rv1, 0.0);
        assert_eq!(fv.rv1_ratio, 0.0);
        assert_eq!(fv.rv2, 0.0);
        assert_eq!(fv.rv2_ratio, 0.0);
        assert!(!fv.change_within_48h);
        assert_eq!(fv.d, 0.0);
    }

    #[test]
    fn rv1_is_minimum_of_trailing_week() {
        let t = dt(2024, 9, 24, 0, 0, 0);
        let history = vec![
            entry(2024, 9, 20, 80.0),
            entry(2024, 9, 22, 60.0),
            entry(2024, 1, 1, 10.0), // outside the 7-day window
        ];
        let fv = derive(50, 'M', 100.0, t, &history);
        assert_eq!(fv.rv1, 60.0);
        assert_eq!(fv.rv1_ratio, 100.0 / 60.0);
    }

    #[test]
    fn rv2_is_median_of_the_long_window() {
        let t = dt(2024, 9, 24, 0, 0, 0);
        let history = vec![
            entry(2024, 3, 1, 70.0),
            entry(2024, 4, 1, 90.0),
            entry(2024, 5, 1, 80.0),
        ];
        let fv = derive(50, 'M', 100.0, t, &history);
        assert_eq!(fv.rv2, 80.0);
    }

    #[test]
    fn change_within_48h_requires_more_than_one_recent_entry() {
        let t = dt(2024, 9, 24, 12, 0, 0);
        let single = vec![HistoryEntry {
            observed_at: t - Duration::hours(10),
            result: 95.0,
        }];
        let fv = derive(50, 'M', 100.0, t, &single);
        assert!(!fv.change_within_48h);
        assert_eq!(fv.d, 0.0);

        let multiple = vec![
            HistoryEntry {
                observed_at: t - Duration::hours(10),
                result: 95.0,
            },
            HistoryEntry {
                observed_at: t - Duration::hours(30),
                result: 80.0,
            },
        ];
        let fv = derive(50, 'M', 100.0, t, &multiple);
        assert!(fv.change_within_48h);
        assert_eq!(fv.d, 100.0 - 80.0);
    }

    #[test]
    fn self_match_is_excluded_from_history() {
        let t = dt(2024, 9, 24, 12, 0, 0);
        let history = vec![HistoryEntry {
            observed_at: t,
            result: 100.0,
        }];
        let fv = derive(50, 'M', 100.0, t, &history);
        assert_eq!(fv.rv1, 0.0);
        assert!(!fv.change_within_48h);
    }

    #[test]
    fn sex_encoding_matches_training_convention() {
        assert_eq!(encode_sex('F'), 0);
        assert_eq!(encode_sex('f'), 0);
        assert_eq!(encode_sex('M'), 1);
    }
}
