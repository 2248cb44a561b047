//! Бинаризация вероятностей на рабочем пороге и оценка времени упреждения тревог.

use chrono::{DateTime, TimeDelta, Utc};

use crate::constants::MILLIS_PER_MINUTE;
use crate::dataset::Observation;
use crate::error::{BacktestError, Result};

/// Наблюдение оценочной выборки после применения порога.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub probability: f64,
    pub alert: bool,
    pub storm: bool,
    /// Минуты между ближайшей предшествующей тревогой и штормом.
    /// `None` означает «подходящей тревоги не было», а не упреждение 0.
    pub lead_time: Option<f64>,
}

/// Сводка по упреждению.
#[derive(Clone, Debug, PartialEq)]
pub struct LeadTimeSummary {
    pub records: Vec<AlertRecord>,
    pub storms: usize,
    pub detected: usize,
    /// `None`, если ни один шторм не получил тревогу в окне.
    pub mean_minutes: Option<f64>,
}

/// Строит записи тревог: `alert = probability >= threshold`.
pub fn binarize(
    observations: &[Observation],
    probabilities: &[f64],
    threshold: f64,
) -> Result<Vec<AlertRecord>> {
    if observations.len() != probabilities.len() {
        return Err(BacktestError::invalid(format!(
            "{} probabilities for {} observations",
            probabilities.len(),
            observations.len()
        )));
    }
    Ok(observations
        .iter()
        .zip(probabilities)
        .map(|(obs, &probability)| AlertRecord {
            timestamp: obs.timestamp,
            probability,
            alert: probability >= threshold,
            storm: obs.label,
            lead_time: None,
        })
        .collect())
}

/// Для каждого шторма ищет ближайшую по времени тревогу не раньше чем за `window` до него.
///
/// Штормы обрабатываются от последнего к первому, просмотр идёт назад от `i - 1`
/// и останавливается на первой тревоге. Граница окна включается. Одна тревога может
/// засчитываться нескольким близким штормам.
pub fn estimate_lead_times(records: &[AlertRecord], window: TimeDelta) -> Result<LeadTimeSummary> {
    if window <= TimeDelta::zero() {
        return Err(BacktestError::invalid(format!(
            "lead-time window must be positive, got {} min",
            window.num_minutes()
        )));
    }
    if let Some(idx) = records
        .windows(2)
        .position(|pair| pair[1].timestamp < pair[0].timestamp)
    {
        return Err(BacktestError::invalid(format!(
            "alert records are not sorted by timestamp at position {}",
            idx + 1
        )));
    }

    let mut records = records.to_vec();
    for record in &mut records {
        record.lead_time = None;
    }

    let mut storms = 0;
    for i in (0..records.len()).rev() {
        if !records[i].storm {
            continue;
        }
        storms += 1;
        let storm_at = records[i].timestamp;
        // Окно, уходящее за начало шкалы времени, ограничено только началом записей.
        let window_start = storm_at.checked_sub_signed(window);

        let mut j = i;
        while j > 0 {
            j -= 1;
            let AlertRecord {
                timestamp, alert, ..
            } = records[j];
            if window_start.is_some_and(|start| timestamp < start) {
                break;
            }
            if alert {
                records[i].lead_time = Some(minutes_between(timestamp, storm_at));
                break;
            }
        }
    }

    let lead_times: Vec<f64> = records.iter().filter_map(|r| r.lead_time).collect();
    let detected = lead_times.len();
    let mean_minutes = (detected > 0).then(|| lead_times.iter().sum::<f64>() / detected as f64);

    Ok(LeadTimeSummary {
        records,
        storms,
        detected,
        mean_minutes,
    })
}

pub fn window_from_minutes(minutes: f64) -> Result<TimeDelta> {
    if !minutes.is_finite() || minutes <= 0.0 {
        return Err(BacktestError::invalid(format!(
            "lead-time window must be > 0 minutes, got {minutes}"
        )));
    }
    let millis = (minutes * MILLIS_PER_MINUTE).round();
    if millis < 1.0 {
        return Err(BacktestError::invalid(format!(
            "lead-time window of {minutes} minutes is shorter than 1 ms"
        )));
    }
    if millis >= i64::MAX as f64 {
        return Err(BacktestError::invalid(format!(
            "lead-time window of {minutes} minutes is too large"
        )));
    }
    TimeDelta::try_milliseconds(millis as i64).ok_or_else(|| {
        BacktestError::invalid(format!("lead-time window of {minutes} minutes is too large"))
    })
}

fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / MILLIS_PER_MINUTE
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn record(minute: i64, alert: bool, storm: bool) -> AlertRecord {
        AlertRecord {
            timestamp: base() + TimeDelta::minutes(minute),
            probability: if alert { 0.9 } else { 0.1 },
            alert,
            storm,
            lead_time: None,
        }
    }

    fn hour() -> TimeDelta {
        TimeDelta::minutes(60)
    }

    #[test]
    fn alert_exactly_on_window_edge_is_credited() {
        let records = [record(60, true, false), record(120, false, true)];
        let summary = estimate_lead_times(&records, hour()).unwrap();
        assert_eq!(summary.records[1].lead_time, Some(60.0));
        assert_eq!(summary.mean_minutes, Some(60.0));
    }

    #[test]
    fn huge_window_scans_back_to_the_first_record() {
        let records = [record(0, true, false), record(10, false, true)];
        let window = window_from_minutes(1e12).unwrap();
        let summary = estimate_lead_times(&records, window).unwrap();
        assert_eq!(summary.records[1].lead_time, Some(10.0));

        let summary = estimate_lead_times(&records, TimeDelta::MAX).unwrap();
        assert_eq!(summary.records[1].lead_time, Some(10.0));
    }

    #[test]
    fn alert_just_outside_window_is_ignored() {
        let records = [record(59, true, false), record(120, false, true)];
        let summary = estimate_lead_times(&records, hour()).unwrap();
        assert_eq!(summary.records[1].lead_time, None);
        assert_eq!(summary.mean_minutes, None);
        assert_eq!(summary.storms, 1);
        assert_eq!(summary.detected, 0);
    }

    #[test]
    fn nearest_prior_alert_wins_over_earliest() {
        let records = [
            record(0, true, false),
            record(20, true, false),
            record(40, false, false),
            record(50, false, true),
        ];
        let summary = estimate_lead_times(&records, hour()).unwrap();
        assert_eq!(summary.records[3].lead_time, Some(30.0));
    }

    #[test]
    fn storm_without_alert_does_not_pull_mean_down() {
        let records = [
            record(0, true, false),
            record(10, false, true),
            record(200, false, false),
            record(210, false, true),
        ];
        let summary = estimate_lead_times(&records, hour()).unwrap();
        assert_eq!(summary.records[1].lead_time, Some(10.0));
        assert_eq!(summary.records[3].lead_time, None);
        assert_eq!(summary.storms, 2);
        assert_eq!(summary.detected, 1);
        assert_eq!(summary.mean_minutes, Some(10.0));
    }

    #[test]
    fn one_alert_is_credited_to_several_storms() {
        let records = [
            record(0, true, false),
            record(10, false, true),
            record(20, false, true),
        ];
        let summary = estimate_lead_times(&records, hour()).unwrap();
        assert_eq!(summary.records[1].lead_time, Some(10.0));
        assert_eq!(summary.records[2].lead_time, Some(20.0));
        assert_eq!(summary.mean_minutes, Some(15.0));
    }

    #[test]
    fn storm_alert_itself_is_not_lead_time() {
        // Тревога на самом шторме не считается упреждением, а предыдущий шторм с тревогой считается.
        let records = [record(0, true, true), record(10, true, true)];
        let summary = estimate_lead_times(&records, hour()).unwrap();
        assert_eq!(summary.records[0].lead_time, None);
        assert_eq!(summary.records[1].lead_time, Some(10.0));
    }

    #[test]
    fn same_timestamp_alert_yields_zero_lead_time() {
        let records = [record(30, true, false), record(30, false, true)];
        let summary = estimate_lead_times(&records, hour()).unwrap();
        assert_eq!(summary.records[1].lead_time, Some(0.0));
        assert_eq!(summary.mean_minutes, Some(0.0));
    }

    #[test]
    fn rejects_unsorted_records_and_bad_window() {
        let unsorted = [record(30, true, false), record(10, false, true)];
        assert!(matches!(
            estimate_lead_times(&unsorted, hour()),
            Err(BacktestError::InvalidInput(_))
        ));
        let sorted = [record(10, true, false), record(30, false, true)];
        assert!(estimate_lead_times(&sorted, TimeDelta::zero()).is_err());
        assert!(estimate_lead_times(&sorted, TimeDelta::minutes(-5)).is_err());
        assert!(window_from_minutes(0.0).is_err());
        assert!(window_from_minutes(f64::INFINITY).is_err());
        assert!(window_from_minutes(1e-6).is_err());
        assert!(window_from_minutes(1e300).is_err());
        assert_eq!(window_from_minutes(60.0).unwrap(), hour());
    }

    #[test]
    fn binarize_applies_inclusive_threshold() {
        let observations: Vec<Observation> = [(0.69, false), (0.7, true), (0.71, false)]
            .iter()
            .enumerate()
            .map(|(idx, &(_, label))| Observation {
                timestamp: base() + TimeDelta::minutes(idx as i64 * 10),
                features: [0.0; crate::constants::FEATURE_COUNT],
                label,
            })
            .collect();
        let probabilities = [0.69, 0.7, 0.71];
        let records = binarize(&observations, &probabilities, 0.7).unwrap();
        let alerts: Vec<bool> = records.iter().map(|r| r.alert).collect();
        assert_eq!(alerts, vec![false, true, true]);
        assert!(records[1].storm);
        assert!(records.iter().all(|r| r.lead_time.is_none()));
        assert!(binarize(&observations, &probabilities[..2], 0.7).is_err());
    }
}
