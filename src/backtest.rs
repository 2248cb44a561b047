//! Полный прогон бэктеста: разбиение, обучение, перебор порогов, ROC и упреждение,
//! а также запись табличных результатов в CSV.

use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::classifier::{Classifier, LogisticClassifier, TrainingConfig};
use crate::constants::{DEFAULT_LEAD_WINDOW_MINUTES, DEFAULT_SPLIT_QUANTILE, TIMESTAMP_FORMAT};
use crate::dataset::{Dataset, Observation};
use crate::error::{BacktestError, Result};
use crate::lead_time::{AlertRecord, LeadTimeSummary, binarize, estimate_lead_times};
use crate::roc::{RocCurve, roc_curve};
use crate::split::chronological_split;
use crate::sweep::{Criterion, Sweep, default_thresholds, sweep_thresholds};

/// Параметры оценки на отложенной части.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationConfig {
    pub thresholds: Vec<f64>,
    pub criterion: Criterion,
    pub window: TimeDelta,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            criterion: Criterion::default(),
            window: TimeDelta::minutes(DEFAULT_LEAD_WINDOW_MINUTES),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
    pub quantile: f64,
    pub training: TrainingConfig,
    pub evaluation: EvaluationConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            quantile: DEFAULT_SPLIT_QUANTILE,
            training: TrainingConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

/// Итог оценки: таблица порогов, ROC (если в выборке есть оба класса) и упреждение.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub sweep: Sweep,
    pub roc: Option<RocCurve>,
    pub lead_time: LeadTimeSummary,
}

#[derive(Clone, Debug)]
pub struct SplitSummary {
    pub cut: DateTime<Utc>,
    pub train_len: usize,
    pub train_storms: usize,
    pub eval_len: usize,
    pub eval_storms: usize,
}

#[derive(Clone, Debug)]
pub struct BacktestOutcome {
    pub split: SplitSummary,
    pub classifier: LogisticClassifier,
    pub evaluation: Evaluation,
}

/// Разбивает данные по времени, обучает базовый классификатор на ранней части и оценивает его на поздней.
pub fn run_backtest(dataset: &Dataset, config: &BacktestConfig) -> Result<BacktestOutcome> {
    let split = chronological_split(dataset, config.quantile)?;
    let summary = SplitSummary {
        cut: split.cut,
        train_len: split.train.len(),
        train_storms: split.train.iter().filter(|obs| obs.label).count(),
        eval_len: split.eval.len(),
        eval_storms: split.eval.iter().filter(|obs| obs.label).count(),
    };
    info!(
        cut = %summary.cut.format(TIMESTAMP_FORMAT),
        train = summary.train_len,
        train_storms = summary.train_storms,
        eval = summary.eval_len,
        eval_storms = summary.eval_storms,
        "Chronological split"
    );
    if split.train.is_empty() {
        return Err(BacktestError::invalid(
            "training slice is empty, lower the split quantile or add history",
        ));
    }

    let classifier = LogisticClassifier::train(&split.train, config.training)?;
    let evaluation = evaluate(&split.eval, &classifier, &config.evaluation)?;

    Ok(BacktestOutcome {
        split: summary,
        classifier,
        evaluation,
    })
}

/// Оценивает произвольный классификатор на отсортированной оценочной выборке.
pub fn evaluate<C: Classifier>(
    eval: &[Observation],
    classifier: &C,
    config: &EvaluationConfig,
) -> Result<Evaluation> {
    let probabilities = classifier.predict_observations(eval);
    let labels: Vec<bool> = eval.iter().map(|obs| obs.label).collect();

    let sweep = sweep_thresholds(&probabilities, &labels, &config.thresholds, config.criterion)?;
    let best = sweep.best();
    info!(
        criterion = %sweep.criterion,
        threshold = best.threshold,
        recall = best.recall,
        precision = best.precision,
        fpr = best.fpr,
        f1 = best.f1,
        "Operating threshold selected"
    );
    for row in sweep.results.iter().filter(|row| !row.undefined.is_empty()) {
        warn!(
            threshold = row.threshold,
            undefined = %row.undefined_label(),
            "Metrics with zero denominator reported as 0"
        );
    }

    let roc = match roc_curve(&probabilities, &labels) {
        Ok(curve) => {
            let youden = curve.youden();
            info!(
                auc = curve.auc,
                youden_threshold = youden.threshold,
                tpr = youden.tpr,
                fpr = youden.fpr,
                "ROC curve"
            );
            Some(curve)
        }
        Err(err) => {
            warn!(error = %err, "ROC curve skipped");
            None
        }
    };

    let records = binarize(eval, &probabilities, sweep.best_threshold)?;
    let lead_time = estimate_lead_times(&records, config.window)?;
    match lead_time.mean_minutes {
        Some(mean) => info!(
            storms = lead_time.storms,
            detected = lead_time.detected,
            mean_minutes = mean,
            "Lead time estimated"
        ),
        None => warn!(
            storms = lead_time.storms,
            "No qualifying alerts found before any storm"
        ),
    }

    Ok(Evaluation {
        sweep,
        roc,
        lead_time,
    })
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn write_threshold_csv(sweep: &Sweep, output_path: &Path) -> Result<()> {
    create_parent_dir(output_path)?;
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record([
        "threshold",
        "recall",
        "precision",
        "fpr",
        "f1",
        "tp",
        "fp",
        "tn",
        "fn",
        "undefined",
        "selected",
    ])?;
    for (idx, row) in sweep.results.iter().enumerate() {
        writer.write_record([
            format!("{:.2}", row.threshold),
            format!("{:.6}", row.recall),
            format!("{:.6}", row.precision),
            format!("{:.6}", row.fpr),
            format!("{:.6}", row.f1),
            row.confusion.tp.to_string(),
            row.confusion.fp.to_string(),
            row.confusion.tn.to_string(),
            row.confusion.fn_.to_string(),
            row.undefined_label(),
            u8::from(idx == sweep.best_index).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Пустое поле `lead_time` означает, что подходящей тревоги не было.
pub fn write_backtest_csv(records: &[AlertRecord], output_path: &Path) -> Result<()> {
    create_parent_dir(output_path)?;
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["timestamp", "probability", "alert", "storm", "lead_time"])?;
    for record in records {
        writer.write_record([
            record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            format!("{:.6}", record.probability),
            u8::from(record.alert).to_string(),
            u8::from(record.storm).to_string(),
            record
                .lead_time
                .map(|minutes| format!("{minutes:.1}"))
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_roc_csv(curve: &RocCurve, output_path: &Path) -> Result<()> {
    create_parent_dir(output_path)?;
    let mut writer = csv::Writer::from_path(output_path)?;
    writer.write_record(["threshold", "fpr", "tpr"])?;
    for point in &curve.points {
        writer.write_record([
            if point.threshold.is_finite() {
                format!("{:.6}", point.threshold)
            } else {
                "inf".to_string()
            },
            format!("{:.6}", point.fpr),
            format!("{:.6}", point.tpr),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FEATURE_COUNT;
    use chrono::TimeZone;

    /// Классификатор-заглушка: вероятность берётся прямо из первого признака.
    struct FirstFeature;

    impl Classifier for FirstFeature {
        fn predict_probability(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
            features[0]
        }
    }

    fn scenario() -> Vec<Observation> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let probabilities = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
        probabilities
            .iter()
            .enumerate()
            .map(|(idx, &p)| {
                let mut features = [0.0; FEATURE_COUNT];
                features[0] = p;
                Observation {
                    timestamp: start + TimeDelta::minutes(idx as i64 * 10),
                    features,
                    label: idx == 9,
                }
            })
            .collect()
    }

    #[test]
    fn end_to_end_scenario_matches_hand_computation() {
        let config = EvaluationConfig {
            thresholds: vec![0.3, 0.5, 0.7],
            ..EvaluationConfig::default()
        };
        let evaluation = evaluate(&scenario(), &FirstFeature, &config).unwrap();

        let f1: Vec<f64> = evaluation.sweep.results.iter().map(|r| r.f1).collect();
        for (got, want) in f1.iter().zip([2.0 / 9.0, 2.0 / 7.0, 2.0 / 5.0]) {
            assert!((got - want).abs() < 1e-12, "{got} vs {want}");
        }
        assert!((evaluation.sweep.best_threshold - 0.7).abs() < 1e-12);

        // Тревоги с 60-й минуты; ближайшая к шторму на 90-й минуте была на 80-й.
        let records = &evaluation.lead_time.records;
        assert_eq!(records.iter().filter(|r| r.alert).count(), 4);
        assert_eq!(records[9].lead_time, Some(10.0));
        assert_eq!(evaluation.lead_time.mean_minutes, Some(10.0));

        let roc = evaluation.roc.unwrap();
        assert!((roc.auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_class_eval_skips_roc_but_still_sweeps() {
        let mut observations = scenario();
        for obs in &mut observations {
            obs.label = false;
        }
        let evaluation =
            evaluate(&observations, &FirstFeature, &EvaluationConfig::default()).unwrap();
        assert!(evaluation.roc.is_none());
        assert_eq!(evaluation.lead_time.storms, 0);
        assert_eq!(evaluation.lead_time.mean_minutes, None);
        assert!(evaluation.sweep.results.iter().all(|r| !r.undefined.is_empty()));
    }

    #[test]
    fn full_backtest_trains_on_the_past_only() {
        let start = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        let observations: Vec<Observation> = (0..200)
            .map(|idx| {
                let precip = f64::from(idx % 25);
                let mut features = [precip, 0.0, 75.0, 28.0, 5.0, 5.0, 12.0];
                features[2] += f64::from(idx % 7);
                Observation {
                    timestamp: start + TimeDelta::minutes(i64::from(idx) * 20),
                    features,
                    label: precip > 15.0,
                }
            })
            .collect();
        let dataset = Dataset::new(observations);
        let outcome = run_backtest(&dataset, &BacktestConfig::default()).unwrap();

        assert_eq!(outcome.split.train_len + outcome.split.eval_len, 200);
        assert_eq!(outcome.split.eval_len, 40);
        assert!(outcome.evaluation.sweep.best().recall > 0.5);
        assert_eq!(outcome.evaluation.lead_time.records.len(), 40);
    }

    #[test]
    fn default_window_is_one_hour() {
        let window = EvaluationConfig::default().window;
        assert_eq!(window, TimeDelta::minutes(60));
        assert_eq!(Some(window), crate::lead_time::window_from_minutes(60.0).ok());
    }

    #[test]
    fn empty_training_slice_is_rejected() {
        let dataset = Dataset::new(scenario().into_iter().take(1).collect());
        assert!(matches!(
            run_backtest(&dataset, &BacktestConfig::default()),
            Err(BacktestError::InvalidInput(_))
        ));
    }

    #[test]
    fn writes_csv_tables() {
        let evaluation = evaluate(
            &scenario(),
            &FirstFeature,
            &EvaluationConfig {
                thresholds: vec![0.3, 0.5, 0.7],
                ..EvaluationConfig::default()
            },
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();

        let thresholds_path = dir.path().join("out").join("thresholds.csv");
        write_threshold_csv(&evaluation.sweep, &thresholds_path).unwrap();
        let thresholds = fs::read_to_string(&thresholds_path).unwrap();
        let lines: Vec<&str> = thresholds.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("0.70,1.000000,0.250000"));
        assert!(lines[3].ends_with(",1"));

        let backtest_path = dir.path().join("backtest.csv");
        write_backtest_csv(&evaluation.lead_time.records, &backtest_path).unwrap();
        let backtest = fs::read_to_string(&backtest_path).unwrap();
        let rows: Vec<&str> = backtest.lines().collect();
        assert_eq!(rows[0], "timestamp,probability,alert,storm,lead_time");
        assert_eq!(rows[1], "2024-06-01 00:00:00,0.100000,0,0,");
        assert_eq!(rows[10], "2024-06-01 01:30:00,1.000000,1,1,10.0");

        let roc_path = dir.path().join("roc.csv");
        write_roc_csv(evaluation.roc.as_ref().unwrap(), &roc_path).unwrap();
        let roc = fs::read_to_string(&roc_path).unwrap();
        assert!(roc.lines().nth(1).unwrap().starts_with("inf,"));
    }
}
