//! Перебор порогов решения: полнота, точность, доля ложных срабатываний и F1 на каждом пороге.
//!
//! Нулевой знаменатель не считается ошибкой: метрика принимается равной 0 и помечается
//! в [`ThresholdResult::undefined`], чтобы вызывающий код видел, что значение условное.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_THRESHOLD_START, DEFAULT_THRESHOLD_STEP, DEFAULT_THRESHOLD_STOP};
use crate::error::{BacktestError, Result};

/// Точность округления сгенерированных порогов (убирает хвосты вида 0.35000000000000003).
const THRESHOLD_ROUNDING: f64 = 1e9;
const MAX_THRESHOLDS: usize = 10_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    #[default]
    F1,
    Recall,
    Precision,
    /// Индекс Юдена: recall - fpr.
    Youden,
}

impl Criterion {
    pub fn score(self, result: &ThresholdResult) -> f64 {
        match self {
            Self::F1 => result.f1,
            Self::Recall => result.recall,
            Self::Precision => result.precision,
            Self::Youden => result.recall - result.fpr,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F1 => "f1",
            Self::Recall => "recall",
            Self::Precision => "precision",
            Self::Youden => "youden",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    Recall,
    Precision,
    Fpr,
    F1,
}

impl Metric {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recall => "recall",
            Self::Precision => "precision",
            Self::Fpr => "fpr",
            Self::F1 => "f1",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Confusion {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl Confusion {
    fn count(probabilities: &[f64], labels: &[bool], threshold: f64) -> Self {
        probabilities
            .iter()
            .zip(labels)
            .fold(Self::default(), |mut acc, (&probability, &label)| {
                match (probability >= threshold, label) {
                    (true, true) => acc.tp += 1,
                    (true, false) => acc.fp += 1,
                    (false, false) => acc.tn += 1,
                    (false, true) => acc.fn_ += 1,
                }
                acc
            })
    }
}

/// Метрики на одном пороге.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdResult {
    pub threshold: f64,
    pub recall: f64,
    pub precision: f64,
    pub fpr: f64,
    pub f1: f64,
    pub confusion: Confusion,
    /// Метрики с нулевым знаменателем, записанные как 0.
    pub undefined: Vec<Metric>,
}

impl ThresholdResult {
    fn from_confusion(threshold: f64, confusion: Confusion) -> Self {
        let mut undefined = Vec::new();
        let mut ratio = |num: usize, den: usize, metric: Metric| {
            if den == 0 {
                undefined.push(metric);
                0.0
            } else {
                num as f64 / den as f64
            }
        };
        let recall = ratio(confusion.tp, confusion.tp + confusion.fn_, Metric::Recall);
        let precision = ratio(confusion.tp, confusion.tp + confusion.fp, Metric::Precision);
        let fpr = ratio(confusion.fp, confusion.fp + confusion.tn, Metric::Fpr);

        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            undefined.push(Metric::F1);
            0.0
        };

        Self {
            threshold,
            recall,
            precision,
            fpr,
            f1,
            confusion,
            undefined,
        }
    }

    pub fn undefined_label(&self) -> String {
        self.undefined
            .iter()
            .map(|metric| metric.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Результат перебора: строки в порядке кандидатов и выбранный рабочий порог.
#[derive(Clone, Debug, PartialEq)]
pub struct Sweep {
    pub results: Vec<ThresholdResult>,
    pub criterion: Criterion,
    pub best_threshold: f64,
    pub best_index: usize,
}

impl Sweep {
    pub fn best(&self) -> &ThresholdResult {
        &self.results[self.best_index]
    }
}

/// Пороги `start..=stop` с шагом `step`; значения строятся целочисленным шагом без накопления ошибки.
pub fn threshold_range(start: f64, stop: f64, step: f64) -> Result<Vec<f64>> {
    if !start.is_finite() || !stop.is_finite() || !step.is_finite() {
        return Err(BacktestError::invalid("threshold range must be finite"));
    }
    if step <= 0.0 {
        return Err(BacktestError::invalid(format!(
            "threshold step must be > 0, got {step}"
        )));
    }
    if stop < start {
        return Err(BacktestError::invalid(format!(
            "threshold stop {stop} is below start {start}"
        )));
    }
    // Небольшой допуск, чтобы `stop` попал в диапазон несмотря на погрешность деления.
    let steps = ((stop - start) / step + 1e-9).floor();
    if !steps.is_finite() || steps >= MAX_THRESHOLDS as f64 {
        return Err(BacktestError::invalid(format!(
            "threshold range {start}..={stop} with step {step} exceeds {MAX_THRESHOLDS} values"
        )));
    }
    Ok((0..=steps as usize)
        .map(|idx| {
            (step.mul_add(idx as f64, start) * THRESHOLD_ROUNDING).round() / THRESHOLD_ROUNDING
        })
        .collect())
}

/// Пороги по умолчанию: 0.30..=0.85 с шагом 0.05.
pub fn default_thresholds() -> Vec<f64> {
    threshold_range(
        DEFAULT_THRESHOLD_START,
        DEFAULT_THRESHOLD_STOP,
        DEFAULT_THRESHOLD_STEP,
    )
    .unwrap_or_default()
}

/// Считает метрики на каждом пороге и выбирает лучший по критерию.
/// При равенстве критерия побеждает меньший порог независимо от порядка кандидатов.
pub fn sweep_thresholds(
    probabilities: &[f64],
    labels: &[bool],
    thresholds: &[f64],
    criterion: Criterion,
) -> Result<Sweep> {
    if probabilities.is_empty() {
        return Err(BacktestError::invalid("evaluation set is empty"));
    }
    if thresholds.is_empty() {
        return Err(BacktestError::invalid("threshold sequence is empty"));
    }
    if probabilities.len() != labels.len() {
        return Err(BacktestError::invalid(format!(
            "{} probabilities for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }
    if let Some(idx) = probabilities
        .iter()
        .position(|p| !p.is_finite() || !(0.0..=1.0).contains(p))
    {
        return Err(BacktestError::invalid(format!(
            "probability #{idx} is outside [0, 1]: {}",
            probabilities[idx]
        )));
    }
    if let Some(bad) = thresholds.iter().find(|t| !t.is_finite()) {
        return Err(BacktestError::invalid(format!(
            "threshold must be finite, got {bad}"
        )));
    }

    let results: Vec<ThresholdResult> = thresholds
        .iter()
        .map(|&threshold| {
            let confusion = Confusion::count(probabilities, labels, threshold);
            ThresholdResult::from_confusion(threshold, confusion)
        })
        .collect();

    let mut best_index = 0;
    for (idx, result) in results.iter().enumerate().skip(1) {
        let best = &results[best_index];
        let score = criterion.score(result);
        let best_score = criterion.score(best);
        if score > best_score || (score == best_score && result.threshold < best.threshold) {
            best_index = idx;
        }
    }

    Ok(Sweep {
        best_threshold: results[best_index].threshold,
        results,
        criterion,
        best_index,
    })
}
