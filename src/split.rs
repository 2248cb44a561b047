//! Хронологическое разбиение: ранняя часть уходит в обучение, поздняя в оценку.

use chrono::{DateTime, TimeDelta, Utc};

use crate::dataset::{Dataset, Observation};
use crate::error::{BacktestError, Result};

/// Результат разбиения. `cut` сохраняется для аудита.
#[derive(Clone, Debug)]
pub struct Split {
    pub train: Vec<Observation>,
    pub eval: Vec<Observation>,
    pub cut: DateTime<Utc>,
}

/// `train = {o : o.timestamp < cut}`, `eval = {o : o.timestamp >= cut}`,
/// где `cut` есть `quantile`-квантиль времени с линейной интерполяцией.
pub fn chronological_split(dataset: &Dataset, quantile: f64) -> Result<Split> {
    if dataset.is_empty() {
        return Err(BacktestError::invalid("cannot split an empty dataset"));
    }
    if !quantile.is_finite() || quantile <= 0.0 || quantile >= 1.0 {
        return Err(BacktestError::invalid(format!(
            "split quantile must be within (0, 1), got {quantile}"
        )));
    }

    let timestamps: Vec<DateTime<Utc>> = dataset
        .observations()
        .iter()
        .map(|obs| obs.timestamp)
        .collect();
    let cut = timestamp_quantile(&timestamps, quantile)?;

    let (train, eval): (Vec<_>, Vec<_>) = dataset
        .observations()
        .iter()
        .cloned()
        .partition(|obs| obs.timestamp < cut);

    Ok(Split { train, eval, cut })
}

/// Квантиль по отсортированным отметкам: позиция `h = (n - 1) * q`,
/// значение интерполируется между соседними порядковыми статистиками (точность до микросекунды).
fn timestamp_quantile(sorted: &[DateTime<Utc>], quantile: f64) -> Result<DateTime<Utc>> {
    let last = sorted.len() - 1;
    let position = last as f64 * quantile;
    let lower_idx = (position.floor() as usize).min(last);
    let upper_idx = (lower_idx + 1).min(last);
    let fraction = position - lower_idx as f64;

    let lower = sorted[lower_idx];
    let upper = sorted[upper_idx];
    if fraction <= 0.0 || lower == upper {
        return Ok(lower);
    }

    let span_micros = (upper - lower)
        .num_microseconds()
        .ok_or_else(|| BacktestError::invalid("timestamp span is too large to interpolate"))?;
    let offset = TimeDelta::microseconds((span_micros as f64 * fraction).round() as i64);
    Ok(lower + offset)
}
