//! ROC-кривая по вероятностям оценочной выборки, площадь под ней и оптимум по Юдену.

use std::cmp::Ordering;

use crate::error::{BacktestError, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RocPoint {
    /// Порог: точка отвечает правилу `probability >= threshold`. Первая точка имеет порог `+inf`.
    pub threshold: f64,
    pub fpr: f64,
    pub tpr: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
    pub auc: f64,
    /// Индекс точки с максимальным `tpr - fpr` (первый максимум).
    pub youden_index: usize,
}

impl RocCurve {
    pub fn youden(&self) -> RocPoint {
        self.points[self.youden_index]
    }
}

/// Строит кривую по уникальным значениям вероятности, от больших к меньшим.
pub fn roc_curve(probabilities: &[f64], labels: &[bool]) -> Result<RocCurve> {
    if probabilities.len() != labels.len() {
        return Err(BacktestError::invalid(format!(
            "{} probabilities for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(BacktestError::invalid("ROC scores must be finite"));
    }
    let positives = labels.iter().filter(|&&label| label).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(BacktestError::invalid(
            "ROC curve needs both storm and calm observations",
        ));
    }

    let mut scored: Vec<(f64, bool)> = probabilities
        .iter()
        .copied()
        .zip(labels.iter().copied())
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut points = vec![RocPoint {
        threshold: f64::INFINITY,
        fpr: 0.0,
        tpr: 0.0,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (idx, &(score, label)) in scored.iter().enumerate() {
        if label {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_group = scored.get(idx + 1).is_none_or(|next| next.0 < score);
        if last_of_group {
            points.push(RocPoint {
                threshold: score,
                fpr: fp as f64 / negatives as f64,
                tpr: tp as f64 / positives as f64,
            });
        }
    }

    let auc = points
        .windows(2)
        .map(|pair| (pair[1].fpr - pair[0].fpr) * (pair[1].tpr + pair[0].tpr) / 2.0)
        .sum();

    let mut youden_index = 0;
    for (idx, point) in points.iter().enumerate() {
        let best = points[youden_index];
        if point.tpr - point.fpr > best.tpr - best.fpr {
            youden_index = idx;
        }
    }

    Ok(RocCurve {
        points,
        auc,
        youden_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_separation_has_unit_auc() {
        let curve = roc_curve(&[0.1, 0.2, 0.8, 0.9], &[false, false, true, true]).unwrap();
        assert!((curve.auc - 1.0).abs() < 1e-12);
        let best = curve.youden();
        assert!((best.threshold - 0.8).abs() < 1e-12);
        assert_eq!((best.fpr, best.tpr), (0.0, 1.0));
    }

    #[test]
    fn constant_scores_give_chance_level() {
        let curve = roc_curve(&[0.5; 4], &[false, true, false, true]).unwrap();
        assert_eq!(curve.points.len(), 2);
        assert!((curve.auc - 0.5).abs() < 1e-12);
        assert_eq!(curve.youden_index, 0);
    }

    #[test]
    fn curve_starts_at_origin_and_ends_at_one() {
        let curve =
            roc_curve(&[0.3, 0.7, 0.4, 0.6, 0.2], &[false, true, true, false, false]).unwrap();
        let first = curve.points[0];
        let last = *curve.points.last().unwrap();
        assert!(first.threshold.is_infinite());
        assert_eq!((first.fpr, first.tpr), (0.0, 0.0));
        assert_eq!((last.fpr, last.tpr), (1.0, 1.0));
        // Пары (pos, neg), где pos выше: 0.7 выше всех трёх, 0.4 выше двух → 5 из 6.
        assert!((curve.auc - 5.0 / 6.0).abs() < 1e-12);
        for pair in curve.points.windows(2) {
            assert!(pair[1].threshold < pair[0].threshold);
        }
    }

    #[test]
    fn single_class_is_rejected() {
        assert!(matches!(
            roc_curve(&[0.2, 0.4], &[false, false]),
            Err(BacktestError::InvalidInput(_))
        ));
        assert!(roc_curve(&[0.2], &[true, false]).is_err());
    }
}
