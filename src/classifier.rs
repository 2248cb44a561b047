//! Вероятностный классификатор шторма и сохранение пары «модель + рабочий порог».
//!
//! Бэктест потребляет только [`Classifier::predict_probability`]. Базовая реализация:
//! логистическая регрессия с весами классов и L2-регуляризацией на стандартизованных
//! признаках, обучаемая L-BFGS.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{FEATURE_COUNT, FEATURE_NAMES};
use crate::dataset::{Features, Observation};
use crate::error::{BacktestError, Result};
use crate::sweep::Criterion;

const DEFAULT_MAX_ITERS: u64 = 200;
const DEFAULT_HISTORY: usize = 10;
const DEFAULT_STORM_WEIGHT: f64 = 5.0;
const DEFAULT_CALM_WEIGHT: f64 = 1.0;
const DEFAULT_L2: f64 = 1e-3;
const DEFAULT_TOL_GRAD: f64 = 1e-8;
const DEFAULT_TOL_COST: f64 = 1e-10;
const MIN_SCALE: f64 = 1e-12;

pub trait Classifier {
    /// Вероятность шторма в диапазоне [0, 1].
    fn predict_probability(&self, features: &Features) -> f64;

    fn predict_observations(&self, observations: &[Observation]) -> Vec<f64> {
        observations
            .iter()
            .map(|obs| self.predict_probability(&obs.features))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingConfig {
    /// Вес ошибок на штормовых наблюдениях (пропущенный шторм дороже ложной тревоги).
    pub storm_weight: f64,
    pub calm_weight: f64,
    pub l2: f64,
    pub max_iters: u64,
    pub history: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            storm_weight: DEFAULT_STORM_WEIGHT,
            calm_weight: DEFAULT_CALM_WEIGHT,
            l2: DEFAULT_L2,
            max_iters: DEFAULT_MAX_ITERS,
            history: DEFAULT_HISTORY,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.storm_weight.is_finite() || self.storm_weight <= 0.0 {
            return Err(BacktestError::invalid("classifier.storm_weight must be > 0"));
        }
        if !self.calm_weight.is_finite() || self.calm_weight <= 0.0 {
            return Err(BacktestError::invalid("classifier.calm_weight must be > 0"));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(BacktestError::invalid("classifier.l2 must be >= 0"));
        }
        if self.max_iters == 0 {
            return Err(BacktestError::invalid("classifier.max_iters must be > 0"));
        }
        if self.history == 0 {
            return Err(BacktestError::invalid("classifier.history must be > 0"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub means: Features,
    pub scales: Features,
    pub weights: Features,
    pub bias: f64,
}

impl Classifier for LogisticClassifier {
    fn predict_probability(&self, features: &Features) -> f64 {
        let z = features
            .iter()
            .zip(&self.means)
            .zip(&self.scales)
            .zip(&self.weights)
            .fold(self.bias, |acc, (((x, mean), scale), weight)| {
                weight.mul_add((x - mean) / scale, acc)
            });
        sigmoid(z)
    }
}

impl LogisticClassifier {
    /// Обучает модель на обучающей части. Нужны оба класса.
    pub fn train(observations: &[Observation], config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        if observations.is_empty() {
            return Err(BacktestError::invalid("training set is empty"));
        }
        let storms = observations.iter().filter(|obs| obs.label).count();
        if storms == 0 || storms == observations.len() {
            return Err(BacktestError::invalid(format!(
                "training set needs both classes, got {storms} storms in {} observations",
                observations.len()
            )));
        }

        let (means, scales) = standardization(observations);
        let rows: Vec<Features> = observations
            .iter()
            .map(|obs| {
                let mut row = [0.0; FEATURE_COUNT];
                for (idx, value) in row.iter_mut().enumerate() {
                    *value = (obs.features[idx] - means[idx]) / scales[idx];
                }
                row
            })
            .collect();
        let targets: Vec<f64> = observations
            .iter()
            .map(|obs| if obs.label { 1.0 } else { 0.0 })
            .collect();
        let sample_weights: Vec<f64> = observations
            .iter()
            .map(|obs| {
                if obs.label {
                    config.storm_weight
                } else {
                    config.calm_weight
                }
            })
            .collect();

        let storm_mass = storms as f64 * config.storm_weight;
        let calm_mass = (observations.len() - storms) as f64 * config.calm_weight;
        let mut init = vec![0.0; FEATURE_COUNT + 1];
        init[0] = (storm_mass / calm_mass).ln();

        let problem = LogisticProblem::new(rows, targets, sample_weights, config.l2);
        let linesearch = MoreThuenteLineSearch::new().with_c(1e-4, 0.9)?;
        let solver = LBFGS::new(linesearch, config.history)
            .with_tolerance_grad(DEFAULT_TOL_GRAD)?
            .with_tolerance_cost(DEFAULT_TOL_COST)?;

        let result = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(config.max_iters))
            .run()?;

        let best = result
            .state
            .get_best_param()
            .or_else(|| result.state.get_param())
            .ok_or_else(|| BacktestError::Training("no parameters returned from optimizer".into()))?
            .clone();
        if best.len() != FEATURE_COUNT + 1 || best.iter().any(|value| !value.is_finite()) {
            return Err(BacktestError::Training(
                "optimizer returned non-finite coefficients".into(),
            ));
        }

        let mut weights = [0.0; FEATURE_COUNT];
        weights.copy_from_slice(&best[1..]);
        tracing::debug!(
            iterations = result.state.get_iter(),
            cost = result.state.get_best_cost(),
            "Classifier trained"
        );

        Ok(Self {
            means,
            scales,
            weights,
            bias: best[0],
        })
    }
}

/// Взвешенная логистическая функция потерь; параметр `[bias, w_1..w_k]`.
#[derive(Clone)]
struct LogisticProblem {
    rows: Vec<Features>,
    targets: Vec<f64>,
    sample_weights: Vec<f64>,
    total_weight: f64,
    l2: f64,
}

impl LogisticProblem {
    fn new(rows: Vec<Features>, targets: Vec<f64>, sample_weights: Vec<f64>, l2: f64) -> Self {
        let total_weight = sample_weights.iter().sum();
        Self {
            rows,
            targets,
            sample_weights,
            total_weight,
            l2,
        }
    }

    fn logit(param: &[f64], row: &Features) -> f64 {
        row.iter()
            .zip(&param[1..])
            .fold(param[0], |acc, (x, w)| w.mul_add(*x, acc))
    }
}

impl CostFunction for LogisticProblem {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        let mut loss = 0.0;
        let samples = self.rows.iter().zip(&self.targets).zip(&self.sample_weights);
        for ((row, target), weight) in samples {
            let z = Self::logit(param, row);
            loss += weight * (target.mul_add(-z, softplus(z)));
        }
        let penalty: f64 = param[1..].iter().map(|w| w * w).sum();
        Ok(loss / self.total_weight + 0.5 * self.l2 * penalty)
    }
}

impl Gradient for LogisticProblem {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
        let mut grad = vec![0.0; param.len()];
        let samples = self.rows.iter().zip(&self.targets).zip(&self.sample_weights);
        for ((row, target), weight) in samples {
            let residual = weight * (sigmoid(Self::logit(param, row)) - target) / self.total_weight;
            grad[0] += residual;
            for (slot, x) in grad[1..].iter_mut().zip(row) {
                *slot += residual * x;
            }
        }
        for (slot, w) in grad[1..].iter_mut().zip(&param[1..]) {
            *slot += self.l2 * w;
        }
        Ok(grad)
    }
}

fn standardization(observations: &[Observation]) -> (Features, Features) {
    let n = observations.len() as f64;
    let mut means = [0.0; FEATURE_COUNT];
    let mut scales = [0.0; FEATURE_COUNT];
    for obs in observations {
        for (mean, value) in means.iter_mut().zip(&obs.features) {
            *mean += value / n;
        }
    }
    for obs in observations {
        for ((scale, value), mean) in scales.iter_mut().zip(&obs.features).zip(&means) {
            let diff = value - mean;
            *scale += diff * diff / n;
        }
    }
    for scale in &mut scales {
        *scale = scale.sqrt();
        if !scale.is_finite() || *scale < MIN_SCALE {
            *scale = 1.0;
        }
    }
    (means, scales)
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

/// Сохраняемая пара «классификатор + рабочий порог».
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub classifier: LogisticClassifier,
    pub threshold: f64,
    pub criterion: Criterion,
    pub features: Vec<String>,
    pub trained_at: DateTime<Utc>,
}

impl ModelBundle {
    pub fn new(classifier: LogisticClassifier, threshold: f64, criterion: Criterion) -> Self {
        Self {
            classifier,
            threshold,
            criterion,
            features: FEATURE_NAMES.iter().map(ToString::to_string).collect(),
            trained_at: Utc::now(),
        }
    }

    pub fn save(&self, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(output_path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(input_path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(input_path)?);
        let bundle: Self = serde_json::from_reader(reader)?;
        if bundle.features != FEATURE_NAMES {
            return Err(BacktestError::invalid(format!(
                "model {} was trained on features {:?}, expected {FEATURE_NAMES:?}",
                input_path.display(),
                bundle.features
            )));
        }
        if !bundle.threshold.is_finite() || !(0.0..=1.0).contains(&bundle.threshold) {
            return Err(BacktestError::invalid(format!(
                "model {} has threshold outside [0, 1]: {}",
                input_path.display(),
                bundle.threshold
            )));
        }
        Ok(bundle)
    }
}
