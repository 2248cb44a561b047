mod alert;
mod backtest;
mod classifier;
mod constants;
mod dataset;
mod error;
mod lead_time;
mod report;
mod roc;
mod split;
mod sweep;

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::alert::AlertLevels;
use crate::backtest::{BacktestConfig, run_backtest};
use crate::classifier::{Classifier, ModelBundle};
use crate::constants::{
    DEFAULT_THRESHOLD_START, DEFAULT_THRESHOLD_STEP, DEFAULT_THRESHOLD_STOP, FEATURE_COUNT,
};
use crate::dataset::Features;
use crate::sweep::{Criterion, threshold_range};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

const APP_ABOUT: &str = "Stormwatch - backtesting of a storm early-warning classifier";
const DEFAULT_DATASET_CSV: &str = "data/observations.csv";
const DEFAULT_CONFIG: &str = "config/backtest.toml";
const DEFAULT_THRESHOLDS_CSV: &str = "dist/thresholds.csv";
const DEFAULT_BACKTEST_CSV: &str = "dist/backtest.csv";
const DEFAULT_ROC_CSV: &str = "dist/roc.csv";
const DEFAULT_MODEL_JSON: &str = "dist/model.json";
const DEFAULT_OUTPUT_HTML: &str = "dist/report.html";

#[derive(Parser, Debug)]
#[command(name = "stormwatch", about = APP_ABOUT)]
struct Args {
    /// TOML-файл с параметрами бэктеста и уровней тревоги.
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG,
        global = true
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Бэктест: хронологическое разбиение, обучение, перебор порогов и оценка упреждения.
    Backtest {
        /// CSV с размеченными наблюдениями.
        #[arg(
            short = 'c',
            long = "csv",
            value_name = "PATH",
            default_value = DEFAULT_DATASET_CSV
        )]
        csv: PathBuf,
        /// Квантиль времени, по которому проходит граница train/eval.
        #[arg(long = "quantile", value_name = "Q")]
        quantile: Option<f64>,
        /// Критерий выбора рабочего порога.
        #[arg(long = "criterion", value_enum)]
        criterion: Option<Criterion>,
        /// Окно упреждения (в минутах).
        #[arg(long = "window-minutes", value_name = "MINUTES")]
        window_minutes: Option<f64>,
        /// Куда сохранить таблицу порогов.
        #[arg(
            long = "output-thresholds-csv",
            value_name = "PATH",
            default_value = DEFAULT_THRESHOLDS_CSV
        )]
        output_thresholds_csv: PathBuf,
        /// Куда сохранить построчный результат на оценочной части.
        #[arg(
            long = "output-backtest-csv",
            value_name = "PATH",
            default_value = DEFAULT_BACKTEST_CSV
        )]
        output_backtest_csv: PathBuf,
        /// Куда сохранить точки ROC-кривой.
        #[arg(
            long = "output-roc-csv",
            value_name = "PATH",
            default_value = DEFAULT_ROC_CSV
        )]
        output_roc_csv: PathBuf,
        /// Куда сохранить обученную модель с порогом.
        #[arg(
            long = "output-model",
            value_name = "PATH",
            default_value = DEFAULT_MODEL_JSON
        )]
        output_model: PathBuf,
        /// Куда сохранить HTML.
        #[arg(
            short = 'o',
            long = "output-html",
            value_name = "PATH",
            default_value = DEFAULT_OUTPUT_HTML
        )]
        output_html: PathBuf,
        /// Не минифицировать HTML (по умолчанию минифицируется).
        #[arg(
            long = "no-minify-html",
            default_value_t = true,
            action = ArgAction::SetFalse
        )]
        minify_html: bool,
    },
    /// Оценить одно наблюдение сохранённой моделью.
    Predict {
        /// JSON с моделью, сохранённый командой backtest.
        #[arg(
            short = 'm',
            long = "model",
            value_name = "PATH",
            default_value = DEFAULT_MODEL_JSON
        )]
        model: PathBuf,
        #[arg(long = "precip-30min", value_name = "MM")]
        precip_30min: f64,
        #[arg(long = "precip-trend", value_name = "MM", allow_negative_numbers = true)]
        precip_trend: f64,
        #[arg(long = "humidity", value_name = "PERCENT")]
        humidity: f64,
        #[arg(long = "temperature", value_name = "CELSIUS", allow_negative_numbers = true)]
        temperature: f64,
        #[arg(long = "wind-speed", value_name = "M_S")]
        wind_speed: f64,
        #[arg(long = "month", value_name = "1-12")]
        month: u32,
        #[arg(long = "hour", value_name = "0-23")]
        hour: u32,
    },
    /// Сгенерировать файлы автодополнения для shell.
    Completions {
        /// Целевой shell.
        #[arg(value_enum)]
        shell: Shell,
        /// Куда сохранить файл (по умолчанию stdout).
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    split: Option<SplitFile>,
    sweep: Option<SweepFile>,
    lead_time: Option<LeadTimeFile>,
    classifier: Option<ClassifierFile>,
    alerts: Option<AlertsFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SplitFile {
    quantile: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SweepFile {
    start: Option<f64>,
    stop: Option<f64>,
    step: Option<f64>,
    criterion: Option<Criterion>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LeadTimeFile {
    window_minutes: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassifierFile {
    storm_weight: Option<f64>,
    calm_weight: Option<f64>,
    l2: Option<f64>,
    max_iters: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AlertsFile {
    orange: Option<f64>,
    red: Option<f64>,
}

/// Значения командной строки, перекрывающие конфиг.
#[derive(Debug, Default, Clone, Copy)]
struct Overrides {
    quantile: Option<f64>,
    criterion: Option<Criterion>,
    window_minutes: Option<f64>,
}

#[derive(Debug, Clone)]
struct ResolvedConfig {
    backtest: BacktestConfig,
    alerts: AlertLevels,
}

fn resolve_config(file: ConfigFile, overrides: Overrides) -> Result<ResolvedConfig, String> {
    let mut backtest = BacktestConfig::default();

    if let Some(split) = file.split
        && let Some(quantile) = split.quantile
    {
        backtest.quantile = quantile;
    }
    if let Some(quantile) = overrides.quantile {
        backtest.quantile = quantile;
    }

    let mut start = DEFAULT_THRESHOLD_START;
    let mut stop = DEFAULT_THRESHOLD_STOP;
    let mut step = DEFAULT_THRESHOLD_STEP;
    if let Some(sweep) = file.sweep {
        start = sweep.start.unwrap_or(start);
        stop = sweep.stop.unwrap_or(stop);
        step = sweep.step.unwrap_or(step);
        if let Some(criterion) = sweep.criterion {
            backtest.evaluation.criterion = criterion;
        }
    }
    if let Some(criterion) = overrides.criterion {
        backtest.evaluation.criterion = criterion;
    }
    backtest.evaluation.thresholds =
        threshold_range(start, stop, step).map_err(|err| format!("sweep: {err}"))?;

    if let Some(window_minutes) = overrides
        .window_minutes
        .or_else(|| file.lead_time.and_then(|lead| lead.window_minutes))
    {
        backtest.evaluation.window = lead_time::window_from_minutes(window_minutes)
            .map_err(|err| format!("lead_time.window_minutes: {err}"))?;
    }

    if let Some(classifier) = file.classifier {
        let training = &mut backtest.training;
        if let Some(storm_weight) = classifier.storm_weight {
            training.storm_weight = storm_weight;
        }
        if let Some(calm_weight) = classifier.calm_weight {
            training.calm_weight = calm_weight;
        }
        if let Some(l2) = classifier.l2 {
            training.l2 = l2;
        }
        if let Some(max_iters) = classifier.max_iters {
            training.max_iters = max_iters;
        }
    }

    let mut alerts = AlertLevels::default();
    if let Some(file_alerts) = file.alerts {
        alerts.orange = file_alerts.orange.unwrap_or(alerts.orange);
        alerts.red = file_alerts.red.unwrap_or(alerts.red);
    }

    let resolved = ResolvedConfig { backtest, alerts };
    validate_config(&resolved)?;
    Ok(resolved)
}

fn validate_config(config: &ResolvedConfig) -> Result<(), String> {
    let quantile = config.backtest.quantile;
    if !quantile.is_finite() || quantile <= 0.0 || quantile >= 1.0 {
        return Err(format!("split.quantile must be within (0, 1), got {quantile}"));
    }
    config
        .backtest
        .training
        .validate()
        .map_err(|err| err.to_string())?;
    config.alerts.validate().map_err(|err| err.to_string())?;
    Ok(())
}

fn load_config(path: &Path, overrides: Overrides) -> Result<ResolvedConfig, String> {
    if !path.exists() {
        if path == Path::new(DEFAULT_CONFIG) {
            tracing::info!(
                "Config {} not found, using built-in defaults",
                path.display()
            );
            return resolve_config(ConfigFile::default(), overrides);
        }
        return Err(format!("Config {} does not exist", path.display()));
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {err}", path.display()))?;
    let file: ConfigFile = toml::from_str(&raw)
        .map_err(|err| format!("Failed to parse config {}: {err}", path.display()))?;
    resolve_config(file, overrides)
        .map_err(|err| format!("Invalid config {}: {err}", path.display()))
}

fn generate_completions(shell: Shell, output: Option<PathBuf>) -> Result<(), String> {
    let mut cmd = Args::command();
    let bin_name = cmd.get_name().to_string();
    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create {}: {err}", parent.display()))?;
        }
        let mut file = File::create(&path)
            .map_err(|err| format!("Failed to create {}: {err}", path.display()))?;
        generate(shell, &mut cmd, bin_name, &mut file);
    } else {
        let mut stdout = std::io::stdout();
        generate(shell, &mut cmd, bin_name, &mut stdout);
    }
    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stormwatch=info"));
    let ansi = std::io::stdout().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .compact()
        .init();
}

fn headline(message: &str) {
    tracing::info!(status = "start", "{message}");
}

fn info(message: &str) {
    tracing::info!(status = "info", "{message}");
}

fn success(message: &str) {
    tracing::info!(status = "ok", "{message}");
}

fn error(message: &str) {
    tracing::error!(status = "err", "{message}");
}

struct BacktestOutputs {
    thresholds_csv: PathBuf,
    backtest_csv: PathBuf,
    roc_csv: PathBuf,
    model: PathBuf,
    html: PathBuf,
    minify_html: bool,
}

fn run_backtest_command(
    csv_path: &Path,
    config: &ResolvedConfig,
    outputs: &BacktestOutputs,
) -> Result<(), String> {
    info(&format!("Loading observations from {}", csv_path.display()));
    let dataset = dataset::load_dataset(csv_path)
        .map_err(|err| format!("Failed to load dataset: {err}"))?;
    tracing::info!(
        rows = dataset.len(),
        storms = dataset.positives(),
        "Dataset loaded"
    );

    let outcome = run_backtest(&dataset, &config.backtest)
        .map_err(|err| format!("Backtest failed: {err}"))?;
    let evaluation = &outcome.evaluation;

    backtest::write_threshold_csv(&evaluation.sweep, &outputs.thresholds_csv)
        .map_err(|err| format!("Failed to write threshold CSV: {err}"))?;
    success(&format!(
        "Saved threshold table to {}",
        outputs.thresholds_csv.display()
    ));

    backtest::write_backtest_csv(&evaluation.lead_time.records, &outputs.backtest_csv)
        .map_err(|err| format!("Failed to write backtest CSV: {err}"))?;
    success(&format!(
        "Saved backtest rows to {}",
        outputs.backtest_csv.display()
    ));

    if let Some(roc) = &evaluation.roc {
        backtest::write_roc_csv(roc, &outputs.roc_csv)
            .map_err(|err| format!("Failed to write ROC CSV: {err}"))?;
        success(&format!("Saved ROC curve to {}", outputs.roc_csv.display()));
    }

    let bundle = ModelBundle::new(
        outcome.classifier.clone(),
        evaluation.sweep.best_threshold,
        evaluation.sweep.criterion,
    );
    bundle
        .save(&outputs.model)
        .map_err(|err| format!("Failed to save model: {err}"))?;
    success(&format!("Saved model to {}", outputs.model.display()));

    report::render_backtest_report(&outcome, &outputs.html, outputs.minify_html)
        .map_err(|err| format!("Failed to render report: {err}"))?;
    success(&format!("Saved report to {}", outputs.html.display()));
    Ok(())
}

fn run_predict_command(
    model_path: &Path,
    features: &Features,
    levels: AlertLevels,
) -> Result<(), String> {
    let bundle = ModelBundle::load(model_path)
        .map_err(|err| format!("Failed to load model: {err}"))?;
    if features.iter().any(|value| !value.is_finite()) {
        return Err("Features must be finite".to_string());
    }
    let probability = bundle.classifier.predict_probability(features);
    let level = levels.classify(probability);
    tracing::info!(
        probability,
        threshold = bundle.threshold,
        alert = probability >= bundle.threshold,
        level = %level,
        action = level.action(),
        "Storm probability"
    );
    Ok(())
}

fn predict_features(
    precip_30min: f64,
    precip_trend: f64,
    humidity: f64,
    temperature: f64,
    wind_speed: f64,
    month: u32,
    hour: u32,
) -> Result<Features, String> {
    if !(1..=12).contains(&month) {
        return Err(format!("month must be within 1..=12, got {month}"));
    }
    if hour > 23 {
        return Err(format!("hour must be within 0..=23, got {hour}"));
    }
    let features: [f64; FEATURE_COUNT] = [
        precip_30min,
        precip_trend,
        humidity,
        temperature,
        wind_speed,
        f64::from(month),
        f64::from(hour),
    ];
    Ok(features)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config_path = args.config;
    let result = match args.command {
        Command::Completions { shell, output } => {
            return match generate_completions(shell, output) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("{err}");
                    ExitCode::FAILURE
                }
            };
        }
        Command::Backtest {
            csv,
            quantile,
            criterion,
            window_minutes,
            output_thresholds_csv,
            output_backtest_csv,
            output_roc_csv,
            output_model,
            output_html,
            minify_html,
        } => {
            init_logging();
            headline(APP_ABOUT);
            let overrides = Overrides {
                quantile,
                criterion,
                window_minutes,
            };
            load_config(&config_path, overrides).and_then(|config| {
                tracing::info!(
                    mode = "backtest",
                    csv = %csv.display(),
                    config_path = %config_path.display(),
                    quantile = config.backtest.quantile,
                    criterion = %config.backtest.evaluation.criterion,
                    thresholds = config.backtest.evaluation.thresholds.len(),
                    window_minutes = config.backtest.evaluation.window.num_seconds() / 60,
                    minify_html,
                    "Starting backtest"
                );
                let outputs = BacktestOutputs {
                    thresholds_csv: output_thresholds_csv,
                    backtest_csv: output_backtest_csv,
                    roc_csv: output_roc_csv,
                    model: output_model,
                    html: output_html,
                    minify_html,
                };
                run_backtest_command(&csv, &config, &outputs)
            })
        }
        Command::Predict {
            model,
            precip_30min,
            precip_trend,
            humidity,
            temperature,
            wind_speed,
            month,
            hour,
        } => {
            init_logging();
            load_config(&config_path, Overrides::default()).and_then(|config| {
                let features = predict_features(
                    precip_30min,
                    precip_trend,
                    humidity,
                    temperature,
                    wind_speed,
                    month,
                    hour,
                )?;
                run_predict_command(&model, &features, config.alerts)
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error(&err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn parse(raw: &str) -> ConfigFile {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn empty_config_resolves_to_defaults() {
        let config = resolve_config(ConfigFile::default(), Overrides::default()).unwrap();
        assert_eq!(config.backtest, BacktestConfig::default());
        assert_eq!(config.alerts, AlertLevels::default());
        assert_eq!(config.backtest.evaluation.thresholds.len(), 12);
    }

    #[test]
    fn file_values_are_applied() {
        let file = parse(
            r#"
            [split]
            quantile = 0.7

            [sweep]
            start = 0.2
            stop = 0.4
            step = 0.1
            criterion = "youden"

            [lead_time]
            window_minutes = 90

            [classifier]
            storm_weight = 3.0
            max_iters = 50

            [alerts]
            orange = 0.4
            red = 0.8
            "#,
        );
        let config = resolve_config(file, Overrides::default()).unwrap();
        assert!((config.backtest.quantile - 0.7).abs() < 1e-12);
        assert_eq!(config.backtest.evaluation.thresholds, vec![0.2, 0.3, 0.4]);
        assert_eq!(config.backtest.evaluation.criterion, Criterion::Youden);
        assert_eq!(config.backtest.evaluation.window, TimeDelta::minutes(90));
        assert!((config.backtest.training.storm_weight - 3.0).abs() < 1e-12);
        assert_eq!(config.backtest.training.max_iters, 50);
        assert!((config.alerts.orange - 0.4).abs() < 1e-12);
        assert!((config.alerts.red - 0.8).abs() < 1e-12);
    }

    #[test]
    fn command_line_overrides_file() {
        let file = parse(
            r#"
            [split]
            quantile = 0.7
            [sweep]
            criterion = "recall"
            [lead_time]
            window_minutes = 90
            "#,
        );
        let overrides = Overrides {
            quantile: Some(0.6),
            criterion: Some(Criterion::Precision),
            window_minutes: Some(30.0),
        };
        let config = resolve_config(file, overrides).unwrap();
        assert!((config.backtest.quantile - 0.6).abs() < 1e-12);
        assert_eq!(config.backtest.evaluation.criterion, Criterion::Precision);
        assert_eq!(config.backtest.evaluation.window, TimeDelta::minutes(30));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            "[split]\nquantile = 1.0",
            "[split]\nquantile = 0.0",
            "[sweep]\nstep = 0.0",
            "[sweep]\nstart = 0.0\nstop = 1.0\nstep = 1e-300",
            "[lead_time]\nwindow_minutes = 1e-9",
            "[sweep]\nstart = 0.9\nstop = 0.3",
            "[lead_time]\nwindow_minutes = 0",
            "[classifier]\nstorm_weight = -1.0",
            "[classifier]\nmax_iters = 0",
            "[alerts]\norange = 0.9\nred = 0.7",
        ];
        for raw in cases {
            assert!(
                resolve_config(parse(raw), Overrides::default()).is_err(),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<ConfigFile>("[split]\nqunatile = 0.5").is_err());
    }

    #[test]
    fn missing_default_config_falls_back() {
        let config = load_config(Path::new(DEFAULT_CONFIG), Overrides::default());
        assert!(config.is_ok());
    }

    #[test]
    fn missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(&path, Overrides::default()).is_err());
    }

    #[test]
    fn predict_features_validate_calendar_fields() {
        assert!(predict_features(5.0, 0.1, 80.0, 27.0, 3.0, 9, 14).is_ok());
        assert!(predict_features(5.0, 0.1, 80.0, 27.0, 3.0, 13, 14).is_err());
        assert!(predict_features(5.0, 0.1, 80.0, 27.0, 3.0, 9, 24).is_err());
    }
}
