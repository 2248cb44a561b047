//! Общие константы форматирования и значения по умолчанию, чтобы не дублировать их по модулям.

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const MILLIS_PER_MINUTE: f64 = 60_000.0;

pub const DEFAULT_SPLIT_QUANTILE: f64 = 0.8;
pub const DEFAULT_THRESHOLD_START: f64 = 0.30;
pub const DEFAULT_THRESHOLD_STOP: f64 = 0.85;
pub const DEFAULT_THRESHOLD_STEP: f64 = 0.05;
pub const DEFAULT_LEAD_WINDOW_MINUTES: i64 = 60;
pub const DEFAULT_ORANGE_LEVEL: f64 = 0.5;
pub const DEFAULT_RED_LEVEL: f64 = 0.7;

/// Имена признаков в порядке, в котором их ожидает классификатор.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "precip_30min",
    "precip_trend",
    "humidity",
    "temperature",
    "wind_speed",
    "month",
    "hour",
];
pub const FEATURE_COUNT: usize = 7;
