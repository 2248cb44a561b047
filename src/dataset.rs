//! Загрузка размеченных наблюдений из CSV и построение отсортированного по времени набора.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

use crate::constants::{FEATURE_COUNT, FEATURE_NAMES, TIMESTAMP_FORMAT};
use crate::error::{BacktestError, Result};

const TIME_FORMAT_TZ: &str = "%Y-%m-%d %H:%M:%S %Z";
const TIME_FORMAT_OFFSET: &str = "%Y-%m-%d %H:%M:%S %z";
const UTC_SUFFIX: &str = " UTC";

const ERROR_EMPTY_TIMESTAMP: &str = "empty timestamp";
const ERROR_UNRECOGNIZED_TIME: &str = "unrecognized time format";

/// Номер первой строки данных в файле (строка 1 занята заголовком).
const FIRST_DATA_LINE: usize = 2;

pub type Features = [f64; FEATURE_COUNT];

#[derive(Clone, Copy, Debug)]
enum TimeFormatHint {
    Tz,
    Offset,
    Rfc3339,
    NaiveUtcSuffix,
    Naive,
}

impl TimeFormatHint {
    const ALL: [Self; 5] = [
        Self::Tz,
        Self::Offset,
        Self::Rfc3339,
        Self::NaiveUtcSuffix,
        Self::Naive,
    ];

    fn parse(self, raw: &str) -> Option<DateTime<Utc>> {
        match self {
            Self::Tz => DateTime::parse_from_str(raw, TIME_FORMAT_TZ)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Offset => DateTime::parse_from_str(raw, TIME_FORMAT_OFFSET)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::NaiveUtcSuffix => raw
                .strip_suffix(UTC_SUFFIX)
                .and_then(|stripped| {
                    NaiveDateTime::parse_from_str(stripped.trim_end(), TIMESTAMP_FORMAT).ok()
                })
                .map(|naive| Utc.from_utc_datetime(&naive)),
            Self::Naive => NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive)),
        }
    }
}

/// Строка входного CSV. Испанские заголовки старого генератора данных принимаются как псевдонимы.
#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    #[serde(alias = "precip_ult_30min")]
    precip_30min: f64,
    #[serde(alias = "tendencia_precip")]
    precip_trend: f64,
    #[serde(alias = "humedad_relativa")]
    humidity: f64,
    #[serde(alias = "temperatura")]
    temperature: f64,
    #[serde(alias = "viento_velocidad")]
    wind_speed: f64,
    #[serde(alias = "mes")]
    month: f64,
    #[serde(alias = "hora")]
    hour: f64,
    #[serde(alias = "tormenta", deserialize_with = "str_to_label")]
    storm: bool,
}

impl CsvRow {
    const fn features(&self) -> Features {
        [
            self.precip_30min,
            self.precip_trend,
            self.humidity,
            self.temperature,
            self.wind_speed,
            self.month,
            self.hour,
        ]
    }
}

/// Метка шторма: `0`/`1` (в том числе `0.0`/`1.0`) или `true`/`false`.
fn str_to_label<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Ok(true),
        "0" | "0.0" | "false" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "storm label must be 0/1 or true/false, got '{other}'"
        ))),
    }
}

/// Одно наблюдение датчиков с меткой «шторм в окне этого наблюдения».
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub features: Features,
    pub label: bool,
}

/// Набор наблюдений, отсортированный по времени сразу при построении.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    /// Стабильная сортировка: наблюдения с одинаковым временем сохраняют исходный порядок.
    pub fn new(mut observations: Vec<Observation>) -> Self {
        observations.sort_by_key(|observation| observation.timestamp);
        Self { observations }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub const fn len(&self) -> usize {
        self.observations.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.observations.iter().filter(|obs| obs.label).count()
    }
}

/// Читает CSV по пути; первая же некорректная строка прерывает загрузку.
pub fn load_dataset(csv_path: &Path) -> Result<Dataset> {
    let file = File::open(csv_path)?;
    read_dataset(file).map_err(|err| match err {
        BacktestError::InvalidInput(message) => {
            BacktestError::invalid(format!("{}: {message}", csv_path.display()))
        }
        other => other,
    })
}

pub fn read_dataset<R: Read>(input: R) -> Result<Dataset> {
    read_rows(csv::Reader::from_reader(input))
}

fn read_rows<R: Read>(mut reader: csv::Reader<R>) -> Result<Dataset> {
    let mut hint = None;
    let observations = reader
        .deserialize::<CsvRow>()
        .enumerate()
        .map(|(idx, row)| {
            let line = idx + FIRST_DATA_LINE;
            let row = row.map_err(|err| BacktestError::invalid(format!("line {line}: {err}")))?;
            let timestamp = parse_timestamp_with_hint(&row.timestamp, &mut hint).map_err(|err| {
                BacktestError::invalid(format!(
                    "line {line}: failed to parse timestamp '{}': {err}",
                    row.timestamp
                ))
            })?;
            let features = row.features();
            if let Some(pos) = features.iter().position(|value| !value.is_finite()) {
                return Err(BacktestError::invalid(format!(
                    "line {line}: feature '{}' is not finite",
                    FEATURE_NAMES[pos]
                )));
            }
            Ok(Observation {
                timestamp,
                features,
                label: row.storm,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Dataset::new(observations))
}

/// Парсит поддерживаемые форматы времени и приводит их к UTC.
/// Удачный формат запоминается, чтобы не перебирать все варианты на каждой строке.
fn parse_timestamp_with_hint(
    raw: &str,
    hint: &mut Option<TimeFormatHint>,
) -> std::result::Result<DateTime<Utc>, &'static str> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(ERROR_EMPTY_TIMESTAMP);
    }

    if let Some(known) = *hint
        && let Some(parsed) = known.parse(trimmed)
    {
        return Ok(parsed);
    }

    for candidate in TimeFormatHint::ALL {
        if let Some(parsed) = candidate.parse(trimmed) {
            *hint = Some(candidate);
            return Ok(parsed);
        }
    }

    Err(ERROR_UNRECOGNIZED_TIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "timestamp,precip_30min,precip_trend,humidity,temperature,wind_speed,month,hour,storm\n";

    #[test]
    fn sorts_rows_by_timestamp() {
        let csv = format!(
            "{HEADER}2023-01-01 00:40:00,1,0,70,28,5,1,0,0\n\
             2023-01-01 00:00:00,2,0,70,28,5,1,0,1\n\
             2023-01-01 00:20:00,3,0,70,28,5,1,0,0\n"
        );
        let dataset = read_dataset(csv.as_bytes()).unwrap();
        let precip: Vec<f64> = dataset
            .observations()
            .iter()
            .map(|obs| obs.features[0])
            .collect();
        assert_eq!(precip, vec![2.0, 3.0, 1.0]);
        assert_eq!(dataset.positives(), 1);
    }

    #[test]
    fn accepts_legacy_spanish_headers() {
        let csv = "timestamp,precip_ult_30min,tendencia_precip,humedad_relativa,temperatura,\
                   viento_velocidad,mes,hora,tormenta\n\
                   2023-05-01 13:20:00,16.2,1.1,91,27,6,5,13,1\n";
        let dataset = read_dataset(csv.as_bytes()).unwrap();
        let obs = &dataset.observations()[0];
        assert!(obs.label);
        assert!((obs.features[0] - 16.2).abs() < 1e-12);
        assert!((obs.features[6] - 13.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_unparseable_timestamp_with_line_number() {
        let csv = format!(
            "{HEADER}2023-01-01 00:00:00,1,0,70,28,5,1,0,0\n\
             yesterday,1,0,70,28,5,1,0,0\n"
        );
        let err = read_dataset(csv.as_bytes()).unwrap_err();
        match err {
            BacktestError::InvalidInput(message) => {
                assert!(message.contains("line 3"), "{message}");
                assert!(message.contains("yesterday"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_bad_labels_and_non_finite_features() {
        let bad_label = format!("{HEADER}2023-01-01 00:00:00,1,0,70,28,5,1,0,2\n");
        assert!(matches!(
            read_dataset(bad_label.as_bytes()),
            Err(BacktestError::InvalidInput(_))
        ));

        let nan_feature = format!("{HEADER}2023-01-01 00:00:00,NaN,0,70,28,5,1,0,0\n");
        let err = read_dataset(nan_feature.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("precip_30min"));
    }

    #[test]
    fn parses_all_supported_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 9, 3, 15, 40, 0).unwrap();
        for raw in [
            "2024-09-03 15:40:00",
            "2024-09-03 15:40:00 UTC",
            "2024-09-03 17:40:00 +0200",
            "2024-09-03T15:40:00Z",
        ] {
            let mut hint = None;
            assert_eq!(parse_timestamp_with_hint(raw, &mut hint), Ok(expected), "{raw}");
            assert!(hint.is_some());
        }
        let mut hint = None;
        assert_eq!(
            parse_timestamp_with_hint("  ", &mut hint),
            Err(ERROR_EMPTY_TIMESTAMP)
        );
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.csv");
        let body = format!("{HEADER}2023-01-01 00:00:00,1,0,70,28,5,1,0,true\n");
        std::fs::write(&path, body).unwrap();
        let dataset = load_dataset(&path).unwrap();
        assert_eq!(dataset.len(), 1);
        assert!(dataset.observations()[0].label);
    }
}
