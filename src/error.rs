//! Ошибки бэктеста: некорректный ввод сообщается вызывающему и никогда не исправляется молча.

use std::fmt;

#[derive(Debug)]
pub enum BacktestError {
    /// Пустые, несортированные или иначе некорректные данные и параметры вне диапазона.
    InvalidInput(String),
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    /// Оптимизатор не смог обучить классификатор.
    Training(String),
}

pub type Result<T> = std::result::Result<T, BacktestError>;

impl BacktestError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Csv(err) => write!(f, "CSV error: {err}"),
            Self::Json(err) => write!(f, "JSON error: {err}"),
            Self::Training(message) => write!(f, "training failed: {message}"),
        }
    }
}

impl std::error::Error for BacktestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Csv(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::InvalidInput(_) | Self::Training(_) => None,
        }
    }
}

impl From<std::io::Error> for BacktestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for BacktestError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<serde_json::Error> for BacktestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<argmin::core::Error> for BacktestError {
    fn from(err: argmin::core::Error) -> Self {
        Self::Training(err.to_string())
    }
}
