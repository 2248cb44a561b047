//! Уровни тревоги для оперативной оценки одного наблюдения.

use std::fmt;

use crate::constants::{DEFAULT_ORANGE_LEVEL, DEFAULT_RED_LEVEL};
use crate::error::{BacktestError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertLevel {
    Green,
    Orange,
    Red,
}

impl AlertLevel {
    pub const fn action(self) -> &'static str {
        match self {
            Self::Green => "normal conditions, standard monitoring",
            Self::Orange => "preventive alert, monitor vulnerable zones",
            Self::Red => "critical alert, activate the emergency protocol",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Red => "red",
        })
    }
}

/// Границы уровней включительные: `p >= red` даёт красный, `p >= orange` оранжевый.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlertLevels {
    pub orange: f64,
    pub red: f64,
}

impl Default for AlertLevels {
    fn default() -> Self {
        Self {
            orange: DEFAULT_ORANGE_LEVEL,
            red: DEFAULT_RED_LEVEL,
        }
    }
}

impl AlertLevels {
    pub fn validate(&self) -> Result<()> {
        if !self.orange.is_finite() || !self.red.is_finite() {
            return Err(BacktestError::invalid("alert levels must be finite"));
        }
        if self.orange <= 0.0 || self.orange > self.red || self.red > 1.0 {
            return Err(BacktestError::invalid(format!(
                "alert levels must satisfy 0 < orange <= red <= 1, got orange={} red={}",
                self.orange, self.red
            )));
        }
        Ok(())
    }

    pub fn classify(&self, probability: f64) -> AlertLevel {
        if probability >= self.red {
            AlertLevel::Red
        } else if probability >= self.orange {
            AlertLevel::Orange
        } else {
            AlertLevel::Green
        }
    }
}
