//! HTML-отчёт по бэктесту.

mod chart;
mod page;

use std::fs;
use std::path::Path;

use chrono::Utc;

use crate::backtest::BacktestOutcome;
use crate::error::Result;

/// Собирает графики и сохраняет страницу, при необходимости минифицируя её.
pub fn render_backtest_report(
    outcome: &BacktestOutcome,
    output_html: &Path,
    minify: bool,
) -> Result<()> {
    let evaluation = &outcome.evaluation;
    let charts = page::Charts {
        thresholds: chart::build_threshold_chart(&evaluation.sweep),
        roc: evaluation.roc.as_ref().map(chart::build_roc_chart),
        timeline: chart::build_timeline_chart(
            &evaluation.lead_time.records,
            evaluation.sweep.best_threshold,
        ),
    };
    let html = page::render_report_page(outcome, &charts, Utc::now());

    // Создаём директорию для HTML, если её ещё нет.
    if let Some(parent) = output_html.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    if minify {
        fs::write(output_html, minify_page(&html))?;
    } else {
        fs::write(output_html, html)?;
    }
    Ok(())
}

fn minify_page(html: &str) -> Vec<u8> {
    let cfg = minify_html::Cfg {
        minify_css: true,
        ..minify_html::Cfg::default()
    };
    minify_html::minify(html.as_bytes(), &cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BacktestConfig, run_backtest};
    use crate::dataset::{Dataset, Observation};
    use chrono::{TimeDelta, TimeZone};

    fn outcome() -> BacktestOutcome {
        let start = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        let observations = (0..150)
            .map(|idx| {
                let precip = f64::from(idx % 30);
                Observation {
                    timestamp: start + TimeDelta::minutes(i64::from(idx) * 20),
                    features: [precip, 0.5, 80.0, 27.0, 4.0, 8.0, f64::from(idx % 24)],
                    label: precip >= 22.0,
                }
            })
            .collect();
        run_backtest(&Dataset::new(observations), &BacktestConfig::default()).unwrap()
    }

    #[test]
    fn writes_report_with_all_sections() {
        let outcome = outcome();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist").join("report.html");
        render_backtest_report(&outcome, &path, false).unwrap();
        let html = fs::read_to_string(&path).unwrap();
        assert!(html.contains("threshold-plot"));
        assert!(html.contains("timeline-plot"));
        assert!(html.contains("Operating threshold"));
        assert!(html.contains("Mean lead time"));
    }

    #[test]
    fn minified_report_is_smaller() {
        let outcome = outcome();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.html");
        let minified = dir.path().join("min.html");
        render_backtest_report(&outcome, &plain, false).unwrap();
        render_backtest_report(&outcome, &minified, true).unwrap();
        let plain_len = fs::metadata(&plain).unwrap().len();
        let minified_len = fs::metadata(&minified).unwrap().len();
        assert!(minified_len > 0);
        assert!(minified_len < plain_len);
    }
}
