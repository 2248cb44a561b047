//! Рендер HTML-страницы отчёта с Plotly-графиками.

use chrono::{DateTime, Utc};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use plotly::Plot;

use crate::backtest::BacktestOutcome;
use crate::constants::TIMESTAMP_FORMAT;

const PAGE_TITLE: &str = "Storm early warning: backtest";
const PAGE_SUBTITLE: &str = "Chronological hold-out evaluation of the storm classifier.";
const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M UTC";
const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const GOOGLE_FONTS_CSS: &str =
    "https://fonts.googleapis.com/css2?family=IBM+Plex+Sans:wght@400;500;600&display=swap";
const NO_LEAD_TIME: &str = "no qualifying alerts found";
const NOT_AVAILABLE: &str = "n/a";
const NO_ROC: &str = "Evaluation slice holds a single class, ROC is undefined.";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(super) struct Charts {
    pub thresholds: Plot,
    pub roc: Option<Plot>,
    pub timeline: Plot,
}

fn card(title: &str, value: &str, note: &str) -> Markup {
    html! {
        div class="card" {
            div class="card-title" { (title) }
            div class="card-value" { (value) }
            div class="card-note" { (note) }
        }
    }
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

#[allow(clippy::too_many_lines)]
pub(super) fn render_report_page(
    outcome: &BacktestOutcome,
    charts: &Charts,
    generated_at: DateTime<Utc>,
) -> String {
    let split = &outcome.split;
    let sweep = &outcome.evaluation.sweep;
    let best = sweep.best();
    let lead = &outcome.evaluation.lead_time;

    let threshold_html = charts.thresholds.to_inline_html(Some("threshold-plot"));
    let roc_html = charts
        .roc
        .as_ref()
        .map(|plot| plot.to_inline_html(Some("roc-plot")));
    let timeline_html = charts.timeline.to_inline_html(Some("timeline-plot"));

    let lead_value = lead
        .mean_minutes
        .map_or_else(|| NOT_AVAILABLE.to_string(), |mean| format!("{mean:.1} min"));
    let lead_note = if lead.mean_minutes.is_some() {
        format!("{} of {} storms alerted in advance", lead.detected, lead.storms)
    } else {
        format!("{NO_LEAD_TIME} ({} storms)", lead.storms)
    };
    let auc_value = outcome
        .evaluation
        .roc
        .as_ref()
        .map_or_else(|| NOT_AVAILABLE.to_string(), |roc| format!("{:.3}", roc.auc));
    let undefined_note = if best.undefined.is_empty() {
        String::new()
    } else {
        format!("undefined, reported as 0: {}", best.undefined_label())
    };
    let generated_label = generated_at.format(GENERATED_AT_FORMAT).to_string();

    let page = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (PAGE_TITLE) }
                link rel="preconnect" href="https://fonts.googleapis.com";
                link rel="stylesheet" href=(GOOGLE_FONTS_CSS);
                script src=(PLOTLY_CDN) {}
                style {
                    "
                    :root {
                        color-scheme: light;
                        --bg: #f4f6f8;
                        --card: #ffffff;
                        --ink: #1f2430;
                        --muted: #56606f;
                        --accent: #1a3a6c;
                        --border: rgba(31, 36, 48, 0.08);
                    }
                    * { box-sizing: border-box; }
                    body {
                        margin: 0;
                        background: var(--bg);
                        color: var(--ink);
                        font-family: 'IBM Plex Sans', Arial, sans-serif;
                    }
                    .page { max-width: 1240px; margin: 40px auto 60px; padding: 0 24px; }
                    h1 { margin: 0 0 6px; font-size: 28px; }
                    .subtitle { color: var(--muted); margin: 0 0 24px; }
                    .cards {
                        display: grid;
                        grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
                        gap: 14px;
                        margin-bottom: 24px;
                    }
                    .card, .panel {
                        background: var(--card);
                        border: 1px solid var(--border);
                        border-radius: 14px;
                        padding: 16px 18px;
                    }
                    .card-title { color: var(--muted); font-size: 13px; }
                    .card-value {
                        font-size: 26px;
                        font-weight: 600;
                        color: var(--accent);
                        margin: 4px 0;
                    }
                    .card-note { color: var(--muted); font-size: 12px; min-height: 14px; }
                    .panels {
                        display: grid;
                        grid-template-columns: 1fr 1fr;
                        gap: 16px;
                        margin-bottom: 16px;
                    }
                    tr.selected { font-weight: 600; }
                    .panel h2 { font-size: 16px; margin: 0 0 8px; }
                    .empty { color: var(--muted); padding: 40px 0; text-align: center; }
                    footer { color: var(--muted); font-size: 12px; margin-top: 24px; }
                    @media (max-width: 900px) { .panels { grid-template-columns: 1fr; } }
                    "
                }
            }
            body {
                main class="page" {
                    h1 { (PAGE_TITLE) }
                    p class="subtitle" { (PAGE_SUBTITLE) }
                    section class="cards" {
                        (card(
                            "Operating threshold",
                            &format!("{:.2}", sweep.best_threshold),
                            &format!("selected by max {}", sweep.criterion),
                        ))
                        (card("Recall", &percent(best.recall), &undefined_note))
                        (card("Precision", &percent(best.precision), ""))
                        (card("False positive rate", &percent(best.fpr), ""))
                        (card("F1", &format!("{:.3}", best.f1), ""))
                        (card("Mean lead time", &lead_value, &lead_note))
                        (card("ROC AUC", &auc_value, ""))
                        (card(
                            "Split cut",
                            &split.cut.format(TIMESTAMP_FORMAT).to_string(),
                            &format!(
                                "train {} ({} storms) / eval {} ({} storms)",
                                split.train_len,
                                split.train_storms,
                                split.eval_len,
                                split.eval_storms
                            ),
                        ))
                    }
                    section class="panels" {
                        div class="panel" {
                            h2 { "Metrics by threshold" }
                            (PreEscaped(threshold_html))
                        }
                        div class="panel" {
                            h2 { "ROC curve" }
                            @if let Some(roc_html) = roc_html {
                                (PreEscaped(roc_html))
                            } @else {
                                div class="empty" { (NO_ROC) }
                            }
                        }
                    }
                    section class="panel" {
                        h2 { "Storm probability over the evaluation period" }
                        (PreEscaped(timeline_html))
                    }
                    section class="panel" style="margin-top: 16px" {
                        h2 { "Threshold table" }
                        table {
                            thead {
                                tr {
                                    th { "threshold" } th { "recall" } th { "precision" }
                                    th { "fpr" } th { "f1" } th { "undefined" }
                                }
                            }
                            tbody {
                                @for (idx, row) in sweep.results.iter().enumerate() {
                                    tr class=[(idx == sweep.best_index).then_some("selected")] {
                                        td { (format!("{:.2}", row.threshold)) }
                                        td { (format!("{:.3}", row.recall)) }
                                        td { (format!("{:.3}", row.precision)) }
                                        td { (format!("{:.3}", row.fpr)) }
                                        td { (format!("{:.3}", row.f1)) }
                                        td { (row.undefined_label()) }
                                    }
                                }
                            }
                        }
                    }
                    footer {
                        "Generated " (generated_label) " · stormwatch v" (APP_VERSION)
                    }
                }
            }
        }
    };
    page.into_string()
}
