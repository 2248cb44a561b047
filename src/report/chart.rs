//! Plotly-графики бэктеста: кривые метрик по порогам, ROC и лента вероятностей.

use itertools::Itertools;
use plotly::color::{Rgb, Rgba};
use plotly::common::{Anchor, DashType, Font, Line, Marker, MarkerSymbol, Mode, Orientation, Title};
use plotly::layout::{
    Axis, ItemClick, Layout, Legend, Margin, Shape, ShapeLayer, ShapeLine, ShapeType,
    TicksDirection,
};
use plotly::{Configuration, Plot, Scatter};

use crate::constants::TIMESTAMP_FORMAT;
use crate::lead_time::AlertRecord;
use crate::roc::RocCurve;
use crate::sweep::Sweep;

const MAX_PLOT_POINTS: usize = 1500;
const AXIS_REF_X: &str = "x";
const AXIS_REF_Y: &str = "y";
const AXIS_REF_PAPER: &str = "paper";
const LABEL_RECALL: &str = "Recall";
const LABEL_PRECISION: &str = "Precision";
const LABEL_FPR: &str = "FPR";
const LABEL_F1: &str = "F1";
const LABEL_ROC: &str = "ROC";
const LABEL_CHANCE: &str = "Chance";
const LABEL_YOUDEN: &str = "Youden optimum";
const LABEL_PROBABILITY: &str = "Storm probability";
const LABEL_STORM: &str = "Storm";
const LABEL_ALERTED_STORM: &str = "Storm with prior alert";
const TITLE_THRESHOLD: &str = "Threshold";
const TITLE_METRIC: &str = "Metric value";
const TITLE_FPR: &str = "False positive rate";
const TITLE_TPR: &str = "True positive rate (recall)";
const TITLE_PROBABILITY: &str = "Probability";
const FONT_FAMILY: &str = "IBM Plex Sans, Arial, sans-serif";
const FONT_SIZE_BASE: usize = 12;
const FONT_SIZE_AXIS_TITLE: usize = 13;
const LINE_WIDTH_MAIN: f64 = 2.4;
const LINE_WIDTH_SECONDARY: f64 = 1.6;
const LINE_WIDTH_MARKER: f64 = 1.2;
const MARKER_SIZE: usize = 7;
const MARKER_SIZE_HIGHLIGHT: usize = 14;
const LEGEND_X: f64 = 0.5;
const LEGEND_Y: f64 = 1.02;
const MARGIN_LEFT: usize = 70;
const MARGIN_RIGHT: usize = 30;
const MARGIN_TOP: usize = 50;
const MARGIN_BOTTOM: usize = 55;
const TICK_LENGTH: usize = 6;
const COLOR_RECALL: (u8, u8, u8) = (36, 100, 166);
const COLOR_PRECISION: (u8, u8, u8) = (46, 139, 87);
const COLOR_FPR: (u8, u8, u8) = (200, 67, 46);
const COLOR_F1: (u8, u8, u8) = (26, 58, 108);
const COLOR_STORM: (u8, u8, u8) = (212, 42, 42);
const COLOR_ALERTED: (u8, u8, u8) = (240, 140, 30);
const COLOR_CHANCE: (u8, u8, u8, f64) = (80, 80, 80, 0.5);
const COLOR_MARKER_LINE: (u8, u8, u8, f64) = (80, 80, 80, 0.45);
const COLOR_TEXT_BASE: (u8, u8, u8) = (40, 40, 40);
const COLOR_AXIS_LINE: (u8, u8, u8, f64) = (0, 0, 0, 0.35);
const COLOR_AXIS_GRID: (u8, u8, u8, f64) = (0, 0, 0, 0.07);
const COLOR_LEGEND_BG: (u8, u8, u8, f64) = (255, 255, 255, 0.75);

fn rgb(color: (u8, u8, u8)) -> Rgb {
    Rgb::new(color.0, color.1, color.2)
}

fn rgba(color: (u8, u8, u8, f64)) -> Rgba {
    Rgba::new(color.0, color.1, color.2, color.3)
}

fn axis(title: &str) -> Axis {
    Axis::new()
        .title(Title::with_text(title).font(Font::new().size(FONT_SIZE_AXIS_TITLE)))
        .ticks(TicksDirection::Outside)
        .tick_length(TICK_LENGTH)
        .show_line(true)
        .line_color(rgba(COLOR_AXIS_LINE))
        .grid_color(rgba(COLOR_AXIS_GRID))
        .auto_margin(true)
}

fn base_layout() -> Layout {
    Layout::new()
        .font(
            Font::new()
                .family(FONT_FAMILY)
                .size(FONT_SIZE_BASE)
                .color(rgb(COLOR_TEXT_BASE)),
        )
        .auto_size(true)
        .margin(
            Margin::new()
                .left(MARGIN_LEFT)
                .right(MARGIN_RIGHT)
                .top(MARGIN_TOP)
                .bottom(MARGIN_BOTTOM),
        )
        .show_legend(true)
        .legend(
            Legend::new()
                .orientation(Orientation::Horizontal)
                .item_double_click(ItemClick::False)
                .x(LEGEND_X)
                .x_anchor(Anchor::Center)
                .y(LEGEND_Y)
                .y_anchor(Anchor::Bottom)
                .background_color(rgba(COLOR_LEGEND_BG)),
        )
}

fn finish(mut plot: Plot, layout: Layout) -> Plot {
    plot.set_layout(layout);
    plot.set_configuration(Configuration::new().responsive(true));
    plot
}

fn metric_trace(
    x: &[f64],
    y: Vec<f64>,
    name: &str,
    color: (u8, u8, u8),
    width: f64,
) -> Box<Scatter<f64, f64>> {
    Scatter::new(x.to_vec(), y)
        .mode(Mode::LinesMarkers)
        .line(Line::new().color(rgb(color)).width(width))
        .marker(Marker::new().size(MARKER_SIZE).color(rgb(color)))
        .name(name)
}

/// Кривые recall/precision/FPR/F1 по порогам с вертикальной линией на выбранном пороге.
pub(super) fn build_threshold_chart(sweep: &Sweep) -> Plot {
    let thresholds = sweep.results.iter().map(|row| row.threshold).collect_vec();
    let mut plot = Plot::new();
    plot.add_trace(metric_trace(
        &thresholds,
        sweep.results.iter().map(|row| row.recall).collect(),
        LABEL_RECALL,
        COLOR_RECALL,
        LINE_WIDTH_SECONDARY,
    ));
    plot.add_trace(metric_trace(
        &thresholds,
        sweep.results.iter().map(|row| row.precision).collect(),
        LABEL_PRECISION,
        COLOR_PRECISION,
        LINE_WIDTH_SECONDARY,
    ));
    plot.add_trace(metric_trace(
        &thresholds,
        sweep.results.iter().map(|row| row.fpr).collect(),
        LABEL_FPR,
        COLOR_FPR,
        LINE_WIDTH_SECONDARY,
    ));
    plot.add_trace(metric_trace(
        &thresholds,
        sweep.results.iter().map(|row| row.f1).collect(),
        LABEL_F1,
        COLOR_F1,
        LINE_WIDTH_MAIN,
    ));

    let selected = Shape::new()
        .shape_type(ShapeType::Line)
        .layer(ShapeLayer::Below)
        .x_ref(AXIS_REF_X)
        .y_ref(AXIS_REF_PAPER)
        .x0(sweep.best_threshold)
        .x1(sweep.best_threshold)
        .y0(0)
        .y1(1)
        .line(
            ShapeLine::new()
                .color(rgba(COLOR_MARKER_LINE))
                .width(LINE_WIDTH_MARKER)
                .dash(DashType::Dash),
        );

    let layout = base_layout()
        .shapes(vec![selected])
        .x_axis(axis(TITLE_THRESHOLD))
        .y_axis(axis(TITLE_METRIC).range(vec![0.0, 1.05]));
    finish(plot, layout)
}

/// ROC-кривая с диагональю случайного классификатора и точкой оптимума по Юдену.
pub(super) fn build_roc_chart(curve: &RocCurve) -> Plot {
    let fpr = curve.points.iter().map(|point| point.fpr).collect_vec();
    let tpr = curve.points.iter().map(|point| point.tpr).collect_vec();
    let (fpr_plot, tpr_plot) = downsample_min_max(&fpr, &tpr, MAX_PLOT_POINTS);
    let youden = curve.youden();

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(fpr_plot, tpr_plot)
            .mode(Mode::Lines)
            .line(Line::new().color(rgb(COLOR_F1)).width(LINE_WIDTH_MAIN))
            .name(&format!("{LABEL_ROC} (AUC = {:.3})", curve.auc)),
    );
    plot.add_trace(
        Scatter::new(vec![0.0, 1.0], vec![0.0, 1.0])
            .mode(Mode::Lines)
            .line(
                Line::new()
                    .color(rgba(COLOR_CHANCE))
                    .width(LINE_WIDTH_SECONDARY)
                    .dash(DashType::Dash),
            )
            .name(LABEL_CHANCE),
    );
    plot.add_trace(
        Scatter::new(vec![youden.fpr], vec![youden.tpr])
            .mode(Mode::Markers)
            .marker(
                Marker::new()
                    .size(MARKER_SIZE_HIGHLIGHT)
                    .color(rgb(COLOR_STORM)),
            )
            .name(&format!("{LABEL_YOUDEN} ({:.2})", youden.threshold)),
    );

    let layout = base_layout()
        .x_axis(axis(TITLE_FPR).range(vec![0.0, 1.0]))
        .y_axis(axis(TITLE_TPR).range(vec![0.0, 1.05]));
    finish(plot, layout)
}

/// Вероятность по времени, рабочий порог и отметки штормов (с тревогой и без).
pub(super) fn build_timeline_chart(records: &[AlertRecord], threshold: f64) -> Plot {
    let times = records
        .iter()
        .map(|record| record.timestamp.format(TIMESTAMP_FORMAT).to_string())
        .collect_vec();
    let probabilities = records.iter().map(|record| record.probability).collect_vec();
    let (times_plot, probabilities_plot) =
        downsample_min_max(&times, &probabilities, MAX_PLOT_POINTS);

    let (alerted, missed): (Vec<_>, Vec<_>) = records
        .iter()
        .filter(|record| record.storm)
        .partition(|record| record.lead_time.is_some());
    let storm_points = |storms: &[&AlertRecord]| {
        storms
            .iter()
            .map(|record| {
                (
                    record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    record.probability,
                )
            })
            .unzip::<_, _, Vec<_>, Vec<_>>()
    };
    let (alerted_x, alerted_y) = storm_points(alerted.as_slice());
    let (missed_x, missed_y) = storm_points(missed.as_slice());

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(times_plot, probabilities_plot)
            .mode(Mode::Lines)
            .line(
                Line::new()
                    .color(rgb(COLOR_RECALL))
                    .width(LINE_WIDTH_SECONDARY)
                    .simplify(true),
            )
            .name(LABEL_PROBABILITY),
    );
    plot.add_trace(
        Scatter::new(alerted_x, alerted_y)
            .mode(Mode::Markers)
            .marker(
                Marker::new()
                    .size(MARKER_SIZE)
                    .symbol(MarkerSymbol::Diamond)
                    .color(rgb(COLOR_ALERTED)),
            )
            .name(LABEL_ALERTED_STORM),
    );
    plot.add_trace(
        Scatter::new(missed_x, missed_y)
            .mode(Mode::Markers)
            .marker(
                Marker::new()
                    .size(MARKER_SIZE)
                    .symbol(MarkerSymbol::X)
                    .color(rgb(COLOR_STORM)),
            )
            .name(LABEL_STORM),
    );

    let threshold_line = Shape::new()
        .shape_type(ShapeType::Line)
        .layer(ShapeLayer::Below)
        .x_ref(AXIS_REF_PAPER)
        .y_ref(AXIS_REF_Y)
        .x0(0)
        .x1(1)
        .y0(threshold)
        .y1(threshold)
        .line(
            ShapeLine::new()
                .color(rgba(COLOR_MARKER_LINE))
                .width(LINE_WIDTH_MARKER)
                .dash(DashType::Dash),
        );

    let layout = base_layout()
        .shapes(vec![threshold_line])
        .x_axis(Axis::new().show_line(true).line_color(rgba(COLOR_AXIS_LINE)))
        .y_axis(axis(TITLE_PROBABILITY).range(vec![0.0, 1.05]));
    finish(plot, layout)
}

/// Даунсемплит ряд, сохраняя минимум/максимум в бакетах, чтобы ускорить отрисовку.
fn downsample_min_max<X: Clone>(x: &[X], y: &[f64], max_points: usize) -> (Vec<X>, Vec<f64>) {
    if x.len() <= max_points || x.len() != y.len() || max_points < 3 {
        return (x.to_vec(), y.to_vec());
    }

    let len = y.len();
    let bucket_count = ((max_points - 2) / 2).max(1);
    let bucket_size = (len - 2).div_ceil(bucket_count).max(1);

    let mut indices = Vec::with_capacity(max_points);
    indices.push(0);
    for start in (1..len - 1).step_by(bucket_size) {
        let end = (start + bucket_size).min(len - 1);
        let bucket = start..end;
        let min_idx = bucket
            .clone()
            .min_by(|&a, &b| y[a].total_cmp(&y[b]))
            .unwrap_or(start);
        let max_idx = bucket
            .max_by(|&a, &b| y[a].total_cmp(&y[b]))
            .unwrap_or(start);
        indices.push(min_idx.min(max_idx));
        indices.push(min_idx.max(max_idx));
    }
    indices.push(len - 1);
    indices.sort_unstable();
    indices.dedup();

    indices
        .into_iter()
        .map(|idx| (x[idx].clone(), y[idx]))
        .unzip()
}
