//! Minimal deterministic SVG drawing: line charts and horizontal bar charts.
//!
//! Output depends only on the input values. Coordinates are printed with two
//! decimals, so identical input yields byte-identical documents.

use std::fmt::Write;

pub const WIDTH: f64 = 960.0;
pub const HEIGHT: f64 = 540.0;

const MARGIN_LEFT: f64 = 90.0;
const MARGIN_RIGHT: f64 = 170.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_BOTTOM: f64 = 60.0;
const Y_TICKS: usize = 5;

/// Line colours, assigned in series order.
pub const PALETTE: [&str; 8] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#17becf",
];

const POSITIVE: &str = "#2ca02c";
const NEGATIVE: &str = "#d62728";

#[derive(Debug, Clone)]
pub struct LineSeries {
    pub label: String,
    /// One value per x position; NaN leaves a gap.
    pub values: Vec<f64>,
    pub color: &'static str,
    pub dashed: bool,
}

#[derive(Debug, Clone)]
pub struct BarEntry {
    pub label: String,
    pub value: f64,
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Compact axis label: thousands separators dropped, magnitude-aware precision.
pub fn format_value(v: f64) -> String {
    let a = v.abs();
    if a >= 1e9 {
        format!("{:.2}B", v / 1e9)
    } else if a >= 1e6 {
        format!("{:.2}M", v / 1e6)
    } else if a >= 1e4 {
        format!("{:.0}", v)
    } else if a >= 1.0 {
        format!("{:.2}", v)
    } else {
        format!("{:.4}", v)
    }
}

fn header(out: &mut String, title: &str) {
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH:.0}" height="{HEIGHT:.0}" viewBox="0 0 {WIDTH:.0} {HEIGHT:.0}" font-family="sans-serif">"#
    );
    let _ = writeln!(out, r##"<rect width="100%" height="100%" fill="#ffffff"/>"##);
    let _ = writeln!(
        out,
        r#"<text x="{:.2}" y="32.00" font-size="18" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        escape(title)
    );
}

/// Value range with padding; a flat range is widened so it has height.
fn value_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
    for v in values.filter(|v| v.is_finite()) {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !lo.is_finite() {
        return None;
    }
    if hi - lo < f64::EPSILON {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.05 };
        return Some((lo - pad, hi + pad));
    }
    let pad = (hi - lo) * 0.05;
    Some((lo - pad, hi + pad))
}

/// Line chart over shared x labels. Returns `None` if no series has a finite value.
pub fn line_chart(title: &str, x_labels: &[String], series: &[LineSeries]) -> Option<String> {
    let (lo, hi) = value_range(series.iter().flat_map(|s| s.values.iter().copied()))?;
    let n = x_labels.len().max(series.iter().map(|s| s.values.len()).max().unwrap_or(0));
    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let x_at = |i: usize| -> f64 {
        if n <= 1 {
            MARGIN_LEFT + plot_w / 2.0
        } else {
            MARGIN_LEFT + plot_w * i as f64 / (n - 1) as f64
        }
    };
    let y_at = |v: f64| -> f64 { MARGIN_TOP + plot_h * (hi - v) / (hi - lo) };

    let mut out = String::new();
    header(&mut out, title);

    // Axes and y grid.
    let _ = writeln!(
        out,
        r##"<g stroke="#cccccc" stroke-width="1">"##
    );
    for t in 0..=Y_TICKS {
        let v = lo + (hi - lo) * t as f64 / Y_TICKS as f64;
        let y = y_at(v);
        let _ = writeln!(
            out,
            r#"<line x1="{MARGIN_LEFT:.2}" y1="{y:.2}" x2="{:.2}" y2="{y:.2}"/>"#,
            MARGIN_LEFT + plot_w
        );
    }
    let _ = writeln!(out, "</g>");
    for t in 0..=Y_TICKS {
        let v = lo + (hi - lo) * t as f64 / Y_TICKS as f64;
        let _ = writeln!(
            out,
            r#"<text x="{:.2}" y="{:.2}" font-size="11" text-anchor="end">{}</text>"#,
            MARGIN_LEFT - 8.0,
            y_at(v) + 4.0,
            format_value(v)
        );
    }

    // X labels: first, middle, last.
    if !x_labels.is_empty() {
        let mut picks = vec![0, x_labels.len() / 2, x_labels.len() - 1];
        picks.dedup();
        for i in picks {
            let _ = writeln!(
                out,
                r#"<text x="{:.2}" y="{:.2}" font-size="11" text-anchor="middle">{}</text>"#,
                x_at(i),
                HEIGHT - MARGIN_BOTTOM + 20.0,
                escape(&x_labels[i])
            );
        }
    }

    for (k, s) in series.iter().enumerate() {
        let mut d = String::new();
        let mut pen_down = false;
        for (i, v) in s.values.iter().enumerate() {
            if !v.is_finite() {
                pen_down = false;
                continue;
            }
            let cmd = if pen_down { 'L' } else { 'M' };
            let _ = write!(d, "{cmd}{:.2},{:.2} ", x_at(i), y_at(*v));
            pen_down = true;
        }
        let dash = if s.dashed { r#" stroke-dasharray="6,4""# } else { "" };
        let _ = writeln!(
            out,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"{dash}/>"#,
            d.trim_end(),
            s.color
        );

        let ly = MARGIN_TOP + 20.0 * k as f64;
        let lx = WIDTH - MARGIN_RIGHT + 16.0;
        let _ = writeln!(
            out,
            r#"<line x1="{lx:.2}" y1="{ly:.2}" x2="{:.2}" y2="{ly:.2}" stroke="{}" stroke-width="3"{dash}/>"#,
            lx + 20.0,
            s.color
        );
        let _ = writeln!(
            out,
            r#"<text x="{:.2}" y="{:.2}" font-size="12">{}</text>"#,
            lx + 26.0,
            ly + 4.0,
            escape(&s.label)
        );
    }

    out.push_str("</svg>\n");
    Some(out)
}

/// Horizontal bar chart of signed values, one row per entry in input order.
/// Returns `None` for an empty or all-NaN input.
pub fn bar_chart(title: &str, bars: &[BarEntry], value_suffix: &str) -> Option<String> {
    let finite: Vec<&BarEntry> = bars.iter().filter(|b| b.value.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let max_abs = finite
        .iter()
        .map(|b| b.value.abs())
        .fold(0.0_f64, f64::max)
        .max(f64::EPSILON);
    let has_negative = finite.iter().any(|b| b.value < 0.0);

    let plot_left = MARGIN_LEFT + 60.0;
    let plot_w = WIDTH - plot_left - MARGIN_RIGHT + 80.0;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let zero_x = if has_negative {
        plot_left + plot_w / 2.0
    } else {
        plot_left
    };
    let scale = if has_negative { plot_w / 2.0 } else { plot_w } / max_abs;
    let row_h = plot_h / finite.len() as f64;
    let bar_h = (row_h * 0.7).min(36.0);

    let mut out = String::new();
    header(&mut out, title);

    for (i, b) in finite.iter().enumerate() {
        let cy = MARGIN_TOP + row_h * (i as f64 + 0.5);
        let len = b.value.abs() * scale;
        let x = if b.value < 0.0 { zero_x - len } else { zero_x };
        let color = if b.value < 0.0 { NEGATIVE } else { POSITIVE };
        let _ = writeln!(
            out,
            r#"<rect x="{x:.2}" y="{:.2}" width="{len:.2}" height="{bar_h:.2}" fill="{color}"/>"#,
            cy - bar_h / 2.0
        );
        let _ = writeln!(
            out,
            r#"<text x="{:.2}" y="{:.2}" font-size="12" text-anchor="end">{}</text>"#,
            plot_left - 8.0,
            cy + 4.0,
            escape(&b.label)
        );
        let (tx, anchor) = if b.value < 0.0 {
            (x - 6.0, "end")
        } else {
            (x + len + 6.0, "start")
        };
        let _ = writeln!(
            out,
            r#"<text x="{tx:.2}" y="{:.2}" font-size="11" text-anchor="{anchor}">{:.2}{}</text>"#,
            cy + 4.0,
            b.value,
            escape(value_suffix)
        );
    }

    let _ = writeln!(
        out,
        r##"<line x1="{zero_x:.2}" y1="{MARGIN_TOP:.2}" x2="{zero_x:.2}" y2="{:.2}" stroke="#333333" stroke-width="1"/>"##,
        HEIGHT - MARGIN_BOTTOM
    );
    out.push_str("</svg>\n");
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("2024-01-{:02}", i + 1)).collect()
    }

    #[test]
    fn line_chart_is_deterministic() {
        let series = vec![LineSeries {
            label: "bitcoin".into(),
            values: vec![100.0, 110.0, f64::NAN, 121.0],
            color: PALETTE[0],
            dashed: false,
        }];
        let a = line_chart("BTC", &labels(4), &series).unwrap();
        let b = line_chart("BTC", &labels(4), &series).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("<svg"));
        assert!(a.trim_end().ends_with("</svg>"));
        // NaN breaks the path into two segments
        assert_eq!(a.matches(" M").count() + a.matches("\"M").count(), 2);
    }

    #[test]
    fn flat_and_single_point_series_render() {
        let series = vec![LineSeries {
            label: "flat".into(),
            values: vec![5.0],
            color: PALETTE[1],
            dashed: true,
        }];
        let svg = line_chart("flat", &labels(1), &series).unwrap();
        assert!(svg.contains("stroke-dasharray"));
    }

    #[test]
    fn empty_inputs_render_nothing() {
        assert!(line_chart("x", &[], &[]).is_none());
        assert!(bar_chart("x", &[], "%").is_none());
        let nan = [BarEntry {
            label: "a".into(),
            value: f64::NAN,
        }];
        assert!(bar_chart("x", &nan, "%").is_none());
    }

    #[test]
    fn bars_are_coloured_by_sign() {
        let bars = [
            BarEntry {
                label: "up".into(),
                value: 4.5,
            },
            BarEntry {
                label: "down".into(),
                value: -2.25,
            },
        ];
        let svg = bar_chart("moves", &bars, "%").unwrap();
        assert!(svg.contains(POSITIVE));
        assert!(svg.contains(NEGATIVE));
        assert!(svg.contains("-2.25%"));
    }

    #[test]
    fn text_is_escaped() {
        assert_eq!(escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }

    #[test]
    fn value_formatting_scales() {
        assert_eq!(format_value(1.5e12), "1500.00B");
        assert_eq!(format_value(61_234.0), "61234");
        assert_eq!(format_value(0.12345), "0.1235");
    }
}
