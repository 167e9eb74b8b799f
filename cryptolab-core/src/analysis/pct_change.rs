//! Percent change.
//!
//! change = (current - baseline) / baseline * 100

/// Percent change between two prices. `None` when either is NaN or the
/// baseline is zero.
pub fn percent_change(baseline: f64, current: f64) -> Option<f64> {
    if baseline.is_nan() || current.is_nan() || baseline == 0.0 {
        None
    } else {
        Some((current - baseline) / baseline * 100.0)
    }
}

/// Change of the last price against a baseline: `offset` positions before
/// the last (clamped to the first), or the first price when `offset` is
/// `None`. Needs at least two prices.
pub fn period_change(prices: &[f64], offset: Option<usize>) -> Option<f64> {
    if prices.len() < 2 {
        return None;
    }
    let last = prices.len() - 1;
    let base = match offset {
        Some(k) => last.saturating_sub(k.max(1)),
        None => 0,
    };
    percent_change(prices[base], prices[last])
}

/// Scale a series so its first value equals `base`. Empty when the first
/// value is zero or NaN.
pub fn rebase(prices: &[f64], base: f64) -> Vec<f64> {
    match prices.first() {
        Some(&first) if first != 0.0 && !first.is_nan() => {
            prices.iter().map(|p| p / first * base).collect()
        }
        _ => Vec::new(),
    }
}
