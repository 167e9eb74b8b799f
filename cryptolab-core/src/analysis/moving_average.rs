//! Simple moving average.
//!
//! Leading positions use a partial window (mean of everything seen so far),
//! so the series has no warm-up gap and is as long as its input.

/// Rolling mean of `prices` over `window` points. `window == 0` is treated as 1.
///
/// A NaN inside the window makes that position NaN.
pub fn moving_average_series(prices: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut result = Vec::with_capacity(prices.len());
    let mut sum = 0.0;
    let mut nan_in_window = 0usize;

    for (i, &entering) in prices.iter().enumerate() {
        if entering.is_nan() {
            nan_in_window += 1;
        } else {
            sum += entering;
        }
        if i >= window {
            let leaving = prices[i - window];
            if leaving.is_nan() {
                nan_in_window -= 1;
            } else {
                sum -= leaving;
            }
        }

        let len = (i + 1).min(window);
        result.push(if nan_in_window > 0 {
            f64::NAN
        } else {
            sum / len as f64
        });
    }

    result
}

/// Mean of the last `min(window, n)` prices; `None` for an empty slice.
pub fn trailing_mean(prices: &[f64], window: usize) -> Option<f64> {
    if prices.is_empty() {
        return None;
    }
    let take = window.max(1).min(prices.len());
    let tail = &prices[prices.len() - take..];
    Some(tail.iter().sum::<f64>() / take as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn full_windows_match_plain_mean() {
        let result = moving_average_series(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0], 5);
        assert_eq!(result.len(), 7);
        // mean(10,11,12,13,14)
        assert_approx(result[4], 12.0, DEFAULT_EPSILON);
        assert_approx(result[5], 13.0, DEFAULT_EPSILON);
        assert_approx(result[6], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn leading_windows_are_partial() {
        let result = moving_average_series(&[10.0, 20.0, 30.0], 5);
        assert_approx(result[0], 10.0, DEFAULT_EPSILON);
        assert_approx(result[1], 15.0, DEFAULT_EPSILON);
        assert_approx(result[2], 20.0, DEFAULT_EPSILON);
    }

    #[test]
    fn nan_poisons_only_its_windows() {
        let result = moving_average_series(&[10.0, f64::NAN, 12.0, 13.0, 14.0], 2);
        assert!(result[1].is_nan());
        assert!(result[2].is_nan());
        assert_approx(result[3], 12.5, DEFAULT_EPSILON);
        assert_approx(result[4], 13.5, DEFAULT_EPSILON);
    }

    #[test]
    fn trailing_mean_clamps_window() {
        assert_eq!(trailing_mean(&[], 7), None);
        assert_approx(trailing_mean(&[100.0, 110.0, 121.0], 2).unwrap(), 115.5, DEFAULT_EPSILON);
        assert_approx(trailing_mean(&[100.0, 110.0, 121.0], 30).unwrap(), 110.333_333_333_333_33, 1e-9);
        assert_approx(trailing_mean(&[42.0], 0).unwrap(), 42.0, DEFAULT_EPSILON);
    }
}
