use super::atr::Atr;

/// Supertrend(period, multiplier): ATR-derived bands around the midpoint
/// price; direction flips when the close crosses the opposite band.
#[derive(Debug, Clone)]
pub struct Supertrend {
    atr: Atr,
    multiplier: f64,
    prev_close: Option<f64>,
    final_upper: Option<f64>,
    final_lower: Option<f64>,
    bullish: Option<bool>,
}

impl Supertrend {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Supertrend {
            atr: Atr::new(period),
            multiplier,
            prev_close: None,
            final_upper: None,
            final_lower: None,
            bullish: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<bool> {
        let prev_close = self.prev_close;
        let atr_value = self.atr.update(high, low, close);
        self.prev_close = Some(close);
        let atr_value = atr_value?;

        let mid = (high + low) / 2.0;
        let basic_upper = mid + self.multiplier * atr_value;
        let basic_lower = mid - self.multiplier * atr_value;

        let final_upper = match (self.final_upper, prev_close) {
            (Some(prev_upper), Some(pc)) if basic_upper >= prev_upper && pc <= prev_upper => prev_upper,
            _ => basic_upper,
        };
        let final_lower = match (self.final_lower, prev_close) {
            (Some(prev_lower), Some(pc)) if basic_lower <= prev_lower && pc >= prev_lower => prev_lower,
            _ => basic_lower,
        };

        let bullish = match self.bullish {
            None => close >= mid,
            Some(true) if close < final_lower => false,
            Some(false) if close > final_upper => true,
            Some(prev_direction) => prev_direction,
        };

        self.final_upper = Some(final_upper);
        self.final_lower = Some(final_lower);
        self.bullish = Some(bullish);
        Some(bullish)
    }

    pub fn bullish(&self) -> Option<bool> {
        self.bullish
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_bearish_when_close_breaks_the_lower_band() {
        let mut st = Supertrend::new(3, 3.0);
        for _ in 0..3 {
            st.update(105.0, 95.0, 100.0);
        }
        assert_eq!(st.bullish(), Some(true));
        // a sharp drop should eventually break the lower band and flip direction
        let mut flipped = false;
        for _ in 0..5 {
            st.update(70.0, 40.0, 50.0);
            if st.bullish() == Some(false) {
                flipped = true;
                break;
            }
        }
        assert!(flipped);
    }

    #[test]
    fn undefined_until_atr_period_seen() {
        let mut st = Supertrend::new(10, 3.0);
        for _ in 0..9 {
            assert!(st.update(105.0, 95.0, 100.0).is_none());
        }
        assert!(st.update(105.0, 95.0, 100.0).is_some());
    }
}
