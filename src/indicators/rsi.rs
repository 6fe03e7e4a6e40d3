/// Streaming RSI(14) via Wilder smoothing of up/down close-to-close moves.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    seed_count: usize,
    seed_gain_sum: f64,
    seed_loss_sum: f64,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Rsi {
            period,
            prev_close: None,
            seed_count: 0,
            seed_gain_sum: 0.0,
            seed_loss_sum: 0.0,
            avg_gain: None,
            avg_loss: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        if let Some(prev) = self.prev_close {
            let change = close - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);

            match (self.avg_gain, self.avg_loss) {
                (None, _) | (_, None) => {
                    self.seed_count += 1;
                    self.seed_gain_sum += gain;
                    self.seed_loss_sum += loss;
                    if self.seed_count == self.period {
                        self.avg_gain = Some(self.seed_gain_sum / self.period as f64);
                        self.avg_loss = Some(self.seed_loss_sum / self.period as f64);
                    }
                }
                (Some(ag), Some(al)) => {
                    let p = self.period as f64;
                    self.avg_gain = Some((ag * (p - 1.0) + gain) / p);
                    self.avg_loss = Some((al * (p - 1.0) + loss) / p);
                }
            }
        }
        self.prev_close = Some(close);
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        match (self.avg_gain, self.avg_loss) {
            (Some(avg_gain), Some(avg_loss)) => {
                if avg_loss == 0.0 {
                    Some(100.0)
                } else {
                    let rs = avg_gain / avg_loss;
                    Some(100.0 - 100.0 / (1.0 + rs))
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_until_period_plus_one_closes() {
        let mut rsi = Rsi::new(14);
        for i in 0..14 {
            assert!(rsi.update(100.0 + i as f64).is_none());
        }
        assert!(rsi.update(114.0).is_some());
    }

    #[test]
    fn monotonic_gains_push_rsi_toward_100() {
        let mut rsi = Rsi::new(14);
        let mut value = None;
        for i in 0..30 {
            value = rsi.update(100.0 + i as f64 * 2.0);
        }
        assert!(value.unwrap() > 90.0);
    }
}
