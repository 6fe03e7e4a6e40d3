/// Session-scoped cumulative VWAP. Resets when the session date changes.
use chrono::NaiveDate;

#[derive(Debug, Clone, Default)]
pub struct Vwap {
    cumulative_tpv: f64,
    cumulative_volume: i64,
    session_date: Option<NaiveDate>,
}

impl Vwap {
    pub fn new() -> Self {
        Vwap::default()
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64, volume: i64, session_date: NaiveDate) -> Option<f64> {
        if self.session_date != Some(session_date) {
            self.cumulative_tpv = 0.0;
            self.cumulative_volume = 0;
            self.session_date = Some(session_date);
        }
        let typical_price = (high + low + close) / 3.0;
        self.cumulative_tpv += typical_price * volume as f64;
        self.cumulative_volume += volume;
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.cumulative_volume == 0 {
            None
        } else {
            Some(self.cumulative_tpv / self.cumulative_volume as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resets_on_new_session() {
        let mut vwap = Vwap::new();
        let day1 = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        vwap.update(105.0, 95.0, 100.0, 1000, day1);
        let first_session_value = vwap.value();
        vwap.update(205.0, 195.0, 200.0, 1000, day2);
        assert_ne!(vwap.value(), first_session_value);
        assert_eq!(vwap.value(), Some(200.0));
    }

    #[test]
    fn zero_volume_is_undefined() {
        let mut vwap = Vwap::new();
        let day = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        vwap.update(100.0, 100.0, 100.0, 0, day);
        assert!(vwap.value().is_none());
    }
}
