/// Greeks Engine: European Black-Scholes pricing, Newton-Raphson implied
/// volatility solving, and the derived GreeksSnapshot with a 0-100 quality
/// score (spec §4.5). No dividends; American-style exercise is not modelled,
/// a known approximation carried over from the origin (spec §9).
use chrono::{NaiveDate, Utc};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::types::{GreeksSnapshot, Leg, OptionType};

const MAX_NEWTON_ITERATIONS: u32 = 100;
const IV_TOLERANCE: f64 = 1e-5;
const MIN_SIGMA: f64 = 0.01;
const MAX_SIGMA: f64 = 2.0;
const MIN_RECOMPUTE_INTERVAL_MS: i64 = 200;

fn standard_normal() -> Normal {
    Normal::new(0.0, 1.0).expect("standard normal parameters are always valid")
}

fn d1_d2(spot: f64, strike: f64, t: f64, r: f64, sigma: f64) -> (f64, f64) {
    let d1 = ((spot / strike).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt());
    let d2 = d1 - sigma * t.sqrt();
    (d1, d2)
}

/// European Black-Scholes price for one leg. Returns `NAN` if `t <= 0`.
pub fn bs_price(spot: f64, strike: f64, t: f64, r: f64, sigma: f64, option_type: OptionType) -> f64 {
    if t <= 0.0 || sigma <= 0.0 {
        return f64::NAN;
    }
    let n = standard_normal();
    let (d1, d2) = d1_d2(spot, strike, t, r, sigma);
    match option_type {
        OptionType::CE => spot * n.cdf(d1) - strike * (-r * t).exp() * n.cdf(d2),
        OptionType::PE => strike * (-r * t).exp() * n.cdf(-d2) - spot * n.cdf(-d1),
    }
}

/// Standard Black-Scholes Greeks for one leg. Theta is reported per calendar
/// day (annualised theta / 365), matching the trading-desk convention.
pub fn bs_greeks(spot: f64, strike: f64, t: f64, r: f64, sigma: f64, option_type: OptionType) -> Leg {
    if t <= 0.0 || sigma <= 0.0 {
        return Leg::undefined();
    }
    let n = standard_normal();
    let (d1, d2) = d1_d2(spot, strike, t, r, sigma);
    let price = bs_price(spot, strike, t, r, sigma, option_type);
    let nd1 = n.pdf(d1);

    let gamma = nd1 / (spot * sigma * t.sqrt());
    let vega = spot * nd1 * t.sqrt() / 100.0;

    let (delta, theta_annual, rho) = match option_type {
        OptionType::CE => {
            let delta = n.cdf(d1);
            let theta = -(spot * nd1 * sigma) / (2.0 * t.sqrt()) - r * strike * (-r * t).exp() * n.cdf(d2);
            let rho = strike * t * (-r * t).exp() * n.cdf(d2) / 100.0;
            (delta, theta, rho)
        }
        OptionType::PE => {
            let delta = n.cdf(d1) - 1.0;
            let theta = -(spot * nd1 * sigma) / (2.0 * t.sqrt()) + r * strike * (-r * t).exp() * n.cdf(-d2);
            let rho = -strike * t * (-r * t).exp() * n.cdf(-d2) / 100.0;
            (delta, theta, rho)
        }
    };

    Leg {
        delta,
        gamma,
        theta: theta_annual / 365.0,
        vega,
        rho,
        iv: sigma,
        price,
        quality_score: 0.0,
    }
}

/// Newton-Raphson implied-volatility solve. Seeds from the Brenner-Subrahmanyam
/// approximation, clipped to `[0.01, 2.0]`. Returns `None` on non-convergence
/// or `t <= 0`.
pub fn solve_iv(market_price: f64, spot: f64, strike: f64, t: f64, r: f64, option_type: OptionType) -> Option<f64> {
    if t <= 0.0 || market_price <= 0.0 || spot <= 0.0 {
        return None;
    }

    let time_value = (market_price - (spot - strike).max(0.0)).max(0.0);
    let mut sigma = ((2.0 * std::f64::consts::PI / t).sqrt() * (time_value / spot))
        .clamp(MIN_SIGMA, MAX_SIGMA);

    for _ in 0..MAX_NEWTON_ITERATIONS {
        let price = bs_price(spot, strike, t, r, sigma, option_type);
        if price.is_nan() {
            return None;
        }
        let diff = price - market_price;
        if diff.abs() < IV_TOLERANCE {
            return Some(sigma);
        }

        let n = standard_normal();
        let (d1, _) = d1_d2(spot, strike, t, r, sigma);
        let vega = spot * n.pdf(d1) * t.sqrt();
        if vega.abs() < 1e-10 {
            break;
        }
        sigma -= diff / vega;
        sigma = sigma.clamp(MIN_SIGMA, MAX_SIGMA);
    }

    let price = bs_price(spot, strike, t, r, sigma, option_type);
    if !price.is_nan() && (price - market_price).abs() < IV_TOLERANCE {
        Some(sigma)
    } else {
        None
    }
}

fn moneyness_score(spot: f64, strike: f64) -> f64 {
    let diff_pct = ((spot - strike).abs() / spot) * 100.0;
    if diff_pct < 1.0 {
        30.0
    } else if diff_pct < 5.0 {
        25.0
    } else if diff_pct < 10.0 {
        20.0
    } else if diff_pct < 20.0 {
        10.0
    } else {
        0.0
    }
}

fn dte_score(days_to_expiry: f64) -> f64 {
    if (5.0..=30.0).contains(&days_to_expiry) {
        30.0
    } else if (2.0..5.0).contains(&days_to_expiry) || (30.0..=60.0).contains(&days_to_expiry) {
        20.0
    } else if (1.0..2.0).contains(&days_to_expiry) || (60.0..=90.0).contains(&days_to_expiry) {
        10.0
    } else {
        0.0
    }
}

fn iv_score(iv: f64) -> f64 {
    if (0.10..=1.00).contains(&iv) {
        20.0
    } else if (0.05..0.10).contains(&iv) || (1.00..1.50).contains(&iv) {
        10.0
    } else {
        0.0
    }
}

fn greek_stability_score(gamma: f64, vega: f64) -> f64 {
    if (1e-4..=1e-2).contains(&gamma) && (1e-2..=1.0).contains(&vega) {
        20.0
    } else if gamma > 0.0 && vega > 0.0 {
        10.0
    } else {
        0.0
    }
}

/// Sum of moneyness/DTE/IV-reasonableness/Greek-stability buckets.
pub fn quality_score(spot: f64, strike: f64, days_to_expiry: f64, iv: f64, gamma: f64, vega: f64) -> f64 {
    moneyness_score(spot, strike) + dte_score(days_to_expiry) + iv_score(iv) + greek_stability_score(gamma, vega)
}

/// Computes the full leg: solves IV from the observed market price, derives
/// Greeks at that IV, and scores quality. Returns `Leg::undefined()` with
/// `quality_score = 0` on IV non-convergence or `t <= 0`.
pub fn compute_leg(
    spot: f64,
    strike: f64,
    t_years: f64,
    r: f64,
    market_price: f64,
    option_type: OptionType,
) -> Leg {
    if spot.is_nan() || market_price.is_nan() || t_years <= 0.0 {
        return Leg::undefined();
    }
    let Some(iv) = solve_iv(market_price, spot, strike, t_years, r, option_type) else {
        return Leg::undefined();
    };
    let mut leg = bs_greeks(spot, strike, t_years, r, iv, option_type);
    let days_to_expiry = t_years * 365.0;
    leg.quality_score = quality_score(spot, strike, days_to_expiry, iv, leg.gamma, leg.vega);
    leg
}

/// Years between `now` and `expiry`, treating expiry as end-of-day.
pub fn time_to_expiry_years(now: chrono::DateTime<Utc>, expiry: NaiveDate) -> f64 {
    let expiry_end = expiry.and_hms_opt(23, 59, 59).unwrap().and_utc();
    let seconds = (expiry_end - now).num_seconds().max(0) as f64;
    seconds / (365.0 * 24.0 * 3600.0)
}

/// Rate-limits recomputation to at most once per [`MIN_RECOMPUTE_INTERVAL_MS`].
/// A recompute is also triggered whenever the ATM strike or either leg's
/// market price changes, per spec §4.5.
pub struct GreeksEngine {
    risk_free_rate: f64,
    last_computed_at: Option<chrono::DateTime<Utc>>,
    last_atm_strike: Option<f64>,
    last_ce_price: Option<f64>,
    last_pe_price: Option<f64>,
}

impl GreeksEngine {
    pub fn new(risk_free_rate: f64) -> Self {
        GreeksEngine {
            risk_free_rate,
            last_computed_at: None,
            last_atm_strike: None,
            last_ce_price: None,
            last_pe_price: None,
        }
    }

    fn should_recompute(&self, now: chrono::DateTime<Utc>, atm_strike: f64, ce_price: f64, pe_price: f64) -> bool {
        let strike_or_price_changed = self.last_atm_strike != Some(atm_strike)
            || self.last_ce_price != Some(ce_price)
            || self.last_pe_price != Some(pe_price);
        if !strike_or_price_changed {
            return false;
        }
        match self.last_computed_at {
            None => true,
            Some(last) => (now - last).num_milliseconds() >= MIN_RECOMPUTE_INTERVAL_MS,
        }
    }

    /// Recompute the ATM CE/PE GreeksSnapshot if the rate limit and change
    /// conditions allow it; otherwise returns `None` without touching state.
    pub fn maybe_recompute(
        &mut self,
        now: chrono::DateTime<Utc>,
        spot: f64,
        atm_strike: f64,
        expiry: NaiveDate,
        ce_price: f64,
        pe_price: f64,
    ) -> Option<GreeksSnapshot> {
        if !self.should_recompute(now, atm_strike, ce_price, pe_price) {
            return None;
        }

        let t = time_to_expiry_years(now, expiry);
        let ce = compute_leg(spot, atm_strike, t, self.risk_free_rate, ce_price, OptionType::CE);
        let pe = compute_leg(spot, atm_strike, t, self.risk_free_rate, pe_price, OptionType::PE);

        self.last_computed_at = Some(now);
        self.last_atm_strike = Some(atm_strike);
        self.last_ce_price = Some(ce_price);
        self.last_pe_price = Some(pe_price);

        Some(GreeksSnapshot {
            atm_strike,
            expiry,
            ce,
            pe,
            computed_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn call_put_parity_holds_at_same_sigma() {
        let (spot, strike, t, r, sigma) = (25000.0, 25000.0, 30.0 / 365.0, 0.06, 0.15);
        let call = bs_price(spot, strike, t, r, sigma, OptionType::CE);
        let put = bs_price(spot, strike, t, r, sigma, OptionType::PE);
        let lhs = call - put;
        let rhs = spot - strike * (-r * t).exp();
        assert!((lhs - rhs).abs() < 1e-6);
    }

    #[test]
    fn iv_solver_converges_for_reasonable_inputs() {
        let (spot, strike, t, r) = (25000.0, 25000.0, 30.0 / 365.0, 0.06);
        let true_sigma = 0.18;
        let market_price = bs_price(spot, strike, t, r, true_sigma, OptionType::CE);
        let solved = solve_iv(market_price, spot, strike, t, r, OptionType::CE).unwrap();
        assert!((solved - true_sigma).abs() < 1e-3);
    }

    #[test]
    fn non_positive_time_to_expiry_yields_undefined_leg() {
        let leg = compute_leg(25000.0, 25000.0, 0.0, 0.06, 120.0, OptionType::CE);
        assert!(leg.delta.is_nan());
        assert_eq!(leg.quality_score, 0.0);
    }

    #[test]
    fn quality_score_peaks_at_the_money_near_expiry_with_sane_iv() {
        let score = quality_score(25000.0, 25000.0, 15.0, 0.20, 0.001, 0.5);
        assert_eq!(score, 30.0 + 30.0 + 20.0 + 20.0);
    }

    #[test]
    fn engine_rate_limits_to_one_recompute_per_200ms() {
        let mut engine = GreeksEngine::new(0.06);
        let now = Utc::now();
        let expiry = (now + Duration::days(20)).date_naive();
        assert!(engine
            .maybe_recompute(now, 25000.0, 25000.0, expiry, 120.0, 118.0)
            .is_some());
        // same inputs, same instant: no strike/price change, so no recompute
        assert!(engine
            .maybe_recompute(now, 25000.0, 25000.0, expiry, 120.0, 118.0)
            .is_none());
        // price changed but within the 200ms window
        assert!(engine
            .maybe_recompute(now, 25000.0, 25000.0, expiry, 121.0, 118.0)
            .is_none());
    }
}
