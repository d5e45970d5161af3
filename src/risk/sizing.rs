//! Position sizing
//!
//! Kelly-style sizing with a safety fraction and a hard cap, a fixed-fraction
//! companion, and a volatility dampener. All sizes are [`Amount`]s computed
//! with truncation toward zero, so a size never exceeds `bankroll * cap`.

use crate::amount::Amount;
use crate::error::SizingError;

/// Intermediate values of a Kelly computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KellyQuote {
    /// Full Kelly fraction, may be negative
    pub f_raw: f64,
    /// `max(0, f_raw)`
    pub f_clamped: f64,
    /// Clamped fraction scaled by the safety fraction
    pub f_fractional: f64,
    /// Fractional Kelly limited by the cap
    pub f_capped: f64,
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), SizingError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SizingError::Fraction { name, value });
    }
    Ok(())
}

/// Compute the bounded Kelly fraction.
///
/// `f = (b*p - (1-p)) / b`, clamped at zero, scaled by `safety_fraction`
/// and limited to `cap_fraction`.
pub fn compute_kelly(
    win_probability: f64,
    payoff_ratio: f64,
    safety_fraction: f64,
    cap_fraction: f64,
) -> Result<KellyQuote, SizingError> {
    // NaN fails both comparisons and is rejected here too
    if !(win_probability > 0.0 && win_probability < 1.0) {
        return Err(SizingError::WinProbability(win_probability));
    }
    if !(payoff_ratio > 0.0) || !payoff_ratio.is_finite() {
        return Err(SizingError::PayoffRatio(payoff_ratio));
    }
    check_fraction("safety fraction", safety_fraction)?;
    check_fraction("cap fraction", cap_fraction)?;

    let f_raw = (payoff_ratio * win_probability - (1.0 - win_probability)) / payoff_ratio;
    let f_clamped = f_raw.max(0.0);
    let f_fractional = f_clamped * safety_fraction;
    let f_capped = f_fractional.min(cap_fraction);

    Ok(KellyQuote {
        f_raw,
        f_clamped,
        f_fractional,
        f_capped,
    })
}

/// Kelly position size. Exactly zero when the edge is non-positive.
pub fn kelly_size(
    bankroll: Amount,
    win_probability: f64,
    payoff_ratio: f64,
    safety_fraction: f64,
    cap_fraction: f64,
) -> Result<Amount, SizingError> {
    let quote = compute_kelly(win_probability, payoff_ratio, safety_fraction, cap_fraction)?;
    if quote.f_capped <= 0.0 {
        return Ok(Amount::ZERO);
    }
    Ok(bankroll.mul_ratio(quote.f_capped)?)
}

/// Fixed fraction of bankroll, limited to the cap
pub fn fixed_fraction_size(
    bankroll: Amount,
    fraction: f64,
    cap_fraction: f64,
) -> Result<Amount, SizingError> {
    check_fraction("fraction", fraction)?;
    check_fraction("cap fraction", cap_fraction)?;
    Ok(bankroll.mul_ratio(fraction.min(cap_fraction))?)
}

/// `min(1, sqrt(target / actual))`. Never amplifies; a non-positive
/// actual volatility leaves the size untouched.
pub fn volatility_scale(target_volatility: f64, actual_volatility: f64) -> Result<f64, SizingError> {
    if !(target_volatility > 0.0) || !target_volatility.is_finite() {
        return Err(SizingError::Volatility(target_volatility));
    }
    if actual_volatility.is_nan() {
        return Err(SizingError::Volatility(actual_volatility));
    }
    if actual_volatility <= 0.0 {
        return Ok(1.0);
    }
    Ok((target_volatility / actual_volatility).sqrt().min(1.0))
}

/// Apply [`volatility_scale`] to a size
pub fn dampen_for_volatility(
    size: Amount,
    target_volatility: f64,
    actual_volatility: f64,
) -> Result<Amount, SizingError> {
    let scale = volatility_scale(target_volatility, actual_volatility)?;
    Ok(size.mul_ratio(scale)?)
}

/// Kelly sizer bound to an agent's risk parameters
#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    pub safety_fraction: f64,
    pub cap_fraction: f64,
    /// Volatility at which no dampening is applied; `None` disables dampening
    pub target_volatility: Option<f64>,
}

impl PositionSizer {
    pub fn new(safety_fraction: f64, cap_fraction: f64, target_volatility: Option<f64>) -> Self {
        Self {
            safety_fraction,
            cap_fraction,
            target_volatility,
        }
    }

    /// Kelly size for this bankroll, dampened by current volatility
    pub fn size(
        &self,
        bankroll: Amount,
        win_probability: f64,
        payoff_ratio: f64,
        volatility: f64,
    ) -> Result<Amount, SizingError> {
        let base = kelly_size(
            bankroll,
            win_probability,
            payoff_ratio,
            self.safety_fraction,
            self.cap_fraction,
        )?;
        match self.target_volatility {
            Some(target) => dampen_for_volatility(base, target, volatility),
            None => Ok(base),
        }
    }
}
