use super::models::{ChainSnapshot, OptionQuote, StrikeSelection};
use crate::error::{SignalError, SignalResult};
use serde::{Deserialize, Serialize};

/// Inclusive premium band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PremiumBand {
    pub min: f64,
    pub max: f64,
}

impl PremiumBand {
    pub fn new(min: f64, max: f64) -> SignalResult<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(SignalError::invalid(format!(
                "premium band [{}, {}] is not a valid range",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, premium: f64) -> bool {
        self.min <= premium && premium <= self.max
    }
}

/// Filters applied before choosing the nearest premium.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StrikeFilter {
    pub band: Option<PremiumBand>,
    /// Keep only strikes divisible by this modulus (e.g. 100).
    pub round_to: Option<u32>,
}

/// Pick the quote whose premium is closest to `target_premium`.
///
/// Ties keep the quote that comes first in chain order.
pub fn select(
    chain: &ChainSnapshot,
    target_premium: f64,
    filter: &StrikeFilter,
) -> SignalResult<StrikeSelection> {
    if !target_premium.is_finite() {
        return Err(SignalError::invalid(format!(
            "target premium {} is not finite",
            target_premium
        )));
    }
    if filter.round_to == Some(0) {
        return Err(SignalError::invalid("round filter modulus must be positive"));
    }

    let mut best: Option<StrikeSelection> = None;
    let mut priced = 0usize;

    for quote in &chain.quotes {
        let Some(premium) = quote.premium.filter(|p| p.is_finite()) else {
            continue;
        };
        priced += 1;
        if !passes(quote, premium, filter) {
            continue;
        }

        let diff = (premium - target_premium).abs();
        // Strict comparison keeps the earlier quote on equal distance
        if best.is_none_or(|b| diff < b.abs_diff_from_target) {
            best = Some(StrikeSelection {
                strike: quote.strike,
                premium,
                abs_diff_from_target: diff,
            });
        }
    }

    best.ok_or_else(|| {
        SignalError::NoMatch(format!(
            "{} {} {}: {} of {} quotes priced, none passed filters {:?}",
            chain.underlying,
            chain.expiry,
            chain.right.code(),
            priced,
            chain.quotes.len(),
            filter
        ))
    })
}

fn passes(quote: &OptionQuote, premium: f64, filter: &StrikeFilter) -> bool {
    if let Some(modulus) = filter.round_to {
        if !is_round_strike(quote.strike, modulus) {
            return false;
        }
    }
    filter.band.is_none_or(|band| band.contains(premium))
}

fn is_round_strike(strike: f64, modulus: u32) -> bool {
    strike.is_finite() && strike.fract() == 0.0 && (strike as i64) % modulus as i64 == 0
}

/// Nearest multiple of `step` to the spot price; halves round away from zero.
pub fn atm_strike(spot: f64, step: f64) -> SignalResult<f64> {
    if !spot.is_finite() || !step.is_finite() || step <= 0.0 {
        return Err(SignalError::invalid(format!(
            "cannot derive ATM strike from spot {} and step {}",
            spot, step
        )));
    }
    Ok((spot / step).round() * step)
}
