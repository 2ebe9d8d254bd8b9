use crate::error::InvalidOddsError;
use crate::match_data::{Market, MarketGroup, OddsQuote};

pub fn naive_implied(odds: &[f64]) -> Result<Vec<f64>, InvalidOddsError> {
    if odds.len() < 2 {
        return Err(InvalidOddsError::TooFewOutcomes { count: odds.len() });
    }
    let mut out = Vec::with_capacity(odds.len());
    for &value in odds {
        if !value.is_finite() {
            return Err(InvalidOddsError::NotFinite);
        }
        if value <= 1.0 {
            return Err(InvalidOddsError::NotAboveEven { value });
        }
        out.push(1.0 / value);
    }
    Ok(out)
}

pub fn overround(odds: &[f64]) -> Result<f64, InvalidOddsError> {
    Ok(naive_implied(odds)?.iter().sum::<f64>() - 1.0)
}

/// De-margined implied probabilities. The result sums to 1.
pub fn demargin(odds: &[f64]) -> Result<Vec<f64>, InvalidOddsError> {
    let naive = naive_implied(odds)?;
    let sum: f64 = naive.iter().sum();
    Ok(naive.into_iter().map(|p| p / sum).collect())
}

pub fn demargin_pair(first: f64, second: f64) -> Result<(f64, f64), InvalidOddsError> {
    let probs = demargin(&[first, second])?;
    Ok((probs[0], probs[1]))
}

pub fn group_prices(quote: &OddsQuote, group: MarketGroup) -> Result<Vec<f64>, InvalidOddsError> {
    group
        .markets()
        .iter()
        .map(|m| quote.price(*m).ok_or(InvalidOddsError::Missing))
        .collect()
}

pub fn demargined_group(
    quote: &OddsQuote,
    group: MarketGroup,
) -> Result<Vec<(Market, f64)>, InvalidOddsError> {
    let prices = group_prices(quote, group)?;
    let probs = demargin(&prices)?;
    Ok(group.markets().iter().copied().zip(probs).collect())
}

pub fn implied_for(quote: &OddsQuote, market: Market) -> Result<f64, InvalidOddsError> {
    demargined_group(quote, market.group())?
        .into_iter()
        .find(|(m, _)| *m == market)
        .map(|(_, p)| p)
        .ok_or(InvalidOddsError::Missing)
}
