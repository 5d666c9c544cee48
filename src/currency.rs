//! Currency normalization against an externally supplied rate table
//!
//! Rates are injected through the [`RateProvider`] trait; the engine never
//! looks up FX data on its own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RiskEngineError, RiskResult};

/// Source of conversion rates between currency codes
pub trait RateProvider: Send + Sync {
    /// Multiplier converting one unit of `from` into `to`, if both are known
    fn rate(&self, from: &str, to: &str) -> Option<f64>;
}

/// Map a display symbol to its ISO code; codes pass through upper-cased
pub fn normalize_code(currency: &str) -> String {
    match currency.trim() {
        "$" => "USD".to_string(),
        "€" => "EUR".to_string(),
        "£" => "GBP".to_string(),
        "¥" => "JPY".to_string(),
        other => other.to_uppercase(),
    }
}

/// Display symbol for an ISO code, or the code itself when none is known
pub fn currency_symbol(code: &str) -> String {
    match normalize_code(code).as_str() {
        "USD" => "$".to_string(),
        "EUR" => "€".to_string(),
        "GBP" => "£".to_string(),
        "JPY" => "¥".to_string(),
        other => other.to_string(),
    }
}

/// Rate table with base and output currency
///
/// `rates` holds the value of one unit of each currency in a common
/// reference unit, so `rate(from, to) = rates[from] / rates[to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxTable {
    pub base_currency: String,
    pub output_currency: String,
    #[serde(default)]
    pub rates: HashMap<String, f64>,
    #[serde(default)]
    pub as_of: Option<String>,
}

impl FxTable {
    /// Table with a single currency used for both base and output
    pub fn single(currency: &str) -> Self {
        let code = normalize_code(currency);
        let mut rates = HashMap::new();
        rates.insert(code.clone(), 1.0);
        Self {
            base_currency: code.clone(),
            output_currency: code,
            rates,
            as_of: None,
        }
    }

    pub fn new(base_currency: &str, output_currency: &str, rates: HashMap<String, f64>) -> Self {
        Self {
            base_currency: normalize_code(base_currency),
            output_currency: normalize_code(output_currency),
            rates: rates
                .into_iter()
                .map(|(code, rate)| (normalize_code(&code), rate))
                .collect(),
            as_of: None,
        }
    }

    pub fn with_rate(mut self, currency: &str, rate: f64) -> Self {
        self.rates.insert(normalize_code(currency), rate);
        self
    }

    pub fn with_output_currency(mut self, currency: &str) -> Self {
        self.output_currency = normalize_code(currency);
        self
    }

    /// Reject non-positive or non-finite rates
    pub fn validate(&self) -> RiskResult<()> {
        for (code, rate) in &self.rates {
            if !rate.is_finite() || *rate <= 0.0 {
                return Err(RiskEngineError::config(
                    format!("fx.rates.{}", code),
                    format!("rate must be a positive number, got {}", rate),
                ));
            }
        }
        Ok(())
    }
}

impl Default for FxTable {
    fn default() -> Self {
        Self::single("USD")
    }
}

impl RateProvider for FxTable {
    fn rate(&self, from: &str, to: &str) -> Option<f64> {
        let from = normalize_code(from);
        let to = normalize_code(to);
        if from == to {
            return Some(1.0);
        }
        let from_rate = self.rates.get(&from)?;
        let to_rate = self.rates.get(&to)?;
        Some(from_rate / to_rate)
    }
}

/// Scalar converter between declared, base, and output currencies
///
/// Every currency it is asked about is checked while the model is resolved,
/// so per-sample conversion reduces to a precomputed multiplication.
pub struct CurrencyNormalizer<'a> {
    provider: &'a dyn RateProvider,
    base_currency: String,
    output_currency: String,
    output_factor: f64,
}

impl<'a> CurrencyNormalizer<'a> {
    pub fn new(provider: &'a dyn RateProvider, base_currency: &str, output_currency: &str) -> RiskResult<Self> {
        let base_currency = normalize_code(base_currency);
        let output_currency = normalize_code(output_currency);
        let output_factor = lookup(provider, &base_currency, &output_currency, "fx.output_currency")?;

        Ok(Self {
            provider,
            base_currency,
            output_currency,
            output_factor,
        })
    }

    /// Normalizer for the base/output pair declared in an FX table
    pub fn from_table(table: &'a FxTable) -> RiskResult<Self> {
        table.validate()?;
        Self::new(table, &table.base_currency, &table.output_currency)
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn output_currency(&self) -> &str {
        &self.output_currency
    }

    /// Multiplier from base currency to output currency
    pub fn output_factor(&self) -> f64 {
        self.output_factor
    }

    /// Rate between two arbitrary currencies
    pub fn rate(&self, from: &str, to: &str, field: &str) -> RiskResult<f64> {
        lookup(self.provider, from, to, field)
    }

    /// Rate from `currency` (or the base currency when absent) into base
    pub fn rate_to_base(&self, currency: Option<&str>, field: &str) -> RiskResult<f64> {
        match currency {
            Some(code) => lookup(self.provider, code, &self.base_currency, field),
            None => Ok(1.0),
        }
    }

    /// `value × rate(from, to)`
    pub fn convert(&self, value: f64, from: &str, to: &str) -> RiskResult<f64> {
        Ok(value * lookup(self.provider, from, to, "currency")?)
    }

    pub fn to_output(&self, value_in_base: f64) -> f64 {
        value_in_base * self.output_factor
    }
}

fn lookup(provider: &dyn RateProvider, from: &str, to: &str, field: &str) -> RiskResult<f64> {
    match provider.rate(from, to) {
        Some(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        Some(rate) => Err(RiskEngineError::config(
            field,
            format!("invalid conversion rate {} from {} to {}", rate, from, to),
        )),
        None => Err(RiskEngineError::config(
            field,
            format!("unknown currency pair {} -> {}", normalize_code(from), normalize_code(to)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table() -> FxTable {
        FxTable::single("USD")
            .with_rate("EUR", 1.08)
            .with_rate("GBP", 1.27)
            .with_rate("JPY", 0.0067)
    }

    #[test]
    fn test_same_currency_is_identity() {
        let fx = table();
        assert_eq!(fx.rate("EUR", "EUR"), Some(1.0));
        assert_eq!(fx.rate("€", "EUR"), Some(1.0));
    }

    #[test]
    fn test_round_trip_with_reciprocal_rates() {
        let fx = table();
        let normalizer = CurrencyNormalizer::from_table(&fx).unwrap();
        let value = 123_456.78;
        let in_gbp = normalizer.convert(value, "EUR", "GBP").unwrap();
        let back = normalizer.convert(in_gbp, "GBP", "EUR").unwrap();
        assert_relative_eq!(back, value, max_relative = 1e-12);
    }

    #[test]
    fn test_output_factor() {
        let fx = table().with_output_currency("EUR");
        let normalizer = CurrencyNormalizer::from_table(&fx).unwrap();
        assert_relative_eq!(normalizer.output_factor(), 1.0 / 1.08, max_relative = 1e-12);
        assert_relative_eq!(normalizer.to_output(108.0), 100.0, max_relative = 1e-12);
    }

    #[test]
    fn test_unknown_output_currency_fails_up_front() {
        let fx = table().with_output_currency("CHF");
        let err = CurrencyNormalizer::from_table(&fx).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_parameter_currency() {
        let fx = table();
        let normalizer = CurrencyNormalizer::from_table(&fx).unwrap();
        assert!(normalizer.rate_to_base(Some("XYZ"), "severity.currency").is_err());
        assert_eq!(normalizer.rate_to_base(None, "severity.currency").unwrap(), 1.0);
    }

    #[test]
    fn test_non_positive_rate_rejected() {
        let fx = table().with_rate("SEK", 0.0);
        assert!(fx.validate().is_err());
    }

    #[test]
    fn test_symbols() {
        assert_eq!(currency_symbol("eur"), "€");
        assert_eq!(currency_symbol("SEK"), "SEK");
        assert_eq!(normalize_code("$"), "USD");
    }
}
