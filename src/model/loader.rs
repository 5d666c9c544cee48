//! File loaders for models, portfolios, and FX tables
//!
//! Models and portfolios are JSON documents. FX tables are JSON or a CSV
//! with `currency,rate` columns.

use log::debug;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::RiskModel;
use crate::currency::{normalize_code, FxTable};
use crate::error::{RiskEngineError, RiskResult};
use crate::scenario::Portfolio;

/// Raw CSV row of an FX table
#[derive(Debug, serde::Deserialize)]
struct RateRow {
    currency: String,
    rate: f64,
}

fn load_json<T: DeserializeOwned>(path: &Path) -> RiskResult<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Load a single risk model document
pub fn load_model(path: &Path) -> RiskResult<RiskModel> {
    let model: RiskModel = load_json(path)?;
    debug!("Loaded model '{}' from {}", model.name, path.display());
    Ok(model)
}

/// Load a portfolio document
pub fn load_portfolio(path: &Path) -> RiskResult<Portfolio> {
    let portfolio: Portfolio = load_json(path)?;
    debug!(
        "Loaded portfolio '{}' ({} scenarios) from {}",
        portfolio.name,
        portfolio.scenarios.len(),
        path.display()
    );
    Ok(portfolio)
}

/// Load an FX table from `.json` or `.csv`
///
/// CSV tables carry only rates, so `base` names the base currency (added
/// at rate 1 when absent). `output` overrides the output currency of either
/// format and defaults to the base for CSV.
pub fn load_fx_table(path: &Path, base: &str, output: Option<&str>) -> RiskResult<FxTable> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let table = if is_json {
        let mut table: FxTable = load_json(path)?;
        table.base_currency = normalize_code(&table.base_currency);
        if let Some(output) = output {
            table.output_currency = normalize_code(output);
        } else {
            table.output_currency = normalize_code(&table.output_currency);
        }
        table.rates = table
            .rates
            .into_iter()
            .map(|(code, rate)| (normalize_code(&code), rate))
            .collect();
        table
    } else {
        let file = File::open(path)?;
        let mut reader = csv::Reader::from_reader(file);
        let mut rates = HashMap::new();
        for result in reader.deserialize() {
            let row: RateRow = result?;
            if rates.insert(normalize_code(&row.currency), row.rate).is_some() {
                return Err(RiskEngineError::config(
                    format!("fx.rates.{}", row.currency),
                    "currency listed twice",
                ));
            }
        }
        let mut table = FxTable::new(base, output.unwrap_or(base), rates);
        table.rates.entry(table.base_currency.clone()).or_insert(1.0);
        table
    };

    table.validate()?;
    debug!("Loaded {} FX rates from {}", table.rates.len(), path.display());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::RateProvider;
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cyber_risk_loader_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_csv_fx_table() {
        let path = temp_file("rates.csv", "currency,rate\nUSD,1.0\nEUR,1.1\nGBP,1.25\n");
        let table = load_fx_table(&path, "USD", Some("EUR")).unwrap();
        assert_eq!(table.output_currency, "EUR");
        let rate = table.rate("GBP", "EUR").unwrap();
        assert!((rate - 1.25 / 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_csv_duplicate_currency() {
        let path = temp_file("dupes.csv", "currency,rate\nEUR,1.1\neur,1.2\n");
        assert!(load_fx_table(&path, "USD", None).unwrap_err().is_configuration());
    }

    #[test]
    fn test_json_fx_table() {
        let path = temp_file(
            "rates.json",
            r#"{"base_currency": "usd", "output_currency": "USD", "rates": {"USD": 1.0, "eur": 1.1}}"#,
        );
        let table = load_fx_table(&path, "GBP", Some("EUR")).unwrap();
        assert_eq!(table.base_currency, "USD");
        assert_eq!(table.output_currency, "EUR");
        assert!(table.rates.contains_key("EUR"));
    }

    #[test]
    fn test_load_model() {
        let path = temp_file(
            "model.json",
            r#"{
                "name": "bec",
                "frequency": {"model": "poisson", "parameters": {"lambda": 1.5}},
                "severity": {"model": "gamma", "parameters": {"shape": 2, "scale": "25 000"}}
            }"#,
        );
        let model = load_model(&path).unwrap();
        assert_eq!(model.name, "bec");
        assert!(load_model(Path::new("/definitely/not/here.json")).is_err());
    }
}
