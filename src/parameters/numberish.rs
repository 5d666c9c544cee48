//! Parsing of numeric parameter values
//!
//! Monetary and scale fields may use single-space thousands grouping
//! (`"100 000"`, `"1 250 000.50"`). Factor-like fields must be plain numbers.

use crate::error::{RiskEngineError, RiskResult};
use crate::model::{ParamValue, RawParameters};

/// How strictly a field's string form is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Money or scale: grouped thousands allowed
    Monetary,
    /// Rates, shapes, log-scale values: plain numbers only
    Factor,
}

/// Parse a raw value into `f64` according to the field kind
pub fn parse_number(value: &ParamValue, kind: FieldKind, field: &str) -> RiskResult<f64> {
    let parsed = match value {
        ParamValue::Number(v) => *v,
        ParamValue::Text(s) => parse_text(s, kind, field)?,
        ParamValue::List(_) => {
            return Err(RiskEngineError::config(field, "expected a number, found a list"));
        }
    };

    if !parsed.is_finite() {
        return Err(RiskEngineError::config(field, format!("value {} is not finite", parsed)));
    }
    Ok(parsed)
}

fn parse_text(raw: &str, kind: FieldKind, field: &str) -> RiskResult<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(RiskEngineError::config(field, "empty numeric string"));
    }

    let has_separator = s.contains(' ') || s.contains('\u{202f}');
    if has_separator {
        return match kind {
            FieldKind::Monetary => parse_grouped(s, field),
            FieldKind::Factor => Err(RiskEngineError::config(
                field,
                format!("grouped digits are not allowed for this field: '{}'", raw),
            )),
        };
    }

    s.parse::<f64>()
        .map_err(|_| RiskEngineError::config(field, format!("'{}' is not a number", raw)))
}

/// Validate and parse `"1 234 567.89"` style grouping
///
/// The first group has 1-3 digits, every later group exactly 3, separated by
/// exactly one space (or narrow no-break space).
fn parse_grouped(s: &str, field: &str) -> RiskResult<f64> {
    let invalid = || RiskEngineError::config(field, format!("malformed grouped number '{}'", s));

    let (sign, body) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s),
    };
    let (integer, fraction) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };

    let groups: Vec<&str> = integer.split([' ', '\u{202f}']).collect();
    for (i, group) in groups.iter().enumerate() {
        let digits_ok = !group.is_empty() && group.chars().all(|c| c.is_ascii_digit());
        let len_ok = if i == 0 { (1..=3).contains(&group.len()) } else { group.len() == 3 };
        if !digits_ok || !len_ok {
            return Err(invalid());
        }
    }
    if let Some(f) = fraction {
        if f.is_empty() || !f.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
    }

    let mut compact = String::with_capacity(s.len());
    compact.push_str(sign);
    compact.push_str(&groups.concat());
    if let Some(f) = fraction {
        compact.push('.');
        compact.push_str(f);
    }
    compact.parse::<f64>().map_err(|_| invalid())
}

/// Parse a list of monetary values
pub fn parse_number_list(value: &ParamValue, kind: FieldKind, field: &str) -> RiskResult<Vec<f64>> {
    match value {
        ParamValue::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_number(item, kind, &format!("{}[{}]", field, i)))
            .collect(),
        _ => Err(RiskEngineError::config(field, "expected a list of numbers")),
    }
}

/// Typed accessor over a raw parameter block
///
/// Tracks the path prefix for error messages and rejects unknown keys.
pub struct ParamReader<'a> {
    params: &'a RawParameters,
    path: String,
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a RawParameters, path: &str) -> Self {
        Self {
            params,
            path: path.to_string(),
        }
    }

    pub fn field(&self, key: &str) -> String {
        format!("{}.{}", self.path, key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn optional(&self, key: &str, kind: FieldKind) -> RiskResult<Option<f64>> {
        self.params
            .get(key)
            .map(|v| parse_number(v, kind, &self.field(key)))
            .transpose()
    }

    pub fn required(&self, key: &str, kind: FieldKind) -> RiskResult<f64> {
        self.optional(key, kind)?
            .ok_or_else(|| RiskEngineError::config(self.field(key), "required parameter is missing"))
    }

    pub fn optional_list(&self, key: &str, kind: FieldKind) -> RiskResult<Option<Vec<f64>>> {
        self.params
            .get(key)
            .map(|v| parse_number_list(v, kind, &self.field(key)))
            .transpose()
    }

    pub fn optional_text(&self, key: &str) -> RiskResult<Option<&'a str>> {
        match self.params.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(RiskEngineError::config(self.field(key), "expected a string")),
        }
    }

    /// Fail on any key not listed in `allowed`
    pub fn deny_unknown(&self, allowed: &[&str]) -> RiskResult<()> {
        match self.params.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(RiskEngineError::config(
                self.field(key),
                format!("unknown parameter; expected one of: {}", allowed.join(", ")),
            )),
            None => Ok(()),
        }
    }
}
