//! Cross-Validator (spec.md §4.4): consensus across multiple sources with
//! tolerance.
//!
//! Grounded on `scrapers/oracle_comparison.rs`'s Chainlink-vs-Binance
//! divergence computation (`divergence_bps`, agreement flag) generalized
//! from a pairwise comparison to an N-way median-consensus vote.

use crate::models::Unit;

pub struct CrossValidationOutcome {
    pub consensus_value: f64,
    pub agreement_confidence: f64,
    pub disagreeing: Vec<usize>,
}

/// Relative tolerance for currency/count; absolute (in decimal, i.e. 0.0005
/// for "5 absolute basis points") tolerance for percent (spec.md §4.4).
fn tolerance_for(unit: Unit) -> Tolerance {
    match unit {
        Unit::Percent => Tolerance::Absolute(0.0005),
        Unit::Currency | Unit::Count | Unit::Ratio => Tolerance::Relative(0.10),
    }
}

enum Tolerance {
    Relative(f64),
    Absolute(f64),
}

impl Tolerance {
    fn disagrees(&self, value: f64, median: f64) -> bool {
        match self {
            Tolerance::Relative(pct) => {
                if median == 0.0 {
                    value != 0.0
                } else {
                    ((value - median) / median).abs() > *pct
                }
            }
            Tolerance::Absolute(abs) => (value - median).abs() > *abs,
        }
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len().is_multiple_of(2) {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub struct CrossValidator;

impl CrossValidator {
    /// `primary` is always preserved as the returned value (spec.md §4.4:
    /// "never silently overwritten by a secondary"). `agreementConfidence`
    /// measures how many of all candidates (including primary) are within
    /// tolerance of the all-candidate median.
    pub fn cross_validate(primary: f64, secondaries: &[f64], unit: Unit) -> CrossValidationOutcome {
        if secondaries.is_empty() {
            return CrossValidationOutcome {
                consensus_value: primary,
                agreement_confidence: 1.0,
                disagreeing: Vec::new(),
            };
        }

        let mut all = Vec::with_capacity(1 + secondaries.len());
        all.push(primary);
        all.extend_from_slice(secondaries);

        let consensus_median = median(&all);
        let tolerance = tolerance_for(unit);
        let disagreeing: Vec<usize> = all
            .iter()
            .enumerate()
            .filter(|(_, v)| tolerance.disagrees(**v, consensus_median))
            .map(|(i, _)| i)
            .collect();

        let agreeing = all.len() - disagreeing.len();
        CrossValidationOutcome {
            consensus_value: primary,
            agreement_confidence: agreeing as f64 / all.len() as f64,
            disagreeing,
        }
    }
}
