//! Attack plan construction.
//!
//! A load test is an ordered sequence of [`AttackUnit`]s, one per target
//! rate. Calls are consumed strictly in input order: unit `i` receives the
//! `rate_i * duration_i` calls following those of unit `i - 1`, unless calls
//! are repeated, in which case every unit receives the full list.

use serde::{Deserialize, Serialize};

use crate::loadtest::error::{FloodError, Result};

/// One JSON-RPC request payload. Opaque to the plan and the adapter.
pub type Call = serde_json::Value;

/// One (rate, duration, calls) execution window against a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackUnit {
    /// Requests per second.
    pub rate: u64,
    /// Duration in seconds.
    pub duration: u64,
    pub calls: Vec<Call>,
    /// Extra flags passed verbatim to `vegeta attack`.
    #[serde(default)]
    pub extra_args: Option<String>,
}

/// Duration argument: one value for every rate, or one per rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durations {
    Single(u64),
    PerRate(Vec<u64>),
}

/// Extra vegeta arguments: none, one string for every rate, or one per rate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExtraArgs {
    #[default]
    None,
    Single(String),
    PerRate(Vec<Option<String>>),
}

impl Durations {
    /// Expand to exactly one duration per rate.
    pub fn expand(&self, n_rates: usize) -> Result<Vec<u64>> {
        let durations = match self {
            Self::Single(duration) => vec![*duration; n_rates],
            Self::PerRate(durations) => {
                if durations.len() != n_rates {
                    return Err(FloodError::plan(format!(
                        "{} durations given for {} rates",
                        durations.len(),
                        n_rates
                    )));
                }
                durations.clone()
            },
        };
        if durations.contains(&0) {
            return Err(FloodError::plan("durations must be greater than 0"));
        }
        Ok(durations)
    }
}

impl ExtraArgs {
    /// Expand to exactly one optional argument string per rate.
    pub fn expand(&self, n_rates: usize) -> Result<Vec<Option<String>>> {
        match self {
            Self::None => Ok(vec![None; n_rates]),
            Self::Single(args) => Ok(vec![Some(args.clone()); n_rates]),
            Self::PerRate(args) => {
                if args.len() != n_rates {
                    return Err(FloodError::plan(format!(
                        "{} extra argument entries given for {} rates",
                        args.len(),
                        n_rates
                    )));
                }
                Ok(args.clone())
            },
        }
    }
}

fn check_rates(rates: &[u64]) -> Result<()> {
    if rates.is_empty() {
        return Err(FloodError::plan("at least one rate is required"));
    }
    if rates.contains(&0) {
        return Err(FloodError::plan("rates must be greater than 0"));
    }
    Ok(())
}

fn overflow() -> FloodError {
    FloodError::plan("call count overflows: rates and durations are too large")
}

/// Calls consumed by each unit, checked against overflow.
fn unit_call_counts(rates: &[u64], durations: &[u64]) -> Result<Vec<u64>> {
    let counts = rates
        .iter()
        .zip(durations)
        .map(|(rate, duration)| rate.checked_mul(*duration).ok_or_else(overflow))
        .collect::<Result<Vec<u64>>>()?;
    counts
        .iter()
        .try_fold(0u64, |total, n| total.checked_add(*n))
        .ok_or_else(overflow)?;
    Ok(counts)
}

/// Number of calls needed for the given rates and durations.
///
/// `n_repeats` multiplies the total, for tests that replay the plan.
pub fn estimate_call_count(
    rates: &[u64],
    durations: &Durations,
    n_repeats: Option<u64>,
) -> Result<u64> {
    check_rates(rates)?;
    let durations = durations.expand(rates.len())?;
    let per_repeat: u64 = unit_call_counts(rates, &durations)?.iter().sum();
    per_repeat
        .checked_mul(n_repeats.unwrap_or(1))
        .ok_or_else(overflow)
}

/// Split `calls` into one attack unit per rate.
pub fn build(
    calls: Vec<Call>,
    rates: &[u64],
    durations: &Durations,
    extra_args: &ExtraArgs,
    repeat_calls: bool,
) -> Result<Vec<AttackUnit>> {
    check_rates(rates)?;
    let durations = durations.expand(rates.len())?;
    let extra_args = extra_args.expand(rates.len())?;

    if repeat_calls {
        if calls.is_empty() {
            return Err(FloodError::plan("no calls to repeat"));
        }
        return Ok(rates
            .iter()
            .zip(durations)
            .zip(extra_args)
            .map(|((rate, duration), extra_args)| AttackUnit {
                rate: *rate,
                duration,
                calls: calls.clone(),
                extra_args,
            })
            .collect());
    }

    let counts = unit_call_counts(rates, &durations)?;
    let needed: u64 = counts.iter().sum();
    if (calls.len() as u64) < needed {
        return Err(FloodError::plan(format!(
            "{} calls given but the plan needs {}",
            calls.len(),
            needed
        )));
    }

    let mut remaining = calls.into_iter();
    let mut units = Vec::with_capacity(rates.len());
    for (((rate, duration), extra_args), n_calls) in
        rates.iter().zip(durations).zip(extra_args).zip(counts)
    {
        units.push(AttackUnit {
            rate: *rate,
            duration,
            calls: remaining.by_ref().take(n_calls as usize).collect(),
            extra_args,
        });
    }
    Ok(units)
}

/// Parameters that regenerate a load test deterministically.
///
/// Same parameters, same calls in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestParameters {
    pub flood_version: String,
    pub test_name: String,
    pub random_seed: u64,
    pub rates: Vec<u64>,
    pub durations: Vec<u64>,
    #[serde(default)]
    pub extra_args: Vec<Option<String>>,
    /// Label only; generation does not depend on it.
    pub network: String,
    /// Upper bound (inclusive) for random block numbers.
    pub max_block: u64,
}

/// An ordered attack sequence plus the parameters it was generated from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTest {
    pub parameters: TestParameters,
    pub attacks: Vec<AttackUnit>,
}

impl LoadTest {
    /// Wrap attack units built outside the generator registry.
    pub fn from_attacks(name: &str, network: &str, attacks: Vec<AttackUnit>) -> Self {
        let parameters = TestParameters {
            flood_version: env!("CARGO_PKG_VERSION").to_string(),
            test_name: name.to_string(),
            random_seed: 0,
            rates: attacks.iter().map(|a| a.rate).collect(),
            durations: attacks.iter().map(|a| a.duration).collect(),
            extra_args: attacks.iter().map(|a| a.extra_args.clone()).collect(),
            network: network.to_string(),
            max_block: 0,
        };
        Self {
            parameters,
            attacks,
        }
    }

    pub fn name(&self) -> &str {
        &self.parameters.test_name
    }

    /// Sum of all unit durations, in seconds.
    pub fn total_duration_secs(&self) -> u64 {
        self.attacks.iter().map(|a| a.duration).sum()
    }
}

/// Predefined rate/duration schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoadTestMode {
    /// Geometric ramp of rates, 30 seconds each.
    Stress,
    /// Low, high, low.
    Spike,
    /// One moderate rate held for ten minutes.
    Soak,
}

impl LoadTestMode {
    /// Default (rates, durations) for the mode.
    pub fn timings(self) -> (Vec<u64>, Vec<u64>) {
        match self {
            Self::Stress => (vec![1, 4, 16, 64, 256, 512], vec![30; 6]),
            Self::Spike => (vec![16, 256, 16], vec![30, 10, 30]),
            Self::Soak => (vec![64], vec![600]),
        }
    }
}

/// Resolve rates and durations from an optional mode and optional overrides.
pub fn generate_timings(
    mode: LoadTestMode,
    rates: Option<Vec<u64>>,
    duration: Option<u64>,
) -> Result<(Vec<u64>, Vec<u64>)> {
    let (default_rates, default_durations) = mode.timings();
    let rates = rates.unwrap_or(default_rates);
    check_rates(&rates)?;
    let durations = match duration {
        Some(duration) => Durations::Single(duration).expand(rates.len())?,
        None if rates.len() == default_durations.len() => default_durations,
        None => {
            let first = default_durations.first().copied().unwrap_or(30);
            vec![first; rates.len()]
        },
    };
    Ok((rates, durations))
}
