use serde::Serialize;
use thiserror::Error;

pub const MAX_PATHS: u32 = 10_000;
pub const DEFAULT_PATHS: u32 = 5_000;
pub const MAX_PERIODS: u32 = 60;
pub const DEFAULT_PERIODS: u32 = 40;
pub const MAX_INITIAL_CAPITAL: f64 = 1e9;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 1e6;
pub const MONTHS_PER_PERIOD: f64 = 12.0;

/// Unvalidated caller input. Every field is optional; return statistics are
/// in percent per year, everything else in currency units or periods.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawParameters {
    pub paths: Option<f64>,
    pub periods: Option<f64>,
    pub initial_capital: Option<f64>,
    pub portfolio_return_mean: Option<f64>,
    pub portfolio_return_st_dev: Option<f64>,
    pub monthly_withdrawal_amt: Option<f64>,
    pub withdrawal_start_offset: Option<f64>,
    pub annual_savings_amt: Option<f64>,
    pub savings_duration: Option<f64>,
    pub seed: Option<u64>,
}

/// Classification of one raw numeric field against the "finite and > 0" rule.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldInput {
    Provided(f64),
    NonPositive(f64),
    Missing,
}

impl FieldInput {
    pub fn classify(raw: Option<f64>) -> Self {
        match raw {
            Some(v) if v.is_finite() && v > 0.0 => FieldInput::Provided(v),
            Some(v) if v.is_finite() => FieldInput::NonPositive(v),
            _ => FieldInput::Missing,
        }
    }

    pub fn positive(self) -> Option<f64> {
        match self {
            FieldInput::Provided(v) => Some(v),
            FieldInput::NonPositive(_) | FieldInput::Missing => None,
        }
    }

    /// Any finite value, zero and negatives included.
    pub fn finite(self) -> Option<f64> {
        match self {
            FieldInput::Provided(v) | FieldInput::NonPositive(v) => Some(v),
            FieldInput::Missing => None,
        }
    }
}

/// Normalized parameters for one run. Periods are years; return statistics
/// are fractions per period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParameters {
    pub path_count: u32,
    pub period_count: u32,
    pub initial_capital: f64,
    pub return_mean_annual: f64,
    pub return_st_dev_annual: f64,
    pub annual_savings_amt: f64,
    pub savings_duration_periods: u32,
    pub annual_withdrawal_amt: f64,
    pub withdrawal_start_offset_periods: u32,
    pub seed: u64,
}

impl SimulationParameters {
    /// Net flow applied when producing row `period` (1-based).
    pub fn net_flow(&self, period: u32) -> f64 {
        let savings = if period <= self.savings_duration_periods {
            self.annual_savings_amt
        } else {
            0.0
        };
        let withdrawal = if period > self.withdrawal_start_offset_periods {
            self.annual_withdrawal_amt
        } else {
            0.0
        };
        savings - withdrawal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub alive_pct: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub survival_pct: f64,
    pub survival_ci_half_width: f64,
    pub mean: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub params_used: SimulationParameters,
    pub alive_pct: Vec<f64>,
    pub q25: Vec<f64>,
    pub q50: Vec<f64>,
    pub q75: Vec<f64>,
    pub terminal_nav: Vec<f64>,
    pub terminal: TerminalSummary,
}

impl SimulationResult {
    pub fn period_summary(&self, period: usize) -> Option<PeriodSummary> {
        Some(PeriodSummary {
            alive_pct: *self.alive_pct.get(period)?,
            q25: *self.q25.get(period)?,
            q50: *self.q50.get(period)?,
            q75: *self.q75.get(period)?,
        })
    }

    pub fn final_survival_pct(&self) -> f64 {
        self.alive_pct.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("invalid distribution parameters: {reason}")]
    InvalidDistributionParameters { reason: String },
    #[error("simulation exceeded its deadline")]
    DeadlineExceeded,
    #[error("simulation was cancelled")]
    Cancelled,
}

impl SimulationError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SimulationError::InvalidDistributionParameters {
            reason: reason.into(),
        }
    }
}
