use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info, warn};

use super::normalize::normalize;
use super::types::{
    RawParameters, SimulationError, SimulationParameters, SimulationResult, TerminalSummary,
};

/// Optional deadline and cancellation flag, polled once per period.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl RunControl {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancelled: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    fn check(&self) -> Result<(), SimulationError> {
        if let Some(flag) = &self.cancelled {
            if flag.load(Ordering::Relaxed) {
                return Err(SimulationError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(SimulationError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// Per-period growth factors (`1 + return`), stored period-major.
#[derive(Debug, Clone)]
struct ReturnMatrix {
    path_count: usize,
    factors: Vec<f64>,
}

impl ReturnMatrix {
    fn row(&self, period: usize) -> &[f64] {
        let start = period * self.path_count;
        &self.factors[start..start + self.path_count]
    }
}

/// Normalizes `raw` and runs it without a deadline.
pub fn simulate(raw: &RawParameters) -> Result<SimulationResult, SimulationError> {
    let params = normalize(raw)?;
    run_simulation(&params, &RunControl::unbounded())
}

pub fn run_simulation(
    params: &SimulationParameters,
    control: &RunControl,
) -> Result<SimulationResult, SimulationError> {
    let started = Instant::now();
    let mut rng = ChaCha20Rng::seed_from_u64(params.seed);
    let returns = generate_returns(params, &mut rng, control).inspect_err(|e| {
        warn!(error = %e, "path generation aborted");
    })?;
    let result = evolve(params, &returns, control).inspect_err(|e| {
        warn!(error = %e, "nav evolution aborted");
    })?;

    info!(
        paths = params.path_count,
        periods = params.period_count,
        survival_pct = result.final_survival_pct(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation complete"
    );
    Ok(result)
}

fn generate_returns(
    params: &SimulationParameters,
    rng: &mut ChaCha20Rng,
    control: &RunControl,
) -> Result<ReturnMatrix, SimulationError> {
    let normal = Normal::new(params.return_mean_annual, params.return_st_dev_annual)
        .map_err(|e| SimulationError::invalid(e.to_string()))?;

    let path_count = params.path_count as usize;
    let mut factors = Vec::with_capacity(path_count * params.period_count as usize);
    for _ in 0..params.period_count {
        control.check()?;
        factors.extend((0..path_count).map(|_| 1.0 + normal.sample(&mut *rng)));
    }
    debug!(cells = factors.len(), "generated return matrix");

    Ok(ReturnMatrix {
        path_count,
        factors,
    })
}

/// Advances every path by one period, flooring at zero. Returns how many
/// paths finished the period with a positive balance.
fn step_period(prev: &[f64], factors: &[f64], flow: f64, next: &mut [f64]) -> usize {
    next.iter_mut()
        .zip(prev.iter().zip(factors))
        .map(|(slot, (nav, factor))| {
            let raw = nav * factor + flow;
            let alive = raw > 0.0;
            *slot = if alive { raw } else { 0.0 };
            alive
        })
        .filter(|alive| *alive)
        .count()
}

fn evolve(
    params: &SimulationParameters,
    returns: &ReturnMatrix,
    control: &RunControl,
) -> Result<SimulationResult, SimulationError> {
    let path_count = params.path_count as usize;
    let rows = params.period_count as usize + 1;

    let mut alive_pct = Vec::with_capacity(rows);
    let mut q25 = Vec::with_capacity(rows);
    let mut q50 = Vec::with_capacity(rows);
    let mut q75 = Vec::with_capacity(rows);

    let mut prev = vec![params.initial_capital; path_count];
    let mut next = vec![0.0; path_count];
    let mut sorted = Vec::with_capacity(path_count);

    alive_pct.push(100.0);
    q25.push(params.initial_capital);
    q50.push(params.initial_capital);
    q75.push(params.initial_capital);

    for i in 0..params.period_count {
        control.check()?;
        let flow = params.net_flow(i + 1);
        let alive = step_period(&prev, returns.row(i as usize), flow, &mut next);

        sorted.clear();
        sorted.extend_from_slice(&next);
        sort_values(&mut sorted);
        alive_pct.push(100.0 * alive as f64 / path_count as f64);
        q25.push(sorted_percentile(&sorted, 25.0));
        q50.push(sorted_percentile(&sorted, 50.0));
        q75.push(sorted_percentile(&sorted, 75.0));

        std::mem::swap(&mut prev, &mut next);
    }

    let terminal = summarize_terminal(&prev);
    Ok(SimulationResult {
        params_used: *params,
        alive_pct,
        q25,
        q50,
        q75,
        terminal_nav: prev,
        terminal,
    })
}

fn summarize_terminal(terminal_nav: &[f64]) -> TerminalSummary {
    let n = terminal_nav.len();
    let alive = terminal_nav.iter().filter(|v| **v > 0.0).count();
    let (survival_pct, survival) = if n == 0 {
        (0.0, 0.0)
    } else {
        (100.0 * alive as f64 / n as f64, alive as f64 / n as f64)
    };
    let mean = if n == 0 {
        0.0
    } else {
        terminal_nav.iter().sum::<f64>() / n as f64
    };

    let mut sorted = terminal_nav.to_vec();
    sort_values(&mut sorted);
    TerminalSummary {
        survival_pct,
        survival_ci_half_width: binomial_ci_half_width(survival, n as u32) * 100.0,
        mean,
        p10: sorted_percentile(&sorted, 10.0),
        p50: sorted_percentile(&sorted, 50.0),
        p90: sorted_percentile(&sorted, 90.0),
    }
}

pub(crate) fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn sort_values(values: &mut [f64]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

/// Linear interpolation at rank `(n - 1) * p / 100` over ascending `values`.
fn sorted_percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        let (lo, hi) = (values[lower], values[upper]);
        (lo + (hi - lo) * w).clamp(lo, hi)
    }
}
