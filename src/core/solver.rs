use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::engine::{RunControl, binomial_ci_half_width, run_simulation};
use super::types::{MAX_PATHS, MONTHS_PER_PERIOD, SimulationError, SimulationParameters};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalType {
    /// Largest monthly withdrawal that still meets the survival target.
    MaxWithdrawal,
    /// Smallest annual savings amount that meets the survival target.
    RequiredSavings,
}

#[derive(Debug, Clone, Copy)]
pub struct GoalSolveConfig {
    pub goal_type: GoalType,
    /// Terminal survival target in percent.
    pub target_survival_pct: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub paths_per_iteration: u32,
    pub final_paths: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub survival_pct: f64,
    pub survival_ci_half_width: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveResult {
    pub goal_type: GoalType,
    pub target_survival_pct: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub paths_per_iteration: u32,
    pub final_paths: u32,
    pub seed: u64,
    pub solved_value: Option<f64>,
    pub achieved_survival_pct: Option<f64>,
    pub achieved_survival_ci_half_width: Option<f64>,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Bisection on f64 stops making progress long before this.
pub const MAX_SOLVE_ITERATIONS: u32 = 200;

impl GoalType {
    /// Savings lift every path and withdrawals drain it. With the return
    /// matrix fixed by the seed and non-negative growth factors, terminal
    /// survival moves with the candidate in the direction given here.
    fn survival_rises_with_candidate(self) -> bool {
        matches!(self, GoalType::RequiredSavings)
    }

    fn label(self) -> &'static str {
        match self {
            GoalType::MaxWithdrawal => "maximum monthly withdrawal",
            GoalType::RequiredSavings => "required annual savings",
        }
    }
}

/// Bisects on the goal's scalar. Every candidate reuses `params.seed`.
///
/// The search keeps one bound that meets the target (`pass`) and one that
/// misses it (`fail`), and narrows the gap until it is within tolerance.
pub fn solve_goal(
    params: &SimulationParameters,
    config: GoalSolveConfig,
    control: &RunControl,
) -> Result<GoalSolveResult, SolveError> {
    validate_config(config)?;

    let paths = config.paths_per_iteration;
    let evaluate = |candidate: f64| {
        evaluate_candidate(params, config.goal_type, candidate, paths, control)
    };
    let meets = |eval: &CandidateEval| eval.survival_pct >= config.target_survival_pct;

    // The end of the range where the target is easiest to meet.
    let (easy, hard) = if config.goal_type.survival_rises_with_candidate() {
        (config.search_max, config.search_min)
    } else {
        (config.search_min, config.search_max)
    };

    let mut iterations = Vec::new();
    let mut converged = false;
    let label = config.goal_type.label();
    let (solved_value, message) = if meets(&evaluate(hard)?) {
        converged = true;
        (
            Some(hard),
            format!("Target already met at the far search bound; the {label} may lie beyond it."),
        )
    } else if !meets(&evaluate(easy)?) {
        (
            None,
            format!("No feasible {label} found within the search bounds."),
        )
    } else {
        let mut pass = easy;
        let mut fail = hard;
        for iteration in 1..=config.max_iterations {
            let mid = (pass + fail) * 0.5;
            let eval = evaluate(mid)?;
            iterations.push(eval.iteration(iteration, pass.min(fail), pass.max(fail), mid));
            if meets(&eval) {
                pass = mid;
            } else {
                fail = mid;
            }
            if (pass - fail).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        let message = if converged {
            format!("Solved {label}.")
        } else {
            "Reached max iterations before tolerance was met; returning best estimate."
                .to_string()
        };
        (Some(pass), message)
    };
    let feasible = solved_value.is_some();

    let final_eval = solved_value
        .map(|value| {
            evaluate_candidate(params, config.goal_type, value, config.final_paths, control)
        })
        .transpose()?;
    info!(
        goal = ?config.goal_type,
        ?solved_value,
        iterations = iterations.len(),
        feasible,
        "goal solve finished"
    );

    Ok(GoalSolveResult {
        goal_type: config.goal_type,
        target_survival_pct: config.target_survival_pct,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        paths_per_iteration: config.paths_per_iteration,
        final_paths: config.final_paths,
        seed: params.seed,
        solved_value,
        achieved_survival_pct: final_eval.map(|e| e.survival_pct),
        achieved_survival_ci_half_width: final_eval.map(|e| e.survival_ci_half_width),
        iterations,
        converged,
        feasible,
        message,
    })
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    survival_pct: f64,
    survival_ci_half_width: f64,
}

impl CandidateEval {
    fn iteration(self, iteration: u32, lo: f64, hi: f64, candidate: f64) -> GoalSolveIteration {
        GoalSolveIteration {
            iteration,
            lower_bound: lo,
            upper_bound: hi,
            candidate_value: candidate,
            survival_pct: self.survival_pct,
            survival_ci_half_width: self.survival_ci_half_width,
        }
    }
}

fn evaluate_candidate(
    base: &SimulationParameters,
    goal_type: GoalType,
    candidate_value: f64,
    paths: u32,
    control: &RunControl,
) -> Result<CandidateEval, SimulationError> {
    let mut params = *base;
    params.path_count = paths.clamp(1, MAX_PATHS);

    match goal_type {
        GoalType::MaxWithdrawal => {
            params.annual_withdrawal_amt = candidate_value.max(0.0) * MONTHS_PER_PERIOD;
        }
        GoalType::RequiredSavings => {
            params.annual_savings_amt = candidate_value.max(0.0);
        }
    }

    let result = run_simulation(&params, control)?;
    let survival = result.final_survival_pct() / 100.0;
    debug!(candidate_value, survival, "evaluated solver candidate");
    Ok(CandidateEval {
        survival_pct: result.final_survival_pct(),
        survival_ci_half_width: binomial_ci_half_width(survival, params.path_count) * 100.0,
    })
}

fn validate_config(config: GoalSolveConfig) -> Result<(), SolveError> {
    let invalid = |msg: &str| Err(SolveError::InvalidConfig(msg.to_string()));
    if !(0.0..=100.0).contains(&config.target_survival_pct) {
        return invalid("target_survival_pct must be between 0 and 100");
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return invalid("search bounds must be finite");
    }
    if config.search_min < 0.0 {
        return invalid("search_min must be >= 0");
    }
    if config.search_max <= config.search_min {
        return invalid("search_max must be greater than search_min");
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return invalid("tolerance must be > 0");
    }
    if !(1..=MAX_SOLVE_ITERATIONS).contains(&config.max_iterations) {
        return Err(SolveError::InvalidConfig(format!(
            "max_iterations must be between 1 and {MAX_SOLVE_ITERATIONS}"
        )));
    }
    if config.paths_per_iteration == 0 {
        return invalid("paths_per_iteration must be > 0");
    }
    if config.final_paths == 0 {
        return invalid("final_paths must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn deterministic_params() -> SimulationParameters {
        SimulationParameters {
            path_count: 1,
            period_count: 10,
            initial_capital: 12_000.0,
            return_mean_annual: 0.0,
            return_st_dev_annual: 0.0,
            annual_savings_amt: 0.0,
            savings_duration_periods: 0,
            annual_withdrawal_amt: 0.0,
            withdrawal_start_offset_periods: 0,
            seed: 7,
        }
    }

    fn config(goal_type: GoalType, search_max: f64) -> GoalSolveConfig {
        GoalSolveConfig {
            goal_type,
            target_survival_pct: 100.0,
            search_min: 0.0,
            search_max,
            tolerance: 0.5,
            max_iterations: 32,
            paths_per_iteration: 1,
            final_paths: 1,
        }
    }

    #[test]
    fn max_withdrawal_solver_finds_deterministic_solution() {
        // 12_000 over 10 years survives while 120 * monthly < 12_000.
        let params = deterministic_params();
        let cfg = config(GoalType::MaxWithdrawal, 500.0);

        let result = solve_goal(&params, cfg, &RunControl::unbounded()).expect("must solve");
        assert!(result.feasible);
        assert!(result.converged);
        assert_close(
            result.solved_value.expect("value expected"),
            100.0,
            cfg.tolerance + 0.5,
        );
        assert_close(result.achieved_survival_pct.expect("rate expected"), 100.0, 1e-9);
        assert!(!result.iterations.is_empty());
    }

    #[test]
    fn required_savings_solver_finds_deterministic_solution() {
        // Withdrawals of 2_400/yr from 12_000 exhaust capital unless savings
        // cover the shortfall of 1_200/yr across all ten years.
        let mut params = deterministic_params();
        params.annual_withdrawal_amt = 2_400.0;
        params.savings_duration_periods = 10;
        let cfg = config(GoalType::RequiredSavings, 5_000.0);

        let result = solve_goal(&params, cfg, &RunControl::unbounded()).expect("must solve");
        assert!(result.feasible);
        assert_close(
            result.solved_value.expect("value expected"),
            1_200.0,
            cfg.tolerance + 0.5,
        );
    }

    #[test]
    fn required_savings_solver_reports_infeasible_when_bounds_too_low() {
        let mut params = deterministic_params();
        params.annual_withdrawal_amt = 2_400.0;
        params.savings_duration_periods = 10;
        let cfg = config(GoalType::RequiredSavings, 50.0);

        let result = solve_goal(&params, cfg, &RunControl::unbounded()).expect("must return");
        assert!(!result.feasible);
        assert!(result.solved_value.is_none());
        assert!(result.achieved_survival_pct.is_none());
    }

    #[test]
    fn max_withdrawal_reports_upper_bound_when_still_feasible() {
        let params = deterministic_params();
        let cfg = config(GoalType::MaxWithdrawal, 50.0);
        let result = solve_goal(&params, cfg, &RunControl::unbounded()).expect("must return");
        assert!(result.feasible);
        assert_eq!(result.solved_value, Some(50.0));
        assert!(result.iterations.is_empty());
    }

    #[test]
    fn unbounded_iteration_count_is_rejected_before_any_run() {
        let params = deterministic_params();
        let mut cfg = config(GoalType::MaxWithdrawal, 500.0);
        cfg.max_iterations = u32::MAX;
        let err = solve_goal(&params, cfg, &RunControl::unbounded()).expect_err("must reject");
        assert!(matches!(err, SolveError::InvalidConfig(msg) if msg.contains("max_iterations")));

        cfg.max_iterations = MAX_SOLVE_ITERATIONS;
        assert!(solve_goal(&params, cfg, &RunControl::unbounded()).is_ok());
    }

    #[test]
    fn iteration_cap_returns_best_passing_bound() {
        let params = deterministic_params();
        let mut cfg = config(GoalType::MaxWithdrawal, 500.0);
        cfg.max_iterations = 2;
        let result = solve_goal(&params, cfg, &RunControl::unbounded()).expect("must return");
        // 250 misses the target, 125 misses it too; the passing bound stays at 0.
        assert!(!result.converged);
        assert!(result.feasible);
        assert_eq!(result.iterations.len(), 2);
        assert_eq!(result.solved_value, Some(0.0));
        assert_eq!(result.iterations[1].upper_bound, 250.0);
    }

    #[test]
    fn both_goals_narrow_towards_the_passing_side() {
        let mut params = deterministic_params();
        params.annual_withdrawal_amt = 2_400.0;
        params.savings_duration_periods = 10;
        let result = solve_goal(
            &params,
            config(GoalType::RequiredSavings, 5_000.0),
            &RunControl::unbounded(),
        )
        .expect("must solve");
        // Required savings is approached from above: every bracket keeps a
        // passing upper bound.
        for it in &result.iterations {
            assert!(it.upper_bound > 1_200.0, "{it:?}");
        }
        assert!(result.solved_value.is_some_and(|v| v > 1_200.0));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let params = deterministic_params();
        let mut cfg = config(GoalType::MaxWithdrawal, 100.0);
        cfg.search_max = cfg.search_min;
        let err = solve_goal(&params, cfg, &RunControl::unbounded()).expect_err("must reject");
        assert!(matches!(err, SolveError::InvalidConfig(msg) if msg.contains("search_max")));

        let mut cfg = config(GoalType::MaxWithdrawal, 100.0);
        cfg.target_survival_pct = 120.0;
        assert!(solve_goal(&params, cfg, &RunControl::unbounded()).is_err());
    }
}
