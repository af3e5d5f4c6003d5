mod engine;
mod normalize;
mod solver;
mod types;

pub use engine::{RunControl, run_simulation, simulate};
pub use normalize::normalize;
pub use solver::{
    GoalSolveConfig, GoalSolveIteration, GoalSolveResult, GoalType, MAX_SOLVE_ITERATIONS,
    SolveError, solve_goal,
};
pub use types::{
    DEFAULT_INITIAL_CAPITAL, DEFAULT_PATHS, DEFAULT_PERIODS, FieldInput, MAX_INITIAL_CAPITAL,
    MAX_PATHS, MAX_PERIODS, PeriodSummary, RawParameters, SimulationError, SimulationParameters,
    SimulationResult, TerminalSummary,
};
