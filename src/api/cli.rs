use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

use super::{
    SolveOptions, build_solve_config, parse_lenient_f64, parse_lenient_u64, run_http_server,
};
use crate::core::{GoalType, RawParameters, RunControl, normalize, run_simulation, solve_goal};

#[derive(Parser, Debug)]
#[command(
    name = "navsim",
    about = "Monte Carlo portfolio survival estimator (savings, withdrawals, stochastic returns)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one simulation and print the JSON results.
    Run(RunArgs),
    /// Search for the withdrawal or savings amount that meets a survival target.
    Solve(SolveArgs),
    /// Serve the JSON HTTP API.
    Serve(ServeArgs),
}

/// Simulation inputs are taken as text and parsed leniently, so a negative
/// count or a non-numeric value falls back to its default instead of
/// failing the command.
#[derive(Args, Debug)]
pub struct SimulationArgs {
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Number of simulated paths (default 5000, max 10000)"
    )]
    paths: Option<String>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Number of annual periods (default 40, max 60)"
    )]
    periods: Option<String>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Starting portfolio value (default 1000000)"
    )]
    initial_capital: Option<String>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Expected annual portfolio return in percent, e.g. 6"
    )]
    return_mean: Option<String>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Annual portfolio return volatility in percent, e.g. 15"
    )]
    return_st_dev: Option<String>,
    #[arg(long, allow_negative_numbers = true, help = "Monthly withdrawal amount")]
    monthly_withdrawal: Option<String>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Withdrawals begin after this many periods"
    )]
    withdrawal_start: Option<String>,
    #[arg(long, allow_negative_numbers = true, help = "Annual savings amount")]
    annual_savings: Option<String>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Savings are added for this many periods"
    )]
    savings_duration: Option<String>,
    #[arg(long, help = "Random seed; drawn from entropy when omitted or not a u64")]
    seed: Option<String>,
}

impl From<SimulationArgs> for RawParameters {
    fn from(args: SimulationArgs) -> Self {
        let number = |value: Option<String>| value.as_deref().and_then(parse_lenient_f64);
        RawParameters {
            paths: number(args.paths),
            periods: number(args.periods),
            initial_capital: number(args.initial_capital),
            portfolio_return_mean: number(args.return_mean),
            portfolio_return_st_dev: number(args.return_st_dev),
            monthly_withdrawal_amt: number(args.monthly_withdrawal),
            withdrawal_start_offset: number(args.withdrawal_start),
            annual_savings_amt: number(args.annual_savings),
            savings_duration: number(args.savings_duration),
            seed: args.seed.as_deref().and_then(parse_lenient_u64),
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    simulation: SimulationArgs,
    #[arg(long, help = "Abort the run after this many milliseconds")]
    timeout_ms: Option<u64>,
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliGoalType {
    MaxWithdrawal,
    RequiredSavings,
}

impl From<CliGoalType> for GoalType {
    fn from(value: CliGoalType) -> Self {
        match value {
            CliGoalType::MaxWithdrawal => GoalType::MaxWithdrawal,
            CliGoalType::RequiredSavings => GoalType::RequiredSavings,
        }
    }
}

#[derive(Args, Debug)]
pub struct SolveArgs {
    #[command(flatten)]
    simulation: SimulationArgs,
    #[arg(long, value_enum, default_value_t = CliGoalType::MaxWithdrawal)]
    goal: CliGoalType,
    #[arg(
        long,
        default_value_t = 90.0,
        help = "Required terminal survival rate in percent"
    )]
    target_survival: f64,
    #[arg(long)]
    search_min: Option<f64>,
    #[arg(long)]
    search_max: Option<f64>,
    #[arg(long)]
    tolerance: Option<f64>,
    #[arg(long)]
    max_iterations: Option<u32>,
    #[arg(long)]
    paths_per_iteration: Option<u32>,
    #[arg(long)]
    final_paths: Option<u32>,
    #[arg(long, help = "Abort the search after this many milliseconds")]
    timeout_ms: Option<u64>,
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(
        long,
        default_value_t = 5_000,
        help = "Per-request simulation deadline in milliseconds"
    )]
    timeout_ms: u64,
}

fn control_for(timeout_ms: Option<u64>) -> RunControl {
    match timeout_ms {
        Some(ms) => RunControl::with_timeout(Duration::from_millis(ms)),
        None => RunControl::unbounded(),
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String, String> {
    let encoded = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    encoded.map_err(|e| format!("failed to encode results: {e}"))
}

fn run_once(args: RunArgs) -> Result<String, String> {
    let raw = RawParameters::from(args.simulation);
    let params = normalize(&raw).map_err(|e| e.to_string())?;
    let result =
        run_simulation(&params, &control_for(args.timeout_ms)).map_err(|e| e.to_string())?;
    to_json(&result, args.pretty)
}

fn run_solve(args: SolveArgs) -> Result<String, String> {
    let raw = RawParameters::from(args.simulation);
    let params = normalize(&raw).map_err(|e| e.to_string())?;
    let options = SolveOptions {
        goal: Some(args.goal.into()),
        target_survival: Some(args.target_survival),
        search_min: args.search_min,
        search_max: args.search_max,
        tolerance: args.tolerance,
        max_iterations: args.max_iterations,
        paths_per_iteration: args.paths_per_iteration,
        final_paths: args.final_paths,
    };
    let config = build_solve_config(&params, options);
    let result =
        solve_goal(&params, config, &control_for(args.timeout_ms)).map_err(|e| e.to_string())?;
    to_json(&result, args.pretty)
}

/// Executes one parsed command. JSON output goes to stdout.
pub async fn run_cli(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Run(args) => {
            println!("{}", run_once(args)?);
            Ok(())
        }
        Command::Solve(args) => {
            println!("{}", run_solve(args)?);
            Ok(())
        }
        Command::Serve(args) => run_http_server(args.port, Duration::from_millis(args.timeout_ms))
            .await
            .map_err(|e| format!("server error: {e}")),
    }
}
