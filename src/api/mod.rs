mod cli;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::{
    GoalSolveConfig, GoalType, RawParameters, RunControl, SimulationError, SimulationParameters,
    SolveError, normalize, run_simulation, solve_goal,
};

pub use cli::{Cli, Command, run_cli};

#[derive(Debug, Clone, Copy)]
struct AppState {
    timeout: Duration,
}

/// Parses a user-supplied number; text that is not a number reads as absent.
pub(crate) fn parse_lenient_f64(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

pub(crate) fn parse_lenient_u64(text: &str) -> Option<u64> {
    text.trim().parse::<u64>().ok()
}

/// Accepts JSON numbers or numeric strings; anything else reads as absent.
#[derive(Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Number(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<LenientNumber>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        LenientNumber::Number(n) => Some(n),
        LenientNumber::Text(s) => parse_lenient_f64(&s),
        LenientNumber::Other(_) => None,
    }))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientSeed {
    Number(u64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

fn lenient_seed<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<LenientSeed>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        LenientSeed::Number(n) => Some(n),
        LenientSeed::Text(s) => parse_lenient_u64(&s),
        LenientSeed::Other(_) => None,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    #[serde(deserialize_with = "lenient_number")]
    paths: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    periods: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    initial_capital: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    portfolio_return_mean: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    portfolio_return_st_dev: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    monthly_withdrawal_amt: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    withdrawal_start_offset: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    annual_savings_amt: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    savings_duration: Option<f64>,
    #[serde(deserialize_with = "lenient_seed")]
    seed: Option<u64>,
}

impl From<SimulatePayload> for RawParameters {
    fn from(payload: SimulatePayload) -> Self {
        RawParameters {
            paths: payload.paths,
            periods: payload.periods,
            initial_capital: payload.initial_capital,
            portfolio_return_mean: payload.portfolio_return_mean,
            portfolio_return_st_dev: payload.portfolio_return_st_dev,
            monthly_withdrawal_amt: payload.monthly_withdrawal_amt,
            withdrawal_start_offset: payload.withdrawal_start_offset,
            annual_savings_amt: payload.annual_savings_amt,
            savings_duration: payload.savings_duration,
            seed: payload.seed,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiGoalType {
    #[serde(alias = "maxWithdrawal", alias = "max_withdrawal")]
    MaxWithdrawal,
    #[serde(alias = "requiredSavings", alias = "required_savings")]
    RequiredSavings,
}

impl From<ApiGoalType> for GoalType {
    fn from(value: ApiGoalType) -> Self {
        match value {
            ApiGoalType::MaxWithdrawal => GoalType::MaxWithdrawal,
            ApiGoalType::RequiredSavings => GoalType::RequiredSavings,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolvePayload {
    #[serde(flatten)]
    params: SimulatePayload,
    goal: Option<ApiGoalType>,
    target_survival: Option<f64>,
    search_min: Option<f64>,
    search_max: Option<f64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
    paths_per_iteration: Option<u32>,
    final_paths: Option<u32>,
}

/// Solver knobs shared by the CLI and the HTTP API; unset fields take
/// defaults derived from the normalized parameters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SolveOptions {
    pub goal: Option<GoalType>,
    pub target_survival: Option<f64>,
    pub search_min: Option<f64>,
    pub search_max: Option<f64>,
    pub tolerance: Option<f64>,
    pub max_iterations: Option<u32>,
    pub paths_per_iteration: Option<u32>,
    pub final_paths: Option<u32>,
}

pub(crate) fn build_solve_config(
    params: &SimulationParameters,
    options: SolveOptions,
) -> GoalSolveConfig {
    let goal_type = options.goal.unwrap_or(GoalType::MaxWithdrawal);
    let default_max = match goal_type {
        // Spending the whole starting capital within the first year.
        GoalType::MaxWithdrawal => params.initial_capital / 12.0,
        GoalType::RequiredSavings => params.initial_capital,
    };
    GoalSolveConfig {
        goal_type,
        target_survival_pct: options.target_survival.unwrap_or(90.0),
        search_min: options.search_min.unwrap_or(0.0),
        search_max: options.search_max.unwrap_or(default_max),
        tolerance: options.tolerance.unwrap_or(1.0),
        max_iterations: options.max_iterations.unwrap_or(40),
        paths_per_iteration: options.paths_per_iteration.unwrap_or(1_000),
        final_paths: options.final_paths.unwrap_or(params.path_count),
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn run_http_server(port: u16, timeout: Duration) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState { timeout });

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, timeout_ms = timeout.as_millis() as u64, "navsim HTTP API listening");

    axum::serve(listener, app).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/solve", post(solve_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_handler_impl(state: AppState, payload: SimulatePayload) -> Response {
    let raw = RawParameters::from(payload);
    let params = match normalize(&raw) {
        Ok(params) => params,
        Err(e) => return simulation_error_response(&e),
    };

    let control = RunControl::with_timeout(state.timeout);
    let joined = tokio::task::spawn_blocking(move || run_simulation(&params, &control)).await;
    match joined {
        Ok(Ok(result)) => json_response(StatusCode::OK, result),
        Ok(Err(e)) => simulation_error_response(&e),
        Err(e) => {
            error!(error = %e, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation task failed")
        }
    }
}

async fn solve_handler(
    State(state): State<AppState>,
    Json(payload): Json<SolvePayload>,
) -> Response {
    let raw = RawParameters::from(payload.params);
    let params = match normalize(&raw) {
        Ok(params) => params,
        Err(e) => return simulation_error_response(&e),
    };
    let options = SolveOptions {
        goal: payload.goal.map(Into::into),
        target_survival: payload.target_survival,
        search_min: payload.search_min,
        search_max: payload.search_max,
        tolerance: payload.tolerance,
        max_iterations: payload.max_iterations,
        paths_per_iteration: payload.paths_per_iteration,
        final_paths: payload.final_paths,
    };
    let config = build_solve_config(&params, options);

    let control = RunControl::with_timeout(state.timeout);
    let joined = tokio::task::spawn_blocking(move || solve_goal(&params, config, &control)).await;
    match joined {
        Ok(Ok(result)) => json_response(StatusCode::OK, result),
        Ok(Err(SolveError::InvalidConfig(msg))) => error_response(StatusCode::BAD_REQUEST, &msg),
        Ok(Err(SolveError::Simulation(e))) => simulation_error_response(&e),
        Err(e) => {
            error!(error = %e, "solver task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Solver task failed")
        }
    }
}

fn simulation_error_response(err: &SimulationError) -> Response {
    let status = match err {
        SimulationError::InvalidDistributionParameters { .. } => StatusCode::BAD_REQUEST,
        SimulationError::DeadlineExceeded | SimulationError::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    warn!(error = %err, %status, "simulation request rejected");
    error_response(status, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn raw_from_json(json: &str) -> Result<RawParameters, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    Ok(payload.into())
}
