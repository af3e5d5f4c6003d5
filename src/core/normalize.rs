use tracing::debug;

use super::types::{
    DEFAULT_INITIAL_CAPITAL, DEFAULT_PATHS, DEFAULT_PERIODS, FieldInput, MAX_INITIAL_CAPITAL,
    MAX_PATHS, MAX_PERIODS, MONTHS_PER_PERIOD, RawParameters, SimulationError,
    SimulationParameters,
};

/// Validates the return statistics and clamps or defaults everything else.
///
/// Only the return mean and standard deviation can fail the run. Any other
/// field that is absent, non-finite or (where positivity applies) `<= 0`
/// falls back to its documented default.
pub fn normalize(raw: &RawParameters) -> Result<SimulationParameters, SimulationError> {
    let mean_pct = raw
        .portfolio_return_mean
        .filter(|v| v.is_finite())
        .ok_or_else(|| SimulationError::invalid("return mean must be a finite number"))?;
    let st_dev_pct = raw
        .portfolio_return_st_dev
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            SimulationError::invalid("return standard deviation must be a finite number")
        })?;
    if st_dev_pct < 0.0 {
        return Err(SimulationError::invalid(
            "return standard deviation must be >= 0",
        ));
    }

    let path_count = clamp_count(FieldInput::classify(raw.paths), MAX_PATHS, DEFAULT_PATHS);
    let period_count = clamp_count(
        FieldInput::classify(raw.periods),
        MAX_PERIODS,
        DEFAULT_PERIODS,
    );
    let initial_capital = FieldInput::classify(raw.initial_capital)
        .positive()
        .map(|v| v.min(MAX_INITIAL_CAPITAL))
        .unwrap_or(DEFAULT_INITIAL_CAPITAL);

    let annual_savings_amt = FieldInput::classify(raw.annual_savings_amt)
        .finite()
        .unwrap_or(0.0);
    let savings_duration_periods = period_floor(FieldInput::classify(raw.savings_duration));
    let annual_withdrawal_amt = FieldInput::classify(raw.monthly_withdrawal_amt)
        .finite()
        .map(|monthly| monthly * MONTHS_PER_PERIOD)
        .filter(|annual| annual.is_finite())
        .unwrap_or(0.0);
    let withdrawal_start_offset_periods =
        period_floor(FieldInput::classify(raw.withdrawal_start_offset));

    let seed = raw.seed.unwrap_or_else(rand::random::<u64>);

    let params = SimulationParameters {
        path_count,
        period_count,
        initial_capital,
        return_mean_annual: mean_pct / 100.0,
        return_st_dev_annual: st_dev_pct / 100.0,
        annual_savings_amt,
        savings_duration_periods,
        annual_withdrawal_amt,
        withdrawal_start_offset_periods,
        seed,
    };
    debug!(?params, "normalized simulation parameters");
    Ok(params)
}

// Fractional counts round up so a positive input never collapses to zero.
fn clamp_count(input: FieldInput, max: u32, default: u32) -> u32 {
    match input.positive() {
        Some(v) => v.ceil().min(max as f64) as u32,
        None => default,
    }
}

// `j <= floor(d)` and `j > floor(o)` match the fractional comparisons for
// integer `j`, so flooring preserves the schedule exactly.
fn period_floor(input: FieldInput) -> u32 {
    input.positive().map(|v| v.floor() as u32).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_returns(mean: f64, st_dev: f64) -> RawParameters {
        RawParameters {
            portfolio_return_mean: Some(mean),
            portfolio_return_st_dev: Some(st_dev),
            seed: Some(7),
            ..RawParameters::default()
        }
    }

    #[test]
    fn classify_distinguishes_provided_non_positive_and_missing() {
        assert_eq!(FieldInput::classify(Some(3.0)), FieldInput::Provided(3.0));
        assert_eq!(FieldInput::classify(Some(0.0)), FieldInput::NonPositive(0.0));
        assert_eq!(
            FieldInput::classify(Some(-5.0)),
            FieldInput::NonPositive(-5.0)
        );
        assert_eq!(FieldInput::classify(Some(f64::NAN)), FieldInput::Missing);
        assert_eq!(FieldInput::classify(Some(f64::INFINITY)), FieldInput::Missing);
        assert_eq!(FieldInput::classify(None), FieldInput::Missing);
    }

    #[test]
    fn missing_or_non_finite_mean_is_rejected() {
        let mut raw = raw_with_returns(5.0, 10.0);
        raw.portfolio_return_mean = None;
        assert!(matches!(
            normalize(&raw),
            Err(SimulationError::InvalidDistributionParameters { .. })
        ));

        raw.portfolio_return_mean = Some(f64::NAN);
        assert!(matches!(
            normalize(&raw),
            Err(SimulationError::InvalidDistributionParameters { .. })
        ));
    }

    #[test]
    fn negative_or_missing_st_dev_is_rejected() {
        let raw = raw_with_returns(5.0, -0.1);
        let err = normalize(&raw).expect_err("negative st dev must fail");
        assert!(err.to_string().contains(">= 0"));

        let mut raw = raw_with_returns(5.0, 10.0);
        raw.portfolio_return_st_dev = Some(f64::INFINITY);
        assert!(normalize(&raw).is_err());
    }

    #[test]
    fn empty_parameter_set_uses_every_default() {
        let params = normalize(&raw_with_returns(0.0, 0.0)).expect("defaults must apply");
        assert_eq!(params.path_count, DEFAULT_PATHS);
        assert_eq!(params.period_count, DEFAULT_PERIODS);
        assert_eq!(params.initial_capital, DEFAULT_INITIAL_CAPITAL);
        assert_eq!(params.annual_savings_amt, 0.0);
        assert_eq!(params.savings_duration_periods, 0);
        assert_eq!(params.annual_withdrawal_amt, 0.0);
        assert_eq!(params.withdrawal_start_offset_periods, 0);
        assert_eq!(params.seed, 7);
    }

    #[test]
    fn counts_are_clamped_to_maxima() {
        let mut raw = raw_with_returns(5.0, 10.0);
        raw.paths = Some(1e7);
        raw.periods = Some(500.0);
        raw.initial_capital = Some(5e12);
        let params = normalize(&raw).expect("must normalize");
        assert_eq!(params.path_count, MAX_PATHS);
        assert_eq!(params.period_count, MAX_PERIODS);
        assert_eq!(params.initial_capital, MAX_INITIAL_CAPITAL);
    }

    #[test]
    fn zero_and_negative_counts_are_treated_as_absent() {
        let mut raw = raw_with_returns(5.0, 10.0);
        raw.paths = Some(-5.0);
        raw.periods = Some(0.0);
        raw.initial_capital = Some(0.0);
        raw.savings_duration = Some(-3.0);
        raw.withdrawal_start_offset = Some(0.0);
        let params = normalize(&raw).expect("must normalize");
        assert_eq!(params.path_count, DEFAULT_PATHS);
        assert_eq!(params.period_count, DEFAULT_PERIODS);
        assert_eq!(params.initial_capital, DEFAULT_INITIAL_CAPITAL);
        assert_eq!(params.savings_duration_periods, 0);
        assert_eq!(params.withdrawal_start_offset_periods, 0);
    }

    #[test]
    fn fractional_counts_round_up_and_schedules_round_down() {
        let mut raw = raw_with_returns(5.0, 10.0);
        raw.paths = Some(0.4);
        raw.periods = Some(10.2);
        raw.savings_duration = Some(2.9);
        raw.withdrawal_start_offset = Some(4.5);
        let params = normalize(&raw).expect("must normalize");
        assert_eq!(params.path_count, 1);
        assert_eq!(params.period_count, 11);
        assert_eq!(params.savings_duration_periods, 2);
        assert_eq!(params.withdrawal_start_offset_periods, 4);
    }

    #[test]
    fn monthly_withdrawal_is_annualized_and_percentages_become_fractions() {
        let mut raw = raw_with_returns(7.0, 15.0);
        raw.monthly_withdrawal_amt = Some(2_500.0);
        raw.annual_savings_amt = Some(-1_000.0);
        let params = normalize(&raw).expect("must normalize");
        assert_eq!(params.annual_withdrawal_amt, 30_000.0);
        assert_eq!(params.annual_savings_amt, -1_000.0);
        assert!((params.return_mean_annual - 0.07).abs() < 1e-12);
        assert!((params.return_st_dev_annual - 0.15).abs() < 1e-12);
    }

    #[test]
    fn withdrawal_overflowing_on_annualization_is_treated_as_absent() {
        let mut raw = raw_with_returns(5.0, 10.0);
        raw.monthly_withdrawal_amt = Some(1e308);
        let params = normalize(&raw).expect("must normalize");
        assert_eq!(params.annual_withdrawal_amt, 0.0);

        raw.monthly_withdrawal_amt = Some(-1e308);
        let params = normalize(&raw).expect("must normalize");
        assert_eq!(params.annual_withdrawal_amt, 0.0);
    }

    #[test]
    fn net_flow_follows_savings_and_withdrawal_windows() {
        let mut raw = raw_with_returns(0.0, 0.0);
        raw.annual_savings_amt = Some(100.0);
        raw.savings_duration = Some(2.0);
        raw.monthly_withdrawal_amt = Some(5.0);
        raw.withdrawal_start_offset = Some(1.0);
        let params = normalize(&raw).expect("must normalize");
        assert_eq!(params.net_flow(1), 100.0);
        assert_eq!(params.net_flow(2), 40.0);
        assert_eq!(params.net_flow(3), -60.0);
    }
}
