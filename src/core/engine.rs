use tracing::debug;

use super::economics::compute_deal_economics;
use super::types::{
    Config, DealEconomics, LeadComparison, LeaseMaturity, MonthRecord, Projection,
    ProjectionSummary, YearSummary,
};

const MONTHS_PER_YEAR: u32 = 12;
const TRAIL_TIER_LOW_MAX_DEALS: f64 = 5.0;
const TRAIL_TIER_MID_MAX_DEALS: f64 = 10.0;
const TRAIL_RATE_LOW: f64 = 0.10;
const TRAIL_RATE_MID: f64 = 0.125;
const TRAIL_RATE_HIGH: f64 = 0.15;

/// Employees from newly signed employers, queued until the lag has elapsed.
#[derive(Debug)]
struct Pipeline {
    slots: Vec<f64>,
    cursor: usize,
}

impl Pipeline {
    fn new(lag_months: usize) -> Self {
        Self {
            slots: vec![0.0; lag_months],
            cursor: 0,
        }
    }

    /// Queues this month's batch and returns the batch queued `lag_months` ago.
    fn advance(&mut self, incoming: f64) -> f64 {
        if self.slots.is_empty() {
            return incoming;
        }
        let graduating = std::mem::replace(&mut self.slots[self.cursor], incoming);
        self.cursor = (self.cursor + 1) % self.slots.len();
        graduating
    }
}

#[derive(Debug, Default)]
struct Populations {
    employee_base: f64,
    lease_base: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunningTotals {
    intermediary_revenue: f64,
    dealer_revenue: f64,
    hot_leads: f64,
    paid_lead_cost: f64,
}

#[derive(Debug, Clone, Copy)]
struct LeadFigures {
    intermediary_leads: f64,
    intro_leads: f64,
    repeat_leads: f64,
    closed_deals: f64,
    paid_leads_needed: f64,
    paid_lead_cost: f64,
}

impl LeadFigures {
    fn compute(comparison: &LeadComparison, new_deals: f64, returning_deals: f64) -> Self {
        let intermediary_leads = new_deals + returning_deals;
        let closed_deals = intermediary_leads * comparison.intro_close_rate;
        let paid_leads_needed = closed_deals / comparison.paid_close_rate.max(1e-9);
        Self {
            intermediary_leads,
            intro_leads: new_deals,
            repeat_leads: returning_deals,
            closed_deals,
            paid_leads_needed,
            paid_lead_cost: paid_leads_needed * comparison.cost_per_paid_lead,
        }
    }
}

pub fn run_projection(config: &Config) -> Projection {
    let economics = compute_deal_economics(config);
    let months = simulate(config, &economics, config.horizon_months);
    let years = summarize_years(&months);
    let summary = summarize_projection(&months);
    Projection {
        preset: config.preset,
        economics,
        months,
        years,
        summary,
    }
}

pub fn simulate(
    config: &Config,
    economics: &DealEconomics,
    horizon_months: u32,
) -> Vec<MonthRecord> {
    let monthly_churn = config.annual_churn / MONTHS_PER_YEAR as f64;
    let mut pipeline = Pipeline::new(config.lag_months);
    let mut populations = Populations::default();
    let mut totals = RunningTotals::default();
    let mut records: Vec<MonthRecord> = Vec::with_capacity(horizon_months as usize);

    for month in 1..=horizon_months {
        let new_employer_share = new_employer_share_for_month(&config.new_employer_share, month);

        // Introduced volume is flat; only its employer origin shifts year to year.
        let new_deals = config.monthly_intros;
        let employees_added = new_deals * new_employer_share * config.avg_employees_per_employer;

        let employees_now_active = pipeline.advance(employees_added);
        populations.employee_base =
            populations.employee_base * (1.0 - monthly_churn) + employees_now_active;

        let organic_deals = populations.employee_base * config.organic_conversion_rate;
        let trail_rate = trail_tier_rate(organic_deals);

        let maturing = maturing_deals(config.lease_maturity, month, &records);
        let repeat_deals = maturing * config.repeat_rate;
        let hot_leads = maturing * config.hot_lead_rate;

        let total_deals = new_deals + organic_deals + repeat_deals;
        let returning_deals = organic_deals + repeat_deals;

        // Trail is paid on the referral margin base whatever the original structure.
        let dealer_direct_income = new_deals * economics.dealer_revenue_per_new_deal;
        let dealer_trail_income = returning_deals * trail_rate * economics.mx_gross;
        let dealer_revenue = dealer_direct_income + dealer_trail_income;
        let intermediary_revenue =
            new_deals * economics.mx_revenue_per_new_deal + returning_deals * economics.mx_net;

        populations.lease_base =
            populations.lease_base * (1.0 - monthly_churn) + new_deals + organic_deals;

        let leads = LeadFigures::compute(&config.lead_comparison, new_deals, returning_deals);

        totals.intermediary_revenue += intermediary_revenue;
        totals.dealer_revenue += dealer_revenue;
        totals.hot_leads += hot_leads;
        totals.paid_lead_cost += leads.paid_lead_cost;

        records.push(MonthRecord {
            month,
            new_deals,
            organic_deals,
            repeat_deals,
            total_deals,
            intermediary_revenue,
            dealer_revenue,
            dealer_direct_income,
            dealer_trail_income,
            employee_base: populations.employee_base,
            trail_tier_rate: trail_rate,
            hot_leads,
            intermediary_leads: leads.intermediary_leads,
            intro_leads: leads.intro_leads,
            repeat_leads: leads.repeat_leads,
            closed_deals: leads.closed_deals,
            paid_leads_needed: leads.paid_leads_needed,
            paid_lead_cost: leads.paid_lead_cost,
            cum_intermediary_revenue: totals.intermediary_revenue,
            cum_dealer_revenue: totals.dealer_revenue,
            cum_hot_leads: totals.hot_leads,
            cum_paid_lead_cost: totals.paid_lead_cost,
        });
    }

    debug!(
        horizon_months,
        employee_base = populations.employee_base,
        lease_base = populations.lease_base,
        cum_dealer_revenue = totals.dealer_revenue,
        "simulation finished"
    );

    records
}

/// Trail rate on the referral margin, stepped on monthly organic volume.
/// Breakpoints are inclusive on the lower tier.
pub fn trail_tier_rate(organic_deals: f64) -> f64 {
    if organic_deals <= TRAIL_TIER_LOW_MAX_DEALS {
        TRAIL_RATE_LOW
    } else if organic_deals <= TRAIL_TIER_MID_MAX_DEALS {
        TRAIL_RATE_MID
    } else {
        TRAIL_RATE_HIGH
    }
}

fn new_employer_share_for_month(schedule: &[f64], month: u32) -> f64 {
    if schedule.is_empty() {
        return 0.0;
    }
    let year_index = ((month.saturating_sub(1) / MONTHS_PER_YEAR) as usize).min(schedule.len() - 1);
    schedule[year_index]
}

fn maturing_deals(maturity: LeaseMaturity, month: u32, history: &[MonthRecord]) -> f64 {
    match maturity {
        LeaseMaturity::SingleCohort { offset_months } => {
            cohort_deals(history, month, offset_months)
        }
        LeaseMaturity::SplitCohort {
            short_share,
            short_offset_months,
            long_offset_months,
        } => {
            short_share * cohort_deals(history, month, short_offset_months)
                + (1.0 - short_share) * cohort_deals(history, month, long_offset_months)
        }
    }
}

/// Total deals written `offset_months` before `month`, or 0 before the offset elapses.
fn cohort_deals(history: &[MonthRecord], month: u32, offset_months: u32) -> f64 {
    if offset_months == 0 || month <= offset_months {
        return 0.0;
    }
    let source_index = (month - offset_months - 1) as usize;
    history
        .get(source_index)
        .map(|record| record.total_deals)
        .unwrap_or(0.0)
}

pub fn summarize_years(records: &[MonthRecord]) -> Vec<YearSummary> {
    records
        .chunks(MONTHS_PER_YEAR as usize)
        .enumerate()
        .map(|(idx, slice)| YearSummary {
            year: idx as u32 + 1,
            total_deals: sum_of(slice, |r| r.total_deals),
            intermediary_revenue: sum_of(slice, |r| r.intermediary_revenue),
            dealer_revenue: sum_of(slice, |r| r.dealer_revenue),
            hot_leads: sum_of(slice, |r| r.hot_leads).round(),
            intermediary_leads: sum_of(slice, |r| r.intermediary_leads).round(),
            closed_deals: sum_of(slice, |r| r.closed_deals).round(),
            paid_leads: sum_of(slice, |r| r.paid_leads_needed).round(),
            paid_lead_cost: sum_of(slice, |r| r.paid_lead_cost).round(),
        })
        .collect()
}

pub fn summarize_projection(records: &[MonthRecord]) -> ProjectionSummary {
    let first = records.first();
    let month_12 = records.get(MONTHS_PER_YEAR as usize - 1);
    let last = records.last();
    let dealer_revenue_first_month = field(first, |r| r.dealer_revenue);
    let dealer_revenue_final_month = field(last, |r| r.dealer_revenue);
    let dealer_growth_pct = (dealer_revenue_first_month > 0.0)
        .then(|| (dealer_revenue_final_month / dealer_revenue_first_month - 1.0) * 100.0);

    ProjectionSummary {
        total_intermediary_revenue: field(last, |r| r.cum_intermediary_revenue),
        total_dealer_revenue: field(last, |r| r.cum_dealer_revenue),
        total_deals: sum_of(records, |r| r.total_deals),
        total_hot_leads: field(last, |r| r.cum_hot_leads),
        total_paid_lead_cost: field(last, |r| r.cum_paid_lead_cost),
        hot_leads_final_month: field(last, |r| r.hot_leads),
        intermediary_revenue_first_month: field(first, |r| r.intermediary_revenue),
        intermediary_revenue_final_month: field(last, |r| r.intermediary_revenue),
        dealer_revenue_first_month,
        dealer_revenue_month_12: field(month_12, |r| r.dealer_revenue),
        dealer_revenue_final_month,
        deals_first_month: field(first, |r| r.total_deals),
        deals_month_12: field(month_12, |r| r.total_deals),
        deals_final_month: field(last, |r| r.total_deals),
        dealer_growth_pct,
        intermediary_leads_final_month: field(last, |r| r.intermediary_leads),
        closed_deals_final_month: field(last, |r| r.closed_deals),
        paid_leads_final_month: field(last, |r| r.paid_leads_needed),
        paid_lead_cost_final_month: field(last, |r| r.paid_lead_cost),
    }
}

fn field(record: Option<&MonthRecord>, pick: impl Fn(&MonthRecord) -> f64) -> f64 {
    record.map(pick).unwrap_or(0.0)
}

fn sum_of(records: &[MonthRecord], pick: impl Fn(&MonthRecord) -> f64) -> f64 {
    records.iter().map(pick).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{HORIZON_MONTHS, ScenarioPreset};
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_config() -> Config {
        let mut config = Config::default();
        config.car_price = 65_000.0;
        config.referral_mix = 0.50;
        config.monthly_intros = 5.0;
        config.avg_employees_per_employer = 20.0;
        config.organic_conversion_rate = 0.03;
        config.repeat_rate = 0.70;
        config.hot_lead_rate = 0.80;
        config
    }

    fn run(config: &Config) -> Vec<MonthRecord> {
        let economics = compute_deal_economics(config);
        simulate(config, &economics, HORIZON_MONTHS)
    }

    #[test]
    fn pipeline_releases_batches_after_lag() {
        let mut pipeline = Pipeline::new(3);
        assert_eq!(pipeline.advance(10.0), 0.0);
        assert_eq!(pipeline.advance(20.0), 0.0);
        assert_eq!(pipeline.advance(30.0), 0.0);
        assert_eq!(pipeline.advance(40.0), 10.0);
        assert_eq!(pipeline.advance(50.0), 20.0);
        assert_eq!(pipeline.advance(60.0), 30.0);
        assert_eq!(pipeline.advance(70.0), 40.0);
    }

    #[test]
    fn pipeline_without_lag_passes_batches_straight_through() {
        let mut pipeline = Pipeline::new(0);
        assert_eq!(pipeline.advance(12.5), 12.5);
        assert_eq!(pipeline.advance(3.0), 3.0);
    }

    #[test]
    fn trail_tier_breakpoints_are_inclusive_on_lower_tier() {
        assert_eq!(trail_tier_rate(0.0), 0.10);
        assert_eq!(trail_tier_rate(5.0), 0.10);
        assert_eq!(trail_tier_rate(5.000_001), 0.125);
        assert_eq!(trail_tier_rate(10.0), 0.125);
        assert_eq!(trail_tier_rate(10.000_001), 0.15);
        assert_eq!(trail_tier_rate(250.0), 0.15);
    }

    #[test]
    fn new_employer_share_clamps_to_last_year() {
        let schedule = [0.7, 0.4, 0.3];
        assert_eq!(new_employer_share_for_month(&schedule, 1), 0.7);
        assert_eq!(new_employer_share_for_month(&schedule, 12), 0.7);
        assert_eq!(new_employer_share_for_month(&schedule, 13), 0.4);
        assert_eq!(new_employer_share_for_month(&schedule, 36), 0.3);
        assert_eq!(new_employer_share_for_month(&schedule, 60), 0.3);
        assert_eq!(new_employer_share_for_month(&[], 5), 0.0);
    }

    #[test]
    fn first_month_has_only_introduced_deals() {
        let records = run(&sample_config());
        let first = &records[0];

        assert_eq!(first.month, 1);
        assert_eq!(first.organic_deals, 0.0);
        assert_eq!(first.repeat_deals, 0.0);
        assert_eq!(first.total_deals, 5.0);
        assert_eq!(first.hot_leads, 0.0);
        assert_approx(first.dealer_revenue, 5.0 * 2_087.5);
        assert_approx(first.intermediary_revenue, 5.0 * 957.5);
        assert_approx(first.dealer_trail_income, 0.0);
    }

    #[test]
    fn final_month_reflects_a_grown_book() {
        let records = run(&sample_config());
        let first = &records[0];
        let last = &records[59];

        assert_eq!(records.len(), 60);
        assert_eq!(last.month, 60);
        assert!(last.total_deals > 5.0);
        assert!(last.cum_dealer_revenue > 60.0 * first.dealer_revenue);
    }

    #[test]
    fn employees_graduate_only_after_lag() {
        let config = sample_config();
        let records = run(&config);

        for record in &records[..config.lag_months] {
            assert_eq!(record.employee_base, 0.0, "month {}", record.month);
            assert_eq!(record.organic_deals, 0.0, "month {}", record.month);
        }

        let first_active = &records[config.lag_months];
        assert_eq!(first_active.month, 7);
        assert_approx(first_active.employee_base, 5.0 * 0.70 * 20.0);
        assert_approx(first_active.organic_deals, 2.1);
        assert_approx(first_active.trail_tier_rate, 0.10);
        assert_approx(first_active.dealer_trail_income, 2.1 * 0.10 * 1_950.0);
        assert_approx(first_active.intermediary_revenue, 5.0 * 957.5 + 2.1 * 1_365.0);
    }

    #[test]
    fn employee_base_decays_by_monthly_churn() {
        let mut config = sample_config();
        config.new_employer_share = vec![1.0, 0.0];
        config.lag_months = 0;
        config.monthly_intros = 1.0;
        config.avg_employees_per_employer = 120.0;

        let records = run(&config);
        let churn = 0.10 / 12.0;
        let at_year_end = records[11].employee_base;
        assert_approx(records[12].employee_base, at_year_end * (1.0 - churn));
        assert_approx(records[13].employee_base, at_year_end * (1.0 - churn).powi(2));
    }

    #[test]
    fn repeat_deals_and_hot_leads_start_after_single_cohort_offset() {
        let config = sample_config();
        let records = run(&config);

        for record in &records[..32] {
            assert_eq!(record.repeat_deals, 0.0, "month {}", record.month);
            assert_eq!(record.hot_leads, 0.0, "month {}", record.month);
        }

        let matured = &records[32];
        assert_eq!(matured.month, 33);
        assert_approx(matured.repeat_deals, records[0].total_deals * 0.70);
        assert_approx(matured.hot_leads, records[0].total_deals * 0.80);
        assert_approx(records[59].hot_leads, records[27].total_deals * 0.80);
    }

    #[test]
    fn split_term_preset_blends_short_and_long_cohorts() {
        let config = Config::with_preset(ScenarioPreset::SplitTerm);
        let records = run(&config);

        for record in &records[..18] {
            assert_eq!(record.repeat_deals, 0.0, "month {}", record.month);
        }

        let short_only = &records[18];
        assert_eq!(short_only.month, 19);
        assert_approx(short_only.repeat_deals, 0.15 * records[0].total_deals * 0.70);
        assert_approx(short_only.hot_leads, 0.15 * records[0].total_deals * 0.80);

        let blended = &records[32];
        let expected = 0.15 * records[14].total_deals + 0.85 * records[0].total_deals;
        assert_approx(blended.repeat_deals, expected * 0.70);
        assert_approx(blended.hot_leads, expected * 0.80);
    }

    #[test]
    fn split_term_schedule_sends_more_employees_in_year_two() {
        let standard = run(&Config::with_preset(ScenarioPreset::Standard));
        let split = run(&Config::with_preset(ScenarioPreset::SplitTerm));

        assert_approx(standard[17].employee_base, split[17].employee_base);
        assert!(split[18].employee_base > standard[18].employee_base);
    }

    #[test]
    fn zero_intros_produce_an_empty_book() {
        let mut config = sample_config();
        config.monthly_intros = 0.0;

        for record in run(&config) {
            assert_eq!(record.total_deals, 0.0);
            assert_eq!(record.organic_deals, 0.0);
            assert_eq!(record.repeat_deals, 0.0);
            assert_eq!(record.hot_leads, 0.0);
            assert_eq!(record.dealer_revenue, 0.0);
            assert_eq!(record.intermediary_revenue, 0.0);
            assert_eq!(record.cum_dealer_revenue, 0.0);
        }
    }

    #[test]
    fn lead_comparison_follows_close_rates() {
        let records = run(&sample_config());
        let first = &records[0];

        assert_approx(first.intermediary_leads, 5.0);
        assert_approx(first.intro_leads, 5.0);
        assert_approx(first.repeat_leads, 0.0);
        assert_approx(first.closed_deals, 4.0);
        assert_approx(first.paid_leads_needed, 20.0);
        assert_approx(first.paid_lead_cost, 2_000.0);
    }

    #[test]
    fn year_summaries_are_sums_of_their_months() {
        let records = run(&sample_config());
        let years = summarize_years(&records);

        assert_eq!(years.len(), 5);
        let year_five: f64 = records[48..60].iter().map(|r| r.total_deals).sum();
        assert_eq!(years[4].year, 5);
        assert_eq!(years[4].total_deals, year_five);

        let year_one_dealer: f64 = records[..12].iter().map(|r| r.dealer_revenue).sum();
        assert_eq!(years[0].dealer_revenue, year_one_dealer);
        let year_five_leads: f64 = records[48..60].iter().map(|r| r.hot_leads).sum();
        assert_eq!(years[4].hot_leads, year_five_leads.round());
    }

    #[test]
    fn projection_summary_matches_month_records() {
        let projection = run_projection(&sample_config());
        let months = &projection.months;
        let summary = &projection.summary;

        assert_eq!(summary.total_dealer_revenue, months[59].cum_dealer_revenue);
        assert_eq!(
            summary.total_intermediary_revenue,
            months[59].cum_intermediary_revenue
        );
        assert_eq!(summary.total_hot_leads, months[59].cum_hot_leads);
        assert_eq!(summary.dealer_revenue_month_12, months[11].dealer_revenue);
        assert_eq!(summary.deals_first_month, 5.0);
        let growth = summary.dealer_growth_pct.expect("positive first month");
        assert_approx(
            growth,
            (months[59].dealer_revenue / months[0].dealer_revenue - 1.0) * 100.0,
        );
        let total_from_years: f64 = projection.years.iter().map(|y| y.total_deals).sum();
        assert!((summary.total_deals - total_from_years).abs() < 1e-6);
    }

    #[test]
    fn projection_summary_of_empty_run_is_zeroed() {
        let summary = summarize_projection(&[]);
        assert_eq!(summary.total_dealer_revenue, 0.0);
        assert_eq!(summary.deals_final_month, 0.0);
        assert_eq!(summary.dealer_growth_pct, None);
    }

    #[test]
    fn identical_configs_produce_identical_runs() {
        let config = Config::with_preset(ScenarioPreset::SplitTerm);
        let left = run(&config);
        let right = run(&config.clone());
        assert_eq!(left, right);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_month_records_hold_count_and_prefix_sum_invariants(
            car_price in 0u32..200_000,
            mix_pct in 0u32..=100,
            intros in 0u32..60,
            employees in 0u32..200,
            organic_bp in 0u32..1_000,
            repeat_pct in 0u32..=100,
            hot_lead_pct in 0u32..=100,
            split_term in proptest::bool::ANY
        ) {
            let preset = if split_term { ScenarioPreset::SplitTerm } else { ScenarioPreset::Standard };
            let mut config = Config::with_preset(preset);
            config.car_price = car_price as f64;
            config.referral_mix = mix_pct as f64 / 100.0;
            config.monthly_intros = intros as f64;
            config.avg_employees_per_employer = employees as f64;
            config.organic_conversion_rate = organic_bp as f64 / 10_000.0;
            config.repeat_rate = repeat_pct as f64 / 100.0;
            config.hot_lead_rate = hot_lead_pct as f64 / 100.0;

            let records = run(&config);
            prop_assert_eq!(records.len(), 60);

            let mut cum_dealer = 0.0;
            let mut cum_intermediary = 0.0;
            let mut cum_hot_leads = 0.0;
            let mut cum_paid = 0.0;
            let mut previous: Option<&MonthRecord> = None;

            for (idx, record) in records.iter().enumerate() {
                prop_assert_eq!(record.month, idx as u32 + 1);
                prop_assert_eq!(
                    record.total_deals,
                    record.new_deals + record.organic_deals + record.repeat_deals
                );
                prop_assert!(record.new_deals >= 0.0);
                prop_assert!(record.organic_deals >= 0.0);
                prop_assert!(record.repeat_deals >= 0.0);
                prop_assert!(record.hot_leads >= 0.0);

                cum_dealer += record.dealer_revenue;
                cum_intermediary += record.intermediary_revenue;
                cum_hot_leads += record.hot_leads;
                cum_paid += record.paid_lead_cost;
                prop_assert_eq!(record.cum_dealer_revenue, cum_dealer);
                prop_assert_eq!(record.cum_intermediary_revenue, cum_intermediary);
                prop_assert_eq!(record.cum_hot_leads, cum_hot_leads);
                prop_assert_eq!(record.cum_paid_lead_cost, cum_paid);

                if let Some(prev) = previous {
                    prop_assert!(record.cum_dealer_revenue >= prev.cum_dealer_revenue);
                    prop_assert!(record.cum_intermediary_revenue >= prev.cum_intermediary_revenue);
                    prop_assert!(record.cum_hot_leads >= prev.cum_hot_leads);
                }
                previous = Some(record);
            }
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_maturity_feeds_back_once_offset_elapses(
            intros in 1u32..40,
            repeat_pct in 1u32..=100,
            hot_lead_pct in 1u32..=100
        ) {
            let mut config = sample_config();
            config.monthly_intros = intros as f64;
            config.repeat_rate = repeat_pct as f64 / 100.0;
            config.hot_lead_rate = hot_lead_pct as f64 / 100.0;

            let records = run(&config);
            for record in &records[..32] {
                prop_assert_eq!(record.repeat_deals, 0.0);
                prop_assert_eq!(record.hot_leads, 0.0);
            }
            for record in &records[32..] {
                prop_assert!(record.repeat_deals > 0.0);
                prop_assert!(record.hot_leads > 0.0);
            }
        }
    }
}
