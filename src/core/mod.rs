mod economics;
mod engine;
mod types;

pub use economics::compute_deal_economics;
pub use engine::{run_projection, simulate, summarize_projection, summarize_years, trail_tier_rate};
pub use types::{
    Config, DealEconomics, HORIZON_MONTHS, LeadComparison, LeaseMaturity, MonthRecord, Projection,
    ProjectionSummary, ScenarioPreset, YearSummary,
};
