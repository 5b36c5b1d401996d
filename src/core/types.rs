use serde::Serialize;

pub const HORIZON_MONTHS: u32 = 60;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioPreset {
    Standard,
    SplitTerm,
}

impl ScenarioPreset {
    /// Share of each year's introduced deals that come from brand-new employers.
    pub fn new_employer_share(self) -> Vec<f64> {
        match self {
            ScenarioPreset::Standard => vec![0.70, 0.20, 0.20, 0.20, 0.20],
            ScenarioPreset::SplitTerm => vec![0.70, 0.40, 0.30, 0.20, 0.20],
        }
    }

    pub fn lease_maturity(self) -> LeaseMaturity {
        match self {
            ScenarioPreset::Standard => LeaseMaturity::SingleCohort { offset_months: 32 },
            ScenarioPreset::SplitTerm => LeaseMaturity::SplitCohort {
                short_share: 0.15,
                short_offset_months: 18,
                long_offset_months: 32,
            },
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LeaseMaturity {
    SingleCohort {
        offset_months: u32,
    },
    SplitCohort {
        short_share: f64,
        short_offset_months: u32,
        long_offset_months: u32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LeadComparison {
    pub intro_close_rate: f64,
    pub paid_close_rate: f64,
    pub cost_per_paid_lead: f64,
}

impl Default for LeadComparison {
    fn default() -> Self {
        Self {
            intro_close_rate: 0.80,
            paid_close_rate: 0.20,
            cost_per_paid_lead: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub preset: ScenarioPreset,
    pub car_price: f64,
    pub net_financed_ratio: f64,
    pub referral_mix: f64,
    pub mx_margin_rate: f64,
    pub dealer_share_rate: f64,
    pub dealer_brokerage_rate: f64,
    pub mx_fee_per_deal: f64,
    pub tax_rate: f64,
    pub commission_per_deal: f64,
    pub other_costs_per_deal: f64,
    pub aftermarket_margin: f64,
    pub insurance_margin: f64,
    pub metal_margin: f64,
    pub new_sales_share: f64,
    pub monthly_intros: f64,
    pub avg_employees_per_employer: f64,
    pub organic_conversion_rate: f64,
    pub repeat_rate: f64,
    pub hot_lead_rate: f64,
    pub annual_churn: f64,
    pub lag_months: usize,
    pub horizon_months: u32,
    pub new_employer_share: Vec<f64>,
    pub lease_maturity: LeaseMaturity,
    pub lead_comparison: LeadComparison,
}

impl Config {
    /// Baseline program assumptions with the given preset's schedule and maturity model.
    pub fn with_preset(preset: ScenarioPreset) -> Self {
        Self {
            preset,
            car_price: 65_000.0,
            net_financed_ratio: 1.0,
            referral_mix: 0.50,
            mx_margin_rate: 0.03,
            dealer_share_rate: 0.30,
            dealer_brokerage_rate: 0.04,
            mx_fee_per_deal: 500.0,
            tax_rate: 0.10,
            commission_per_deal: 300.0,
            other_costs_per_deal: 0.0,
            aftermarket_margin: 0.0,
            insurance_margin: 200.0,
            metal_margin: 1_200.0,
            new_sales_share: 0.60,
            monthly_intros: 5.0,
            avg_employees_per_employer: 20.0,
            organic_conversion_rate: 0.03,
            repeat_rate: 0.70,
            hot_lead_rate: 0.80,
            annual_churn: 0.10,
            lag_months: 6,
            horizon_months: HORIZON_MONTHS,
            new_employer_share: preset.new_employer_share(),
            lease_maturity: preset.lease_maturity(),
            lead_comparison: LeadComparison::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_preset(ScenarioPreset::Standard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealEconomics {
    pub net_financed: f64,
    pub mx_gross: f64,
    pub dealer_share: f64,
    pub mx_net: f64,
    pub dealer_brokerage: f64,
    pub mx_fee_with_tax: f64,
    pub total_add_ons: f64,
    pub dealer_finance_costs: f64,
    pub dealer_finance_net: f64,
    pub dealer_revenue_per_new_deal: f64,
    pub mx_revenue_per_new_deal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthRecord {
    pub month: u32,
    pub new_deals: f64,
    pub organic_deals: f64,
    pub repeat_deals: f64,
    pub total_deals: f64,
    pub intermediary_revenue: f64,
    pub dealer_revenue: f64,
    pub dealer_direct_income: f64,
    pub dealer_trail_income: f64,
    pub employee_base: f64,
    pub trail_tier_rate: f64,
    pub hot_leads: f64,
    pub intermediary_leads: f64,
    pub intro_leads: f64,
    pub repeat_leads: f64,
    pub closed_deals: f64,
    pub paid_leads_needed: f64,
    pub paid_lead_cost: f64,
    pub cum_intermediary_revenue: f64,
    pub cum_dealer_revenue: f64,
    pub cum_hot_leads: f64,
    pub cum_paid_lead_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    pub year: u32,
    pub total_deals: f64,
    pub intermediary_revenue: f64,
    pub dealer_revenue: f64,
    pub hot_leads: f64,
    pub intermediary_leads: f64,
    pub closed_deals: f64,
    pub paid_leads: f64,
    pub paid_lead_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSummary {
    pub total_intermediary_revenue: f64,
    pub total_dealer_revenue: f64,
    pub total_deals: f64,
    pub total_hot_leads: f64,
    pub total_paid_lead_cost: f64,
    pub hot_leads_final_month: f64,
    pub intermediary_revenue_first_month: f64,
    pub intermediary_revenue_final_month: f64,
    pub dealer_revenue_first_month: f64,
    pub dealer_revenue_month_12: f64,
    pub dealer_revenue_final_month: f64,
    pub deals_first_month: f64,
    pub deals_month_12: f64,
    pub deals_final_month: f64,
    pub dealer_growth_pct: Option<f64>,
    pub intermediary_leads_final_month: f64,
    pub closed_deals_final_month: f64,
    pub paid_leads_final_month: f64,
    pub paid_lead_cost_final_month: f64,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub preset: ScenarioPreset,
    pub economics: DealEconomics,
    pub months: Vec<MonthRecord>,
    pub years: Vec<YearSummary>,
    pub summary: ProjectionSummary,
}
