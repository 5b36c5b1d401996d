use super::types::{Config, DealEconomics};

/// Per-deal outcomes for the referral and dealer-financed structures.
///
/// Negative inputs are carried through algebraically; a negative dealer-finance
/// net is a meaningful result, not an error.
pub fn compute_deal_economics(config: &Config) -> DealEconomics {
    let net_financed = config.car_price * config.net_financed_ratio;

    let mx_gross = net_financed * config.mx_margin_rate;
    let dealer_share = mx_gross * config.dealer_share_rate;
    let mx_net = mx_gross - dealer_share;

    let dealer_brokerage = net_financed * config.dealer_brokerage_rate;
    let mx_fee_with_tax = config.mx_fee_per_deal * (1.0 + config.tax_rate);

    // Metal margin only lands on new-car sales, not conversions or refinances.
    let total_add_ons = config.aftermarket_margin
        + config.insurance_margin
        + config.metal_margin * config.new_sales_share;

    let dealer_finance_costs =
        config.commission_per_deal + config.other_costs_per_deal + mx_fee_with_tax;
    let dealer_finance_net = dealer_brokerage + total_add_ons - dealer_finance_costs;

    let referral_mix = config.referral_mix;
    let dealer_finance_mix = 1.0 - referral_mix;
    let dealer_revenue_per_new_deal =
        referral_mix * (dealer_share + total_add_ons) + dealer_finance_mix * dealer_finance_net;
    let mx_revenue_per_new_deal = referral_mix * mx_net + dealer_finance_mix * mx_fee_with_tax;

    DealEconomics {
        net_financed,
        mx_gross,
        dealer_share,
        mx_net,
        dealer_brokerage,
        mx_fee_with_tax,
        total_add_ons,
        dealer_finance_costs,
        dealer_finance_net,
        dealer_revenue_per_new_deal,
        mx_revenue_per_new_deal,
    }
}
