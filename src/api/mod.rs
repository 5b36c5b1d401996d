use axum::{
    Router,
    extract::{Json, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{
    Config, DealEconomics, MonthRecord, Projection, ProjectionSummary, ScenarioPreset,
    YearSummary, run_projection,
};
use crate::session::{
    InMemorySnapshotStore, OpenSessions, SessionProvider, Snapshot, SnapshotStore,
    StaticTokenSessions,
};

pub const API_TOKENS_ENV: &str = "FORECAST_API_TOKENS";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliPreset {
    Standard,
    SplitTerm,
}

impl From<CliPreset> for ScenarioPreset {
    fn from(value: CliPreset) -> Self {
        match value {
            CliPreset::Standard => ScenarioPreset::Standard,
            CliPreset::SplitTerm => ScenarioPreset::SplitTerm,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPreset {
    #[serde(alias = "default")]
    Standard,
    #[serde(alias = "splitTerm", alias = "split_term", alias = "report")]
    SplitTerm,
}

impl From<ApiPreset> for CliPreset {
    fn from(value: ApiPreset) -> Self {
        match value {
            ApiPreset::Standard => CliPreset::Standard,
            ApiPreset::SplitTerm => CliPreset::SplitTerm,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    car_price: Option<f64>,
    deal_mix_pct: Option<f64>,
    dealer_brokerage_pct: Option<f64>,
    bm_commission: Option<f64>,
    other_costs: Option<f64>,
    aftermarket_margin: Option<f64>,
    insurance_margin: Option<f64>,
    deal_margin: Option<f64>,
    new_sales_pct: Option<f64>,

    monthly_intros: Option<f64>,
    avg_employees: Option<f64>,
    #[serde(rename = "additionalNLRate", alias = "additionalNlRate")]
    additional_nl_rate: Option<f64>,
    repeat_rate: Option<f64>,
    hot_lead_rate: Option<f64>,

    preset: Option<ApiPreset>,
    save_snapshot: Option<bool>,
}

#[derive(Parser, Debug)]
#[command(
    name = "dealer-forecast",
    about = "60-month dealer referral forecast (deal economics + employer cohort simulation)"
)]
struct Cli {
    #[arg(
        long,
        default_value_t = 65_000.0,
        help = "Vehicle price; the full amount is financed"
    )]
    car_price: f64,
    #[arg(
        long,
        default_value_t = 50.0,
        help = "Share of deals written as referrals in percent; the rest are dealer-financed"
    )]
    deal_mix_pct: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Dealer brokerage on dealer-financed deals in percent of amount financed"
    )]
    dealer_brokerage_pct: f64,
    #[arg(
        long,
        default_value_t = 300.0,
        help = "Business manager commission per dealer-financed deal"
    )]
    bm_commission: f64,
    #[arg(long, default_value_t = 0.0)]
    other_costs: f64,
    #[arg(long, default_value_t = 0.0)]
    aftermarket_margin: f64,
    #[arg(long, default_value_t = 200.0)]
    insurance_margin: f64,
    #[arg(
        long,
        default_value_t = 1_200.0,
        help = "Metal margin on a new-car sale, weighted by --new-sales-pct"
    )]
    deal_margin: f64,
    #[arg(long, default_value_t = 60.0, help = "Share of deals that are new-car sales in percent")]
    new_sales_pct: f64,
    #[arg(long, default_value_t = 5.0, help = "Deals introduced by the dealer each month")]
    monthly_intros: f64,
    #[arg(long, default_value_t = 20.0, help = "Average employees per signed employer")]
    avg_employees: f64,
    #[arg(
        long = "additional-nl-rate",
        default_value_t = 3.0,
        help = "Monthly organic conversion of active employees in percent"
    )]
    additional_nl_rate: f64,
    #[arg(
        long,
        default_value_t = 70.0,
        help = "Maturing leases that return as repeat deals in percent"
    )]
    repeat_rate: f64,
    #[arg(
        long,
        default_value_t = 80.0,
        help = "Maturing leases that surface as hot leads in percent"
    )]
    hot_lead_rate: f64,
    #[arg(
        long,
        value_enum,
        default_value_t = CliPreset::Standard,
        help = "Employer schedule and lease maturity model"
    )]
    preset: CliPreset,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("--{flag} must be a finite number")]
    NotFinite { flag: &'static str },
    #[error("--{flag} must be between {min} and {max}")]
    OutOfRange {
        flag: &'static str,
        min: f64,
        max: f64,
    },
    #[error("--{flag} must be >= 0")]
    Negative { flag: &'static str },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to encode projection: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug)]
struct ApiOptions {
    save_snapshot: bool,
}

#[derive(Debug)]
struct ApiRequest {
    config: Config,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    preset: ScenarioPreset,
    economics: DealEconomics,
    summary: ProjectionSummary,
    years: Vec<YearSummary>,
    months: Vec<MonthRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct SnapshotListResponse {
    snapshots: Vec<Snapshot>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<dyn SessionProvider>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl AppState {
    pub fn new(sessions: Arc<dyn SessionProvider>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            sessions,
            snapshots,
        }
    }

    /// Uses static bearer tokens from `FORECAST_API_TOKENS` when set, open access otherwise.
    pub fn from_env() -> Self {
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let tokens = std::env::var(API_TOKENS_ENV)
            .map(|list| StaticTokenSessions::from_token_list(&list))
            .unwrap_or_default();
        if tokens.is_empty() {
            warn!("{API_TOKENS_ENV} not set; serving projections without authentication");
            return Self::new(Arc::new(OpenSessions), snapshots);
        }
        Self::new(Arc::new(tokens), snapshots)
    }
}

fn check_finite(flag: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::NotFinite { flag })
    }
}

fn non_negative(flag: &'static str, value: f64) -> Result<f64, ConfigError> {
    if check_finite(flag, value)? < 0.0 {
        return Err(ConfigError::Negative { flag });
    }
    Ok(value)
}

fn percent_to_fraction(flag: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !(0.0..=100.0).contains(&check_finite(flag, value)?) {
        return Err(ConfigError::OutOfRange {
            flag,
            min: 0.0,
            max: 100.0,
        });
    }
    Ok(value / 100.0)
}

fn build_config(cli: Cli) -> Result<Config, ConfigError> {
    let mut config = Config::with_preset(cli.preset.into());

    config.car_price = non_negative("car-price", cli.car_price)?;
    config.referral_mix = percent_to_fraction("deal-mix-pct", cli.deal_mix_pct)?;
    config.dealer_brokerage_rate =
        percent_to_fraction("dealer-brokerage-pct", cli.dealer_brokerage_pct)?;
    config.commission_per_deal = non_negative("bm-commission", cli.bm_commission)?;
    config.other_costs_per_deal = non_negative("other-costs", cli.other_costs)?;
    config.aftermarket_margin = non_negative("aftermarket-margin", cli.aftermarket_margin)?;
    config.insurance_margin = non_negative("insurance-margin", cli.insurance_margin)?;
    config.metal_margin = non_negative("deal-margin", cli.deal_margin)?;
    config.new_sales_share = percent_to_fraction("new-sales-pct", cli.new_sales_pct)?;

    config.monthly_intros = non_negative("monthly-intros", cli.monthly_intros)?;
    config.avg_employees_per_employer = non_negative("avg-employees", cli.avg_employees)?;
    config.organic_conversion_rate =
        percent_to_fraction("additional-nl-rate", cli.additional_nl_rate)?;
    config.repeat_rate = percent_to_fraction("repeat-rate", cli.repeat_rate)?;
    config.hot_lead_rate = percent_to_fraction("hot-lead-rate", cli.hot_lead_rate)?;

    Ok(config)
}

/// Parses forecast flags and returns the projection as pretty-printed JSON.
pub fn run_cli<I, T>(args: I) -> Result<String, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let config = build_config(cli)?;
    let projection = run_projection(&config);
    info!(
        preset = ?projection.preset,
        total_dealer_revenue = projection.summary.total_dealer_revenue,
        "projection computed"
    );
    let response = build_simulate_response(projection, None);
    Ok(serde_json::to_string_pretty(&response)?)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/snapshots", get(snapshots_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState::from_env());

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "forecast HTTP API listening");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, &headers, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(&state, &headers, payload).await
}

async fn simulate_handler_impl(
    state: &AppState,
    headers: &HeaderMap,
    payload: SimulatePayload,
) -> Response {
    let session = match state.sessions.resolve(bearer_token(headers)) {
        Ok(session) => session,
        Err(err) => {
            warn!(%err, "rejected simulate request");
            return error_response(StatusCode::UNAUTHORIZED, &err.to_string());
        }
    };

    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let projection = run_projection(&request.config);
    let snapshot_id = if request.options.save_snapshot {
        let snapshot = Snapshot::capture(session.clone(), &request.config, &projection);
        let id = snapshot.id;
        persist_in_background(Arc::clone(&state.snapshots), snapshot);
        Some(id)
    } else {
        None
    };

    info!(
        %session,
        preset = ?projection.preset,
        months = projection.months.len(),
        ?snapshot_id,
        "projection served"
    );
    json_response(StatusCode::OK, build_simulate_response(projection, snapshot_id))
}

async fn snapshots_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match state.sessions.resolve(bearer_token(&headers)) {
        Ok(session) => session,
        Err(err) => return error_response(StatusCode::UNAUTHORIZED, &err.to_string()),
    };

    match state.snapshots.list(&session) {
        Ok(snapshots) => json_response(StatusCode::OK, SnapshotListResponse { snapshots }),
        Err(err) => {
            warn!(%err, %session, "snapshot listing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

/// Hands the snapshot to the store without awaiting it.
fn persist_in_background(store: Arc<dyn SnapshotStore>, snapshot: Snapshot) {
    tokio::spawn(async move {
        let id = snapshot.id;
        if let Err(err) = store.save(snapshot) {
            warn!(%err, %id, "snapshot save failed");
        }
    });
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
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
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload).map_err(|e| e.to_string())
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, ConfigError> {
    let mut cli = default_cli_for_api();
    let options = ApiOptions {
        save_snapshot: payload.save_snapshot.unwrap_or(false),
    };

    if let Some(v) = payload.car_price {
        cli.car_price = v;
    }
    if let Some(v) = payload.deal_mix_pct {
        cli.deal_mix_pct = v;
    }
    if let Some(v) = payload.dealer_brokerage_pct {
        cli.dealer_brokerage_pct = v;
    }
    if let Some(v) = payload.bm_commission {
        cli.bm_commission = v;
    }
    if let Some(v) = payload.other_costs {
        cli.other_costs = v;
    }
    if let Some(v) = payload.aftermarket_margin {
        cli.aftermarket_margin = v;
    }
    if let Some(v) = payload.insurance_margin {
        cli.insurance_margin = v;
    }
    if let Some(v) = payload.deal_margin {
        cli.deal_margin = v;
    }
    if let Some(v) = payload.new_sales_pct {
        cli.new_sales_pct = v;
    }

    if let Some(v) = payload.monthly_intros {
        cli.monthly_intros = v;
    }
    if let Some(v) = payload.avg_employees {
        cli.avg_employees = v;
    }
    if let Some(v) = payload.additional_nl_rate {
        cli.additional_nl_rate = v;
    }
    if let Some(v) = payload.repeat_rate {
        cli.repeat_rate = v;
    }
    if let Some(v) = payload.hot_lead_rate {
        cli.hot_lead_rate = v;
    }
    if let Some(v) = payload.preset {
        cli.preset = v.into();
    }

    let config = build_config(cli)?;
    Ok(ApiRequest { config, options })
}

fn default_cli_for_api() -> Cli {
    Cli {
        car_price: 65_000.0,
        deal_mix_pct: 50.0,
        dealer_brokerage_pct: 4.0,
        bm_commission: 300.0,
        other_costs: 0.0,
        aftermarket_margin: 0.0,
        insurance_margin: 200.0,
        deal_margin: 1_200.0,
        new_sales_pct: 60.0,
        monthly_intros: 5.0,
        avg_employees: 20.0,
        additional_nl_rate: 3.0,
        repeat_rate: 70.0,
        hot_lead_rate: 80.0,
        preset: CliPreset::Standard,
    }
}

fn build_simulate_response(projection: Projection, snapshot_id: Option<Uuid>) -> SimulateResponse {
    SimulateResponse {
        preset: projection.preset,
        economics: projection.economics,
        summary: projection.summary,
        years: projection.years,
        months: projection.months,
        snapshot_id,
    }
}
