// Care-Gap Dashboard - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod config;
pub mod db;
pub mod recent;

// Server-only modules (axum handlers, auth, extraction client)
#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod auth;
#[cfg(feature = "server")]
pub mod error;
#[cfg(feature = "server")]
pub mod extract;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    delete_row, fetch_table, get_earnings, get_gap_closures, get_outreach, get_priority_gaps,
    get_risk_scores, insert_gap_closure, insert_gap_closures, insert_outreach,
    insert_priority_gap, insert_risk_score, load_gap_closure_csv, setup_database, EarningsRow,
    GapClosureRow, NewGapClosure, NewPriorityGap, OutreachRow, PriorityGapRow, RiskScoreRow,
    TableName,
};
pub use recent::{resolve_recent_period, Month, RecentPeriod, DEFAULT_LOOKBACK_MONTHS};

#[cfg(feature = "server")]
pub use api::{build_router, AppState};
#[cfg(feature = "server")]
pub use error::AppError;
#[cfg(feature = "server")]
pub use extract::{ExtractorClient, GapMetrics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
