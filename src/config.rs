use crate::error::{AppError, Result};

pub const BINANCE_WS_URL: &str = "wss://fstream.binance.com/ws/!markPrice@arr";
pub const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
pub const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
pub const HYPERLIQUID_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
pub const HYPERLIQUID_INFO_URL: &str = "https://api.hyperliquid.xyz/info";
pub const BINANCE_FAPI_URL: &str = "https://fapi.binance.com";
pub const BYBIT_API_URL: &str = "https://api.bybit.com";

/// Snapshots older than this are rejected by the scorer.
pub const FRESHNESS_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Mark-price ratio band between venues. Outside it the pairing almost
/// certainly crosses a denomination boundary (e.g. a times-1000 contract
/// against its unscaled counterpart) and is rejected, not ranked.
pub const PRICE_RATIO_MIN: f64 = 0.01;
pub const PRICE_RATIO_MAX: f64 = 100.0;

/// Shared evaluation horizon cap in hours. Bounds settlement counts when the
/// two funding intervals are coprime.
pub const MAX_CYCLE_HOURS: u32 = 24;

/// Funding interval assumed when neither metadata nor the wire provides one.
/// Every use is logged; see `metadata::interval_for`.
pub const DEFAULT_FUNDING_INTERVAL_HOURS: u32 = 8;

/// Scoring pass cadence (seconds).
pub const SCORE_INTERVAL_SECS: u64 = 1;

/// Hyperliquid funding rates change hourly; the REST poll refreshes them
/// once a minute.
pub const HYPERLIQUID_FUNDING_POLL_SECS: u64 = 60;

/// Keepalive periods per venue. Binance needs none (server-initiated pings).
pub const OKX_PING_INTERVAL_SECS: u64 = 20;
pub const BYBIT_PING_INTERVAL_SECS: u64 = 20;
pub const HYPERLIQUID_PING_INTERVAL_SECS: u64 = 50;

/// Reconnect backoff: delay = min(base * 2^failures, cap).
pub const RECONNECT_BASE_MS: u64 = 1_000;
pub const RECONNECT_CAP_MS: u64 = 30_000;
/// Hyperliquid's public endpoint drops connections more often; back off
/// from a higher base with a higher cap.
pub const HYPERLIQUID_RECONNECT_BASE_MS: u64 = 5_000;
pub const HYPERLIQUID_RECONNECT_CAP_MS: u64 = 60_000;

pub const HOURS_PER_YEAR: f64 = 8760.0;

/// Opportunities per pair pushed to WebSocket clients; the REST endpoint
/// serves the full list.
pub const WS_BROADCAST_TOP_N: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    /// Position size per leg used for USD income projections (NOTIONAL_USD).
    pub notional_usd: f64,
    /// Per-leg taker fee as a fraction, applied on entry and exit of both
    /// legs (TAKER_FEE_RATE). Default is a conservative worst case.
    pub taker_fee_rate: f64,
    /// Optional path to an instrument-identity JSON file (INSTRUMENTS_PATH).
    /// When unset, the built-in list of majors is used.
    pub instruments_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            notional_usd: std::env::var("NOTIONAL_USD")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<f64>()
                .unwrap_or(100.0),
            taker_fee_rate: std::env::var("TAKER_FEE_RATE")
                .unwrap_or_else(|_| "0.0005".to_string())
                .parse::<f64>()
                .unwrap_or(0.0005),
            instruments_path: std::env::var("INSTRUMENTS_PATH").ok().filter(|s| !s.is_empty()),
        })
    }
}
