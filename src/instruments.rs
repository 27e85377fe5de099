//! Instrument-identity table: maps a canonical instrument symbol to each
//! venue's native identifier. Entries may omit venues that do not list the
//! instrument, or list it only under an irreconcilable denomination such as
//! a times-1000 contract; an absent mapping means the pair skips it.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::Venue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentMapping {
    /// Canonical symbol shared across venues, e.g. `BTC`.
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub binance: Option<String>,
    #[serde(default)]
    pub okx: Option<String>,
    #[serde(default)]
    pub bybit: Option<String>,
    #[serde(default)]
    pub hyperliquid: Option<String>,
}

impl InstrumentMapping {
    pub fn native(&self, venue: Venue) -> Option<&str> {
        match venue {
            Venue::Binance => self.binance.as_deref(),
            Venue::Okx => self.okx.as_deref(),
            Venue::Bybit => self.bybit.as_deref(),
            Venue::Hyperliquid => self.hyperliquid.as_deref(),
        }
    }
}

/// Load the instrument table. An explicitly configured file that fails to
/// load or parse is fatal; with no file configured the built-in majors list
/// is used.
pub fn load_instruments(cfg: &Config) -> Result<Vec<InstrumentMapping>> {
    let Some(path) = &cfg.instruments_path else {
        return Ok(builtin_instruments());
    };

    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Bootstrap(format!("cannot read instrument table {path}: {e}")))?;
    let instruments: Vec<InstrumentMapping> = serde_json::from_str(&raw)
        .map_err(|e| AppError::Bootstrap(format!("cannot parse instrument table {path}: {e}")))?;

    if instruments.is_empty() {
        return Err(AppError::Bootstrap(format!("instrument table {path} is empty")));
    }
    Ok(instruments)
}

/// Native symbols one venue needs subscriptions for.
pub fn venue_symbols(instruments: &[InstrumentMapping], venue: Venue) -> Vec<String> {
    instruments
        .iter()
        .filter_map(|i| i.native(venue).map(|s| s.to_string()))
        .collect()
}

/// The majors listed on all four venues under their usual native spellings.
pub fn builtin_instruments() -> Vec<InstrumentMapping> {
    fn entry(symbol: &str, name: &str) -> InstrumentMapping {
        InstrumentMapping {
            symbol: symbol.to_string(),
            name: name.to_string(),
            binance: Some(format!("{symbol}USDT")),
            okx: Some(format!("{symbol}-USDT-SWAP")),
            bybit: Some(format!("{symbol}USDT")),
            hyperliquid: Some(symbol.to_string()),
        }
    }

    vec![
        entry("BTC", "Bitcoin"),
        entry("ETH", "Ethereum"),
        entry("BNB", "BNB"),
        entry("SOL", "Solana"),
        entry("XRP", "Ripple"),
        entry("ADA", "Cardano"),
        entry("DOGE", "Dogecoin"),
        entry("AVAX", "Avalanche"),
        entry("DOT", "Polkadot"),
        entry("LTC", "Litecoin"),
        entry("LINK", "Chainlink"),
        entry("BCH", "Bitcoin Cash"),
        entry("ATOM", "Cosmos"),
        entry("NEAR", "NEAR Protocol"),
        entry("UNI", "Uniswap"),
        entry("FIL", "Filecoin"),
        entry("APT", "Aptos"),
        entry("SUI", "Sui"),
        entry("ARB", "Arbitrum"),
    ]
}
