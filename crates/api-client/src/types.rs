// In crates/api-client/src/types.rs

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

/// The main client for interacting with the Binance Futures API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The persistent HTTP client.
    pub http_client: Client,
    /// The user's Binance API key.
    pub api_key: String,
    /// The user's Binance secret key.
    pub secret_key: String,
    /// The base URL for the Binance Futures API.
    pub base_url: String,
}

/// Represents the overall futures account state (`GET /fapi/v2/account`).
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    /// The total wallet balance in USDT.
    pub total_wallet_balance: Decimal,
    /// The total unrealized profit and loss in USDT.
    pub total_unrealized_profit: Decimal,
    /// Wallet balance plus unrealized profit.
    pub total_margin_balance: Decimal,
    /// The balance available for new positions in USDT.
    pub available_balance: Decimal,
}

/// One row of `GET /fapi/v2/positionRisk`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    /// Positive for long, negative for short.
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub un_realized_profit: Decimal,
    pub liquidation_price: Decimal,
    /// Leverage is sent as a string (e.g., "10").
    pub leverage: String,
    /// Zero for cross margin.
    #[serde(default)]
    pub isolated_margin: Decimal,
    /// "LONG", "SHORT", or "BOTH".
    pub position_side: String,
}

/// Temporary struct to deserialize the kline response from Binance,
/// which is a JSON array of mixed types.
#[derive(Debug, Deserialize)]
pub struct RawKline(
    pub i64,         // 0: Open time
    pub String,      // 1: Open
    pub String,      // 2: High
    pub String,      // 3: Low
    pub String,      // 4: Close
    pub String,      // 5: Volume
    pub i64,         // 6: Close time
    pub String,      // 7: Quote asset volume
    pub i64,         // 8: Number of trades
    pub String,      // 9: Taker buy base asset volume
    pub String,      // 10: Taker buy quote asset volume
    pub String,      // 11: Ignore
);

/// `GET /fapi/v1/premiumIndex` for one symbol.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndex {
    pub symbol: String,
    pub mark_price: Decimal,
    pub last_funding_rate: Decimal,
}

/// Response of `POST /fapi/v1/order` with `newOrderRespType=RESULT`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    pub side: String, // "BUY" or "SELL"
    pub r#type: String, // "MARKET", "STOP_MARKET", etc.
    #[serde(default)]
    pub avg_price: Decimal, // The actual average fill price
    #[serde(default)]
    pub executed_qty: Decimal, // The actual filled quantity
}

/// Response of `GET /fapi/v1/order`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    pub order_id: i64,
    pub symbol: String,
    /// NEW, PARTIALLY_FILLED, FILLED, CANCELED, REJECTED, EXPIRED, ...
    pub status: String,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
    pub r#type: String,
}

/// One fill from `GET /fapi/v1/userTrades`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserTrade {
    pub order_id: i64,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub realized_pnl: Decimal,
    /// Fill time in milliseconds.
    pub time: i64,
}

/// The subset of `GET /fapi/v1/exchangeInfo` needed for order sizing.
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolSpec>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSpec {
    pub symbol: String,
    pub quantity_precision: u32,
    pub price_precision: u32,
    /// Filters vary in shape by `filterType`, so they are kept loose.
    pub filters: Vec<serde_json::Value>,
}

impl SymbolSpec {
    /// Reads a decimal field from the filter with the given `filterType`.
    pub fn filter_value(&self, filter_type: &str, field: &str) -> Option<Decimal> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(serde_json::Value::as_str) == Some(filter_type))
            .and_then(|f| f.get(field))
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}
