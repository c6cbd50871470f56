// In crates/api-client/src/lib.rs

use app_config::types::BinanceSettings;
use chrono::Utc;
use core_types::{Kline, MarginType, Symbol};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;

// Create a type alias for the HMAC-SHA256 implementation.
type HmacSha256 = Hmac<Sha256>;

pub mod error;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use types::*;

/// Binance answers "margin type already set" with this code; it is not a failure.
const NO_NEED_TO_CHANGE_MARGIN_TYPE: i64 = -4046;

impl ApiClient {
    /// Constructs a new ApiClient from BinanceSettings.
    pub fn new(settings: &BinanceSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;
        Ok(ApiClient {
            http_client,
            api_key: settings.api_key.clone(),
            secret_key: settings.secret_key.clone(),
            base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generates an HMAC-SHA256 signature for a given query string.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        let result = mac.finalize();
        hex::encode(result.into_bytes())
    }

    /// Appends the timestamp and the signature to `params`.
    fn create_signed_query(&self, params: &mut String) {
        let timestamp = Utc::now().timestamp_millis();

        if !params.is_empty() {
            params.push('&');
        }
        params.push_str(&format!("timestamp={}", timestamp));

        let signature = self.sign(params);
        params.push_str(&format!("&signature={}", signature));
    }

    /// Sends a signed request. GET and DELETE carry the parameters in the query
    /// string, POST carries them as a form body.
    async fn send_signed<T: DeserializeOwned>(&self, method: Method, path: &str, mut params: String) -> Result<T> {
        self.create_signed_query(&mut params);

        let request = if method == Method::POST {
            self.http_client
                .post(format!("{}{}", self.base_url, path))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(params)
        } else {
            self.http_client
                .request(method, format!("{}{}?{}", self.base_url, path, params))
        };

        let text = request
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Error::RequestFailed)?
            .text()
            .await
            .map_err(Error::RequestFailed)?;

        parse_response(&text)
    }

    async fn send_public<T: DeserializeOwned>(&self, path: &str, params: &str) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, params);
        let text = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(Error::RequestFailed)?
            .text()
            .await
            .map_err(Error::RequestFailed)?;

        parse_response(&text)
    }

    /// Fetches the futures account balances (`GET /fapi/v2/account`).
    pub async fn get_account_balance(&self) -> Result<AccountState> {
        self.send_signed(Method::GET, "/fapi/v2/account", String::new()).await
    }

    /// Fetches every position row (`GET /fapi/v2/positionRisk`), including flat ones.
    pub async fn get_position_risk(&self) -> Result<Vec<PositionRisk>> {
        self.send_signed(Method::GET, "/fapi/v2/positionRisk", String::new()).await
    }

    /// Fetches historical kline (candlestick) data (`GET /fapi/v1/klines`).
    ///
    /// # Arguments
    ///
    /// * `symbol`: The symbol to fetch klines for.
    /// * `interval`: The kline interval (e.g., "1m", "5m", "1h").
    /// * `start_time`: Optional start time in milliseconds.
    /// * `limit`: Optional number of klines to return (max 1500, default 500).
    pub async fn get_historical_klines(
        &self,
        symbol: &Symbol,
        interval: &str,
        start_time: Option<i64>,
        limit: Option<u16>,
    ) -> Result<Vec<Kline>> {
        let mut params = format!("symbol={}&interval={}", symbol.0, interval);

        if let Some(st) = start_time {
            params.push_str(&format!("&startTime={}", st));
        }
        if let Some(l) = limit {
            params.push_str(&format!("&limit={}", l));
        }

        let raw_klines: Vec<RawKline> = self.send_public("/fapi/v1/klines", &params).await?;

        // Convert the RawKlines into our clean, internal Kline type.
        let klines = raw_klines
            .into_iter()
            .map(|raw| Kline {
                open_time: raw.0,
                open: raw.1.parse().unwrap_or_default(),
                high: raw.2.parse().unwrap_or_default(),
                low: raw.3.parse().unwrap_or_default(),
                close: raw.4.parse().unwrap_or_default(),
                volume: raw.5.parse().unwrap_or_default(),
                close_time: raw.6,
            })
            .collect();

        Ok(klines)
    }

    /// Mark price and last funding rate (`GET /fapi/v1/premiumIndex`).
    pub async fn get_premium_index(&self, symbol: &Symbol) -> Result<PremiumIndex> {
        self.send_public("/fapi/v1/premiumIndex", &format!("symbol={}", symbol.0)).await
    }

    /// Trading rules for every symbol (`GET /fapi/v1/exchangeInfo`).
    pub async fn get_exchange_info(&self) -> Result<ExchangeInfo> {
        self.send_public("/fapi/v1/exchangeInfo", "").await
    }

    pub async fn set_leverage(&self, symbol: &Symbol, leverage: u32) -> Result<()> {
        let params = format!("symbol={}&leverage={}", symbol.0, leverage);
        let _: Value = self.send_signed(Method::POST, "/fapi/v1/leverage", params).await?;
        Ok(())
    }

    pub async fn set_margin_type(&self, symbol: &Symbol, margin_type: MarginType) -> Result<()> {
        let params = format!("symbol={}&marginType={}", symbol.0, margin_type.as_exchange_str());
        match self.send_signed::<Value>(Method::POST, "/fapi/v1/marginType", params).await {
            Err(Error::ApiError { code, .. }) if code == NO_NEED_TO_CHANGE_MARGIN_TYPE => Ok(()),
            Err(e) => Err(e),
            Ok(_) => Ok(()),
        }
    }

    /// Places a market order (`POST /fapi/v1/order`).
    ///
    /// The position side is always sent (hedge mode). In hedge mode an order on the
    /// opposite side of `position_side` can only reduce that position, so `reduceOnly`
    /// is implied and must not be sent.
    pub async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: &str,
        position_side: &str,
        quantity: Decimal,
    ) -> Result<NewOrderResponse> {
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&positionSide={}&newOrderRespType=RESULT",
            symbol.0,
            side,
            quantity.normalize(),
            position_side
        );
        self.send_signed(Method::POST, "/fapi/v1/order", params).await
    }

    /// Places a STOP_MARKET or TAKE_PROFIT_MARKET order that triggers on the mark price.
    pub async fn place_conditional_order(
        &self,
        symbol: &Symbol,
        side: &str,
        position_side: &str,
        order_type: &str,
        stop_price: Decimal,
        quantity: Decimal,
    ) -> Result<NewOrderResponse> {
        let params = format!(
            "symbol={}&side={}&type={}&stopPrice={}&quantity={}&positionSide={}&workingType=MARK_PRICE",
            symbol.0,
            side,
            order_type,
            stop_price.normalize(),
            quantity.normalize(),
            position_side
        );
        self.send_signed(Method::POST, "/fapi/v1/order", params).await
    }

    pub async fn cancel_order(&self, symbol: &Symbol, order_id: i64) -> Result<()> {
        let params = format!("symbol={}&orderId={}", symbol.0, order_id);
        let _: Value = self.send_signed(Method::DELETE, "/fapi/v1/order", params).await?;
        Ok(())
    }

    pub async fn get_order(&self, symbol: &Symbol, order_id: i64) -> Result<OrderInfo> {
        let params = format!("symbol={}&orderId={}", symbol.0, order_id);
        self.send_signed(Method::GET, "/fapi/v1/order", params).await
    }

    /// Every fill belonging to one order (`GET /fapi/v1/userTrades`).
    pub async fn get_user_trades(&self, symbol: &Symbol, order_id: i64) -> Result<Vec<UserTrade>> {
        let params = format!("symbol={}&orderId={}", symbol.0, order_id);
        self.send_signed(Method::GET, "/fapi/v1/userTrades", params).await
    }
}

/// Binance returns an error object (`{"code": -2011, "msg": "..."}`) on failure.
/// A few endpoints answer success with `{"code": 200}`.
fn parse_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value: Value = serde_json::from_str(text).map_err(Error::DeserializationFailed)?;

    if let Some(code) = value.get("code").and_then(Value::as_i64) {
        if code != 0 && code != 200 {
            let msg = value.get("msg").and_then(Value::as_str).unwrap_or("Unknown error").to_string();
            return Err(Error::ApiError { code, msg });
        }
    }

    serde_json::from_value(value).map_err(Error::DeserializationFailed)
}

// Free function to allow api_client::new usage
pub fn new(settings: &BinanceSettings) -> Result<ApiClient> {
    ApiClient::new(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_objects_become_api_errors() {
        let err = parse_response::<Value>(r#"{"code":-2011,"msg":"Unknown order sent."}"#).unwrap_err();
        match err {
            Error::ApiError { code, msg } => {
                assert_eq!(code, -2011);
                assert_eq!(msg, "Unknown order sent.");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn success_code_200_is_not_an_error() {
        let value = parse_response::<Value>(r#"{"code":200,"msg":"success"}"#).unwrap();
        assert_eq!(value["msg"], "success");
    }

    #[test]
    fn order_info_parses_string_decimals() {
        let info: OrderInfo = parse_response(
            r#"{"orderId":42,"symbol":"BTCUSDT","status":"FILLED","avgPrice":"95000.10","executedQty":"0.010","type":"STOP_MARKET"}"#,
        )
        .unwrap();
        assert_eq!(info.order_id, 42);
        assert_eq!(info.status, "FILLED");
        assert_eq!(info.executed_qty.to_string(), "0.010");
    }

    #[test]
    fn lot_size_filter_is_read_from_exchange_info() {
        let spec: SymbolSpec = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","quantityPrecision":3,"pricePrecision":1,"filters":[
                {"filterType":"PRICE_FILTER","tickSize":"0.10"},
                {"filterType":"LOT_SIZE","stepSize":"0.001","minQty":"0.001"},
                {"filterType":"MIN_NOTIONAL","notional":"100"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.filter_value("LOT_SIZE", "stepSize").unwrap().to_string(), "0.001");
        assert_eq!(spec.filter_value("MIN_NOTIONAL", "notional").unwrap().to_string(), "100");
        assert!(spec.filter_value("MARKET_LOT_SIZE", "stepSize").is_none());
    }
}
