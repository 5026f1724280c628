//! Gateway Wire Types
//!
//! Serde types for the gateway's local REST API and streaming channel, plus
//! the conversions into domain types.
//!
//! # Snapshot Fields
//!
//! Quote snapshots and push updates use numeric field tags:
//!
//! | Tag | Meaning |
//! |---|---|
//! | `31` | last price |
//! | `84` | bid |
//! | `86` | ask |
//! | `87` | volume |
//! | `70` | session high |
//! | `71` | session low |
//! | `7741` | prior close |
//!
//! Values arrive as strings that may carry a `C` (closing) or `H` (halted)
//! prefix and a `K`/`M`/`B` magnitude suffix, e.g. `"C189.25"` or `"1.2M"`.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::account::{AccountInfo, AccountSummary, Position};
use crate::domain::market::{Symbol, Tick};
use crate::domain::order::{OrderRequest, WorkingOrder};

/// Field tags requested on every snapshot and push subscription.
pub const SNAPSHOT_FIELDS: [&str; 7] = ["31", "84", "86", "87", "70", "71", "7741"];

const FIELD_LAST: &str = "31";
const FIELD_BID: &str = "84";
const FIELD_ASK: &str = "86";
const FIELD_VOLUME: &str = "87";
const FIELD_HIGH: &str = "70";
const FIELD_LOW: &str = "71";
const FIELD_CLOSE: &str = "7741";

// =============================================================================
// Value Helpers
// =============================================================================

/// Parse a snapshot field value.
///
/// Accepts JSON numbers and strings with the gateway's prefix and suffix
/// decorations. Returns `None` for blanks and unparseable values.
#[must_use]
pub fn parse_field_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decorated(s),
        _ => None,
    }
}

fn parse_decorated(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim().replace(',', "");
    let body = trimmed
        .strip_prefix('C')
        .or_else(|| trimmed.strip_prefix('H'))
        .unwrap_or(&trimmed);

    let (digits, scale) = match body.chars().last()? {
        'K' => (&body[..body.len() - 1], Decimal::from(1_000)),
        'M' => (&body[..body.len() - 1], Decimal::from(1_000_000)),
        'B' => (&body[..body.len() - 1], Decimal::from(1_000_000_000)),
        _ => (body, Decimal::ONE),
    };

    parse_decimal(digits).and_then(|value| value.checked_mul(scale))
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .ok()
        .or_else(|| Decimal::from_scientific(raw).ok())
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Session
// =============================================================================

/// `POST /tickle` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickleResponse {
    /// Session token used to authenticate the streaming channel.
    #[serde(default)]
    pub session: Option<String>,
    /// Brokerage session status.
    #[serde(default)]
    pub iserver: Option<IserverStatus>,
}

/// Brokerage session block of the tickle response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IserverStatus {
    /// Authentication flags.
    #[serde(rename = "authStatus", default)]
    pub auth_status: Option<AuthStatus>,
}

/// Authentication flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthStatus {
    /// Brokerage session authenticated.
    #[serde(default)]
    pub authenticated: bool,
    /// Gateway connected to the brokerage.
    #[serde(default)]
    pub connected: bool,
}

impl TickleResponse {
    /// Whether the brokerage session is authenticated.
    #[must_use]
    pub fn authenticated(&self) -> bool {
        self.iserver
            .as_ref()
            .and_then(|i| i.auth_status.as_ref())
            .is_some_and(|a| a.authenticated)
    }
}

// =============================================================================
// Accounts and Portfolio
// =============================================================================

/// Entry of `GET /portfolio/accounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireAccount {
    /// Account id.
    #[serde(rename = "accountId", alias = "id")]
    pub account_id: String,
    /// Base currency.
    #[serde(default)]
    pub currency: Option<String>,
}

impl From<WireAccount> for AccountInfo {
    fn from(wire: WireAccount) -> Self {
        Self::new(wire.account_id, wire.currency)
    }
}

/// One value of `GET /portfolio/{id}/summary`.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryValue {
    /// Numeric amount.
    #[serde(default)]
    pub amount: Option<Value>,
    /// Currency of the amount.
    #[serde(default)]
    pub currency: Option<String>,
}

/// `GET /portfolio/{id}/summary`, keyed by lower-case tag.
pub type WireSummary = HashMap<String, SummaryValue>;

/// Build an account summary from the summary tags.
#[must_use]
pub fn summary_from_wire(account_id: &str, summary: &WireSummary) -> AccountSummary {
    let amount = |tag: &str| {
        summary
            .get(tag)
            .and_then(|v| v.amount.as_ref())
            .and_then(parse_field_value)
    };
    let currency = summary
        .get("netliquidation")
        .and_then(|v| v.currency.clone());

    AccountSummary {
        account: AccountInfo::new(account_id, currency),
        net_liquidation: amount("netliquidation"),
        cash: amount("totalcashvalue"),
        buying_power: amount("buyingpower"),
    }
}

/// Entry of `GET /portfolio/{id}/positions/0`.
#[derive(Debug, Clone, Deserialize)]
pub struct WirePosition {
    /// Contract id.
    pub conid: Value,
    /// Contract description.
    #[serde(rename = "contractDesc", default)]
    pub contract_desc: Option<String>,
    /// Position size.
    #[serde(default)]
    pub position: Option<Value>,
    /// Average cost.
    #[serde(rename = "avgCost", default)]
    pub avg_cost: Option<Value>,
    /// Market value.
    #[serde(rename = "mktValue", default)]
    pub mkt_value: Option<Value>,
    /// Unrealized profit and loss.
    #[serde(rename = "unrealizedPnl", default)]
    pub unrealized_pnl: Option<Value>,
    /// Currency.
    #[serde(default)]
    pub currency: Option<String>,
}

impl WirePosition {
    /// Convert to a domain position. Entries without a contract id are skipped.
    #[must_use]
    pub fn into_position(self) -> Option<Position> {
        let conid = value_i64(&self.conid)?;
        Some(Position {
            conid,
            description: self.contract_desc.unwrap_or_default(),
            quantity: self
                .position
                .as_ref()
                .and_then(parse_field_value)
                .unwrap_or_default(),
            average_cost: self.avg_cost.as_ref().and_then(parse_field_value),
            market_value: self.mkt_value.as_ref().and_then(parse_field_value),
            unrealized_pnl: self.unrealized_pnl.as_ref().and_then(parse_field_value),
            currency: self.currency,
        })
    }
}

// =============================================================================
// Orders
// =============================================================================

/// `GET /iserver/account/orders` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireLiveOrders {
    /// Orders known to the gateway.
    #[serde(default)]
    pub orders: Vec<WireLiveOrder>,
}

/// One live order.
#[derive(Debug, Clone, Deserialize)]
pub struct WireLiveOrder {
    /// Order id.
    #[serde(rename = "orderId")]
    pub order_id: Value,
    /// Ticker.
    #[serde(default)]
    pub ticker: Option<String>,
    /// Side.
    #[serde(default)]
    pub side: Option<String>,
    /// Order type.
    #[serde(rename = "orderType", default)]
    pub order_type: Option<String>,
    /// Status.
    #[serde(default)]
    pub status: Option<String>,
    /// Total size.
    #[serde(rename = "totalSize", default)]
    pub total_size: Option<Value>,
    /// Filled quantity.
    #[serde(rename = "filledQuantity", default)]
    pub filled_quantity: Option<Value>,
    /// Limit price.
    #[serde(default)]
    pub price: Option<Value>,
}

impl From<WireLiveOrder> for WorkingOrder {
    fn from(wire: WireLiveOrder) -> Self {
        Self {
            order_id: value_string(&wire.order_id).unwrap_or_default(),
            symbol: wire.ticker.unwrap_or_default(),
            side: wire.side.unwrap_or_default(),
            order_type: wire.order_type.unwrap_or_default(),
            status: wire.status.unwrap_or_default(),
            quantity: wire.total_size.as_ref().and_then(parse_field_value),
            filled: wire.filled_quantity.as_ref().and_then(parse_field_value),
            limit_price: wire.price.as_ref().and_then(parse_field_value),
        }
    }
}

/// `POST /iserver/account/{id}/orders` body.
#[derive(Debug, Clone, Serialize)]
pub struct WireOrderBody {
    /// Orders to submit.
    pub orders: Vec<WireOrder>,
}

/// One submitted order.
#[derive(Debug, Clone, Serialize)]
pub struct WireOrder {
    /// Contract id.
    pub conid: i64,
    /// Client order reference.
    #[serde(rename = "cOID")]
    pub client_order_id: String,
    /// `MKT` or `LMT`.
    #[serde(rename = "orderType")]
    pub order_type: &'static str,
    /// `BUY` or `SELL`.
    pub side: &'static str,
    /// Quantity.
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    /// Limit price.
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<Decimal>,
    /// Time in force.
    pub tif: &'static str,
}

impl WireOrder {
    /// Build a day order for a resolved contract.
    #[must_use]
    pub fn new(conid: i64, client_order_id: String, order: &OrderRequest) -> Self {
        Self {
            conid,
            client_order_id,
            order_type: order.order_type().as_gateway_str(),
            side: order.side().as_gateway_str(),
            quantity: order.quantity(),
            price: order.limit_price(),
            tif: "DAY",
        }
    }
}

/// One element of an order submission or reply response.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireOrderReply {
    /// Order accepted.
    Placed {
        /// Gateway order id.
        order_id: Value,
        /// Order status.
        #[serde(default)]
        order_status: Option<String>,
    },
    /// The gateway asks to confirm warnings before accepting the order.
    Confirm {
        /// Reply id to confirm.
        id: String,
        /// Warning text.
        #[serde(default)]
        message: Vec<String>,
    },
}

/// `POST /iserver/reply/{id}` body.
#[derive(Debug, Clone, Serialize)]
pub struct WireConfirm {
    /// Always true.
    pub confirmed: bool,
}

// =============================================================================
// Contracts
// =============================================================================

/// Entry of `GET /iserver/secdef/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSecdef {
    /// Contract id, sent as a string or a number.
    #[serde(default)]
    pub conid: Option<Value>,
    /// Ticker.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Available security types.
    #[serde(default)]
    pub sections: Vec<WireSection>,
}

/// Security type section of a search result.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSection {
    /// Security type (`STK`, `OPT`, ...).
    #[serde(rename = "secType")]
    pub sec_type: String,
    /// Semicolon separated expiry months (`JAN26;FEB26`).
    #[serde(default)]
    pub months: Option<String>,
}

impl WireSecdef {
    /// Contract id as an integer.
    #[must_use]
    pub fn conid(&self) -> Option<i64> {
        self.conid.as_ref().and_then(value_i64)
    }

    /// Listed option months, in listing order.
    #[must_use]
    pub fn option_months(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| s.sec_type == "OPT")
            .filter_map(|s| s.months.as_deref())
            .flat_map(|m| m.split(';'))
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// `GET /iserver/secdef/strikes` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireStrikes {
    /// Call strikes.
    #[serde(default)]
    pub call: Vec<Value>,
    /// Put strikes.
    #[serde(default)]
    pub put: Vec<Value>,
}

impl WireStrikes {
    /// Parsed call strikes.
    #[must_use]
    pub fn calls(&self) -> Vec<Decimal> {
        self.call.iter().filter_map(parse_field_value).collect()
    }

    /// Parsed put strikes.
    #[must_use]
    pub fn puts(&self) -> Vec<Decimal> {
        self.put.iter().filter_map(parse_field_value).collect()
    }
}

/// Entry of `GET /iserver/secdef/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireContractInfo {
    /// Option contract id.
    pub conid: Value,
    /// Expiry as `YYYYMMDD`.
    #[serde(rename = "maturityDate", default)]
    pub maturity_date: Option<String>,
}

impl WireContractInfo {
    /// Contract id if this contract expires on `expiry`.
    #[must_use]
    pub fn conid_for(&self, expiry: NaiveDate) -> Option<i64> {
        let maturity = NaiveDate::parse_from_str(self.maturity_date.as_deref()?, "%Y%m%d").ok()?;
        (maturity == expiry).then(|| value_i64(&self.conid)).flatten()
    }
}

/// Gateway month code for an expiry (`2026-01-16` becomes `JAN26`).
#[must_use]
pub fn option_month(expiry: NaiveDate) -> String {
    expiry.format("%b%y").to_string().to_ascii_uppercase()
}

// =============================================================================
// Market Data
// =============================================================================

/// One row of a snapshot response or one push update.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMarketRow {
    /// Contract id.
    #[serde(default)]
    pub conid: Option<Value>,
    /// Push topic (`smd+{conid}`), absent on snapshots.
    #[serde(default)]
    pub topic: Option<String>,
    /// Tagged field values.
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl WireMarketRow {
    /// Contract id as an integer.
    #[must_use]
    pub fn conid(&self) -> Option<i64> {
        self.conid.as_ref().and_then(value_i64)
    }

    /// Overlay the fields present in this row onto `tick`.
    ///
    /// Push updates only carry changed fields, so absent tags keep their
    /// previous values.
    pub fn apply_to(&self, tick: &mut Tick, timestamp: DateTime<Utc>) {
        let field = |tag: &str| self.fields.get(tag).and_then(parse_field_value);
        if let Some(v) = field(FIELD_LAST) {
            tick.last = Some(v);
        }
        if let Some(v) = field(FIELD_BID) {
            tick.bid = Some(v);
        }
        if let Some(v) = field(FIELD_ASK) {
            tick.ask = Some(v);
        }
        if let Some(v) = field(FIELD_VOLUME) {
            tick.volume = Some(v);
        }
        if let Some(v) = field(FIELD_HIGH) {
            tick.high = Some(v);
        }
        if let Some(v) = field(FIELD_LOW) {
            tick.low = Some(v);
        }
        if let Some(v) = field(FIELD_CLOSE) {
            tick.close = Some(v);
        }
        tick.timestamp = timestamp;
    }

    /// Build a fresh tick from this row.
    #[must_use]
    pub fn to_tick(&self, symbol: Symbol, timestamp: DateTime<Utc>) -> Tick {
        let mut tick = Tick::empty(symbol, timestamp);
        self.apply_to(&mut tick, timestamp);
        tick
    }
}

/// Parse a push channel text frame into a market data update.
///
/// Returns `None` for heartbeats, system messages and anything that is not a
/// `smd` topic.
#[must_use]
pub fn parse_push_update(text: &str) -> Option<(i64, WireMarketRow)> {
    let row: WireMarketRow = serde_json::from_str(text).ok()?;
    let topic = row.topic.as_deref()?;
    let from_topic = topic.strip_prefix("smd+").and_then(|c| c.parse().ok());
    let conid = row.conid().or(from_topic)?;
    Some((conid, row))
}

/// Push channel subscribe message for a contract.
#[must_use]
pub fn push_subscribe(conid: i64) -> String {
    let fields = serde_json::json!({ "fields": SNAPSHOT_FIELDS });
    format!("smd+{conid}+{fields}")
}

/// Push channel unsubscribe message for a contract.
#[must_use]
pub fn push_unsubscribe(conid: i64) -> String {
    format!("umd+{conid}+{{}}")
}

/// Push channel keepalive.
pub const PUSH_HEARTBEAT: &str = "tic";

/// Error body shape used by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    /// Error text.
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!("189.25"), Some(dec!(189.25)); "plain")]
    #[test_case(json!("C189.25"), Some(dec!(189.25)); "closing prefix")]
    #[test_case(json!("H12.5"), Some(dec!(12.5)); "halted prefix")]
    #[test_case(json!("1.2M"), Some(dec!(1200000)); "millions")]
    #[test_case(json!("850K"), Some(dec!(850000)); "thousands")]
    #[test_case(json!("1,234.5"), Some(dec!(1234.5)); "thousands separator")]
    #[test_case(json!(42.5), Some(dec!(42.5)); "number")]
    #[test_case(json!(""), None; "blank")]
    #[test_case(json!("n/a"), None; "garbage")]
    #[test_case(json!(null), None; "null")]
    fn field_values(raw: Value, expected: Option<Decimal>) {
        assert_eq!(parse_field_value(&raw), expected);
    }

    #[test]
    fn tickle_authenticated() {
        let raw = json!({
            "session": "abc123",
            "iserver": {"authStatus": {"authenticated": true, "connected": true}}
        });
        let tickle: TickleResponse = serde_json::from_value(raw).unwrap();
        assert!(tickle.authenticated());
        assert_eq!(tickle.session.as_deref(), Some("abc123"));

        let bare: TickleResponse = serde_json::from_value(json!({})).unwrap();
        assert!(!bare.authenticated());
    }

    #[test]
    fn snapshot_row_to_tick() {
        let row: WireMarketRow = serde_json::from_value(json!({
            "conid": 265_598,
            "31": "C189.25",
            "84": "189.20",
            "86": "189.30",
            "87": "52.1M",
            "_updated": 1_700_000_000_000_i64
        }))
        .unwrap();
        let now = Utc::now();
        let tick = row.to_tick(Symbol::parse("AAPL").unwrap(), now);

        assert_eq!(row.conid(), Some(265_598));
        assert_eq!(tick.last, Some(dec!(189.25)));
        assert_eq!(tick.bid, Some(dec!(189.20)));
        assert_eq!(tick.ask, Some(dec!(189.30)));
        assert_eq!(tick.volume, Some(dec!(52100000)));
        assert_eq!(tick.high, None);
    }

    #[test]
    fn push_update_merges_changed_fields() {
        let (conid, row) =
            parse_push_update(r#"{"topic":"smd+265598","conid":265598,"84":"190.00"}"#).unwrap();
        assert_eq!(conid, 265_598);

        let mut tick = Tick::empty(Symbol::parse("AAPL").unwrap(), Utc::now());
        tick.ask = Some(dec!(190.10));
        row.apply_to(&mut tick, Utc::now());
        assert_eq!(tick.bid, Some(dec!(190.00)));
        assert_eq!(tick.ask, Some(dec!(190.10)));
    }

    #[test]
    fn push_non_market_frames_ignored() {
        assert!(parse_push_update(r#"{"topic":"system","hb":1}"#).is_none());
        assert!(parse_push_update("tic").is_none());
    }

    #[test]
    fn push_messages() {
        assert_eq!(
            push_subscribe(8314),
            r#"smd+8314+{"fields":["31","84","86","87","70","71","7741"]}"#
        );
        assert_eq!(push_unsubscribe(8314), "umd+8314+{}");
    }

    #[test]
    fn secdef_option_months() {
        let secdef: WireSecdef = serde_json::from_value(json!({
            "conid": "265598",
            "symbol": "AAPL",
            "sections": [
                {"secType": "STK"},
                {"secType": "OPT", "months": "JAN26;FEB26;MAR26"}
            ]
        }))
        .unwrap();
        assert_eq!(secdef.conid(), Some(265_598));
        assert_eq!(secdef.option_months(), vec!["JAN26", "FEB26", "MAR26"]);
    }

    #[test]
    fn option_month_codes() {
        let expiry = NaiveDate::from_ymd_opt(2026, 1, 16).unwrap();
        assert_eq!(option_month(expiry), "JAN26");
    }

    #[test]
    fn contract_info_matches_expiry() {
        let info: WireContractInfo =
            serde_json::from_value(json!({"conid": 7001, "maturityDate": "20260116"})).unwrap();
        let expiry = NaiveDate::from_ymd_opt(2026, 1, 16).unwrap();
        assert_eq!(info.conid_for(expiry), Some(7001));
        assert_eq!(info.conid_for(expiry.succ_opt().unwrap()), None);
    }

    #[test]
    fn order_replies() {
        let placed: Vec<WireOrderReply> =
            serde_json::from_value(json!([{"order_id": "1234", "order_status": "Submitted"}]))
                .unwrap();
        assert!(matches!(&placed[0], WireOrderReply::Placed { order_status: Some(s), .. } if s == "Submitted"));

        let confirm: Vec<WireOrderReply> = serde_json::from_value(json!([
            {"id": "a1b2", "message": ["Order price exceeds the 3% constraint"]}
        ]))
        .unwrap();
        assert!(matches!(&confirm[0], WireOrderReply::Confirm { id, .. } if id == "a1b2"));
    }

    #[test]
    fn summary_tags() {
        let summary: WireSummary = serde_json::from_value(json!({
            "netliquidation": {"amount": 100_000.5, "currency": "USD"},
            "totalcashvalue": {"amount": 25_000},
            "buyingpower": {"amount": 400_000}
        }))
        .unwrap();
        let result = summary_from_wire("DU123", &summary);
        assert_eq!(result.net_liquidation, Some(dec!(100000.5)));
        assert_eq!(result.cash, Some(dec!(25000)));
        assert_eq!(result.account.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn positions_without_conid_skipped() {
        let position: WirePosition = serde_json::from_value(json!({
            "conid": null, "contractDesc": "???", "position": 1
        }))
        .unwrap();
        assert!(position.into_position().is_none());
    }
}
