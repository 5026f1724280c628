//! Order Requests
//!
//! Raw order payloads as received from clients and the validated order
//! requests built from them. Validation runs before any upstream call and
//! reports the first offending field.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::Symbol;

// =============================================================================
// Enumerations
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy to open or close.
    Buy,
    /// Sell to open or close.
    Sell,
}

impl OrderSide {
    /// Parse a side, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Gateway wire value.
    #[must_use]
    pub const fn as_gateway_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
}

impl OrderType {
    /// Parse an order type. Accepts `MKT`/`LMT` and `market`/`limit`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mkt" | "market" => Some(Self::Market),
            "lmt" | "limit" => Some(Self::Limit),
            _ => None,
        }
    }

    /// Gateway wire value.
    #[must_use]
    pub const fn as_gateway_str(&self) -> &'static str {
        match self {
            Self::Market => "MKT",
            Self::Limit => "LMT",
        }
    }
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionRight {
    /// Parse a right. Accepts `C`/`P` and `call`/`put`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "c" | "call" => Some(Self::Call),
            "p" | "put" => Some(Self::Put),
            _ => None,
        }
    }

    /// Gateway wire value.
    #[must_use]
    pub const fn as_gateway_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

// =============================================================================
// Raw Payloads
// =============================================================================

/// Stock order body as sent by clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockOrderPayload {
    /// Ticker symbol.
    pub symbol: Option<String>,
    /// Share quantity.
    pub quantity: Option<Decimal>,
    /// `buy` or `sell`.
    #[serde(alias = "action")]
    pub side: Option<String>,
    /// `MKT`/`LMT`; market when omitted.
    pub order_type: Option<String>,
    /// Required for limit orders.
    pub limit_price: Option<Decimal>,
}

/// Option order body as sent by clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionOrderPayload {
    /// Underlying symbol.
    pub symbol: Option<String>,
    /// Expiry as `YYYYMMDD` or `YYYY-MM-DD`.
    pub expiry: Option<String>,
    /// Strike price.
    pub strike: Option<Decimal>,
    /// `C`/`P`.
    pub right: Option<String>,
    /// Contract quantity.
    pub quantity: Option<Decimal>,
    /// `buy` or `sell`.
    #[serde(alias = "action")]
    pub side: Option<String>,
    /// `MKT`/`LMT`; market when omitted.
    pub order_type: Option<String>,
    /// Required for limit orders.
    pub limit_price: Option<Decimal>,
}

// =============================================================================
// Validated Orders
// =============================================================================

/// A validated equity order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockOrder {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Share quantity, strictly positive.
    pub quantity: Decimal,
    /// Side.
    pub side: OrderSide,
    /// Market or limit.
    pub order_type: OrderType,
    /// Limit price for limit orders.
    pub limit_price: Option<Decimal>,
}

/// A validated single-leg option order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionOrder {
    /// Underlying symbol.
    pub symbol: Symbol,
    /// Expiry date, not in the past.
    pub expiry: NaiveDate,
    /// Strike price, strictly positive.
    pub strike: Decimal,
    /// Call or put.
    pub right: OptionRight,
    /// Contract quantity, strictly positive.
    pub quantity: Decimal,
    /// Side.
    pub side: OrderSide,
    /// Market or limit.
    pub order_type: OrderType,
    /// Limit price for limit orders.
    pub limit_price: Option<Decimal>,
}

/// A validated order, transient for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "asset", rename_all = "lowercase")]
pub enum OrderRequest {
    /// Equity order.
    Stock(StockOrder),
    /// Option order.
    Option(OptionOrder),
}

impl OrderRequest {
    /// Symbol (or underlying) of the order.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Stock(order) => &order.symbol,
            Self::Option(order) => &order.symbol,
        }
    }

    /// Quantity of the order.
    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        match self {
            Self::Stock(order) => order.quantity,
            Self::Option(order) => order.quantity,
        }
    }

    /// Side of the order.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        match self {
            Self::Stock(order) => order.side,
            Self::Option(order) => order.side,
        }
    }

    /// Type of the order.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        match self {
            Self::Stock(order) => order.order_type,
            Self::Option(order) => order.order_type,
        }
    }

    /// Limit price, if any.
    #[must_use]
    pub const fn limit_price(&self) -> Option<Decimal> {
        match self {
            Self::Stock(order) => order.limit_price,
            Self::Option(order) => order.limit_price,
        }
    }
}

/// Gateway acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Gateway order id.
    pub order_id: String,
    /// Client order reference sent with the order.
    pub client_order_id: String,
    /// Order status as reported by the gateway.
    pub status: String,
    /// Warnings or confirmation prompts returned instead of an id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

/// An order currently known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingOrder {
    /// Gateway order id.
    pub order_id: String,
    /// Ticker or contract description.
    pub symbol: String,
    /// Side as reported by the gateway.
    pub side: String,
    /// Order type as reported by the gateway.
    pub order_type: String,
    /// Gateway status.
    pub status: String,
    /// Total quantity.
    pub quantity: Option<Decimal>,
    /// Filled quantity.
    pub filled: Option<Decimal>,
    /// Limit price, if any.
    pub limit_price: Option<Decimal>,
}

/// Validation failure naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct OrderValidationError {
    /// Field that failed validation.
    pub field: &'static str,
    /// Human-readable reason.
    pub message: String,
}

impl OrderValidationError {
    /// Create a validation error.
    #[must_use]
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl StockOrderPayload {
    /// Validate into a stock order.
    ///
    /// # Errors
    ///
    /// Returns the first field that fails validation.
    pub fn validate(self) -> Result<OrderRequest, OrderValidationError> {
        let symbol = parse_symbol(self.symbol.as_deref())?;
        let quantity = parse_quantity(self.quantity)?;
        let side = parse_side(self.side.as_deref())?;
        let (order_type, limit_price) =
            parse_pricing(self.order_type.as_deref(), self.limit_price)?;

        Ok(OrderRequest::Stock(StockOrder {
            symbol,
            quantity,
            side,
            order_type,
            limit_price,
        }))
    }
}

impl OptionOrderPayload {
    /// Validate into an option order. `today` bounds the expiry.
    ///
    /// # Errors
    ///
    /// Returns the first field that fails validation.
    pub fn validate(self, today: NaiveDate) -> Result<OrderRequest, OrderValidationError> {
        let symbol = parse_symbol(self.symbol.as_deref())?;
        let quantity = parse_quantity(self.quantity)?;
        let side = parse_side(self.side.as_deref())?;
        let expiry = parse_expiry(
            self.expiry
                .as_deref()
                .ok_or_else(|| OrderValidationError::new("expiry", "is required"))?,
            today,
        )?;

        let strike = match self.strike {
            Some(strike) if strike > Decimal::ZERO => strike,
            Some(_) => return Err(OrderValidationError::new("strike", "must be greater than 0")),
            None => return Err(OrderValidationError::new("strike", "is required")),
        };

        let right = self
            .right
            .as_deref()
            .ok_or_else(|| OrderValidationError::new("right", "is required"))
            .and_then(|raw| {
                OptionRight::parse(raw)
                    .ok_or_else(|| OrderValidationError::new("right", "must be one of C, P"))
            })?;

        let (order_type, limit_price) =
            parse_pricing(self.order_type.as_deref(), self.limit_price)?;

        Ok(OrderRequest::Option(OptionOrder {
            symbol,
            expiry,
            strike,
            right,
            quantity,
            side,
            order_type,
            limit_price,
        }))
    }
}

/// Parse an expiry in `YYYYMMDD` or `YYYY-MM-DD` form, rejecting past dates.
///
/// # Errors
///
/// Returns an `expiry` validation error for malformed or past dates.
pub fn parse_expiry(raw: &str, today: NaiveDate) -> Result<NaiveDate, OrderValidationError> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| {
            OrderValidationError::new("expiry", format!("'{raw}' is not a YYYYMMDD date"))
        })?;

    if date < today {
        return Err(OrderValidationError::new(
            "expiry",
            format!("{date} is in the past"),
        ));
    }

    Ok(date)
}

fn parse_symbol(raw: Option<&str>) -> Result<Symbol, OrderValidationError> {
    let raw = raw.ok_or_else(|| OrderValidationError::new("symbol", "is required"))?;
    Symbol::parse(raw).map_err(|e| OrderValidationError::new("symbol", e.to_string()))
}

fn parse_quantity(quantity: Option<Decimal>) -> Result<Decimal, OrderValidationError> {
    match quantity {
        Some(q) if q > Decimal::ZERO => Ok(q),
        Some(_) => Err(OrderValidationError::new(
            "quantity",
            "must be greater than 0",
        )),
        None => Err(OrderValidationError::new("quantity", "is required")),
    }
}

fn parse_side(raw: Option<&str>) -> Result<OrderSide, OrderValidationError> {
    let raw = raw.ok_or_else(|| OrderValidationError::new("side", "is required"))?;
    OrderSide::parse(raw).ok_or_else(|| OrderValidationError::new("side", "must be buy or sell"))
}

fn parse_pricing(
    order_type: Option<&str>,
    limit_price: Option<Decimal>,
) -> Result<(OrderType, Option<Decimal>), OrderValidationError> {
    let order_type = match order_type {
        Some(raw) => OrderType::parse(raw)
            .ok_or_else(|| OrderValidationError::new("order_type", "must be MKT or LMT"))?,
        None => OrderType::Market,
    };

    match order_type {
        OrderType::Market => Ok((order_type, None)),
        OrderType::Limit => match limit_price {
            Some(price) if price > Decimal::ZERO => Ok((order_type, Some(price))),
            Some(_) => Err(OrderValidationError::new(
                "limit_price",
                "must be greater than 0",
            )),
            None => Err(OrderValidationError::new(
                "limit_price",
                "is required for limit orders",
            )),
        },
    }
}
