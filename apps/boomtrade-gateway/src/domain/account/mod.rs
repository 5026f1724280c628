//! Brokerage account identity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether an account trades with simulated or real money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Paper trading account.
    Paper,
    /// Live trading account.
    Live,
}

impl AccountKind {
    /// Classify an account id. Paper accounts carry the `DU` prefix.
    #[must_use]
    pub fn from_account_id(account_id: &str) -> Self {
        if account_id.to_ascii_uppercase().starts_with("DU") {
            Self::Paper
        } else {
            Self::Live
        }
    }

    /// Get the kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Live => "live",
        }
    }
}

/// An account visible through the gateway session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Account identifier.
    pub account_id: String,
    /// Base currency, when reported.
    pub currency: Option<String>,
    /// Paper or live.
    pub kind: AccountKind,
}

impl AccountInfo {
    /// Create account info, deriving the kind from the id.
    #[must_use]
    pub fn new(account_id: impl Into<String>, currency: Option<String>) -> Self {
        let account_id = account_id.into();
        let kind = AccountKind::from_account_id(&account_id);
        Self {
            account_id,
            currency,
            kind,
        }
    }
}

/// Balances for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Account identity.
    #[serde(flatten)]
    pub account: AccountInfo,
    /// Net liquidation value.
    pub net_liquidation: Option<Decimal>,
    /// Total cash value.
    pub cash: Option<Decimal>,
    /// Buying power.
    pub buying_power: Option<Decimal>,
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Gateway contract id.
    pub conid: i64,
    /// Contract description (ticker, or OCC-style for options).
    pub description: String,
    /// Signed position size.
    pub quantity: Decimal,
    /// Average cost per unit.
    pub average_cost: Option<Decimal>,
    /// Current market value.
    pub market_value: Option<Decimal>,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Option<Decimal>,
    /// Position currency.
    pub currency: Option<String>,
}
