//! CSV order feed.
//!
//! One command per row with the header
//! `action,instrument,broker,client_order_id,side,order_type,price,quantity`.
//! `action` is `new`, `cancel` or `amend`; side and type are only read for
//! `new` rows, and `amend` reuses `price` and `quantity` as the new values.

use std::io::Read;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::command::{AmendRequest, CancelRequest, Command, OrderKey, OrderRequest, OrderType, Side};
use crate::error::FeedError;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedRow {
    pub action: String,
    pub instrument: String,
    pub broker: String,
    pub client_order_id: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<u64>,
}

impl FeedRow {
    /// Convert a raw row to a typed command.
    pub fn to_command(&self) -> Result<Command, FeedError> {
        let key = OrderKey::new(self.broker.as_str(), self.client_order_id.as_str());
        match self.action.to_ascii_lowercase().as_str() {
            "new" => {
                let side = self.side()?;
                let order_type = self.order_type()?;
                Ok(Command::New(OrderRequest {
                    instrument_id: self.instrument.clone(),
                    broker_id: key.broker_id,
                    client_order_id: key.client_order_id,
                    side,
                    order_type,
                    price: self.price,
                    quantity: self.quantity.ok_or(FeedError::MissingField("quantity"))?,
                }))
            }
            "cancel" => Ok(Command::Cancel(CancelRequest {
                instrument_id: self.instrument.clone(),
                key,
            })),
            "amend" => Ok(Command::Amend(AmendRequest {
                instrument_id: self.instrument.clone(),
                key,
                new_price: self.price.ok_or(FeedError::MissingField("price"))?,
                new_quantity: self.quantity.ok_or(FeedError::MissingField("quantity"))?,
            })),
            other => Err(FeedError::UnknownAction(other.to_owned())),
        }
    }

    fn side(&self) -> Result<Side, FeedError> {
        let raw = self.side.as_deref().ok_or(FeedError::MissingField("side"))?;
        match raw.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Ok(Side::Buy),
            "sell" | "ask" => Ok(Side::Sell),
            _ => Err(FeedError::UnknownSide(raw.to_owned())),
        }
    }

    fn order_type(&self) -> Result<OrderType, FeedError> {
        let raw = self
            .order_type
            .as_deref()
            .ok_or(FeedError::MissingField("order_type"))?;
        match raw.to_ascii_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            _ => Err(FeedError::UnknownOrderType(raw.to_owned())),
        }
    }
}

/// Parse every row of a feed, keeping per-row failures in place.
pub fn parse_feed<R: Read>(reader: R) -> Vec<Result<Command, FeedError>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .deserialize::<FeedRow>()
        .map(|row| row.map_err(FeedError::from).and_then(|row| row.to_command()))
        .collect()
}
