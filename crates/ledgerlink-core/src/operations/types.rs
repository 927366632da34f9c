//! Token Service request and response types
//!
//! Amounts on the wire are always base-unit integers ([`AmountUnits`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::{self, AmountUnits};

/// A token registered with the Token Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    pub total_supply: AmountUnits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canister_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_decimals() -> u8 {
    amount::DECIMALS as u8
}

impl TokenInfo {
    pub fn formatted_supply(&self) -> String {
        amount::decode(&self.total_supply)
    }
}

/// User input for creating a token; `initial_supply` is a decimal string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    pub name: String,
    pub symbol: String,
    pub initial_supply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// Body sent for token creation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateTokenPayload<'a> {
    pub name: &'a str,
    pub symbol: &'a str,
    pub initial_supply: &'a AmountUnits,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<&'a str>,
}

/// Body sent for mint, burn and transfer
#[derive(Debug, Clone, Serialize)]
pub(crate) struct AmountPayload<'a> {
    pub amount: &'a AmountUnits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<&'a str>,
}

/// Result of mint, burn or transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    pub amount: AmountUnits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub token_id: String,
    pub owner: String,
    pub balance: AmountUnits,
}

impl Balance {
    pub fn formatted(&self) -> String {
        amount::decode(&self.balance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub amount: AmountUnits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of reconciling a token with its canister
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub token_id: String,
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_supply: Option<AmountUnits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

/// Body sent for an ICP transfer; `amount` is in e8s
#[derive(Debug, Clone, Serialize)]
pub(crate) struct IcpTransferPayload<'a> {
    pub to: &'a str,
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcpTransferReceipt {
    pub block_height: u64,
    pub amount: AmountUnits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<AmountUnits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcpBalance {
    pub account: String,
    pub balance: AmountUnits,
}

impl IcpBalance {
    pub fn formatted(&self) -> String {
        amount::decode(&self.balance)
    }
}
