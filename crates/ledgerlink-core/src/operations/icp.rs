//! ICP ledger operations
//!
//! Amounts cross this boundary in e8s and must fit the ledger's `u64`.

use tracing::info;

use super::types::{IcpBalance, IcpTransferPayload, IcpTransferReceipt};
use super::{Executor, positive_amount};
use crate::classifier::ClassifiedError;
use crate::error::{Error, Result};
use crate::session::Principal;

/// Length of a textual ledger account identifier (32 bytes, hex)
pub const ACCOUNT_ID_HEX_LEN: usize = 64;

/// Accept a principal or a 32-byte hex account identifier
pub fn parse_account(text: &str) -> Result<String> {
    let text = text.trim();

    if text.len() == ACCOUNT_ID_HEX_LEN && text.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(text)
            .map_err(|e| Error::InvalidInput(format!("Invalid account id '{}': {}", text, e)))?;
        return Ok(hex::encode(bytes));
    }

    Principal::parse(text)
        .map(|principal| principal.to_string())
        .map_err(|_| {
            Error::InvalidInput(format!(
                "'{}' is neither a principal nor a 64-character account id",
                text
            ))
        })
}

#[derive(Debug, Clone)]
pub struct IcpLedger {
    exec: Executor,
}

impl IcpLedger {
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }

    /// Transfer ICP from the connected principal
    pub async fn perform_transfer(
        &self,
        to: &str,
        amount: &str,
        memo: Option<u64>,
    ) -> std::result::Result<IcpTransferReceipt, ClassifiedError> {
        self.exec.handle(self.transfer_inner(to, amount, memo)).await
    }

    async fn transfer_inner(
        &self,
        to: &str,
        amount: &str,
        memo: Option<u64>,
    ) -> Result<IcpTransferReceipt> {
        let to = parse_account(to)?;
        let e8s = positive_amount(amount)?.to_e8s()?;

        let payload = IcpTransferPayload {
            to: &to,
            amount: e8s,
            memo,
        };
        let payload = &payload;

        let receipt: IcpTransferReceipt = self
            .exec
            .mutate(move |handle, request_id| async move {
                handle.post("icp/transfer", payload, request_id).await
            })
            .await?;

        info!(
            to = %to,
            e8s,
            block_height = receipt.block_height,
            "ICP transfer submitted"
        );
        Ok(receipt)
    }

    pub async fn get_balance(
        &self,
        account: &str,
    ) -> std::result::Result<IcpBalance, ClassifiedError> {
        self.exec.handle(self.balance_inner(account)).await
    }

    async fn balance_inner(&self, account: &str) -> Result<IcpBalance> {
        let path = format!("icp/balances/{}", parse_account(account)?);
        let path = &path;
        self.exec
            .read(self.exec.retry().balance, move |handle| async move {
                handle.get(path, &[]).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account_accepts_principal_and_hex() {
        assert_eq!(parse_account("aaaaa-aa").unwrap(), "aaaaa-aa");

        let hex_id = "A".repeat(64);
        assert_eq!(parse_account(&hex_id).unwrap(), "a".repeat(64));
    }

    #[test]
    fn test_parse_account_rejects_garbage() {
        assert!(parse_account("not an account").is_err());
        assert!(parse_account(&"a".repeat(63)).is_err());
        assert!(parse_account("").is_err());
    }
}
