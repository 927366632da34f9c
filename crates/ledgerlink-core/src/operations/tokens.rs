//! Token Service operations

use tracing::info;

use super::types::{
    AmountPayload, Balance, CreateTokenPayload, CreateTokenRequest, SyncStatus, TokenInfo,
    TransactionRecord, TransferReceipt,
};
use super::{Executor, path_segment, positive_amount};
use crate::amount::{self, DECIMALS};
use crate::classifier::ClassifiedError;
use crate::error::{Error, Result};
use crate::session::Principal;

type Outcome<T> = std::result::Result<T, ClassifiedError>;

/// Token CRUD, supply changes and transfers
#[derive(Debug, Clone)]
pub struct TokenService {
    exec: Executor,
}

impl TokenService {
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    // ========== Mutations (connected session required) ==========

    pub async fn create_token(&self, request: CreateTokenRequest) -> Outcome<TokenInfo> {
        self.exec.handle(self.create_inner(request)).await
    }

    async fn create_inner(&self, request: CreateTokenRequest) -> Result<TokenInfo> {
        let name = non_empty("Token name", &request.name)?;
        let symbol = non_empty("Token symbol", &request.symbol)?;
        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) || symbol.len() > 10 {
            return Err(Error::InvalidInput(format!(
                "Token symbol '{}' must be 1-10 letters or digits",
                symbol
            )));
        }
        let supply = amount::encode(request.initial_supply.trim())?;

        let payload = CreateTokenPayload {
            name,
            symbol,
            initial_supply: &supply,
            decimals: DECIMALS as u8,
            description: request.description.as_deref(),
            logo_url: request.logo_url.as_deref(),
        };
        let payload = &payload;

        let token: TokenInfo = self
            .exec
            .mutate(move |handle, request_id| async move {
                handle.post("tokens", payload, request_id).await
            })
            .await?;

        info!(token_id = %token.id, symbol = %token.symbol, "Token created");
        Ok(token)
    }

    pub async fn mint(&self, token_id: &str, to: &str, amount: &str) -> Outcome<TransferReceipt> {
        self.exec.handle(self.supply_change(token_id, "mint", Some(to), amount)).await
    }

    pub async fn burn(&self, token_id: &str, amount: &str) -> Outcome<TransferReceipt> {
        self.exec.handle(self.supply_change(token_id, "burn", None, amount)).await
    }

    pub async fn transfer(
        &self,
        token_id: &str,
        to: &str,
        amount: &str,
        memo: Option<&str>,
    ) -> Outcome<TransferReceipt> {
        self.exec
            .handle(self.transfer_inner(token_id, to, amount, memo))
            .await
    }

    async fn supply_change(
        &self,
        token_id: &str,
        action: &str,
        to: Option<&str>,
        amount: &str,
    ) -> Result<TransferReceipt> {
        let token_id = path_segment("Token id", token_id)?;
        let units = positive_amount(amount)?;
        let to = to.map(Principal::parse).transpose()?;

        let path = format!("tokens/{}/{}", token_id, action);
        let payload = AmountPayload {
            amount: &units,
            to: to.as_ref().map(Principal::as_str),
            memo: None,
        };
        let (path, payload) = (&path, &payload);

        let receipt: TransferReceipt = self
            .exec
            .mutate(move |handle, request_id| async move {
                handle.post(path, payload, request_id).await
            })
            .await?;

        info!(
            token_id,
            action,
            transaction_id = %receipt.transaction_id,
            "Supply change submitted"
        );
        Ok(receipt)
    }

    async fn transfer_inner(
        &self,
        token_id: &str,
        to: &str,
        amount: &str,
        memo: Option<&str>,
    ) -> Result<TransferReceipt> {
        let token_id = path_segment("Token id", token_id)?;
        let units = positive_amount(amount)?;
        let to = Principal::parse(to)?;

        let path = format!("tokens/{}/transfer", token_id);
        let payload = AmountPayload {
            amount: &units,
            to: Some(to.as_str()),
            memo,
        };
        let (path, payload) = (&path, &payload);

        let receipt: TransferReceipt = self
            .exec
            .mutate(move |handle, request_id| async move {
                handle.post(path, payload, request_id).await
            })
            .await?;

        info!(
            token_id,
            to = %to,
            transaction_id = %receipt.transaction_id,
            "Transfer submitted"
        );
        Ok(receipt)
    }

    // ========== Reads (no session needed) ==========

    pub async fn get_balance(&self, token_id: &str, owner: &str) -> Outcome<Balance> {
        self.exec.handle(self.balance_inner(token_id, owner)).await
    }

    async fn balance_inner(&self, token_id: &str, owner: &str) -> Result<Balance> {
        let token_id = path_segment("Token id", token_id)?;
        let owner = Principal::parse(owner)?;
        let path = format!("tokens/{}/balances/{}", token_id, owner);
        let path = &path;

        self.exec
            .read(self.exec.retry().balance, move |handle| async move {
                handle.get(path, &[]).await
            })
            .await
    }

    pub async fn list_tokens(&self) -> Outcome<Vec<TokenInfo>> {
        self.exec
            .handle(self.exec.read(self.exec.retry().read, |handle| async move {
                handle.get("tokens", &[]).await
            }))
            .await
    }

    pub async fn get_token(&self, token_id: &str) -> Outcome<TokenInfo> {
        self.exec.handle(self.get_inner(token_id)).await
    }

    async fn get_inner(&self, token_id: &str) -> Result<TokenInfo> {
        let path = format!("tokens/{}", path_segment("Token id", token_id)?);
        let path = &path;
        self.exec
            .read(self.exec.retry().read, move |handle| async move {
                handle.get(path, &[]).await
            })
            .await
    }

    pub async fn search_tokens(&self, query: &str) -> Outcome<Vec<TokenInfo>> {
        self.exec.handle(self.search_inner(query)).await
    }

    async fn search_inner(&self, query: &str) -> Result<Vec<TokenInfo>> {
        let query = non_empty("Search query", query)?;
        self.exec
            .read(self.exec.retry().read, move |handle| async move {
                handle.get("tokens/search", &[("q", query)]).await
            })
            .await
    }

    pub async fn get_transactions(&self, token_id: &str) -> Outcome<Vec<TransactionRecord>> {
        self.exec.handle(self.transactions_inner(token_id)).await
    }

    async fn transactions_inner(&self, token_id: &str) -> Result<Vec<TransactionRecord>> {
        let path = format!("tokens/{}/transactions", path_segment("Token id", token_id)?);
        let path = &path;
        self.exec
            .read(self.exec.retry().read, move |handle| async move {
                handle.get(path, &[]).await
            })
            .await
    }

    /// Ask the service to reconcile a token with its canister
    ///
    /// Signed when a session is connected, anonymous otherwise.
    pub async fn sync_with_canister(&self, token_id: &str) -> Outcome<SyncStatus> {
        self.exec.handle(self.sync_inner(token_id)).await
    }

    async fn sync_inner(&self, token_id: &str) -> Result<SyncStatus> {
        let path = format!("tokens/{}/sync", path_segment("Token id", token_id)?);
        let request_id = uuid::Uuid::new_v4();
        let body = serde_json::json!({});
        let gateway = self.exec.gateway();
        let (path, body) = (&path, &body);

        // Re-derived per attempt so a session that ends mid-retry stops signing
        let status: SyncStatus = self
            .exec
            .retry()
            .read
            .run(move || async move {
                let handle = gateway.get_client();
                handle.post(path, body, request_id).await
            })
            .await?;

        self.exec.gateway().session().touch();
        Ok(status)
    }
}

fn non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(value)
}
