use anyhow::Result;
use async_trait::async_trait;

/// A refund as handed to the payment provider.
///
/// `payer` and `amount` may be zero when the reservation record is unknown;
/// the charge reference is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub payer: i64,
    pub charge_reference: String,
    pub amount: i64,
    pub reason: String,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn compensate(&self, refund: &RefundRequest) -> Result<()>;
}
