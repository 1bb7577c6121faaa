// Refund issuance for paid requests whose pipeline failed.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::stats::StatsCollector;
use crate::error::{PipelineError, PipelineResult};
use crate::ledger::reservations::{RefundClaim, ReservationBook};
use crate::ledger::traits::{Ledger, RefundRequest};

/// What a paid request carries into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentContext {
    pub payer: i64,
    pub charge_reference: String,
    pub amount: i64,
}

impl PaymentContext {
    pub fn new(payer: i64, charge_reference: impl Into<String>, amount: i64) -> Self {
        Self {
            payer,
            charge_reference: charge_reference.into(),
            amount,
        }
    }
}

pub struct CompensationTrigger {
    ledger: Arc<dyn Ledger>,
    reservations: Arc<ReservationBook>,
    stats: Arc<StatsCollector>,
}

impl CompensationTrigger {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        reservations: Arc<ReservationBook>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            ledger,
            reservations,
            stats,
        }
    }

    /// Refund `charge_reference`.
    ///
    /// The reservation record, when present, supplies payer and amount and
    /// guarantees a single refund per charge. Without a record the refund is
    /// still attempted with the fields given here.
    pub async fn compensate(
        &self,
        payer: i64,
        charge_reference: &str,
        amount: i64,
        reason: &str,
    ) -> PipelineResult<()> {
        let claimed = match self.reservations.claim_refund(charge_reference) {
            RefundClaim::Claimed(reservation) => {
                if reservation.payer != payer {
                    warn!(
                        "charge {} belongs to {} but failure was reported for {}",
                        charge_reference, reservation.payer, payer
                    );
                }
                Some(RefundRequest {
                    payer: reservation.payer,
                    charge_reference: charge_reference.to_string(),
                    amount: reservation.amount,
                    reason: reason.to_string(),
                })
            }
            RefundClaim::AlreadyRefunded => {
                info!("charge {} already refunded, skipping", charge_reference);
                return Ok(());
            }
            RefundClaim::NotCharged | RefundClaim::NotFound => None,
        };

        let from_record = claimed.is_some();
        let refund = claimed.unwrap_or_else(|| {
            warn!(
                "no charged reservation for {}, refunding with payer={} amount={}",
                charge_reference, payer, amount
            );
            RefundRequest {
                payer,
                charge_reference: charge_reference.to_string(),
                amount,
                reason: reason.to_string(),
            }
        });

        match self.ledger.compensate(&refund).await {
            Ok(()) => {
                self.stats.record_refund_issued();
                info!(
                    "refunded {} to {} for charge {} ({})",
                    refund.amount, refund.payer, refund.charge_reference, refund.reason
                );
                Ok(())
            }
            Err(e) => {
                if from_record {
                    self.reservations.release_claim(charge_reference);
                }
                self.stats.record_refund_failed();
                error!(
                    target: "operator",
                    "MANUAL REFUND NEEDED: charge={} payer={} amount={} reason={}: {:#}",
                    refund.charge_reference, refund.payer, refund.amount, refund.reason, e
                );
                Err(PipelineError::CompensationFailure {
                    charge_reference: refund.charge_reference,
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}
