// In-memory book of payment reservations and their status transitions.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Success,
    Refunded,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReservation {
    pub id: u64,
    pub payer: i64,
    pub amount: i64,
    pub key: String,
    pub charge_reference: Option<String>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

/// Result of trying to move a reservation into `refunded`.
#[derive(Debug, Clone)]
pub enum RefundClaim {
    /// The caller now owns the refund for this reservation.
    Claimed(PaymentReservation),
    AlreadyRefunded,
    /// The charge never cleared.
    NotCharged,
    NotFound,
}

pub struct ReservationBook {
    reservations: RwLock<Vec<PaymentReservation>>,
    next_id: AtomicU64,
}

impl ReservationBook {
    pub fn new() -> Self {
        Self {
            reservations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record that `payer` chose to pay `amount` for `key`.
    pub fn reserve(&self, payer: i64, amount: i64, key: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.reservations.write().push(PaymentReservation {
            id,
            payer,
            amount,
            key: key.to_string(),
            charge_reference: None,
            status: ReservationStatus::Pending,
            created_at: Utc::now(),
        });
        info!("reservation {} created: payer={} amount={} key={}", id, payer, amount, key);
        id
    }

    /// The upstream charge for reservation `id` cleared.
    pub fn confirm(&self, id: u64, charge_reference: &str) -> Result<PaymentReservation> {
        let mut reservations = self.reservations.write();
        let reservation = reservations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("reservation {} not found", id))?;
        if reservation.status != ReservationStatus::Pending {
            return Err(anyhow!(
                "reservation {} is {:?}, expected pending",
                id,
                reservation.status
            ));
        }
        reservation.status = ReservationStatus::Success;
        reservation.charge_reference = Some(charge_reference.to_string());
        info!("reservation {} charged as {}", id, charge_reference);
        Ok(reservation.clone())
    }

    pub fn get(&self, id: u64) -> Option<PaymentReservation> {
        self.reservations.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn by_charge(&self, charge_reference: &str) -> Option<PaymentReservation> {
        self.reservations
            .read()
            .iter()
            .find(|r| r.charge_reference.as_deref() == Some(charge_reference))
            .cloned()
    }

    /// Atomically move a charged reservation to `refunded`.
    pub fn claim_refund(&self, charge_reference: &str) -> RefundClaim {
        let mut reservations = self.reservations.write();
        let Some(reservation) = reservations
            .iter_mut()
            .find(|r| r.charge_reference.as_deref() == Some(charge_reference))
        else {
            return RefundClaim::NotFound;
        };
        match reservation.status {
            ReservationStatus::Success => {
                reservation.status = ReservationStatus::Refunded;
                RefundClaim::Claimed(reservation.clone())
            }
            ReservationStatus::Refunded => RefundClaim::AlreadyRefunded,
            ReservationStatus::Pending => RefundClaim::NotCharged,
        }
    }

    /// Undo a claim whose refund call failed, so an operator can retry it.
    pub fn release_claim(&self, charge_reference: &str) {
        let mut reservations = self.reservations.write();
        if let Some(reservation) = reservations.iter_mut().find(|r| {
            r.charge_reference.as_deref() == Some(charge_reference)
                && r.status == ReservationStatus::Refunded
        }) {
            reservation.status = ReservationStatus::Success;
        }
    }

    pub fn list(&self) -> Vec<PaymentReservation> {
        self.reservations.read().clone()
    }
}

impl Default for ReservationBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let book = ReservationBook::new();
        let id = book.reserve(7, 1, "https://v/1");
        assert_eq!(book.get(id).unwrap().status, ReservationStatus::Pending);
        assert!(matches!(book.claim_refund("ch_1"), RefundClaim::NotFound));

        book.confirm(id, "ch_1").unwrap();
        assert!(book.confirm(id, "ch_1").is_err());
        assert_eq!(book.by_charge("ch_1").unwrap().id, id);

        match book.claim_refund("ch_1") {
            RefundClaim::Claimed(r) => assert_eq!((r.payer, r.amount), (7, 1)),
            other => panic!("unexpected claim {:?}", other),
        }
        assert!(matches!(book.claim_refund("ch_1"), RefundClaim::AlreadyRefunded));
        assert_eq!(book.get(id).unwrap().status, ReservationStatus::Refunded);
    }

    #[test]
    fn test_release_claim_restores_success() {
        let book = ReservationBook::new();
        let id = book.reserve(7, 1, "k");
        book.confirm(id, "ch_9").unwrap();
        assert!(matches!(book.claim_refund("ch_9"), RefundClaim::Claimed(_)));
        book.release_claim("ch_9");
        assert_eq!(book.get(id).unwrap().status, ReservationStatus::Success);
    }
}
