// Payment side: reservations, the refund seam and its HTTP adapter.

pub mod reservations;
pub mod stars;
pub mod traits;
