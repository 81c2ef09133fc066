pub mod error;
pub mod types;

pub use error::{Result, StoreError};
pub use types::{
    Actor, BikeId, CustomerId, MONEY_EPSILON, PartnerId, PayoutId, ReviewId, SellRecordId,
    approx_eq, round_to, round2,
};
