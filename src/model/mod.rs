//! Typed representations of the four collections, reduced to the fields the
//! consistency core reads or maintains.

pub mod bike;
pub mod partner;
pub mod review;
pub mod sell_record;

pub use bike::{Bike, BikePartnerInvestment, BikeStatus};
pub use partner::{InvestmentStatus, Partner, PartnerInvestment, PayoutEntry};
pub use review::Review;
pub use sell_record::{ProfitDistribution, SellRecord, SellRecordStatus};
