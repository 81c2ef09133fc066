use crate::core::{Actor, BikeId, CustomerId, PartnerId, SellRecordId};
use crate::storage::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellRecordStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitDistribution {
    pub partner_id: PartnerId,
    pub profit_amount: f64,
}

impl ProfitDistribution {
    pub fn new(partner_id: impl Into<PartnerId>, profit_amount: f64) -> Self {
        Self {
            partner_id: partner_id.into(),
            profit_amount,
        }
    }
}

/// One sale of a bike. Never deleted: a cancellation retires it in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellRecord {
    pub id: SellRecordId,
    pub bike_id: BikeId,
    pub customer_id: CustomerId,
    pub selling_price: f64,
    pub profit: f64,
    pub status: SellRecordStatus,
    #[serde(default)]
    pub partner_profit_distribution: Vec<ProfitDistribution>,
    pub sold_at: DateTime<Utc>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub processed_by: Actor,
    #[serde(default)]
    pub updated_by: Option<Actor>,
}

impl Document for SellRecord {
    const COLLECTION: Collection = Collection::SellRecords;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl SellRecord {
    pub fn is_active(&self) -> bool {
        self.status == SellRecordStatus::Active
    }

    pub fn cancel(&mut self, reason: &str, actor: &Actor, now: DateTime<Utc>) {
        self.status = SellRecordStatus::Cancelled;
        self.cancel_reason = Some(reason.to_string());
        self.cancelled_at = Some(now);
        self.updated_by = Some(actor.clone());
    }

    pub fn distributed_total(&self) -> f64 {
        self.partner_profit_distribution
            .iter()
            .map(|entry| entry.profit_amount)
            .sum()
    }
}
