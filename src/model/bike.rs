use crate::core::{Actor, BikeId, CustomerId, PartnerId, SellRecordId, round2};
use crate::storage::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BikeStatus {
    Available,
    Sold,
    Reserved,
    Maintenance,
}

impl fmt::Display for BikeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Available => "available",
            Self::Sold => "sold",
            Self::Reserved => "reserved",
            Self::Maintenance => "maintenance",
        };
        f.write_str(label)
    }
}

/// Bike-side mirror of a partner's investment in this bike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BikePartnerInvestment {
    pub partner_id: PartnerId,
    pub amount: f64,
    /// Percentage of the sale profit owed to the partner, in `[0, 100]`.
    pub profit_share: f64,
    #[serde(default)]
    pub profit_earned: f64,
    pub investment_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bike {
    pub id: BikeId,
    pub name: String,
    pub status: BikeStatus,
    #[serde(default)]
    pub purchase_price: Option<f64>,

    // Present iff status == sold.
    #[serde(default)]
    pub sold_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sold_price: Option<f64>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub sell_record_id: Option<SellRecordId>,

    #[serde(default)]
    pub partner_investments: Vec<BikePartnerInvestment>,
    #[serde(default)]
    pub total_partner_investment: f64,

    #[serde(default)]
    pub average_rating: f64,
    #[serde(default)]
    pub total_reviews: u64,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<Actor>,
}

impl Document for Bike {
    const COLLECTION: Collection = Collection::Bikes;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Bike {
    pub fn new(id: impl Into<BikeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: BikeStatus::Available,
            purchase_price: None,
            sold_date: None,
            sold_price: None,
            customer_id: None,
            sell_record_id: None,
            partner_investments: Vec::new(),
            total_partner_investment: 0.0,
            average_rating: 0.0,
            total_reviews: 0,
            updated_at: None,
            updated_by: None,
        }
    }

    pub fn with_purchase_price(mut self, price: f64) -> Self {
        self.purchase_price = Some(price);
        self
    }

    pub fn is_sold(&self) -> bool {
        self.status == BikeStatus::Sold
    }

    pub fn has_sold_fields(&self) -> bool {
        self.sold_date.is_some() || self.sold_price.is_some() || self.customer_id.is_some()
    }

    pub fn clear_sold_fields(&mut self) {
        self.sold_date = None;
        self.sold_price = None;
        self.customer_id = None;
        self.sell_record_id = None;
    }

    /// Sum of the embedded investment amounts.
    pub fn computed_partner_investment(&self) -> f64 {
        round2(self.partner_investments.iter().map(|entry| entry.amount).sum())
    }

    pub fn investment_of(&self, partner_id: &PartnerId) -> Option<&BikePartnerInvestment> {
        self.partner_investments
            .iter()
            .find(|entry| &entry.partner_id == partner_id)
    }

    pub fn investment_of_mut(
        &mut self,
        partner_id: &PartnerId,
    ) -> Option<&mut BikePartnerInvestment> {
        self.partner_investments
            .iter_mut()
            .find(|entry| &entry.partner_id == partner_id)
    }

    pub fn touch(&mut self, actor: &Actor, now: DateTime<Utc>) {
        self.updated_at = Some(now);
        self.updated_by = Some(actor.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_bike_is_available_and_empty() {
        let bike = Bike::new("b1", "Canyon Endurace");
        assert_eq!(bike.status, BikeStatus::Available);
        assert!(!bike.has_sold_fields());
        assert_eq!(bike.computed_partner_investment(), 0.0);
    }

    #[test]
    fn test_document_shape_uses_camel_case_fields() {
        let bike = Bike::new("b1", "Trek Domane");
        let body = serde_json::to_value(&bike).unwrap();
        assert_eq!(body["status"], "available");
        assert!(body.get("totalPartnerInvestment").is_some());
        assert!(body.get("partnerInvestments").is_some());
        assert!(body.get("averageRating").is_some());
    }

    #[test]
    fn test_clear_sold_fields() {
        let mut bike = Bike::new("b1", "Cube Attain");
        bike.status = BikeStatus::Sold;
        bike.sold_price = Some(1200.0);
        bike.customer_id = Some(CustomerId::from("c1"));
        bike.sold_date = Some(Utc::now());

        bike.clear_sold_fields();
        assert!(!bike.has_sold_fields());
    }
}
