use crate::core::{BikeId, CustomerId, ReviewId};
use crate::storage::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: ReviewId,
    pub bike_id: BikeId,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub rating: f64,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document for Review {
    const COLLECTION: Collection = Collection::Reviews;

    fn document_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Review {
    pub fn new(id: impl Into<ReviewId>, bike_id: impl Into<BikeId>, rating: f64) -> Self {
        Self {
            id: id.into(),
            bike_id: bike_id.into(),
            customer_id: None,
            rating,
            comment: None,
            created_at: Utc::now(),
        }
    }
}
