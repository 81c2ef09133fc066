use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

/// The document collections the consistency core coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Bikes,
    Partners,
    SellRecords,
    Reviews,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Bikes,
        Collection::Partners,
        Collection::SellRecords,
        Collection::Reviews,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bikes => "bikes",
            Self::Partners => "partners",
            Self::SellRecords => "sell_records",
            Self::Reviews => "reviews",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed document stored as JSON in one collection.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn document_id(&self) -> &str;

    fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(Self::COLLECTION, self.document_id())
    }
}

/// Address of a single document, used to report which documents a write touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: Collection,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
