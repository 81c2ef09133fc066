//! Typed inconsistency records emitted by the auditor and consumed by the
//! repairer.

use super::commands::RatingSummary;
use crate::core::{BikeId, PartnerId, SellRecordId};
use crate::model::BikeStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;
use std::str::FromStr;

/// Which family of invariants an audit or repair covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditScope {
    #[default]
    All,
    SellRecords,
    Investments,
    Reviews,
}

impl AuditScope {
    pub fn includes(self, kind: InconsistencyKind) -> bool {
        self == Self::All || self == kind.scope()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::SellRecords => "sell_records",
            Self::Investments => "investments",
            Self::Reviews => "reviews",
        }
    }
}

impl fmt::Display for AuditScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "all" => Ok(Self::All),
            "sell_records" | "sales" => Ok(Self::SellRecords),
            "investments" => Ok(Self::Investments),
            "reviews" => Ok(Self::Reviews),
            other => Err(format!("unknown audit scope '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    BikeSellRecordMismatch,
    BikeInvestmentTotalMismatch,
    PartnerInvestmentTotalMismatch,
    PartnerInvestmentOrphaned,
    BikeInvestmentOrphaned,
    InvestmentMirrorMismatch,
    ReviewAggregationMismatch,
}

impl InconsistencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BikeSellRecordMismatch => "bike_sell_record_mismatch",
            Self::BikeInvestmentTotalMismatch => "bike_investment_total_mismatch",
            Self::PartnerInvestmentTotalMismatch => "partner_investment_total_mismatch",
            Self::PartnerInvestmentOrphaned => "partner_investment_orphaned",
            Self::BikeInvestmentOrphaned => "bike_investment_orphaned",
            Self::InvestmentMirrorMismatch => "investment_mirror_mismatch",
            Self::ReviewAggregationMismatch => "review_aggregation_mismatch",
        }
    }

    pub fn scope(self) -> AuditScope {
        match self {
            Self::BikeSellRecordMismatch => AuditScope::SellRecords,
            Self::ReviewAggregationMismatch => AuditScope::Reviews,
            _ => AuditScope::Investments,
        }
    }
}

impl fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellRecordIssue {
    SoldWithoutActiveRecord,
    ActiveRecordOnUnsoldBike,
    MultipleActiveRecords,
}

impl SellRecordIssue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SoldWithoutActiveRecord => "sold_without_active_record",
            Self::ActiveRecordOnUnsoldBike => "active_record_on_unsold_bike",
            Self::MultipleActiveRecords => "multiple_active_records",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Inconsistency {
    BikeSellRecordMismatch {
        bike_id: BikeId,
        issue: SellRecordIssue,
        bike_status: BikeStatus,
        active_records: Vec<SellRecordId>,
    },
    BikeInvestmentTotalMismatch {
        bike_id: BikeId,
        expected: f64,
        actual: f64,
    },
    PartnerInvestmentTotalMismatch {
        partner_id: PartnerId,
        expected: f64,
        actual: f64,
    },
    PartnerInvestmentOrphaned {
        partner_id: PartnerId,
        bike_id: BikeId,
        amount: f64,
    },
    BikeInvestmentOrphaned {
        bike_id: BikeId,
        partner_id: PartnerId,
        amount: f64,
    },
    /// The two sides of one investment disagree. `None` marks the missing side.
    InvestmentMirrorMismatch {
        partner_id: PartnerId,
        bike_id: BikeId,
        partner_amount: Option<f64>,
        bike_amount: Option<f64>,
    },
    ReviewAggregationMismatch {
        bike_id: BikeId,
        expected: RatingSummary,
        actual: RatingSummary,
    },
}

/// Flat `{type, subjectId, issue, expected, actual}` view of an inconsistency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InconsistencyRecord {
    #[serde(rename = "type")]
    pub kind: InconsistencyKind,
    pub subject_id: String,
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<JsonValue>,
}

impl Inconsistency {
    pub fn kind(&self) -> InconsistencyKind {
        match self {
            Self::BikeSellRecordMismatch { .. } => InconsistencyKind::BikeSellRecordMismatch,
            Self::BikeInvestmentTotalMismatch { .. } => {
                InconsistencyKind::BikeInvestmentTotalMismatch
            }
            Self::PartnerInvestmentTotalMismatch { .. } => {
                InconsistencyKind::PartnerInvestmentTotalMismatch
            }
            Self::PartnerInvestmentOrphaned { .. } => InconsistencyKind::PartnerInvestmentOrphaned,
            Self::BikeInvestmentOrphaned { .. } => InconsistencyKind::BikeInvestmentOrphaned,
            Self::InvestmentMirrorMismatch { .. } => InconsistencyKind::InvestmentMirrorMismatch,
            Self::ReviewAggregationMismatch { .. } => {
                InconsistencyKind::ReviewAggregationMismatch
            }
        }
    }

    /// Id of the document whose stored state is wrong.
    pub fn subject_id(&self) -> &str {
        match self {
            Self::BikeSellRecordMismatch { bike_id, .. }
            | Self::BikeInvestmentTotalMismatch { bike_id, .. }
            | Self::BikeInvestmentOrphaned { bike_id, .. }
            | Self::ReviewAggregationMismatch { bike_id, .. } => bike_id.as_str(),
            Self::PartnerInvestmentTotalMismatch { partner_id, .. }
            | Self::PartnerInvestmentOrphaned { partner_id, .. }
            | Self::InvestmentMirrorMismatch { partner_id, .. } => partner_id.as_str(),
        }
    }

    /// The referenced document for two-sided inconsistencies.
    pub fn related_id(&self) -> Option<&str> {
        match self {
            Self::PartnerInvestmentOrphaned { bike_id, .. }
            | Self::InvestmentMirrorMismatch { bike_id, .. } => Some(bike_id.as_str()),
            Self::BikeInvestmentOrphaned { partner_id, .. } => Some(partner_id.as_str()),
            _ => None,
        }
    }

    /// True when both records describe the same broken relationship, whatever
    /// values they carry.
    pub fn same_target(&self, other: &Inconsistency) -> bool {
        self.kind() == other.kind()
            && self.subject_id() == other.subject_id()
            && self.related_id() == other.related_id()
    }

    pub fn issue(&self) -> String {
        match self {
            Self::BikeSellRecordMismatch { issue, .. } => issue.as_str().to_string(),
            Self::BikeInvestmentTotalMismatch { .. } => {
                "totalPartnerInvestment differs from the sum of partnerInvestments".to_string()
            }
            Self::PartnerInvestmentTotalMismatch { .. } => {
                "totalInvestment differs from the sum of investments".to_string()
            }
            Self::PartnerInvestmentOrphaned { bike_id, .. } => {
                format!("investment references missing bike '{bike_id}'")
            }
            Self::BikeInvestmentOrphaned { partner_id, .. } => {
                format!("partnerInvestments references missing partner '{partner_id}'")
            }
            Self::InvestmentMirrorMismatch {
                bike_id,
                partner_amount,
                bike_amount,
                ..
            } => match (partner_amount, bike_amount) {
                (Some(_), None) => format!("bike '{bike_id}' lacks the mirrored investment"),
                (None, Some(_)) => format!("partner lacks the investment mirrored on bike '{bike_id}'"),
                _ => format!("investment amounts differ on bike '{bike_id}'"),
            },
            Self::ReviewAggregationMismatch { .. } => {
                "averageRating/totalReviews differ from the review documents".to_string()
            }
        }
    }

    pub fn expected(&self) -> Option<JsonValue> {
        match self {
            Self::BikeSellRecordMismatch { issue, .. } => Some(match issue {
                SellRecordIssue::SoldWithoutActiveRecord => json!({ "activeRecords": 1 }),
                SellRecordIssue::ActiveRecordOnUnsoldBike => json!({ "status": BikeStatus::Sold }),
                SellRecordIssue::MultipleActiveRecords => json!({ "activeRecords": 1 }),
            }),
            Self::BikeInvestmentTotalMismatch { expected, .. }
            | Self::PartnerInvestmentTotalMismatch { expected, .. } => Some(json!(expected)),
            Self::InvestmentMirrorMismatch { partner_amount, .. } => {
                partner_amount.map(|amount| json!(amount))
            }
            Self::ReviewAggregationMismatch { expected, .. } => Some(json!(expected)),
            Self::PartnerInvestmentOrphaned { .. } | Self::BikeInvestmentOrphaned { .. } => None,
        }
    }

    pub fn actual(&self) -> Option<JsonValue> {
        match self {
            Self::BikeSellRecordMismatch {
                bike_status,
                active_records,
                ..
            } => Some(json!({
                "status": bike_status,
                "activeRecords": active_records.len(),
            })),
            Self::BikeInvestmentTotalMismatch { actual, .. }
            | Self::PartnerInvestmentTotalMismatch { actual, .. } => Some(json!(actual)),
            Self::InvestmentMirrorMismatch { bike_amount, .. } => {
                bike_amount.map(|amount| json!(amount))
            }
            Self::ReviewAggregationMismatch { actual, .. } => Some(json!(actual)),
            Self::PartnerInvestmentOrphaned { amount, .. }
            | Self::BikeInvestmentOrphaned { amount, .. } => Some(json!(amount)),
        }
    }

    pub fn record(&self) -> InconsistencyRecord {
        InconsistencyRecord {
            kind: self.kind(),
            subject_id: self.subject_id().to_string(),
            issue: self.issue(),
            expected: self.expected(),
            actual: self.actual(),
        }
    }
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind(), self.subject_id(), self.issue())
    }
}
