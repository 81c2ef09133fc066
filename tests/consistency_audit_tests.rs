#[path = "fixtures.rs"]
mod fixtures;

use bikemart::consistency::{AuditScope, Inconsistency, SellRecordIssue};
use bikemart::model::{Bike, BikeStatus, Review};
use fixtures::{audit, drift_bike, drift_partner, invest, kinds, sell, service_with};
use serde_json::json;

#[tokio::test]
async fn test_clean_store_reports_nothing() {
    let service = service_with(&["bike-a", "bike-b"], &["partner-p"]).await;
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;
    sell(&service, "bike-a", 500.0, &[("partner-p", 125.0)]).await;

    let report = audit(&service).await;
    assert!(report.is_consistent());
    assert_eq!(report.count, 0);
    assert_eq!(report.scanned.bikes, 2);
    assert_eq!(report.scanned.partners, 1);
    assert_eq!(report.scanned.sell_records, 1);
}

#[tokio::test]
async fn test_sold_bike_without_record_is_reported() {
    let service = service_with(&["bike-a"], &[]).await;
    drift_bike(&service, "bike-a", |bike| {
        bike.status = BikeStatus::Sold;
        bike.sold_price = Some(900.0);
    })
    .await;

    let report = audit(&service).await;
    assert_eq!(report.count, 1);
    match &report.inconsistencies[0] {
        Inconsistency::BikeSellRecordMismatch {
            bike_id,
            issue,
            active_records,
            ..
        } => {
            assert_eq!(bike_id.as_str(), "bike-a");
            assert_eq!(*issue, SellRecordIssue::SoldWithoutActiveRecord);
            assert!(active_records.is_empty());
        }
        other => panic!("unexpected inconsistency: {other:?}"),
    }
}

#[tokio::test]
async fn test_active_record_on_available_bike_is_reported() {
    let service = service_with(&["bike-a"], &[]).await;
    let outcome = sell(&service, "bike-a", 100.0, &[]).await;
    drift_bike(&service, "bike-a", |bike| {
        bike.status = BikeStatus::Available;
        bike.clear_sold_fields();
    })
    .await;

    let report = audit(&service).await;
    assert_eq!(report.count, 1);
    let item = &report.inconsistencies[0];
    assert_eq!(item.issue(), SellRecordIssue::ActiveRecordOnUnsoldBike.as_str());
    match item {
        Inconsistency::BikeSellRecordMismatch { active_records, .. } => {
            assert_eq!(active_records, &vec![outcome.sell_record_id]);
        }
        other => panic!("unexpected inconsistency: {other:?}"),
    }
}

#[tokio::test]
async fn test_investment_total_drift_is_reported_on_both_sides() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;
    drift_bike(&service, "bike-a", |bike| bike.total_partner_investment = 650.0).await;
    drift_partner(&service, "partner-p", |partner| partner.total_investment = 450.0).await;

    let report = audit(&service).await;
    assert_eq!(
        kinds(&report),
        vec!["bike_investment_total_mismatch", "partner_investment_total_mismatch"]
    );

    let record = report.inconsistencies[0].record();
    assert_eq!(record.subject_id, "bike-a");
    assert_eq!(record.expected, Some(json!(500.0)));
    assert_eq!(record.actual, Some(json!(650.0)));
}

#[tokio::test]
async fn test_orphaned_investments_are_reported() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;

    drift_partner(&service, "partner-p", |partner| {
        let mut ghost = partner.investments[0].clone();
        ghost.bike_id = "ghost-bike".into();
        partner.investments.push(ghost);
        partner.total_investment = 1000.0;
    })
    .await;
    drift_bike(&service, "bike-a", |bike| {
        let mut ghost = bike.partner_investments[0].clone();
        ghost.partner_id = "ghost-partner".into();
        ghost.amount = 50.0;
        bike.partner_investments.push(ghost);
        bike.total_partner_investment = 550.0;
    })
    .await;

    let report = audit(&service).await;
    assert_eq!(
        kinds(&report),
        vec!["bike_investment_orphaned", "partner_investment_orphaned"]
    );
    assert_eq!(report.inconsistencies[0].related_id(), Some("ghost-partner"));
    assert_eq!(report.inconsistencies[1].related_id(), Some("ghost-bike"));
}

#[tokio::test]
async fn test_mirror_amount_mismatch_is_reported() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;
    drift_bike(&service, "bike-a", |bike| {
        bike.partner_investments[0].amount = 400.0;
        bike.total_partner_investment = 400.0;
    })
    .await;

    let report = audit(&service).await;
    assert_eq!(report.count, 1);
    assert_eq!(
        report.inconsistencies[0],
        Inconsistency::InvestmentMirrorMismatch {
            partner_id: "partner-p".into(),
            bike_id: "bike-a".into(),
            partner_amount: Some(500.0),
            bike_amount: Some(400.0),
        }
    );
}

#[tokio::test]
async fn test_missing_partner_side_is_reported_from_bike() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;
    drift_partner(&service, "partner-p", |partner| {
        partner.investments.clear();
        partner.total_investment = 0.0;
    })
    .await;

    let report = audit(&service).await;
    assert_eq!(kinds(&report), vec!["investment_mirror_mismatch"]);
}

#[tokio::test]
async fn test_review_aggregate_drift_is_reported() {
    let service = service_with(&["bike-a"], &[]).await;
    service
        .record_review(&Review::new("r1", "bike-a", 4.0))
        .await
        .expect("record review");
    service
        .store()
        .seed(&Review::new("r2", "bike-a", 2.0))
        .await
        .expect("seed stray review");

    let report = audit(&service).await;
    assert_eq!(kinds(&report), vec!["review_aggregation_mismatch"]);
    let record = report.inconsistencies[0].record();
    assert_eq!(
        record.expected,
        Some(json!({"averageRating": 3.0, "totalReviews": 2}))
    );
}

#[tokio::test]
async fn test_scope_limits_checks() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;
    drift_bike(&service, "bike-a", |bike| {
        bike.total_partner_investment = 1.0;
        bike.total_reviews = 3;
    })
    .await;

    let reviews = service
        .validate_data_consistency(AuditScope::Reviews)
        .await
        .expect("audit reviews");
    assert_eq!(kinds(&reviews), vec!["review_aggregation_mismatch"]);
    assert_eq!(reviews.scanned.partners, 0);

    let investments = service
        .validate_data_consistency(AuditScope::Investments)
        .await
        .expect("audit investments");
    assert_eq!(kinds(&investments), vec!["bike_investment_total_mismatch"]);

    let sales = service
        .validate_data_consistency(AuditScope::SellRecords)
        .await
        .expect("audit sales");
    assert!(sales.is_consistent());
}

#[tokio::test]
async fn test_report_order_is_stable() {
    let service = service_with(&["bike-c", "bike-a", "bike-b"], &[]).await;
    for id in ["bike-c", "bike-a", "bike-b"] {
        drift_bike(&service, id, |bike| bike.total_reviews = 2).await;
    }
    drift_bike(&service, "bike-b", |bike| bike.status = BikeStatus::Sold).await;

    let first = audit(&service).await;
    let second = audit(&service).await;
    assert_eq!(first.inconsistencies, second.inconsistencies);

    let subjects: Vec<&str> = first
        .inconsistencies
        .iter()
        .map(|item| item.subject_id())
        .collect();
    assert_eq!(subjects, vec!["bike-b", "bike-a", "bike-b", "bike-c"]);
}

#[tokio::test]
async fn test_audit_never_writes() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;
    drift_bike(&service, "bike-a", |bike| bike.total_partner_investment = 1.0).await;

    let before = service.store().export_snapshot().await;
    let report = audit(&service).await;
    assert!(!report.is_consistent());
    let after = service.store().export_snapshot().await;
    assert_eq!(before.documents, after.documents);

    let untouched: Bike = fixtures::bike(&service, "bike-a").await;
    assert_eq!(untouched.total_partner_investment, 1.0);
}
