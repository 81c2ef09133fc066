#[path = "fixtures.rs"]
mod fixtures;

use bikemart::consistency::{InvestmentAction, InvestmentChange};
use bikemart::model::{Partner, SellRecord};
use bikemart::{AdminService, ErrorCode, RetryPolicy};
use fixtures::{Service, audit, bike, invest, partner, sale, service_with};
use futures::future::join_all;

fn patient(service: &Service) -> Service {
    let config = fixtures::config().retry(RetryPolicy::default().max_attempts(50).backoff_ms(1, 4));
    AdminService::new(service.store().clone(), &config).acting_as(service.actor().clone())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_investments_keep_totals_exact() {
    let partners: Vec<String> = (0..12).map(|n| format!("partner-{n:02}")).collect();
    let ids: Vec<&str> = partners.iter().map(String::as_str).collect();
    let service = patient(&service_with(&["bike-a"], &ids).await);

    let tasks = partners.iter().map(|partner_id| {
        let service = service.clone();
        let partner_id = partner_id.clone();
        tokio::spawn(async move {
            service
                .update_partner_investment(&InvestmentChange {
                    partner_id: partner_id.as_str().into(),
                    bike_id: "bike-a".into(),
                    amount: 100.0,
                    profit_share: 5.0,
                    action: InvestmentAction::Add,
                })
                .await
        })
    });

    for joined in join_all(tasks).await {
        joined.expect("task panicked").expect("investment committed");
    }

    let bike = bike(&service, "bike-a").await;
    assert_eq!(bike.partner_investments.len(), 12);
    assert_eq!(bike.total_partner_investment, 1200.0);
    for partner in service.store().fetch_all::<Partner>().await.expect("partners") {
        assert_eq!(partner.total_investment, 100.0);
    }
    assert!(audit(&service).await.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_concurrent_sale_wins() {
    let service = patient(&service_with(&["bike-a"], &["partner-p"]).await);
    invest(&service, "partner-p", "bike-a", 500.0, 25.0).await;

    let tasks = (0..8).map(|_| {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .sell_bike(&sale("bike-a", 500.0, &[("partner-p", 125.0)]))
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.iter().filter_map(|result| result.as_ref().err()) {
        assert!(
            matches!(err.code, ErrorCode::InvalidState | ErrorCode::TransactionError),
            "unexpected error {err}"
        );
    }

    let records = service.store().fetch_all::<SellRecord>().await.expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(partner(&service, "partner-p").await.total_profit_earned, 125.0);
    assert!(audit(&service).await.is_consistent());
}

#[tokio::test]
async fn test_conflict_is_retried_transparently() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    service.store().inject_conflicts(2);

    invest(&service, "partner-p", "bike-a", 250.0, 10.0).await;

    assert_eq!(bike(&service, "bike-a").await.total_partner_investment, 250.0);
    let stats = service.store().stats().await;
    assert_eq!(stats.conflicts, 2);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_exhausted_retries_leave_no_trace() {
    let service = service_with(&["bike-a"], &["partner-p"]).await;
    let before = service.store().export_snapshot().await;
    service.store().inject_conflicts(100);

    let err = service
        .update_partner_investment(&InvestmentChange {
            partner_id: "partner-p".into(),
            bike_id: "bike-a".into(),
            amount: 250.0,
            profit_share: 10.0,
            action: InvestmentAction::Add,
        })
        .await
        .expect_err("every commit conflicts");
    assert_eq!(err.code, ErrorCode::TransactionError);
    assert!(err.message.contains("5 attempt"));

    service.store().inject_conflicts(0);
    assert_eq!(before.documents, service.store().export_snapshot().await.documents);
    assert_eq!(service.store().stats().await.active, 0);
}
