#![allow(dead_code)]

use bikemart::consistency::{
    AuditReport, AuditScope, BikeSale, InvestmentAction, InvestmentChange, SaleOutcome,
};
use bikemart::model::{Bike, Partner, ProfitDistribution};
use bikemart::{Actor, AdminService, EngineConfig, InMemoryDocumentStore, RetryPolicy};

pub type Service = AdminService<InMemoryDocumentStore>;

pub fn config() -> EngineConfig {
    EngineConfig::default().retry(RetryPolicy::default().max_attempts(5).backoff_ms(1, 5))
}

/// Service over a store seeded with available bikes and empty partners.
pub async fn service_with(bikes: &[&str], partners: &[&str]) -> Service {
    let store = InMemoryDocumentStore::new();
    for id in bikes {
        store
            .seed(&Bike::new(*id, format!("Bike {id}")))
            .await
            .expect("seed bike");
    }
    for id in partners {
        store
            .seed(&Partner::new(*id, format!("Partner {id}")))
            .await
            .expect("seed partner");
    }
    AdminService::new(store, &config()).acting_as(Actor::new("admin@test"))
}

pub async fn invest(service: &Service, partner: &str, bike: &str, amount: f64, share: f64) {
    service
        .update_partner_investment(&InvestmentChange {
            partner_id: partner.into(),
            bike_id: bike.into(),
            amount,
            profit_share: share,
            action: InvestmentAction::Add,
        })
        .await
        .expect("add investment");
}

pub fn sale(bike: &str, profit: f64, distribution: &[(&str, f64)]) -> BikeSale {
    BikeSale {
        bike_id: bike.into(),
        customer_id: "customer-1".into(),
        selling_price: 2500.0,
        profit: Some(profit),
        profit_distribution: distribution
            .iter()
            .map(|(partner, amount)| ProfitDistribution::new(*partner, *amount))
            .collect(),
    }
}

pub async fn sell(
    service: &Service,
    bike: &str,
    profit: f64,
    distribution: &[(&str, f64)],
) -> SaleOutcome {
    service
        .sell_bike(&sale(bike, profit, distribution))
        .await
        .expect("sell bike")
}

pub async fn bike(service: &Service, id: &str) -> Bike {
    service
        .store()
        .fetch::<Bike>(id)
        .await
        .expect("fetch bike")
        .expect("bike exists")
}

pub async fn partner(service: &Service, id: &str) -> Partner {
    service
        .store()
        .fetch::<Partner>(id)
        .await
        .expect("fetch partner")
        .expect("partner exists")
}

pub async fn audit(service: &Service) -> AuditReport {
    service
        .validate_data_consistency(AuditScope::All)
        .await
        .expect("audit")
}

/// Rewrites a committed bike outside any transaction.
pub async fn drift_bike(service: &Service, id: &str, change: impl FnOnce(&mut Bike)) {
    let mut current = bike(service, id).await;
    change(&mut current);
    service.store().seed(&current).await.expect("seed bike");
}

/// Rewrites a committed partner outside any transaction.
pub async fn drift_partner(service: &Service, id: &str, change: impl FnOnce(&mut Partner)) {
    let mut current = partner(service, id).await;
    change(&mut current);
    service.store().seed(&current).await.expect("seed partner");
}

pub fn kinds(report: &AuditReport) -> Vec<&'static str> {
    report
        .inconsistencies
        .iter()
        .map(|item| item.kind().as_str())
        .collect()
}
