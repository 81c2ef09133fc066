//! Composite operation catalog.
//!
//! Each operation is a read-modify-write over typed documents inside the
//! caller's transaction: it loads what it needs, computes the new embedded
//! arrays and totals in memory, then issues whole-document writes. None of
//! them opens or commits a transaction; the caller's `UnitOfWork` does.

mod investment;
mod maintenance;
mod payout;
mod review;
mod sale;
mod status;

use super::error::{ConsistencyError, ConsistencyResult};
use crate::core::{Actor, BikeId, MONEY_EPSILON, PartnerId, SellRecordId, round2};
use crate::model::{Bike, InvestmentStatus, Partner, SellRecord};
use crate::transaction::{TxSession, TxSessionExt};
use chrono::{DateTime, Utc};
use tracing::{Level, event};

pub(crate) use review::summarize;

/// Executes composite operations on behalf of one admin identity.
#[derive(Debug, Clone)]
pub struct CrossCollectionHandler {
    actor: Actor,
    rating_decimals: u32,
}

impl Default for CrossCollectionHandler {
    fn default() -> Self {
        Self::new(Actor::system())
    }
}

impl CrossCollectionHandler {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            rating_decimals: 2,
        }
    }

    pub fn with_rating_decimals(mut self, decimals: u32) -> Self {
        self.rating_decimals = decimals;
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Same handler acting for a different admin.
    pub fn acting_as(&self, actor: Actor) -> Self {
        Self {
            actor,
            rating_decimals: self.rating_decimals,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub(crate) async fn load_bike<T: TxSession + ?Sized>(
    tx: &T,
    bike_id: &BikeId,
) -> ConsistencyResult<Bike> {
    tx.find::<Bike>(bike_id.as_str())
        .await?
        .ok_or_else(|| ConsistencyError::not_found("Bike", bike_id))
}

pub(crate) async fn load_partner<T: TxSession + ?Sized>(
    tx: &T,
    partner_id: &PartnerId,
) -> ConsistencyResult<Partner> {
    tx.find::<Partner>(partner_id.as_str())
        .await?
        .ok_or_else(|| ConsistencyError::not_found("Partner", partner_id))
}

pub(crate) async fn load_sell_record<T: TxSession + ?Sized>(
    tx: &T,
    sell_record_id: &SellRecordId,
) -> ConsistencyResult<SellRecord> {
    tx.find::<SellRecord>(sell_record_id.as_str())
        .await?
        .ok_or_else(|| ConsistencyError::not_found("SellRecord", sell_record_id))
}

/// Active sell records of `bike_id`, oldest first.
pub(crate) async fn active_sell_records<T: TxSession + ?Sized>(
    tx: &T,
    bike_id: &BikeId,
) -> ConsistencyResult<Vec<SellRecord>> {
    let mut records: Vec<SellRecord> = tx
        .scan::<SellRecord>()
        .await?
        .into_iter()
        .filter(|record| &record.bike_id == bike_id && record.is_active())
        .collect();
    records.sort_by(|a, b| a.sold_at.cmp(&b.sold_at).then_with(|| a.id.cmp(&b.id)));
    Ok(records)
}

fn ensure_money(label: &str, value: f64) -> ConsistencyResult<()> {
    if !value.is_finite() {
        return Err(ConsistencyError::validation(format!(
            "{label} must be a finite number"
        )));
    }
    Ok(())
}

fn ensure_positive(label: &str, value: f64) -> ConsistencyResult<()> {
    ensure_money(label, value)?;
    if value <= 0.0 {
        return Err(ConsistencyError::validation(format!(
            "{label} must be greater than zero, got {value}"
        )));
    }
    Ok(())
}

fn ensure_non_negative(label: &str, value: f64) -> ConsistencyResult<()> {
    ensure_money(label, value)?;
    if value < 0.0 {
        return Err(ConsistencyError::validation(format!(
            "{label} must not be negative, got {value}"
        )));
    }
    Ok(())
}

/// Adds distributed profit to the partner's investment in `bike` and its
/// bike-side mirror.
fn credit_profit(
    partner: &mut Partner,
    bike: &mut Bike,
    amount: f64,
    actor: &Actor,
    now: DateTime<Utc>,
) -> ConsistencyResult<()> {
    let bike_id = bike.id.clone();
    let partner_id = partner.id.clone();
    let entry = partner.investment_in_mut(&bike_id).ok_or_else(|| {
        ConsistencyError::validation(format!(
            "partner '{partner_id}' has no investment in bike '{bike_id}'"
        ))
    })?;
    entry.profit_earned = round2(entry.profit_earned + amount);
    if entry.status == InvestmentStatus::Active {
        entry.status = InvestmentStatus::Completed;
    }

    partner.total_profit_earned = round2(partner.total_profit_earned + amount);
    partner.available_balance = round2(partner.available_balance + amount);
    partner.active_investments = partner.computed_active_investments();
    partner.touch(actor, now);

    if let Some(mirror) = bike.investment_of_mut(&partner.id) {
        mirror.profit_earned = round2(mirror.profit_earned + amount);
    }
    Ok(())
}

/// Takes previously credited profit back out, never below zero per entry.
///
/// Returns the amount actually reverted. Profit that already left the
/// partner's balance, either through a bike payout or a general one, cannot
/// be taken back and the revert is rejected.
fn debit_profit(
    partner: &mut Partner,
    bike: &mut Bike,
    amount: f64,
    actor: &Actor,
    now: DateTime<Utc>,
) -> ConsistencyResult<f64> {
    let bike_id = bike.id.clone();
    let partner_id = partner.id.clone();
    let balance = partner.available_balance;
    let Some(entry) = partner.investment_in_mut(&bike_id) else {
        event!(
            Level::WARN,
            partner_id = %partner_id,
            bike_id = %bike_id,
            "no investment to revert profit from"
        );
        return Ok(0.0);
    };

    let reverted = round2(amount.min(entry.profit_earned).max(0.0));
    if reverted > 0.0 && entry.status == InvestmentStatus::PaidOut {
        return Err(ConsistencyError::invalid_state(format!(
            "profit of partner '{partner_id}' on bike '{bike_id}' was already paid out"
        )));
    }
    if reverted > balance + MONEY_EPSILON {
        return Err(ConsistencyError::invalid_state(format!(
            "partner '{partner_id}' has {balance:.2} available, cannot revert {reverted:.2} of profit on bike '{bike_id}'"
        )));
    }

    entry.profit_earned = round2(entry.profit_earned - reverted);
    if entry.status == InvestmentStatus::Completed {
        entry.status = InvestmentStatus::Active;
    }

    partner.total_profit_earned = round2(partner.total_profit_earned - reverted);
    partner.available_balance = round2(partner.available_balance - reverted).max(0.0);
    partner.active_investments = partner.computed_active_investments();
    partner.touch(actor, now);

    if let Some(mirror) = bike.investment_of_mut(&partner_id) {
        mirror.profit_earned = round2((mirror.profit_earned - reverted).max(0.0));
    }
    Ok(reverted)
}
