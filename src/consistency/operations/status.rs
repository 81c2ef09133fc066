use super::{CrossCollectionHandler, active_sell_records, load_bike, load_sell_record};
use crate::consistency::commands::{StatusOutcome, StatusTransition};
use crate::consistency::error::{ConsistencyError, ConsistencyResult};
use crate::core::SellRecordId;
use crate::model::{Bike, BikeStatus};
use crate::transaction::{TxSession, TxSessionExt};
use chrono::{DateTime, Utc};
use tracing::{Level, event};

fn transition_allowed(from: BikeStatus, to: BikeStatus) -> bool {
    use BikeStatus::*;
    matches!(
        (from, to),
        (Available, Sold)
            | (Reserved, Sold)
            | (Sold, Available)
            | (Available, Reserved)
            | (Reserved, Available)
            | (Available, Maintenance)
            | (Maintenance, Available)
    )
}

impl CrossCollectionHandler {
    /// Moves a bike to `new_status`, keeping the sold fields and the
    /// bike's sell records in step with it.
    pub async fn update_bike_status<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        transition: &StatusTransition,
    ) -> ConsistencyResult<StatusOutcome> {
        let mut bike = load_bike(tx, &transition.bike_id).await?;
        let previous = bike.status;
        let target = transition.new_status;

        if previous == target {
            if target == BikeStatus::Sold {
                return Err(ConsistencyError::invalid_state(format!(
                    "bike '{}' is already sold",
                    bike.id
                )));
            }
            return Ok(StatusOutcome {
                bike_id: bike.id,
                previous,
                current: target,
                cascaded: Vec::new(),
            });
        }

        if !transition_allowed(previous, target) {
            return Err(ConsistencyError::invalid_state(format!(
                "bike '{}' cannot move from {previous} to {target}",
                bike.id
            )));
        }

        let now = self.now();
        let mut cascaded = Vec::new();
        match target {
            BikeStatus::Sold => self.attach_sell_record(tx, &mut bike, transition).await?,
            _ if previous == BikeStatus::Sold => {
                bike.clear_sold_fields();
                cascaded = self
                    .cancel_active_records(tx, &mut bike, None, "bike status reverted", now)
                    .await?;
            }
            _ => {}
        }

        bike.status = target;
        bike.touch(&self.actor, now);
        tx.replace(&bike).await?;

        event!(
            Level::INFO,
            bike_id = %bike.id,
            from = %previous,
            to = %target,
            cascaded = cascaded.len(),
            "bike status updated"
        );

        Ok(StatusOutcome {
            bike_id: bike.id,
            previous,
            current: target,
            cascaded,
        })
    }

    /// Fills the sold fields from an existing active sell record of the bike.
    async fn attach_sell_record<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        bike: &mut Bike,
        transition: &StatusTransition,
    ) -> ConsistencyResult<()> {
        let Some(record_id) = &transition.sell_record_id else {
            return Err(ConsistencyError::validation(
                "sellRecordId is required to mark a bike sold",
            ));
        };
        let record = load_sell_record(tx, record_id).await?;
        if record.bike_id != bike.id {
            return Err(ConsistencyError::validation(format!(
                "sell record '{}' belongs to bike '{}', not '{}'",
                record.id, record.bike_id, bike.id
            )));
        }
        if !record.is_active() {
            return Err(ConsistencyError::invalid_state(format!(
                "sell record '{}' is cancelled",
                record.id
            )));
        }

        bike.sold_date = Some(record.sold_at);
        bike.sold_price = Some(record.selling_price);
        bike.customer_id = Some(
            transition
                .customer_id
                .clone()
                .unwrap_or_else(|| record.customer_id.clone()),
        );
        bike.sell_record_id = Some(record.id);
        Ok(())
    }

    /// Cancels every active sell record of `bike` except `keep`, reverting
    /// their distributed profit. Returns the ids cancelled.
    pub(super) async fn cancel_active_records<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        bike: &mut Bike,
        keep: Option<&SellRecordId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ConsistencyResult<Vec<SellRecordId>> {
        let mut cancelled = Vec::new();
        for mut record in active_sell_records(tx, &bike.id).await? {
            if Some(&record.id) == keep {
                continue;
            }
            self.revert_sell_record(tx, &mut record, bike, reason, now)
                .await?;
            cancelled.push(record.id);
        }
        if cancelled.len() > 1 || (keep.is_some() && !cancelled.is_empty()) {
            event!(
                Level::WARN,
                bike_id = %bike.id,
                cancelled = cancelled.len(),
                "cancelled surplus active sell records"
            );
        }
        Ok(cancelled)
    }
}
