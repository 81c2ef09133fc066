use super::{CrossCollectionHandler, load_bike};
use crate::consistency::commands::{RatingAction, RatingSummary, ReviewAggregation, ReviewEdit};
use crate::consistency::error::{ConsistencyError, ConsistencyResult};
use crate::core::{BikeId, ReviewId, round_to};
use crate::model::{Bike, Review};
use crate::transaction::{TxSession, TxSessionExt};
use tracing::{Level, event};

const MIN_RATING: f64 = 1.0;
const MAX_RATING: f64 = 5.0;

fn ensure_rating(rating: f64) -> ConsistencyResult<()> {
    if !rating.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(ConsistencyError::validation(format!(
            "rating must be within [{MIN_RATING}, {MAX_RATING}], got {rating}"
        )));
    }
    Ok(())
}

/// Mean and count of `ratings`, the mean rounded to `decimals`.
pub(crate) fn summarize(ratings: &[f64], decimals: u32) -> RatingSummary {
    if ratings.is_empty() {
        return RatingSummary {
            average_rating: 0.0,
            total_reviews: 0,
        };
    }
    let sum: f64 = ratings.iter().sum();
    RatingSummary {
        average_rating: round_to(sum / ratings.len() as f64, decimals),
        total_reviews: ratings.len() as u64,
    }
}

impl CrossCollectionHandler {
    /// Folds one rating change into the bike's stored average and count.
    pub async fn update_review_aggregation<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        aggregation: &ReviewAggregation,
    ) -> ConsistencyResult<RatingSummary> {
        let mut bike = load_bike(tx, &aggregation.bike_id).await?;
        let summary = match aggregation.action {
            RatingAction::Add(rating) => {
                ensure_rating(rating)?;
                let count = bike.total_reviews as f64;
                RatingSummary {
                    average_rating: round_to(
                        (bike.average_rating * count + rating) / (count + 1.0),
                        self.rating_decimals,
                    ),
                    total_reviews: bike.total_reviews + 1,
                }
            }
            RatingAction::Remove(rating) => {
                super::ensure_money("rating", rating)?;
                if bike.total_reviews <= 1 {
                    RatingSummary {
                        average_rating: 0.0,
                        total_reviews: 0,
                    }
                } else {
                    let count = bike.total_reviews as f64;
                    let average = (bike.average_rating * count - rating) / (count - 1.0);
                    RatingSummary {
                        average_rating: round_to(average.max(0.0), self.rating_decimals),
                        total_reviews: bike.total_reviews - 1,
                    }
                }
            }
            RatingAction::Recompute => self.recompute_rating(tx, &bike.id).await?,
        };

        self.store_summary(tx, &mut bike, summary).await?;
        Ok(summary)
    }

    async fn recompute_rating<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        bike_id: &BikeId,
    ) -> ConsistencyResult<RatingSummary> {
        let ratings: Vec<f64> = tx
            .scan::<Review>()
            .await?
            .into_iter()
            .filter(|review| &review.bike_id == bike_id)
            .map(|review| review.rating)
            .collect();
        Ok(summarize(&ratings, self.rating_decimals))
    }

    async fn store_summary<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        bike: &mut Bike,
        summary: RatingSummary,
    ) -> ConsistencyResult<()> {
        bike.average_rating = summary.average_rating;
        bike.total_reviews = summary.total_reviews;
        bike.touch(&self.actor, self.now());
        tx.replace(&*bike).await?;
        event!(
            Level::DEBUG,
            bike_id = %bike.id,
            average = summary.average_rating,
            count = summary.total_reviews,
            "rating aggregate stored"
        );
        Ok(())
    }

    /// Inserts a review and re-derives the bike aggregate from the stored
    /// reviews, so rounded averages never accumulate error.
    pub async fn record_review<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        review: &Review,
    ) -> ConsistencyResult<RatingSummary> {
        ensure_rating(review.rating)?;
        load_bike(tx, &review.bike_id).await?;
        tx.insert(review).await?;
        self.update_review_aggregation(
            tx,
            &ReviewAggregation {
                bike_id: review.bike_id.clone(),
                action: RatingAction::Recompute,
            },
        )
        .await
    }

    /// Changes a review's rating. Edits are not algebraic, so the aggregate
    /// is recomputed from every review of the bike.
    pub async fn edit_review_rating<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        edit: &ReviewEdit,
    ) -> ConsistencyResult<RatingSummary> {
        ensure_rating(edit.rating)?;
        let mut review = load_review(tx, &edit.review_id).await?;
        review.rating = edit.rating;
        tx.replace(&review).await?;
        self.update_review_aggregation(
            tx,
            &ReviewAggregation {
                bike_id: review.bike_id,
                action: RatingAction::Recompute,
            },
        )
        .await
    }

    /// Deletes a review and recomputes the bike aggregate.
    pub async fn delete_review<T: TxSession + ?Sized>(
        &self,
        tx: &T,
        review_id: &ReviewId,
    ) -> ConsistencyResult<RatingSummary> {
        let review = load_review(tx, review_id).await?;
        tx.delete::<Review>(review.id.as_str()).await?;
        self.update_review_aggregation(
            tx,
            &ReviewAggregation {
                bike_id: review.bike_id,
                action: RatingAction::Recompute,
            },
        )
        .await
    }
}

async fn load_review<T: TxSession + ?Sized>(
    tx: &T,
    review_id: &ReviewId,
) -> ConsistencyResult<Review> {
    tx.find::<Review>(review_id.as_str())
        .await?
        .ok_or_else(|| ConsistencyError::not_found("Review", review_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_empty_is_zero() {
        let summary = summarize(&[], 2);
        assert_eq!(summary.total_reviews, 0);
        assert_eq!(summary.average_rating, 0.0);
    }

    #[test]
    fn test_summarize_rounds_average() {
        let summary = summarize(&[5.0, 4.0, 4.0], 2);
        assert_eq!(summary.total_reviews, 3);
        assert_eq!(summary.average_rating, 4.33);
    }

    #[test]
    fn test_rating_bounds() {
        assert!(ensure_rating(1.0).is_ok());
        assert!(ensure_rating(5.0).is_ok());
        assert!(ensure_rating(0.5).is_err());
        assert!(ensure_rating(f64::NAN).is_err());
    }
}
