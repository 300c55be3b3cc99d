use serde::Serialize;
use tracing::info;

use crate::client::ClientHandle;
use crate::errors::{MarketError, MarketResult};
use crate::models::{tables, Review};
use crate::query::{Direction, Query};

#[derive(Serialize)]
struct NewReviewRow<'a> {
    product_id: i64,
    user_id: &'a str,
    rating: u8,
    comment: Option<&'a str>,
}

#[derive(Clone)]
pub struct ReviewService {
    handle: ClientHandle,
}

impl ReviewService {
    pub fn new(handle: ClientHandle) -> Self {
        Self { handle }
    }

    /// Reviews for a product, newest first.
    pub async fn list_reviews(&self, product_id: i64) -> MarketResult<Vec<Review>> {
        self.handle
            .client()
            .fetch(
                Query::table(tables::REVIEWS)
                    .eq("product_id", product_id)
                    .order("created_at", Direction::Desc),
            )
            .await
    }

    pub async fn add_review(&self, product_id: i64, rating: u8, comment: Option<&str>) -> MarketResult<Review> {
        let session = self.handle.require_session()?;
        if !(1..=5).contains(&rating) {
            return Err(MarketError::validation("rating", "must be between 1 and 5"));
        }
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());

        let row = NewReviewRow {
            product_id,
            user_id: &session.id,
            rating,
            comment,
        };
        let review: Review = self.handle.client().insert_one(tables::REVIEWS, &row).await?;
        info!(review_id = review.id, product_id, rating, "review added");
        Ok(review)
    }
}

/// Mean rating rounded to one decimal, `None` without reviews.
pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let total: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
    let mean = f64::from(total) / reviews.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}
