//! Canonical `PlanReview` serialization.
//!
//! Keys sorted, UTF-8, no NaN/Infinity, timestamps ISO-8601 UTC with a
//! trailing `Z`, optional fields omitted. Serializing the same review twice
//! (masking `generated_at`) yields byte-identical output.

use chrono::{DateTime, Utc};

use namegnome_model::PlanReview;

use crate::error::{CoreError, Result};

/// `generated_at` value substituted when masking.
const MASK_EPOCH: i64 = 0;

fn check_finite(review: &PlanReview) -> Result<()> {
    let all_finite = review
        .items
        .iter()
        .all(|item| item.confidence.is_finite())
        && review
            .groups
            .iter()
            .all(|g| g.rollup.min_confidence.is_finite() && g.rollup.max_confidence.is_finite());
    if all_finite {
        Ok(())
    } else {
        Err(CoreError::Fatal(
            "non-finite confidence in plan review".to_string(),
        ))
    }
}

/// Canonical bytes of a review. `serde_json`'s default map is ordered, so
/// converting through `Value` sorts every object key.
pub fn to_canonical_json(review: &PlanReview) -> Result<String> {
    check_finite(review)?;
    let value = serde_json::to_value(review)?;
    Ok(serde_json::to_string(&value)?)
}

/// Canonical bytes with `generated_at` pinned to the epoch; the form used
/// for byte-reproducibility comparisons.
pub fn to_canonical_json_masked(review: &PlanReview) -> Result<String> {
    let mut masked = review.clone();
    masked.generated_at = DateTime::<Utc>::from_timestamp(MASK_EPOCH, 0)
        .unwrap_or_else(Utc::now);
    to_canonical_json(&masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use namegnome_model::{MediaType, PlanSummary};
    use uuid::Uuid;

    fn empty_review() -> PlanReview {
        PlanReview {
            plan_id: Uuid::nil(),
            schema_version: "1.0".to_string(),
            generated_at: Utc::now(),
            scan_id: Uuid::nil(),
            source_fingerprint: "f".repeat(64),
            media_type: MediaType::Tv,
            summary: PlanSummary::default(),
            groups: Vec::new(),
            items: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn keys_are_sorted() {
        let json = to_canonical_json(&empty_review()).unwrap();
        let generated = json.find("\"generated_at\"").unwrap();
        let groups = json.find("\"groups\"").unwrap();
        let items = json.find("\"items\"").unwrap();
        assert!(generated < groups && groups < items);
    }

    #[test]
    fn masked_serialization_is_reproducible() {
        let mut review = empty_review();
        let first = to_canonical_json_masked(&review).unwrap();
        // A different wall clock must not leak into the masked bytes.
        review.generated_at = Utc::now();
        let second = to_canonical_json_masked(&review).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn timestamps_end_with_z() {
        let json = to_canonical_json(&empty_review()).unwrap();
        assert!(json.contains("Z\""));
    }
}
