//! The solution review state machine.
//!
//! A review starts IN_PROGRESS against a PENDING_REVIEW solution and is
//! completed with a decision that moves the solution to APPROVED or REJECTED
//! (or leaves it PENDING_REVIEW for NEEDS_REVISION). At most one review per
//! solution is IN_PROGRESS at a time.

use openaero_storage::{
    MarketStorage, ReviewDecision, ReviewRecord, ReviewStatus, SolutionRecord, SolutionStatus,
};
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, Role};
use crate::clock;
use crate::error::MarketError;
use crate::lifecycle::{ensure_transition, save_solution};

/// Optional reviewer scores, each 1..=10.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewScores {
    #[serde(default)]
    pub quality: Option<i32>,
    #[serde(default)]
    pub completeness: Option<i32>,
    #[serde(default)]
    pub innovation: Option<i32>,
    #[serde(default)]
    pub market_potential: Option<i32>,
}

impl ReviewScores {
    pub fn validate(&self) -> Result<(), MarketError> {
        let named = [
            ("quality", self.quality),
            ("completeness", self.completeness),
            ("innovation", self.innovation),
            ("marketPotential", self.market_potential),
        ];
        let problems: Vec<String> = named
            .iter()
            .filter_map(|(name, score)| match score {
                Some(s) if !(1..=10).contains(s) => {
                    Some(format!("{name} score must be between 1 and 10, got {s}"))
                }
                _ => None,
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(MarketError::Validation(problems.join("; ")))
        }
    }

    fn apply(&self, review: &mut ReviewRecord) {
        review.quality_score = self.quality;
        review.completeness_score = self.completeness;
        review.innovation_score = self.innovation;
        review.market_potential_score = self.market_potential;
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReview {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub scores: ReviewScores,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub suggestions: Option<String>,
}

/// An ad hoc review record written outside the start/complete flow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReviewRecord {
    #[serde(default)]
    pub reviewer_id: Option<String>,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub scores: ReviewScores,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub suggestions: Option<String>,
}

/// The completed review together with the solution as it now stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewOutcome {
    pub review: ReviewRecord,
    pub solution: SolutionRecord,
}

fn target_status(decision: ReviewDecision) -> Result<SolutionStatus, MarketError> {
    match decision {
        ReviewDecision::Approved => Ok(SolutionStatus::Approved),
        ReviewDecision::Rejected => Ok(SolutionStatus::Rejected),
        ReviewDecision::NeedsRevision => Ok(SolutionStatus::PendingReview),
        ReviewDecision::Pending => Err(MarketError::Validation(
            "a review cannot be completed with decision PENDING".to_string(),
        )),
    }
}

/// Open an IN_PROGRESS review on a PENDING_REVIEW solution.
pub async fn start_review<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
) -> Result<ReviewRecord, MarketError> {
    actor.require(&[Role::Reviewer, Role::Admin], "start reviews")?;

    let mut snap = storage.begin_snapshot().await?;
    let solution = storage.get_solution_for_update(&mut snap, solution_id).await?;
    if solution.status != SolutionStatus::PendingReview {
        return Err(MarketError::Conflict(format!(
            "solution {solution_id} is {}, not PENDING_REVIEW",
            solution.status
        )));
    }
    if let Some(open) = storage.find_in_progress_review(&mut snap, solution_id).await? {
        return Err(MarketError::Conflict(format!(
            "review {} by {} is already in progress",
            open.id, open.reviewer_id
        )));
    }

    let now = clock::now();
    let review = ReviewRecord {
        id: clock::new_id(),
        solution_id: solution_id.to_string(),
        reviewer_id: actor.user_id.clone(),
        status: ReviewStatus::InProgress,
        decision: ReviewDecision::Pending,
        from_status: SolutionStatus::PendingReview,
        to_status: None,
        quality_score: None,
        completeness_score: None,
        innovation_score: None,
        market_potential_score: None,
        comments: None,
        suggestions: None,
        started_at: now.clone(),
        completed_at: None,
        created_at: now.clone(),
        updated_at: now,
    };
    storage.insert_review(&mut snap, review.clone()).await?;
    storage.commit_snapshot(snap).await?;

    tracing::info!(solution_id, review_id = %review.id, reviewer_id = %review.reviewer_id, "review started");
    Ok(review)
}

/// Close the IN_PROGRESS review with a decision and apply it to the solution.
///
/// Only the reviewer who started the review, or an admin, may complete it.
pub async fn complete_review<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
    input: CompleteReview,
) -> Result<ReviewOutcome, MarketError> {
    actor.require(&[Role::Reviewer, Role::Admin], "complete reviews")?;
    let target = target_status(input.decision)?;
    input.scores.validate()?;

    let mut snap = storage.begin_snapshot().await?;
    let mut solution = storage.get_solution_for_update(&mut snap, solution_id).await?;
    let mut review = storage
        .find_in_progress_review(&mut snap, solution_id)
        .await?
        .ok_or_else(|| {
            MarketError::Conflict(format!("no review in progress for solution {solution_id}"))
        })?;
    if review.reviewer_id != actor.user_id && !actor.is_admin() {
        return Err(MarketError::Forbidden(format!(
            "review {} belongs to {}",
            review.id, review.reviewer_id
        )));
    }
    if solution.status != SolutionStatus::PendingReview {
        return Err(MarketError::Conflict(format!(
            "solution {solution_id} is {}, not PENDING_REVIEW",
            solution.status
        )));
    }

    let now = clock::now();
    if target != solution.status {
        ensure_transition(&solution, target)?;
        solution.status = target;
        solution.reviewed_at = Some(now.clone());
        solution.updated_at = now.clone();
        solution = save_solution(storage, &mut snap, solution).await?;
    }

    review.status = ReviewStatus::Completed;
    review.decision = input.decision;
    review.to_status = Some(target);
    input.scores.apply(&mut review);
    review.comments = input.comments;
    review.suggestions = input.suggestions;
    review.completed_at = Some(now.clone());
    review.updated_at = now;
    storage.update_review(&mut snap, review.clone()).await?;
    storage.commit_snapshot(snap).await?;

    tracing::info!(
        solution_id,
        review_id = %review.id,
        decision = %review.decision,
        status = %solution.status,
        "review completed"
    );
    Ok(ReviewOutcome { review, solution })
}

/// Record a review against the solution's current status without changing
/// the solution. A PENDING decision opens an IN_PROGRESS review and is
/// subject to the one-in-progress rule.
pub async fn create_review_record<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
    input: NewReviewRecord,
) -> Result<ReviewRecord, MarketError> {
    actor.require(&[Role::Reviewer, Role::Admin], "record reviews")?;
    let reviewer_id = input
        .reviewer_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| MarketError::Validation("reviewer id is required".to_string()))?;
    input.scores.validate()?;

    let mut snap = storage.begin_snapshot().await?;
    let solution = storage.get_solution_for_update(&mut snap, solution_id).await?;

    let in_progress = input.decision == ReviewDecision::Pending;
    if in_progress {
        if let Some(open) = storage.find_in_progress_review(&mut snap, solution_id).await? {
            return Err(MarketError::Conflict(format!(
                "review {} is already in progress",
                open.id
            )));
        }
    }

    let now = clock::now();
    let mut review = ReviewRecord {
        id: clock::new_id(),
        solution_id: solution_id.to_string(),
        reviewer_id,
        status: if in_progress {
            ReviewStatus::InProgress
        } else {
            ReviewStatus::Completed
        },
        decision: input.decision,
        from_status: solution.status,
        to_status: Some(solution.status),
        quality_score: None,
        completeness_score: None,
        innovation_score: None,
        market_potential_score: None,
        comments: input.comments,
        suggestions: input.suggestions,
        started_at: now.clone(),
        completed_at: (!in_progress).then(|| now.clone()),
        created_at: now.clone(),
        updated_at: now,
    };
    input.scores.apply(&mut review);
    storage.insert_review(&mut snap, review.clone()).await?;
    storage.commit_snapshot(snap).await?;
    Ok(review)
}

pub async fn list_reviews<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
) -> Result<Vec<ReviewRecord>, MarketError> {
    actor.require(&[Role::Reviewer, Role::Admin], "list reviews")?;
    storage.get_solution(solution_id).await?;
    Ok(storage.list_reviews(solution_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_map_to_solution_status() {
        assert_eq!(
            target_status(ReviewDecision::Approved).unwrap(),
            SolutionStatus::Approved
        );
        assert_eq!(
            target_status(ReviewDecision::NeedsRevision).unwrap(),
            SolutionStatus::PendingReview
        );
        assert!(matches!(
            target_status(ReviewDecision::Pending),
            Err(MarketError::Validation(_))
        ));
    }

    #[test]
    fn scores_outside_range_are_all_reported() {
        let scores = ReviewScores {
            quality: Some(0),
            completeness: Some(10),
            innovation: Some(11),
            market_potential: None,
        };
        let msg = scores.validate().unwrap_err().to_string();
        assert!(msg.contains("quality score"), "{msg}");
        assert!(msg.contains("innovation score"), "{msg}");
        assert!(!msg.contains("completeness"), "{msg}");
    }

    #[test]
    fn complete_review_body_uses_camel_case() {
        let body: CompleteReview = serde_json::from_value(serde_json::json!({
            "decision": "NEEDS_REVISION",
            "scores": {"quality": 7, "marketPotential": 5},
            "comments": "Add wiring diagram"
        }))
        .unwrap();
        assert_eq!(body.decision, ReviewDecision::NeedsRevision);
        assert_eq!(body.scores.market_potential, Some(5));
        assert_eq!(body.suggestions, None);
    }
}
