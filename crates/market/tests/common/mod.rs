#![allow(dead_code)]

use openaero_market::lifecycle::{self, NewSolution};
use openaero_market::review::{self, CompleteReview, ReviewScores};
use openaero_market::{Actor, Role};
use openaero_storage::{MemoryStorage, ReviewDecision, SolutionRecord};
use rust_decimal::Decimal;

pub fn creator() -> Actor {
    Actor::new("creator-1", Role::Creator)
}

pub fn reviewer() -> Actor {
    Actor::new("reviewer-1", Role::Reviewer)
}

pub fn admin() -> Actor {
    Actor::new("admin-1", Role::Admin)
}

pub fn buyer() -> Actor {
    Actor::new("buyer-1", Role::User)
}

pub async fn draft(storage: &MemoryStorage, title: &str) -> SolutionRecord {
    lifecycle::create_solution(
        storage,
        &creator(),
        NewSolution {
            title: title.to_string(),
            description: "Heavy-lift octocopter for crop spraying".to_string(),
            category: Some("agriculture".to_string()),
            price: Decimal::new(129900, 2),
        },
    )
    .await
    .unwrap()
}

pub async fn pending(storage: &MemoryStorage, title: &str) -> SolutionRecord {
    let sol = draft(storage, title).await;
    lifecycle::submit_solution(storage, &creator(), &sol.id)
        .await
        .unwrap()
}

pub fn decision(decision: ReviewDecision) -> CompleteReview {
    CompleteReview {
        decision,
        scores: ReviewScores {
            quality: Some(8),
            completeness: Some(7),
            innovation: Some(6),
            market_potential: Some(9),
        },
        comments: Some("Solid build sheet".to_string()),
        suggestions: None,
    }
}

/// A solution taken all the way to PUBLISHED.
pub async fn published(storage: &MemoryStorage, title: &str) -> SolutionRecord {
    let sol = pending(storage, title).await;
    review::start_review(storage, &reviewer(), &sol.id)
        .await
        .unwrap();
    review::complete_review(storage, &reviewer(), &sol.id, decision(ReviewDecision::Approved))
        .await
        .unwrap();
    lifecycle::publish_solution(storage, &admin(), &sol.id)
        .await
        .unwrap()
}
