//! Solution lifecycle: creation, submission, publication, visibility and
//! assets. Review transitions live in [`crate::review`].

use openaero_storage::{AssetKind, AssetRecord, MarketStorage, SolutionRecord, SolutionStatus};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::actor::{Actor, Role};
use crate::clock;
use crate::error::MarketError;

pub const MAX_TITLE_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct NewSolution {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAsset {
    pub kind: AssetKind,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// PUBLISHED solutions are public; anything else is visible to its owner and
/// to reviewers.
pub fn can_view(actor: &Actor, solution: &SolutionRecord) -> bool {
    solution.status == SolutionStatus::Published
        || actor.owns(&solution.creator_id)
        || actor.can_review()
}

/// Owners may change content while the solution is DRAFT or REJECTED; admins
/// always may.
pub fn can_edit_content(actor: &Actor, solution: &SolutionRecord) -> bool {
    actor.is_admin()
        || (actor.owns(&solution.creator_id)
            && matches!(
                solution.status,
                SolutionStatus::Draft | SolutionStatus::Rejected
            ))
}

pub(crate) fn ensure_transition(
    solution: &SolutionRecord,
    next: SolutionStatus,
) -> Result<(), MarketError> {
    if solution.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(MarketError::Conflict(format!(
            "solution {} is {}, cannot move to {next}",
            solution.id, solution.status
        )))
    }
}

/// Write `solution` back with a version check against its current version,
/// returning it with the new version applied.
pub(crate) async fn save_solution<S: MarketStorage>(
    storage: &S,
    snapshot: &mut S::Snapshot,
    mut solution: SolutionRecord,
) -> Result<SolutionRecord, MarketError> {
    let expected = solution.version;
    solution.version = storage
        .update_solution(snapshot, solution.clone(), expected)
        .await?;
    Ok(solution)
}

fn validate_new_solution(input: &NewSolution) -> Result<(), MarketError> {
    let mut problems = Vec::new();
    let title = input.title.trim();
    if title.is_empty() {
        problems.push("title must not be empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        problems.push(format!("title exceeds {MAX_TITLE_CHARS} characters"));
    }
    if input.price < Decimal::ZERO {
        problems.push("price must not be negative".to_string());
    }
    // Providers settle in fen; a finer price could never be matched.
    if input.price.normalize().scale() > 2 {
        problems.push(format!("price {} has more than two decimal places", input.price));
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(MarketError::Validation(problems.join("; ")))
    }
}

pub async fn create_solution<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    input: NewSolution,
) -> Result<SolutionRecord, MarketError> {
    actor.require(&[Role::Creator, Role::Admin], "create solutions")?;
    validate_new_solution(&input)?;

    let now = clock::now();
    let record = SolutionRecord {
        id: clock::new_id(),
        creator_id: actor.user_id.clone(),
        title: input.title.trim().to_string(),
        description: input.description,
        category: input.category.filter(|c| !c.trim().is_empty()),
        price: input.price,
        status: SolutionStatus::Draft,
        version: 0,
        bom: None,
        created_at: now.clone(),
        updated_at: now,
        submitted_at: None,
        reviewed_at: None,
        published_at: None,
    };

    let mut snap = storage.begin_snapshot().await?;
    storage.insert_solution(&mut snap, record.clone()).await?;
    storage.commit_snapshot(snap).await?;

    tracing::info!(solution_id = %record.id, creator_id = %record.creator_id, "solution created");
    Ok(record)
}

/// DRAFT or REJECTED -> PENDING_REVIEW.
pub async fn submit_solution<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
) -> Result<SolutionRecord, MarketError> {
    let mut snap = storage.begin_snapshot().await?;
    let mut solution = storage.get_solution_for_update(&mut snap, solution_id).await?;
    if !actor.owns(&solution.creator_id) && !actor.is_admin() {
        return Err(MarketError::Forbidden(format!(
            "only the creator may submit solution {solution_id}"
        )));
    }
    ensure_transition(&solution, SolutionStatus::PendingReview)?;

    let now = clock::now();
    solution.status = SolutionStatus::PendingReview;
    solution.submitted_at = Some(now.clone());
    solution.updated_at = now;
    let solution = save_solution(storage, &mut snap, solution).await?;
    storage.commit_snapshot(snap).await?;

    tracing::info!(solution_id, version = solution.version, "solution submitted for review");
    Ok(solution)
}

/// APPROVED -> PUBLISHED. Admin only.
pub async fn publish_solution<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
) -> Result<SolutionRecord, MarketError> {
    actor.require(&[Role::Admin], "publish solutions")?;

    let mut snap = storage.begin_snapshot().await?;
    let mut solution = storage.get_solution_for_update(&mut snap, solution_id).await?;
    ensure_transition(&solution, SolutionStatus::Published)?;

    let now = clock::now();
    solution.status = SolutionStatus::Published;
    solution.published_at = Some(now.clone());
    solution.updated_at = now;
    let solution = save_solution(storage, &mut snap, solution).await?;
    storage.commit_snapshot(snap).await?;

    tracing::info!(solution_id, "solution published");
    Ok(solution)
}

pub async fn get_solution<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
) -> Result<SolutionRecord, MarketError> {
    let solution = storage.get_solution(solution_id).await?;
    if !can_view(actor, &solution) {
        return Err(MarketError::Forbidden(format!(
            "solution {solution_id} is not published"
        )));
    }
    Ok(solution)
}

/// Solutions waiting for review, oldest first.
pub async fn review_queue<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    limit: usize,
) -> Result<Vec<SolutionRecord>, MarketError> {
    actor.require(&[Role::Reviewer, Role::Admin], "view the review queue")?;
    Ok(storage
        .list_solutions(Some(SolutionStatus::PendingReview), limit)
        .await?)
}

pub async fn add_asset<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
    input: NewAsset,
) -> Result<AssetRecord, MarketError> {
    let parsed = url::Url::parse(input.url.trim())
        .map_err(|e| MarketError::Validation(format!("asset url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(MarketError::Validation(format!(
            "asset url must be http or https, got {}",
            parsed.scheme()
        )));
    }

    let mut snap = storage.begin_snapshot().await?;
    let solution = storage.get_solution_for_update(&mut snap, solution_id).await?;
    if !can_edit_content(actor, &solution) {
        return Err(MarketError::Forbidden(format!(
            "cannot edit assets of solution {solution_id} while it is {}",
            solution.status
        )));
    }

    let record = AssetRecord {
        id: clock::new_id(),
        solution_id: solution_id.to_string(),
        kind: input.kind,
        url: parsed.to_string(),
        title: input.title,
        description: input.description,
        created_at: clock::now(),
    };
    storage.insert_asset(&mut snap, record.clone()).await?;
    storage.commit_snapshot(snap).await?;
    Ok(record)
}

pub async fn list_assets<S: MarketStorage>(
    storage: &S,
    actor: &Actor,
    solution_id: &str,
) -> Result<Vec<AssetRecord>, MarketError> {
    get_solution(storage, actor, solution_id).await?;
    Ok(storage.list_assets(solution_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openaero_storage::MemoryStorage;

    fn creator() -> Actor {
        Actor::new("creator-1", Role::Creator)
    }

    fn new_solution(title: &str) -> NewSolution {
        NewSolution {
            title: title.to_string(),
            description: "Long-range mapping quad".to_string(),
            category: Some("mapping".to_string()),
            price: Decimal::new(99900, 2),
        }
    }

    #[tokio::test]
    async fn create_starts_as_draft() {
        let storage = MemoryStorage::new();
        let sol = create_solution(&storage, &creator(), new_solution("  Mapper X  "))
            .await
            .unwrap();
        assert_eq!(sol.status, SolutionStatus::Draft);
        assert_eq!(sol.version, 0);
        assert_eq!(sol.title, "Mapper X");
        assert_eq!(storage.get_solution(&sol.id).await.unwrap(), sol);
    }

    #[tokio::test]
    async fn create_validates_all_fields_at_once() {
        let storage = MemoryStorage::new();
        let mut input = new_solution("   ");
        input.price = Decimal::new(-1, 0);
        let err = create_solution(&storage, &creator(), input)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("title must not be empty"), "{msg}");
        assert!(msg.contains("price must not be negative"), "{msg}");

        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        let err = create_solution(&storage, &creator(), new_solution(&long))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[tokio::test]
    async fn sub_fen_prices_are_rejected() {
        let storage = MemoryStorage::new();
        let mut input = new_solution("Fractional");
        input.price = Decimal::new(10005, 3);
        let err = create_solution(&storage, &creator(), input)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("two decimal places"), "{err}");

        // Trailing zeros are not extra precision.
        let mut input = new_solution("Padded");
        input.price = Decimal::new(1_000_000, 5);
        let sol = create_solution(&storage, &creator(), input).await.unwrap();
        assert_eq!(sol.price, Decimal::new(10, 0));
    }

    #[tokio::test]
    async fn plain_users_cannot_create() {
        let storage = MemoryStorage::new();
        let err = create_solution(&storage, &Actor::new("u", Role::User), new_solution("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));
    }

    #[tokio::test]
    async fn submit_and_publish_follow_the_lifecycle() {
        let storage = MemoryStorage::new();
        let admin = Actor::new("admin-1", Role::Admin);
        let sol = create_solution(&storage, &creator(), new_solution("A"))
            .await
            .unwrap();

        let err = publish_solution(&storage, &admin, &sol.id).await.unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));

        let other = Actor::new("creator-2", Role::Creator);
        let err = submit_solution(&storage, &other, &sol.id).await.unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));

        let submitted = submit_solution(&storage, &creator(), &sol.id).await.unwrap();
        assert_eq!(submitted.status, SolutionStatus::PendingReview);
        assert_eq!(submitted.version, 1);
        assert!(submitted.submitted_at.is_some());

        let err = submit_solution(&storage, &creator(), &sol.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Conflict(_)));
    }

    #[tokio::test]
    async fn drafts_are_hidden_from_other_users() {
        let storage = MemoryStorage::new();
        let sol = create_solution(&storage, &creator(), new_solution("A"))
            .await
            .unwrap();

        let stranger = Actor::new("buyer-1", Role::User);
        let err = get_solution(&storage, &stranger, &sol.id).await.unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));

        let reviewer = Actor::new("rev-1", Role::Reviewer);
        assert!(get_solution(&storage, &reviewer, &sol.id).await.is_ok());
        assert!(get_solution(&storage, &creator(), &sol.id).await.is_ok());

        let err = get_solution(&storage, &stranger, "missing").await.unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));
    }

    #[tokio::test]
    async fn assets_require_edit_rights_and_http_urls() {
        let storage = MemoryStorage::new();
        let sol = create_solution(&storage, &creator(), new_solution("A"))
            .await
            .unwrap();
        let asset = NewAsset {
            kind: AssetKind::Image,
            url: "https://cdn.example.com/a.png".to_string(),
            title: Some("Front view".to_string()),
            description: None,
        };

        let added = add_asset(&storage, &creator(), &sol.id, asset.clone())
            .await
            .unwrap();
        assert_eq!(added.kind, AssetKind::Image);

        let bad = NewAsset {
            url: "ftp://cdn.example.com/a.png".to_string(),
            ..asset.clone()
        };
        let err = add_asset(&storage, &creator(), &sol.id, bad).await.unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));

        submit_solution(&storage, &creator(), &sol.id).await.unwrap();
        let err = add_asset(&storage, &creator(), &sol.id, asset)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));

        let assets = list_assets(&storage, &creator(), &sol.id).await.unwrap();
        assert_eq!(assets, vec![added]);
    }
}
