use async_trait::async_trait;
use openaero_storage::{ReviewRecord, SolutionRecord};

#[derive(Debug, thiserror::Error)]
#[error("review notification failed: {0}")]
pub struct NotifyError(pub String);

/// Tells a creator how the review of their solution ended.
///
/// Called by the server after the review transaction has committed; a failure
/// here never undoes the review.
#[async_trait]
pub trait ReviewNotifier: Send + Sync {
    async fn review_completed(
        &self,
        solution: &SolutionRecord,
        review: &ReviewRecord,
    ) -> Result<(), NotifyError>;
}

/// Writes the outcome to the log instead of sending mail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl ReviewNotifier for LogNotifier {
    async fn review_completed(
        &self,
        solution: &SolutionRecord,
        review: &ReviewRecord,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            solution_id = %solution.id,
            creator_id = %solution.creator_id,
            decision = %review.decision,
            status = %solution.status,
            comments = review.comments.as_deref().unwrap_or(""),
            "review outcome notification"
        );
        Ok(())
    }
}
