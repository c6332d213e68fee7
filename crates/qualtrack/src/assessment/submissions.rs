use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::domain::{
    Actor, AttachmentId, CriterionId, CriterionPath, DecisionStatus, OutcomeId, QualificationId,
    Role, Submission, SubmissionId, UserId,
};
use super::store::{QualificationStore, StoreError, SubmissionStore, Visibility};

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("operation requires {0}")]
    Forbidden(&'static str),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accepted/outstanding split for one learner-qualification pair, both as
/// percentages rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompletionSummary {
    pub complete: f64,
    pub incomplete: f64,
}

/// Evidence lifecycle: learner submissions, assessor decisions, the IQA
/// overlay, and per-qualification completion.
pub struct SubmissionService<S> {
    store: Arc<S>,
}

impl<S> SubmissionService<S>
where
    S: QualificationStore + SubmissionStore + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Records evidence against a criterion. An In-progress submission by
    /// the same learner on the same criterion is updated in place rather
    /// than duplicated; attachment references are appended either way.
    pub fn submit_evidence(
        &self,
        actor: &Actor,
        path: &CriterionPath,
        comment: &str,
        attachment_refs: &[String],
    ) -> Result<Submission, SubmissionError> {
        if actor.role != Role::Learner {
            return Err(SubmissionError::Forbidden("a learner actor"));
        }
        self.store
            .criterion(path.qualification_id, path.ac_id, Visibility::Active)?
            .ok_or(SubmissionError::NotFound("assessment criterion"))?;

        let submission = match self.store.open_submission(actor.id, path)? {
            Some(mut open) => {
                open.comment = comment.to_string();
                self.store.update_submission(&open)?;
                open
            }
            None => self.store.insert_submission(actor.id, path, comment)?,
        };
        for reference in attachment_refs {
            self.store.insert_attachment(
                path.qualification_id,
                submission.id,
                reference,
                actor.id,
            )?;
        }
        tracing::info!(
            submission = submission.id.0,
            criterion = path.ac_id.0,
            attachments = attachment_refs.len(),
            "evidence recorded"
        );
        Ok(submission)
    }

    /// Removes one of the learner's own attachments. Rows owned by someone
    /// else, or under a different submission, are invisible to this call.
    pub fn delete_attachment(
        &self,
        actor: &Actor,
        qualification_id: QualificationId,
        submission_id: SubmissionId,
        attachment_id: AttachmentId,
    ) -> Result<(), SubmissionError> {
        if actor.role != Role::Learner {
            return Err(SubmissionError::Forbidden("a learner actor"));
        }
        let matched = self.store.delete_attachment(
            qualification_id,
            submission_id,
            attachment_id,
            actor.id,
        )?;
        if matched {
            Ok(())
        } else {
            Err(SubmissionError::NotFound("attachment"))
        }
    }

    /// Assessor decision on the learner's latest submission for a
    /// criterion. The status cascades to every active attachment.
    pub fn decide(
        &self,
        actor: &Actor,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
        status: DecisionStatus,
    ) -> Result<Submission, SubmissionError> {
        if actor.role != Role::Assessor {
            return Err(SubmissionError::Forbidden("an assessor actor"));
        }
        let mut submission = self
            .store
            .latest_submission(learner_id, qualification_id, ac_id)?
            .ok_or(SubmissionError::NotFound("submission"))?;
        submission.status = status.clone();
        submission.assessor_id = Some(actor.id);
        self.store.update_submission(&submission)?;
        self.store.set_attachment_statuses(submission.id, &status)?;
        tracing::info!(
            submission = submission.id.0,
            status = status.label(),
            "assessor decision recorded"
        );
        Ok(submission)
    }

    /// IQA overlay. With an outcome, stamps the learner's most recent
    /// submission (by creation time) for the criterion; assessors may also
    /// relay an outcome. Without one, records a standalone IQA comment
    /// against the criterion, which may itself already be tombstoned.
    pub fn record_iqa_outcome(
        &self,
        actor: &Actor,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
        outcome: Option<String>,
        comment: Option<String>,
    ) -> Result<(), SubmissionError> {
        match outcome {
            Some(outcome) => {
                if actor.role != Role::Iqa && actor.role != Role::Assessor {
                    return Err(SubmissionError::Forbidden("an iqa or assessor actor"));
                }
                let mut submission = self
                    .store
                    .latest_submission_by_time(learner_id, qualification_id, ac_id)?
                    .ok_or(SubmissionError::NotFound("submission"))?;
                submission.iqa_outcome = Some(outcome);
                submission.iqa_comment = comment;
                submission.iqa_id = Some(actor.id);
                self.store.update_submission(&submission)?;
                Ok(())
            }
            None => {
                if actor.role != Role::Iqa {
                    return Err(SubmissionError::Forbidden("an iqa actor"));
                }
                let comment = comment.ok_or(SubmissionError::MissingField("comment"))?;
                self.store
                    .criterion(qualification_id, ac_id, Visibility::IncludeDeleted)?
                    .ok_or(SubmissionError::NotFound("assessment criterion"))?;
                self.store.insert_iqa_comment(
                    qualification_id,
                    learner_id,
                    ac_id,
                    &comment,
                    actor.id,
                )?;
                Ok(())
            }
        }
    }

    /// Free-text assessor feedback against a learning outcome. The outcome
    /// is resolved tombstones included, so feedback on retired material
    /// still lands.
    pub fn record_assessor_feedback(
        &self,
        actor: &Actor,
        learner_id: UserId,
        qualification_id: QualificationId,
        lo_id: OutcomeId,
        comment: &str,
    ) -> Result<(), SubmissionError> {
        if actor.role != Role::Assessor {
            return Err(SubmissionError::Forbidden("an assessor actor"));
        }
        self.store
            .outcome(qualification_id, lo_id, Visibility::IncludeDeleted)?
            .ok_or(SubmissionError::NotFound("learning outcome"))?;
        self.store.insert_assessor_feedback(
            qualification_id,
            learner_id,
            lo_id,
            comment,
            actor.id,
        )?;
        Ok(())
    }

    /// Share of criteria with an accepted submission. The denominator
    /// counts criteria tombstones included, so completion never rises just
    /// because material was retired. No criteria at all reads as 0/100.
    pub fn completion_percentage(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
    ) -> Result<CompletionSummary, SubmissionError> {
        let total = self
            .store
            .criteria(qualification_id, Visibility::IncludeDeleted)?
            .len();
        if total == 0 {
            return Ok(CompletionSummary {
                complete: 0.0,
                incomplete: 100.0,
            });
        }
        let accepted = self.store.accepted_count(learner_id, qualification_id)?;
        let complete = round2(accepted as f64 / total as f64 * 100.0);
        Ok(CompletionSummary {
            complete,
            incomplete: round2(100.0 - complete),
        })
    }

    /// Full submission history for one learner-criterion pair.
    pub fn history(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
        vis: Visibility,
    ) -> Result<Vec<Submission>, SubmissionError> {
        Ok(self
            .store
            .submissions_for_criterion(learner_id, qualification_id, ac_id, vis)?)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
