use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;

use super::domain::{
    Actor, AssessmentCriterion, AssessorBinding, AssessorFeedback, AttachmentId, BindingId,
    CommentId, CriterionFields, CriterionId, CriterionPath, DecisionStatus, DocumentTitle,
    DocumentTitleId, EnrollmentProfile, EntityStatus, IqaBinding, IqaComment, LearningOutcome,
    OutcomeFields, OutcomeId, Qualification, QualificationId, Role, Submission,
    SubmissionAttachment, SubmissionId, TitleFields, Unit, UnitFields, UnitId, User,
    UserId, UserQualification, UserQualificationId,
};

/// Failures surfaced by a storage backend.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Whether reads admit tombstoned rows. Every read takes this explicitly;
/// there are no implicit default scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Active,
    IncludeDeleted,
}

impl Visibility {
    pub const fn admits(self, deleted: bool) -> bool {
        match self {
            Visibility::Active => !deleted,
            Visibility::IncludeDeleted => true,
        }
    }
}

/// Qualification columns checked for uniqueness within an admin scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualificationField {
    SubTitle,
    SubNumber,
}

/// Point-in-time copy of a qualification's entire tree, captured before a
/// structural update and written back verbatim if the update fails.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    pub qualification: Qualification,
    pub units: Vec<Unit>,
    pub outcomes: Vec<LearningOutcome>,
    pub criteria: Vec<AssessmentCriterion>,
    pub document_titles: Vec<DocumentTitle>,
}

/// Persistence seam for the qualification tree.
pub trait QualificationStore {
    fn insert_qualification(
        &self,
        sub_title: &str,
        sub_number: &str,
        actor: UserId,
    ) -> Result<Qualification, StoreError>;
    fn update_qualification(&self, row: &Qualification) -> Result<(), StoreError>;
    fn qualification(
        &self,
        id: QualificationId,
        vis: Visibility,
    ) -> Result<Option<Qualification>, StoreError>;
    /// True when another qualification created by anyone in `scope` already
    /// carries `value` in `field`. `exclude` skips the row being updated.
    fn qualification_field_taken(
        &self,
        scope: &[UserId],
        field: QualificationField,
        value: &str,
        exclude: Option<QualificationId>,
    ) -> Result<bool, StoreError>;
    fn soft_delete_qualification(&self, id: QualificationId, actor: UserId)
        -> Result<(), StoreError>;
    fn purge_qualification(&self, id: QualificationId) -> Result<(), StoreError>;

    fn insert_unit(
        &self,
        qualification_id: QualificationId,
        fields: &UnitFields,
        actor: UserId,
    ) -> Result<Unit, StoreError>;
    fn update_unit(&self, row: &Unit) -> Result<(), StoreError>;
    fn units(&self, qualification_id: QualificationId, vis: Visibility)
        -> Result<Vec<Unit>, StoreError>;
    fn soft_delete_units(&self, ids: &[UnitId], actor: UserId) -> Result<(), StoreError>;
    fn purge_unit(&self, id: UnitId) -> Result<(), StoreError>;

    fn insert_outcome(
        &self,
        qualification_id: QualificationId,
        unit_id: UnitId,
        fields: &OutcomeFields,
        actor: UserId,
    ) -> Result<LearningOutcome, StoreError>;
    fn update_outcome(&self, row: &LearningOutcome) -> Result<(), StoreError>;
    fn outcomes(
        &self,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<LearningOutcome>, StoreError>;
    fn outcome(
        &self,
        qualification_id: QualificationId,
        id: OutcomeId,
        vis: Visibility,
    ) -> Result<Option<LearningOutcome>, StoreError>;
    fn soft_delete_outcomes(&self, ids: &[OutcomeId], actor: UserId) -> Result<(), StoreError>;
    fn purge_outcome(&self, id: OutcomeId) -> Result<(), StoreError>;

    fn insert_criterion(
        &self,
        qualification_id: QualificationId,
        lo_id: OutcomeId,
        fields: &CriterionFields,
        actor: UserId,
    ) -> Result<AssessmentCriterion, StoreError>;
    fn update_criterion(&self, row: &AssessmentCriterion) -> Result<(), StoreError>;
    fn criteria(
        &self,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<AssessmentCriterion>, StoreError>;
    fn criterion(
        &self,
        qualification_id: QualificationId,
        id: CriterionId,
        vis: Visibility,
    ) -> Result<Option<AssessmentCriterion>, StoreError>;
    fn soft_delete_criteria(&self, ids: &[CriterionId], actor: UserId) -> Result<(), StoreError>;
    fn purge_criterion(&self, id: CriterionId) -> Result<(), StoreError>;

    fn insert_document_title(
        &self,
        qualification_id: QualificationId,
        fields: &TitleFields,
        actor: UserId,
    ) -> Result<DocumentTitle, StoreError>;
    fn update_document_title(&self, row: &DocumentTitle) -> Result<(), StoreError>;
    fn document_titles(
        &self,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<DocumentTitle>, StoreError>;
    fn soft_delete_document_titles(
        &self,
        ids: &[DocumentTitleId],
        actor: UserId,
    ) -> Result<(), StoreError>;
    fn purge_document_title(&self, id: DocumentTitleId) -> Result<(), StoreError>;

    fn snapshot_tree(&self, id: QualificationId) -> Result<TreeSnapshot, StoreError>;
    fn restore_tree(&self, snapshot: &TreeSnapshot) -> Result<(), StoreError>;
}

/// Insert payload for a user account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub sur_name: Option<String>,
    pub contact: Option<String>,
    pub created_by: UserId,
}

/// Persistence seam for accounts, enrollments, and staff bindings.
pub trait EnrollmentStore {
    fn insert_user(&self, user: &NewUser) -> Result<User, StoreError>;
    fn update_user(&self, row: &User) -> Result<(), StoreError>;
    fn user(&self, id: UserId, vis: Visibility) -> Result<Option<User>, StoreError>;
    fn user_by_email(&self, email: &str, vis: Visibility) -> Result<Option<User>, StoreError>;
    fn soft_delete_user(&self, id: UserId, actor: UserId) -> Result<(), StoreError>;
    fn purge_user(&self, id: UserId) -> Result<(), StoreError>;

    fn insert_user_qualification(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
        profile: &EnrollmentProfile,
        sampling_ratio: u32,
        actor: UserId,
    ) -> Result<UserQualification, StoreError>;
    /// Reinstates a previously captured row, id included. Used by saga
    /// compensation for replacement passes.
    fn restore_user_qualification(&self, row: &UserQualification) -> Result<(), StoreError>;
    fn update_user_qualification(&self, row: &UserQualification) -> Result<(), StoreError>;
    fn user_qualification(
        &self,
        id: UserQualificationId,
        vis: Visibility,
    ) -> Result<Option<UserQualification>, StoreError>;
    fn user_qualifications(
        &self,
        user_id: UserId,
        vis: Visibility,
    ) -> Result<Vec<UserQualification>, StoreError>;
    fn soft_delete_user_qualification(
        &self,
        id: UserQualificationId,
        actor: UserId,
    ) -> Result<(), StoreError>;
    fn purge_user_qualification(&self, id: UserQualificationId) -> Result<(), StoreError>;

    fn insert_assessor_binding(
        &self,
        learner_id: UserId,
        assessor_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<AssessorBinding, StoreError>;
    fn assessor_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<AssessorBinding>, StoreError>;
    fn learners_of_assessor(
        &self,
        assessor_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<AssessorBinding>, StoreError>;
    fn soft_delete_assessor_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<(), StoreError>;
    fn purge_assessor_binding(&self, id: BindingId) -> Result<(), StoreError>;

    fn insert_iqa_binding(
        &self,
        learner_id: UserId,
        iqa_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<IqaBinding, StoreError>;
    fn iqa_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<IqaBinding>, StoreError>;
    fn learners_of_iqa(
        &self,
        iqa_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<IqaBinding>, StoreError>;
    fn soft_delete_iqa_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<(), StoreError>;
    fn purge_iqa_binding(&self, id: BindingId) -> Result<(), StoreError>;
}

/// Persistence seam for evidence submissions and their children.
pub trait SubmissionStore {
    fn insert_submission(
        &self,
        learner_id: UserId,
        path: &CriterionPath,
        comment: &str,
    ) -> Result<Submission, StoreError>;
    fn update_submission(&self, row: &Submission) -> Result<(), StoreError>;
    /// The learner's In-progress submission against this criterion, if any.
    fn open_submission(
        &self,
        learner_id: UserId,
        path: &CriterionPath,
    ) -> Result<Option<Submission>, StoreError>;
    /// Most recent submission by id, active rows only.
    fn latest_submission(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
    ) -> Result<Option<Submission>, StoreError>;
    /// Most recent submission by creation time, active rows only.
    fn latest_submission_by_time(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
    ) -> Result<Option<Submission>, StoreError>;
    fn submissions_for_criterion(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
        vis: Visibility,
    ) -> Result<Vec<Submission>, StoreError>;
    fn submission_count(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
    ) -> Result<usize, StoreError>;
    /// Distinct criteria with at least one Accept decision for the learner.
    fn accepted_count(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
    ) -> Result<usize, StoreError>;
    fn soft_delete_learner_submissions(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<(), StoreError>;

    fn insert_attachment(
        &self,
        qualification_id: QualificationId,
        submission_id: SubmissionId,
        reference: &str,
        owner: UserId,
    ) -> Result<SubmissionAttachment, StoreError>;
    fn attachments(
        &self,
        submission_id: SubmissionId,
        vis: Visibility,
    ) -> Result<Vec<SubmissionAttachment>, StoreError>;
    fn set_attachment_statuses(
        &self,
        submission_id: SubmissionId,
        status: &DecisionStatus,
    ) -> Result<(), StoreError>;
    /// Soft-deletes the attachment when it belongs to `owner` under the
    /// given submission. Returns whether a row matched.
    fn delete_attachment(
        &self,
        qualification_id: QualificationId,
        submission_id: SubmissionId,
        attachment_id: AttachmentId,
        owner: UserId,
    ) -> Result<bool, StoreError>;

    fn insert_iqa_comment(
        &self,
        qualification_id: QualificationId,
        learner_id: UserId,
        ac_id: CriterionId,
        comment: &str,
        actor: UserId,
    ) -> Result<IqaComment, StoreError>;
    fn iqa_comments(
        &self,
        learner_id: UserId,
        ac_id: CriterionId,
    ) -> Result<Vec<IqaComment>, StoreError>;

    fn insert_assessor_feedback(
        &self,
        qualification_id: QualificationId,
        learner_id: UserId,
        lo_id: OutcomeId,
        comment: &str,
        actor: UserId,
    ) -> Result<AssessorFeedback, StoreError>;
    fn assessor_feedback(
        &self,
        learner_id: UserId,
        lo_id: OutcomeId,
    ) -> Result<Vec<AssessorFeedback>, StoreError>;
}

#[derive(Default)]
struct Inner {
    seq: u64,
    qualifications: Vec<Qualification>,
    units: Vec<Unit>,
    outcomes: Vec<LearningOutcome>,
    criteria: Vec<AssessmentCriterion>,
    document_titles: Vec<DocumentTitle>,
    users: Vec<User>,
    user_qualifications: Vec<UserQualification>,
    assessor_bindings: Vec<AssessorBinding>,
    iqa_bindings: Vec<IqaBinding>,
    submissions: Vec<Submission>,
    attachments: Vec<SubmissionAttachment>,
    iqa_comments: Vec<IqaComment>,
    assessor_feedback: Vec<AssessorFeedback>,
    /// Remaining forward writes before the store starts failing. Purges and
    /// restores are never charged, so compensation always lands.
    write_budget: Option<usize>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn charge_write(&mut self) -> Result<(), StoreError> {
        match self.write_budget {
            Some(0) => Err(StoreError::Unavailable("write budget exhausted".into())),
            Some(ref mut n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory store backing every trait, serialized behind one mutex so a
/// read-diff-write reconciliation cannot interleave with another request.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps forward writes from this point on: after `budget` further
    /// successes every mutating call fails `Unavailable`. Compensating
    /// purges and restores are never charged, so rollback still lands.
    pub fn set_write_budget(&self, budget: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.write_budget = Some(budget);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".into()))
    }

    /// Test helper: seeds an active actor account with the given role.
    pub fn seed_actor(&self, role: Role, email: &str) -> Result<Actor, StoreError> {
        let user = self.insert_user(&NewUser {
            email: email.to_string(),
            role,
            first_name: None,
            middle_name: None,
            sur_name: None,
            contact: None,
            created_by: UserId(0),
        })?;
        Ok(Actor {
            id: user.id,
            role,
        })
    }
}

impl QualificationStore for MemoryStore {
    fn insert_qualification(
        &self,
        sub_title: &str,
        sub_number: &str,
        actor: UserId,
    ) -> Result<Qualification, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = Qualification {
            id: QualificationId(inner.next_id()),
            sub_title: sub_title.to_string(),
            sub_number: sub_number.to_string(),
            status: EntityStatus::Active,
            created_by: actor,
            updated_by: actor,
            deleted: false,
        };
        inner.qualifications.push(row.clone());
        Ok(row)
    }

    fn update_qualification(&self, row: &Qualification) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .qualifications
            .iter_mut()
            .find(|q| q.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn qualification(
        &self,
        id: QualificationId,
        vis: Visibility,
    ) -> Result<Option<Qualification>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .qualifications
            .iter()
            .find(|q| q.id == id && vis.admits(q.deleted))
            .cloned())
    }

    fn qualification_field_taken(
        &self,
        scope: &[UserId],
        field: QualificationField,
        value: &str,
        exclude: Option<QualificationId>,
    ) -> Result<bool, StoreError> {
        let inner = self.lock()?;
        Ok(inner.qualifications.iter().any(|q| {
            !q.deleted
                && scope.contains(&q.created_by)
                && exclude != Some(q.id)
                && match field {
                    QualificationField::SubTitle => q.sub_title == value,
                    QualificationField::SubNumber => q.sub_number == value,
                }
        }))
    }

    fn soft_delete_qualification(
        &self,
        id: QualificationId,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .qualifications
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or(StoreError::NotFound)?;
        slot.deleted = true;
        slot.updated_by = actor;
        Ok(())
    }

    fn purge_qualification(&self, id: QualificationId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.qualifications.retain(|q| q.id != id);
        Ok(())
    }

    fn insert_unit(
        &self,
        qualification_id: QualificationId,
        fields: &UnitFields,
        actor: UserId,
    ) -> Result<Unit, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = Unit {
            id: UnitId(inner.next_id()),
            qualification_id,
            fields: fields.clone(),
            status: EntityStatus::Active,
            created_by: actor,
            updated_by: actor,
            deleted: false,
        };
        inner.units.push(row.clone());
        Ok(row)
    }

    fn update_unit(&self, row: &Unit) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .units
            .iter_mut()
            .find(|u| u.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn units(
        &self,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<Unit>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .units
            .iter()
            .filter(|u| u.qualification_id == qualification_id && vis.admits(u.deleted))
            .cloned()
            .collect())
    }

    fn soft_delete_units(&self, ids: &[UnitId], actor: UserId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        for unit in inner.units.iter_mut().filter(|u| ids.contains(&u.id)) {
            unit.deleted = true;
            unit.updated_by = actor;
        }
        Ok(())
    }

    fn purge_unit(&self, id: UnitId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.units.retain(|u| u.id != id);
        Ok(())
    }

    fn insert_outcome(
        &self,
        qualification_id: QualificationId,
        unit_id: UnitId,
        fields: &OutcomeFields,
        actor: UserId,
    ) -> Result<LearningOutcome, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = LearningOutcome {
            id: OutcomeId(inner.next_id()),
            qualification_id,
            unit_id,
            fields: fields.clone(),
            status: EntityStatus::Active,
            created_by: actor,
            updated_by: actor,
            deleted: false,
        };
        inner.outcomes.push(row.clone());
        Ok(row)
    }

    fn update_outcome(&self, row: &LearningOutcome) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .outcomes
            .iter_mut()
            .find(|o| o.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn outcomes(
        &self,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<LearningOutcome>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .outcomes
            .iter()
            .filter(|o| o.qualification_id == qualification_id && vis.admits(o.deleted))
            .cloned()
            .collect())
    }

    fn outcome(
        &self,
        qualification_id: QualificationId,
        id: OutcomeId,
        vis: Visibility,
    ) -> Result<Option<LearningOutcome>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .outcomes
            .iter()
            .find(|o| {
                o.qualification_id == qualification_id && o.id == id && vis.admits(o.deleted)
            })
            .cloned())
    }

    fn soft_delete_outcomes(&self, ids: &[OutcomeId], actor: UserId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        for outcome in inner.outcomes.iter_mut().filter(|o| ids.contains(&o.id)) {
            outcome.deleted = true;
            outcome.updated_by = actor;
        }
        Ok(())
    }

    fn purge_outcome(&self, id: OutcomeId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.outcomes.retain(|o| o.id != id);
        Ok(())
    }

    fn insert_criterion(
        &self,
        qualification_id: QualificationId,
        lo_id: OutcomeId,
        fields: &CriterionFields,
        actor: UserId,
    ) -> Result<AssessmentCriterion, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = AssessmentCriterion {
            id: CriterionId(inner.next_id()),
            qualification_id,
            lo_id,
            fields: fields.clone(),
            status: EntityStatus::Active,
            created_by: actor,
            updated_by: actor,
            deleted: false,
        };
        inner.criteria.push(row.clone());
        Ok(row)
    }

    fn update_criterion(&self, row: &AssessmentCriterion) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .criteria
            .iter_mut()
            .find(|c| c.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn criteria(
        &self,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<AssessmentCriterion>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .criteria
            .iter()
            .filter(|c| c.qualification_id == qualification_id && vis.admits(c.deleted))
            .cloned()
            .collect())
    }

    fn criterion(
        &self,
        qualification_id: QualificationId,
        id: CriterionId,
        vis: Visibility,
    ) -> Result<Option<AssessmentCriterion>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .criteria
            .iter()
            .find(|c| {
                c.qualification_id == qualification_id && c.id == id && vis.admits(c.deleted)
            })
            .cloned())
    }

    fn soft_delete_criteria(&self, ids: &[CriterionId], actor: UserId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        for criterion in inner.criteria.iter_mut().filter(|c| ids.contains(&c.id)) {
            criterion.deleted = true;
            criterion.updated_by = actor;
        }
        Ok(())
    }

    fn purge_criterion(&self, id: CriterionId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.criteria.retain(|c| c.id != id);
        Ok(())
    }

    fn insert_document_title(
        &self,
        qualification_id: QualificationId,
        fields: &TitleFields,
        actor: UserId,
    ) -> Result<DocumentTitle, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = DocumentTitle {
            id: DocumentTitleId(inner.next_id()),
            qualification_id,
            fields: fields.clone(),
            status: EntityStatus::Active,
            created_by: actor,
            updated_by: actor,
            deleted: false,
        };
        inner.document_titles.push(row.clone());
        Ok(row)
    }

    fn update_document_title(&self, row: &DocumentTitle) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .document_titles
            .iter_mut()
            .find(|d| d.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn document_titles(
        &self,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<DocumentTitle>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .document_titles
            .iter()
            .filter(|d| d.qualification_id == qualification_id && vis.admits(d.deleted))
            .cloned()
            .collect())
    }

    fn soft_delete_document_titles(
        &self,
        ids: &[DocumentTitleId],
        actor: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        for title in inner
            .document_titles
            .iter_mut()
            .filter(|d| ids.contains(&d.id))
        {
            title.deleted = true;
            title.updated_by = actor;
        }
        Ok(())
    }

    fn purge_document_title(&self, id: DocumentTitleId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.document_titles.retain(|d| d.id != id);
        Ok(())
    }

    fn snapshot_tree(&self, id: QualificationId) -> Result<TreeSnapshot, StoreError> {
        let inner = self.lock()?;
        let qualification = inner
            .qualifications
            .iter()
            .find(|q| q.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        Ok(TreeSnapshot {
            qualification,
            units: inner
                .units
                .iter()
                .filter(|u| u.qualification_id == id)
                .cloned()
                .collect(),
            outcomes: inner
                .outcomes
                .iter()
                .filter(|o| o.qualification_id == id)
                .cloned()
                .collect(),
            criteria: inner
                .criteria
                .iter()
                .filter(|c| c.qualification_id == id)
                .cloned()
                .collect(),
            document_titles: inner
                .document_titles
                .iter()
                .filter(|d| d.qualification_id == id)
                .cloned()
                .collect(),
        })
    }

    fn restore_tree(&self, snapshot: &TreeSnapshot) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let id = snapshot.qualification.id;
        inner.qualifications.retain(|q| q.id != id);
        inner.units.retain(|u| u.qualification_id != id);
        inner.outcomes.retain(|o| o.qualification_id != id);
        inner.criteria.retain(|c| c.qualification_id != id);
        inner.document_titles.retain(|d| d.qualification_id != id);
        inner.qualifications.push(snapshot.qualification.clone());
        inner.units.extend(snapshot.units.iter().cloned());
        inner.outcomes.extend(snapshot.outcomes.iter().cloned());
        inner.criteria.extend(snapshot.criteria.iter().cloned());
        inner
            .document_titles
            .extend(snapshot.document_titles.iter().cloned());
        Ok(())
    }
}

impl EnrollmentStore for MemoryStore {
    fn insert_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = User {
            id: UserId(inner.next_id()),
            email: user.email.clone(),
            role: user.role,
            first_name: user.first_name.clone(),
            middle_name: user.middle_name.clone(),
            sur_name: user.sur_name.clone(),
            contact: user.contact.clone(),
            status: EntityStatus::Active,
            created_by: user.created_by,
            updated_by: user.created_by,
            deleted: false,
        };
        inner.users.push(row.clone());
        Ok(row)
    }

    fn update_user(&self, row: &User) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .users
            .iter_mut()
            .find(|u| u.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn user(&self, id: UserId, vis: Visibility) -> Result<Option<User>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .users
            .iter()
            .find(|u| u.id == id && vis.admits(u.deleted))
            .cloned())
    }

    fn user_by_email(&self, email: &str, vis: Visibility) -> Result<Option<User>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .users
            .iter()
            .find(|u| u.email == email && vis.admits(u.deleted))
            .cloned())
    }

    fn soft_delete_user(&self, id: UserId, actor: UserId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;
        slot.deleted = true;
        slot.updated_by = actor;
        Ok(())
    }

    fn purge_user(&self, id: UserId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.users.retain(|u| u.id != id);
        Ok(())
    }

    fn insert_user_qualification(
        &self,
        user_id: UserId,
        qualification_id: QualificationId,
        profile: &EnrollmentProfile,
        sampling_ratio: u32,
        actor: UserId,
    ) -> Result<UserQualification, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = UserQualification {
            id: UserQualificationId(inner.next_id()),
            user_id,
            qualification_id,
            profile: profile.clone(),
            sampling_ratio,
            status: EntityStatus::Active,
            created_by: actor,
            updated_by: actor,
            deleted: false,
        };
        inner.user_qualifications.push(row.clone());
        Ok(row)
    }

    fn restore_user_qualification(&self, row: &UserQualification) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.user_qualifications.retain(|r| r.id != row.id);
        inner.user_qualifications.push(row.clone());
        Ok(())
    }

    fn update_user_qualification(&self, row: &UserQualification) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .user_qualifications
            .iter_mut()
            .find(|r| r.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn user_qualification(
        &self,
        id: UserQualificationId,
        vis: Visibility,
    ) -> Result<Option<UserQualification>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .user_qualifications
            .iter()
            .find(|r| r.id == id && vis.admits(r.deleted))
            .cloned())
    }

    fn user_qualifications(
        &self,
        user_id: UserId,
        vis: Visibility,
    ) -> Result<Vec<UserQualification>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .user_qualifications
            .iter()
            .filter(|r| r.user_id == user_id && vis.admits(r.deleted))
            .cloned()
            .collect())
    }

    fn soft_delete_user_qualification(
        &self,
        id: UserQualificationId,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .user_qualifications
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound)?;
        slot.deleted = true;
        slot.updated_by = actor;
        Ok(())
    }

    fn purge_user_qualification(&self, id: UserQualificationId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.user_qualifications.retain(|r| r.id != id);
        Ok(())
    }

    fn insert_assessor_binding(
        &self,
        learner_id: UserId,
        assessor_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<AssessorBinding, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = AssessorBinding {
            id: BindingId(inner.next_id()),
            learner_id,
            assessor_id,
            qualification_id,
            status: EntityStatus::Active,
            created_by: actor,
            deleted: false,
        };
        inner.assessor_bindings.push(row.clone());
        Ok(row)
    }

    fn assessor_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<AssessorBinding>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .assessor_bindings
            .iter()
            .filter(|b| {
                b.learner_id == learner_id
                    && b.qualification_id == qualification_id
                    && vis.admits(b.deleted)
            })
            .cloned()
            .collect())
    }

    fn learners_of_assessor(
        &self,
        assessor_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<AssessorBinding>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .assessor_bindings
            .iter()
            .filter(|b| {
                b.assessor_id == assessor_id
                    && b.qualification_id == qualification_id
                    && vis.admits(b.deleted)
            })
            .cloned()
            .collect())
    }

    fn soft_delete_assessor_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let _ = actor;
        for binding in inner
            .assessor_bindings
            .iter_mut()
            .filter(|b| b.learner_id == learner_id && b.qualification_id == qualification_id)
        {
            binding.deleted = true;
        }
        Ok(())
    }

    fn purge_assessor_binding(&self, id: BindingId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.assessor_bindings.retain(|b| b.id != id);
        Ok(())
    }

    fn insert_iqa_binding(
        &self,
        learner_id: UserId,
        iqa_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<IqaBinding, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = IqaBinding {
            id: BindingId(inner.next_id()),
            learner_id,
            iqa_id,
            qualification_id,
            status: EntityStatus::Active,
            created_by: actor,
            deleted: false,
        };
        inner.iqa_bindings.push(row.clone());
        Ok(row)
    }

    fn iqa_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<IqaBinding>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .iqa_bindings
            .iter()
            .filter(|b| {
                b.learner_id == learner_id
                    && b.qualification_id == qualification_id
                    && vis.admits(b.deleted)
            })
            .cloned()
            .collect())
    }

    fn learners_of_iqa(
        &self,
        iqa_id: UserId,
        qualification_id: QualificationId,
        vis: Visibility,
    ) -> Result<Vec<IqaBinding>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .iqa_bindings
            .iter()
            .filter(|b| {
                b.iqa_id == iqa_id
                    && b.qualification_id == qualification_id
                    && vis.admits(b.deleted)
            })
            .cloned()
            .collect())
    }

    fn soft_delete_iqa_bindings(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let _ = actor;
        for binding in inner
            .iqa_bindings
            .iter_mut()
            .filter(|b| b.learner_id == learner_id && b.qualification_id == qualification_id)
        {
            binding.deleted = true;
        }
        Ok(())
    }

    fn purge_iqa_binding(&self, id: BindingId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.iqa_bindings.retain(|b| b.id != id);
        Ok(())
    }
}

impl SubmissionStore for MemoryStore {
    fn insert_submission(
        &self,
        learner_id: UserId,
        path: &CriterionPath,
        comment: &str,
    ) -> Result<Submission, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = Submission {
            id: SubmissionId(inner.next_id()),
            qualification_id: path.qualification_id,
            unit_id: path.unit_id,
            lo_id: path.lo_id,
            ac_id: path.ac_id,
            comment: comment.to_string(),
            status: DecisionStatus::InProgress,
            assessor_id: None,
            iqa_outcome: None,
            iqa_comment: None,
            iqa_id: None,
            created_by: learner_id,
            created_at: Utc::now(),
            deleted: false,
        };
        inner.submissions.push(row.clone());
        Ok(row)
    }

    fn update_submission(&self, row: &Submission) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner
            .submissions
            .iter_mut()
            .find(|s| s.id == row.id)
            .ok_or(StoreError::NotFound)?;
        *slot = row.clone();
        Ok(())
    }

    fn open_submission(
        &self,
        learner_id: UserId,
        path: &CriterionPath,
    ) -> Result<Option<Submission>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .submissions
            .iter()
            .filter(|s| {
                !s.deleted
                    && s.created_by == learner_id
                    && s.qualification_id == path.qualification_id
                    && s.ac_id == path.ac_id
                    && s.status == DecisionStatus::InProgress
            })
            .max_by_key(|s| s.id)
            .cloned())
    }

    fn latest_submission(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
    ) -> Result<Option<Submission>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .submissions
            .iter()
            .filter(|s| {
                !s.deleted
                    && s.created_by == learner_id
                    && s.qualification_id == qualification_id
                    && s.ac_id == ac_id
            })
            .max_by_key(|s| s.id)
            .cloned())
    }

    fn latest_submission_by_time(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
    ) -> Result<Option<Submission>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .submissions
            .iter()
            .filter(|s| {
                !s.deleted
                    && s.created_by == learner_id
                    && s.qualification_id == qualification_id
                    && s.ac_id == ac_id
            })
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    fn submissions_for_criterion(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        ac_id: CriterionId,
        vis: Visibility,
    ) -> Result<Vec<Submission>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .submissions
            .iter()
            .filter(|s| {
                s.created_by == learner_id
                    && s.qualification_id == qualification_id
                    && s.ac_id == ac_id
                    && vis.admits(s.deleted)
            })
            .cloned()
            .collect())
    }

    fn submission_count(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
    ) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .submissions
            .iter()
            .filter(|s| {
                !s.deleted
                    && s.created_by == learner_id
                    && s.qualification_id == qualification_id
            })
            .count())
    }

    fn accepted_count(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
    ) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        let mut seen: HashSet<CriterionId> = HashSet::new();
        for submission in inner.submissions.iter().filter(|s| {
            !s.deleted
                && s.created_by == learner_id
                && s.qualification_id == qualification_id
                && s.status == DecisionStatus::Accept
        }) {
            seen.insert(submission.ac_id);
        }
        Ok(seen.len())
    }

    fn soft_delete_learner_submissions(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let _ = actor;
        let ids: Vec<SubmissionId> = inner
            .submissions
            .iter()
            .filter(|s| s.created_by == learner_id && s.qualification_id == qualification_id)
            .map(|s| s.id)
            .collect();
        for submission in inner
            .submissions
            .iter_mut()
            .filter(|s| s.created_by == learner_id && s.qualification_id == qualification_id)
        {
            submission.deleted = true;
        }
        for attachment in inner
            .attachments
            .iter_mut()
            .filter(|a| ids.contains(&a.submission_id))
        {
            attachment.deleted = true;
        }
        Ok(())
    }

    fn insert_attachment(
        &self,
        qualification_id: QualificationId,
        submission_id: SubmissionId,
        reference: &str,
        owner: UserId,
    ) -> Result<SubmissionAttachment, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = SubmissionAttachment {
            id: AttachmentId(inner.next_id()),
            qualification_id,
            submission_id,
            reference: reference.to_string(),
            status: DecisionStatus::InProgress,
            created_by: owner,
            deleted: false,
        };
        inner.attachments.push(row.clone());
        Ok(row)
    }

    fn attachments(
        &self,
        submission_id: SubmissionId,
        vis: Visibility,
    ) -> Result<Vec<SubmissionAttachment>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .attachments
            .iter()
            .filter(|a| a.submission_id == submission_id && vis.admits(a.deleted))
            .cloned()
            .collect())
    }

    fn set_attachment_statuses(
        &self,
        submission_id: SubmissionId,
        status: &DecisionStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        for attachment in inner
            .attachments
            .iter_mut()
            .filter(|a| a.submission_id == submission_id && !a.deleted)
        {
            attachment.status = status.clone();
        }
        Ok(())
    }

    fn delete_attachment(
        &self,
        qualification_id: QualificationId,
        submission_id: SubmissionId,
        attachment_id: AttachmentId,
        owner: UserId,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let slot = inner.attachments.iter_mut().find(|a| {
            a.id == attachment_id
                && a.submission_id == submission_id
                && a.qualification_id == qualification_id
                && a.created_by == owner
                && !a.deleted
        });
        match slot {
            Some(attachment) => {
                attachment.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_iqa_comment(
        &self,
        qualification_id: QualificationId,
        learner_id: UserId,
        ac_id: CriterionId,
        comment: &str,
        actor: UserId,
    ) -> Result<IqaComment, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = IqaComment {
            id: CommentId(inner.next_id()),
            qualification_id,
            learner_id,
            ac_id,
            comment: comment.to_string(),
            created_by: actor,
            deleted: false,
        };
        inner.iqa_comments.push(row.clone());
        Ok(row)
    }

    fn iqa_comments(
        &self,
        learner_id: UserId,
        ac_id: CriterionId,
    ) -> Result<Vec<IqaComment>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .iqa_comments
            .iter()
            .filter(|c| c.learner_id == learner_id && c.ac_id == ac_id && !c.deleted)
            .cloned()
            .collect())
    }

    fn insert_assessor_feedback(
        &self,
        qualification_id: QualificationId,
        learner_id: UserId,
        lo_id: OutcomeId,
        comment: &str,
        actor: UserId,
    ) -> Result<AssessorFeedback, StoreError> {
        let mut inner = self.lock()?;
        inner.charge_write()?;
        let row = AssessorFeedback {
            id: CommentId(inner.next_id()),
            qualification_id,
            learner_id,
            lo_id,
            comment: comment.to_string(),
            created_by: actor,
            deleted: false,
        };
        inner.assessor_feedback.push(row.clone());
        Ok(row)
    }

    fn assessor_feedback(
        &self,
        learner_id: UserId,
        lo_id: OutcomeId,
    ) -> Result<Vec<AssessorFeedback>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .assessor_feedback
            .iter()
            .filter(|f| f.learner_id == learner_id && f.lo_id == lo_id && !f.deleted)
            .cloned()
            .collect())
    }
}
