use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for qualifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualificationId(pub u64);

/// Identifier wrapper for units within a qualification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

/// Identifier wrapper for learning outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutcomeId(pub u64);

/// Identifier wrapper for assessment criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CriterionId(pub u64);

/// Identifier wrapper for required document titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentTitleId(pub u64);

/// Identifier wrapper for user accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Identifier wrapper for user-qualification join rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserQualificationId(pub u64);

/// Identifier wrapper for learner/staff binding rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(pub u64);

/// Identifier wrapper for evidence submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubmissionId(pub u64);

/// Identifier wrapper for submission attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttachmentId(pub u64);

/// Identifier wrapper for IQA comments and assessor feedback rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommentId(pub u64);

/// Role carried by every authenticated caller. Authentication itself is an
/// external collaborator; the core only ever sees the resolved actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Learner,
    Assessor,
    Iqa,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Learner => "learner",
            Role::Assessor => "assessor",
            Role::Iqa => "iqa",
        }
    }
}

/// The authenticated caller attributed to a mutation. Passed explicitly on
/// every entry point; the core never reads ambient session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

/// Activation state shared by most rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Inactive,
}

impl EntityStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Inactive => "inactive",
        }
    }
}

/// Assessor decision lifecycle for a submission. Admin-defined terminal
/// labels are carried through as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DecisionStatus {
    InProgress,
    Accept,
    Reject,
    Other(String),
}

impl DecisionStatus {
    pub fn label(&self) -> &str {
        match self {
            DecisionStatus::InProgress => "In-progress",
            DecisionStatus::Accept => "Accept",
            DecisionStatus::Reject => "Reject",
            DecisionStatus::Other(label) => label,
        }
    }
}

impl From<String> for DecisionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "In-progress" => DecisionStatus::InProgress,
            "Accept" => DecisionStatus::Accept,
            "Reject" => DecisionStatus::Reject,
            _ => DecisionStatus::Other(value),
        }
    }
}

impl From<DecisionStatus> for String {
    fn from(value: DecisionStatus) -> Self {
        value.label().to_string()
    }
}

/// A vocational credential definition owning the unit/outcome/criterion tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualification {
    pub id: QualificationId,
    pub sub_title: String,
    pub sub_number: String,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub deleted: bool,
}

/// Mutable fields of a unit; embedded in both the persisted row and the
/// desired-tree payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFields {
    pub unit_number: String,
    pub unit_title: String,
    pub unit_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub qualification_id: QualificationId,
    pub fields: UnitFields,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFields {
    pub lo_number: String,
    pub lo_detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub id: OutcomeId,
    pub qualification_id: QualificationId,
    pub unit_id: UnitId,
    pub fields: OutcomeFields,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionFields {
    pub ac_number: String,
    pub ac_detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentCriterion {
    pub id: CriterionId,
    pub qualification_id: QualificationId,
    pub lo_id: OutcomeId,
    pub fields: CriterionFields,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleFields {
    pub title: String,
}

/// Required document title attached to a qualification, independent of the
/// unit/outcome/criterion tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTitle {
    pub id: DocumentTitleId,
    pub qualification_id: QualificationId,
    pub fields: TitleFields,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub deleted: bool,
}

/// Desired state of one unit in a structural edit. `Existing` updates the
/// row carrying that id; `New` inserts under the freshly-resolved parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitNode {
    Existing {
        id: UnitId,
        fields: UnitFields,
        outcomes: Vec<OutcomeNode>,
    },
    New {
        fields: UnitFields,
        outcomes: Vec<OutcomeNode>,
    },
}

impl UnitNode {
    pub fn existing_id(&self) -> Option<UnitId> {
        match self {
            UnitNode::Existing { id, .. } => Some(*id),
            UnitNode::New { .. } => None,
        }
    }

    pub fn fields(&self) -> &UnitFields {
        match self {
            UnitNode::Existing { fields, .. } | UnitNode::New { fields, .. } => fields,
        }
    }

    pub fn outcomes(&self) -> &[OutcomeNode] {
        match self {
            UnitNode::Existing { outcomes, .. } | UnitNode::New { outcomes, .. } => outcomes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeNode {
    Existing {
        id: OutcomeId,
        fields: OutcomeFields,
        criteria: Vec<CriterionNode>,
    },
    New {
        fields: OutcomeFields,
        criteria: Vec<CriterionNode>,
    },
}

impl OutcomeNode {
    pub fn existing_id(&self) -> Option<OutcomeId> {
        match self {
            OutcomeNode::Existing { id, .. } => Some(*id),
            OutcomeNode::New { .. } => None,
        }
    }

    pub fn fields(&self) -> &OutcomeFields {
        match self {
            OutcomeNode::Existing { fields, .. } | OutcomeNode::New { fields, .. } => fields,
        }
    }

    pub fn criteria(&self) -> &[CriterionNode] {
        match self {
            OutcomeNode::Existing { criteria, .. } | OutcomeNode::New { criteria, .. } => criteria,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriterionNode {
    Existing { id: CriterionId, fields: CriterionFields },
    New { fields: CriterionFields },
}

impl CriterionNode {
    pub fn existing_id(&self) -> Option<CriterionId> {
        match self {
            CriterionNode::Existing { id, .. } => Some(*id),
            CriterionNode::New { .. } => None,
        }
    }

    pub fn fields(&self) -> &CriterionFields {
        match self {
            CriterionNode::Existing { fields, .. } | CriterionNode::New { fields, .. } => fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentTitleNode {
    Existing { id: DocumentTitleId, fields: TitleFields },
    New { fields: TitleFields },
}

impl DocumentTitleNode {
    pub fn existing_id(&self) -> Option<DocumentTitleId> {
        match self {
            DocumentTitleNode::Existing { id, .. } => Some(*id),
            DocumentTitleNode::New { .. } => None,
        }
    }

    pub fn fields(&self) -> &TitleFields {
        match self {
            DocumentTitleNode::Existing { fields, .. } | DocumentTitleNode::New { fields, .. } => {
                fields
            }
        }
    }
}

/// Complete desired state for one qualification, consumed by the reconciler
/// for both creation and update. `None` means "leave that branch untouched";
/// `Some(vec![])` is a genuine empty tree and deletes every persisted row at
/// that level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationTree {
    pub sub_title: String,
    pub sub_number: String,
    #[serde(default)]
    pub units: Option<Vec<UnitNode>>,
    #[serde(default)]
    pub document_titles: Option<Vec<DocumentTitleNode>>,
}

/// A user account. Learner personal/registration fields live on the
/// per-qualification join row, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub sur_name: Option<String>,
    pub contact: Option<String>,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub deleted: bool,
}

impl User {
    /// Concatenated display name, skipping missing parts.
    pub fn full_name(&self) -> String {
        [&self.first_name, &self.middle_name, &self.sur_name]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Personal/registration fields carried on the enrollment row so the same
/// person can hold different registrations per qualification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentProfile {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub sur_name: Option<String>,
    pub contact: Option<String>,
    pub ref_number: Option<String>,
    pub learner_number: Option<String>,
    pub cohort_batch_no: Option<String>,
    pub date_of_registration: Option<NaiveDate>,
    pub date_of_birth: Option<NaiveDate>,
    pub disability: bool,
}

/// Enrollment/assignment join row: one per (learner, qualification), or one
/// per (staff member, qualification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQualification {
    pub id: UserQualificationId,
    pub user_id: UserId,
    pub qualification_id: QualificationId,
    pub profile: EnrollmentProfile,
    pub sampling_ratio: u32,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub deleted: bool,
}

/// Binds a learner to an assessor for one qualification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessorBinding {
    pub id: BindingId,
    pub learner_id: UserId,
    pub assessor_id: UserId,
    pub qualification_id: QualificationId,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub deleted: bool,
}

/// Binds a learner to an internal quality assurer for one qualification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IqaBinding {
    pub id: BindingId,
    pub learner_id: UserId,
    pub iqa_id: UserId,
    pub qualification_id: QualificationId,
    pub status: EntityStatus,
    pub created_by: UserId,
    pub deleted: bool,
}

/// Addresses one assessment criterion within its qualification tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionPath {
    pub qualification_id: QualificationId,
    pub unit_id: UnitId,
    pub lo_id: OutcomeId,
    pub ac_id: CriterionId,
}

/// One evidence submission event by a learner against a criterion, tracked
/// through the assessor decision and the independent IQA overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub qualification_id: QualificationId,
    pub unit_id: UnitId,
    pub lo_id: OutcomeId,
    pub ac_id: CriterionId,
    pub comment: String,
    pub status: DecisionStatus,
    pub assessor_id: Option<UserId>,
    pub iqa_outcome: Option<String>,
    pub iqa_comment: Option<String>,
    pub iqa_id: Option<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Child attachment row; `reference` is the opaque key returned by the
/// external upload collaborator. The core never reads file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAttachment {
    pub id: AttachmentId,
    pub qualification_id: QualificationId,
    pub submission_id: SubmissionId,
    pub reference: String,
    pub status: DecisionStatus,
    pub created_by: UserId,
    pub deleted: bool,
}

/// Criterion-scoped IQA commentary recorded independently of any submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IqaComment {
    pub id: CommentId,
    pub qualification_id: QualificationId,
    pub learner_id: UserId,
    pub ac_id: CriterionId,
    pub comment: String,
    pub created_by: UserId,
    pub deleted: bool,
}

/// Outcome-scoped free-text feedback from an assessor to a learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessorFeedback {
    pub id: CommentId,
    pub qualification_id: QualificationId,
    pub learner_id: UserId,
    pub lo_id: OutcomeId,
    pub comment: String,
    pub created_by: UserId,
    pub deleted: bool,
}
