use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    Actor, AttachmentId, CriterionId, CriterionPath, DecisionStatus, EntityStatus, OutcomeId,
    QualificationId, QualificationTree, SubmissionId, UserId, UserQualificationId,
};
use super::enrollment::{AssignError, CreateUserRequest, CredentialsNotifier, EnrollmentService};
use super::reconciler::{HierarchyReconciler, ReconcileError};
use super::store::{EnrollmentStore, QualificationStore, SubmissionStore};
use super::submissions::{SubmissionError, SubmissionService};

/// Shared handler state: the three services over one store.
pub struct AssessmentState<S, N> {
    pub reconciler: HierarchyReconciler<S>,
    pub enrollment: EnrollmentService<S, N>,
    pub submissions: SubmissionService<S>,
}

/// Router builder exposing the qualification, user, and submission
/// endpoints. The acting user arrives in each request body; upstream
/// authentication is expected to have populated it.
pub fn assessment_router<S, N>(state: Arc<AssessmentState<S, N>>) -> Router
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    Router::new()
        .route("/api/v1/qualifications", post(create_qualification::<S, N>))
        .route(
            "/api/v1/qualifications/:qualification_id",
            put(update_qualification::<S, N>).delete(delete_qualification::<S, N>),
        )
        .route("/api/v1/users", post(create_user::<S, N>))
        .route(
            "/api/v1/users/:user_id/qualifications",
            put(reassign_staff::<S, N>),
        )
        .route(
            "/api/v1/users/:user_id/bindings",
            put(rebind_learner::<S, N>),
        )
        .route(
            "/api/v1/users/:user_id/status",
            put(set_user_status::<S, N>),
        )
        .route(
            "/api/v1/users/:user_id/sampling-ratio",
            put(change_sampling_ratio::<S, N>),
        )
        .route("/api/v1/users/:user_id", delete(remove_user::<S, N>))
        .route(
            "/api/v1/enrollments/:enrollment_id/qualification",
            put(change_learner_qualification::<S, N>),
        )
        .route("/api/v1/submissions", post(submit_evidence::<S, N>))
        .route(
            "/api/v1/submissions/decision",
            post(decide_submission::<S, N>),
        )
        .route(
            "/api/v1/submissions/iqa-outcome",
            post(record_iqa_outcome::<S, N>),
        )
        .route(
            "/api/v1/submissions/feedback",
            post(record_assessor_feedback::<S, N>),
        )
        .route(
            "/api/v1/submissions/:submission_id/attachments/:attachment_id",
            delete(delete_attachment::<S, N>),
        )
        .route(
            "/api/v1/learners/:learner_id/qualifications/:qualification_id/completion",
            get(completion::<S, N>),
        )
        .with_state(state)
}

fn reconcile_response(error: ReconcileError) -> Response {
    let status = match &error {
        ReconcileError::Duplicate(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReconcileError::NotFound => StatusCode::NOT_FOUND,
        ReconcileError::Forbidden => StatusCode::FORBIDDEN,
        ReconcileError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = match &error {
        ReconcileError::Internal { compensated, .. } => json!({
            "error": error.to_string(),
            "compensated": compensated.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
        _ => json!({ "error": error.to_string() }),
    };
    (status, axum::Json(payload)).into_response()
}

fn assign_response(error: AssignError) -> Response {
    let status = match &error {
        AssignError::Forbidden(_) => StatusCode::FORBIDDEN,
        AssignError::NotFound(_) => StatusCode::NOT_FOUND,
        AssignError::EmailInUse
        | AssignError::EmailOtherRole
        | AssignError::AlreadyEnrolled
        | AssignError::HasActiveSubmissions
        | AssignError::QualificationInUse { .. }
        | AssignError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AssignError::Store { .. } | AssignError::Notify { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let payload = match &error {
        AssignError::Store { compensated, .. } | AssignError::Notify { compensated, .. } => {
            json!({
                "error": error.to_string(),
                "compensated": compensated.iter().map(ToString::to_string).collect::<Vec<_>>(),
            })
        }
        _ => json!({ "error": error.to_string() }),
    };
    (status, axum::Json(payload)).into_response()
}

fn submission_response(error: SubmissionError) -> Response {
    let status = match &error {
        SubmissionError::NotFound(_) => StatusCode::NOT_FOUND,
        SubmissionError::Forbidden(_) => StatusCode::FORBIDDEN,
        SubmissionError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SubmissionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}

#[derive(Deserialize)]
struct QualificationBody {
    actor: Actor,
    tree: QualificationTree,
}

async fn create_qualification<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    axum::Json(body): axum::Json<QualificationBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.reconciler.create(&body.tree, &body.actor) {
        Ok(id) => {
            let payload = json!({ "qualification_id": id });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(error) => reconcile_response(error),
    }
}

async fn update_qualification<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(qualification_id): Path<u64>,
    axum::Json(body): axum::Json<QualificationBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    let id = QualificationId(qualification_id);
    match state.reconciler.update(id, &body.tree, &body.actor) {
        Ok(()) => {
            let payload = json!({ "qualification_id": id });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => reconcile_response(error),
    }
}

#[derive(Deserialize)]
struct ActorBody {
    actor: Actor,
}

async fn delete_qualification<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(qualification_id): Path<u64>,
    axum::Json(body): axum::Json<ActorBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state
        .reconciler
        .delete(QualificationId(qualification_id), &body.actor)
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => reconcile_response(error),
    }
}

#[derive(Deserialize)]
struct CreateUserBody {
    actor: Actor,
    #[serde(flatten)]
    request: CreateUserRequest,
}

async fn create_user<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    axum::Json(body): axum::Json<CreateUserBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.enrollment.create_user(&body.request, &body.actor) {
        Ok(id) => {
            let payload = json!({ "user_id": id });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(error) => assign_response(error),
    }
}

#[derive(Deserialize)]
struct ReassignBody {
    actor: Actor,
    qualification_ids: Vec<QualificationId>,
}

async fn reassign_staff<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(user_id): Path<u64>,
    axum::Json(body): axum::Json<ReassignBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state
        .enrollment
        .reassign_staff(UserId(user_id), &body.qualification_ids, &body.actor)
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => assign_response(error),
    }
}

#[derive(Deserialize)]
struct RebindBody {
    actor: Actor,
    qualification_id: QualificationId,
    #[serde(default)]
    assessor_id: Option<UserId>,
    #[serde(default)]
    iqa_id: Option<UserId>,
}

async fn rebind_learner<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(user_id): Path<u64>,
    axum::Json(body): axum::Json<RebindBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.enrollment.rebind_learner_staff(
        UserId(user_id),
        body.qualification_id,
        body.assessor_id,
        body.iqa_id,
        &body.actor,
    ) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => assign_response(error),
    }
}

#[derive(Deserialize)]
struct StatusBody {
    actor: Actor,
    status: EntityStatus,
    #[serde(default)]
    qualification_id: Option<QualificationId>,
}

async fn set_user_status<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(user_id): Path<u64>,
    axum::Json(body): axum::Json<StatusBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.enrollment.set_user_status(
        UserId(user_id),
        body.status,
        body.qualification_id,
        &body.actor,
    ) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => assign_response(error),
    }
}

#[derive(Deserialize)]
struct SamplingBody {
    actor: Actor,
    qualification_id: QualificationId,
    sampling_ratio: u32,
}

async fn change_sampling_ratio<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(user_id): Path<u64>,
    axum::Json(body): axum::Json<SamplingBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.enrollment.change_sampling_ratio(
        UserId(user_id),
        body.qualification_id,
        body.sampling_ratio,
        &body.actor,
    ) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => assign_response(error),
    }
}

#[derive(Deserialize)]
struct RemoveUserBody {
    actor: Actor,
    #[serde(default)]
    qualification_id: Option<QualificationId>,
}

async fn remove_user<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(user_id): Path<u64>,
    axum::Json(body): axum::Json<RemoveUserBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state
        .enrollment
        .remove_user(UserId(user_id), body.qualification_id, &body.actor)
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => assign_response(error),
    }
}

#[derive(Deserialize)]
struct ChangeQualificationBody {
    actor: Actor,
    qualification_id: QualificationId,
}

async fn change_learner_qualification<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path(enrollment_id): Path<u64>,
    axum::Json(body): axum::Json<ChangeQualificationBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.enrollment.change_learner_qualification(
        UserQualificationId(enrollment_id),
        body.qualification_id,
        &body.actor,
    ) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => assign_response(error),
    }
}

#[derive(Deserialize)]
struct SubmitEvidenceBody {
    actor: Actor,
    path: CriterionPath,
    comment: String,
    #[serde(default)]
    attachments: Vec<String>,
}

async fn submit_evidence<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    axum::Json(body): axum::Json<SubmitEvidenceBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.submissions.submit_evidence(
        &body.actor,
        &body.path,
        &body.comment,
        &body.attachments,
    ) {
        Ok(submission) => {
            let payload = json!({
                "submission_id": submission.id,
                "status": submission.status.label(),
            });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Err(error) => submission_response(error),
    }
}

#[derive(Deserialize)]
struct DecisionBody {
    actor: Actor,
    learner_id: UserId,
    qualification_id: QualificationId,
    ac_id: CriterionId,
    status: DecisionStatus,
}

async fn decide_submission<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    axum::Json(body): axum::Json<DecisionBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.submissions.decide(
        &body.actor,
        body.learner_id,
        body.qualification_id,
        body.ac_id,
        body.status,
    ) {
        Ok(submission) => {
            let payload = json!({
                "submission_id": submission.id,
                "status": submission.status.label(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => submission_response(error),
    }
}

#[derive(Deserialize)]
struct IqaOutcomeBody {
    actor: Actor,
    learner_id: UserId,
    qualification_id: QualificationId,
    ac_id: CriterionId,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

async fn record_iqa_outcome<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    axum::Json(body): axum::Json<IqaOutcomeBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.submissions.record_iqa_outcome(
        &body.actor,
        body.learner_id,
        body.qualification_id,
        body.ac_id,
        body.outcome,
        body.comment,
    ) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => submission_response(error),
    }
}

#[derive(Deserialize)]
struct FeedbackBody {
    actor: Actor,
    learner_id: UserId,
    qualification_id: QualificationId,
    lo_id: OutcomeId,
    comment: String,
}

async fn record_assessor_feedback<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    axum::Json(body): axum::Json<FeedbackBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.submissions.record_assessor_feedback(
        &body.actor,
        body.learner_id,
        body.qualification_id,
        body.lo_id,
        &body.comment,
    ) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(error) => submission_response(error),
    }
}

#[derive(Deserialize)]
struct DeleteAttachmentBody {
    actor: Actor,
    qualification_id: QualificationId,
}

async fn delete_attachment<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path((submission_id, attachment_id)): Path<(u64, u64)>,
    axum::Json(body): axum::Json<DeleteAttachmentBody>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state.submissions.delete_attachment(
        &body.actor,
        body.qualification_id,
        SubmissionId(submission_id),
        AttachmentId(attachment_id),
    ) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => submission_response(error),
    }
}

async fn completion<S, N>(
    State(state): State<Arc<AssessmentState<S, N>>>,
    Path((learner_id, qualification_id)): Path<(u64, u64)>,
) -> Response
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier + Send + Sync + 'static,
{
    match state
        .submissions
        .completion_percentage(UserId(learner_id), QualificationId(qualification_id))
    {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(error) => submission_response(error),
    }
}
