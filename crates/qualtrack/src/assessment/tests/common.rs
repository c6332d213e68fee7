use std::sync::{Arc, Mutex};

use crate::assessment::domain::{
    Actor, CriterionFields, CriterionNode, CriterionPath, DocumentTitleNode, EnrollmentProfile,
    OutcomeFields, OutcomeNode, QualificationId, QualificationTree, Role, TitleFields, UnitFields,
    UnitNode, UserId,
};
use crate::assessment::enrollment::{
    CreateUserRequest, CredentialsNotifier, EnrollmentService, NotifyError, UserCredentialsIssued,
};
use crate::assessment::reconciler::HierarchyReconciler;
use crate::assessment::store::{MemoryStore, QualificationStore, Visibility};
use crate::assessment::submissions::SubmissionService;

/// Notifier double that records published credential events.
#[derive(Default)]
pub(super) struct MemoryNotifier {
    events: Mutex<Vec<UserCredentialsIssued>>,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<UserCredentialsIssued> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

impl CredentialsNotifier for MemoryNotifier {
    fn publish(&self, event: &UserCredentialsIssued) -> Result<(), NotifyError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Notifier double whose transport always fails.
pub(super) struct FailingNotifier;

impl CredentialsNotifier for FailingNotifier {
    fn publish(&self, _event: &UserCredentialsIssued) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp offline".to_string()))
    }
}

pub(super) struct Fixture {
    pub(super) store: Arc<MemoryStore>,
    pub(super) notifier: Arc<MemoryNotifier>,
    pub(super) reconciler: HierarchyReconciler<MemoryStore>,
    pub(super) enrollment: EnrollmentService<MemoryStore, MemoryNotifier>,
    pub(super) submissions: SubmissionService<MemoryStore>,
    pub(super) admin: Actor,
    pub(super) assessor: Actor,
    pub(super) iqa: Actor,
}

pub(super) fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(MemoryNotifier::default());
    let admin = store
        .seed_actor(Role::Admin, "admin@centre.test")
        .expect("seed admin");
    let assessor = store
        .seed_actor(Role::Assessor, "assessor@centre.test")
        .expect("seed assessor");
    let iqa = store.seed_actor(Role::Iqa, "iqa@centre.test").expect("seed iqa");
    Fixture {
        reconciler: HierarchyReconciler::new(Arc::clone(&store)),
        enrollment: EnrollmentService::new(Arc::clone(&store), Arc::clone(&notifier)),
        submissions: SubmissionService::new(Arc::clone(&store)),
        store,
        notifier,
        admin,
        assessor,
        iqa,
    }
}

pub(super) fn new_unit(title: &str, outcomes: Vec<OutcomeNode>) -> UnitNode {
    UnitNode::New {
        fields: UnitFields {
            unit_number: format!("U-{title}"),
            unit_title: title.to_string(),
            unit_type: "mandatory".to_string(),
        },
        outcomes,
    }
}

pub(super) fn new_outcome(detail: &str, criteria: Vec<CriterionNode>) -> OutcomeNode {
    OutcomeNode::New {
        fields: OutcomeFields {
            lo_number: format!("LO-{detail}"),
            lo_detail: detail.to_string(),
        },
        criteria,
    }
}

pub(super) fn new_criterion(detail: &str) -> CriterionNode {
    CriterionNode::New {
        fields: CriterionFields {
            ac_number: format!("AC-{detail}"),
            ac_detail: detail.to_string(),
        },
    }
}

pub(super) fn new_document_title(title: &str) -> DocumentTitleNode {
    DocumentTitleNode::New {
        fields: TitleFields {
            title: title.to_string(),
        },
    }
}

/// Two units, three criteria total, one required document.
pub(super) fn sample_tree() -> QualificationTree {
    QualificationTree {
        sub_title: "Level 2 Plumbing".to_string(),
        sub_number: "PLB-200".to_string(),
        units: Some(vec![
            new_unit(
                "Pipework Fundamentals",
                vec![new_outcome(
                    "Understand pipework materials",
                    vec![new_criterion("Identify copper grades"), new_criterion("Select fittings")],
                )],
            ),
            new_unit(
                "Health and Safety",
                vec![new_outcome(
                    "Apply safe isolation",
                    vec![new_criterion("Demonstrate safe isolation")],
                )],
            ),
        ]),
        document_titles: Some(vec![new_document_title("Portfolio declaration")]),
    }
}

/// Resolves the criterion path for the first criterion of the sample tree.
pub(super) fn first_criterion_path(
    store: &MemoryStore,
    qualification_id: QualificationId,
) -> CriterionPath {
    let units = store
        .units(qualification_id, Visibility::Active)
        .expect("units load");
    let outcomes = store
        .outcomes(qualification_id, Visibility::Active)
        .expect("outcomes load");
    let criteria = store
        .criteria(qualification_id, Visibility::Active)
        .expect("criteria load");
    let criterion = criteria.first().expect("at least one criterion");
    let outcome = outcomes
        .iter()
        .find(|o| o.id == criterion.lo_id)
        .expect("criterion parent outcome");
    let unit = units
        .iter()
        .find(|u| u.id == outcome.unit_id)
        .expect("outcome parent unit");
    CriterionPath {
        qualification_id,
        unit_id: unit.id,
        lo_id: outcome.id,
        ac_id: criterion.id,
    }
}

pub(super) fn learner_request(
    qualification_id: QualificationId,
    assessor: UserId,
    iqa: UserId,
) -> CreateUserRequest {
    CreateUserRequest {
        email: "learner@centre.test".to_string(),
        role: Role::Learner,
        first_name: Some("Jess".to_string()),
        middle_name: None,
        sur_name: Some("Morgan".to_string()),
        contact: Some("0700 000000".to_string()),
        qualification_ids: vec![qualification_id],
        profile: EnrollmentProfile {
            first_name: Some("Jess".to_string()),
            sur_name: Some("Morgan".to_string()),
            learner_number: Some("L-0042".to_string()),
            ..EnrollmentProfile::default()
        },
        assessor_id: Some(assessor),
        iqa_id: Some(iqa),
        sampling_ratio: None,
        institute_name: "Northside College".to_string(),
    }
}

pub(super) fn staff_request(role: Role, email: &str, quals: Vec<QualificationId>) -> CreateUserRequest {
    CreateUserRequest {
        email: email.to_string(),
        role,
        first_name: Some("Sam".to_string()),
        middle_name: None,
        sur_name: Some("Reed".to_string()),
        contact: None,
        qualification_ids: quals,
        profile: EnrollmentProfile::default(),
        assessor_id: None,
        iqa_id: None,
        sampling_ratio: None,
        institute_name: "Northside College".to_string(),
    }
}
