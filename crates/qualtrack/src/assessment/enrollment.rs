use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use super::domain::{
    Actor, EnrollmentProfile, EntityStatus, QualificationId, Role, UserId, UserQualificationId,
};
use super::saga::{EntityRef, Saga};
use super::store::{
    EnrollmentStore, NewUser, QualificationStore, StoreError, SubmissionStore, Visibility,
};

/// Credentials event handed to the outbound notifier after a successful
/// account creation. Delivery transport is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentialsIssued {
    pub email: String,
    pub temporary_password: String,
    pub role: Role,
    pub institute_name: String,
    pub qualification_titles: Vec<String>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("credentials notification failed: {0}")]
    Transport(String),
}

/// Outbound seam for issued-credentials notifications.
pub trait CredentialsNotifier {
    fn publish(&self, event: &UserCredentialsIssued) -> Result<(), NotifyError>;
}

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("operation requires {0}")]
    Forbidden(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("email already registered to a staff account")]
    EmailInUse,
    #[error("email belongs to an account with a different role")]
    EmailOtherRole,
    #[error("learner already enrolled in that qualification")]
    AlreadyEnrolled,
    #[error("learner has submissions against the current qualification")]
    HasActiveSubmissions,
    #[error("{role} has learner history under qualification '{sub_title}'")]
    QualificationInUse { sub_title: String, role: &'static str },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("store failure: {source}")]
    Store {
        source: StoreError,
        compensated: Vec<EntityRef>,
    },
    #[error("notification failure: {source}")]
    Notify {
        source: NotifyError,
        compensated: Vec<EntityRef>,
    },
}

/// Account creation payload. Learners enroll in exactly one qualification
/// and must arrive with both staff bindings; staff take any number of
/// qualification assignments.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub sur_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    pub qualification_ids: Vec<QualificationId>,
    #[serde(default)]
    pub profile: EnrollmentProfile,
    #[serde(default)]
    pub assessor_id: Option<UserId>,
    #[serde(default)]
    pub iqa_id: Option<UserId>,
    #[serde(default)]
    pub sampling_ratio: Option<u32>,
    pub institute_name: String,
}

/// User lifecycle and assignment service: creation saga, staff
/// reassignment guard, learner qualification moves, removal, status flips,
/// and sampling ratio changes.
pub struct EnrollmentService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
}

impl<S, N> EnrollmentService<S, N>
where
    S: QualificationStore + EnrollmentStore + SubmissionStore + Send + Sync + 'static,
    N: CredentialsNotifier,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self { store, notifier }
    }

    /// Creates an account with its enrollments and bindings as one
    /// compensated unit, then notifies the credentials. Any failure after
    /// the first write purges everything written so far.
    pub fn create_user(
        &self,
        request: &CreateUserRequest,
        actor: &Actor,
    ) -> Result<UserId, AssignError> {
        self.require_active_admin(actor)?;
        if request.qualification_ids.is_empty() {
            return Err(AssignError::MissingField("qualification_ids"));
        }
        if request.role == Role::Learner {
            if request.assessor_id.is_none() {
                return Err(AssignError::MissingField("assessor_id"));
            }
            if request.iqa_id.is_none() {
                return Err(AssignError::MissingField("iqa_id"));
            }
        }

        // Email guards run against tombstones too: a deleted account still
        // reserves its address.
        let existing = self
            .store
            .user_by_email(&request.email, Visibility::IncludeDeleted)
            .map_err(store_err)?;
        let reuse = match existing {
            Some(user) => {
                if user.role != Role::Learner {
                    return Err(AssignError::EmailInUse);
                }
                if request.role != Role::Learner {
                    return Err(AssignError::EmailOtherRole);
                }
                if user.created_by != actor.id {
                    return Err(AssignError::EmailInUse);
                }
                let held = self
                    .store
                    .user_qualifications(user.id, Visibility::Active)
                    .map_err(store_err)?;
                if held
                    .iter()
                    .any(|r| request.qualification_ids.contains(&r.qualification_id))
                {
                    return Err(AssignError::AlreadyEnrolled);
                }
                Some(user)
            }
            None => None,
        };

        let mut titles = Vec::with_capacity(request.qualification_ids.len());
        for qual_id in &request.qualification_ids {
            let qualification = self
                .store
                .qualification(*qual_id, Visibility::Active)
                .map_err(store_err)?
                .ok_or(AssignError::NotFound("qualification"))?;
            titles.push(qualification.sub_title);
        }

        let mut saga = Saga::new();
        let outcome = self.insert_user_graph(request, reuse.as_ref().map(|u| u.id), actor, &mut saga);
        let user_id = match outcome {
            Ok(id) => id,
            Err(source) => {
                let compensated = saga.abort();
                tracing::warn!(error = %source, steps = compensated.len(), "user create rolled back");
                return Err(AssignError::Store {
                    source,
                    compensated,
                });
            }
        };

        let event = UserCredentialsIssued {
            email: request.email.clone(),
            temporary_password: temporary_password(),
            role: request.role,
            institute_name: request.institute_name.clone(),
            qualification_titles: titles,
        };
        if let Err(source) = self.notifier.publish(&event) {
            let compensated = saga.abort();
            tracing::warn!(error = %source, steps = compensated.len(), "user create rolled back after notify failure");
            return Err(AssignError::Notify {
                source,
                compensated,
            });
        }
        saga.commit();
        tracing::info!(user = user_id.0, role = request.role.label(), "user created");
        Ok(user_id)
    }

    fn insert_user_graph(
        &self,
        request: &CreateUserRequest,
        reuse: Option<UserId>,
        actor: &Actor,
        saga: &mut Saga,
    ) -> Result<UserId, StoreError> {
        let user_id = match reuse {
            Some(id) => id,
            None => {
                let user = self.store.insert_user(&NewUser {
                    email: request.email.clone(),
                    role: request.role,
                    first_name: request.first_name.clone(),
                    middle_name: request.middle_name.clone(),
                    sur_name: request.sur_name.clone(),
                    contact: request.contact.clone(),
                    created_by: actor.id,
                })?;
                let store = Arc::clone(&self.store);
                let id = user.id;
                saga.record(EntityRef::new("user", id.0), move || store.purge_user(id));
                user.id
            }
        };

        let sampling = request
            .sampling_ratio
            .unwrap_or(if request.role == Role::Assessor { 100 } else { 0 });
        for qual_id in &request.qualification_ids {
            let enrollment = self.store.insert_user_qualification(
                user_id,
                *qual_id,
                &request.profile,
                sampling,
                actor.id,
            )?;
            let store = Arc::clone(&self.store);
            let id = enrollment.id;
            saga.record(EntityRef::new("user_qualification", id.0), move || {
                store.purge_user_qualification(id)
            });

            if request.role == Role::Learner {
                if let Some(assessor_id) = request.assessor_id {
                    let binding =
                        self.store
                            .insert_assessor_binding(user_id, assessor_id, *qual_id, actor.id)?;
                    let store = Arc::clone(&self.store);
                    let id = binding.id;
                    saga.record(EntityRef::new("assessor_binding", id.0), move || {
                        store.purge_assessor_binding(id)
                    });
                }
                if let Some(iqa_id) = request.iqa_id {
                    let binding =
                        self.store
                            .insert_iqa_binding(user_id, iqa_id, *qual_id, actor.id)?;
                    let store = Arc::clone(&self.store);
                    let id = binding.id;
                    saga.record(EntityRef::new("iqa_binding", id.0), move || {
                        store.purge_iqa_binding(id)
                    });
                }
            }
        }
        Ok(user_id)
    }

    /// Replaces a staff member's qualification assignments. Dropping a
    /// qualification is refused while the staff member has any learner
    /// binding history under it, tombstoned bindings included.
    pub fn reassign_staff(
        &self,
        staff_id: UserId,
        qualification_ids: &[QualificationId],
        actor: &Actor,
    ) -> Result<(), AssignError> {
        self.require_active_admin(actor)?;
        let staff = self
            .store
            .user(staff_id, Visibility::Active)
            .map_err(store_err)?
            .ok_or(AssignError::NotFound("user"))?;
        let role = match staff.role {
            Role::Assessor => "assessor",
            Role::Iqa => "iqa",
            _ => return Err(AssignError::Forbidden("an assessor or iqa subject")),
        };

        let held = self
            .store
            .user_qualifications(staff_id, Visibility::Active)
            .map_err(store_err)?;

        for row in &held {
            if qualification_ids.contains(&row.qualification_id) {
                continue;
            }
            let bound = match staff.role {
                Role::Assessor => self
                    .store
                    .learners_of_assessor(staff_id, row.qualification_id, Visibility::IncludeDeleted)
                    .map_err(store_err)?
                    .len(),
                _ => self
                    .store
                    .learners_of_iqa(staff_id, row.qualification_id, Visibility::IncludeDeleted)
                    .map_err(store_err)?
                    .len(),
            };
            if bound > 0 {
                let sub_title = self
                    .store
                    .qualification(row.qualification_id, Visibility::IncludeDeleted)
                    .map_err(store_err)?
                    .map(|q| q.sub_title)
                    .unwrap_or_default();
                return Err(AssignError::QualificationInUse { sub_title, role });
            }
        }

        let mut saga = Saga::new();
        let result = (|| -> Result<(), StoreError> {
            for row in &held {
                if qualification_ids.contains(&row.qualification_id) {
                    continue;
                }
                self.store.soft_delete_user_qualification(row.id, actor.id)?;
                let store = Arc::clone(&self.store);
                let original = row.clone();
                saga.record(EntityRef::new("user_qualification", row.id.0), move || {
                    store.restore_user_qualification(&original)
                });
            }
            let held_ids: Vec<QualificationId> =
                held.iter().map(|r| r.qualification_id).collect();
            let sampling = if staff.role == Role::Assessor { 100 } else { 0 };
            for qual_id in qualification_ids {
                if held_ids.contains(qual_id) {
                    continue;
                }
                self.store
                    .qualification(*qual_id, Visibility::Active)?
                    .ok_or(StoreError::NotFound)?;
                let enrollment = self.store.insert_user_qualification(
                    staff_id,
                    *qual_id,
                    &EnrollmentProfile::default(),
                    sampling,
                    actor.id,
                )?;
                let store = Arc::clone(&self.store);
                let id = enrollment.id;
                saga.record(EntityRef::new("user_qualification", id.0), move || {
                    store.purge_user_qualification(id)
                });
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                saga.commit();
                Ok(())
            }
            Err(source) => {
                let compensated = saga.abort();
                tracing::warn!(error = %source, steps = compensated.len(), "staff reassignment rolled back");
                Err(AssignError::Store {
                    source,
                    compensated,
                })
            }
        }
    }

    /// Moves a learner's enrollment to a different qualification. Refused
    /// while the learner has submissions against the current one.
    pub fn change_learner_qualification(
        &self,
        enrollment_id: UserQualificationId,
        new_qualification: QualificationId,
        actor: &Actor,
    ) -> Result<(), AssignError> {
        self.require_active_admin(actor)?;
        let row = self
            .store
            .user_qualification(enrollment_id, Visibility::Active)
            .map_err(store_err)?
            .ok_or(AssignError::NotFound("enrollment"))?;
        if row.qualification_id == new_qualification {
            return Ok(());
        }
        self.store
            .qualification(new_qualification, Visibility::Active)
            .map_err(store_err)?
            .ok_or(AssignError::NotFound("qualification"))?;
        let submitted = self
            .store
            .submission_count(row.user_id, row.qualification_id)
            .map_err(store_err)?;
        if submitted > 0 {
            return Err(AssignError::HasActiveSubmissions);
        }

        let mut saga = Saga::new();
        let result = (|| -> Result<(), StoreError> {
            self.store.soft_delete_user_qualification(row.id, actor.id)?;
            {
                let store = Arc::clone(&self.store);
                let original = row.clone();
                saga.record(EntityRef::new("user_qualification", row.id.0), move || {
                    store.restore_user_qualification(&original)
                });
            }
            let replacement = self.store.insert_user_qualification(
                row.user_id,
                new_qualification,
                &row.profile,
                row.sampling_ratio,
                actor.id,
            )?;
            let store = Arc::clone(&self.store);
            let id = replacement.id;
            saga.record(EntityRef::new("user_qualification", id.0), move || {
                store.purge_user_qualification(id)
            });
            Ok(())
        })();

        match result {
            Ok(()) => {
                saga.commit();
                Ok(())
            }
            Err(source) => {
                let compensated = saga.abort();
                Err(AssignError::Store {
                    source,
                    compensated,
                })
            }
        }
    }

    /// Replaces the learner's assessor and/or IQA binding under one
    /// qualification. A binding already pointing at the requested staff
    /// member is left untouched.
    pub fn rebind_learner_staff(
        &self,
        learner_id: UserId,
        qualification_id: QualificationId,
        assessor_id: Option<UserId>,
        iqa_id: Option<UserId>,
        actor: &Actor,
    ) -> Result<(), AssignError> {
        self.require_active_admin(actor)?;
        if let Some(assessor) = assessor_id {
            let current = self
                .store
                .assessor_bindings(learner_id, qualification_id, Visibility::Active)
                .map_err(store_err)?;
            if !current.iter().any(|b| b.assessor_id == assessor) {
                self.store
                    .soft_delete_assessor_bindings(learner_id, qualification_id, actor.id)
                    .map_err(store_err)?;
                self.store
                    .insert_assessor_binding(learner_id, assessor, qualification_id, actor.id)
                    .map_err(store_err)?;
            }
        }
        if let Some(iqa) = iqa_id {
            let current = self
                .store
                .iqa_bindings(learner_id, qualification_id, Visibility::Active)
                .map_err(store_err)?;
            if !current.iter().any(|b| b.iqa_id == iqa) {
                self.store
                    .soft_delete_iqa_bindings(learner_id, qualification_id, actor.id)
                    .map_err(store_err)?;
                self.store
                    .insert_iqa_binding(learner_id, iqa, qualification_id, actor.id)
                    .map_err(store_err)?;
            }
        }
        Ok(())
    }

    /// Removes a user administratively. Learner removal is scoped to one
    /// qualification and cascades to submissions, attachments, and
    /// bindings; the account itself goes only when no enrollment remains.
    /// Staff removal is refused while any held qualification still carries
    /// learner binding history.
    pub fn remove_user(
        &self,
        user_id: UserId,
        qualification_id: Option<QualificationId>,
        actor: &Actor,
    ) -> Result<(), AssignError> {
        self.require_active_admin(actor)?;
        let user = self
            .store
            .user(user_id, Visibility::Active)
            .map_err(store_err)?
            .ok_or(AssignError::NotFound("user"))?;

        match user.role {
            Role::Learner => {
                let qual_id =
                    qualification_id.ok_or(AssignError::MissingField("qualification_id"))?;
                self.store
                    .soft_delete_learner_submissions(user_id, qual_id, actor.id)
                    .map_err(store_err)?;
                self.store
                    .soft_delete_assessor_bindings(user_id, qual_id, actor.id)
                    .map_err(store_err)?;
                self.store
                    .soft_delete_iqa_bindings(user_id, qual_id, actor.id)
                    .map_err(store_err)?;
                let enrollments = self
                    .store
                    .user_qualifications(user_id, Visibility::Active)
                    .map_err(store_err)?;
                for row in enrollments
                    .iter()
                    .filter(|r| r.qualification_id == qual_id)
                {
                    self.store
                        .soft_delete_user_qualification(row.id, actor.id)
                        .map_err(store_err)?;
                }
                let remaining = self
                    .store
                    .user_qualifications(user_id, Visibility::Active)
                    .map_err(store_err)?;
                if remaining.is_empty() {
                    self.store
                        .soft_delete_user(user_id, actor.id)
                        .map_err(store_err)?;
                }
                Ok(())
            }
            Role::Assessor | Role::Iqa => {
                let role = if user.role == Role::Assessor {
                    "assessor"
                } else {
                    "iqa"
                };
                let held = self
                    .store
                    .user_qualifications(user_id, Visibility::Active)
                    .map_err(store_err)?;
                for row in &held {
                    let bound = match user.role {
                        Role::Assessor => self
                            .store
                            .learners_of_assessor(
                                user_id,
                                row.qualification_id,
                                Visibility::IncludeDeleted,
                            )
                            .map_err(store_err)?
                            .len(),
                        _ => self
                            .store
                            .learners_of_iqa(
                                user_id,
                                row.qualification_id,
                                Visibility::IncludeDeleted,
                            )
                            .map_err(store_err)?
                            .len(),
                    };
                    if bound > 0 {
                        let sub_title = self
                            .store
                            .qualification(row.qualification_id, Visibility::IncludeDeleted)
                            .map_err(store_err)?
                            .map(|q| q.sub_title)
                            .unwrap_or_default();
                        return Err(AssignError::QualificationInUse { sub_title, role });
                    }
                }
                for row in &held {
                    self.store
                        .soft_delete_user_qualification(row.id, actor.id)
                        .map_err(store_err)?;
                }
                self.store
                    .soft_delete_user(user_id, actor.id)
                    .map_err(store_err)?;
                Ok(())
            }
            Role::Admin => Err(AssignError::Forbidden("a non-admin subject")),
        }
    }

    /// Activates or deactivates a user. Learner flips are scoped per
    /// qualification; the account follows only when no enrollment remains
    /// active. Staff flips apply across every assignment.
    pub fn set_user_status(
        &self,
        user_id: UserId,
        status: EntityStatus,
        qualification_id: Option<QualificationId>,
        actor: &Actor,
    ) -> Result<(), AssignError> {
        self.require_active_admin(actor)?;
        let mut user = self
            .store
            .user(user_id, Visibility::Active)
            .map_err(store_err)?
            .ok_or(AssignError::NotFound("user"))?;
        let enrollments = self
            .store
            .user_qualifications(user_id, Visibility::Active)
            .map_err(store_err)?;

        match user.role {
            Role::Learner => {
                let qual_id =
                    qualification_id.ok_or(AssignError::MissingField("qualification_id"))?;
                let mut any_active = false;
                for mut row in enrollments {
                    if row.qualification_id == qual_id {
                        row.status = status;
                        row.updated_by = actor.id;
                        self.store
                            .update_user_qualification(&row)
                            .map_err(store_err)?;
                        any_active |= status == EntityStatus::Active;
                    } else {
                        any_active |= row.status == EntityStatus::Active;
                    }
                }
                let account_status = if any_active {
                    EntityStatus::Active
                } else {
                    EntityStatus::Inactive
                };
                if user.status != account_status {
                    user.status = account_status;
                    user.updated_by = actor.id;
                    self.store.update_user(&user).map_err(store_err)?;
                }
                Ok(())
            }
            _ => {
                for mut row in enrollments {
                    row.status = status;
                    row.updated_by = actor.id;
                    self.store
                        .update_user_qualification(&row)
                        .map_err(store_err)?;
                }
                user.status = status;
                user.updated_by = actor.id;
                self.store.update_user(&user).map_err(store_err)?;
                Ok(())
            }
        }
    }

    /// Adjusts the IQA sampling ratio on an assessor's assignment row.
    pub fn change_sampling_ratio(
        &self,
        assessor_id: UserId,
        qualification_id: QualificationId,
        ratio: u32,
        actor: &Actor,
    ) -> Result<(), AssignError> {
        self.require_active_admin(actor)?;
        let mut row = self
            .store
            .user_qualifications(assessor_id, Visibility::Active)
            .map_err(store_err)?
            .into_iter()
            .find(|r| r.qualification_id == qualification_id)
            .ok_or(AssignError::NotFound("assignment"))?;
        row.sampling_ratio = ratio;
        row.updated_by = actor.id;
        self.store
            .update_user_qualification(&row)
            .map_err(store_err)?;
        Ok(())
    }

    fn require_active_admin(&self, actor: &Actor) -> Result<(), AssignError> {
        if actor.role != Role::Admin {
            return Err(AssignError::Forbidden("an admin actor"));
        }
        let account = self
            .store
            .user(actor.id, Visibility::Active)
            .map_err(store_err)?
            .ok_or(AssignError::NotFound("actor account"))?;
        if account.status != EntityStatus::Active {
            return Err(AssignError::Forbidden("an active admin account"));
        }
        Ok(())
    }
}

fn store_err(source: StoreError) -> AssignError {
    AssignError::Store {
        source,
        compensated: Vec::new(),
    }
}

fn temporary_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
