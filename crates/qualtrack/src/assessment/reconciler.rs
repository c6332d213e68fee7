use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::domain::{
    Actor, CriterionId, CriterionNode, DocumentTitleId, DocumentTitleNode, OutcomeId,
    OutcomeNode, QualificationId, QualificationTree, Role, UnitId, UnitNode, UserId,
};
use super::saga::{EntityRef, Saga};
use super::store::{QualificationField, QualificationStore, StoreError, Visibility};

/// Tree level a duplicate value was found at, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeLevel {
    SubTitle,
    SubNumber,
    UnitTitle,
    OutcomeDetail,
    CriterionDetail,
    DocumentTitle,
}

impl TreeLevel {
    const fn noun(self) -> &'static str {
        match self {
            TreeLevel::SubTitle => "qualification title",
            TreeLevel::SubNumber => "qualification number",
            TreeLevel::UnitTitle => "unit title",
            TreeLevel::OutcomeDetail => "learning outcome",
            TreeLevel::CriterionDetail => "assessment criterion",
            TreeLevel::DocumentTitle => "document title",
        }
    }
}

/// A value that collides with one already present at the same level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateField {
    pub level: TreeLevel,
    pub value: String,
}

impl fmt::Display for DuplicateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            TreeLevel::SubTitle | TreeLevel::SubNumber => {
                write!(f, "{} '{}' already exists", self.level.noun(), self.value)
            }
            _ => write!(
                f,
                "{} '{}' already exists in this qualification",
                self.level.noun(),
                self.value
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{0}")]
    Duplicate(DuplicateField),
    #[error("qualification not found")]
    NotFound,
    #[error("operation requires an admin actor")]
    Forbidden,
    #[error("reconciliation failed: {source}")]
    Internal {
        source: StoreError,
        /// Rows whose compensation was attempted, newest write first.
        compensated: Vec<EntityRef>,
    },
}

/// Reconciles a desired qualification tree against the persisted one.
///
/// Creation is saga-guarded: each insert records a purge undo, and a failed
/// write rolls the partial tree back before the error surfaces. Updates are
/// snapshot-guarded instead: the whole persisted tree is captured up front
/// and written back verbatim when any write fails.
pub struct HierarchyReconciler<S> {
    store: Arc<S>,
}

impl<S> HierarchyReconciler<S>
where
    S: QualificationStore + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Creates a qualification and its full tree in input order.
    pub fn create(
        &self,
        tree: &QualificationTree,
        actor: &Actor,
    ) -> Result<QualificationId, ReconcileError> {
        require_admin(actor)?;
        self.check_scope_uniqueness(&[actor.id], tree, None)?;
        check_payload_uniqueness(tree)?;

        let mut saga = Saga::new();
        match self.insert_tree(tree, actor.id, &mut saga) {
            Ok(id) => {
                saga.commit();
                Ok(id)
            }
            Err(source) => {
                let compensated = saga.abort();
                tracing::warn!(
                    error = %source,
                    steps = compensated.len(),
                    "qualification create rolled back"
                );
                Err(ReconcileError::Internal {
                    source,
                    compensated,
                })
            }
        }
    }

    /// Brings the persisted tree in line with `tree`: rows absent from the
    /// desired state are cascade soft-deleted, `Existing` nodes update in
    /// place, `New` nodes insert under their resolved parent.
    pub fn update(
        &self,
        id: QualificationId,
        tree: &QualificationTree,
        actor: &Actor,
    ) -> Result<(), ReconcileError> {
        require_admin(actor)?;
        let existing = self
            .store
            .qualification(id, Visibility::Active)
            .map_err(internal_plain)?
            .ok_or(ReconcileError::NotFound)?;
        self.check_scope_uniqueness(&[existing.created_by, actor.id], tree, Some(id))?;
        check_payload_uniqueness(tree)?;
        self.check_persisted_uniqueness(id, tree)?;

        let snapshot = self.store.snapshot_tree(id).map_err(internal_plain)?;
        if let Err(source) = self.apply_update(id, tree, actor.id) {
            if let Err(restore_err) = self.store.restore_tree(&snapshot) {
                tracing::warn!(
                    qualification = id.0,
                    error = %restore_err,
                    "tree restore failed after aborted update"
                );
            }
            return Err(ReconcileError::Internal {
                source,
                compensated: Vec::new(),
            });
        }
        Ok(())
    }

    /// Cascade soft-deletes the qualification and every descendant row.
    pub fn delete(&self, id: QualificationId, actor: &Actor) -> Result<(), ReconcileError> {
        require_admin(actor)?;
        self.store
            .qualification(id, Visibility::Active)
            .map_err(internal_plain)?
            .ok_or(ReconcileError::NotFound)?;

        let criteria: Vec<CriterionId> = self
            .store
            .criteria(id, Visibility::Active)
            .map_err(internal_plain)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let outcomes: Vec<OutcomeId> = self
            .store
            .outcomes(id, Visibility::Active)
            .map_err(internal_plain)?
            .into_iter()
            .map(|o| o.id)
            .collect();
        let units: Vec<UnitId> = self
            .store
            .units(id, Visibility::Active)
            .map_err(internal_plain)?
            .into_iter()
            .map(|u| u.id)
            .collect();
        let titles: Vec<DocumentTitleId> = self
            .store
            .document_titles(id, Visibility::Active)
            .map_err(internal_plain)?
            .into_iter()
            .map(|d| d.id)
            .collect();

        self.store
            .soft_delete_criteria(&criteria, actor.id)
            .map_err(internal_plain)?;
        self.store
            .soft_delete_outcomes(&outcomes, actor.id)
            .map_err(internal_plain)?;
        self.store
            .soft_delete_units(&units, actor.id)
            .map_err(internal_plain)?;
        self.store
            .soft_delete_document_titles(&titles, actor.id)
            .map_err(internal_plain)?;
        self.store
            .soft_delete_qualification(id, actor.id)
            .map_err(internal_plain)?;
        tracing::info!(qualification = id.0, "qualification tree soft-deleted");
        Ok(())
    }

    fn check_scope_uniqueness(
        &self,
        scope: &[UserId],
        tree: &QualificationTree,
        exclude: Option<QualificationId>,
    ) -> Result<(), ReconcileError> {
        if self
            .store
            .qualification_field_taken(scope, QualificationField::SubTitle, &tree.sub_title, exclude)
            .map_err(internal_plain)?
        {
            return Err(duplicate(TreeLevel::SubTitle, &tree.sub_title));
        }
        if self
            .store
            .qualification_field_taken(
                scope,
                QualificationField::SubNumber,
                &tree.sub_number,
                exclude,
            )
            .map_err(internal_plain)?
        {
            return Err(duplicate(TreeLevel::SubNumber, &tree.sub_number));
        }
        Ok(())
    }

    /// Rejects desired values that collide with retained persisted rows
    /// other than the node claiming them. Every level is checked across the
    /// whole qualification; rows the update is about to delete never block.
    fn check_persisted_uniqueness(
        &self,
        id: QualificationId,
        tree: &QualificationTree,
    ) -> Result<(), ReconcileError> {
        if let Some(units) = &tree.units {
            let retained_units: HashSet<UnitId> =
                units.iter().filter_map(UnitNode::existing_id).collect();
            let persisted_units = self
                .store
                .units(id, Visibility::Active)
                .map_err(internal_plain)?;
            for node in units {
                for row in &persisted_units {
                    if retained_units.contains(&row.id)
                        && node.existing_id() != Some(row.id)
                        && row.fields.unit_title == node.fields().unit_title
                    {
                        return Err(duplicate(TreeLevel::UnitTitle, &node.fields().unit_title));
                    }
                }
            }

            let retained_outcomes: HashSet<OutcomeId> = units
                .iter()
                .flat_map(UnitNode::outcomes)
                .filter_map(OutcomeNode::existing_id)
                .collect();
            let persisted_outcomes = self
                .store
                .outcomes(id, Visibility::Active)
                .map_err(internal_plain)?;
            for node in units.iter().flat_map(UnitNode::outcomes) {
                for row in &persisted_outcomes {
                    if retained_outcomes.contains(&row.id)
                        && node.existing_id() != Some(row.id)
                        && row.fields.lo_detail == node.fields().lo_detail
                    {
                        return Err(duplicate(
                            TreeLevel::OutcomeDetail,
                            &node.fields().lo_detail,
                        ));
                    }
                }
            }

            let retained_criteria: HashSet<CriterionId> = units
                .iter()
                .flat_map(UnitNode::outcomes)
                .flat_map(OutcomeNode::criteria)
                .filter_map(CriterionNode::existing_id)
                .collect();
            let persisted_criteria = self
                .store
                .criteria(id, Visibility::Active)
                .map_err(internal_plain)?;
            for node in units
                .iter()
                .flat_map(UnitNode::outcomes)
                .flat_map(OutcomeNode::criteria)
            {
                for row in &persisted_criteria {
                    if retained_criteria.contains(&row.id)
                        && node.existing_id() != Some(row.id)
                        && row.fields.ac_detail == node.fields().ac_detail
                    {
                        return Err(duplicate(
                            TreeLevel::CriterionDetail,
                            &node.fields().ac_detail,
                        ));
                    }
                }
            }
        }

        if let Some(titles) = &tree.document_titles {
            let retained: HashSet<DocumentTitleId> = titles
                .iter()
                .filter_map(DocumentTitleNode::existing_id)
                .collect();
            let persisted = self
                .store
                .document_titles(id, Visibility::Active)
                .map_err(internal_plain)?;
            for node in titles {
                for row in &persisted {
                    if retained.contains(&row.id)
                        && node.existing_id() != Some(row.id)
                        && row.fields.title == node.fields().title
                    {
                        return Err(duplicate(TreeLevel::DocumentTitle, &node.fields().title));
                    }
                }
            }
        }
        Ok(())
    }

    fn insert_tree(
        &self,
        tree: &QualificationTree,
        actor: UserId,
        saga: &mut Saga,
    ) -> Result<QualificationId, StoreError> {
        let qualification =
            self.store
                .insert_qualification(&tree.sub_title, &tree.sub_number, actor)?;
        let qual_id = qualification.id;
        {
            let store = Arc::clone(&self.store);
            saga.record(EntityRef::new("qualification", qual_id.0), move || {
                store.purge_qualification(qual_id)
            });
        }

        for unit_node in tree.units.as_deref().unwrap_or_default() {
            let unit = self.store.insert_unit(qual_id, unit_node.fields(), actor)?;
            {
                let store = Arc::clone(&self.store);
                let id = unit.id;
                saga.record(EntityRef::new("unit", id.0), move || store.purge_unit(id));
            }
            for outcome_node in unit_node.outcomes() {
                let outcome =
                    self.store
                        .insert_outcome(qual_id, unit.id, outcome_node.fields(), actor)?;
                {
                    let store = Arc::clone(&self.store);
                    let id = outcome.id;
                    saga.record(EntityRef::new("outcome", id.0), move || {
                        store.purge_outcome(id)
                    });
                }
                for criterion_node in outcome_node.criteria() {
                    let criterion = self.store.insert_criterion(
                        qual_id,
                        outcome.id,
                        criterion_node.fields(),
                        actor,
                    )?;
                    let store = Arc::clone(&self.store);
                    let id = criterion.id;
                    saga.record(EntityRef::new("criterion", id.0), move || {
                        store.purge_criterion(id)
                    });
                }
            }
        }

        for title_node in tree.document_titles.as_deref().unwrap_or_default() {
            let title = self
                .store
                .insert_document_title(qual_id, title_node.fields(), actor)?;
            let store = Arc::clone(&self.store);
            let id = title.id;
            saga.record(EntityRef::new("document_title", id.0), move || {
                store.purge_document_title(id)
            });
        }
        Ok(qual_id)
    }

    fn apply_update(
        &self,
        id: QualificationId,
        tree: &QualificationTree,
        actor: UserId,
    ) -> Result<(), StoreError> {
        let mut qualification = self
            .store
            .qualification(id, Visibility::Active)?
            .ok_or(StoreError::NotFound)?;
        if qualification.sub_title != tree.sub_title
            || qualification.sub_number != tree.sub_number
        {
            qualification.sub_title = tree.sub_title.clone();
            qualification.sub_number = tree.sub_number.clone();
            qualification.updated_by = actor;
            self.store.update_qualification(&qualification)?;
        }

        if let Some(unit_nodes) = &tree.units {
            self.reconcile_units(id, unit_nodes, actor)?;
        }
        if let Some(title_nodes) = &tree.document_titles {
            self.reconcile_document_titles(id, title_nodes, actor)?;
        }
        Ok(())
    }

    /// Deletion pass then upsert pass. A persisted unit missing from the
    /// desired id set takes its outcomes and criteria down with it.
    fn reconcile_units(
        &self,
        id: QualificationId,
        nodes: &[UnitNode],
        actor: UserId,
    ) -> Result<(), StoreError> {
        let persisted_units = self.store.units(id, Visibility::Active)?;
        let persisted_outcomes = self.store.outcomes(id, Visibility::Active)?;
        let persisted_criteria = self.store.criteria(id, Visibility::Active)?;

        let retained_units: HashSet<UnitId> =
            nodes.iter().filter_map(UnitNode::existing_id).collect();
        let retained_outcomes: HashSet<OutcomeId> = nodes
            .iter()
            .flat_map(UnitNode::outcomes)
            .filter_map(OutcomeNode::existing_id)
            .collect();
        let retained_criteria: HashSet<CriterionId> = nodes
            .iter()
            .flat_map(UnitNode::outcomes)
            .flat_map(OutcomeNode::criteria)
            .filter_map(CriterionNode::existing_id)
            .collect();

        let dead_units: HashSet<UnitId> = persisted_units
            .iter()
            .filter(|u| !retained_units.contains(&u.id))
            .map(|u| u.id)
            .collect();
        let dead_outcomes: HashSet<OutcomeId> = persisted_outcomes
            .iter()
            .filter(|o| dead_units.contains(&o.unit_id) || !retained_outcomes.contains(&o.id))
            .map(|o| o.id)
            .collect();
        let dead_criteria: Vec<CriterionId> = persisted_criteria
            .iter()
            .filter(|c| dead_outcomes.contains(&c.lo_id) || !retained_criteria.contains(&c.id))
            .map(|c| c.id)
            .collect();

        if !dead_criteria.is_empty() {
            self.store.soft_delete_criteria(&dead_criteria, actor)?;
        }
        if !dead_outcomes.is_empty() {
            let ids: Vec<OutcomeId> = dead_outcomes.iter().copied().collect();
            self.store.soft_delete_outcomes(&ids, actor)?;
        }
        if !dead_units.is_empty() {
            let ids: Vec<UnitId> = dead_units.iter().copied().collect();
            self.store.soft_delete_units(&ids, actor)?;
        }

        let unit_rows: HashMap<UnitId, _> =
            persisted_units.into_iter().map(|u| (u.id, u)).collect();
        let outcome_rows: HashMap<OutcomeId, _> =
            persisted_outcomes.into_iter().map(|o| (o.id, o)).collect();
        let criterion_rows: HashMap<CriterionId, _> =
            persisted_criteria.into_iter().map(|c| (c.id, c)).collect();

        for node in nodes {
            let unit_id = match node {
                UnitNode::Existing { id: unit_id, fields, .. } => {
                    let mut row = unit_rows
                        .get(unit_id)
                        .cloned()
                        .ok_or(StoreError::NotFound)?;
                    if &row.fields != fields {
                        row.fields = fields.clone();
                        row.updated_by = actor;
                        self.store.update_unit(&row)?;
                    }
                    *unit_id
                }
                UnitNode::New { fields, .. } => self.store.insert_unit(id, fields, actor)?.id,
            };

            for outcome_node in node.outcomes() {
                let lo_id = match outcome_node {
                    OutcomeNode::Existing { id: lo_id, fields, .. } => {
                        let mut row = outcome_rows
                            .get(lo_id)
                            .cloned()
                            .ok_or(StoreError::NotFound)?;
                        if &row.fields != fields {
                            row.fields = fields.clone();
                            row.updated_by = actor;
                            self.store.update_outcome(&row)?;
                        }
                        *lo_id
                    }
                    OutcomeNode::New { fields, .. } => {
                        self.store.insert_outcome(id, unit_id, fields, actor)?.id
                    }
                };

                for criterion_node in outcome_node.criteria() {
                    match criterion_node {
                        CriterionNode::Existing { id: ac_id, fields } => {
                            let mut row = criterion_rows
                                .get(ac_id)
                                .cloned()
                                .ok_or(StoreError::NotFound)?;
                            if &row.fields != fields {
                                row.fields = fields.clone();
                                row.updated_by = actor;
                                self.store.update_criterion(&row)?;
                            }
                        }
                        CriterionNode::New { fields } => {
                            self.store.insert_criterion(id, lo_id, fields, actor)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn reconcile_document_titles(
        &self,
        id: QualificationId,
        nodes: &[DocumentTitleNode],
        actor: UserId,
    ) -> Result<(), StoreError> {
        let persisted = self.store.document_titles(id, Visibility::Active)?;
        let retained: HashSet<DocumentTitleId> = nodes
            .iter()
            .filter_map(DocumentTitleNode::existing_id)
            .collect();
        let dead: Vec<DocumentTitleId> = persisted
            .iter()
            .filter(|d| !retained.contains(&d.id))
            .map(|d| d.id)
            .collect();
        if !dead.is_empty() {
            self.store.soft_delete_document_titles(&dead, actor)?;
        }

        let rows: HashMap<DocumentTitleId, _> = persisted.into_iter().map(|d| (d.id, d)).collect();
        for node in nodes {
            match node {
                DocumentTitleNode::Existing { id: title_id, fields } => {
                    let mut row = rows.get(title_id).cloned().ok_or(StoreError::NotFound)?;
                    if &row.fields != fields {
                        row.fields = fields.clone();
                        row.updated_by = actor;
                        self.store.update_document_title(&row)?;
                    }
                }
                DocumentTitleNode::New { fields } => {
                    self.store.insert_document_title(id, fields, actor)?;
                }
            }
        }
        Ok(())
    }
}

fn require_admin(actor: &Actor) -> Result<(), ReconcileError> {
    if actor.role == Role::Admin {
        Ok(())
    } else {
        Err(ReconcileError::Forbidden)
    }
}

fn duplicate(level: TreeLevel, value: &str) -> ReconcileError {
    ReconcileError::Duplicate(DuplicateField {
        level,
        value: value.to_string(),
    })
}

fn internal_plain(source: StoreError) -> ReconcileError {
    ReconcileError::Internal {
        source,
        compensated: Vec::new(),
    }
}

/// Rejects duplicate values within the payload itself, before any write.
/// Outcome and criterion details are unique across the whole qualification,
/// not just under their parent node.
fn check_payload_uniqueness(tree: &QualificationTree) -> Result<(), ReconcileError> {
    let units = tree.units.as_deref().unwrap_or_default();

    let mut unit_titles = HashSet::new();
    let mut outcome_details = HashSet::new();
    let mut criterion_details = HashSet::new();
    for node in units {
        if !unit_titles.insert(node.fields().unit_title.as_str()) {
            return Err(duplicate(TreeLevel::UnitTitle, &node.fields().unit_title));
        }
        for outcome in node.outcomes() {
            if !outcome_details.insert(outcome.fields().lo_detail.as_str()) {
                return Err(duplicate(TreeLevel::OutcomeDetail, &outcome.fields().lo_detail));
            }
            for criterion in outcome.criteria() {
                if !criterion_details.insert(criterion.fields().ac_detail.as_str()) {
                    return Err(duplicate(
                        TreeLevel::CriterionDetail,
                        &criterion.fields().ac_detail,
                    ));
                }
            }
        }
    }

    let mut titles = HashSet::new();
    for node in tree.document_titles.as_deref().unwrap_or_default() {
        if !titles.insert(node.fields().title.as_str()) {
            return Err(duplicate(TreeLevel::DocumentTitle, &node.fields().title));
        }
    }
    Ok(())
}
