//! Integration specifications for the qualification hierarchy lifecycle.
//!
//! Scenarios run through the public service facade: an admin authors a
//! qualification tree, revises it, and retires it, while the reconciler keeps
//! ordering, uniqueness, and rollback guarantees intact.

mod common {
    use std::sync::Arc;

    use qualtrack::assessment::domain::{
        Actor, CriterionFields, CriterionNode, OutcomeFields, OutcomeNode, QualificationTree,
        Role, TitleFields, UnitFields, UnitNode,
    };
    use qualtrack::assessment::reconciler::HierarchyReconciler;
    use qualtrack::assessment::store::MemoryStore;

    pub(super) struct Harness {
        pub(super) store: Arc<MemoryStore>,
        pub(super) reconciler: HierarchyReconciler<MemoryStore>,
        pub(super) admin: Actor,
    }

    pub(super) fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let admin = store
            .seed_actor(Role::Admin, "centre.admin@awarding.test")
            .expect("seed admin");
        Harness {
            reconciler: HierarchyReconciler::new(Arc::clone(&store)),
            store,
            admin,
        }
    }

    pub(super) fn unit(title: &str, outcomes: Vec<OutcomeNode>) -> UnitNode {
        UnitNode::New {
            fields: UnitFields {
                unit_number: format!("U-{title}"),
                unit_title: title.to_string(),
                unit_type: "mandatory".to_string(),
            },
            outcomes,
        }
    }

    pub(super) fn outcome(detail: &str, criteria: Vec<CriterionNode>) -> OutcomeNode {
        OutcomeNode::New {
            fields: OutcomeFields {
                lo_number: format!("LO-{detail}"),
                lo_detail: detail.to_string(),
            },
            criteria,
        }
    }

    pub(super) fn criterion(detail: &str) -> CriterionNode {
        CriterionNode::New {
            fields: CriterionFields {
                ac_number: format!("AC-{detail}"),
                ac_detail: detail.to_string(),
            },
        }
    }

    pub(super) fn brickwork_tree() -> QualificationTree {
        QualificationTree {
            sub_title: "Level 1 Brickwork".to_string(),
            sub_number: "BRK-100".to_string(),
            units: Some(vec![
                unit(
                    "Setting Out",
                    vec![outcome(
                        "Interpret working drawings",
                        vec![criterion("Read datum points"), criterion("Mark out a corner")],
                    )],
                ),
                unit(
                    "Mortar Craft",
                    vec![outcome(
                        "Produce mortar mixes",
                        vec![criterion("Gauge a 1:4 mix")],
                    )],
                ),
            ]),
            document_titles: Some(vec![qualtrack::assessment::domain::DocumentTitleNode::New {
                fields: TitleFields {
                    title: "Workshop logbook".to_string(),
                },
            }]),
        }
    }
}

mod authoring {
    use super::common::*;
    use qualtrack::assessment::reconciler::ReconcileError;
    use qualtrack::assessment::store::{QualificationStore, Visibility};

    #[test]
    fn full_tree_persists_with_parent_links() {
        let h = harness();
        let qual = h
            .reconciler
            .create(&brickwork_tree(), &h.admin)
            .expect("tree creates");

        let units = h.store.units(qual, Visibility::Active).expect("units");
        let outcomes = h.store.outcomes(qual, Visibility::Active).expect("outcomes");
        let criteria = h.store.criteria(qual, Visibility::Active).expect("criteria");
        assert_eq!(units.len(), 2);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(criteria.len(), 3);
        assert!(outcomes.iter().all(|o| units.iter().any(|u| u.id == o.unit_id)));
        assert!(criteria.iter().all(|c| outcomes.iter().any(|o| o.id == c.lo_id)));
        assert_eq!(
            h.store
                .document_titles(qual, Visibility::Active)
                .expect("titles")
                .len(),
            1
        );
    }

    #[test]
    fn scope_uniqueness_spans_only_the_authoring_admin() {
        let h = harness();
        h.reconciler
            .create(&brickwork_tree(), &h.admin)
            .expect("first tree");

        match h.reconciler.create(&brickwork_tree(), &h.admin) {
            Err(ReconcileError::Duplicate(_)) => {}
            other => panic!("expected duplicate, got {other:?}"),
        }

        let other_admin = h
            .store
            .seed_actor(qualtrack::assessment::domain::Role::Admin, "second@awarding.test")
            .expect("seed second admin");
        h.reconciler
            .create(&brickwork_tree(), &other_admin)
            .expect("same title under another admin");
    }

    #[test]
    fn partial_failure_leaves_no_residue() {
        let h = harness();
        h.store.set_write_budget(3);

        let compensated = match h.reconciler.create(&brickwork_tree(), &h.admin) {
            Err(ReconcileError::Internal { compensated, .. }) => compensated,
            other => panic!("expected internal error, got {other:?}"),
        };
        let qual_ref = compensated
            .iter()
            .find(|e| e.kind == "qualification")
            .expect("qualification was compensated");
        // Nothing survives, tombstones included.
        assert!(h
            .store
            .qualification(
                qualtrack::assessment::domain::QualificationId(qual_ref.id),
                Visibility::IncludeDeleted
            )
            .expect("lookup")
            .is_none());
    }
}

mod revision {
    use super::common::*;
    use qualtrack::assessment::domain::{QualificationTree, UnitNode};
    use qualtrack::assessment::store::{QualificationStore, Visibility};

    #[test]
    fn retained_units_survive_and_dropped_units_tombstone() {
        let h = harness();
        let qual = h
            .reconciler
            .create(&brickwork_tree(), &h.admin)
            .expect("tree creates");
        let before = h.store.units(qual, Visibility::Active).expect("units");
        let kept = before[0].clone();

        let desired = QualificationTree {
            sub_title: "Level 1 Brickwork".to_string(),
            sub_number: "BRK-100".to_string(),
            units: Some(vec![
                UnitNode::Existing {
                    id: kept.id,
                    fields: kept.fields.clone(),
                    outcomes: Vec::new(),
                },
                unit("Blockwork", vec![outcome("Lay block courses", vec![criterion("Lay to line")])]),
            ]),
            document_titles: None,
        };
        h.reconciler
            .update(qual, &desired, &h.admin)
            .expect("revision applies");

        let after = h.store.units(qual, Visibility::Active).expect("units");
        assert_eq!(after.len(), 2);
        assert!(after.iter().any(|u| u.id == kept.id));
        assert!(after.iter().any(|u| u.fields.unit_title == "Blockwork"));

        let all = h.store.units(qual, Visibility::IncludeDeleted).expect("units");
        assert_eq!(all.len(), 3);
        assert!(all
            .iter()
            .any(|u| u.fields.unit_title == "Mortar Craft" && u.deleted));
        // Document titles were absent from the payload and stay untouched.
        assert_eq!(
            h.store
                .document_titles(qual, Visibility::Active)
                .expect("titles")
                .len(),
            1
        );
    }

    #[test]
    fn failed_revision_restores_the_previous_tree() {
        let h = harness();
        let qual = h
            .reconciler
            .create(&brickwork_tree(), &h.admin)
            .expect("tree creates");

        let desired = QualificationTree {
            sub_title: "Level 1 Brickwork (2026)".to_string(),
            sub_number: "BRK-100".to_string(),
            units: Some(Vec::new()),
            document_titles: None,
        };
        h.store.set_write_budget(1);
        h.reconciler
            .update(qual, &desired, &h.admin)
            .expect_err("revision must fail");

        let current = h
            .store
            .qualification(qual, Visibility::Active)
            .expect("lookup")
            .expect("row present");
        assert_eq!(current.sub_title, "Level 1 Brickwork");
        assert_eq!(h.store.units(qual, Visibility::Active).expect("units").len(), 2);
    }
}

mod retirement {
    use super::common::*;
    use qualtrack::assessment::store::{QualificationStore, Visibility};

    #[test]
    fn delete_tombstones_every_level() {
        let h = harness();
        let qual = h
            .reconciler
            .create(&brickwork_tree(), &h.admin)
            .expect("tree creates");

        h.reconciler.delete(qual, &h.admin).expect("delete applies");

        assert!(h
            .store
            .qualification(qual, Visibility::Active)
            .expect("lookup")
            .is_none());
        assert!(h.store.units(qual, Visibility::Active).expect("units").is_empty());
        assert!(h
            .store
            .criteria(qual, Visibility::Active)
            .expect("criteria")
            .is_empty());
        // History stays queryable through the tombstone scope.
        assert_eq!(
            h.store
                .criteria(qual, Visibility::IncludeDeleted)
                .expect("criteria")
                .len(),
            3
        );
    }
}
