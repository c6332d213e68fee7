use super::common::*;
use crate::assessment::domain::{DecisionStatus, QualificationTree, Role};
use crate::assessment::store::{QualificationStore, SubmissionStore, Visibility};
use crate::assessment::submissions::SubmissionError;

#[test]
fn submit_evidence_upserts_the_open_submission() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let path = first_criterion_path(&fx.store, qual);

    let first = fx
        .submissions
        .submit_evidence(&learner, &path, "draft notes", &["uploads/a.pdf".to_string()])
        .expect("first submission");
    let second = fx
        .submissions
        .submit_evidence(&learner, &path, "final notes", &["uploads/b.pdf".to_string()])
        .expect("second submission");

    // Same In-progress row, updated comment, attachments accumulate.
    assert_eq!(first.id, second.id);
    let history = fx
        .submissions
        .history(learner.id, qual, path.ac_id, Visibility::Active)
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].comment, "final notes");
    assert_eq!(
        fx.store
            .attachments(first.id, Visibility::Active)
            .expect("attachments")
            .len(),
        2
    );
}

#[test]
fn submit_evidence_requires_a_learner_and_an_active_criterion() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let path = first_criterion_path(&fx.store, qual);

    match fx.submissions.submit_evidence(&fx.assessor, &path, "notes", &[]) {
        Err(SubmissionError::Forbidden(_)) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }

    // A tombstoned criterion no longer accepts evidence.
    fx.store
        .soft_delete_criteria(&[path.ac_id], fx.admin.id)
        .expect("tombstone criterion");
    match fx.submissions.submit_evidence(&learner, &path, "notes", &[]) {
        Err(SubmissionError::NotFound("assessment criterion")) => {}
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn decision_closes_the_submission_and_cascades_to_attachments() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let path = first_criterion_path(&fx.store, qual);
    let submission = fx
        .submissions
        .submit_evidence(&learner, &path, "notes", &["uploads/a.pdf".to_string()])
        .expect("submission");

    match fx
        .submissions
        .decide(&fx.iqa, learner.id, qual, path.ac_id, DecisionStatus::Accept)
    {
        Err(SubmissionError::Forbidden(_)) => {}
        other => panic!("expected forbidden for iqa, got {other:?}"),
    }

    let decided = fx
        .submissions
        .decide(&fx.assessor, learner.id, qual, path.ac_id, DecisionStatus::Reject)
        .expect("decision");
    assert_eq!(decided.id, submission.id);
    assert_eq!(decided.status, DecisionStatus::Reject);
    assert_eq!(decided.assessor_id, Some(fx.assessor.id));
    let attachments = fx
        .store
        .attachments(submission.id, Visibility::Active)
        .expect("attachments");
    assert_eq!(attachments[0].status, DecisionStatus::Reject);

    // A rejected submission is closed; fresh evidence opens a new row.
    let resubmitted = fx
        .submissions
        .submit_evidence(&learner, &path, "retake", &[])
        .expect("resubmission");
    assert_ne!(resubmitted.id, submission.id);
    assert_eq!(
        fx.submissions
            .history(learner.id, qual, path.ac_id, Visibility::Active)
            .expect("history")
            .len(),
        2
    );
}

#[test]
fn iqa_outcome_stamps_the_most_recent_submission() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let path = first_criterion_path(&fx.store, qual);
    fx.submissions
        .submit_evidence(&learner, &path, "notes", &[])
        .expect("submission");

    fx.submissions
        .record_iqa_outcome(
            &fx.iqa,
            learner.id,
            qual,
            path.ac_id,
            Some("Sampled".to_string()),
            Some("spot check passed".to_string()),
        )
        .expect("iqa outcome");

    let latest = fx
        .store
        .latest_submission(learner.id, qual, path.ac_id)
        .expect("lookup")
        .expect("submission present");
    assert_eq!(latest.iqa_outcome.as_deref(), Some("Sampled"));
    assert_eq!(latest.iqa_comment.as_deref(), Some("spot check passed"));
    assert_eq!(latest.iqa_id, Some(fx.iqa.id));

    // Assessors may relay an outcome as well.
    fx.submissions
        .record_iqa_outcome(
            &fx.assessor,
            learner.id,
            qual,
            path.ac_id,
            Some("Resampled".to_string()),
            None,
        )
        .expect("assessor relays outcome");
}

#[test]
fn comment_only_iqa_path_is_strict() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let path = first_criterion_path(&fx.store, qual);

    // Only an IQA may leave a standalone comment.
    match fx.submissions.record_iqa_outcome(
        &fx.assessor,
        learner.id,
        qual,
        path.ac_id,
        None,
        Some("note".to_string()),
    ) {
        Err(SubmissionError::Forbidden(_)) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }

    match fx
        .submissions
        .record_iqa_outcome(&fx.iqa, learner.id, qual, path.ac_id, None, None)
    {
        Err(SubmissionError::MissingField("comment")) => {}
        other => panic!("expected missing comment, got {other:?}"),
    }

    // The criterion may already be retired; the comment still lands.
    fx.store
        .soft_delete_criteria(&[path.ac_id], fx.admin.id)
        .expect("tombstone criterion");
    fx.submissions
        .record_iqa_outcome(
            &fx.iqa,
            learner.id,
            qual,
            path.ac_id,
            None,
            Some("verify the retake plan".to_string()),
        )
        .expect("comment lands");
    let comments = fx
        .store
        .iqa_comments(learner.id, path.ac_id)
        .expect("comments");
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].comment, "verify the retake plan");
}

#[test]
fn assessor_feedback_reaches_tombstoned_outcomes() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let path = first_criterion_path(&fx.store, qual);

    fx.store
        .soft_delete_outcomes(&[path.lo_id], fx.admin.id)
        .expect("tombstone outcome");
    fx.submissions
        .record_assessor_feedback(&fx.assessor, learner.id, qual, path.lo_id, "good coverage")
        .expect("feedback lands");

    let feedback = fx
        .store
        .assessor_feedback(learner.id, path.lo_id)
        .expect("feedback");
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].comment, "good coverage");

    match fx
        .submissions
        .record_assessor_feedback(&fx.iqa, learner.id, qual, path.lo_id, "nope")
    {
        Err(SubmissionError::Forbidden(_)) => {}
        other => panic!("expected forbidden, got {other:?}"),
    }
}

#[test]
fn completion_counts_accepted_criteria_against_all_criteria() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let path = first_criterion_path(&fx.store, qual);

    fx.submissions
        .submit_evidence(&learner, &path, "notes", &[])
        .expect("submission");
    fx.submissions
        .decide(&fx.assessor, learner.id, qual, path.ac_id, DecisionStatus::Accept)
        .expect("decision");

    // One of three criteria accepted.
    let summary = fx
        .submissions
        .completion_percentage(learner.id, qual)
        .expect("summary");
    assert_eq!(summary.complete, 33.33);
    assert_eq!(summary.incomplete, 66.67);

    // Retiring an unattempted criterion does not inflate completion.
    let criteria = fx
        .store
        .criteria(qual, Visibility::Active)
        .expect("criteria");
    let untouched = criteria
        .iter()
        .find(|c| c.id != path.ac_id)
        .expect("another criterion");
    fx.store
        .soft_delete_criteria(&[untouched.id], fx.admin.id)
        .expect("tombstone criterion");
    let summary = fx
        .submissions
        .completion_percentage(learner.id, qual)
        .expect("summary");
    assert_eq!(summary.complete, 33.33);
}

#[test]
fn completion_with_no_criteria_reads_as_zero() {
    let fx = fixture();
    let empty = QualificationTree {
        sub_title: "Award Shell".to_string(),
        sub_number: "AWD-000".to_string(),
        units: None,
        document_titles: None,
    };
    let qual = fx
        .reconciler
        .create(&empty, &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");

    let summary = fx
        .submissions
        .completion_percentage(learner.id, qual)
        .expect("summary");
    assert_eq!(summary.complete, 0.0);
    assert_eq!(summary.incomplete, 100.0);
}

#[test]
fn attachment_deletion_is_owner_scoped() {
    let fx = fixture();
    let qual = fx
        .reconciler
        .create(&sample_tree(), &fx.admin)
        .expect("create qualification");
    let learner = fx
        .store
        .seed_actor(Role::Learner, "learner@centre.test")
        .expect("seed learner");
    let other = fx
        .store
        .seed_actor(Role::Learner, "other@centre.test")
        .expect("seed other learner");
    let path = first_criterion_path(&fx.store, qual);
    let submission = fx
        .submissions
        .submit_evidence(&learner, &path, "notes", &["uploads/a.pdf".to_string()])
        .expect("submission");
    let attachment = fx
        .store
        .attachments(submission.id, Visibility::Active)
        .expect("attachments")[0]
        .id;

    match fx
        .submissions
        .delete_attachment(&other, qual, submission.id, attachment)
    {
        Err(SubmissionError::NotFound("attachment")) => {}
        other => panic!("expected not found for foreign owner, got {other:?}"),
    }

    fx.submissions
        .delete_attachment(&learner, qual, submission.id, attachment)
        .expect("owner deletes");
    assert!(fx
        .store
        .attachments(submission.id, Visibility::Active)
        .expect("attachments")
        .is_empty());
}
