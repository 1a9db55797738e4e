//! Write pipeline journeys: propose -> review -> commit
//!
//! Covers the CREATE full flow, duplicate rejection, deprecation file moves,
//! status-history consistency, and commit atomicity.

use dmm_core::{ProposalStatus, ReviewDecision};
use dmm_e2e_tests::harness::{body_about, memory_file, TestWorkspace};

fn rotation_content() -> String {
    memory_file(
        "mem_rotation",
        "project",
        0.7,
        &["auth", "keys", "rotation"],
        "Key Rotation Policy",
        &format!(
            "{}\n\n## Rationale\n\nStale signing keys widen the blast radius of a leak.",
            body_about("weekly signing key rotation", 450)
        ),
    )
}

#[test]
fn create_full_flow_commits() {
    let workspace = TestWorkspace::new();

    let proposal = workspace
        .dmm
        .propose_create("project/rotation.md", &rotation_content(), "capture rotation", "agent")
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);

    let reviews = workspace.dmm.review_pending(10).unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].decision, ReviewDecision::Approve, "{}", reviews[0].notes);
    assert!(reviews[0].confidence >= 0.95);

    let result = workspace.dmm.commit_proposal(&proposal.proposal_id).unwrap();
    assert!(result.success, "{:?}", result.error);

    // file on disk, memory indexed, proposal terminal
    assert!(workspace.dmm.memory_root().join("project/rotation.md").exists());
    let memory = workspace
        .dmm
        .storage()
        .get_memory("mem_rotation")
        .unwrap()
        .expect("memory should be indexed");
    assert_eq!(memory.path, "project/rotation.md");

    let stored = workspace.dmm.queue().get(&proposal.proposal_id).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Committed);
}

#[test]
fn duplicate_create_is_rejected() {
    let workspace = TestWorkspace::new();

    // commit the original first
    let original = workspace
        .dmm
        .propose_create("project/rotation.md", &rotation_content(), "capture", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    workspace.dmm.commit_proposal(&original.proposal_id).unwrap();

    // same body at a different path and id
    let copy = rotation_content().replace("mem_rotation", "mem_rotation_copy");
    let duplicate = workspace
        .dmm
        .propose_create("project/rotation_copy.md", &copy, "capture again", "agent")
        .unwrap();
    let reviews = workspace.dmm.review_pending(10).unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].decision, ReviewDecision::Reject);
    assert!(reviews[0]
        .duplicates
        .iter()
        .any(|d| d.memory_id == "mem_rotation"));

    // nothing was written
    assert!(!workspace
        .dmm
        .memory_root()
        .join("project/rotation_copy.md")
        .exists());
    let stored = workspace.dmm.queue().get(&duplicate.proposal_id).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Rejected);
}

#[test]
fn deprecation_moves_file_out_of_retrieval() {
    let workspace = TestWorkspace::new();
    let original = workspace
        .dmm
        .propose_create("project/rotation.md", &rotation_content(), "capture", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    workspace.dmm.commit_proposal(&original.proposal_id).unwrap();

    let deprecate = workspace
        .dmm
        .propose_deprecate("mem_rotation", "superseded by internal policy document", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    let result = workspace.dmm.commit_proposal(&deprecate.proposal_id).unwrap();
    assert!(result.success, "{:?}", result.error);

    assert!(!workspace.dmm.memory_root().join("project/rotation.md").exists());
    assert!(workspace
        .dmm
        .memory_root()
        .join("deprecated/rotation.md")
        .exists());
    assert!(workspace.dmm.storage().get_memory("mem_rotation").unwrap().is_none());

    let stored = workspace.dmm.queue().get(&deprecate.proposal_id).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Committed);
}

#[test]
fn status_history_follows_transition_graph() {
    let workspace = TestWorkspace::new();
    let proposal = workspace
        .dmm
        .propose_create("project/rotation.md", &rotation_content(), "capture", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    workspace.dmm.commit_proposal(&proposal.proposal_id).unwrap();

    // the append-order history is consistent with the transition graph
    let history = workspace.dmm.queue().get_history(&proposal.proposal_id).unwrap();
    assert!(history.len() >= 4); // enqueue, in_review, approved, committed
    assert_eq!(history[0].action, "enqueue");
    for pair in history.windows(2) {
        assert_eq!(
            pair[1].from_status,
            Some(pair[0].to_status),
            "history gap between {:?} and {:?}",
            pair[0],
            pair[1]
        );
        assert!(
            dmm_core::allowed_transition(pair[1].from_status.unwrap(), pair[1].to_status)
                || pair[1].from_status == Some(pair[1].to_status),
            "illegal transition recorded: {:?} -> {:?}",
            pair[1].from_status,
            pair[1].to_status
        );
    }
}

#[test]
fn failed_commit_rolls_back_and_allows_retry() {
    let workspace = TestWorkspace::new();
    // Bypass the reviewer to force a commit of schema-invalid content: the
    // file write succeeds but the post-commit reindex fails
    let proposal = workspace
        .dmm
        .propose_create(
            "project/broken.md",
            "---\nid: mem_broken\ntags: [a, b]\n---\n\n# Broken\n\nNo required fields.\n",
            "force a rollback",
            "agent",
        )
        .unwrap();
    workspace
        .dmm
        .queue()
        .update_status(&proposal.proposal_id, ProposalStatus::InReview, None)
        .unwrap();
    workspace
        .dmm
        .queue()
        .update_status(&proposal.proposal_id, ProposalStatus::Approved, None)
        .unwrap();

    let result = workspace.dmm.commit_proposal(&proposal.proposal_id).unwrap();
    assert!(!result.success);
    assert!(result.rollback_performed);
    assert!(result.rollback_success);

    // no file, no index entry, proposal PENDING with the
    // commit error recorded
    assert!(!workspace.dmm.memory_root().join("project/broken.md").exists());
    assert!(workspace
        .dmm
        .storage()
        .get_memory_by_path("project/broken.md")
        .unwrap()
        .is_none());
    let stored = workspace.dmm.queue().get(&proposal.proposal_id).unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Pending);
    assert!(stored.commit_error.is_some());
}

#[test]
fn promote_moves_scope_folder() {
    let workspace = TestWorkspace::new();
    let original = workspace
        .dmm
        .propose_create("project/rotation.md", &rotation_content(), "capture", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    workspace.dmm.commit_proposal(&original.proposal_id).unwrap();

    let promote = workspace
        .dmm
        .propose_promote("mem_rotation", dmm_core::Scope::Global, "applies everywhere", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    let result = workspace.dmm.commit_proposal(&promote.proposal_id).unwrap();
    assert!(result.success, "{:?}", result.error);

    let memory = workspace.dmm.storage().get_memory("mem_rotation").unwrap().unwrap();
    assert_eq!(memory.path, "global/rotation.md");
    assert_eq!(memory.scope, dmm_core::Scope::Global);
    let on_disk = std::fs::read_to_string(
        workspace.dmm.memory_root().join("global/rotation.md"),
    )
    .unwrap();
    assert!(on_disk.contains("promoted_from: project"));
}
