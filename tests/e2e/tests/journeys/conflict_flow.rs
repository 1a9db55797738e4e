//! Conflict engine journeys: scan, dedup, resolve
//!
//! Covers orphaned-supersession detection, pair-key dedup across scans, and
//! the observable effects of a deprecate resolution.

use dmm_core::{
    ConflictStatus, ConflictType, DetectionMethod, ResolutionAction, ResolutionRequest,
};
use dmm_e2e_tests::harness::{body_about, memory_file, memory_file_superseding, TestWorkspace};

fn seed_supersession_pair(workspace: &TestWorkspace) {
    workspace.write_memory_file(
        "project/policy_v1.md",
        &memory_file(
            "mem_policy_v1",
            "project",
            0.5,
            &["retry", "policy"],
            "Retry Policy v1",
            &body_about("the old retry policy", 120),
        ),
    );
    workspace.write_memory_file(
        "project/policy_v2.md",
        &memory_file_superseding(
            "mem_policy_v2",
            "project",
            0.8,
            &["retry", "policy"],
            "Retry Policy v2",
            &body_about("the new retry policy", 120),
            &["mem_policy_v1"],
        ),
    );
    workspace.dmm.reindex().unwrap();
}

#[test]
fn orphaned_supersession_detected_once() {
    let workspace = TestWorkspace::new();
    seed_supersession_pair(&workspace);

    let record = workspace.dmm.scan_conflicts().unwrap();
    assert_eq!(record.conflicts_new, 1, "errors: {:?}", record.errors);

    let conflicts = workspace
        .dmm
        .scanner()
        .detector()
        .conflict_store()
        .list(None, 10)
        .unwrap();
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::Supersession);
    assert_eq!(conflict.detection_method, DetectionMethod::SupersessionChain);
    assert_eq!(
        conflict.evidence["details"]["supersession_chain"]["issue_type"],
        "orphaned"
    );
    assert!((conflict.confidence - 0.9).abs() < 0.05);

    let ids: Vec<&str> = conflict
        .memories
        .iter()
        .map(|m| m.memory_id.as_str())
        .collect();
    assert!(ids.contains(&"mem_policy_v1"));
    assert!(ids.contains(&"mem_policy_v2"));
}

#[test]
fn repeated_scans_never_duplicate_conflicts() {
    let workspace = TestWorkspace::new();
    seed_supersession_pair(&workspace);

    workspace.dmm.scan_conflicts().unwrap();
    let second = workspace.dmm.scan_conflicts().unwrap();
    let third = workspace.dmm.scan_conflicts().unwrap();
    assert_eq!(second.conflicts_new, 0);
    assert_eq!(third.conflicts_new, 0);
    assert!(third.conflicts_existing >= 1);

    // one live conflict per pair key
    let conflicts = workspace
        .dmm
        .scanner()
        .detector()
        .conflict_store()
        .list(None, 50)
        .unwrap();
    assert_eq!(conflicts.len(), 1);
}

#[test]
fn deprecate_resolution_end_to_end() {
    let workspace = TestWorkspace::new();
    seed_supersession_pair(&workspace);
    workspace.dmm.scan_conflicts().unwrap();

    let conflict = workspace
        .dmm
        .scanner()
        .detector()
        .conflict_store()
        .list(Some(ConflictStatus::Unresolved), 10)
        .unwrap()
        .remove(0);

    let mut request =
        ResolutionRequest::new(&conflict.conflict_id, ResolutionAction::Deprecate, "operator");
    request.target_memory_id = Some("mem_policy_v1".to_string());
    request.reason = Some("v2 replaces it".to_string());
    let result = workspace.dmm.resolve_conflict(&request).unwrap();
    assert!(result.success, "{:?}", result.error);

    // the losing memory is deprecated on disk and out of the index
    assert!(!workspace
        .dmm
        .memory_root()
        .join("project/policy_v1.md")
        .exists());
    assert!(workspace
        .dmm
        .memory_root()
        .join("deprecated/policy_v1.md")
        .exists());
    assert!(workspace
        .dmm
        .storage()
        .get_memory("mem_policy_v1")
        .unwrap()
        .is_none());

    let resolved = workspace
        .dmm
        .scanner()
        .detector()
        .conflict_store()
        .get(&conflict.conflict_id)
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);

    // a new scan does not re-emit the pair: the loser is gone from the index
    let rescan = workspace.dmm.scan_conflicts().unwrap();
    assert_eq!(rescan.conflicts_new, 0);
}

#[test]
fn commit_triggers_incremental_scan() {
    let workspace = TestWorkspace::new();
    workspace.seed_memory(
        "project/policy_v1.md",
        &memory_file(
            "mem_policy_v1",
            "project",
            0.5,
            &["retry", "policy"],
            "Retry Policy v1",
            &body_about("the old retry policy", 120),
        ),
    );

    // committing a superseding memory should immediately surface the
    // orphaned-supersession conflict
    let content = memory_file_superseding(
        "mem_policy_v2",
        "project",
        0.8,
        &["retry", "policy"],
        "Retry Policy v2",
        &format!(
            "{}\n\n## Rationale\n\nThe old policy retried unbounded.",
            body_about("the new retry policy with capped attempts", 420)
        ),
        &["mem_policy_v1"],
    );
    let proposal = workspace
        .dmm
        .propose_create("project/policy_v2.md", &content, "v2 of the policy", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    let result = workspace.dmm.commit_proposal(&proposal.proposal_id).unwrap();
    assert!(result.success, "{:?}", result.error);

    let conflicts = workspace
        .dmm
        .scanner()
        .detector()
        .conflict_store()
        .list(Some(ConflictStatus::Unresolved), 10)
        .unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::Supersession);
}

#[test]
fn dismissed_conflicts_stay_dismissed() {
    let workspace = TestWorkspace::new();
    seed_supersession_pair(&workspace);
    workspace.dmm.scan_conflicts().unwrap();

    let conflict = workspace
        .dmm
        .scanner()
        .detector()
        .conflict_store()
        .list(None, 10)
        .unwrap()
        .remove(0);

    let mut request =
        ResolutionRequest::new(&conflict.conflict_id, ResolutionAction::Dismiss, "operator");
    request.dismiss_reason = Some("intentional transition period".to_string());
    workspace.dmm.resolve_conflict(&request).unwrap();

    // the pair is free again: the next scan re-detects it as a NEW conflict
    // while the dismissed record stays dismissed
    let rescan = workspace.dmm.scan_conflicts().unwrap();
    assert_eq!(rescan.conflicts_new, 1);
    let dismissed = workspace
        .dmm
        .scanner()
        .detector()
        .conflict_store()
        .get(&conflict.conflict_id)
        .unwrap()
        .unwrap();
    assert_eq!(dismissed.status, ConflictStatus::Dismissed);
}
