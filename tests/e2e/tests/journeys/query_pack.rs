//! Query and pack-assembly journeys
//!
//! Covers baseline reservation, relevance ranking, budget invariants, and
//! deterministic rendering.

use chrono::{TimeZone, Utc};
use dmm_core::QueryRequest;
use dmm_e2e_tests::harness::{body_about, memory_file, TestWorkspace};

/// Baseline + two project memories; the auth query must pull the auth memory
/// ahead of the migrations one
fn seed_simple_store(workspace: &TestWorkspace) {
    workspace.write_memory_file(
        "baseline/identity.md",
        &memory_file(
            "mem_base",
            "baseline",
            1.0,
            &["identity", "baseline"],
            "Agent Identity",
            &body_about("who this agent is", 180),
        ),
    );
    workspace.write_memory_file(
        "project/auth.md",
        &memory_file(
            "mem_auth",
            "project",
            0.8,
            &["auth", "jwt"],
            "Authentication Flow",
            &body_about("authentication JWT tokens and the auth flow", 400),
        ),
    );
    workspace.write_memory_file(
        "project/migrations.md",
        &memory_file(
            "mem_db",
            "project",
            0.6,
            &["database", "migrations"],
            "Database Migrations",
            &body_about("database migrations", 500),
        ),
    );
    workspace.dmm.reindex().unwrap();
}

#[test]
fn simple_query_selects_relevant_memory() {
    let workspace = TestWorkspace::new();
    seed_simple_store(&workspace);

    let mut request = QueryRequest::new("how does our auth flow work", 1000);
    request.baseline_budget = Some(400);
    let pack = workspace.dmm.query(&request).unwrap();

    assert_eq!(pack.baseline.len(), 1);
    assert_eq!(pack.baseline[0].memory_id, "mem_base");
    assert!(!pack.retrieved.is_empty());
    assert_eq!(pack.retrieved[0].memory_id, "mem_auth");
    // both project memories cannot fit: migrations lands in excluded paths
    assert!(pack
        .excluded_paths
        .contains(&"project/migrations.md".to_string()));

    let rendered = pack.render();
    assert!(rendered.contains("## Baseline (Always Included)"));
    assert!(rendered.contains("## Retrieved"));
    assert!(rendered.contains("### project/auth.md"));
}

#[test]
fn budget_truncation_records_exclusions() {
    let workspace = TestWorkspace::new();
    seed_simple_store(&workspace);
    for i in 0..10 {
        workspace.write_memory_file(
            &format!("project/extra_{i:02}.md"),
            &memory_file(
                &format!("mem_extra_{i:02}"),
                "project",
                0.5,
                &["auth", "extra"],
                &format!("Auth Extra {i}"),
                &body_about("the auth flow and its JWT tokens", 150),
            ),
        );
    }
    workspace.dmm.reindex().unwrap();

    let mut request = QueryRequest::new("auth flow JWT tokens", 600);
    request.baseline_budget = Some(200);
    let pack = workspace.dmm.query(&request).unwrap();

    // the pack never exceeds its budget
    assert!(pack.stats.baseline_tokens + pack.stats.retrieved_tokens <= 600);
    assert!(pack.stats.excluded > 0, "expected some exclusions");
    assert!(!pack.excluded_paths.is_empty());

    // retrieval never eats into the baseline reservation
    assert!(pack.stats.retrieved_tokens <= 600 - pack.stats.baseline_tokens);
}

#[test]
fn identical_queries_render_identical_bytes() {
    let workspace = TestWorkspace::new();
    seed_simple_store(&workspace);

    let mut request = QueryRequest::new("how does our auth flow work", 1000);
    request.generated_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());

    let first = workspace.dmm.query(&request).unwrap().render();
    let second = workspace.dmm.query(&request).unwrap().render();
    assert_eq!(first, second);
}

#[test]
fn read_your_writes_after_commit() {
    let workspace = TestWorkspace::new();
    seed_simple_store(&workspace);

    let content = memory_file(
        "mem_rotation",
        "project",
        0.7,
        &["auth", "keys", "rotation"],
        "Key Rotation Policy",
        &body_about("signing key rotation for the auth flow", 320),
    );
    let proposal = workspace
        .dmm
        .propose_create("project/rotation.md", &content, "capture rotation rule", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    let result = workspace.dmm.commit_proposal(&proposal.proposal_id).unwrap();
    assert!(result.success, "{:?}", result.error);

    // a query issued after the commit sees its effects
    let pack = workspace
        .dmm
        .query(&QueryRequest::new("signing key rotation policy", 4000))
        .unwrap();
    assert!(pack
        .retrieved
        .iter()
        .any(|entry| entry.memory_id == "mem_rotation"));
}

#[test]
fn deprecated_memories_never_appear_in_packs() {
    let workspace = TestWorkspace::new();
    seed_simple_store(&workspace);

    let proposal = workspace
        .dmm
        .propose_deprecate("mem_auth", "superseded by the new auth handbook", "agent")
        .unwrap();
    workspace.dmm.review_pending(10).unwrap();
    workspace.dmm.commit_proposal(&proposal.proposal_id).unwrap();

    let pack = workspace
        .dmm
        .query(&QueryRequest::new("how does our auth flow work", 2000))
        .unwrap();
    assert!(pack.retrieved.iter().all(|e| e.memory_id != "mem_auth"));
}
