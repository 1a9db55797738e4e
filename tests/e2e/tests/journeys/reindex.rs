//! Indexing journeys: hash stability, idempotence, pruning, scan history

use dmm_core::QueryRequest;
use dmm_e2e_tests::harness::{body_about, memory_file, TestWorkspace};

#[test]
fn reindex_is_idempotent() {
    let workspace = TestWorkspace::new();
    for i in 0..5 {
        workspace.write_memory_file(
            &format!("project/topic_{i}.md"),
            &memory_file(
                &format!("mem_{i}"),
                "project",
                0.5,
                &["topic", "test"],
                &format!("Topic {i}"),
                &body_about(&format!("topic number {i}"), 100),
            ),
        );
    }

    let first = workspace.dmm.reindex().unwrap();
    assert_eq!(first.reindexed, 5);

    // an unchanged tree reindexes nothing
    let second = workspace.dmm.reindex().unwrap();
    assert_eq!(second.reindexed, 0);
    assert_eq!(second.skipped_unchanged, 5);
}

#[test]
fn changed_file_reindexes_only_itself() {
    let workspace = TestWorkspace::new();
    workspace.write_memory_file(
        "project/a.md",
        &memory_file("mem_a", "project", 0.5, &["a", "test"], "Alpha", &body_about("alpha", 80)),
    );
    workspace.write_memory_file(
        "project/b.md",
        &memory_file("mem_b", "project", 0.5, &["b", "test"], "Beta", &body_about("beta", 80)),
    );
    workspace.dmm.reindex().unwrap();

    workspace.write_memory_file(
        "project/a.md",
        &memory_file("mem_a", "project", 0.9, &["a", "test"], "Alpha", &body_about("alpha updated", 90)),
    );
    let report = workspace.dmm.reindex().unwrap();
    assert_eq!(report.reindexed, 1);
    assert_eq!(report.skipped_unchanged, 1);

    let memory = workspace.dmm.storage().get_memory("mem_a").unwrap().unwrap();
    assert!((memory.priority - 0.9).abs() < f64::EPSILON);
}

#[test]
fn hash_and_token_count_are_stable() {
    let workspace = TestWorkspace::new();
    workspace.seed_memory(
        "project/stable.md",
        &memory_file(
            "mem_stable",
            "project",
            0.5,
            &["stable", "test"],
            "Stable Memory",
            &body_about("stability", 100),
        ),
    );
    let first = workspace.dmm.storage().get_memory("mem_stable").unwrap().unwrap();

    // touch the file with identical bytes; nothing about it may change
    let path = workspace.dmm.memory_root().join("project/stable.md");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes).unwrap();
    workspace.dmm.reindex().unwrap();

    let second = workspace.dmm.storage().get_memory("mem_stable").unwrap().unwrap();
    assert_eq!(first.file_hash, second.file_hash);
    assert_eq!(first.token_count, second.token_count);
    assert_eq!(first.title, second.title);
}

#[test]
fn removed_files_are_pruned_and_leave_retrieval() {
    let workspace = TestWorkspace::new();
    workspace.write_memory_file(
        "project/keep.md",
        &memory_file("mem_keep", "project", 0.5, &["keep", "test"], "Keeper", &body_about("keeping", 80)),
    );
    workspace.write_memory_file(
        "project/drop.md",
        &memory_file("mem_drop", "project", 0.5, &["drop", "test"], "Dropper", &body_about("dropping things", 80)),
    );
    workspace.dmm.reindex().unwrap();

    std::fs::remove_file(workspace.dmm.memory_root().join("project/drop.md")).unwrap();
    let report = workspace.dmm.reindex().unwrap();
    assert_eq!(report.deleted, 1);

    let pack = workspace
        .dmm
        .query(&QueryRequest::new("dropping things", 2000))
        .unwrap();
    assert!(pack.retrieved.iter().all(|e| e.memory_id != "mem_drop"));
}

#[test]
fn bad_files_reported_but_do_not_abort() {
    let workspace = TestWorkspace::new();
    workspace.write_memory_file(
        "project/good.md",
        &memory_file("mem_good", "project", 0.5, &["good", "test"], "Good", &body_about("good content", 80)),
    );
    workspace.write_memory_file("project/bad.md", "no frontmatter here at all\n");
    workspace.write_memory_file(
        "project/missing_fields.md",
        "---\nid: mem_missing\n---\n\n# Missing\n\nRequired fields absent.\n",
    );

    let report = workspace.dmm.reindex().unwrap();
    assert_eq!(report.reindexed, 1);
    assert_eq!(report.errors.len(), 2);
    for error in &report.errors {
        assert_eq!(error.kind, "parse");
        assert!(!error.message.is_empty());
    }
    assert!(workspace.dmm.storage().get_memory("mem_good").unwrap().is_some());
}

#[test]
fn scan_history_accumulates() {
    let workspace = TestWorkspace::new();
    workspace.seed_memory(
        "project/one.md",
        &memory_file("mem_one", "project", 0.5, &["one", "test"], "One", &body_about("one", 80)),
    );
    workspace.dmm.scan_conflicts().unwrap();
    workspace.dmm.scan_conflicts().unwrap();

    let history = workspace.dmm.scanner().get_scan_history(10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|record| record.scan_type == "full"));
}
