// Tests for the finalization pass

use std::sync::Arc;

use depot_sync::depot::{Action, BackendEvent, PlanReport};
use depot_sync::sync::{Finalizer, ParallelExecutor, Rota, SessionState, SyncPlanner};

use crate::common::{file, report, ScriptedDepot};

/// Schedule an empty rota so the next queued report is the finalize plan.
fn empty_rota(depot: &Arc<ScriptedDepot>, excludes: &[&str]) -> Rota {
    depot.push_plan(PlanReport::default());
    let mut planner = SyncPlanner::new(depot.clone());
    planner.add_sync_root("//Proj/Main");
    for pattern in excludes {
        planner.add_exclude(pattern);
    }
    planner.schedule("#head", 2).unwrap()
}

#[test]
fn test_benign_lines_succeed_without_fetching() {
    let depot = Arc::new(ScriptedDepot::new());
    let rota = empty_rota(&depot, &[]);
    depot.push_plan(report(
        vec![],
        &[
            "//Proj/Main/...#head - file(s) up-to-date.",
            "//Other/... - file(s) not in client view.",
            "//Proj/Main/Secret/... - protected namespace - access denied.",
        ],
    ));

    let outcome = Finalizer::new(depot.as_ref(), 64).run(&rota);

    assert!(outcome.succeeded());
    assert!(outcome.secondary.is_empty());
    assert!(depot.fetch_calls().is_empty());
    assert_eq!(depot.plan_calls()[1], vec!["//Proj/Main/...#head".to_string()]);
}

#[test]
fn test_unknown_lines_are_errors() {
    let depot = Arc::new(ScriptedDepot::new());
    let rota = empty_rota(&depot, &[]);
    depot.push_plan(PlanReport {
        items: vec![],
        events: vec![
            BackendEvent::Info("//Proj/Main/x.bin - Librarian checkout failed".into()),
            BackendEvent::Error("//Proj/Main/y.bin - file(s) up-to-date.".into()),
            BackendEvent::Error("Connection reset by peer".into()),
        ],
    });

    let outcome = Finalizer::new(depot.as_ref(), 64).run(&rota);

    assert!(!outcome.succeeded());
    assert_eq!(
        outcome.errors,
        vec![
            "//Proj/Main/x.bin - Librarian checkout failed".to_string(),
            "Connection reset by peer".to_string(),
        ]
    );
}

#[test]
fn test_must_resolve_is_collected_not_fetched() {
    let depot = Arc::new(ScriptedDepot::new());
    let rota = empty_rota(&depot, &[]);
    depot.push_plan(report(vec![], &["//Proj/Main/merge.cpp - must resolve #3 before submitting"]));

    let outcome = Finalizer::new(depot.as_ref(), 64).run(&rota);

    assert!(outcome.succeeded());
    assert_eq!(outcome.must_resolve.len(), 1);
    assert!(depot.fetch_calls().is_empty());
}

#[test]
fn test_opened_files_become_secondary_targets() {
    let depot = Arc::new(ScriptedDepot::new());
    let rota = empty_rota(&depot, &[]);
    depot.push_plan(report(
        vec![],
        &[
            "//Proj/Main/config.ini#4 - is opened and not being changed",
            "//Proj/Main/notes.txt - is opened and not being changed",
        ],
    ));

    let outcome = Finalizer::new(depot.as_ref(), 64).run(&rota);

    assert!(outcome.succeeded());
    let secondary: Vec<String> = outcome.secondary.iter().map(ToString::to_string).collect();
    assert_eq!(
        secondary,
        vec!["//Proj/Main/config.ini#4".to_string(), "//Proj/Main/notes.txt#head".to_string()]
    );
    assert_eq!(outcome.fetched, 2);

    let calls = depot.fetch_calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].0);
}

#[test]
fn test_structured_items_respect_exclusions() {
    let depot = Arc::new(ScriptedDepot::new());
    let rota = empty_rota(&depot, &["//Proj/Main/Art/..."]);
    depot.push_plan(report(
        vec![
            file("//Proj/Main/Art/hero.psd", 2, 9000, Action::Add),
            file("//Proj/Main/late.cpp", 6, 30, Action::Edit),
            file("//Proj/Main/removed.cpp", 3, 0, Action::Delete),
        ],
        &[],
    ));

    let outcome = Finalizer::new(depot.as_ref(), 64).run(&rota);

    assert!(outcome.succeeded());
    assert_eq!(outcome.fetched, 2);
    assert_eq!(
        depot.fetch_calls()[0].1,
        vec!["//Proj/Main/late.cpp#6".to_string(), "//Proj/Main/removed.cpp#0".to_string()]
    );
}

#[test]
fn test_fetch_errors_are_only_logged() {
    let depot = Arc::new(ScriptedDepot::new());
    let rota = empty_rota(&depot, &[]);
    depot.push_plan(report(vec![file("//Proj/Main/locked.bin", 2, 10, Action::Edit)], &[]));
    depot.fatal_on("//Proj/Main/locked.bin");

    let outcome = Finalizer::new(depot.as_ref(), 64).run(&rota);

    assert!(outcome.succeeded());
    assert_eq!(outcome.fetch_errors, 1);
    assert_eq!(outcome.fetched, 0);
}

#[test]
fn test_finalize_errors_fail_the_session() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(vec![file("//Proj/Main/a.cpp", 1, 10, Action::Add)], &[]));
    depot.push_plan(report(vec![], &["//Proj/Main/b.cpp - tampered with before resolve"]));

    let mut planner = SyncPlanner::new(depot.clone());
    planner.add_sync_root("//Proj/Main");
    let mut rota = planner.schedule("#head", 2).unwrap();

    let report = ParallelExecutor::new(depot.clone())
        .with_progress(false)
        .execute(&mut rota, false, false);

    assert_eq!(report.state, SessionState::Failed);
    assert!(report.failures.is_empty());
    assert_eq!(report.done_items, 1);
    assert_eq!(report.finalize.unwrap().errors.len(), 1);
}
