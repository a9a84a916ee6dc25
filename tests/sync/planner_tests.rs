// Tests for SyncPlanner scheduling and normalization

use std::sync::Arc;

use depot_sync::depot::{Action, BackendEvent, PlanReport};
use depot_sync::sync::{Rota, SyncPlanner};

use crate::common::{file, report, ScriptedDepot};

fn planner_with(depot: &Arc<ScriptedDepot>, excludes: &[&str]) -> SyncPlanner {
    let mut planner = SyncPlanner::new(depot.clone());
    planner.add_sync_root("//Proj/Main");
    for pattern in excludes {
        planner.add_exclude(pattern);
    }
    planner
}

fn paths_of(rota: &Rota, worker: usize) -> Vec<&str> {
    rota.workers[worker].items.iter().map(|item| item.path.as_str()).collect()
}

#[test]
fn test_three_file_scenario() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(
        vec![
            file("//Proj/Main/A", 5, 100, Action::Edit),
            file("//Proj/Main/B", 3, 50, Action::Edit),
            file("//Proj/Main/C", 2, 0, Action::Delete),
        ],
        &[],
    ));

    let rota = planner_with(&depot, &[]).schedule("#head", 2).unwrap();

    assert_eq!(rota.workers.len(), 3);
    assert_eq!(paths_of(&rota, 0), vec!["//Proj/Main/C"]);
    assert_eq!(rota.workers[0].items[0].revision, 0);
    assert_eq!(paths_of(&rota, 1), vec!["//Proj/Main/A"]);
    assert_eq!(rota.workers[1].burden, 100);
    assert_eq!(paths_of(&rota, 2), vec!["//Proj/Main/B"]);
    assert_eq!(rota.workers[2].burden, 50);
}

#[test]
fn test_excluded_edit_is_dropped() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(vec![file("//Proj/Main/Temp/x", 4, 10, Action::Edit)], &[]));

    let rota = planner_with(&depot, &["//Proj/Main/Temp/..."]).schedule("#head", 2).unwrap();

    assert!(rota.is_empty());
    assert_eq!(rota.totals().items, 0);
}

#[test]
fn test_excluded_delete_is_kept_at_revision_zero() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(vec![file("//Proj/Main/Temp/x", 7, 0, Action::Delete)], &[]));

    let rota = planner_with(&depot, &["//Proj/Main/Temp/..."]).schedule("#head", 2).unwrap();

    assert_eq!(paths_of(&rota, 0), vec!["//Proj/Main/Temp/x"]);
    assert_eq!(rota.workers[0].items[0].revision, 0);
    assert_eq!(rota.workers[0].items[0].target().to_string(), "//Proj/Main/Temp/x#0");
}

#[test]
fn test_move_delete_goes_to_removal_worker() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(
        vec![
            file("//Proj/Main/old.cpp", 3, 0, Action::MoveDelete),
            file("//Proj/Main/new.cpp", 1, 40, Action::MoveAdd),
        ],
        &[],
    ));

    let rota = planner_with(&depot, &[]).schedule("#head", 2).unwrap();

    assert_eq!(paths_of(&rota, 0), vec!["//Proj/Main/old.cpp"]);
    assert_eq!(rota.workers[0].items[0].revision, 0);
    assert_eq!(paths_of(&rota, 1), vec!["//Proj/Main/new.cpp"]);
}

#[test]
fn test_replace_costs_nothing() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(
        vec![
            file("//Proj/Main/script.sh", 2, 4096, Action::Replace),
            file("//Proj/Main/data.bin", 6, 10, Action::Edit),
        ],
        &[],
    ));

    let rota = planner_with(&depot, &[]).schedule("#head", 1).unwrap();

    assert_eq!(rota.workers[1].burden, 10);
    assert_eq!(rota.totals().items, 2);
    assert_eq!(rota.totals().bytes, 10);
}

#[test]
fn test_burden_matches_item_costs() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(
        vec![
            file("//Proj/Main/a", 1, 300, Action::Add),
            file("//Proj/Main/b", 2, 20, Action::Edit),
            file("//Proj/Main/Art/c.psd", 1, 9000, Action::Add),
            file("//Proj/Main/d", 4, 0, Action::Delete),
            file("//Proj/Main/e", 2, 77, Action::Replace),
            file("//Proj/Main/f", 1, 51, Action::Integrate),
        ],
        &[],
    ));

    let rota = planner_with(&depot, &["//Proj/Main/Art/..."]).schedule("#head", 3).unwrap();

    for worker in &rota.workers {
        let sum: u64 = worker.items.iter().map(|item| item.cost).sum();
        assert_eq!(worker.burden, sum, "worker {}", worker.id);
    }
    assert_eq!(rota.totals().bytes, 300 + 20 + 51);
    assert!(rota.items().all(|item| item.path != "//Proj/Main/Art/c.psd"));
}

#[test]
fn test_worker_zero_only_holds_removals() {
    let depot = Arc::new(ScriptedDepot::new());
    let items = (0..40)
        .map(|i| {
            let action = if i % 3 == 0 { Action::Delete } else { Action::Edit };
            file(&format!("//Proj/Main/f{:02}", i), i + 1, u64::from(i) * 10, action)
        })
        .collect();
    depot.push_plan(report(items, &[]));

    let rota = planner_with(&depot, &[]).schedule("#head", 4).unwrap();

    assert!(rota.workers[0].items.iter().all(|item| item.revision == 0));
    assert_eq!(rota.workers[0].items.len(), 14);
    for worker in &rota.workers[1..] {
        assert!(worker.items.iter().all(|item| item.revision > 0));
    }
}

#[test]
fn test_greedy_spread_is_bounded_by_largest_item() {
    // Small linear congruential generator for repeatable costs
    let mut seed: u64 = 0x2545_f491;
    let mut next = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) % 5000 + 1
    };

    let depot = Arc::new(ScriptedDepot::new());
    let items: Vec<_> = (0..250)
        .map(|i| file(&format!("//Proj/Main/asset{:03}", i), 1, next(), Action::Add))
        .collect();
    let largest = items.iter().map(|item| item.size).max().unwrap();
    depot.push_plan(report(items, &[]));

    let rota = planner_with(&depot, &[]).schedule("#head", 6).unwrap();

    let burdens: Vec<u64> = rota.workers[1..].iter().map(|worker| worker.burden).collect();
    let max = *burdens.iter().max().unwrap();
    let min = *burdens.iter().min().unwrap();
    assert!(max - min <= largest, "spread {} exceeds {}", max - min, largest);
}

#[test]
fn test_workers_sorted_in_alternating_directions() {
    let depot = Arc::new(ScriptedDepot::new());
    let items = [5u64, 80, 20, 60, 40, 10]
        .iter()
        .enumerate()
        .map(|(i, size)| file(&format!("//Proj/Main/f{}", i), 1, *size, Action::Add))
        .collect();
    depot.push_plan(report(items, &[]));

    let rota = planner_with(&depot, &[]).schedule("#head", 2).unwrap();

    let costs = |worker: usize| -> Vec<u64> { rota.workers[worker].items.iter().map(|item| item.cost).collect() };
    let odd = costs(1);
    let even = costs(2);
    assert!(odd.windows(2).all(|pair| pair[0] >= pair[1]), "{:?}", odd);
    assert!(even.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", even);
}

#[test]
fn test_items_synthesized_from_info_lines() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(
        vec![file("//Proj/Main/a", 2, 100, Action::Edit)],
        &[
            "//Proj/Main/opened.cpp#3 - is opened and not being changed",
            "//Proj/Main/conflict.h - must resolve #5 before submitting",
            "//Proj/Main/a#2 - is opened and not being changed",
            "//Proj/Main/norev.cpp - is opened and not being changed",
            "//Proj/Main/... - file(s) up-to-date.",
        ],
    ));

    let rota = planner_with(&depot, &[]).schedule("#head", 1).unwrap();

    let mut synthesized: Vec<(String, u32, u64, Action)> = rota
        .items()
        .filter(|item| item.path != "//Proj/Main/a")
        .map(|item| (item.path.clone(), item.revision, item.cost, item.action))
        .collect();
    synthesized.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(
        synthesized,
        vec![
            ("//Proj/Main/conflict.h".to_string(), 5, 1, Action::Edit),
            ("//Proj/Main/opened.cpp".to_string(), 3, 1, Action::Edit),
        ]
    );
    assert_eq!(rota.totals().items, 3);
}

#[test]
fn test_plan_specs_sent_to_backend() {
    let depot = Arc::new(ScriptedDepot::new());
    let planner = planner_with(&depot, &["//Proj/Main/Art/...", "*.tmp"]);

    planner.schedule("@1200", 2).unwrap();

    assert_eq!(
        depot.plan_calls(),
        vec![vec![
            "//Proj/Main/...@1200".to_string(),
            "//Proj/Main/.../*.tmp#0".to_string(),
            "//Proj/Main/Art/...#0".to_string(),
        ]]
    );
}

#[test]
fn test_backend_errors_do_not_abort_planning() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(PlanReport {
        items: vec![file("//Proj/Main/a", 1, 5, Action::Add)],
        events: vec![BackendEvent::Error("//Proj/Main/...@nope - label does not exist.".into())],
    });

    let rota = planner_with(&depot, &[]).schedule("#head", 2).unwrap();
    assert_eq!(rota.totals().items, 1);
}

#[test]
fn test_invalid_target_is_rejected() {
    let depot = Arc::new(ScriptedDepot::new());
    let planner = planner_with(&depot, &[]);

    assert!(planner.schedule("#notanumber", 2).is_err());
    assert!(depot.plan_calls().is_empty());
}

#[test]
fn test_zero_workers_still_schedules() {
    let depot = Arc::new(ScriptedDepot::new());
    depot.push_plan(report(vec![file("//Proj/Main/a", 1, 5, Action::Add)], &[]));

    let rota = planner_with(&depot, &[]).schedule("#head", 0).unwrap();

    assert_eq!(rota.workers.len(), 2);
    assert_eq!(paths_of(&rota, 1), vec!["//Proj/Main/a"]);
}

#[test]
fn test_changelist_zero_is_a_removal() {
    let depot = Arc::new(ScriptedDepot::new());
    let planner = planner_with(&depot, &["//Proj/Main/Art/..."]);

    let rota = planner.schedule("@00", 2).unwrap();

    assert!(rota.target.is_removal());
    assert_eq!(depot.plan_calls(), vec![vec!["//Proj/Main/...#0".to_string()]]);
}
