use crate::cli::StateArgs;
use crate::support::{Workspace, exit_with, print_objects, runtime_or_exit};
use iamsync_controller::{ReconcilePhase, status_report};
use iamsync_kernel::Kind;
use serde_json::json;
use std::collections::BTreeSet;

pub fn run(state: StateArgs, json_output: bool) {
    let workspace = Workspace::open_read_only(&state).unwrap_or_else(|e| exit_with(e));
    let runtime = runtime_or_exit();
    let kinds: BTreeSet<Kind> = Kind::RECONCILED.into_iter().collect();
    let objects = runtime
        .block_on(status_report(workspace.store.as_ref(), &kinds))
        .unwrap_or_else(|e| exit_with(e));
    let converged = objects
        .iter()
        .filter(|object| object.phase == ReconcilePhase::Converged)
        .count();

    if json_output {
        let payload = json!({
            "state_dir": workspace.dir.display().to_string(),
            "object_count": objects.len(),
            "converged_count": converged,
            "objects": objects,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|e| exit_with(e))
        );
    } else {
        println!("iamsync status {}", workspace.dir.display());
        println!("  Converged: {converged}/{}", objects.len());
        print_objects(&objects);
    }
}
