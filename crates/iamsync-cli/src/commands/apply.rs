use crate::cli::StateArgs;
use crate::support::{
    Workspace, exit_with, finish_convergence, open_workspace_or_exit, read_manifest_or_exit,
    runtime_or_exit,
};
use iamsync_controller::SettleReport;
use iamsync_kernel::Resource;
use iamsync_store::{ObjectStore, StoreError};
use std::time::Duration;
use tracing::{info, warn};

pub fn run(manifest: String, state: StateArgs, timeout_secs: u64, json_output: bool) {
    let resources = read_manifest_or_exit(&manifest);
    let workspace = open_workspace_or_exit(&state);
    let runtime = runtime_or_exit();

    let result = runtime.block_on(apply(&workspace, resources, timeout_secs));
    // Release the state lock before any exit path.
    drop(workspace);
    let report = result.unwrap_or_else(|e| exit_with(e));
    finish_convergence("apply", &manifest, &report, json_output);
}

async fn apply(
    workspace: &Workspace,
    resources: Vec<Resource>,
    timeout_secs: u64,
) -> Result<SettleReport, String> {
    for resource in resources {
        let (kind, key) = (resource.kind(), resource.key());
        match workspace.store.apply(resource).await {
            Ok(stored) => info!(%kind, %key, generation = stored.metadata.generation, "declared"),
            Err(StoreError::Terminating { .. }) => {
                warn!(%kind, %key, "object is being deleted; declaration skipped")
            }
            Err(e) => return Err(format!("failed to declare {kind} {key}: {e}")),
        }
    }
    let report = workspace
        .manager()
        .run_until_settled(Duration::from_secs(timeout_secs))
        .await
        .map_err(|e| e.to_string())?;
    workspace.persist().await?;
    Ok(report)
}
