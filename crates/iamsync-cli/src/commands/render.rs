use crate::cli::StateArgs;
use crate::support::{Workspace, exit_with, read_manifest_or_exit, runtime_or_exit};
use iamsync_controller::{ReconcileError, Resolver, resolve_desired};
use iamsync_kernel::{Kind, PolicyDocument};
use iamsync_remote::Desired;
use iamsync_store::ObjectStore;
use serde_json::{Value, json};

struct Rendered {
    kind: Kind,
    key: String,
    remote_name: String,
    document: PolicyDocument,
}

pub fn run(manifest: String, state: StateArgs, json_output: bool) {
    let resources = read_manifest_or_exit(&manifest);
    let workspace = Workspace::open_read_only(&state).unwrap_or_else(|e| exit_with(e));
    let runtime = runtime_or_exit();

    let rendered = runtime.block_on(async {
        // Trust-policy references resolve against the manifest first, then state.
        for resource in &resources {
            if let Err(e) = workspace.store.apply(resource.clone()).await {
                exit_with(format!("{} {}: {e}", resource.kind(), resource.key()));
            }
        }
        let resolver = Resolver::new(workspace.store.clone());
        let mut rendered = Vec::new();
        for resource in resources
            .iter()
            .filter(|r| matches!(r.kind(), Kind::Policy | Kind::Role))
        {
            let resolution = resolve_desired(&resolver, &workspace.settings.remote, resource)
                .await
                .unwrap_or_else(|e: ReconcileError| {
                    exit_with(format!("{} {}: {e}", resource.kind(), resource.key()))
                });
            let (remote_name, document) = match resolution.desired {
                Desired::Policy(policy) => (policy.name, policy.document),
                Desired::Role(role) => (role.name, role.trust_policy),
                _ => continue,
            };
            rendered.push(Rendered {
                kind: resource.kind(),
                key: resource.key().to_string(),
                remote_name,
                document,
            });
        }
        rendered
    });

    if json_output {
        let documents: Vec<Value> = rendered
            .iter()
            .map(|r| {
                json!({
                    "kind": r.kind.as_str(),
                    "key": r.key,
                    "remote_name": r.remote_name,
                    "document": r.document,
                })
            })
            .collect();
        let payload = json!({ "manifest": manifest, "documents": documents });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|e| exit_with(e))
        );
    } else {
        for r in &rendered {
            println!("# {} {} -> {}", r.kind, r.key, r.remote_name);
            println!("{}", r.document.to_json());
        }
    }
}
