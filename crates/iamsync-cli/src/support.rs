use crate::cli::StateArgs;
use crate::config::Settings;
use iamsync_controller::{Manager, ObjectReport, SettleReport};
use iamsync_kernel::Resource;
use iamsync_remote::{IamState, InMemoryIam};
use iamsync_store::{MemoryStore, StateLock, read_resources_from_path, write_atomically};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const OBJECTS_FILE: &str = "objects.jsonl";
pub const REMOTE_FILE: &str = "remote.json";

/// Declared objects and simulated remote state of one state directory.
pub struct Workspace {
    pub dir: PathBuf,
    pub settings: Settings,
    pub store: Arc<MemoryStore>,
    pub iam: Arc<InMemoryIam>,
    _lock: Option<StateLock>,
}

impl Workspace {
    /// Open for writing: holds the state lock until dropped.
    pub fn open(args: &StateArgs) -> Result<Self, String> {
        let lock = StateLock::acquire(Path::new(&args.state_dir)).map_err(|e| e.to_string())?;
        Self::load(args, Some(lock))
    }

    pub fn open_read_only(args: &StateArgs) -> Result<Self, String> {
        Self::load(args, None)
    }

    fn load(args: &StateArgs, lock: Option<StateLock>) -> Result<Self, String> {
        let settings = Settings::load(args)?;
        let dir = PathBuf::from(&args.state_dir);

        let objects_path = dir.join(OBJECTS_FILE);
        let store = if objects_path.exists() {
            MemoryStore::load_jsonl(&objects_path)
                .map_err(|e| format!("failed to load {}: {e}", objects_path.display()))?
        } else {
            MemoryStore::new()
        };

        let remote_path = dir.join(REMOTE_FILE);
        let remote_state = if remote_path.exists() {
            let raw = std::fs::read(&remote_path)
                .map_err(|e| format!("failed to read {}: {e}", remote_path.display()))?;
            serde_json::from_slice::<IamState>(&raw)
                .map_err(|e| format!("failed to parse {}: {e}", remote_path.display()))?
        } else {
            IamState::default()
        };
        let iam = InMemoryIam::from_state(settings.remote.clone(), remote_state);

        Ok(Self {
            dir,
            settings,
            store: Arc::new(store),
            iam: Arc::new(iam),
            _lock: lock,
        })
    }

    pub fn manager(&self) -> Manager<MemoryStore> {
        Manager::for_service(
            Arc::clone(&self.store),
            self.iam.clone(),
            self.settings.remote.clone(),
            self.settings.controller.clone(),
        )
    }

    pub async fn persist(&self) -> Result<(), String> {
        let objects_path = self.dir.join(OBJECTS_FILE);
        self.store
            .save_jsonl(&objects_path)
            .await
            .map_err(|e| format!("failed to write {}: {e}", objects_path.display()))?;

        let remote_path = self.dir.join(REMOTE_FILE);
        let raw = serde_json::to_vec_pretty(&self.iam.snapshot())
            .map_err(|e| format!("failed to encode remote state: {e}"))?;
        write_atomically(&remote_path, &raw)
            .map_err(|e| format!("failed to write {}: {e}", remote_path.display()))
    }
}

pub fn exit_with(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

pub fn open_workspace_or_exit(args: &StateArgs) -> Workspace {
    Workspace::open(args).unwrap_or_else(|e| exit_with(e))
}

pub fn runtime_or_exit() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| exit_with(format!("failed to create tokio runtime: {e}")))
}

/// Parse a manifest and reject objects whose spec cannot be valid.
pub fn read_manifest_or_exit(path: &str) -> Vec<Resource> {
    let resources = read_resources_from_path(path)
        .unwrap_or_else(|e| exit_with(format!("failed to read manifest {path}: {e}")));
    let mut invalid = Vec::new();
    for resource in &resources {
        if let Err(e) = resource.spec.validate() {
            invalid.push(format!("{} {}: {e}", resource.kind(), resource.key()));
        }
    }
    if !invalid.is_empty() {
        exit_with(format!("invalid manifest {path}:\n  {}", invalid.join("\n  ")));
    }
    resources
}

pub fn yes_no(ok: bool) -> &'static str {
    if ok { "yes" } else { "no" }
}

pub fn print_objects(objects: &[ObjectReport]) {
    if objects.is_empty() {
        println!("  (no declared objects)");
        return;
    }
    for object in objects {
        let detail = if object.message.is_empty() || object.message == "reconciled" {
            object.arn.clone()
        } else if object.arn.is_empty() {
            object.message.clone()
        } else {
            format!("{} ({})", object.arn, object.message)
        };
        println!(
            "  {} {}/{}  {}  {}",
            object.kind, object.namespace, object.name, object.phase, detail
        );
    }
}

/// Print a convergence outcome and exit non-zero when it did not settle.
pub fn finish_convergence(command: &str, manifest: &str, report: &SettleReport, json_output: bool) {
    if json_output {
        let payload = json!({
            "command": command,
            "manifest": manifest,
            "settled": report.settled,
            "elapsed_ms": duration_ms(report.elapsed),
            "objects": report.objects,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|e| exit_with(e))
        );
    } else {
        println!("iamsync {command} {manifest}");
        println!(
            "  Settled: {} ({} ms)",
            yes_no(report.settled),
            duration_ms(report.elapsed)
        );
        print_objects(&report.objects);
    }
    if !report.settled {
        std::process::exit(1);
    }
}

fn duration_ms(duration: Duration) -> u128 {
    duration.as_millis()
}
