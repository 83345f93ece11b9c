use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn new(prefix: &str) -> Self {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "iamsync-cli-{prefix}-{}-{unique}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("temp dir should be created");
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn run_iamsync<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = env!("CARGO_BIN_EXE_iamsync");
    Command::new(bin)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("iamsync command should execute")
}

fn assert_success(output: &Output) {
    if !output.status.success() {
        panic!(
            "command failed with status {:?}\nstdout:\n{}\nstderr:\n{}",
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn assert_failure(output: &Output) {
    if output.status.success() {
        panic!(
            "command unexpectedly succeeded\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn parse_json_stdout(output: &Output) -> Value {
    serde_json::from_slice::<Value>(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "expected valid JSON stdout, got error: {e}\nstdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

const POLICY: &str = r#"{"metadata":{"name":"reader","namespace":"default"},"spec":{"kind":"Policy","statement":[{"effect":"Allow","actions":["s3:GetObject"],"resources":["arn:aws:s3:::data/*"]}]}}"#;
const ROLE: &str = r#"{"metadata":{"name":"app","namespace":"default"},"spec":{"kind":"Role","assumeRolePolicy":[{"effect":"Allow","principal":{"Service":"ec2.amazonaws.com"},"actions":["sts:AssumeRole"]}]}}"#;
const ATTACHMENT: &str = r#"{"metadata":{"name":"app-reader","namespace":"default"},"spec":{"kind":"PolicyAttachment","policy":{"name":"reader"},"target":{"type":"Role","name":"app"}}}"#;

fn write_manifest(path: &Path, lines: &[&str]) {
    fs::write(path, format!("{}\n", lines.join("\n"))).expect("manifest should be written");
}

fn state_args(state_dir: &Path) -> Vec<String> {
    vec![
        "--state-dir".to_string(),
        state_dir.display().to_string(),
        "--account-id".to_string(),
        "123456789012".to_string(),
    ]
}

fn iamsync(command: &str, manifest: Option<&Path>, state_dir: &Path, extra: &[&str]) -> Output {
    let mut args = vec![command.to_string()];
    if let Some(manifest) = manifest {
        args.push(manifest.display().to_string());
    }
    args.extend(state_args(state_dir));
    args.extend(extra.iter().map(|arg| arg.to_string()));
    run_iamsync(args)
}

fn read_remote(state_dir: &Path) -> Value {
    let raw = fs::read(state_dir.join("remote.json")).expect("remote state should exist");
    serde_json::from_slice(&raw).expect("remote state should parse")
}

fn phases(payload: &Value) -> Vec<(String, String)> {
    payload["objects"]
        .as_array()
        .expect("objects array")
        .iter()
        .map(|object| {
            (
                format!(
                    "{} {}",
                    object["kind"].as_str().unwrap_or_default(),
                    object["name"].as_str().unwrap_or_default()
                ),
                object["phase"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[test]
fn apply_converges_manifest_and_status_reports_it() {
    let tmp = TempDirGuard::new("apply");
    let manifest = tmp.path().join("manifest.jsonl");
    let state_dir = tmp.path().join("state");
    // Dependents come first; convergence must not depend on order.
    write_manifest(&manifest, &[ATTACHMENT, ROLE, POLICY]);

    let output = iamsync("apply", Some(&manifest), &state_dir, &["--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["command"], "apply");
    assert_eq!(payload["settled"], true);
    let phases = phases(&payload);
    assert_eq!(phases.len(), 3);
    assert!(phases.iter().all(|(_, phase)| phase == "Converged"), "{phases:?}");

    let remote = read_remote(&state_dir);
    assert!(remote["roles"].get("app").is_some());
    assert_eq!(
        remote["attachments"].as_array().map(Vec::len),
        Some(1),
        "one attachment expected: {remote}"
    );
    assert!(!state_dir.join("state.lock").exists());

    let status = iamsync("status", None, &state_dir, &["--json"]);
    assert_success(&status);
    let payload = parse_json_stdout(&status);
    assert_eq!(payload["object_count"], 3);
    assert_eq!(payload["converged_count"], 3);
}

#[test]
fn reapply_is_a_no_op() {
    let tmp = TempDirGuard::new("reapply");
    let manifest = tmp.path().join("manifest.jsonl");
    let state_dir = tmp.path().join("state");
    write_manifest(&manifest, &[POLICY, ROLE, ATTACHMENT]);

    assert_success(&iamsync("apply", Some(&manifest), &state_dir, &["--json"]));
    let before = read_remote(&state_dir);
    assert_success(&iamsync("apply", Some(&manifest), &state_dir, &["--json"]));
    assert_eq!(read_remote(&state_dir), before);
}

#[test]
fn status_text_lists_objects() {
    let tmp = TempDirGuard::new("status-text");
    let manifest = tmp.path().join("manifest.jsonl");
    let state_dir = tmp.path().join("state");
    write_manifest(&manifest, &[POLICY]);
    assert_success(&iamsync("apply", Some(&manifest), &state_dir, &[]));

    let output = iamsync("status", None, &state_dir, &[]);
    assert_success(&output);
    let text = stdout_text(&output);
    assert!(text.contains("Converged: 1/1"), "{text}");
    assert!(
        text.contains("arn:aws:iam::123456789012:policy/reader"),
        "{text}"
    );
}

#[test]
fn render_prints_canonical_documents_without_touching_state() {
    let tmp = TempDirGuard::new("render");
    let manifest = tmp.path().join("manifest.jsonl");
    let state_dir = tmp.path().join("state");
    write_manifest(&manifest, &[POLICY, ROLE]);

    let output = iamsync(
        "render",
        Some(&manifest),
        &state_dir,
        &["--json", "--resource-prefix", "k8s-"],
    );
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    let documents = payload["documents"].as_array().expect("documents array");
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0]["kind"], "Policy");
    assert_eq!(documents[0]["remote_name"], "k8s-reader");
    assert_eq!(documents[0]["document"]["Version"], "2012-10-17");
    assert_eq!(documents[1]["remote_name"], "k8s-app");
    assert_eq!(
        documents[1]["document"]["Statement"][0]["Principal"]["Service"],
        "ec2.amazonaws.com"
    );
    assert!(!state_dir.join("objects.jsonl").exists());
}

#[test]
fn invalid_manifest_is_rejected_before_any_work() {
    let tmp = TempDirGuard::new("invalid");
    let manifest = tmp.path().join("manifest.jsonl");
    let state_dir = tmp.path().join("state");
    write_manifest(
        &manifest,
        &[
            POLICY,
            r#"{"metadata":{"name":"empty"},"spec":{"kind":"Policy","statement":[]}}"#,
        ],
    );

    let output = iamsync("apply", Some(&manifest), &state_dir, &["--json"]);
    assert_failure(&output);
    let stderr = stderr_text(&output);
    assert!(stderr.contains("invalid manifest"), "{stderr}");
    assert!(stderr.contains("Policy default/empty"), "{stderr}");
    assert!(!state_dir.join("remote.json").exists());
}

#[test]
fn referenced_policy_deletion_blocks_until_attachment_is_gone() {
    let tmp = TempDirGuard::new("delete");
    let manifest = tmp.path().join("manifest.jsonl");
    let policy_only = tmp.path().join("policy.jsonl");
    let state_dir = tmp.path().join("state");
    write_manifest(&manifest, &[POLICY, ROLE, ATTACHMENT]);
    write_manifest(&policy_only, &[POLICY]);
    assert_success(&iamsync("apply", Some(&manifest), &state_dir, &["--json"]));

    let blocked = iamsync(
        "delete",
        Some(&policy_only),
        &state_dir,
        &["--json", "--timeout-secs", "1"],
    );
    assert_failure(&blocked);
    let payload = parse_json_stdout(&blocked);
    assert_eq!(payload["settled"], false);
    let policy = payload["objects"]
        .as_array()
        .expect("objects array")
        .iter()
        .find(|object| object["kind"] == "Policy")
        .expect("policy still declared");
    assert_eq!(policy["phase"], "Deleting");
    assert!(
        policy["message"]
            .as_str()
            .unwrap_or_default()
            .contains("still referenced by PolicyAttachment default/app-reader"),
        "{policy}"
    );
    assert_eq!(read_remote(&state_dir)["policies"].as_object().map(|p| p.len()), Some(1));

    let output = iamsync("delete", Some(&manifest), &state_dir, &["--json"]);
    assert_success(&output);
    let payload = parse_json_stdout(&output);
    assert_eq!(payload["settled"], true);
    assert!(phases(&payload).is_empty());

    let remote = read_remote(&state_dir);
    assert_eq!(remote["roles"].as_object().map(|r| r.len()), Some(0));
    assert_eq!(remote["policies"].as_object().map(|p| p.len()), Some(0));
    assert_eq!(remote["attachments"].as_array().map(Vec::len), Some(0));
}

#[test]
fn busy_state_dir_fails_fast() {
    let tmp = TempDirGuard::new("busy");
    let manifest = tmp.path().join("manifest.jsonl");
    let state_dir = tmp.path().join("state");
    write_manifest(&manifest, &[POLICY]);
    fs::create_dir_all(&state_dir).expect("state dir should be created");
    fs::write(state_dir.join("state.lock"), "pid=0\n").expect("lock should be written");

    let output = iamsync("apply", Some(&manifest), &state_dir, &[]);
    assert_failure(&output);
    assert!(stderr_text(&output).contains("state lock busy"));
}

#[test]
fn repeated_manifest_object_is_rejected() {
    let tmp = TempDirGuard::new("repeated");
    let manifest = tmp.path().join("manifest.jsonl");
    let state_dir = tmp.path().join("state");
    write_manifest(&manifest, &[POLICY, ROLE, POLICY]);

    let output = iamsync("apply", Some(&manifest), &state_dir, &[]);
    assert_failure(&output);
    let stderr = stderr_text(&output);
    assert!(stderr.contains("line 3"), "{stderr}");
    assert!(stderr.contains("already declared on line 1"), "{stderr}");
    assert!(!state_dir.join("remote.json").exists());
}
