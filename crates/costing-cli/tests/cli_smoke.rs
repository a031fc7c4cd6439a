use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

const SHEET: &str = "\
Cost Code,Item Description,BOQ Qty,Budget Rate
A,Site works,,
A-01-01,Excavation,100,2.5
A-02,Concrete,40,10
,Unlabelled row,5,
";

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
            "costing-cli-{prefix}-{}-{unique}",
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

fn run_costing<I, S>(workspace: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = env!("CARGO_BIN_EXE_costing");
    Command::new(bin)
        .current_dir(workspace)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("costing command should execute")
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

fn run_json<I, S>(workspace: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_costing(workspace, args);
    assert_success(&output);
    parse_json_stdout(&output)
}

fn import_sample(workspace: &Path) -> Value {
    let sheet = workspace.join("boq.csv");
    fs::write(&sheet, SHEET).expect("sheet should be written");
    run_json(
        workspace,
        ["import", "boq.csv", "--tree", "boq-1", "--json"],
    )
}

fn key_for(workspace: &Path, code: &str) -> String {
    let tree = run_json(workspace, ["tree", "--json"]);
    tree["nodes"]
        .as_array()
        .expect("nodes array")
        .iter()
        .find(|node| node["structural_code"] == code)
        .and_then(|node| node["key"].as_str())
        .unwrap_or_else(|| panic!("node {code} not found in {tree}"))
        .to_string()
}

fn write_document(workspace: &Path, name: &str, document: Value) -> String {
    fs::write(workspace.join(name), document.to_string()).expect("document should be written");
    name.to_string()
}

#[test]
fn import_builds_tree_and_seeds_leaves() {
    let tmp = TempDirGuard::new("import");
    let workspace = tmp.path();

    let payload = import_sample(workspace);
    assert_eq!(payload["action"], "costing.import");
    assert_eq!(payload["ledgerEntriesSeeded"], 2);
    let report = &payload["report"];
    assert_eq!(report["total"], 4);
    assert_eq!(report["success"], 3);
    assert_eq!(report["synthesized"], 1);
    assert_eq!(report["inserted"].as_array().expect("inserted").len(), 4);
    assert_eq!(report["errors"].as_array().expect("errors").len(), 1);
    assert_eq!(report["errors"][0]["row"], 5);

    let outline = run_costing(workspace, ["tree"]);
    assert_success(&outline);
    let text = stdout_text(&outline);
    assert!(text.contains("A [group]"), "{text}");
    assert!(text.contains("A-01 [group, synthetic]"), "{text}");
    assert!(text.contains("A-01-01\n"), "{text}");

    let check = run_json(workspace, ["check", "--json"]);
    assert_eq!(check["result"], "accepted");
    assert_eq!(check["summary"]["nodeCount"], 4);
    assert_eq!(check["summary"]["syntheticCount"], 1);
}

#[test]
fn reimport_updates_in_place() {
    let tmp = TempDirGuard::new("reimport");
    let workspace = tmp.path();
    import_sample(workspace);

    let again = import_sample(workspace);
    assert_eq!(again["report"]["inserted"].as_array().expect("inserted").len(), 0);
    assert_eq!(again["ledgerEntriesSeeded"], 0);
    let tree = run_json(workspace, ["tree", "--json"]);
    assert_eq!(tree["count"], 4);
}

#[test]
fn reservation_beyond_available_fails_and_leaves_entry() {
    let tmp = TempDirGuard::new("reserve");
    let workspace = tmp.path();
    import_sample(workspace);
    let leaf = key_for(workspace, "A-01-01");

    let reserved = run_json(workspace, ["reserve", leaf.as_str(), "40", "--json"]);
    assert_eq!(reserved["entry"]["availableQty"], "60");
    assert_eq!(reserved["entry"]["requestReservedQty"], "40");

    let over = run_costing(workspace, ["reserve", leaf.as_str(), "70"]);
    assert_failure(&over);
    assert!(
        stderr_text(&over).contains("insufficient available qty"),
        "{}",
        stderr_text(&over)
    );

    let shown = run_json(workspace, ["ledger", leaf.as_str(), "--json"]);
    assert_eq!(shown["entry"]["availableQty"], "60");
    assert_eq!(shown["entry"]["requestReservedQty"], "40");
    assert_eq!(shown["availableAmount"], "150.0");

    let released = run_json(workspace, ["release", leaf.as_str(), "40", "--json"]);
    assert_eq!(released["entry"]["availableQty"], "100");
    assert_eq!(released["entry"]["requestReservedQty"], "0");
}

#[test]
fn document_lifecycle_and_reconcile() {
    let tmp = TempDirGuard::new("documents");
    let workspace = tmp.path();
    import_sample(workspace);
    let leaf = key_for(workspace, "A-02");

    let file = write_document(
        workspace,
        "mr-1.json",
        serde_json::json!({
            "id": "MR-1",
            "kind": "material_request",
            "lines": [{ "nodeKey": leaf, "qty": "15" }]
        }),
    );
    let submitted = run_json(workspace, ["doc", "submit", file.as_str(), "--json"]);
    assert_eq!(submitted["effect"], "request_reservation");
    assert_eq!(submitted["entries"][0]["availableQty"], "25");

    let resubmit = run_costing(workspace, ["doc", "submit", file.as_str()]);
    assert_failure(&resubmit);

    let clean = run_json(workspace, ["reconcile", "--json"]);
    assert_eq!(clean["report"]["changed"], 0);

    // Drift: an order reservation with no purchase order behind it.
    run_json(workspace, ["order-reserve", leaf.as_str(), "5", "--json"]);
    let repaired = run_json(workspace, ["reconcile", "--json"]);
    assert_eq!(repaired["report"]["changed"], 1);
    let settled = run_json(workspace, ["reconcile", "--json"]);
    assert_eq!(settled["report"]["changed"], 0);
    assert_eq!(settled["report"]["digest"], repaired["report"]["digest"]);

    let status = run_json(workspace, ["doc", "status", leaf.as_str(), "--json"]);
    let request = &status["kinds"][0];
    assert_eq!(request["kind"], "material_request");
    assert_eq!(request["submitted"]["count"], 1);

    let cancelled = run_json(workspace, ["doc", "cancel", "MR-1", "--json"]);
    assert_eq!(cancelled["entries"][0]["requestReservedQty"], "0");

    let twice = run_costing(workspace, ["doc", "cancel", "MR-1"]);
    assert_failure(&twice);
}

#[test]
fn delete_strips_links_and_is_idempotent() {
    let tmp = TempDirGuard::new("delete");
    let workspace = tmp.path();
    import_sample(workspace);
    let root = key_for(workspace, "A");
    let leaf = key_for(workspace, "A-01-01");

    let file = write_document(
        workspace,
        "po-1.json",
        serde_json::json!({
            "id": "PO-1",
            "kind": "purchase_order",
            "lines": [{ "nodeKey": leaf, "qty": "3" }]
        }),
    );
    run_json(workspace, ["doc", "submit", file.as_str(), "--json"]);

    let first = run_json(workspace, ["delete", root.as_str(), "--json"]);
    assert_eq!(first["report"]["nodesDeleted"], 4);
    assert_eq!(first["report"]["entriesDeleted"], 2);
    assert_eq!(first["report"]["documentsTouched"], 1);

    let second = run_json(workspace, ["delete", root.as_str(), "--json"]);
    assert_eq!(second["affected"], 0);

    let tree = run_json(workspace, ["tree", "--json"]);
    assert_eq!(tree["count"], 0);
    let ledger = run_json(workspace, ["ledger", "--json"]);
    assert_eq!(ledger["count"], 0);
}

#[test]
fn held_lock_blocks_mutations() {
    let tmp = TempDirGuard::new("lock");
    let workspace = tmp.path();
    import_sample(workspace);
    let leaf = key_for(workspace, "A-02");
    fs::write(workspace.join(".costing/nodes.jsonl.lock"), "pid=0\n").expect("lock written");

    let blocked = run_costing(workspace, ["reserve", leaf.as_str(), "1"]);
    assert_failure(&blocked);
    assert!(stderr_text(&blocked).contains("store lock busy"));
}

#[test]
fn config_aliases_and_key_prefix_apply() {
    let tmp = TempDirGuard::new("config");
    let workspace = tmp.path();
    fs::create_dir_all(workspace.join(".costing")).expect("config dir");
    fs::write(
        workspace.join(".costing/config.toml"),
        "key_prefix = \"N-\"\n\n[columns]\nstructural_code = [\"Ref\"]\n",
    )
    .expect("config written");
    fs::write(workspace.join("sheet.tsv"), "Ref\tBOQ Qty\nB\t\nB-01\t7\n").expect("sheet");

    let payload = run_json(workspace, ["import", "sheet.tsv", "--tree", "boq-2", "--json"]);
    let inserted = payload["report"]["inserted"].as_array().expect("inserted");
    assert_eq!(inserted.len(), 2);
    assert!(
        inserted
            .iter()
            .all(|node| node["key"].as_str().is_some_and(|key| key.starts_with("N-")))
    );

    let compacted = run_json(workspace, ["compact", "--json"]);
    assert_eq!(compacted["entries"], 1);
}
