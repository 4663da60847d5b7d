//! Scenario fixtures and command-line tests
//!
//! Every YAML file under `tests/fixtures/` is run through the library's
//! scenario runner, then a few of them again through the `bpengine` binary
//! to check exit codes and output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use bpengine::scenario::{run_scenario, run_scenario_str};

/// Test context with a private config directory
struct TestContext {
    /// Temporary directory for this test
    temp_dir: tempfile::TempDir,
    /// Path to the bpengine binary
    bin: PathBuf,
    /// Path to fixtures directory
    fixtures_dir: PathBuf,
}

/// Captured output of one binary invocation
struct CliOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl TestContext {
    fn new() -> Self {
        let manifest_dir = env!("CARGO_MANIFEST_DIR");
        Self {
            temp_dir: tempfile::tempdir().expect("Failed to create temp dir"),
            bin: PathBuf::from(env!("CARGO_BIN_EXE_bpengine")),
            fixtures_dir: PathBuf::from(manifest_dir).join("tests").join("fixtures"),
        }
    }

    fn fixture(&self, name: &str) -> PathBuf {
        self.fixtures_dir.join(name)
    }

    fn config_dir(&self) -> PathBuf {
        self.temp_dir.path().join("config")
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Run a bpengine command
    fn run(&self, args: &[&str]) -> CliOutput {
        let output = Command::new(&self.bin)
            .args(args)
            .env("XDG_CONFIG_HOME", self.config_dir())
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to run bpengine");

        CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        }
    }

    /// Run a command expecting exit code 0
    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert_eq!(
            output.code,
            Some(0),
            "bpengine {:?} failed:\nstdout: {}\nstderr: {}",
            args,
            output.stdout,
            output.stderr
        );
        output.stdout
    }
}

fn assert_fixture_passes(path: &Path) {
    let result = run_scenario(path, false).expect("scenario should load");
    assert!(
        result.passed,
        "{} failed at step {}/{}: {:?}",
        result.name, result.steps_run, result.steps_total, result.error
    );
    assert_eq!(result.steps_run, result.steps_total);
}

// === Fixtures through the library ===

#[test]
fn test_fixture_temporary_and_ignore() {
    let ctx = TestContext::new();
    assert_fixture_passes(&ctx.fixture("temporary_and_ignore.yaml"));
}

#[test]
fn test_fixture_watch() {
    let ctx = TestContext::new();
    assert_fixture_passes(&ctx.fixture("watch.yaml"));
}

#[test]
fn test_fixture_pending_module() {
    let ctx = TestContext::new();
    assert_fixture_passes(&ctx.fixture("pending_module.yaml"));
}

#[test]
fn test_fixture_catch() {
    let ctx = TestContext::new();
    assert_fixture_passes(&ctx.fixture("catch.yaml"));
}

#[test]
fn test_fixture_permanent() {
    let ctx = TestContext::new();
    assert_fixture_passes(&ctx.fixture("permanent.yaml"));
}

#[test]
fn test_scope_guard_scenario() {
    let scenario = r#"
name: scope_guard
target:
  frames:
    - { stack: 0x7ff0, code: 0x1000, return_address: 0 }
    - { stack: 0x7fe0, code: 0x1100, return_address: 0x1044 }
  variables:
    - { name: count, address: 0x7fd0, value: 0, frame: 1 }
steps:
  - action: command
    command: watch count
    expect: { number: 1 }
  - action: resume
  - action: pop_frame
  - action: stop
    address: 0x1044
    expect:
      stop: true
      breakpoints: [1]
      message_contains: "left the block"
      deleted: [-1, 1]
  - action: check_breakpoint
    number: 1
    expect: { exists: false }
"#;
    let result = run_scenario_str(scenario, false).unwrap();
    assert!(result.passed, "{:?}", result.error);
}

#[test]
fn test_unparseable_scenario_is_an_error() {
    assert!(run_scenario_str("name: broken\nsteps: 7\n", false).is_err());
}

// === Binary ===

#[test]
fn test_cli_run_passes() {
    let ctx = TestContext::new();
    let catch = ctx.fixture("catch.yaml");
    let watch = ctx.fixture("watch.yaml");
    let stdout = ctx.run_ok(&["run", catch.to_str().unwrap(), watch.to_str().unwrap()]);
    assert!(stdout.contains("2 of 2 scenarios passed"), "{}", stdout);
}

#[test]
fn test_cli_run_failure_exit_code() {
    let ctx = TestContext::new();
    let failing = ctx.write(
        "failing.yaml",
        r#"
name: failing
target:
  functions:
    - { name: main, address: 0x1000 }
steps:
  - action: command
    command: break main
    expect: { number: 2 }
"#,
    );
    let output = ctx.run(&["run", "--json", failing.to_str().unwrap()]);
    assert_eq!(output.code, Some(1));
    assert!(output.stdout.contains("\"passed\": false"), "{}", output.stdout);
    assert!(output.stdout.contains("expected breakpoint 2"), "{}", output.stdout);
}

#[test]
fn test_cli_check_session() {
    let ctx = TestContext::new();
    let session = ctx.write(
        "session.txt",
        "# saved session\nbreak main if x > 3\nignore $bpnum 2\ntcatch fork\ndisable $bpnum\n",
    );
    let stdout = ctx.run_ok(&["check", session.to_str().unwrap()]);
    assert!(stdout.contains("defines 2 breakpoint(s)"), "{}", stdout);
    assert!(stdout.contains("stop only if x > 3"), "{}", stdout);
    assert!(stdout.contains("will ignore next 2 crossings"), "{}", stdout);
}

#[test]
fn test_cli_check_reports_line() {
    let ctx = TestContext::new();
    let session = ctx.write("bad.txt", "break main\nfrobnicate 1\n");
    let output = ctx.run(&["check", session.to_str().unwrap()]);
    assert_eq!(output.code, Some(1));
    assert!(output.stderr.contains("Line 2"), "{}", output.stderr);
}

#[test]
fn test_cli_config_path() {
    let ctx = TestContext::new();
    let stdout = ctx.run_ok(&["config", "--path"]);
    assert!(stdout.trim().ends_with("config.toml"), "{}", stdout);
}

#[test]
fn test_cli_config_reads_file() {
    let ctx = TestContext::new();
    let path = PathBuf::from(ctx.run_ok(&["config", "--path"]).trim());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "[breakpoints]\npending = \"off\"\n").unwrap();

    let stdout = ctx.run_ok(&["config"]);
    assert!(stdout.contains("pending = \"off\""), "{}", stdout);
}
