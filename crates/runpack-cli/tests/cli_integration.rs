//! CLI subprocess integration tests.
//!
//! These tests invoke the `runpack` binary against a `file://` repository and
//! verify exit codes, stdout content, and JSON output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn runpack_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_runpack"));
    cmd.env_remove("RUNPACK_LOG");
    cmd.env_remove("WEB_OPTS");
    cmd
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("app")).unwrap();
        fs::create_dir_all(root.join("cache")).unwrap();
        Self { _dir: dir, root }
    }

    fn app(&self) -> PathBuf {
        self.root.join("app")
    }

    fn cache(&self) -> PathBuf {
        self.root.join("cache")
    }

    fn config(&self) -> PathBuf {
        self.root.join("runpack.toml")
    }

    /// Publish `files` (version, file name, bytes) under `<root>/repo/<name>/jammy/`.
    fn publish(&self, name: &str, files: &[(&str, &str, &[u8])]) -> String {
        let repo = self.root.join("repo").join(name).join("jammy");
        fs::create_dir_all(&repo).unwrap();
        let mut index = String::new();
        for (version, file, bytes) in files {
            let path = repo.join(file);
            fs::write(&path, bytes).unwrap();
            index.push_str(&format!(
                "\"{version}\": {{ uri: \"file://{}\", blake3: \"{}\" }}\n",
                path.display(),
                blake3::hash(bytes).to_hex()
            ));
        }
        fs::write(repo.join("index.yml"), index).unwrap();
        format!("file://{}/{name}/{{stack}}", self.root.join("repo").display())
    }

    fn write_config(&self, components: &str) {
        fs::write(
            self.config(),
            format!("stack = \"jammy\"\n\n[cache]\nretry_backoff_ms = 0\n\n{components}"),
        )
        .unwrap();
    }

    fn run(&self, args: &[&str]) -> Output {
        runpack_bin()
            .arg("--config")
            .arg(self.config())
            .arg("--app-dir")
            .arg(self.app())
            .arg("--cache-dir")
            .arg(self.cache())
            .args(args)
            .output()
            .unwrap()
    }
}

fn standard_fixture() -> Fixture {
    let fx = Fixture::new();
    fs::write(fx.app().join("app.jar"), b"jar").unwrap();
    let tracer = fx.publish(
        "tracer",
        &[
            ("1.2.0", "tracer-1.2.0.sh", b"echo tracer 1.2.0"),
            ("1.10.0", "tracer-1.10.0.sh", b"echo tracer 1.10.0"),
            ("2.0.0", "tracer-2.0.0.sh", b"echo tracer 2.0.0"),
        ],
    );
    let libs = fx.publish("libs", &[("3.1", "libs-3.1.jar", b"libs")]);
    fx.write_config(&format!(
        r#"[[components]]
id = "web"
kind = "command"
detect_file = "app.jar"
command = ["java", "-jar", "app.jar"]
additional_args_env = "WEB_OPTS"

[[components]]
id = "tracer"
kind = "coprocess"
command = ["sh", "{{staged_dir}}/tracer-{{version}}.sh"]
[components.dependency]
version = "1.+"
repository_root = "{tracer}"

[[components]]
id = "libs"
kind = "artifact"
[components.dependency]
version = "3.+"
repository_root = "{libs}"
"#
    ));
    fx
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = runpack_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "runpack --version must exit 0");
    assert!(stdout(&output).contains("runpack"));
}

#[test]
fn cli_help_lists_commands() {
    let output = runpack_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    for cmd in ["detect", "compile", "release", "build", "resolve", "cache"] {
        assert!(out.contains(cmd), "help must list '{cmd}': {out}");
    }
}

#[test]
fn cli_unknown_subcommand_fails() {
    let output = runpack_bin().arg("deploy").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_missing_config_exits_config_error() {
    let fx = Fixture::new();
    let output = fx.run(&["detect"]);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("error:"));
}

#[test]
fn cli_invalid_constraint_exits_config_error() {
    let fx = Fixture::new();
    fx.write_config(
        r#"[[components]]
id = "libs"
kind = "artifact"
[components.dependency]
version = "7.+_beta"
repository_root = "file:///nowhere"
"#,
    );
    let output = fx.run(&["detect"]);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
}

#[test]
fn cli_detect_reports_tags_in_registration_order() {
    let fx = standard_fixture();
    let output = fx.run(&["--json", "detect"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let tags: Vec<&str> = json["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap())
        .collect();
    assert_eq!(tags, ["web", "tracer=1.10.0", "libs=3.1"]);
}

#[test]
fn cli_detect_without_marker_fails_required_category() {
    let fx = standard_fixture();
    fs::remove_file(fx.app().join("app.jar")).unwrap();
    let output = fx.run(&["detect"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("container"), "stderr: {}", stderr(&output));
}

#[test]
fn cli_detect_conflict_exits_failure() {
    let fx = Fixture::new();
    fs::write(fx.app().join("app.jar"), b"jar").unwrap();
    fs::write(fx.app().join("app.war"), b"war").unwrap();
    fx.write_config(
        r#"[[components]]
id = "jar"
kind = "command"
detect_file = "app.jar"
command = ["java", "-jar", "app.jar"]

[[components]]
id = "war"
kind = "command"
detect_file = "app.war"
command = ["catalina.sh", "run"]
"#,
    );
    let output = fx.run(&["detect"]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("jar, war"), "stderr: {err}");
}

#[test]
fn cli_resolve_picks_highest_matching_version() {
    let fx = standard_fixture();
    let output = fx.run(&["--json", "resolve"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["component"], "tracer");
    assert_eq!(entries[0]["dependency"]["version"], "1.10.0");
    assert_eq!(entries[1]["dependency"]["version"], "3.1");
}

#[test]
fn cli_build_stages_and_prints_start_command() {
    let fx = standard_fixture();
    let output = fx.run(&["build"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains(
        "web: (sh $PWD/.runpack/tracer/tracer-1.10.0.sh &) java -jar app.jar"
    ));

    let staged = fx.app().join(".runpack");
    assert_eq!(
        fs::read(staged.join("tracer").join("tracer-1.10.0.sh")).unwrap(),
        b"echo tracer 1.10.0"
    );
    assert_eq!(fs::read(staged.join("libs").join("libs-3.1.jar")).unwrap(), b"libs");
}

#[test]
fn cli_release_yaml_appends_additional_args() {
    let fx = standard_fixture();
    let output = runpack_bin()
        .env("WEB_OPTS", "-Xmx512m")
        .arg("--config")
        .arg(fx.config())
        .arg("--app-dir")
        .arg(fx.app())
        .arg("--cache-dir")
        .arg(fx.cache())
        .arg("release")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("addons: []"), "{out}");
    assert!(out.contains("config_vars: {}"), "{out}");
    assert!(out.contains("default_process_types:"), "{out}");
    assert!(out.contains("java -jar app.jar -Xmx512m"), "{out}");
}

#[test]
fn cli_release_is_stable_across_runs() {
    let fx = standard_fixture();
    let first = fx.run(&["--json", "release"]);
    let second = fx.run(&["--json", "release"]);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    assert_eq!(first.stdout, second.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout(&first)).unwrap();
    assert!(json["default_process_types"]["web"]
        .as_str()
        .unwrap()
        .ends_with("java -jar app.jar"));
}

#[test]
fn cli_cache_list_and_verify_after_build() {
    let fx = standard_fixture();
    assert!(fx.run(&["build"]).status.success());

    let list = fx.run(&["--json", "cache", "list"]);
    assert!(list.status.success(), "stderr: {}", stderr(&list));
    let json: serde_json::Value = serde_json::from_str(&stdout(&list)).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 2);

    let verify = fx.run(&["--json", "cache", "verify"]);
    assert_eq!(verify.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_str(&stdout(&verify)).unwrap();
    assert_eq!(json["checked"], 2);
    assert_eq!(json["failed"], 0);
}

#[test]
fn cli_cache_verify_reports_corruption() {
    let fx = standard_fixture();
    assert!(fx.run(&["build"]).status.success());

    let cached = find_cached_artifacts(&fx.cache());
    assert!(!cached.is_empty());
    fs::write(&cached[0], b"tampered").unwrap();

    let verify = fx.run(&["cache", "verify"]);
    assert_eq!(verify.status.code(), Some(3));
    assert!(stdout(&verify).contains("FAIL"));
}

#[test]
fn cli_cache_evict_removes_entry() {
    let fx = standard_fixture();
    assert!(fx.run(&["build"]).status.success());

    let list = fx.run(&["--json", "cache", "list"]);
    let json: serde_json::Value = serde_json::from_str(&stdout(&list)).unwrap();
    let uri = json[0]["uri"].as_str().unwrap().to_owned();

    let evict = fx.run(&["--json", "cache", "evict", &uri]);
    assert!(evict.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&evict)).unwrap();
    assert_eq!(json["evicted"], true);

    let list = fx.run(&["--json", "cache", "list"]);
    let json: serde_json::Value = serde_json::from_str(&stdout(&list)).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[test]
fn cli_checksum_mismatch_exits_cache_error() {
    let fx = standard_fixture();
    // Republish libs with bytes that no longer match the index.
    let jar = fx
        .root
        .join("repo")
        .join("libs")
        .join("jammy")
        .join("libs-3.1.jar");
    fs::write(&jar, b"not the published bytes").unwrap();

    let output = fx.run(&["build"]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("libs"));
    assert!(!fx.app().join(".runpack").join("libs").join("libs-3.1.jar").exists());
}

fn go_offline(fx: &Fixture) {
    let config = fs::read_to_string(fx.config()).unwrap();
    let offline = config.replacen(
        "retry_backoff_ms = 0\n",
        "retry_backoff_ms = 0\nremote_downloads = false\n",
        1,
    );
    assert_ne!(config, offline);
    fs::write(fx.config(), offline).unwrap();
}

#[test]
fn cli_offline_build_on_cold_cache_exits_cache_error() {
    let fx = standard_fixture();
    go_offline(&fx);

    let output = fx.run(&["build"]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("not cached"), "stderr: {}", stderr(&output));
    assert!(find_cached_artifacts(&fx.cache()).is_empty());
}

#[test]
fn cli_offline_build_uses_warm_cache() {
    let fx = standard_fixture();
    assert!(fx.run(&["build"]).status.success());
    go_offline(&fx);
    fs::remove_dir_all(fx.app().join(".runpack")).unwrap();

    let output = fx.run(&["build"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(
        fs::read(fx.app().join(".runpack").join("libs").join("libs-3.1.jar")).unwrap(),
        b"libs"
    );
}

#[test]
fn cli_completions_bash() {
    let output = runpack_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("runpack"));
}

#[test]
fn cli_man_pages_written() {
    let dir = tempfile::tempdir().unwrap();
    let output = runpack_bin()
        .arg("man-pages")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(dir.path().join("runpack.1").exists());
    assert!(dir.path().join("runpack-build.1").exists());
}

fn find_cached_artifacts(cache: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![cache.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "cached") {
                out.push(path);
            }
        }
    }
    out
}
