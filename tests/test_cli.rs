use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn settings_with_socket(dir: &std::path::Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("settings.toml");
    let socket = dir.join("agent.sock");
    fs::write(
        &path,
        format!(
            "{}\n[agent]\nsocket_path = \"{}\"\nprobe = \"command\"\n",
            extra,
            socket.display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("enable"))
        .stdout(predicate::str::contains("disable"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("locate"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_version_flag() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_subcommand_shows_usage() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_config_path_honours_override() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("custom.toml");

    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.args(["config", "path", "--config", path.to_str().unwrap()]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_show_renders_defaults_for_missing_file() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("absent.toml");

    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.args(["--config", path.to_str().unwrap(), "config", "show"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[worker]"))
        .stdout(predicate::str::contains("night_temperature = 3500"))
        .stdout(predicate::str::contains("schedule_start = \"21:00\""))
        .stdout(predicate::str::contains("[agent]"));
    assert!(!path.exists());
}

#[test]
fn test_config_show_reads_file() {
    let temp_dir = tempdir().unwrap();
    let path = settings_with_socket(
        temp_dir.path(),
        "[worker]\nnight_temperature = 2700\nuse_schedule = true\n",
    );

    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.args(["--config", path.to_str().unwrap(), "config", "show"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("night_temperature = 2700"))
        .stdout(predicate::str::contains("use_schedule = true"));
}

#[test]
fn test_enable_without_agent_fails() {
    let temp_dir = tempdir().unwrap();
    let path = settings_with_socket(temp_dir.path(), "");

    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.args(["--config", path.to_str().unwrap(), "enable"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Is the agent running"));
}

#[test]
fn test_apply_rejects_malformed_settings() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[worker\nnight_temperature = ").unwrap();

    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.args(["--config", path.to_str().unwrap(), "apply"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse settings file"));
}

#[test]
fn test_status_without_agent_reports_probe_result() {
    let temp_dir = tempdir().unwrap();
    let path = settings_with_socket(
        temp_dir.path(),
        "[worker]\nworker_binary_path = \"/nonexistent/nightshade-test-worker\"\n",
    );

    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.args(["--config", path.to_str().unwrap(), "status", "--json"]);

    let output = cmd.assert().success().get_output().stdout.clone();
    let body: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(body["agent_running"], false);
    assert_eq!(body["state"]["observed_running"], false);
    assert_eq!(body["state"]["desired_enabled"], false);
}

#[test]
fn test_run_rejects_invalid_agent_settings() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("settings.toml");
    fs::write(
        &path,
        format!(
            "[agent]\ntick_interval_secs = 0\nsocket_path = \"{}\"\n",
            temp_dir.path().join("agent.sock").display()
        ),
    )
    .unwrap();

    let mut cmd = assert_cmd::cargo_bin_cmd!("nightshade");
    cmd.args(["--config", path.to_str().unwrap(), "run"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid tick interval"));
}
