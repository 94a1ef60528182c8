use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn write_config(dir: &Path, binary: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    fs::write(
        &path,
        format!(
            "[probe]\nbinary = \"{}\"\nsandbox_root = \"{}\"\n",
            binary.display(),
            dir.join("sandboxes").display()
        ),
    )
    .unwrap();
    path
}

#[cfg(unix)]
fn write_verifier(dir: &Path, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("cdx");
    fs::write(
        &path,
        format!(
            "#!/bin/sh\nif [ \"$1\" = \"--wrapper-version\" ]; then echo 1.0.0; exit 0; fi\n{}\n",
            body
        ),
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("authprobe 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sandboxed credential probe runner"));
}

#[test]
fn test_cli_probe_missing_auth_file_arg() {
    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("probe")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_check_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), Path::new("/app/cdx"));

    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("policy = \"fixed\""))
        .stdout(predicate::str::contains("marker = \"Banana\""));
}

#[test]
fn test_cli_check_config_rejects_bad_level() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "[logging]\nlevel = \"loud\"\n").unwrap();

    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_cli_probe_unreadable_file_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), Path::new("/app/cdx"));

    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("probe")
        .arg("--auth-file")
        .arg(dir.path().join("missing.json"))
        .assert()
        .code(2);
}

#[cfg(unix)]
#[test]
fn test_cli_probe_ok() {
    let dir = tempfile::tempdir().unwrap();
    let binary = write_verifier(dir.path(), "echo Banana");
    let config = write_config(dir.path(), &binary);
    let auth = dir.path().join("auth.json");
    fs::write(&auth, r#"{"OPENAI_API_KEY":"sk-test"}"#).unwrap();

    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("probe")
        .arg("--auth-file")
        .arg(&auth)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("\"status\": \"ok\""))
        .stdout(predicate::str::contains("\"wrapper_version\": \"1.0.0\""));
}

#[cfg(unix)]
#[test]
fn test_cli_probe_fail_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let binary = write_verifier(dir.path(), "echo 'token expired' >&2; exit 1");
    let config = write_config(dir.path(), &binary);
    let auth = dir.path().join("auth.json");
    fs::write(&auth, r#"{"OPENAI_API_KEY":"sk-test"}"#).unwrap();

    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("probe")
        .arg("--auth-file")
        .arg(&auth)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("token expired"));
}

#[test]
fn test_cli_probe_invalid_credential_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), Path::new("/app/cdx"));
    let auth = dir.path().join("auth.json");
    fs::write(&auth, r#"{"tokens":{}}"#).unwrap();

    let mut cmd = Command::cargo_bin("authprobe").unwrap();
    cmd.arg("--config")
        .arg(&config)
        .arg("probe")
        .arg("--auth-file")
        .arg(&auth)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("access token"));
}
