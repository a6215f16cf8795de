use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_lock_and_unlock_against_running_daemon() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("lockd");

    // Each client is a fresh process, so give locks long enough to outlive
    // process start-up.
    let (mut daemon, mut daemon_stdout) =
        spawn_daemon(&binary, &["--timeout-ms", "60000"]).await?;
    let addr = read_daemon_addr(&mut daemon_stdout).await?;

    // Drain additional daemon logs in the background so the pipe never fills.
    let log_task = tokio::spawn(drain_stdout(daemon_stdout));

    client(&binary, "lock", "report.csv", &addr)
        .assert()
        .success()
        .stdout("granted\n");

    client(&binary, "lock", "report.csv", &addr)
        .assert()
        .code(1)
        .stdout("denied\n");

    client(&binary, "unlock", "report.csv", &addr)
        .assert()
        .success()
        .stdout("released\n");

    client(&binary, "lock", "report.csv", &addr)
        .assert()
        .success()
        .stdout("granted\n");

    // Unlock has no failure case, even for keys nobody holds.
    client(&binary, "unlock", "never-locked", &addr)
        .assert()
        .success()
        .stdout("released\n");

    let _ = daemon.kill().await;
    let _ = daemon.wait().await;
    let _ = log_task.await;

    Ok(())
}

#[tokio::test]
async fn expiry_warnings_reach_the_log_file() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("lockd");
    let log_dir = tempfile::tempdir()?;
    let log_dir_arg = log_dir.path().to_string_lossy().into_owned();

    let (mut daemon, mut daemon_stdout) = spawn_daemon(
        &binary,
        &["--timeout-ms", "50", "--log-dir", log_dir_arg.as_str()],
    )
    .await?;
    let addr = read_daemon_addr(&mut daemon_stdout).await?;
    let log_task = tokio::spawn(drain_stdout(daemon_stdout));

    client(&binary, "lock", "stale.txt", &addr).assert().success();
    tokio::time::sleep(Duration::from_millis(100)).await;
    client(&binary, "lock", "stale.txt", &addr)
        .assert()
        .success()
        .stdout("granted\n");

    let (file_name, logged) =
        timeout(READ_TIMEOUT, wait_for_log_line(log_dir.path(), "stale.txt"))
            .await
            .context("timed out waiting for expiry warning in log file")??;
    assert!(logged.contains("WARN"), "unexpected log line: {logged}");
    assert!(
        file_name.starts_with("lockd.") && file_name.ends_with(".log"),
        "unexpected log file name: {file_name}"
    );

    let _ = daemon.kill().await;
    let _ = daemon.wait().await;
    let _ = log_task.await;

    Ok(())
}

#[test]
fn lock_rejects_oversized_key_before_connecting() {
    let binary = assert_cmd::cargo::cargo_bin!("lockd");
    let key = "k".repeat(256);

    assert_cmd::Command::new(&binary)
        .args(["lock", key.as_str(), "--server", "127.0.0.1:9"])
        .assert()
        .failure();
}

#[test]
fn serve_help_names_the_rotated_log_files() {
    let binary = assert_cmd::cargo::cargo_bin!("lockd");
    let output = assert_cmd::Command::new(&binary)
        .args(["serve", "--help"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let help = String::from_utf8(output).expect("utf8 help");
    assert!(help.contains("lockd.<YYYY-MM-DD>.log"), "{help}");
}

fn client(binary: &Path, action: &str, key: &str, addr: &str) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(binary);
    cmd.args([action, key, "--server", addr])
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .timeout(READ_TIMEOUT);
    cmd
}

async fn spawn_daemon(binary: &Path, extra: &[&str]) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .args(extra)
        .env("RUST_LOG", "info")
        .env("RUST_LOG_STYLE", "never")
        .env_remove("LOCKD_LISTEN")
        .env_remove("LOCKD_TIMEOUT_MS")
        .kill_on_drop(true)
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn daemon")?;
    let stdout = child
        .stdout
        .take()
        .context("daemon stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_daemon_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let mut line = String::new();
    let bytes = timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("timed out waiting for listening banner")??;
    if bytes == 0 {
        return Err(anyhow!("daemon exited before printing its address"));
    }

    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected daemon banner format")?;
    if !trimmed.contains("listening on") || !addr.contains(':') {
        return Err(anyhow!("daemon banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while matches!(reader.read_line(&mut buffer).await, Ok(bytes) if bytes > 0) {
        buffer.clear();
    }
}

async fn wait_for_log_line(dir: &Path, needle: &str) -> Result<(String, String)> {
    loop {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let contents = tokio::fs::read_to_string(entry.path()).await?;
            if let Some(line) = contents.lines().find(|line| line.contains(needle)) {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                return Ok((file_name, line.to_string()));
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
