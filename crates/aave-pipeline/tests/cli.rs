use std::process::Command;

use eyre::Context as _;

fn cmd(cfg_dir: &std::path::Path, data_dir: &std::path::Path) -> Command {
    let exe = assert_cmd::cargo::cargo_bin!("aave-pipeline");
    let mut c = Command::new(exe);
    c.env("AAVE_PIPELINE_CONFIG_DIR", cfg_dir)
        .env("AAVE_PIPELINE_DATA_DIR", data_dir)
        .env_remove("AAVE_PIPELINE_NETWORK")
        .env_remove("AAVE_PIPELINE_RPC_URL")
        .env_remove("AAVE_PIPELINE_CONFIRMATIONS")
        .env_remove("AAVE_PIPELINE_AMOUNT")
        .env_remove("AAVE_PIPELINE_PRIVATE_KEY");
    c
}

#[test]
fn paths_honours_dir_overrides() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = cmd(cfg_dir.path(), data_dir.path())
        .arg("paths")
        .output()
        .context("run aave-pipeline paths")?;
    assert!(
        out.status.success(),
        "paths exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    let data = v
        .get("data_dir")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    assert_eq!(std::path::Path::new(data), data_dir.path());
    let log = v
        .get("log_file")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    assert!(log.ends_with("aave-pipeline.log.jsonl"), "log_file={log}");
    Ok(())
}

#[test]
fn config_writes_defaults_on_first_run() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = cmd(cfg_dir.path(), data_dir.path())
        .env("AAVE_PIPELINE_CONFIRMATIONS", "4")
        .arg("config")
        .output()
        .context("run aave-pipeline config")?;
    assert!(
        out.status.success(),
        "config exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(cfg_dir.path().join("config.toml").exists(), "config.toml not written");

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse config json")?;
    assert_eq!(v["default_network"], "localhost");
    assert_eq!(v["pipeline"]["amount"], "0.02");
    assert_eq!(v["pipeline"]["safety_factor_bps"], 9500);
    assert_eq!(v["networks"]["localhost"]["block_confirmations"], 4);
    assert_eq!(v["networks"]["mainnet"]["block_confirmations"], 2);
    Ok(())
}

#[test]
fn run_on_unconfigured_network_fails_before_sending() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = cmd(cfg_dir.path(), data_dir.path())
        .args(["run", "--network", "goerli"])
        .output()
        .context("run aave-pipeline run")?;
    assert!(!out.status.success(), "goerli ships without contract addresses");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("contract address not configured"),
        "stderr={stderr}"
    );
    Ok(())
}

#[test]
fn rejects_read_steps_as_resume_point() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    assert_cmd::Command::from_std(cmd(cfg_dir.path(), data_dir.path()))
        .args(["run", "--from", "quote"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid value"));
    Ok(())
}
