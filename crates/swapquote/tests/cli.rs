use std::process::Command;

use eyre::Context as _;

struct Dirs {
    cfg: tempfile::TempDir,
    data: tempfile::TempDir,
}

fn dirs() -> eyre::Result<Dirs> {
    Ok(Dirs {
        cfg: tempfile::tempdir()?,
        data: tempfile::tempdir()?,
    })
}

fn swapquote(d: &Dirs) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("swapquote"));
    cmd.env("SWAPQUOTE_CONFIG_DIR", d.cfg.path())
        .env("SWAPQUOTE_DATA_DIR", d.data.path())
        // Nothing listens here; tests must fail before touching the network.
        .env("SWAPQUOTE_QUOTE_BASE_URL", "http://127.0.0.1:9")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn paths_json_points_at_overrides() -> eyre::Result<()> {
    let d = dirs()?;
    let out = swapquote(&d)
        .arg("paths")
        .output()
        .context("run swapquote paths")?;
    assert!(
        out.status.success(),
        "paths exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    let log = v.get("log_file").and_then(|x| x.as_str()).unwrap_or_default();
    assert!(log.ends_with("swapquote.log.jsonl"), "log_file: {log}");
    assert_eq!(
        v.get("config_dir").and_then(|x| x.as_str()),
        d.cfg.path().to_str()
    );
    Ok(())
}

#[test]
fn config_prints_effective_settings_and_persists_defaults() -> eyre::Result<()> {
    let d = dirs()?;
    let out = swapquote(&d)
        .env("SWAPQUOTE_DEBOUNCE_MS", "250")
        .arg("config")
        .output()
        .context("run swapquote config")?;
    assert!(out.status.success(), "config exited non-zero");

    let cfg: toml::Table = toml::from_str(&String::from_utf8_lossy(&out.stdout))?;
    assert_eq!(cfg.get("debounce_ms").and_then(toml::Value::as_integer), Some(250));
    assert_eq!(
        cfg.get("http")
            .and_then(|h| h.get("quote_base_url"))
            .and_then(toml::Value::as_str),
        Some("http://127.0.0.1:9")
    );
    // The file on disk keeps the defaults; env overrides are applied on load only.
    let on_disk = std::fs::read_to_string(d.cfg.path().join("config.toml"))?;
    assert!(on_disk.contains("debounce_ms = 600"), "{on_disk}");
    Ok(())
}

#[test]
fn quote_rejects_malformed_amount_without_network() -> eyre::Result<()> {
    let d = dirs()?;
    let out = swapquote(&d)
        .args([
            "quote",
            "--sell",
            "BNB",
            "--buy",
            "0x55d398326f99059fF775485246999027B3197955:USDT:18",
            "--amount",
            "1e5",
            "--rate",
            "600",
        ])
        .output()
        .context("run swapquote quote")?;
    assert!(!out.status.success(), "malformed amount was accepted");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid amount"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn quote_rejects_unknown_token() -> eyre::Result<()> {
    let d = dirs()?;
    assert_cmd::Command::from_std(swapquote(&d))
        .args(["quote", "--sell", "BNB", "--buy", "DOGE", "--amount", "1", "--rate", "1"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("unknown token: DOGE"));
    Ok(())
}

#[test]
fn quote_looks_up_token_addresses_in_the_list() -> eyre::Result<()> {
    let d = dirs()?;
    assert_cmd::Command::from_std(swapquote(&d))
        .args([
            "quote",
            "--sell",
            "BNB",
            "--buy",
            "0x55d398326f99059fF775485246999027B3197955",
            "--amount",
            "1",
            "--rate",
            "1",
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains(
            "token not in list: 0x55d398326f99059ff775485246999027b3197955",
        ));
    Ok(())
}

#[test]
fn quote_reports_transport_failure() -> eyre::Result<()> {
    let d = dirs()?;
    let out = swapquote(&d)
        .env("SWAPQUOTE_FALLBACK_QUOTE_BASE_URLS", "")
        .args([
            "quote",
            "--sell",
            "BNB",
            "--buy",
            "0x55d398326f99059fF775485246999027B3197955:USDT:18",
            "--amount",
            "0.5",
            "--rate",
            "600",
            "--json",
        ])
        .output()
        .context("run swapquote quote")?;
    assert!(!out.status.success(), "quote against a dead endpoint succeeded");

    let v: serde_json::Value =
        serde_json::from_slice(&out.stdout).context("parse snapshot json")?;
    assert_eq!(v.get("phase").and_then(|x| x.as_str()), Some("failed"));
    assert_eq!(
        v.pointer("/error/code").and_then(|x| x.as_str()),
        Some("transport_failure")
    );
    assert_eq!(v.get("quotes").and_then(|x| x.as_array()).map(Vec::len), Some(0));
    Ok(())
}
