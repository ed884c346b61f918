use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use tempfile::tempdir;

fn run_host(args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_gothic_host"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .context("executing gothic_host")?;
    assert!(
        output.status.success(),
        "gothic_host exited with {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(output)
}

fn bundled_scripts() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scripts")
}

#[test]
fn exec_prints_console_results() -> Result<()> {
    let output = run_host(&[
        "--no-mod-scripts",
        "--exec",
        "return 1 + 1",
        "--exec",
        "print('hi') return gothic.world():player():name()",
    ])?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "2\nhi\nHero\n");
    Ok(())
}

#[test]
fn bundled_scripts_handle_the_demo_events() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory")?;
    let json_path = temp_dir.path().join("state.json");
    let scripts = bundled_scripts();

    let output = run_host(&[
        "--scripts-dir",
        scripts.to_str().context("scripts path is not valid UTF-8")?,
        "--demo-events",
        "--exec",
        "return gothic.storage.get('autoloot.opened'), gothic.storage.get('autoloot.ransacked')",
        "--exec",
        "return gothic.vm.get('HERO_XP'), gothic.vm.get('MIS_BANDITLOOT')",
        "--state-json",
        json_path.to_str().context("json path is not valid UTF-8")?,
    ])?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    for expected in [
        "onOpen handled: true",
        "onRansack handled: true",
        "message: 50x ItMi_Gold",
        "message: 3x ItFo_Apple",
        "message: 17x ItMi_Gold",
        "1, 1",
        "50, 1",
    ] {
        assert!(
            stdout.lines().any(|line| line == expected),
            "missing {expected:?} in:\n{stdout}"
        );
    }
    assert!(stdout.contains("B_GIVEXP"), "legacy call trace missing:\n{stdout}");

    let json = fs::read_to_string(&json_path)?;
    let state: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(state["global_data"]["quests.xp"], "50");
    Ok(())
}

#[test]
fn saved_state_is_restored_on_the_next_run() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory")?;
    let save_path = temp_dir.path().join("scripts.sav");
    let save = save_path.to_str().context("save path is not valid UTF-8")?;

    run_host(&[
        "--no-mod-scripts",
        "--exec",
        "gothic.storage.set('chapter', 3)",
        "--save-state",
        save,
    ])?;
    let output = run_host(&[
        "--no-mod-scripts",
        "--load-state",
        save,
        "--exec",
        "return gothic.storage.get('chapter')",
    ])?;
    assert_eq!(String::from_utf8_lossy(&output.stdout), "3\n");
    Ok(())
}

#[test]
fn state_json_may_not_overwrite_the_loaded_save() -> Result<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_gothic_host"))
        .args(["--load-state", "same.sav", "--state-json", "same.sav"])
        .output()
        .context("executing gothic_host")?;
    assert!(!output.status.success());
    Ok(())
}
