//! File sink of the fern logger. `setup_logging` installs a process-wide
//! logger, so this binary calls it exactly once.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use signalr_client::loggers::logger::{cleanup_old_logs, setup_logging};

fn log_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".log"))
        .collect();
    names.sort();
    names
}

/// Writes `names` in order with distinct modification times.
fn write_aged(dir: &Path, names: &[&str]) {
    for name in names {
        fs::write(dir.join(name), "old").unwrap();
        thread::sleep(Duration::from_millis(30));
    }
}

#[test]
fn cleanup_keeps_only_the_newest_logs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_aged(dir.path(), &["a.log", "b.log", "c.log"]);
    fs::write(dir.path().join("notes.txt"), "keep me")?;

    cleanup_old_logs(dir.path(), 2)?;

    assert_eq!(log_files(dir.path()), vec!["b.log", "c.log"]);
    assert!(dir.path().join("notes.txt").exists());
    Ok(())
}

#[test]
fn setup_creates_a_fresh_file_and_prunes_older_ones() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let dir = root.path().join("logs");
    fs::create_dir_all(&dir)?;
    write_aged(&dir, &["first.log", "second.log"]);

    let path = setup_logging(&dir, "debug")?;
    log::info!("logger smoke marker");

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("signalr_client_"));
    assert_eq!(log_files(&dir), {
        let mut expected = vec!["second.log".to_string(), name];
        expected.sort();
        expected
    });

    let written = fs::read_to_string(&path)?;
    assert!(written.contains("logger smoke marker"));
    assert!(written.contains("[INFO]"));
    Ok(())
}
