#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Write `contents` to a uniquely-named temp file and return its path.
pub fn write_temp_config(contents: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    path.push(format!("marketwatch-cli-test-{nanos}.toml"));
    fs::write(&path, contents).expect("write temp config");
    path
}

/// A config whose database URL is syntactically valid but points at a
/// port nothing listens on, so connection attempts fail immediately
/// with "connection refused" rather than hanging or timing out.
pub fn valid_config_toml() -> &'static str {
    "[database]\nurl = \"postgres://localhost:1/marketwatch_test\"\ncommand_timeout_sec = 1\n"
}
