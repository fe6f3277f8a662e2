// Fail the build when lint-suppression attributes ("#[" + "allow" + ...) appear in eventsweep sources.
// Downstream crates building eventsweep hit the same check.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // CHECK_NO_ALLOW=0 turns the check off.
    if env::var("CHECK_NO_ALLOW").is_ok_and(|v| v == "0") {
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("manifest dir"));
    let mut violations = Vec::new();
    for relative in ["src", "tests"] {
        let path = manifest_dir.join(relative);
        println!("cargo:rerun-if-changed={}", path.display());
        if path.exists() {
            scan_path(&path, &mut violations);
        }
    }

    if violations.is_empty() {
        return;
    }

    eprintln!("ERROR: lint suppression attributes found in eventsweep:");
    for (file, line, content) in &violations {
        eprintln!("  {}:{}: {}", file.display(), line, content.trim());
    }
    panic!("{} lint suppression attribute(s) are forbidden", violations.len());
}

fn scan_path(path: &Path, violations: &mut Vec<(PathBuf, usize, String)>) {
    if path.is_dir() {
        if path.ends_with("target") {
            return;
        }
        for entry in fs::read_dir(path).expect("read dir") {
            scan_path(&entry.expect("dir entry").path(), violations);
        }
        return;
    }

    if path.extension().map_or(true, |ext| ext != "rs") {
        return;
    }

    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    let needles = [concat!("#[", "allow"), concat!("#![", "allow")];
    for (idx, line) in content.lines().enumerate() {
        if needles.iter().any(|needle| line.contains(needle)) {
            violations.push((path.to_path_buf(), idx + 1, line.to_string()));
        }
    }
}
