//! Ensures all workspace crates use `version.workspace = true` and that
//! the workspace version is consistent across all Cargo.toml files.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("workspace root")
        .to_path_buf()
}

/// Read the workspace version from the root Cargo.toml.
fn workspace_version() -> String {
    let root_toml =
        std::fs::read_to_string(workspace_root().join("Cargo.toml")).expect("root Cargo.toml");
    let doc: toml::Value = root_toml.parse().expect("parse root Cargo.toml");
    doc["workspace"]["package"]["version"]
        .as_str()
        .expect("workspace.package.version")
        .to_string()
}

fn uses_workspace_version(manifest_dir: &Path) -> bool {
    let toml_str =
        std::fs::read_to_string(manifest_dir.join("Cargo.toml")).expect("crate Cargo.toml");
    let doc: toml::Value = toml_str.parse().expect("parse crate Cargo.toml");
    doc.get("package")
        .and_then(|pkg| pkg.get("version"))
        .and_then(|v| v.as_table())
        .and_then(|t| t.get("workspace"))
        .and_then(|v| v.as_bool())
        == Some(true)
}

#[test]
fn all_crates_use_workspace_version() {
    let root = workspace_root();
    for krate in [
        "crates/quayside-core",
        "crates/quayside-cli",
        "crates/quayside-state",
    ] {
        assert!(
            uses_workspace_version(&root.join(krate)),
            "{} should use version.workspace = true",
            krate
        );
    }
}

#[test]
fn workspace_version_matches_cargo_pkg() {
    assert_eq!(workspace_version(), env!("CARGO_PKG_VERSION"));
    assert_eq!(quayside_core::VERSION, env!("CARGO_PKG_VERSION"));
}
