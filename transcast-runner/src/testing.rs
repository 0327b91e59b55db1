//! Test helpers: shell scripts standing in for external binaries

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Writes an executable `/bin/sh` script and returns its path
pub fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}
