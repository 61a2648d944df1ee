//! Diagnostic listing of attached input devices.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

/// The stable symlink names under `dir` — the identifiers users put in their
/// configuration.
pub fn device_names(dir: &Path) -> Result<Vec<String>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let is_symlink = entry
            .file_type()
            .map(|file_type| file_type.is_symlink())
            .unwrap_or(false);
        if is_symlink {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Print the device listing for the CLI.
pub fn print_devices(dir: &Path) -> Result<()> {
    println!("{} ({}):", "devices".bold(), dir.display());
    for name in device_names(dir)? {
        println!("  {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lists_only_symlinks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("event9"), b"").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("event9"),
            dir.path().join("usb-1a86_e026-event-kbd"),
        )
        .unwrap();

        let names = device_names(dir.path()).unwrap();
        assert_eq!(names, vec!["usb-1a86_e026-event-kbd".to_string()]);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(device_names(&dir.path().join("nope")).is_err());
    }
}
