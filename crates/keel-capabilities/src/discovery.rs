//! Filesystem capsule discovery.
//!
//! Walks a directory tree for `CAPSULE.md` files, skipping hidden
//! directories. Per-file problems (unreadable, oversized, missing id) are
//! collected as scan errors and never abort the scan; one broken capsule
//! must not hide the rest.

use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use keel_core::ids::ManifestId;

use crate::loader::{CapabilityManifest, ReferenceFile};
use crate::parser::{fallback_trigger, parse_capsule};

/// Capsule manifest filename.
pub const CAPSULE_FILENAME: &str = "CAPSULE.md";

/// Largest CAPSULE.md the scanner will read.
pub const MAX_CAPSULE_FILE_SIZE: u64 = 1024 * 1024;

/// A non-fatal problem found while scanning one capsule.
#[derive(Debug, Clone)]
pub struct ScanError {
    /// Path of the offending file.
    pub path: String,
    /// What went wrong.
    pub message: String,
}

/// Result of scanning one directory tree.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Discovered manifests, in traversal order.
    pub manifests: Vec<CapabilityManifest>,
    /// Per-file problems encountered along the way.
    pub errors: Vec<ScanError>,
}

/// Scan a directory tree for capsule manifests.
///
/// A nonexistent root yields an empty report, not an error.
#[must_use]
pub fn scan_capsules(root: &Path) -> ScanReport {
    let mut report = ScanReport::default();

    if !root.is_dir() {
        return report;
    }

    let walk = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry.path()));

    for entry in walk {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "Capsule scan could not enter a directory");
                report.errors.push(ScanError {
                    path: err
                        .path()
                        .map_or_else(String::new, |p| p.display().to_string()),
                    message: err.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() || entry.file_name() != CAPSULE_FILENAME {
            continue;
        }

        match load_manifest(entry.path()) {
            Ok(manifest) => {
                debug!(id = %manifest.id, path = %entry.path().display(), "Discovered capsule");
                report.manifests.push(manifest);
            }
            Err(error) => {
                warn!(path = %error.path, message = %error.message, "Skipping capsule");
                report.errors.push(error);
            }
        }
    }

    report
}

/// Load one capsule file into a manifest (header only resident).
fn load_manifest(capsule_path: &Path) -> Result<CapabilityManifest, ScanError> {
    let path_str = capsule_path.display().to_string();

    let metadata = std::fs::metadata(capsule_path).map_err(|e| ScanError {
        path: path_str.clone(),
        message: format!("failed to stat: {e}"),
    })?;
    if metadata.len() > MAX_CAPSULE_FILE_SIZE {
        return Err(ScanError {
            path: path_str,
            message: format!(
                "file too large: {} bytes (max {MAX_CAPSULE_FILE_SIZE})",
                metadata.len()
            ),
        });
    }

    let raw = std::fs::read_to_string(capsule_path).map_err(|e| ScanError {
        path: path_str.clone(),
        message: format!("failed to read: {e}"),
    })?;
    let parsed = parse_capsule(&raw);

    let Some(id) = parsed.header.id else {
        return Err(ScanError {
            path: path_str,
            message: "header is missing the required 'id' field".to_string(),
        });
    };

    let trigger_description = parsed
        .header
        .trigger
        .unwrap_or_else(|| fallback_trigger(&parsed.body));

    let dir = capsule_path.parent().unwrap_or(Path::new("."));
    let mut size_bytes = metadata.len();
    let mut references = Vec::new();
    for name in parsed.header.references {
        let ref_path = dir.join(&name);
        // Declared-but-missing references stay listed; promotion reports
        // the I/O failure if they are ever requested.
        if let Ok(meta) = std::fs::metadata(&ref_path) {
            size_bytes += meta.len();
        }
        references.push(ReferenceFile {
            name,
            path: ref_path,
        });
    }

    Ok(CapabilityManifest {
        id: ManifestId::from(id),
        trigger_description,
        capsule_path: capsule_path.to_path_buf(),
        references,
        size_bytes,
    })
}

/// Hidden path component check (dot-prefixed, excluding `.` / `..`).
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n != "." && n != "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_capsule(root: &Path, dir: &str, content: &str) {
        let capsule_dir = root.join(dir);
        fs::create_dir_all(&capsule_dir).unwrap();
        fs::write(capsule_dir.join(CAPSULE_FILENAME), content).unwrap();
    }

    #[test]
    fn test_scan_nonexistent_root_is_empty() {
        let report = scan_capsules(Path::new("/nonexistent/keel"));
        assert!(report.manifests.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_scan_finds_nested_capsules() {
        let tmp = TempDir::new().unwrap();
        write_capsule(
            tmp.path(),
            "pdf",
            "---\nid: pdf-tools\ntrigger: PDF files\n---\nBody",
        );
        write_capsule(
            tmp.path(),
            "nested/deeper/sheets",
            "---\nid: sheets\ntrigger: spreadsheets\n---\nBody",
        );

        let report = scan_capsules(tmp.path());
        assert_eq!(report.manifests.len(), 2);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_scan_skips_hidden_directories() {
        let tmp = TempDir::new().unwrap();
        write_capsule(tmp.path(), ".git/objects", "---\nid: sneaky\n---\nBody");

        let report = scan_capsules(tmp.path());
        assert!(report.manifests.is_empty());
    }

    #[test]
    fn test_missing_id_is_a_scan_error_not_fatal() {
        let tmp = TempDir::new().unwrap();
        write_capsule(tmp.path(), "broken", "---\ntrigger: no id\n---\nBody");
        write_capsule(tmp.path(), "ok", "---\nid: ok\ntrigger: fine\n---\nBody");

        let report = scan_capsules(tmp.path());
        assert_eq!(report.manifests.len(), 1);
        assert_eq!(report.manifests[0].id.as_str(), "ok");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("'id'"));
    }

    #[test]
    fn test_oversized_capsule_is_a_scan_error() {
        let tmp = TempDir::new().unwrap();
        let big = format!(
            "---\nid: big\n---\n{}",
            "x".repeat(MAX_CAPSULE_FILE_SIZE as usize)
        );
        write_capsule(tmp.path(), "big", &big);

        let report = scan_capsules(tmp.path());
        assert!(report.manifests.is_empty());
        assert!(report.errors[0].message.contains("too large"));
    }

    #[test]
    fn test_trigger_falls_back_to_first_body_line() {
        let tmp = TempDir::new().unwrap();
        write_capsule(
            tmp.path(),
            "untitled",
            "---\nid: untitled\n---\n# Heading\n\nDoes the thing.",
        );

        let report = scan_capsules(tmp.path());
        assert_eq!(report.manifests[0].trigger_description, "Does the thing.");
    }

    #[test]
    fn test_references_resolved_relative_to_capsule_dir() {
        let tmp = TempDir::new().unwrap();
        write_capsule(
            tmp.path(),
            "pdf",
            "---\nid: pdf\ntrigger: pdf\nreferences: [forms.md]\n---\nBody",
        );
        fs::write(tmp.path().join("pdf/forms.md"), "form reference text").unwrap();

        let report = scan_capsules(tmp.path());
        let manifest = &report.manifests[0];
        assert_eq!(manifest.references.len(), 1);
        assert_eq!(manifest.references[0].name, "forms.md");
        assert!(manifest.references[0].path.ends_with("pdf/forms.md"));
        // Reference bytes count toward the manifest's declared size.
        assert!(manifest.size_bytes > fs::metadata(&manifest.capsule_path).unwrap().len());
    }
}
