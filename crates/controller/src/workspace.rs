//! Scratch workspaces: extraction of stashed submission zips into
//! per-job directories under the configured scratch root.
//!
//! Directory names are a deterministic function of the job id, so a pass
//! after a crash can still find and remove the workspaces of terminal jobs.

use std::io;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, warn};

use crate::error::{ControllerError, Result};

/// The dependency manifest every submission must carry.
const MANIFEST: &str = "requirements.txt";

fn scratch_prefix(job_id: &str) -> String {
    format!("kiln-job-{job_id}-")
}

/// Extract the stashed zip for `job_id` into a fresh directory under
/// `scratch_root` and return its path.
///
/// Entries with absolute paths or `..` components are rejected outright, as
/// is an archive without a `requirements.txt` at its top level. The returned
/// directory is deliberately not self-deleting: it must outlive this process
/// because the container mounts it. Terminal-job cleanup removes it.
pub async fn extract_submission(
    scratch_root: &Path,
    job_id: &str,
    zip_path: &str,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(scratch_root).await?;

    let scratch_root = scratch_root.to_path_buf();
    let prefix = scratch_prefix(job_id);
    let zip_path = zip_path.to_string();

    // Archive I/O is synchronous; keep it off the runtime workers.
    task::spawn_blocking(move || -> Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&scratch_root)?;

        let file = std::fs::File::open(&zip_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let Some(relative) = entry.enclosed_name() else {
                return Err(ControllerError::InvalidSubmission(format!(
                    "unsafe path in archive: {}",
                    entry.name()
                )));
            };

            let dest = dir.path().join(relative);
            if entry.is_dir() {
                std::fs::create_dir_all(&dest)?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&dest)?;
            io::copy(&mut entry, &mut out)?;
        }

        if !dir.path().join(MANIFEST).exists() {
            return Err(ControllerError::InvalidSubmission(format!(
                "{MANIFEST} not found in project"
            )));
        }

        Ok(dir.keep())
    })
    .await
    .map_err(|e| ControllerError::Other(anyhow::anyhow!("extraction task failed: {e}")))?
}

/// Remove any scratch directories belonging to `job_id`. Used by
/// terminal-job cleanup; also recovers directories leaked by a crash.
pub async fn sweep_scratch(scratch_root: &Path, job_id: &str) -> Result<()> {
    let prefix = scratch_prefix(job_id);

    let mut entries = match tokio::fs::read_dir(scratch_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) {
            continue;
        }
        debug!("Removing scratch directory {:?}", entry.path());
        if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
            warn!("Failed to remove scratch directory {:?}: {}", entry.path(), e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(dir: &Path, entries: &[(&str, &str)]) -> String {
        let path = dir.join("submission.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn extracts_a_project_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = write_zip(
            tmp.path(),
            &[
                ("requirements.txt", "pytest\n"),
                ("src/app.py", "def add(a, b):\n    return a + b\n"),
                ("tests/test_app.py", "def test_add():\n    assert True\n"),
            ],
        );

        let scratch = tmp.path().join("scratch");
        let workspace = extract_submission(&scratch, "job-1", &zip).await.unwrap();

        assert!(workspace.join("requirements.txt").is_file());
        assert!(workspace.join("src/app.py").is_file());
        assert!(workspace.join("tests/test_app.py").is_file());
        assert!(workspace.starts_with(&scratch));
    }

    #[tokio::test]
    async fn rejects_parent_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = write_zip(
            tmp.path(),
            &[("requirements.txt", "pytest\n"), ("../evil.txt", "boom")],
        );

        let scratch = tmp.path().join("scratch");
        let err = extract_submission(&scratch, "job-1", &zip)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSubmission(_)));
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn rejects_missing_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = write_zip(tmp.path(), &[("tests/test_app.py", "def test(): pass\n")]);

        let scratch = tmp.path().join("scratch");
        let err = extract_submission(&scratch, "job-1", &zip)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn sweep_removes_only_matching_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("scratch");
        std::fs::create_dir_all(scratch.join("kiln-job-aaa-x1")).unwrap();
        std::fs::create_dir_all(scratch.join("kiln-job-bbb-x2")).unwrap();

        sweep_scratch(&scratch, "aaa").await.unwrap();

        assert!(!scratch.join("kiln-job-aaa-x1").exists());
        assert!(scratch.join("kiln-job-bbb-x2").exists());

        // Sweeping a root that never existed is fine.
        sweep_scratch(&tmp.path().join("nope"), "aaa").await.unwrap();
    }
}
