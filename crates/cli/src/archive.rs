//! Project zipping for submission.

use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;

/// Build an in-memory zip of `project_dir`. Hidden files and directories,
/// `__pycache__`, and `target` trees are left out; everything else goes in
/// with paths relative to the project root.
pub fn create_project_zip(project_dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    add_dir(&mut writer, project_dir, project_dir, options)?;

    let cursor = writer.finish().map_err(std::io::Error::other)?;
    Ok(cursor.into_inner())
}

fn skip(name: &str) -> bool {
    name.starts_with('.') || name == "__pycache__" || name == "target"
}

fn add_dir(
    writer: &mut zip::ZipWriter<Cursor<Vec<u8>>>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if skip(name) {
            continue;
        }

        let path = entry.path();
        if path.is_dir() {
            add_dir(writer, root, &path, options)?;
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .map_err(std::io::Error::other)?
            .to_string_lossy()
            .replace('\\', "/");

        writer
            .start_file(relative, options)
            .map_err(std::io::Error::other)?;
        let mut file = std::fs::File::open(&path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        writer.write_all(&contents)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_in_zip(bytes: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn zips_the_tree_relative_to_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "pytest\n").unwrap();
        std::fs::create_dir_all(tmp.path().join("tests")).unwrap();
        std::fs::write(tmp.path().join("tests/test_x.py"), "def test(): pass\n").unwrap();

        let bytes = create_project_zip(tmp.path()).unwrap();
        let names = names_in_zip(&bytes);
        assert!(names.contains(&"requirements.txt".to_string()));
        assert!(names.contains(&"tests/test_x.py".to_string()));
    }

    #[test]
    fn hidden_and_cache_trees_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "pytest\n").unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir_all(tmp.path().join("__pycache__")).unwrap();
        std::fs::write(tmp.path().join("__pycache__/m.pyc"), "x").unwrap();
        std::fs::create_dir_all(tmp.path().join("target/debug")).unwrap();
        std::fs::write(tmp.path().join("target/debug/bin"), "x").unwrap();
        std::fs::write(tmp.path().join(".env"), "SECRET=1").unwrap();

        let bytes = create_project_zip(tmp.path()).unwrap();
        let names = names_in_zip(&bytes);
        assert_eq!(names, vec!["requirements.txt".to_string()]);
    }

    #[test]
    fn round_trips_file_contents() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "pytest==8.0\n").unwrap();

        let bytes = create_project_zip(tmp.path()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name("requirements.txt").unwrap();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "pytest==8.0\n");
    }
}
