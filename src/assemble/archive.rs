//! Zip an episode directory into a sibling archive.

use crate::assemble::AssembleError;
use crate::download::write_via_part;
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AssembleError + '_ {
    move |source| AssembleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Regular files directly under `dir`, sorted by name, excluding in-progress `.part` files.
fn archive_entries(dir: &Path) -> Result<Vec<PathBuf>, AssembleError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err(dir))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) != Some("part"))
        .collect();
    files.sort();
    Ok(files)
}

fn write_zip(tmp: &Path, folder: &str, files: &[PathBuf]) -> Result<(), AssembleError> {
    let file = File::create(tmp).map_err(io_err(tmp))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = if folder.is_empty() {
            name
        } else {
            format!("{}/{}", folder, name)
        };
        zip.start_file(entry, options)?;
        let mut src = File::open(path).map_err(io_err(path))?;
        std::io::copy(&mut src, &mut zip).map_err(io_err(path))?;
    }
    zip.finish()?;
    Ok(())
}

/// Write `dir`'s files into `out` under a folder named after `dir`. Returns the number of
/// entries, or `Ok(None)` without creating `out` when the directory has no files.
pub(crate) fn zip_directory(dir: &Path, out: &Path) -> Result<Option<usize>, AssembleError> {
    let files = archive_entries(dir)?;
    if files.is_empty() {
        return Ok(None);
    }
    let folder = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    write_via_part(out, |tmp| write_zip(tmp, &folder, &files), io_err(out))?;
    Ok(Some(files.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn zips_sorted_files_under_episode_folder() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("001-Ep");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("002.jpg"), b"two").unwrap();
        std::fs::write(dir.join("001.jpg"), b"one").unwrap();
        std::fs::write(dir.join("003.jpg.part"), b"partial").unwrap();
        let out = root.path().join("001-Ep.zip");

        assert_eq!(zip_directory(&dir, &out).unwrap(), Some(2));

        let mut archive = zip::ZipArchive::new(File::open(&out).unwrap()).unwrap();
        let names: Vec<String> = archive.file_names().map(String::from).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["001-Ep/001.jpg", "001-Ep/002.jpg"]);
        let mut body = String::new();
        archive
            .by_name("001-Ep/002.jpg")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "two");
        assert!(!root.path().join("001-Ep.zip.part").exists());
    }

    #[test]
    fn empty_directory_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("empty");
        std::fs::create_dir(&dir).unwrap();
        let out = root.path().join("empty.zip");
        assert_eq!(zip_directory(&dir, &out).unwrap(), None);
        assert!(!out.exists());
    }
}
