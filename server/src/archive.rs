/*
 * Copyright 2023 Oxide Computer Company
 */

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::ZipWriter;

/**
 * Packs every file under `scratch_dir` into a zip at `dest`, preserving
 * the relative directory structure. The deflate work is CPU-bound, so
 * callers run this through `tokio::task::spawn_blocking` rather than
 * awaiting it directly on the reactor.
 */
pub(crate) fn build_zip(scratch_dir: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("creating archive at {dest:?}"))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut buf = Vec::new();
    for entry in walkdir::WalkDir::new(scratch_dir) {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(scratch_dir).unwrap();
        if rel.as_os_str().is_empty() {
            continue;
        }

        let name = rel.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else {
            zip.start_file(name, options)?;
            buf.clear();
            let mut f = File::open(path)?;
            std::io::copy(&mut f, &mut buf)?;
            zip.write_all(&buf)?;
        }
    }

    zip.finish()?;
    Ok(())
}

pub(crate) fn zip_path_for(scratch_dir: &Path) -> PathBuf {
    let mut p = scratch_dir.as_os_str().to_owned();
    p.push(".zip");
    PathBuf::from(p)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn zips_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("scratch");
        fs::create_dir_all(scratch.join("sub")).unwrap();
        fs::write(scratch.join("a.txt"), b"hello").unwrap();
        fs::write(scratch.join("sub/b.txt"), b"world").unwrap();

        let dest = zip_path_for(&scratch);
        build_zip(&scratch, &dest).unwrap();

        let f = File::open(&dest).unwrap();
        let mut archive = zip::ZipArchive::new(f).unwrap();
        let names: Vec<_> =
            (0..archive.len()).map(|i| archive.by_index(i).unwrap().name().to_string()).collect();
        assert!(names.iter().any(|n| n == "a.txt"));
        assert!(names.iter().any(|n| n == "sub/b.txt"));
    }
}
