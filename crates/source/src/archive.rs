use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flate2::{Compression, write::GzEncoder};

/// Top-level entries with this prefix are repository metadata and never packaged.
const EXCLUDED_PREFIX: &str = ".git";

pub fn archive_name(repo_name: &str, target_branch: &str) -> String {
    format!("{repo_name}_{}.tar.gz", target_branch.replace('/', "-"))
}

/// Write a gzipped tarball of `source` to `dest`, entries relative to `source`.
pub async fn create_archive(source: &Path, dest: &Path) -> Result<()> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || write_archive(&source, &dest))
        .await
        .context("Archive task panicked")?
}

fn write_archive(source: &Path, dest: &Path) -> Result<()> {
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    for entry in
        std::fs::read_dir(source).with_context(|| format!("Failed to read {}", source.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(EXCLUDED_PREFIX) {
            entries.push((name, entry.path()));
        }
    }
    entries.sort();

    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    for (name, path) in &entries {
        if path.is_dir() {
            builder.append_dir_all(name, path)
        } else {
            builder.append_path_with_name(path, name)
        }
        .with_context(|| format!("Failed to archive {}", path.display()))?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}
