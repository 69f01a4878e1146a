use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use zip::write::FileOptions;

use super::MANIFEST_FILE;

/// Zip the top-level files of bundle directory `dir` into `out_path`.
pub fn pack_bundle(dir: &Path, out_path: &Path) -> anyhow::Result<usize> {
    if !dir.join(MANIFEST_FILE).is_file() {
        anyhow::bail!("not a bundle directory (missing {}): {}", MANIFEST_FILE, dir.display());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let zip_file = File::create(out_path)?;
    let mut zip = zip::ZipWriter::new(zip_file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for name in &names {
        zip.start_file(name.as_str(), options)?;
        let mut src = File::open(dir.join(name))?;
        io::copy(&mut src, &mut zip)?;
    }

    let mut zip_file = zip.finish()?;
    zip_file.flush()?;
    tracing::debug!(dir = %dir.display(), files = names.len(), "Packed bundle");
    Ok(names.len())
}

/// Extract a packed bundle into `out_dir`.
pub fn unpack_bundle(archive_path: &Path, out_dir: &Path, overwrite: bool) -> anyhow::Result<()> {
    if out_dir.exists() && !out_dir.is_dir() {
        anyhow::bail!("output path is not a directory: {}", out_dir.display());
    }
    if out_dir.join(MANIFEST_FILE).exists() && !overwrite {
        anyhow::bail!(
            "refusing to overwrite existing bundle in {} (pass --overwrite to replace)",
            out_dir.display()
        );
    }
    std::fs::create_dir_all(out_dir)?;

    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    if archive.by_name(MANIFEST_FILE).is_err() {
        anyhow::bail!("archive has no {}: {}", MANIFEST_FILE, archive_path.display());
    }
    archive.extract(out_dir)?;
    Ok(())
}
