//! Archive decompressors.
//!
//! Archives are extracted as is: a single top-level directory inside the
//! archive is kept, not unwrapped. Entries whose path would land outside the
//! destination are rejected.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::error::{Result, VendorError};
use crate::metrics::METRICS;

/// Supported archive layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    /// Single gzip-compressed file.
    Gz,
    Bz2,
    Xz,
}

/// Extension table used by the default fetcher configuration.
pub const DEFAULT_DECOMPRESSORS: &[(&str, ArchiveFormat)] = &[
    ("zip", ArchiveFormat::Zip),
    ("tar", ArchiveFormat::Tar),
    ("tar.gz", ArchiveFormat::TarGz),
    ("tgz", ArchiveFormat::TarGz),
    ("tar.bz2", ArchiveFormat::TarBz2),
    ("tbz2", ArchiveFormat::TarBz2),
    ("tar.xz", ArchiveFormat::TarXz),
    ("txz", ArchiveFormat::TarXz),
    ("gz", ArchiveFormat::Gz),
    ("bz2", ArchiveFormat::Bz2),
    ("xz", ArchiveFormat::Xz),
];

/// Pick the format whose extension is the longest suffix of `name`.
pub fn format_for_name<'a, I>(name: &str, table: I) -> Option<ArchiveFormat>
where
    I: IntoIterator<Item = &'a (String, ArchiveFormat)>,
{
    let lower = name.to_ascii_lowercase();
    table
        .into_iter()
        .filter(|(ext, _)| lower.ends_with(&format!(".{ext}")))
        .max_by_key(|(ext, _)| ext.len())
        .map(|(_, format)| *format)
}

/// Look `ext` up exactly, as given in an `archive=` query parameter.
pub fn format_for_extension<'a, I>(ext: &str, table: I) -> Option<ArchiveFormat>
where
    I: IntoIterator<Item = &'a (String, ArchiveFormat)>,
{
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    table
        .into_iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, format)| *format)
}

/// Extract `bytes` into `dest`. `name` is the archive's file name; single
/// file formats write their output under it minus the compression suffix.
pub fn extract(format: ArchiveFormat, bytes: &[u8], name: &str, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| VendorError::fs(dest, e))?;
    match format {
        ArchiveFormat::Zip => extract_zip(bytes, dest)?,
        ArchiveFormat::Tar => extract_tar(bytes, dest)?,
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(bytes), dest)?,
        ArchiveFormat::TarBz2 => extract_tar(BzDecoder::new(bytes), dest)?,
        ArchiveFormat::TarXz => extract_tar(XzDecoder::new(bytes), dest)?,
        ArchiveFormat::Gz => write_single(GzDecoder::new(bytes), name, "gz", dest)?,
        ArchiveFormat::Bz2 => write_single(BzDecoder::new(bytes), name, "bz2", dest)?,
        ArchiveFormat::Xz => write_single(XzDecoder::new(bytes), name, "xz", dest)?,
    }
    METRICS.inc_archives_extracted();
    Ok(())
}

fn ensure_enclosed(path: &Path) -> Result<()> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(VendorError::Fetch(format!(
            "archive entry {} escapes the destination",
            path.display()
        )));
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        ensure_enclosed(&path)?;
        entry.unpack_in(dest)?;
    }
    Ok(())
}

fn extract_zip(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let rel: PathBuf = file.enclosed_name().ok_or_else(|| {
            VendorError::Fetch(format!(
                "archive entry {} escapes the destination",
                file.name()
            ))
        })?;
        let out = dest.join(rel);

        if file.is_dir() {
            fs::create_dir_all(&out).map_err(|e| VendorError::fs(&out, e))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| VendorError::fs(parent, e))?;
        }
        let mut writer = fs::File::create(&out).map_err(|e| VendorError::fs(&out, e))?;
        io::copy(&mut file, &mut writer).map_err(|e| VendorError::fs(&out, e))?;
        if let Some(mode) = file.unix_mode() {
            set_mode(&out, mode)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| VendorError::fs(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn write_single<R: Read>(mut reader: R, name: &str, ext: &str, dest: &Path) -> Result<()> {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name
        .strip_suffix(&format!(".{ext}"))
        .unwrap_or(&file_name);
    if stem.is_empty() {
        return Err(VendorError::Fetch(format!(
            "cannot name decompressed output of {name:?}"
        )));
    }
    let out = dest.join(stem);
    let mut writer = fs::File::create(&out).map_err(|e| VendorError::fs(&out, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| VendorError::fs(&out, e))?;
    Ok(())
}
