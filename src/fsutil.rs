// src/fsutil.rs

//! Filesystem helpers for staging and overlaying feature-pack content.
//!
//! All copies here preserve symlinks as symlinks and replace existing
//! destination entries, which is what gives overlay passes their
//! later-wins semantics.

use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Recursively copy `src` into `dst`, creating `dst` if needed.
///
/// Existing files and symlinks under `dst` are replaced; existing
/// directories are merged. Symlinks are recreated, not followed.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| Error::copy(src, dst, e))?;

    for entry in fs::read_dir(src).map_err(|e| Error::read(src, e))? {
        let entry = entry.map_err(|e| Error::read(src, e))?;
        let file_type = entry.file_type().map_err(|e| Error::read(entry.path(), e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path).map_err(|e| Error::read(&src_path, e))?;
            remove_if_present(&dst_path)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &dst_path)
                .map_err(|e| Error::copy(&src_path, &dst_path, e))?;
            #[cfg(not(unix))]
            return Err(Error::copy(
                &src_path,
                &dst_path,
                std::io::Error::new(std::io::ErrorKind::Unsupported, "symlink"),
            ));
        } else if file_type.is_dir() {
            if dst_path.symlink_metadata().is_ok() && !dst_path.is_dir() {
                remove_if_present(&dst_path)?;
            }
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            remove_if_present(&dst_path)?;
            fs::copy(&src_path, &dst_path).map_err(|e| Error::copy(&src_path, &dst_path, e))?;
        }
    }

    Ok(())
}

/// Copy `src` into `dst` only when `src` exists; missing sources are a no-op.
pub fn copy_dir_if_present(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir_all(src, dst)?;
    }
    Ok(())
}

/// Remove whatever sits at `path`, if anything.
fn remove_if_present(path: &Path) -> Result<()> {
    // symlink_metadata so dangling links are seen too
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(|e| Error::write(path, e))?,
        Ok(_) => fs::remove_file(path).map_err(|e| Error::write(path, e))?,
        Err(_) => {}
    }
    Ok(())
}

/// Remove a directory tree if it exists and recreate it empty.
pub fn recreate_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| Error::write(path, e))?;
    }
    fs::create_dir_all(path).map_err(|e| Error::write(path, e))?;
    Ok(())
}

/// Create a directory and any missing parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::write(path, e))?;
    Ok(())
}

/// SHA-256 of a file's contents, hex encoded.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| Error::read(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::read(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Turn an identity string into a filesystem-safe directory name.
pub fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
