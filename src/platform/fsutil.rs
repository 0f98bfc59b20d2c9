//! Small filesystem utilities.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{SimtestError, SimtestResult};

/// Files under `root` whose root-relative path matches any pattern, sorted.
pub fn find_matching_files(root: &Path, patterns: &[String]) -> SimtestResult<Vec<PathBuf>> {
    let set = compile_globset(patterns)?;
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let msg = e.to_string();
            SimtestError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other(msg)),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.path();
        let rel = p.strip_prefix(root).unwrap_or(p);
        if set.is_match(rel) {
            out.push(rel.to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}

fn compile_globset(patterns: &[String]) -> SimtestResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p)
            .map_err(|e| SimtestError::InvalidArgument(format!("invalid glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| SimtestError::InvalidArgument(format!("invalid globset: {e}")))
}

/// Whole-file replace through a sibling temp file and `rename`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> SimtestResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("simtest.json");
    let tmp_path = parent.join(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        uuid::Uuid::new_v4()
    ));
    std::fs::write(&tmp_path, bytes)?;
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

pub fn write_json_atomic(path: &Path, value: &impl Serialize) -> SimtestResult<()> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

/// Exclusive writer lock: `<target>.lock` created with `create_new`, removed on drop.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    pub fn acquire(target: &Path) -> SimtestResult<Self> {
        let lock_path = PathBuf::from(format!("{}.lock", target.to_string_lossy()));
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                use std::io::Write as _;
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { lock_path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SimtestError::Baseline(format!(
                    "another writer holds {} (remove it if no simtest process is running)",
                    lock_path.display()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}
