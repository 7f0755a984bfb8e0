use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which covers
/// cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Checks that `name` is a single, plain path component.
fn validate_name(name: &str) -> Result<(), StorageError> {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !plain || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Outcome of [`ArtifactManager::finalize`].
#[derive(Debug, Default)]
pub struct FinalizeReport {
    /// Names of the files now in the output area, in input order.
    pub finalized: Vec<String>,
    /// Files that could not be moved, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Filesystem layout for job artifacts.
///
/// ```text
/// <uploads>/<job_id>_<filename>      uploaded input
/// <outputs>/<job_id>/                per-job engine workspace
/// <outputs>/<job_id>_<name>          finalized outputs
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    uploads_dir: PathBuf,
    outputs_dir: PathBuf,
    max_upload_bytes: u64,
}

impl ArtifactManager {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        uploads_dir: P,
        outputs_dir: Q,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            uploads_dir: uploads_dir.as_ref().to_path_buf(),
            outputs_dir: outputs_dir.as_ref().to_path_buf(),
            max_upload_bytes,
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Creates the upload and output areas.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        self.ensure_directory(&self.uploads_dir)?;
        self.ensure_directory(&self.outputs_dir)
    }

    pub fn input_path(&self, job_id: &str, filename: &str) -> PathBuf {
        self.uploads_dir.join(format!("{}_{}", job_id, filename))
    }

    pub fn workspace_path(&self, job_id: &str) -> PathBuf {
        self.outputs_dir.join(job_id)
    }

    /// Path of a finalized output. Rejects anything but a plain file name.
    pub fn output_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.outputs_dir.join(name))
    }

    /// Streams an upload to `<uploads>/<job_id>_<filename>`.
    ///
    /// The file is created exclusively. On a read/write error or when the
    /// upload exceeds the size limit, the partial file is removed.
    pub async fn store_input<R>(
        &self,
        job_id: &str,
        filename: &str,
        reader: R,
    ) -> Result<PathBuf, StorageError>
    where
        R: AsyncRead + Unpin,
    {
        validate_name(filename)?;
        self.ensure_directory(&self.uploads_dir)?;

        let path = self.input_path(job_id, filename);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::FileExists(path.clone())
                } else {
                    StorageError::WriteFile {
                        path: path.clone(),
                        source: e,
                    }
                }
            })?;

        // One byte past the limit is enough to tell an oversized upload apart.
        let mut limited = reader.take(self.max_upload_bytes + 1);
        let result = async {
            let written = tokio::io::copy(&mut limited, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;
        drop(file);

        match result {
            Ok(written) if written > self.max_upload_bytes => {
                remove_quietly(&path);
                Err(StorageError::TooLarge {
                    limit_bytes: self.max_upload_bytes,
                })
            }
            Ok(written) => {
                log::debug!("Stored input {} ({} bytes)", path.display(), written);
                Ok(path)
            }
            Err(e) => {
                remove_quietly(&path);
                Err(StorageError::WriteFile { path, source: e })
            }
        }
    }

    /// Creates an empty workspace for `job_id`, clearing any stale one first.
    pub fn prepare_workspace(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        let workspace = self.workspace_path(job_id);
        if std::fs::symlink_metadata(&workspace).is_ok() {
            log::warn!("Clearing stale workspace {}", workspace.display());
            std::fs::remove_dir_all(&workspace).map_err(|e| StorageError::CreateDirectory {
                path: workspace.clone(),
                source: e,
            })?;
        }
        self.ensure_directory(&workspace)?;
        Ok(workspace)
    }

    /// Files matching `*.<extension>` directly inside `workspace`, sorted.
    pub fn collect_outputs(
        &self,
        workspace: &Path,
        extension: &str,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let pattern = format!(
            "{}/*.{}",
            glob::Pattern::escape(&workspace.to_string_lossy()),
            glob::Pattern::escape(extension)
        );
        let entries = glob::glob(&pattern).map_err(|e| StorageError::Pattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(path),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("Skipping unreadable output entry: {}", e);
                    None
                }
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(StorageError::NoOutputProduced {
                workspace: workspace.to_path_buf(),
                extension: extension.to_string(),
            });
        }
        Ok(files)
    }

    /// Moves engine outputs into the flat output area as `<job_id>_<basename>`.
    ///
    /// Stale files with the same name are never overwritten; a numeric suffix
    /// is added instead. A file that cannot be moved is logged and skipped.
    pub fn finalize(&self, job_id: &str, files: &[PathBuf]) -> FinalizeReport {
        let mut report = FinalizeReport::default();

        if let Err(e) = self.ensure_directory(&self.outputs_dir) {
            log::warn!("Cannot finalize outputs for job {}: {}", job_id, e);
            for file in files {
                report.failed.push((file.clone(), e.redacted()));
            }
            return report;
        }

        for file in files {
            let Some(base) = file.file_name().and_then(|n| n.to_str()) else {
                log::warn!("Skipping output with unusable name: {}", file.display());
                report
                    .failed
                    .push((file.clone(), "unusable file name".to_string()));
                continue;
            };

            let target_name = format!("{}_{}", job_id, base);
            let moved = self
                .resolve_conflict(&self.outputs_dir, &target_name)
                .and_then(|target| move_file(file, &target).map(|_| target));

            match moved {
                Ok(target) => {
                    let name = target
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or(target_name);
                    log::debug!("Finalized {} -> {}", file.display(), name);
                    report.finalized.push(name);
                }
                Err(e) => {
                    log::warn!("Failed to finalize output {}: {}", file.display(), e);
                    report.failed.push((file.clone(), e.redacted()));
                }
            }
        }
        report
    }

    /// Removes the workspace of `job_id`. Best-effort.
    pub fn cleanup_workspace(&self, job_id: &str) {
        let workspace = self.workspace_path(job_id);
        match std::fs::remove_dir_all(&workspace) {
            Ok(()) => log::debug!("Removed workspace {}", workspace.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove workspace {}: {}",
                workspace.display(),
                e
            ),
        }
    }

    /// Deletes every artifact of a job: input, listed outputs and workspace.
    ///
    /// Missing files are not failures; other failures are logged and tolerated.
    pub fn remove(&self, job_id: &str, filename: &str, outputs: &[String]) {
        if validate_name(filename).is_ok() {
            remove_quietly(&self.input_path(job_id, filename));
        }
        for output in outputs {
            match self.output_path(output) {
                Ok(path) => remove_quietly(&path),
                Err(e) => log::warn!("Not removing output of job {}: {}", job_id, e),
            }
        }
        self.cleanup_workspace(job_id);
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Finds an available name in `directory`, appending `_2`, `_3`, ... to
    /// the stem when `filename` is taken.
    fn resolve_conflict(&self, directory: &Path, filename: &str) -> Result<PathBuf, StorageError> {
        let path = directory.join(filename);

        // symlink_metadata also detects broken symlinks
        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(path);
        }

        let (base, ext) = if let Some(dot_pos) = filename.rfind('.') {
            (&filename[..dot_pos], Some(&filename[dot_pos..]))
        } else {
            (filename, None)
        };

        for counter in 2..=1000 {
            let new_filename = match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            };

            let new_path = directory.join(&new_filename);
            if std::fs::symlink_metadata(&new_path).is_err() {
                return Ok(new_path);
            }
        }

        Err(StorageError::FileExists(path))
    }
}
