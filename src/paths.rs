use std::path::{Path, PathBuf};

use stacked_errors::{bail, Result, StackableErr};
use tokio::fs;

/// Canonicalizes and checks the existence of a file path. Also adds on better
/// information to errors.
///
/// Note: this does not prevent TOCTOU bugs.
pub async fn acquire_file_path(file_path_str: impl AsRef<Path>) -> Result<PathBuf> {
    let file_path_str = file_path_str.as_ref();
    let path = fs::canonicalize(file_path_str)
        .await
        .stack_err_with(|| format!("acquire_file_path(file_path_str: {file_path_str:?})"))?;
    if !path.is_file() {
        bail!("acquire_file_path(file_path_str: {file_path_str:?}) -> is not a file")
    }
    Ok(path)
}

/// Canonicalizes and checks the existence of a directory path. Also adds on
/// better information to errors.
///
/// Note: this does not prevent TOCTOU bugs.
pub async fn acquire_dir_path(dir_path_str: impl AsRef<Path>) -> Result<PathBuf> {
    let dir_path_str = dir_path_str.as_ref();
    let path = fs::canonicalize(dir_path_str)
        .await
        .stack_err_with(|| format!("acquire_dir_path(dir_path_str: {dir_path_str:?})"))?;
    if !path.is_dir() {
        bail!("acquire_dir_path(dir_path_str: {dir_path_str:?}) -> is not a directory")
    }
    Ok(path)
}

/// Adds the execute bits for everyone who can read the file, like `chmod +x`
/// does with the default umask. This is a no-op on platforms without unix
/// permissions.
pub async fn make_executable(file_path: impl AsRef<Path>) -> Result<()> {
    let path = acquire_file_path(file_path).await.stack()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(&path)
            .await
            .stack_err_with(|| format!("make_executable -> could not read metadata of {path:?}"))?
            .permissions();
        let mode = permissions.mode();
        // copy each read bit into the matching execute bit
        let with_execute = mode | ((mode & 0o444) >> 2);
        if with_execute != mode {
            permissions.set_mode(with_execute);
            fs::set_permissions(&path, permissions)
                .await
                .stack_err_with(|| {
                    format!("make_executable -> could not set permissions of {path:?}")
                })?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
