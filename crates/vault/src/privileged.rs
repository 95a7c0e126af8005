//! Filesystem capability used for paths outside the app's own storage.
//!
//! Paths are validated by [`sanitize_path`] before they reach a
//! [`PrivilegedFs`]; implementations may hand them to a root shell, so
//! anything resembling shell syntax is refused outright rather than escaped.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::PrivilegedError;

/// Characters that are never accepted in a privileged path.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '<', '>', '(', ')', '\'', '"', '\n', '\r', '\0',
];

/// Filesystem operations that may require elevated privileges.
///
/// A failure of the underlying channel is an error, never `false`.
pub trait PrivilegedFs: Send + Sync {
    /// Whether `path` is a directory.
    fn is_directory(&self, path: &Path) -> Result<bool, PrivilegedError>;

    /// Whether `path` exists.
    fn exists(&self, path: &Path) -> Result<bool, PrivilegedError>;

    /// Entries of the directory `path`, sorted.
    fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>, PrivilegedError>;

    /// Removes the file or empty directory at `path`.
    fn delete(&self, path: &Path) -> Result<(), PrivilegedError>;

    /// Sets the permission bits of `path`.
    fn chmod(&self, path: &Path, mode: u32) -> Result<(), PrivilegedError>;
}

/// [`PrivilegedFs`] over the process's own permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl PrivilegedFs for LocalFs {
    fn is_directory(&self, path: &Path) -> Result<bool, PrivilegedError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &Path) -> Result<bool, PrivilegedError> {
        Ok(path.try_exists()?)
    }

    fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>, PrivilegedError> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn delete(&self, path: &Path) -> Result<(), PrivilegedError> {
        if self.is_directory(path)? {
            fs::remove_dir(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn chmod(&self, path: &Path, mode: u32) -> Result<(), PrivilegedError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn chmod(&self, path: &Path, _mode: u32) -> Result<(), PrivilegedError> {
        Err(PrivilegedError::Channel(format!(
            "chmod is not supported on this platform: {}",
            path.display()
        )))
    }
}

/// Validates a user-supplied path before it is used with elevated
/// privileges.
///
/// The path must be absolute, free of `..` components and free of shell
/// metacharacters.
pub fn sanitize_path(raw: &str) -> Result<PathBuf, PrivilegedError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PrivilegedError::UnsafePath("empty path".to_string()));
    }
    if let Some(c) = trimmed.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(PrivilegedError::UnsafePath(format!(
            "{:?} contains {:?}",
            trimmed, c
        )));
    }

    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(PrivilegedError::UnsafePath(format!("{trimmed:?} is not absolute")));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(PrivilegedError::UnsafePath(format!(
            "{trimmed:?} contains a parent directory component"
        )));
    }
    Ok(path.to_path_buf())
}

/// Resolves a database file path, refusing unsafe paths and directories.
pub fn resolve_database_path(
    fs: &dyn PrivilegedFs,
    raw: &str,
) -> Result<PathBuf, PrivilegedError> {
    let path = sanitize_path(raw)?;
    if fs.is_directory(&path)? {
        return Err(PrivilegedError::IsDirectory(path.display().to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_injected_command() {
        let result = sanitize_path("/sdcard/fake.db; uname -a > /sdcard/system_info.txt; echo");
        assert!(matches!(result, Err(PrivilegedError::UnsafePath(_))));
    }

    #[test]
    fn test_rejects_metacharacters() {
        for raw in [
            "/data/a|b",
            "/data/a&b",
            "/data/$(id)",
            "/data/`id`",
            "/data/a'b",
            "/data/a\"b",
            "/data/a\nb",
            "/data/a>b",
        ] {
            assert!(sanitize_path(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_rejects_relative_and_traversal() {
        assert!(sanitize_path("relative/db.sqlite").is_err());
        assert!(sanitize_path("/data/../etc/shadow").is_err());
        assert!(sanitize_path("   ").is_err());
    }

    #[test]
    fn test_accepts_plain_absolute_path() {
        let path = sanitize_path("  /data/data/app/databases/explorer.db ").unwrap();
        assert_eq!(path, PathBuf::from("/data/data/app/databases/explorer.db"));
    }

    #[test]
    fn test_resolve_database_path_refuses_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().to_str().unwrap();

        assert!(matches!(
            resolve_database_path(&LocalFs, dir),
            Err(PrivilegedError::IsDirectory(_))
        ));

        let file = temp_dir.path().join("vault.db");
        let resolved = resolve_database_path(&LocalFs, file.to_str().unwrap()).unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn test_local_fs_operations() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, "x").unwrap();
        let fs_cap = LocalFs;

        assert!(fs_cap.exists(&file).unwrap());
        assert!(!fs_cap.is_directory(&file).unwrap());
        assert!(fs_cap.is_directory(temp_dir.path()).unwrap());
        assert_eq!(fs_cap.list_directory(temp_dir.path()).unwrap(), vec![file.clone()]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs_cap.chmod(&file, 0o600).unwrap();
            let mode = fs::metadata(&file).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        fs_cap.delete(&file).unwrap();
        assert!(!fs_cap.exists(&file).unwrap());
    }

    #[test]
    fn test_listing_missing_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            LocalFs.list_directory(&missing),
            Err(PrivilegedError::NotFound(_))
        ));
    }
}
