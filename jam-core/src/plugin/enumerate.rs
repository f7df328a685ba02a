//! Candidate library enumeration.

use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::DiscoveryError;

/// File extension of native libraries on this platform.
#[cfg(target_os = "macos")]
pub const LIBRARY_EXTENSION: &str = ".dylib";
#[cfg(target_os = "windows")]
pub const LIBRARY_EXTENSION: &str = ".dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const LIBRARY_EXTENSION: &str = ".so";

/// Prefix every candidate file name must start with.
pub const LIBRARY_PREFIX: &str = "lib";

pub fn is_candidate_name(name: &str) -> bool {
    name.starts_with(LIBRARY_PREFIX) && name.ends_with(LIBRARY_EXTENSION)
}

/// Lazily yields candidate libraries in directory order. Not restartable.
#[derive(Debug)]
pub struct Candidates {
    entries: ReadDir,
}

/// Opens `dir` for scanning. An unreadable directory is fatal.
pub fn candidates(dir: &Path) -> Result<Candidates, DiscoveryError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::DirectoryUnreadable {
        dir: dir.to_path_buf(),
        source,
    })?;
    Ok(Candidates { entries })
}

impl Iterator for Candidates {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        for entry in self.entries.by_ref().flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let name = entry.file_name();
            if is_candidate_name(&name.to_string_lossy()) {
                return Some(path);
            }
            debug!("Ignoring {:?}: not a {}*{} file", name, LIBRARY_PREFIX, LIBRARY_EXTENSION);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn lib(stem: &str) -> String {
        format!("{stem}{LIBRARY_EXTENSION}")
    }

    #[rstest]
    #[case(lib("libcontrol"), true)]
    #[case(lib("lib"), true)]
    #[case(lib("control"), false)]
    #[case(lib("Libcontrol"), false)]
    #[case("libcontrol.txt".to_string(), false)]
    #[case(format!("{}.bak", lib("libcontrol")), false)]
    #[case("libcontrol".to_string(), false)]
    fn test_candidate_name_filter(#[case] name: String, #[case] expected: bool) {
        assert_eq!(is_candidate_name(&name), expected);
    }

    #[test]
    fn test_only_regular_library_files_are_yielded() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(lib("libcontrol")), b"").unwrap();
        fs::write(temp.path().join(lib("libother")), b"").unwrap();
        fs::write(temp.path().join(lib("control")), b"").unwrap();
        fs::write(temp.path().join("libnotes.txt"), b"").unwrap();
        fs::create_dir(temp.path().join(lib("libdirectory"))).unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("nested").join(lib("libnested")), b"").unwrap();

        let mut names: Vec<String> = candidates(temp.path())
            .unwrap()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert_eq!(names, vec![lib("libcontrol"), lib("libother")]);
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let temp = TempDir::new().unwrap();
        assert_eq!(candidates(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        let err = candidates(&missing).unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::DirectoryUnreadable { ref dir, .. } if dir == &missing
        ));
    }
}
