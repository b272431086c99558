//! Path resolution inside the mount namespace of another process.
//!
//! Every process exposes the root of its mount namespace at
//! `/proc/<pid>/root`. [`ProcRoot`] opens that directory once and resolves
//! paths below it component by component. Symbolic links are evaluated as the
//! process itself would see them: absolute targets restart at the namespace
//! root and `..` never climbs above it. Paths therefore resolve to the same
//! file a process inside the container would open, while the host never
//! follows a link out of the namespace.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};

use cap_std::ambient_authority;
use cap_std::fs::{Dir, File};
use log::trace;
use rustix::process::getuid;
use rustix::thread::{capabilities, CapabilitySet};

use crate::error::{Error, Result};

/// Maximum number of symbolic links followed while resolving a single path,
/// the same limit Linux applies.
const MAX_SYMLINKS: usize = 40;

/// The root directory of the mount namespace of a process.
pub struct ProcRoot {
    pid: u32,
    path: PathBuf,
    dir: Dir,
}

/// A file path resolved inside the mount namespace of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceFileRef {
    pid: u32,
    resolved_path: PathBuf,
    host_path: PathBuf,
}

impl NamespaceFileRef {
    /// The process whose mount namespace this path lives in.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Absolute, symlink-free path as seen inside the mount namespace.
    pub fn resolved_path(&self) -> &Path {
        &self.resolved_path
    }

    /// The same file as reachable from the host, below `/proc/<pid>/root`.
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    fn relative_path(&self) -> &Path {
        self.resolved_path
            .strip_prefix("/")
            .unwrap_or(&self.resolved_path)
    }
}

impl ProcRoot {
    /// Opens the namespace root of process `pid` below the procfs mounted at
    /// `proc_root`.
    pub fn open(proc_root: impl AsRef<Path>, pid: u32) -> Result<Self> {
        if pid == 0 || i32::try_from(pid).is_err() {
            return Err(Error::InvalidPid(pid.into()));
        }
        let path = proc_root.as_ref().join(pid.to_string()).join("root");
        let dir = Dir::open_ambient_dir(&path, ambient_authority()).map_err(|source| {
            match source.kind() {
                io::ErrorKind::NotFound => Error::NoSuchProcess {
                    pid,
                    path: path.clone(),
                    source,
                },
                io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                    pid,
                    path: path.clone(),
                    hint: privilege_hint(),
                    source,
                },
                _ => Error::Resolve {
                    path: path.clone(),
                    source,
                },
            }
        })?;
        Ok(Self { pid, path, dir })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The namespace root as reachable from the host.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves `path` as the process would, following symbolic links inside
    /// the namespace.
    ///
    /// A missing last component yields [`Error::FileNotFound`], a missing or
    /// non-directory intermediate component [`Error::DirectoryNotFound`].
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<NamespaceFileRef> {
        let requested = path.as_ref();
        let mut pending = components(requested);
        let mut resolved = PathBuf::new();
        let mut links = 0;

        while let Some(name) = pending.pop_front() {
            if name == ".." {
                resolved.pop();
                continue;
            }

            let candidate = resolved.join(&name);
            let metadata = match self.dir.symlink_metadata(&candidate) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    let path = self.path.join(&candidate);
                    return Err(if pending.is_empty() {
                        Error::FileNotFound { path }
                    } else {
                        Error::DirectoryNotFound { path }
                    });
                }
                Err(source) => {
                    return Err(Error::Resolve {
                        path: self.path.join(&candidate),
                        source,
                    })
                }
            };

            if metadata.is_symlink() {
                links += 1;
                if links > MAX_SYMLINKS {
                    return Err(Error::SymlinkLoop {
                        path: self.path.join(strip_root(requested)),
                    });
                }
                let target = self
                    .dir
                    .read_link_contents(&candidate)
                    .map_err(|source| Error::Resolve {
                        path: self.path.join(&candidate),
                        source,
                    })?;
                trace!("{} -> {}", candidate.display(), target.display());
                if target.has_root() {
                    resolved = PathBuf::new();
                }
                for component in components(&target).into_iter().rev() {
                    pending.push_front(component);
                }
                continue;
            }

            if !pending.is_empty() && !metadata.is_dir() {
                return Err(Error::DirectoryNotFound {
                    path: self.path.join(&candidate),
                });
            }
            resolved = candidate;
        }

        Ok(NamespaceFileRef {
            pid: self.pid,
            host_path: self.path.join(&resolved),
            resolved_path: Path::new("/").join(resolved),
        })
    }

    /// Opens a previously resolved file for reading.
    pub fn open_file(&self, file: &NamespaceFileRef) -> io::Result<File> {
        self.dir.open(file.relative_path())
    }
}

fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// Splits `path` into the names still to be walked; `.` and the root vanish,
/// `..` is kept so that it applies to the walk and not to the text.
fn components(path: &Path) -> VecDeque<OsString> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_os_string()),
            Component::ParentDir => Some(OsStr::new("..").to_os_string()),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect()
}

/// Whether this process may enter the namespace root of processes owned by
/// other users, which takes either root or `CAP_SYS_PTRACE`.
pub fn can_access_foreign_roots() -> bool {
    if getuid().is_root() {
        return true;
    }
    capabilities(None)
        .map(|caps| caps.effective.contains(CapabilitySet::SYS_PTRACE))
        .unwrap_or(false)
}

fn privilege_hint() -> &'static str {
    if can_access_foreign_roots() {
        ""
    } else {
        " (requires root or CAP_SYS_PTRACE)"
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use super::*;
    use crate::error::ErrorKind;
    use crate::test::FakeProc;

    const PID: u32 = 4242;

    fn container() -> FakeProc {
        let proc = FakeProc::new(PID);
        let root = proc.root();
        std::fs::create_dir_all(root.join("data/app_engine/db")).unwrap();
        std::fs::create_dir_all(root.join("mnt/volumes/db")).unwrap();
        std::fs::write(root.join("data/app_engine/db/platformbox.db"), b"db").unwrap();
        std::fs::write(root.join("mnt/volumes/db/other.db"), b"other").unwrap();
        std::fs::write(root.join("data/plain"), b"plain").unwrap();
        proc
    }

    #[test]
    fn test_resolve_plain_path() {
        let proc = container();
        let root = ProcRoot::open(proc.proc_root(), PID).unwrap();
        let file = root.resolve("/data/app_engine/db/platformbox.db").unwrap();
        assert_eq!(file.pid(), PID);
        assert_eq!(
            file.resolved_path(),
            Path::new("/data/app_engine/db/platformbox.db")
        );
        assert_eq!(
            file.host_path(),
            proc.root().join("data/app_engine/db/platformbox.db")
        );
    }

    #[test]
    fn test_resolve_absolute_symlink_stays_in_namespace() {
        let proc = container();
        // Absolute targets refer to the namespace root, not the host's.
        symlink("/mnt/volumes/db/other.db", proc.root().join("data/app_engine/db/link.db"))
            .unwrap();
        let root = ProcRoot::open(proc.proc_root(), PID).unwrap();
        let file = root.resolve("/data/app_engine/db/link.db").unwrap();
        assert_eq!(file.resolved_path(), Path::new("/mnt/volumes/db/other.db"));

        let mut content = String::new();
        io::Read::read_to_string(&mut root.open_file(&file).unwrap(), &mut content).unwrap();
        assert_eq!(content, "other");
    }

    #[test]
    fn test_resolve_relative_symlinked_directory() {
        let proc = container();
        std::fs::remove_dir_all(proc.root().join("data/app_engine/db")).unwrap();
        symlink("../../mnt/volumes/db", proc.root().join("data/app_engine/db")).unwrap();
        let root = ProcRoot::open(proc.proc_root(), PID).unwrap();
        let file = root.resolve("/data/app_engine/db/other.db").unwrap();
        assert_eq!(file.resolved_path(), Path::new("/mnt/volumes/db/other.db"));
    }

    #[test]
    fn test_resolve_cannot_escape() {
        let proc = container();
        symlink(
            "/../../../../../etc/hostname",
            proc.root().join("data/app_engine/db/evil.db"),
        )
        .unwrap();
        let root = ProcRoot::open(proc.proc_root(), PID).unwrap();
        let err = root.resolve("/data/app_engine/db/evil.db").unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound { .. }), "{err:?}");
        assert!(root.resolve("/../../../../etc/hostname").is_err());
    }

    #[test]
    fn test_missing_directory_and_file_differ() {
        let proc = container();
        let root = ProcRoot::open(proc.proc_root(), PID).unwrap();

        let err = root.resolve("/data/nonexisting/db/platformbox.db").unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound { .. }), "{err:?}");
        assert!(err.to_string().contains("data/nonexisting"));

        let err = root.resolve("/data/app_engine/db/missing.db").unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = root.resolve("/data/plain/platformbox.db").unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound { .. }), "{err:?}");
    }

    #[test]
    fn test_symlink_loop() {
        let proc = container();
        symlink("b", proc.root().join("data/a")).unwrap();
        symlink("a", proc.root().join("data/b")).unwrap();
        let root = ProcRoot::open(proc.proc_root(), PID).unwrap();
        let err = root.resolve("/data/a").unwrap_err();
        assert!(matches!(err, Error::SymlinkLoop { .. }), "{err:?}");
    }

    #[test]
    fn test_dot_dot_is_walked() {
        let proc = container();
        let root = ProcRoot::open(proc.proc_root(), PID).unwrap();
        let file = root
            .resolve("/data/./app_engine/../app_engine/db/platformbox.db")
            .unwrap();
        assert_eq!(
            file.resolved_path(),
            Path::new("/data/app_engine/db/platformbox.db")
        );
    }

    #[test]
    fn test_open_invalid_and_missing_pid() {
        let proc = container();
        let err = ProcRoot::open(proc.proc_root(), 0).err().unwrap();
        assert!(matches!(err, Error::InvalidPid(0)));
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let err = ProcRoot::open(proc.proc_root(), PID + 1).err().unwrap();
        assert!(matches!(err, Error::NoSuchProcess { pid, .. } if pid == PID + 1));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_own_namespace() {
        let root = ProcRoot::open("/proc", std::process::id()).unwrap();
        let file = root.resolve("/proc/self/..").unwrap();
        assert_eq!(file.resolved_path(), Path::new("/proc"));
    }

    #[test]
    fn test_can_access_foreign_roots() {
        if getuid().is_root() {
            assert!(can_access_foreign_roots());
            assert_eq!(privilege_hint(), "");
        }
    }
}
