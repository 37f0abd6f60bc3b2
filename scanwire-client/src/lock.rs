//! # Advisory device lock
//!
//! Keeps several processes from interleaving command streams on the same device.
//! The lock is named by a stable device identifier and lives in a lock file that
//! whichever process comes first creates. Everybody else attaches to the same file.
//!
//! On unix the lock is an exclusive `flock` on that file, so it is released by the
//! kernel if the holder dies. Elsewhere the lock is the existence of the file itself.
//!
//! ## Example Usage
//!
//! ```ignore
//! use scanwire_client::DeviceLock;
//!
//! let lock = DeviceLock::acquire("net:192.168.1.20:1865")?;
//! // ... talk to the device ...
//! lock.release()?;
//! ```
use std::{
    fmt::Debug,
    io,
    path::{Path, PathBuf},
};

const LOCK_FILE_PREFIX: &str = "scanwire-";
const LOCK_FILE_SUFFIX: &str = ".lock";

/// An exclusive, advisory, cross-process lock for one device.
///
/// Acquisition blocks without a timeout. The lock is released on drop.
pub struct DeviceLock {
    path: PathBuf,
    held: imp::Held,
}

impl DeviceLock {
    /// Blocks until the lock for `device_id` in the system temp directory is held.
    pub fn acquire(device_id: &str) -> io::Result<DeviceLock> {
        DeviceLock::acquire_in(std::env::temp_dir(), device_id)
    }

    /// Blocks until the lock for `device_id` in `dir` is held.
    pub fn acquire_in(dir: impl AsRef<Path>, device_id: &str) -> io::Result<DeviceLock> {
        let path = lock_path(dir.as_ref(), device_id);
        log::debug!("Waiting for device lock {}", path.display());
        let held = imp::Held::lock(&path)?;
        log::info!("Acquired device lock {}", path.display());
        Ok(DeviceLock { path, held })
    }

    /// Takes the lock if nobody else holds it.
    pub fn try_acquire_in(
        dir: impl AsRef<Path>,
        device_id: &str,
    ) -> io::Result<Option<DeviceLock>> {
        let path = lock_path(dir.as_ref(), device_id);
        match imp::Held::try_lock(&path)? {
            Some(held) => {
                log::info!("Acquired device lock {}", path.display());
                Ok(Some(DeviceLock { path, held }))
            }
            None => {
                log::debug!("Device lock {} is held elsewhere", path.display());
                Ok(None)
            }
        }
    }

    /// The lock file backing this lock
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) -> io::Result<()> {
        log::info!("Releasing device lock {}", self.path.display());
        self.held.release()
    }
}

impl Debug for DeviceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLock")
            .field("path", &self.path)
            .finish()
    }
}

/// Maps a device identifier to a file name that is valid on every platform.
///
/// Bytes outside `[A-Za-z0-9._-]` are written as `%xx`, so distinct
/// identifiers always get distinct files.
fn lock_path(dir: &Path, device_id: &str) -> PathBuf {
    let mut name = String::with_capacity(device_id.len());
    for byte in device_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02x}", byte));
        }
    }
    dir.join(format!("{}{}{}", LOCK_FILE_PREFIX, name, LOCK_FILE_SUFFIX))
}

#[cfg(unix)]
mod imp {
    use std::{
        fs::{File, OpenOptions},
        io,
        path::Path,
    };

    use nix::{
        errno::Errno,
        fcntl::{Flock, FlockArg},
    };

    pub(super) struct Held(Flock<File>);

    fn open(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    impl Held {
        pub(super) fn lock(path: &Path) -> io::Result<Held> {
            let file = open(path)?;
            Flock::lock(file, FlockArg::LockExclusive)
                .map(Held)
                .map_err(|(_, errno)| io::Error::from(errno))
        }

        pub(super) fn try_lock(path: &Path) -> io::Result<Option<Held>> {
            let file = open(path)?;
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => Ok(Some(Held(lock))),
                Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
                Err((_, errno)) => Err(errno.into()),
            }
        }

        pub(super) fn release(self) -> io::Result<()> {
            self.0
                .unlock()
                .map(drop)
                .map_err(|(_, errno)| io::Error::from(errno))
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::{
        fs::{self, File, OpenOptions},
        io::{self, ErrorKind},
        path::{Path, PathBuf},
        thread,
        time::Duration,
    };

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub(super) struct Held {
        path: PathBuf,
        _file: File,
    }

    impl Held {
        pub(super) fn lock(path: &Path) -> io::Result<Held> {
            loop {
                if let Some(held) = Held::try_lock(path)? {
                    return Ok(held);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }

        pub(super) fn try_lock(path: &Path) -> io::Result<Option<Held>> {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => Ok(Some(Held {
                    path: path.to_path_buf(),
                    _file: file,
                })),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
                Err(err) => Err(err),
            }
        }

        pub(super) fn release(self) -> io::Result<()> {
            // the file is removed on drop
            Ok(())
        }
    }

    impl Drop for Held {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DeviceLock, lock_path};
    use std::{path::Path, sync::mpsc, thread, time::Duration};

    #[test]
    fn device_ids_become_file_names() {
        assert_eq!(
            lock_path(Path::new("/tmp"), "net:10.0.0.5:1865"),
            Path::new("/tmp/scanwire-net%3a10.0.0.5%3a1865.lock")
        );
        assert_eq!(
            lock_path(Path::new("/tmp"), "/dev/usb/scanner0"),
            Path::new("/tmp/scanwire-%2fdev%2fusb%2fscanner0.lock")
        );
        assert_ne!(
            lock_path(Path::new("/tmp"), "net:a"),
            lock_path(Path::new("/tmp"), "net_a")
        );
        assert_ne!(
            lock_path(Path::new("/tmp"), "net:a"),
            lock_path(Path::new("/tmp"), "net%3aa")
        );
    }

    #[test]
    fn similar_ids_lock_independently() {
        let dir = tempfile::tempdir().unwrap();
        let _colon = DeviceLock::acquire_in(dir.path(), "net:a").unwrap();
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "net_a")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn second_holder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = DeviceLock::acquire_in(dir.path(), "scanner").unwrap();
        assert!(first.path().exists());
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_none()
        );
        // other devices are independent
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "other")
                .unwrap()
                .is_some()
        );

        first.release().unwrap();
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = DeviceLock::acquire_in(dir.path(), "scanner").unwrap();
        }
        assert!(
            DeviceLock::try_acquire_in(dir.path(), "scanner")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let held = DeviceLock::acquire_in(dir.path(), "scanner").unwrap();

        let (tx, rx) = mpsc::channel();
        let path = dir.path().to_path_buf();
        let waiter = thread::spawn(move || {
            let lock = DeviceLock::acquire_in(&path, "scanner").unwrap();
            tx.send(()).unwrap();
            lock.release().unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        held.release().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
