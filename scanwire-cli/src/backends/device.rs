//! # Local Device Channel
//!
//! For scanners exposed as a character device by a kernel driver, such as a
//! USB scanner node. The driver takes care of the bus transport, so the device
//! file is a plain byte stream carrying the framed protocol.
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

/// Opens the device node at `path` for reading and writing.
pub fn open(path: impl AsRef<Path>) -> io::Result<File> {
    let device_path = path.as_ref();
    log::debug!("Opening scanner device: {}", device_path.display());
    let metadata = device_path.metadata()?;
    if metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a directory", device_path.display()),
        ));
    }
    let file = OpenOptions::new().read(true).write(true).open(device_path)?;
    log::info!("Opened scanner device {}", device_path.display());
    Ok(file)
}

#[cfg(test)]
mod test {
    use super::open;

    #[test]
    fn missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(dir.path().join("scanner0")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(dir.path()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn regular_file_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner0");
        std::fs::write(&path, b"").unwrap();
        assert!(open(&path).is_ok());
    }
}
