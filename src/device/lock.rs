//! UUCP-style advisory lock files for serial device nodes.
//!
//! A lock is a `LCK..<node>` file holding the owner's pid. Stale locks
//! (owner no longer running) are reclaimed. Windows serial handles are
//! exclusive already, so locking is a no-op there.

#[cfg(unix)]
mod imp {
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use crate::error::Error;

    const LOCK_DIR: &str = "/var/lock";

    /// Held advisory lock; the file is removed on release or drop.
    #[derive(Debug)]
    pub struct DeviceLock {
        path: PathBuf,
    }

    impl DeviceLock {
        pub fn release(self) {
            // Drop does the work.
        }
    }

    impl Drop for DeviceLock {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn lock_path(device: &str) -> PathBuf {
        let node = Path::new(device)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| device.replace('/', "_"));
        Path::new(LOCK_DIR).join(format!("LCK..{node}"))
    }

    fn pid_is_alive(pid: u32) -> bool {
        if cfg!(target_os = "linux") {
            Path::new("/proc").join(pid.to_string()).exists()
        } else {
            // No portable liveness check; err on the safe side.
            true
        }
    }

    fn try_create(path: &Path) -> Result<Option<fs::File>, Error> {
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(Error::DeviceNoPermission)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // No lock directory on this system; treat locking as
                // unsupported rather than failing the connection.
                Err(Error::NotSupported)
            }
            Err(_) => Err(Error::DeviceOpenError),
        }
    }

    pub fn lock_device(device: &str) -> Result<Option<DeviceLock>, Error> {
        let path = lock_path(device);
        for _ in 0..2 {
            match try_create(&path) {
                Ok(Some(mut file)) => {
                    let _ = writeln!(file, "{:10}", std::process::id());
                    return Ok(Some(DeviceLock { path }));
                }
                Ok(None) => {
                    let stale = fs::read_to_string(&path)
                        .ok()
                        .and_then(|text| text.trim().parse::<u32>().ok())
                        .map(|pid| !pid_is_alive(pid))
                        .unwrap_or(false);
                    if !stale {
                        return Err(Error::DeviceLocked);
                    }
                    log::info!("reclaiming stale lock {}", path.display());
                    let _ = fs::remove_file(&path);
                }
                Err(Error::NotSupported) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Err(Error::DeviceLocked)
    }
}

#[cfg(not(unix))]
mod imp {
    use crate::error::Error;

    #[derive(Debug)]
    pub struct DeviceLock;

    impl DeviceLock {
        pub fn release(self) {}
    }

    pub fn lock_device(_device: &str) -> Result<Option<DeviceLock>, Error> {
        Ok(None)
    }
}

pub use imp::{lock_device, DeviceLock};

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn lock_and_release() {
        // /var/lock may not exist or be writable in every environment;
        // both outcomes are acceptable here, the point is no panic and a
        // sane error surface.
        match lock_device("/dev/ttyHLTEST0") {
            Ok(Some(lock)) => {
                // Second lock attempt must see us holding it.
                assert_eq!(lock_device("/dev/ttyHLTEST0").unwrap_err(), Error::DeviceLocked);
                lock.release();
                // After release the node can be locked again.
                if let Ok(Some(lock)) = lock_device("/dev/ttyHLTEST0") {
                    lock.release();
                }
            }
            Ok(None) => {}
            Err(e) => assert!(matches!(
                e,
                Error::DeviceNoPermission | Error::DeviceOpenError
            )),
        }
    }
}
