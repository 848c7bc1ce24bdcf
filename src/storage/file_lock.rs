use std::fs::{File, OpenOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::layout::StorageLayout;

/// Single-process guarantee over a data directory.
pub struct FileLock {
    pub file: File,
    pub exclusive: bool,
}

impl FileLock {
    pub fn acquire(layout: &StorageLayout, exclusive: bool) -> Result<Self> {
        let lock_path = layout.lock_path();

        let file = if exclusive {
            OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_path)?
        } else {
            OpenOptions::new()
                .read(true)
                .open(&lock_path)?
        };

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB, LOCK_SH};

            let fd = file.as_raw_fd();
            let operation = if exclusive { LOCK_EX } else { LOCK_SH } | LOCK_NB;

            unsafe {
                if flock(fd, operation) != 0 {
                    return Err(Error {
                        kind: ErrorKind::Io,
                        context: format!(
                            "data directory {} is locked by another process",
                            layout.data_dir.display()
                        ),
                    });
                }
            }
        }

        Ok(FileLock { file, exclusive })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
