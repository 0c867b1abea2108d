use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{error::StorageError, storage::Medium};

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfRange {
            offset,
            len,
            capacity,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct MemoryMedium {
    bytes: Vec<u8>,
    writes: usize,
    commits: usize,
    fail_reads: bool,
    fail_writes: bool,
    fail_after: Option<WriteFault>,
}

#[derive(Debug, Clone, Copy)]
struct WriteFault {
    remaining: usize,
    persistent: bool,
}

impl MemoryMedium {
    pub fn new(capacity: usize) -> Self {
        Self::filled(capacity, 0x00)
    }

    pub fn filled(capacity: usize, erased: u8) -> Self {
        Self {
            bytes: vec![erased; capacity],
            writes: 0,
            commits: 0,
            fail_reads: false,
            fail_writes: false,
            fail_after: None,
        }
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
        self.fail_after = None;
    }

    /// Lets `successful` more writes through, then fails every write.
    pub fn fail_writes_after(&mut self, successful: usize) {
        self.fail_after = Some(WriteFault {
            remaining: successful,
            persistent: true,
        });
    }

    /// Lets `successful` more writes through, then fails exactly one.
    pub fn fail_one_write_after(&mut self, successful: usize) {
        self.fail_after = Some(WriteFault {
            remaining: successful,
            persistent: false,
        });
    }

    fn take_write_fault(&mut self) -> bool {
        let Some(fault) = self.fail_after.as_mut() else {
            return false;
        };
        if fault.remaining > 0 {
            fault.remaining -= 1;
            return false;
        }
        if !fault.persistent {
            self.fail_after = None;
        }
        true
    }
}

impl Medium for MemoryMedium {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.bytes.len())?;
        if self.fail_reads {
            return Err(StorageError::Read {
                offset,
                len: buf.len(),
                reason: "injected read failure".to_string(),
            });
        }
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.bytes.len())?;
        if self.fail_writes || self.take_write_fault() {
            return Err(StorageError::Write {
                offset,
                len: bytes.len(),
                reason: "injected write failure".to_string(),
            });
        }
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.commits += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    file: File,
    capacity: usize,
}

impl FileMedium {
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let init_err =
            |err: std::io::Error| StorageError::Init(format!("{}: {err}", path.display()));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(init_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(init_err)?;

        let len = file.metadata().map_err(init_err)?.len();
        if len < capacity as u64 {
            file.set_len(capacity as u64).map_err(init_err)?;
        }

        Ok(Self {
            path,
            file,
            capacity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Medium for FileMedium {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let len = buf.len();
        check_bounds(offset, len, self.capacity)?;
        let read_err = |err: std::io::Error| StorageError::Read {
            offset,
            len,
            reason: err.to_string(),
        };

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset as u64)).map_err(read_err)?;
        file.read_exact(buf).map_err(read_err)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), self.capacity)?;
        let write_err = |err: std::io::Error| StorageError::Write {
            offset,
            len: bytes.len(),
            reason: err.to_string(),
        };
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .map_err(write_err)?;
        self.file.write_all(bytes).map_err(write_err)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.file.sync_data().map_err(|err| StorageError::Write {
            offset: 0,
            len: 0,
            reason: err.to_string(),
        })
    }
}
