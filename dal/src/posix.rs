//! POSIX DAL backend: each block lives as a plain file under a root
//! directory tree, named after its `BlockLocation`. This is the
//! reference backend; MC/NOOP/DIRECT wrap or stub around the same
//! shape of context.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{BlockLocation, BlockStreamContext, DalError, DalResult, DataAbstractionLayer, OsFlags};

pub struct PosixDal {
    root: PathBuf,
}

impl PosixDal {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &BlockLocation) -> PathBuf {
        self.root.join(&location.object_path)
    }
}

impl DataAbstractionLayer for PosixDal {
    fn new_context(&self, location: &BlockLocation) -> Box<dyn BlockStreamContext> {
        Box::new(PosixContext {
            path: self.resolve(location),
            file: None,
            flags: OsFlags::empty(),
            chunk_offset: 0,
        })
    }

    fn update_object_location(&self, location: &mut BlockLocation) -> DalResult<()> {
        // POSIX targets are stable: the path is derived purely from the
        // logical coordinates, no host-template rotation is involved.
        location.object_path = format!(
            "{}/pod{}/cap{}/scatter{}/block{}",
            location.repo, location.pod, location.cap, location.scatter, location.block
        );
        Ok(())
    }

    fn delete(&self, location: &BlockLocation) -> DalResult<()> {
        let path = self.resolve(location);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "POSIX"
    }
}

struct PosixContext {
    path: PathBuf,
    file: Option<File>,
    flags: OsFlags,
    chunk_offset: u64,
}

impl BlockStreamContext for PosixContext {
    fn open(
        &mut self,
        is_put: bool,
        chunk_offset: u64,
        _content_len: u64,
        _preserve_write_count: bool,
        _timeout_secs: u16,
    ) -> DalResult<()> {
        if self.flags.contains(OsFlags::OPEN) && !self.flags.contains(OsFlags::CLOSED) {
            return Err(DalError::BadFileDescriptor);
        }
        if is_put {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.file = Some(file);
            self.flags = OsFlags::OPEN | OsFlags::PUT;
        } else {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(chunk_offset))?;
            self.file = Some(file);
            self.flags = OsFlags::OPEN | OsFlags::GET;
        }
        self.chunk_offset = chunk_offset;
        Ok(())
    }

    fn put(&mut self, buf: &[u8]) -> DalResult<usize> {
        let file = self.file.as_mut().ok_or(DalError::BadFileDescriptor)?;
        Ok(file.write(buf)?)
    }

    fn get(&mut self, buf: &mut [u8]) -> DalResult<usize> {
        let file = self.file.as_mut().ok_or(DalError::BadFileDescriptor)?;
        let n = file.read(buf)?;
        if n == 0 {
            self.flags |= OsFlags::EOF;
        }
        Ok(n)
    }

    fn sync(&mut self) -> DalResult<()> {
        if let Some(file) = self.file.as_ref() {
            file.sync_data()?;
        }
        Ok(())
    }

    fn abort(&mut self) -> DalResult<()> {
        self.flags |= OsFlags::ABORT;
        self.file = None;
        if Path::new(&self.path).exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn close(&mut self) -> DalResult<()> {
        if let Some(file) = self.file.as_ref() {
            file.sync_all()?;
        }
        self.file = None;
        self.flags |= OsFlags::CLOSED;
        Ok(())
    }

    fn flags(&self) -> OsFlags {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrip() -> DalResult<()> {
        let dir = std::env::temp_dir().join(format!("marfs-posix-dal-test-{}", std::process::id()));
        let dal = PosixDal::new(&dir);
        let mut loc = BlockLocation {
            repo: "repo1".into(),
            pod: 0,
            cap: 0,
            scatter: 0,
            block: 0,
            object_path: String::new(),
        };
        dal.update_object_location(&mut loc)?;

        let mut ctx = dal.new_context(&loc);
        ctx.open(true, 0, 5, false, 0)?;
        ctx.put(b"hello")?;
        ctx.close()?;

        let mut ctx = dal.new_context(&loc);
        ctx.open(false, 0, 5, false, 0)?;
        let mut buf = [0u8; 5];
        let n = ctx.get(&mut buf)?;
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
        ctx.close()?;

        dal.delete(&loc)?;
        let _ = fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn reopen_without_close_is_ebadf() -> DalResult<()> {
        let dir = std::env::temp_dir().join(format!("marfs-posix-dal-test2-{}", std::process::id()));
        let dal = PosixDal::new(&dir);
        let mut loc = BlockLocation {
            repo: "repo1".into(),
            pod: 0,
            cap: 0,
            scatter: 0,
            block: 1,
            object_path: String::new(),
        };
        dal.update_object_location(&mut loc)?;
        let mut ctx = dal.new_context(&loc);
        ctx.open(true, 0, 0, false, 0)?;
        let err = ctx.open(true, 0, 0, false, 0).unwrap_err();
        assert!(matches!(err, DalError::BadFileDescriptor));
        ctx.close()?;
        let _ = fs::remove_dir_all(&dir);
        Ok(())
    }
}
