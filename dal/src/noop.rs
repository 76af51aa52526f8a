//! NOOP DAL backend: discards all writes and returns zero-filled reads.
//! Used for isolating erasure-engine performance from storage-backend
//! latency (see the original `test_libne_noop` performance harness),
//! and as the DIRECT backend's degenerate case when no physical target
//! is configured.

use crate::{BlockLocation, BlockStreamContext, DalError, DalResult, DataAbstractionLayer, OsFlags};

pub struct NoopDal;

impl DataAbstractionLayer for NoopDal {
    fn new_context(&self, _location: &BlockLocation) -> Box<dyn BlockStreamContext> {
        Box::new(NoopContext {
            flags: OsFlags::empty(),
            remaining: 0,
        })
    }

    fn update_object_location(&self, location: &mut BlockLocation) -> DalResult<()> {
        location.object_path = format!("noop/{}", location);
        Ok(())
    }

    fn delete(&self, _location: &BlockLocation) -> DalResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "NOOP"
    }
}

struct NoopContext {
    flags: OsFlags,
    remaining: u64,
}

impl BlockStreamContext for NoopContext {
    fn open(
        &mut self,
        is_put: bool,
        _chunk_offset: u64,
        content_len: u64,
        _preserve_write_count: bool,
        _timeout_secs: u16,
    ) -> DalResult<()> {
        if self.flags.contains(OsFlags::OPEN) && !self.flags.contains(OsFlags::CLOSED) {
            return Err(DalError::BadFileDescriptor);
        }
        self.remaining = content_len;
        self.flags = OsFlags::OPEN | if is_put { OsFlags::PUT } else { OsFlags::GET };
        Ok(())
    }

    fn put(&mut self, buf: &[u8]) -> DalResult<usize> {
        if !self.flags.contains(OsFlags::OPEN) {
            return Err(DalError::BadFileDescriptor);
        }
        Ok(buf.len())
    }

    fn get(&mut self, buf: &mut [u8]) -> DalResult<usize> {
        if !self.flags.contains(OsFlags::OPEN) {
            return Err(DalError::BadFileDescriptor);
        }
        let n = (buf.len() as u64).min(self.remaining) as usize;
        for b in &mut buf[..n] {
            *b = 0;
        }
        self.remaining -= n as u64;
        if n == 0 {
            self.flags |= OsFlags::EOF;
        }
        Ok(n)
    }

    fn sync(&mut self) -> DalResult<()> {
        Ok(())
    }

    fn abort(&mut self) -> DalResult<()> {
        self.flags |= OsFlags::ABORT;
        Ok(())
    }

    fn close(&mut self) -> DalResult<()> {
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
    fn discards_writes_zero_fills_reads() -> DalResult<()> {
        let dal = NoopDal;
        let loc = BlockLocation {
            repo: "r".into(),
            pod: 0,
            cap: 0,
            scatter: 0,
            block: 0,
            object_path: String::new(),
        };
        let mut ctx = dal.new_context(&loc);
        ctx.open(true, 0, 0, false, 0)?;
        assert_eq!(ctx.put(b"xyz")?, 3);
        ctx.close()?;

        let mut ctx = dal.new_context(&loc);
        ctx.open(false, 0, 4, false, 0)?;
        let mut buf = [0xffu8; 4];
        let n = ctx.get(&mut buf)?;
        assert_eq!(n, 4);
        assert_eq!(buf, [0, 0, 0, 0]);
        Ok(())
    }
}
