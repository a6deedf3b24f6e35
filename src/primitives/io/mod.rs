#![forbid(unsafe_code)]

use std::{
    fs::File,
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use bytes::Bytes;

use crate::types::{IndexError, Result};

/// Random-access byte source a serialized tree is read from.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes starting at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Returns the current length of the source in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the source is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(unix)]
/// Unix-specific positioned reads.
pub mod stdio_unix {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
    };

    /// Reads exact number of bytes at offset using Unix pread semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
/// Windows-specific positioned reads.
pub mod stdio_win {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
    };

    /// Reads exact number of bytes at offset using Windows seek_read semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }
}

/// Read-only file source using `Arc<File>`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens an existing file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(IndexError::from)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }

    #[cfg(unix)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_unix::read_exact(self.file(), off, dst)
    }

    #[cfg(windows)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_win::read_exact(self.file(), off, dst)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact(&self, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact(off, dst).map_err(IndexError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(IndexError::from)?.len())
    }
}

impl FileIo for Bytes {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let start = usize::try_from(off).map_err(|_| IndexError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(dst.len())
            .ok_or(IndexError::Invalid("offset overflow"))?;
        let src = self.get(start..end).ok_or_else(|| {
            IndexError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of buffer",
            ))
        })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(Bytes::len(self) as u64)
    }
}

/// Copies `len` bytes starting at `off` out of `source` into an owned region.
pub fn read_region(source: &dyn FileIo, off: u64, len: u64) -> Result<Bytes> {
    let end = off
        .checked_add(len)
        .ok_or(IndexError::Invalid("region end overflows"))?;
    if end > source.len()? {
        return Err(IndexError::Invalid("region extends past end of source"));
    }
    let len = usize::try_from(len).map_err(|_| IndexError::Invalid("region too large"))?;
    let mut buf = vec![0u8; len];
    source.read_at(off, &mut buf)?;
    Ok(Bytes::from(buf))
}

/// Sequential sink wrapper that tallies bytes passed through it.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    /// Wraps `inner` with a zeroed byte counter.
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Unwraps the inner sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
