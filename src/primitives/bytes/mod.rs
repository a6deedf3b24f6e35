#![forbid(unsafe_code)]
//! Fixed-width encoders and a bounds-checked slice cursor shared by the
//! tree format and entry codec.

pub mod ord {
    //! Order-preserving big-endian encoders for integer keys.

    use core::convert::TryInto;

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const SIGN_BIT: u64 = 1 << 63;

    /// Big-endian encoding for lexicographic order preservation.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u64 from big-endian byte order.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        let head = src
            .get(..U64_LEN)
            .unwrap_or_else(|| panic!("u64 source shorter than 8 bytes (have {})", src.len()));
        let bytes: [u8; U64_LEN] = head.try_into().unwrap();
        u64::from_be_bytes(bytes)
    }

    /// Encodes a signed i64 with order preservation (flip sign bit for sorting).
    pub fn put_i64_be(dst: &mut [u8], v: i64) {
        let flipped = (v as u64) ^ SIGN_BIT;
        put_u64_be(dst, flipped);
    }

    /// Decodes a signed i64 with order preservation.
    pub fn get_i64_be(src: &[u8]) -> i64 {
        let flipped = get_u64_be(src);
        let raw = flipped ^ SIGN_BIT;
        raw as i64
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing untrusted bytes.

    use core::convert::TryInto;
    use core::fmt;

    use crate::types::{IndexError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    ///
    /// Reads past the end report [`IndexError::CorruptFormat`] instead of
    /// panicking, since every byte it sees comes from a serialized tree.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(IndexError::CorruptFormat("cursor offset overflow"))?;
            if end > self.buf.len() {
                return Err(IndexError::CorruptFormat("cursor take beyond buffer"));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a single byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u16.
        pub fn u16(&mut self) -> Result<u16> {
            let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
            Ok(u16::from_be_bytes(bytes))
        }

        /// Reads a big-endian u32.
        pub fn u32(&mut self) -> Result<u32> {
            let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
            Ok(u32::from_be_bytes(bytes))
        }

        /// Reads a big-endian u64.
        pub fn u64(&mut self) -> Result<u64> {
            Ok(super::ord::get_u64_be(self.take(8)?))
        }

        /// Reads an order-preserving i64.
        pub fn i64(&mut self) -> Result<i64> {
            Ok(super::ord::get_i64_be(self.take(8)?))
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
