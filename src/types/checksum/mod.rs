#![forbid(unsafe_code)]

/// Incremental checksum over a sequence of byte slices.
pub trait Checksum {
    /// Feeds `bytes` into the running checksum.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the checksum of everything fed so far.
    fn finalize(&self) -> u32;
}

/// [`Checksum`] backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC32 of a tree header prefix.
pub fn header_crc32(prefix: &[u8]) -> u32 {
    crc32fast::hash(prefix)
}

/// CRC32 of a block, covering its fixed header prefix and its body but not the
/// checksum slot itself.
pub fn block_crc32(head: &[u8], body: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(head);
    hasher.update(body);
    hasher.finalize()
}
