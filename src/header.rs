//! The fixed-offset, 128-byte DB header stored at the start of page 1
//! (§3.1). Modeled with `zerocopy` exactly the way `squeak::physical::header`
//! models SQLite's header: a `#[repr(C)]` struct of `zerocopy` integer
//! wrappers that can be read from and written to a byte slice with no
//! intermediate parsing step.

use zerocopy::{little_endian::U32, little_endian::U64, AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::codec::crc32c;
use crate::error::{DbError, Result};

pub const HEADER_SIZE: usize = 128;
const MAGIC: [u8; 16] = *b"DECENTDB\0\0\0\0\0\0\0\0";
pub const FORMAT_VERSION: u32 = 1;

pub const VALID_PAGE_SIZES: [u32; 8] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536];
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Page 1's first 128 bytes, byte-for-byte per §3.1.
#[derive(Debug, Clone, PartialEq, Eq, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct DbHeader {
    magic: [u8; 16],
    format_version: U32,
    page_size: U32,
    checksum: U32,
    schema_cookie: U32,
    catalog_root: U32,
    freelist_root: U32,
    freelist_head: U32,
    freelist_count: U32,
    last_checkpoint_lsn: U64,
    reserved: [u8; 72],
}

impl Default for DbHeader {
    fn default() -> Self {
        let mut header = Self {
            magic: MAGIC,
            format_version: FORMAT_VERSION.into(),
            page_size: DEFAULT_PAGE_SIZE.into(),
            checksum: 0.into(),
            schema_cookie: 0.into(),
            catalog_root: 0.into(),
            freelist_root: 0.into(),
            freelist_head: 0.into(),
            freelist_count: 0.into(),
            last_checkpoint_lsn: 0.into(),
            reserved: [0; 72],
        };
        header.recompute_checksum();
        header
    }
}

impl DbHeader {
    pub fn new(page_size: u32) -> Self {
        let mut header = Self::default();
        header.page_size = page_size.into();
        header.recompute_checksum();
        header
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(DbError::corruption("header shorter than 128 bytes"));
        }
        let header = Self::read_from_prefix(bytes)
            .ok_or_else(|| DbError::corruption("failed to parse header"))?;
        header.validate()?;
        Ok(header)
    }

    /// Serializes with a freshly computed checksum, per the rule that any
    /// mutation rewrites the full header (§3.1).
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header = self.clone();
        header.recompute_checksum();
        let mut out = [0u8; HEADER_SIZE];
        header.write_to(&mut out[..]).expect("header size matches buffer");
        out
    }

    fn checksum_input(bytes: &[u8; HEADER_SIZE]) -> u32 {
        let mut input = Vec::with_capacity(24 + (HEADER_SIZE - 28));
        input.extend_from_slice(&bytes[0..24]);
        input.extend_from_slice(&bytes[28..HEADER_SIZE]);
        crc32c(&input)
    }

    fn recompute_checksum(&mut self) {
        let mut bytes = [0u8; HEADER_SIZE];
        self.write_to(&mut bytes[..]).expect("header size matches buffer");
        self.checksum = Self::checksum_input(&bytes).into();
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(DbError::corruption("bad DB header magic"));
        }
        if self.format_version.get() != FORMAT_VERSION {
            return Err(DbError::corruption(format!(
                "unsupported format version {}",
                self.format_version.get()
            )));
        }
        if !VALID_PAGE_SIZES.contains(&self.page_size.get()) {
            return Err(DbError::corruption(format!(
                "invalid page size {}",
                self.page_size.get()
            )));
        }

        let mut bytes = [0u8; HEADER_SIZE];
        self.write_to(&mut bytes[..]).expect("header size matches buffer");
        let expected = Self::checksum_input(&bytes);
        if expected != self.checksum.get() {
            return Err(DbError::corruption("DB header checksum mismatch"));
        }
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn schema_cookie(&self) -> u32 {
        self.schema_cookie.get()
    }

    pub fn bump_schema_cookie(&mut self) {
        self.schema_cookie = (self.schema_cookie.get() + 1).into();
    }

    pub fn catalog_root(&self) -> u32 {
        self.catalog_root.get()
    }

    pub fn set_catalog_root(&mut self, root: u32) {
        self.catalog_root = root.into();
    }

    pub fn freelist_root(&self) -> u32 {
        self.freelist_root.get()
    }

    pub fn set_freelist_root(&mut self, root: u32) {
        self.freelist_root = root.into();
    }

    pub fn freelist_head(&self) -> u32 {
        self.freelist_head.get()
    }

    pub fn set_freelist_head(&mut self, head: u32) {
        self.freelist_head = head.into();
    }

    pub fn freelist_count(&self) -> u32 {
        self.freelist_count.get()
    }

    pub fn set_freelist_count(&mut self, count: u32) {
        self.freelist_count = count.into();
    }

    pub fn last_checkpoint_lsn(&self) -> u64 {
        self.last_checkpoint_lsn.get()
    }

    pub fn set_last_checkpoint_lsn(&mut self, lsn: u64) {
        self.last_checkpoint_lsn = lsn.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_validates() {
        let header = DbHeader::default();
        header.validate().unwrap();
    }

    #[test]
    fn round_trip_through_bytes() {
        let mut header = DbHeader::new(8192);
        header.set_catalog_root(2);
        header.bump_schema_cookie();
        let bytes = header.to_bytes();

        let parsed = DbHeader::parse(&bytes).unwrap();
        assert_eq!(parsed.page_size(), 8192);
        assert_eq!(parsed.catalog_root(), 2);
        assert_eq!(parsed.schema_cookie(), 1);
    }

    #[test]
    fn bit_flip_is_detected() {
        let header = DbHeader::new(4096);
        let mut bytes = header.to_bytes();
        bytes[5] ^= 0x01;
        assert!(DbHeader::parse(&bytes).is_err());
    }

    #[test]
    fn rejects_bad_page_size() {
        let mut header = DbHeader::new(4096);
        header.page_size = 777.into();
        header.recompute_checksum();
        let bytes = header.to_bytes();
        assert!(DbHeader::parse(&bytes).is_err());
    }
}
