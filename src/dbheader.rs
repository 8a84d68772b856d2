//! The database file header (§4.2, §6): a fixed little-endian layout in the first
//! `HEADER_SIZE` bytes of page 1, protected by a trailing CRC32C.

use byteorder::{ByteOrder, LittleEndian};

use crate::config::{FILE_MAGIC, FORMAT_VERSION, HEADER_SIZE, PAGE_SIZE};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("wrong magic bytes in database header")]
    WrongMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),
    #[error("unsupported page size {0}")]
    UnsupportedPageSize(u32),
    #[error("database header checksum mismatch")]
    BadChecksum,
    #[error("database file is shorter than one page")]
    TooShort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbHeader {
    pub format_version: u16,
    pub page_size: u32,
    pub schema_cookie: u64,
    pub root_catalog: u32,
    pub freelist_head: u32,
    pub freelist_count: u32,
    pub last_checkpoint_lsn: u64,
}

impl DbHeader {
    pub fn new_empty(root_catalog: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE as u32,
            schema_cookie: 0,
            root_catalog,
            freelist_head: 0,
            freelist_count: 0,
            last_checkpoint_lsn: 0,
        }
    }

    /// Encode the header into the first `HEADER_SIZE` bytes of `page` (a full `PAGE_SIZE` buffer).
    pub fn encode_into(&self, page: &mut [u8]) {
        assert!(page.len() >= PAGE_SIZE);
        let buf = &mut page[0..HEADER_SIZE];
        for b in buf.iter_mut() {
            *b = 0;
        }
        buf[0..4].copy_from_slice(FILE_MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], self.format_version);
        LittleEndian::write_u32(&mut buf[6..10], self.page_size);
        LittleEndian::write_u64(&mut buf[10..18], self.schema_cookie);
        LittleEndian::write_u32(&mut buf[18..22], self.root_catalog);
        LittleEndian::write_u32(&mut buf[22..26], self.freelist_head);
        LittleEndian::write_u32(&mut buf[26..30], self.freelist_count);
        LittleEndian::write_u64(&mut buf[30..38], self.last_checkpoint_lsn);
        // bytes [38..HEADER_SIZE-4) reserved, stay zero
        let crc = crc32c::crc32c(&buf[0..HEADER_SIZE - 4]);
        LittleEndian::write_u32(&mut buf[HEADER_SIZE - 4..HEADER_SIZE], crc);
    }

    pub fn decode(page: &[u8]) -> Result<Self, Error> {
        if page.len() < PAGE_SIZE {
            return Err(Error::TooShort);
        }
        let buf = &page[0..HEADER_SIZE];
        if &buf[0..4] != FILE_MAGIC.as_slice() {
            return Err(Error::WrongMagic);
        }
        let format_version = LittleEndian::read_u16(&buf[4..6]);
        if format_version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(format_version));
        }
        let page_size = LittleEndian::read_u32(&buf[6..10]);
        if page_size as usize != PAGE_SIZE {
            return Err(Error::UnsupportedPageSize(page_size));
        }
        let expected_crc = LittleEndian::read_u32(&buf[HEADER_SIZE - 4..HEADER_SIZE]);
        let actual_crc = crc32c::crc32c(&buf[0..HEADER_SIZE - 4]);
        if expected_crc != actual_crc {
            return Err(Error::BadChecksum);
        }
        Ok(Self {
            format_version,
            page_size,
            schema_cookie: LittleEndian::read_u64(&buf[10..18]),
            root_catalog: LittleEndian::read_u32(&buf[18..22]),
            freelist_head: LittleEndian::read_u32(&buf[22..26]),
            freelist_count: LittleEndian::read_u32(&buf[26..30]),
            last_checkpoint_lsn: LittleEndian::read_u64(&buf[30..38]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = DbHeader {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE as u32,
            schema_cookie: 42,
            root_catalog: 2,
            freelist_head: 0,
            freelist_count: 0,
            last_checkpoint_lsn: 7,
        };
        let mut page = vec![0u8; PAGE_SIZE];
        h.encode_into(&mut page);
        let decoded = DbHeader::decode(&page).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let page = vec![0u8; PAGE_SIZE];
        assert_eq!(DbHeader::decode(&page), Err(Error::WrongMagic));
    }

    #[test]
    fn header_rejects_corrupted_checksum() {
        let h = DbHeader::new_empty(2);
        let mut page = vec![0u8; PAGE_SIZE];
        h.encode_into(&mut page);
        page[10] ^= 0xff;
        assert_eq!(DbHeader::decode(&page), Err(Error::BadChecksum));
    }

    #[test]
    fn header_rejects_short_file() {
        let page = vec![0u8; 10];
        assert_eq!(DbHeader::decode(&page), Err(Error::TooShort));
    }
}
