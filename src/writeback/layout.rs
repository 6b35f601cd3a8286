// src/writeback/layout.rs

use anyhow::{bail, Context, Result};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::scan::FieldSpec;

const HEADER_PREFIX: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const NAME_LEN: usize = 11;
const TERMINATOR: u8 = 0x0D;
const PADDING: u8 = b' ';

/// Where one field's bytes sit inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub offset: u64,
    pub length: usize,
}

/// Byte layout of a table's records, read from the file header.
///
/// Writes go straight to the slot with bytes the caller already encoded,
/// so stored text follows the code page the table was read with.
#[derive(Debug, Clone)]
pub struct TableLayout {
    path: PathBuf,
    header_len: u64,
    record_len: u64,
    num_records: u64,
    slots: Vec<(String, FieldSlot)>,
}

impl TableLayout {
    pub fn read(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("opening {} for update", path.display()))?;

        let mut prefix = [0u8; HEADER_PREFIX];
        file.read_exact(&mut prefix)
            .with_context(|| format!("reading header of {}", path.display()))?;
        let num_records = u64::from(u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]));
        let header_len = u64::from(u16::from_le_bytes([prefix[8], prefix[9]]));
        let record_len = u64::from(u16::from_le_bytes([prefix[10], prefix[11]]));
        if header_len <= HEADER_PREFIX as u64 {
            bail!("{}: header length {} is too short", path.display(), header_len);
        }

        let mut descriptors = vec![0u8; header_len as usize - HEADER_PREFIX];
        file.read_exact(&mut descriptors)
            .with_context(|| format!("reading field descriptors of {}", path.display()))?;

        // byte 0 of every record is the deletion flag
        let mut offset = 1u64;
        let mut slots = Vec::new();
        for descriptor in descriptors.chunks_exact(DESCRIPTOR_LEN) {
            if descriptor[0] == TERMINATOR {
                break;
            }
            let name_end = descriptor[..NAME_LEN]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(NAME_LEN);
            let name = String::from_utf8_lossy(&descriptor[..name_end]).trim().to_string();
            let length = usize::from(descriptor[16]);
            slots.push((name, FieldSlot { offset, length }));
            offset += length as u64;
        }
        if offset > record_len {
            bail!(
                "{}: fields span {} bytes but records are {} bytes long",
                path.display(),
                offset,
                record_len
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            header_len,
            record_len,
            num_records,
            slots,
        })
    }

    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    /// The slot of a catalog field; its length must agree with the header.
    pub fn slot(&self, field: &FieldSpec) -> Result<FieldSlot> {
        let slot = self
            .slots
            .iter()
            .find(|(name, _)| *name == field.name)
            .map(|(_, slot)| *slot)
            .with_context(|| format!("{} has no field {}", self.path.display(), field.name))?;
        if slot.length != usize::from(field.length) {
            bail!(
                "{}: field {} is {} bytes in the header but {} in the catalog",
                self.path.display(),
                field.name,
                slot.length,
                field.length
            );
        }
        Ok(slot)
    }

    /// Store `bytes` in one field of one record, right-padded with blanks.
    ///
    /// The table is opened for this write only.
    pub fn write_field(&self, record: usize, slot: FieldSlot, bytes: &[u8]) -> Result<()> {
        let record = record as u64;
        if record >= self.num_records {
            bail!("{} has no record {}", self.path.display(), record);
        }
        if bytes.len() > slot.length {
            bail!(
                "{}: {} bytes do not fit a {} byte field",
                self.path.display(),
                bytes.len(),
                slot.length
            );
        }
        let mut padded = bytes.to_vec();
        padded.resize(slot.length, PADDING);

        let position = self.header_len + record * self.record_len + slot.offset;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .with_context(|| format!("opening {} for update", self.path.display()))?;
        file.seek(SeekFrom::Start(position))?;
        file.write_all(&padded)
            .with_context(|| format!("writing record {} of {}", record, self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_fields;
    use crate::scan::table::tests::write_comment_table;
    use crate::scan::read_catalog;
    use tempfile::tempdir;

    #[test]
    fn slots_follow_the_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.dbf");
        write_comment_table(&path, &[("a", "eins"), ("b", "zwei")])?;

        let layout = TableLayout::read(&path)?;
        assert_eq!(layout.num_records(), 2);
        let catalog = read_catalog(&path, encoding_rs::WINDOWS_1252)?;
        let slots: Vec<FieldSlot> = catalog
            .fields
            .iter()
            .map(|f| layout.slot(f))
            .collect::<Result<_>>()?;
        assert_eq!(
            slots,
            vec![
                FieldSlot { offset: 1, length: 20 },
                FieldSlot { offset: 21, length: 40 },
                FieldSlot { offset: 61, length: 10 },
            ]
        );
        Ok(())
    }

    #[test]
    fn writes_land_in_the_right_record() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.dbf");
        write_comment_table(&path, &[("a", "eins"), ("b", "zwei")])?;
        let catalog = read_catalog(&path, encoding_rs::WINDOWS_1252)?;
        let comment = &catalog.fields[1];

        let layout = TableLayout::read(&path)?;
        layout.write_field(1, layout.slot(comment)?, b"two")?;

        let rows = extract_fields(&path, &catalog.fields, encoding_rs::WINDOWS_1252)?;
        assert_eq!(rows[0].text("COMMENT").as_deref(), Some("eins"));
        assert_eq!(rows[1].text("COMMENT").as_deref(), Some("two"));
        assert_eq!(rows[1].text("NAME").as_deref(), Some("b"));
        assert_eq!(rows[1].text("OTHER").as_deref(), Some("x"));
        Ok(())
    }

    #[test]
    fn refuses_out_of_range_writes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.dbf");
        write_comment_table(&path, &[("a", "eins")])?;
        let catalog = read_catalog(&path, encoding_rs::WINDOWS_1252)?;
        let layout = TableLayout::read(&path)?;
        let slot = layout.slot(&catalog.fields[2])?;

        assert!(layout.write_field(1, slot, b"x").is_err());
        assert!(layout.write_field(0, slot, &[b'y'; 11]).is_err());

        let mut wrong = catalog.fields[2].clone();
        wrong.length = 9;
        assert!(layout.slot(&wrong).is_err());
        Ok(())
    }
}
