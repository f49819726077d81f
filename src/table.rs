//! Definition-block tables: header validation and the installed-tables
//! registry the interpreter consumes.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AmlError, Result};

/// Size of the common system-description-table header.
pub const HEADER_SIZE: usize = 36;

/// The common ACPI SDT header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtHeader {
    /// Four-character table signature (`DSDT`, `SSDT`, ...).
    pub signature: [u8; 4],
    /// Total table length, header included.
    pub length: u32,
    /// Table revision; a DSDT below 2 selects 32-bit integers.
    pub revision: u8,
    /// OEM identifier.
    pub oem_id: [u8; 6],
    /// OEM table identifier.
    pub oem_table_id: [u8; 8],
    /// OEM revision number.
    pub oem_revision: u32,
    /// Compiler vendor id.
    pub creator_id: u32,
    /// Compiler revision.
    pub creator_revision: u32,
}

impl SdtHeader {
    /// Parse and validate a header against the full `data` image: length
    /// sanity and a zero modulo-256 byte sum.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(AmlError::InvalidTableLength);
        }

        let length = u32::from_le_bytes(data[4..8].try_into().expect("sized slice"));
        if (length as usize) < HEADER_SIZE || (length as usize) > data.len() {
            return Err(AmlError::InvalidTableLength);
        }

        let sum = data[..length as usize]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(AmlError::BadChecksum);
        }

        Ok(Self {
            signature: data[0..4].try_into().expect("sized slice"),
            length,
            revision: data[8],
            oem_id: data[10..16].try_into().expect("sized slice"),
            oem_table_id: data[16..24].try_into().expect("sized slice"),
            oem_revision: u32::from_le_bytes(data[24..28].try_into().expect("sized slice")),
            creator_id: u32::from_le_bytes(data[28..32].try_into().expect("sized slice")),
            creator_revision: u32::from_le_bytes(data[32..36].try_into().expect("sized slice")),
        })
    }
}

/// One installed definition block.
pub struct Table {
    /// Validated header.
    pub header: SdtHeader,
    /// The full table image, header included. Methods keep this alive.
    pub image: Arc<[u8]>,
}

impl Table {
    /// Offset of the first AML byte.
    pub fn aml_start(&self) -> u32 {
        HEADER_SIZE as u32
    }

    /// Length of the AML byte stream.
    pub fn aml_len(&self) -> u32 {
        self.header.length - HEADER_SIZE as u32
    }
}

/// Registry of installed definition blocks. Indices are stable across
/// uninstalls.
#[derive(Default)]
pub struct TableRegistry {
    tables: Vec<Option<Table>>,
}

impl TableRegistry {
    /// Validate and install a DSDT or SSDT image. Returns its index.
    pub fn install(&mut self, data: &[u8]) -> Result<usize> {
        let header = SdtHeader::parse(data)?;

        match &header.signature {
            b"DSDT" | b"SSDT" => {}
            other => {
                warn!(
                    signature = %String::from_utf8_lossy(&other[..]),
                    "refusing to load a non definition-block table"
                );
                return Err(AmlError::InvalidSignature);
            }
        }

        let mut image = Vec::new();
        image
            .try_reserve_exact(header.length as usize)
            .map_err(|_| AmlError::OutOfMemory)?;
        image.extend_from_slice(&data[..header.length as usize]);

        info!(
            signature = %String::from_utf8_lossy(&header.signature),
            length = header.length,
            revision = header.revision,
            oem = %String::from_utf8_lossy(&header.oem_id),
            "installed definition block"
        );

        self.tables.push(Some(Table {
            header,
            image: image.into(),
        }));
        Ok(self.tables.len() - 1)
    }

    /// The table at `index`, unless it was uninstalled.
    pub fn get(&self, index: usize) -> Option<&Table> {
        self.tables.get(index).and_then(|t| t.as_ref())
    }

    /// Drop the table at `index` from the registry. Method objects keep the
    /// image alive until they die.
    pub fn uninstall(&mut self, index: usize) -> Result<Table> {
        self.tables
            .get_mut(index)
            .and_then(|t| t.take())
            .ok_or(AmlError::InvalidArgument)
    }

    /// Number of installed tables.
    pub fn len(&self) -> usize {
        self.tables.iter().flatten().count()
    }

    /// Whether no tables are installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_table(signature: &[u8; 4], revision: u8, aml: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(signature);
        let length = (HEADER_SIZE + aml.len()) as u32;
        data[4..8].copy_from_slice(&length.to_le_bytes());
        data[8] = revision;
        data[10..16].copy_from_slice(b"AMLVM ");
        data[16..24].copy_from_slice(b"TESTTBL ");
        data.extend_from_slice(aml);

        let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        data[9] = 0u8.wrapping_sub(sum);
        data
    }

    #[test]
    fn install_valid_dsdt() {
        let mut registry = TableRegistry::default();
        let data = build_table(b"DSDT", 2, &[0xA3]);
        let idx = registry.install(&data).unwrap();

        let table = registry.get(idx).unwrap();
        assert_eq!(table.header.revision, 2);
        assert_eq!(table.aml_len(), 1);
        assert_eq!(&table.image[table.aml_start() as usize..], &[0xA3]);
    }

    #[test]
    fn uninstall_retires_the_slot() {
        let mut registry = TableRegistry::default();
        let first = registry.install(&build_table(b"DSDT", 2, &[])).unwrap();
        let second = registry.install(&build_table(b"SSDT", 2, &[0xA3])).unwrap();

        let table = registry.uninstall(second).unwrap();
        assert_eq!(&table.header.signature, b"SSDT");
        assert_eq!(registry.len(), 1);
        assert!(registry.get(second).is_none());
        assert!(registry.get(first).is_some());

        // A retired slot stays retired.
        assert!(registry.uninstall(second).is_err());
    }

    #[test]
    fn reject_bad_checksum() {
        let mut registry = TableRegistry::default();
        let mut data = build_table(b"DSDT", 2, &[]);
        data[9] ^= 0xFF;
        assert_eq!(registry.install(&data), Err(AmlError::BadChecksum));
    }

    #[test]
    fn reject_foreign_signature() {
        let mut registry = TableRegistry::default();
        let data = build_table(b"FACP", 2, &[]);
        assert_eq!(registry.install(&data), Err(AmlError::InvalidSignature));
    }

    #[test]
    fn reject_truncated_image() {
        let mut registry = TableRegistry::default();
        let mut data = build_table(b"SSDT", 2, &[0xA3, 0xA3]);
        data.truncate(data.len() - 1);
        assert_eq!(registry.install(&data), Err(AmlError::InvalidTableLength));
    }
}
