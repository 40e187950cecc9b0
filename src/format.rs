// SPDX-License-Identifier: MIT
//! Bundle (.dat) on-disk format
//!
//! Defines the 256-byte envelope, the tree magic numbers and the byte offsets
//! of the record fields the decoders rely on.

use crate::error::FormatError;
use crate::swap::{host_is_little_endian, Scalar};

/// Signature of a supported bundle: "DAT2"
pub const BUNDLE_SIGNATURE: &[u8; 8] = b"DAT2\0\0\0\0";

/// Signature of the superseded bundle format: "DAT1"
pub const BUNDLE_SIGNATURE_SUPERSEDED: &[u8; 8] = b"DAT1\0\0\0\0";

/// Envelope size in bytes
pub const BUNDLE_HEADER_SIZE: usize = 256;

/// Capacity of the envelope's directory
pub const MAX_BUNDLE_ITEMS: usize = 12;

/// Size of one directory entry
pub const BUNDLE_ITEM_SIZE: usize = 16;

/// Tree magic number as read on a host of the recording machine's byte order
pub const TREE_MAGIC: u32 = 0x5472_6565;

/// Tree magic number as read on a host of the opposite byte order
pub const TREE_MAGIC_SWAPPED: u32 = 0x6565_7254;

/// Envelope field offsets
pub mod envelope {
    pub const SIGNATURE: usize = 0;
    pub const VERSION: usize = 8;
    pub const VERSION_LEN: usize = 32;
    pub const TIME: usize = 40;
    pub const ITEMS: usize = 48;
    pub const IS_LITTLE_ENDIAN: usize = 52;
    pub const DIRECTORY: usize = 64;
}

/// Extension tags of the embedded items
pub mod ext {
    pub const DAT: &[u8] = b".dat";
    pub const PUL: &[u8] = b".pul";
    pub const PGF: &[u8] = b".pgf";
    pub const AMP: &[u8] = b".amp";
}

/// Recording modes stored in a trace record
pub mod recording_mode {
    pub const IN_OUT: u8 = 0;
    pub const ON_CELL: u8 = 1;
    pub const OUT_OUT: u8 = 2;
    pub const WHOLE_CELL: u8 = 3;
    pub const C_CLAMP: u8 = 4;
    pub const V_CLAMP: u8 = 5;
    pub const NO_MODE: u8 = 6;
}

/// Bits of the trace data-kind set
pub mod data_kind {
    pub const LITTLE_ENDIAN: u16 = 1;
    pub const IS_LEAK: u16 = 1 << 1;
    pub const IS_IMON: u16 = 1 << 3;
    pub const IS_VMON: u16 = 1 << 4;
    pub const CLIP: u16 = 1 << 5;
}

/// Field offsets in pulse tree records (.pul)
pub mod pulse {
    // root
    pub const RO_VERSION_NAME: usize = 8;
    pub const RO_START_TIME: usize = 520;
    // group
    pub const GR_LABEL: usize = 4;
    pub const GR_GROUP_COUNT: usize = 120;
    // series
    pub const SE_LABEL: usize = 4;
    pub const SE_SERIES_COUNT: usize = 116;
    pub const SE_AMPL_STATE_FLAG: usize = 124;
    /// 1-based index into the amplifier tree, 0 selects the embedded state
    pub const SE_AMPL_STATE_REF: usize = 128;
    pub const SE_TIME: usize = 136;
    pub const SE_OLD_AMP_STATE: usize = 472;
    // sweep
    pub const SW_LABEL: usize = 4;
    pub const SW_STIM_COUNT: usize = 40;
    pub const SW_SWEEP_COUNT: usize = 44;
    pub const SW_TIME: usize = 48;
    pub const SW_TIMER: usize = 56;
    // trace
    pub const TR_LABEL: usize = 4;
    pub const TR_TRACE_COUNT: usize = 36;
    pub const TR_DATA: usize = 40;
    pub const TR_DATA_POINTS: usize = 44;
    pub const TR_DATA_KIND: usize = 64;
    pub const TR_RECORDING_MODE: usize = 68;
    pub const TR_DATA_FORMAT: usize = 70;
    pub const TR_DATA_SCALER: usize = 72;
    pub const TR_Y_UNIT: usize = 96;
    pub const TR_X_INTERVAL: usize = 104;
    pub const TR_X_START: usize = 112;
    pub const TR_X_UNIT: usize = 120;
    pub const TR_INTERLEAVE_SIZE: usize = 292;
    pub const TR_INTERLEAVE_SKIP: usize = 296;
    pub const TR_HOLDING: usize = 408;
}

/// Field offsets in amplifier tree records (.amp)
pub mod amp {
    pub const AMPLIFIER_STATE_SIZE: usize = 400;
    pub const AM_STATE_COUNT: usize = 4;
    pub const AM_AMPLIFIER_STATE: usize = 112;
}

/// Field offsets in stimulus tree records (.pgf)
pub mod stim {
    // stimulation
    pub const ST_ENTRY_NAME: usize = 4;
    pub const ST_FILE_NAME: usize = 36;
    pub const ST_DATA_START_SEGMENT: usize = 100;
    pub const ST_DATA_START_TIME: usize = 104;
    pub const ST_SAMPLE_INTERVAL: usize = 112;
    pub const ST_SWEEP_INTERVAL: usize = 120;
    pub const ST_NUMBER_SWEEPS: usize = 144;
    pub const ST_NUMBER_AVERAGES: usize = 152;
    pub const ST_ACTUAL_ADC_CHANNELS: usize = 156;
    pub const ST_ACTUAL_DAC_CHANNELS: usize = 160;
    pub const ST_EXT_TRIGGER: usize = 164;
    pub const ST_HAS_LOCK_IN: usize = 168;
    // channel
    pub const CH_LINKED_CHANNEL: usize = 4;
    pub const CH_ADC_CHANNEL: usize = 20;
    pub const CH_ADC_MODE: usize = 22;
    pub const CH_SET_LAST_SEG_VMEMB: usize = 27;
    pub const CH_DAC_CHANNEL: usize = 28;
    pub const CH_DAC_MODE: usize = 30;
    pub const CH_DAC_UNIT: usize = 40;
    /// Holding level; current-clamp values are stored in nA
    pub const CH_HOLDING: usize = 48;
    // segment
    pub const SE_CLASS: usize = 4;
    pub const SE_STORE_KIND: usize = 5;
    pub const SE_VOLTAGE_INC_MODE: usize = 6;
    pub const SE_DURATION_INC_MODE: usize = 7;
    pub const SE_VOLTAGE: usize = 8;
    pub const SE_VOLTAGE_SOURCE: usize = 16;
    pub const SE_DELTA_V_FACTOR: usize = 20;
    pub const SE_DELTA_V_INCREMENT: usize = 28;
    pub const SE_DURATION: usize = 36;
    pub const SE_DURATION_SOURCE: usize = 44;
    pub const SE_DELTA_T_FACTOR: usize = 48;
    pub const SE_DELTA_T_INCREMENT: usize = 56;
}

/// One directory entry of the envelope, already byte-swapped if needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleItem {
    /// File offset of the item
    pub start: i32,
    /// Length of the item in bytes
    pub length: i32,
    /// Zero-padded extension tag, e.g. ".pul"
    pub extension: [u8; 8],
}

impl BundleItem {
    /// Extension up to (not including) the first NUL
    pub fn extension_tag(&self) -> &[u8] {
        let end = self
            .extension
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.extension.len());
        &self.extension[..end]
    }

    /// Extension as printable text
    pub fn extension_name(&self) -> String {
        String::from_utf8_lossy(self.extension_tag()).into_owned()
    }
}

/// The bundle envelope (256 bytes)
#[derive(Debug, Clone, PartialEq)]
pub struct BundleHeader {
    /// Signature: "DAT2\0\0\0\0" for supported files
    pub signature: [u8; 8],

    /// Name and version of the creating program (zero padded)
    pub version: [u8; 32],

    /// Creation time as stored (not yet swapped)
    raw_time: f64,

    /// Item count as stored (not yet swapped)
    raw_items: i32,

    /// Non-zero if the file was written little-endian
    pub is_little_endian: u8,

    /// Raw directory bytes
    directory: [u8; MAX_BUNDLE_ITEMS * BUNDLE_ITEM_SIZE],
}

impl BundleHeader {
    /// Create header from raw bytes
    pub fn from_bytes(bytes: &[u8; BUNDLE_HEADER_SIZE]) -> Self {
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&bytes[envelope::SIGNATURE..envelope::SIGNATURE + 8]);
        let mut version = [0u8; 32];
        version.copy_from_slice(
            &bytes[envelope::VERSION..envelope::VERSION + envelope::VERSION_LEN],
        );
        let raw_time = f64::from_host_bytes(&bytes[envelope::TIME..envelope::TIME + 8]);
        let raw_items = i32::from_host_bytes(&bytes[envelope::ITEMS..envelope::ITEMS + 4]);
        let mut directory = [0u8; MAX_BUNDLE_ITEMS * BUNDLE_ITEM_SIZE];
        directory.copy_from_slice(&bytes[envelope::DIRECTORY..BUNDLE_HEADER_SIZE]);

        Self {
            signature,
            version,
            raw_time,
            raw_items,
            is_little_endian: bytes[envelope::IS_LITTLE_ENDIAN],
            directory,
        }
    }

    /// Check the signature
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.signature == *BUNDLE_SIGNATURE {
            Ok(())
        } else if self.signature == *BUNDLE_SIGNATURE_SUPERSEDED {
            Err(FormatError::SupersededSignature)
        } else {
            Err(FormatError::UnknownSignature(self.signature))
        }
    }

    /// Whether the file's byte order differs from the host's
    #[inline]
    pub fn is_swapped(&self) -> bool {
        (self.is_little_endian != 0) != host_is_little_endian()
    }

    /// Creation time in PatchMaster seconds
    pub fn creation_time(&self) -> f64 {
        f64::read_from(&self.raw_time.to_ne_bytes(), self.is_swapped())
    }

    /// Item count exactly as stored
    pub fn stored_item_count(&self) -> i32 {
        i32::read_from(&self.raw_items.to_ne_bytes(), self.is_swapped())
    }

    /// Item count clamped to the directory capacity
    pub fn item_count(&self) -> usize {
        self.stored_item_count().clamp(0, MAX_BUNDLE_ITEMS as i32) as usize
    }

    /// Creator name and version, cut at the first NUL
    pub fn version_string(&self) -> String {
        let end = self.version.iter().position(|&b| b == 0).unwrap_or(32);
        self.version[..end].iter().map(|&b| b as char).collect()
    }

    /// Directory entries in stored order, limited to [`Self::item_count`]
    pub fn items(&self) -> impl Iterator<Item = BundleItem> + '_ {
        let swapped = self.is_swapped();
        self.directory
            .chunks_exact(BUNDLE_ITEM_SIZE)
            .take(self.item_count())
            .map(move |chunk| {
                let mut extension = [0u8; 8];
                extension.copy_from_slice(&chunk[8..16]);
                BundleItem {
                    start: i32::read_from(&chunk[0..4], swapped),
                    length: i32::read_from(&chunk[4..8], swapped),
                    extension,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(signature: &[u8; 8], items: i32) -> [u8; BUNDLE_HEADER_SIZE] {
        let mut bytes = [0u8; BUNDLE_HEADER_SIZE];
        bytes[0..8].copy_from_slice(signature);
        bytes[8..15].copy_from_slice(b"v2x90.5");
        bytes[envelope::TIME..envelope::TIME + 8].copy_from_slice(&1234.5f64.to_ne_bytes());
        bytes[envelope::ITEMS..envelope::ITEMS + 4].copy_from_slice(&items.to_ne_bytes());
        bytes[envelope::IS_LITTLE_ENDIAN] = host_is_little_endian() as u8;
        let entry = envelope::DIRECTORY;
        bytes[entry..entry + 4].copy_from_slice(&256i32.to_ne_bytes());
        bytes[entry + 4..entry + 8].copy_from_slice(&20i32.to_ne_bytes());
        bytes[entry + 8..entry + 12].copy_from_slice(ext::PUL);
        bytes
    }

    #[test]
    fn test_header_validate_valid() {
        let header = BundleHeader::from_bytes(&header_bytes(BUNDLE_SIGNATURE, 1));
        assert!(header.validate().is_ok());
        assert!(!header.is_swapped());
        assert_eq!(header.creation_time(), 1234.5);
        assert_eq!(header.version_string(), "v2x90.5");
    }

    #[test]
    fn test_header_validate_superseded() {
        let header = BundleHeader::from_bytes(&header_bytes(BUNDLE_SIGNATURE_SUPERSEDED, 1));
        assert_eq!(header.validate(), Err(FormatError::SupersededSignature));
    }

    #[test]
    fn test_header_validate_garbage() {
        let header = BundleHeader::from_bytes(&header_bytes(b"ZIP\0\0\0\0\0", 1));
        assert!(matches!(
            header.validate(),
            Err(FormatError::UnknownSignature(_))
        ));
    }

    #[test]
    fn test_item_count_is_clamped() {
        let header = BundleHeader::from_bytes(&header_bytes(BUNDLE_SIGNATURE, 5000));
        assert_eq!(header.stored_item_count(), 5000);
        assert_eq!(header.item_count(), MAX_BUNDLE_ITEMS);
        assert_eq!(header.items().count(), MAX_BUNDLE_ITEMS);

        let header = BundleHeader::from_bytes(&header_bytes(BUNDLE_SIGNATURE, -3));
        assert_eq!(header.item_count(), 0);
    }

    #[test]
    fn test_items_decode_first_entry() {
        let header = BundleHeader::from_bytes(&header_bytes(BUNDLE_SIGNATURE, 1));
        let item = header.items().next().unwrap();
        assert_eq!(item.start, 256);
        assert_eq!(item.length, 20);
        assert_eq!(item.extension_tag(), ext::PUL);
        assert_eq!(item.extension_name(), ".pul");
    }

    #[test]
    fn test_swapped_header_fields() {
        let mut bytes = header_bytes(BUNDLE_SIGNATURE, 0);
        bytes[envelope::IS_LITTLE_ENDIAN] = (!host_is_little_endian()) as u8;
        bytes[envelope::ITEMS..envelope::ITEMS + 4].copy_from_slice(&2i32.to_ne_bytes());
        let mut swapped_items = bytes[envelope::ITEMS..envelope::ITEMS + 4].to_vec();
        swapped_items.reverse();
        bytes[envelope::ITEMS..envelope::ITEMS + 4].copy_from_slice(&swapped_items);

        let header = BundleHeader::from_bytes(&bytes);
        assert!(header.is_swapped());
        assert_eq!(header.stored_item_count(), 2);
    }
}
