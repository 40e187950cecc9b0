// SPDX-License-Identifier: MIT
//! Bundle reader for PatchMaster .dat files

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FormatError, ReadError};
use crate::format::{amp, ext, pulse, BundleHeader, BUNDLE_HEADER_SIZE, MAX_BUNDLE_ITEMS};
use crate::record::{ByteSpan, FieldRecord};
use crate::stim::{StimError, StimTree};
use crate::time;
use crate::tree::{Level, Record, Tree, TreeKind};

/// Which sections a bundle must contain to be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub require_stimulus: bool,
    pub require_raw_data: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::strict()
    }
}

impl DecodeOptions {
    /// Pulse tree, stimulus tree and raw data are all required
    pub const fn strict() -> Self {
        Self {
            require_stimulus: true,
            require_raw_data: true,
        }
    }

    /// Only the pulse tree is required
    pub const fn lenient() -> Self {
        Self {
            require_stimulus: false,
            require_raw_data: false,
        }
    }
}

/// Byte range of the raw sample section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRange {
    pub start: u64,
    pub length: u64,
}

/// Creator version parsed from strings like `v2x90.5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub fn parse(creator: &str) -> Option<Self> {
        let rest = creator.trim().strip_prefix('v')?;
        let (major, rest) = rest.split_once('x')?;
        let minor: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

/// An amplifier state: 400 bytes, embedded in a series or taken from the
/// amplifier tree
#[derive(Debug, Clone, Copy)]
pub struct AmplifierState<'a> {
    /// Amplifier number, if the state came from the amplifier tree
    pub amplifier: Option<i32>,
    span: ByteSpan<'a>,
}

impl FieldRecord for AmplifierState<'_> {
    fn span(&self) -> ByteSpan<'_> {
        self.span
    }
}

/// At most one state's worth of bytes starting at `offset`
fn state_span<'a>(span: &ByteSpan<'a>, offset: usize) -> Option<ByteSpan<'a>> {
    let available = span.len().saturating_sub(offset).min(amp::AMPLIFIER_STATE_SIZE);
    if available == 0 {
        return None;
    }
    span.sub_span(offset, available).ok()
}

/// A decoded bundle
#[derive(Debug, Clone)]
pub struct Bundle {
    header: BundleHeader,
    pulse: Tree,
    stim: Option<Tree>,
    amp: Option<Tree>,
    raw_data: Option<DataRange>,
}

impl Bundle {
    /// Decode with [`DecodeOptions::strict`]
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Result<Self, ReadError> {
        Self::from_reader_with(reader, DecodeOptions::strict())
    }

    pub fn from_reader_with<R: Read + Seek>(
        reader: &mut R,
        options: DecodeOptions,
    ) -> Result<Self, ReadError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut bytes = [0u8; BUNDLE_HEADER_SIZE];
        reader.read_exact(&mut bytes)?;
        let header = BundleHeader::from_bytes(&bytes);
        header.validate()?;

        let stored = header.stored_item_count();
        if stored < 0 || stored > MAX_BUNDLE_ITEMS as i32 {
            warn!(
                stored,
                used = header.item_count(),
                "bundle item count out of range, clamped"
            );
        }
        debug!(
            creator = %header.version_string(),
            items = header.item_count(),
            swapped = header.is_swapped(),
            "bundle header"
        );

        let mut pulse_tree = None;
        let mut stim = None;
        let mut amp_tree = None;
        let mut raw_data = None;

        for item in header.items() {
            let kind = match item.extension_tag() {
                ext::PUL => TreeKind::Pulse,
                ext::PGF => TreeKind::Stimulus,
                ext::AMP => TreeKind::Amplifier,
                ext::DAT => {
                    raw_data = Some(Self::range_of(&item.extension_name(), item.start, item.length)?);
                    continue;
                }
                _ => {
                    warn!(extension = %item.extension_name(), "skipping unknown bundle item");
                    continue;
                }
            };
            let range = Self::range_of(&item.extension_name(), item.start, item.length)?;
            debug!(tree = %kind, start = range.start, length = range.length, "bundle item");
            let tree = Tree::from_stream(kind, reader, range.start, range.length)?;
            match kind {
                TreeKind::Pulse => pulse_tree = Some(tree),
                TreeKind::Stimulus => stim = Some(tree),
                TreeKind::Amplifier => amp_tree = Some(tree),
            }
        }

        if options.require_raw_data && raw_data.map_or(true, |r| r.length == 0) {
            return Err(FormatError::MissingRawData.into());
        }
        let mut pulse_tree = pulse_tree
            .filter(Tree::is_valid)
            .ok_or(FormatError::InvalidTree(TreeKind::Pulse))?;
        if options.require_stimulus && !stim.as_ref().is_some_and(Tree::is_valid) {
            return Err(FormatError::InvalidTree(TreeKind::Stimulus).into());
        }
        if amp_tree.is_none() {
            warn!("bundle has no amplifier tree");
        }

        let root = pulse_tree.root().id();
        pulse_tree.set_reference_time(root)?;

        Ok(Self {
            header,
            pulse: pulse_tree,
            stim,
            amp: amp_tree,
            raw_data,
        })
    }

    fn range_of(extension: &str, start: i32, length: i32) -> Result<DataRange, FormatError> {
        if start < 0 || length < 0 {
            return Err(FormatError::NegativeRange {
                extension: extension.to_string(),
                start,
                length,
            });
        }
        Ok(DataRange {
            start: start as u64,
            length: length as u64,
        })
    }

    /// Decode an in-memory bundle
    pub fn from_slice(data: &[u8]) -> Result<Self, ReadError> {
        Self::from_reader(&mut Cursor::new(data))
    }

    /// Open and decode a bundle file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        Self::open_with(path, DecodeOptions::strict())
    }

    pub fn open_with(path: impl AsRef<Path>, options: DecodeOptions) -> Result<Self, ReadError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::from_reader_with(&mut reader, options)
    }

    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    /// Creator name and version
    pub fn version(&self) -> String {
        self.header.version_string().trim().to_string()
    }

    pub fn format_version(&self) -> Option<FormatVersion> {
        FormatVersion::parse(&self.header.version_string())
    }

    /// Creation time as stored
    pub fn creation_time(&self) -> f64 {
        self.header.creation_time()
    }

    /// Creation date, `YYYY-MM-DD`
    pub fn file_date(&self) -> String {
        time::format_date(self.creation_time())
    }

    /// Creation date and time, `YYYY-MM-DDTHH:MM:SS UTC`
    pub fn file_date_utc(&self) -> String {
        time::format_utc(self.creation_time())
    }

    pub fn is_swapped(&self) -> bool {
        self.header.is_swapped()
    }

    pub fn pulse_tree(&self) -> &Tree {
        &self.pulse
    }

    /// Mutable access, for moving the reference time
    pub fn pulse_tree_mut(&mut self) -> &mut Tree {
        &mut self.pulse
    }

    pub fn stim_tree(&self) -> Option<&Tree> {
        self.stim.as_ref()
    }

    pub fn amp_tree(&self) -> Option<&Tree> {
        self.amp.as_ref()
    }

    pub fn raw_data(&self) -> Option<DataRange> {
        self.raw_data
    }

    /// Typed view of the stimulus tree
    pub fn stimulus(&self) -> Result<StimTree, StimError> {
        let tree = self
            .stim
            .as_ref()
            .ok_or(FormatError::InvalidTree(TreeKind::Stimulus))?;
        StimTree::from_tree(tree)
    }

    /// Amplifier states in effect for a series record.
    ///
    /// Older files embed a single state in the series record itself; newer
    /// ones refer to an amplifier tree entry with one state per amplifier.
    pub fn amplifier_states<'a>(
        &'a self,
        series: &Record<'a>,
    ) -> Result<Vec<AmplifierState<'a>>, ReadError> {
        series.expect_level(Level::Series)?;
        let flag: i32 = series.read_or(pulse::SE_AMPL_STATE_FLAG, 0);
        let reference: i32 = series.read_or(pulse::SE_AMPL_STATE_REF, 0);

        if flag > 0 || reference == 0 {
            let span = state_span(&series.span(), pulse::SE_OLD_AMP_STATE).ok_or_else(|| {
                FormatError::MissingAmplifierState("series record holds no state".to_string())
            })?;
            return Ok(vec![AmplifierState {
                amplifier: None,
                span,
            }]);
        }

        let amp_tree = self.amp.as_ref().ok_or_else(|| {
            FormatError::MissingAmplifierState("bundle has no amplifier tree".to_string())
        })?;
        let entry = usize::try_from(reference - 1)
            .ok()
            .and_then(|index| amp_tree.root().child(index))
            .ok_or_else(|| {
                FormatError::MissingAmplifierState(format!(
                    "reference {} not in amplifier tree",
                    reference
                ))
            })?;

        Ok(entry
            .children()
            .filter_map(|state| {
                Some(AmplifierState {
                    amplifier: state.read(amp::AM_STATE_COUNT).ok(),
                    span: state_span(&state.span(), amp::AM_AMPLIFIER_STATE)?,
                })
            })
            .collect())
    }

    /// Get bundle statistics
    pub fn stats(&self) -> BundleStats {
        BundleStats {
            stored_items: self.header.stored_item_count(),
            items: self.header.item_count(),
            pulse_records: self.pulse.len(),
            stim_records: self.stim.as_ref().map_or(0, Tree::len),
            amp_records: self.amp.as_ref().map_or(0, Tree::len),
            raw_data_size: self.raw_data.map_or(0, |r| r.length),
            swapped: self.is_swapped(),
        }
    }
}

/// Bundle statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleStats {
    pub stored_items: i32,
    pub items: usize,
    pub pulse_records: usize,
    pub stim_records: usize,
    pub amp_records: usize,
    pub raw_data_size: u64,
    pub swapped: bool,
}

impl BundleStats {
    /// Records across all trees
    pub fn total_records(&self) -> usize {
        self.pulse_records + self.stim_records + self.amp_records
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::{envelope, BUNDLE_SIGNATURE, BUNDLE_SIGNATURE_SUPERSEDED};
    use crate::swap::host_is_little_endian;
    use crate::tree::tests::TreeBuilder;

    /// Lays out a bundle: header, then items in the order added
    pub(crate) struct BundleBuilder {
        signature: [u8; 8],
        swap: bool,
        stored_items: Option<i32>,
        items: Vec<(&'static [u8], Vec<u8>)>,
    }

    impl BundleBuilder {
        pub(crate) fn new() -> Self {
            Self {
                signature: *BUNDLE_SIGNATURE,
                swap: false,
                stored_items: None,
                items: Vec::new(),
            }
        }

        pub(crate) fn signature(mut self, signature: &[u8; 8]) -> Self {
            self.signature = *signature;
            self
        }

        /// Write header numbers in the foreign byte order
        pub(crate) fn swapped(mut self) -> Self {
            self.swap = true;
            self
        }

        pub(crate) fn stored_items(mut self, count: i32) -> Self {
            self.stored_items = Some(count);
            self
        }

        pub(crate) fn item(mut self, extension: &'static [u8], payload: Vec<u8>) -> Self {
            self.items.push((extension, payload));
            self
        }

        fn put_i32(&self, b: &mut [u8], offset: usize, value: i32) {
            let mut bytes = value.to_ne_bytes();
            if self.swap {
                bytes.reverse();
            }
            b[offset..offset + 4].copy_from_slice(&bytes);
        }

        pub(crate) fn build(&self) -> Vec<u8> {
            let mut out = vec![0u8; BUNDLE_HEADER_SIZE];
            out[0..8].copy_from_slice(&self.signature);
            out[envelope::VERSION..envelope::VERSION + 7].copy_from_slice(b"v2x90.5");
            let mut time = time::from_unix_seconds(1_600_000_000).to_ne_bytes();
            if self.swap {
                time.reverse();
            }
            out[envelope::TIME..envelope::TIME + 8].copy_from_slice(&time);
            let count = self.stored_items.unwrap_or(self.items.len() as i32);
            self.put_i32(&mut out, envelope::ITEMS, count);
            out[envelope::IS_LITTLE_ENDIAN] = (host_is_little_endian() != self.swap) as u8;

            for (i, (extension, payload)) in self.items.iter().enumerate() {
                let entry = envelope::DIRECTORY + i * 16;
                let start = out.len() as i32;
                self.put_i32(&mut out, entry, start);
                self.put_i32(&mut out, entry + 4, payload.len() as i32);
                out[entry + 8..entry + 8 + extension.len()].copy_from_slice(extension);
                out.extend_from_slice(payload);
            }
            out
        }
    }

    /// Root-only tree with a record of `size` bytes
    pub(crate) fn single_record_tree(size: usize, swap: bool) -> Vec<u8> {
        TreeBuilder::with_order(&[size as i32], swap)
            .record(&vec![0u8; size], 0)
            .build()
    }

    fn complete() -> BundleBuilder {
        BundleBuilder::new()
            .item(ext::PUL, single_record_tree(4, false))
            .item(ext::PGF, single_record_tree(8, false))
            .item(ext::DAT, vec![1, 2, 3, 4])
    }

    #[test]
    fn test_complete_bundle() {
        let bundle = Bundle::from_slice(&complete().build()).unwrap();
        assert!(!bundle.is_swapped());
        assert_eq!(bundle.version(), "v2x90.5");
        assert_eq!(
            bundle.format_version(),
            Some(FormatVersion { major: 2, minor: 90 })
        );
        assert_eq!(bundle.file_date(), "2020-09-13");
        assert_eq!(bundle.file_date_utc(), "2020-09-13T12:26:40 UTC");
        assert_eq!(bundle.pulse_tree().root().num_children(), 0);
        assert!(bundle.stim_tree().is_some());
        assert!(bundle.amp_tree().is_none());

        let raw = bundle.raw_data().unwrap();
        assert_eq!(raw.length, 4);
        // header, 20-byte pulse tree, 24-byte stimulus tree
        assert_eq!(raw.start, (BUNDLE_HEADER_SIZE + 20 + 24) as u64);

        let stats = bundle.stats();
        assert_eq!(stats.items, 3);
        assert_eq!(stats.total_records(), 2);
        assert_eq!(stats.raw_data_size, 4);
    }

    #[test]
    fn test_strict_requires_all_sections() {
        let no_raw = BundleBuilder::new()
            .item(ext::PUL, single_record_tree(4, false))
            .item(ext::PGF, single_record_tree(8, false))
            .build();
        assert!(matches!(
            Bundle::from_slice(&no_raw),
            Err(ReadError::Format(FormatError::MissingRawData))
        ));

        let no_stim = BundleBuilder::new()
            .item(ext::PUL, single_record_tree(4, false))
            .item(ext::DAT, vec![0; 8])
            .build();
        assert!(matches!(
            Bundle::from_slice(&no_stim),
            Err(ReadError::Format(FormatError::InvalidTree(TreeKind::Stimulus)))
        ));

        let no_pulse = BundleBuilder::new()
            .item(ext::PGF, single_record_tree(8, false))
            .item(ext::DAT, vec![0; 8])
            .build();
        assert!(matches!(
            Bundle::from_slice(&no_pulse),
            Err(ReadError::Format(FormatError::InvalidTree(TreeKind::Pulse)))
        ));
    }

    #[test]
    fn test_lenient_pulse_only() {
        let data = BundleBuilder::new()
            .item(ext::PUL, single_record_tree(4, false))
            .build();
        let bundle =
            Bundle::from_reader_with(&mut Cursor::new(data), DecodeOptions::lenient()).unwrap();
        assert!(bundle.stim_tree().is_none());
        assert!(bundle.raw_data().is_none());
        assert!(matches!(bundle.stimulus(), Err(StimError::Format(_))));
    }

    #[test]
    fn test_signatures() {
        let superseded = complete().signature(BUNDLE_SIGNATURE_SUPERSEDED).build();
        assert!(matches!(
            Bundle::from_slice(&superseded),
            Err(ReadError::Format(FormatError::SupersededSignature))
        ));
        let garbage = complete().signature(b"PK\x03\x04\0\0\0\0").build();
        assert!(matches!(
            Bundle::from_slice(&garbage),
            Err(ReadError::Format(FormatError::UnknownSignature(_)))
        ));
    }

    #[test]
    fn test_short_header_is_io_error() {
        let data = complete().build();
        assert!(matches!(
            Bundle::from_slice(&data[..100]),
            Err(ReadError::Io(_))
        ));
    }

    #[test]
    fn test_swapped_bundle() {
        let data = BundleBuilder::new()
            .swapped()
            .item(ext::PUL, single_record_tree(4, true))
            .item(ext::PGF, single_record_tree(8, true))
            .item(ext::DAT, vec![0; 2])
            .build();
        let bundle = Bundle::from_slice(&data).unwrap();
        assert!(bundle.is_swapped());
        assert!(bundle.pulse_tree().is_swapped());
        assert_eq!(bundle.file_date(), "2020-09-13");
        assert_eq!(bundle.raw_data().map(|r| r.length), Some(2));
    }

    #[test]
    fn test_item_count_clamped_and_unknown_skipped() {
        let data = complete()
            .item(b".xyz", vec![9; 3])
            .stored_items(1000)
            .build();
        let bundle = Bundle::from_slice(&data).unwrap();
        assert_eq!(bundle.stats().stored_items, 1000);
        assert_eq!(bundle.stats().items, MAX_BUNDLE_ITEMS);
    }

    #[test]
    fn test_truncated_tree_item() {
        let mut data = complete().build();
        // cut into the raw data and the stimulus tree before it
        data.truncate(BUNDLE_HEADER_SIZE + 20 + 10);
        assert!(matches!(Bundle::from_slice(&data), Err(ReadError::Io(_))));
    }

    #[test]
    fn test_format_version_parse() {
        assert_eq!(
            FormatVersion::parse("v2x73.09"),
            Some(FormatVersion { major: 2, minor: 73 })
        );
        assert_eq!(FormatVersion::parse("PatchMaster"), None);
    }

    fn series_tree(series: &[u8]) -> Vec<u8> {
        TreeBuilder::new(&[4, 4, series.len() as i32])
            .record(&[0; 4], 1)
            .record(&[0; 4], 1)
            .record(series, 0)
            .build()
    }

    fn amp_tree(states: &[(i32, u8)]) -> Vec<u8> {
        let mut builder = TreeBuilder::new(&[4, 4, 512]);
        builder.record(&[0; 4], 1).record(&[0; 4], states.len() as u32);
        for &(number, tag) in states {
            let mut body = vec![0u8; 512];
            body[amp::AM_STATE_COUNT..amp::AM_STATE_COUNT + 4]
                .copy_from_slice(&number.to_ne_bytes());
            body[amp::AM_AMPLIFIER_STATE] = tag;
            builder.record(&body, 0);
        }
        builder.build()
    }

    fn series_record(flag: i32, reference: i32, len: usize) -> Vec<u8> {
        let mut series = vec![0u8; len];
        series[pulse::SE_AMPL_STATE_FLAG..pulse::SE_AMPL_STATE_FLAG + 4]
            .copy_from_slice(&flag.to_ne_bytes());
        series[pulse::SE_AMPL_STATE_REF..pulse::SE_AMPL_STATE_REF + 4]
            .copy_from_slice(&reference.to_ne_bytes());
        if len > pulse::SE_OLD_AMP_STATE {
            series[pulse::SE_OLD_AMP_STATE] = 0x5a;
        }
        series
    }

    fn first_series(bundle: &Bundle) -> Record<'_> {
        bundle.pulse_tree().records().nth(2).unwrap()
    }

    #[test]
    fn test_embedded_amplifier_state() {
        let data = BundleBuilder::new()
            .item(ext::PUL, series_tree(&series_record(1, 3, 1408)))
            .build();
        let bundle =
            Bundle::from_reader_with(&mut Cursor::new(data), DecodeOptions::lenient()).unwrap();
        let states = bundle.amplifier_states(&first_series(&bundle)).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].amplifier, None);
        assert_eq!(states[0].span().len(), amp::AMPLIFIER_STATE_SIZE);
        assert_eq!(states[0].span().bytes()[0], 0x5a);
    }

    #[test]
    fn test_short_series_clamps_state() {
        let data = BundleBuilder::new()
            .item(ext::PUL, series_tree(&series_record(0, 0, 500)))
            .build();
        let bundle =
            Bundle::from_reader_with(&mut Cursor::new(data), DecodeOptions::lenient()).unwrap();
        let states = bundle.amplifier_states(&first_series(&bundle)).unwrap();
        assert_eq!(states[0].span().len(), 500 - pulse::SE_OLD_AMP_STATE);
    }

    #[test]
    fn test_amplifier_tree_states() {
        let data = BundleBuilder::new()
            .item(ext::PUL, series_tree(&series_record(0, 1, 1408)))
            .item(ext::AMP, amp_tree(&[(1, 0x11), (2, 0x22)]))
            .build();
        let bundle =
            Bundle::from_reader_with(&mut Cursor::new(data), DecodeOptions::lenient()).unwrap();
        let states = bundle.amplifier_states(&first_series(&bundle)).unwrap();
        let summary: Vec<(Option<i32>, u8)> = states
            .iter()
            .map(|s| (s.amplifier, s.span().bytes()[0]))
            .collect();
        assert_eq!(summary, vec![(Some(1), 0x11), (Some(2), 0x22)]);
        assert_eq!(states[0].span().len(), amp::AMPLIFIER_STATE_SIZE);
    }

    #[test]
    fn test_missing_amplifier_state() {
        let no_tree = BundleBuilder::new()
            .item(ext::PUL, series_tree(&series_record(0, 1, 1408)))
            .build();
        let bundle =
            Bundle::from_reader_with(&mut Cursor::new(no_tree), DecodeOptions::lenient()).unwrap();
        assert!(matches!(
            bundle.amplifier_states(&first_series(&bundle)),
            Err(ReadError::Format(FormatError::MissingAmplifierState(_)))
        ));

        let bad_ref = BundleBuilder::new()
            .item(ext::PUL, series_tree(&series_record(0, 7, 1408)))
            .item(ext::AMP, amp_tree(&[(1, 0)]))
            .build();
        let bundle =
            Bundle::from_reader_with(&mut Cursor::new(bad_ref), DecodeOptions::lenient()).unwrap();
        assert!(matches!(
            bundle.amplifier_states(&first_series(&bundle)),
            Err(ReadError::Format(FormatError::MissingAmplifierState(_)))
        ));

        let root = bundle.pulse_tree().root();
        assert!(matches!(
            bundle.amplifier_states(&root),
            Err(ReadError::Format(FormatError::WrongLevel { .. }))
        ));
    }
}
