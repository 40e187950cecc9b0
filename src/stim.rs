// SPDX-License-Identifier: MIT
//! Stimulus protocol model and waveform reconstruction
//!
//! The stimulus tree (.pgf) nests Stimulation → Channel → Segment below an
//! empty root. [`StimTree`] copies the fields needed for reconstruction into
//! plain structs once; [`Stimulation::construct_stim_trace`] then turns the
//! segment list of the DAC-driving channel into breakpoints for one sweep.
//!
//! How voltage and duration change from sweep to sweep is delegated to an
//! [`IncrementPolicy`]. [`StandardIncrement`] covers the linear and
//! logarithmic modes; interleaved and alternating modes are rejected.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BoundsError, FormatError};
use crate::format::stim as offsets;
use crate::record::ByteSpan;
use crate::tree::{Record, Tree, TreeKind};

/// Upper bound for [`Stimulation::sample_stim_trace`] (32 MiB of samples)
pub const MAX_STIM_SAMPLES: usize = 1 << 22;

/// Voltage source selector meaning "use the holding level"
const SOURCE_HOLDING: i32 = 1;

/// DAC unit of current-clamp channels; values are stored in nA
const CURRENT_UNIT: &str = "A";
const NANO: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StimError {
    #[error("unsupported increment mode {0:?}")]
    UnsupportedIncrementMode(IncrementMode),

    #[error("unknown increment mode {0}")]
    UnknownIncrementMode(u8),

    #[error("unsupported segment class {0}")]
    UnsupportedSegmentClass(String),

    #[error("segment {segment} has invalid duration {duration}")]
    NegativeDuration { segment: usize, duration: f64 },

    #[error("sweep {sweep} out of range (protocol has {sweeps} sweeps)")]
    SweepOutOfRange { sweep: usize, sweeps: i32 },

    #[error("no stimulation with index {0}")]
    NoSuchStimulation(usize),

    #[error("invalid sample interval {0}")]
    InvalidSampleInterval(f64),

    #[error("waveform would need {0} samples")]
    TooManySamples(f64),

    #[error("expected the stimulus tree, got the {0} tree")]
    WrongTree(TreeKind),

    #[error("Out of bounds: {0}")]
    Bounds(#[from] BoundsError),

    #[error("Invalid format: {0}")]
    Format(#[from] FormatError),
}

/// Segment class byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentClass {
    Constant,
    Ramp,
    Continuous,
    ConstSine,
    Squarewave,
    ChirpWave,
}

impl SegmentClass {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => SegmentClass::Constant,
            1 => SegmentClass::Ramp,
            2 => SegmentClass::Continuous,
            3 => SegmentClass::ConstSine,
            4 => SegmentClass::Squarewave,
            5 => SegmentClass::ChirpWave,
            _ => return None,
        })
    }
}

/// Segment store kind byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKind {
    NoStore,
    Store,
    StoreStart,
    StoreEnd,
}

impl StoreKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => StoreKind::NoStore,
            1 => StoreKind::Store,
            2 => StoreKind::StoreStart,
            3 => StoreKind::StoreEnd,
            _ => return None,
        })
    }
}

/// How a segment's voltage or duration changes with the sweep index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncrementMode {
    Inc,
    Dec,
    IncInterleaved,
    DecInterleaved,
    Alternate,
    LogInc,
    LogDec,
    LogIncInterleaved,
    LogDecInterleaved,
    LogAlternate,
}

impl IncrementMode {
    pub fn from_byte(byte: u8) -> Result<Self, StimError> {
        Ok(match byte {
            0 => IncrementMode::Inc,
            1 => IncrementMode::Dec,
            2 => IncrementMode::IncInterleaved,
            3 => IncrementMode::DecInterleaved,
            4 => IncrementMode::Alternate,
            5 => IncrementMode::LogInc,
            6 => IncrementMode::LogDec,
            7 => IncrementMode::LogIncInterleaved,
            8 => IncrementMode::LogDecInterleaved,
            9 => IncrementMode::LogAlternate,
            _ => return Err(StimError::UnknownIncrementMode(byte)),
        })
    }
}

/// Nominal value and its per-sweep change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub value: f64,
    /// Added per sweep by linear modes
    pub increment: f64,
    /// Multiplied per sweep by logarithmic modes
    pub factor: f64,
}

/// Per-mode arithmetic for sweep-dependent values
pub trait IncrementPolicy {
    /// Effective value for zero-based `sweep` out of `sweeps`
    fn apply(
        &self,
        mode: IncrementMode,
        step: Step,
        sweep: usize,
        sweeps: i32,
    ) -> Result<f64, StimError>;
}

/// Linear and logarithmic increments; `Dec` modes count down from the last sweep
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardIncrement;

impl IncrementPolicy for StandardIncrement {
    fn apply(
        &self,
        mode: IncrementMode,
        step: Step,
        sweep: usize,
        sweeps: i32,
    ) -> Result<f64, StimError> {
        let up = sweep as f64;
        let down = sweeps as f64 - sweep as f64 - 1.0;
        match mode {
            IncrementMode::Inc => Ok(step.value + up * step.increment),
            IncrementMode::Dec => Ok(step.value + down * step.increment),
            IncrementMode::LogInc => Ok(step.value * step.factor.powf(up)),
            IncrementMode::LogDec => Ok(step.value * step.factor.powf(down)),
            other => Err(StimError::UnsupportedIncrementMode(other)),
        }
    }
}

/// One breakpoint of a reconstructed waveform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StimPoint {
    /// Seconds from the start of the sweep
    pub time: f64,
    /// Volts, or amperes for current-clamp channels
    pub value: f64,
}

impl StimPoint {
    fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub class: u8,
    pub store_kind: u8,
    pub voltage_inc_mode: u8,
    pub duration_inc_mode: u8,
    pub voltage: f64,
    pub voltage_source: i32,
    pub delta_v_factor: f64,
    pub delta_v_increment: f64,
    pub duration: f64,
    pub duration_source: i32,
    pub delta_t_factor: f64,
    pub delta_t_increment: f64,
}

impl Segment {
    pub fn from_span(span: &ByteSpan<'_>) -> Result<Self, BoundsError> {
        Ok(Self {
            class: span.read(offsets::SE_CLASS)?,
            store_kind: span.read(offsets::SE_STORE_KIND)?,
            voltage_inc_mode: span.read(offsets::SE_VOLTAGE_INC_MODE)?,
            duration_inc_mode: span.read(offsets::SE_DURATION_INC_MODE)?,
            voltage: span.read(offsets::SE_VOLTAGE)?,
            voltage_source: span.read(offsets::SE_VOLTAGE_SOURCE)?,
            delta_v_factor: span.read(offsets::SE_DELTA_V_FACTOR)?,
            delta_v_increment: span.read(offsets::SE_DELTA_V_INCREMENT)?,
            duration: span.read(offsets::SE_DURATION)?,
            duration_source: span.read(offsets::SE_DURATION_SOURCE)?,
            delta_t_factor: span.read(offsets::SE_DELTA_T_FACTOR)?,
            delta_t_increment: span.read(offsets::SE_DELTA_T_INCREMENT)?,
        })
    }

    pub fn segment_class(&self) -> Option<SegmentClass> {
        SegmentClass::from_byte(self.class)
    }

    pub fn store(&self) -> Option<StoreKind> {
        StoreKind::from_byte(self.store_kind)
    }

    fn holds_voltage(&self) -> bool {
        self.voltage_source == SOURCE_HOLDING
    }

    fn class_name(&self) -> String {
        match self.segment_class() {
            Some(class) => format!("{:?}", class),
            None => format!("#{}", self.class),
        }
    }

    /// Effective voltage in `sweep`
    pub fn voltage_at<P: IncrementPolicy + ?Sized>(
        &self,
        policy: &P,
        holding: f64,
        sweep: usize,
        sweeps: i32,
    ) -> Result<f64, StimError> {
        if self.holds_voltage() {
            // increments do not apply to the holding level
            return Ok(holding);
        }
        let step = Step {
            value: self.voltage,
            increment: self.delta_v_increment,
            factor: self.delta_v_factor,
        };
        policy.apply(IncrementMode::from_byte(self.voltage_inc_mode)?, step, sweep, sweeps)
    }

    /// Effective duration in `sweep`
    pub fn duration_at<P: IncrementPolicy + ?Sized>(
        &self,
        policy: &P,
        sweep: usize,
        sweeps: i32,
    ) -> Result<f64, StimError> {
        let step = Step {
            value: self.duration,
            increment: self.delta_t_increment,
            factor: self.delta_t_factor,
        };
        policy.apply(IncrementMode::from_byte(self.duration_inc_mode)?, step, sweep, sweeps)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Zero-based index of the linked channel (stored one-based)
    pub linked_channel: i32,
    pub adc_channel: i16,
    pub adc_mode: u8,
    pub set_last_seg_vmemb: bool,
    pub dac_channel: i16,
    pub dac_mode: u8,
    pub dac_unit: String,
    /// Holding level as stored (nA for current-clamp channels)
    pub holding: f64,
    pub segments: Vec<Segment>,
}

impl Channel {
    pub fn from_record(record: &Record<'_>) -> Result<Self, StimError> {
        let span = record.span();
        let segments = record
            .children()
            .map(|segment| Segment::from_span(&segment.span()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            linked_channel: span
                .read::<i32>(offsets::CH_LINKED_CHANNEL)?
                .saturating_sub(1),
            adc_channel: span.read(offsets::CH_ADC_CHANNEL)?,
            adc_mode: span.read(offsets::CH_ADC_MODE)?,
            set_last_seg_vmemb: span.read_bool(offsets::CH_SET_LAST_SEG_VMEMB)?,
            dac_channel: span.read(offsets::CH_DAC_CHANNEL)?,
            dac_mode: span.read(offsets::CH_DAC_MODE)?,
            dac_unit: span.read_fixed_string::<8>(offsets::CH_DAC_UNIT)?.into_owned(),
            holding: span.read(offsets::CH_HOLDING)?,
            segments,
        })
    }

    /// Whether the DAC output is a current (stored in nA)
    pub fn is_current(&self) -> bool {
        self.dac_unit == CURRENT_UNIT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stimulation {
    pub entry_name: String,
    pub file_name: String,
    pub data_start_segment: i32,
    pub data_start_time: f64,
    pub sample_interval: f64,
    pub sweep_interval: f64,
    pub number_sweeps: i32,
    pub number_averages: i32,
    pub actual_adc_channels: i32,
    pub actual_dac_channels: i32,
    pub ext_trigger: u8,
    pub has_lock_in: bool,
    pub channels: Vec<Channel>,
}

impl Stimulation {
    pub fn from_record(record: &Record<'_>) -> Result<Self, StimError> {
        let span = record.span();
        let channels = record
            .children()
            .map(|channel| Channel::from_record(&channel))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entry_name: span.read_fixed_string::<32>(offsets::ST_ENTRY_NAME)?.into_owned(),
            file_name: span.read_fixed_string::<32>(offsets::ST_FILE_NAME)?.into_owned(),
            data_start_segment: span.read(offsets::ST_DATA_START_SEGMENT)?,
            data_start_time: span.read(offsets::ST_DATA_START_TIME)?,
            sample_interval: span.read(offsets::ST_SAMPLE_INTERVAL)?,
            sweep_interval: span.read(offsets::ST_SWEEP_INTERVAL)?,
            number_sweeps: span.read(offsets::ST_NUMBER_SWEEPS)?,
            number_averages: span.read(offsets::ST_NUMBER_AVERAGES)?,
            actual_adc_channels: span.read(offsets::ST_ACTUAL_ADC_CHANNELS)?,
            actual_dac_channels: span.read(offsets::ST_ACTUAL_DAC_CHANNELS)?,
            ext_trigger: span.read(offsets::ST_EXT_TRIGGER)?,
            has_lock_in: span.read_bool(offsets::ST_HAS_LOCK_IN)?,
            channels,
        })
    }

    /// Index of the channel driving the DAC: the first channel's link
    pub fn stim_channel_index(&self) -> Option<usize> {
        let linked = self.channels.first()?.linked_channel;
        usize::try_from(linked)
            .ok()
            .filter(|&index| index < self.channels.len())
    }

    pub fn has_stim_channel(&self) -> bool {
        self.stim_channel_index().is_some()
    }

    pub fn stim_channel(&self) -> Option<&Channel> {
        self.stim_channel_index().map(|index| &self.channels[index])
    }

    /// Holding level of the stim channel, or of the first channel without one
    pub fn holding(&self) -> f64 {
        self.stim_channel()
            .or_else(|| self.channels.first())
            .map_or(0.0, |channel| channel.holding)
    }

    /// [`Self::construct_stim_trace_with`] using [`StandardIncrement`]
    pub fn construct_stim_trace(&self, sweep: usize) -> Result<Vec<StimPoint>, StimError> {
        self.construct_stim_trace_with(&StandardIncrement, sweep)
    }

    /// Breakpoints of the stimulus for zero-based `sweep`.
    ///
    /// Constant segments contribute a point at their start and end, ramps a
    /// point at their end (interpolate linearly from the previous point).
    /// The trace starts at holding when the first segment does not, and
    /// returns to holding after the last segment unless the channel keeps
    /// the last segment's level. Without a stim channel the trace is the
    /// holding level alone.
    pub fn construct_stim_trace_with<P: IncrementPolicy + ?Sized>(
        &self,
        policy: &P,
        sweep: usize,
    ) -> Result<Vec<StimPoint>, StimError> {
        let holding = self.holding();
        let channel = match self.stim_channel() {
            Some(channel) if !channel.segments.is_empty() => channel,
            _ => return Ok(vec![StimPoint::new(0.0, holding)]),
        };
        if self.number_sweeps > 0 && sweep >= self.number_sweeps as usize {
            return Err(StimError::SweepOutOfRange {
                sweep,
                sweeps: self.number_sweeps,
            });
        }

        let mut points = Vec::with_capacity(2 * channel.segments.len() + 2);
        let mut t = 0.0;

        let first = &channel.segments[0];
        let starts_off_holding = match first.segment_class() {
            Some(SegmentClass::Ramp) => true,
            Some(SegmentClass::Constant | SegmentClass::Continuous) => {
                !first.holds_voltage() && first.voltage != holding
            }
            _ => false,
        };
        if starts_off_holding {
            points.push(StimPoint::new(t, holding));
        }

        for (index, segment) in channel.segments.iter().enumerate() {
            let voltage = segment.voltage_at(policy, holding, sweep, self.number_sweeps)?;
            let duration = segment.duration_at(policy, sweep, self.number_sweeps)?;
            if !(duration >= 0.0 && duration.is_finite()) {
                return Err(StimError::NegativeDuration {
                    segment: index,
                    duration,
                });
            }
            match segment.segment_class() {
                Some(SegmentClass::Constant | SegmentClass::Continuous) => {
                    points.push(StimPoint::new(t, voltage));
                    t += duration;
                    points.push(StimPoint::new(t, voltage));
                }
                Some(SegmentClass::Ramp) => {
                    t += duration;
                    points.push(StimPoint::new(t, voltage));
                }
                _ => return Err(StimError::UnsupportedSegmentClass(segment.class_name())),
            }
        }

        if !channel.set_last_seg_vmemb {
            if let Some(last) = channel.segments.last() {
                if last.voltage != holding && !last.holds_voltage() {
                    points.push(StimPoint::new(t, holding));
                }
            }
        }

        if channel.is_current() {
            for point in &mut points {
                point.value *= NANO;
            }
        }

        debug!(
            stimulation = %self.entry_name,
            sweep,
            points = points.len(),
            "stimulus trace constructed"
        );
        Ok(points)
    }

    /// The stimulus for `sweep` sampled at the stimulation's sample interval
    pub fn sample_stim_trace(&self, sweep: usize) -> Result<Vec<f64>, StimError> {
        let points = self.construct_stim_trace(sweep)?;
        sample_points(&points, self.sample_interval)
    }
}

/// Number of samples [`sample_points`] produces, checked against
/// [`MAX_STIM_SAMPLES`] before anything is allocated.
pub fn sample_count(points: &[StimPoint], interval: f64) -> Result<usize, StimError> {
    if !(interval.is_finite() && interval > 0.0) {
        return Err(StimError::InvalidSampleInterval(interval));
    }
    let Some(end) = points.last().map(|p| p.time) else {
        return Ok(0);
    };
    // tolerate rounding in end / interval for end points on the grid
    let count = (end / interval + 1e-9).floor() + 1.0;
    if !count.is_finite() || count < 0.0 || count > MAX_STIM_SAMPLES as f64 {
        return Err(StimError::TooManySamples(count));
    }
    Ok(count as usize)
}

/// Sample breakpoints every `interval` seconds from 0 up to the last point.
///
/// Between breakpoints the value is interpolated linearly; at a jump (two
/// points at one time) the later point wins.
pub fn sample_points(points: &[StimPoint], interval: f64) -> Result<Vec<f64>, StimError> {
    let count = sample_count(points, interval)?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut samples = Vec::with_capacity(count);
    let mut left = 0;
    for k in 0..count {
        let t = k as f64 * interval;
        while left + 1 < points.len() && points[left + 1].time <= t {
            left += 1;
        }
        let a = points[left];
        let value = match points.get(left + 1) {
            Some(b) if b.time > a.time && t >= a.time => {
                a.value + (b.value - a.value) * (t - a.time) / (b.time - a.time)
            }
            _ => a.value,
        };
        samples.push(value);
    }
    Ok(samples)
}

/// Typed view of the stimulus tree
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StimTree {
    stimulations: Vec<Stimulation>,
}

impl StimTree {
    pub fn from_tree(tree: &Tree) -> Result<Self, StimError> {
        if tree.kind() != TreeKind::Stimulus {
            return Err(StimError::WrongTree(tree.kind()));
        }
        let stimulations = tree
            .root()
            .children()
            .map(|stimulation| Stimulation::from_record(&stimulation))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = stimulations.len(), "stimulus tree loaded");
        Ok(Self { stimulations })
    }

    pub fn stimulations(&self) -> &[Stimulation] {
        &self.stimulations
    }

    pub fn stimulation(&self, index: usize) -> Result<&Stimulation, StimError> {
        self.stimulations
            .get(index)
            .ok_or(StimError::NoSuchStimulation(index))
    }

    pub fn len(&self) -> usize {
        self.stimulations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stimulations.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tree::tests::TreeBuilder;

    pub(crate) const STIM_SIZES: [i32; 4] = [8, 176, 72, 80];

    pub(crate) struct SegmentFixture {
        pub class: u8,
        pub voltage: f64,
        pub duration: f64,
        pub voltage_source: i32,
        pub v_mode: u8,
        pub t_mode: u8,
        pub dv: f64,
        pub dt: f64,
        pub v_factor: f64,
    }

    impl SegmentFixture {
        pub(crate) fn constant(voltage: f64, duration: f64) -> Self {
            Self {
                class: 0,
                voltage,
                duration,
                voltage_source: 0,
                v_mode: 0,
                t_mode: 0,
                dv: 0.0,
                dt: 0.0,
                v_factor: 1.0,
            }
        }

        pub(crate) fn ramp(voltage: f64, duration: f64) -> Self {
            Self {
                class: 1,
                ..Self::constant(voltage, duration)
            }
        }

        fn bytes(&self) -> Vec<u8> {
            let mut b = vec![0u8; STIM_SIZES[3] as usize];
            b[offsets::SE_CLASS] = self.class;
            b[offsets::SE_VOLTAGE_INC_MODE] = self.v_mode;
            b[offsets::SE_DURATION_INC_MODE] = self.t_mode;
            put(&mut b, offsets::SE_VOLTAGE, &self.voltage.to_ne_bytes());
            put(&mut b, offsets::SE_VOLTAGE_SOURCE, &self.voltage_source.to_ne_bytes());
            put(&mut b, offsets::SE_DELTA_V_FACTOR, &self.v_factor.to_ne_bytes());
            put(&mut b, offsets::SE_DELTA_V_INCREMENT, &self.dv.to_ne_bytes());
            put(&mut b, offsets::SE_DURATION, &self.duration.to_ne_bytes());
            put(&mut b, offsets::SE_DELTA_T_FACTOR, &1.0f64.to_ne_bytes());
            put(&mut b, offsets::SE_DELTA_T_INCREMENT, &self.dt.to_ne_bytes());
            b
        }
    }

    fn put(buffer: &mut [u8], offset: usize, bytes: &[u8]) {
        buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn stimulation_bytes(sweeps: i32, interval: f64) -> Vec<u8> {
        let mut b = vec![0u8; STIM_SIZES[1] as usize];
        put(&mut b, offsets::ST_ENTRY_NAME, b"IV\0");
        put(&mut b, offsets::ST_SAMPLE_INTERVAL, &interval.to_ne_bytes());
        put(&mut b, offsets::ST_NUMBER_SWEEPS, &sweeps.to_ne_bytes());
        b
    }

    fn channel_bytes(linked: i32, unit: &[u8], holding: f64, keep_last: bool) -> Vec<u8> {
        let mut b = vec![0u8; STIM_SIZES[2] as usize];
        put(&mut b, offsets::CH_LINKED_CHANNEL, &linked.to_ne_bytes());
        put(&mut b, offsets::CH_DAC_UNIT, unit);
        put(&mut b, offsets::CH_HOLDING, &holding.to_ne_bytes());
        b[offsets::CH_SET_LAST_SEG_VMEMB] = keep_last as u8;
        b
    }

    /// A stimulus tree with one stimulation and one channel
    pub(crate) fn stim_tree_bytes(
        sweeps: i32,
        linked: i32,
        unit: &[u8],
        holding: f64,
        keep_last: bool,
        segments: &[SegmentFixture],
    ) -> Vec<u8> {
        let mut builder = TreeBuilder::new(&STIM_SIZES);
        builder
            .record(&[0u8; 8], 1)
            .record(&stimulation_bytes(sweeps, 0.125), 1)
            .record(
                &channel_bytes(linked, unit, holding, keep_last),
                segments.len() as u32,
            );
        for segment in segments {
            builder.record(&segment.bytes(), 0);
        }
        builder.build()
    }

    fn stimulation(bytes: Vec<u8>) -> Stimulation {
        let tree = Tree::from_buffer(TreeKind::Stimulus, bytes).unwrap();
        let model = StimTree::from_tree(&tree).unwrap();
        model.stimulation(0).unwrap().clone()
    }

    fn pairs(points: &[StimPoint]) -> Vec<(f64, f64)> {
        points.iter().map(|p| (p.time, p.value)).collect()
    }

    #[test]
    fn test_step_protocol() {
        let segments = [
            SegmentFixture::constant(-0.07, 0.25),
            SegmentFixture::constant(0.02, 0.5),
            SegmentFixture::constant(-0.07, 0.25),
        ];
        let stim = stimulation(stim_tree_bytes(1, 1, b"V", -0.07, false, &segments));
        assert!(stim.has_stim_channel());
        let trace = stim.construct_stim_trace(0).unwrap();
        assert_eq!(
            pairs(&trace),
            vec![
                (0.0, -0.07),
                (0.25, -0.07),
                (0.25, 0.02),
                (0.75, 0.02),
                (0.75, -0.07),
                (1.0, -0.07),
            ]
        );
    }

    #[test]
    fn test_leading_holding_and_return() {
        let segments = [SegmentFixture::constant(0.01, 0.1)];
        let stim = stimulation(stim_tree_bytes(1, 1, b"V", -0.06, false, &segments));
        let trace = stim.construct_stim_trace(0).unwrap();
        assert_eq!(
            pairs(&trace),
            vec![(0.0, -0.06), (0.0, 0.01), (0.1, 0.01), (0.1, -0.06)]
        );

        let kept = stimulation(stim_tree_bytes(1, 1, b"V", -0.06, true, &segments));
        assert_eq!(kept.construct_stim_trace(0).unwrap().len(), 3);
    }

    #[test]
    fn test_ramp_starts_at_holding() {
        let segments = [SegmentFixture::ramp(0.05, 0.2)];
        let stim = stimulation(stim_tree_bytes(1, 1, b"V", 0.0, true, &segments));
        let trace = stim.construct_stim_trace(0).unwrap();
        assert_eq!(pairs(&trace), vec![(0.0, 0.0), (0.2, 0.05)]);
    }

    #[test]
    fn test_linear_increments() {
        let mut step = SegmentFixture::constant(-0.1, 0.01);
        step.dv = 0.01;
        step.dt = 0.005;
        step.t_mode = 0;
        let stim = stimulation(stim_tree_bytes(5, 1, b"V", -0.1, true, &[step]));
        let trace = stim.construct_stim_trace(3).unwrap();
        let (t, v) = (trace[1].time, trace[1].value);
        assert!((v - (-0.07)).abs() < 1e-12);
        assert!((t - 0.025).abs() < 1e-12);

        assert!(matches!(
            stim.construct_stim_trace(5),
            Err(StimError::SweepOutOfRange { sweep: 5, sweeps: 5 })
        ));
    }

    #[test]
    fn test_decrement_and_log_modes() {
        let policy = StandardIncrement;
        let step = Step {
            value: 2.0,
            increment: 1.0,
            factor: 2.0,
        };
        assert_eq!(policy.apply(IncrementMode::Dec, step, 0, 4).unwrap(), 5.0);
        assert_eq!(policy.apply(IncrementMode::Dec, step, 3, 4).unwrap(), 2.0);
        assert_eq!(policy.apply(IncrementMode::LogInc, step, 3, 4).unwrap(), 16.0);
        assert_eq!(policy.apply(IncrementMode::LogDec, step, 1, 4).unwrap(), 8.0);
        assert_eq!(
            policy.apply(IncrementMode::Alternate, step, 0, 4),
            Err(StimError::UnsupportedIncrementMode(IncrementMode::Alternate))
        );
    }

    #[test]
    fn test_voltage_source_holding_ignores_increments() {
        let mut seg = SegmentFixture::constant(0.5, 0.01);
        seg.voltage_source = 1;
        seg.v_mode = 4;
        let stim = stimulation(stim_tree_bytes(2, 1, b"V", -0.08, false, &[seg]));
        let trace = stim.construct_stim_trace(1).unwrap();
        assert_eq!(pairs(&trace), vec![(0.0, -0.08), (0.01, -0.08)]);
    }

    #[test]
    fn test_current_clamp_scaled_to_amperes() {
        let segments = [SegmentFixture::constant(100.0, 0.1)];
        let stim = stimulation(stim_tree_bytes(1, 1, b"A", 0.0, false, &segments));
        let trace = stim.construct_stim_trace(0).unwrap();
        assert!(trace.iter().any(|p| (p.value - 100e-9).abs() < 1e-18));
        assert!(trace.iter().all(|p| p.value.abs() <= 100e-9 + 1e-18));
    }

    #[test]
    fn test_missing_stim_channel_yields_holding() {
        let segments = [SegmentFixture::constant(0.02, 0.1)];
        let stim = stimulation(stim_tree_bytes(1, 7, b"V", -0.05, false, &segments));
        assert!(!stim.has_stim_channel());
        assert_eq!(pairs(&stim.construct_stim_trace(0).unwrap()), vec![(0.0, -0.05)]);
    }

    #[test]
    fn test_unsupported_class() {
        let mut seg = SegmentFixture::constant(0.0, 0.1);
        seg.class = 3;
        let stim = stimulation(stim_tree_bytes(1, 1, b"V", 0.0, false, &[seg]));
        assert_eq!(
            stim.construct_stim_trace(0),
            Err(StimError::UnsupportedSegmentClass("ConstSine".to_string()))
        );
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut seg = SegmentFixture::constant(0.0, 0.01);
        seg.dt = -0.02;
        let stim = stimulation(stim_tree_bytes(3, 1, b"V", 0.0, false, &[seg]));
        assert!(stim.construct_stim_trace(0).is_ok());
        assert!(matches!(
            stim.construct_stim_trace(1),
            Err(StimError::NegativeDuration { segment: 0, .. })
        ));
    }

    #[test]
    fn test_non_finite_duration_rejected() {
        let stim = stimulation(stim_tree_bytes(
            1,
            1,
            b"V",
            0.0,
            false,
            &[SegmentFixture::constant(0.01, f64::NAN)],
        ));
        assert!(matches!(
            stim.construct_stim_trace(0),
            Err(StimError::NegativeDuration { segment: 0, duration }) if duration.is_nan()
        ));

        let stim = stimulation(stim_tree_bytes(
            1,
            1,
            b"V",
            0.0,
            false,
            &[SegmentFixture::constant(0.01, f64::INFINITY)],
        ));
        assert!(matches!(
            stim.construct_stim_trace(0),
            Err(StimError::NegativeDuration { segment: 0, .. })
        ));
    }

    #[test]
    fn test_extreme_linked_channel() {
        let segments = [SegmentFixture::constant(0.01, 0.1)];
        let stim = stimulation(stim_tree_bytes(1, i32::MIN, b"V", -0.06, false, &segments));
        assert_eq!(stim.channels[0].linked_channel, i32::MIN);
        assert!(!stim.has_stim_channel());
        assert_eq!(pairs(&stim.construct_stim_trace(0).unwrap()), vec![(0.0, -0.06)]);
    }

    #[test]
    fn test_sample_points() {
        let points = [
            StimPoint::new(0.0, 0.0),
            StimPoint::new(0.5, 0.0),
            StimPoint::new(0.5, 1.0),
            StimPoint::new(1.0, 1.0),
            StimPoint::new(2.0, -1.0),
        ];
        let samples = sample_points(&points, 0.25).unwrap();
        assert_eq!(samples, vec![0.0, 0.0, 1.0, 1.0, 1.0, 0.5, 0.0, -0.5, -1.0]);

        assert!(matches!(
            sample_points(&points, 0.0),
            Err(StimError::InvalidSampleInterval(_))
        ));
        assert!(sample_points(&[], 0.1).unwrap().is_empty());
    }

    #[test]
    fn test_sample_count_is_capped() {
        let points = [StimPoint::new(0.0, 0.0), StimPoint::new(1.0, 0.0)];
        assert_eq!(sample_count(&points, 0.25).unwrap(), 5);

        let long = [StimPoint::new(0.0, 0.0), StimPoint::new(3600.0, 0.0)];
        assert!(matches!(
            sample_count(&long, 1e-5),
            Err(StimError::TooManySamples(_))
        ));
        assert!(matches!(
            sample_points(&long, 1e-5),
            Err(StimError::TooManySamples(_))
        ));
    }

    #[test]
    fn test_sampled_trace_is_monotonic_in_time() {
        let segments = [
            SegmentFixture::constant(-0.07, 0.25),
            SegmentFixture::ramp(0.03, 0.5),
            SegmentFixture::constant(-0.07, 0.25),
        ];
        let stim = stimulation(stim_tree_bytes(1, 1, b"V", -0.07, false, &segments));
        let trace = stim.construct_stim_trace(0).unwrap();
        assert!(trace.windows(2).all(|w| w[0].time <= w[1].time));
        let samples = stim.sample_stim_trace(0).unwrap();
        assert_eq!(samples.len(), 9);
        assert!((samples[4] - (-0.02)).abs() < 1e-9);
        assert_eq!(samples[8], -0.07);
    }

    #[test]
    fn test_wrong_tree_kind() {
        let bytes = stim_tree_bytes(1, 1, b"V", 0.0, false, &[]);
        let tree = Tree::from_buffer(TreeKind::Amplifier, bytes).unwrap();
        assert_eq!(
            StimTree::from_tree(&tree),
            Err(StimError::WrongTree(TreeKind::Amplifier))
        );
    }
}
