// SPDX-License-Identifier: MIT
//! Field descriptor tables
//!
//! One `const` table per record kind, describing the v9+ (DAT2) layout.
//! Fields that older file revisions do not have fall outside the record and
//! render as `n/a`. The `export`/`print` flags here are defaults only; user
//! choices live in [`FieldSelection`](crate::selection::FieldSelection).

use crate::fields::{EnumKind, FieldDescriptor as F, FieldKind as K, UNIT_VOLTS_OR_AMPS};
use crate::tree::Level;

pub const ROOT: &[F] = &[
    F::new("RoVersion", "", K::Int32, 0),
    F::new("RoMark", "", K::Int32, 4),
    F::new("RoVersionName", "", K::FixedString(32), 8),
    F::new("RoAuxFileName", "", K::FixedString(80), 40),
    F::new("RootText", "", K::FixedString(400), 120),
    F::new("RootStartTime_raw", "s", K::LongReal, 520).exported().printed(),
    F::new("RootStartTime", "", K::DateTime, 520).exported().printed(),
    F::new("RoMaxSamples", "", K::Int32, 528),
];

pub const GROUP: &[F] = &[
    F::new("GrMark", "", K::Int32, 0),
    F::new("GrLabel", "", K::FixedString(32), 4).exported(),
    F::new("GrText", "", K::FixedString(80), 36),
    F::new("ExperimentNumber", "", K::Int32, 116),
    F::new("GroupCount", "", K::Int32, 120),
];

pub const SERIES: &[F] = &[
    F::new("SeMark", "", K::Int32, 0),
    F::new("SeLabel", "", K::FixedString(32), 4).exported(),
    F::new("SeComment", "", K::FixedString(80), 36),
    F::new("SeSeriesCount", "", K::Int32, 116),
    F::new("SeNumberSweeps", "", K::Int32, 120),
    F::new("SeMethodTag", "", K::Int32, 132),
    F::new("SeTime_raw", "s", K::LongReal, 136).exported(),
    F::new("Rel. SeTime", "s", K::RelativeTime, 136).exported().printed(),
    F::new("SeTime", "", K::DateTime, 136).exported(),
    F::new("SeMethodName", "", K::FixedString(32), 312),
    F::new("SeUsername", "", K::FixedString(80), 872),
    F::new("SeUserDescr1", "", K::UserParamDesc(2), 152),
    F::new("SeSeUserParams2", "", K::LongRealArray(4), 1120),
    F::new("SeSeUserParamDescr2", "", K::UserParamDesc(4), 1152),
    F::new("SeUserDescr2", "", K::UserParamDesc(8), 1408),
];

pub const SWEEP: &[F] = &[
    F::new("SwMark", "", K::Int32, 0),
    F::new("SwLabel", "", K::FixedString(32), 4),
    F::new("Stim Count", "", K::Int32, 40),
    F::new("SwSweepCount", "", K::Int32, 44),
    F::new("Sweep Time raw", "s", K::LongReal, 48).exported().printed(),
    F::new("Rel. Sweep Time", "s", K::RelativeTime, 48).exported().printed(),
    F::new("Sweep Time", "", K::DateTime, 48).exported().printed(),
    F::new("Timer Time", "s", K::LongReal, 56).exported().printed(),
    F::new("User param. 1,2", "", K::LongRealArray(2), 64),
    F::new("Pip. pressure", "a.u.", K::LongReal, 80),
    F::new("RMS noise", "A", K::LongReal, 88),
    F::new("Temperature", "°C", K::LongReal, 96),
    F::new("DigitalIn", "", K::Set16, 112),
    F::new("DigitalOut", "", K::Set16, 116),
    F::new("SweepKind", "", K::UInt16, 114),
    F::new("SwSwMarkers", "", K::LongRealArray(4), 120),
    F::new("Sweep holding 16x", "", K::LongRealArray(16), 160),
    F::new("User param ex.", "", K::LongRealArray(8), 288),
];

pub const TRACE: &[F] = &[
    F::new("TrMark", "", K::Int32, 0),
    F::new("TrLabel", "", K::FixedString(32), 4),
    F::new("TraceID", "", K::Int32, 36),
    F::new("DataPoints", "", K::Int32, 44),
    F::new("Holding", UNIT_VOLTS_OR_AMPS, K::LongReal, 408),
    F::new("Internal Solution", "", K::Int32, 48),
    F::new("Leak traces", "", K::Int32, 60),
    F::new("TrDataKind", "", K::Set16, 64),
    F::new("Clipping", "", K::Set16Bit(5), 64),
    F::new("UseXStart", "", K::Boolean, 66),
    F::new("Recording Mode", "", K::Enum(EnumKind::RecordingMode), 68).printed(),
    F::new("DataFormat", "", K::Enum(EnumKind::DataFormat), 70),
    F::new("XStart", "s", K::LongReal, 112),
    F::new("XInterval", "s", K::LongReal, 104),
    F::new("SampleRate", "Hz", K::InvLongReal, 104),
    F::new("Time offset", "s", K::LongReal, 80),
    F::new("Zero data", "A|V", K::LongReal, 88),
    F::new("Bandwidth", "Hz", K::LongReal, 144),
    F::new("PipetteResistance", "Ohm", K::LongReal, 152),
    F::new("CellPotential", "V", K::LongReal, 160),
    F::new("SealResistance", "Ohm", K::LongReal, 168).exported().printed(),
    F::new("Cslow", "F", K::LongReal, 176).exported().printed(),
    F::new("Gseries", "S", K::LongReal, 184),
    F::new("Rs", "Ohm", K::InvLongReal, 184).exported().printed(),
    F::new("RsValue", "", K::LongReal, 192),
    F::new("Gleak", "S", K::LongReal, 200),
    F::new("MemConductance", "S", K::LongReal, 208),
    F::new("CM", "F", K::LongReal, 248),
    F::new("GM", "S", K::LongReal, 256),
    F::new("GS", "S", K::LongReal, 280),
    F::new("Phase", "°", K::LongReal, 264),
    F::new("Ext.Sol.", "", K::Int32, 244),
    F::new("IntSolVal", "", K::LongReal, 424),
    F::new("ExtSolVal", "", K::LongReal, 432),
    F::new("IntSolName", "", K::FixedString(32), 440),
    F::new("ExtSolName", "", K::FixedString(32), 472),
    F::new("TrAdcChannel", "", K::Int16, 222).printed(),
];

/// The 400-byte amplifier state, wherever it is stored
pub const AMPLIFIER_STATE: &[F] = &[
    F::new("StateVersion", "", K::FixedString(8), 0).printed(),
    F::new("CurrentGain", "V/A", K::LongReal, 8).printed(),
    F::new("F2Bandwidth", "Hz", K::LongReal, 16).printed(),
    F::new("F2Frequency", "Hz", K::LongReal, 24).printed(),
    F::new("RsValue", "Ohm", K::LongReal, 32).printed(),
    F::new("RsFraction", "", K::LongReal, 40).printed(),
    F::new("GLeak", "S", K::LongReal, 48).printed(),
    F::new("CFastAmp1", "F", K::LongReal, 56).printed(),
    F::new("CFastAmp2", "F", K::LongReal, 64).printed(),
    F::new("CFastTau", "s", K::LongReal, 72).printed(),
    F::new("CSlow", "F", K::LongReal, 80).printed(),
    F::new("GSeries", "S", K::LongReal, 88).printed(),
    F::new("VCStimDacScale", "", K::LongReal, 96).printed(),
    F::new("CCStimDacScale", "", K::LongReal, 104).printed(),
    F::new("VHold", "V", K::LongReal, 112).printed(),
    F::new("LastVHold", "V", K::LongReal, 120).printed(),
    F::new("VpOffset", "V", K::LongReal, 128).printed(),
    F::new("VLiquidJunction", "V", K::LongReal, 136).printed(),
    F::new("CCIHold", "A", K::LongReal, 144).printed(),
    F::new("MConductance", "S", K::LongReal, 184).printed(),
    F::new("MCapacitance", "F", K::LongReal, 192).printed(),
    F::new("IMonAdc", "", K::Int16, 212).printed(),
    F::new("VMonAdc", "", K::Int16, 192).printed(),
    F::new("StimDac", "", K::Int16, 220).printed(),
    F::new("StimFilterOn", "", K::Byte, 282).printed(),
    F::new("StimFilter", "Hz", K::LongReal, 296).printed(),
    F::new("Mode", "", K::Enum(EnumKind::AmpMode), 237).printed(),
    F::new("SerialNumber", "", K::FixedString(8), 200).printed(),
    F::new("VmonFactor", "x", K::LongReal, 336).printed(),
    F::new("VmonOffset", "V", K::LongReal, 360).printed(),
    F::new("CalibDate", "", K::FixedString(16), 344).printed(),
];

pub const STIMULATION: &[F] = &[
    F::new("stMark", "", K::Int32, 0),
    F::new("stEntryName", "", K::FixedString(32), 4).printed(),
    F::new("stFileName", "", K::FixedString(32), 36),
    F::new("stAnalName", "", K::FixedString(32), 68),
    F::new("stDataStartSegment", "", K::Int32, 100).printed(),
    F::new("stDataStartTime", "s", K::LongReal, 104).printed(),
    F::new("stSampleInterval", "s", K::LongReal, 112).printed(),
    F::new("stSweepInterval", "s", K::LongReal, 120).printed(),
    F::new("stLeakDelay", "s", K::LongReal, 128),
    F::new("stFilterFactor", "", K::LongReal, 136),
    F::new("stNumberSweeps", "", K::Int32, 144).printed(),
    F::new("stNumberLeaks", "", K::Int32, 148),
    F::new("stNumberAverages", "", K::Int32, 152),
    F::new("stActualAdcChannels", "", K::Int32, 156),
    F::new("stActualDacChannels", "", K::Int32, 160),
    F::new("stExtTrigger", "", K::Byte, 164),
    F::new("stNoStartWait", "", K::Boolean, 165),
    F::new("stUseScanRates", "", K::Boolean, 166),
    F::new("stNoContAq", "", K::Boolean, 167),
    F::new("stHasLockIn", "", K::Boolean, 168),
];

pub const STIM_CHANNEL: &[F] = &[
    F::new("chMark", "", K::Int32, 0),
    F::new("chLinkedChannel", "", K::Int32, 4).printed(),
    F::new("chCompressionFactor", "", K::Int32, 8),
    F::new("chYUnit", "", K::FixedString(8), 12),
    F::new("chAdcChannel", "", K::Int16, 20).printed(),
    F::new("chAdcMode", "", K::Byte, 22),
    F::new("chDoWrite", "", K::Boolean, 23),
    F::new("chLeakStore", "", K::Byte, 24),
    F::new("chAmplMode", "", K::Enum(EnumKind::AmpMode), 25).printed(),
    F::new("chOwnSegTime", "", K::Boolean, 26),
    F::new("chSetLastSegVmemb", "", K::Boolean, 27),
    F::new("chDacChannel", "", K::Int16, 28).printed(),
    F::new("chDacMode", "", K::Byte, 30),
    F::new("chRelevantXSegment", "", K::Int32, 32),
    F::new("chRelevantYSegment", "", K::Int32, 36),
    F::new("chDacUnit", "", K::FixedString(8), 40).printed(),
    F::new("chHolding", "", K::LongReal, 48).printed(),
    F::new("chLeakHolding", "", K::LongReal, 56),
    F::new("chLeakSize", "", K::LongReal, 64),
];

pub const STIM_SEGMENT: &[F] = &[
    F::new("seMark", "", K::Int32, 0).exported().printed(),
    F::new("seClass", "", K::Enum(EnumKind::SegmentClass), 4).exported().printed(),
    F::new("seStoreKind", "", K::Enum(EnumKind::StoreKind), 5).exported().printed(),
    F::new("seVoltageIncMode", "", K::Enum(EnumKind::IncrementMode), 6).exported().printed(),
    F::new("seDurationIncMode", "", K::Enum(EnumKind::IncrementMode), 7).exported().printed(),
    F::new("seVoltage", "V", K::LongReal, 8).exported().printed(),
    F::new("seVoltageSource", "", K::Int32, 16).exported().printed(),
    F::new("seDeltaVFactor", "", K::LongReal, 20).exported().printed(),
    F::new("seDeltaVIncrement", "V", K::LongReal, 28).exported().printed(),
    F::new("seDuration", "s", K::LongReal, 36).exported().printed(),
    F::new("seDurationSource", "", K::Int32, 44).exported().printed(),
    F::new("seDeltaTFactor", "", K::LongReal, 48).exported().printed(),
    F::new("seDeltaTIncrement", "s", K::LongReal, 56).exported().printed(),
    F::new("seScanRate", "", K::LongReal, 72).exported().printed(),
];

/// Names one of the descriptor tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldTable {
    Root,
    Group,
    Series,
    Sweep,
    Trace,
    AmplifierState,
    Stimulation,
    StimChannel,
    StimSegment,
}

impl FieldTable {
    pub const ALL: [FieldTable; 9] = [
        FieldTable::Root,
        FieldTable::Group,
        FieldTable::Series,
        FieldTable::Sweep,
        FieldTable::Trace,
        FieldTable::AmplifierState,
        FieldTable::Stimulation,
        FieldTable::StimChannel,
        FieldTable::StimSegment,
    ];

    pub fn fields(self) -> &'static [F] {
        match self {
            FieldTable::Root => ROOT,
            FieldTable::Group => GROUP,
            FieldTable::Series => SERIES,
            FieldTable::Sweep => SWEEP,
            FieldTable::Trace => TRACE,
            FieldTable::AmplifierState => AMPLIFIER_STATE,
            FieldTable::Stimulation => STIMULATION,
            FieldTable::StimChannel => STIM_CHANNEL,
            FieldTable::StimSegment => STIM_SEGMENT,
        }
    }

    /// Key used in configuration files
    pub fn name(self) -> &'static str {
        match self {
            FieldTable::Root => "root",
            FieldTable::Group => "group",
            FieldTable::Series => "series",
            FieldTable::Sweep => "sweep",
            FieldTable::Trace => "trace",
            FieldTable::AmplifierState => "amplifier_state",
            FieldTable::Stimulation => "stimulation",
            FieldTable::StimChannel => "stim_channel",
            FieldTable::StimSegment => "stim_segment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.name() == name)
    }

    /// Table for a level of the pulse tree
    pub fn for_pulse_level(level: Level) -> Self {
        match level {
            Level::Root => FieldTable::Root,
            Level::Group => FieldTable::Group,
            Level::Series => FieldTable::Series,
            Level::Sweep => FieldTable::Sweep,
            Level::Trace => FieldTable::Trace,
        }
    }

    /// Table for a level of the stimulus tree (the root has none)
    pub fn for_stim_level(depth: usize) -> Option<Self> {
        match depth {
            1 => Some(FieldTable::Stimulation),
            2 => Some(FieldTable::StimChannel),
            3 => Some(FieldTable::StimSegment),
            _ => None,
        }
    }

    /// Position of a field by name
    pub fn position(self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_sizes() {
        assert_eq!(ROOT.len(), 8);
        assert_eq!(GROUP.len(), 5);
        assert_eq!(SERIES.len(), 15);
        assert_eq!(SWEEP.len(), 18);
        assert_eq!(TRACE.len(), 37);
        assert_eq!(AMPLIFIER_STATE.len(), 31);
        assert_eq!(STIM_SEGMENT.len(), 14);
    }

    #[test]
    fn test_names_unique_per_table() {
        for table in FieldTable::ALL {
            let names: HashSet<_> = table.fields().iter().map(|f| f.name).collect();
            assert_eq!(names.len(), table.fields().len(), "{}", table.name());
        }
    }

    #[test]
    fn test_amplifier_state_fits_its_record() {
        for field in AMPLIFIER_STATE {
            assert!(field.offset < crate::format::amp::AMPLIFIER_STATE_SIZE, "{}", field.name);
        }
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(FieldTable::Trace.position("TrMark"), Some(0));
        assert!(FieldTable::Trace.position("Holding").is_some());
        assert_eq!(FieldTable::Group.position("nope"), None);
        assert_eq!(FieldTable::for_pulse_level(Level::Sweep), FieldTable::Sweep);
        assert_eq!(FieldTable::for_stim_level(3), Some(FieldTable::StimSegment));
        assert_eq!(FieldTable::for_stim_level(0), None);
        assert_eq!(FieldTable::from_name("amplifier_state"), Some(FieldTable::AmplifierState));
        assert_eq!(FieldTable::from_name("Trace"), None);
    }
}
