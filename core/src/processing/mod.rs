pub mod angle_merge;
pub mod batcher;
pub mod calibration;
pub mod delay;
pub mod scan_merge;
pub mod status;
pub mod sweep;
pub mod xml;

pub use angle_merge::{
    AngleCheck, AngleErrorAccumulator, AngleErrorSummary, AngleLookup, AngleMerger, AngleReader,
    AngleSample,
};
pub use batcher::OutputBatcher;
pub use calibration::{CalibrationMonitor, CalibrationSummary, RangeGeometry, TestChannel};
pub use delay::ReadDelayController;
pub use scan_merge::{Origin, ScanState, SweepBracket};
pub use status::{xmit_power_xml, FragmentKind, StatusAugmenter};
pub use sweep::{SweepStabilizer, SweepState};
pub use xml::XmlBuilder;
