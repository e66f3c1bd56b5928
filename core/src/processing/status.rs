use crate::prelude::RelayConfig;
use crate::processing::xml::XmlBuilder;
use crate::protocol::{PacketId, PacketInfo, StatusXml, XmitPower};

/// Fragment kinds, in the order they are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    XmitPower,
    TestPulse,
    AngleErrors,
    SecondaryStatus,
}

const KINDS: [FragmentKind; 4] = [
    FragmentKind::XmitPower,
    FragmentKind::TestPulse,
    FragmentKind::AngleErrors,
    FragmentKind::SecondaryStatus,
];

/// Transmit power fragment, stamped with the power packet's time.
pub fn xmit_power_xml(power: &XmitPower, tag: &str) -> String {
    XmlBuilder::new(tag)
        .float("Time", power.info.time(), 3)
        .float("XmitPowerDbmH", power.power_dbm_h as f64, 3)
        .float("XmitPowerDbmV", power.power_dbm_v as f64, 3)
        .finish()
}

#[derive(Debug, Clone)]
struct Fragment {
    time: f64,
    xml: String,
}

pub struct StatusAugmenter {
    max_age: f64,
    interval: f64,
    fragments: [Option<Fragment>; 4],
    last_status_time: Option<f64>,
    latest_info: Option<PacketInfo>,
}

impl StatusAugmenter {
    pub fn new(max_age_secs: f64, interval_secs: f64) -> Self {
        Self {
            max_age: max_age_secs,
            interval: interval_secs,
            fragments: Default::default(),
            last_status_time: None,
            latest_info: None,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.status_xml_max_age_secs, config.status_xml_interval_secs)
    }

    pub fn set_fragment(&mut self, kind: FragmentKind, time: f64, xml: String) {
        self.fragments[kind as usize] = Some(Fragment { time, xml });
    }

    pub fn note_packet(&mut self, info: &PacketInfo) {
        self.latest_info = Some(*info);
    }

    pub fn fresh_fragments(&self, now: f64) -> String {
        KINDS
            .iter()
            .filter_map(|&kind| self.fragments[kind as usize].as_ref())
            .filter(|fragment| now - fragment.time <= self.max_age)
            .map(|fragment| fragment.xml.as_str())
            .collect()
    }

    /// `xml` with the fresh fragments appended, stamped `now`. `None` when
    /// there is nothing to send.
    pub fn augment(&self, info: &PacketInfo, xml: &str, now: f64) -> Option<StatusXml> {
        let mut text = xml.to_string();
        text.push_str(&self.fresh_fragments(now));
        if text.is_empty() {
            return None;
        }
        let mut info = *info;
        info.id = PacketId::StatusXml.as_i32();
        info.set_time(now);
        Some(StatusXml { info, xml: text })
    }

    pub fn handle_status(&mut self, status: &StatusXml, now: f64) -> Option<StatusXml> {
        self.last_status_time = Some(now);
        self.augment(&status.info, &status.xml, now)
    }

    /// Synthesises a status packet if none has gone out for the interval.
    pub fn check_due(&mut self, now: f64) -> Option<StatusXml> {
        if let Some(last) = self.last_status_time {
            if now - last <= self.interval {
                return None;
            }
        }
        self.last_status_time = Some(now);
        let info = self.latest_info.unwrap_or_default();
        self.augment(&info, "", now)
    }
}
