use std::f64::consts::PI;

use ndarray::Array2;
use num_complex::Complex64;

use crate::math::iq::{mean_lag1, mean_power, power_db};
use crate::prelude::RelayConfig;
use crate::processing::xml::XmlBuilder;
use crate::protocol::PulseRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestChannel {
    /// Horizontal transmit, co-polar receive.
    Hc = 0,
    Hx = 1,
    Vc = 2,
    Vx = 3,
}

const CHANNELS: [TestChannel; 4] = [TestChannel::Hc, TestChannel::Hx, TestChannel::Vc, TestChannel::Vx];

impl TestChannel {
    fn label(self) -> &'static str {
        match self {
            TestChannel::Hc => "Hc",
            TestChannel::Hx => "Hx",
            TestChannel::Vc => "Vc",
            TestChannel::Vx => "Vx",
        }
    }
}

/// Range geometry of the current pulses, in km.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeGeometry {
    pub start_range_km: f64,
    pub gate_spacing_km: f64,
}

impl RangeGeometry {
    /// Gate nearest `range_km`, clamped to the pulse.
    pub fn gate_for(&self, range_km: f64, n_gates: usize) -> usize {
        if n_gates == 0 {
            return 0;
        }
        let gate = if self.gate_spacing_km > 0.0 {
            ((range_km - self.start_range_km) / self.gate_spacing_km + 0.5).floor()
        } else {
            0.0
        };
        (gate.max(0.0) as usize).min(n_gates - 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSummary {
    pub time: f64,
    pub range_km: f64,
    pub gate_num: usize,
    pub geometry: RangeGeometry,
    pub alternating: bool,
    /// Indexed by [`TestChannel`].
    pub power_db: [Option<f64>; 4],
    /// m/s, indexed by [`TestChannel`].
    pub velocity: [Option<f64>; 4],
}

impl CalibrationSummary {
    pub fn power(&self, channel: TestChannel) -> Option<f64> {
        self.power_db[channel as usize]
    }

    pub fn velocity(&self, channel: TestChannel) -> Option<f64> {
        self.velocity[channel as usize]
    }

    fn reported(&self) -> impl Iterator<Item = TestChannel> + '_ {
        CHANNELS.into_iter().filter(move |&channel| {
            self.alternating || matches!(channel, TestChannel::Hc | TestChannel::Vc)
        })
    }

    pub fn to_xml(&self, tag: &str) -> String {
        let mut xml = XmlBuilder::new(tag)
            .float("Time", self.time, 3)
            .float("RangeKm", self.range_km, 3)
            .field("GateNum", self.gate_num)
            .float("StartRangeKm", self.geometry.start_range_km, 4)
            .float("GateSpacingKm", self.geometry.gate_spacing_km, 4);
        for channel in self.reported() {
            if let Some(power) = self.power(channel) {
                xml = xml.float(&format!("TestPulsePowerDb{}", channel.label()), power, 3);
            }
        }
        for channel in self.reported() {
            if let Some(velocity) = self.velocity(channel) {
                xml = xml.float(&format!("TestPulseVel{}", channel.label()), velocity, 4);
            }
        }
        xml.finish()
    }
}

pub struct CalibrationMonitor {
    range_km: f64,
    n_pulses: usize,
    alternating: bool,
    switching: bool,
    window: Array2<Complex64>,
    count: usize,
    gate_num: usize,
    latest: Option<CalibrationSummary>,
}

impl CalibrationMonitor {
    pub fn new(range_km: f64, n_pulses: usize, alternating: bool, switching: bool) -> Self {
        let n_pulses = n_pulses.max(2);
        let per_channel = if alternating { n_pulses / 2 } else { n_pulses };
        Self {
            range_km,
            n_pulses,
            alternating,
            switching,
            window: Array2::zeros((CHANNELS.len(), per_channel.max(1))),
            count: 0,
            gate_num: 0,
            latest: None,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.test_pulse_range_km,
            config.test_pulse_n_samples,
            config.dual_pol_alternating_mode,
            config.dual_pol_switching_receivers,
        )
    }

    pub fn latest(&self) -> Option<&CalibrationSummary> {
        self.latest.as_ref()
    }

    /// Channel-to-slot mapping for one pulse: (receiver channel, slot) pairs.
    fn mapping(&self, horizontal: bool) -> [(usize, TestChannel); 2] {
        match (self.alternating, self.switching, horizontal) {
            (false, _, _) => [(0, TestChannel::Hc), (1, TestChannel::Vc)],
            (true, _, true) => [(0, TestChannel::Hc), (1, TestChannel::Vx)],
            (true, true, false) => [(0, TestChannel::Vc), (1, TestChannel::Hx)],
            (true, false, false) => [(1, TestChannel::Vc), (0, TestChannel::Hx)],
        }
    }

    /// Adds the pulse's test-gate samples; returns the new summary when the
    /// window completes.
    pub fn observe(
        &mut self,
        pulse: &PulseRecord,
        geometry: RangeGeometry,
        wavelength_m: Option<f64>,
        now: f64,
    ) -> Option<&CalibrationSummary> {
        let n_gates = pulse.header.n_gates.max(0) as usize;
        self.gate_num = geometry.gate_for(self.range_km, n_gates);

        let index = if self.alternating { self.count / 2 } else { self.count };
        if index < self.window.ncols() {
            for (channel, slot) in self.mapping(pulse.is_horizontal()) {
                let sample = pulse
                    .iq_sample(channel, self.gate_num)
                    .map(|z| Complex64::new(z.re as f64, z.im as f64))
                    .unwrap_or_default();
                self.window[[slot as usize, index]] = sample;
            }
        }
        self.count += 1;
        if self.count < self.n_pulses {
            return None;
        }

        let filled = if self.alternating { self.count / 2 } else { self.count };
        let n_samples = filled.min(self.window.ncols());
        let mut prt = pulse.header.prt as f64;
        if self.alternating {
            prt *= 2.0;
        }
        let nyquist = match wavelength_m {
            Some(wavelength) if wavelength > 0.0 && prt > 0.0 => Some(wavelength / prt / 4.0),
            _ => None,
        };

        let mut power = [None; 4];
        let mut velocity = [None; 4];
        for channel in CHANNELS {
            let row = self.window.row(channel as usize);
            let samples = row.slice(ndarray::s![..n_samples]);
            power[channel as usize] = power_db(mean_power(samples));
            if power[channel as usize].is_some() {
                velocity[channel as usize] =
                    nyquist.map(|nyquist| mean_lag1(samples).arg() / PI * nyquist);
            }
        }

        self.count = 0;
        self.window.fill(Complex64::new(0.0, 0.0));
        self.latest = Some(CalibrationSummary {
            time: now,
            range_km: self.range_km,
            gate_num: self.gate_num,
            geometry,
            alternating: self.alternating,
            power_db: power,
            velocity,
        });
        self.latest.as_ref()
    }
}
