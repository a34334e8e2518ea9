//! Sensor snapshot record and its wire body

use serde::{Deserialize, Serialize};

use crate::{LUX_CHANNELS, SENSOR_FAULT};

/// One complete set of sensor readings captured at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    /// Illumination per channel, in lux
    pub lux: [f32; LUX_CHANNELS],
    /// Pitch in degrees
    pub pitch: f32,
    /// Roll in degrees
    pub roll: f32,
    /// Temperature in degrees Celsius
    pub temperature: f32,
    /// Bus voltage in volts
    pub bus_voltage: f32,
    /// Shunt voltage in volts
    pub shunt_voltage: f32,
    /// Current in amperes
    pub current: f32,
    /// Power in watts
    pub power: f32,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::faulted()
    }
}

impl Snapshot {
    /// A snapshot where every reading carries the fault sentinel
    pub fn faulted() -> Self {
        Self {
            lux: [SENSOR_FAULT; LUX_CHANNELS],
            pitch: SENSOR_FAULT,
            roll: SENSOR_FAULT,
            temperature: SENSOR_FAULT,
            bus_voltage: SENSOR_FAULT,
            shunt_voltage: SENSOR_FAULT,
            current: SENSOR_FAULT,
            power: SENSOR_FAULT,
        }
    }

    /// Replace non-finite readings with the fault sentinel.
    ///
    /// JSON has no representation for NaN or infinity.
    pub fn sanitized(mut self) -> Self {
        let fix = |v: &mut f32| {
            if !v.is_finite() {
                *v = SENSOR_FAULT;
            }
        };
        self.lux.iter_mut().for_each(fix);
        for v in [
            &mut self.pitch,
            &mut self.roll,
            &mut self.temperature,
            &mut self.bus_voltage,
            &mut self.shunt_voltage,
            &mut self.current,
            &mut self.power,
        ] {
            fix(v);
        }
        self
    }
}

/// The `data` object of an envelope, keyed with the collector's short names
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataBody {
    pub lux1: f32,
    pub lux2: f32,
    pub lux3: f32,
    pub pt: f32,
    pub rl: f32,
    pub tp: f32,
    pub vb: f32,
    pub vs: f32,
    pub i: f32,
    pub p: f32,
}

impl From<&Snapshot> for DataBody {
    fn from(s: &Snapshot) -> Self {
        Self {
            lux1: s.lux[0],
            lux2: s.lux[1],
            lux3: s.lux[2],
            pt: s.pitch,
            rl: s.roll,
            tp: s.temperature,
            vb: s.bus_voltage,
            vs: s.shunt_voltage,
            i: s.current,
            p: s.power,
        }
    }
}

impl From<DataBody> for Snapshot {
    fn from(d: DataBody) -> Self {
        Self {
            lux: [d.lux1, d.lux2, d.lux3],
            pitch: d.pt,
            roll: d.rl,
            temperature: d.tp,
            bus_voltage: d.vb,
            shunt_voltage: d.vs,
            current: d.i,
            power: d.p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_uses_wire_field_order() {
        let snapshot = Snapshot {
            lux: [1.0, 2.0, 3.0],
            pitch: 4.0,
            roll: 5.0,
            temperature: 6.0,
            bus_voltage: 7.0,
            shunt_voltage: 8.0,
            current: 9.0,
            power: 10.0,
        };
        let json = serde_json::to_string(&DataBody::from(&snapshot)).unwrap();
        assert_eq!(
            json,
            r#"{"lux1":1.0,"lux2":2.0,"lux3":3.0,"pt":4.0,"rl":5.0,"tp":6.0,"vb":7.0,"vs":8.0,"i":9.0,"p":10.0}"#
        );
    }

    #[test]
    fn test_sanitized_replaces_nan() {
        let mut snapshot = Snapshot::faulted();
        snapshot.pitch = f32::NAN;
        snapshot.lux[1] = f32::INFINITY;
        snapshot.power = 2.5;

        let clean = snapshot.sanitized();
        assert_eq!(clean.pitch, SENSOR_FAULT);
        assert_eq!(clean.lux[1], SENSOR_FAULT);
        assert_eq!(clean.power, 2.5);
    }
}
