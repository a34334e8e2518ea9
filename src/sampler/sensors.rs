//! Sensor collaborators and raw-reading conversions

use std::time::Instant;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("invalid reading from {0}")]
    InvalidReading(&'static str),
}

/// BH1750 counts per lux in high-resolution mode
pub const LUX_COUNTS_PER_LUX: f32 = 1.2;

/// Accelerometer counts per g at the +-2g range
pub const ACCEL_LSB_PER_G: f32 = 16384.0;

/// INA219 bus voltage LSB in volts
pub const BUS_VOLTAGE_LSB: f32 = 0.004;

/// INA219 shunt voltage LSB in volts
pub const SHUNT_VOLTAGE_LSB: f32 = 0.000_01;

/// DS18B20 counts per degree Celsius
pub const TEMPERATURE_LSB_PER_C: f32 = 16.0;

/// Scratchpad value left by a probe that never completed a conversion (85 C)
const DS18B20_POWER_ON_RESET: i16 = 0x0550;

pub fn lux_from_raw(raw: u16) -> f32 {
    f32::from(raw) / LUX_COUNTS_PER_LUX
}

/// Bus voltage register holds the reading in bits 15..3
pub fn bus_voltage_from_raw(raw: u16) -> f32 {
    f32::from(raw >> 3) * BUS_VOLTAGE_LSB
}

pub fn shunt_voltage_from_raw(raw: i16) -> f32 {
    f32::from(raw) * SHUNT_VOLTAGE_LSB
}

/// Probe scratchpad to degrees Celsius; rejects the power-on value and
/// anything outside the -55..=125 C range
pub fn temperature_from_raw(raw: i16) -> Result<f32, SensorError> {
    let celsius = f32::from(raw) / TEMPERATURE_LSB_PER_C;
    if raw == DS18B20_POWER_ON_RESET || !(-55.0..=125.0).contains(&celsius) {
        return Err(SensorError::InvalidReading("ds18b20"));
    }
    Ok(celsius)
}

/// Acceleration in g on each axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Acceleration {
    pub fn from_raw(raw: [i16; 3]) -> Self {
        Self {
            x: f32::from(raw[0]) / ACCEL_LSB_PER_G,
            y: f32::from(raw[1]) / ACCEL_LSB_PER_G,
            z: f32::from(raw[2]) / ACCEL_LSB_PER_G,
        }
    }

    /// (pitch, roll) in degrees
    pub fn orientation(&self) -> (f32, f32) {
        let pitch = self.x.atan2((self.y * self.y + self.z * self.z).sqrt());
        let roll = self.y.atan2((self.x * self.x + self.z * self.z).sqrt());
        (pitch.to_degrees(), roll.to_degrees())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub bus_voltage: f32,
    pub shunt_voltage: f32,
    pub current: f32,
    pub power: f32,
}

impl PowerReading {
    /// Derive current and power from the two voltage registers and the shunt value
    pub fn from_raw(bus_raw: u16, shunt_raw: i16, shunt_ohms: f32) -> Self {
        let bus_voltage = bus_voltage_from_raw(bus_raw);
        let shunt_voltage = shunt_voltage_from_raw(shunt_raw);
        let current = shunt_voltage / shunt_ohms;
        Self {
            bus_voltage,
            shunt_voltage,
            current,
            power: bus_voltage * current,
        }
    }
}

/// The set of sensors the sampler reads each cycle.
///
/// All methods except [`SensorSuite::temperature`] talk over the shared bus;
/// the caller holds the bus for the duration of the call.
pub trait SensorSuite: Send {
    fn illuminance(&mut self, channel: usize) -> Result<f32, SensorError>;

    fn acceleration(&mut self) -> Result<Acceleration, SensorError>;

    /// One-wire probe, not on the shared bus
    fn temperature(&mut self) -> Result<f32, SensorError>;

    fn power(&mut self) -> Result<PowerReading, SensorError>;
}

/// Plausible readings for hosts without sensor hardware
#[derive(Debug)]
pub struct SimulatedSensors {
    started: Instant,
}

impl SimulatedSensors {
    const SHUNT_OHMS: f32 = 0.1;

    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// -1.0..=1.0 over one simulated day of ten minutes
    fn phase(&self) -> f32 {
        let secs = self.started.elapsed().as_secs_f32();
        (secs / 600.0 * std::f32::consts::TAU).sin()
    }

    fn illuminance_at(phase: f32, channel: usize) -> f32 {
        let daylight = phase.max(0.0);
        let raw = 20_000.0 * daylight * (1.0 - channel as f32 * 0.1) + 12.0;
        lux_from_raw(raw.round() as u16)
    }

    fn temperature_at(phase: f32) -> Result<f32, SensorError> {
        let celsius = 18.0 + 7.0 * phase;
        temperature_from_raw((celsius * TEMPERATURE_LSB_PER_C).round() as i16)
    }

    fn power_at(phase: f32) -> PowerReading {
        let daylight = phase.max(0.0);
        let bus_raw = ((12.0 + 6.0 * daylight) / BUS_VOLTAGE_LSB).round() as u16;
        let shunt_raw = (3_000.0 * daylight).round() as i16;
        PowerReading::from_raw(bus_raw << 3, shunt_raw, Self::SHUNT_OHMS)
    }
}

impl Default for SimulatedSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSuite for SimulatedSensors {
    fn illuminance(&mut self, channel: usize) -> Result<f32, SensorError> {
        Ok(Self::illuminance_at(self.phase(), channel))
    }

    fn acceleration(&mut self) -> Result<Acceleration, SensorError> {
        // Panel tilted slightly along both axes
        Ok(Acceleration::from_raw([2_840, -1_430, 16_070]))
    }

    fn temperature(&mut self) -> Result<f32, SensorError> {
        Self::temperature_at(self.phase())
    }

    fn power(&mut self) -> Result<PowerReading, SensorError> {
        Ok(Self::power_at(self.phase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_lux_conversion() {
        assert!(close(lux_from_raw(120), 100.0));
        assert_eq!(lux_from_raw(0), 0.0);
    }

    #[test]
    fn test_ina219_conversions() {
        // 12.0 V = 3000 LSB, shifted into bits 15..3 with flag bits set
        assert!(close(bus_voltage_from_raw((3000 << 3) | 0b011), 12.0));
        assert!(close(shunt_voltage_from_raw(-500), -0.005));

        let reading = PowerReading::from_raw(3000 << 3, 1000, 0.1);
        assert!(close(reading.current, 0.1));
        assert!(close(reading.power, 1.2));
    }

    #[test]
    fn test_orientation_level_and_tilted() {
        let level = Acceleration::from_raw([0, 0, 16384]);
        let (pitch, roll) = level.orientation();
        assert!(close(pitch, 0.0) && close(roll, 0.0));

        let on_edge = Acceleration::from_raw([16384, 0, 0]);
        assert!(close(on_edge.orientation().0, 90.0));

        let rolled = Acceleration { x: 0.0, y: 1.0, z: 1.0 };
        assert!(close(rolled.orientation().1, 45.0));
    }

    #[test]
    fn test_temperature_conversion() {
        assert_eq!(temperature_from_raw(0x0191), Ok(25.0625));
        assert_eq!(temperature_from_raw(-0x0190), Ok(-25.0));
        assert_eq!(
            temperature_from_raw(0x0550),
            Err(SensorError::InvalidReading("ds18b20"))
        );
        assert!(temperature_from_raw(0x07FF).is_err());
    }

    #[test]
    fn test_simulated_night_and_noon() {
        // 12.0 V exactly, not 11.996 from a truncated 2999.9998
        let night = SimulatedSensors::power_at(-1.0);
        assert_eq!(night.bus_voltage, bus_voltage_from_raw(3000 << 3));
        assert!(night.bus_voltage >= 12.0);
        assert_eq!(night.current, 0.0);
        assert!(close(SimulatedSensors::illuminance_at(0.0, 0), 10.0));

        let noon = SimulatedSensors::power_at(1.0);
        assert!(close(noon.bus_voltage, 18.0));
        assert!(close(noon.shunt_voltage, 0.03));
        assert!(close(SimulatedSensors::illuminance_at(1.0, 0), 20_012.0 / 1.2));
        assert!(SimulatedSensors::illuminance_at(1.0, 2) < SimulatedSensors::illuminance_at(1.0, 0));

        assert!(close(SimulatedSensors::temperature_at(1.0).unwrap(), 25.0));
        assert!(close(SimulatedSensors::temperature_at(-1.0).unwrap(), 11.0));
    }

    #[test]
    fn test_simulated_readings_are_finite() {
        let mut sensors = SimulatedSensors::new();
        for channel in 0..3 {
            assert!(sensors.illuminance(channel).unwrap().is_finite());
        }
        assert!(sensors.temperature().unwrap().is_finite());
        assert!(sensors.power().unwrap().bus_voltage >= 12.0);
    }
}
