//! Periodic sensor sampling
//!
//! Each cycle reads every sensor, assembles one [`Snapshot`] and publishes it
//! on the snapshot channel. A read that cannot get the bus in time keeps the
//! previous value; a failing sensor reports [`SENSOR_FAULT`].

pub mod bus;
pub mod sensors;

pub use bus::SensorBus;
pub use sensors::{SensorError, SensorSuite, SimulatedSensors};

use std::time::Duration;

use solarstation_shared::{timing, Snapshot, LUX_CHANNELS, SENSOR_FAULT};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::channel::SnapshotPublisher;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub interval: Duration,
    pub bus_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(timing::SAMPLE_INTERVAL_MS),
            bus_timeout: Duration::from_millis(timing::BUS_LOCK_TIMEOUT_MS),
        }
    }
}

pub struct Sampler<S: SensorSuite> {
    sensors: S,
    bus: SensorBus,
    publisher: SnapshotPublisher,
    config: SamplerConfig,
    last: Snapshot,
}

fn or_fault<T>(sensor: &'static str, reading: Result<T, SensorError>) -> Option<T> {
    match reading {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(sensor, "read failed: {}", e);
            None
        }
    }
}

impl<S: SensorSuite> Sampler<S> {
    pub fn new(sensors: S, bus: SensorBus, publisher: SnapshotPublisher, config: SamplerConfig) -> Self {
        Self {
            sensors,
            bus,
            publisher,
            config,
            last: Snapshot::faulted(),
        }
    }

    /// Read all sensors once and publish the result
    pub async fn sample(&mut self) -> Snapshot {
        let mut next = self.last;
        let wait = self.config.bus_timeout;

        for channel in 0..LUX_CHANNELS {
            match self.bus.acquire(wait).await {
                Ok(_bus) => {
                    next.lux[channel] = or_fault("illuminance", self.sensors.illuminance(channel))
                        .unwrap_or(SENSOR_FAULT);
                }
                Err(e) => debug!(channel, "illuminance skipped: {}", e),
            }
        }

        match self.bus.acquire(wait).await {
            Ok(_bus) => {
                let (pitch, roll) = or_fault("accelerometer", self.sensors.acceleration())
                    .map(|accel| accel.orientation())
                    .unwrap_or((SENSOR_FAULT, SENSOR_FAULT));
                next.pitch = pitch;
                next.roll = roll;
            }
            Err(e) => debug!("orientation skipped: {}", e),
        }

        next.temperature = or_fault("temperature", self.sensors.temperature()).unwrap_or(SENSOR_FAULT);

        match self.bus.acquire(wait).await {
            Ok(_bus) => match or_fault("power monitor", self.sensors.power()) {
                Some(reading) => {
                    next.bus_voltage = reading.bus_voltage;
                    next.shunt_voltage = reading.shunt_voltage;
                    next.current = reading.current;
                    next.power = reading.power;
                }
                None => {
                    next.bus_voltage = SENSOR_FAULT;
                    next.shunt_voltage = SENSOR_FAULT;
                    next.current = SENSOR_FAULT;
                    next.power = SENSOR_FAULT;
                }
            },
            Err(e) => debug!("power skipped: {}", e),
        }

        self.last = next.sanitized();
        self.publisher.publish(self.last);
        self.last
    }

    /// Sample at the configured cadence until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Sampler started ({:?} interval)", self.config.interval);
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.sample().await;
                    debug!(?snapshot, "published");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Sampler stopped");
    }
}
