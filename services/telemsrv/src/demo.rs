//! Simulated telemetry for demonstrations without hardware
//!
//! Emulates two generators and one transfer switch. Snapshots carry the same
//! fields and status labels a real poll produces and go through the same
//! publisher, so consumers cannot tell the difference.

use std::time::Duration;

use rand::Rng;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::{Device, DeviceClass, FieldMap, FieldValue, ProtocolKind, TelemetrySnapshot};
use crate::protocols::RegisterMap;
use crate::runtime::SnapshotPublisher;

/// Cycles per additional engine hour
const TICKS_PER_ENGINE_HOUR: u64 = 1800;
const BASE_ENGINE_HOURS: i64 = 1237;
const NOMINAL_VOLTAGE: f64 = 400.0;

#[derive(Debug, Clone)]
struct DemoGenerator {
    device: Device,
    power_base: f64,
    phase: f64,
}

/// The devices emulated in demo mode
pub fn demo_devices() -> Vec<Device> {
    let device = |id: i64, name: &str, class: DeviceClass| Device {
        id,
        name: name.to_string(),
        site_code: "MKZ".to_string(),
        device_class: class,
        protocol: ProtocolKind::FramedTcp,
        host: "127.0.0.1".to_string(),
        port: 502,
        unit_id: 1,
        active: true,
    };
    vec![
        device(1, "Gen1", DeviceClass::Generator),
        device(2, "Gen2", DeviceClass::Generator),
        device(3, "SPR", DeviceClass::TransferSwitch),
    ]
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

struct Fields(FieldMap);

impl Fields {
    fn new() -> Self {
        Self(FieldMap::new())
    }

    fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> &mut Self {
        self.0.insert(name.to_string(), Some(value.into()));
        self
    }

    fn float(&mut self, name: &str, value: f64, digits: i32) -> &mut Self {
        self.set(name, round_to(value, digits))
    }

    fn int(&mut self, name: &str, value: f64) -> &mut Self {
        self.set(name, value.round() as i64)
    }

    fn finish(self, class: DeviceClass) -> FieldMap {
        let mut fields = self.0;
        RegisterMap::for_class(class).derive(&mut fields);
        fields
    }
}

pub struct DemoPublisher {
    publisher: SnapshotPublisher,
    generators: Vec<DemoGenerator>,
    switches: Vec<Device>,
    poll_interval: Duration,
    tick: u64,
}

impl DemoPublisher {
    pub fn new(publisher: SnapshotPublisher, poll_interval: Duration) -> Self {
        let (generators, switches): (Vec<Device>, Vec<Device>) = demo_devices()
            .into_iter()
            .partition(|d| d.device_class == DeviceClass::Generator);
        let generators = generators
            .into_iter()
            .zip([(240.0, 0.0), (210.0, 1.5)])
            .map(|(device, (power_base, phase))| DemoGenerator {
                device,
                power_base,
                phase,
            })
            .collect();

        Self {
            publisher,
            generators,
            switches,
            poll_interval,
            tick: 0,
        }
    }

    /// Snapshots for the current tick, generators first
    pub fn snapshots(&self) -> Vec<TelemetrySnapshot> {
        let mut rng = rand::thread_rng();
        let mut snapshots: Vec<TelemetrySnapshot> = self
            .generators
            .iter()
            .map(|g| {
                TelemetrySnapshot::online(&g.device, generator_fields(g, self.tick, &mut rng))
            })
            .collect();
        for device in &self.switches {
            let fields = transfer_switch_fields(self.tick, &mut rng);
            snapshots.push(TelemetrySnapshot::online(device, fields));
        }
        snapshots
    }

    /// Publish one round of snapshots and advance the simulation clock
    pub async fn publish_tick(&mut self) {
        for snapshot in self.snapshots() {
            if let Err(e) = self.publisher.publish(&snapshot).await {
                warn!("Demo publish for device {} failed: {}", snapshot.device_id, e);
            }
        }
        self.tick += 1;
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Demo publisher started, emulating {} devices",
            self.generators.len() + self.switches.len()
        );
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.publish_tick().await,
            }
        }
        info!("Demo publisher stopped");
    }
}

fn generator_fields(generator: &DemoGenerator, tick: u64, rng: &mut impl Rng) -> FieldMap {
    let t = tick as f64;
    let phase = generator.phase;
    let mut noise = |amp: f64| rng.gen_range(-amp..=amp);

    let power = generator.power_base + 40.0 * (t * 0.02 + phase).sin() + noise(5.0);
    let cos_phi = 0.85 + noise(0.02);
    let phase_current = power / (3f64.sqrt() * NOMINAL_VOLTAGE * cos_phi) * 1000.0 / 3.0;
    let battery = 27.6 + noise(0.3);

    let mut f = Fields::new();
    f.set("mode_auto", true)
        .set("mode_manual", false)
        .set("mode_stop", false)
        .set("mode_test", false)
        .set("alarm_common", false)
        .set("alarm_shutdown", false)
        .set("alarm_warning", false)
        .set("alarm_block", false)
        .set("mains_normal", true)
        .set("mains_load", true)
        .set("gen_normal", true)
        .set("gen_closed", true);

    for name in ["mains_uab", "mains_ubc", "mains_uca"] {
        f.float(name, NOMINAL_VOLTAGE + noise(3.0), 1);
    }
    f.float("mains_freq", 50.0 + noise(0.03), 2);
    for name in ["gen_uab", "gen_ubc", "gen_uca"] {
        f.float(name, NOMINAL_VOLTAGE + noise(4.0), 1);
    }
    f.float("gen_freq", 50.0 + noise(0.05), 2)
        .float("volt_diff", noise(1.5), 1)
        .float("freq_diff", noise(0.02), 2)
        .float("phase_diff", noise(2.0), 1);

    for name in ["current_a", "current_b", "current_c"] {
        f.float(name, phase_current + noise(2.0), 1);
    }
    f.float("current_earth", 0.0, 1);

    for name in ["power_a", "power_b", "power_c"] {
        f.float(name, power / 3.0 + noise(3.0), 1);
    }
    f.float("power_total", power, 1);
    for name in ["reactive_a", "reactive_b", "reactive_c"] {
        f.float(name, power * 0.2 / 3.0 + noise(1.0), 1);
    }
    f.float("reactive_total", power * 0.2 + noise(2.0), 1);
    for name in ["pf_a", "pf_b", "pf_c"] {
        f.float(name, cos_phi + noise(0.005), 3);
    }
    f.float("pf_avg", cos_phi, 3);

    f.int("engine_speed", 1500.0 + noise(3.0))
        .float("battery_volt", battery, 1)
        .float("charger_volt", battery + 0.5 + noise(0.2), 1)
        .int("coolant_temp", 82.0 + 3.0 * (t * 0.01 + phase).sin() + noise(1.0))
        .int("oil_pressure", 420.0 + noise(15.0))
        .int("fuel_level", (75.0 - t * 0.005 + noise(1.0)).max(20.0))
        .int("load_pct", power / 300.0 * 100.0)
        .int("oil_temp", 95.0 + 2.0 * (t * 0.015 + phase).sin() + noise(1.0))
        .int("fuel_pressure", 350.0 + noise(10.0))
        .int("turbo_pressure", 180.0 + noise(8.0))
        .float("fuel_consumption", 45.0 + power * 0.08 + noise(2.0), 1);

    f.set("gen_status", 9i64)
        .set("run_hours", BASE_ENGINE_HOURS + (tick / TICKS_PER_ENGINE_HOUR) as i64)
        .set("run_minutes", ((tick / 30) % 60) as i64)
        .set("start_count", 342i64)
        .set("energy_kwh", 456_789 + (t * power / 3600.0) as i64)
        .set("alarm_count", 0i64);

    f.finish(DeviceClass::Generator)
}

fn transfer_switch_fields(tick: u64, rng: &mut impl Rng) -> FieldMap {
    let t = tick as f64;
    let mut noise = |amp: f64| rng.gen_range(-amp..=amp);

    let busbar_p = 450.0 + 60.0 * (t * 0.02).sin() + noise(8.0);
    let mains_p = 180.0 + 20.0 * (t * 0.03).sin() + noise(5.0);
    let phase_voltage = NOMINAL_VOLTAGE / 3f64.sqrt();

    let mut f = Fields::new();
    f.set("mode_auto", true)
        .set("mode_manual", false)
        .set("mode_stop", false)
        .set("mode_test", false)
        .set("alarm_common", false)
        .set("alarm_shutdown", false)
        .set("alarm_warning", false)
        .set("alarm_trip_stop", false)
        .set("genset_status", 9i64);

    for name in ["mains_uab", "mains_ubc", "mains_uca"] {
        f.int(name, NOMINAL_VOLTAGE + noise(5.0));
    }
    for name in ["mains_ua", "mains_ub", "mains_uc"] {
        f.int(name, 231.0 + noise(3.0));
    }
    f.float("mains_freq", 50.0 + noise(0.03), 2);

    for name in ["busbar_uab", "busbar_ubc", "busbar_uca"] {
        f.int(name, NOMINAL_VOLTAGE + noise(3.0));
    }
    for name in ["busbar_ua", "busbar_ub", "busbar_uc"] {
        f.int(name, phase_voltage + noise(2.0));
    }
    f.float("busbar_freq", 50.0 + noise(0.04), 2);

    f.float("mains_ia", 120.0 + noise(5.0), 1)
        .float("mains_ib", 118.0 + noise(5.0), 1)
        .float("mains_ic", 122.0 + noise(5.0), 1)
        .float("mains_total_p", mains_p, 1)
        .float("mains_total_q", mains_p * 0.15 + noise(2.0), 1)
        .float(
            "busbar_current",
            busbar_p / (3f64.sqrt() * NOMINAL_VOLTAGE) * 1000.0 + noise(3.0),
            1,
        )
        .float("battery_v", 27.5 + noise(0.3), 1)
        .float("busbar_p", busbar_p, 1)
        .float("busbar_q", busbar_p * 0.2 + noise(3.0), 1)
        .set("busbar_switch", 3i64)
        .set("mains_status", 0i64)
        .set("mains_switch", 3i64)
        .float("accum_kwh", 45_230.0 + t * 0.15, 1)
        .float("accum_kvarh", 8_920.0 + t * 0.03, 1)
        .set("maint_hours", 163i64.saturating_sub((tick / 3600) as i64).max(0));

    f.finish(DeviceClass::TransferSwitch)
}
