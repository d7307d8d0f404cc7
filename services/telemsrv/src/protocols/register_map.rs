//! Register maps of the two supported controller families
//!
//! The generator map follows the HGM9520N layout, the transfer-switch map the
//! HGM9560 layout. Both are static tables and never change at runtime.

use super::decoder::FieldKind::{
    AtMost, Below, Bit, Guarded, Load, Signed, Signed32, Temperature, Unsigned, Unsigned32,
};
use super::decoder::Scale::{Hundredths, Tenths, Thousandths, Unit};
use super::decoder::{FieldSpec, RegisterBlock};
use crate::model::{DeviceClass, FieldMap, FieldValue};

const fn f(name: &'static str, offset: usize, kind: super::decoder::FieldKind) -> FieldSpec {
    FieldSpec::new(name, offset, kind)
}

// ============================================================================
// Generator controller (HGM9520N)
// ============================================================================

static GEN_STATUS: [FieldSpec; 8] = [
    f("mode_auto", 0, Bit(9)),
    f("mode_manual", 0, Bit(10)),
    f("mode_stop", 0, Bit(11)),
    f("mode_test", 0, Bit(8)),
    f("alarm_common", 0, Bit(0)),
    f("alarm_shutdown", 0, Bit(1)),
    f("alarm_warning", 0, Bit(2)),
    f("alarm_block", 0, Bit(7)),
];

static GEN_BREAKER: [FieldSpec; 4] = [
    f("mains_normal", 0, Bit(0)),
    f("mains_load", 0, Bit(1)),
    f("gen_normal", 0, Bit(2)),
    f("gen_closed", 0, Bit(3)),
];

static GEN_MAINS_VOLTAGE: [FieldSpec; 4] = [
    f("mains_uab", 0, Unsigned32(Tenths)),
    f("mains_ubc", 2, Unsigned32(Tenths)),
    f("mains_uca", 4, Unsigned32(Tenths)),
    f("mains_freq", 15, Unsigned(Hundredths)),
];

static GEN_VOLTAGE: [FieldSpec; 7] = [
    f("gen_uab", 0, Unsigned32(Tenths)),
    f("gen_ubc", 2, Unsigned32(Tenths)),
    f("gen_uca", 4, Unsigned32(Tenths)),
    f("gen_freq", 15, Unsigned(Hundredths)),
    f("volt_diff", 16, Signed(Tenths)),
    f("freq_diff", 17, Signed(Hundredths)),
    f("phase_diff", 18, Signed(Tenths)),
];

static GEN_CURRENT: [FieldSpec; 4] = [
    f("current_a", 0, Guarded(Tenths)),
    f("current_b", 1, Guarded(Tenths)),
    f("current_c", 2, Guarded(Tenths)),
    f("current_earth", 3, Guarded(Tenths)),
];

static GEN_POWER: [FieldSpec; 12] = [
    f("power_a", 0, Signed32(Tenths)),
    f("power_b", 2, Signed32(Tenths)),
    f("power_c", 4, Signed32(Tenths)),
    f("power_total", 6, Signed32(Tenths)),
    f("reactive_a", 8, Signed32(Tenths)),
    f("reactive_b", 10, Signed32(Tenths)),
    f("reactive_c", 12, Signed32(Tenths)),
    f("reactive_total", 14, Signed32(Tenths)),
    f("pf_a", 24, Signed(Thousandths)),
    f("pf_b", 25, Signed(Thousandths)),
    f("pf_c", 26, Signed(Thousandths)),
    f("pf_avg", 27, Signed(Thousandths)),
];

static GEN_ENGINE: [FieldSpec; 11] = [
    f("engine_speed", 0, AtMost(5000, Unit)),
    f("battery_volt", 1, Guarded(Tenths)),
    f("charger_volt", 2, Guarded(Tenths)),
    f("coolant_temp", 8, Temperature),
    f("oil_pressure", 10, Below(10000, Unit)),
    f("fuel_level", 12, AtMost(100, Unit)),
    f("load_pct", 20, Load),
    f("oil_temp", 22, Temperature),
    f("fuel_pressure", 24, Below(10000, Unit)),
    f("turbo_pressure", 28, Below(10000, Unit)),
    f("fuel_consumption", 29, AtMost(10000, Tenths)),
];

static GEN_ACCUMULATED: [FieldSpec; 5] = [
    f("gen_status", 0, Unsigned(Unit)),
    f("run_hours", 10, Unsigned(Unit)),
    f("run_minutes", 11, Unsigned(Unit)),
    f("start_count", 13, Unsigned(Unit)),
    f("energy_kwh", 14, Unsigned32(Unit)),
];

static GEN_ALARMS: [FieldSpec; 1] = [f("alarm_count", 0, Unsigned(Unit))];

static GENERATOR_BLOCKS: [RegisterBlock; 9] = [
    RegisterBlock { name: "status", start: 0, count: 1, fields: &GEN_STATUS },
    RegisterBlock { name: "breaker", start: 114, count: 1, fields: &GEN_BREAKER },
    RegisterBlock { name: "mains_voltage", start: 120, count: 16, fields: &GEN_MAINS_VOLTAGE },
    RegisterBlock { name: "gen_voltage", start: 140, count: 19, fields: &GEN_VOLTAGE },
    RegisterBlock { name: "gen_current", start: 166, count: 8, fields: &GEN_CURRENT },
    RegisterBlock { name: "power", start: 174, count: 28, fields: &GEN_POWER },
    RegisterBlock { name: "engine", start: 212, count: 30, fields: &GEN_ENGINE },
    RegisterBlock { name: "accumulated", start: 260, count: 16, fields: &GEN_ACCUMULATED },
    RegisterBlock { name: "alarms", start: 511, count: 1, fields: &GEN_ALARMS },
];

fn gen_status_label(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "standby",
        1 => "preheat",
        2 => "fuel_on",
        3 => "cranking",
        4 => "crank_rest",
        5 => "safety_run",
        6 => "idle",
        7 => "warming",
        8 => "wait_load",
        9 => "running",
        10 => "cooling",
        11 => "idle_stop",
        12 => "ets",
        13 => "wait_stop",
        14 => "post_stop",
        15 => "stop_failure",
        _ => return None,
    })
}

fn derive_generator(fields: &mut FieldMap) {
    insert_label(fields, "gen_status", "gen_status_text", |code| {
        gen_status_label(code).map_or_else(|| format!("unknown_{code}"), str::to_string)
    });
}

// ============================================================================
// Transfer switch controller (HGM9560)
// ============================================================================

static ATS_STATUS: [FieldSpec; 8] = [
    f("mode_test", 0, Bit(8)),
    f("mode_auto", 0, Bit(9)),
    f("mode_manual", 0, Bit(10)),
    f("mode_stop", 0, Bit(11)),
    f("alarm_common", 0, Bit(0)),
    f("alarm_shutdown", 0, Bit(1)),
    f("alarm_warning", 0, Bit(2)),
    f("alarm_trip_stop", 0, Bit(3)),
];

static ATS_GENSET_STATUS: [FieldSpec; 1] = [f("genset_status", 0, Unsigned(Unit))];

static ATS_MAINS_VOLTAGE: [FieldSpec; 7] = [
    f("mains_uab", 0, Unsigned(Unit)),
    f("mains_ubc", 1, Unsigned(Unit)),
    f("mains_uca", 2, Unsigned(Unit)),
    f("mains_ua", 3, Unsigned(Unit)),
    f("mains_ub", 4, Unsigned(Unit)),
    f("mains_uc", 5, Unsigned(Unit)),
    f("mains_freq", 9, Unsigned(Hundredths)),
];

static ATS_BUSBAR_VOLTAGE: [FieldSpec; 7] = [
    f("busbar_uab", 0, Unsigned(Unit)),
    f("busbar_ubc", 1, Unsigned(Unit)),
    f("busbar_uca", 2, Unsigned(Unit)),
    f("busbar_ua", 3, Unsigned(Unit)),
    f("busbar_ub", 4, Unsigned(Unit)),
    f("busbar_uc", 5, Unsigned(Unit)),
    f("busbar_freq", 9, Unsigned(Hundredths)),
];

static ATS_MAINS_CURRENT: [FieldSpec; 3] = [
    f("mains_ia", 0, Unsigned(Tenths)),
    f("mains_ib", 1, Unsigned(Tenths)),
    f("mains_ic", 2, Unsigned(Tenths)),
];

static ATS_MAINS_POWER: [FieldSpec; 2] = [
    f("mains_total_p", 0, Signed32(Tenths)),
    f("mains_total_q", 8, Signed32(Tenths)),
];

static ATS_BUSBAR_MISC: [FieldSpec; 2] = [
    f("busbar_current", 0, Unsigned(Tenths)),
    f("battery_v", 8, Unsigned(Tenths)),
];

static ATS_BUSBAR_POWER: [FieldSpec; 5] = [
    f("busbar_p", 0, Signed32(Tenths)),
    f("busbar_q", 2, Signed32(Tenths)),
    f("busbar_switch", 11, Unsigned(Unit)),
    f("mains_status", 13, Unsigned(Unit)),
    f("mains_switch", 15, Unsigned(Unit)),
];

static ATS_ACCUMULATED: [FieldSpec; 3] = [
    f("accum_kwh", 0, Signed32(Tenths)),
    f("accum_kvarh", 2, Signed32(Tenths)),
    f("maint_hours", 8, Unsigned(Unit)),
];

static TRANSFER_SWITCH_BLOCKS: [RegisterBlock; 9] = [
    RegisterBlock { name: "status", start: 0, count: 3, fields: &ATS_STATUS },
    RegisterBlock { name: "genset_status", start: 40, count: 3, fields: &ATS_GENSET_STATUS },
    RegisterBlock { name: "mains_voltage", start: 55, count: 10, fields: &ATS_MAINS_VOLTAGE },
    RegisterBlock { name: "busbar_voltage", start: 75, count: 10, fields: &ATS_BUSBAR_VOLTAGE },
    RegisterBlock { name: "mains_current", start: 95, count: 3, fields: &ATS_MAINS_CURRENT },
    RegisterBlock { name: "mains_power", start: 109, count: 10, fields: &ATS_MAINS_POWER },
    RegisterBlock { name: "busbar_misc", start: 134, count: 12, fields: &ATS_BUSBAR_MISC },
    RegisterBlock { name: "busbar_power", start: 182, count: 17, fields: &ATS_BUSBAR_POWER },
    RegisterBlock { name: "accumulated", start: 203, count: 9, fields: &ATS_ACCUMULATED },
];

fn genset_status_label(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "standby",
        1 => "preheat",
        2 => "fuel_output",
        3 => "crank",
        4 => "crank_rest",
        5 => "safety_run",
        6 => "start_idle",
        7 => "warming_up",
        8 => "wait_load",
        9 => "running",
        10 => "cooling",
        11 => "stop_idle",
        12 => "ets",
        13 => "wait_stop",
        14 => "stop_failure",
        _ => return None,
    })
}

fn switch_label(code: i64) -> &'static str {
    match code {
        0 => "synchronizing",
        1 => "close_delay",
        2 => "wait_closing",
        3 => "closed",
        4 => "unloading",
        5 => "open_delay",
        6 => "wait_opening",
        7 => "opened",
        _ => "unknown",
    }
}

fn mains_label(code: i64) -> &'static str {
    match code {
        0 => "normal",
        1 => "normal_delay",
        2 => "abnormal",
        3 => "abnormal_delay",
        _ => "unknown",
    }
}

fn derive_transfer_switch(fields: &mut FieldMap) {
    insert_label(fields, "genset_status", "genset_status_text", |code| {
        genset_status_label(code).map_or_else(|| format!("unknown_{code}"), str::to_string)
    });
    insert_label(fields, "busbar_switch", "busbar_switch_text", |code| {
        switch_label(code).to_string()
    });
    insert_label(fields, "mains_status", "mains_status_text", |code| {
        mains_label(code).to_string()
    });
    insert_label(fields, "mains_switch", "mains_switch_text", |code| {
        switch_label(code).to_string()
    });
}

/// Add `label_field` when `code_field` was decoded
fn insert_label(
    fields: &mut FieldMap,
    code_field: &str,
    label_field: &str,
    label: impl Fn(i64) -> String,
) {
    let code = match fields.get(code_field) {
        Some(Some(value)) => value.as_i64(),
        _ => None,
    };
    if let Some(code) = code {
        fields.insert(label_field.to_string(), Some(FieldValue::Text(label(code))));
    }
}

// ============================================================================
// Map selection
// ============================================================================

/// Blocks plus derived-field rules for one controller family
#[derive(Debug)]
pub struct RegisterMap {
    pub blocks: &'static [RegisterBlock],
    derive: fn(&mut FieldMap),
}

impl RegisterMap {
    pub fn for_class(class: DeviceClass) -> &'static RegisterMap {
        match class {
            DeviceClass::Generator => &GENERATOR_MAP,
            DeviceClass::TransferSwitch => &TRANSFER_SWITCH_MAP,
        }
    }

    /// Add text labels for status codes present in `fields`
    pub fn derive(&self, fields: &mut FieldMap) {
        (self.derive)(fields);
    }
}

static GENERATOR_MAP: RegisterMap = RegisterMap {
    blocks: &GENERATOR_BLOCKS,
    derive: derive_generator,
};

static TRANSFER_SWITCH_MAP: RegisterMap = RegisterMap {
    blocks: &TRANSFER_SWITCH_BLOCKS,
    derive: derive_transfer_switch,
};
