//! Push-mode wire format.
//!
//! A meter in network mode POSTs its readings form-encoded with short keys,
//! most values in tenths of their unit. The collector turns that body into a
//! [`Reading`] with descriptive keys.

use serde::{Deserialize, Serialize};

use crate::session::data::Sample;

/// Form body of a push, keyed the way the meter sends it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PushRecord {
    pub id: String,
    pub w: f64,
    pub v: f64,
    pub a: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wmx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wmi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pf: Option<f64>, // percent, unscaled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcy: Option<f64>, // unscaled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub va: Option<f64>,
}

fn tenths(value: f64) -> f64 {
    (value * 10.0).round()
}

// Currents keep the serial line's mA resolution.
fn tenths_of_amps(amps: f64) -> f64 {
    (amps * 10_000.0).round() / 1000.0
}

impl PushRecord {
    /// Encode a serial sample the way the meter would push it.
    pub fn from_sample(sample: &Sample, id: &str) -> Self {
        PushRecord {
            id: id.to_string(),
            w: tenths(sample.watts),
            v: tenths(sample.volts),
            a: tenths_of_amps(sample.amps),
            wh: Some(tenths(sample.watt_hours)),
            wmx: Some(tenths(sample.max_watts)),
            vmx: Some(tenths(sample.max_volts)),
            amx: Some(tenths_of_amps(sample.max_amps)),
            wmi: Some(tenths(sample.min_watts)),
            vmi: Some(tenths(sample.min_volts)),
            ami: Some(tenths_of_amps(sample.min_amps)),
            pf: Some(sample.power_factor),
            pcy: Some(sample.power_cycle),
            frq: Some(tenths(sample.frequency)),
            va: Some(tenths(sample.volt_amps)),
        }
    }
}

/// One pushed reading as printed by the collector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reading {
    pub time: i64, // ms since the Unix epoch, assigned on receipt
    pub id: String,
    pub watts: f64,
    pub volts: f64,
    pub amps: f64,
    #[serde(rename = "watt-hours", skip_serializing_if = "Option::is_none")]
    pub watt_hours: Option<f64>,
    #[serde(rename = "max watts", skip_serializing_if = "Option::is_none")]
    pub max_watts: Option<f64>,
    #[serde(rename = "max volts", skip_serializing_if = "Option::is_none")]
    pub max_volts: Option<f64>,
    #[serde(rename = "max amps", skip_serializing_if = "Option::is_none")]
    pub max_amps: Option<f64>,
    #[serde(rename = "min watts", skip_serializing_if = "Option::is_none")]
    pub min_watts: Option<f64>,
    #[serde(rename = "min volts", skip_serializing_if = "Option::is_none")]
    pub min_volts: Option<f64>,
    #[serde(rename = "min amps", skip_serializing_if = "Option::is_none")]
    pub min_amps: Option<f64>,
    #[serde(rename = "power factor", skip_serializing_if = "Option::is_none")]
    pub power_factor: Option<f64>,
    #[serde(rename = "power cycle", skip_serializing_if = "Option::is_none")]
    pub power_cycle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(rename = "volt-amps", skip_serializing_if = "Option::is_none")]
    pub volt_amps: Option<f64>,
}

impl Reading {
    pub fn from_push(record: PushRecord, time: i64) -> Self {
        let scaled = |v: Option<f64>| v.map(|v| v / 10.0);
        Reading {
            time,
            id: record.id,
            watts: record.w / 10.0,
            volts: record.v / 10.0,
            amps: record.a / 10.0,
            watt_hours: scaled(record.wh),
            max_watts: scaled(record.wmx),
            max_volts: scaled(record.vmx),
            max_amps: scaled(record.amx),
            min_watts: scaled(record.wmi),
            min_volts: scaled(record.vmi),
            min_amps: scaled(record.ami),
            power_factor: record.pf,
            power_cycle: record.pcy,
            frequency: scaled(record.frq),
            volt_amps: scaled(record.va),
        }
    }
}
