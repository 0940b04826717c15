use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Number of values in a `#d` record.
pub const DATA_FIELDS: usize = 18;

/// Column names as the meter reports them in its `#h` reply.
pub const COLUMNS: [&str; DATA_FIELDS] = [
    "W", "V", "A", "WH", "Cost", "WH/Mo", "Cost/Mo", "Wmax", "Vmax", "Amax", "Wmin", "Vmin",
    "Amin", "PF", "DC", "PC", "Hz", "VA",
];

// Divisor turning each raw column into its unit. Currents arrive in mA.
const SCALE: [f64; DATA_FIELDS] = [
    10.0, 10.0, 1000.0, 10.0, 1.0, 1.0, 1.0, 10.0, 10.0, 1000.0, 10.0, 10.0, 1000.0, 1.0, 1.0,
    1.0, 10.0, 10.0,
];

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("column {column}: {value:?} is not a number")]
    InvalidNumber { column: &'static str, value: String },
}

/// One `#d` record, scaled to watts, volts and amps.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>, // assigned on receipt
    #[serde(skip)]
    pub raw: Vec<String>, // values exactly as sent by the meter
    pub watts: f64,
    pub volts: f64,
    pub amps: f64,
    pub watt_hours: f64,
    pub cost: f64,
    pub watt_hours_month: f64,
    pub cost_month: f64,
    pub max_watts: f64,
    pub max_volts: f64,
    pub max_amps: f64,
    pub min_watts: f64,
    pub min_volts: f64,
    pub min_amps: f64,
    pub power_factor: f64,
    pub duty_cycle: f64,
    pub power_cycle: f64,
    pub frequency: f64,
    pub volt_amps: f64,
}

impl Sample {
    fn from_fields(fields: &[&str], timestamp: DateTime<Utc>) -> Result<Self, ParseError> {
        if fields.len() != DATA_FIELDS {
            return Err(ParseError::FieldCount {
                expected: DATA_FIELDS,
                found: fields.len(),
            });
        }

        let mut v = [0.0; DATA_FIELDS];
        for (i, field) in fields.iter().enumerate() {
            let invalid = || ParseError::InvalidNumber {
                column: COLUMNS[i],
                value: field.to_string(),
            };
            let value: f64 = field.trim().parse().map_err(|_| invalid())?;
            // NaN and infinities parse as f64 but are never measurements
            if !value.is_finite() {
                return Err(invalid());
            }
            v[i] = value / SCALE[i];
        }

        Ok(Sample {
            timestamp,
            raw: fields.iter().map(|f| f.trim().to_string()).collect(),
            watts: v[0],
            volts: v[1],
            amps: v[2],
            watt_hours: v[3],
            cost: v[4],
            watt_hours_month: v[5],
            cost_month: v[6],
            max_watts: v[7],
            max_volts: v[8],
            max_amps: v[9],
            min_watts: v[10],
            min_volts: v[11],
            min_amps: v[12],
            power_factor: v[13],
            duty_cycle: v[14],
            power_cycle: v[15],
            frequency: v[16],
            volt_amps: v[17],
        })
    }
}

/// A line received from the meter.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Data(Sample),
    Header(Vec<String>),
    Other(String),
}

impl Reply {
    pub fn parse(line: &str) -> Result<Reply, ParseError> {
        Self::parse_at(line, Utc::now())
    }

    /// Parse a line, stamping data records with `received`.
    ///
    /// Replies look like `#d,-,18,v1,...,v18;`: everything after the first `;`
    /// is ignored and the leading command, sub-command and count fields are
    /// dropped.
    pub fn parse_at(line: &str, received: DateTime<Utc>) -> Result<Reply, ParseError> {
        let line = line.trim();
        let body = line.split(';').next().unwrap_or_default();
        let fields: Vec<&str> = body.split(',').collect();
        let values = fields.get(3..).unwrap_or_default();

        match fields[0] {
            "#d" => Sample::from_fields(values, received).map(Reply::Data),
            "#h" => Ok(Reply::Header(
                values.iter().map(|s| s.trim().to_string()).collect(),
            )),
            _ => Ok(Reply::Other(line.to_string())),
        }
    }
}
