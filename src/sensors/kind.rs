use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Physical sensor classes that can be logged alongside a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Magnetic,
    Thermometer,
    Gravity,
    Barometer,
    Humidity,
}

impl SensorKind {
    pub const COUNT: usize = 7;

    /// Every kind, in declaration order
    pub const ALL: [SensorKind; Self::COUNT] = [
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::Magnetic,
        SensorKind::Thermometer,
        SensorKind::Gravity,
        SensorKind::Barometer,
        SensorKind::Humidity,
    ];

    /// Stable short name used in file names and preference keys
    pub fn short_name(self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accel",
            SensorKind::Gyroscope => "gyro",
            SensorKind::Magnetic => "magnetic",
            SensorKind::Thermometer => "thermo",
            SensorKind::Gravity => "gravity",
            SensorKind::Barometer => "baro",
            SensorKind::Humidity => "hygro",
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.short_name() == name)
    }

    /// Number of values a sample of this kind carries
    pub fn axis_count(self) -> usize {
        match self {
            SensorKind::Accelerometer
            | SensorKind::Gyroscope
            | SensorKind::Magnetic
            | SensorKind::Gravity => 3,
            SensorKind::Thermometer | SensorKind::Barometer | SensorKind::Humidity => 1,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    fn display_name(self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "Accelerometer",
            SensorKind::Gyroscope => "Gyroscope",
            SensorKind::Magnetic => "Magnetometer",
            SensorKind::Thermometer => "Temperature",
            SensorKind::Gravity => "Gravity",
            SensorKind::Barometer => "Barometer",
            SensorKind::Humidity => "Humidity",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Fixed-size table holding one entry per [`SensorKind`]
#[derive(Debug, Clone)]
pub struct SensorTable<T> {
    entries: [T; SensorKind::COUNT],
}

impl<T> SensorTable<T> {
    pub fn from_fn(mut f: impl FnMut(SensorKind) -> T) -> Self {
        Self {
            entries: std::array::from_fn(|i| f(SensorKind::ALL[i])),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorKind, &T)> {
        SensorKind::ALL.into_iter().zip(self.entries.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SensorKind, &mut T)> {
        SensorKind::ALL.into_iter().zip(self.entries.iter_mut())
    }
}

impl<T: Default> Default for SensorTable<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<SensorKind> for SensorTable<T> {
    type Output = T;

    fn index(&self, kind: SensorKind) -> &T {
        &self.entries[kind.index()]
    }
}

impl<T> IndexMut<SensorKind> for SensorTable<T> {
    fn index_mut(&mut self, kind: SensorKind) -> &mut T {
        &mut self.entries[kind.index()]
    }
}

/// One hardware sample as delivered by the sensor layer
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub kind: SensorKind,
    pub values: Vec<f32>,
    /// Hardware event time in nanoseconds, sensor clock domain
    pub timestamp_ns: i64,
}

impl SensorSample {
    pub fn new(kind: SensorKind, values: Vec<f32>, timestamp_ns: i64) -> Self {
        Self {
            kind,
            values,
            timestamp_ns,
        }
    }

    /// Format as `v1,...,vn,timestamp\n`
    pub fn to_csv_row(&self) -> String {
        let mut row = String::with_capacity(16 * (self.values.len() + 1));
        for value in &self.values {
            // Debug keeps a decimal point on integral readings ("1.0", not "1")
            row.push_str(&format!("{:?},", value));
        }
        row.push_str(&self.timestamp_ns.to_string());
        row.push('\n');
        row
    }
}
