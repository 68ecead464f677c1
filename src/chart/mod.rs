//! Chart Builder
//!
//! Buckets historical snapshots into fixed-width windows and fills short gaps
//! by linear interpolation. The series is computed once and iterated lazily;
//! every call to [`ChartSeries::iter`] replays the same points.

use crate::aggregate::PRICE_DP;
use crate::error::OddsError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[default]
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Granularity {
    pub fn seconds(&self) -> i64 {
        match self {
            Granularity::FiveMinutes => 300,
            Granularity::FifteenMinutes => 900,
            Granularity::OneHour => 3600,
            Granularity::SixHours => 21600,
            Granularity::OneDay => 86400,
        }
    }

    /// Start of the window containing `ts`
    pub fn truncate(&self, ts: DateTime<Utc>) -> i64 {
        let step = self.seconds();
        ts.timestamp().div_euclid(step) * step
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Granularity::FiveMinutes => "5m",
            Granularity::FifteenMinutes => "15m",
            Granularity::OneHour => "1h",
            Granularity::SixHours => "6h",
            Granularity::OneDay => "1d",
        };
        f.write_str(s)
    }
}

impl FromStr for Granularity {
    type Err = OddsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "5m" => Ok(Granularity::FiveMinutes),
            "15m" => Ok(Granularity::FifteenMinutes),
            "1h" => Ok(Granularity::OneHour),
            "6h" => Ok(Granularity::SixHours),
            "1d" => Ok(Granularity::OneDay),
            other => Err(OddsError::InvalidArgument(format!(
                "granularity must be one of 5m, 15m, 1h, 6h, 1d, got {}",
                other
            ))),
        }
    }
}

/// One point of the series: candidate display name -> price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone)]
pub struct ChartBuilder {
    granularity: Granularity,
    max_interpolated_points: usize,
}

impl ChartBuilder {
    pub fn new(granularity: Granularity, max_interpolated_points: usize) -> Self {
        Self {
            granularity,
            max_interpolated_points,
        }
    }

    /// Bucket `(candidate, time, price)` observations and average per bucket
    pub fn build<I, S>(&self, observations: I) -> ChartSeries
    where
        I: IntoIterator<Item = (S, DateTime<Utc>, Decimal)>,
        S: Into<String>,
    {
        let mut sums: BTreeMap<i64, BTreeMap<String, (Decimal, u32)>> = BTreeMap::new();

        for (candidate, ts, price) in observations {
            let bucket = self.granularity.truncate(ts);
            let entry = sums
                .entry(bucket)
                .or_default()
                .entry(candidate.into())
                .or_insert((Decimal::ZERO, 0));
            entry.0 += price;
            entry.1 += 1;
        }

        let buckets = sums
            .into_iter()
            .map(|(bucket, candidates)| {
                let values = candidates
                    .into_iter()
                    .map(|(name, (sum, n))| {
                        let avg = (sum / Decimal::from(n)).round_dp(PRICE_DP).normalize();
                        (name, avg)
                    })
                    .collect();
                (bucket, values)
            })
            .collect();

        ChartSeries {
            step: self.granularity.seconds(),
            max_interpolated_points: self.max_interpolated_points,
            buckets,
        }
    }
}

/// Bucketed series with interpolation applied on iteration
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    step: i64,
    max_interpolated_points: usize,
    /// Non-empty buckets, ascending
    buckets: Vec<(i64, BTreeMap<String, Decimal>)>,
}

impl ChartSeries {
    pub fn iter(&self) -> ChartIter<'_> {
        ChartIter {
            series: self,
            next_bucket: 0,
            gap_step: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ChartPoint> {
        self.iter().collect()
    }

    /// Synthetic points needed between bucket `i` and `i + 1`; zero past the cap
    fn gap_len(&self, i: usize) -> usize {
        let (Some((a, _)), Some((b, _))) = (self.buckets.get(i), self.buckets.get(i + 1)) else {
            return 0;
        };
        let missing = ((b - a) / self.step - 1).max(0) as usize;
        if missing > self.max_interpolated_points {
            0
        } else {
            missing
        }
    }

    fn interpolate(&self, left: usize, k: usize, gap: usize) -> ChartPoint {
        let (t0, before) = &self.buckets[left];
        let (_, after) = &self.buckets[left + 1];
        let fraction = Decimal::from(k as u64) / Decimal::from(gap as u64 + 1);

        let mut values = BTreeMap::new();
        for name in before.keys().chain(after.keys()) {
            if values.contains_key(name) {
                continue;
            }
            let value = match (before.get(name), after.get(name)) {
                (Some(a), Some(b)) => (*a + (*b - *a) * fraction).round_dp(PRICE_DP).normalize(),
                (Some(a), None) => *a,
                (None, Some(b)) => *b,
                (None, None) => continue,
            };
            values.insert(name.clone(), value);
        }

        ChartPoint {
            timestamp: to_datetime(t0 + self.step * k as i64),
            values,
        }
    }
}

impl<'a> IntoIterator for &'a ChartSeries {
    type Item = ChartPoint;
    type IntoIter = ChartIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy walk over a [`ChartSeries`]
pub struct ChartIter<'a> {
    series: &'a ChartSeries,
    next_bucket: usize,
    gap_step: usize,
}

impl Iterator for ChartIter<'_> {
    type Item = ChartPoint;

    fn next(&mut self) -> Option<Self::Item> {
        let series = self.series;
        if self.next_bucket >= series.buckets.len() {
            return None;
        }

        if self.next_bucket > 0 {
            let left = self.next_bucket - 1;
            let gap = series.gap_len(left);
            if self.gap_step < gap {
                self.gap_step += 1;
                return Some(series.interpolate(left, self.gap_step, gap));
            }
        }

        let (ts, values) = &series.buckets[self.next_bucket];
        self.next_bucket += 1;
        self.gap_step = 0;
        Some(ChartPoint {
            timestamp: to_datetime(*ts),
            values: values.clone(),
        })
    }
}

fn to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}
