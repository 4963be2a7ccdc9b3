//! Recorded session loader.
//!
//! The recorder writes a JSON array of four parallel arrays:
//!
//! ```text
//! [["img_0000.png", ...], ["1000", ...], ["12", ...], ["11", ...]]
//!   filenames              timestamps    encoder 1    encoder 2
//! ```
//!
//! The recorder logs encoder 1 from the right wheel and encoder 2 from the
//! left; [`Wheel`] selects a different mapping. Numeric entries are accepted
//! either as JSON numbers or as quoted decimal strings.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde_json::Value;

use crate::config::Wheel;
use crate::error::DatasetError;
use crate::types::Sample;

#[derive(Clone, Debug, Default)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    /// Build from already-parsed samples, enforcing the same ordering rules as [`load`].
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self, DatasetError> {
        if samples.is_empty() {
            return Err(DatasetError::Empty);
        }
        for (index, pair) in samples.windows(2).enumerate() {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(DatasetError::Unordered {
                    index: index + 1,
                    previous: pair[0].timestamp,
                    current: pair[1].timestamp,
                });
            }
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Recorded span between first and last sample, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

}

/// Load a dataset from disk; `.gz` files are decompressed transparently.
///
/// `encoder1` names the wheel the first encoder column belongs to.
pub fn load(path: &Path, encoder1: Wheel) -> Result<Dataset, DatasetError> {
    let file = File::open(path)?;
    let dataset = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        from_reader(GzDecoder::new(file), encoder1)?
    } else {
        from_reader(file, encoder1)?
    };
    log::info!(
        "[DATASET] Loaded {} samples spanning {} ms from {}",
        dataset.len(),
        dataset.duration_ms(),
        path.display()
    );
    Ok(dataset)
}

pub fn from_reader<R: Read>(reader: R, encoder1: Wheel) -> Result<Dataset, DatasetError> {
    let columns: Vec<Vec<Value>> = serde_json::from_reader(BufReader::new(reader))?;
    from_columns(columns, encoder1)
}

pub fn from_str(text: &str, encoder1: Wheel) -> Result<Dataset, DatasetError> {
    let columns: Vec<Vec<Value>> = serde_json::from_str(text)?;
    from_columns(columns, encoder1)
}

fn from_columns(columns: Vec<Vec<Value>>, wheel1: Wheel) -> Result<Dataset, DatasetError> {
    let [filenames, time, encoder1, encoder2]: [Vec<Value>; 4] =
        columns.try_into().map_err(|cols: Vec<Vec<Value>>| {
            DatasetError::Parse(format!("expected 4 arrays, found {}", cols.len()))
        })?;

    if time.len() != encoder1.len() || time.len() != encoder2.len() {
        return Err(DatasetError::LengthMismatch {
            timestamps: time.len(),
            encoder1: encoder1.len(),
            encoder2: encoder2.len(),
        });
    }

    let frames: Vec<String> = filenames
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let attach_frames = if frames.len() == time.len() {
        true
    } else {
        if !frames.is_empty() {
            log::warn!(
                "[DATASET] {} filenames for {} samples, frame names ignored",
                frames.len(),
                time.len()
            );
        }
        false
    };

    let mut samples = Vec::with_capacity(time.len());
    for index in 0..time.len() {
        let first = integer_at(&encoder1, "encoder1", index)?;
        let second = integer_at(&encoder2, "encoder2", index)?;
        let (left, right) = match wheel1 {
            Wheel::Right => (second, first),
            Wheel::Left => (first, second),
        };
        let mut sample = Sample::new(index, integer_at(&time, "timestamps", index)?, left, right);
        if attach_frames {
            sample.frame = Some(frames[index].clone());
        }
        samples.push(sample);
    }

    Dataset::from_samples(samples)
}

fn integer_at(column: &[Value], field: &'static str, index: usize) -> Result<i64, DatasetError> {
    let value = &column[index];
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DatasetError::InvalidNumber {
        field,
        index,
        value: value.to_string(),
    })
}
