use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::types::{DetectError, DetectResult, DetectionCandidate, DetectionRecord};

/// Column layout of the detection sink
pub const CSV_HEADER: &str = "lat,lon,row,col,peak_intensity,contrast_ratio,threshold";

/// Write detection records as delimited rows.
///
/// Records are written in ascending (row, col) order regardless of input
/// order, so repeated exports of the same set are byte-identical. Floats use
/// Rust's shortest round-trip formatting; coordinates lose no precision. A
/// sink failure leaves the in-memory records untouched, so the caller can
/// retry against a different sink.
pub fn export_csv(records: &[DetectionRecord], path: &Path) -> DetectResult<()> {
    let mut ordered: Vec<&DetectionRecord> = records.iter().collect();
    ordered.sort_by(|a, b| a.row.total_cmp(&b.row).then(a.col.total_cmp(&b.col)));

    let file = File::create(path)
        .map_err(|e| DetectError::Export(format!("cannot create {}: {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{}", CSV_HEADER).map_err(write_error)?;
    for record in ordered {
        writeln!(
            writer,
            "{},{},{},{},{},{},{}",
            record.lat,
            record.lon,
            record.row,
            record.col,
            record.peak_intensity,
            record.contrast_ratio,
            record.threshold
        )
        .map_err(write_error)?;
    }
    writer.flush().map_err(write_error)?;

    log::info!("exported {} detection records to {}", records.len(), path.display());
    Ok(())
}

/// Convert accepted candidates to records and export them.
pub fn export_candidates(candidates: &[DetectionCandidate], path: &Path) -> DetectResult<()> {
    let records: Vec<DetectionRecord> = candidates.iter().map(DetectionRecord::from_candidate).collect();
    export_csv(&records, path)
}

/// Read a detection record set back from a sink written by [`export_csv`].
pub fn read_csv(path: &Path) -> DetectResult<Vec<DetectionRecord>> {
    let file = File::open(path)
        .map_err(|e| DetectError::Export(format!("cannot open {}: {}", path.display(), e)))?;
    let mut lines = BufReader::new(file).lines();

    match lines.next() {
        Some(Ok(header)) if header == CSV_HEADER => {}
        Some(Ok(header)) => {
            return Err(DetectError::Export(format!(
                "unexpected header in {}: {}",
                path.display(),
                header
            )))
        }
        Some(Err(e)) => return Err(write_error(e)),
        None => return Err(DetectError::Export(format!("{} is empty", path.display()))),
    }

    let mut records = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line.map_err(write_error)?;
        if line.is_empty() {
            continue;
        }
        records.push(parse_record(&line).map_err(|e| {
            DetectError::Export(format!(
                "bad record on line {} of {}: {}",
                index + 2,
                path.display(),
                e
            ))
        })?);
    }
    Ok(records)
}

fn parse_record(line: &str) -> Result<DetectionRecord, String> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 7 {
        return Err(format!("expected 7 fields, found {}", fields.len()));
    }
    let f64_field = |i: usize| -> Result<f64, String> {
        fields[i]
            .parse::<f64>()
            .map_err(|e| format!("field {}: {}", i, e))
    };
    let f32_field = |i: usize| -> Result<f32, String> {
        fields[i]
            .parse::<f32>()
            .map_err(|e| format!("field {}: {}", i, e))
    };
    Ok(DetectionRecord {
        lat: f64_field(0)?,
        lon: f64_field(1)?,
        row: f64_field(2)?,
        col: f64_field(3)?,
        peak_intensity: f32_field(4)?,
        contrast_ratio: f64_field(5)?,
        threshold: f32_field(6)?,
    })
}

fn write_error(e: std::io::Error) -> DetectError {
    DetectError::Export(format!("sink write failed: {}", e))
}
