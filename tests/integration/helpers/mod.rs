//! Shared helpers for integration tests.

use noodles::sam::Header;
use noodles::sam::alignment::record_buf::RecordBuf;
use porecall_lib::config::BasecallerConfig;
use std::path::Path;

/// A synthetic signal with dense level transitions so the CPU decoder
/// emits plenty of bases.
pub fn square_wave_signal(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let phase = (i / 24) % 4;
            match phase {
                0 => -1.5,
                1 => -0.25,
                2 => 0.25,
                _ => 1.5,
            }
        })
        .collect()
}

/// A CPU basecalling config with small, test-friendly geometry.
pub fn test_config() -> BasecallerConfig {
    BasecallerConfig {
        device: "cpu".to_string(),
        batch_size: 16,
        chunk_size: 1200,
        overlap: 120,
        num_runners: 2,
        ..BasecallerConfig::default()
    }
}

/// Read every record (and the header) from a BAM file.
pub fn read_bam_records(path: &Path) -> (Header, Vec<RecordBuf>) {
    let file = std::fs::File::open(path).expect("output BAM exists");
    let mut reader = noodles::bam::io::Reader::new(file);
    let header = reader.read_header().expect("readable header");

    let mut records = Vec::new();
    let mut record = RecordBuf::default();
    while reader.read_record_buf(&header, &mut record).expect("readable record") != 0 {
        records.push(record.clone());
    }
    (header, records)
}

/// The name of a record as a `String`.
pub fn record_name(record: &RecordBuf) -> String {
    record.name().map(|name| String::from_utf8_lossy(name).into_owned()).unwrap_or_default()
}
