//! Sorted-BAM sink: spill, merge, and index.

use bstr::BString;
use noodles::core::Position;
use noodles::sam::Header;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::ReferenceSequence;
use porecall_lib::hts::{SortedBamSink, calculate_sorting_key};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::num::NonZeroUsize;

use crate::helpers::{read_bam_records, record_name};

fn header_with_refs(num_refs: usize) -> Header {
    let mut builder = Header::builder();
    for i in 0..num_refs {
        let map =
            Map::<ReferenceSequence>::new(NonZeroUsize::new(10_000_000).expect("non-zero"));
        builder = builder.add_reference_sequence(BString::from(format!("chr{}", i + 1)), map);
    }
    builder.build()
}

fn mapped_record(name: &str, tid: usize, pos: usize) -> RecordBuf {
    let mut record = RecordBuf::default();
    *record.name_mut() = Some(BString::from(name));
    *record.flags_mut() = Flags::empty();
    *record.reference_sequence_id_mut() = Some(tid);
    *record.alignment_start_mut() = Some(Position::try_from(pos).unwrap());
    record
}

#[test]
fn test_thousand_shuffled_records_sorted_and_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");

    // 1000 records spanning tid 0-2 in shuffled order, with a 200 KB
    // buffer small enough to spill temp files that finalise must merge.
    let mut records: Vec<RecordBuf> = (0..1000)
        .map(|i| mapped_record(&format!("rec-{i:04}"), i % 3, 1 + (i * 37) % 9_000_000))
        .collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(17);
    records.shuffle(&mut rng);

    let mut sink = SortedBamSink::new(&output, header_with_refs(3), 200_000).unwrap();
    for record in records {
        sink.write(record).unwrap();
    }
    assert!(sink.num_temp_files() >= 1, "200 KB buffer should have spilled");

    sink.finalise(&|_| {}).unwrap();

    // A single output file, ordered by (tid, pos), with an index beside it.
    assert!(output.exists());
    assert!(dir.path().join("out.bam.bai").exists(), "index built for a mapped header");
    assert!(
        !dir.path().join("out.bam.0.tmp").exists(),
        "temp files cleaned up after a successful merge"
    );

    let (header, sorted) = read_bam_records(&output);
    assert_eq!(sorted.len(), 1000, "every input record appears exactly once");

    let names: HashSet<String> = sorted.iter().map(|r| record_name(r)).collect();
    assert_eq!(names.len(), 1000);

    let mut last_key = 0u64;
    for record in &sorted {
        let key = calculate_sorting_key(record);
        assert!(key >= last_key, "records must be coordinate sorted");
        last_key = key;
    }

    // The merged header keeps the reference sequences.
    assert_eq!(header.reference_sequences().len(), 3);
}

#[test]
fn test_unmapped_records_sort_last() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");

    let mut sink = SortedBamSink::new(&output, header_with_refs(1), 200_000).unwrap();
    let mut unmapped = RecordBuf::default();
    *unmapped.name_mut() = Some(BString::from("unmapped"));
    *unmapped.flags_mut() = Flags::UNMAPPED;
    sink.write(unmapped).unwrap();
    sink.write(mapped_record("mapped", 0, 100)).unwrap();
    sink.finalise(&|_| {}).unwrap();

    let (_, records) = read_bam_records(&output);
    assert_eq!(records.len(), 2);
    assert_eq!(record_name(&records[0]), "mapped");
    assert_eq!(record_name(&records[1]), "unmapped");
}

#[test]
fn test_merge_progress_phases() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");

    let mut sink = SortedBamSink::new(&output, header_with_refs(1), 100_000).unwrap();
    for i in 0..2000 {
        sink.write(mapped_record(&format!("r{i}"), 0, 1 + i)).unwrap();
    }
    assert!(sink.num_temp_files() > 1);

    let progress = parking_lot::Mutex::new(Vec::new());
    sink.finalise(&|p| progress.lock().push(p)).unwrap();

    let progress = progress.lock();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.contains(&5), "merge phase starts at 5");
    assert!(progress.contains(&50), "indexing phase starts at 50");
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress is monotonic");
}
