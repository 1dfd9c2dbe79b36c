//! End-to-end pipeline runs: reads in, basecalled records out.

use crate::helpers::{read_bam_records, record_name, square_wave_signal, test_config};
use porecall_lib::PorecallError;
use porecall_lib::basecall::{BackendFactory, CpuBackendFactory, ModelConfig};
use porecall_lib::config::BasecallerConfig;
use porecall_lib::correction::CorrectionAlignments;
use porecall_lib::messages::Message;
use porecall_lib::pipeline::create_basecall_pipeline;
use porecall_lib::read::SimplexRead;
use std::collections::HashMap;
use std::sync::Arc;

fn cpu_factory() -> Arc<dyn BackendFactory> {
    Arc::new(CpuBackendFactory)
}

fn model() -> ModelConfig {
    ModelConfig::simple("test-model", 6)
}

#[test]
fn test_three_reads_reach_the_writer_basecalled() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("calls.bam");
    let pipeline =
        create_basecall_pipeline(&test_config(), &cpu_factory(), &model(), &output, false)
            .unwrap();

    for i in 0..3 {
        let read = SimplexRead::new(format!("read-{i}"), square_wave_signal(5000));
        pipeline.push_message(read.into()).unwrap();
    }
    pipeline.terminate();
    pipeline.finalise_output(&|_| {}).unwrap();

    let (_, records) = read_bam_records(&output);
    assert_eq!(records.len(), 3, "all three reads must appear at the writer");
    for record in &records {
        assert!(!record.sequence().is_empty(), "each read carries a sequence");
        assert!(record.flags().is_unmapped());
    }

    let stats = pipeline.sample_stats();
    assert!((stats["basecaller.reads_basecalled"] - 3.0).abs() < f64::EPSILON);
    assert!((stats["writer.records_written"] - 3.0).abs() < f64::EPSILON);
}

#[test]
fn test_output_deterministic_across_runner_counts() {
    let call = |num_runners: u32| -> HashMap<String, Vec<u8>> {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("calls.bam");
        let config = BasecallerConfig { num_runners, ..test_config() };
        let pipeline =
            create_basecall_pipeline(&config, &cpu_factory(), &model(), &output, false).unwrap();

        for i in 0..8 {
            let read = SimplexRead::new(format!("read-{i}"), square_wave_signal(4000 + i * 600));
            pipeline.push_message(read.into()).unwrap();
        }
        pipeline.terminate();
        pipeline.finalise_output(&|_| {}).unwrap();

        let (_, records) = read_bam_records(&output);
        records
            .iter()
            .map(|record| (record_name(record), record.sequence().as_ref().to_vec()))
            .collect()
    };

    let single = call(1);
    let pooled = call(4);
    assert_eq!(single.len(), 8);
    assert_eq!(
        single, pooled,
        "basecalls must be identical regardless of runner/thread count"
    );
}

#[test]
fn test_unconsumed_variants_pass_through_to_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("calls.bam");
    let pipeline =
        create_basecall_pipeline(&test_config(), &cpu_factory(), &model(), &output, false)
            .unwrap();

    // The scaler, basecaller, and writer all leave this variant alone; the
    // terminal node drops it with a visible counter.
    let alignments = CorrectionAlignments { read_name: "t".to_string(), ..Default::default() };
    pipeline.push_message(Message::CorrectionAlignments(Box::new(alignments))).unwrap();
    pipeline.terminate();
    pipeline.finalise_output(&|_| {}).unwrap();

    let stats = pipeline.sample_stats();
    assert!((stats["writer.messages_discarded"] - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_terminate_restart_then_push_again() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("calls.bam");
    let pipeline =
        create_basecall_pipeline(&test_config(), &cpu_factory(), &model(), &output, false)
            .unwrap();

    for i in 0..3 {
        let read = SimplexRead::new(format!("first-{i}"), square_wave_signal(3000));
        pipeline.push_message(read.into()).unwrap();
    }
    pipeline.terminate();

    // A terminated pipeline rejects input.
    let rejected = pipeline
        .push_message(SimplexRead::new("rejected", square_wave_signal(3000)).into());
    assert!(matches!(rejected, Err(PorecallError::QueueClosed)));

    // Re-arm and push another read; it must reach the writer.
    pipeline.restart();
    pipeline
        .push_message(SimplexRead::new("second-0", square_wave_signal(3000)).into())
        .unwrap();
    pipeline.terminate();
    pipeline.finalise_output(&|_| {}).unwrap();

    let (_, records) = read_bam_records(&output);
    assert_eq!(records.len(), 4, "reads from both runs appear in the output");
    assert!(records.iter().any(|record| record_name(record) == "second-0"));
}

#[test]
fn test_cuda_all_without_gpus_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("calls.bam");
    let config = BasecallerConfig { device: "cuda:all".to_string(), ..test_config() };
    let result = create_basecall_pipeline(&config, &cpu_factory(), &model(), &output, false);
    assert!(matches!(result, Err(PorecallError::DeviceEnumerationFailed { .. })));
    assert!(!output.exists(), "no partial pipeline output on construction failure");
}

#[test]
fn test_fastq_output_mode() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("calls.fastq");
    let config = BasecallerConfig { emit_fastq: true, ..test_config() };
    let pipeline =
        create_basecall_pipeline(&config, &cpu_factory(), &model(), &output, false).unwrap();

    pipeline
        .push_message(SimplexRead::new("read-0", square_wave_signal(3000)).into())
        .unwrap();
    pipeline.terminate();
    pipeline.finalise_output(&|_| {}).unwrap();

    let contents = std::fs::read_to_string(&output).unwrap();
    assert!(contents.starts_with("@read-0"));
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4, "one FASTQ record has four lines");
    assert_eq!(lines[1].len(), lines[3].len(), "sequence and quality lengths match");
}
