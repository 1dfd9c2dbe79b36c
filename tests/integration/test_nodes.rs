//! Node-level contracts: polyA calculator injection and modbase
//! pass-through.

use crate::helpers::{read_bam_records, record_name};
use noodles::sam::Header;
use noodles::sam::alignment::record::data::field::Tag;
use porecall_lib::basecall::create_modbase_runners;
use porecall_lib::messages::ClientInfo;
use porecall_lib::pipeline::{
    HtsWriterNode, MessageSink, ModBaseCallerNode, NodeHandle, OutputMode, PolyACalculatorNode,
};
use porecall_lib::poly_tail::{PolyTailCalculator, SignalAnchorInfo};
use porecall_lib::read::SimplexRead;
use std::path::Path;
use std::sync::Arc;

/// Calculator that reports a fixed tail length.
struct FixedTailCalculator {
    num_bases: i64,
    find_anchor: bool,
}

impl PolyTailCalculator for FixedTailCalculator {
    fn determine_signal_anchor_and_strand(&self, _read: &SimplexRead) -> SignalAnchorInfo {
        if self.find_anchor {
            SignalAnchorInfo {
                is_fwd_strand: false,
                signal_anchor: Some(1000),
                trailing_adapter_bases: 0,
            }
        } else {
            SignalAnchorInfo::not_found()
        }
    }

    fn calculate_num_bases(&self, _read: &SimplexRead, _anchor: &SignalAnchorInfo) -> i64 {
        self.num_bases
    }
}

fn writer_sink(path: &Path) -> Arc<NodeHandle> {
    let writer = HtsWriterNode::new(path, OutputMode::Bam, Header::default(), 0, 100)
        .expect("writable output");
    Arc::new(writer.into())
}

fn client_with_calculator(calculator: FixedTailCalculator) -> Arc<ClientInfo> {
    let mut client_info = ClientInfo::new(1);
    let calculator: Arc<dyn PolyTailCalculator> = Arc::new(calculator);
    client_info.contexts_mut().register(calculator);
    Arc::new(client_info)
}

fn basecalled_read(name: &str, client_info: &Arc<ClientInfo>) -> SimplexRead {
    let mut read = SimplexRead::new(name, vec![0.5; 2400]);
    read.seq = b"ACGTACGT".to_vec();
    read.qstring = b"55555555".to_vec();
    read.moves = vec![1; 8];
    read.model_stride = 6;
    read.with_client_info(Arc::clone(client_info))
}

fn finalise(sink: &Arc<NodeHandle>) {
    sink.as_hts_writer().expect("terminal writer").finalise(&|_| {}).unwrap();
}

#[test]
fn test_polya_records_tail_length() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");
    let sink = writer_sink(&output);
    let node = PolyACalculatorNode::new(Arc::clone(&sink), 2, 100);

    let client_info =
        client_with_calculator(FixedTailCalculator { num_bases: 42, find_anchor: true });
    node.push_message(basecalled_read("tailed", &client_info).into()).unwrap();
    node.terminate();
    finalise(&sink);

    let stats = node.sample_stats();
    assert!((stats["reads_estimated"] - 1.0).abs() < f64::EPSILON);
    assert!((stats["average_tail_length"] - 42.0).abs() < f64::EPSILON);

    let (_, records) = read_bam_records(&output);
    assert_eq!(records.len(), 1);
    let tail = records[0]
        .data()
        .get(&Tag::from([b'p', b't']))
        .and_then(|value| value.as_int())
        .expect("pt tag present");
    assert_eq!(tail, 42);
}

#[test]
fn test_polya_without_calculator_counts_not_called() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");
    let sink = writer_sink(&output);
    let node = PolyACalculatorNode::new(Arc::clone(&sink), 2, 100);

    // No calculator registered in the client context.
    let client_info = Arc::new(ClientInfo::new(1));
    node.push_message(basecalled_read("plain", &client_info).into()).unwrap();
    node.terminate();
    finalise(&sink);

    let stats = node.sample_stats();
    assert!((stats["reads_not_estimated"] - 1.0).abs() < f64::EPSILON);

    let (_, records) = read_bam_records(&output);
    assert_eq!(records.len(), 1, "the read is forwarded unchanged");
    assert!(records[0].data().get(&Tag::from([b'p', b't'])).is_none());
}

#[test]
fn test_polya_rejects_out_of_range_estimates() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");
    let sink = writer_sink(&output);
    let node = PolyACalculatorNode::new(Arc::clone(&sink), 1, 100);

    // 800 exceeds the default max tail length of 750.
    let client_info =
        client_with_calculator(FixedTailCalculator { num_bases: 800, find_anchor: true });
    node.push_message(basecalled_read("too-long", &client_info).into()).unwrap();
    // 0 is not a valid tail either.
    let client_info_zero =
        client_with_calculator(FixedTailCalculator { num_bases: 0, find_anchor: true });
    node.push_message(basecalled_read("zero", &client_info_zero).into()).unwrap();
    node.terminate();
    finalise(&sink);

    let stats = node.sample_stats();
    assert!((stats["reads_not_estimated"] - 2.0).abs() < f64::EPSILON);
    assert!((stats["reads_estimated"] - 0.0).abs() < f64::EPSILON);
}

#[test]
fn test_modbase_forwards_read_without_moves() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");
    let sink = writer_sink(&output);

    let runners = create_modbase_runners(&["5mc.model"], "cpu", 2, 1000).unwrap();
    let node = ModBaseCallerNode::new(Arc::clone(&sink), runners, 1, 100);

    // A read that was never basecalled lacks the prerequisites.
    let read = SimplexRead::new("no-moves", vec![0.5; 600]);
    node.push_message(read.into()).unwrap();
    node.terminate();
    finalise(&sink);

    let stats = node.sample_stats();
    assert!((stats["reads_not_called"] - 1.0).abs() < f64::EPSILON);

    let (_, records) = read_bam_records(&output);
    assert_eq!(records.len(), 1, "the read emerges unmodified");
    assert_eq!(record_name(&records[0]), "no-moves");
    assert!(records[0].data().get(&Tag::from([b'M', b'L'])).is_none());
}

#[test]
fn test_modbase_quantises_probabilities() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bam");
    let sink = writer_sink(&output);

    let runners = create_modbase_runners(&["5mc.model"], "cpu", 2, 1000).unwrap();
    let node = ModBaseCallerNode::new(Arc::clone(&sink), runners, 1, 100);

    let client_info = Arc::new(ClientInfo::new(1));
    let mut read = basecalled_read("called", &client_info);
    read.seq = b"ACGA".to_vec();
    read.qstring = b"5555".to_vec();
    read.moves = vec![1, 1, 1, 1];
    node.push_message(read.into()).unwrap();
    node.terminate();
    finalise(&sink);

    let stats = node.sample_stats();
    assert!((stats["reads_called"] - 1.0).abs() < f64::EPSILON);

    let (_, records) = read_bam_records(&output);
    assert_eq!(records.len(), 1);
    let ml = records[0].data().get(&Tag::from([b'M', b'L'])).expect("ML tag present");
    // The C sits in a CG context: floor(0.9 * 256) = 230.
    use noodles::sam::alignment::record_buf::data::field::Value;
    use noodles::sam::alignment::record_buf::data::field::value::Array;
    match ml {
        Value::Array(Array::UInt8(values)) => {
            assert_eq!(values.as_slice(), &[0, 230, 0, 0]);
        }
        other => panic!("unexpected ML value: {other:?}"),
    }
}
