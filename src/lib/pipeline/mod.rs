//! The streaming read pipeline: a bounded DAG of message-processing nodes.
//!
//! Construction is sink-first: the terminal writer is built, then each
//! upstream node captures its downstream sink as a shared handle, so
//! children outlive parents during teardown. Termination cascades from the
//! head: each node drains its queue, joins its workers, and then
//! terminates its sink. `restart` re-arms a terminated pipeline for the
//! next input file.
//!
//! # Data flow
//!
//! ```text
//! loader -> scaler -> basecaller -> [modbase] -> [polyA] -> writer
//! ```

pub mod basecaller;
pub mod modbase;
pub mod node;
pub mod polya;
pub mod scaler;
pub mod stitch;
pub mod writer;

use crate::basecall::{BackendFactory, ModelConfig, create_basecall_runners, create_modbase_runners};
use crate::config::BasecallerConfig;
use crate::correction::CorrectionNode;
use crate::errors::Result;
use crate::messages::Message;
use crate::stats::{self, NamedStats};
use enum_dispatch::enum_dispatch;
use log::info;
use std::path::Path;
use std::sync::Arc;

pub use basecaller::BasecallerNode;
pub use modbase::ModBaseCallerNode;
pub use node::{MessageSink, NodeCore};
pub use polya::PolyACalculatorNode;
pub use scaler::{ScalerConfig, ScalerNode, ShortSignalPolicy};
pub use writer::{HtsWriterNode, OutputMode};

/// Fraction of system memory the CPU runner plan may claim.
const MEMORY_FRACTION: f32 = 0.8;

/// Modbase runner handles created per caller.
const MODBASE_RUNNERS_PER_CALLER: usize = 2;

/// Default bound on each node's input queue.
const DEFAULT_MAX_READS: usize = 1000;

/// The node capability set as a dispatchable value.
#[enum_dispatch(MessageSink)]
pub enum NodeHandle {
    /// Signal scaler.
    Scaler(ScalerNode),
    /// Basecaller.
    Basecaller(BasecallerNode),
    /// Modified-base caller.
    ModBaseCaller(ModBaseCallerNode),
    /// PolyA tail calculator.
    PolyACalculator(PolyACalculatorNode),
    /// Correction window extractor.
    Correction(CorrectionNode),
    /// Terminal HTS writer.
    HtsWriter(HtsWriterNode),
}

impl NodeHandle {
    /// Downcast to the terminal writer, when this node is one.
    #[must_use]
    pub fn as_hts_writer(&self) -> Option<&HtsWriterNode> {
        match self {
            NodeHandle::HtsWriter(writer) => Some(writer),
            _ => None,
        }
    }
}

/// An assembled pipeline owning its nodes in head-to-sink order.
pub struct Pipeline {
    nodes: Vec<Arc<NodeHandle>>,
}

impl Pipeline {
    /// Assemble a pipeline from nodes ordered head first, terminal last.
    ///
    /// # Panics
    ///
    /// Panics if `nodes` is empty.
    #[must_use]
    pub fn new(nodes: Vec<Arc<NodeHandle>>) -> Self {
        assert!(!nodes.is_empty(), "a pipeline needs at least one node");
        Self { nodes }
    }

    /// Push a message into the head node.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::PorecallError::QueueClosed`] once the
    /// pipeline has been terminated.
    pub fn push_message(&self, message: Message) -> Result<()> {
        self.nodes[0].push_message(message)
    }

    /// Terminate the pipeline top-down; every node drains before its sink
    /// is told to stop. Blocks until all workers have joined.
    pub fn terminate(&self) {
        self.nodes[0].terminate();
    }

    /// Re-arm a terminated pipeline: queues restart and workers respawn,
    /// sink-first.
    pub fn restart(&self) {
        self.nodes[0].restart();
    }

    /// Snapshot statistics of every node, keyed `<node>.<stat>`.
    #[must_use]
    pub fn sample_stats(&self) -> NamedStats {
        let mut all = NamedStats::new();
        for node in &self.nodes {
            stats::merge_prefixed(&mut all, node.node_name(), node.sample_stats());
        }
        all
    }

    /// The terminal node.
    #[must_use]
    pub fn terminal(&self) -> &Arc<NodeHandle> {
        self.nodes.last().expect("pipeline is non-empty")
    }

    /// Finalise the terminal writer (merge + index in sorted mode).
    ///
    /// Call after [`Pipeline::terminate`].
    ///
    /// # Errors
    ///
    /// Surfaces finalisation errors from the writer.
    pub fn finalise_output(&self, progress: &(dyn Fn(u64) + Send + Sync)) -> Result<()> {
        match self.terminal().as_hts_writer() {
            Some(writer) => writer.finalise(progress),
            None => Ok(()),
        }
    }
}

/// Build the standard basecalling pipeline for a config record.
///
/// Constructs nodes sink-first and returns the assembled pipeline. The
/// chunk size actually in force is the runner plan's stride-adjusted one.
///
/// # Errors
///
/// Propagates construction failures (device parsing, model loading,
/// output opening); no partial pipeline is left running on error.
pub fn create_basecall_pipeline(
    config: &BasecallerConfig,
    factory: &Arc<dyn BackendFactory>,
    model_config: &ModelConfig,
    output_path: &Path,
    estimate_poly_a: bool,
) -> Result<Pipeline> {
    config.validate()?;

    let plan = create_basecall_runners(
        factory,
        model_config,
        &config.device,
        config.num_runners as usize,
        config.num_runners as usize,
        config.batch_size as usize,
        config.chunk_size as usize,
        MEMORY_FRACTION,
    )?;
    info!(
        "Created {} basecall runners over {} device(s), chunk size {}",
        plan.runners.len(),
        plan.num_devices,
        plan.chunk_size
    );

    let modbase_runners = create_modbase_runners(
        &config.modbase_models,
        &config.device,
        MODBASE_RUNNERS_PER_CALLER,
        config.modbase_batch_size as usize,
    )?;

    let mode = if config.emit_fastq {
        OutputMode::Fastq
    } else if config.sort_bam {
        OutputMode::SortedBam
    } else {
        OutputMode::Bam
    };

    let header = output_header();
    let writer: Arc<NodeHandle> = Arc::new(
        HtsWriterNode::new(
            output_path,
            mode,
            header,
            config.sorted_bam_buffer_bytes,
            DEFAULT_MAX_READS,
        )?
        .into(),
    );

    let mut nodes: Vec<Arc<NodeHandle>> = vec![Arc::clone(&writer)];
    let mut sink = writer;

    if estimate_poly_a {
        let polya: Arc<NodeHandle> =
            Arc::new(PolyACalculatorNode::new(sink, 4, DEFAULT_MAX_READS).into());
        nodes.push(Arc::clone(&polya));
        sink = polya;
    }

    if !modbase_runners.is_empty() {
        let modbase: Arc<NodeHandle> = Arc::new(
            ModBaseCallerNode::new(
                sink,
                modbase_runners,
                config.modbase_threads.max(1) as usize,
                DEFAULT_MAX_READS,
            )
            .into(),
        );
        nodes.push(Arc::clone(&modbase));
        sink = modbase;
    }

    let basecaller: Arc<NodeHandle> = Arc::new(
        BasecallerNode::new(sink, plan.runners, config.overlap as usize, DEFAULT_MAX_READS).into(),
    );
    nodes.push(Arc::clone(&basecaller));

    let scaler: Arc<NodeHandle> = Arc::new(
        ScalerNode::new(
            basecaller,
            ScalerConfig::default(),
            (plan.num_devices * 2).max(1),
            DEFAULT_MAX_READS,
        )
        .into(),
    );
    nodes.push(scaler);

    // Stored sink-first; the pipeline wants head-first.
    nodes.reverse();
    Ok(Pipeline::new(nodes))
}

/// The header written to every output container.
fn output_header() -> noodles::sam::Header {
    use noodles::sam::header::record::value::Map;
    use noodles::sam::header::record::value::map::Program;

    noodles::sam::Header::builder()
        .add_program("porecall", Map::<Program>::default())
        .build()
}
