#![deny(unsafe_code)]
mod version;

use anyhow::{Context, Result};
use clap::Parser;
use clap::builder::styling::{AnsiColor, Effects, Styles};
use env_logger::Env;
use log::info;
use porecall_lib::basecall::{BackendFactory, CpuBackendFactory, ModelConfig};
use porecall_lib::config::BasecallerConfig;
use porecall_lib::loader::load_signal_file;
use porecall_lib::logging::{OperationTimer, log_pipeline_summary};
use porecall_lib::messages::ClientInfo;
use porecall_lib::pipeline::create_basecall_pipeline;
use std::path::PathBuf;
use std::sync::Arc;

/// Custom styles for CLI help output
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(styles = STYLES)]
struct Args {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
#[command(version)]
enum Subcommand {
    /// Basecall a signal file into FASTQ or (sorted) BAM.
    Basecaller(Basecaller),
}

#[derive(Parser, Debug)]
struct Basecaller {
    /// Input signal file (tab-separated development format).
    input: PathBuf,

    /// Output path.
    #[arg(short, long, default_value = "calls.bam")]
    output: PathBuf,

    /// Device string: "cpu", "metal", "cuda:all", or "cuda:0,...,N".
    #[arg(short = 'x', long, default_value = "cpu")]
    device: String,

    /// Chunk batch size; 0 selects an optimal size.
    #[arg(short, long, default_value_t = 0)]
    batch_size: u32,

    /// Signal samples per chunk.
    #[arg(short, long, default_value_t = 10_000)]
    chunk_size: u32,

    /// Overlap between adjacent chunks, in samples.
    #[arg(long, default_value_t = 500)]
    overlap: u32,

    /// Runners per device (0 = auto on CPU).
    #[arg(short = 'r', long, default_value_t = 2)]
    num_runners: u32,

    /// Batch size for modified-base calling.
    #[arg(long, default_value_t = 1000)]
    modbase_batch_size: u32,

    /// Worker threads for the modified-base node.
    #[arg(long, default_value_t = 1)]
    modbase_threads: u32,

    /// Comma-separated modified-base model paths.
    #[arg(long, value_delimiter = ',')]
    modbase_models: Vec<PathBuf>,

    /// Emit FASTQ instead of BAM.
    #[arg(long)]
    emit_fastq: bool,

    /// Coordinate-sort (and index) the BAM output.
    #[arg(long)]
    sort_bam: bool,

    /// Record buffer size for sorted BAM output, in bytes.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    sorted_bam_buffer_bytes: u64,

    /// Estimate polyA tail lengths.
    #[arg(long)]
    estimate_poly_a: bool,

    /// Model stride in samples per output step.
    #[arg(long, default_value_t = 6)]
    model_stride: u32,
}

impl Basecaller {
    fn execute(&self) -> Result<()> {
        let config = BasecallerConfig {
            device: self.device.clone(),
            batch_size: self.batch_size,
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            num_runners: self.num_runners,
            modbase_batch_size: self.modbase_batch_size,
            modbase_threads: self.modbase_threads,
            modbase_models: self.modbase_models.clone(),
            emit_fastq: self.emit_fastq,
            sort_bam: self.sort_bam,
            sorted_bam_buffer_bytes: self.sorted_bam_buffer_bytes,
        };

        let factory: Arc<dyn BackendFactory> = Arc::new(CpuBackendFactory);
        let model_config = ModelConfig::simple("porecall-lt", self.model_stride as usize);

        let pipeline = create_basecall_pipeline(
            &config,
            &factory,
            &model_config,
            &self.output,
            self.estimate_poly_a,
        )
        .context("Failed to construct pipeline")?;

        let timer = OperationTimer::new("Basecalling");
        let client_info = Arc::new(ClientInfo::new(-1));
        let loaded = load_signal_file(&self.input, &pipeline, &client_info)
            .with_context(|| format!("Failed to load {}", self.input.display()))?;

        pipeline.terminate();
        pipeline
            .finalise_output(&|percent| log::debug!("Finalising output: {percent}%"))
            .context("Failed to finalise output")?;
        timer.log_completion(loaded);

        log_pipeline_summary(&pipeline.sample_stats());
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("Running porecall version {}", version::VERSION.as_str());

    match args.subcommand {
        Subcommand::Basecaller(command) => command.execute(),
    }
}
