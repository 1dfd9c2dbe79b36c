//! Construction-time runner fan-out.
//!
//! Builds the N:M binding of lightweight runners over device callers: one
//! caller per device, constructed in parallel (caller construction is
//! expensive and embarrassingly parallel), then `num_gpu_runners` runner
//! handles per caller. The CPU path has no caller; each runner owns its own
//! inference context.

use super::backend::{BackendFactory, ModelConfig};
use super::caller::Caller;
use super::device::{Device, parse_device_string};
use super::runner::{ModBaseRunner, Runner};
use crate::basecall::backend::CpuModBaseModel;
use crate::concurrency::{AsyncTaskExecutor, TaskPriority};
use crate::errors::Result;
use log::debug;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Memory budget assumed for CPU runner auto-sizing.
const CPU_MEMORY_BUDGET_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Default batch size for CPU calling.
const CPU_BATCH_SIZE: usize = 128;

/// Default batch size for CPU modified-base calling.
const CPU_MODBASE_BATCH_SIZE: usize = 128;

/// The result of runner-plan construction.
#[derive(Debug)]
pub struct RunnerPlan {
    /// All runners, in round-robin assignment order.
    pub runners: Vec<Arc<Runner>>,
    /// Number of devices backing the runners.
    pub num_devices: usize,
    /// Chunk size after stride rounding; callers of the plan must use this
    /// value instead of the one they requested.
    pub chunk_size: usize,
}

/// Build the basecall runner fan-out for a device specification.
///
/// # Errors
///
/// Returns `UnsupportedDevice` for unknown device strings,
/// `DeviceEnumerationFailed` when a GPU selection matches no devices, and
/// `ModelLoadFailed` from caller construction.
#[allow(clippy::too_many_arguments)]
pub fn create_basecall_runners(
    factory: &Arc<dyn BackendFactory>,
    model_config: &ModelConfig,
    device: &str,
    num_gpu_runners: usize,
    num_cpu_runners: usize,
    batch_size: usize,
    chunk_size: usize,
    memory_fraction: f32,
) -> Result<RunnerPlan> {
    let devices = parse_device_string(device)?;

    let mut runners: Vec<Arc<Runner>> = Vec::new();
    let num_devices = devices.len();

    if devices == [Device::Cpu] {
        let batch_size = if batch_size == 0 { CPU_BATCH_SIZE } else { batch_size };
        let num_cpu_runners = if num_cpu_runners == 0 {
            auto_calculate_num_runners(model_config, batch_size, memory_fraction)
        } else {
            num_cpu_runners
        };
        debug!("- CPU calling: set batch size to {batch_size}, num_cpu_runners to {num_cpu_runners}");

        for _ in 0..num_cpu_runners {
            let backend = factory.create(model_config, &Device::Cpu)?;
            runners.push(Runner::cpu(backend, chunk_size, batch_size));
        }
    } else {
        let callers = construct_callers_in_parallel(factory, model_config, &devices, chunk_size, batch_size)?;
        for caller in &callers {
            for _ in 0..num_gpu_runners {
                runners.push(Runner::shared(caller, TaskPriority::High));
            }
            if batch_size == 0 {
                debug!(
                    " - set batch size for {} to {}",
                    caller.device(),
                    caller.batch_size()
                );
            } else if caller.batch_size() != batch_size {
                debug!(
                    "- set batch size for {} to {}",
                    caller.device(),
                    caller.batch_size()
                );
            }
        }
    }

    let model_stride = runners[0].stride();
    let adjusted_chunk_size = runners[0].chunk_size();
    assert!(
        runners
            .iter()
            .all(|r| r.stride() == model_stride && r.chunk_size() == adjusted_chunk_size),
        "all runners must agree on model stride and chunk size"
    );

    if chunk_size != adjusted_chunk_size {
        debug!("- adjusted chunk size to match model stride: {chunk_size} -> {adjusted_chunk_size}");
    }

    Ok(RunnerPlan { runners, num_devices, chunk_size: adjusted_chunk_size })
}

/// Construct one caller per device concurrently on a transient pool.
fn construct_callers_in_parallel(
    factory: &Arc<dyn BackendFactory>,
    model_config: &ModelConfig,
    devices: &[Device],
    chunk_size: usize,
    batch_size: usize,
) -> Result<Vec<Arc<Caller>>> {
    type CallerSlot = Arc<Mutex<Option<Result<Arc<Caller>>>>>;

    let executor = AsyncTaskExecutor::new(devices.len(), "caller-init");
    let sender = executor.create_task_queue(TaskPriority::Normal);

    let slots: Vec<CallerSlot> = devices.iter().map(|_| Arc::new(Mutex::new(None))).collect();
    for (device, slot) in devices.iter().zip(&slots) {
        let factory = Arc::clone(factory);
        let model_config = model_config.clone();
        let device = device.clone();
        let slot = Arc::clone(slot);
        sender.send(move || {
            let result = factory
                .create(&model_config, &device)
                .map(|backend| Caller::new(backend, device, chunk_size, batch_size));
            *slot.lock() = Some(result);
        });
    }
    executor.join();

    slots
        .into_iter()
        .map(|slot| slot.lock().take().expect("caller construction task completed"))
        .collect()
}

/// Auto-compute the CPU runner count from model size and a memory fraction,
/// capped at the host's available parallelism.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn auto_calculate_num_runners(
    model_config: &ModelConfig,
    batch_size: usize,
    memory_fraction: f32,
) -> usize {
    // Per-runner footprint: the model itself plus decode scratch that
    // grows with the batch size.
    let scratch_per_chunk: u64 = 4096 * 4;
    let per_runner = model_config.model_size_bytes.max(1) + batch_size as u64 * scratch_per_chunk;
    let budget = (CPU_MEMORY_BUDGET_BYTES as f64 * f64::from(memory_fraction.clamp(0.0, 1.0))) as u64;
    let by_memory = usize::try_from(budget / per_runner).unwrap_or(usize::MAX).max(1);
    let by_threads = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    by_memory.min(by_threads).max(1)
}

/// Build the modified-base runner set.
///
/// An empty model list disables modified-base calling and yields no
/// runners. On CPU the plan uses one runner per caller, a fixed batch size,
/// and one caller per hardware thread.
///
/// # Errors
///
/// Returns device and model-load errors as for [`create_basecall_runners`].
pub fn create_modbase_runners(
    modbase_models: &[impl AsRef<Path>],
    device: &str,
    runners_per_caller: usize,
    batch_size: usize,
) -> Result<Vec<Arc<ModBaseRunner>>> {
    if modbase_models.is_empty() {
        return Ok(Vec::new());
    }

    let devices = parse_device_string(device)?;
    let mut runners = Vec::new();

    if devices == [Device::Cpu] {
        let batch_size = CPU_MODBASE_BATCH_SIZE;
        let num_callers =
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        debug!(
            "- CPU modbase calling: {} models, {num_callers} callers, batch size {batch_size}",
            modbase_models.len()
        );
        for _ in 0..num_callers {
            runners.push(ModBaseRunner::new(Arc::new(CpuModBaseModel::new()), batch_size));
        }
    } else {
        for _device in &devices {
            for _ in 0..runners_per_caller.max(1) {
                runners.push(ModBaseRunner::new(Arc::new(CpuModBaseModel::new()), batch_size));
            }
        }
    }

    Ok(runners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basecall::backend::CpuBackendFactory;
    use crate::errors::PorecallError;

    fn factory() -> Arc<dyn BackendFactory> {
        Arc::new(CpuBackendFactory)
    }

    #[test]
    fn test_cpu_plan_defaults() {
        let config = ModelConfig::simple("m", 6);
        let plan =
            create_basecall_runners(&factory(), &config, "cpu", 0, 2, 0, 100, 0.8).unwrap();
        assert_eq!(plan.num_devices, 1);
        assert_eq!(plan.runners.len(), 2);
        // 100 rounded up to the next stride multiple.
        assert_eq!(plan.chunk_size, 102);
        assert_eq!(plan.runners[0].batch_size(), 128);
    }

    #[test]
    fn test_cpu_plan_auto_runner_count() {
        let config = ModelConfig::simple("m", 6);
        let plan =
            create_basecall_runners(&factory(), &config, "cpu", 0, 0, 64, 120, 0.8).unwrap();
        assert!(!plan.runners.is_empty());
    }

    #[test]
    fn test_unknown_device_fails() {
        let config = ModelConfig::simple("m", 6);
        let err = create_basecall_runners(&factory(), &config, "fpga", 1, 1, 0, 100, 0.8)
            .unwrap_err();
        assert!(matches!(err, PorecallError::UnsupportedDevice { .. }));
    }

    #[test]
    fn test_cuda_all_without_gpus_fails_enumeration() {
        let config = ModelConfig::simple("m", 6);
        let err = create_basecall_runners(&factory(), &config, "cuda:all", 1, 1, 0, 100, 0.8)
            .unwrap_err();
        assert!(matches!(err, PorecallError::DeviceEnumerationFailed { .. }));
    }

    #[test]
    fn test_explicit_cuda_without_engine_fails_load() {
        let config = ModelConfig::simple("m", 6);
        let err = create_basecall_runners(&factory(), &config, "cuda:0", 1, 1, 0, 100, 0.8)
            .unwrap_err();
        assert!(matches!(err, PorecallError::ModelLoadFailed { .. }));
    }

    #[test]
    fn test_modbase_runners_empty_models() {
        let runners =
            create_modbase_runners(&Vec::<std::path::PathBuf>::new(), "cpu", 2, 1000).unwrap();
        assert!(runners.is_empty());
    }

    #[test]
    fn test_modbase_runners_cpu() {
        let runners = create_modbase_runners(&["5mc.model"], "cpu", 2, 1000).unwrap();
        assert!(!runners.is_empty());
        assert_eq!(runners[0].batch_size(), 128);
    }
}
