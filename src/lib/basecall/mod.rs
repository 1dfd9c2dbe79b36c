//! Runner/caller binding: devices, model backends, and the fan-out plan.
//!
//! # Key Types
//!
//! - [`Device`] / [`parse_device_string`]: device enumeration
//! - [`ModelBackend`] / [`ModBaseBackend`]: inference contracts supplied by
//!   collaborators, with built-in CPU implementations
//! - [`Caller`]: device-resident model with serialised access
//! - [`Runner`]: lightweight handle, many runners per caller
//! - [`create_basecall_runners`] / [`create_modbase_runners`]: the
//!   construction-time plan

pub mod backend;
pub mod caller;
pub mod device;
pub mod plan;
pub mod runner;

pub use backend::{
    BackendFactory, ChunkCall, CpuBackendFactory, CpuModBaseModel, CpuModel, ModBaseBackend,
    ModelBackend, ModelConfig,
};
pub use caller::Caller;
pub use device::{Device, parse_device_string};
pub use plan::{RunnerPlan, create_basecall_runners, create_modbase_runners};
pub use runner::{ModBaseRunner, Runner};
