//! Compute backends that run the escape-time kernel over a sample grid.
//!
//! A session goes `discover_device` → `create_context` → `build_program` → `dispatch`. Each step
//! returns an owning handle, and dropping the handles releases everything acquired so far.

pub mod gpu;
pub mod host;

use std::rc::Rc;

use log::{debug, info};

use crate::{
    config::DevicePreference,
    error::{Error, Result},
    kernel::{KernelParams, KernelSource},
    lifecycle::Ledger,
    plane::Complex,
};

pub use gpu::GpuBackend;
pub use host::HostBackend;

pub trait ComputeBackend {
    type Device;
    type Context: ComputeContext;

    fn name(&self) -> &'static str;

    fn discover_device(
        &self,
        preference: DevicePreference,
        ledger: &Rc<Ledger>,
    ) -> Result<Self::Device>;

    /// Creates the context and its queue. The context takes ownership of the device.
    fn create_context(&self, device: Self::Device) -> Result<Self::Context>;
}

pub trait ComputeContext {
    type Kernel<'context>: CompiledKernel
    where
        Self: 'context;

    /// Compile `source` and look up its entry point.
    fn build_program(&self, source: &KernelSource) -> Result<Self::Kernel<'_>>;
}

pub trait CompiledKernel {
    /// Run one lane per point and block until the iteration counts are in host memory.
    fn dispatch(&self, points: &[Complex], params: &KernelParams) -> Result<Vec<u32>>;
}

/// Everything one session needs.
#[derive(Clone, Copy, Debug)]
pub struct Job<'a> {
    pub preference: DevicePreference,
    pub source: &'a KernelSource,
    pub points: &'a [Complex],
    pub params: &'a KernelParams,
}

/// Run `job` on `backend` in a fresh session. All session resources are released before this
/// returns, whether or not it succeeds.
pub fn compute<B: ComputeBackend>(backend: &B, job: Job, ledger: &Rc<Ledger>) -> Result<Vec<u32>> {
    info!(
        "computing {} samples on the {} backend",
        job.points.len(),
        backend.name()
    );
    let result = run_session(backend, job, ledger);
    ledger.finish();
    let iterations = result?;

    check_iterations(&iterations, job.points.len(), job.params.max_iterations)?;
    Ok(iterations)
}

fn run_session<B: ComputeBackend>(
    backend: &B,
    job: Job,
    ledger: &Rc<Ledger>,
) -> Result<Vec<u32>> {
    let device = backend.discover_device(job.preference, ledger)?;
    let context = backend.create_context(device)?;
    let kernel = context.build_program(job.source)?;
    debug!("kernel `{}` ready", job.source.entry_point);
    kernel.dispatch(job.points, job.params)
}

/// The device has to hand back exactly one in-range count per point.
fn check_iterations(iterations: &[u32], expected_len: usize, max_iterations: u32) -> Result<()> {
    if iterations.len() != expected_len {
        return Err(Error::DispatchError(format!(
            "read back {} iteration counts for {} points",
            iterations.len(),
            expected_len
        )));
    }
    if let Some((index, count)) = iterations
        .iter()
        .enumerate()
        .find(|(_, &count)| count > max_iterations)
    {
        return Err(Error::DispatchError(format!(
            "sample {} reported {} iterations, above the bound of {}",
            index, count, max_iterations
        )));
    }
    Ok(())
}
