//! The whole pipeline: sample the plane, run the kernel, normalize, encode, write.

use log::{info, warn};

use crate::{
    backend::{self, ComputeBackend, GpuBackend, HostBackend, Job},
    bitmap,
    config::{Config, Fallback},
    error::{Error, Result},
    kernel::KernelSource,
    lifecycle::Ledger,
    normalize, plane,
};

/// Compute the iteration field for `config` on `backend`.
pub fn generate_on<B: ComputeBackend>(backend: &B, config: &Config) -> Result<Vec<u32>> {
    config.validate()?;
    let grid = plane::generate(config.size, &config.bounds)?;
    let source = KernelSource::phoenix();

    backend::compute(
        backend,
        Job {
            preference: config.device,
            source: &source,
            points: &grid,
            params: &config.kernel,
        },
        &Ledger::new(),
    )
}

/// Compute the iteration field on the GPU, falling back to the host if `config` allows it.
pub fn generate(config: &Config) -> Result<Vec<u32>> {
    generate_with(&GpuBackend::default(), config)
}

/// [`generate`] with an explicit GPU backend. Only `NoDeviceAvailable` triggers the fallback.
pub fn generate_with(gpu: &GpuBackend, config: &Config) -> Result<Vec<u32>> {
    match generate_on(gpu, config) {
        Err(Error::NoDeviceAvailable(reason)) if config.fallback == Fallback::Host => {
            warn!("{}; falling back to the host backend", reason);
            generate_on(&HostBackend::default(), config)
        }
        result => result,
    }
}

/// Turn an iteration field into the bytes of the output image.
pub fn encode(config: &Config, iterations: &[u32]) -> Result<Vec<u8>> {
    let pixels = normalize::normalize_field(iterations, config.kernel.max_iterations);
    bitmap::encode(&pixels, config.size.width, config.size.height)
}

/// Render `config` to `config.output`. Nothing is written unless every step succeeds.
pub fn render(config: &Config) -> Result<()> {
    info!(
        "rendering {}x{} with {} iterations",
        config.size.width, config.size.height, config.kernel.max_iterations
    );
    let iterations = generate(config)?;
    let bytes = encode(config, &iterations)?;
    bitmap::write_file(&config.output, &bytes)
}
