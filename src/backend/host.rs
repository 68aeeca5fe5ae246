//! Host fallback backend.
//!
//! Runs the same recurrence as `phoenix.wgsl`, one rayon task per sample, on a dedicated thread
//! pool. It goes through the same session steps as the GPU backend so both can be driven and
//! checked the same way.

use std::rc::Rc;

use log::debug;
use rayon::prelude::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};

use crate::{
    backend::{CompiledKernel, ComputeBackend, ComputeContext},
    config::DevicePreference,
    error::{Error, Result},
    kernel::{self, KernelParams, KernelSource},
    lifecycle::{Held, Ledger, Release, Resource, Stage},
    plane::Complex,
};

type KernelFn = fn(Complex, &KernelParams) -> u32;

/// Host implementations of the entry points in `phoenix.wgsl`.
fn resolve(entry_point: &str) -> Option<KernelFn> {
    match entry_point {
        kernel::PHOENIX_ENTRY_POINT => Some(kernel::escape_time),
        _ => None,
    }
}

impl Release for rayon::ThreadPool {}

/// Host memory standing in for a device buffer.
pub struct HostBuffer<A>(Vec<A>);

impl<A> Release for HostBuffer<A> {
    fn release(&mut self) {
        self.0 = Vec::new();
    }
}

impl<A> HostBuffer<A> {
    fn allocate(len: usize) -> Result<Self> {
        let mut contents = Vec::new();
        contents.try_reserve_exact(len).map_err(|error| {
            Error::BufferAllocationError(format!("{} host elements: {}", len, error))
        })?;
        Ok(Self(contents))
    }
}

/// Marks the session's context and queue in the ledger. The host has nothing to create for them.
pub struct Marker;

impl Release for Marker {}

#[derive(Default)]
pub struct HostBackend {
    threads: Option<usize>,
}

impl HostBackend {
    /// Use exactly `threads` worker threads instead of rayon's default.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: Some(threads),
        }
    }
}

impl ComputeBackend for HostBackend {
    type Device = (Held<rayon::ThreadPool>, Rc<Ledger>);
    type Context = HostContext;

    fn name(&self) -> &'static str {
        "host"
    }

    /// The host is always there, whatever the preference.
    fn discover_device(
        &self,
        _preference: DevicePreference,
        ledger: &Rc<Ledger>,
    ) -> Result<Self::Device> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|index| format!("phoenix-host-{}", index));
        if let Some(threads) = self.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|error| Error::NoDeviceAvailable(format!("host thread pool: {}", error)))?;
        debug!("host pool with {} threads", pool.current_num_threads());

        let pool = ledger.hold(Resource::Device, pool);
        ledger.advance(Stage::DeviceAcquired);
        Ok((pool, Rc::clone(ledger)))
    }

    fn create_context(&self, (pool, ledger): Self::Device) -> Result<Self::Context> {
        let context = ledger.hold(Resource::Context, Marker);
        let queue = ledger.hold(Resource::Queue, Marker);
        ledger.advance(Stage::ContextReady);

        Ok(HostContext {
            _queue: queue,
            _context: context,
            pool,
            ledger,
        })
    }
}

/// Fields drop in declaration order: queue, context, then the pool.
pub struct HostContext {
    _queue: Held<Marker>,
    _context: Held<Marker>,
    pool: Held<rayon::ThreadPool>,
    ledger: Rc<Ledger>,
}

/// A resolved host entry point.
pub struct HostFunction(KernelFn);

impl Release for HostFunction {}

/// The source text a program was built from.
pub struct HostProgram(KernelSource);

impl Release for HostProgram {}

impl ComputeContext for HostContext {
    type Kernel<'context> = HostKernel<'context>;

    fn build_program(&self, source: &KernelSource) -> Result<HostKernel<'_>> {
        let program = self.ledger.hold(Resource::Program, HostProgram(source.clone()));
        self.ledger.advance(Stage::ProgramBuilt);

        let function = resolve(program.0.entry_point).ok_or_else(|| {
            Error::BuildError(format!(
                "no host implementation of entry point `{}` in `{}`",
                program.0.entry_point, program.0.label
            ))
        })?;
        let kernel = self.ledger.hold(Resource::Kernel, HostFunction(function));
        self.ledger.advance(Stage::KernelReady);

        Ok(HostKernel {
            kernel,
            _program: program,
            context: self,
        })
    }
}

pub struct HostKernel<'context> {
    kernel: Held<HostFunction>,
    _program: Held<HostProgram>,
    context: &'context HostContext,
}

impl<'context> CompiledKernel for HostKernel<'context> {
    fn dispatch(&self, points: &[Complex], params: &KernelParams) -> Result<Vec<u32>> {
        let ledger = &self.context.ledger;

        let mut point_buffer = ledger.hold(
            Resource::PointBuffer,
            HostBuffer::allocate(points.len())?,
        );
        point_buffer.0.extend_from_slice(points);

        let mut iteration_buffer = ledger.hold(
            Resource::IterationBuffer,
            HostBuffer::allocate(points.len())?,
        );
        iteration_buffer.0.resize(points.len(), 0);
        ledger.advance(Stage::BuffersBound);

        let function = self.kernel.0;
        let input: &[Complex] = &point_buffer.0;
        let output: &mut [u32] = &mut iteration_buffer.0;
        self.context.pool.install(|| {
            output
                .par_iter_mut()
                .zip(input)
                .for_each(|(iterations, &point)| *iterations = function(point, params));
        });
        ledger.advance(Stage::Dispatched);

        let mut iterations = Vec::new();
        iterations
            .try_reserve_exact(points.len())
            .map_err(|error| Error::BufferAllocationError(error.to_string()))?;
        iterations.extend_from_slice(&iteration_buffer.0);
        ledger.advance(Stage::ResultsRead);

        Ok(iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{self, Job},
        config::{Config, Size},
        lifecycle::Event,
        plane,
    };

    fn small_config() -> Config {
        Config {
            size: Size {
                width: 64,
                height: 48,
            },
            ..Config::default()
        }
    }

    #[test]
    fn matches_the_scalar_kernel() {
        let config = small_config();
        let grid = plane::generate(config.size, &config.bounds).unwrap();
        let source = KernelSource::phoenix();
        let ledger = Ledger::new();

        let iterations = backend::compute(
            &HostBackend::with_threads(2),
            Job {
                preference: DevicePreference::Gpu,
                source: &source,
                points: &grid,
                params: &config.kernel,
            },
            &ledger,
        )
        .unwrap();

        assert_eq!(iterations.len(), 64 * 48);
        for (point, iterations) in grid.iter().zip(&iterations) {
            assert_eq!(*iterations, kernel::escape_time(*point, &config.kernel));
        }
    }

    #[test]
    fn successful_session_releases_in_reverse_order() {
        let config = small_config();
        let grid = plane::generate(config.size, &config.bounds).unwrap();
        let source = KernelSource::phoenix();
        let ledger = Ledger::new();

        backend::compute(
            &HostBackend::default(),
            Job {
                preference: DevicePreference::Gpu,
                source: &source,
                points: &grid,
                params: &config.kernel,
            },
            &ledger,
        )
        .unwrap();

        let events = ledger.events();
        let acquired: Vec<Resource> = events
            .iter()
            .filter_map(|event| match event {
                Event::Acquired(resource) => Some(*resource),
                Event::Released(_) => None,
            })
            .collect();
        let mut released: Vec<Resource> = events
            .iter()
            .filter_map(|event| match event {
                Event::Released(resource) => Some(*resource),
                Event::Acquired(_) => None,
            })
            .collect();
        released.reverse();

        assert_eq!(
            acquired,
            vec![
                Resource::Device,
                Resource::Context,
                Resource::Queue,
                Resource::Program,
                Resource::Kernel,
                Resource::PointBuffer,
                Resource::IterationBuffer,
            ]
        );
        assert_eq!(acquired, released);
        assert_eq!(ledger.stage(), Stage::Released);
    }

    #[test]
    fn failed_build_leaks_nothing() {
        let config = small_config();
        let grid = plane::generate(config.size, &config.bounds).unwrap();
        let source = KernelSource {
            entry_point: "mandelbrot",
            ..KernelSource::phoenix()
        };
        let ledger = Ledger::new();

        let result = backend::compute(
            &HostBackend::default(),
            Job {
                preference: DevicePreference::Gpu,
                source: &source,
                points: &grid,
                params: &config.kernel,
            },
            &ledger,
        );

        match result {
            Err(Error::BuildError(message)) => assert!(message.contains("mandelbrot")),
            other => panic!("expected a build error, got {:?}", other),
        }
        assert!(ledger.outstanding().is_empty());
        assert_eq!(ledger.stage(), Stage::Released);
        assert_eq!(
            ledger.events(),
            vec![
                Event::Acquired(Resource::Device),
                Event::Acquired(Resource::Context),
                Event::Acquired(Resource::Queue),
                Event::Acquired(Resource::Program),
                Event::Released(Resource::Program),
                Event::Released(Resource::Queue),
                Event::Released(Resource::Context),
                Event::Released(Resource::Device),
            ]
        );
    }
}
