//! The `wgpu` backend.
//!
//! Handle mapping: the adapter is the device, the `wgpu::Device` is the context, the shader module
//! is the program and the compute pipeline is the kernel. wgpu reports most failures through
//! error scopes rather than return values, so every fallible call runs inside [`capture`].

use std::{rc::Rc, sync::mpsc};

use log::{debug, info};

use crate::{
    backend::{CompiledKernel, ComputeBackend, ComputeContext},
    command_buffer,
    command_encoder::CommandEncoderExt,
    compute,
    config::DevicePreference,
    error::{Error, Result},
    kernel::{KernelParams, KernelSource, Parameters},
    lifecycle::{Held, Ledger, Release, Resource, Stage},
    plane::Complex,
    typed_buffer,
};

pub struct GpuBackend {
    backends: wgpu::Backends,
}

impl GpuBackend {
    pub fn new(backends: wgpu::Backends) -> Self {
        Self { backends }
    }
}

impl Default for GpuBackend {
    fn default() -> Self {
        Self::new(wgpu::Backends::PRIMARY)
    }
}

fn accepts(preference: DevicePreference, device_type: wgpu::DeviceType) -> bool {
    match preference {
        DevicePreference::Gpu => matches!(
            device_type,
            wgpu::DeviceType::DiscreteGpu
                | wgpu::DeviceType::IntegratedGpu
                | wgpu::DeviceType::VirtualGpu
        ),
        DevicePreference::Any => true,
    }
}

/// Lower is better.
fn rank(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Other => 3,
        wgpu::DeviceType::Cpu => 4,
    }
}

/// Run `function` inside validation and out-of-memory error scopes.
///
/// The value is returned even when an error was captured: wgpu hands back an invalid handle in
/// that case, and it still has to be released.
fn capture<A>(device: &wgpu::Device, function: impl FnOnce() -> A) -> (A, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = function();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    (value, validation.or(out_of_memory))
}

fn check(error: Option<wgpu::Error>, into: impl FnOnce(String) -> Error) -> Result<()> {
    match error {
        None => Ok(()),
        Some(error) => Err(into(error.to_string())),
    }
}

impl ComputeBackend for GpuBackend {
    type Device = (Held<wgpu::Adapter>, Rc<Ledger>);
    type Context = GpuContext;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn discover_device(
        &self,
        preference: DevicePreference,
        ledger: &Rc<Ledger>,
    ) -> Result<Self::Device> {
        let instance = wgpu::Instance::new(self.backends);

        let adapter = instance
            .enumerate_adapters(self.backends)
            .filter(|adapter| accepts(preference, adapter.get_info().device_type))
            .min_by_key(|adapter| rank(adapter.get_info().device_type))
            .ok_or_else(|| {
                Error::NoDeviceAvailable(format!(
                    "no adapter matching {:?} on backends {:?}",
                    preference, self.backends
                ))
            })?;

        let info = adapter.get_info();
        info!(
            "using adapter {:?} ({:?}, {:?})",
            info.name, info.device_type, info.backend
        );

        let adapter = ledger.hold(Resource::Device, adapter);
        ledger.advance(Stage::DeviceAcquired);
        Ok((adapter, Rc::clone(ledger)))
    }

    fn create_context(&self, (adapter, ledger): Self::Device) -> Result<Self::Context> {
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("phoenix-device"),
                features: wgpu::Features::empty(),
                limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|error| {
            Error::NoDeviceAvailable(format!("adapter refused a device: {}", error))
        })?;

        let device = ledger.hold(Resource::Context, device);
        let queue = ledger.hold(Resource::Queue, queue);
        ledger.advance(Stage::ContextReady);

        Ok(GpuContext {
            queue,
            device,
            adapter,
            ledger,
        })
    }
}

/// Fields drop in declaration order, so the queue goes before the device, and the device before
/// the adapter.
pub struct GpuContext {
    queue: Held<wgpu::Queue>,
    device: Held<wgpu::Device>,
    adapter: Held<wgpu::Adapter>,
    ledger: Rc<Ledger>,
}

pub struct Pipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl Release for Pipeline {}

impl ComputeContext for GpuContext {
    type Kernel<'context> = GpuKernel<'context>;

    fn build_program(&self, source: &KernelSource) -> Result<GpuKernel<'_>> {
        let device: &wgpu::Device = &self.device;
        debug!(
            "building `{}` for {:?}",
            source.label,
            self.adapter.get_info().name
        );

        let (module, error) = capture(device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label),
                source: wgpu::ShaderSource::Wgsl(source.wgsl.into()),
            })
        });
        let program = self.ledger.hold(Resource::Program, module);
        check(error, Error::BuildError)?;
        self.ledger.advance(Stage::ProgramBuilt);

        let (pipeline, error) = capture(device, || {
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("phoenix-bind-group-layout"),
                    entries: &[
                        storage_entry(0, false),
                        storage_entry(1, true),
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("phoenix-pipeline-layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("phoenix-pipeline"),
                layout: Some(&pipeline_layout),
                module: &program,
                entry_point: source.entry_point,
            });

            Pipeline {
                pipeline,
                bind_group_layout,
            }
        });
        let kernel = self.ledger.hold(Resource::Kernel, pipeline);
        check(error, Error::BuildError)?;
        self.ledger.advance(Stage::KernelReady);

        Ok(GpuKernel {
            kernel,
            _program: program,
            context: self,
        })
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Declared kernel-first so the pipeline is released before the module it was built from.
pub struct GpuKernel<'context> {
    kernel: Held<Pipeline>,
    _program: Held<wgpu::ShaderModule>,
    context: &'context GpuContext,
}

impl<'context> CompiledKernel for GpuKernel<'context> {
    fn dispatch(&self, points: &[Complex], params: &KernelParams) -> Result<Vec<u32>> {
        let device: &wgpu::Device = &self.context.device;
        let queue: &wgpu::Queue = &self.context.queue;
        let ledger = &self.context.ledger;

        let (x, y, z) = compute::phoenix_dispatch_size(points.len())?;
        let len = points.len() as u64;

        let uniform: [Parameters; 1] = [params.to_uniform()];
        let (parameters, error) = capture(device, || {
            typed_buffer::Builder::from(&uniform[..])
                .with_label("phoenix-parameters")
                .with_usage(wgpu::BufferUsages::UNIFORM)
                .create(device)
        });
        let parameters = ledger.hold(Resource::ParameterBuffer, parameters);
        check(error, Error::BufferAllocationError)?;

        let (point_buffer, error) = capture(device, || {
            typed_buffer::Builder::from(points)
                .with_label("phoenix-points")
                .with_usage(wgpu::BufferUsages::STORAGE)
                .create(device)
        });
        let point_buffer = ledger.hold(Resource::PointBuffer, point_buffer);
        check(error, Error::BufferAllocationError)?;

        let (iteration_buffer, error) = capture(device, || {
            typed_buffer::Builder::<u32>::new(len)
                .with_label("phoenix-iterations")
                .with_usage(wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC)
                .create(device)
        });
        let iteration_buffer = ledger.hold(Resource::IterationBuffer, iteration_buffer);
        check(error, Error::BufferAllocationError)?;

        let (staging_buffer, error) = capture(device, || {
            typed_buffer::Builder::<u32>::new(len)
                .with_label("phoenix-staging")
                .with_usage(wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST)
                .create(device)
        });
        let staging_buffer = ledger.hold(Resource::StagingBuffer, staging_buffer);
        check(error, Error::BufferAllocationError)?;

        debug_assert_eq!(point_buffer.len(), iteration_buffer.len());

        let (bind_group, error) = capture(device, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("phoenix-bind-group"),
                layout: &self.kernel.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: iteration_buffer.binding_resource(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: point_buffer.binding_resource(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: parameters.binding_resource(),
                    },
                ],
            })
        });
        check(error, Error::DispatchError)?;
        ledger.advance(Stage::BuffersBound);

        let ((), error) = capture(device, || {
            let commands = command_buffer::create(device, "phoenix-commands", |command_encoder| {
                command_encoder.with_compute_pass(
                    &wgpu::ComputePassDescriptor {
                        label: Some("phoenix-pass"),
                    },
                    |compute_pass| {
                        compute_pass.set_pipeline(&self.kernel.pipeline);
                        compute_pass.set_bind_group(0, &bind_group, &[]);
                        compute_pass.insert_debug_marker("phoenix");
                        compute_pass.dispatch_workgroups(x, y, z);
                    },
                );
                typed_buffer::copy_buffer_to_buffer(
                    command_encoder,
                    &*iteration_buffer,
                    &*staging_buffer,
                );
            });
            queue.submit(Some(commands));
        });
        check(error, Error::DispatchError)?;
        debug!("dispatched {:?} workgroups for {} samples", (x, y, z), len);
        ledger.advance(Stage::Dispatched);

        let slice = staging_buffer.slice();
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver only goes away once dispatch has already returned.
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| Error::DispatchError("buffer map callback never ran".to_string()))?
            .map_err(|error| Error::DispatchError(format!("failed to map results: {}", error)))?;

        let iterations = slice.get_mapped_range().to_vec();
        staging_buffer.unmap();
        ledger.advance(Stage::ResultsRead);

        Ok(iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_preference_excludes_software_adapters() {
        assert!(accepts(DevicePreference::Gpu, wgpu::DeviceType::DiscreteGpu));
        assert!(accepts(
            DevicePreference::Gpu,
            wgpu::DeviceType::IntegratedGpu
        ));
        assert!(accepts(DevicePreference::Gpu, wgpu::DeviceType::VirtualGpu));
        assert!(!accepts(DevicePreference::Gpu, wgpu::DeviceType::Cpu));
        assert!(!accepts(DevicePreference::Gpu, wgpu::DeviceType::Other));
        assert!(accepts(DevicePreference::Any, wgpu::DeviceType::Cpu));
    }

    #[test]
    fn no_adapters_means_no_device() {
        let ledger = Ledger::new();
        let backend = GpuBackend::new(wgpu::Backends::empty());
        let result = backend.discover_device(DevicePreference::Gpu, &ledger);

        assert!(matches!(result, Err(Error::NoDeviceAvailable(_))));
        assert!(ledger.events().is_empty());
        assert!(ledger.outstanding().is_empty());
        assert_eq!(ledger.stage(), Stage::Uninitialized);
    }

    #[test]
    fn discrete_gpus_rank_first() {
        let mut types = vec![
            wgpu::DeviceType::Cpu,
            wgpu::DeviceType::IntegratedGpu,
            wgpu::DeviceType::DiscreteGpu,
        ];
        types.sort_by_key(|&device_type| rank(device_type));
        assert_eq!(types[0], wgpu::DeviceType::DiscreteGpu);
    }

    /// Needs a real adapter; run with `cargo test -- --ignored` on a machine with a GPU.
    #[test]
    #[ignore]
    fn gpu_matches_host() {
        use crate::{
            backend::{self, HostBackend, Job},
            config::Config,
            plane,
        };

        let config = Config {
            size: crate::config::Size {
                width: 256,
                height: 256,
            },
            ..Config::default()
        };
        let grid = plane::generate(config.size, &config.bounds).unwrap();
        let source = KernelSource::phoenix();
        let job = Job {
            preference: DevicePreference::Any,
            source: &source,
            points: &grid,
            params: &config.kernel,
        };

        let gpu_ledger = Ledger::new();
        let gpu = backend::compute(&GpuBackend::default(), job, &gpu_ledger).unwrap();
        let host = backend::compute(&HostBackend::default(), job, &Ledger::new()).unwrap();

        assert!(gpu_ledger.outstanding().is_empty());
        let mismatches = gpu.iter().zip(&host).filter(|(g, h)| g != h).count();
        // Drivers may contract `x * x + y * a` into an FMA, which can shift a boundary sample.
        assert!(mismatches * 1000 < host.len(), "{} mismatches", mismatches);
    }
}
