use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::sync::Arc;

use glam::Mat4;
use wgpu::util::DeviceExt;
use wgpu::Device;
use winit::window::Window;

use crate::view::context::{
    BufferId, BufferTarget, BufferUsage, GpuError, GraphicsContext, ProgramId, VertexLayout,
};
use crate::view::shader::{LinkedProgram, UNIFORM_GROUP};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Bound attribute: (shader location, source buffer, layout)
type AttributeBinding = (u32, BufferId, VertexLayout);

struct GpuProgram {
    vertex_module: wgpu::ShaderModule,
    fragment_module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_entry: String,
    attributes: Vec<u32>,
    pipeline_layout: wgpu::PipelineLayout,
    bind_group: Option<wgpu::BindGroup>,
    uniform_buffers: HashMap<u32, wgpu::Buffer>,
    /// Built on first draw, rebuilt when the attribute layouts change
    pipeline: Option<(Vec<(u32, VertexLayout)>, wgpu::RenderPipeline)>,
}

struct Frame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

/// [`GraphicsContext`] backed by a wgpu device drawing into a window surface
pub struct WgpuContext {
    device: Arc<Device>,
    queue: Arc<wgpu::Queue>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,

    next_id: u32,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    programs: HashMap<ProgramId, GpuProgram>,

    current_program: Option<ProgramId>,
    attribute_bindings: BTreeMap<u32, (BufferId, VertexLayout)>,
    index_buffer: Option<BufferId>,
    clear_color: wgpu::Color,
    pending_clear: bool,
    frame: Option<Frame>,
}

/// Shared GPU initialization helper
async fn init_device_and_queue(
    adapter: &wgpu::Adapter,
) -> Result<(Arc<Device>, Arc<wgpu::Queue>), GpuError> {
    let adapter_limits = adapter.limits();
    let limits = wgpu::Limits::downlevel_defaults().using_resolution(adapter_limits);

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::default(),
        })
        .await?;

    Ok((Arc::new(device), Arc::new(queue)))
}

/// Shared surface configuration helper
fn configure_surface(
    device: &Device,
    adapter: &wgpu::Adapter,
    surface: &wgpu::Surface,
    width: u32,
    height: u32,
) -> Result<wgpu::SurfaceConfiguration, GpuError> {
    let caps = surface.get_capabilities(adapter);
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .ok_or_else(|| GpuError::Validation("surface reports no supported formats".into()))?;
    let alpha_mode = caps
        .alpha_modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);

    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: width.max(1),
        height: height.max(1),
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(device, &config);

    Ok(config)
}

fn create_depth_view(device: &Device, width: u32, height: u32) -> wgpu::TextureView {
    let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth_texture"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    depth_texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn vertex_format(components: u32) -> Result<wgpu::VertexFormat, GpuError> {
    match components {
        1 => Ok(wgpu::VertexFormat::Float32),
        2 => Ok(wgpu::VertexFormat::Float32x2),
        3 => Ok(wgpu::VertexFormat::Float32x3),
        4 => Ok(wgpu::VertexFormat::Float32x4),
        n => Err(GpuError::UnsupportedLayout(n)),
    }
}

/// Run `f` inside a validation error scope
fn validated<T>(device: &Device, f: impl FnOnce() -> T) -> Result<T, GpuError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(GpuError::Validation(err.to_string())),
        None => Ok(value),
    }
}

fn build_pipeline(
    device: &Device,
    format: wgpu::TextureFormat,
    program: &GpuProgram,
    layouts: &[(u32, VertexLayout)],
) -> Result<wgpu::RenderPipeline, GpuError> {
    let attributes = layouts
        .iter()
        .map(|(location, layout)| {
            Ok([wgpu::VertexAttribute {
                offset: 0,
                shader_location: *location,
                format: vertex_format(layout.components)?,
            }])
        })
        .collect::<Result<Vec<_>, GpuError>>()?;
    let buffers = layouts
        .iter()
        .zip(&attributes)
        .map(|((_, layout), attribute)| wgpu::VertexBufferLayout {
            array_stride: layout.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: attribute,
        })
        .collect::<Vec<_>>();

    validated(device, || {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("program_pipeline"),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.vertex_module,
                entry_point: Some(program.vertex_entry.as_str()),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.fragment_module,
                entry_point: Some(program.fragment_entry.as_str()),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // cube winding is mixed, draw both faces
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState { count: 1, mask: !0, alpha_to_coverage_enabled: false },
            multiview: None,
            cache: None,
        })
    })
}

impl WgpuContext {
    /// Initialize GPU for a given window surface (Native)
    pub async fn new(window: Arc<Window>) -> Result<Self, GpuError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await?;
        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "selected GPU adapter");

        let (device, queue) = init_device_and_queue(&adapter).await?;
        let config = configure_surface(&device, &adapter, &surface, size.width, size.height)?;
        let depth_view = create_depth_view(&device, config.width, config.height);

        Ok(Self {
            device,
            queue,
            surface,
            config,
            depth_view,
            next_id: 0,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            current_program: None,
            attribute_bindings: BTreeMap::new(),
            index_buffer: None,
            clear_color: wgpu::Color::BLACK,
            pending_clear: false,
            frame: None,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Reconfigure the surface and depth target, a zero size is ignored
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.frame = None;
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, width, height);
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn acquire_frame(&mut self) -> Result<(), GpuError> {
        if self.frame.is_none() {
            let texture = self.surface.get_current_texture()?;
            let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.frame = Some(Frame { texture, view });
        }
        Ok(())
    }

    /// Resolve every attribute the program reads to a bound buffer
    fn attribute_layouts(&self, program: ProgramId) -> Result<Vec<AttributeBinding>, GpuError> {
        let state = self.programs.get(&program).ok_or(GpuError::UnknownProgram(program))?;
        state
            .attributes
            .iter()
            .map(|location| {
                self.attribute_bindings
                    .get(location)
                    .map(|(buffer, layout)| (*location, *buffer, *layout))
                    .ok_or(GpuError::UnboundAttribute(*location))
            })
            .collect()
    }

    /// Record one pass into the current frame, clearing first if a clear is pending
    fn encode_pass(&mut self, draw: Option<(ProgramId, BufferId, &[AttributeBinding], u32)>) -> Result<(), GpuError> {
        self.acquire_frame()?;
        let clear = std::mem::take(&mut self.pending_clear);
        let Some(frame) = &self.frame else {
            return Ok(());
        };

        let (color_load, depth_load) = if clear {
            (wgpu::LoadOp::Clear(self.clear_color), wgpu::LoadOp::Clear(1.0))
        } else {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        };

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: color_load, store: wgpu::StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations { load: depth_load, store: wgpu::StoreOp::Store }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some((program_id, index_id, bindings, count)) = draw {
                let program = self.programs.get(&program_id).ok_or(GpuError::UnknownProgram(program_id))?;
                let (_, pipeline) = program
                    .pipeline
                    .as_ref()
                    .ok_or_else(|| GpuError::Validation("program has no pipeline".into()))?;
                let index = self.buffers.get(&index_id).ok_or(GpuError::UnknownBuffer(index_id))?;

                render_pass.set_pipeline(pipeline);
                if let Some(bind_group) = &program.bind_group {
                    render_pass.set_bind_group(UNIFORM_GROUP, bind_group, &[]);
                }
                for (slot, (_, buffer_id, layout)) in bindings.iter().enumerate() {
                    let buffer = self.buffers.get(buffer_id).ok_or(GpuError::UnknownBuffer(*buffer_id))?;
                    render_pass.set_vertex_buffer(slot as u32, buffer.slice(layout.offset..));
                }
                render_pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..count, 0, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl GraphicsContext for WgpuContext {
    fn create_buffer(
        &mut self,
        label: &str,
        target: BufferTarget,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferId, GpuError> {
        // static contents, no COPY_DST
        let usages = match (target, usage) {
            (BufferTarget::Vertex, BufferUsage::StaticDraw) => wgpu::BufferUsages::VERTEX,
            (BufferTarget::Index, BufferUsage::StaticDraw) => wgpu::BufferUsages::INDEX,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: usages,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::OutOfMemory(format!("{label}: {err}")));
        }

        let id = BufferId(self.next_id());
        tracing::debug!(?id, label, bytes = contents.len(), "created buffer");
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        match self.buffers.remove(&buffer) {
            Some(gpu_buffer) => {
                gpu_buffer.destroy();
                self.attribute_bindings.retain(|_, (bound, _)| *bound != buffer);
                if self.index_buffer == Some(buffer) {
                    self.index_buffer = None;
                }
            }
            None => tracing::warn!(?buffer, "delete of unknown buffer ignored"),
        }
    }

    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId, GpuError> {
        let device = self.device.clone();
        let gpu_program = validated(&device, || {
            let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("vertex_shader"),
                source: wgpu::ShaderSource::Wgsl(program.vertex.source.as_str().into()),
            });
            let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("fragment_shader"),
                source: wgpu::ShaderSource::Wgsl(program.fragment.source.as_str().into()),
            });

            let layout_entries = program
                .uniforms
                .iter()
                .map(|uniform| wgpu::BindGroupLayoutEntry {
                    binding: uniform.binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(uniform.size as u64),
                    },
                    count: None,
                })
                .collect::<Vec<_>>();
            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform_bind_group_layout"),
                entries: &layout_entries,
            });

            let uniform_buffers = program
                .uniforms
                .iter()
                .map(|uniform| {
                    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(uniform.name.as_str()),
                        size: uniform.size as u64,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    (uniform.binding, buffer)
                })
                .collect::<HashMap<_, _>>();

            let bind_group = (!program.uniforms.is_empty()).then(|| {
                let entries = uniform_buffers
                    .iter()
                    .map(|(binding, buffer)| wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: buffer.as_entire_binding(),
                    })
                    .collect::<Vec<_>>();
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("uniform_bind_group"),
                    layout: &bind_group_layout,
                    entries: &entries,
                })
            });

            let layouts = [&bind_group_layout];
            let bind_group_layouts: &[&wgpu::BindGroupLayout] = if bind_group.is_some() { &layouts } else { &[] };
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("program_pipeline_layout"),
                bind_group_layouts,
                push_constant_ranges: &[],
            });

            GpuProgram {
                vertex_module,
                fragment_module,
                vertex_entry: program.vertex.entry_point.clone(),
                fragment_entry: program.fragment.entry_point.clone(),
                attributes: program.attributes.iter().map(|a| a.location).collect(),
                pipeline_layout,
                bind_group,
                uniform_buffers,
                pipeline: None,
            }
        })?;

        let id = ProgramId(self.next_id());
        tracing::debug!(?id, "created program");
        self.programs.insert(id, gpu_program);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            tracing::warn!(?program, "delete of unknown program ignored");
            return;
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) -> Result<(), GpuError> {
        if !self.programs.contains_key(&program) {
            return Err(GpuError::UnknownProgram(program));
        }
        self.current_program = Some(program);
        Ok(())
    }

    fn bind_vertex_attribute(
        &mut self,
        location: u32,
        buffer: BufferId,
        layout: VertexLayout,
    ) -> Result<(), GpuError> {
        if !self.buffers.contains_key(&buffer) {
            return Err(GpuError::UnknownBuffer(buffer));
        }
        vertex_format(layout.components)?;
        self.attribute_bindings.insert(location, (buffer, layout));
        Ok(())
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        let [r, g, b, a] = color.map(f64::from);
        self.clear_color = wgpu::Color { r, g, b, a };
    }

    fn clear(&mut self) {
        self.pending_clear = true;
    }

    fn set_uniform_mat4(&mut self, location: u32, value: &Mat4) -> Result<(), GpuError> {
        let program = self.current_program.ok_or(GpuError::NoProgramBound)?;
        let buffer = self
            .programs
            .get(&program)
            .and_then(|p| p.uniform_buffers.get(&location))
            .ok_or(GpuError::UnknownUniform(location))?;
        self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&value.to_cols_array()));
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: BufferId) -> Result<(), GpuError> {
        if !self.buffers.contains_key(&buffer) {
            return Err(GpuError::UnknownBuffer(buffer));
        }
        self.index_buffer = Some(buffer);
        Ok(())
    }

    fn draw_indexed(&mut self, count: u32) -> Result<(), GpuError> {
        let program_id = self.current_program.ok_or(GpuError::NoProgramBound)?;
        let index_id = self.index_buffer.ok_or(GpuError::NoIndexBuffer)?;
        let bindings = self.attribute_layouts(program_id)?;
        let key = bindings
            .iter()
            .map(|(location, _, layout)| (*location, *layout))
            .collect::<Vec<_>>();

        {
            let format = self.config.format;
            let program = self
                .programs
                .get_mut(&program_id)
                .ok_or(GpuError::UnknownProgram(program_id))?;
            let stale = program.pipeline.as_ref().map_or(true, |(cached, _)| *cached != key);
            if stale {
                let pipeline = build_pipeline(&self.device, format, program, &key)?;
                program.pipeline = Some((key, pipeline));
            }
        }

        self.encode_pass(Some((program_id, index_id, bindings.as_slice(), count)))
    }

    fn present(&mut self) -> Result<(), GpuError> {
        if self.pending_clear || self.frame.is_none() {
            // nothing drawn since the clear
            self.encode_pass(None)?;
        }
        if let Some(frame) = self.frame.take() {
            frame.texture.present();
        }
        Ok(())
    }
}
