use thiserror::Error;

use crate::model::cube::{self, Spin, INDICES, UVS, VERTICES};
use crate::settings::Settings;
use crate::view::context::{
    BufferId, BufferTarget, BufferUsage, GpuError, GraphicsContext, VertexLayout,
};
use crate::view::shader::{ShaderError, ShaderProgram};

pub const VERTEX_SHADER: &str = include_str!("../view/shaders/cube.vert.wgsl");
pub const FRAGMENT_SHADER: &str = include_str!("../view/shaders/cube.frag.wgsl");

pub const POSITION_ATTRIBUTE: &str = "aPosition";
pub const UV_ATTRIBUTE: &str = "aTexCoord";
pub const MODEL_UNIFORM: &str = "model";

#[derive(Debug, Error)]
pub enum CubeError {
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("shader program does not declare attribute `{0}`")]
    MissingAttribute(&'static str),
    #[error("shader program does not declare uniform `{0}`")]
    MissingUniform(&'static str),
}

/// Owns the graphics context and every GPU resource the cube needs.
///
/// Resources are released by [`RotatingCube::unload`], which also runs on
/// drop, so a failed load or an early return never leaks them.
pub struct RotatingCube<C: GraphicsContext> {
    ctx: C,
    shader: Option<ShaderProgram>,
    vertex_buffer: Option<BufferId>,
    uv_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
    model_location: u32,
    spin: Spin,
}

impl<C: GraphicsContext> RotatingCube<C> {
    pub fn load(ctx: C, settings: &Settings) -> Result<Self, CubeError> {
        Self::load_with_sources(ctx, settings, VERTEX_SHADER, FRAGMENT_SHADER)
    }

    pub(crate) fn load_with_sources(
        ctx: C,
        settings: &Settings,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, CubeError> {
        let mut cube = Self {
            ctx,
            shader: None,
            vertex_buffer: None,
            uv_buffer: None,
            index_buffer: None,
            model_location: 0,
            spin: Spin::new(settings.rotation_speed),
        };

        // on error `cube` drops here and releases whatever was created
        let shader = cube.shader.insert(ShaderProgram::compile(
            &mut cube.ctx,
            vertex_source,
            fragment_source,
        )?);
        shader.use_program(&mut cube.ctx)?;

        let position_location = shader
            .attribute_location(POSITION_ATTRIBUTE)
            .ok_or(CubeError::MissingAttribute(POSITION_ATTRIBUTE))?;
        let uv_location = shader
            .attribute_location(UV_ATTRIBUTE)
            .ok_or(CubeError::MissingAttribute(UV_ATTRIBUTE))?;
        cube.model_location = shader
            .uniform_location(MODEL_UNIFORM)
            .ok_or(CubeError::MissingUniform(MODEL_UNIFORM))?;

        let vertex_buffer = *cube.vertex_buffer.insert(cube.ctx.create_buffer(
            "cube_vertices",
            BufferTarget::Vertex,
            bytemuck::cast_slice(&VERTICES),
            BufferUsage::StaticDraw,
        )?);
        let uv_buffer = *cube.uv_buffer.insert(cube.ctx.create_buffer(
            "cube_uvs",
            BufferTarget::Vertex,
            bytemuck::cast_slice(&UVS),
            BufferUsage::StaticDraw,
        )?);
        cube.index_buffer = Some(cube.ctx.create_buffer(
            "cube_indices",
            BufferTarget::Index,
            bytemuck::cast_slice(&INDICES),
            BufferUsage::StaticDraw,
        )?);

        cube.ctx.bind_vertex_attribute(
            position_location,
            vertex_buffer,
            VertexLayout::packed_f32(cube::POSITION_COMPONENTS),
        )?;
        cube.ctx.bind_vertex_attribute(
            uv_location,
            uv_buffer,
            VertexLayout::packed_f32(cube::UV_COMPONENTS),
        )?;

        cube.ctx.set_clear_color(settings.clear_color);

        tracing::info!(
            vertices = VERTICES.len() / cube::POSITION_COMPONENTS as usize,
            indices = INDICES.len(),
            "cube loaded"
        );
        Ok(cube)
    }

    pub fn update(&mut self, elapsed_seconds: f32) {
        self.spin.advance(elapsed_seconds);
    }

    pub fn render(&mut self) -> Result<(), CubeError> {
        let (Some(shader), Some(index_buffer)) = (&self.shader, self.index_buffer) else {
            return Err(ShaderError::Disposed.into());
        };

        self.ctx.clear();
        shader.use_program(&mut self.ctx)?;
        self.ctx.set_uniform_mat4(self.model_location, &self.spin.model)?;
        self.ctx.bind_index_buffer(index_buffer)?;
        self.ctx.draw_indexed(INDICES.len() as u32)?;
        self.ctx.present()?;
        Ok(())
    }

    /// Release the buffers and the program, later calls do nothing
    pub fn unload(&mut self) {
        let mut released = false;
        for buffer in [
            self.vertex_buffer.take(),
            self.uv_buffer.take(),
            self.index_buffer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.ctx.delete_buffer(buffer);
            released = true;
        }
        if let Some(mut shader) = self.shader.take() {
            shader.dispose(&mut self.ctx);
            released = true;
        }
        if released {
            tracing::info!("cube unloaded");
        }
    }

    pub fn model(&self) -> glam::Mat4 {
        self.spin.model
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }
}

impl<C: GraphicsContext> Drop for RotatingCube<C> {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::shader::ShaderStage;
    use crate::view::tracking::{Call, LedgerObserver, TrackingContext};
    use glam::Mat4;

    fn load() -> RotatingCube<TrackingContext> {
        RotatingCube::load(TrackingContext::new(), &Settings::default()).unwrap()
    }

    #[test]
    fn test_load_creates_resources() {
        let cube = load();
        let ledger = cube.context().ledger();

        assert_eq!(ledger.buffers_created, 3);
        assert_eq!(ledger.programs_created, 1);
        assert_eq!(ledger.live_buffers.len(), 3);
        assert_eq!(cube.context().clear_color(), [0.1, 0.1, 0.1, 1.0]);

        let uploads = ledger
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::CreateBuffer { len, usage, .. } => Some((*len, *usage)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            uploads,
            vec![
                (24 * 4, BufferUsage::StaticDraw),
                (16 * 4, BufferUsage::StaticDraw),
                (36 * 4, BufferUsage::StaticDraw),
            ]
        );
    }

    #[test]
    fn test_load_binds_attribute_layouts() {
        let cube = load();
        let layouts = cube
            .context()
            .ledger()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::BindVertexAttribute { location, layout, .. } => Some((*location, layout.stride)),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(layouts, vec![(0, 12), (1, 8)]);
    }

    #[test]
    fn test_update_zero_keeps_model() {
        let mut cube = load();
        cube.update(0.0);
        assert_eq!(cube.model(), Mat4::IDENTITY);
    }

    #[test]
    fn test_updates_accumulate() {
        let mut split = load();
        split.update(0.1);
        split.update(0.3);

        let mut whole = load();
        whole.update(0.4);

        assert!(split.model().abs_diff_eq(whole.model(), 1e-5));
        assert!(!split.model().abs_diff_eq(Mat4::IDENTITY, 1e-3));
    }

    #[test]
    fn test_render_issues_one_draw() {
        let mut cube = load();
        cube.update(0.5);
        let before = cube.context().ledger().calls.len();

        cube.render().unwrap();

        let ledger = cube.context().ledger();
        let program = *ledger.live_programs.iter().next().unwrap();
        let frame = &ledger.calls[before..];
        assert_eq!(frame.len(), 6);
        assert_eq!(frame[0], Call::Clear);
        assert_eq!(frame[1], Call::UseProgram(program));
        assert_eq!(frame[2], Call::SetUniformMat4 { location: 0, value: cube.model() });
        assert!(matches!(frame[3], Call::BindIndexBuffer(_)));
        assert_eq!(frame[4], Call::DrawIndexed(36));
        assert_eq!(frame[5], Call::Present);
    }

    #[test]
    fn test_unload_releases_once() {
        let mut cube = load();
        cube.render().unwrap();
        let observer = cube.context().observer();

        cube.unload();
        cube.unload();
        drop(cube);

        let ledger = observer.snapshot();
        assert_eq!(ledger.buffers_deleted, 3);
        assert_eq!(ledger.programs_deleted, 1);
        assert!(ledger.is_clean());
    }

    #[test]
    fn test_drop_unloads() {
        let cube = load();
        let observer = cube.context().observer();
        drop(cube);

        let ledger = observer.snapshot();
        assert_eq!(ledger.buffers_deleted, 3);
        assert_eq!(ledger.programs_deleted, 1);
        assert!(ledger.is_clean());
    }

    #[test]
    fn test_render_after_unload_fails() {
        let mut cube = load();
        cube.unload();
        assert!(cube.render().is_err());
    }

    fn load_sources(vertex: &str, fragment: &str) -> (Result<RotatingCube<TrackingContext>, CubeError>, LedgerObserver) {
        let ctx = TrackingContext::new();
        let observer = ctx.observer();
        let result = RotatingCube::load_with_sources(ctx, &Settings::default(), vertex, fragment);
        (result, observer)
    }

    #[test]
    fn test_load_propagates_compile_error() {
        let (result, observer) = load_sources("@vertex fn main( {", FRAGMENT_SHADER);

        match result {
            Err(CubeError::Shader(ShaderError::Compile { stage, .. })) => {
                assert_eq!(stage, ShaderStage::Vertex);
            }
            _ => panic!("expected a VERTEX compile error"),
        }
        assert!(observer.snapshot().is_clean());
    }

    #[test]
    fn test_load_propagates_link_error() {
        let vertex = r#"
            @vertex
            fn main(@location(0) aPosition: vec3<f32>) -> @builtin(position) vec4<f32> {
                return vec4<f32>(aPosition, 1.0);
            }
        "#;
        let (result, observer) = load_sources(vertex, FRAGMENT_SHADER);

        assert!(matches!(result, Err(CubeError::Shader(ShaderError::Link { .. }))));
        assert!(observer.snapshot().is_clean());
    }

    #[test]
    fn test_load_without_uv_attribute() {
        let vertex = r#"
            @group(0) @binding(0)
            var<uniform> model: mat4x4<f32>;

            struct VertexOutput {
                @builtin(position) position: vec4<f32>,
                @location(0) tex_coord: vec2<f32>,
            };

            @vertex
            fn main(@location(0) aPosition: vec3<f32>) -> VertexOutput {
                var out: VertexOutput;
                out.position = model * vec4<f32>(aPosition, 1.0);
                out.tex_coord = aPosition.xy;
                return out;
            }
        "#;
        let (result, observer) = load_sources(vertex, FRAGMENT_SHADER);

        assert!(matches!(result, Err(CubeError::MissingAttribute("aTexCoord"))));
        let ledger = observer.snapshot();
        assert_eq!(ledger.programs_deleted, 1);
        assert!(ledger.is_clean());
    }

    #[test]
    fn test_load_without_model_uniform() {
        let vertex = r#"
            struct VertexOutput {
                @builtin(position) position: vec4<f32>,
                @location(0) tex_coord: vec2<f32>,
            };

            @vertex
            fn main(
                @location(0) aPosition: vec3<f32>,
                @location(1) aTexCoord: vec2<f32>,
            ) -> VertexOutput {
                var out: VertexOutput;
                out.position = vec4<f32>(aPosition, 1.0);
                out.tex_coord = aTexCoord;
                return out;
            }
        "#;
        let (result, observer) = load_sources(vertex, FRAGMENT_SHADER);

        assert!(matches!(result, Err(CubeError::MissingUniform("model"))));
        let ledger = observer.snapshot();
        assert_eq!(ledger.buffers_created, 0);
        assert!(ledger.is_clean());
    }

    #[test]
    fn test_failed_load_releases_partial_resources() {
        let ctx = TrackingContext::with_buffer_limit(2);
        let observer = ctx.observer();

        let result = RotatingCube::load(ctx, &Settings::default());
        assert!(matches!(result, Err(CubeError::Gpu(GpuError::OutOfMemory(_)))));

        let ledger = observer.snapshot();
        assert_eq!(ledger.buffers_created, 2);
        assert_eq!(ledger.programs_created, 1);
        assert!(ledger.is_clean());
    }
}
