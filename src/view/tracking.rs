//! In-memory [`GraphicsContext`] that keeps a ledger of every resource and
//! call instead of talking to a GPU. Used to check resource lifetimes.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use glam::Mat4;

use crate::view::context::{
    BufferId, BufferTarget, BufferUsage, GpuError, GraphicsContext, ProgramId, VertexLayout,
};
use crate::view::shader::LinkedProgram;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer { buffer: BufferId, target: BufferTarget, len: usize, usage: BufferUsage },
    DeleteBuffer(BufferId),
    CreateProgram(ProgramId),
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    BindVertexAttribute { location: u32, buffer: BufferId, layout: VertexLayout },
    SetClearColor([f32; 4]),
    Clear,
    SetUniformMat4 { location: u32, value: Mat4 },
    BindIndexBuffer(BufferId),
    DrawIndexed(u32),
    Present,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub buffers_created: u32,
    pub buffers_deleted: u32,
    pub programs_created: u32,
    pub programs_deleted: u32,
    /// Deletes of handles that were never created or already deleted
    pub double_releases: u32,
    pub live_buffers: BTreeSet<BufferId>,
    pub live_programs: BTreeSet<ProgramId>,
    pub calls: Vec<Call>,
}

impl Ledger {
    pub fn is_clean(&self) -> bool {
        self.live_buffers.is_empty() && self.live_programs.is_empty() && self.double_releases == 0
    }
}

/// Read access to a context's ledger that outlives the context itself
#[derive(Clone)]
pub struct LedgerObserver(Rc<RefCell<Ledger>>);

impl LedgerObserver {
    pub fn snapshot(&self) -> Ledger {
        self.0.borrow().clone()
    }
}

struct ProgramState {
    attributes: Vec<u32>,
    uniforms: Vec<u32>,
}

#[derive(Default)]
pub struct TrackingContext {
    ledger: Rc<RefCell<Ledger>>,
    next_id: u32,
    /// Fail buffer creation once this many buffers exist
    buffer_limit: Option<u32>,
    buffers: BTreeMap<BufferId, BufferTarget>,
    programs: BTreeMap<ProgramId, ProgramState>,
    current_program: Option<ProgramId>,
    attribute_bindings: BTreeMap<u32, (BufferId, VertexLayout)>,
    index_buffer: Option<BufferId>,
    clear_color: [f32; 4],
}

impl TrackingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose allocator runs out after `limit` buffers
    pub fn with_buffer_limit(limit: u32) -> Self {
        Self {
            buffer_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn ledger(&self) -> Ledger {
        self.ledger.borrow().clone()
    }

    pub fn observer(&self) -> LedgerObserver {
        LedgerObserver(self.ledger.clone())
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    fn record(&self, call: Call) {
        self.ledger.borrow_mut().calls.push(call);
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_buffer(&self, buffer: BufferId) -> Result<(), GpuError> {
        if self.buffers.contains_key(&buffer) {
            Ok(())
        } else {
            Err(GpuError::UnknownBuffer(buffer))
        }
    }
}

impl GraphicsContext for TrackingContext {
    fn create_buffer(
        &mut self,
        label: &str,
        target: BufferTarget,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferId, GpuError> {
        if let Some(limit) = self.buffer_limit {
            if self.buffers.len() as u32 >= limit {
                return Err(GpuError::OutOfMemory(format!("cannot allocate `{label}`")));
            }
        }

        let buffer = BufferId(self.next_id());
        self.buffers.insert(buffer, target);
        {
            let mut ledger = self.ledger.borrow_mut();
            ledger.buffers_created += 1;
            ledger.live_buffers.insert(buffer);
        }
        self.record(Call::CreateBuffer { buffer, target, len: contents.len(), usage });
        Ok(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.record(Call::DeleteBuffer(buffer));
        let mut ledger = self.ledger.borrow_mut();
        if self.buffers.remove(&buffer).is_none() {
            ledger.double_releases += 1;
            return;
        }
        ledger.buffers_deleted += 1;
        ledger.live_buffers.remove(&buffer);

        self.attribute_bindings.retain(|_, (bound, _)| *bound != buffer);
        if self.index_buffer == Some(buffer) {
            self.index_buffer = None;
        }
    }

    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId, GpuError> {
        let id = ProgramId(self.next_id());
        self.programs.insert(
            id,
            ProgramState {
                attributes: program.attributes.iter().map(|a| a.location).collect(),
                uniforms: program.uniforms.iter().map(|u| u.binding).collect(),
            },
        );
        {
            let mut ledger = self.ledger.borrow_mut();
            ledger.programs_created += 1;
            ledger.live_programs.insert(id);
        }
        self.record(Call::CreateProgram(id));
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.record(Call::DeleteProgram(program));
        let mut ledger = self.ledger.borrow_mut();
        if self.programs.remove(&program).is_none() {
            ledger.double_releases += 1;
            return;
        }
        ledger.programs_deleted += 1;
        ledger.live_programs.remove(&program);

        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) -> Result<(), GpuError> {
        if !self.programs.contains_key(&program) {
            return Err(GpuError::UnknownProgram(program));
        }
        self.current_program = Some(program);
        self.record(Call::UseProgram(program));
        Ok(())
    }

    fn bind_vertex_attribute(
        &mut self,
        location: u32,
        buffer: BufferId,
        layout: VertexLayout,
    ) -> Result<(), GpuError> {
        self.check_buffer(buffer)?;
        if !(1..=4).contains(&layout.components) {
            return Err(GpuError::UnsupportedLayout(layout.components));
        }
        self.attribute_bindings.insert(location, (buffer, layout));
        self.record(Call::BindVertexAttribute { location, buffer, layout });
        Ok(())
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
        self.record(Call::SetClearColor(color));
    }

    fn clear(&mut self) {
        self.record(Call::Clear);
    }

    fn set_uniform_mat4(&mut self, location: u32, value: &Mat4) -> Result<(), GpuError> {
        let program = self.current_program.ok_or(GpuError::NoProgramBound)?;
        let declared = self
            .programs
            .get(&program)
            .is_some_and(|p| p.uniforms.contains(&location));
        if !declared {
            return Err(GpuError::UnknownUniform(location));
        }
        self.record(Call::SetUniformMat4 { location, value: *value });
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: BufferId) -> Result<(), GpuError> {
        self.check_buffer(buffer)?;
        self.index_buffer = Some(buffer);
        self.record(Call::BindIndexBuffer(buffer));
        Ok(())
    }

    fn draw_indexed(&mut self, count: u32) -> Result<(), GpuError> {
        let program = self.current_program.ok_or(GpuError::NoProgramBound)?;
        if self.index_buffer.is_none() {
            return Err(GpuError::NoIndexBuffer);
        }
        let state = self.programs.get(&program).ok_or(GpuError::UnknownProgram(program))?;
        if let Some(missing) = state
            .attributes
            .iter()
            .find(|location| !self.attribute_bindings.contains_key(location))
        {
            return Err(GpuError::UnboundAttribute(*missing));
        }
        self.record(Call::DrawIndexed(count));
        Ok(())
    }

    fn present(&mut self) -> Result<(), GpuError> {
        self.record(Call::Present);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_twice_is_counted() {
        let mut ctx = TrackingContext::new();
        let buffer = ctx
            .create_buffer("test", BufferTarget::Vertex, &[0; 12], BufferUsage::StaticDraw)
            .unwrap();

        ctx.delete_buffer(buffer);
        ctx.delete_buffer(buffer);

        let ledger = ctx.ledger();
        assert_eq!(ledger.buffers_deleted, 1);
        assert_eq!(ledger.double_releases, 1);
        assert!(ledger.live_buffers.is_empty());
    }

    #[test]
    fn test_use_after_delete_is_rejected() {
        let mut ctx = TrackingContext::new();
        let buffer = ctx
            .create_buffer("test", BufferTarget::Index, &[0; 4], BufferUsage::StaticDraw)
            .unwrap();
        ctx.delete_buffer(buffer);

        assert!(matches!(ctx.bind_index_buffer(buffer), Err(GpuError::UnknownBuffer(b)) if b == buffer));
    }

    #[test]
    fn test_buffer_limit() {
        let mut ctx = TrackingContext::with_buffer_limit(1);
        assert!(ctx
            .create_buffer("first", BufferTarget::Vertex, &[], BufferUsage::StaticDraw)
            .is_ok());
        assert!(matches!(
            ctx.create_buffer("second", BufferTarget::Vertex, &[], BufferUsage::StaticDraw),
            Err(GpuError::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_draw_needs_program() {
        let mut ctx = TrackingContext::new();
        assert!(matches!(ctx.draw_indexed(3), Err(GpuError::NoProgramBound)));
    }
}
