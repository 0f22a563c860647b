use std::fmt;

use naga::front::wgsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, BuiltIn, Handle, Interpolation, Module, Sampling, Type, TypeInner};
use thiserror::Error;

use crate::view::context::{GpuError, GraphicsContext, ProgramId};

/// Bind group every uniform has to live in
pub const UNIFORM_GROUP: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn naga_stage(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("VERTEX"),
            ShaderStage::Fragment => f.write_str("FRAGMENT"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("{stage} SHADER COMPILATION ERROR: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("PROGRAM LINKING ERROR: {log}")]
    Link { log: String },
    #[error("shader program was already disposed")]
    Disposed,
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

fn link_error(log: impl Into<String>) -> ShaderError {
    ShaderError::Link { log: log.into() }
}

/// A single parsed and validated stage
pub struct CompiledStage {
    stage: ShaderStage,
    source: String,
    module: Module,
}

/// Vertex input declared by the vertex stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub location: u32,
    pub components: u32,
}

/// `var<uniform>` declared in bind group 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uniform {
    pub name: String,
    pub binding: u32,
    /// Size in bytes
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct StageSource {
    pub source: String,
    pub entry_point: String,
}

/// Everything a context needs to build GPU objects for a program
#[derive(Debug, Clone)]
pub struct LinkedProgram {
    pub vertex: StageSource,
    pub fragment: StageSource,
    pub attributes: Vec<Attribute>,
    pub uniforms: Vec<Uniform>,
}

/// Parse and validate one WGSL stage
pub fn compile_stage(stage: ShaderStage, source: &str) -> Result<CompiledStage, ShaderError> {
    let module = wgsl::parse_str(source).map_err(|e| ShaderError::Compile {
        stage,
        log: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| ShaderError::Compile {
            stage,
            log: e.emit_to_string(source),
        })?;

    Ok(CompiledStage {
        stage,
        source: source.to_string(),
        module,
    })
}

/// One location or builtin crossing a stage boundary
struct Varying {
    name: String,
    binding: Binding,
    inner: TypeInner,
}

/// Flatten an argument or result into its bound members
fn collect_varyings(
    module: &Module,
    name: Option<&str>,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<Varying>,
) {
    let inner = &module.types[ty].inner;
    if let Some(binding) = binding {
        out.push(Varying {
            name: name.unwrap_or("_").to_string(),
            binding: binding.clone(),
            inner: inner.clone(),
        });
        return;
    }
    if let TypeInner::Struct { members, .. } = inner {
        for member in members {
            collect_varyings(module, member.name.as_deref(), member.ty, member.binding.as_ref(), out);
        }
    }
}

fn location_of(binding: &Binding) -> Option<u32> {
    match binding {
        Binding::Location { location, .. } => Some(*location),
        Binding::BuiltIn(_) => None,
    }
}

/// Interpolation and sampling with naga's WGSL defaults filled in
fn interpolation_of(binding: &Binding, inner: &TypeInner) -> Option<(Interpolation, Option<Sampling>)> {
    let Binding::Location { interpolation, sampling, .. } = binding else {
        return None;
    };
    let float = inner.scalar_kind() == Some(naga::ScalarKind::Float);
    let interpolation = interpolation.unwrap_or(if float {
        Interpolation::Perspective
    } else {
        Interpolation::Flat
    });
    // flat varyings are not sampled
    let sampling = match interpolation {
        Interpolation::Flat => None,
        _ => Some(sampling.unwrap_or(Sampling::Center)),
    };
    Some((interpolation, sampling))
}

fn find_entry_point<'a>(stage: &'a CompiledStage) -> Result<&'a naga::EntryPoint, ShaderError> {
    let wanted = stage.stage.naga_stage();
    let mut found = stage.module.entry_points.iter().filter(|ep| ep.stage == wanted);
    let entry = found.next().ok_or_else(|| {
        link_error(format!("{} source declares no {} entry point", stage.stage, stage.stage))
    })?;
    if found.next().is_some() {
        return Err(link_error(format!(
            "{} source declares more than one {} entry point",
            stage.stage, stage.stage
        )));
    }
    Ok(entry)
}

fn inputs(stage: &CompiledStage, entry: &naga::EntryPoint) -> Vec<Varying> {
    let mut out = Vec::new();
    for arg in &entry.function.arguments {
        collect_varyings(&stage.module, arg.name.as_deref(), arg.ty, arg.binding.as_ref(), &mut out);
    }
    out
}

fn outputs(stage: &CompiledStage, entry: &naga::EntryPoint) -> Vec<Varying> {
    let mut out = Vec::new();
    if let Some(result) = &entry.function.result {
        collect_varyings(&stage.module, None, result.ty, result.binding.as_ref(), &mut out);
    }
    out
}

fn components(inner: &TypeInner) -> Option<u32> {
    match inner {
        TypeInner::Scalar(_) => Some(1),
        TypeInner::Vector { size, .. } => Some(*size as u32),
        _ => None,
    }
}

fn collect_uniforms(
    stage: &CompiledStage,
    uniforms: &mut Vec<(Uniform, TypeInner)>,
) -> Result<(), ShaderError> {
    let module = &stage.module;
    for (_, var) in module.global_variables.iter() {
        let Some(resource) = &var.binding else { continue };
        let name = var.name.clone().unwrap_or_default();

        if var.space != AddressSpace::Uniform {
            return Err(link_error(format!(
                "{} resource `{}` is not a uniform buffer; only `var<uniform>` is supported",
                stage.stage, name
            )));
        }
        if resource.group != UNIFORM_GROUP {
            return Err(link_error(format!(
                "uniform `{}` is in group {}; only group {} is supported",
                name, resource.group, UNIFORM_GROUP
            )));
        }

        let inner = module.types[var.ty].inner.clone();
        let size = inner.size(module.to_ctx());

        match uniforms.iter().find(|(u, _)| u.binding == resource.binding) {
            Some((existing, existing_inner)) => {
                if existing.name != name || *existing_inner != inner {
                    return Err(link_error(format!(
                        "binding {} is declared as `{}` and as `{}` with different definitions",
                        resource.binding, existing.name, name
                    )));
                }
            }
            None => uniforms.push((
                Uniform { name, binding: resource.binding, size },
                inner,
            )),
        }
    }
    Ok(())
}

/// Check the interface between two compiled stages
pub fn link(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<LinkedProgram, ShaderError> {
    if vertex.stage != ShaderStage::Vertex || fragment.stage != ShaderStage::Fragment {
        return Err(link_error("stages must be attached as VERTEX then FRAGMENT"));
    }

    let vs_entry = find_entry_point(vertex)?;
    let fs_entry = find_entry_point(fragment)?;

    let vs_out = outputs(vertex, vs_entry);
    if !vs_out
        .iter()
        .any(|v| matches!(v.binding, Binding::BuiltIn(BuiltIn::Position { .. })))
    {
        return Err(link_error("vertex stage does not write @builtin(position)"));
    }

    for input in inputs(fragment, fs_entry) {
        let Some(location) = location_of(&input.binding) else { continue };
        let Some(output) = vs_out.iter().find(|v| location_of(&v.binding) == Some(location)) else {
            return Err(link_error(format!(
                "fragment input `{}` at location {} is not written by the vertex stage",
                input.name, location
            )));
        };
        if output.inner != input.inner {
            return Err(link_error(format!(
                "fragment input `{}` at location {} does not match the type of vertex output `{}`",
                input.name, location, output.name
            )));
        }
        let written = interpolation_of(&output.binding, &output.inner);
        let read = interpolation_of(&input.binding, &input.inner);
        if written != read {
            return Err(link_error(format!(
                "fragment input `{}` at location {} is interpolated as {:?} but vertex output `{}` as {:?}",
                input.name, location, read, output.name, written
            )));
        }
    }

    if !outputs(fragment, fs_entry).iter().any(|v| location_of(&v.binding) == Some(0)) {
        return Err(link_error("fragment stage does not write a color at location 0"));
    }

    let mut attributes = Vec::new();
    for input in inputs(vertex, vs_entry) {
        let Some(location) = location_of(&input.binding) else { continue };
        let components = components(&input.inner).ok_or_else(|| {
            link_error(format!("vertex input `{}` is not a scalar or vector", input.name))
        })?;
        attributes.push(Attribute { name: input.name, location, components });
    }

    let mut uniforms = Vec::new();
    collect_uniforms(vertex, &mut uniforms)?;
    collect_uniforms(fragment, &mut uniforms)?;

    Ok(LinkedProgram {
        vertex: StageSource {
            source: vertex.source.clone(),
            entry_point: vs_entry.name.clone(),
        },
        fragment: StageSource {
            source: fragment.source.clone(),
            entry_point: fs_entry.name.clone(),
        },
        attributes,
        uniforms: uniforms.into_iter().map(|(u, _)| u).collect(),
    })
}

/// Linked vertex/fragment pair living in a [`GraphicsContext`]
pub struct ShaderProgram {
    handle: Option<ProgramId>,
    attributes: Vec<Attribute>,
    uniforms: Vec<Uniform>,
}

impl ShaderProgram {
    pub fn compile<C: GraphicsContext + ?Sized>(
        ctx: &mut C,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, ShaderError> {
        // compiled stages only live for this block
        let linked = {
            let vertex = compile_stage(ShaderStage::Vertex, vertex_source)?;
            let fragment = compile_stage(ShaderStage::Fragment, fragment_source)?;
            link(&vertex, &fragment)?
        };

        let handle = ctx.create_program(&linked)?;
        tracing::debug!(
            ?handle,
            attributes = linked.attributes.len(),
            uniforms = linked.uniforms.len(),
            "linked shader program"
        );

        Ok(Self {
            handle: Some(handle),
            attributes: linked.attributes,
            uniforms: linked.uniforms,
        })
    }

    pub fn use_program<C: GraphicsContext + ?Sized>(&self, ctx: &mut C) -> Result<(), ShaderError> {
        let handle = self.handle.ok_or(ShaderError::Disposed)?;
        ctx.use_program(handle)?;
        Ok(())
    }

    pub fn attribute_location(&self, name: &str) -> Option<u32> {
        self.attributes.iter().find(|a| a.name == name).map(|a| a.location)
    }

    pub fn uniform_location(&self, name: &str) -> Option<u32> {
        self.uniforms.iter().find(|u| u.name == name).map(|u| u.binding)
    }

    pub fn dispose<C: GraphicsContext + ?Sized>(&mut self, ctx: &mut C) {
        if let Some(handle) = self.handle.take() {
            ctx.delete_program(handle);
        }
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            tracing::warn!(?handle, "shader program dropped without dispose");
        }
    }
}
