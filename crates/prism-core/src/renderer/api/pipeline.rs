// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pipeline description and compilation.
//!
//! A [`PipelineState`] collects a generic description (shaders, vertex layout,
//! fixed-function state and the compatible layout it targets) and compiles it into an
//! immutable backend pipeline object exactly once.

use crate::renderer::api::binding::MAX_TEXTURE_COUNT;
use crate::renderer::api::enums::{
    BlendEquation, BlendFactor, CullingMode, DepthFunc, Format, PrimitiveTopology, ShaderStage,
};
use crate::renderer::api::render_pass::{RenderPassPipelineState, RenderPassPipelineStateKey};
use crate::renderer::api::shader::Shader;
use crate::renderer::error::PipelineError;
use crate::renderer::traits::Backend;
use std::sync::Arc;

/// Maximum number of elements in a vertex layout.
pub const MAX_VERTEX_LAYOUT_COUNT: usize = 16;

/// One element of a vertex layout. Offsets are implied by declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayoutElement {
    /// Semantic name the shader input is matched by (e.g. `POSITION`).
    pub semantic_name: String,
    /// Attribute format; see [`Format::vertex_size`] for the accepted ones.
    pub format: Format,
}

impl VertexLayoutElement {
    /// Creates an element.
    pub fn new(semantic_name: impl Into<String>, format: Format) -> Self {
        Self {
            semantic_name: semantic_name.into(),
            format,
        }
    }
}

/// Per-channel blend function and equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    /// Source factor for color channels.
    pub src: BlendFactor,
    /// Destination factor for color channels.
    pub dst: BlendFactor,
    /// Source factor for the alpha channel.
    pub src_alpha: BlendFactor,
    /// Destination factor for the alpha channel.
    pub dst_alpha: BlendFactor,
    /// Equation for color channels.
    pub op_rgb: BlendEquation,
    /// Equation for the alpha channel.
    pub op_alpha: BlendEquation,
}

impl Default for BlendState {
    /// Standard alpha blending.
    fn default() -> Self {
        Self {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::One,
            op_rgb: BlendEquation::Add,
            op_alpha: BlendEquation::Max,
        }
    }
}

/// A vertex attribute with its resolved byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Semantic name.
    pub semantic: String,
    /// Attribute format.
    pub format: Format,
    /// Byte offset within one vertex.
    pub offset: u32,
    /// Shader input location, equal to the declaration index.
    pub location: u32,
}

/// Slots reserved in the binding layout of every pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingLayoutDescriptor {
    /// Number of shader stages that can see resources.
    pub stage_count: usize,
    /// Constant buffers per stage.
    pub constant_buffers_per_stage: usize,
    /// Texture + sampler pairs per stage.
    pub textures_per_stage: usize,
}

impl Default for BindingLayoutDescriptor {
    fn default() -> Self {
        Self {
            stage_count: ShaderStage::COUNT,
            constant_buffers_per_stage: 1,
            textures_per_stage: MAX_TEXTURE_COUNT,
        }
    }
}

/// The resolved description handed to [`Backend::create_pipeline`].
pub struct PipelineDescriptor<'a, B: Backend> {
    /// Optional debug label.
    pub label: Option<&'a str>,
    /// Vertex shader module.
    pub vertex_shader: &'a B::Shader,
    /// Pixel shader module.
    pub pixel_shader: &'a B::Shader,
    /// Compatible layout the pipeline must be usable with.
    pub layout: &'a B::CompatibleLayout,
    /// Attachment shape of that layout.
    pub render_pass_key: RenderPassPipelineStateKey,
    /// Vertex attributes with resolved offsets.
    pub vertex_attributes: &'a [VertexAttribute],
    /// Size of one vertex, the sum of all attribute sizes.
    pub vertex_stride: u32,
    /// Reserved binding slots.
    pub bindings: BindingLayoutDescriptor,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Face culling.
    pub culling: CullingMode,
    /// Blend state, `None` when blending is disabled.
    pub blend: Option<BlendState>,
    /// Depth test enabled.
    pub depth_test: bool,
    /// Depth write enabled.
    pub depth_write: bool,
    /// Depth comparison function.
    pub depth_func: DepthFunc,
}

/// Compilation status of a [`PipelineState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileState {
    /// Still being configured.
    Uncompiled,
    /// Compiled; immutable.
    Compiled,
    /// Compilation failed; the object cannot be compiled again or drawn with.
    Failed,
}

/// A pipeline description and, once compiled, its backend pipeline object.
pub struct PipelineState<B: Backend> {
    backend: Arc<B>,
    label: Option<String>,
    shaders: [Option<Arc<Shader<B>>>; ShaderStage::COUNT],
    vertex_layout: Vec<VertexLayoutElement>,
    topology: PrimitiveTopology,
    culling: CullingMode,
    blend: Option<BlendState>,
    depth_test: bool,
    depth_write: bool,
    depth_func: DepthFunc,
    render_pass_pipeline_state: Option<Arc<RenderPassPipelineState<B>>>,
    state: CompileState,
    raw: Option<B::Pipeline>,
}

impl<B: Backend> PipelineState<B> {
    pub(crate) fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            label: None,
            shaders: [None, None],
            vertex_layout: Vec::new(),
            topology: PrimitiveTopology::default(),
            culling: CullingMode::default(),
            blend: Some(BlendState::default()),
            depth_test: false,
            depth_write: false,
            depth_func: DepthFunc::default(),
            render_pass_pipeline_state: None,
            state: CompileState::Uncompiled,
            raw: None,
        }
    }

    fn ensure_configurable(&self) -> Result<(), PipelineError> {
        match self.state {
            CompileState::Uncompiled => Ok(()),
            CompileState::Compiled => Err(PipelineError::AlreadyCompiled),
            CompileState::Failed => Err(PipelineError::Unusable),
        }
    }

    /// Sets a debug label passed to the backend.
    pub fn set_label(&mut self, label: impl Into<String>) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.label = Some(label.into());
        Ok(())
    }

    /// Replaces the shader of `stage`.
    pub fn set_shader(&mut self, stage: ShaderStage, shader: Arc<Shader<B>>) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.shaders[stage.index()] = Some(shader);
        Ok(())
    }

    /// Replaces the whole vertex layout.
    pub fn set_vertex_layout(&mut self, elements: Vec<VertexLayoutElement>) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.vertex_layout = elements;
        Ok(())
    }

    /// Appends one element to the vertex layout.
    pub fn push_vertex_element(
        &mut self,
        semantic_name: impl Into<String>,
        format: Format,
    ) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.vertex_layout
            .push(VertexLayoutElement::new(semantic_name, format));
        Ok(())
    }

    /// Sets the primitive topology.
    pub fn set_topology(&mut self, topology: PrimitiveTopology) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.topology = topology;
        Ok(())
    }

    /// Sets which winding is culled.
    pub fn set_culling(&mut self, culling: CullingMode) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.culling = culling;
        Ok(())
    }

    /// Enables blending with `blend`, or disables it with `None`.
    pub fn set_blend(&mut self, blend: Option<BlendState>) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.blend = blend;
        Ok(())
    }

    /// Configures the depth test.
    pub fn set_depth(&mut self, test: bool, write: bool, func: DepthFunc) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.depth_test = test;
        self.depth_write = write;
        self.depth_func = func;
        Ok(())
    }

    /// Sets the compatible layout the pipeline will be drawn with. Keeps it alive.
    pub fn set_render_pass_pipeline_state(
        &mut self,
        state: Arc<RenderPassPipelineState<B>>,
    ) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        self.render_pass_pipeline_state = Some(state);
        Ok(())
    }

    /// Compiles the backend pipeline object.
    ///
    /// Any failure leaves the object in [`CompileState::Failed`]; native objects the
    /// backend created before failing have already been released.
    pub fn compile(&mut self) -> Result<(), PipelineError> {
        self.ensure_configurable()?;
        match self.build() {
            Ok(raw) => {
                log::info!(
                    "[{}] compiled pipeline '{}'",
                    B::NAME,
                    self.label.as_deref().unwrap_or("unnamed")
                );
                self.raw = Some(raw);
                self.state = CompileState::Compiled;
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "[{}] pipeline '{}' failed to compile: {}",
                    B::NAME,
                    self.label.as_deref().unwrap_or("unnamed"),
                    e
                );
                self.state = CompileState::Failed;
                Err(e)
            }
        }
    }

    fn build(&self) -> Result<B::Pipeline, PipelineError> {
        let vertex_shader = self.shader(ShaderStage::Vertex)?;
        let pixel_shader = self.shader(ShaderStage::Pixel)?;
        let render_pass_pipeline_state = self
            .render_pass_pipeline_state
            .as_ref()
            .ok_or(PipelineError::MissingRenderPassPipelineState)?;

        let (vertex_attributes, vertex_stride) = resolve_vertex_layout(&self.vertex_layout)?;

        let descriptor = PipelineDescriptor {
            label: self.label.as_deref(),
            vertex_shader: vertex_shader.raw(),
            pixel_shader: pixel_shader.raw(),
            layout: render_pass_pipeline_state.raw(),
            render_pass_key: render_pass_pipeline_state.key(),
            vertex_attributes: &vertex_attributes,
            vertex_stride,
            bindings: BindingLayoutDescriptor::default(),
            topology: self.topology,
            culling: self.culling,
            blend: self.blend,
            depth_test: self.depth_test,
            depth_write: self.depth_write,
            depth_func: self.depth_func,
        };
        self.backend.create_pipeline(&descriptor)
    }

    fn shader(&self, stage: ShaderStage) -> Result<&Shader<B>, PipelineError> {
        self.shaders[stage.index()]
            .as_deref()
            .ok_or(PipelineError::MissingShader { stage })
    }

    /// Current compilation status.
    pub fn compile_state(&self) -> CompileState {
        self.state
    }

    /// Returns `true` once compilation succeeded.
    pub fn is_compiled(&self) -> bool {
        self.state == CompileState::Compiled
    }

    /// The primitive topology.
    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    /// The vertex layout entries, in declaration order.
    pub fn vertex_layout(&self) -> &[VertexLayoutElement] {
        &self.vertex_layout
    }

    /// The compiled backend pipeline, if compilation succeeded.
    pub fn raw(&self) -> Option<&B::Pipeline> {
        self.raw.as_ref()
    }
}

/// Walks `elements` in order, accumulating byte offsets. Returns the attributes and
/// the resulting vertex stride.
pub fn resolve_vertex_layout(
    elements: &[VertexLayoutElement],
) -> Result<(Vec<VertexAttribute>, u32), PipelineError> {
    if elements.len() > MAX_VERTEX_LAYOUT_COUNT {
        return Err(PipelineError::TooManyVertexElements {
            count: elements.len(),
            max: MAX_VERTEX_LAYOUT_COUNT,
        });
    }

    let mut offset = 0u32;
    let mut attributes = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let size = element
            .format
            .vertex_size()
            .ok_or_else(|| PipelineError::UnsupportedVertexFormat {
                index,
                semantic: element.semantic_name.clone(),
                format: element.format,
            })?;
        attributes.push(VertexAttribute {
            semantic: element.semantic_name.clone(),
            format: element.format,
            offset,
            location: index as u32,
        });
        offset += size;
    }
    Ok((attributes, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate_in_declaration_order() {
        let elements = vec![
            VertexLayoutElement::new("POSITION", Format::R32G32B32Float),
            VertexLayoutElement::new("UV", Format::R32G32Float),
            VertexLayoutElement::new("COLOR", Format::R8G8B8A8Unorm),
        ];
        let (attributes, stride) = resolve_vertex_layout(&elements).unwrap();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20]);
        assert_eq!(stride, 24);
        assert_eq!(attributes[2].location, 2);
    }

    #[test]
    fn unsupported_format_is_reported_with_its_index() {
        let elements = vec![
            VertexLayoutElement::new("POSITION", Format::R32G32B32Float),
            VertexLayoutElement::new("DEPTH", Format::D32Float),
        ];
        let err = resolve_vertex_layout(&elements).unwrap_err();
        assert_eq!(
            err,
            PipelineError::UnsupportedVertexFormat {
                index: 1,
                semantic: "DEPTH".to_owned(),
                format: Format::D32Float,
            }
        );
    }

    #[test]
    fn more_than_sixteen_elements_is_rejected() {
        let elements = vec![VertexLayoutElement::new("X", Format::R32G32Float); 17];
        assert_eq!(
            resolve_vertex_layout(&elements).unwrap_err(),
            PipelineError::TooManyVertexElements { count: 17, max: 16 }
        );
    }

    mod compile {
        use super::super::*;
        use crate::renderer::mock;
        use std::sync::atomic::Ordering;

        #[test]
        fn compiles_once_then_rejects_changes() {
            let device = mock::device::<false>();
            let pass = mock::screen_pass(&device);
            let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
            assert!(pipeline.is_compiled());
            assert!(pipeline.raw().is_some());

            let mut pipeline = Arc::try_unwrap(pipeline).ok().unwrap();
            assert_eq!(pipeline.compile(), Err(PipelineError::AlreadyCompiled));
            assert_eq!(
                pipeline.set_topology(PrimitiveTopology::Line),
                Err(PipelineError::AlreadyCompiled)
            );
            let shader = device.create_shader(b"other").unwrap();
            assert_eq!(
                pipeline.set_shader(ShaderStage::Pixel, shader),
                Err(PipelineError::AlreadyCompiled)
            );
        }

        #[test]
        fn missing_pieces_leave_pipeline_failed() {
            let device = mock::device::<false>();
            let mut pipeline = device.create_pipeline_state();
            pipeline
                .set_shader(ShaderStage::Vertex, device.create_shader(b"vs").unwrap())
                .unwrap();
            assert_eq!(
                pipeline.compile(),
                Err(PipelineError::MissingShader {
                    stage: ShaderStage::Pixel
                })
            );
            assert_eq!(pipeline.compile_state(), CompileState::Failed);
            assert_eq!(pipeline.compile(), Err(PipelineError::Unusable));

            let mut no_target = device.create_pipeline_state();
            no_target
                .set_shader(ShaderStage::Vertex, device.create_shader(b"vs").unwrap())
                .unwrap();
            no_target
                .set_shader(ShaderStage::Pixel, device.create_shader(b"ps").unwrap())
                .unwrap();
            assert_eq!(
                no_target.compile(),
                Err(PipelineError::MissingRenderPassPipelineState)
            );
        }

        #[test]
        fn unsupported_vertex_format_fails_deterministically() {
            let device = mock::device::<false>();
            let pass = mock::screen_pass(&device);
            for _ in 0..2 {
                let mut pipeline = device.create_pipeline_state();
                pipeline
                    .set_shader(ShaderStage::Vertex, device.create_shader(b"vs").unwrap())
                    .unwrap();
                pipeline
                    .set_shader(ShaderStage::Pixel, device.create_shader(b"ps").unwrap())
                    .unwrap();
                pipeline
                    .set_render_pass_pipeline_state(pass.render_pass_pipeline_state().clone())
                    .unwrap();
                pipeline.push_vertex_element("POSITION", Format::R32Float).unwrap();
                assert!(matches!(
                    pipeline.compile(),
                    Err(PipelineError::UnsupportedVertexFormat { index: 0, .. })
                ));
            }
        }

        #[test]
        fn backend_failure_releases_partial_objects() {
            let device = mock::device::<false>();
            let pass = mock::screen_pass(&device);
            let mut pipeline = device.create_pipeline_state();
            pipeline
                .set_shader(ShaderStage::Vertex, device.create_shader(b"vs").unwrap())
                .unwrap();
            pipeline
                .set_shader(ShaderStage::Pixel, device.create_shader(b"ps").unwrap())
                .unwrap();
            pipeline
                .set_render_pass_pipeline_state(pass.render_pass_pipeline_state().clone())
                .unwrap();
            pipeline.set_label("failing").unwrap();

            device.backend().fail_pipeline.store(true, Ordering::SeqCst);
            let live = device.backend().live_objects();
            assert!(matches!(
                pipeline.compile(),
                Err(PipelineError::CompilationFailed { .. })
            ));
            assert_eq!(device.backend().live_objects(), live);
            assert_eq!(pipeline.compile_state(), CompileState::Failed);
            assert!(pipeline.raw().is_none());
        }
    }
}
