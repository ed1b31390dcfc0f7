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

//! Defines the hierarchy of error types for the rendering hardware interface.
//!
//! Errors are grouped by the object that reports them: [`ShaderError`] and
//! [`PipelineError`] come out of creation and compilation, [`ResourceError`] out of
//! any resource factory, [`CommandError`] out of a [`CommandList`](super::CommandList)
//! used in the wrong state, and [`RenderError`] wraps them all at the device level.

use crate::renderer::api::enums::{Format, ShaderStage};
use std::fmt;

/// An error related to the creation of a shader module from bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// The bytecode buffer was empty.
    EmptyBytecode,
    /// The backend rejected the bytecode.
    CreationFailed {
        /// Detailed error message from the backend.
        details: String,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::EmptyBytecode => write!(f, "Shader bytecode is empty"),
            ShaderError::CreationFailed { details } => {
                write!(f, "Shader module creation failed: {details}")
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to the configuration or compilation of a pipeline state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A required shader stage has no shader assigned.
    MissingShader {
        /// The empty stage.
        stage: ShaderStage,
    },
    /// No render-pass pipeline state was provided to describe the render targets.
    MissingRenderPassPipelineState,
    /// A vertex layout element uses a format that cannot be fed to the input assembler.
    UnsupportedVertexFormat {
        /// Index of the offending element.
        index: usize,
        /// Semantic name of the offending element.
        semantic: String,
        /// The rejected format.
        format: Format,
    },
    /// More vertex layout elements were declared than a pipeline can hold.
    TooManyVertexElements {
        /// Number of declared elements.
        count: usize,
        /// Maximum number of elements.
        max: usize,
    },
    /// The backend failed to create the binding layout objects.
    LayoutCreationFailed(String),
    /// The backend failed to create the pipeline object.
    CompilationFailed {
        /// A descriptive label for the pipeline, if available.
        label: Option<String>,
        /// Detailed error message from the backend.
        details: String,
    },
    /// The pipeline state was already compiled and is immutable.
    AlreadyCompiled,
    /// A previous compilation failed; the pipeline state is unusable.
    Unusable,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::MissingShader { stage } => {
                write!(f, "No shader assigned to the {stage:?} stage")
            }
            PipelineError::MissingRenderPassPipelineState => {
                write!(f, "No render pass pipeline state assigned to the pipeline")
            }
            PipelineError::UnsupportedVertexFormat {
                index,
                semantic,
                format,
            } => write!(
                f,
                "Vertex element {index} ('{semantic}') uses unsupported format {format:?}"
            ),
            PipelineError::TooManyVertexElements { count, max } => {
                write!(f, "{count} vertex elements declared, at most {max} allowed")
            }
            PipelineError::LayoutCreationFailed(msg) => {
                write!(f, "Pipeline layout creation failed: {msg}")
            }
            PipelineError::CompilationFailed { label, details } => write!(
                f,
                "Pipeline compilation failed for '{}': {}",
                label.as_deref().unwrap_or("Unknown"),
                details
            ),
            PipelineError::AlreadyCompiled => {
                write!(f, "Pipeline state is already compiled and cannot be modified")
            }
            PipelineError::Unusable => {
                write!(f, "Pipeline state failed to compile and is unusable")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// An error related to the creation or use of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A shader-specific error occurred.
    Shader(ShaderError),
    /// A pipeline-specific error occurred.
    Pipeline(PipelineError),
    /// A resource was requested with a zero or otherwise invalid size.
    InvalidSize,
    /// An offscreen render pass was requested without any color texture.
    EmptyRenderPass,
    /// Render pass attachments do not agree on their shape or usage.
    AttachmentMismatch(String),
    /// The resource is already locked for CPU access.
    AlreadyLocked,
    /// An access was attempted outside of the resource bounds.
    OutOfBounds,
    /// An external resource could not be found.
    NotFound,
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "Shader resource error: {err}"),
            ResourceError::Pipeline(err) => write!(f, "Pipeline resource error: {err}"),
            ResourceError::InvalidSize => write!(f, "Invalid resource size."),
            ResourceError::EmptyRenderPass => {
                write!(f, "An offscreen render pass needs at least one color texture.")
            }
            ResourceError::AttachmentMismatch(msg) => {
                write!(f, "Render pass attachments mismatch: {msg}")
            }
            ResourceError::AlreadyLocked => write!(f, "Resource is already locked."),
            ResourceError::OutOfBounds => write!(f, "Resource access out of bounds."),
            ResourceError::NotFound => write!(f, "Resource not found."),
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            ResourceError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        ResourceError::Pipeline(err)
    }
}

/// An error raised by a [`CommandList`](super::CommandList) operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The operation requires an open recording session.
    NotRecording,
    /// `begin` was called while already recording.
    AlreadyRecording,
    /// The operation requires an open render pass.
    NotInRenderPass,
    /// A render pass was begun inside another render pass.
    NestedRenderPass,
    /// `end` was called while a render pass is still open.
    RenderPassStillOpen,
    /// A draw was issued without a vertex buffer.
    MissingVertexBuffer,
    /// A draw was issued without an index buffer.
    MissingIndexBuffer,
    /// A draw was issued without a pipeline state.
    MissingPipeline,
    /// The bound pipeline state was never successfully compiled.
    PipelineNotCompiled,
    /// The bound index buffer has a stride that maps to no index width.
    UnsupportedIndexStride {
        /// The rejected stride in bytes.
        stride: u32,
    },
    /// A texture was bound to a unit outside of the per-stage texture range.
    TextureUnitOutOfRange {
        /// The requested unit.
        unit: usize,
        /// Number of units per stage.
        max: usize,
    },
    /// `primitive_count` times the indices per primitive does not fit in 32 bits.
    IndexCountOverflow {
        /// The requested primitive count.
        primitive_count: u32,
    },
    /// A command list was submitted while still recording.
    StillRecording,
    /// A command list was submitted before it ever finished a recording session.
    NothingRecorded,
    /// The binding pool of the current swap slot reached its ceiling.
    BindingPoolExhausted {
        /// The configured ceiling.
        capacity: usize,
    },
    /// A backend resource needed during recording could not be created.
    Resource(ResourceError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NotRecording => write!(f, "Command list is not recording"),
            CommandError::AlreadyRecording => write!(f, "Command list is already recording"),
            CommandError::NotInRenderPass => write!(f, "No render pass is open"),
            CommandError::NestedRenderPass => {
                write!(f, "A render pass is already open; passes cannot be nested")
            }
            CommandError::RenderPassStillOpen => {
                write!(f, "Cannot end recording while a render pass is open")
            }
            CommandError::MissingVertexBuffer => write!(f, "No vertex buffer is bound"),
            CommandError::MissingIndexBuffer => write!(f, "No index buffer is bound"),
            CommandError::MissingPipeline => write!(f, "No pipeline state is bound"),
            CommandError::PipelineNotCompiled => {
                write!(f, "The bound pipeline state is not compiled")
            }
            CommandError::UnsupportedIndexStride { stride } => {
                write!(f, "Index stride of {stride} bytes is not supported (expected 2 or 4)")
            }
            CommandError::TextureUnitOutOfRange { unit, max } => {
                write!(f, "Texture unit {unit} is out of range (max {max})")
            }
            CommandError::IndexCountOverflow { primitive_count } => {
                write!(f, "Index count of {primitive_count} primitives overflows 32 bits")
            }
            CommandError::StillRecording => {
                write!(f, "Command list must end recording before it is executed")
            }
            CommandError::NothingRecorded => {
                write!(f, "Command list has never been recorded")
            }
            CommandError::BindingPoolExhausted { capacity } => {
                write!(f, "Binding pool exhausted after {capacity} binding groups")
            }
            CommandError::Resource(err) => write!(f, "Recording resource error: {err}"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Resource(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for CommandError {
    fn from(err: ResourceError) -> Self {
        CommandError::Resource(err)
    }
}

/// A high-level error that can occur at the device level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A failure occurred during the initialization of the graphics backend.
    InitializationFailed(String),
    /// An error occurred while managing a GPU resource.
    ResourceError(ResourceError),
    /// A command list was used incorrectly.
    CommandError(CommandError),
    /// The platform refused a submission.
    SubmissionFailed(String),
    /// The graphics device was lost.
    DeviceLost,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InitializationFailed(msg) => {
                write!(f, "Failed to initialize graphics backend: {msg}")
            }
            RenderError::ResourceError(err) => {
                write!(f, "Graphics resource operation failed: {err}")
            }
            RenderError::CommandError(err) => write!(f, "Command recording failed: {err}"),
            RenderError::SubmissionFailed(msg) => write!(f, "Submission failed: {msg}"),
            RenderError::DeviceLost => write!(
                f,
                "The graphics device was lost and needs to be reinitialized."
            ),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::ResourceError(err) => Some(err),
            RenderError::CommandError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::ResourceError(err)
    }
}

impl From<CommandError> for RenderError {
    fn from(err: CommandError) -> Self {
        RenderError::CommandError(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn pipeline_error_display() {
        let err = PipelineError::UnsupportedVertexFormat {
            index: 2,
            semantic: "NORMAL".to_string(),
            format: Format::D32Float,
        };
        assert_eq!(
            format!("{err}"),
            "Vertex element 2 ('NORMAL') uses unsupported format D32Float"
        );
        let err = PipelineError::CompilationFailed {
            label: None,
            details: "out of memory".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "Pipeline compilation failed for 'Unknown': out of memory"
        );
    }

    #[test]
    fn command_error_wraps_resource_error() {
        let err: CommandError = ResourceError::BackendError("pool".to_string()).into();
        assert_eq!(
            format!("{err}"),
            "Recording resource error: Backend-specific resource error: pool"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn render_error_chains_sources() {
        let res_err: ResourceError = ShaderError::EmptyBytecode.into();
        let render_err: RenderError = res_err.into();
        assert_eq!(
            format!("{render_err}"),
            "Graphics resource operation failed: Shader resource error: Shader bytecode is empty"
        );
        assert!(render_err.source().is_some());
        assert!(render_err.source().unwrap().source().is_some());
    }
}
