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

//! Backend-agnostic enumerations used to describe pipelines, resources and bindings.
//!
//! Every backend translates these through its own fixed lookup table, so adding a
//! variant here means adding an arm to each backend's conversions.

use serde::{Deserialize, Serialize};

/// The programmable stages a pipeline can bind resources to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderStage {
    /// The vertex shader stage.
    Vertex,
    /// The pixel (fragment) shader stage.
    Pixel,
}

impl ShaderStage {
    /// Number of stages.
    pub const COUNT: usize = 2;
    /// All stages, in binding order.
    pub const ALL: [ShaderStage; Self::COUNT] = [ShaderStage::Vertex, ShaderStage::Pixel];

    /// Returns the binding-order index of the stage.
    pub const fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Pixel => 1,
        }
    }
}

/// Pixel and vertex attribute formats.
///
/// Only a subset can appear in a vertex layout; see [`Format::vertex_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Four 8-bit normalized unsigned channels.
    R8G8B8A8Unorm,
    /// Four 8-bit unsigned integer channels.
    R8G8B8A8Uint,
    /// Four 8-bit normalized channels in BGRA order (common swap-chain format).
    B8G8R8A8Unorm,
    /// Four 16-bit float channels.
    R16G16B16A16Float,
    /// One 32-bit float channel.
    R32Float,
    /// Two 32-bit float channels.
    R32G32Float,
    /// Three 32-bit float channels.
    R32G32B32Float,
    /// Four 32-bit float channels.
    R32G32B32A32Float,
    /// 32-bit float depth.
    D32Float,
    /// 24-bit depth with 8-bit stencil.
    D24UnormS8Uint,
}

impl Format {
    /// Size in bytes of one vertex attribute of this format, or `None` when the
    /// format is not accepted in a vertex layout.
    pub const fn vertex_size(self) -> Option<u32> {
        match self {
            Format::R32G32Float => Some(8),
            Format::R32G32B32Float => Some(12),
            Format::R32G32B32A32Float => Some(16),
            Format::R8G8B8A8Unorm => Some(4),
            Format::R8G8B8A8Uint => Some(4),
            _ => None,
        }
    }

    /// Size in bytes of one texel.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::R8G8B8A8Unorm
            | Format::R8G8B8A8Uint
            | Format::B8G8R8A8Unorm
            | Format::R32Float
            | Format::D32Float
            | Format::D24UnormS8Uint => 4,
            Format::R16G16B16A16Float | Format::R32G32Float => 8,
            Format::R32G32B32Float => 12,
            Format::R32G32B32A32Float => 16,
        }
    }

    /// Returns `true` for depth(/stencil) formats.
    pub const fn is_depth(self) -> bool {
        matches!(self, Format::D32Float | Format::D24UnormS8Uint)
    }
}

/// How vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    /// Every three indices form a triangle.
    #[default]
    Triangle,
    /// Every two indices form a line.
    Line,
}

impl PrimitiveTopology {
    /// Number of indices consumed by one primitive.
    pub const fn indices_per_primitive(self) -> u32 {
        match self {
            PrimitiveTopology::Triangle => 3,
            PrimitiveTopology::Line => 2,
        }
    }
}

/// Which triangles are discarded, named after the winding that gets culled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CullingMode {
    /// Clockwise triangles are culled.
    #[default]
    Clockwise,
    /// Counter-clockwise triangles are culled.
    CounterClockwise,
    /// Nothing is culled.
    DoubleSide,
}

/// A factor in a blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendFactor {
    /// `0`
    Zero,
    /// `1`
    One,
    /// Source color.
    SrcColor,
    /// `1 - src.rgb`
    OneMinusSrcColor,
    /// Source alpha.
    SrcAlpha,
    /// `1 - src.a`
    OneMinusSrcAlpha,
    /// Destination color.
    DstColor,
    /// `1 - dst.rgb`
    OneMinusDstColor,
    /// Destination alpha.
    DstAlpha,
    /// `1 - dst.a`
    OneMinusDstAlpha,
}

/// The operation combining the weighted source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendEquation {
    /// `src + dst`
    #[default]
    Add,
    /// `src - dst`
    Sub,
    /// `dst - src`
    ReverseSub,
    /// `min(src, dst)`
    Min,
    /// `max(src, dst)`
    Max,
}

/// The comparison used by the depth test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DepthFunc {
    /// Never passes.
    Never,
    /// Passes if the new depth is less than the stored one.
    #[default]
    Less,
    /// Passes if equal.
    Equal,
    /// Passes if less or equal.
    LessEqual,
    /// Passes if greater.
    Greater,
    /// Passes if not equal.
    NotEqual,
    /// Passes if greater or equal.
    GreaterEqual,
    /// Always passes.
    Always,
}

/// The width of indices in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit unsigned indices.
    Uint16,
    /// 32-bit unsigned indices.
    Uint32,
}

impl IndexFormat {
    /// Maps an element stride to an index width. Only 2 and 4 bytes are valid.
    pub const fn from_stride(stride: u32) -> Option<Self> {
        match stride {
            2 => Some(IndexFormat::Uint16),
            4 => Some(IndexFormat::Uint32),
            _ => None,
        }
    }

    /// Size of one index in bytes.
    pub const fn size(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Addressing outside of `[0, 1]` texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureWrapMode {
    /// Coordinates are clamped to the edge.
    #[default]
    Clamp,
    /// Coordinates wrap around.
    Repeat,
}

/// Minification and magnification filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureMinMagFilter {
    /// Nearest texel.
    Nearest,
    /// Bilinear filtering.
    #[default]
    Linear,
}

/// A usage hint for constant buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConstantBufferType {
    /// Lives across many frames.
    #[default]
    LongTime,
    /// Rewritten every frame; backends may place it in upload memory.
    ShortTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_sizes_follow_layout_table() {
        assert_eq!(Format::R32G32Float.vertex_size(), Some(8));
        assert_eq!(Format::R32G32B32Float.vertex_size(), Some(12));
        assert_eq!(Format::R32G32B32A32Float.vertex_size(), Some(16));
        assert_eq!(Format::R8G8B8A8Unorm.vertex_size(), Some(4));
        assert_eq!(Format::R8G8B8A8Uint.vertex_size(), Some(4));
        assert_eq!(Format::R32Float.vertex_size(), None);
        assert_eq!(Format::D32Float.vertex_size(), None);
    }

    #[test]
    fn index_format_from_stride() {
        assert_eq!(IndexFormat::from_stride(2), Some(IndexFormat::Uint16));
        assert_eq!(IndexFormat::from_stride(4), Some(IndexFormat::Uint32));
        assert_eq!(IndexFormat::from_stride(1), None);
        assert_eq!(IndexFormat::from_stride(8), None);
    }

    #[test]
    fn stage_indices_are_dense() {
        for (i, stage) in ShaderStage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }
}
