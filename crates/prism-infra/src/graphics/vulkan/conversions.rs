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

use ash::vk;
use prism_core::renderer::api::enums::{
    BlendEquation, BlendFactor, CullingMode, DepthFunc, Format, IndexFormat, PrimitiveTopology,
    ShaderStage, TextureMinMagFilter, TextureWrapMode,
};

/// A local extension trait to convert prism's types into their Vulkan counterparts.
/// This avoids Rust's orphan rules while keeping an idiomatic `.into_vk()` syntax.
pub trait IntoVk<T> {
    /// Consumes self and converts it into a Vulkan-compatible type.
    fn into_vk(self) -> T;
}

impl IntoVk<vk::Format> for Format {
    fn into_vk(self) -> vk::Format {
        match self {
            Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::R8G8B8A8Uint => vk::Format::R8G8B8A8_UINT,
            Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::R32G32Float => vk::Format::R32G32_SFLOAT,
            Format::R32G32B32Float => vk::Format::R32G32B32_SFLOAT,
            Format::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::D32Float => vk::Format::D32_SFLOAT,
            Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        }
    }
}

/// Maps a Vulkan format back to prism's format, if prism knows it.
pub fn from_vk_format(format: vk::Format) -> Option<Format> {
    Some(match format {
        vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        vk::Format::R8G8B8A8_UINT => Format::R8G8B8A8Uint,
        vk::Format::B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::R16G16B16A16Float,
        vk::Format::R32_SFLOAT => Format::R32Float,
        vk::Format::R32G32_SFLOAT => Format::R32G32Float,
        vk::Format::R32G32B32_SFLOAT => Format::R32G32B32Float,
        vk::Format::R32G32B32A32_SFLOAT => Format::R32G32B32A32Float,
        vk::Format::D32_SFLOAT => Format::D32Float,
        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        _ => return None,
    })
}

/// The aspects a layout transition of `format` must name.
pub fn barrier_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT => vk::ImageAspectFlags::DEPTH,
        vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// The single aspect an image view of `format` exposes.
pub fn view_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

impl IntoVk<vk::PrimitiveTopology> for PrimitiveTopology {
    fn into_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::Line => vk::PrimitiveTopology::LINE_LIST,
        }
    }
}

// Front faces are counter-clockwise; "clockwise" culling removes back faces.
impl IntoVk<vk::CullModeFlags> for CullingMode {
    fn into_vk(self) -> vk::CullModeFlags {
        match self {
            CullingMode::Clockwise => vk::CullModeFlags::BACK,
            CullingMode::CounterClockwise => vk::CullModeFlags::FRONT,
            CullingMode::DoubleSide => vk::CullModeFlags::NONE,
        }
    }
}

impl IntoVk<vk::BlendFactor> for BlendFactor {
    fn into_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        }
    }
}

impl IntoVk<vk::BlendOp> for BlendEquation {
    fn into_vk(self) -> vk::BlendOp {
        match self {
            BlendEquation::Add => vk::BlendOp::ADD,
            BlendEquation::Sub => vk::BlendOp::SUBTRACT,
            BlendEquation::ReverseSub => vk::BlendOp::REVERSE_SUBTRACT,
            BlendEquation::Min => vk::BlendOp::MIN,
            BlendEquation::Max => vk::BlendOp::MAX,
        }
    }
}

impl IntoVk<vk::CompareOp> for DepthFunc {
    fn into_vk(self) -> vk::CompareOp {
        match self {
            DepthFunc::Never => vk::CompareOp::NEVER,
            DepthFunc::Less => vk::CompareOp::LESS,
            DepthFunc::Equal => vk::CompareOp::EQUAL,
            DepthFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
            DepthFunc::Greater => vk::CompareOp::GREATER,
            DepthFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
            DepthFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
            DepthFunc::Always => vk::CompareOp::ALWAYS,
        }
    }
}

impl IntoVk<vk::IndexType> for IndexFormat {
    fn into_vk(self) -> vk::IndexType {
        match self {
            IndexFormat::Uint16 => vk::IndexType::UINT16,
            IndexFormat::Uint32 => vk::IndexType::UINT32,
        }
    }
}

impl IntoVk<vk::SamplerAddressMode> for TextureWrapMode {
    fn into_vk(self) -> vk::SamplerAddressMode {
        match self {
            TextureWrapMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            TextureWrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        }
    }
}

impl IntoVk<vk::Filter> for TextureMinMagFilter {
    fn into_vk(self) -> vk::Filter {
        match self {
            TextureMinMagFilter::Nearest => vk::Filter::NEAREST,
            TextureMinMagFilter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl IntoVk<vk::ShaderStageFlags> for ShaderStage {
    fn into_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_maps_back_to_itself() {
        let formats = [
            Format::R8G8B8A8Unorm,
            Format::R8G8B8A8Uint,
            Format::B8G8R8A8Unorm,
            Format::R16G16B16A16Float,
            Format::R32Float,
            Format::R32G32Float,
            Format::R32G32B32Float,
            Format::R32G32B32A32Float,
            Format::D32Float,
            Format::D24UnormS8Uint,
        ];
        for format in formats {
            assert_eq!(from_vk_format(format.into_vk()), Some(format));
        }
        assert_eq!(from_vk_format(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }

    #[test]
    fn clockwise_culling_removes_back_faces() {
        let cull: vk::CullModeFlags = CullingMode::Clockwise.into_vk();
        assert_eq!(cull, vk::CullModeFlags::BACK);
        let cull: vk::CullModeFlags = CullingMode::DoubleSide.into_vk();
        assert_eq!(cull, vk::CullModeFlags::NONE);
    }

    #[test]
    fn stencil_formats_transition_both_aspects_but_view_depth_only() {
        assert_eq!(
            barrier_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(view_aspect(vk::Format::D24_UNORM_S8_UINT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(barrier_aspect(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn pixel_stage_is_the_fragment_stage() {
        let stage: vk::ShaderStageFlags = ShaderStage::Pixel.into_vk();
        assert_eq!(stage, vk::ShaderStageFlags::FRAGMENT);
        let op: vk::CompareOp = DepthFunc::LessEqual.into_vk();
        assert_eq!(op, vk::CompareOp::LESS_OR_EQUAL);
    }
}
