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

use prism_core::math::Color8;
use prism_core::renderer::{
    BlendEquation, BlendFactor, CullingMode, DepthFunc, Format, IndexFormat,
    PrimitiveTopology, TextureMinMagFilter, TextureWrapMode,
};
use objc2_metal::{
    MTLBlendFactor, MTLBlendOperation, MTLClearColor, MTLCompareFunction, MTLCullMode,
    MTLIndexType, MTLPixelFormat, MTLPrimitiveTopologyClass, MTLPrimitiveType,
    MTLSamplerAddressMode, MTLSamplerMinMagFilter, MTLVertexFormat,
};

/// Converts prism's types into their Metal counterparts.
pub trait IntoMtl<T> {
    fn into_mtl(self) -> T;
}

/// The pixel format a texture of `format` is created with.
///
/// Metal has no three-channel 32-bit pixel format, and on macOS only `Depth32Float_Stencil8`
/// is guaranteed for a packed depth-stencil target.
pub fn mtl_pixel_format(format: Format) -> Option<MTLPixelFormat> {
    Some(match format {
        Format::R8G8B8A8Unorm => MTLPixelFormat::RGBA8Unorm,
        Format::R8G8B8A8Uint => MTLPixelFormat::RGBA8Uint,
        Format::B8G8R8A8Unorm => MTLPixelFormat::BGRA8Unorm,
        Format::R16G16B16A16Float => MTLPixelFormat::RGBA16Float,
        Format::R32Float => MTLPixelFormat::R32Float,
        Format::R32G32Float => MTLPixelFormat::RG32Float,
        Format::R32G32B32A32Float => MTLPixelFormat::RGBA32Float,
        Format::D32Float => MTLPixelFormat::Depth32Float,
        Format::D24UnormS8Uint => MTLPixelFormat::Depth32Float_Stencil8,
        Format::R32G32B32Float => return None,
    })
}

pub fn from_mtl_pixel_format(format: MTLPixelFormat) -> Option<Format> {
    Some(match format {
        MTLPixelFormat::RGBA8Unorm => Format::R8G8B8A8Unorm,
        MTLPixelFormat::RGBA8Uint => Format::R8G8B8A8Uint,
        MTLPixelFormat::BGRA8Unorm => Format::B8G8R8A8Unorm,
        MTLPixelFormat::RGBA16Float => Format::R16G16B16A16Float,
        MTLPixelFormat::R32Float => Format::R32Float,
        MTLPixelFormat::RG32Float => Format::R32G32Float,
        MTLPixelFormat::RGBA32Float => Format::R32G32B32A32Float,
        MTLPixelFormat::Depth32Float => Format::D32Float,
        MTLPixelFormat::Depth32Float_Stencil8 | MTLPixelFormat::Depth24Unorm_Stencil8 => {
            Format::D24UnormS8Uint
        }
        _ => return None,
    })
}

/// `true` when the depth attachment of `format` carries a stencil plane too.
pub fn has_stencil(format: MTLPixelFormat) -> bool {
    format == MTLPixelFormat::Depth32Float_Stencil8 || format == MTLPixelFormat::Depth24Unorm_Stencil8
}

/// Vertex attributes use their own format enum in Metal; only vertex formats map.
pub fn mtl_vertex_format(format: Format) -> Option<MTLVertexFormat> {
    match format {
        Format::R32Float => Some(MTLVertexFormat::Float),
        Format::R32G32Float => Some(MTLVertexFormat::Float2),
        Format::R32G32B32Float => Some(MTLVertexFormat::Float3),
        Format::R32G32B32A32Float => Some(MTLVertexFormat::Float4),
        Format::R8G8B8A8Unorm => Some(MTLVertexFormat::UChar4Normalized),
        Format::R8G8B8A8Uint => Some(MTLVertexFormat::UChar4),
        _ => None,
    }
}

/// Integer targets take the raw byte values, everything else normalized channels.
pub fn clear_color(format: Format, color: Color8) -> MTLClearColor {
    let [red, green, blue, alpha] = match format {
        Format::R8G8B8A8Uint => [color.r, color.g, color.b, color.a].map(f64::from),
        _ => color.to_f32_array().map(f64::from),
    };
    MTLClearColor {
        red,
        green,
        blue,
        alpha,
    }
}

impl IntoMtl<MTLPrimitiveType> for PrimitiveTopology {
    fn into_mtl(self) -> MTLPrimitiveType {
        match self {
            PrimitiveTopology::Triangle => MTLPrimitiveType::Triangle,
            PrimitiveTopology::Line => MTLPrimitiveType::Line,
        }
    }
}

impl IntoMtl<MTLPrimitiveTopologyClass> for PrimitiveTopology {
    fn into_mtl(self) -> MTLPrimitiveTopologyClass {
        match self {
            PrimitiveTopology::Triangle => MTLPrimitiveTopologyClass::Triangle,
            PrimitiveTopology::Line => MTLPrimitiveTopologyClass::Line,
        }
    }
}

impl IntoMtl<MTLCullMode> for CullingMode {
    fn into_mtl(self) -> MTLCullMode {
        match self {
            CullingMode::Clockwise => MTLCullMode::Back,
            CullingMode::CounterClockwise => MTLCullMode::Front,
            CullingMode::DoubleSide => MTLCullMode::None,
        }
    }
}

impl IntoMtl<MTLBlendFactor> for BlendFactor {
    fn into_mtl(self) -> MTLBlendFactor {
        match self {
            BlendFactor::Zero => MTLBlendFactor::Zero,
            BlendFactor::One => MTLBlendFactor::One,
            BlendFactor::SrcColor => MTLBlendFactor::SourceColor,
            BlendFactor::OneMinusSrcColor => MTLBlendFactor::OneMinusSourceColor,
            BlendFactor::SrcAlpha => MTLBlendFactor::SourceAlpha,
            BlendFactor::OneMinusSrcAlpha => MTLBlendFactor::OneMinusSourceAlpha,
            BlendFactor::DstColor => MTLBlendFactor::DestinationColor,
            BlendFactor::OneMinusDstColor => MTLBlendFactor::OneMinusDestinationColor,
            BlendFactor::DstAlpha => MTLBlendFactor::DestinationAlpha,
            BlendFactor::OneMinusDstAlpha => MTLBlendFactor::OneMinusDestinationAlpha,
        }
    }
}

impl IntoMtl<MTLBlendOperation> for BlendEquation {
    fn into_mtl(self) -> MTLBlendOperation {
        match self {
            BlendEquation::Add => MTLBlendOperation::Add,
            BlendEquation::Sub => MTLBlendOperation::Subtract,
            BlendEquation::ReverseSub => MTLBlendOperation::ReverseSubtract,
            BlendEquation::Min => MTLBlendOperation::Min,
            BlendEquation::Max => MTLBlendOperation::Max,
        }
    }
}

impl IntoMtl<MTLCompareFunction> for DepthFunc {
    fn into_mtl(self) -> MTLCompareFunction {
        match self {
            DepthFunc::Never => MTLCompareFunction::Never,
            DepthFunc::Less => MTLCompareFunction::Less,
            DepthFunc::Equal => MTLCompareFunction::Equal,
            DepthFunc::LessEqual => MTLCompareFunction::LessEqual,
            DepthFunc::Greater => MTLCompareFunction::Greater,
            DepthFunc::NotEqual => MTLCompareFunction::NotEqual,
            DepthFunc::GreaterEqual => MTLCompareFunction::GreaterEqual,
            DepthFunc::Always => MTLCompareFunction::Always,
        }
    }
}

impl IntoMtl<MTLIndexType> for IndexFormat {
    fn into_mtl(self) -> MTLIndexType {
        match self {
            IndexFormat::Uint16 => MTLIndexType::UInt16,
            IndexFormat::Uint32 => MTLIndexType::UInt32,
        }
    }
}

impl IntoMtl<MTLSamplerAddressMode> for TextureWrapMode {
    fn into_mtl(self) -> MTLSamplerAddressMode {
        match self {
            TextureWrapMode::Clamp => MTLSamplerAddressMode::ClampToEdge,
            TextureWrapMode::Repeat => MTLSamplerAddressMode::Repeat,
        }
    }
}

impl IntoMtl<MTLSamplerMinMagFilter> for TextureMinMagFilter {
    fn into_mtl(self) -> MTLSamplerMinMagFilter {
        match self {
            TextureMinMagFilter::Nearest => MTLSamplerMinMagFilter::Nearest,
            TextureMinMagFilter::Linear => MTLSamplerMinMagFilter::Linear,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXTURE_FORMATS: [Format; 9] = [
        Format::R8G8B8A8Unorm,
        Format::R8G8B8A8Uint,
        Format::B8G8R8A8Unorm,
        Format::R16G16B16A16Float,
        Format::R32Float,
        Format::R32G32Float,
        Format::R32G32B32A32Float,
        Format::D32Float,
        Format::D24UnormS8Uint,
    ];

    #[test]
    fn texture_formats_survive_the_pixel_format_mapping() {
        for format in TEXTURE_FORMATS {
            let pixel_format = mtl_pixel_format(format).expect("texture format");
            assert_eq!(from_mtl_pixel_format(pixel_format), Some(format));
        }
        assert_eq!(mtl_pixel_format(Format::R32G32B32Float), None);
    }

    #[test]
    fn only_packed_depth_formats_carry_stencil() {
        assert!(has_stencil(MTLPixelFormat::Depth32Float_Stencil8));
        assert!(!has_stencil(MTLPixelFormat::Depth32Float));
    }

    #[test]
    fn integer_targets_clear_with_raw_bytes() {
        let color = Color8::new(255, 128, 0, 255);
        let raw = clear_color(Format::R8G8B8A8Uint, color);
        assert_eq!((raw.red, raw.green, raw.alpha), (255.0, 128.0, 255.0));
        let normalized = clear_color(Format::R8G8B8A8Unorm, color);
        assert_eq!((normalized.red, normalized.blue, normalized.alpha), (1.0, 0.0, 1.0));
    }

    #[test]
    fn clockwise_culling_drops_back_faces() {
        let cull: MTLCullMode = CullingMode::Clockwise.into_mtl();
        assert_eq!(cull, MTLCullMode::Back);
        let none: MTLCullMode = CullingMode::DoubleSide.into_mtl();
        assert_eq!(none, MTLCullMode::None);
    }
}
