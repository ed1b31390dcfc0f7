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
use prism_core::renderer::api::enums::{
    BlendEquation, BlendFactor, CullingMode, DepthFunc, Format, IndexFormat, PrimitiveTopology,
    TextureMinMagFilter, TextureWrapMode,
};
use windows::Win32::Graphics::Direct3D::{
    D3D_PRIMITIVE_TOPOLOGY, D3D_PRIMITIVE_TOPOLOGY_LINELIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

/// Converts prism's types into their Direct3D 12 counterparts.
pub trait IntoD3d12<T> {
    fn into_d3d12(self) -> T;
}

impl IntoD3d12<DXGI_FORMAT> for Format {
    fn into_d3d12(self) -> DXGI_FORMAT {
        match self {
            Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
            Format::R8G8B8A8Uint => DXGI_FORMAT_R8G8B8A8_UINT,
            Format::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
            Format::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
            Format::R32Float => DXGI_FORMAT_R32_FLOAT,
            Format::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
            Format::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
            Format::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
            Format::D32Float => DXGI_FORMAT_D32_FLOAT,
            Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        }
    }
}

/// Maps a DXGI format reported by the application back to prism's format.
pub fn from_dxgi_format(format: DXGI_FORMAT) -> Option<Format> {
    Some(match format {
        DXGI_FORMAT_R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        DXGI_FORMAT_R8G8B8A8_UINT => Format::R8G8B8A8Uint,
        DXGI_FORMAT_B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
        DXGI_FORMAT_R16G16B16A16_FLOAT => Format::R16G16B16A16Float,
        DXGI_FORMAT_R32_FLOAT => Format::R32Float,
        DXGI_FORMAT_R32G32_FLOAT => Format::R32G32Float,
        DXGI_FORMAT_R32G32B32_FLOAT => Format::R32G32B32Float,
        DXGI_FORMAT_R32G32B32A32_FLOAT => Format::R32G32B32A32Float,
        DXGI_FORMAT_D32_FLOAT | DXGI_FORMAT_R32_TYPELESS => Format::D32Float,
        DXGI_FORMAT_D24_UNORM_S8_UINT | DXGI_FORMAT_R24G8_TYPELESS => Format::D24UnormS8Uint,
        _ => return None,
    })
}

/// The formats a texture is created and viewed with.
///
/// Depth textures are also sampled, so their resource is typeless and each view
/// picks a typed format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFormats {
    pub resource: DXGI_FORMAT,
    pub shader_resource: DXGI_FORMAT,
    pub attachment: DXGI_FORMAT,
}

pub fn texture_formats(format: Format) -> TextureFormats {
    match format {
        Format::D32Float => TextureFormats {
            resource: DXGI_FORMAT_R32_TYPELESS,
            shader_resource: DXGI_FORMAT_R32_FLOAT,
            attachment: DXGI_FORMAT_D32_FLOAT,
        },
        Format::D24UnormS8Uint => TextureFormats {
            resource: DXGI_FORMAT_R24G8_TYPELESS,
            shader_resource: DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
            attachment: DXGI_FORMAT_D24_UNORM_S8_UINT,
        },
        color => {
            let format = color.into_d3d12();
            TextureFormats {
                resource: format,
                shader_resource: format,
                attachment: format,
            }
        }
    }
}

impl IntoD3d12<DXGI_FORMAT> for IndexFormat {
    fn into_d3d12(self) -> DXGI_FORMAT {
        match self {
            IndexFormat::Uint16 => DXGI_FORMAT_R16_UINT,
            IndexFormat::Uint32 => DXGI_FORMAT_R32_UINT,
        }
    }
}

impl IntoD3d12<D3D_PRIMITIVE_TOPOLOGY> for PrimitiveTopology {
    fn into_d3d12(self) -> D3D_PRIMITIVE_TOPOLOGY {
        match self {
            PrimitiveTopology::Triangle => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
            PrimitiveTopology::Line => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        }
    }
}

impl IntoD3d12<D3D12_PRIMITIVE_TOPOLOGY_TYPE> for PrimitiveTopology {
    fn into_d3d12(self) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
        match self {
            PrimitiveTopology::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            PrimitiveTopology::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        }
    }
}

/// Front faces are counter-clockwise, so culling clockwise faces culls back faces.
impl IntoD3d12<D3D12_CULL_MODE> for CullingMode {
    fn into_d3d12(self) -> D3D12_CULL_MODE {
        match self {
            CullingMode::Clockwise => D3D12_CULL_MODE_BACK,
            CullingMode::CounterClockwise => D3D12_CULL_MODE_FRONT,
            CullingMode::DoubleSide => D3D12_CULL_MODE_NONE,
        }
    }
}

impl IntoD3d12<D3D12_BLEND> for BlendFactor {
    fn into_d3d12(self) -> D3D12_BLEND {
        match self {
            BlendFactor::Zero => D3D12_BLEND_ZERO,
            BlendFactor::One => D3D12_BLEND_ONE,
            BlendFactor::SrcColor => D3D12_BLEND_SRC_COLOR,
            BlendFactor::OneMinusSrcColor => D3D12_BLEND_INV_SRC_COLOR,
            BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
            BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
            BlendFactor::OneMinusDstAlpha => D3D12_BLEND_INV_DEST_ALPHA,
            BlendFactor::DstColor => D3D12_BLEND_DEST_COLOR,
            BlendFactor::OneMinusDstColor => D3D12_BLEND_INV_DEST_COLOR,
        }
    }
}

impl IntoD3d12<D3D12_BLEND_OP> for BlendEquation {
    fn into_d3d12(self) -> D3D12_BLEND_OP {
        match self {
            BlendEquation::Add => D3D12_BLEND_OP_ADD,
            BlendEquation::Sub => D3D12_BLEND_OP_SUBTRACT,
            BlendEquation::ReverseSub => D3D12_BLEND_OP_REV_SUBTRACT,
            BlendEquation::Min => D3D12_BLEND_OP_MIN,
            BlendEquation::Max => D3D12_BLEND_OP_MAX,
        }
    }
}

impl IntoD3d12<D3D12_COMPARISON_FUNC> for DepthFunc {
    fn into_d3d12(self) -> D3D12_COMPARISON_FUNC {
        match self {
            DepthFunc::Never => D3D12_COMPARISON_FUNC_NEVER,
            DepthFunc::Less => D3D12_COMPARISON_FUNC_LESS,
            DepthFunc::Equal => D3D12_COMPARISON_FUNC_EQUAL,
            DepthFunc::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
            DepthFunc::Greater => D3D12_COMPARISON_FUNC_GREATER,
            DepthFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
            DepthFunc::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
            DepthFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
        }
    }
}

impl IntoD3d12<D3D12_TEXTURE_ADDRESS_MODE> for TextureWrapMode {
    fn into_d3d12(self) -> D3D12_TEXTURE_ADDRESS_MODE {
        match self {
            TextureWrapMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            TextureWrapMode::Repeat => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        }
    }
}

impl IntoD3d12<D3D12_FILTER> for TextureMinMagFilter {
    fn into_d3d12(self) -> D3D12_FILTER {
        match self {
            TextureMinMagFilter::Nearest => D3D12_FILTER_MIN_MAG_MIP_POINT,
            TextureMinMagFilter::Linear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        }
    }
}

/// The sampler descriptor of one texture unit.
pub fn sampler_desc(wrap: TextureWrapMode, filter: TextureMinMagFilter) -> D3D12_SAMPLER_DESC {
    let address = wrap.into_d3d12();
    D3D12_SAMPLER_DESC {
        Filter: filter.into_d3d12(),
        AddressU: address,
        AddressV: address,
        AddressW: address,
        MipLODBias: 0.0,
        MaxAnisotropy: 1,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        BorderColor: [0.0; 4],
        MinLOD: 0.0,
        MaxLOD: f32::MAX,
    }
}

/// The value a color attachment is cleared with. Integer targets convert the
/// floats to integers, so they receive the raw bytes.
pub fn clear_color(format: Format, color: Color8) -> [f32; 4] {
    match format {
        Format::R8G8B8A8Uint => [
            f32::from(color.r),
            f32::from(color.g),
            f32::from(color.b),
            f32::from(color.a),
        ],
        _ => color.to_f32_array(),
    }
}

/// Splits an HLSL semantic such as `TEXCOORD1` into its name and index.
pub fn split_semantic(semantic: &str) -> (&str, u32) {
    let name = semantic.trim_end_matches(|c: char| c.is_ascii_digit());
    let index = semantic[name.len()..].parse().unwrap_or(0);
    (name, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_textures_are_typeless_with_typed_views() {
        let formats = texture_formats(Format::D24UnormS8Uint);
        assert_eq!(formats.resource, DXGI_FORMAT_R24G8_TYPELESS);
        assert_eq!(formats.shader_resource, DXGI_FORMAT_R24_UNORM_X8_TYPELESS);
        assert_eq!(formats.attachment, DXGI_FORMAT_D24_UNORM_S8_UINT);
        assert_eq!(from_dxgi_format(formats.resource), Some(Format::D24UnormS8Uint));

        let color = texture_formats(Format::R8G8B8A8Unorm);
        assert_eq!(color.resource, color.attachment);
    }

    #[test]
    fn index_formats_are_not_texture_formats() {
        assert_eq!(from_dxgi_format(IndexFormat::Uint16.into_d3d12()), None);
    }

    #[test]
    fn semantic_index_is_split_from_the_name() {
        assert_eq!(split_semantic("POSITION"), ("POSITION", 0));
        assert_eq!(split_semantic("TEXCOORD1"), ("TEXCOORD", 1));
        assert_eq!(split_semantic("COLOR12"), ("COLOR", 12));
    }

    #[test]
    fn integer_targets_clear_with_raw_bytes() {
        assert_eq!(clear_color(Format::R8G8B8A8Uint, Color8::new(1, 2, 3, 255)), [1.0, 2.0, 3.0, 255.0]);
        assert_eq!(clear_color(Format::R8G8B8A8Unorm, Color8::WHITE), [1.0; 4]);
    }
}
