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

#![cfg(all(windows, feature = "dx12"))]

mod common;

use common::{
    assert_filled, clear, device, offscreen_pass, or_skip, pattern, render_target,
    sampled_texture, target_bytes,
};
use prism_core::math::{Color8, Extent2D};
use prism_core::renderer::{
    Backend, CommandError, Device, Format, RenderError, ResourceError, ShaderError,
    TextureDescriptor, TextureUsage,
};
use prism_infra::graphics::dx12::{Dx12Backend, Dx12Context, DXBC_MAGIC};

fn dx12() -> Option<Device<Dx12Backend>> {
    let backend = Dx12Context::headless()
        .map_err(|e| format!("{e:#}"))
        .and_then(|context| Dx12Backend::headless(context, 2).map_err(|e| e.to_string()));
    or_skip(backend, "Direct3D 12").map(device)
}

#[test]
fn buffers_round_trip_through_the_upload_heap() {
    let Some(device) = dx12() else { return };
    let buffer = device.create_vertex_buffer(64).unwrap();
    buffer.write_slice(8, &[0xDEAD_BEEFu32, 7]).unwrap();

    let lock = buffer.lock_range(8, 8).unwrap();
    assert_eq!(&lock[..4], 0xDEAD_BEEFu32.to_le_bytes());
    assert_eq!(&lock[4..], 7u32.to_le_bytes());
}

#[test]
fn textures_with_unaligned_rows_upload_and_read_back() {
    let Some(device) = dx12() else { return };
    // 5 texels make a 20-byte row, well below the 256-byte copy pitch.
    let extent = Extent2D::new(5, 3);
    let texture = sampled_texture(&device, extent);
    let pixels = pattern(extent);
    texture.write(&pixels).unwrap();

    let mut out = vec![0u8; pixels.len()];
    device.backend().read_texture(texture.raw(), &mut out).unwrap();
    assert_eq!(out, pixels);
}

#[test]
fn shaders_must_be_dxbc_containers() {
    let Some(device) = dx12() else { return };
    assert!(matches!(
        device.create_shader(&[0x03, 0x02, 0x23, 0x07]),
        Err(ShaderError::CreationFailed { .. })
    ));
    let mut container = DXBC_MAGIC.to_vec();
    container.extend_from_slice(&[0; 28]);
    assert!(device.create_shader(&container).is_ok());
}

#[test]
fn offscreen_clear_fills_the_target() {
    let Some(device) = dx12() else { return };
    let target = render_target(&device, Format::R8G8B8A8Unorm);
    let color = Color8::new(32, 64, 128, 255);
    clear(&device, &offscreen_pass(&device, &target, Some(color)));

    let mut out = target_bytes();
    device.backend().read_texture(target.raw(), &mut out).unwrap();
    assert_filled(&out, color);
}

#[test]
fn integer_targets_clear_to_the_raw_bytes() {
    let Some(device) = dx12() else { return };
    let target = render_target(&device, Format::R8G8B8A8Uint);
    let color = Color8::new(3, 100, 200, 255);
    clear(&device, &offscreen_pass(&device, &target, Some(color)));

    let mut out = target_bytes();
    device.backend().read_texture(target.raw(), &mut out).unwrap();
    assert_filled(&out, color);
}

#[test]
fn depth_targets_pair_with_a_color_target() {
    let Some(device) = dx12() else { return };
    let depth_format = device.backend().depth_format();
    let depth = device
        .create_texture(TextureDescriptor {
            extent: common::TARGET_EXTENT,
            format: depth_format,
            usage: TextureUsage::DEPTH_STENCIL,
        })
        .unwrap();
    let color = render_target(&device, Format::R8G8B8A8Unorm);
    let mut pass = device.create_render_pass(&[color.clone()], Some(depth)).unwrap();
    pass.set_is_color_cleared(true);
    pass.set_is_depth_cleared(true);
    clear(&device, &std::sync::Arc::new(pass));
}

#[test]
fn registered_resources_import_as_external_textures() {
    let Some(device) = dx12() else { return };
    let source = render_target(&device, Format::R8G8B8A8Unorm);
    device
        .backend()
        .register_external_texture(42, source.raw().resource().clone());

    let imported = device.import_texture(42).unwrap();
    assert_eq!(imported.size(), common::TARGET_EXTENT);
    assert_eq!(imported.format(), Format::R8G8B8A8Unorm);
    assert!(imported.usage().contains(TextureUsage::EXTERNAL | TextureUsage::RENDER_TARGET));
    assert!(matches!(device.import_texture(43), Err(ResourceError::NotFound)));
}

#[test]
fn lists_must_be_ended_before_they_execute() {
    let Some(device) = dx12() else { return };
    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    assert!(matches!(
        device.execute(&list),
        Err(RenderError::CommandError(CommandError::StillRecording))
    ));
    list.end().unwrap();
    device.execute(&list).unwrap();
    device.wait_idle();
}

#[test]
fn headless_backends_have_no_screen() {
    let Some(device) = dx12() else { return };
    assert!(device.backend().present().is_err());
    assert_eq!(device.backend().screen_target().extent, Extent2D::new(0, 0));
}
