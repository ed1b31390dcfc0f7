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

#![cfg(feature = "vulkan")]

mod common;

use common::{
    assert_filled, clear, device, offscreen_pass, or_skip, pattern, record_two_draws,
    render_target, sampled_texture, scene, target_bytes,
};
use prism_core::math::{Color8, Extent2D};
use prism_core::renderer::{
    CommandError, Device, Format, RenderError, ResourceError, ShaderError, ShaderStage,
    TextureMinMagFilter, TextureWrapMode,
};
use prism_infra::graphics::vulkan::{VulkanBackend, VulkanContext};

/// An empty vertex shader: `void main() {}`.
const VERTEX_SPIRV: &[u32] = &[
    0x0723_0203, 0x0001_0000, 0, 5, 0,
    (2 << 16) | 17, 1,
    (3 << 16) | 14, 0, 1,
    (5 << 16) | 15, 0, 1, 0x6E69_616D, 0,
    (2 << 16) | 19, 2,
    (3 << 16) | 33, 3, 2,
    (5 << 16) | 54, 2, 1, 0, 3,
    (2 << 16) | 248, 4,
    (1 << 16) | 253,
    (1 << 16) | 56,
];

/// An empty fragment shader with an upper-left origin.
const PIXEL_SPIRV: &[u32] = &[
    0x0723_0203, 0x0001_0000, 0, 5, 0,
    (2 << 16) | 17, 1,
    (3 << 16) | 14, 0, 1,
    (5 << 16) | 15, 4, 1, 0x6E69_616D, 0,
    (3 << 16) | 16, 1, 7,
    (2 << 16) | 19, 2,
    (3 << 16) | 33, 3, 2,
    (5 << 16) | 54, 2, 1, 0, 3,
    (2 << 16) | 248, 4,
    (1 << 16) | 253,
    (1 << 16) | 56,
];

fn spirv(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn vulkan() -> Option<Device<VulkanBackend>> {
    let backend = VulkanContext::headless()
        .map_err(|e| format!("{e:#}"))
        .and_then(|context| VulkanBackend::headless(context, 2).map_err(|e| e.to_string()));
    or_skip(backend, "Vulkan").map(device)
}

#[test]
fn buffers_round_trip_through_host_memory() {
    let Some(device) = vulkan() else { return };
    let buffer = device.create_vertex_buffer(64).unwrap();
    buffer.write_slice(16, &[1u32, 2, 3, 4]).unwrap();

    let lock = buffer.lock_range(16, 16).unwrap();
    assert_eq!(&lock[..], spirv(&[1, 2, 3, 4]).as_slice());
}

#[test]
fn textures_upload_and_read_back() {
    let Some(device) = vulkan() else { return };
    let extent = Extent2D::new(5, 3);
    let texture = sampled_texture(&device, extent);
    let pixels = pattern(extent);
    texture.write(&pixels).unwrap();

    let mut out = vec![0u8; pixels.len()];
    device.backend().read_texture(texture.raw(), &mut out).unwrap();
    assert_eq!(out, pixels);
}

#[test]
fn texture_writes_must_cover_the_whole_texture() {
    let Some(device) = vulkan() else { return };
    let texture = sampled_texture(&device, Extent2D::new(4, 4));
    assert!(matches!(texture.write(&[0u8; 12]), Err(ResourceError::InvalidSize)));
}

#[test]
fn shaders_must_be_spirv() {
    let Some(device) = vulkan() else { return };
    assert!(matches!(
        device.create_shader(b"#version 450"),
        Err(ShaderError::CreationFailed { .. })
    ));
    assert!(device.create_shader(&spirv(VERTEX_SPIRV)).is_ok());
}

#[test]
fn offscreen_clear_fills_the_target() {
    let Some(device) = vulkan() else { return };
    let target = render_target(&device, Format::R8G8B8A8Unorm);
    let color = Color8::new(32, 64, 128, 255);
    clear(&device, &offscreen_pass(&device, &target, Some(color)));

    let mut out = target_bytes();
    device.backend().read_texture(target.raw(), &mut out).unwrap();
    assert_filled(&out, color);
}

#[test]
fn integer_targets_clear_to_the_raw_bytes() {
    let Some(device) = vulkan() else { return };
    let target = render_target(&device, Format::R8G8B8A8Uint);
    let color = Color8::new(3, 100, 200, 255);
    clear(&device, &offscreen_pass(&device, &target, Some(color)));

    let mut out = target_bytes();
    device.backend().read_texture(target.raw(), &mut out).unwrap();
    assert_filled(&out, color);
}

#[test]
fn quad_draws_on_every_swap_slot() {
    let Some(device) = vulkan() else { return };
    let target = render_target(&device, Format::R8G8B8A8Unorm);
    let pass = offscreen_pass(&device, &target, Some(Color8::BLACK));
    let scene = scene(&device, pass, &spirv(VERTEX_SPIRV), &spirv(PIXEL_SPIRV));

    let mut list = record_two_draws(&device, &scene);
    device.execute(&list).unwrap();
    device.new_frame().unwrap();

    list.begin().unwrap();
    list.begin_render_pass(&scene.pass).unwrap();
    list.set_vertex_buffer(&scene.vertices, common::VERTEX_STRIDE, 0).unwrap();
    list.set_index_buffer(&scene.indices).unwrap();
    list.set_pipeline_state(&scene.pipeline).unwrap();
    list.set_constant_buffer(ShaderStage::Vertex, Some(&scene.constants)).unwrap();
    let albedo = sampled_texture(&device, Extent2D::new(2, 2));
    list.set_texture(
        ShaderStage::Pixel,
        0,
        &albedo,
        TextureWrapMode::Repeat,
        TextureMinMagFilter::Linear,
    )
    .unwrap();
    list.draw(2).unwrap();
    list.end_render_pass().unwrap();
    list.end().unwrap();
    device.execute(&list).unwrap();
    device.wait_idle();
}

#[test]
fn unknown_external_images_are_not_found() {
    let Some(device) = vulkan() else { return };
    assert!(matches!(device.import_texture(7), Err(ResourceError::NotFound)));
}

#[test]
fn lists_must_be_ended_before_they_execute() {
    let Some(device) = vulkan() else { return };
    let mut list = device.create_command_list().unwrap();
    assert!(matches!(
        device.execute(&list),
        Err(RenderError::CommandError(CommandError::NothingRecorded))
    ));
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
fn several_color_attachments_are_rejected() {
    let Some(device) = vulkan() else { return };
    let colors = [render_target(&device, Format::R8G8B8A8Unorm), render_target(&device, Format::R8G8B8A8Unorm)];
    assert!(matches!(
        device.create_render_pass(&colors, None),
        Err(ResourceError::AttachmentMismatch(_))
    ));
}
