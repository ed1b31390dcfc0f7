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

//! Helpers shared by the backend integration tests.
//!
//! The tests run against real drivers and skip themselves when the machine has no
//! usable adapter for the backend under test.

#![allow(dead_code)]

use prism_core::math::{Color8, Extent2D};
use prism_core::renderer::{
    Backend, CommandList, ConstantBuffer, ConstantBufferType, CullingMode, Device,
    DeviceSettings, Format, IndexBuffer, PipelineState, PrimitiveTopology, RenderPass,
    ShaderStage, Texture, TextureDescriptor, TextureUsage, VertexBuffer,
};
use std::sync::Arc;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Returns the backend, or logs why the test is skipped.
pub fn or_skip<B, E: std::fmt::Display>(backend: Result<B, E>, what: &str) -> Option<B> {
    init_logger();
    match backend {
        Ok(backend) => Some(backend),
        Err(e) => {
            log::warn!("skipping: no {what} device available ({e})");
            None
        }
    }
}

pub fn device<B: Backend>(backend: B) -> Device<B> {
    let settings = DeviceSettings {
        max_binding_groups_per_slot: 64,
        ..DeviceSettings::default()
    };
    Device::new(backend, settings).unwrap()
}

pub const TARGET_EXTENT: Extent2D = Extent2D {
    width: 8,
    height: 4,
};

pub fn render_target<B: Backend>(device: &Device<B>, format: Format) -> Arc<Texture<B>> {
    device
        .create_texture(TextureDescriptor {
            extent: TARGET_EXTENT,
            format,
            usage: TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET,
        })
        .unwrap()
}

pub fn sampled_texture<B: Backend>(device: &Device<B>, extent: Extent2D) -> Arc<Texture<B>> {
    device
        .create_texture(TextureDescriptor {
            extent,
            format: Format::R8G8B8A8Unorm,
            usage: TextureUsage::SAMPLED,
        })
        .unwrap()
}

/// A gradient with a distinct value in every byte.
pub fn pattern(extent: Extent2D) -> Vec<u8> {
    (0..extent.width * extent.height * 4).map(|i| (i % 251) as u8).collect()
}

pub fn offscreen_pass<B: Backend>(
    device: &Device<B>,
    target: &Arc<Texture<B>>,
    clear: Option<Color8>,
) -> Arc<RenderPass<B>> {
    let mut pass = device.create_render_pass(&[target.clone()], None).unwrap();
    if let Some(color) = clear {
        pass.set_clear_color(color);
        pass.set_is_color_cleared(true);
    }
    Arc::new(pass)
}

/// Records and submits an empty pass that only clears, then waits for it.
pub fn clear<B: Backend>(device: &Device<B>, pass: &Arc<RenderPass<B>>) {
    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.begin_render_pass(pass).unwrap();
    list.end_render_pass().unwrap();
    list.end().unwrap();
    device.execute(&list).unwrap();
    device.wait_idle();
}

pub fn target_bytes() -> Vec<u8> {
    vec![0u8; (TARGET_EXTENT.width * TARGET_EXTENT.height * 4) as usize]
}

/// Asserts that every pixel of an RGBA8 readback equals `color`.
pub fn assert_filled(pixels: &[u8], color: Color8) {
    for (index, pixel) in pixels.chunks_exact(4).enumerate() {
        assert_eq!(
            pixel,
            [color.r, color.g, color.b, color.a],
            "pixel {index} differs from the clear color"
        );
    }
}

/// Everything a frame of the quad scene needs.
pub struct Scene<B: Backend> {
    pub pass: Arc<RenderPass<B>>,
    pub pipeline: Arc<PipelineState<B>>,
    pub vertices: Arc<VertexBuffer<B>>,
    pub indices: Arc<IndexBuffer<B>>,
    pub constants: Arc<ConstantBuffer<B>>,
}

/// Position (xyz) then texture coordinate (uv).
pub const VERTEX_STRIDE: u32 = 20;

/// A quad covering the whole target, drawn with the given vertex and pixel shaders.
pub fn scene<B: Backend>(
    device: &Device<B>,
    pass: Arc<RenderPass<B>>,
    vertex_shader: &[u8],
    pixel_shader: &[u8],
) -> Scene<B> {
    let vertices = device.create_vertex_buffer(u64::from(VERTEX_STRIDE) * 4).unwrap();
    let corners: [[f32; 5]; 4] = [
        [-1.0, -1.0, 0.5, 0.0, 1.0],
        [1.0, -1.0, 0.5, 1.0, 1.0],
        [1.0, 1.0, 0.5, 1.0, 0.0],
        [-1.0, 1.0, 0.5, 0.0, 0.0],
    ];
    vertices.write_slice(0, &corners).unwrap();

    let indices = device.create_index_buffer(4, 6).unwrap();
    indices.write_slice(0, &[0u32, 1, 2, 0, 2, 3]).unwrap();

    let constants = device
        .create_constant_buffer(64, ConstantBufferType::LongTime)
        .unwrap();
    constants.write_slice(0, &[1.0f32; 16]).unwrap();

    let mut pipeline = device.create_pipeline_state();
    pipeline.set_label("quad").unwrap();
    pipeline
        .set_shader(ShaderStage::Vertex, device.create_shader(vertex_shader).unwrap())
        .unwrap();
    pipeline
        .set_shader(ShaderStage::Pixel, device.create_shader(pixel_shader).unwrap())
        .unwrap();
    pipeline.push_vertex_element("POSITION", Format::R32G32B32Float).unwrap();
    pipeline.push_vertex_element("TEXCOORD0", Format::R32G32Float).unwrap();
    pipeline.set_topology(PrimitiveTopology::Triangle).unwrap();
    pipeline.set_culling(CullingMode::DoubleSide).unwrap();
    pipeline
        .set_render_pass_pipeline_state(pass.render_pass_pipeline_state().clone())
        .unwrap();
    pipeline.compile().unwrap();

    Scene {
        pass,
        pipeline: Arc::new(pipeline),
        vertices,
        indices,
        constants,
    }
}

/// Records one pass with two identical draws of the quad.
pub fn record_two_draws<B: Backend>(device: &Device<B>, scene: &Scene<B>) -> CommandList<B> {
    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.begin_render_pass(&scene.pass).unwrap();
    list.set_vertex_buffer(&scene.vertices, VERTEX_STRIDE, 0).unwrap();
    list.set_index_buffer(&scene.indices).unwrap();
    list.set_pipeline_state(&scene.pipeline).unwrap();
    list.set_constant_buffer(ShaderStage::Vertex, Some(&scene.constants))
        .unwrap();
    list.draw(2).unwrap();
    list.draw(2).unwrap();
    list.end_render_pass().unwrap();
    list.end().unwrap();
    list
}
