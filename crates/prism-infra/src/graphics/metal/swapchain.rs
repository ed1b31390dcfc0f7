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

use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{MTLPixelFormat, MTLTexture};
use prism_core::math::Extent2D;

/// The presentation surface the embedding application owns, typically a
/// `CAMetalLayer` attached to a view.
pub trait MetalSwapchain: Send + Sync {
    /// How many drawables the layer keeps in flight.
    fn drawable_count(&self) -> usize;

    fn pixel_format(&self) -> MTLPixelFormat;

    fn extent(&self) -> Extent2D;

    /// Acquires the next drawable and returns the texture the frame renders into.
    fn next_drawable(&self) -> anyhow::Result<Retained<ProtocolObject<dyn MTLTexture>>>;

    fn depth_texture(&self) -> Option<Retained<ProtocolObject<dyn MTLTexture>>> {
        None
    }

    /// Presents the drawable acquired last.
    fn present(&self) -> anyhow::Result<()>;
}
