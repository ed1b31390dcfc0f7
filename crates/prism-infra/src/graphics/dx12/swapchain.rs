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

use prism_core::math::Extent2D;
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;

/// The presentation surface the embedding application owns, typically an
/// `IDXGISwapChain3` created for a window on the backend's queue.
///
/// Back buffers are expected in the `PRESENT` state between frames; a depth buffer,
/// if any, stays in `DEPTH_WRITE`.
pub trait Dx12Swapchain: Send + Sync {
    fn buffer_count(&self) -> usize;

    /// Index of the back buffer the next frame renders into.
    fn current_index(&self) -> usize;

    fn back_buffer(&self, index: usize) -> anyhow::Result<ID3D12Resource>;

    fn format(&self) -> DXGI_FORMAT;

    fn extent(&self) -> Extent2D;

    fn depth_buffer(&self) -> Option<ID3D12Resource> {
        None
    }

    /// Presents the current back buffer.
    fn present(&self) -> anyhow::Result<()>;
}
