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

//! Render targets and the cache of compatible layouts shared between them.

use crate::math::{Color8, Extent2D};
use crate::renderer::api::enums::Format;
use crate::renderer::api::texture::Texture;
use crate::renderer::error::ResourceError;
use crate::renderer::traits::Backend;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// The attachment shape two render passes must share to use the same pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassPipelineStateKey {
    /// `true` when the color attachment is a presentation target.
    pub is_present_mode: bool,
    /// `true` when a depth attachment is present.
    pub has_depth: bool,
    /// Format of the color attachments.
    pub color_format: Format,
}

/// Description of the presentation target of the current swap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenTarget {
    /// Size of the presentation image.
    pub extent: Extent2D,
    /// Format of the presentation image.
    pub format: Format,
    /// `true` when the platform attaches a depth buffer to the screen.
    pub has_depth: bool,
}

/// A compiled compatible layout ("render pass pipeline state").
///
/// Shared through `Arc` by every render pass and pipeline built against it; the
/// cache only holds it weakly.
pub struct RenderPassPipelineState<B: Backend> {
    key: RenderPassPipelineStateKey,
    raw: B::CompatibleLayout,
}

impl<B: Backend> RenderPassPipelineState<B> {
    /// The attachment shape this layout was compiled for.
    pub fn key(&self) -> RenderPassPipelineStateKey {
        self.key
    }

    /// The native compatible layout.
    pub fn raw(&self) -> &B::CompatibleLayout {
        &self.raw
    }
}

/// Weak cache of compatible layouts keyed by attachment shape.
pub struct RenderPassPipelineStateCache<B: Backend> {
    entries: HashMap<RenderPassPipelineStateKey, Weak<RenderPassPipelineState<B>>>,
}

impl<B: Backend> Default for RenderPassPipelineStateCache<B> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<B: Backend> RenderPassPipelineStateCache<B> {
    /// Returns the live layout for `key`, compiling and inserting a new one when none
    /// is alive. Dead entries are pruned on insertion.
    pub fn get_or_create(
        &mut self,
        backend: &B,
        key: RenderPassPipelineStateKey,
    ) -> Result<Arc<RenderPassPipelineState<B>>, ResourceError> {
        if let Some(state) = self.entries.get(&key).and_then(Weak::upgrade) {
            return Ok(state);
        }

        self.entries.retain(|_, entry| entry.strong_count() > 0);

        let raw = backend.create_compatible_layout(&key)?;
        log::debug!("[{}] compiled compatible layout for {:?}", B::NAME, key);
        let state = Arc::new(RenderPassPipelineState { key, raw });
        self.entries.insert(key, Arc::downgrade(&state));
        Ok(state)
    }

    /// Number of entries still referenced by a render pass or pipeline.
    pub fn live_entries(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    /// Number of entries held, dead or alive.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The attachments handed to [`Backend::create_framebuffer`].
pub enum FramebufferAttachments<'a, B: Backend> {
    /// The presentation target of a swap slot.
    Screen {
        /// The swap slot.
        slot: usize,
        /// Size of the presentation image.
        extent: Extent2D,
    },
    /// Caller-owned textures.
    Offscreen {
        /// Color attachments, in attachment order.
        colors: Vec<&'a B::Texture>,
        /// Optional depth attachment.
        depth: Option<&'a B::Texture>,
        /// Common size of every attachment.
        extent: Extent2D,
    },
}

/// Everything a backend needs to open a native render pass.
pub struct RenderPassBeginInfo<'a, B: Backend> {
    /// Target attachments.
    pub framebuffer: &'a B::Framebuffer,
    /// Compatible layout of the pass.
    pub layout: &'a B::CompatibleLayout,
    /// Attachment shape of the pass.
    pub key: RenderPassPipelineStateKey,
    /// Full attachment extent.
    pub extent: Extent2D,
    /// Clear value for the color attachments, `None` to load them.
    pub clear_color: Option<Color8>,
    /// Clear value for the depth attachment, `None` to load it.
    pub clear_depth: Option<f32>,
}

/// What a [`RenderPass`] renders into.
pub enum RenderTarget<B: Backend> {
    /// The presentation target of one swap slot.
    Screen {
        /// The swap slot.
        slot: usize,
    },
    /// Caller-owned textures, kept alive by the pass.
    Offscreen {
        /// Color attachments.
        colors: Vec<Arc<Texture<B>>>,
        /// Optional depth attachment.
        depth: Option<Arc<Texture<B>>>,
    },
}

/// A set of target attachments plus their clear behavior.
pub struct RenderPass<B: Backend> {
    target: RenderTarget<B>,
    pipeline_state: Arc<RenderPassPipelineState<B>>,
    framebuffer: Arc<B::Framebuffer>,
    extent: Extent2D,
    clear_color: Color8,
    is_color_cleared: bool,
    is_depth_cleared: bool,
}

impl<B: Backend> RenderPass<B> {
    pub(crate) fn screen(
        slot: usize,
        extent: Extent2D,
        pipeline_state: Arc<RenderPassPipelineState<B>>,
        framebuffer: Arc<B::Framebuffer>,
    ) -> Self {
        Self {
            target: RenderTarget::Screen { slot },
            pipeline_state,
            framebuffer,
            extent,
            clear_color: Color8::BLACK,
            is_color_cleared: false,
            is_depth_cleared: false,
        }
    }

    pub(crate) fn offscreen(
        backend: &B,
        cache: &mut RenderPassPipelineStateCache<B>,
        colors: &[Arc<Texture<B>>],
        depth: Option<Arc<Texture<B>>>,
        validate: bool,
    ) -> Result<Self, ResourceError> {
        let first = colors.first().ok_or(ResourceError::EmptyRenderPass)?;
        let extent = first.size();
        if validate {
            validate_attachments(colors, depth.as_deref())?;
        }

        let key = RenderPassPipelineStateKey {
            is_present_mode: false,
            has_depth: depth.is_some(),
            color_format: first.format(),
        };
        let pipeline_state = cache.get_or_create(backend, key)?;

        let attachments = FramebufferAttachments::Offscreen {
            colors: colors.iter().map(|t| t.raw()).collect(),
            depth: depth.as_ref().map(|t| t.raw()),
            extent,
        };
        let framebuffer = backend.create_framebuffer(pipeline_state.raw(), &attachments)?;

        Ok(Self {
            target: RenderTarget::Offscreen {
                colors: colors.to_vec(),
                depth,
            },
            pipeline_state,
            framebuffer: Arc::new(framebuffer),
            extent,
            clear_color: Color8::BLACK,
            is_color_cleared: false,
            is_depth_cleared: false,
        })
    }

    /// Sets the color the color attachments are cleared to.
    pub fn set_clear_color(&mut self, color: Color8) {
        self.clear_color = color;
    }

    /// Enables clearing the color attachments when the pass begins.
    pub fn set_is_color_cleared(&mut self, cleared: bool) {
        self.is_color_cleared = cleared;
    }

    /// Enables clearing the depth attachment when the pass begins.
    pub fn set_is_depth_cleared(&mut self, cleared: bool) {
        self.is_depth_cleared = cleared;
    }

    /// Color the attachments are cleared to.
    pub fn clear_color(&self) -> Color8 {
        self.clear_color
    }

    /// Whether color attachments are cleared when the pass begins.
    pub fn is_color_cleared(&self) -> bool {
        self.is_color_cleared
    }

    /// Whether the depth attachment is cleared when the pass begins.
    pub fn is_depth_cleared(&self) -> bool {
        self.is_depth_cleared
    }

    /// Full attachment extent.
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Returns `true` for a screen-backed pass.
    pub fn is_screen(&self) -> bool {
        matches!(self.target, RenderTarget::Screen { .. })
    }

    /// The attachments of the pass.
    pub fn target(&self) -> &RenderTarget<B> {
        &self.target
    }

    /// The compatible layout of this pass, to be handed to pipelines drawn inside it.
    pub fn render_pass_pipeline_state(&self) -> &Arc<RenderPassPipelineState<B>> {
        &self.pipeline_state
    }

    /// The native framebuffer.
    pub fn framebuffer(&self) -> &B::Framebuffer {
        &self.framebuffer
    }

    pub(crate) fn begin_info(&self) -> RenderPassBeginInfo<'_, B> {
        RenderPassBeginInfo {
            framebuffer: &self.framebuffer,
            layout: self.pipeline_state.raw(),
            key: self.pipeline_state.key(),
            extent: self.extent,
            clear_color: self.is_color_cleared.then_some(self.clear_color),
            clear_depth: (self.is_depth_cleared && self.pipeline_state.key().has_depth)
                .then_some(1.0),
        }
    }
}

fn validate_attachments<B: Backend>(
    colors: &[Arc<Texture<B>>],
    depth: Option<&Texture<B>>,
) -> Result<(), ResourceError> {
    let Some(first) = colors.first() else {
        return Err(ResourceError::EmptyRenderPass);
    };
    for (i, color) in colors.iter().enumerate() {
        if !color.is_render_texture() {
            return Err(ResourceError::AttachmentMismatch(format!(
                "color attachment {i} is not a render target"
            )));
        }
        if color.size() != first.size() || color.format() != first.format() {
            return Err(ResourceError::AttachmentMismatch(format!(
                "color attachment {i} is {:?} {:?}, expected {:?} {:?}",
                color.size(),
                color.format(),
                first.size(),
                first.format()
            )));
        }
    }
    if let Some(depth) = depth {
        if !depth.is_depth_texture() {
            return Err(ResourceError::AttachmentMismatch(
                "depth attachment is not a depth texture".to_owned(),
            ));
        }
        if depth.size() != first.size() {
            return Err(ResourceError::AttachmentMismatch(format!(
                "depth attachment is {:?}, expected {:?}",
                depth.size(),
                first.size()
            )));
        }
    }
    Ok(())
}
