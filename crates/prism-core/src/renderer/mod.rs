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

//! Provides the public rendering contracts and the backend-generic machinery of prism.
//!
//! The [`traits::Backend`] trait is the 'how': a native programming model behind one
//! capability interface, implemented in `prism-infra`. Everything else in this module
//! is the 'what' shared by all backends: resource wrappers, pipeline compilation,
//! the compatible-layout cache, per-slot binding pools and the command-list state
//! machine that decides when a backend call is actually needed.

pub mod api;
pub mod binding_pool;
pub mod command_list;
pub mod device;
pub mod error;
pub mod settings;
pub mod stats;
pub mod tracked;
pub mod traits;

#[cfg(test)]
pub(crate) mod mock;

// Re-export the most important traits and types for easier use.
pub use self::api::*;
pub use self::binding_pool::BindingPool;
pub use self::command_list::{CommandList, RecordingState};
pub use self::device::Device;
pub use self::error::{
    CommandError, PipelineError, RenderError, ResourceError, ShaderError,
};
pub use self::settings::DeviceSettings;
pub use self::stats::CommandListStats;
pub use self::tracked::Tracked;
pub use self::traits::Backend;
