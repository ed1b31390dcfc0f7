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

//! Comparison-based dirty tracking of bound state.

use std::sync::Arc;

/// Identity used to decide whether a binding changed.
///
/// Shared resources compare by address, never by content: two distinct buffers
/// holding the same bytes are still two different bindings.
pub trait SameBinding {
    /// Returns `true` if binding `other` instead of `self` would be a no-op.
    fn same_binding(&self, other: &Self) -> bool;
}

impl<T: ?Sized> SameBinding for Arc<T> {
    fn same_binding(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: SameBinding> SameBinding for Option<T> {
    fn same_binding(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_binding(b),
            (None, None) => true,
            _ => false,
        }
    }
}

/// A value to use at the next draw (`pending`) next to the value currently bound in
/// the command buffer (`bound`).
///
/// The value is dirty iff the two differ, so setting a new value and then restoring
/// the bound one leaves it clean.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    pending: Option<T>,
    bound: Option<T>,
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Self {
            pending: None,
            bound: None,
        }
    }
}

impl<T: SameBinding + Clone> Tracked<T> {
    /// Sets the value to use at the next draw.
    pub fn set(&mut self, value: T) {
        self.pending = Some(value);
    }

    /// The value to use at the next draw.
    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref()
    }

    /// Mutable access to the pending value, inserting the default first.
    pub fn pending_mut(&mut self) -> &mut T
    where
        T: Default,
    {
        self.pending.get_or_insert_with(T::default)
    }

    /// The value bound in the command buffer.
    pub fn bound(&self) -> Option<&T> {
        self.bound.as_ref()
    }

    /// `true` when the pending value differs from the bound one.
    pub fn is_dirty(&self) -> bool {
        !self.pending.same_binding(&self.bound)
    }

    /// Records that the pending value is now bound.
    pub fn mark_bound(&mut self) {
        if self.is_dirty() {
            self.bound = self.pending.clone();
        }
    }

    /// Forgets what is bound, e.g. after the command buffer lost its bindings.
    pub fn invalidate(&mut self) {
        self.bound = None;
    }

    /// Clears both the pending and the bound value.
    pub fn reset(&mut self) {
        self.pending = None;
        self.bound = None;
    }
}
