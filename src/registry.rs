//! Typed resource registries.
//!
//! Every well-known renderer resource (render passes, pipelines, per-frame
//! buffers) is stored under an enum key instead of a string. Iteration follows
//! the key ordering, which for [`PassKind`] is the fixed execution order.
//!
//! Duplicate keys follow one policy everywhere: the first insert wins. A
//! second [`Registry::insert`] for the same key is rejected and hands the value
//! back to the caller, who owns its cleanup. Deliberate rebuilds go through
//! [`Registry::replace`], which returns the previous value so it can be
//! retired.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RendererError, RendererResult};

/// Render passes known to the renderer, declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassKind {
    /// Main pass targeting the swapchain images. Always present.
    Swapchain,
    /// Off-screen object identifier pass.
    Picking,
    /// Off-screen scene pass displayed inside a UI panel.
    Viewport,
    /// UI overlay, always recorded last.
    Ui,
}

impl PassKind {
    /// Every pass kind in execution order.
    pub const ALL: [PassKind; 4] = [
        PassKind::Swapchain,
        PassKind::Picking,
        PassKind::Viewport,
        PassKind::Ui,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PassKind::Swapchain => "Swapchain",
            PassKind::Picking => "Picking",
            PassKind::Viewport => "Viewport",
            PassKind::Ui => "UI",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Graphics pipelines known to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineKind {
    Mesh,
    Picking,
    Skybox,
    Grid,
}

impl PipelineKind {
    pub fn name(self) -> &'static str {
        match self {
            PipelineKind::Mesh => "Mesh",
            PipelineKind::Picking => "Picking",
            PipelineKind::Skybox => "Skybox",
            PipelineKind::Grid => "Grid",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-frame buffers known to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKind {
    Camera,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::Camera => f.write_str("Camera"),
        }
    }
}

/// Ordered map from a typed key to a resource.
pub struct Registry<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K, V> Registry<K, V>
where
    K: Ord + Copy + fmt::Display,
{
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert a value unless the key is already taken.
    ///
    /// On a duplicate the existing entry is kept and `value` is returned in the
    /// error so the caller can release it.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), V> {
        if self.entries.contains_key(&key) {
            log::warn!("{key} is already registered, keeping the existing entry");
            return Err(value);
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Insert or overwrite, returning the previous value.
    pub fn replace(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        self.entries.remove(&key)
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.entries.get_mut(&key)
    }

    /// Look up a value that must exist.
    pub fn require(&self, key: K) -> RendererResult<&V> {
        self.entries
            .get(&key)
            .ok_or_else(|| RendererError::MissingResource(key.to_string()))
    }

    pub fn require_mut(&mut self, key: K) -> RendererResult<&mut V> {
        self.entries
            .get_mut(&key)
            .ok_or_else(|| RendererError::MissingResource(key.to_string()))
    }

    /// Registered keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, in key order.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> {
        std::mem::take(&mut self.entries).into_iter()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Ord + Copy + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Registry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_wins() {
        let mut registry = Registry::new();
        assert!(registry.insert(PipelineKind::Mesh, 1).is_ok());
        assert_eq!(registry.insert(PipelineKind::Mesh, 2), Err(2));
        assert_eq!(registry.get(PipelineKind::Mesh), Some(&1));
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut registry = Registry::new();
        assert_eq!(registry.replace(PipelineKind::Grid, "old"), None);
        assert_eq!(registry.replace(PipelineKind::Grid, "new"), Some("old"));
        assert_eq!(registry.get(PipelineKind::Grid), Some(&"new"));
    }

    #[test]
    fn test_iteration_follows_execution_order() {
        let mut registry = Registry::new();
        for kind in [PassKind::Ui, PassKind::Swapchain, PassKind::Viewport] {
            registry.insert(kind, ()).unwrap();
        }
        let order: Vec<PassKind> = registry.keys().collect();
        assert_eq!(
            order,
            vec![PassKind::Swapchain, PassKind::Viewport, PassKind::Ui]
        );
    }

    #[test]
    fn test_require_missing_key() {
        let registry: Registry<BufferKind, u32> = Registry::new();
        assert_eq!(
            registry.require(BufferKind::Camera),
            Err(RendererError::MissingResource("Camera".to_string()))
        );
    }

    #[test]
    fn test_pass_kind_order_matches_all() {
        let mut sorted = PassKind::ALL;
        sorted.sort();
        assert_eq!(sorted, PassKind::ALL);
    }
}
