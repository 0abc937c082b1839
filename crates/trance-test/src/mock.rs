//! Mock registry
//!
//! One registry exists per run and travels inside its [`RunContext`], so a
//! binding can never be observed by another run. Bindings stack: the newest
//! binding for a name wins and `restore` peels one layer off.
//!
//! [`RunContext`]: crate::context::RunContext

use crate::context::Callable;
use tracing::trace;

/// A replacement bound to a callable name
#[derive(Debug, Clone)]
pub struct MockBinding {
    pub name: String,
    pub replacement: Callable,
}

#[derive(Debug, Default)]
pub struct MockRegistry {
    /// Installation order
    bindings: Vec<MockBinding>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `replacement` to `name`, stacking over any active mock
    pub fn install(&mut self, name: impl Into<String>, replacement: Callable) {
        let name = name.into();
        trace!(name = %name, stacked = self.is_mocked(&name), "mock installed");
        self.bindings.push(MockBinding { name, replacement });
    }

    /// Remove the most recent binding for `name`
    pub fn restore(&mut self, name: &str) -> bool {
        match self.bindings.iter().rposition(|b| b.name == name) {
            Some(index) => {
                self.bindings.remove(index);
                trace!(name = %name, "mock restored");
                true
            }
            None => false,
        }
    }

    /// Remove every binding in reverse installation order.
    ///
    /// Returns how many bindings were active.
    pub fn restore_all(&mut self) -> usize {
        let count = self.bindings.len();
        while let Some(binding) = self.bindings.pop() {
            trace!(name = %binding.name, "mock restored");
        }
        count
    }

    /// Active replacement for `name`
    pub fn resolve(&self, name: &str) -> Option<Callable> {
        self.bindings
            .iter()
            .rev()
            .find(|b| b.name == name)
            .map(|b| b.replacement.clone())
    }

    pub fn is_mocked(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.name == name)
    }

    pub fn active_count(&self) -> usize {
        self.bindings.len()
    }

    /// Names with an active binding, in installation order
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for binding in &self.bindings {
            if !names.contains(&binding.name) {
                names.push(binding.name.clone());
            }
        }
        names
    }
}
