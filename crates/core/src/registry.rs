//! The algorithm factory registry: looks up an algorithm constructor by its
//! mnemonic (`ea`, `swarm`, `ps`, `gd`). This is named only as an external
//! collaborator — the concrete factory, CLI wiring, and config-file parsing
//! live outside the core and are out of scope here. Tests inject a mock
//! registry rather than reaching for ambient global state.

use crate::config::AlgorithmConfig;
use crate::error::Result;

/// Anything that can be constructed from a mnemonic and a config. The core
/// depends on this trait, not on any particular set of implementations.
pub trait AlgorithmFactory: Send + Sync {
    /// Short mnemonic this factory answers to (`"ea"`, `"swarm"`, `"ps"`, `"gd"`).
    fn mnemonic(&self) -> &'static str;

    fn build(&self, config: AlgorithmConfig) -> Result<Box<dyn std::any::Any>>;
}

/// A handle accepted at algorithm init and released at finalize. Keeps the
/// broker registry from being reached for ambiently from deep inside the
/// algorithm hierarchy.
pub struct RegistryHandle {
    factories: Vec<Box<dyn AlgorithmFactory>>,
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self { factories: Vec::new() }
    }
}

impl RegistryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Box<dyn AlgorithmFactory>) {
        self.factories.push(factory);
    }

    pub fn lookup(&self, mnemonic: &str) -> Option<&dyn AlgorithmFactory> {
        self.factories.iter().map(|f| f.as_ref()).find(|f| f.mnemonic() == mnemonic)
    }
}
