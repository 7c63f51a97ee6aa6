//! ferry-test-utils: Test infrastructure for ferry.
//!
//! Provides:
//! - MemoryKv: In-memory shared store for testing without Redis
//! - FakeDatasetRepository: Simulated dataset repository with an in-memory inventory
//! - InlinePlugin: Source plugin whose stream specs embed the bytes directly
//! - test_context: One-call wiring of an engine over the fakes

mod fake_repository;
mod inline_plugin;
mod memory_kv;

use std::sync::Arc;

use ferry_core::config::Config;
use ferry_core::engine::{Engine, Shutdown, ShutdownHandle};
use ferry_core::plugin::PluginRegistry;

pub use fake_repository::FakeDatasetRepository;
pub use inline_plugin::InlinePlugin;
pub use memory_kv::MemoryKv;

/// An engine wired over in-memory fakes, with handles kept for assertions.
pub struct TestContext {
    pub engine: Engine,
    pub store: Arc<MemoryKv>,
    pub repo: Arc<FakeDatasetRepository>,
    pub plugin: Arc<InlinePlugin>,
    pub shutdown_handle: ShutdownHandle,
}

/// Build a test engine around `config`. The inline plugin is registered
/// under the stream kind `inline`.
pub fn test_context(config: Config) -> TestContext {
    let store = Arc::new(MemoryKv::new());
    let repo = Arc::new(FakeDatasetRepository::new());
    let plugin = Arc::new(InlinePlugin::new());

    let mut plugins = PluginRegistry::new();
    plugins.register("inline", plugin.clone());

    let (shutdown_handle, shutdown) = Shutdown::new_pair();
    let engine = Engine::new(config, store.clone(), repo.clone(), plugins, shutdown);

    TestContext {
        engine,
        store,
        repo,
        plugin,
        shutdown_handle,
    }
}
