#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fdc3_agent::proxy::DesktopAgentProxy;
use fdc3_agent::{
    AgentConfig, GetAgentOptions, HandshakeTarget, RootAgent, StaticAppDirectory, get_agent,
};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Root agent backed by a static directory knowing apps `A`, `B`, and `C`.
pub fn test_root() -> RootAgent {
    let directory = StaticAppDirectory::default()
        .with_app("A", "https://a.example.com/")
        .with_app("B", "https://b.example.com/")
        .with_app("C", "https://c.example.com/");
    RootAgent::new(AgentConfig::default(), Arc::new(directory))
}

/// Connects a proxy claiming the given origin (e.g. `"a.example.com"`).
pub async fn connect(root: &RootAgent, origin: &str) -> DesktopAgentProxy {
    let targets: Vec<Arc<dyn HandshakeTarget>> = vec![Arc::new(root.clone())];
    get_agent(
        &targets,
        GetAgentOptions::new(format!("https://{origin}/index.html")),
    )
    .await
    .expect("proxy should connect")
}

/// Polls an assertion into existence: background cleanup and event delivery
/// are asynchronous, so observable effects may lag the triggering call.
pub async fn eventually<F>(mut probe: F)
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..100 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within one second");
}
