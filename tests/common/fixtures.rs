//! Test fixtures: a fully wired gateway over the scripted engine, with
//! durable state in a temp directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use lmgate::core::services::Dispatcher;
use lmgate::engine::mock::{MockEngineLoader, MockEngineProbe};
use lmgate::{
    ChannelSink, Conversation, EngineBackend, GatewayConfig, GatewayContext, SinkEvent, bootstrap,
};

/// A bootstrapped gateway plus the handles tests assert against.
pub struct TestGateway {
    pub context: GatewayContext,
    pub probe: MockEngineProbe,
    data_dir: TempDir,
}

impl TestGateway {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.context.dispatcher
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    /// Path of a conversation's on-disk record.
    pub fn conversation_file(&self, conversation_id: &str) -> PathBuf {
        self.data_dir
            .path()
            .join("conversations")
            .join(format!("{conversation_id}.json"))
    }

    /// Parse a conversation's on-disk record.
    pub fn read_conversation(&self, conversation_id: &str) -> Conversation {
        let raw = std::fs::read(self.conversation_file(conversation_id))
            .expect("conversation file should exist");
        serde_json::from_slice(&raw).expect("conversation file should parse")
    }

    /// Release the temp dir for reuse by a follow-up bootstrap.
    pub fn into_data_dir(self) -> TempDir {
        self.context.stop_background_tasks();
        self.data_dir
    }
}

/// Config used by the fixtures: short sweep interval, 30-minute TTL.
fn config(data_dir: &Path) -> GatewayConfig {
    GatewayConfig {
        data_dir: data_dir.to_path_buf(),
        model_path: Some(PathBuf::from("/models/test.litertlm")),
        backend: EngineBackend::Cpu,
        http_port: 0,
        default_ttl_ms: 1_800_000,
        default_sampling: lmgate::SamplingParams::default(),
        sweep_interval: Duration::from_millis(100),
        host_caller_id: "host".to_string(),
    }
}

/// Bootstrap a gateway in a fresh temp directory.
pub async fn gateway() -> TestGateway {
    gateway_over(tempfile::tempdir().expect("tempdir")).await
}

/// Bootstrap a gateway over an existing data directory (restart scenario).
pub async fn gateway_over(data_dir: TempDir) -> TestGateway {
    let loader = MockEngineLoader::new();
    let probe = loader.probe();
    let context = bootstrap(config(data_dir.path()), Arc::new(loader))
        .await
        .expect("bootstrap");
    TestGateway {
        context,
        probe,
        data_dir,
    }
}

/// Request and approve a token for `caller_id`, returning its wire form.
pub async fn approved_token(gateway: &TestGateway, caller_id: &str) -> String {
    gateway.dispatcher().request_token(caller_id).await;
    gateway
        .dispatcher()
        .approve(caller_id)
        .await
        .expect("approval should mint a token")
}

/// Run one generate call and collect every sink event in order.
pub async fn generate_collect(
    gateway: &TestGateway,
    token: &str,
    conversation_id: &str,
    request_json: &str,
) -> Vec<SinkEvent> {
    let (sink, mut rx) = ChannelSink::new();
    gateway
        .dispatcher()
        .generate(
            token,
            conversation_id,
            request_json,
            sink,
            CancellationToken::new(),
        )
        .await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Extract the assistant content from a completion envelope.
pub fn envelope_content(envelope: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(envelope).expect("envelope should parse");
    value["choices"][0]["message"]["content"]
        .as_str()
        .expect("envelope should carry content")
        .to_string()
}
