//! Shared fixtures for unit tests

use std::ops::Deref;
use std::sync::Once;

use tempfile::TempDir;

use crate::im::client::ChatClient;
use crate::im::config::ChatConfig;
use crate::im::conversation::Conversation;
use crate::im::follow::Decision;
use crate::im::session::Session;

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,followchat_core=debug,sqlx=warn"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}

/// A client whose media directory is removed when it goes out of scope
pub(crate) struct TestClient {
    client: ChatClient,
    _media: TempDir,
}

impl Deref for TestClient {
    type Target = ChatClient;

    fn deref(&self) -> &ChatClient {
        &self.client
    }
}

/// Client over a fresh in-memory database and a throwaway media directory
pub(crate) async fn test_client() -> TestClient {
    test_client_with(|_| {}).await
}

pub(crate) async fn test_client_with(configure: impl FnOnce(&mut ChatConfig)) -> TestClient {
    init_test_logger();
    let media = tempfile::tempdir().unwrap();
    let mut config = ChatConfig::new("sqlite::memory:");
    config.media_root = media.path().to_path_buf();
    configure(&mut config);
    TestClient {
        client: ChatClient::connect(config).await.unwrap(),
        _media: media,
    }
}

/// Register two identities, connect them and return their shared conversation.
pub(crate) async fn connect_pair(
    client: &ChatClient,
    first: &str,
    second: &str,
) -> (Session, Session, Conversation) {
    let (a, _) = client.identities.register(first, first).await.unwrap();
    let (b, _) = client.identities.register(second, second).await.unwrap();
    let edge = client.follows.request_follow(&a, &b.user_id).await.unwrap();
    let response = client
        .follows
        .respond_to_follow(&b, &edge.id, Decision::Accept)
        .await
        .unwrap();
    (a, b, response.conversation.unwrap())
}
