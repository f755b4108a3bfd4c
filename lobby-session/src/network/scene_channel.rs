//! Host-to-client scene change channel

use crate::error::{LobbyError, Result};
use crate::network::keyexpr::SceneKeyexpr;
use crate::types::SceneRef;
use zenoh::handlers::FifoChannelHandler;
use zenoh::key_expr::KeyExpr;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

/// Publishes the host's scene changes on `<prefix>/scene/<member>`
pub struct ScenePublisher {
    publisher: Publisher<'static>,
}

impl std::fmt::Debug for ScenePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenePublisher")
            .field("key_expr", &self.publisher.key_expr())
            .finish()
    }
}

impl ScenePublisher {
    pub async fn new(session: &zenoh::Session, scene: SceneKeyexpr) -> Result<Self> {
        let keyexpr: KeyExpr = scene.into();
        let publisher = session.declare_publisher(keyexpr).await?;
        Ok(Self { publisher })
    }

    /// Publish a scene change
    pub async fn put(&self, scene: &SceneRef) -> Result<()> {
        let payload = zenoh_ext::z_serialize(&scene.as_str().to_string());
        self.publisher.put(payload).await?;
        Ok(())
    }
}

/// Receives a host's scene changes
pub struct SceneSubscriber {
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
}

impl std::fmt::Debug for SceneSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneSubscriber")
            .field("key_expr", &self.subscriber.key_expr())
            .finish()
    }
}

impl SceneSubscriber {
    pub async fn new(session: &zenoh::Session, scene: SceneKeyexpr) -> Result<Self> {
        let keyexpr: KeyExpr = scene.into();
        let subscriber = session.declare_subscriber(keyexpr).await?;
        Ok(Self { subscriber })
    }

    /// Receive and deserialize the next scene change
    ///
    /// `Serialization` errors are per-sample; `Internal` means the
    /// subscriber is closed.
    pub async fn recv(&self) -> Result<SceneRef> {
        let sample = self
            .subscriber
            .recv_async()
            .await
            .map_err(|e| LobbyError::Internal(format!("Failed to receive sample: {}", e)))?;
        let name: String = zenoh_ext::z_deserialize(sample.payload())
            .map_err(|e| LobbyError::Serialization(format!("Failed to deserialize scene: {}", e)))?;
        Ok(SceneRef::new(name))
    }
}
