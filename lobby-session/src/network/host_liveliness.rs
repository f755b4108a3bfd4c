//! Liveliness of session hosts

use std::time::Duration;

use crate::error::Result;
use crate::network::keyexpr::HostKeyexpr;
use zenoh::handlers::FifoChannelHandler;
use zenoh::key_expr::KeyExpr;
use zenoh::liveliness::LivelinessToken;
use zenoh::pubsub::Subscriber;
use zenoh::sample::{Sample, SampleKind};

/// Liveliness token announcing that a member is hosting
///
/// The token is automatically undeclared when dropped.
#[derive(Debug)]
pub struct HostLivelinessToken {
    token: LivelinessToken,
    host: HostKeyexpr,
}

impl HostLivelinessToken {
    /// Declare the token at `<prefix>/host/<member>`
    pub async fn declare(session: &zenoh::Session, host: HostKeyexpr) -> Result<Self> {
        let keyexpr: KeyExpr = host.clone().into();
        let token = session.liveliness().declare_token(keyexpr).await?;
        Ok(Self { token, host })
    }

    /// Undeclare now instead of on drop
    pub async fn undeclare(self) -> Result<()> {
        self.token.undeclare().await?;
        tracing::debug!("Host '{}' liveliness token undeclared", self.host.member());
        Ok(())
    }
}

/// Check whether a host token is currently alive
///
/// Returns false when no reply arrives within `timeout`.
pub async fn host_alive(
    session: &zenoh::Session,
    host: &HostKeyexpr,
    timeout: Duration,
) -> Result<bool> {
    let keyexpr: KeyExpr = host.clone().into();
    let replies = session.liveliness().get(keyexpr).timeout(timeout).await?;
    while let Ok(reply) = replies.recv_async().await {
        if reply.result().is_ok() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Watches a host's liveliness token and resolves when it disappears
pub struct HostWatch {
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
    host: HostKeyexpr,
}

impl std::fmt::Debug for HostWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostWatch")
            .field("host", &self.host)
            .finish()
    }
}

impl HostWatch {
    pub async fn new(session: &zenoh::Session, host: HostKeyexpr) -> Result<Self> {
        let keyexpr: KeyExpr = host.clone().into();
        let subscriber = session.liveliness().declare_subscriber(keyexpr).await?;
        Ok(Self { subscriber, host })
    }

    /// Wait until the host token is deleted (or the subscriber closes)
    pub async fn lost(&self) {
        while let Ok(sample) = self.subscriber.recv_async().await {
            if sample.kind() == SampleKind::Delete {
                tracing::debug!("Host '{}' liveliness lost", self.host.member());
                return;
            }
        }
    }
}
