//! Notification delivery: one client, one queue, one drain task.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::messages::Email;
use crate::{ClientError, check_status, http_client};

const SERVICE: &str = "notification provider";

/// Sends mail through the notification provider.
///
/// Without a configured URL every message is logged and dropped.
#[derive(Clone)]
pub struct NotificationClient {
    http: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
}

impl fmt::Debug for NotificationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationClient")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl NotificationClient {
    pub fn new(
        url: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
            token,
        })
    }

    pub async fn send(&self, email: &Email) -> Result<(), ClientError> {
        let Some(url) = &self.url else {
            tracing::info!(
                mail_to = %email.mail_to,
                subject = %email.subject,
                "no notification provider configured, dropping message"
            );
            return Ok(());
        };
        let mut request = self.http.post(url).json(email);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        check_status(SERVICE, request.send().await?).await?;
        tracing::debug!(mail_to = %email.mail_to, subject = %email.subject, "notification sent");
        Ok(())
    }
}

/// Cloneable handle for queueing mail. Enqueueing never blocks.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Email>,
}

/// Drains a [`NotificationQueue`] one message at a time.
#[derive(Debug)]
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Email>,
    client: NotificationClient,
}

impl NotificationQueue {
    /// Creates a queue and the dispatcher that must be spawned to drain it.
    pub fn new(client: NotificationClient) -> (Self, Dispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Dispatcher { rx, client })
    }

    /// Queues `email`; returns `false` if the dispatcher has stopped.
    pub fn enqueue(&self, email: Email) -> bool {
        match self.tx.send(email) {
            Ok(()) => true,
            Err(mpsc::error::SendError(email)) => {
                tracing::warn!(mail_to = %email.mail_to, "notification dispatcher stopped, message lost");
                false
            }
        }
    }
}

impl Dispatcher {
    /// Sends queued mail until every queue handle is dropped.
    ///
    /// Delivery failures are logged; the message is not retried.
    pub async fn run(mut self) -> usize {
        let mut sent = 0;
        while let Some(email) = self.rx.recv().await {
            match self.client.send(&email).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    tracing::error!(mail_to = %email.mail_to, error = %err, "cannot send notification");
                }
            }
        }
        tracing::debug!(sent, "notification dispatcher finished");
        sent
    }
}
