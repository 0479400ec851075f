//! Outbound email: a bounded queue drained by a background worker.
//!
//! Requests only ever enqueue. Delivery outcome is logged and never
//! reaches the caller.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

pub fn verification_email(app_base_url: &str, to: &str, token: &str) -> MailMessage {
    let link = format!("{}/verify/{}", app_base_url.trim_end_matches('/'), token);
    MailMessage {
        to: to.to_string(),
        subject: "Email Verification".into(),
        html: format!("Click the link to verify your email: <a href='{link}'>Verify Email</a>"),
    }
}

pub fn password_reset_email(app_base_url: &str, to: &str, token: &str) -> MailMessage {
    let link = format!("{}/reset-password/{}/", app_base_url.trim_end_matches('/'), token);
    MailMessage {
        to: to.to_string(),
        subject: "Password Reset".into(),
        html: format!("Click the link to reset your password: <a href='{link}'>Reset Password</a>"),
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, msg: &MailMessage) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    r#type: &'static str,
    value: &'a str,
}

/// SendGrid v3 `mail/send` payload.
#[derive(Serialize)]
struct SendRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 1],
}

/// Delivery through a SendGrid-compatible HTTP API.
pub struct HttpMailTransport {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailTransport {
    pub fn new(cfg: &MailConfig, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build mail http client")?;
        Ok(Self {
            client,
            api_url: cfg.api_url.clone(),
            api_key,
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, msg: &MailMessage) -> anyhow::Result<()> {
        let body = SendRequest {
            personalizations: [Personalization {
                to: [Address { email: &msg.to }],
            }],
            from: Address { email: &self.from },
            subject: &msg.subject,
            content: [Content {
                r#type: "text/html",
                value: &msg.html,
            }],
        };
        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("mail api request")?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("mail api answered {status}: {text}");
        }
        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, msg: &MailMessage) -> anyhow::Result<()> {
        info!(to = %msg.to, subject = %msg.subject, "mail delivery disabled; message dropped");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff with up to 25% jitter, capped at one minute.
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(Duration::from_secs(60));
        let jitter = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
        capped + Duration::from_millis(jitter)
    }
}

/// Handle used by request handlers to hand mail to the worker.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<MailMessage>,
}

impl MailQueue {
    /// Queue plus its receiving end, for callers that drain it themselves.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MailMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn start(
        transport: Arc<dyn MailTransport>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::channel(capacity);
        let worker = tokio::spawn(run_worker(rx, transport, policy));
        (queue, worker)
    }

    /// Never waits: a full or closed queue drops the message with a log line.
    pub fn enqueue(&self, msg: MailMessage) {
        match self.tx.try_send(msg) {
            Ok(()) => debug!("mail queued"),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                error!(to = %msg.to, subject = %msg.subject, "mail queue full; message dropped")
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                error!(to = %msg.to, subject = %msg.subject, "mail worker gone; message dropped")
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<MailMessage>,
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
) {
    while let Some(msg) = rx.recv().await {
        deliver(transport.as_ref(), &msg, policy).await;
    }
    debug!("mail worker stopped");
}

/// Returns whether the message was accepted by the transport.
async fn deliver(transport: &dyn MailTransport, msg: &MailMessage, policy: RetryPolicy) -> bool {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match transport.send(msg).await {
            Ok(()) => {
                info!(to = %msg.to, subject = %msg.subject, attempt, "mail sent");
                return true;
            }
            Err(e) if attempt < attempts => {
                let wait = policy.delay(attempt - 1);
                warn!(error = %e, attempt, ?wait, "mail send failed; retrying");
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                error!(error = %e, to = %msg.to, attempts, "mail send failed; giving up");
            }
        }
    }
    false
}
