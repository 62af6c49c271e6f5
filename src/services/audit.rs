//! Security audit events and the bounded queue that delivers them off the
//! request path.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    MfaChallengeIssued,
    MfaVerify,
    AccountLocked,
    TokenRefresh,
    TokenRevoke,
    LogoutAll,
    MfaEnroll,
    ImpersonationStart,
    ImpersonationEnd,
    RateLimitReset,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "auth.login",
            Self::MfaChallengeIssued => "auth.mfa.challenge_issued",
            Self::MfaVerify => "auth.mfa.verify",
            Self::AccountLocked => "auth.account_locked",
            Self::TokenRefresh => "auth.token.refresh",
            Self::TokenRevoke => "auth.token.revoke",
            Self::LogoutAll => "auth.logout_all",
            Self::MfaEnroll => "auth.mfa.enroll",
            Self::ImpersonationStart => "impersonation.start",
            Self::ImpersonationEnd => "impersonation.end",
            Self::RateLimitReset => "rate_limit.reset",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub source_ip: Option<IpAddr>,
    pub reason: Option<String>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            at: Utc::now(),
            action,
            outcome,
            actor_id: None,
            target_id: None,
            tenant_id: None,
            source_ip: None,
            reason: None,
        }
    }

    pub fn success(action: AuditAction) -> Self {
        Self::new(action, AuditOutcome::Success)
    }

    pub fn failure(action: AuditAction, reason: impl Into<String>) -> Self {
        Self::new(action, AuditOutcome::Failure).reason(reason)
    }

    pub fn actor(mut self, id: impl Into<Option<Uuid>>) -> Self {
        self.actor_id = id.into();
        self
    }

    pub fn target(mut self, id: impl Into<Option<Uuid>>) -> Self {
        self.target_id = id.into();
        self
    }

    pub fn tenant(mut self, id: Option<Uuid>) -> Self {
        self.tenant_id = id;
        self
    }

    pub fn source_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.source_ip = ip;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditSinkError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Where delivered events end up.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn deliver(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Emits each event as a structured `tracing` event on target `audit`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn deliver(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        info!(
            target: "audit",
            action = event.action.as_str(),
            outcome = ?event.outcome,
            actor_id = ?event.actor_id,
            target_id = ?event.target_id,
            tenant_id = ?event.tenant_id,
            source_ip = ?event.source_ip,
            reason = event.reason.as_deref().unwrap_or(""),
            at = %event.at,
            "audit"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time queue counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub depth: usize,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Bounded queue drained by a fixed pool of workers.
///
/// `publish` never waits: when the queue is full the event is dropped and counted.
pub struct AuditQueue {
    tx: mpsc::Sender<AuditEvent>,
    counters: Arc<Counters>,
    stop: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AuditQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditQueue")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl AuditQueue {
    /// Spawn `workers` delivery tasks. Must be called inside a tokio runtime.
    pub fn start(sink: Arc<dyn AuditSink>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (stop, _) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let sink = sink.clone();
                let counters = counters.clone();
                let stop = stop.subscribe();
                tokio::spawn(run_worker(worker_id, rx, sink, counters, stop))
            })
            .collect();

        Self {
            tx,
            counters,
            stop,
            workers: Mutex::new(handles),
        }
    }

    pub fn publish(&self, event: AuditEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(action = event.action.as_str(), "audit queue full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(action = event.action.as_str(), "audit queue closed, event dropped");
            }
        }
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            depth: self.tx.max_capacity() - self.tx.capacity(),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events, deliver what is queued and wait for the workers.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "audit worker ended abnormally");
            }
        }
        info!(stats = ?self.stats(), "audit queue stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<AuditEvent>>>,
    sink: Arc<dyn AuditSink>,
    counters: Arc<Counters>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(worker_id, "audit worker started");
    loop {
        let next = {
            let mut rx = rx.lock().await;
            if *stop.borrow() {
                // Closed receivers still yield what was buffered, then None.
                rx.close();
                rx.recv().await
            } else {
                tokio::select! {
                    event = rx.recv() => event,
                    _ = stop.changed() => {
                        rx.close();
                        rx.recv().await
                    }
                }
            }
        };

        let Some(event) = next else {
            break;
        };

        match sink.deliver(&event).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, action = event.action.as_str(), error = %e, "audit delivery failed");
            }
        }
    }
    debug!(worker_id, "audit worker stopped");
}
