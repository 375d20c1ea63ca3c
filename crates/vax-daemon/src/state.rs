//! Shared runtime state for vax-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Every collaborator is
//! an injected trait object constructed once at process start; this module
//! owns nothing async itself.

use std::sync::Arc;

use vax_auth::JwtKeys;
use vax_db::LifecycleStore;
use vax_lifecycle::Clock;
use vax_notify::{CertificateMailer, NotifyChannel};

/// Static build metadata included in the health response.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Order / record / stock persistence.
    pub store: Arc<dyn LifecycleStore>,
    /// Fire-and-forget user notifications.
    pub notifier: Arc<dyn NotifyChannel>,
    /// Certificate email delivery (best-effort).
    pub mailer: Arc<dyn CertificateMailer>,
    /// Bearer-token key pair.
    pub keys: JwtKeys,
    /// Source of "now" for the date guards.
    pub clock: Arc<dyn Clock>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        notifier: Arc<dyn NotifyChannel>,
        mailer: Arc<dyn CertificateMailer>,
        keys: JwtKeys,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            mailer,
            keys,
            clock,
            build: BuildInfo {
                service: "vax-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
