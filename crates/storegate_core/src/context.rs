//! Request-scoped execution context and time source.
//!
//! The current tenant travels explicitly with every gateway call instead of
//! living in thread-local state.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Caller-supplied, read-only context for one logical request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    tenant: Option<String>,
}

impl RequestContext {
    /// Context without a tenant; only valid for single-tenant gateways.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
        }
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }
}

/// Source of write timestamps.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as i64)
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
