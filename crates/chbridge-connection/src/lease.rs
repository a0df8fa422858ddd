//! Exclusive connection checkout

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chbridge_core::{Connection, DatabaseEndpoint};
use tokio::sync::OwnedSemaphorePermit;

use crate::manager::{EndpointSlot, IdleConnection};

/// A connection checked out of the [`ConnectionManager`](crate::ConnectionManager).
///
/// The holder has exclusive use of the endpoint's connection. Dropping the
/// lease returns the connection to its slot, where it becomes subject to idle
/// eviction again.
pub struct ConnectionLease {
    connection: Arc<dyn Connection>,
    slot: Arc<EndpointSlot>,
    leased: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionLease {
    pub(crate) fn new(
        connection: Arc<dyn Connection>,
        slot: Arc<EndpointSlot>,
        leased: Arc<AtomicUsize>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        leased.fetch_add(1, Ordering::SeqCst);
        Self {
            connection,
            slot,
            leased,
            _permit: permit,
        }
    }

    /// Get the underlying connection as an Arc
    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Endpoint this connection belongs to
    pub fn endpoint(&self) -> &DatabaseEndpoint {
        &self.slot.endpoint
    }

    /// Close the connection instead of returning it for reuse
    pub async fn discard(self) {
        if let Err(e) = self.connection.close().await {
            tracing::warn!(error = %e, "failed to close discarded connection");
        }
    }
}

impl Deref for ConnectionLease {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.leased.fetch_sub(1, Ordering::SeqCst);
        if self.connection.is_closed() {
            return;
        }
        // The permit is released after this body runs, so the next waiter
        // always finds the connection parked in the slot
        *self.slot.idle.lock() = Some(IdleConnection::new(self.connection.clone()));
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("endpoint", &self.slot.endpoint)
            .field("driver", &self.connection.driver_name())
            .finish()
    }
}
