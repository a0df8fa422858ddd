//! Connection manager
//!
//! One slot per distinct endpoint. A slot holds a single-permit semaphore and
//! at most one parked connection, which gives two guarantees: an endpoint never
//! has more than one open connection, and a connection is never used by two
//! callers at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use chbridge_core::{BridgeError, Connection, ConnectionError, DatabaseEndpoint, Result};
use chbridge_drivers::DriverRegistry;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PoolConfig;
use crate::lease::ConnectionLease;
use crate::stats::PoolStats;

/// A parked connection and when it was last handed back
pub(crate) struct IdleConnection {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) last_used_at: Instant,
}

impl IdleConnection {
    pub(crate) fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            last_used_at: Instant::now(),
        }
    }
}

pub(crate) struct EndpointSlot {
    pub(crate) endpoint: DatabaseEndpoint,
    permit: Arc<Semaphore>,
    pub(crate) idle: Mutex<Option<IdleConnection>>,
}

impl EndpointSlot {
    fn new(endpoint: DatabaseEndpoint) -> Self {
        Self {
            endpoint,
            permit: Arc::new(Semaphore::new(1)),
            idle: Mutex::new(None),
        }
    }
}

/// Owns the lifecycle of every database connection
pub struct ConnectionManager {
    drivers: Arc<DriverRegistry>,
    config: PoolConfig,
    slots: Mutex<HashMap<DatabaseEndpoint, Arc<EndpointSlot>>>,
    leased: Arc<AtomicUsize>,
}

impl ConnectionManager {
    pub fn new(drivers: Arc<DriverRegistry>, config: PoolConfig) -> Self {
        Self {
            drivers,
            config,
            slots: Mutex::new(HashMap::new()),
            leased: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    /// Check out the endpoint's connection, opening and validating one if
    /// there is no reusable connection parked.
    ///
    /// Waits while another caller holds the endpoint's connection, up to the
    /// acquire timeout.
    #[tracing::instrument(skip(self, endpoint), fields(endpoint = %endpoint))]
    pub async fn open(&self, endpoint: &DatabaseEndpoint) -> Result<ConnectionLease> {
        let slot = self.slot_for(endpoint);

        let acquire_timeout = self.config.acquire_timeout();
        let permit = tokio::time::timeout(acquire_timeout, slot.permit.clone().acquire_owned())
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?acquire_timeout, "timed out waiting for connection");
                ConnectionError::Timeout(acquire_timeout)
            })?
            .map_err(|_| BridgeError::Driver("connection slot closed".into()))?;

        let connection = match self.take_idle(&slot).await {
            Some(connection) => {
                tracing::debug!("reusing pooled connection");
                connection
            }
            None => self.connect(endpoint).await?,
        };

        Ok(ConnectionLease::new(
            connection,
            slot,
            self.leased.clone(),
            permit,
        ))
    }

    /// Return a connection to the pool. Equivalent to dropping the lease.
    pub fn release(&self, lease: ConnectionLease) {
        tracing::debug!(endpoint = %lease.endpoint(), "releasing connection");
        drop(lease);
    }

    fn slot_for(&self, endpoint: &DatabaseEndpoint) -> Arc<EndpointSlot> {
        self.slots
            .lock()
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(EndpointSlot::new(endpoint.clone())))
            .clone()
    }

    /// Take the slot's parked connection if it is still usable
    async fn take_idle(&self, slot: &EndpointSlot) -> Option<Arc<dyn Connection>> {
        let parked = slot.idle.lock().take()?;

        if parked.connection.is_closed() {
            return None;
        }
        if parked.last_used_at.elapsed() > self.config.idle_timeout() {
            tracing::debug!("parked connection expired");
            let _ = parked.connection.close().await;
            return None;
        }
        if self.config.validate_on_checkout() {
            if let Err(e) = parked.connection.ping().await {
                tracing::warn!(error = %e, "pooled connection failed validation, reconnecting");
                let _ = parked.connection.close().await;
                return None;
            }
        }
        Some(parked.connection)
    }

    async fn connect(&self, endpoint: &DatabaseEndpoint) -> Result<Arc<dyn Connection>> {
        let driver = self.drivers.get(endpoint.driver()).ok_or_else(|| {
            BridgeError::Configuration(format!("unknown driver '{}'", endpoint.driver()))
        })?;

        let connect_timeout = self.config.connect_timeout();
        let connection = tokio::time::timeout(connect_timeout, driver.connect(endpoint))
            .await
            .map_err(|_| ConnectionError::Timeout(connect_timeout))?
            .inspect_err(|e| tracing::error!(error = %e, "failed to open connection"))?;

        tracing::info!(driver = driver.id(), "connection opened");
        Ok(connection)
    }

    /// Close parked connections idle beyond the timeout and forget endpoints
    /// nobody is using. Leased connections are never touched.
    ///
    /// Returns the number of connections closed.
    pub async fn evict_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let expired: Vec<(DatabaseEndpoint, Arc<dyn Connection>)> = {
            let slots = self.slots.lock();
            slots
                .values()
                .filter_map(|slot| {
                    let mut idle = slot.idle.lock();
                    let stale = idle
                        .as_ref()
                        .is_some_and(|parked| parked.last_used_at.elapsed() > idle_timeout);
                    if stale {
                        idle.take()
                            .map(|parked| (slot.endpoint.clone(), parked.connection))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (endpoint, connection) in &expired {
            tracing::warn!(%endpoint, "evicting idle connection");
            if let Err(e) = connection.close().await {
                tracing::warn!(%endpoint, error = %e, "failed to close evicted connection");
            }
        }

        // A slot referenced only by the map has no lease and no waiter
        self.slots
            .lock()
            .retain(|_, slot| Arc::strong_count(slot) > 1 || slot.idle.lock().is_some());

        expired.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) on a background timer.
    ///
    /// The task holds only a weak reference and stops once the manager is
    /// dropped.
    pub fn spawn_idle_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.eviction_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let evicted = manager.evict_idle().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "idle reaper pass");
                }
            }
        })
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock();
        let idle = slots.values().filter(|s| s.idle.lock().is_some()).count();
        PoolStats::new(slots.len(), idle, self.leased.load(Ordering::SeqCst))
    }

    /// Close every parked connection and forget all endpoints.
    /// Outstanding leases keep working; their slot is dropped with them.
    pub async fn close_all(&self) {
        let slots: Vec<Arc<EndpointSlot>> = self.slots.lock().drain().map(|(_, s)| s).collect();
        for slot in slots {
            let parked = slot.idle.lock().take();
            if let Some(parked) = parked {
                let _ = parked.connection.close().await;
            }
        }
        tracing::info!("all pooled connections closed");
    }
}
