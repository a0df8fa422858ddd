//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Snapshot of the connection manager's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Distinct endpoints with a slot in the pool
    endpoints: usize,
    /// Open connections waiting to be reused
    idle: usize,
    /// Connections currently checked out by a caller
    leased: usize,
}

impl PoolStats {
    pub fn new(endpoints: usize, idle: usize, leased: usize) -> Self {
        Self {
            endpoints,
            idle,
            leased,
        }
    }

    pub fn endpoints(&self) -> usize {
        self.endpoints
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn leased(&self) -> usize {
        self.leased
    }

    /// Total open connections (idle + leased)
    pub fn open(&self) -> usize {
        self.idle + self.leased
    }
}
