//! Admission-controlled reader/writer lock.
//!
//! A bounded pool of slots sits in front of a reader/writer lock. A caller
//! takes a slot first, then the lock in the requested mode. Both waits run
//! under an [`OpContext`], so a caller whose deadline passes or whose
//! context is cancelled stops waiting without holding anything.
//!
//! Release order is the reverse of acquisition: the lock guard is dropped
//! before the slot is returned. The guard types declare their fields in that
//! order so an ordinary drop releases them correctly.

use std::ops::{Deref, DerefMut};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit};
use warehouse_core::{CancelReason, LockMode};

use crate::context::OpContext;

/// Bounded admission in front of a reader/writer lock over `T`.
#[derive(Debug)]
pub struct AdmissionLock<T> {
    slots: Semaphore,
    capacity: usize,
    lock: RwLock<T>,
}

impl<T> AdmissionLock<T> {
    /// Wrap `value` behind `capacity` admission slots.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(value: T, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Semaphore::new(capacity),
            capacity,
            lock: RwLock::new(value),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held by any caller.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    async fn admit(&self, ctx: &OpContext) -> Result<SemaphorePermit<'_>, CancelReason> {
        // The semaphore is owned here and never closed, so acquire only
        // fails if the context gives up first.
        ctx.run(self.slots.acquire())
            .await?
            .map_err(|_| CancelReason::Cancelled)
    }

    /// Take a slot, then the lock in shared mode.
    pub async fn read(&self, ctx: &OpContext) -> Result<AdmittedRead<'_, T>, CancelReason> {
        let permit = self.admit(ctx).await?;
        let guard = ctx.run(self.lock.read()).await?;
        Ok(AdmittedRead {
            guard,
            _permit: permit,
        })
    }

    /// Take a slot, then the lock in exclusive mode.
    pub async fn write(&self, ctx: &OpContext) -> Result<AdmittedWrite<'_, T>, CancelReason> {
        let permit = self.admit(ctx).await?;
        let guard = ctx.run(self.lock.write()).await?;
        Ok(AdmittedWrite {
            guard,
            _permit: permit,
        })
    }

    /// Acquire in the given mode.
    pub async fn acquire(
        &self,
        mode: LockMode,
        ctx: &OpContext,
    ) -> Result<AdmissionGuard<'_, T>, CancelReason> {
        match mode {
            LockMode::Shared => self.read(ctx).await.map(AdmissionGuard::Shared),
            LockMode::Exclusive => self.write(ctx).await.map(AdmissionGuard::Exclusive),
        }
    }
}

/// Shared access plus the admission slot that granted it.
pub struct AdmittedRead<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    _permit: SemaphorePermit<'a>,
}

impl<T> AdmittedRead<'_, T> {
    /// Unlock, then give the slot back.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for AdmittedRead<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

/// Exclusive access plus the admission slot that granted it.
pub struct AdmittedWrite<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    _permit: SemaphorePermit<'a>,
}

impl<T> AdmittedWrite<'_, T> {
    /// Unlock, then give the slot back.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for AdmittedWrite<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for AdmittedWrite<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Guard returned by [`AdmissionLock::acquire`].
pub enum AdmissionGuard<'a, T> {
    Shared(AdmittedRead<'a, T>),
    Exclusive(AdmittedWrite<'a, T>),
}

impl<T> AdmissionGuard<'_, T> {
    pub fn mode(&self) -> LockMode {
        match self {
            AdmissionGuard::Shared(_) => LockMode::Shared,
            AdmissionGuard::Exclusive(_) => LockMode::Exclusive,
        }
    }

    /// Mutable access, only available in exclusive mode.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            AdmissionGuard::Shared(_) => None,
            AdmissionGuard::Exclusive(guard) => Some(&mut **guard),
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for AdmissionGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            AdmissionGuard::Shared(guard) => &**guard,
            AdmissionGuard::Exclusive(guard) => &**guard,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
