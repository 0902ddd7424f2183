//! # Shared-Memory Transport Module
//!
//! Implements the control region both processes map: three process-shared
//! semaphores, a single request slot, a single response slot, and the
//! correlation ids that bind a response to the request it answers.
//!
//! ## Synchronization Contract
//!
//! - `mutex` (initial value 1) grants the right to mutate the slots. A
//!   client takes it to frame a request and does **not** release it; the
//!   server releases it after consuming the message. Only one request is in
//!   flight at a time.
//! - `data_ready` counts posted but not-yet-consumed requests; the server
//!   loop blocks on it.
//! - `response_ready` counts posted responses; the requesting client blocks
//!   on it.
//!
//! ```text
//! client:  sem_wait(mutex) ─ frame ─ sem_post(data_ready) ─ sem_wait(response_ready)
//! server:  sem_wait(data_ready) ─ dispatch ─ sem_post(response_ready) ─ sem_post(mutex)
//! ```
//!
//! The transport is single-producer/single-consumer per direction. Multiple
//! client processes are serialized by `mutex`, but the single response slot
//! means interleaved request/response cycles from different clients can
//! observe each other's replies; deployments wanting concurrency should run
//! one client process at a time.

use std::cell::UnsafeCell;
use std::io;
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use shared_memory::{Shmem, ShmemConf, ShmemError};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::{Frame, MAX_MESSAGE_SIZE};

/// The fixed-layout record at the base of the shared-memory segment.
///
/// Both sides map the same bytes, so the layout is `repr(C)` and every field
/// is either a semaphore (mutated through `sem_*` calls only), an atomic, or
/// a byte buffer accessed under semaphore protection.
#[repr(C)]
pub struct SharedRegion {
    mutex: UnsafeCell<libc::sem_t>,
    data_ready: UnsafeCell<libc::sem_t>,
    response_ready: UnsafeCell<libc::sem_t>,

    has_message: AtomicBool,
    message_size: AtomicU32,
    has_response: AtomicBool,
    response_size: AtomicU32,

    current_message_id: AtomicU32,
    response_message_id: AtomicU32,

    message: UnsafeCell<[u8; MAX_MESSAGE_SIZE]>,
    response: UnsafeCell<[u8; MAX_MESSAGE_SIZE]>,
}

// Safety: the region is designed for concurrent cross-process access; the
// semaphores and atomics define who may touch the buffers at any moment.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Total bytes the shared segment must hold
    pub const SIZE: usize = size_of::<SharedRegion>();
}

// ---------------------------------------------------------------------------
// Semaphore helpers (unnamed, process-shared; no nix wrapper exists)
// ---------------------------------------------------------------------------

fn sem_init(sem: *mut libc::sem_t, initial: u32) -> Result<(), TransportError> {
    // pshared=1: the semaphore lives in shared memory and synchronizes
    // across processes.
    if unsafe { libc::sem_init(sem, 1, initial) } == -1 {
        return Err(TransportError::Semaphore(io::Error::last_os_error()));
    }
    Ok(())
}

fn sem_wait(sem: *mut libc::sem_t) -> Result<(), TransportError> {
    loop {
        if unsafe { libc::sem_wait(sem) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(TransportError::Semaphore(err));
        }
    }
}

/// Wait with a deadline. Returns `Ok(false)` on timeout.
fn sem_wait_timeout(sem: *mut libc::sem_t, timeout: Duration) -> Result<bool, TransportError> {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    let ns_total = ts.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
    ts.tv_sec += timeout.as_secs() as libc::time_t + (ns_total / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;

    loop {
        if unsafe { libc::sem_timedwait(sem, &ts) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ETIMEDOUT) => return Ok(false),
            Some(libc::EINTR) => continue,
            _ => return Err(TransportError::Semaphore(err)),
        }
    }
}

fn sem_post(sem: *mut libc::sem_t) -> Result<(), TransportError> {
    if unsafe { libc::sem_post(sem) } == -1 {
        return Err(TransportError::Semaphore(io::Error::last_os_error()));
    }
    Ok(())
}

/// A `Send`/`Sync` handle to the `data_ready` semaphore, used to unblock the
/// server loop from a signal-handling task during shutdown.
pub struct WakeHandle {
    sem: *mut libc::sem_t,
}

unsafe impl Send for WakeHandle {}
unsafe impl Sync for WakeHandle {}

impl WakeHandle {
    /// Post `data_ready` once so a blocked server loop re-checks its
    /// shutdown flag.
    pub fn wake(&self) {
        if let Err(e) = sem_post(self.sem) {
            warn!("failed to wake server loop: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Server end of the transport: owns the segment and tears it down on drop.
pub struct ServerTransport {
    shmem: Shmem,
}

// Safety: the region is only mutated per the semaphore contract; the Shmem
// handle itself is moved between threads, never shared mutably.
unsafe impl Send for ServerTransport {}
unsafe impl Sync for ServerTransport {}

impl ServerTransport {
    /// Create the shared segment under `name` and initialize the region.
    ///
    /// If a segment with this name already exists (typically left behind by
    /// a crashed server), it is adopted, reinitialized, and will be unlinked
    /// on teardown as if this process had created it.
    pub fn create(name: &str) -> Result<Self, TransportError> {
        let shmem = match ShmemConf::new().size(SharedRegion::SIZE).os_id(name).create() {
            Ok(m) => m,
            Err(ShmemError::MappingIdExists) => {
                warn!("adopting stale shared memory segment {}", name);
                let mut m = ShmemConf::new()
                    .os_id(name)
                    .open()
                    .map_err(|e| TransportError::Shmem(e.to_string()))?;
                m.set_owner(true);
                m
            }
            Err(e) => return Err(TransportError::Shmem(e.to_string())),
        };
        if shmem.len() < SharedRegion::SIZE {
            return Err(TransportError::Shmem(format!(
                "segment {} is {} bytes, need {}",
                name,
                shmem.len(),
                SharedRegion::SIZE
            )));
        }

        let region = shmem.as_ptr() as *mut SharedRegion;
        // Zero everything (flags, sizes, correlation ids, buffers), then
        // bring up the semaphores: mutex=1, data_ready=0, response_ready=0.
        unsafe {
            ptr::write_bytes(region as *mut u8, 0, SharedRegion::SIZE);
            sem_init((*region).mutex.get(), 1)?;
            sem_init((*region).data_ready.get(), 0)?;
            sem_init((*region).response_ready.get(), 0)?;
        }

        debug!("transport segment {} created ({} bytes)", name, SharedRegion::SIZE);
        Ok(Self { shmem })
    }

    fn region(&self) -> &SharedRegion {
        unsafe { &*(self.shmem.as_ptr() as *const SharedRegion) }
    }

    /// Handle for waking the loop out of [`ServerTransport::wait_for_request`].
    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            sem: self.region().data_ready.get(),
        }
    }

    /// Block until a client posts `data_ready` (or [`WakeHandle::wake`] is
    /// called during shutdown).
    pub fn wait_for_request(&self) -> Result<(), TransportError> {
        sem_wait(self.region().data_ready.get())
    }

    /// Copy the pending request frame out of the shared slot, if any.
    ///
    /// Does not clear `has_message`; call [`ServerTransport::finish_request`]
    /// once the message has been dispatched.
    pub fn take_request(&self) -> Option<Vec<u8>> {
        let region = self.region();
        if !region.has_message.load(Ordering::Acquire) {
            return None;
        }
        let size = region.message_size.load(Ordering::Acquire) as usize;
        let size = size.min(MAX_MESSAGE_SIZE);
        let bytes = unsafe { (&(*region.message.get()))[..size].to_vec() };
        Some(bytes)
    }

    /// Mark the request slot consumed and hand the send right back to the
    /// next client: clears `has_message` and releases `mutex`.
    pub fn finish_request(&self) -> Result<(), TransportError> {
        let region = self.region();
        region.has_message.store(false, Ordering::Release);
        sem_post(region.mutex.get())
    }

    /// Publish a response for `message_id` and post `response_ready`.
    ///
    /// An unconsumed previous response is overwritten; the correlation id
    /// lets the client detect a reply that is not its own.
    pub fn send_response(&self, message_id: u32, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::OversizeMessage {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let region = self.region();
        unsafe {
            (&mut (*region.response.get()))[..payload.len()].copy_from_slice(payload);
        }
        region
            .response_size
            .store(payload.len() as u32, Ordering::Release);
        region.response_message_id.store(message_id, Ordering::Release);
        region.has_response.store(true, Ordering::Release);
        sem_post(region.response_ready.get())
    }

    /// Correlation id of the request currently being processed.
    pub fn current_message_id(&self) -> u32 {
        self.region().current_message_id.load(Ordering::Acquire)
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        // Destroy the semaphores before the segment is unmapped and
        // unlinked by the Shmem drop.
        let region = self.region();
        unsafe {
            libc::sem_destroy(region.mutex.get());
            libc::sem_destroy(region.data_ready.get());
            libc::sem_destroy(region.response_ready.get());
        }
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Client end of the transport: attaches to an existing segment and only
/// unmaps on drop.
pub struct ClientTransport {
    shmem: Shmem,
}

impl std::fmt::Debug for ClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTransport").finish_non_exhaustive()
    }
}

unsafe impl Send for ClientTransport {}

impl ClientTransport {
    /// Attach to the segment a running server created under `name`.
    pub fn attach(name: &str) -> Result<Self, TransportError> {
        let shmem = ShmemConf::new()
            .os_id(name)
            .open()
            .map_err(|e| TransportError::Shmem(e.to_string()))?;
        if shmem.len() < SharedRegion::SIZE {
            return Err(TransportError::Shmem(format!(
                "segment {} is {} bytes, need {}",
                name,
                shmem.len(),
                SharedRegion::SIZE
            )));
        }
        debug!("attached to transport segment {}", name);
        Ok(Self { shmem })
    }

    fn region(&self) -> &SharedRegion {
        unsafe { &*(self.shmem.as_ptr() as *const SharedRegion) }
    }

    /// Frame and publish a request.
    ///
    /// Takes `mutex` and keeps it: the server releases it after consuming
    /// the message, which is what serializes submissions. On any failure the
    /// slot is untouched and `mutex` is released before returning.
    pub fn send_request(&self, frame: &Frame, expects_response: bool) -> Result<(), TransportError> {
        let region = self.region();
        sem_wait(region.mutex.get())?;

        if region.has_message.load(Ordering::Acquire) {
            sem_post(region.mutex.get())?;
            return Err(TransportError::BufferBusy);
        }

        let total = Frame::encoded_len(frame.payload.len());
        if total > MAX_MESSAGE_SIZE {
            sem_post(region.mutex.get())?;
            return Err(TransportError::OversizeMessage {
                size: total,
                max: MAX_MESSAGE_SIZE,
            });
        }

        unsafe {
            frame.encode_into(&mut *region.message.get());
        }
        region.message_size.store(total as u32, Ordering::Release);
        region.has_message.store(true, Ordering::Release);
        if expects_response {
            region
                .current_message_id
                .store(frame.message_id, Ordering::Release);
        }

        sem_post(region.data_ready.get())
    }

    /// Block until the server posts a response, then validate its
    /// correlation id and copy the payload out.
    ///
    /// A mismatched correlation id discards the response and fails; it is
    /// not re-queued. `timeout: None` waits forever.
    pub fn wait_for_response(
        &self,
        expected_id: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let region = self.region();
        match timeout {
            Some(t) => {
                if !sem_wait_timeout(region.response_ready.get(), t)? {
                    return Err(TransportError::ResponseTimeout);
                }
            }
            None => sem_wait(region.response_ready.get())?,
        }

        // response_ready was posted, so the slot must be populated.
        debug_assert!(region.has_response.load(Ordering::Acquire));

        let actual = region.response_message_id.load(Ordering::Acquire);
        if actual != expected_id {
            region.has_response.store(false, Ordering::Release);
            return Err(TransportError::CorrelationError {
                expected: expected_id,
                actual,
            });
        }

        let size = (region.response_size.load(Ordering::Acquire) as usize).min(MAX_MESSAGE_SIZE);
        let bytes = unsafe { (&(*region.response.get()))[..size].to_vec() };
        region.has_response.store(false, Ordering::Release);
        Ok(bytes)
    }
}
