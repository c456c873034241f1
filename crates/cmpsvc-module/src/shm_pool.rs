//! `ShmSlotPool` — default `SlotPool` implementation.
//!
//! The slot table lives in a POSIX shared-memory object so that every
//! client process sees the same in-use bitmap. The coordinator creates,
//! sizes and initializes the segment once at startup and unlinks it on
//! drop; clients only attach to an existing segment.
//!
//! ```text
//! +------------------+  magic (written last), version, capacity
//! | header           |
//! +------------------+
//! | SpinLock<bitmap> |  the only mutable shared state
//! +------------------+
//! | SlotRecord[64]   |  index + request/response channel names,
//! +------------------+  immutable after creation
//! ```

use core::mem::size_of;
use core::ptr::{addr_of_mut, NonNull};
use core::sync::atomic::{AtomicU64, Ordering};
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use cmpsvc_core::constants::MAX_POOL_SIZE;
use cmpsvc_core::error::{CmpError, Result};
use cmpsvc_core::slot::{SlotBitmap, SlotIndex, SlotPool};

use crate::spinlock::{fatal_lock_stuck, SpinLock, SpinPolicy};

const SEGMENT_MAGIC: u64 = u64::from_le_bytes(*b"CMPSVC\0\x01");
const SEGMENT_VERSION: u32 = 1;

/// Capacity of a channel name (including the leading slash)
pub const CHANNEL_NAME_CAP: usize = 60;

/// Fixed-size channel name stored in the segment
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ChannelName {
    len: u32,
    bytes: [u8; CHANNEL_NAME_CAP],
}

impl ChannelName {
    fn new(name: &str) -> Result<Self> {
        if name.len() > CHANNEL_NAME_CAP {
            return Err(CmpError::Config(format!(
                "channel name {:?} longer than {} bytes",
                name, CHANNEL_NAME_CAP
            )));
        }
        let mut bytes = [0u8; CHANNEL_NAME_CAP];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { len: name.len() as u32, bytes })
    }

    pub fn as_str(&self) -> Result<&str> {
        let len = (self.len as usize).min(CHANNEL_NAME_CAP);
        std::str::from_utf8(&self.bytes[..len]).map_err(|_| {
            CmpError::segment("read", io::Error::new(io::ErrorKind::InvalidData, "channel name"))
        })
    }
}

/// Request/response channel identities of one slot
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SlotRecord {
    pub index: u32,
    _pad: u32,
    pub request: ChannelName,
    pub response: ChannelName,
}

/// Queue names for slot `index` of segment `segment`
pub fn channel_names(segment: &str, index: usize) -> (String, String) {
    (format!("{}-req-{}", segment, index), format!("{}-rsp-{}", segment, index))
}

#[repr(C)]
struct SlotSegment {
    magic: AtomicU64,
    version: u32,
    capacity: u32,
    table: SpinLock<SlotBitmap>,
    slots: [SlotRecord; MAX_POOL_SIZE],
}

const SEGMENT_SIZE: usize = size_of::<SlotSegment>();

/// Handle on the shared slot table
pub struct ShmSlotPool {
    segment: NonNull<SlotSegment>,
    name: String,
    capacity: usize,
    owner: bool,
    policy: SpinPolicy,
}

// Safety: the mapping stays valid for the handle's lifetime; the only
// mutable shared state is behind the segment's SpinLock, the rest is
// written once before the magic is published.
unsafe impl Send for ShmSlotPool {}
unsafe impl Sync for ShmSlotPool {}

impl ShmSlotPool {
    /// Create and initialize the segment (coordinator only)
    ///
    /// A stale segment of the same name left by a crashed coordinator is
    /// unlinked first.
    pub fn create(name: &str, capacity: usize, policy: SpinPolicy) -> Result<Self> {
        let bitmap = SlotBitmap::new(capacity)?;
        let mut records = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let (req, rsp) = channel_names(name, i);
            records.push(SlotRecord {
                index: i as u32,
                _pad: 0,
                request: ChannelName::new(&req)?,
                response: ChannelName::new(&rsp)?,
            });
        }

        match shm_unlink(name) {
            Ok(()) => tracing::warn!(segment = name, "removed stale shared segment"),
            Err(Errno::ENOENT) => {}
            Err(e) => return Err(CmpError::segment("unlink", e.into())),
        }

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o600),
        )
        .map_err(|e| CmpError::segment("create", e.into()))?;

        let file = File::from(fd);
        if let Err(e) = ftruncate(&file, SEGMENT_SIZE as _) {
            unlink_partial(name);
            return Err(CmpError::segment("truncate", e.into()));
        }

        let segment = match map_segment(&file) {
            Ok(seg) => seg,
            Err(e) => {
                unlink_partial(name);
                return Err(e);
            }
        };

        // Safety: freshly truncated (zeroed) and mapped; nobody else can
        // have validated the segment since the magic is still zero.
        unsafe {
            let seg = segment.as_ptr();
            addr_of_mut!((*seg).version).write(SEGMENT_VERSION);
            addr_of_mut!((*seg).capacity).write(capacity as u32);
            SpinLock::init_at(addr_of_mut!((*seg).table), bitmap);
            let slots = addr_of_mut!((*seg).slots) as *mut SlotRecord;
            for (i, rec) in records.into_iter().enumerate() {
                slots.add(i).write(rec);
            }
            (*seg).magic.store(SEGMENT_MAGIC, Ordering::Release);
        }

        tracing::info!(segment = name, capacity, bytes = SEGMENT_SIZE, "created slot segment");

        Ok(Self { segment, name: name.to_string(), capacity, owner: true, policy })
    }

    /// Attach to a segment created by the coordinator
    pub fn open(name: &str, policy: SpinPolicy) -> Result<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| CmpError::segment("open", e.into()))?;
        let file = File::from(fd);

        let len = file.metadata().map_err(|e| CmpError::segment("stat", e))?.len();
        if (len as usize) < SEGMENT_SIZE {
            return Err(invalid(format!("segment is {} bytes, expected {}", len, SEGMENT_SIZE)));
        }

        let segment = map_segment(&file)?;
        // Safety: mapping is at least SEGMENT_SIZE bytes
        let (magic, version, capacity) = unsafe {
            let seg = segment.as_ref();
            (seg.magic.load(Ordering::Acquire), seg.version, seg.capacity as usize)
        };

        let bad = if magic != SEGMENT_MAGIC {
            Some("bad magic (not initialized?)".to_string())
        } else if version != SEGMENT_VERSION {
            Some(format!("version {} unsupported", version))
        } else if capacity == 0 || capacity > MAX_POOL_SIZE {
            Some(format!("capacity {} out of range", capacity))
        } else {
            None
        };
        if let Some(reason) = bad {
            // Safety: mapped above with SEGMENT_SIZE
            if let Err(e) = unsafe { munmap(segment.cast(), SEGMENT_SIZE) } {
                tracing::warn!(segment = name, error = %e, "munmap failed");
            }
            return Err(invalid(reason));
        }

        Ok(Self { segment, name: name.to_string(), capacity, owner: false, policy })
    }

    #[inline]
    fn seg(&self) -> &SlotSegment {
        // Safety: mapped and validated for our lifetime
        unsafe { self.segment.as_ref() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Channel identities of a slot
    pub fn slot(&self, slot: SlotIndex) -> Result<&SlotRecord> {
        if slot.as_usize() >= self.capacity {
            return Err(CmpError::InvalidSlot { index: slot.as_usize(), capacity: self.capacity });
        }
        Ok(&self.seg().slots[slot.as_usize()])
    }

    /// Slots currently marked in use
    pub fn in_use(&self) -> Result<usize> {
        Ok(self.lock()?.in_use())
    }

    fn lock(&self) -> Result<crate::spinlock::SpinLockGuard<'_, SlotBitmap>> {
        self.seg().table.lock(&self.policy, "slot table")
    }
}

impl SlotPool for ShmSlotPool {
    fn acquire(&self) -> Result<SlotIndex> {
        let claimed = match self.lock() {
            Ok(mut table) => table.claim_lowest(),
            Err(e) => fatal_lock_stuck(&e),
        };
        claimed.ok_or(CmpError::PoolExhausted { capacity: self.capacity })
    }

    fn release(&self, slot: SlotIndex) -> Result<()> {
        match self.lock() {
            Ok(mut table) => table.clear(slot),
            Err(e) => fatal_lock_stuck(&e),
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for ShmSlotPool {
    fn drop(&mut self) {
        // Safety: mapping created in create()/open() with SEGMENT_SIZE
        if let Err(e) = unsafe { munmap(self.segment.cast(), SEGMENT_SIZE) } {
            tracing::warn!(segment = %self.name, error = %e, "munmap failed");
        }
        if self.owner {
            match shm_unlink(self.name.as_str()) {
                Ok(()) => tracing::debug!(segment = %self.name, "unlinked slot segment"),
                Err(e) => tracing::warn!(segment = %self.name, error = %e, "shm_unlink failed"),
            }
        }
    }
}

fn map_segment(file: &File) -> Result<NonNull<SlotSegment>> {
    let len = NonZeroUsize::new(SEGMENT_SIZE)
        .ok_or_else(|| invalid("zero-sized segment".to_string()))?;
    // Safety: shared file mapping of a descriptor we own
    let ptr = unsafe {
        mmap(
            None,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            file,
            0,
        )
    }
    .map_err(|e| CmpError::segment("mmap", e.into()))?;
    Ok(ptr.cast())
}

/// Undo a half-built segment; the creation error is what gets reported
fn unlink_partial(name: &str) {
    if let Err(e) = shm_unlink(name) {
        tracing::warn!(segment = name, error = %e, "shm_unlink of partial segment failed");
    }
}

fn invalid(reason: String) -> CmpError {
    CmpError::segment("validate", io::Error::new(io::ErrorKind::InvalidData, reason))
}
