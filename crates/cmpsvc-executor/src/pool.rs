//! Channel-pool transport: N fixed channel pairs, one worker bound to each.
//!
//! The coordinator creates the shared slot segment and every channel pair
//! at startup and spawns one long-lived worker per slot. A bad request is
//! answered with the out-of-band byte and the worker keeps serving the same
//! pair; a failed response send is logged and the loop continues.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cmpsvc_core::channel::ChannelPair;
use cmpsvc_core::constants::MAX_FRAME_LEN;
use cmpsvc_core::error::Result;
use cmpsvc_core::outcome::Response;
use cmpsvc_core::slot::{SlotIndex, SlotPool};
use cmpsvc_module::mq_channel::MqChannelPair;
use cmpsvc_module::shm_pool::ShmSlotPool;

use crate::comparator::Comparator;
use crate::context::{ServiceContext, ShutdownHandle};

/// Counters of one slot worker, returned when it exits
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotStats {
    /// Requests answered with an outcome
    pub compared: u64,
    /// Requests answered with the out-of-band byte
    pub rejected: u64,
    /// Responses that could not be sent
    pub send_failures: u64,
}

/// Worker loop for one slot
///
/// Runs until a zero-length message arrives with `shutdown` set. Only a
/// receive failure ends it early.
pub fn serve_slot<C: ChannelPair>(
    slot: SlotIndex,
    channel: &C,
    cmp: &mut Comparator,
    shutdown: &ShutdownHandle,
) -> Result<SlotStats> {
    let mut buf = [0u8; MAX_FRAME_LEN];
    let mut stats = SlotStats::default();

    loop {
        let n = match channel.recv_request(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(slot = slot.as_u32(), error = %e, "request receive failed, worker exiting");
                return Err(e);
            }
        };
        if n == 0 && shutdown.is_shutdown() {
            return Ok(stats);
        }

        let response = match cmp.compare_frame(&buf[..n]) {
            Ok(outcome) => {
                stats.compared += 1;
                Response::from(outcome)
            }
            Err(e) => {
                stats.rejected += 1;
                tracing::warn!(
                    slot = slot.as_u32(),
                    kind = ?e.kind(),
                    error = %e,
                    "request rejected, answering out-of-band"
                );
                Response::OutOfBand
            }
        };

        if let Err(e) = channel.send_response(response.to_byte()) {
            stats.send_failures += 1;
            tracing::warn!(slot = slot.as_u32(), error = %e, "response send failed");
        }
    }
}

/// Spawn a named worker thread bound to `channel`
pub fn spawn_slot_worker<C>(
    ctx: &Arc<ServiceContext>,
    slot: SlotIndex,
    channel: Arc<C>,
) -> Result<JoinHandle<Result<SlotStats>>>
where
    C: ChannelPair + Sync + 'static,
{
    let ctx = Arc::clone(ctx);
    let handle = thread::Builder::new()
        .name(format!("cmp-slot-{}", slot.as_u32()))
        .spawn(move || {
            let mut cmp = ctx.comparator();
            let result = serve_slot(slot, channel.as_ref(), &mut cmp, ctx.shutdown());
            cmp.flush();
            result
        })?;
    Ok(handle)
}

/// Coordinator of the channel-pool transport
///
/// Owns the slot segment and every channel pair; dropping it (or calling
/// `shutdown`) unlinks them.
pub struct ChannelPoolService {
    ctx: Arc<ServiceContext>,
    pool: ShmSlotPool,
    channels: Vec<Arc<MqChannelPair>>,
    workers: Vec<(SlotIndex, JoinHandle<Result<SlotStats>>)>,
}

impl ChannelPoolService {
    /// Create the segment and channel pairs, then start one worker per slot
    pub fn start(ctx: Arc<ServiceContext>) -> Result<Self> {
        let cfg = ctx.config();
        let pool = ShmSlotPool::create(&cfg.segment, cfg.pool_size, *ctx.policy())?;

        let mut channels = Vec::with_capacity(cfg.pool_size);
        for i in 0..cfg.pool_size {
            let record = pool.slot(SlotIndex::new(i as u32))?;
            channels.push(Arc::new(MqChannelPair::create(
                record.request.as_str()?,
                record.response.as_str()?,
                cfg.queue_depth,
            )?));
        }

        let bound = channels.clone();
        let mut service = Self { ctx, pool, channels, workers: Vec::new() };
        for (i, channel) in bound.into_iter().enumerate() {
            let slot = SlotIndex::new(i as u32);
            let handle = match spawn_slot_worker(&service.ctx, slot, channel) {
                Ok(h) => h,
                Err(e) => {
                    service.stop_workers();
                    return Err(e);
                }
            };
            service.workers.push((slot, handle));
        }

        tracing::info!(
            segment = %service.pool.name(),
            slots = service.pool.capacity(),
            queue_depth = service.ctx.config().queue_depth,
            "channel pool started"
        );
        Ok(service)
    }

    /// The coordinator's handle on the slot table
    pub fn pool(&self) -> &ShmSlotPool {
        &self.pool
    }

    /// Wake and join every worker, then unlink the queues and the segment
    pub fn shutdown(mut self) -> Vec<SlotStats> {
        let stats = self.stop_workers();
        tracing::info!(segment = %self.pool.name(), "channel pool stopped");
        stats
    }

    fn stop_workers(&mut self) -> Vec<SlotStats> {
        self.ctx.shutdown().trigger();
        for (i, channel) in self.channels.iter().enumerate() {
            if let Err(e) = channel.wake() {
                tracing::warn!(slot = i, error = %e, "could not wake slot worker");
            }
        }

        let mut stats = Vec::with_capacity(self.workers.len());
        for (slot, handle) in self.workers.drain(..) {
            match handle.join() {
                Ok(Ok(s)) => {
                    tracing::debug!(slot = slot.as_u32(), compared = s.compared, rejected = s.rejected, "slot worker exited");
                    stats.push(s);
                }
                Ok(Err(e)) => tracing::warn!(slot = slot.as_u32(), error = %e, "slot worker failed"),
                Err(_) => tracing::error!(slot = slot.as_u32(), "slot worker panicked"),
            }
        }
        stats
    }
}

impl Drop for ChannelPoolService {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_workers();
        }
    }
}
