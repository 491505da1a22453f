//! Device and stream arbitration between independent callers.
//!
//! A [`DeviceManager`] is the single authority over accelerator devices and
//! work streams for one accelerator session. It is constructed explicitly
//! and shared by `Arc`; callers register to obtain a [`CallerId`] and then
//! claim devices and streams through it.
//!
//! Ownership is tracked in two arenas:
//!
//! - callers, each holding a claim count per device,
//! - streams, each bound to exactly one device and owned by a set of callers.
//!
//! A device context is reset when the last claim on it is released. A stream
//! is synchronized and destroyed when its last owner releases it. Dropping the
//! manager tears down whatever callers left behind.
//!
//! The tables lock is never held across a platform call that may block.
//! A release is planned under the lock (claims taken, shared streams left,
//! sole-owned streams marked retiring), carried out on the platform with the
//! lock released, then committed. If the platform fails, everything it did
//! not tear down is put back. New streams on a device wait for a reset of
//! that device to finish.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use slotmap::{new_key_type, SlotMap};
use tracing::{debug, error, warn};

use crate::error::{GpuError, ManagerError, Result};
use crate::platform::{with_current_device, DeviceId, Platform};

new_key_type! {
    /// Identifies a registered caller.
    pub struct CallerId;
    /// Identifies a live stream.
    pub struct StreamId;
}

#[derive(Debug, Default)]
struct CallerRecord {
    /// Claim count per device.
    devices: BTreeMap<DeviceId, usize>,
}

struct StreamRecord<S> {
    device: DeviceId,
    owners: BTreeSet<CallerId>,
    stream: Arc<S>,
    /// Last owner is releasing it; no new owners.
    retiring: bool,
}

/// A release taken out of the tables, waiting on the platform.
struct Release<S> {
    caller: CallerId,
    device: DeviceId,
    /// Claims taken from the caller.
    claims: usize,
    /// Streams the caller left that still have other owners.
    shared: Vec<StreamId>,
    /// Streams the caller owned alone, in destruction order.
    retiring: Vec<(StreamId, Arc<S>)>,
    /// Whether the device context goes too.
    reset: bool,
}

struct Tables<S> {
    callers: SlotMap<CallerId, CallerRecord>,
    streams: SlotMap<StreamId, StreamRecord<S>>,
    /// Devices whose context is being reset.
    resetting: BTreeSet<DeviceId>,
    /// Completed resets per device.
    epochs: BTreeMap<DeviceId, u64>,
}

impl<S> Tables<S> {
    fn claims_on(&self, device: DeviceId) -> usize {
        self.callers
            .values()
            .filter_map(|c| c.devices.get(&device))
            .sum()
    }

    fn epoch(&self, device: DeviceId) -> u64 {
        self.epochs.get(&device).copied().unwrap_or(0)
    }

    fn streams_of(&self, caller: CallerId, device: Option<DeviceId>) -> Vec<(StreamId, DeviceId)> {
        self.streams
            .iter()
            .filter(|(_, r)| !r.retiring && r.owners.contains(&caller))
            .filter(|(_, r)| device.map_or(true, |d| r.device == d))
            .map(|(id, r)| (id, r.device))
            .collect()
    }

    fn begin_release(
        &mut self,
        caller: CallerId,
        device: DeviceId,
        claims: usize,
        streams: &[StreamId],
    ) -> Release<S> {
        let mut release = Release {
            caller,
            device,
            claims,
            shared: Vec::new(),
            retiring: Vec::new(),
            reset: false,
        };

        for &id in streams {
            let Some(record) = self.streams.get_mut(id) else {
                continue;
            };
            if record.owners.len() > 1 {
                record.owners.remove(&caller);
                release.shared.push(id);
            } else {
                record.retiring = true;
                release.retiring.push((id, Arc::clone(&record.stream)));
            }
        }

        if claims > 0 {
            if let Some(record) = self.callers.get_mut(caller) {
                let left = record.devices.get(&device).copied().unwrap_or(0).saturating_sub(claims);
                if left == 0 {
                    record.devices.remove(&device);
                } else {
                    record.devices.insert(device, left);
                }
            }
            release.reset = self.claims_on(device) == 0 && self.resetting.insert(device);
        }

        if release.reset {
            let orphans = self
                .streams
                .values()
                .filter(|r| r.device == device && !r.retiring)
                .count();
            if orphans > 0 {
                warn!(%device, orphans, "resetting device with streams still bound");
            }
        }
        release
    }

    /// Apply the outcome of `release`: the first `destroyed` retiring streams
    /// are gone; on failure everything else is handed back to the caller.
    fn finish_release(&mut self, release: &Release<S>, destroyed: usize, succeeded: bool) {
        for (id, _) in &release.retiring[..destroyed] {
            self.streams.remove(*id);
        }
        if release.reset {
            self.resetting.remove(&release.device);
            if succeeded {
                *self.epochs.entry(release.device).or_insert(0) += 1;
            }
        }
        if succeeded {
            return;
        }

        for (id, _) in &release.retiring[destroyed..] {
            if let Some(record) = self.streams.get_mut(*id) {
                record.retiring = false;
            }
        }
        for id in &release.shared {
            if let Some(record) = self.streams.get_mut(*id) {
                record.owners.insert(release.caller);
            }
        }
        if release.claims > 0 {
            if let Some(record) = self.callers.get_mut(release.caller) {
                *record.devices.entry(release.device).or_insert(0) += release.claims;
            }
        }
    }
}

/// Log a failed operation and hand the error back.
fn report(err: impl Into<ManagerError>) -> ManagerError {
    let err = err.into();
    error!(error = %err, "device manager operation failed");
    err
}

/// Arbiter of accelerator devices and streams.
pub struct DeviceManager<P: Platform> {
    platform: P,
    tables: Mutex<Tables<P::Stream>>,
    reset_done: Condvar,
}

impl<P: Platform> DeviceManager<P> {
    /// Create a manager over `platform`.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            tables: Mutex::new(Tables {
                callers: SlotMap::with_key(),
                streams: SlotMap::with_key(),
                resetting: BTreeSet::new(),
                epochs: BTreeMap::new(),
            }),
            reset_done: Condvar::new(),
        }
    }

    /// The platform this manager drives.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Register a new caller with no claims.
    pub fn register_caller(&self) -> CallerId {
        let caller = self.tables.lock().callers.insert(CallerRecord::default());
        debug!(?caller, "registered caller");
        caller
    }

    /// Release every stream and device claim `caller` still holds, then
    /// forget the caller.
    ///
    /// Work proceeds one device at a time. If a device fails to release, its
    /// claims and streams are restored, devices already released stay
    /// released and the caller stays registered so the call can be retried.
    pub fn unregister_caller(&self, caller: CallerId) -> Result<()> {
        loop {
            let release = {
                let mut tables = self.tables.lock();
                let claimed = tables
                    .callers
                    .get(caller)
                    .ok_or_else(|| report(ManagerError::UnknownCaller))?
                    .devices
                    .iter()
                    .next()
                    .map(|(&device, &count)| (device, count));
                let owned = tables.streams_of(caller, None);
                let Some((device, claims)) =
                    claimed.or_else(|| owned.first().map(|&(_, device)| (device, 0)))
                else {
                    tables.callers.remove(caller);
                    break;
                };
                let streams: Vec<StreamId> = owned
                    .iter()
                    .filter(|&&(_, d)| d == device)
                    .map(|&(id, _)| id)
                    .collect();
                tables.begin_release(caller, device, claims, &streams)
            };
            self.run_release(release)?;
        }
        debug!(?caller, "unregistered caller");
        Ok(())
    }

    /// Number of devices visible to the process.
    pub fn device_count(&self) -> Result<usize> {
        self.platform.device_count().map_err(report)
    }

    fn check_device(&self, device: DeviceId) -> Result<()> {
        let count = self.device_count()?;
        if device.0 >= count {
            return Err(report(ManagerError::InvalidDevice { device, count }));
        }
        Ok(())
    }

    /// Record a claim by `caller` on `device`.
    pub fn acquire_device(&self, caller: CallerId, device: DeviceId) -> Result<()> {
        self.check_device(device)?;
        let mut tables = self.tables.lock();
        let record = tables
            .callers
            .get_mut(caller)
            .ok_or_else(|| report(ManagerError::UnknownCaller))?;
        *record.devices.entry(device).or_insert(0) += 1;
        debug!(?caller, %device, "device claimed");
        Ok(())
    }

    /// Remove one claim by `caller` on `device`.
    ///
    /// When this is the caller's last claim on the device, the caller's
    /// streams on that device are released too. When no caller claims the
    /// device afterwards, its context is reset. If the platform fails, the
    /// claim and every stream that was not destroyed are restored.
    pub fn release_device(&self, caller: CallerId, device: DeviceId) -> Result<()> {
        let release = {
            let mut tables = self.tables.lock();
            let held = tables
                .callers
                .get(caller)
                .ok_or_else(|| report(ManagerError::UnknownCaller))?
                .devices
                .get(&device)
                .copied()
                .unwrap_or(0);
            if held == 0 {
                return Err(report(ManagerError::NoDeviceClaim(device)));
            }
            let streams: Vec<StreamId> = if held == 1 {
                tables
                    .streams_of(caller, Some(device))
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect()
            } else {
                Vec::new()
            };
            tables.begin_release(caller, device, 1, &streams)
        };
        self.run_release(release)?;
        debug!(?caller, %device, "device released");
        Ok(())
    }

    /// Carry out `release` on the platform and commit or roll back.
    fn run_release(&self, release: Release<P::Stream>) -> Result<()> {
        let (destroyed, result) = if release.reset || !release.retiring.is_empty() {
            self.retire(&release)
        } else {
            (0, Ok(()))
        };
        self.tables
            .lock()
            .finish_release(&release, destroyed, result.is_ok());
        if release.reset {
            self.reset_done.notify_all();
        }
        result.map_err(report)
    }

    /// Synchronize every retiring stream, reset the device if asked, then
    /// destroy the streams. Returns how many streams were destroyed.
    fn retire(&self, release: &Release<P::Stream>) -> (usize, std::result::Result<(), GpuError>) {
        let device = release.device;
        let mut destroyed = 0;
        let result = with_current_device(&self.platform, device, |p| {
            for (_, handle) in &release.retiring {
                p.synchronize(handle)?;
            }
            if release.reset {
                p.reset_device(device)?;
                debug!(%device, "device reset");
            }
            for (stream, handle) in &release.retiring {
                if let Err(err) = p.destroy_stream(handle) {
                    if !release.reset {
                        return Err(err);
                    }
                    warn!(?stream, %device, error = %err, "stream destroy failed after device reset");
                }
                destroyed += 1;
                debug!(?stream, %device, "stream destroyed");
            }
            Ok(())
        });
        (destroyed, result)
    }

    /// Give `caller` a stream on `device`.
    ///
    /// An empty `stream` handle gets a freshly created stream. A handle to
    /// an existing stream adds `caller` as an owner, provided the stream is
    /// bound to `device`; asking again for a stream the caller already owns
    /// changes nothing.
    pub fn acquire_stream(
        &self,
        caller: CallerId,
        stream: &mut Option<StreamId>,
        device: DeviceId,
    ) -> Result<StreamId> {
        self.check_device(device)?;
        loop {
            let epoch = {
                let mut tables = self.tables.lock();
                loop {
                    if !tables.callers.contains_key(caller) {
                        return Err(report(ManagerError::UnknownCaller));
                    }

                    if let Some(id) = *stream {
                        let record = match tables.streams.get_mut(id) {
                            Some(r) if !r.retiring => r,
                            _ => return Err(report(ManagerError::UnknownStream)),
                        };
                        if record.device != device {
                            return Err(report(ManagerError::StreamDeviceMismatch {
                                bound: record.device,
                                requested: device,
                            }));
                        }
                        if record.owners.insert(caller) {
                            debug!(?caller, stream = ?id, %device, "stream shared");
                        }
                        return Ok(id);
                    }

                    if !tables.resetting.contains(&device) {
                        break tables.epoch(device);
                    }
                    debug!(?caller, %device, "waiting for device reset");
                    self.reset_done.wait(&mut tables);
                }
            };

            let created = with_current_device(&self.platform, device, |p| p.create_stream(device))
                .map_err(report)?;

            let mut tables = self.tables.lock();
            let caller_gone = !tables.callers.contains_key(caller);
            if caller_gone || tables.resetting.contains(&device) || tables.epoch(device) != epoch {
                // Created on a context that was reset meanwhile, or for nobody.
                drop(tables);
                if let Err(err) =
                    with_current_device(&self.platform, device, |p| p.destroy_stream(&created))
                {
                    warn!(%device, error = %err, "failed to destroy unclaimed stream");
                }
                if caller_gone {
                    return Err(report(ManagerError::UnknownCaller));
                }
                continue;
            }

            let id = tables.streams.insert(StreamRecord {
                device,
                owners: BTreeSet::from([caller]),
                stream: Arc::new(created),
                retiring: false,
            });
            *stream = Some(id);
            debug!(?caller, stream = ?id, %device, "stream created");
            return Ok(id);
        }
    }

    /// Drop `caller`'s ownership of `stream` on `device`.
    ///
    /// The last owner's release synchronizes and destroys the stream. If
    /// that fails the stream stays bound and owned by `caller`.
    pub fn release_stream(&self, caller: CallerId, stream: StreamId, device: DeviceId) -> Result<()> {
        let release = {
            let mut tables = self.tables.lock();
            match tables.streams.get(stream) {
                Some(r) if !r.retiring && r.device == device && r.owners.contains(&caller) => {}
                _ => return Err(report(ManagerError::NoStreamClaim(device))),
            }
            tables.begin_release(caller, device, 0, &[stream])
        };
        self.run_release(release)?;
        debug!(?caller, ?stream, %device, "stream released");
        Ok(())
    }

    /// Block the calling thread until all work queued on `stream` completes.
    pub fn synchronize_stream(&self, stream: StreamId) -> Result<()> {
        let (device, handle) = self.bound(stream)?;
        with_current_device(&self.platform, device, |p| p.synchronize(&handle)).map_err(report)
    }

    /// Make `stream`'s device the calling thread's execution target.
    pub fn reserve_accelerator_context(&self, stream: StreamId) -> Result<()> {
        let (device, _) = self.bound(stream)?;
        self.platform.set_current_device(device).map_err(report)
    }

    fn bound(&self, stream: StreamId) -> Result<(DeviceId, Arc<P::Stream>)> {
        let tables = self.tables.lock();
        let record = tables
            .streams
            .get(stream)
            .ok_or_else(|| report(ManagerError::UnknownStream))?;
        Ok((record.device, Arc::clone(&record.stream)))
    }

    /// Platform stream behind `stream`, for issuing work on it.
    pub fn stream_handle(&self, stream: StreamId) -> Result<Arc<P::Stream>> {
        self.bound(stream).map(|(_, handle)| handle)
    }

    /// The device `caller` claims, if it holds exactly one claim.
    ///
    /// Claims are counted, not devices: a caller that claimed the same
    /// device twice has no single answer either.
    pub fn query_device_for_caller(&self, caller: CallerId) -> Option<DeviceId> {
        let tables = self.tables.lock();
        let record = tables.callers.get(caller)?;
        let claims: usize = record.devices.values().sum();
        match (claims, record.devices.keys().next()) {
            (1, Some(&device)) => Some(device),
            _ => {
                debug!(?caller, claims, "no unique device for caller");
                None
            }
        }
    }

    /// Device `stream` is bound to.
    pub fn query_device_for_stream(&self, stream: StreamId) -> Option<DeviceId> {
        self.tables.lock().streams.get(stream).map(|r| r.device)
    }

    /// Total claims held on `device` across all callers.
    pub fn claims_on(&self, device: DeviceId) -> usize {
        self.tables.lock().claims_on(device)
    }

    /// Number of callers owning `stream`; zero once it is destroyed.
    pub fn stream_owner_count(&self, stream: StreamId) -> usize {
        self.tables
            .lock()
            .streams
            .get(stream)
            .map_or(0, |r| r.owners.len())
    }
}

impl<P: Platform> Drop for DeviceManager<P> {
    fn drop(&mut self) {
        let tables = self.tables.get_mut();
        let mut devices = BTreeSet::new();

        for (stream, record) in tables.streams.drain() {
            let result = with_current_device(&self.platform, record.device, |p| {
                p.synchronize(&record.stream)?;
                p.destroy_stream(&record.stream)
            });
            if let Err(err) = result {
                warn!(?stream, device = %record.device, error = %err, "stream teardown failed");
            }
            devices.insert(record.device);
        }

        for device in devices {
            if let Err(err) = with_current_device(&self.platform, device, |p| p.reset_device(device)) {
                warn!(%device, error = %err, "device reset failed during teardown");
            }
        }

        tables.callers.clear();
    }
}
