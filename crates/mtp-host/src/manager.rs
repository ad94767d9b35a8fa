//! Per-device lifecycle orchestration (spec §4.1–§4.12 end to end): binds a
//! transport, opens a session, probes capabilities, resolves quirks into an
//! effective tuning, spawns the device actor and its crawl scheduler, and
//! exposes the extension RPC surface (spec §6.3) over the result.

use crate::rpc::{ExtensionRpc, ObjectInfo as RpcObjectInfo};
use crate::transfers;
use async_trait::async_trait;
use mtp_cache::{CacheKey, ContentCache};
use mtp_device::{Device, DeviceInfo};
use mtp_quirks::{Capabilities, EffectiveTuning, Fingerprint, QuirkDatabase};
use mtp_scheduler::CrawlScheduler;
use mtp_session::{probe_capabilities, Session};
use mtp_store::identity::Signals;
use mtp_store::{CacheKey as CapabilityCacheKey, CachedCapabilities, CapabilityCache, LiveIndex, Store, TransferJournal};
use mtp_transfer::Etag;
use mtp_transport::{Transport, TransportError, UsbHostApi};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything the caller already knows about a device before this crate's
/// transport layer is invoked — mtp-transport deliberately carries no
/// vid/pid/serial fields (spec §3.2/§3.4), so enumeration and descriptor
/// reads stay the caller's responsibility.
#[derive(Debug, Clone)]
pub struct DeviceIdentityHint {
    pub vid: u16,
    pub pid: u16,
    pub bcd_device: Option<u16>,
    pub iface_class: Option<u8>,
    pub iface_subclass: Option<u8>,
    pub iface_protocol: Option<u8>,
    pub usb_serial: Option<String>,
}

const BOOTSTRAP_PROBE_TIMEOUT: Duration = Duration::from_millis(2_000);
const INTERRUPT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

fn bootstrap_tuning() -> EffectiveTuning {
    EffectiveTuning {
        max_chunk_bytes: 1024 * 1024,
        io_timeout_ms: 8_000,
        handshake_timeout_ms: 6_000,
        inactivity_timeout_ms: 30_000,
        overall_deadline_ms: 300_000,
        stabilize_ms: 0,
        reset_on_open: false,
        operations: HashMap::new(),
        hooks: vec![],
        flags: Default::default(),
        policy: Default::default(),
    }
}

/// A connected device: the actor, its crawl scheduler, and the store/cache
/// handles the RPC surface needs.
pub struct DeviceManager<H: UsbHostApi + 'static> {
    device: Arc<Device<H>>,
    scheduler: CrawlScheduler<H>,
    index: LiveIndex,
    journal: TransferJournal,
    cache: ContentCache,
    domain_id: String,
    capabilities: Capabilities,
}

impl<H: UsbHostApi + 'static> DeviceManager<H> {
    /// Runs the full bootstrap sequence and seeds the index (spec §4.1,
    /// §4.11 seed-on-connect): bind the transport, open the session, probe
    /// capabilities, resolve the effective tuning from `quirks`, spawn the
    /// device actor and its scheduler, then crawl once before returning.
    pub async fn connect(
        host: H,
        detach_kernel_driver: bool,
        hint: DeviceIdentityHint,
        quirks: &QuirkDatabase,
        tuning_overrides: &HashMap<String, String>,
        store: &Store,
        cache: ContentCache,
        on_change: impl Fn(String, std::collections::HashSet<u32>) + Send + Sync + 'static,
    ) -> Result<Self, crate::Error> {
        let mut transport = Transport::new(host, detach_kernel_driver);
        transport.open(BOOTSTRAP_PROBE_TIMEOUT, || {}, |_h, _b| Ok(()))?;
        let mut session = Session::new(transport);
        let bootstrap = bootstrap_tuning();
        session.open(&bootstrap).await?;

        let info = fetch_device_info(&mut session, &bootstrap)?;

        let fingerprint = Fingerprint {
            vid: hint.vid,
            pid: hint.pid,
            bcd_device: hint.bcd_device,
            iface_class: hint.iface_class,
            iface_subclass: hint.iface_subclass,
            iface_protocol: hint.iface_protocol,
        };
        let capability_cache = store.capability_cache();
        let cache_key = to_cache_key(&fingerprint);
        let capabilities = match capability_cache.get(cache_key).await.map_err(mtp_scheduler::SchedulerError::from)? {
            Some(cached) => from_cached(cached),
            None => {
                let probed = probe_capabilities(&mut session, &info.operations_supported, &info.events_supported, None, |session| {
                    let mut buf = [0u8; 64];
                    !matches!(session.transport_mut().interrupt_read(&mut buf, INTERRUPT_PROBE_TIMEOUT), Err(TransportError::Timeout))
                });
                capability_cache.put(cache_key, to_cached(probed, mtp_store::capability_cache::probed_now())).await.map_err(mtp_scheduler::SchedulerError::from)?;
                probed
            }
        };

        let quirk = quirks.match_fingerprint(&fingerprint);
        let effective = quirks.build_effective(&fingerprint, capabilities, None, quirk, Some(tuning_overrides));

        let device = Arc::new(Device::spawn(session, effective));

        let signals = Signals {
            usb_serial: hint.usb_serial,
            mtp_serial: non_empty(info.serial_number.clone()),
            vid: hint.vid,
            pid: hint.pid,
            manufacturer: info.manufacturer.clone(),
            model: info.model.clone(),
        };
        let index = store.live_index();
        let identity = index.resolve_identity(&signals).await.map_err(mtp_scheduler::SchedulerError::from)?;

        let journal = store.journal();
        let scheduler = CrawlScheduler::spawn(device.clone(), index.clone(), identity.domain_id.clone(), capabilities.supports_events, on_change);
        let _ = scheduler.seed_on_connect().await.map_err(crate::Error::from)?;

        Ok(Self { device, scheduler, index, journal, cache, domain_id: identity.domain_id, capabilities })
    }

    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn device(&self) -> &Arc<Device<H>> {
        &self.device
    }

    pub fn boost_subtree(&self, storage_id: u32, parent: Option<u32>) {
        self.scheduler.boost_subtree(storage_id, parent);
    }

    async fn resolve_storage(&self, handle: u32) -> Result<u32, crate::Error> {
        for storage_id in self.index.storages(&self.domain_id).await.map_err(mtp_scheduler::SchedulerError::from)? {
            if self.index.object(&self.domain_id, storage_id, handle).await.map_err(mtp_scheduler::SchedulerError::from)?.is_some() {
                return Ok(storage_id);
            }
        }
        Err(crate::Error::Device(mtp_device::DeviceError::ObjectNotFound(handle)))
    }
}

fn to_cache_key(fp: &Fingerprint) -> CapabilityCacheKey {
    CapabilityCacheKey {
        vid: fp.vid,
        pid: fp.pid,
        bcd_device: fp.bcd_device,
        iface_class: fp.iface_class,
        iface_subclass: fp.iface_subclass,
        iface_protocol: fp.iface_protocol,
    }
}

fn from_cached(c: CachedCapabilities) -> Capabilities {
    Capabilities { partial_read: c.partial_read, partial_read64: c.partial_read64, partial_write: c.partial_write, supports_events: c.supports_events, prefer_prop_list: c.prefer_prop_list }
}

fn to_cached(c: Capabilities, probed_at: i64) -> CachedCapabilities {
    CachedCapabilities { partial_read: c.partial_read, partial_read64: c.partial_read64, partial_write: c.partial_write, supports_events: c.supports_events, prefer_prop_list: c.prefer_prop_list, probed_at }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Mirrors the device actor's private `device_info()` helper: there is no
/// public way to issue `GetDeviceInfo` before a `Device` exists, so this
/// bootstrap path runs the same call directly against the session.
fn fetch_device_info<H: UsbHostApi>(session: &mut Session<H>, tuning: &EffectiveTuning) -> Result<DeviceInfo, crate::Error> {
    let timeout = Duration::from_millis(tuning.io_timeout_ms);
    let outcome = session.call(mtp_codec::OperationCode::GetDeviceInfo as u16, &[], None, timeout)?;
    if outcome.response_code != mtp_codec::ResponseCode::Ok as u16 {
        return Err(crate::Error::Device(mtp_device::DeviceError::DeviceError(outcome.response_code)));
    }
    DeviceInfo::decode(&outcome.payload).map_err(|e| crate::Error::Device(mtp_device::DeviceError::MalformedResponse(e.to_string())))
}

fn to_rpc_object(row: mtp_store::IndexedObject) -> RpcObjectInfo {
    RpcObjectInfo { handle: row.handle, name: row.name, is_folder: row.is_directory, size: row.size_bytes, mtime: row.mtime }
}

#[async_trait]
impl<H: UsbHostApi + 'static> ExtensionRpc for DeviceManager<H> {
    async fn list(&self, domain_id: &str, parent_handle: Option<u32>) -> Result<Vec<RpcObjectInfo>, crate::Error> {
        if domain_id != self.domain_id {
            return Err(crate::Error::NotConnected(domain_id.to_string()));
        }
        let mut out = Vec::new();
        for storage_id in self.index.storages(domain_id).await.map_err(mtp_scheduler::SchedulerError::from)? {
            let rows = self.index.children(domain_id, storage_id, parent_handle).await.map_err(mtp_scheduler::SchedulerError::from)?;
            out.extend(rows.into_iter().map(to_rpc_object));
        }
        Ok(out)
    }

    async fn materialize(&self, domain_id: &str, storage_id: u32, handle: u32) -> Result<PathBuf, crate::Error> {
        if domain_id != self.domain_id {
            return Err(crate::Error::NotConnected(domain_id.to_string()));
        }
        let row = self
            .index
            .object(domain_id, storage_id, handle)
            .await
            .map_err(mtp_scheduler::SchedulerError::from)?
            .ok_or(mtp_device::DeviceError::ObjectNotFound(handle))?;
        let device = self.device.clone();
        let journal = self.journal.clone();
        let domain_id = domain_id.to_string();
        let etag = Etag { size: row.size_bytes, mtime: row.mtime };
        let key = CacheKey::new(domain_id.clone(), storage_id, handle);
        let size = row.size_bytes.unwrap_or(0);
        let supports_partial64 = self.capabilities.partial_read64;
        self.cache
            .materialize(key, move |dest| async move {
                transfers::journaled_read(&device, &journal, &domain_id, handle, size, supports_partial64, dest, etag).await.map_err(|e| mtp_cache::CacheError::Fetch(e.to_string()))?;
                Ok(size)
            })
            .await
            .map_err(crate::Error::from)
    }

    async fn create_item(&self, domain_id: &str, parent_handle: u32, name: &str, size: u64, source_path: &Path) -> Result<u32, crate::Error> {
        if domain_id != self.domain_id {
            return Err(crate::Error::NotConnected(domain_id.to_string()));
        }
        let storage_id = self.resolve_storage(parent_handle).await?;
        let file = std::fs::File::open(source_path).map_err(|e| crate::Error::Config(e.to_string()))?;
        const FORMAT_UNDEFINED: u16 = 0x3000;
        let handle = transfers::journaled_write(
            &self.device,
            &self.journal,
            domain_id,
            parent_handle,
            name,
            size,
            storage_id,
            FORMAT_UNDEFINED,
            self.capabilities.partial_write,
            file,
            source_path,
        )
        .await?;
        self.scheduler.boost_subtree(storage_id, Some(parent_handle));
        Ok(handle)
    }

    /// PTP has no in-place content replace: this deletes the old object and
    /// recreates it under the same parent with the same name (spec §6.3
    /// leaves the device-side strategy unspecified; §9 records this
    /// choice).
    async fn modify_item(&self, domain_id: &str, handle: u32, new_contents_path: &Path) -> Result<(), crate::Error> {
        if domain_id != self.domain_id {
            return Err(crate::Error::NotConnected(domain_id.to_string()));
        }
        let storage_id = self.resolve_storage(handle).await?;
        let row = self
            .index
            .object(domain_id, storage_id, handle)
            .await
            .map_err(mtp_scheduler::SchedulerError::from)?
            .ok_or(mtp_device::DeviceError::ObjectNotFound(handle))?;
        let parent_handle = row.parent_handle.unwrap_or(0);
        let size = std::fs::metadata(new_contents_path).map_err(|e| crate::Error::Config(e.to_string()))?.len();
        let file = std::fs::File::open(new_contents_path).map_err(|e| crate::Error::Config(e.to_string()))?;

        self.device.delete(handle).await?;
        const FORMAT_UNDEFINED: u16 = 0x3000;
        transfers::journaled_write(
            &self.device,
            &self.journal,
            domain_id,
            parent_handle,
            &row.name,
            size,
            storage_id,
            FORMAT_UNDEFINED,
            self.capabilities.partial_write,
            file,
            new_contents_path,
        )
        .await?;
        self.scheduler.boost_subtree(storage_id, row.parent_handle);
        Ok(())
    }

    async fn delete_item(&self, domain_id: &str, handle: u32) -> Result<(), crate::Error> {
        if domain_id != self.domain_id {
            return Err(crate::Error::NotConnected(domain_id.to_string()));
        }
        self.device.delete(handle).await?;
        Ok(())
    }
}
