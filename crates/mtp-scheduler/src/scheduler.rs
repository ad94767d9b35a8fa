//! The crawl scheduler (component C10, spec §4.11): one worker per device
//! drains a priority queue (boosted subtrees, translated events) ahead of
//! a normal queue (periodic refreshes), so a single device's folder
//! refreshes never race each other even though several trigger sources feed
//! the same queue.

use crate::error::SchedulerError;
use crate::ptp_time;
use mtp_device::{Device, MtpEvent};
use mtp_store::{pathkey, LiveIndex, NewObject};
use mtp_transport::UsbHostApi;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// One unit of crawl work (spec §4.11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTask {
    RefreshAllStorages,
    RefreshFolder { storage_id: u32, parent: Option<u32> },
    ObjectAdded(u32),
    ObjectRemoved(u32),
    ObjectInfoChanged(u32),
}

/// Devices that report `EventsSupported` need only an infrequent sanity
/// sweep; devices without it rely on this loop as their only refresh path.
const EVENTS_SUPPORTED_PERIOD: Duration = Duration::from_secs(15 * 60);
const POLLING_FALLBACK_PERIOD: Duration = Duration::from_secs(45);

type OnChange = Arc<dyn Fn(String, HashSet<u32>) + Send + Sync>;

/// Background refresh policies for one connected device. Dropping this
/// tears down its worker, periodic-tick and event-listener tasks.
pub struct CrawlScheduler<H: UsbHostApi + 'static> {
    device: Arc<Device<H>>,
    index: LiveIndex,
    device_id: String,
    priority_tx: mpsc::UnboundedSender<CrawlTask>,
    worker: JoinHandle<()>,
    periodic: JoinHandle<()>,
    event_listener: JoinHandle<()>,
}

impl<H: UsbHostApi + 'static> CrawlScheduler<H> {
    pub fn spawn(
        device: Arc<Device<H>>,
        index: LiveIndex,
        device_id: impl Into<String>,
        supports_events: bool,
        on_change: impl Fn(String, HashSet<u32>) + Send + Sync + 'static,
    ) -> Self {
        let device_id = device_id.into();
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let on_change: OnChange = Arc::new(on_change);

        let worker = tokio::spawn(run_worker(device.clone(), index.clone(), device_id.clone(), priority_rx, normal_rx, on_change));

        let period = if supports_events { EVENTS_SUPPORTED_PERIOD } else { POLLING_FALLBACK_PERIOD };
        let periodic = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; seed_on_connect already covers it
            loop {
                ticker.tick().await;
                if normal_tx.send(CrawlTask::RefreshAllStorages).is_err() {
                    break;
                }
            }
        });

        let event_tx = priority_tx.clone();
        let mut events = device.events();
        let event_listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(task) = translate_event(event) {
                            if event_tx.send(task).is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { device, index, device_id, priority_tx, worker, periodic, event_listener }
    }

    /// Refreshes every storage and each storage's root synchronously,
    /// bypassing the queue (spec §4.11 "seed on connect").
    pub async fn seed_on_connect(&self) -> Result<HashSet<u32>, SchedulerError> {
        refresh_all_storages(&self.device, &self.index, &self.device_id).await
    }

    /// Pushes a subtree onto the priority queue, draining ahead of
    /// periodic/event-driven tasks (spec §4.11 "boost subtree").
    pub fn boost_subtree(&self, storage_id: u32, parent: Option<u32>) {
        let _ = self.priority_tx.send(CrawlTask::RefreshFolder { storage_id, parent });
    }
}

impl<H: UsbHostApi + 'static> Drop for CrawlScheduler<H> {
    fn drop(&mut self) {
        self.worker.abort();
        self.periodic.abort();
        self.event_listener.abort();
    }
}

fn translate_event(event: MtpEvent) -> Option<CrawlTask> {
    match event {
        MtpEvent::ObjectAdded(h) => Some(CrawlTask::ObjectAdded(h)),
        MtpEvent::ObjectRemoved(h) => Some(CrawlTask::ObjectRemoved(h)),
        MtpEvent::ObjectInfoChanged(h) => Some(CrawlTask::ObjectInfoChanged(h)),
        MtpEvent::StorageAdded(_) | MtpEvent::StorageRemoved(_) | MtpEvent::DeviceInfoChanged => Some(CrawlTask::RefreshAllStorages),
        MtpEvent::StorageInfoChanged(_) | MtpEvent::DeviceReset | MtpEvent::Unknown { .. } => None,
    }
}

async fn run_worker<H: UsbHostApi + 'static>(
    device: Arc<Device<H>>,
    index: LiveIndex,
    device_id: String,
    mut priority_rx: mpsc::UnboundedReceiver<CrawlTask>,
    mut normal_rx: mpsc::UnboundedReceiver<CrawlTask>,
    on_change: OnChange,
) {
    loop {
        let first = tokio::select! {
            biased;
            task = priority_rx.recv() => task,
            task = normal_rx.recv() => task,
        };
        let Some(first) = first else { break };

        // Drain whatever else is already queued so a burst of events
        // coalesces into one `on_change` notification (spec §4.11).
        let mut batch = vec![first];
        while let Ok(t) = priority_rx.try_recv() {
            batch.push(t);
        }
        while let Ok(t) = normal_rx.try_recv() {
            batch.push(t);
        }

        let mut affected = HashSet::new();
        for task in batch {
            match execute(&device, &index, &device_id, task).await {
                Ok(parents) => affected.extend(parents),
                Err(e) => warn!(device_id = %device_id, error = %e, "crawl task failed"),
            }
        }
        if !affected.is_empty() {
            on_change(device_id.clone(), affected);
        }
    }
}

async fn execute<H: UsbHostApi + 'static>(device: &Device<H>, index: &LiveIndex, device_id: &str, task: CrawlTask) -> Result<HashSet<u32>, SchedulerError> {
    match task {
        CrawlTask::RefreshAllStorages => refresh_all_storages(device, index, device_id).await,
        CrawlTask::RefreshFolder { storage_id, parent } => refresh_folder(device, index, device_id, storage_id, parent).await,
        CrawlTask::ObjectAdded(handle) | CrawlTask::ObjectInfoChanged(handle) => upsert_single(device, index, device_id, handle).await,
        CrawlTask::ObjectRemoved(handle) => remove_single(index, device_id, handle).await,
    }
}

async fn refresh_all_storages<H: UsbHostApi + 'static>(device: &Device<H>, index: &LiveIndex, device_id: &str) -> Result<HashSet<u32>, SchedulerError> {
    let storages = device.storages().await?;
    let mut affected = HashSet::new();
    for (storage_id, _info) in storages {
        affected.extend(refresh_folder(device, index, device_id, storage_id, None).await?);
    }
    Ok(affected)
}

/// Two-phase refresh of one folder (spec §4.9 `mark_stale_children` /
/// `purge_stale`). `parent == None` is this storage's root; `Device::list`
/// instead uses `0` as its own root sentinel, so the translation happens
/// here at the boundary between the two layers.
async fn refresh_folder<H: UsbHostApi + 'static>(
    device: &Device<H>,
    index: &LiveIndex,
    device_id: &str,
    storage_id: u32,
    parent: Option<u32>,
) -> Result<HashSet<u32>, SchedulerError> {
    index.mark_stale_children(device_id, storage_id, parent).await?;

    let parent_path_key = parent_path_key(index, device_id, storage_id, parent).await?;
    let handles = device.list(storage_id, parent.unwrap_or(0)).await?;

    let mut rows = Vec::with_capacity(handles.len());
    for handle in &handles {
        let info = device.get_info(*handle).await?;
        rows.push(NewObject {
            storage_id,
            handle: *handle,
            parent_handle: parent,
            name: info.filename.clone(),
            path_key: pathkey::join(&parent_path_key, &info.filename),
            size_bytes: Some(info.object_compressed_size as u64),
            mtime: ptp_time::parse(&info.modification_date),
            format_code: info.object_format,
            is_directory: info.is_directory(),
        });
    }
    if !rows.is_empty() {
        index.upsert_objects(device_id, rows).await?;
    }
    index.purge_stale(device_id, storage_id, parent).await?;
    index.set_crawl_state(device_id, storage_id, parent, now_millis()).await?;

    Ok(HashSet::from([parent.unwrap_or(0)]))
}

async fn upsert_single<H: UsbHostApi + 'static>(device: &Device<H>, index: &LiveIndex, device_id: &str, handle: u32) -> Result<HashSet<u32>, SchedulerError> {
    let info = match device.get_info(handle).await {
        Ok(info) => info,
        Err(mtp_device::DeviceError::ObjectNotFound(_)) => return remove_single(index, device_id, handle).await,
        Err(e) => return Err(e.into()),
    };
    let parent = if info.parent_object == 0 { None } else { Some(info.parent_object) };
    let parent_path_key = parent_path_key(index, device_id, info.storage_id, parent).await?;
    let row = NewObject {
        storage_id: info.storage_id,
        handle,
        parent_handle: parent,
        name: info.filename.clone(),
        path_key: pathkey::join(&parent_path_key, &info.filename),
        size_bytes: Some(info.object_compressed_size as u64),
        mtime: ptp_time::parse(&info.modification_date),
        format_code: info.object_format,
        is_directory: info.is_directory(),
    };
    index.insert_object(device_id, row).await?;
    Ok(HashSet::from([parent.unwrap_or(0)]))
}

/// A removal event only carries a handle, and the index keys objects by
/// `(storage_id, handle)`, so this scans the device's known storages to
/// find the row. Cheap in practice: real devices expose a handful of
/// storages per connection.
async fn remove_single(index: &LiveIndex, device_id: &str, handle: u32) -> Result<HashSet<u32>, SchedulerError> {
    for storage_id in index.storages(device_id).await? {
        if let Some(row) = index.object(device_id, storage_id, handle).await? {
            index.remove_object(device_id, storage_id, handle).await?;
            return Ok(HashSet::from([row.parent_handle.unwrap_or(0)]));
        }
    }
    Ok(HashSet::new())
}

async fn parent_path_key(index: &LiveIndex, device_id: &str, storage_id: u32, parent: Option<u32>) -> Result<String, SchedulerError> {
    Ok(match parent {
        None => pathkey::root(storage_id),
        Some(h) => index.object(device_id, storage_id, h).await?.map(|o| o.path_key).unwrap_or_else(|| pathkey::root(storage_id)),
    })
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtp_codec::container;
    use mtp_quirks::EffectiveTuning;
    use mtp_store::Store;
    use mtp_transport::{Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo, MockUsbHost, Transport};
    use std::collections::HashMap;
    use tokio::sync::mpsc as test_mpsc;

    fn bound_session() -> mtp_session::Session<MockUsbHost> {
        let iface = InterfaceDescriptorInfo {
            number: 0,
            class: 0x06,
            subclass: 0x01,
            protocol: 0x01,
            endpoints: vec![
                EndpointDescriptorInfo { address: 0x81, direction: Direction::In, transfer_type: EndpointTransferType::Bulk, max_packet_size: 512 },
                EndpointDescriptorInfo { address: 0x01, direction: Direction::Out, transfer_type: EndpointTransferType::Bulk, max_packet_size: 512 },
            ],
        };
        let host = MockUsbHost::new(vec![iface]);
        let mut transport = Transport::new(host, true);
        transport.open(Duration::from_millis(500), || {}, |_h, _b| Ok(())).unwrap();
        mtp_session::Session::new(transport)
    }

    fn tuning() -> EffectiveTuning {
        EffectiveTuning {
            max_chunk_bytes: 1024 * 1024,
            io_timeout_ms: 2_000,
            handshake_timeout_ms: 2_000,
            inactivity_timeout_ms: 30_000,
            overall_deadline_ms: 60_000,
            stabilize_ms: 0,
            reset_on_open: false,
            operations: HashMap::new(),
            hooks: vec![],
            flags: Default::default(),
            policy: Default::default(),
        }
    }

    fn push_ok_response(session: &mut mtp_session::Session<MockUsbHost>, txn: u32, payload: Option<&[u8]>) {
        let host = session.transport_mut().host_mut();
        if let Some(p) = payload {
            host.bulk_read_data.push_back(Ok(container::encode_data(0x101B, txn, p)));
        }
        host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, txn, &[])));
    }

    fn object_info_bytes(storage_id: u32, parent: u32, format: u16, name: &str) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&storage_id.to_le_bytes());
        b.extend_from_slice(&format.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(&4u32.to_le_bytes()); // object_compressed_size
        b.extend_from_slice(&0u16.to_le_bytes());
        for _ in 0..6 {
            b.extend_from_slice(&0u32.to_le_bytes());
        }
        b.extend_from_slice(&parent.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&mtp_codec::encode_ptp_string(name));
        b.extend_from_slice(&mtp_codec::encode_ptp_string(""));
        b.extend_from_slice(&mtp_codec::encode_ptp_string("20240115T093000"));
        b.extend_from_slice(&mtp_codec::encode_ptp_string(""));
        b
    }

    fn storage_ids_payload(ids: &[u32]) -> Vec<u8> {
        let mut b = (ids.len() as u32).to_le_bytes().to_vec();
        for id in ids {
            b.extend_from_slice(&id.to_le_bytes());
        }
        b
    }

    fn storage_info_bytes(label: &str) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&0x0004u16.to_le_bytes());
        b.extend_from_slice(&0x0002u16.to_le_bytes());
        b.extend_from_slice(&0x0000u16.to_le_bytes());
        b.extend_from_slice(&1_000_000u64.to_le_bytes());
        b.extend_from_slice(&500_000u64.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&mtp_codec::encode_ptp_string(label));
        b.extend_from_slice(&mtp_codec::encode_ptp_string(""));
        b
    }

    fn handles_payload(handles: &[u32]) -> Vec<u8> {
        let mut b = (handles.len() as u32).to_le_bytes().to_vec();
        for h in handles {
            b.extend_from_slice(&h.to_le_bytes());
        }
        b
    }

    #[tokio::test]
    async fn seed_on_connect_populates_the_index_from_storages_and_root() {
        let mut session = bound_session();
        push_ok_response(&mut session, 1, Some(&storage_ids_payload(&[0x0001_0001])));
        push_ok_response(&mut session, 2, Some(&storage_info_bytes("Internal")));
        push_ok_response(&mut session, 3, Some(&handles_payload(&[10])));
        push_ok_response(&mut session, 4, Some(&object_info_bytes(0x0001_0001, 0, 0x3000, "a.jpg")));

        let device = Arc::new(Device::spawn(session, tuning()));
        let store = Store::open(None).unwrap();
        let index = store.live_index();
        let scheduler = CrawlScheduler::spawn(device, index.clone(), "dev-1", false, |_device_id, _affected| {});

        let affected = scheduler.seed_on_connect().await.unwrap();
        assert!(!affected.is_empty());

        let children = index.children("dev-1", 0x0001_0001, None).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "a.jpg");
        assert_eq!(children[0].mtime, Some(1705312200));
    }

    #[tokio::test]
    async fn boost_subtree_is_processed_by_the_background_worker() {
        let mut session = bound_session();
        push_ok_response(&mut session, 1, Some(&handles_payload(&[20])));
        push_ok_response(&mut session, 2, Some(&object_info_bytes(7, 0, 0x3001, "Photos")));

        let device = Arc::new(Device::spawn(session, tuning()));
        let store = Store::open(None).unwrap();
        let index = store.live_index();

        let (notify_tx, mut notify_rx) = test_mpsc::unbounded_channel();
        let scheduler = CrawlScheduler::spawn(device, index.clone(), "dev-2", true, move |device_id, affected| {
            let _ = notify_tx.send((device_id, affected));
        });

        scheduler.boost_subtree(7, None);
        let (device_id, affected) = tokio::time::timeout(Duration::from_secs(2), notify_rx.recv()).await.unwrap().unwrap();
        assert_eq!(device_id, "dev-2");
        assert!(affected.contains(&0));

        let children = index.children("dev-2", 7, None).await.unwrap();
        assert_eq!(children.len(), 1);
        assert!(children[0].is_directory);
    }

    #[tokio::test]
    async fn object_removed_event_deletes_the_indexed_row() {
        let session = bound_session();
        let device = Arc::new(Device::spawn(session, tuning()));
        let store = Store::open(None).unwrap();
        let index = store.live_index();
        index
            .insert_object(
                "dev-3",
                NewObject {
                    storage_id: 1,
                    handle: 5,
                    parent_handle: None,
                    name: "x.txt".into(),
                    path_key: pathkey::join(&pathkey::root(1), "x.txt"),
                    size_bytes: Some(1),
                    mtime: None,
                    format_code: 0x3000,
                    is_directory: false,
                },
            )
            .await
            .unwrap();

        let (notify_tx, mut notify_rx) = test_mpsc::unbounded_channel();
        let scheduler = CrawlScheduler::spawn(device, index.clone(), "dev-3", true, move |device_id, affected| {
            let _ = notify_tx.send((device_id, affected));
        });
        scheduler.priority_tx.send(CrawlTask::ObjectRemoved(5)).unwrap();

        let (_device_id, affected) = tokio::time::timeout(Duration::from_secs(2), notify_rx.recv()).await.unwrap().unwrap();
        assert!(affected.contains(&0));
        assert!(index.object("dev-3", 1, 5).await.unwrap().is_none());
    }
}
