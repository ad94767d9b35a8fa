//! The per-device actor (component C6, spec §4.7): a single `tokio::mpsc`
//! mailbox serializes every operation against the one USB interface a
//! device exposes, while a periodic poll of the interrupt endpoint — issued
//! through that same mailbox, so it never races a transfer — decodes events
//! onto a `broadcast` channel that [`Device::events`] subscribes to.

use crate::dataset::{DeviceInfo, ObjectInfo, StorageInfo};
use crate::error::{expect_ok, DeviceError};
use crate::event::{decode_event, MtpEvent};
use mtp_codec::{OperationCode, ResponseCode};
use mtp_quirks::EffectiveTuning;
use mtp_session::Session;
use mtp_transfer::{JournalHandle, NullJournal, Progress};
use mtp_transport::{TransportError, UsbHostApi};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

/// PTP's reserved "all objects"/"storage root" handle value.
const PTP_ROOT_PARENT: u32 = 0xFFFF_FFFF;
/// Association (folder) object format code.
const FORMAT_ASSOCIATION: u16 = 0x3001;
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(750);
const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

type Reply<T> = oneshot::Sender<Result<T, DeviceError>>;

enum Command {
    Info(Reply<DeviceInfo>),
    Storages(Reply<Vec<(u32, StorageInfo)>>),
    List { storage_id: u32, parent: u32, reply: Reply<Vec<u32>> },
    GetInfo { handle: u32, reply: Reply<ObjectInfo> },
    Read {
        handle: u32,
        size: u64,
        supports_partial64: bool,
        dest: PathBuf,
        resume_from: u64,
        progress: mpsc::UnboundedSender<Progress>,
        reply: Reply<()>,
    },
    Write {
        parent: u32,
        name: String,
        size: u64,
        storage_id: u32,
        format_code: u16,
        supports_partial_write: bool,
        source: Box<dyn Read + Send>,
        progress: mpsc::UnboundedSender<Progress>,
        reply: Reply<u32>,
    },
    CreateFolder { parent: u32, storage_id: u32, name: String, reply: Reply<u32> },
    Delete { handle: u32, reply: Reply<()> },
    MoveObject { handle: u32, new_parent: u32, reply: Reply<()> },
    PollEvents,
}

struct Inner<H: UsbHostApi> {
    session: Session<H>,
    tuning: EffectiveTuning,
}

/// Handle to a running device actor. Cloning shares the same mailbox, so
/// every clone serializes through the same single writer.
pub struct Device<H: UsbHostApi + 'static> {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<MtpEvent>,
    actor: JoinHandle<()>,
    pump: JoinHandle<()>,
    _marker: std::marker::PhantomData<fn() -> H>,
}

impl<H: UsbHostApi + 'static> Device<H> {
    /// Spawns the actor and event-pump tasks over an already-opened
    /// session. Call [`Session::open`] before constructing a `Device`.
    pub fn spawn(session: Session<H>, tuning: EffectiveTuning) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (events_tx, _) = broadcast::channel(256);

        let inner = Inner { session, tuning };
        let actor_events = events_tx.clone();
        let actor = tokio::spawn(run_actor(inner, cmd_rx, actor_events));

        let pump_tx = cmd_tx.clone();
        let pump = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVENT_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if pump_tx.send(Command::PollEvents).await.is_err() {
                    break;
                }
            }
        });

        Device { cmd_tx, events: events_tx, actor, pump, _marker: std::marker::PhantomData }
    }

    pub fn events(&self) -> broadcast::Receiver<MtpEvent> {
        self.events.subscribe()
    }

    pub async fn info(&self) -> Result<DeviceInfo, DeviceError> {
        self.call(Command::Info).await
    }

    pub async fn storages(&self) -> Result<Vec<(u32, StorageInfo)>, DeviceError> {
        self.call(Command::Storages).await
    }

    pub async fn list(&self, storage_id: u32, parent: u32) -> Result<Vec<u32>, DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::List { storage_id, parent, reply: reply_tx }).await;
        recv(reply_rx).await
    }

    pub async fn get_info(&self, handle: u32) -> Result<ObjectInfo, DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::GetInfo { handle, reply: reply_tx }).await;
        recv(reply_rx).await
    }

    /// Reads object `handle` to `dest`, resuming at `resume_from` (the
    /// result of [`mtp_transfer::resume_offset`]). `on_progress` is driven
    /// from an unbounded channel fed by the actor task, so the caller sees
    /// every coalesced update without blocking the mailbox.
    #[allow(clippy::too_many_arguments)]
    pub async fn read(
        &self,
        handle: u32,
        size: u64,
        supports_partial64: bool,
        dest: PathBuf,
        resume_from: u64,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<(), DeviceError> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Read { handle, size, supports_partial64, dest, resume_from, progress: progress_tx, reply: reply_tx }).await;
        while let Some(p) = progress_rx.recv().await {
            on_progress(p);
        }
        recv(reply_rx).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn write(
        &self,
        parent: u32,
        name: impl Into<String>,
        size: u64,
        storage_id: u32,
        format_code: u16,
        supports_partial_write: bool,
        source: impl Read + Send + 'static,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<u32, DeviceError> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Write {
            parent,
            name: name.into(),
            size,
            storage_id,
            format_code,
            supports_partial_write,
            source: Box::new(source),
            progress: progress_tx,
            reply: reply_tx,
        })
        .await;
        while let Some(p) = progress_rx.recv().await {
            on_progress(p);
        }
        recv(reply_rx).await
    }

    pub async fn create_folder(&self, parent: u32, storage_id: u32, name: impl Into<String>) -> Result<u32, DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::CreateFolder { parent, storage_id, name: name.into(), reply: reply_tx }).await;
        recv(reply_rx).await
    }

    pub async fn delete(&self, handle: u32) -> Result<(), DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Delete { handle, reply: reply_tx }).await;
        recv(reply_rx).await
    }

    /// Moves `handle` under `new_parent`, resolving the object's current
    /// storage id internally via `GetObjectInfo` (spec §4.7: the public
    /// signature only takes handle and new parent).
    pub async fn move_object(&self, handle: u32, new_parent: u32) -> Result<(), DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::MoveObject { handle, new_parent, reply: reply_tx }).await;
        recv(reply_rx).await
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, DeviceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(build(reply_tx)).await;
        recv(reply_rx).await
    }

    async fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).await.is_err() {
            warn!("device actor mailbox closed; command dropped");
        }
    }
}

impl<H: UsbHostApi + 'static> Drop for Device<H> {
    fn drop(&mut self) {
        self.pump.abort();
        self.actor.abort();
    }
}

async fn recv<T>(rx: oneshot::Receiver<Result<T, DeviceError>>) -> Result<T, DeviceError> {
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(DeviceError::MalformedResponse("device actor dropped the reply channel".into())),
    }
}

async fn run_actor<H: UsbHostApi>(mut inner: Inner<H>, mut rx: mpsc::Receiver<Command>, events: broadcast::Sender<MtpEvent>) {
    while let Some(cmd) = rx.recv().await {
        handle_command(&mut inner, cmd, &events).await;
    }
}

async fn handle_command<H: UsbHostApi>(inner: &mut Inner<H>, cmd: Command, events: &broadcast::Sender<MtpEvent>) {
    match cmd {
        Command::Info(reply) => {
            let _ = reply.send(device_info(inner));
        }
        Command::Storages(reply) => {
            let _ = reply.send(storages(inner));
        }
        Command::List { storage_id, parent, reply } => {
            let _ = reply.send(list(inner, storage_id, parent));
        }
        Command::GetInfo { handle, reply } => {
            let _ = reply.send(get_info(inner, handle));
        }
        Command::Read { handle, size, supports_partial64, dest, resume_from, progress, reply } => {
            let mut journal = NullJournal;
            let result = mtp_transfer::read(
                &mut inner.session,
                &inner.tuning,
                handle,
                size,
                supports_partial64,
                &dest,
                resume_from,
                &mut journal as &mut dyn JournalHandle,
                |p| {
                    let _ = progress.send(p);
                },
            )
            .await
            .map_err(DeviceError::from);
            let _ = reply.send(result);
        }
        Command::Write { parent, name, size, storage_id, format_code, supports_partial_write, source, progress, reply } => {
            let mut journal = NullJournal;
            let result = mtp_transfer::write(
                &mut inner.session,
                &inner.tuning,
                parent,
                &name,
                size,
                storage_id,
                format_code,
                supports_partial_write,
                source,
                &mut journal as &mut dyn JournalHandle,
                |p| {
                    let _ = progress.send(p);
                },
            )
            .await
            .map_err(DeviceError::from);
            let _ = reply.send(result);
        }
        Command::CreateFolder { parent, storage_id, name, reply } => {
            let _ = reply.send(create_folder(inner, parent, storage_id, &name));
        }
        Command::Delete { handle, reply } => {
            let _ = reply.send(delete(inner, handle));
        }
        Command::MoveObject { handle, new_parent, reply } => {
            let _ = reply.send(move_object(inner, handle, new_parent));
        }
        Command::PollEvents => poll_events(inner, events),
    }
}

fn device_info<H: UsbHostApi>(inner: &mut Inner<H>) -> Result<DeviceInfo, DeviceError> {
    let timeout = Duration::from_millis(inner.tuning.io_timeout_ms);
    let outcome = inner.session.call(OperationCode::GetDeviceInfo as u16, &[], None, timeout)?;
    expect_ok(outcome.response_code)?;
    Ok(DeviceInfo::decode(&outcome.payload)?)
}

fn storages<H: UsbHostApi>(inner: &mut Inner<H>) -> Result<Vec<(u32, StorageInfo)>, DeviceError> {
    let timeout = Duration::from_millis(inner.tuning.io_timeout_ms);
    let outcome = inner.session.call(OperationCode::GetStorageIDs as u16, &[], None, timeout)?;
    expect_ok(outcome.response_code)?;
    let ids = crate::dataset::decode_handle_array(&outcome.payload)?;

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let outcome = inner.session.call(OperationCode::GetStorageInfo as u16, &[id], None, timeout)?;
        expect_ok(outcome.response_code)?;
        out.push((id, StorageInfo::decode(&outcome.payload)?));
    }
    Ok(out)
}

fn list<H: UsbHostApi>(inner: &mut Inner<H>, storage_id: u32, parent: u32) -> Result<Vec<u32>, DeviceError> {
    let timeout = Duration::from_millis(inner.tuning.io_timeout_ms);
    let parent_param = if parent == 0 { PTP_ROOT_PARENT } else { parent };
    let outcome = inner.session.call(OperationCode::GetObjectHandles as u16, &[storage_id, 0, parent_param], None, timeout)?;
    expect_ok(outcome.response_code)?;
    Ok(crate::dataset::decode_handle_array(&outcome.payload)?)
}

fn get_info<H: UsbHostApi>(inner: &mut Inner<H>, handle: u32) -> Result<ObjectInfo, DeviceError> {
    let timeout = Duration::from_millis(inner.tuning.io_timeout_ms);
    let outcome = inner.session.call(OperationCode::GetObjectInfo as u16, &[handle], None, timeout)?;
    if outcome.response_code == ResponseCode::InvalidObjectHandle as u16 {
        return Err(DeviceError::ObjectNotFound(handle));
    }
    expect_ok(outcome.response_code)?;
    Ok(ObjectInfo::decode(&outcome.payload)?)
}

/// Creates a folder (an `Association` object) directly via `SendObjectInfo`
/// — folders carry no object-data phase, so this bypasses
/// `mtp_transfer::write`, which always expects one.
fn create_folder<H: UsbHostApi>(inner: &mut Inner<H>, parent: u32, storage_id: u32, name: &str) -> Result<u32, DeviceError> {
    let timeout = Duration::from_millis(inner.tuning.io_timeout_ms);
    let info = encode_folder_info(storage_id, parent, name);
    let outcome = inner.session.call(OperationCode::SendObjectInfo as u16, &[storage_id, parent], Some(&info), timeout)?;
    expect_ok(outcome.response_code)?;
    Ok(*outcome.response_params.get(2).unwrap_or(&0))
}

fn encode_folder_info(storage_id: u32, parent: u32, name: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&storage_id.to_le_bytes());
    buf.extend_from_slice(&FORMAT_ASSOCIATION.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    for _ in 0..6 {
        buf.extend_from_slice(&0u32.to_le_bytes());
    }
    buf.extend_from_slice(&parent.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&mtp_codec::encode_ptp_string(name));
    buf.extend_from_slice(&mtp_codec::encode_ptp_string(""));
    buf.extend_from_slice(&mtp_codec::encode_ptp_string(""));
    buf.extend_from_slice(&mtp_codec::encode_ptp_string(""));
    buf
}

fn delete<H: UsbHostApi>(inner: &mut Inner<H>, handle: u32) -> Result<(), DeviceError> {
    let timeout = Duration::from_millis(inner.tuning.io_timeout_ms);
    let outcome = inner.session.call(OperationCode::DeleteObject as u16, &[handle, 0], None, timeout)?;
    if outcome.response_code == ResponseCode::InvalidObjectHandle as u16 {
        return Err(DeviceError::ObjectNotFound(handle));
    }
    expect_ok(outcome.response_code)
}

fn move_object<H: UsbHostApi>(inner: &mut Inner<H>, handle: u32, new_parent: u32) -> Result<(), DeviceError> {
    let info = get_info(inner, handle)?;
    let timeout = Duration::from_millis(inner.tuning.io_timeout_ms);
    let outcome = inner.session.call(OperationCode::MoveObject as u16, &[handle, info.storage_id, new_parent], None, timeout)?;
    expect_ok(outcome.response_code)
}

fn poll_events<H: UsbHostApi>(inner: &mut Inner<H>, events: &broadcast::Sender<MtpEvent>) {
    if inner.tuning.flags.disable_event_pump {
        return;
    }
    let mut buf = [0u8; 64];
    match inner.session.transport_mut().interrupt_read(&mut buf, EVENT_POLL_TIMEOUT) {
        Ok(n) => match mtp_codec::parse(&buf[..n]) {
            Ok(container) => {
                if let Some(event) = decode_event(&container) {
                    let _ = events.send(event);
                }
            }
            Err(e) => warn!(error = %e, "malformed event container, dropping"),
        },
        Err(TransportError::Timeout) => {}
        Err(e) => warn!(error = %e, "interrupt poll failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtp_codec::container;
    use mtp_quirks::EffectiveTuning;
    use mtp_transport::{Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo, MockUsbHost, Transport};
    use std::collections::HashMap;

    fn bound_session() -> Session<MockUsbHost> {
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
        Session::new(transport)
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

    fn push_ok_response(session: &mut Session<MockUsbHost>, txn: u32, params: &[u32], payload: Option<&[u8]>) {
        let host = session.transport_mut().host_mut();
        if let Some(p) = payload {
            host.bulk_read_data.push_back(Ok(container::encode_data(0x101B, txn, p)));
        }
        host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, txn, params)));
    }

    fn minimal_device_info_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u16.to_le_bytes());
        buf.extend_from_slice(&6u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&mtp_codec::encode_ptp_string(""));
        buf.extend_from_slice(&0u16.to_le_bytes());
        for _ in 0..5 {
            buf.extend_from_slice(&0u32.to_le_bytes()); // five empty u16 arrays (count=0)
        }
        buf.extend_from_slice(&mtp_codec::encode_ptp_string("Acme"));
        buf.extend_from_slice(&mtp_codec::encode_ptp_string("Widget"));
        buf.extend_from_slice(&mtp_codec::encode_ptp_string("1.0"));
        buf.extend_from_slice(&mtp_codec::encode_ptp_string("SN1"));
        buf
    }

    #[tokio::test]
    async fn info_returns_decoded_device_info() {
        let mut session = bound_session();
        push_ok_response(&mut session, 1, &[], Some(&minimal_device_info_bytes()));
        let device = Device::spawn(session, tuning());
        let info = device.info().await.unwrap();
        assert_eq!(info.manufacturer, "Acme");
        assert_eq!(info.serial_number, "SN1");
    }

    #[tokio::test]
    async fn storages_lists_each_storage_info() {
        let mut session = bound_session();
        let ids_payload = {
            let mut b = 1u32.to_le_bytes().to_vec();
            b.extend_from_slice(&0x0001_0001u32.to_le_bytes());
            b
        };
        push_ok_response(&mut session, 1, &[], Some(&ids_payload));
        let storage_info = {
            let mut b = Vec::new();
            b.extend_from_slice(&0x0004u16.to_le_bytes()); // fixed RAM
            b.extend_from_slice(&0x0002u16.to_le_bytes()); // generic hierarchical
            b.extend_from_slice(&0x0000u16.to_le_bytes());
            b.extend_from_slice(&1_000_000u64.to_le_bytes());
            b.extend_from_slice(&500_000u64.to_le_bytes());
            b.extend_from_slice(&0u32.to_le_bytes());
            b.extend_from_slice(&mtp_codec::encode_ptp_string("Internal"));
            b.extend_from_slice(&mtp_codec::encode_ptp_string(""));
            b
        };
        push_ok_response(&mut session, 2, &[], Some(&storage_info));
        let device = Device::spawn(session, tuning());
        let storages = device.storages().await.unwrap();
        assert_eq!(storages.len(), 1);
        assert_eq!(storages[0].0, 0x0001_0001);
        assert_eq!(storages[0].1.storage_description, "Internal");
    }

    #[tokio::test]
    async fn get_info_maps_invalid_handle_to_object_not_found() {
        let mut session = bound_session();
        session.transport_mut().host_mut().bulk_read_data.push_back(Ok(container::encode_response(0x2006, 1, &[])));
        let device = Device::spawn(session, tuning());
        let err = device.get_info(42).await.unwrap_err();
        assert!(matches!(err, DeviceError::ObjectNotFound(42)));
    }

    #[tokio::test]
    async fn create_folder_returns_new_handle() {
        let mut session = bound_session();
        session.transport_mut().host_mut().bulk_read_data.push_back(Ok(container::encode_response(0x2001, 1, &[1, 2, 77])));
        let device = Device::spawn(session, tuning());
        let handle = device.create_folder(5, 1, "Photos").await.unwrap();
        assert_eq!(handle, 77);
    }

    #[tokio::test]
    async fn move_object_resolves_storage_id_then_moves() {
        let mut session = bound_session();
        {
            let host = session.transport_mut().host_mut();
            // GetObjectInfo response carrying storage_id = 0x0001_0001.
            let mut info = Vec::new();
            info.extend_from_slice(&0x0001_0001u32.to_le_bytes()); // storage_id
            info.extend_from_slice(&0x3000u16.to_le_bytes()); // object_format
            info.extend_from_slice(&0u16.to_le_bytes()); // protection_status
            info.extend_from_slice(&0u32.to_le_bytes()); // object_compressed_size
            info.extend_from_slice(&0u16.to_le_bytes()); // thumb_format
            for _ in 0..6 {
                info.extend_from_slice(&0u32.to_le_bytes()); // thumb/image dimensions + bit depth
            }
            info.extend_from_slice(&0u32.to_le_bytes()); // parent
            info.extend_from_slice(&0u16.to_le_bytes()); // association type
            info.extend_from_slice(&0u32.to_le_bytes()); // association desc
            info.extend_from_slice(&0u32.to_le_bytes()); // sequence number
            info.extend_from_slice(&mtp_codec::encode_ptp_string("a.jpg"));
            info.extend_from_slice(&mtp_codec::encode_ptp_string(""));
            info.extend_from_slice(&mtp_codec::encode_ptp_string(""));
            info.extend_from_slice(&mtp_codec::encode_ptp_string(""));
            host.bulk_read_data.push_back(Ok(container::encode_data(0x101B, 1, &info)));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 1, &[])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 2, &[])));
        }
        let device = Device::spawn(session, tuning());
        device.move_object(9, 3).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn event_pump_decodes_and_broadcasts_object_added() {
        let mut session = bound_session();
        session.transport_mut().host_mut().interrupt_read_data.push_back(Ok(container::encode_event(0x4002, 0, &[55])));
        let device = Device::spawn(session, tuning());
        let mut events = device.events();

        tokio::time::advance(EVENT_POLL_INTERVAL + Duration::from_millis(1)).await;
        let received = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert_eq!(received, MtpEvent::ObjectAdded(55));
    }

    #[tokio::test]
    async fn list_translates_root_parent_and_decodes_handles() {
        let mut session = bound_session();
        let handles_payload = {
            let mut b = 2u32.to_le_bytes().to_vec();
            b.extend_from_slice(&10u32.to_le_bytes());
            b.extend_from_slice(&11u32.to_le_bytes());
            b
        };
        push_ok_response(&mut session, 1, &[], Some(&handles_payload));
        let device = Device::spawn(session, tuning());
        let handles = device.list(1, 0).await.unwrap();
        assert_eq!(handles, vec![10, 11]);
    }

    #[tokio::test]
    async fn read_roundtrips_through_the_actor_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("photo.jpg");
        let mut session = bound_session();
        {
            let host = session.transport_mut().host_mut();
            host.bulk_read_data.push_back(Ok(container::encode_data(0x101B, 1, &[7u8; 4])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 1, &[])));
        }
        let device = Device::spawn(session, tuning());
        let mut last = Progress::default();
        device.read(3, 4, false, dest.clone(), 0, |p| last = p).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7, 7, 7, 7]);
        assert_eq!(last, Progress { completed: 4, total: 4 });
    }
}
