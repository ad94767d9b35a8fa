//! Bridges [`mtp_device::Device::read`]/`write` to [`mtp_store::TransferJournal`]
//! from outside the device actor.
//!
//! `Device`'s actor always runs transfers against `mtp_transfer::NullJournal`
//! internally — there is no caller-pluggable `JournalHandle` seam on its
//! public API, only a progress callback. So journaling happens here
//! instead: `begin_*` before the call, `update_progress` driven off the
//! same progress callback via a background task (so the callback itself
//! never awaits), and `complete`/`fail` after.

use mtp_device::{Device, DeviceError};
use mtp_store::journal::Etag as JournalEtag;
use mtp_store::TransferJournal;
use mtp_transfer::Etag as TransferEtag;
use mtp_transport::UsbHostApi;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[allow(clippy::too_many_arguments)]
pub async fn journaled_read<H: UsbHostApi + 'static>(
    device: &Device<H>,
    journal: &TransferJournal,
    device_id: &str,
    handle: u32,
    size: u64,
    supports_partial64: bool,
    dest: PathBuf,
    current_etag: TransferEtag,
) -> Result<(), crate::Error> {
    let id = TransferJournal::transfer_id(mtp_store::journal::Direction::Read, device_id, handle);
    let existing = journal.get(&id).await?;
    let (committed, etag_matches) = match &existing {
        Some(record) => (record.committed_bytes, record.etag == to_journal_etag(current_etag)),
        None => (0, false),
    };
    let resume_from = mtp_transfer::resume_offset(committed, etag_matches, supports_partial64);

    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp_url = dest.to_string_lossy().into_owned();
    let id = journal.begin_read(device_id, handle, &name, Some(size), supports_partial64, &temp_url).await?;
    journal.set_etag(&id, to_journal_etag(current_etag)).await?;

    let result = run_with_progress_pump(journal, &id, |on_progress| device.read(handle, size, supports_partial64, dest, resume_from, on_progress)).await;

    finish(journal, &id, result).await
}

#[allow(clippy::too_many_arguments)]
pub async fn journaled_write<H: UsbHostApi + 'static>(
    device: &Device<H>,
    journal: &TransferJournal,
    device_id: &str,
    parent: u32,
    name: &str,
    size: u64,
    storage_id: u32,
    format_code: u16,
    supports_partial_write: bool,
    source: impl std::io::Read + Send + 'static,
    source_path: &std::path::Path,
) -> Result<u32, crate::Error> {
    let temp_url = format!("{}.part", source_path.display());
    let id = journal
        .begin_write(device_id, parent, name, Some(size), supports_partial_write, &temp_url, &source_path.to_string_lossy())
        .await?;

    let name = name.to_string();
    let result = run_with_progress_pump(journal, &id, move |on_progress| {
        device.write(parent, name, size, storage_id, format_code, supports_partial_write, source, on_progress)
    })
    .await;

    match &result {
        Ok(_) => journal.complete(&id).await?,
        Err(e) => journal.fail(&id, &e.to_string()).await?,
    }
    result.map_err(crate::Error::from)
}

/// Drives `call` with a progress closure that only ever sends on an
/// unbounded channel (never awaits), while a background task drains that
/// channel into async `update_progress` calls.
async fn run_with_progress_pump<T, F, Fut>(journal: &TransferJournal, id: &str, call: F) -> Result<T, DeviceError>
where
    F: FnOnce(Box<dyn FnMut(mtp_transfer::Progress) + Send>) -> Fut,
    Fut: std::future::Future<Output = Result<T, DeviceError>>,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
    let journal = journal.clone();
    let id = id.to_string();
    let pump = tokio::spawn(async move {
        while let Some(completed) = rx.recv().await {
            let _ = journal.update_progress(&id, completed).await;
        }
    });

    let on_progress: Box<dyn FnMut(mtp_transfer::Progress) + Send> = Box::new(move |p| {
        let _ = tx.send(p.completed);
    });
    let result = call(on_progress).await;
    let _ = pump.await;
    result
}

async fn finish(journal: &TransferJournal, id: &str, result: Result<(), DeviceError>) -> Result<(), crate::Error> {
    match &result {
        Ok(()) => journal.complete(id).await?,
        Err(e) => journal.fail(id, &e.to_string()).await?,
    }
    result.map_err(crate::Error::from)
}

fn to_journal_etag(e: TransferEtag) -> JournalEtag {
    JournalEtag { size: e.size, mtime: e.mtime }
}
