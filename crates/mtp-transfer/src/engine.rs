//! Chunked read/write engine (component C7, spec §4.8). Grounded on
//! CUAir-rust-ptp's chunked `write_txn_phase`/`read_txn_phase_bulk`
//! (`other_examples/11b3ec88_CUAir-rust-ptp__src-lib.rs.rs`, 1 MiB fixed
//! chunking), generalized to `tuning.maxChunkBytes` and made resumable via
//! the journal seam in [`crate::journal`].

use crate::error::{classify_response, TransferError};
use crate::journal::JournalHandle;
use crate::progress::{Progress, ProgressCoalescer};
use mtp_codec::{encode_ptp_string, OperationCode, ResponseCode};
use mtp_quirks::{EffectiveTuning, Hook, HookPhase};
use mtp_session::Session;
use mtp_transport::UsbHostApi;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::warn;

const MAX_IO_RETRIES: u32 = 5;
const INITIAL_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Reads object `handle` (`size` bytes) into `dest_final`, chunked by
/// `tuning.maxChunkBytes`. `resume_from` should already be the result of
/// [`crate::resume::resume_offset`]; `0` means "start clean, truncate any
/// existing temp file" (spec §4.8 Resume).
#[allow(clippy::too_many_arguments)]
pub async fn read<H: UsbHostApi>(
    session: &mut Session<H>,
    tuning: &EffectiveTuning,
    handle: u32,
    size: u64,
    supports_partial64: bool,
    dest_final: &Path,
    resume_from: u64,
    journal: &mut dyn JournalHandle,
    mut on_progress: impl FnMut(Progress),
) -> Result<(), TransferError> {
    if size == 0 {
        std::fs::File::create(dest_final)?;
        on_progress(Progress { completed: 0, total: 0 });
        journal.complete();
        return Ok(());
    }

    let temp_path = temp_path_for(dest_final);
    let mut file = std::fs::OpenOptions::new().create(true).write(true).open(&temp_path)?;
    if resume_from == 0 {
        file.set_len(0)?;
        file.rewind()?;
    } else {
        file.seek(SeekFrom::Start(resume_from))?;
    }

    let chunk_len = tuning.max_chunk_bytes as u64;
    let mut offset = resume_from;
    let deadline = Instant::now() + Duration::from_millis(tuning.overall_deadline_ms);
    let mut progress = ProgressCoalescer::new(&mut on_progress);
    progress.report(Progress { completed: offset, total: size });

    while offset < size {
        if Instant::now() > deadline {
            journal.fail("overall deadline exceeded");
            return Err(TransferError::Timeout);
        }
        let want = chunk_len.min(size - offset);
        let io_timeout = Duration::from_millis(tuning.io_timeout_ms);
        let bytes = run_chunk_with_retry(tuning, deadline, journal, || {
            read_one_chunk(session, handle, offset, want, supports_partial64, io_timeout)
        })
        .await?;
        let got = bytes.len() as u64;
        file.write_all(&bytes)?;
        offset += got;
        journal.update_progress(offset);
        progress.report(Progress { completed: offset, total: size });
        if got < want && offset < size {
            journal.fail("device returned a short partial read before completion");
            return Err(TransferError::InvalidParameter("short partial read".into()));
        }
    }
    drop(file);
    std::fs::rename(&temp_path, dest_final)?;
    journal.complete();
    Ok(())
}

/// Writes `size` bytes from `source` to a new object under `parent` on
/// `storage_id`. Rejects root-parent writes under `writeToSubfolderOnly`
/// before any wire I/O (spec §4.8 point 2, §9 Open Question).
#[allow(clippy::too_many_arguments)]
pub async fn write<H: UsbHostApi, R: std::io::Read>(
    session: &mut Session<H>,
    tuning: &EffectiveTuning,
    parent: u32,
    name: &str,
    size: u64,
    storage_id: u32,
    format_code: u16,
    supports_partial_write: bool,
    mut source: R,
    journal: &mut dyn JournalHandle,
    mut on_progress: impl FnMut(Progress),
) -> Result<u32, TransferError> {
    if tuning.flags.write_to_subfolder_only && parent == 0 {
        let err = TransferError::InvalidParameter("writes must target a subfolder, not the storage root".into());
        journal.fail(&err.to_string());
        return Err(err);
    }

    let timeout = Duration::from_millis(tuning.io_timeout_ms);
    let info_payload = encode_send_object_info(storage_id, parent, format_code, size, name);
    let outcome = session.call(OperationCode::SendObjectInfo as u16, &[storage_id, parent], Some(&info_payload), timeout)?;
    if outcome.response_code != ResponseCode::Ok as u16 {
        let err = classify_response(outcome.response_code);
        journal.fail(&err.to_string());
        return Err(err);
    }
    let new_handle = *outcome.response_params.get(2).unwrap_or(&0);

    let deadline = Instant::now() + Duration::from_millis(tuning.overall_deadline_ms);
    let chunk_len = tuning.max_chunk_bytes as usize;
    let mut offset = 0u64;
    let mut progress = ProgressCoalescer::new(&mut on_progress);
    let mut buf = vec![0u8; chunk_len];

    if supports_partial_write {
        while offset < size {
            if Instant::now() > deadline {
                journal.fail("overall deadline exceeded");
                return Err(TransferError::Timeout);
            }
            let want = (size - offset).min(chunk_len as u64) as usize;
            let n = source.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            let chunk = buf[..n].to_vec();
            run_chunk_with_retry(tuning, deadline, journal, || {
                let o = session.call(
                    OperationCode::SendPartialObject as u16,
                    &[new_handle, offset as u32, (offset >> 32) as u32, n as u32],
                    Some(&chunk),
                    timeout,
                )?;
                if o.response_code == ResponseCode::Ok as u16 {
                    Ok(vec![])
                } else {
                    Err(classify_response(o.response_code))
                }
            })
            .await?;
            offset += n as u64;
            journal.update_progress(offset);
            progress.report(Progress { completed: offset, total: size });
        }
    } else {
        let mut payload = Vec::with_capacity(size as usize);
        source.read_to_end(&mut payload)?;
        let outcome = session.call(OperationCode::SendObject as u16, &[], Some(&payload), timeout)?;
        if outcome.response_code != ResponseCode::Ok as u16 {
            let err = classify_response(outcome.response_code);
            journal.fail(&err.to_string());
            return Err(err);
        }
        progress.report(Progress { completed: size, total: size });
    }

    journal.complete();
    Ok(new_handle)
}

/// Encodes a minimal `ObjectInfo` dataset for `SendObjectInfo` (grounded on
/// CUAir-rust-ptp's `ObjectInfo::encode`). Unused numeric fields (thumbnail
/// dimensions, image dimensions, association info) are zeroed — this host
/// stack doesn't synthesize thumbnails on write.
fn encode_send_object_info(storage_id: u32, parent: u32, format_code: u16, size: u64, name: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&storage_id.to_le_bytes());
    buf.extend_from_slice(&format_code.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // protection status
    buf.extend_from_slice(&(size.min(u32::MAX as u64) as u32).to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // thumb format
    buf.extend_from_slice(&0u32.to_le_bytes()); // thumb compressed size
    buf.extend_from_slice(&0u32.to_le_bytes()); // thumb pix width
    buf.extend_from_slice(&0u32.to_le_bytes()); // thumb pix height
    buf.extend_from_slice(&0u32.to_le_bytes()); // image pix width
    buf.extend_from_slice(&0u32.to_le_bytes()); // image pix height
    buf.extend_from_slice(&0u32.to_le_bytes()); // image bit depth
    buf.extend_from_slice(&parent.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // association type
    buf.extend_from_slice(&0u32.to_le_bytes()); // association desc
    buf.extend_from_slice(&0u32.to_le_bytes()); // sequence number
    buf.extend_from_slice(&encode_ptp_string(name));
    buf.extend_from_slice(&encode_ptp_string("")); // capture date
    buf.extend_from_slice(&encode_ptp_string("")); // modification date
    buf.extend_from_slice(&encode_ptp_string("")); // keywords
    buf
}

fn temp_path_for(dest_final: &Path) -> std::path::PathBuf {
    let dir = dest_final.parent().unwrap_or_else(|| Path::new("."));
    let name = dest_final.file_name().and_then(|n| n.to_str()).unwrap_or("object");
    dir.join(format!(".{name}.mtp-part"))
}

fn read_one_chunk<H: UsbHostApi>(
    session: &mut Session<H>,
    handle: u32,
    offset: u64,
    want: u64,
    partial64: bool,
    timeout: Duration,
) -> Result<Vec<u8>, TransferError> {
    let outcome = if partial64 {
        let off_lo = (offset & 0xFFFF_FFFF) as u32;
        let off_hi = (offset >> 32) as u32;
        session.call(OperationCode::GetPartialObject64 as u16, &[handle, off_lo, off_hi, want as u32], None, timeout)?
    } else {
        session.call(OperationCode::GetPartialObject as u16, &[handle, offset as u32, want as u32], None, timeout)?
    };
    if outcome.response_code == ResponseCode::Ok as u16 {
        Ok(outcome.payload)
    } else {
        Err(classify_response(outcome.response_code))
    }
}

/// Retries a chunk operation with exponential backoff bounded by
/// `tuning.overallDeadlineMs`; `DeviceBusy` responses additionally apply
/// the `onDeviceBusy` hook's backoff schedule before falling back to the
/// generic ladder (spec §4.8 point 5).
async fn run_chunk_with_retry(
    tuning: &EffectiveTuning,
    deadline: Instant,
    journal: &mut dyn JournalHandle,
    mut attempt_once: impl FnMut() -> Result<Vec<u8>, TransferError>,
) -> Result<Vec<u8>, TransferError> {
    let busy_hook = find_hook(&tuning.hooks, HookPhase::OnDeviceBusy);
    let mut attempt = 0u32;
    let mut backoff = INITIAL_BACKOFF_MS;
    loop {
        match attempt_once() {
            Ok(bytes) => return Ok(bytes),
            Err(TransferError::Busy) => {
                let limit = busy_hook.and_then(|h| h.busy_backoff).map(|b| b.retries).unwrap_or(MAX_IO_RETRIES);
                if attempt >= limit || Instant::now() > deadline {
                    journal.fail("device busy, retries exhausted");
                    return Err(TransferError::Busy);
                }
                attempt += 1;
                let wait = busy_hook
                    .and_then(|h| h.busy_backoff)
                    .map(|b| b.base_ms * attempt as u64)
                    .unwrap_or(backoff);
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
            Err(TransferError::Transport(_)) | Err(TransferError::Session(_)) if attempt < MAX_IO_RETRIES => {
                attempt += 1;
                if Instant::now() > deadline {
                    journal.fail("overall deadline exceeded during retry");
                    return Err(TransferError::Timeout);
                }
                warn!(attempt, backoff, "transient transport error, retrying chunk");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_MS);
            }
            Err(e) => {
                journal.fail(&e.to_string());
                return Err(e);
            }
        }
    }
}

fn find_hook(hooks: &[Hook], phase: HookPhase) -> Option<&Hook> {
    hooks.iter().find(|h| h.phase == phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::NullJournal;
    use mtp_codec::container;
    use mtp_transport::{Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo, MockUsbHost, Transport};
    use std::collections::HashMap;
    use tempfile::tempdir;

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

    fn tuning(max_chunk: u32) -> EffectiveTuning {
        EffectiveTuning {
            max_chunk_bytes: max_chunk,
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

    #[tokio::test]
    async fn read_with_size_zero_produces_empty_file_and_zero_progress() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("empty.bin");
        let mut session = bound_session();
        let mut journal = NullJournal;
        let mut last = Progress::default();
        read(&mut session, &tuning(1024 * 1024), 1, 0, true, &dest, 0, &mut journal, |p| last = p)
            .await
            .unwrap();
        assert_eq!(last, Progress { completed: 0, total: 0 });
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn read_chunks_across_multiple_partial_reads_and_renames_into_place() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("photo.jpg");
        let mut session = bound_session();
        {
            let host = session.transport_mut().host_mut();
            host.bulk_read_data.push_back(Ok(container::encode_data(0x101B, 1, &[1u8; 4])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 1, &[])));
            host.bulk_read_data.push_back(Ok(container::encode_data(0x101B, 2, &[2u8; 2])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 2, &[])));
        }
        let mut journal = NullJournal;
        read(&mut session, &tuning(4), 7, 6, false, &dest, 0, &mut journal, |_| {}).await.unwrap();
        let contents = std::fs::read(&dest).unwrap();
        assert_eq!(contents, vec![1, 1, 1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn resume_restarts_from_committed_offset() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("video.mp4");
        let temp = temp_path_for(&dest);
        std::fs::write(&temp, vec![0xAAu8; 4]).unwrap();

        let mut session = bound_session();
        session
            .transport_mut()
            .host_mut()
            .bulk_read_data
            .push_back(Ok(container::encode_data(0x101B, 1, &[0xBB; 2])));
        session.transport_mut().host_mut().bulk_read_data.push_back(Ok(container::encode_response(0x2001, 1, &[])));

        let mut journal = NullJournal;
        read(&mut session, &tuning(16), 9, 6, false, &dest, 4, &mut journal, |_| {}).await.unwrap();
        let contents = std::fs::read(&dest).unwrap();
        assert_eq!(contents, vec![0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB]);
    }

    #[tokio::test]
    async fn write_to_root_is_rejected_without_touching_the_wire() {
        let mut session = bound_session();
        let mut tuning = tuning(1024);
        tuning.flags.write_to_subfolder_only = true;
        let mut journal = NullJournal;
        let err = write(&mut session, &tuning, 0, "x", 1, 1, 0x3000, false, std::io::Cursor::new(vec![1u8]), &mut journal, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidParameter(_)));
        assert_eq!(session.transport_mut().host_mut().bulk_write_calls.len(), 0);
    }

    #[tokio::test]
    async fn single_shot_write_sends_object_info_then_object() {
        let mut session = bound_session();
        {
            let host = session.transport_mut().host_mut();
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 1, &[1, 2, 42])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 2, &[])));
        }
        let mut journal = NullJournal;
        let handle = write(&mut session, &tuning(1024), 5, "a.txt", 3, 1, 0x3000, false, std::io::Cursor::new(vec![1, 2, 3]), &mut journal, |_| {})
            .await
            .unwrap();
        assert_eq!(handle, 42);
    }
}
