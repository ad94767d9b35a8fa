//! One PTP transaction: command phase, optional data phase, response phase.
//! Grounded on CUAir-rust-ptp's `command`/`write_txn_phase`/`read_txn_phase_bulk`
//! (`other_examples/11b3ec88_CUAir-rust-ptp__src-lib.rs.rs`), adapted to read
//! through [`mtp_transport::Transport`] rather than a raw `rusb` handle.

use crate::error::SessionError;
use mtp_codec::container::{self, HEADER_SIZE};
use mtp_codec::{Container, ContainerKind};
use mtp_transport::{Transport, UsbHostApi};
use std::time::Duration;

const FIRST_READ_BYTES: usize = 8192;
const CONTINUATION_CHUNK_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub response_code: u16,
    pub response_params: Vec<u32>,
    pub payload: Vec<u8>,
}

/// Runs one full PTP transaction and returns its response phase. `data`, if
/// present, is sent as a single Data-phase container after the command.
pub fn execute<H: UsbHostApi>(
    transport: &mut Transport<H>,
    code: u16,
    txn_id: u32,
    params: &[u32],
    data: Option<&[u8]>,
    timeout: Duration,
) -> Result<TransactionOutcome, SessionError> {
    let command = container::encode_command(code, txn_id, params);
    transport.bulk_write(&command, timeout)?;

    if let Some(data) = data {
        let data_container = container::encode_data(code, txn_id, data);
        transport.bulk_write(&data_container, timeout)?;
    }

    let mut payload = Vec::new();
    loop {
        let container = read_container(transport, timeout)?;
        if !container.belongs_to(txn_id) {
            return Err(SessionError::MismatchedTransaction { expected: txn_id, got: container.txn_id });
        }
        match container.kind {
            ContainerKind::Data => payload = container.payload,
            ContainerKind::Response => {
                return Ok(TransactionOutcome {
                    response_code: container.code,
                    response_params: container.params,
                    payload,
                });
            }
            ContainerKind::Command | ContainerKind::Event => continue,
        }
    }
}

/// Reads one container off the bulk-in pipe, growing the buffer past the
/// first read if the declared container length says there's more to come.
fn read_container<H: UsbHostApi>(transport: &mut Transport<H>, timeout: Duration) -> Result<Container, SessionError> {
    let mut buf = vec![0u8; FIRST_READ_BYTES];
    let n = transport.bulk_read(&mut buf, timeout)?;
    buf.truncate(n);
    if buf.len() < HEADER_SIZE {
        return Ok(container::parse(&buf)?);
    }
    let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    while buf.len() < declared {
        let mut chunk = vec![0u8; CONTINUATION_CHUNK_BYTES];
        let n = transport.bulk_read(&mut chunk, timeout)?;
        let short = n < chunk.len();
        chunk.truncate(n);
        buf.extend_from_slice(&chunk);
        if short {
            break;
        }
    }
    Ok(container::parse(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtp_transport::MockUsbHost;

    fn bound_transport() -> Transport<MockUsbHost> {
        use mtp_transport::{Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo};
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
        transport
    }

    #[test]
    fn simple_command_with_no_data_phase_returns_ok_response() {
        let mut transport = bound_transport();
        transport.host_mut().bulk_read_data.push_back(Ok(container::encode_response(0x2001, 5, &[])));

        let outcome = execute(&mut transport, 0x1002, 5, &[1, 0, 0], None, Duration::from_millis(500)).unwrap();
        assert_eq!(outcome.response_code, 0x2001);
        assert!(outcome.payload.is_empty());
    }

    #[test]
    fn data_phase_payload_is_returned_with_the_response() {
        let mut transport = bound_transport();
        let payload = b"device info blob".to_vec();
        transport.host_mut().bulk_read_data.push_back(Ok(container::encode_data(0x1001, 9, &payload)));
        transport.host_mut().bulk_read_data.push_back(Ok(container::encode_response(0x2001, 9, &[])));

        let outcome = execute(&mut transport, 0x1001, 9, &[], None, Duration::from_millis(500)).unwrap();
        assert_eq!(outcome.payload, payload);
        assert_eq!(outcome.response_code, 0x2001);
    }

    #[test]
    fn mismatched_transaction_id_is_rejected() {
        let mut transport = bound_transport();
        transport.host_mut().bulk_read_data.push_back(Ok(container::encode_response(0x2001, 999, &[])));

        let err = execute(&mut transport, 0x1002, 1, &[1, 0, 0], None, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, SessionError::MismatchedTransaction { expected: 1, got: 999 }));
    }

    #[test]
    fn non_ok_response_code_is_passed_through_for_the_caller_to_classify() {
        let mut transport = bound_transport();
        transport.host_mut().bulk_read_data.push_back(Ok(container::encode_response(0x201E, 1, &[])));

        let outcome = execute(&mut transport, 0x1002, 1, &[1, 0, 0], None, Duration::from_millis(500)).unwrap();
        assert_eq!(outcome.response_code, 0x201E);
    }
}
