//! Runtime capability probing (component C5, spec §4.6). Small
//! confirmatory commands run after session open, memoized per fingerprint
//! by the caller and fed into `mtp-quirks`' effective-tuning builder.

use crate::session::Session;
use mtp_codec::{OperationCode, ResponseCode};
use mtp_quirks::Capabilities;
use mtp_transport::UsbHostApi;
use std::time::Duration;

const PROBE_TIMEOUT_MS: u64 = 2_000;

/// Runs the capability probes of spec §4.6 against an already-open session.
///
/// `sample_handle` is a small object discovered during the seed crawl; when
/// `None` the partial-read probes are skipped rather than guessed at.
/// `operations_supported`/`events_supported` come from the device's
/// `GetDeviceInfo` response. `try_interrupt_read` attempts a short bounded
/// interrupt-in read as a secondary event-support signal.
pub fn probe_capabilities<H: UsbHostApi>(
    session: &mut Session<H>,
    operations_supported: &[u16],
    events_supported: &[u16],
    sample_handle: Option<u32>,
    try_interrupt_read: impl FnOnce(&mut Session<H>) -> bool,
) -> Capabilities {
    let timeout = Duration::from_millis(PROBE_TIMEOUT_MS);
    let mut caps = Capabilities::default();

    if let Some(handle) = sample_handle {
        caps.partial_read = probe_ok(session, OperationCode::GetPartialObject as u16, &[handle, 0, 16], timeout);
        caps.partial_read64 =
            probe_ok(session, OperationCode::GetPartialObject64 as u16, &[handle, 0, 0, 16], timeout);
    }

    caps.partial_write = session
        .call(OperationCode::SendPartialObject as u16, &[0, 0, 0, 0], Some(&[]), timeout)
        .map(|o| o.response_code == ResponseCode::Ok as u16)
        .unwrap_or(false);

    caps.supports_events = !events_supported.is_empty() || try_interrupt_read(session);

    caps.prefer_prop_list = operations_supported.contains(&(OperationCode::GetObjectPropsSupported as u16))
        && operations_supported.contains(&(OperationCode::GetObjectPropList as u16));

    caps
}

fn probe_ok<H: UsbHostApi>(session: &mut Session<H>, code: u16, params: &[u32], timeout: Duration) -> bool {
    session
        .call(code, params, None, timeout)
        .map(|o| o.response_code == ResponseCode::Ok as u16)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtp_codec::container;
    use mtp_transport::{Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo, MockUsbHost, Transport};
    use std::time::Duration as StdDuration;

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
        transport.open(StdDuration::from_millis(500), || {}, |_h, _b| Ok(())).unwrap();
        Session::new(transport)
    }

    #[test]
    fn probes_partial_read_support_from_a_sample_handle() {
        let mut session = bound_session();
        {
            let host = session.transport_mut().host_mut();
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 1, &[])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 2, &[])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 3, &[])));
        }
        let caps = probe_capabilities(&mut session, &[], &[], Some(42), |_| false);
        assert!(caps.partial_read);
        assert!(caps.partial_read64);
        assert!(caps.partial_write);
        assert!(!caps.supports_events);
    }

    #[test]
    fn skips_partial_read_probes_without_a_sample_handle() {
        let mut session = bound_session();
        session
            .transport_mut()
            .host_mut()
            .bulk_read_data
            .push_back(Ok(container::encode_response(0x2002, 1, &[])));
        let caps = probe_capabilities(&mut session, &[], &[], None, |_| false);
        assert!(!caps.partial_read);
        assert!(!caps.partial_read64);
    }

    #[test]
    fn nonempty_events_supported_list_sets_supports_events() {
        let mut session = bound_session();
        session
            .transport_mut()
            .host_mut()
            .bulk_read_data
            .push_back(Ok(container::encode_response(0x2002, 1, &[])));
        let caps = probe_capabilities(&mut session, &[], &[0x4002], None, |_| false);
        assert!(caps.supports_events);
    }

    #[test]
    fn prefer_prop_list_requires_both_ops_present() {
        let mut session = bound_session();
        session
            .transport_mut()
            .host_mut()
            .bulk_read_data
            .push_back(Ok(container::encode_response(0x2002, 1, &[])));
        let ops = vec![OperationCode::GetObjectPropsSupported as u16, OperationCode::GetObjectPropList as u16];
        let caps = probe_capabilities(&mut session, &ops, &[], None, |_| false);
        assert!(caps.prefer_prop_list);
    }
}
