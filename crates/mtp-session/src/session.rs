//! Session open/close sequencing (component C4, spec §4.5).

use crate::error::SessionError;
use crate::transaction::{self, TransactionOutcome};
use mtp_codec::{OperationCode, ResponseCode};
use mtp_quirks::{BusyBackoff, EffectiveTuning, Hook, HookPhase};
use mtp_transport::{Transport, UsbHostApi};
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Wraps a bound [`Transport`] and drives the PTP session state machine:
/// transaction id bookkeeping, the open/close sequence and hook execution.
/// Transaction ids are monotonic per open session and reset to 1 on every
/// `open` (spec §4.5).
pub struct Session<H: UsbHostApi> {
    transport: Transport<H>,
    next_txn_id: u32,
    session_id: u32,
}

impl<H: UsbHostApi> Session<H> {
    pub fn new(transport: Transport<H>) -> Self {
        Self { transport, next_txn_id: 1, session_id: 1 }
    }

    pub fn transport(&self) -> &Transport<H> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<H> {
        &mut self.transport
    }

    fn next_txn(&mut self) -> u32 {
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        id
    }

    /// Runs the session-open sequence (spec §4.5): `postOpenUSB` hook,
    /// `postClaimInterface` hook, `tuning.stabilizeMs` sleep, `OpenSession`
    /// (retried once via `CloseSession` on `SessionAlreadyOpen`), then the
    /// `postOpenSession` hook.
    pub async fn open(&mut self, tuning: &EffectiveTuning) -> Result<(), SessionError> {
        run_hook_delay(&tuning.hooks, HookPhase::PostOpenUsb).await;
        run_hook_delay(&tuning.hooks, HookPhase::PostClaimInterface).await;
        if tuning.stabilize_ms > 0 {
            tokio::time::sleep(Duration::from_millis(tuning.stabilize_ms)).await;
        }

        self.next_txn_id = 1;
        self.session_id = 1;
        let timeout = Duration::from_millis(tuning.handshake_timeout_ms);
        self.open_session_inner(timeout)?;

        run_hook_delay(&tuning.hooks, HookPhase::PostOpenSession).await;
        Ok(())
    }

    fn open_session_inner(&mut self, timeout: Duration) -> Result<(), SessionError> {
        let txn = self.next_txn();
        let outcome = transaction::execute(
            &mut self.transport,
            OperationCode::OpenSession as u16,
            txn,
            &[self.session_id],
            None,
            timeout,
        )?;
        if outcome.response_code == ResponseCode::SessionAlreadyOpen as u16 {
            warn!(session_id = self.session_id, "SessionAlreadyOpen, closing and retrying");
            let close_txn = self.next_txn();
            let _ = transaction::execute(
                &mut self.transport,
                OperationCode::CloseSession as u16,
                close_txn,
                &[self.session_id],
                None,
                timeout,
            );
            let retry_txn = self.next_txn();
            let retry = transaction::execute(
                &mut self.transport,
                OperationCode::OpenSession as u16,
                retry_txn,
                &[self.session_id],
                None,
                timeout,
            )?;
            return expect_ok(retry.response_code);
        }
        expect_ok(outcome.response_code)
    }

    /// Issues `CloseSession`. Failures are logged, never surfaced (spec §4.5).
    pub fn close(&mut self, timeout: Duration) {
        let txn = self.next_txn();
        if let Err(e) = transaction::execute(
            &mut self.transport,
            OperationCode::CloseSession as u16,
            txn,
            &[self.session_id],
            None,
            timeout,
        ) {
            warn!(error = %e, "CloseSession failed (ignored)");
        }
    }

    /// Runs one transaction with the next transaction id. Callers classify
    /// non-`Ok` response codes into semantic errors themselves.
    pub fn call(
        &mut self,
        code: u16,
        params: &[u32],
        data: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<TransactionOutcome, SessionError> {
        let txn = self.next_txn();
        transaction::execute(&mut self.transport, code, txn, params, data, timeout)
    }

    /// Same as [`Session::call`], but retries `DeviceBusy (0x2003)` responses
    /// per the `onDeviceBusy` hook's `busyBackoff` schedule (spec §4.6,
    /// §8.4 scenario 3).
    pub async fn call_with_busy_retry(
        &mut self,
        code: u16,
        params: &[u32],
        data: Option<&[u8]>,
        timeout: Duration,
        hooks: &[Hook],
    ) -> Result<TransactionOutcome, SessionError> {
        let backoff = hooks
            .iter()
            .find(|h| h.phase == HookPhase::OnDeviceBusy)
            .and_then(|h| h.busy_backoff);
        let mut attempt = 0u32;
        loop {
            let outcome = self.call(code, params, data, timeout)?;
            if outcome.response_code != ResponseCode::DeviceBusy as u16 {
                return Ok(outcome);
            }
            let Some(b) = backoff else {
                return Ok(outcome);
            };
            if attempt >= b.retries {
                return Ok(outcome);
            }
            attempt += 1;
            tokio::time::sleep(busy_delay(&b)).await;
        }
    }
}

fn busy_delay(b: &BusyBackoff) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..=1.0) * b.jitter_pct;
    let ms = (b.base_ms as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(ms)
}

fn expect_ok(code: u16) -> Result<(), SessionError> {
    if code == ResponseCode::Ok as u16 {
        Ok(())
    } else {
        Err(SessionError::DeviceError(code))
    }
}

async fn run_hook_delay(hooks: &[Hook], phase: HookPhase) {
    if let Some(hook) = hooks.iter().find(|h| h.phase == phase) {
        if let Some(ms) = hook.delay_ms {
            if ms > 0 {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtp_codec::container;
    use mtp_quirks::EffectiveTuning;
    use mtp_transport::{Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo, MockUsbHost};
    use std::collections::HashMap;

    fn bound_transport() -> Transport<MockUsbHost> {
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

    fn tuning() -> EffectiveTuning {
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

    #[tokio::test]
    async fn open_succeeds_on_first_try() {
        let mut session = Session::new(bound_transport());
        session
            .transport_mut()
            .host_mut()
            .bulk_read_data
            .push_back(Ok(container::encode_response(0x2001, 1, &[])));
        session.open(&tuning()).await.unwrap();
    }

    #[tokio::test]
    async fn session_already_open_is_closed_and_retried() {
        let mut session = Session::new(bound_transport());
        {
            let host = session.transport_mut().host_mut();
            host.bulk_read_data.push_back(Ok(container::encode_response(0x201E, 1, &[])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 2, &[])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 3, &[])));
        }
        session.open(&tuning()).await.unwrap();
    }

    #[tokio::test]
    async fn busy_response_retries_per_backoff_then_succeeds() {
        let mut session = Session::new(bound_transport());
        let hooks = vec![Hook {
            phase: HookPhase::OnDeviceBusy,
            delay_ms: None,
            busy_backoff: Some(BusyBackoff { retries: 3, base_ms: 1, jitter_pct: 0.0 }),
        }];
        {
            let host = session.transport_mut().host_mut();
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2003, 1, &[])));
            host.bulk_read_data.push_back(Ok(container::encode_response(0x2001, 2, &[])));
        }
        let outcome = session
            .call_with_busy_retry(0x1004, &[], None, Duration::from_millis(500), &hooks)
            .await
            .unwrap();
        assert_eq!(outcome.response_code, 0x2001);
    }
}
