//! Interface probe algorithm, endpoint I/O and the recovery ladder (§4.4).

use crate::host::UsbHostApi;
use crate::types::{BoundInterface, EndpointTransferType as Tt, InterfaceDescriptorInfo, TransportError};
use std::time::Duration;
use tracing::{debug, warn};

const SCORE_PTP_STILL_IMAGE: u32 = 100;
const SCORE_VENDOR_SPECIFIC: u32 = 60;
const BONUS_HAS_INTERRUPT_IN: u32 = 5;

/// Scores one interface candidate. Returns `None` for interfaces that are
/// not MTP-eligible: either missing a bulk in/out pair, or not matching
/// either the PTP-still-image or vendor-specific base classes.
pub fn score_interface(iface: &InterfaceDescriptorInfo) -> Option<u32> {
    let has_bulk_in = iface.endpoints.iter().any(|e| e.direction == crate::types::Direction::In && e.transfer_type == Tt::Bulk);
    let has_bulk_out = iface.endpoints.iter().any(|e| e.direction == crate::types::Direction::Out && e.transfer_type == Tt::Bulk);
    if !(has_bulk_in && has_bulk_out) {
        return None;
    }
    let base = match (iface.class, iface.subclass, iface.protocol) {
        (0x06, 0x01, 0x01) => SCORE_PTP_STILL_IMAGE,
        (0xFF, _, _) => SCORE_VENDOR_SPECIFIC,
        _ => return None,
    };
    let has_interrupt_in = iface.interrupt_in().is_some();
    Some(base + if has_interrupt_in { BONUS_HAS_INTERRUPT_IN } else { 0 })
}

/// Orders candidate interface indices highest-score-first; ties keep
/// original enumeration order (stable sort).
pub fn order_candidates(ifaces: &[InterfaceDescriptorInfo]) -> Vec<(usize, u32)> {
    let mut scored: Vec<(usize, u32)> = ifaces
        .iter()
        .enumerate()
        .filter_map(|(i, iface)| score_interface(iface).map(|s| (i, s)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

/// Owns a `UsbHostApi` implementation plus the bound MTP interface (once
/// `open` succeeds). Endpoint I/O and the recovery ladder are implemented
/// here; PTP-level framing is the caller's concern (`mtp-session`).
pub struct Transport<H: UsbHostApi> {
    host: H,
    bound: Option<BoundInterface>,
    detach_kernel_driver: bool,
}

impl<H: UsbHostApi> Transport<H> {
    pub fn new(host: H, detach_kernel_driver: bool) -> Self {
        Self { host, bound: None, detach_kernel_driver }
    }

    pub fn bound(&self) -> Option<BoundInterface> {
        self.bound
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Runs the interface-probe algorithm (§4.4 steps 1-4). `bulk_probe` is
    /// the caller-supplied bulk-level probe (a short `GetDeviceInfo`); the
    /// control-pipe `GetDeviceStatus` probe is issued directly against the
    /// host API since it carries no PTP payload semantics.
    pub fn open<F>(
        &mut self,
        probe_timeout: Duration,
        mut stabilize: impl FnMut(),
        mut bulk_probe: F,
    ) -> Result<BoundInterface, TransportError>
    where
        F: FnMut(&mut H, &BoundInterface) -> Result<(), TransportError>,
    {
        let ifaces = self.host.list_interfaces()?;
        let order = order_candidates(&ifaces);
        if order.is_empty() {
            return Err(TransportError::NoSuitableInterface { candidates: 0 });
        }
        let mut last_err = TransportError::NoSuitableInterface { candidates: order.len() };
        for (idx, score) in &order {
            let iface = &ifaces[*idx];
            debug!(interface = iface.number, score, "probing candidate MTP interface");
            let bound = BoundInterface {
                number: iface.number,
                bulk_in: iface.bulk_in().expect("candidate always has bulk_in"),
                bulk_out: iface.bulk_out().expect("candidate always has bulk_out"),
                interrupt_in: iface.interrupt_in(),
                bulk_in_max_packet: iface.max_packet_size(iface.bulk_in().unwrap()).unwrap_or(64),
                bulk_out_max_packet: iface.max_packet_size(iface.bulk_out().unwrap()).unwrap_or(64),
            };
            if let Err(e) = self.host.claim(bound.number, self.detach_kernel_driver) {
                warn!(interface = bound.number, error = %e, "claim failed, trying next candidate");
                last_err = e;
                continue;
            }
            match self.probe_with_ladder(&bound, probe_timeout, &mut stabilize, &mut bulk_probe) {
                Ok(()) => {
                    self.bound = Some(bound);
                    return Ok(bound);
                }
                Err(e) => {
                    let _ = self.host.release(bound.number);
                    last_err = e;
                    continue;
                }
            }
        }
        Err(last_err)
    }

    fn probe_with_ladder<F>(
        &mut self,
        bound: &BoundInterface,
        timeout: Duration,
        stabilize: &mut impl FnMut(),
        bulk_probe: &mut F,
    ) -> Result<(), TransportError>
    where
        F: FnMut(&mut H, &BoundInterface) -> Result<(), TransportError>,
    {
        let attempt = |host: &mut H| -> Result<(), TransportError> {
            host.control_probe(timeout)?;
            bulk_probe(host, bound)
        };

        if attempt(&mut self.host).is_ok() {
            return Ok(());
        }

        // Step: clear-halt both bulk endpoints, brief stabilization, retry.
        let _ = self.host.clear_halt(bound.bulk_in);
        let _ = self.host.clear_halt(bound.bulk_out);
        stabilize();
        if attempt(&mut self.host).is_ok() {
            return Ok(());
        }

        // Step: usb_reset + reopen + reclaim, retry once more.
        let reset_result: Result<(), TransportError> = (|| {
            self.host.usb_reset()?;
            self.host.reopen()?;
            self.host.claim(bound.number, self.detach_kernel_driver)?;
            Ok(())
        })();
        if reset_result.is_ok() && attempt(&mut self.host).is_ok() {
            return Ok(());
        }

        Err(TransportError::Io("probe failed after full recovery ladder".to_string()))
    }

    /// Clears halt on both bulk endpoints of the currently bound interface.
    /// Exposed for `mtp-session`'s own recovery use (spec §4.5).
    pub fn clear_halt_both(&mut self, bound: &BoundInterface) -> Result<(), TransportError> {
        self.host.clear_halt(bound.bulk_in)?;
        self.host.clear_halt(bound.bulk_out)?;
        Ok(())
    }

    /// Resets the bus, reopens the device, and reclaims `bound`'s interface
    /// number. Used both internally and by `mtp-session` when a quirk's
    /// `resetOnOpen` flag says to skip straight to this step.
    pub fn usb_reset_and_reclaim(&mut self, bound: &BoundInterface) -> Result<(), TransportError> {
        self.host.usb_reset()?;
        self.host.reopen()?;
        self.host.claim(bound.number, self.detach_kernel_driver)?;
        Ok(())
    }

    /// Writes `payload` to the bound bulk-out endpoint. A short write
    /// (fewer bytes sent than requested) before timeout is an error. Sends
    /// a zero-length packet afterward if `payload.len()` is an exact
    /// multiple of the endpoint's max packet size (ZLP termination).
    pub fn bulk_write(&mut self, payload: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let bound = self.bound.ok_or(TransportError::NoDevice)?;
        let sent = self.host.bulk_write(bound.bulk_out, payload, timeout)?;
        if sent < payload.len() {
            return Err(TransportError::ShortWrite { sent, requested: payload.len() });
        }
        if bound.bulk_out_max_packet != 0 && payload.len() % bound.bulk_out_max_packet as usize == 0 {
            self.host.bulk_write(bound.bulk_out, &[], timeout)?;
        }
        Ok(sent)
    }

    pub fn bulk_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let bound = self.bound.ok_or(TransportError::NoDevice)?;
        self.host.bulk_read(bound.bulk_in, buf, timeout)
    }

    pub fn interrupt_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let bound = self.bound.ok_or(TransportError::NoDevice)?;
        let ep = bound.interrupt_in.ok_or(TransportError::NoDevice)?;
        self.host.interrupt_read(ep, buf, timeout)
    }
}
