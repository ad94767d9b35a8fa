//! `UsbHostApi` implemented over `rusb` — the bulk-capable USB host API the
//! spec assumes is externally provided (§1 Non-goals).

use crate::host::UsbHostApi;
use crate::types::{Direction, EndpointDescriptorInfo, EndpointTransferType, InterfaceDescriptorInfo, TransportError};
use std::time::Duration;

impl From<rusb::Error> for TransportError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::NoDevice,
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::Busy => TransportError::Busy,
            rusb::Error::Access => TransportError::AccessDenied,
            other => TransportError::Io(other.to_string()),
        }
    }
}

pub struct RusbTransport<T: rusb::UsbContext> {
    device: rusb::Device<T>,
    handle: rusb::DeviceHandle<T>,
    claimed_interface: Option<u8>,
}

impl<T: rusb::UsbContext> RusbTransport<T> {
    pub fn open(device: rusb::Device<T>) -> Result<Self, TransportError> {
        let handle = device.open()?;
        Ok(Self { device, handle, claimed_interface: None })
    }
}

impl<T: rusb::UsbContext> UsbHostApi for RusbTransport<T> {
    fn list_interfaces(&mut self) -> Result<Vec<InterfaceDescriptorInfo>, TransportError> {
        let config = self.device.active_config_descriptor()?;
        let mut out = Vec::new();
        for iface in config.interfaces() {
            for desc in iface.descriptors() {
                let endpoints = desc
                    .endpoint_descriptors()
                    .map(|ep| EndpointDescriptorInfo {
                        address: ep.address(),
                        direction: match ep.direction() {
                            rusb::Direction::In => Direction::In,
                            rusb::Direction::Out => Direction::Out,
                        },
                        transfer_type: match ep.transfer_type() {
                            rusb::TransferType::Control => EndpointTransferType::Control,
                            rusb::TransferType::Isochronous => EndpointTransferType::Isochronous,
                            rusb::TransferType::Bulk => EndpointTransferType::Bulk,
                            rusb::TransferType::Interrupt => EndpointTransferType::Interrupt,
                        },
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect();
                out.push(InterfaceDescriptorInfo {
                    number: desc.interface_number(),
                    class: desc.class_code(),
                    subclass: desc.sub_class_code(),
                    protocol: desc.protocol_code(),
                    endpoints,
                });
            }
        }
        Ok(out)
    }

    fn claim(&mut self, iface_number: u8, detach_kernel_driver: bool) -> Result<(), TransportError> {
        if detach_kernel_driver {
            if self.handle.kernel_driver_active(iface_number).unwrap_or(false) {
                let _ = self.handle.detach_kernel_driver(iface_number);
            }
        }
        self.handle.claim_interface(iface_number)?;
        self.claimed_interface = Some(iface_number);
        Ok(())
    }

    fn release(&mut self, iface_number: u8) -> Result<(), TransportError> {
        self.handle.release_interface(iface_number)?;
        if self.claimed_interface == Some(iface_number) {
            self.claimed_interface = None;
        }
        Ok(())
    }

    fn control_probe(&mut self, timeout: Duration) -> Result<(), TransportError> {
        // PTP class-specific GetDeviceStatus: device-to-host, class, interface.
        let mut buf = [0u8; 32];
        self.handle
            .read_control(0xA1, 0x67, 0, 0, &mut buf, timeout)
            .map(|_| ())
            .map_err(TransportError::from)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        Ok(self.handle.write_bulk(endpoint, data, timeout)?)
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        Ok(self.handle.read_bulk(endpoint, buf, timeout)?)
    }

    fn interrupt_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        Ok(self.handle.read_interrupt(endpoint, buf, timeout)?)
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        Ok(self.handle.clear_halt(endpoint)?)
    }

    fn usb_reset(&mut self) -> Result<(), TransportError> {
        Ok(self.handle.reset()?)
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        self.handle = self.device.open()?;
        if let Some(iface) = self.claimed_interface {
            self.handle.claim_interface(iface)?;
        }
        Ok(())
    }
}
