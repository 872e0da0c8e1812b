// Host bus adapter
//
// Decodes a host machine's I/O ports onto the controller registers and the
// motor latch, and turns interrupt line changes into queued messages for the
// host to poll.

use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::fdc::Upd765;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortMap {
    /// Amstrad CPC with DDI-1 / built-in FDC
    Cpc,
    /// ZX Spectrum +3
    Plus3,
}

impl PortMap {
    pub fn status_port(&self) -> u16 {
        match self {
            PortMap::Cpc => 0xFB7E,
            PortMap::Plus3 => 0x2FFD,
        }
    }

    pub fn data_port(&self) -> u16 {
        match self {
            PortMap::Cpc => 0xFB7F,
            PortMap::Plus3 => 0x3FFD,
        }
    }

    pub fn motor_port(&self) -> u16 {
        match self {
            PortMap::Cpc => 0xFA7E,
            PortMap::Plus3 => 0x1FFD,
        }
    }

    /// Both machines drive all motors from a single latch bit.
    pub fn motor_mask(&self, value: u8) -> u8 {
        let on = match self {
            PortMap::Cpc => value & 0x01 != 0,
            PortMap::Plus3 => value & 0x08 != 0,
        };
        if on {
            0x0F
        } else {
            0x00
        }
    }
}

impl fmt::Display for PortMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MSR: 0x{:04X} - data: 0x{:04X} - motor: 0x{:04X}",
            self.status_port(),
            self.data_port(),
            self.motor_port()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    InterruptAsserted,
    InterruptDeasserted,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct FdcBus {
    pub fdc: Upd765,
    #[derivative(Debug = "ignore")]
    pub queue: Rc<RefCell<VecDeque<Message>>>,
    ports: PortMap,
    motor_latch: u8,
}

impl FdcBus {
    pub fn new(mut fdc: Upd765, ports: PortMap) -> Self {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        let sink = queue.clone();
        fdc.set_interrupt_handler(move |asserted| {
            let message = if asserted {
                Message::InterruptAsserted
            } else {
                Message::InterruptDeasserted
            };
            sink.borrow_mut().push_back(message);
        });

        tracing::info!("[BUS] FDC mapped at {}", ports);
        Self {
            fdc,
            queue,
            ports,
            motor_latch: 0,
        }
    }

    pub fn ports(&self) -> PortMap {
        self.ports
    }

    pub fn motor_latch(&self) -> u8 {
        self.motor_latch
    }

    pub fn input(&mut self, port: u16) -> u8 {
        if port == self.ports.status_port() {
            self.fdc.read_status()
        } else if port == self.ports.data_port() {
            self.fdc.read_data()
        } else {
            tracing::trace!("[BUS] Unmapped input port {:04X}", port);
            0xFF
        }
    }

    pub fn output(&mut self, port: u16, data: u8) {
        if port == self.ports.data_port() {
            self.fdc.write_data(data);
        } else if port == self.ports.motor_port() {
            self.motor_latch = data;
            self.fdc.set_motor(self.ports.motor_mask(data));
        } else if port == self.ports.status_port() {
            tracing::trace!("[BUS] Ignored write to FDC status port: {:02X}", data);
        } else {
            tracing::trace!("[BUS] Unmapped output port {:04X} <- {:02X}", port, data);
        }
    }

    pub fn clock(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.fdc.tick();
        }
    }

    pub fn terminal_count(&mut self) {
        self.fdc.terminal_count();
    }

    pub fn reset(&mut self) {
        self.motor_latch = 0;
        self.fdc.reset();
    }

    pub fn poll_message(&mut self) -> Option<Message> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn interrupt_line(&self) -> bool {
        self.fdc.is_interrupt_asserted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_masks() {
        assert_eq!(PortMap::Cpc.motor_mask(0x01), 0x0F);
        assert_eq!(PortMap::Cpc.motor_mask(0x08), 0x00);
        assert_eq!(PortMap::Plus3.motor_mask(0x08), 0x0F);
        assert_eq!(PortMap::Plus3.motor_mask(0x07), 0x00);
    }

    #[test]
    fn test_unmapped_ports() {
        let mut bus = FdcBus::new(Upd765::new(), PortMap::Cpc);
        assert_eq!(bus.input(0x1234), 0xFF);
        bus.output(0x1234, 0x55);
        assert_eq!(bus.input(PortMap::Cpc.status_port()), 0x80);
    }

    #[test]
    fn test_debug_skips_queue() {
        let mut bus = FdcBus::new(Upd765::new(), PortMap::Plus3);
        bus.output(PortMap::Plus3.motor_port(), 0x08);

        let debug = format!("{:?}", bus);
        assert!(debug.contains("motor_latch: 8"));
        assert!(debug.contains("Plus3"));
        assert!(!debug.contains("queue"));
    }
}
