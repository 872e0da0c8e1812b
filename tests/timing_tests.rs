#[cfg(test)]
mod timing_tests {
    use std::{cell::RefCell, rc::Rc};

    use upd765::{
        DiskImage, DriveKind, FdcBuilder, FdcConfig, FdcPhase, Geometry, InterruptState, Upd765,
    };

    fn controller(config: FdcConfig) -> (Upd765, Rc<RefCell<Vec<bool>>>) {
        let mut fdc = FdcBuilder::from_config(config).build().unwrap();
        fdc.insert_media(
            0,
            Box::new(DiskImage::formatted(Geometry::new(40, 1, 9, 2, 0xC1), 0xE5)),
        )
        .unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        fdc.set_interrupt_handler(move |asserted| sink.borrow_mut().push(asserted));
        (fdc, events)
    }

    fn ticks_until_asserted(fdc: &mut Upd765, limit: u32) -> Option<u32> {
        for tick in 1..=limit {
            fdc.tick();
            if fdc.is_interrupt_asserted() {
                return Some(tick);
            }
        }
        None
    }

    #[test]
    fn test_ready_change_uses_long_delay() {
        let (mut fdc, events) = controller(FdcConfig::default());

        fdc.set_motor(0x01);
        assert_eq!(fdc.interrupt_state(), InterruptState::ReadyChange);
        assert_eq!(ticks_until_asserted(&mut fdc, 1000), Some(512));
        assert_eq!(*events.borrow(), vec![true]);

        fdc.write_data(0x08);
        assert_eq!(fdc.read_data(), 0xC0);
        assert_eq!(fdc.read_data(), 0x00);
        assert_eq!(*events.borrow(), vec![true, false]);
    }

    #[test]
    fn test_configured_delays() {
        let config = FdcConfig {
            short_delay: 5,
            long_delay: 20,
            ..Default::default()
        };
        let (mut fdc, _) = controller(config);

        fdc.write_data(0x1F);
        assert_eq!(ticks_until_asserted(&mut fdc, 100), Some(5));

        fdc.read_data();
        fdc.set_motor(0x01);
        assert_eq!(ticks_until_asserted(&mut fdc, 100), Some(20));
    }

    #[test]
    fn test_interrupt_fires_once() {
        let (mut fdc, events) = controller(FdcConfig::default());

        fdc.write_data(0x1F);
        for _ in 0..100 {
            fdc.tick();
        }
        assert_eq!(*events.borrow(), vec![true]);
        assert_eq!(fdc.interrupt_state(), InterruptState::ResultReady);
    }

    #[test]
    fn test_result_bytes_raise_interrupt_each() {
        let (mut fdc, events) = controller(FdcConfig::default());
        fdc.set_motor(0x01);
        // Collect the ready change first so data interrupts are armed
        ticks_until_asserted(&mut fdc, 1000);
        fdc.write_data(0x08);
        events.borrow_mut().clear();

        ticks_until_asserted(&mut fdc, 10);
        fdc.read_data();
        ticks_until_asserted(&mut fdc, 10);
        fdc.read_data();

        assert_eq!(fdc.phase(), FdcPhase::Idle);
        assert_eq!(*events.borrow(), vec![true, false, true, false]);
        assert_eq!(fdc.interrupt_state(), InterruptState::None);
    }

    #[test]
    fn test_execution_bytes_raise_interrupt() {
        let (mut fdc, events) = controller(FdcConfig::default());
        fdc.set_motor(0x01);
        ticks_until_asserted(&mut fdc, 1000);
        fdc.write_data(0x08);
        fdc.read_data();
        fdc.read_data();
        events.borrow_mut().clear();

        for byte in [0x46, 0x00, 0x00, 0x00, 0xC1, 0x02, 0xC1, 0x2A, 0xFF] {
            fdc.write_data(byte);
        }
        assert_eq!(fdc.phase(), FdcPhase::Execution);
        assert_eq!(fdc.interrupt_state(), InterruptState::ExecByteReady);
        assert_eq!(ticks_until_asserted(&mut fdc, 10), Some(2));

        fdc.read_data();
        assert_eq!(*events.borrow(), vec![true, false]);
        assert_eq!(fdc.interrupt_state(), InterruptState::ExecByteReady);
    }

    #[test]
    fn test_seek_end_replaces_ready_change() {
        let (mut fdc, _) = controller(FdcConfig::default());
        fdc.set_motor(0x01);

        for byte in [0x0F, 0x00, 0x07] {
            fdc.write_data(byte);
        }
        assert_eq!(fdc.interrupt_state(), InterruptState::SeekEnd);
        assert_eq!(ticks_until_asserted(&mut fdc, 10), Some(2));

        fdc.write_data(0x08);
        assert_eq!(fdc.read_data(), 0x20);
        assert_eq!(fdc.read_data(), 7);
    }

    #[test]
    fn test_ready_change_waits_for_idle() {
        let (mut fdc, events) = controller(FdcConfig::default());

        fdc.write_data(0x1F);
        fdc.set_motor(0x01);
        assert_eq!(fdc.phase(), FdcPhase::Result);
        assert_eq!(fdc.interrupt_state(), InterruptState::ResultReady);

        assert_eq!(fdc.read_data(), 0x80);
        assert_eq!(fdc.phase(), FdcPhase::Idle);
        assert_eq!(fdc.interrupt_state(), InterruptState::ReadyChange);
        assert_eq!(ticks_until_asserted(&mut fdc, 1000), Some(512));
        assert_eq!(*events.borrow(), vec![true]);

        fdc.write_data(0x08);
        assert_eq!(fdc.read_data(), 0xC0);
        assert_eq!(fdc.read_data(), 0x00);
    }

    #[test]
    fn test_no_ready_change_without_media() {
        let mut fdc = FdcBuilder::new()
            .no_drives()
            .drive(0, DriveKind::ThreeInch, 1, 40)
            .build()
            .unwrap();
        fdc.set_motor(0x01);
        assert_eq!(fdc.interrupt_state(), InterruptState::None);
    }
}
