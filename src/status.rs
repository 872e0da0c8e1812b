// Bit layouts of the main status register and ST0..ST3

// Main status register
pub const MSR_REQUEST_FOR_MASTER: u8 = 0x80;
pub const MSR_DATA_TO_HOST: u8 = 0x40;
pub const MSR_EXECUTION: u8 = 0x20;
pub const MSR_COMMAND_BUSY: u8 = 0x10;
pub const MSR_DRIVE_BUSY_MASK: u8 = 0x0F;

/// Value of the main status register while waiting for a command.
pub const MSR_IDLE: u8 = MSR_REQUEST_FOR_MASTER;

// ST0
pub const ST0_INVALID: u8 = 0x80;
pub const ST0_ABNORMAL: u8 = 0x40;
pub const ST0_SEEK_END: u8 = 0x20;
pub const ST0_EQUIPMENT_CHECK: u8 = 0x10;
pub const ST0_NOT_READY: u8 = 0x08;
pub const ST0_HEAD: u8 = 0x04;
pub const ST0_UNIT_MASK: u8 = 0x03;

/// Abnormal termination caused by the ready line changing.
pub const ST0_READY_CHANGED: u8 = ST0_INVALID | ST0_ABNORMAL;

// ST1
pub const ST1_END_OF_CYLINDER: u8 = 0x80;
pub const ST1_DATA_ERROR: u8 = 0x20;
pub const ST1_OVERRUN: u8 = 0x10;
pub const ST1_NO_DATA: u8 = 0x04;
pub const ST1_NOT_WRITABLE: u8 = 0x02;
pub const ST1_MISSING_ADDRESS_MARK: u8 = 0x01;

// ST2
pub const ST2_CONTROL_MARK: u8 = 0x40;
pub const ST2_DATA_ERROR_IN_DATA: u8 = 0x20;
pub const ST2_WRONG_CYLINDER: u8 = 0x10;
pub const ST2_SCAN_HIT: u8 = 0x08;
pub const ST2_SCAN_NOT_SATISFIED: u8 = 0x04;
pub const ST2_BAD_CYLINDER: u8 = 0x02;
pub const ST2_MISSING_DATA_MARK: u8 = 0x01;
pub const ST2_SCAN_MASK: u8 = ST2_SCAN_HIT | ST2_SCAN_NOT_SATISFIED;

// ST3
pub const ST3_FAULT: u8 = 0x80;
pub const ST3_WRITE_PROTECTED: u8 = 0x40;
pub const ST3_READY: u8 = 0x20;
pub const ST3_TRACK_0: u8 = 0x10;
pub const ST3_TWO_SIDE: u8 = 0x08;
pub const ST3_HEAD: u8 = 0x04;
pub const ST3_UNIT_MASK: u8 = 0x03;

/// Unit/head bits shared by ST0 and ST3.
pub fn unit_head_bits(unit: u8, head: u8) -> u8 {
    (unit & ST0_UNIT_MASK) | ((head & 0x01) << 2)
}

/// Sector size in bytes for a size code N.
pub fn sector_size(size_code: u8) -> usize {
    128usize << size_code.min(6)
}
