//! The persistent boot configuration record.

use byteorder::{ByteOrder, LittleEndian};

use crate::hal::ConfigStore;
use crate::xtea::KEY_SIZE;

/// Sentinel timestamp meaning no image has ever been accepted.
pub const TIMESTAMP_UNSET: u32 = 0xFFFF_FFFF;

/// The one persistent record the bootloader owns, stored in a reserved
/// slot at the top of the internal non-volatile store. It is read once per
/// boot and written only after MAC verification has run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootConfig {
    /// The provisioned master key
    pub key: [u8; KEY_SIZE],
    /// Timestamp of the last accepted image
    pub time_stamp: u32,
}

impl BootConfig {
    /// On-wire size of the record: the key followed by the little-endian
    /// timestamp.
    pub const SIZE: usize = KEY_SIZE + 4;

    pub fn load<S: ConfigStore>(store: &mut S) -> BootConfig {
        let mut buf = [0u8; Self::SIZE];
        store.read_block(Self::SIZE as u32, &mut buf);

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&buf[..KEY_SIZE]);

        BootConfig {
            key,
            time_stamp: LittleEndian::read_u32(&buf[KEY_SIZE..]),
        }
    }

    pub fn store<S: ConfigStore>(&self, store: &mut S) {
        let mut buf = [0u8; Self::SIZE];
        buf[..KEY_SIZE].copy_from_slice(&self.key);
        LittleEndian::write_u32(&mut buf[KEY_SIZE..], self.time_stamp);

        store.update_block(Self::SIZE as u32, &buf);
    }

    /// Advances only the persisted timestamp, leaving the key untouched.
    /// The timestamp occupies the last four bytes of the record.
    pub fn advance_time_stamp<S: ConfigStore>(store: &mut S, time_stamp: u32) {
        store.update_dword(4, time_stamp);
    }
}
