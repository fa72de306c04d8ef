//! Contracts of the hardware collaborators the boot engine drives.
//!
//! The engine owns one implementation of each of these traits. On a real
//! target they wrap the two-wire peripheral, the program-memory controller,
//! the internal non-volatile store and the reset/clock registers; in tests
//! they are in-memory fakes.

use crate::Error;

/// Reset-cause register bits, captured once at entry and forwarded to the
/// application through a general-purpose byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct ResetFlags(pub u8);

impl ResetFlags {
    pub const POWER_ON: ResetFlags = ResetFlags(0x01);
    pub const BROWN_OUT: ResetFlags = ResetFlags(0x02);
    pub const EXTERNAL: ResetFlags = ResetFlags(0x04);
    pub const WATCHDOG: ResetFlags = ResetFlags(0x08);
    pub const SOFTWARE: ResetFlags = ResetFlags(0x10);
    pub const DEBUGGER: ResetFlags = ResetFlags(0x20);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ResetFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns the flags set besides `other`.
    pub fn without(self, other: ResetFlags) -> ResetFlags {
        ResetFlags(self.0 & !other.0)
    }
}

/// Master-mode access to the external serial memory holding the staged
/// image.
///
/// `begin_read` leaves the bus in reading mode at the given memory offset;
/// subsequent `read_byte` calls return consecutive bytes, ACKing to
/// continue or NACKing to mark the last byte of the transfer.
pub trait MemoryBus {
    /// Returns true iff a device ACKs its address on the bus.
    fn probe(&mut self, addr: u8) -> bool;

    fn begin_read(&mut self, addr: u8, offset: u32) -> Result<(), Error>;

    fn read_byte(&mut self, ack: bool) -> Result<u8, Error>;

    /// Releases the bus after a transfer.
    fn stop(&mut self);

    /// Disables the bus peripheral before the application starts.
    fn release(&mut self);

    /// Reads `out.len()` bytes starting at `offset`, NACKing the last byte
    /// and releasing the bus.
    fn read_block(&mut self, addr: u8, offset: u32, out: &mut [u8]) -> Result<(), Error> {
        if out.is_empty() {
            return Ok(());
        }

        self.begin_read(addr, offset)?;

        let last = out.len() - 1;
        for byte in out[..last].iter_mut() {
            *byte = self.read_byte(true)?;
        }
        out[last] = self.read_byte(false)?;

        self.stop();

        Ok(())
    }
}

/// The internal program-memory controller.
///
/// Writes land in a page buffer; `page_erase_write` commits the buffer to
/// the page it addresses. The peripheral rejects commands while `busy`, so
/// callers poll it down before issuing one.
pub trait ProgramFlash {
    /// Copies bytes into the page buffer at the given program-memory
    /// offset.
    fn fill(&mut self, offset: u32, bytes: &[u8]);

    fn busy(&mut self) -> bool;

    fn page_erase_write(&mut self);
}

/// The small internal non-volatile store holding the persistent boot
/// configuration. Offsets are counted back from the end of the store,
/// where the configuration record lives.
pub trait ConfigStore {
    fn read_block(&mut self, offset_from_end: u32, out: &mut [u8]);

    /// Writes a block and waits for the store to finish.
    fn update_block(&mut self, offset_from_end: u32, bytes: &[u8]);

    /// Writes a single little-endian 32-bit word and waits for the store
    /// to finish.
    fn update_dword(&mut self, offset_from_end: u32, value: u32);
}

/// Reset, clock and hand-off control.
pub trait Mcu {
    fn reset_cause(&mut self) -> ResetFlags;

    /// Drops the main clock to a rate safe for program-memory writes over
    /// the full supply-voltage range.
    fn reduce_clock(&mut self);

    /// Clears the captured flags from the reset-cause register.
    fn clear_reset_cause(&mut self, cause: ResetFlags);

    /// Stashes the captured flags in a general-purpose byte readable by
    /// the application.
    fn stash_reset_cause(&mut self, cause: ResetFlags);

    /// Engages the write lock over the boot section.
    fn lock_boot_section(&mut self);

    fn software_reset(&mut self);

    /// Jumps to the application start, immediately after the boot section.
    fn jump_to_application(&mut self);
}
