//! The boot-policy state machine and install pipeline.
//!
//! The flow is strictly linear: capture the reset cause, decide whether
//! this reset is a bootloader candidate, probe the external memory, load
//! the descriptor and the persistent configuration, evaluate the
//! acceptance predicate, verify the MAC over descriptor and body, stream
//! the body into program memory and reset. Every failure on the way
//! resolves to launching the resident application through the common
//! lock-and-jump epilogue.

use log::{debug, info, warn};

use crate::config::{BootConfig, TIMESTAMP_UNSET};
use crate::descriptor::{BodyCipher, FirmwareDescriptor, KeyUpdate};
use crate::hal::{ConfigStore, Mcu, MemoryBus, ProgramFlash, ResetFlags};
use crate::xtea::{Cipher, Mac, Operation, BLOCK_SIZE, KEY_SIZE};
use crate::Error;

/// Build-time constants of the target, carried as run-time parameters.
pub struct BootParams {
    /// Bus address of the external memory device
    pub mem_addr: u8,
    /// Size of the boot section; also the program-memory offset of the
    /// application and the external-memory offset of the image body
    pub boot_size: u32,
    /// Size of the application section
    pub app_size: u32,
    /// Atomic erase-write unit of program memory
    pub page_size: u32,
    /// Accept any timestamp different from the persisted one instead of
    /// requiring a newer one
    pub downgrade_allowed: bool,
    /// On a MAC mismatch, record the attempted timestamp so the image is
    /// not re-verified on every reset
    pub memoize_mac_failure: bool,
}

impl Default for BootParams {
    fn default() -> BootParams {
        BootParams {
            mem_addr: 0xA0,
            boot_size: 0x800,
            app_size: 0x1800,
            page_size: 64,
            downgrade_allowed: false,
            memoize_mac_failure: true,
        }
    }
}

/// How a boot pass ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// Control was handed to the resident application
    Application,
    /// A new image was installed and a software reset was issued
    Reset,
}

/// The boot engine, owning the four hardware collaborators for the
/// duration of the boot pass. All cipher and descriptor state lives on the
/// stack of [`Bootloader::run`].
pub struct Bootloader<M, B, F, S> {
    pub mcu: M,
    pub bus: B,
    pub flash: F,
    pub store: S,
    pub params: BootParams,
}

/// A reset enters the bootloader unless the watchdog flagged it, or only
/// the brown-out flag is set and nothing else. An empty cause register is
/// a candidate.
pub fn is_boot_candidate(cause: ResetFlags) -> bool {
    if cause.is_empty() {
        return true;
    }

    !cause.contains(ResetFlags::WATCHDOG) && !cause.without(ResetFlags::BROWN_OUT).is_empty()
}

impl<M, B, F, S> Bootloader<M, B, F, S>
where
    M: Mcu,
    B: MemoryBus,
    F: ProgramFlash,
    S: ConfigStore,
{
    /// Runs one boot pass.
    ///
    /// Returns [`Outcome::Reset`] immediately after issuing the software
    /// reset that follows a successful installation; nothing past that
    /// point executes on real hardware. On every other path the reset
    /// cause is restored and stashed for the application, the boot section
    /// is locked and control jumps to the application start.
    pub fn run(&mut self) -> Outcome {
        let cause = self.mcu.reset_cause();
        self.mcu.reduce_clock();

        if is_boot_candidate(cause) {
            if self.try_install() {
                return Outcome::Reset;
            }
            self.bus.release();
        }

        self.mcu.clear_reset_cause(cause);
        self.mcu.stash_reset_cause(cause);
        self.mcu.lock_boot_section();
        self.mcu.jump_to_application();

        Outcome::Application
    }

    /// The candidate path. Returns true iff a new image was burned in and
    /// the software reset was issued; any error on the way means the
    /// resident application runs instead.
    fn try_install(&mut self) -> bool {
        if !self.bus.probe(self.params.mem_addr) {
            debug!(
                "no device answered at {:#04x}, starting the application",
                self.params.mem_addr
            );
            return false;
        }

        let (descriptor, mut config) = match self.load_boot_data() {
            Ok(loaded) => loaded,
            Err(err) => {
                debug!("could not load the firmware descriptor: {}", err);
                return false;
            }
        };

        if !self.firmware_should_be_processed(&descriptor, &config) {
            return false;
        }

        match self.firmware_mac_ok(&descriptor, &config) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "MAC mismatch for the image with timestamp {}",
                    descriptor.time_stamp
                );
                if self.params.memoize_mac_failure {
                    // Remember the faulty image so it is not re-verified
                    // on every reset.
                    BootConfig::advance_time_stamp(&mut self.store, descriptor.time_stamp);
                }
                return false;
            }
            Err(err) => {
                debug!("MAC verification aborted: {}", err);
                return false;
            }
        }

        if let Err(err) = self.install(&descriptor, &mut config) {
            debug!("installation aborted: {}", err);
            return false;
        }

        config.time_stamp = descriptor.time_stamp;
        config.store(&mut self.store);
        info!(
            "installed the image with timestamp {}, resetting",
            config.time_stamp
        );
        self.mcu.software_reset();

        true
    }

    /// Reads the descriptor from external memory and the persistent
    /// configuration from the internal store.
    fn load_boot_data(&mut self) -> Result<(FirmwareDescriptor, BootConfig), Error> {
        let control_at = self.params.boot_size - FirmwareDescriptor::SIZE as u32;

        let mut raw = [0u8; FirmwareDescriptor::SIZE];
        self.bus
            .read_block(self.params.mem_addr, control_at, &mut raw)?;

        let descriptor = FirmwareDescriptor::from_reader(&raw[..])?;
        let config = BootConfig::load(&mut self.store);

        Ok((descriptor, config))
    }

    /// The acceptance predicate. Checking it first avoids the expensive
    /// MAC computation for images that would be rejected anyway.
    fn firmware_should_be_processed(
        &self,
        descriptor: &FirmwareDescriptor,
        config: &BootConfig,
    ) -> bool {
        if descriptor.reserved_mode_bits() != 0 {
            debug!(
                "reserved mode bits set ({:#04x}), starting the application",
                descriptor.mode
            );
            return false;
        }

        if descriptor.firmware_size == 0 || descriptor.firmware_size > self.params.app_size {
            debug!(
                "firmware size {} outside the application section, starting the application",
                descriptor.firmware_size
            );
            return false;
        }

        if descriptor.time_stamp == TIMESTAMP_UNSET {
            return false;
        }

        let fresh = if self.params.downgrade_allowed {
            descriptor.time_stamp != config.time_stamp
        } else {
            descriptor.time_stamp > config.time_stamp || config.time_stamp == TIMESTAMP_UNSET
        };

        if !fresh {
            debug!(
                "timestamp {} rejected against persisted {}",
                descriptor.time_stamp, config.time_stamp
            );
        }

        fresh
    }

    /// Computes the CFB-MAC over the descriptor (excluding the MAC slot)
    /// and the body ciphertext as staged in external memory, and compares
    /// it to the descriptor's code.
    fn firmware_mac_ok(
        &mut self,
        descriptor: &FirmwareDescriptor,
        config: &BootConfig,
    ) -> Result<bool, Error> {
        let mut mac = Mac::new(&config.key, descriptor.mac_rounds);
        mac.update(&descriptor.signed_bytes()?);

        let mut chunk = vec![0u8; self.params.page_size as usize];
        let mut offset = self.params.boot_size;
        let mut remaining = descriptor.firmware_size;

        while remaining > 0 {
            let length = remaining.min(self.params.page_size) as usize;
            self.bus
                .read_block(self.params.mem_addr, offset, &mut chunk[..length])?;
            mac.update(&chunk[..length]);

            offset += length as u32;
            remaining -= length as u32;
        }

        Ok(mac.verify(&descriptor.firmware_mac))
    }

    /// Streams the body out of external memory, decrypting it in 8-byte
    /// units when the descriptor asks for it, and commits it to program
    /// memory page by page.
    fn install(
        &mut self,
        descriptor: &FirmwareDescriptor,
        config: &mut BootConfig,
    ) -> Result<(), Error> {
        let mut cipher = Cipher::new(
            &config.key,
            &descriptor.body_iv(),
            descriptor.cipher_rounds,
        );
        cipher.set_operation(Operation::Decrypt);

        self.bus
            .begin_read(self.params.mem_addr, self.params.boot_size)?;

        // The replacement key is carried in the descriptor as two chained
        // CFB blocks. The body cipher keeps the original key and continues
        // from the IV these blocks leave behind; only the persisted copy
        // is replaced.
        if descriptor.key_update() == Some(KeyUpdate::Encrypted) {
            let mut new_key = [0u8; KEY_SIZE];
            let mut block = [0u8; BLOCK_SIZE];
            for half in 0..2 {
                let slot = half * BLOCK_SIZE;
                block.copy_from_slice(&descriptor.new_key[slot..slot + BLOCK_SIZE]);
                cipher.cfb_block(&mut block);
                new_key[slot..slot + BLOCK_SIZE].copy_from_slice(&block);
            }
            config.key = new_key;
        }

        let decrypt_body = descriptor.body_cipher() == Some(BodyCipher::Cfb);
        let mut buffer = [0u8; BLOCK_SIZE];
        let mut staged = 0usize;
        let mut write_at = self.params.boot_size;
        let mut remaining = descriptor.firmware_size;

        while remaining > 0 {
            buffer[staged] = self.bus.read_byte(true)?;
            staged += 1;
            remaining -= 1;

            if staged == BLOCK_SIZE || remaining == 0 {
                if decrypt_body {
                    // A trailing fragment still ciphers the whole buffer;
                    // only its own bytes reach the page buffer.
                    cipher.cfb_block(&mut buffer);
                }

                self.flash.fill(write_at, &buffer[..staged]);
                write_at += staged as u32;
                staged = 0;

                if write_at % self.params.page_size == 0 || remaining == 0 {
                    // The peripheral rejects commands while busy.
                    while self.flash.busy() {}
                    self.flash.page_erase_write();
                }
            }
        }

        self.bus.stop();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_hex::*;
    use hex_literal::hex;

    use super::*;
    use crate::image::{Image, ImageBuilder};

    const KEY: [u8; KEY_SIZE] = hex!("000102030405060708090a0b0c0d0e0f");
    const IV: [u8; 8] = hex!("1122334455667788");

    const FLASH_SIZE: usize = 0x2000;
    const EEPROM_SIZE: usize = 0x100;

    struct FakeBus {
        mem: Vec<u8>,
        present: bool,
        cursor: usize,
        reading: bool,
        stops: usize,
        released: bool,
    }

    impl FakeBus {
        /// Stages `image` so the descriptor sits at the control-data
        /// offset and the body right at `boot_size`.
        fn with_image(image: &[u8], params: &BootParams) -> FakeBus {
            let mut mem = vec![0xFFu8; 0x8000];
            let control_at = params.boot_size as usize - FirmwareDescriptor::SIZE;
            mem[control_at..control_at + image.len()].copy_from_slice(image);

            FakeBus {
                mem,
                present: true,
                cursor: 0,
                reading: false,
                stops: 0,
                released: false,
            }
        }

        fn absent() -> FakeBus {
            FakeBus {
                mem: Vec::new(),
                present: false,
                cursor: 0,
                reading: false,
                stops: 0,
                released: false,
            }
        }
    }

    impl MemoryBus for FakeBus {
        fn probe(&mut self, _addr: u8) -> bool {
            self.present
        }

        fn begin_read(&mut self, _addr: u8, offset: u32) -> Result<(), Error> {
            if !self.present {
                return Err(Error::BusTimeout);
            }
            self.cursor = offset as usize;
            self.reading = true;

            Ok(())
        }

        fn read_byte(&mut self, _ack: bool) -> Result<u8, Error> {
            if !self.reading {
                return Err(Error::BusTimeout);
            }
            let byte = self.mem.get(self.cursor).copied().ok_or(Error::Nack)?;
            self.cursor += 1;

            Ok(byte)
        }

        fn stop(&mut self) {
            self.reading = false;
            self.stops += 1;
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    struct FakeFlash {
        page_size: u32,
        staging: Vec<u8>,
        committed: Vec<u8>,
        high_water: u32,
        commits: usize,
        busy_polls: usize,
        pending_busy: u32,
    }

    impl FakeFlash {
        fn new(size: usize, page_size: u32) -> FakeFlash {
            FakeFlash {
                page_size,
                staging: vec![0xFFu8; size],
                committed: vec![0xFFu8; size],
                high_water: 0,
                commits: 0,
                busy_polls: 0,
                pending_busy: 0,
            }
        }
    }

    impl ProgramFlash for FakeFlash {
        fn fill(&mut self, offset: u32, bytes: &[u8]) {
            let offset = offset as usize;
            self.staging[offset..offset + bytes.len()].copy_from_slice(bytes);
            self.high_water = self.high_water.max((offset + bytes.len()) as u32);
        }

        fn busy(&mut self) -> bool {
            self.busy_polls += 1;
            if self.pending_busy > 0 {
                self.pending_busy -= 1;
                true
            } else {
                false
            }
        }

        fn page_erase_write(&mut self) {
            // Commit the page holding the last filled byte.
            let page = self.high_water.saturating_sub(1) / self.page_size;
            let start = (page * self.page_size) as usize;
            let end = start + self.page_size as usize;
            self.committed[start..end].copy_from_slice(&self.staging[start..end]);
            self.commits += 1;
            self.pending_busy = 2;
        }
    }

    struct FakeStore {
        mem: Vec<u8>,
    }

    impl FakeStore {
        fn seeded(config: &BootConfig) -> FakeStore {
            let mut store = FakeStore {
                mem: vec![0xFFu8; EEPROM_SIZE],
            };
            config.store(&mut store);

            store
        }
    }

    impl ConfigStore for FakeStore {
        fn read_block(&mut self, offset_from_end: u32, out: &mut [u8]) {
            let start = self.mem.len() - offset_from_end as usize;
            out.copy_from_slice(&self.mem[start..start + out.len()]);
        }

        fn update_block(&mut self, offset_from_end: u32, bytes: &[u8]) {
            let start = self.mem.len() - offset_from_end as usize;
            self.mem[start..start + bytes.len()].copy_from_slice(bytes);
        }

        fn update_dword(&mut self, offset_from_end: u32, value: u32) {
            self.update_block(offset_from_end, &value.to_le_bytes());
        }
    }

    #[derive(Default)]
    struct FakeMcu {
        cause: u8,
        clock_reduced: bool,
        cleared: Option<ResetFlags>,
        stashed: Option<ResetFlags>,
        locked: bool,
        resets: usize,
        jumps: usize,
    }

    impl Mcu for FakeMcu {
        fn reset_cause(&mut self) -> ResetFlags {
            ResetFlags(self.cause)
        }

        fn reduce_clock(&mut self) {
            self.clock_reduced = true;
        }

        fn clear_reset_cause(&mut self, cause: ResetFlags) {
            self.cleared = Some(cause);
        }

        fn stash_reset_cause(&mut self, cause: ResetFlags) {
            self.stashed = Some(cause);
        }

        fn lock_boot_section(&mut self) {
            self.locked = true;
        }

        fn software_reset(&mut self) {
            self.resets += 1;
        }

        fn jump_to_application(&mut self) {
            self.jumps += 1;
        }
    }

    fn rig(image: &[u8], config: &BootConfig) -> Bootloader<FakeMcu, FakeBus, FakeFlash, FakeStore> {
        let params = BootParams::default();

        Bootloader {
            mcu: FakeMcu {
                cause: ResetFlags::POWER_ON.0,
                ..FakeMcu::default()
            },
            bus: FakeBus::with_image(image, &params),
            flash: FakeFlash::new(FLASH_SIZE, params.page_size),
            store: FakeStore::seeded(config),
            params,
        }
    }

    fn app_bytes(boot: &Bootloader<FakeMcu, FakeBus, FakeFlash, FakeStore>, len: usize) -> &[u8] {
        let start = boot.params.boot_size as usize;

        &boot.flash.committed[start..start + len]
    }

    #[test]
    fn it_should_classify_boot_candidates() {
        assert!(is_boot_candidate(ResetFlags(0)));
        assert!(is_boot_candidate(ResetFlags::POWER_ON));
        assert!(is_boot_candidate(ResetFlags::EXTERNAL));
        assert!(is_boot_candidate(ResetFlags(
            ResetFlags::BROWN_OUT.0 | ResetFlags::EXTERNAL.0
        )));

        assert!(!is_boot_candidate(ResetFlags::WATCHDOG));
        assert!(!is_boot_candidate(ResetFlags(
            ResetFlags::WATCHDOG.0 | ResetFlags::POWER_ON.0
        )));
        assert!(!is_boot_candidate(ResetFlags::BROWN_OUT));
    }

    #[test]
    fn it_should_accept_timestamps_monotonically() {
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&hex!("0001020304050607"))
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: 5,
        };
        let boot = rig(&image, &config);
        let mut descriptor = Image::parse(&image).unwrap().descriptor;

        for time_stamp in &[0u32, 4, 5] {
            descriptor.time_stamp = *time_stamp;
            assert!(!boot.firmware_should_be_processed(&descriptor, &config));
        }
        for time_stamp in &[6u32, 7, 1000] {
            descriptor.time_stamp = *time_stamp;
            assert!(boot.firmware_should_be_processed(&descriptor, &config));
        }
    }

    #[test]
    fn it_should_install_a_first_image_on_a_cold_device() {
        let plaintext = hex!("0001020304050607");
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq!(boot.mcu.resets, 1);
        assert_eq!(boot.mcu.jumps, 0);
        assert!(boot.mcu.clock_reduced);
        // One stop each for the descriptor read, the MAC sweep and the
        // install stream.
        assert_eq!(boot.bus.stops, 3);

        assert_eq_hex!(app_bytes(&boot, 8), plaintext);

        let persisted = BootConfig::load(&mut boot.store);
        assert_eq!(persisted.time_stamp, 1);
        assert_eq!(persisted.key, KEY);
    }

    #[test]
    fn it_should_reject_a_replayed_image() {
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&hex!("0001020304050607"))
            .unwrap();

        // Persistent state as it looks right after that image installed.
        let config = BootConfig {
            key: KEY,
            time_stamp: 1,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.mcu.jumps, 1);
        assert!(boot.mcu.locked);
        assert!(boot.bus.released);
        assert_eq!(boot.flash.commits, 0);
        assert_eq!(BootConfig::load(&mut boot.store), config);
    }

    #[test]
    fn it_should_memoize_the_timestamp_of_a_forged_image() {
        let mut image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&hex!("0001020304050607"))
            .unwrap();

        // One flipped MAC bit
        image[0] ^= 0x80;

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.flash.commits, 0);

        let persisted = BootConfig::load(&mut boot.store);
        assert_eq!(persisted.time_stamp, 1);
        assert_eq!(persisted.key, KEY);
    }

    #[test]
    fn it_should_leave_the_timestamp_alone_when_memoization_is_off() {
        let mut image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&hex!("0001020304050607"))
            .unwrap();

        image[0] ^= 0x80;

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);
        boot.params.memoize_mac_failure = false;

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(BootConfig::load(&mut boot.store).time_stamp, TIMESTAMP_UNSET);
    }

    #[test]
    fn it_should_rotate_the_master_key() {
        let new_key = hex!("a0a1a2a3a4a5a6a7a8a9aaabacadaeaf");
        let plaintext: Vec<u8> = (0u8..16).collect();
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(6)
            .new_key(new_key)
            .build(&plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: 5,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq_hex!(app_bytes(&boot, 16), &plaintext[..]);

        let persisted = BootConfig::load(&mut boot.store);
        assert_eq!(persisted.key, new_key);
        assert_eq!(persisted.time_stamp, 6);
    }

    #[test]
    fn it_should_write_only_the_trailing_fragment_of_an_unaligned_body() {
        let plaintext: Vec<u8> = (0u8..13).collect();
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq_hex!(app_bytes(&boot, 13), &plaintext[..]);
        // Nothing beyond the body lands in flash.
        assert_eq!(boot.flash.high_water, boot.params.boot_size + 13);
        assert_eq!(app_bytes(&boot, 16)[13..], [0xFFu8; 3]);
        assert_eq!(boot.flash.commits, 1);
    }

    #[test]
    fn it_should_commit_every_page_of_a_page_spanning_body() {
        let plaintext: Vec<u8> = (0..160).map(|idx| idx as u8).collect();
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq_hex!(app_bytes(&boot, 160), &plaintext[..]);
        // Two full pages plus the final partial one.
        assert_eq!(boot.flash.commits, 3);
        assert!(boot.flash.busy_polls >= boot.flash.commits);
    }

    #[test]
    fn it_should_install_a_body_filling_the_whole_application_section() {
        let size = BootParams::default().app_size as usize;
        let plaintext: Vec<u8> = (0..size).map(|idx| idx as u8).collect();
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq!(app_bytes(&boot, size), &plaintext[..]);
        assert_eq!(boot.flash.commits, size / 64);
    }

    #[test]
    fn it_should_install_a_single_byte_body() {
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&[0x42])
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq!(app_bytes(&boot, 1), [0x42]);
        assert_eq!(boot.flash.commits, 1);
    }

    #[test]
    fn it_should_install_a_plaintext_body() {
        let plaintext = b"unencrypted application";
        let image = ImageBuilder::default()
            .key(KEY)
            .time_stamp(1)
            .plain_body()
            .build(plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq!(app_bytes(&boot, plaintext.len()), &plaintext[..]);
    }

    #[test]
    fn it_should_reject_a_body_larger_than_the_application_section() {
        let size = BootParams::default().app_size as usize + 1;
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&vec![0xAA; size])
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.flash.commits, 0);
    }

    #[test]
    fn it_should_reject_reserved_mode_bits_without_touching_the_store() {
        let mut image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&hex!("0001020304050607"))
            .unwrap();

        // The mode byte follows the MAC slot and the version byte.
        image[17] |= 0x10;

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.flash.commits, 0);
        // Rejection happens before MAC verification, so nothing is
        // memoized.
        assert_eq!(BootConfig::load(&mut boot.store).time_stamp, TIMESTAMP_UNSET);
    }

    #[test]
    fn it_should_reject_the_sentinel_timestamp() {
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(TIMESTAMP_UNSET)
            .build(&hex!("0001020304050607"))
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: 3,
        };
        let mut boot = rig(&image, &config);
        boot.params.downgrade_allowed = true;

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.flash.commits, 0);
    }

    #[test]
    fn it_should_apply_the_downgrade_rule_when_allowed() {
        let plaintext = hex!("0001020304050607");
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(3)
            .build(&plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: 5,
        };

        // Older than the persisted timestamp: rejected by default,
        let mut boot = rig(&image, &config);
        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.flash.commits, 0);

        // accepted when downgrades are allowed.
        let mut boot = rig(&image, &config);
        boot.params.downgrade_allowed = true;
        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq_hex!(app_bytes(&boot, 8), plaintext);
    }

    #[test]
    fn it_should_start_the_application_when_no_device_answers() {
        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&[], &config);
        boot.bus = FakeBus::absent();

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.mcu.jumps, 1);
        assert!(boot.mcu.locked);
        assert_eq!(boot.flash.commits, 0);
        assert_eq!(BootConfig::load(&mut boot.store), config);
    }

    #[test]
    fn it_should_skip_the_bus_entirely_on_a_watchdog_reset() {
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&hex!("0001020304050607"))
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);
        boot.mcu.cause = ResetFlags::WATCHDOG.0;

        assert_eq!(boot.run(), Outcome::Application);
        assert_eq!(boot.flash.commits, 0);
        // Non-candidate resets never touch the bus, so there is nothing
        // to release.
        assert!(!boot.bus.released);
        assert_eq!(boot.mcu.cleared, Some(ResetFlags::WATCHDOG));
        assert_eq!(boot.mcu.stashed, Some(ResetFlags::WATCHDOG));
        assert!(boot.mcu.locked);
    }

    #[test]
    fn it_should_retry_after_a_brown_out_alongside_another_cause() {
        let plaintext = hex!("0001020304050607");
        let image = ImageBuilder::default()
            .key(KEY)
            .iv(IV)
            .time_stamp(1)
            .build(&plaintext)
            .unwrap();

        let config = BootConfig {
            key: KEY,
            time_stamp: TIMESTAMP_UNSET,
        };
        let mut boot = rig(&image, &config);
        boot.mcu.cause = ResetFlags::BROWN_OUT.0 | ResetFlags::EXTERNAL.0;

        assert_eq!(boot.run(), Outcome::Reset);
        assert_eq_hex!(app_bytes(&boot, 8), plaintext);
    }
}
