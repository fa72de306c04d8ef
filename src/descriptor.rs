//! The 64-byte firmware descriptor read from external memory.

use std::convert::TryFrom;
use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::xtea::{IV_SIZE, KEY_SIZE};
use crate::Error;

/// Cipher applied to the image body, bits 0..1 of the mode field. The
/// remaining encodings are reserved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BodyCipher {
    Plain = 0x00,
    Cfb = 0x01,
}

/// Replacement-key presence, bits 2..3 of the mode field.
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum KeyUpdate {
    None = 0x00,
    Encrypted = 0x01,
}

/// The descriptor preceding the image body in external memory.
///
/// It is read into memory once per boot and treated as immutable. All
/// multi-byte integers are little-endian on the wire; the MAC covers every
/// field after `firmware_mac` itself, followed by the body ciphertext.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FirmwareDescriptor {
    /// Two-block MAC slot; only the first block takes part in verification
    pub firmware_mac: [u8; 2 * 8],
    pub version: u8,
    /// Bitfield holding the body cipher and replacement-key presence.
    /// Bits 4..7 and the unused encodings below are reserved and must be
    /// clear.
    pub mode: u8,
    /// XTEA rounds for the body cipher
    pub cipher_rounds: u8,
    /// XTEA rounds for the MAC
    pub mac_rounds: u8,
    pub time_stamp: u32,
    /// Byte count of the image body
    pub firmware_size: u32,
    /// Two IV slots; the first is the CFB IV, the second is reserved
    pub cipher_iv: [u8; 2 * IV_SIZE],
    pub rfu: [u8; 4],
    /// Optional replacement master key, encrypted as two chained CFB blocks
    pub new_key: [u8; KEY_SIZE],
}

impl FirmwareDescriptor {
    /// Fixed on-wire size of the descriptor.
    pub const SIZE: usize = 64;
    /// Size of the part covered by the MAC: everything after the MAC slot.
    pub const SIGNED_SIZE: usize = Self::SIZE - 2 * 8;

    pub fn from_reader<R: ReadBytesExt>(mut reader: R) -> Result<Self, Error> {
        let mut firmware_mac = [0u8; 2 * 8];
        reader.read_exact(&mut firmware_mac)?;

        let version = reader.read_u8()?;
        let mode = reader.read_u8()?;
        let cipher_rounds = reader.read_u8()?;
        let mac_rounds = reader.read_u8()?;

        let time_stamp = reader.read_u32::<LittleEndian>()?;
        let firmware_size = reader.read_u32::<LittleEndian>()?;

        let mut cipher_iv = [0u8; 2 * IV_SIZE];
        reader.read_exact(&mut cipher_iv)?;

        let mut rfu = [0u8; 4];
        reader.read_exact(&mut rfu)?;

        let mut new_key = [0u8; KEY_SIZE];
        reader.read_exact(&mut new_key)?;

        Ok(FirmwareDescriptor {
            firmware_mac,
            version,
            mode,
            cipher_rounds,
            mac_rounds,
            time_stamp,
            firmware_size,
            cipher_iv,
            rfu,
            new_key,
        })
    }

    /// Writes the descriptor in its on-wire layout.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.firmware_mac)?;
        self.write_signed(writer)?;

        Ok(())
    }

    fn write_signed<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.mode.to_le_bytes())?;
        writer.write_all(&self.cipher_rounds.to_le_bytes())?;
        writer.write_all(&self.mac_rounds.to_le_bytes())?;
        writer.write_all(&self.time_stamp.to_le_bytes())?;
        writer.write_all(&self.firmware_size.to_le_bytes())?;
        writer.write_all(&self.cipher_iv)?;
        writer.write_all(&self.rfu)?;
        writer.write_all(&self.new_key)?;

        Ok(())
    }

    /// Returns the bytes the MAC covers, in wire order.
    pub fn signed_bytes(&self) -> io::Result<[u8; Self::SIGNED_SIZE]> {
        let mut buf = [0u8; Self::SIGNED_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);
        self.write_signed(&mut cursor)?;

        Ok(buf)
    }

    /// The first IV slot, used to seed the body cipher.
    pub fn body_iv(&self) -> [u8; IV_SIZE] {
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&self.cipher_iv[..IV_SIZE]);

        iv
    }

    pub fn body_cipher(&self) -> Option<BodyCipher> {
        BodyCipher::try_from(self.mode & 0x03).ok()
    }

    pub fn key_update(&self) -> Option<KeyUpdate> {
        KeyUpdate::try_from((self.mode >> 2) & 0x03).ok()
    }

    /// Returns the mode bits that must be clear for the image to be
    /// considered at all.
    pub fn reserved_mode_bits(&self) -> u8 {
        self.mode & 0xFA
    }
}
