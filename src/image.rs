//! Operator-side construction and inspection of staged firmware images.
//!
//! A staged image is the 64-byte descriptor followed by the body, laid out
//! exactly as the bootloader expects to find it in external memory.

use std::io;

use thiserror::Error;

use crate::descriptor::{BodyCipher, FirmwareDescriptor, KeyUpdate};
use crate::xtea::{self, Cipher, Mac, BLOCK_SIZE, IV_SIZE, KEY_SIZE};
use crate::Error;

#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("Missing master key in ImageBuilder")]
    MissingKey,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Builds a staged image from a plaintext application binary.
///
/// The body is CFB-encrypted under the master key unless a plaintext body
/// is requested; a replacement key, when given, is encrypted into the
/// descriptor as two chained CFB blocks and the body cipher continues from
/// the IV those blocks leave behind, mirroring what the bootloader undoes
/// during installation.
pub struct ImageBuilder {
    key: Option<[u8; KEY_SIZE]>,
    iv: [u8; IV_SIZE],
    time_stamp: u32,
    version: u8,
    cipher_rounds: u8,
    mac_rounds: u8,
    body_cipher: BodyCipher,
    new_key: Option<[u8; KEY_SIZE]>,
}

impl Default for ImageBuilder {
    fn default() -> ImageBuilder {
        ImageBuilder {
            key: None,
            iv: [0u8; IV_SIZE],
            time_stamp: 0,
            version: 1,
            cipher_rounds: xtea::ROUNDS,
            mac_rounds: xtea::MAC_ROUNDS,
            body_cipher: BodyCipher::Cfb,
            new_key: None,
        }
    }
}

impl ImageBuilder {
    /// Sets the master key shared with the target device.
    pub fn key(&mut self, key: [u8; KEY_SIZE]) -> &mut ImageBuilder {
        self.key = Some(key);
        self
    }

    /// Sets the cipher IV. Use a fresh one per image.
    pub fn iv(&mut self, iv: [u8; IV_SIZE]) -> &mut ImageBuilder {
        self.iv = iv;
        self
    }

    /// Sets the image timestamp; the target rejects anything not newer
    /// than its persisted one under the default rollback rule.
    pub fn time_stamp(&mut self, time_stamp: u32) -> &mut ImageBuilder {
        self.time_stamp = time_stamp;
        self
    }

    pub fn version(&mut self, version: u8) -> &mut ImageBuilder {
        self.version = version;
        self
    }

    pub fn cipher_rounds(&mut self, rounds: u8) -> &mut ImageBuilder {
        self.cipher_rounds = rounds;
        self
    }

    pub fn mac_rounds(&mut self, rounds: u8) -> &mut ImageBuilder {
        self.mac_rounds = rounds;
        self
    }

    /// Stages the body as plaintext instead of CFB ciphertext.
    pub fn plain_body(&mut self) -> &mut ImageBuilder {
        self.body_cipher = BodyCipher::Plain;
        self
    }

    /// Rotates the target to `new_key` once the image is accepted.
    pub fn new_key(&mut self, new_key: [u8; KEY_SIZE]) -> &mut ImageBuilder {
        self.new_key = Some(new_key);
        self
    }

    /// Builds the staged image for the given plaintext `body`.
    ///
    /// Returns the descriptor followed by the body ciphertext on success,
    /// a `BuilderError` otherwise.
    pub fn build(&self, body: &[u8]) -> Result<Vec<u8>, BuilderError> {
        let key = self.key.ok_or(BuilderError::MissingKey)?;

        let key_update = match self.new_key {
            Some(_) => KeyUpdate::Encrypted,
            None => KeyUpdate::None,
        };
        let mode = u8::from(self.body_cipher) | u8::from(key_update) << 2;

        let mut cipher_iv = [0u8; 2 * IV_SIZE];
        cipher_iv[..IV_SIZE].copy_from_slice(&self.iv);

        let mut descriptor = FirmwareDescriptor {
            firmware_mac: [0u8; 2 * BLOCK_SIZE],
            version: self.version,
            mode,
            cipher_rounds: self.cipher_rounds,
            mac_rounds: self.mac_rounds,
            time_stamp: self.time_stamp,
            firmware_size: body.len() as u32,
            cipher_iv,
            rfu: [0u8; 4],
            new_key: [0u8; KEY_SIZE],
        };

        let mut cipher = Cipher::new(&key, &self.iv, self.cipher_rounds);

        // The replacement key rides in the descriptor as two chained CFB
        // blocks; the body cipher continues from the IV they leave behind.
        if let Some(new_key) = self.new_key {
            let mut block = [0u8; BLOCK_SIZE];
            for half in 0..2 {
                let slot = half * BLOCK_SIZE;
                block.copy_from_slice(&new_key[slot..slot + BLOCK_SIZE]);
                cipher.cfb_block(&mut block);
                descriptor.new_key[slot..slot + BLOCK_SIZE].copy_from_slice(&block);
            }
        }

        let mut ciphertext = body.to_vec();
        if self.body_cipher == BodyCipher::Cfb {
            encrypt_body(&mut cipher, &mut ciphertext);
        }

        let mut mac = Mac::new(&key, self.mac_rounds);
        mac.update(&descriptor.signed_bytes()?);
        mac.update(&ciphertext);
        descriptor.firmware_mac[..BLOCK_SIZE].copy_from_slice(&mac.finish());

        let mut image = Vec::with_capacity(FirmwareDescriptor::SIZE + ciphertext.len());
        descriptor.write_to(&mut image)?;
        image.extend_from_slice(&ciphertext);

        Ok(image)
    }
}

/// Encrypts the body in place, one block at a time. A trailing fragment is
/// padded out to a block for the cipher but only its own bytes are kept,
/// matching the byte count the bootloader streams back out.
fn encrypt_body(cipher: &mut Cipher, body: &mut [u8]) {
    let mut block = [0u8; BLOCK_SIZE];

    for chunk in body.chunks_mut(BLOCK_SIZE) {
        block[..chunk.len()].copy_from_slice(chunk);
        for byte in block[chunk.len()..].iter_mut() {
            *byte = 0x00;
        }
        cipher.cfb_block(&mut block);
        chunk.copy_from_slice(&block[..chunk.len()]);
    }
}

/// A staged image parsed back into its descriptor and body.
#[derive(Debug, Clone)]
pub struct Image {
    pub descriptor: FirmwareDescriptor,
    pub body: Vec<u8>,
}

impl Image {
    /// Parses `bytes` as a staged image, returning `Image` on success,
    /// `Error` otherwise.
    pub fn parse(bytes: &[u8]) -> Result<Image, Error> {
        let descriptor = FirmwareDescriptor::from_reader(bytes)?;

        let rest = &bytes[FirmwareDescriptor::SIZE..];
        let declared = descriptor.firmware_size;
        if rest.len() < declared as usize {
            return Err(Error::TruncatedBody {
                declared,
                actual: rest.len(),
            });
        }

        Ok(Image {
            descriptor,
            body: rest[..declared as usize].to_vec(),
        })
    }

    /// Recomputes the MAC under `key` and compares it to the descriptor.
    pub fn verify(&self, key: &[u8; KEY_SIZE]) -> Result<(), Error> {
        let mut mac = Mac::new(key, self.descriptor.mac_rounds);
        mac.update(&self.descriptor.signed_bytes()?);
        mac.update(&self.body);

        if mac.verify(&self.descriptor.firmware_mac) {
            Ok(())
        } else {
            Err(Error::MacMismatch)
        }
    }
}
