//! XTEA block cipher, chaining modes and the CFB-MAC construction.

/// The cipher's atomic unit, in bytes.
pub const BLOCK_SIZE: usize = 8;
/// Size of an initialization vector, one cipher block.
pub const IV_SIZE: usize = BLOCK_SIZE;
/// Size of an XTEA key, four 32-bit words.
pub const KEY_SIZE: usize = 16;

/// Default number of cipher rounds. Each round is two Feistel steps; the
/// best published attack reaches 18 rounds.
pub const ROUNDS: u8 = 32;
/// Default number of rounds for MAC computation.
pub const MAC_ROUNDS: u8 = 32;

const DELTA: u32 = 0x9E37_79B9;

/// An 8-byte data block.
pub type Block = [u8; BLOCK_SIZE];

/// Unpacks a 16-byte key into the four 32-bit words the round function
/// indexes, reading each word big-endian.
pub fn key_words(key: &[u8; KEY_SIZE]) -> [u32; 4] {
    let mut words = [0u32; 4];

    for (word, bytes) in words.iter_mut().zip(key.chunks(4)) {
        *word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }

    words
}

/// Encrypts the given block in place with `rounds` rounds of XTEA.
///
/// The block's bytes are assembled into the two working words big-endian:
/// byte 0 is the most significant byte of the first word.
pub fn ecb_encrypt(key: &[u32; 4], data: &mut Block, rounds: u8) {
    let mut v0 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let mut v1 = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let mut sum = 0u32;

    for _ in 0..rounds {
        v0 = v0.wrapping_add(
            (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1)) ^ sum.wrapping_add(key[(sum & 3) as usize]),
        );
        sum = sum.wrapping_add(DELTA);
        v1 = v1.wrapping_add(
            (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
        );
    }

    data[..4].copy_from_slice(&v0.to_be_bytes());
    data[4..].copy_from_slice(&v1.to_be_bytes());
}

/// Decrypts the given block in place, running the rounds of [`ecb_encrypt`]
/// in reverse.
pub fn ecb_decrypt(key: &[u32; 4], data: &mut Block, rounds: u8) {
    let mut v0 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let mut v1 = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let mut sum = DELTA.wrapping_mul(u32::from(rounds));

    for _ in 0..rounds {
        v1 = v1.wrapping_sub(
            (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
        );
        sum = sum.wrapping_sub(DELTA);
        v0 = v0.wrapping_sub(
            (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1)) ^ sum.wrapping_add(key[(sum & 3) as usize]),
        );
    }

    data[..4].copy_from_slice(&v0.to_be_bytes());
    data[4..].copy_from_slice(&v1.to_be_bytes());
}

/// Direction of a cipher operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

/// A stateful XTEA cipher carrying the key schedule, the round count, the
/// operation direction and the chaining IV.
#[derive(Clone)]
pub struct Cipher {
    key: [u32; 4],
    rounds: u8,
    operation: Operation,
    iv: Block,
}

impl Cipher {
    /// Creates a cipher from a raw key and IV. The operation defaults to
    /// [`Operation::Encrypt`].
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], rounds: u8) -> Cipher {
        Cipher {
            key: key_words(key),
            rounds,
            operation: Operation::Encrypt,
            iv: *iv,
        }
    }

    /// Replaces the key schedule without touching the IV.
    pub fn set_key(&mut self, key: &[u8; KEY_SIZE]) {
        self.key = key_words(key);
    }

    pub fn set_iv(&mut self, iv: &[u8; IV_SIZE]) {
        self.iv = *iv;
    }

    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    /// Transforms one block in place in ECB mode, per the configured
    /// operation. The IV is not consulted.
    pub fn ecb_block(&self, data: &mut Block) {
        match self.operation {
            Operation::Encrypt => ecb_encrypt(&self.key, data, self.rounds),
            Operation::Decrypt => ecb_decrypt(&self.key, data, self.rounds),
        }
    }

    /// Transforms one block in place in CFB mode with full-block feedback.
    ///
    /// The keystream is always produced by encrypting the IV, for both
    /// directions. After encryption the IV is the ciphertext block just
    /// produced; after decryption it is the ciphertext block just consumed.
    pub fn cfb_block(&mut self, data: &mut Block) {
        ecb_encrypt(&self.key, &mut self.iv, self.rounds);

        for idx in 0..BLOCK_SIZE {
            let ciphertext_in = data[idx];
            data[idx] ^= self.iv[idx];
            self.iv[idx] = match self.operation {
                Operation::Encrypt => data[idx],
                Operation::Decrypt => ciphertext_in,
            };
        }
    }

    /// Transforms one block in place in OFB mode. The IV advances
    /// independently of the data, so the operation is an involution.
    pub fn ofb_block(&mut self, data: &mut Block) {
        ecb_encrypt(&self.key, &mut self.iv, self.rounds);

        for (byte, pad) in data.iter_mut().zip(self.iv.iter()) {
            *byte ^= *pad;
        }
    }
}

/// Streaming CFB-MAC over XTEA.
///
/// Two dependent sub-keys are derived from the master key with HMAC-style
/// ipad/opad whitening, so the same master key can be used for both
/// encryption and authentication. Input is absorbed through an 8-byte
/// accumulator, closed with 10* padding, and the final accumulator contents
/// are the 8-byte code.
pub struct Mac {
    cipher: Cipher,
    second_key: [u32; 4],
    data: Block,
    length: usize,
}

impl Mac {
    pub fn new(key: &[u8; KEY_SIZE], rounds: u8) -> Mac {
        let mut cipher = Cipher::new(key, &[0u8; IV_SIZE], rounds);
        let mut second_key = [0u32; 4];

        // ipad/opad whitening is byte-wise, which folds into a per-word xor.
        for (second, first) in second_key.iter_mut().zip(cipher.key.iter_mut()) {
            *second = *first ^ 0x5C5C_5C5C;
            *first ^= 0x3636_3636;
        }

        Mac {
            cipher,
            second_key,
            data: [0u8; BLOCK_SIZE],
            length: 0,
        }
    }

    /// Absorbs `bytes` into the MAC state, ciphering the accumulator each
    /// time it fills up.
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.data[self.length] = byte;
            self.length += 1;

            if self.length == BLOCK_SIZE {
                self.cipher.cfb_block(&mut self.data);
                self.length = 0;
            }
        }
    }

    /// Closes the stream and returns the 8-byte code.
    pub fn finish(mut self) -> Block {
        // Pad whatever data is left in the accumulator.
        self.data[self.length] = 0x80;
        self.length += 1;
        while self.length < BLOCK_SIZE {
            self.data[self.length] = 0x00;
            self.length += 1;
        }
        self.cipher.cfb_block(&mut self.data);

        // One more pass under the second key, chaining from the IV the
        // first pass left behind.
        self.cipher.key = self.second_key;
        self.cipher.cfb_block(&mut self.data);

        self.data
    }

    /// Closes the stream and compares the code against the first
    /// [`BLOCK_SIZE`] bytes of `expected`.
    pub fn verify(self, expected: &[u8]) -> bool {
        expected.len() >= BLOCK_SIZE && self.finish()[..] == expected[..BLOCK_SIZE]
    }
}
