//! The vendor's byte-stream cipher and known-plaintext key recovery.
//!
//! Every encrypted block begins with the fixed 16-byte ASCII signature
//! `"ONKYO Encryption"`.  The keystream is data-independent, which has two
//! consequences this module leans on:
//!
//! - Encryption and decryption are the same XOR transform over the same
//!   keystream, so one routine serves both directions.
//! - The per-block key can be recovered from the first 8 still-encrypted
//!   bytes alone, because the plaintext at those positions is known.
//!   No external key material is ever needed for leaf blocks.
//!
//! Container headers are the exception: they are always encrypted with the
//! fixed key shipped inside the vendor's updater library, [`HEADER_KEY`].
//!
//! The algorithm is reverse-engineered and reproduced bit-for-bit.  It is
//! not cryptographically strong and must not be "improved": any deviation
//! breaks real firmware images.

/// The known plaintext at the start of every block, header or leaf.
pub const SIGNATURE: [u8; 16] = *b"ONKYO Encryption";

/// Fixed key used for container header regions (and nothing else).
pub const HEADER_KEY: CipherKey = [0xda, 0x57, 0x68, 0x0d, 0x44, 0x21, 0x30, 0x7a];

/// An 8-byte cipher key.  Byte 0 seeds the keystream; bytes 1..=7 are the
/// rotating schedule (cycle length 7, not 8).
pub type CipherKey = [u8; 8];

/// Keystream state threaded through one block's decryption.
///
/// Initialized fresh at the start of a block and discarded at the end;
/// never shared between blocks.  Resetting it mid-block desynchronizes the
/// keystream and silently corrupts every byte that follows — the caller
/// must keep one state alive across all chunks of a block.
#[derive(Debug, Clone, Default)]
pub struct CipherState {
    counter: u32,
    last: u8,
}

impl CipherState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes processed through this state so far.
    pub fn position(&self) -> u32 {
        self.counter
    }
}

/// Decrypt `src`, consuming and advancing `state`.
///
/// A block may be processed in chunks of any size: feeding the same state
/// through successive calls is byte-identical to one whole-buffer call.
pub fn decrypt(src: &[u8], key: &CipherKey, state: &mut CipherState) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    for &b in src {
        if state.counter == 0 {
            state.last = key[0];
        }
        out.push(b ^ state.last);

        // Key schedule: bytes 1..=7 cycle; the feedback folds the previous
        // keystream byte back in, and counter >> 6 perturbs the stream once
        // every 64 bytes.  The perturbation uses the post-increment counter.
        let j = (state.counter % 7) as usize;
        let feed = (state.last >> 7) as u32 | (((state.last & 0x7f) as u32) << 1);
        state.counter = state.counter.wrapping_add(1);
        state.last = ((key[j + 1] as u32)
            .wrapping_add(feed)
            .wrapping_add(state.counter >> 6)) as u8;
    }
    out
}

/// Encrypt `plain`, consuming and advancing `state`.
///
/// The keystream never depends on the data, so this is the same transform
/// as [`decrypt`]; it exists so callers (and tests) can state intent.
pub fn encrypt(plain: &[u8], key: &CipherKey, state: &mut CipherState) -> Vec<u8> {
    decrypt(plain, key, state)
}

/// Recover a leaf block's key from its first 16 raw (encrypted) bytes.
///
/// Inverts the first eight keystream steps against the known signature
/// plaintext.  Only valid for leaf blocks — header regions use
/// [`HEADER_KEY`] and are never derived.
pub fn recover_key(first16: &[u8; 16]) -> CipherKey {
    let mut key = [0u8; 8];
    let mut lk = SIGNATURE[0] ^ first16[0];
    key[0] = lk;
    for j in 1..8 {
        let carry = (lk >> 7) as u32;
        let feed = carry | (((lk & 0x7f) as u32) << 1);
        lk = SIGNATURE[j] ^ first16[j];
        key[j] = ((lk as u32).wrapping_add(0x100 * carry).wrapping_sub(feed)) as u8;
    }
    key
}

/// True when `plain` begins with the 16-byte signature.
///
/// This is the sole plaintext-correctness oracle the format offers: a
/// failed check means the key or the block boundary is wrong.
pub fn has_signature(plain: &[u8]) -> bool {
    plain.len() >= SIGNATURE.len() && plain[..SIGNATURE.len()] == SIGNATURE
}
