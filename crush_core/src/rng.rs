use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

// Randomness for every draw in the arcade.
// Production play uses OS entropy; the HMAC stream below is a reproducible
// source: server_seed (secret) + client_seed + nonce -> HMAC-SHA256 -> bytes,
// extended by re-hashing the previous block when exhausted.

pub type HmacSha256 = Hmac<Sha256>;

/// Random source that is safe to hand to a live round.
pub type SharedRng = Box<dyn RngCore + Send>;

/// Cryptographically sound source backed by the operating system.
pub fn entropy() -> SharedRng {
    Box::new(rand::rngs::OsRng)
}

pub fn derive_hash_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Uniform integer in `[0, bound)` without modulo bias.
///
/// Raw `u32` draws at or above the largest multiple of `bound` are rejected and
/// redrawn, so every residue is equally likely.
pub fn bounded<R: RngCore + ?Sized>(rng: &mut R, bound: u32) -> u32 {
    if bound <= 1 {
        return 0;
    }
    let range = 1u64 << 32;
    let limit = range - range % bound as u64;
    loop {
        let value = rng.next_u32() as u64;
        if value < limit {
            return (value % bound as u64) as u32;
        }
    }
}

pub struct ProvablyFairRng {
    server_seed: String, // secret
    client_seed: String,
    nonce: u64,
    block: [u8; 32],
    cursor: usize,
}

impl ProvablyFairRng {
    pub fn new(server_seed: impl Into<String>, client_seed: impl Into<String>, nonce: u64) -> Self {
        let mut rng = Self {
            server_seed: server_seed.into(),
            client_seed: client_seed.into(),
            nonce,
            block: [0u8; 32],
            cursor: 0,
        };
        rng.block = rng.hmac_bytes();
        rng
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn server_seed_hash_hex(&self) -> String {
        derive_hash_hex(self.server_seed.as_bytes())
    }

    pub fn hmac_bytes(&self) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(self.server_seed.as_bytes())
            .expect("HMAC accepts keys of any length");
        let msg = format!("{}:{}", self.client_seed, self.nonce);
        mac.update(msg.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    fn next_byte(&mut self) -> u8 {
        if self.cursor >= self.block.len() {
            self.block = Sha256::digest(self.block).into();
            self.cursor = 0;
        }
        let byte = self.block[self.cursor];
        self.cursor += 1;
        byte
    }
}

impl RngCore for ProvablyFairRng {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_be_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_be_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for byte in dest.iter_mut() {
            *byte = self.next_byte();
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determinism() {
        let mut rng1 = ProvablyFairRng::new("server", "client", 1);
        let mut rng2 = ProvablyFairRng::new("server", "client", 1);
        assert_eq!(rng1.server_seed_hash_hex(), rng2.server_seed_hash_hex());
        assert_eq!(rng1.hmac_bytes(), rng2.hmac_bytes());
        let a: Vec<u32> = (0..20).map(|_| rng1.next_u32()).collect();
        let b: Vec<u32> = (0..20).map(|_| rng2.next_u32()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stream_extends_past_first_block() {
        let mut rng = ProvablyFairRng::new("server", "client", 9);
        let first = rng.hmac_bytes();
        let mut drawn = [0u8; 64];
        rng.fill_bytes(&mut drawn);
        assert_eq!(&drawn[..32], &first[..]);
        let second: [u8; 32] = Sha256::digest(first).into();
        assert_eq!(&drawn[32..], &second[..]);
    }

    #[test]
    fn test_nonce_changes_stream() {
        let mut a = ProvablyFairRng::new("server", "client", 1);
        let mut b = ProvablyFairRng::new("server", "client", 2);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn test_bounded_stays_in_range() {
        let mut rng = ProvablyFairRng::new("s", "c", 3);
        for bound in [1u32, 2, 3, 7, 100, 1_000_003] {
            for _ in 0..200 {
                assert!(bounded(&mut rng, bound) < bound.max(1));
            }
        }
        assert_eq!(bounded(&mut rng, 0), 0);
    }

    struct Scripted(Vec<u32>);

    impl RngCore for Scripted {
        fn next_u32(&mut self) -> u32 {
            self.0.remove(0)
        }
        fn next_u64(&mut self) -> u64 {
            self.next_u32() as u64
        }
        fn fill_bytes(&mut self, _dest: &mut [u8]) {}
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Ok(())
        }
    }

    #[test]
    fn test_bounded_rejects_biased_tail() {
        // 2^32 % 3 == 1, so u32::MAX is the single rejected value for bound 3.
        let mut rng = Scripted(vec![u32::MAX, 5]);
        assert_eq!(bounded(&mut rng, 3), 2);
        assert!(rng.0.is_empty());
    }
}
