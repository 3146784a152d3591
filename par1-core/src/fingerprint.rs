//! Streaming MD5 per RFC 1321, with two deliberate, documented departures:
//! the length pad only ever carries the low 32 bits of the bit count (the
//! upper 32 bits are implicitly zero), and internal state is not cleared
//! after `finish`. Both match the historical generator this format is
//! compatible with; see `SPEC_FULL.md`'s Open Questions for the rationale.

use crate::error::{ParError, Result};

const BLOCK_SIZE: usize = 64;

const S11: u32 = 7;
const S12: u32 = 12;
const S13: u32 = 17;
const S14: u32 = 22;
const S21: u32 = 5;
const S22: u32 = 9;
const S23: u32 = 14;
const S24: u32 = 20;
const S31: u32 = 4;
const S32: u32 = 11;
const S33: u32 = 16;
const S34: u32 = 23;
const S41: u32 = 6;
const S42: u32 = 10;
const S43: u32 = 15;
const S44: u32 = 21;

/// A 16-byte MD5 digest. Opaque and immutable once produced.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

pub struct Md5 {
    state: [u32; 4],
    data_length_bits: u64,
    buffer: [u8; BLOCK_SIZE],
    buffer_len: usize,
    started: bool,
    finished: bool,
}

impl Default for Md5 {
    fn default() -> Self {
        Self::new()
    }
}

impl Md5 {
    pub fn new() -> Self {
        let mut md5 = Md5 {
            state: [0; 4],
            data_length_bits: 0,
            buffer: [0; BLOCK_SIZE],
            buffer_len: 0,
            started: false,
            finished: false,
        };
        md5.start();
        md5
    }

    pub fn start(&mut self) {
        self.state = [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476];
        self.data_length_bits = 0;
        self.buffer = [0; BLOCK_SIZE];
        self.buffer_len = 0;
        self.started = true;
        self.finished = false;
    }

    /// Absorb a byte-aligned slice. Fails if called after `finish`.
    pub fn absorb(&mut self, data: &[u8]) -> Result<()> {
        if !self.started || self.finished {
            return Err(ParError::input("MD5: absorb called after finish"));
        }
        self.data_length_bits = self.data_length_bits.wrapping_add((data.len() as u64) * 8);
        self.absorb_bytes(data);
        Ok(())
    }

    fn absorb_bytes(&mut self, data: &[u8]) {
        let mut data = data;
        if self.buffer_len > 0 {
            let want = BLOCK_SIZE - self.buffer_len;
            let take = want.min(data.len());
            self.buffer[self.buffer_len..self.buffer_len + take].copy_from_slice(&data[..take]);
            self.buffer_len += take;
            data = &data[take..];
            if self.buffer_len == BLOCK_SIZE {
                let block = self.buffer;
                self.process_block(&block);
                self.buffer_len = 0;
            }
        }
        while data.len() >= BLOCK_SIZE {
            let block: [u8; BLOCK_SIZE] = data[..BLOCK_SIZE].try_into().unwrap();
            self.process_block(&block);
            data = &data[BLOCK_SIZE..];
        }
        if !data.is_empty() {
            self.buffer[..data.len()].copy_from_slice(data);
            self.buffer_len = data.len();
        }
    }

    pub fn finish(&mut self) -> Result<Fingerprint> {
        if !self.started {
            return Err(ParError::input("MD5: finish called before start"));
        }
        if !self.finished {
            let bit_count_low32 = (self.data_length_bits & 0xFFFF_FFFF) as u32;

            // Pad: a single 1 bit, then zeros, leaving 64 bits for length.
            self.absorb_bytes(&[0x80]);
            if self.buffer_len > BLOCK_SIZE - 8 {
                let block = self.buffer;
                self.process_block(&block);
                self.buffer = [0; BLOCK_SIZE];
                self.buffer_len = 0;
            }
            // Zero-pad up to byte 56, then append the low 32 bits of the
            // bit count followed by a forced-zero high word — matching the
            // original's "only the low 32 bits are ever sent" simplification.
            for b in self.buffer[self.buffer_len..BLOCK_SIZE - 8].iter_mut() {
                *b = 0;
            }
            self.buffer[BLOCK_SIZE - 8..BLOCK_SIZE - 4]
                .copy_from_slice(&bit_count_low32.to_le_bytes());
            self.buffer[BLOCK_SIZE - 4..BLOCK_SIZE].copy_from_slice(&0u32.to_le_bytes());
            let block = self.buffer;
            self.process_block(&block);
            self.finished = true;
        }
        let mut out = [0u8; 16];
        for (i, word) in self.state.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        Ok(Fingerprint(out))
    }

    fn process_block(&mut self, block: &[u8; BLOCK_SIZE]) {
        let mut x = [0u32; 16];
        for i in 0..16 {
            x[i] = u32::from_le_bytes(block[i * 4..i * 4 + 4].try_into().unwrap());
        }

        let mut a = self.state[0];
        let mut b = self.state[1];
        let mut c = self.state[2];
        let mut d = self.state[3];

        macro_rules! ff {
            ($a:expr, $b:expr, $c:expr, $d:expr, $x:expr, $s:expr, $ac:expr) => {
                $a = $a
                    .wrapping_add(($b & $c) | ((!$b) & $d))
                    .wrapping_add($x)
                    .wrapping_add($ac);
                $a = $a.rotate_left($s).wrapping_add($b);
            };
        }
        macro_rules! gg {
            ($a:expr, $b:expr, $c:expr, $d:expr, $x:expr, $s:expr, $ac:expr) => {
                $a = $a
                    .wrapping_add(($b & $d) | ($c & (!$d)))
                    .wrapping_add($x)
                    .wrapping_add($ac);
                $a = $a.rotate_left($s).wrapping_add($b);
            };
        }
        macro_rules! hh {
            ($a:expr, $b:expr, $c:expr, $d:expr, $x:expr, $s:expr, $ac:expr) => {
                $a = $a.wrapping_add($b ^ $c ^ $d).wrapping_add($x).wrapping_add($ac);
                $a = $a.rotate_left($s).wrapping_add($b);
            };
        }
        macro_rules! ii {
            ($a:expr, $b:expr, $c:expr, $d:expr, $x:expr, $s:expr, $ac:expr) => {
                $a = $a
                    .wrapping_add($c ^ ($b | (!$d)))
                    .wrapping_add($x)
                    .wrapping_add($ac);
                $a = $a.rotate_left($s).wrapping_add($b);
            };
        }

        ff!(a, b, c, d, x[0], S11, 0xd76aa478);
        ff!(d, a, b, c, x[1], S12, 0xe8c7b756);
        ff!(c, d, a, b, x[2], S13, 0x242070db);
        ff!(b, c, d, a, x[3], S14, 0xc1bdceee);
        ff!(a, b, c, d, x[4], S11, 0xf57c0faf);
        ff!(d, a, b, c, x[5], S12, 0x4787c62a);
        ff!(c, d, a, b, x[6], S13, 0xa8304613);
        ff!(b, c, d, a, x[7], S14, 0xfd469501);
        ff!(a, b, c, d, x[8], S11, 0x698098d8);
        ff!(d, a, b, c, x[9], S12, 0x8b44f7af);
        ff!(c, d, a, b, x[10], S13, 0xffff5bb1);
        ff!(b, c, d, a, x[11], S14, 0x895cd7be);
        ff!(a, b, c, d, x[12], S11, 0x6b901122);
        ff!(d, a, b, c, x[13], S12, 0xfd987193);
        ff!(c, d, a, b, x[14], S13, 0xa679438e);
        ff!(b, c, d, a, x[15], S14, 0x49b40821);

        gg!(a, b, c, d, x[1], S21, 0xf61e2562);
        gg!(d, a, b, c, x[6], S22, 0xc040b340);
        gg!(c, d, a, b, x[11], S23, 0x265e5a51);
        gg!(b, c, d, a, x[0], S24, 0xe9b6c7aa);
        gg!(a, b, c, d, x[5], S21, 0xd62f105d);
        gg!(d, a, b, c, x[10], S22, 0x02441453);
        gg!(c, d, a, b, x[15], S23, 0xd8a1e681);
        gg!(b, c, d, a, x[4], S24, 0xe7d3fbc8);
        gg!(a, b, c, d, x[9], S21, 0x21e1cde6);
        gg!(d, a, b, c, x[14], S22, 0xc33707d6);
        gg!(c, d, a, b, x[3], S23, 0xf4d50d87);
        gg!(b, c, d, a, x[8], S24, 0x455a14ed);
        gg!(a, b, c, d, x[13], S21, 0xa9e3e905);
        gg!(d, a, b, c, x[2], S22, 0xfcefa3f8);
        gg!(c, d, a, b, x[7], S23, 0x676f02d9);
        gg!(b, c, d, a, x[12], S24, 0x8d2a4c8a);

        hh!(a, b, c, d, x[5], S31, 0xfffa3942);
        hh!(d, a, b, c, x[8], S32, 0x8771f681);
        hh!(c, d, a, b, x[11], S33, 0x6d9d6122);
        hh!(b, c, d, a, x[14], S34, 0xfde5380c);
        hh!(a, b, c, d, x[1], S31, 0xa4beea44);
        hh!(d, a, b, c, x[4], S32, 0x4bdecfa9);
        hh!(c, d, a, b, x[7], S33, 0xf6bb4b60);
        hh!(b, c, d, a, x[10], S34, 0xbebfbc70);
        hh!(a, b, c, d, x[13], S31, 0x289b7ec6);
        hh!(d, a, b, c, x[0], S32, 0xeaa127fa);
        hh!(c, d, a, b, x[3], S33, 0xd4ef3085);
        hh!(b, c, d, a, x[6], S34, 0x04881d05);
        hh!(a, b, c, d, x[9], S31, 0xd9d4d039);
        hh!(d, a, b, c, x[12], S32, 0xe6db99e5);
        hh!(c, d, a, b, x[15], S33, 0x1fa27cf8);
        hh!(b, c, d, a, x[2], S34, 0xc4ac5665);

        ii!(a, b, c, d, x[0], S41, 0xf4292244);
        ii!(d, a, b, c, x[7], S42, 0x432aff97);
        ii!(c, d, a, b, x[14], S43, 0xab9423a7);
        ii!(b, c, d, a, x[5], S44, 0xfc93a039);
        ii!(a, b, c, d, x[12], S41, 0x655b59c3);
        ii!(d, a, b, c, x[3], S42, 0x8f0ccc92);
        ii!(c, d, a, b, x[10], S43, 0xffeff47d);
        ii!(b, c, d, a, x[1], S44, 0x85845dd1);
        ii!(a, b, c, d, x[8], S41, 0x6fa87e4f);
        ii!(d, a, b, c, x[15], S42, 0xfe2ce6e0);
        ii!(c, d, a, b, x[6], S43, 0xa3014314);
        ii!(b, c, d, a, x[13], S44, 0x4e0811a1);
        ii!(a, b, c, d, x[4], S41, 0xf7537e82);
        ii!(d, a, b, c, x[11], S42, 0xbd3af235);
        ii!(c, d, a, b, x[2], S43, 0x2ad7d2bb);
        ii!(b, c, d, a, x[9], S44, 0xeb86d391);

        self.state[0] = self.state[0].wrapping_add(a);
        self.state[1] = self.state[1].wrapping_add(b);
        self.state[2] = self.state[2].wrapping_add(c);
        self.state[3] = self.state[3].wrapping_add(d);
    }
}

/// Digest a single in-memory buffer. Convenience wrapper over `Md5`.
pub fn digest(data: &[u8]) -> Fingerprint {
    let mut md5 = Md5::new();
    md5.absorb(data).expect("fresh Md5 cannot be past finish");
    md5.finish().expect("finish after fresh start cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_str(s: &str) -> String {
        digest(s.as_bytes()).to_hex()
    }

    #[test]
    fn rfc1321_vectors() {
        assert_eq!(hash_str(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash_str("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            hash_str("message digest"),
            "f96b697d7cb7938d525a2f31aaf161d0"
        );
    }

    #[test]
    fn absorb_after_finish_fails() {
        let mut md5 = Md5::new();
        md5.absorb(b"abc").unwrap();
        md5.finish().unwrap();
        assert!(md5.absorb(b"more").is_err());
    }

    #[test]
    fn streamed_matches_one_shot() {
        let data = vec![0x42u8; 200_000];
        let whole = digest(&data);

        let mut md5 = Md5::new();
        for chunk in data.chunks(65536) {
            md5.absorb(chunk).unwrap();
        }
        let streamed = md5.finish().unwrap();
        assert_eq!(whole.0, streamed.0);
    }
}
