//! Zufaelliges Padding fuer Protokoll-Envelopes

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Erzeugt 0..=255 zufaellige Padding-Bytes
pub fn zufalls_padding() -> Vec<u8> {
    let laenge: u8 = OsRng.gen();
    let mut padding = vec![0u8; usize::from(laenge)];
    OsRng.fill_bytes(&mut padding);
    padding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_bleibt_unter_256_bytes() {
        for _ in 0..64 {
            assert!(zufalls_padding().len() <= 255);
        }
    }
}
