//! Signature sniffing for payloads that are already compressed.
//!
//! The encoder's copy policy consults this module before spending transform
//! and entropy work on a block that is almost certainly incompressible
//! (archives, packed images, audio and video containers).  Only the first
//! few bytes of a block are examined; a miss is always safe, it just costs
//! compression work.

/// Bytes needed for a reliable signature check.
pub const HEADER_BYTES: usize = 16;

/// Returns `true` when `data` starts with the signature of a well-known
/// compressed or multimedia format.
pub fn is_compressed(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    // 2-byte signatures.
    if data.starts_with(&[0x1F, 0x8B]) {
        return true; // gzip
    }
    // 3-byte signatures.
    if data.starts_with(b"BZh") || data.starts_with(&[0xFF, 0xD8, 0xFF]) || data.starts_with(b"ID3")
    {
        return true; // bzip2, jpeg, mp3
    }
    // 4-byte signatures.
    let sig4 = [data[0], data[1], data[2], data[3]];
    match &sig4 {
        [0x28, 0xB5, 0x2F, 0xFD] => return true, // zstd
        [0x04, 0x22, 0x4D, 0x18] => return true, // lz4 frame
        [0x50, 0x4B, 0x03, 0x04] => return true, // zip
        [0x52, 0x61, 0x72, 0x21] => return true, // rar
        [0x89, 0x50, 0x4E, 0x47] => return true, // png
        [0x47, 0x49, 0x46, 0x38] => return true, // gif
        [0x4F, 0x67, 0x67, 0x53] => return true, // ogg
        [0x66, 0x4C, 0x61, 0x43] => return true, // flac
        [0x1A, 0x45, 0xDF, 0xA3] => return true, // matroska/webm
        _ => {}
    }
    if data.len() >= 6 && data.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
        return true; // xz
    }
    if data.len() >= 6 && data.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        return true; // 7z
    }
    if data.len() >= 12 {
        // mp4 family: size field then "ftyp".
        if &data[4..8] == b"ftyp" {
            return true;
        }
        // webp: RIFF....WEBP
        if &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_signatures_hit() {
        assert!(is_compressed(&[0x1F, 0x8B, 0x08, 0x00]));
        assert!(is_compressed(b"BZh91AY"));
        assert!(is_compressed(&[0x28, 0xB5, 0x2F, 0xFD, 0x00, 0x00]));
        assert!(is_compressed(b"PK\x03\x04rest"));
        assert!(is_compressed(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]));
        assert!(is_compressed(b"\x00\x00\x00\x20ftypisom"));
        assert!(is_compressed(b"RIFF\x00\x00\x00\x00WEBPVP8 "));
    }

    #[test]
    fn plain_data_misses() {
        assert!(!is_compressed(b"plain text content"));
        assert!(!is_compressed(&[0u8; 16]));
        assert!(!is_compressed(b"abc")); // too short
    }
}
