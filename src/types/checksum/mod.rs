#![forbid(unsafe_code)]

//! CRC32 helpers for archive blocks and attribute streams.

/// Incremental CRC of one attribute stream.
///
/// The stream name is hashed first, so a payload filed under the wrong table
/// entry fails verification even when its bytes are intact.
#[derive(Clone)]
pub struct StreamDigest {
    hasher: crc32fast::Hasher,
    bytes: u64,
}

impl StreamDigest {
    /// Starts a digest for the stream `name`.
    pub fn new(name: &str) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&(name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
        Self { hasher, bytes: 0 }
    }

    /// Feeds payload bytes.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Payload bytes fed so far.
    pub fn payload_bytes(&self) -> u64 {
        self.bytes
    }

    /// Final CRC.
    pub fn finish(self) -> u32 {
        self.hasher.finalize()
    }
}

/// CRC of a complete stream payload.
pub fn stream_crc32(name: &str, payload: &[u8]) -> u32 {
    let mut digest = StreamDigest::new(name);
    digest.update(payload);
    digest.finish()
}

/// CRC of a header, metadata, or table block.
pub fn block_crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
