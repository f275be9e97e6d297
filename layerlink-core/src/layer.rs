//! Node identity and grouping: MAC addresses, layer labels, version strings.

use std::fmt;

use crate::config::{DEFAULT_RECEIVER_LAYER, MAX_LAYER_LENGTH, MAX_VERSION_LENGTH, NODE_VERSION};

/// Six-byte hardware address. Used as the node identity on the wireless link
/// and in discovery tables.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Mac(pub [u8; 6]);

/// The all-ones broadcast address.
pub const BROADCAST_MAC: Mac = Mac([0xFF; 6]);

impl Mac {
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST_MAC
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Receiver group label: 16 bytes of ASCII, null-padded.
///
/// The constructor truncates at 15 bytes and null-fills the remainder, so the
/// derived byte equality coincides with prefix-then-null string equality.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Layer([u8; MAX_LAYER_LENGTH]);

impl Layer {
    /// The all-null label, used for empty table slots.
    pub(crate) const EMPTY: Layer = Layer([0; MAX_LAYER_LENGTH]);

    /// Build a layer label from raw bytes. Content after the first null (or
    /// past byte 14) is discarded; the last byte is always null.
    pub fn new(bytes: &[u8]) -> Self {
        let mut buf = [0u8; MAX_LAYER_LENGTH];
        for (i, &b) in bytes.iter().take(MAX_LAYER_LENGTH - 1).enumerate() {
            if b == 0 {
                break;
            }
            buf[i] = b;
        }
        Layer(buf)
    }

    pub fn as_bytes(&self) -> &[u8; MAX_LAYER_LENGTH] {
        &self.0
    }

    /// Label content up to the first null.
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_LAYER_LENGTH);
        std::str::from_utf8(&self.0[..len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl Default for Layer {
    fn default() -> Self {
        Layer::new(DEFAULT_RECEIVER_LAYER.as_bytes())
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node firmware version: 8 bytes, null-padded.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct NodeVersion([u8; MAX_VERSION_LENGTH]);

impl NodeVersion {
    pub(crate) const EMPTY: NodeVersion = NodeVersion([0; MAX_VERSION_LENGTH]);

    pub fn new(bytes: &[u8]) -> Self {
        let mut buf = [0u8; MAX_VERSION_LENGTH];
        for (i, &b) in bytes.iter().take(MAX_VERSION_LENGTH - 1).enumerate() {
            if b == 0 {
                break;
            }
            buf[i] = b;
        }
        NodeVersion(buf)
    }

    pub fn as_bytes(&self) -> &[u8; MAX_VERSION_LENGTH] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_VERSION_LENGTH);
        std::str::from_utf8(&self.0[..len]).unwrap_or("")
    }
}

impl Default for NodeVersion {
    fn default() -> Self {
        NodeVersion::new(NODE_VERSION.as_bytes())
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_display() {
        let mac = Mac([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "DE:AD:BE:EF:00:01");
        assert!(!mac.is_broadcast());
        assert!(BROADCAST_MAC.is_broadcast());
    }

    #[test]
    fn layer_prefix_then_null_equality() {
        let a = Layer::new(b"ALPHA");
        let b = Layer::new(b"ALPHA\0garbage!!");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "ALPHA");
    }

    #[test]
    fn layer_truncates_to_15_bytes() {
        let long = Layer::new(b"0123456789ABCDEFGH");
        assert_eq!(long.as_str(), "0123456789ABCDE");
        assert_eq!(long.as_bytes()[15], 0);
    }

    #[test]
    fn layer_default_is_dash() {
        assert_eq!(Layer::default().as_str(), "-");
    }

    #[test]
    fn version_roundtrip() {
        let v = NodeVersion::default();
        assert_eq!(v.as_str(), "1.0");
        assert_eq!(v.as_bytes()[3], 0);
    }
}
