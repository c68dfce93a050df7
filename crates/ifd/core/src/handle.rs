//! Opaque random handles

use std::fmt;

use bytes::Bytes;
use rand::RngCore;

macro_rules! random_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Bytes);

        impl $name {
            /// Generate a fresh random handle of `len` bytes
            pub fn random(len: usize) -> Self {
                let mut raw = vec![0u8; len.max(1)];
                rand::rng().fill_bytes(&mut raw);
                Self(Bytes::from(raw))
            }

            /// Wrap handle bytes received from a caller
            pub fn from_bytes(raw: impl Into<Bytes>) -> Self {
                Self(raw.into())
            }

            /// Raw handle bytes
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode_upper(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

random_handle!(
    /// Identifies one established IFD context
    ContextHandle
);

random_handle!(
    /// Identifies one logical connection to a card in a terminal slot
    SlotHandle
);

random_handle!(
    /// Identifies one asynchronous wait
    SessionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_handles_differ() {
        let a = SlotHandle::random(16);
        let b = SlotHandle::random(16);
        assert_eq!(a.as_bytes().len(), 16);
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }

    #[test]
    fn test_handle_round_trip() {
        let handle = ContextHandle::from_bytes(vec![0xCA, 0xFE]);
        assert_eq!(handle.to_string(), "CAFE");
        assert_eq!(format!("{handle:?}"), "ContextHandle(CAFE)");
    }
}
