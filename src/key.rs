use std::cmp::Ordering;

pub type Value = i64;

pub const KEY_SIZE: usize = 16;

/// A composite `(main, sub)` key. Ordered lexicographically: `main` first,
/// `sub` breaks ties. `sub` exists purely to disambiguate otherwise-equal
/// logical keys; the tree itself still enforces total uniqueness on the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Key {
    pub main: i64,
    pub sub: i64,
}

impl Key {
    pub const MIN: Key = Key {
        main: i64::MIN,
        sub: i64::MIN,
    };

    pub fn new(main: i64, sub: i64) -> Self {
        Self { main, sub }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), KEY_SIZE);
        Self {
            main: i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            sub: i64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        }
    }

    pub fn write_to(&self, bytes: &mut [u8]) {
        debug_assert_eq!(bytes.len(), KEY_SIZE);
        bytes[0..8].copy_from_slice(&self.main.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.sub.to_le_bytes());
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.main.cmp(&other.main).then(self.sub.cmp(&other.sub))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for Key {
    /// Convenience for callers (tests, the CLI) that only care about `main`
    /// and are fine with the default `sub = 0`.
    fn from(main: i64) -> Self {
        Key::new(main, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_main_then_sub() {
        assert!(Key::new(1, 0) < Key::new(2, 0));
        assert!(Key::new(1, 0) < Key::new(1, 1));
        assert_eq!(Key::new(1, 5), Key::new(1, 5));
    }

    #[test]
    fn byte_roundtrip() {
        let k = Key::new(-7, 42);
        let mut buf = [0u8; KEY_SIZE];
        k.write_to(&mut buf);
        assert_eq!(Key::from_bytes(&buf), k);
    }
}
