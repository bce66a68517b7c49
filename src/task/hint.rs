//! Spatial hints.
//!
//! A [`Hint`] pairs a 64-bit locality key with enqueue flags. Passing a
//! bare integer means "map me near this key"; passing bare flags means
//! the key is absent or derived (`NOHINT`, `SAMEHINT`).

use crate::task::flags::EnqFlags;
use crate::util::CACHE_LINE_SIZE;

/// A spatial hint plus enqueue flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hint {
    /// The locality key consumed by the spatial mapper.
    pub hint: u64,
    /// Flags modifying enqueue semantics.
    pub flags: EnqFlags,
}

impl Hint {
    /// A hint with the given key and no flags.
    #[must_use]
    pub const fn new(hint: u64, flags: EnqFlags) -> Self {
        Self { hint, flags }
    }

    /// The cache-line key for an address, the usual locality unit.
    #[must_use]
    pub const fn cache_line(addr: usize) -> u64 {
        (addr / CACHE_LINE_SIZE) as u64
    }

    /// Rewrites `NOHINT` into `SAMEHINT`, leaving other flags alone.
    ///
    /// Used for the left-most child of a fan-out: running it on the
    /// parent's tile avoids an off-tile hop for work that would start
    /// first anyway.
    #[must_use]
    pub const fn replace_no_with_same(flags: EnqFlags) -> EnqFlags {
        if flags.intersects(EnqFlags::NOHINT) {
            EnqFlags::from_bits((flags.bits() & !EnqFlags::NOHINT.bits()) | EnqFlags::SAMEHINT.bits())
        } else {
            flags
        }
    }
}

impl From<u64> for Hint {
    fn from(hint: u64) -> Self {
        Self::new(hint, EnqFlags::NOFLAGS)
    }
}

impl From<EnqFlags> for Hint {
    fn from(flags: EnqFlags) -> Self {
        Self::new(0, flags)
    }
}

impl From<(u64, EnqFlags)> for Hint {
    fn from((hint, flags): (u64, EnqFlags)) -> Self {
        Self::new(hint, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_cover_both_halves() {
        let h: Hint = 67u64.into();
        assert_eq!(h.hint, 67);
        assert!(h.flags.is_empty());

        let h: Hint = EnqFlags::NOHINT.into();
        assert_eq!(h.hint, 0);
        assert!(h.flags.contains(EnqFlags::NOHINT));

        let h: Hint = (9, EnqFlags::MAYSPEC).into();
        assert_eq!(h.hint, 9);
        assert!(h.flags.contains(EnqFlags::MAYSPEC));
    }

    #[test]
    fn cache_line_key_strips_offset() {
        assert_eq!(Hint::cache_line(0), 0);
        assert_eq!(Hint::cache_line(63), 0);
        assert_eq!(Hint::cache_line(64), 1);
        assert_eq!(Hint::cache_line(130), 2);
    }

    #[test]
    fn nohint_rewrites_to_samehint() {
        let flags = EnqFlags::NOHINT | EnqFlags::PRODUCER;
        let rewritten = Hint::replace_no_with_same(flags);
        assert!(rewritten.contains(EnqFlags::SAMEHINT));
        assert!(!rewritten.intersects(EnqFlags::NOHINT));
        assert!(rewritten.contains(EnqFlags::PRODUCER));

        let unchanged = Hint::replace_no_with_same(EnqFlags::SAMEHINT);
        assert_eq!(unchanged, EnqFlags::SAMEHINT);
    }
}
