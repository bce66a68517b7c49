//! Enqueue flags.
//!
//! Flags modify how a task is queued and scheduled. They fall into two
//! classes with different lifetimes:
//!
//! - bits 4..=15 are *persistent* task properties, preserved when a
//!   spiller evicts the task into a descriptor block;
//! - bits 16..=29 are *transient* transport modifiers, discarded on
//!   spill and re-derived from context on re-enqueue.
//!
//! Bits 0..=3 are reserved: the enqueue magic op packs the argument
//! count there (see [`crate::sim`]).

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bit-set of enqueue flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnqFlags(u32);

impl EnqFlags {
    /// No flags.
    pub const NOFLAGS: Self = Self(0);

    // Persistent task properties (preserved by spillers).
    /// Map the hint to a tile by modulo instead of by hash.
    pub const NOHASH: Self = Self(1 << 4);
    /// Deprioritise against same-timestamp peers (enqueuers, splitters).
    pub const PRODUCER: Self = Self(1 << 5);
    /// May run speculatively; also non-speculatively if the GVT matches.
    pub const MAYSPEC: Self = Self(1 << 6);
    /// Must run non-speculatively.
    pub const CANTSPEC: Self = Self(1 << 7);
    /// No timestamp; excluded from the GVT protocol.
    pub const NOTIMESTAMP: Self = Self(1 << 9);
    /// Non-speculative requeuer task.
    pub const REQUEUER: Self = Self(1 << 10);
    /// May run in parallel with same-hint peers.
    pub const NONSERIALHINT: Self = Self(1 << 11);

    // Transient transport modifiers (discarded on spill).
    /// No spatial hint supplied.
    pub const NOHINT: Self = Self(1 << 16);
    /// Reuse the current task's hint.
    pub const SAMEHINT: Self = Self(1 << 17);
    /// Reuse the current task's function pointer.
    pub const SAMETASK: Self = Self(1 << 18);
    /// Reuse the current task's timestamp (deprecated).
    pub const SAMETIME: Self = Self(1 << 19);
    /// Requeue the parent and yield if the target queue is full.
    pub const YIELDIFFULL: Self = Self(1 << 20);
    /// Queue to the enclosing domain.
    pub const PARENTDOMAIN: Self = Self(1 << 21);
    /// Queue to the domain created by the current task.
    pub const SUBDOMAIN: Self = Self(1 << 22);
    /// Queue to the outermost enclosing domain.
    pub const SUPERDOMAIN: Self = Self(1 << 23);
    /// Runs if the parent aborts; discarded on commit.
    pub const RUNONABORT: Self = Self(1 << 24);

    /// Mask of persistent flag bits (4..=15).
    pub const PERSISTENT_MASK: u32 = 0xFFF0;
    /// Mask of transient flag bits (16..=29).
    pub const TRANSIENT_MASK: u32 = 0x3FFF_0000;

    /// Builds a flag set from raw bits. Bits outside the flag ranges are
    /// dropped.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & (Self::PERSISTENT_MASK | Self::TRANSIENT_MASK))
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns true if any flag in `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Returns true if no flags are set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns only the persistent flag bits, the part a spiller keeps.
    #[must_use]
    pub const fn persistent(self) -> Self {
        Self(self.0 & Self::PERSISTENT_MASK)
    }

    /// Returns only the transient flag bits.
    #[must_use]
    pub const fn transient(self) -> Self {
        Self(self.0 & Self::TRANSIENT_MASK)
    }
}

impl BitOr for EnqFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EnqFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EnqFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for EnqFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0 & (Self::PERSISTENT_MASK | Self::TRANSIENT_MASK))
    }
}

impl fmt::Debug for EnqFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(EnqFlags, &str)] = &[
            (EnqFlags::NOHASH, "NOHASH"),
            (EnqFlags::PRODUCER, "PRODUCER"),
            (EnqFlags::MAYSPEC, "MAYSPEC"),
            (EnqFlags::CANTSPEC, "CANTSPEC"),
            (EnqFlags::NOTIMESTAMP, "NOTIMESTAMP"),
            (EnqFlags::REQUEUER, "REQUEUER"),
            (EnqFlags::NONSERIALHINT, "NONSERIALHINT"),
            (EnqFlags::NOHINT, "NOHINT"),
            (EnqFlags::SAMEHINT, "SAMEHINT"),
            (EnqFlags::SAMETASK, "SAMETASK"),
            (EnqFlags::SAMETIME, "SAMETIME"),
            (EnqFlags::YIELDIFFULL, "YIELDIFFULL"),
            (EnqFlags::PARENTDOMAIN, "PARENTDOMAIN"),
            (EnqFlags::SUBDOMAIN, "SUBDOMAIN"),
            (EnqFlags::SUPERDOMAIN, "SUPERDOMAIN"),
            (EnqFlags::RUNONABORT, "RUNONABORT"),
        ];
        if self.is_empty() {
            return write!(f, "NOFLAGS");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(*flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}
