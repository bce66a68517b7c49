//! Argument marshalling: typed arguments in, register words out.
//!
//! The enqueue pipeline packs a call's arguments into a fixed-width
//! register tile — an array of `u64` words — so every task crosses the
//! scheduler with one uniform frame, and the dispatch side can
//! reconstruct the typed call without knowing the argument types.
//!
//! Three paths exist:
//!
//! 1. *Scalar*: every argument fits one machine word ([`Word`]) and the
//!    arity is at most [`MAX_ENQUEUE_REGS`] — each argument is bit-cast
//!    into a word of the [`CallFrame`].
//! 2. *Inline tuple*: a compound value participates by implementing
//!    [`Word`] itself (e.g. a packed pair).
//! 3. *Heap*: everything else is boxed and invoked through a closure
//!    record; see [`crate::sched::enqueue_heap`].
//!
//! Casts are sign-preserving for signed integers and bit-preserving for
//! floats, so a round trip through the frame is exact.

use crate::task::Timestamp;

/// Number of argument registers the enqueue channel carries.
pub const MAX_ENQUEUE_REGS: usize = 5;

/// Compile-time bound on marshalled task arguments. Must not exceed
/// [`MAX_ENQUEUE_REGS`].
pub const MAX_TASK_ARGS: usize = 5;

const _: () = assert!(MAX_TASK_ARGS <= MAX_ENQUEUE_REGS);

/// A value that fits one machine word and can cross the register tile.
///
/// `from_word(into_word(x)) == x` must hold for every `x`.
pub trait Word: Copy + Send + 'static {
    /// Bit-casts the value into a register word.
    fn into_word(self) -> u64;
    /// Recovers the value from a register word.
    fn from_word(word: u64) -> Self;
}

macro_rules! word_unsigned {
    ($($t:ty),*) => {$(
        impl Word for $t {
            #[inline]
            fn into_word(self) -> u64 {
                self as u64
            }
            #[inline]
            #[allow(clippy::cast_possible_truncation)]
            fn from_word(word: u64) -> Self {
                word as $t
            }
        }
    )*};
}

macro_rules! word_signed {
    ($($t:ty),*) => {$(
        impl Word for $t {
            #[inline]
            #[allow(clippy::cast_sign_loss)]
            fn into_word(self) -> u64 {
                // Widen first so the sign bit fills the upper word.
                self as i64 as u64
            }
            #[inline]
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            fn from_word(word: u64) -> Self {
                word as i64 as $t
            }
        }
    )*};
}

word_unsigned!(u8, u16, u32, u64, usize);
word_signed!(i8, i16, i32, i64, isize);

impl Word for bool {
    #[inline]
    fn into_word(self) -> u64 {
        u64::from(self)
    }
    #[inline]
    fn from_word(word: u64) -> Self {
        word != 0
    }
}

impl Word for char {
    #[inline]
    fn into_word(self) -> u64 {
        u64::from(u32::from(self))
    }
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn from_word(word: u64) -> Self {
        char::from_u32(word as u32).unwrap_or('\u{FFFD}')
    }
}

impl Word for f32 {
    #[inline]
    fn into_word(self) -> u64 {
        u64::from(self.to_bits())
    }
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn from_word(word: u64) -> Self {
        Self::from_bits(word as u32)
    }
}

impl Word for f64 {
    #[inline]
    fn into_word(self) -> u64 {
        self.to_bits()
    }
    #[inline]
    fn from_word(word: u64) -> Self {
        Self::from_bits(word)
    }
}

/// The register tile of one marshalled call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    words: [u64; MAX_TASK_ARGS],
    len: u8,
}

impl CallFrame {
    /// An empty frame.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            words: [0; MAX_TASK_ARGS],
            len: 0,
        }
    }

    /// Builds a frame from raw words.
    ///
    /// # Panics
    ///
    /// Panics if `len > MAX_TASK_ARGS`; the enqueue channel has no
    /// register for the overflow.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_words(words: [u64; MAX_TASK_ARGS], len: usize) -> Self {
        assert!(len <= MAX_TASK_ARGS, "argument count exceeds register tile");
        Self {
            words,
            len: len as u8,
        }
    }

    /// Number of occupied registers.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true if the frame carries no arguments.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The raw register image, spill-descriptor layout.
    #[must_use]
    pub const fn words(&self) -> [u64; MAX_TASK_ARGS] {
        self.words
    }

    fn word(&self, idx: usize) -> u64 {
        assert!(
            idx < self.len as usize,
            "register {idx} read from a {}-argument frame",
            self.len
        );
        self.words[idx]
    }
}

/// An argument tuple that fits entirely in the register tile.
pub trait RegisterArgs: Send + 'static {
    /// Number of registers the tuple occupies.
    const ARITY: usize;

    /// Packs the tuple into a frame.
    fn pack(self) -> CallFrame;

    /// Reconstructs the tuple from a frame.
    fn unpack(frame: &CallFrame) -> Self;
}

/// A function callable as a task body with argument tuple `A`.
///
/// Implemented for `Fn(Timestamp)`, `Fn(Timestamp, A0)`, … up to
/// [`MAX_TASK_ARGS`] arguments. Arities beyond the register tile are
/// rejected at compile time: there is no impl to find.
pub trait TaskFn<A>: Send + Sync + 'static {
    /// Invokes the function with an unmarshalled argument tuple.
    fn call(&self, ts: Timestamp, args: A);
}

macro_rules! register_tuple {
    ($arity:expr $(, $t:ident : $idx:tt)*) => {
        impl<$($t: Word),*> RegisterArgs for ($($t,)*) {
            const ARITY: usize = $arity;

            #[allow(unused_mut, unused_variables)]
            fn pack(self) -> CallFrame {
                let mut words = [0u64; MAX_TASK_ARGS];
                $(words[$idx] = self.$idx.into_word();)*
                CallFrame::from_words(words, $arity)
            }

            #[allow(unused_variables)]
            fn unpack(frame: &CallFrame) -> Self {
                assert_eq!(
                    frame.len(),
                    $arity,
                    "frame arity does not match the runner"
                );
                ($($t::from_word(frame.word($idx)),)*)
            }
        }

        impl<F, $($t),*> TaskFn<($($t,)*)> for F
        where
            F: Fn(Timestamp $(, $t)*) + Send + Sync + 'static,
            $($t: Send + 'static,)*
        {
            #[allow(non_snake_case)]
            fn call(&self, ts: Timestamp, args: ($($t,)*)) {
                let ($($t,)*) = args;
                self(ts $(, $t)*);
            }
        }
    };
}

register_tuple!(0);
register_tuple!(1, A0: 0);
register_tuple!(2, A0: 0, A1: 1);
register_tuple!(3, A0: 0, A1: 1, A2: 2);
register_tuple!(4, A0: 0, A1: 1, A2: 2, A3: 3);
register_tuple!(5, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
