// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing link bring-up
//!
//! Every module that talks to a serializer or deserializer declares a small
//! static ring buffer of `Copy` trace entries and deposits an entry at each
//! interesting point: a register transaction, a stage boundary, a lock
//! sample. The buffers are meant to be read after the fact, either from a
//! debugger or by calling [`Ringbuf::iter`] from a host-side harness.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! Several link instances can be brought up from different threads at once,
//! so each buffer sits behind a spin lock instead of a single-borrow cell. An
//! entry is deposited while the lock is held; nothing else ever is.
//!
//! ## Creating a ring buffer
//!
//! A trace enum, a buffer for it, and an entry, as a driver module would
//! write them:
//!
//! ```ignore
//! # use ringbuf::*;
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Wrote { reg: u16, value: u8 },
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! fn write() {
//!     ringbuf_entry!(Trace::Wrote { reg: 0x40, value: 0x31 });
//! }
//! # write();
//! ```
//!
//! When an entry is identical to the most recent one (same source line and
//! same payload), the `count` of the existing entry is bumped rather than
//! consuming a new slot. A poller that samples the same "not locked" status
//! ten times in a row therefore leaves one entry with a count of ten.

#![cfg_attr(not(test), no_std)]

#[doc(hidden)]
pub use spin::Mutex;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase.
///
/// To support the common case of having one quickly-installed ringbuffer per
/// module, if you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::Mutex<$crate::Ringbuf<$t, $n>> =
            $crate::Mutex::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`.
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before taking the lock, so that a payload
        // expression which itself traces cannot deadlock on this buffer.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::entry(
            &mut *$crate::Mutex::lock(buf),
            line!() as u16,
            p,
        );
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // `None` is treated as an out-of-range index, so the first entry lands
        // in slot 0 and never bumps the count of an initializer entry.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Iterates over the live entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        (start..N)
            .chain(0..start.min(N))
            .map(move |i| &self.buffer[i])
            .filter(|e| e.count != 0)
    }

    /// Returns the payload of the most recent entry, if any.
    pub fn latest(&self) -> Option<T> {
        self.last
            .and_then(|i| self.buffer.get(i))
            .map(|e| e.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Ringbuf<u8, 4> {
        Ringbuf {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: 0,
            }; 4],
        }
    }

    #[test]
    fn first_entry_lands_in_slot_zero() {
        let mut rb = fresh();
        rb.entry(10, 7);
        assert_eq!(rb.last, Some(0));
        assert_eq!(rb.buffer[0].payload, 7);
        assert_eq!(rb.buffer[0].count, 1);
    }

    #[test]
    fn repeats_are_coalesced() {
        let mut rb = fresh();
        rb.entry(10, 7);
        rb.entry(10, 7);
        rb.entry(10, 7);
        assert_eq!(rb.last, Some(0));
        assert_eq!(rb.buffer[0].count, 3);

        // Same payload from a different line is a new entry.
        rb.entry(11, 7);
        assert_eq!(rb.last, Some(1));
    }

    #[test]
    fn wraps_and_iterates_oldest_first() {
        let mut rb = fresh();
        for (line, p) in (1..=6).zip(1u8..) {
            rb.entry(line, p);
        }
        let seen: Vec<u8> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(seen, [3, 4, 5, 6]);
        assert_eq!(rb.latest(), Some(6));
        // Slots 0 and 1 have been reused once.
        assert_eq!(rb.buffer[0].generation, 2);
    }

    #[test]
    fn iter_skips_untouched_slots() {
        let mut rb = fresh();
        rb.entry(1, 9);
        let seen: Vec<u8> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(seen, [9]);
    }

    #[cfg(not(feature = "disabled"))]
    #[test]
    fn macros_declare_and_fill_a_buffer() {
        #[derive(Copy, Clone, Debug, PartialEq)]
        enum Trace {
            None,
            Wrote { reg: u16, value: u8 },
        }

        ringbuf!(TRACE, Trace, 16, Trace::None);

        for _ in 0..10 {
            ringbuf_entry!(TRACE, Trace::Wrote { reg: 0x40, value: 0x31 });
        }

        let rb = TRACE.lock();
        let entries: Vec<_> = rb.iter().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 10);
        assert_eq!(rb.latest(), Some(Trace::Wrote { reg: 0x40, value: 0x31 }));
    }
}
