use std::{fmt, ops};

/// A set of poll-thread interest/readiness flags.
///
/// `EventMask` is an OR of {[`EventMask::READABLE`], [`EventMask::WRITABLE`],
/// [`EventMask::ERROR`], [`EventMask::ET`]}. The first three describe kernel
/// readiness (or registration interest); `ET` selects edge-triggered
/// notification instead of the default level-triggered mode.
///
/// # Examples
///
/// ```
/// use reactor_socket::EventMask;
///
/// let mask = EventMask::READABLE | EventMask::WRITABLE;
/// assert!(mask.is_readable());
/// assert!(mask.is_writable());
/// assert!(!mask.is_et());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const EMPTY: EventMask = EventMask(0);
    pub const READABLE: EventMask = EventMask(0b0001);
    pub const WRITABLE: EventMask = EventMask(0b0010);
    pub const ERROR: EventMask = EventMask(0b0100);
    pub const ET: EventMask = EventMask(0b1000);

    #[inline]
    pub fn is_empty(self) -> bool {
        self == EventMask::EMPTY
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(EventMask::READABLE)
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(EventMask::WRITABLE)
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.contains(EventMask::ERROR)
    }

    #[inline]
    pub fn is_et(self) -> bool {
        self.contains(EventMask::ET)
    }

    #[inline]
    pub fn contains(self, other: EventMask) -> bool {
        (self & other) == other
    }

    #[inline]
    pub fn insert(&mut self, other: EventMask) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: EventMask) {
        self.0 &= !other.0;
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl ops::BitOr for EventMask {
    type Output = EventMask;

    #[inline]
    fn bitor(self, other: EventMask) -> EventMask {
        EventMask(self.0 | other.0)
    }
}

impl ops::BitAnd for EventMask {
    type Output = EventMask;

    #[inline]
    fn bitand(self, other: EventMask) -> EventMask {
        EventMask(self.0 & other.0)
    }
}

impl ops::Sub for EventMask {
    type Output = EventMask;

    #[inline]
    fn sub(self, other: EventMask) -> EventMask {
        EventMask(self.0 & !other.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (EventMask::READABLE, "Readable"),
            (EventMask::WRITABLE, "Writable"),
            (EventMask::ERROR, "Error"),
            (EventMask::ET, "ET"),
        ];

        write!(fmt, "EventMask {{")?;
        for (flag, msg) in flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?;
                }
                write!(fmt, "{msg}")?;
                one = true;
            }
        }
        write!(fmt, "}}")
    }
}
