//! Fragment planning.
//!
//! A frame is cut into `fragment_size` pieces in ascending offset order. The
//! last piece carries the remainder and an explicit `last` flag; consumers
//! key their end-of-frame handling off that flag rather than off a length
//! comparison.

use platform::geometry::{fragment_count, tail_len};

use crate::config::ConfigError;

/// One fragment of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fragment {
    /// Position in the frame, 0-based.
    pub index: u16,
    /// Byte offset within the frame.
    pub offset: u32,
    /// Bytes in this fragment.
    pub len: usize,
    /// Scratch slot carrying this fragment (`index % slots`).
    pub slot: usize,
    /// Final fragment of the frame.
    pub last: bool,
}

/// Splits a frame into fragments bound to scratch slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPlan {
    total: usize,
    fragment_size: usize,
    slots: usize,
    count: u16,
}

impl FragmentPlan {
    /// Plan for `total` bytes in `fragment_size` pieces over `slots` slots.
    pub fn new(total: usize, fragment_size: usize, slots: usize) -> Result<Self, ConfigError> {
        if total == 0 {
            return Err(ConfigError::EmptyFrame);
        }
        if fragment_size == 0 {
            return Err(ConfigError::ZeroFragment);
        }
        if slots == 0 {
            return Err(ConfigError::TooFewSlots(slots));
        }
        let count = u16::try_from(fragment_count(total, fragment_size))
            .map_err(|_| ConfigError::TooManyFragments)?;
        Ok(Self {
            total,
            fragment_size,
            slots,
            count,
        })
    }

    /// Number of fragments.
    pub fn len(&self) -> u16 {
        self.count
    }

    /// Always false; a plan covers at least one byte.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total bytes covered.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Nominal fragment size.
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Fragment at `index`, if in range.
    pub fn get(&self, index: u16) -> Option<Fragment> {
        if index >= self.count {
            return None;
        }
        let last = index.checked_add(1) == Some(self.count);
        let start = usize::from(index).checked_mul(self.fragment_size)?;
        let len = if last {
            tail_len(self.total, self.fragment_size)
        } else {
            self.fragment_size
        };
        Some(Fragment {
            index,
            offset: u32::try_from(start).ok()?,
            len,
            slot: usize::from(index).checked_rem(self.slots)?,
            last,
        })
    }

    /// Fragments in dispatch order.
    pub fn iter(&self) -> Fragments {
        Fragments {
            plan: *self,
            next: 0,
        }
    }
}

impl IntoIterator for &FragmentPlan {
    type Item = Fragment;
    type IntoIter = Fragments;

    fn into_iter(self) -> Fragments {
        self.iter()
    }
}

/// Iterator over a [`FragmentPlan`].
#[derive(Debug, Clone)]
pub struct Fragments {
    plan: FragmentPlan,
    next: u16,
}

impl Iterator for Fragments {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        let fragment = self.plan.get(self.next)?;
        self.next = self.next.saturating_add(1);
        Some(fragment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::from(self.plan.count.saturating_sub(self.next));
        (left, Some(left))
    }
}

impl ExactSizeIterator for Fragments {}
