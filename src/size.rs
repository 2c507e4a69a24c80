//! Size descriptors
//!
//! Field serializers declare how much space a value needs before it is
//! written. `Fixed` sizes are constant per type; `Unknown` sizes are computed
//! from the live instance by a sizer, within optional bounds.

use std::fmt;
use std::sync::Arc;

/// Allocation size used when nothing better than a minimum is known
pub const DEFAULT_ALLOC_SIZE: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordSpace {
    Bit,
    Byte,
}

impl WordSpace {
    /// Convert `value` from this space into `to`, rounding bits up to whole bytes
    pub fn map_size(self, to: WordSpace, value: u64) -> u64 {
        match (self, to) {
            (WordSpace::Bit, WordSpace::Byte) => value.div_ceil(8),
            (WordSpace::Byte, WordSpace::Bit) => value * 8,
            _ => value,
        }
    }
}

pub type Sizer<T> = Arc<dyn Fn(&T) -> u64 + Send + Sync>;

pub enum SizeDescriptor<T> {
    Fixed {
        space: WordSpace,
        size: u64,
    },
    Unknown {
        space: WordSpace,
        min: u64,
        max: Option<u64>,
        sizer: Sizer<T>,
    },
}

impl<T> SizeDescriptor<T> {
    pub fn fixed(space: WordSpace, size: u64) -> Self {
        SizeDescriptor::Fixed { space, size }
    }

    pub fn unknown<F>(space: WordSpace, min: u64, max: Option<u64>, sizer: F) -> Self
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        SizeDescriptor::Unknown {
            space,
            min,
            max,
            sizer: Arc::new(sizer),
        }
    }

    pub fn word_space(&self) -> WordSpace {
        match self {
            SizeDescriptor::Fixed { space, .. } | SizeDescriptor::Unknown { space, .. } => *space,
        }
    }

    /// The constant size in `space`, for `Fixed` descriptors
    pub fn fixed_size(&self, space: WordSpace) -> Option<u64> {
        match self {
            SizeDescriptor::Fixed { space: own, size } => Some(own.map_size(space, *size)),
            SizeDescriptor::Unknown { .. } => None,
        }
    }

    pub fn min(&self, space: WordSpace) -> u64 {
        match self {
            SizeDescriptor::Fixed { space: own, size } => own.map_size(space, *size),
            SizeDescriptor::Unknown { space: own, min, .. } => own.map_size(space, *min),
        }
    }

    pub fn max(&self, space: WordSpace) -> Option<u64> {
        match self {
            SizeDescriptor::Fixed { space: own, size } => Some(own.map_size(space, *size)),
            SizeDescriptor::Unknown { space: own, max, .. } => max.map(|m| own.map_size(space, m)),
        }
    }

    /// Exact size of `instance` in `space`
    pub fn calc_unknown(&self, instance: &T, space: WordSpace) -> u64 {
        match self {
            SizeDescriptor::Fixed { space: own, size } => own.map_size(space, *size),
            SizeDescriptor::Unknown { space: own, sizer, .. } => own.map_size(space, sizer(instance)),
        }
    }

    /// Space to reserve before anything is serialized: the fixed size, else
    /// the upper bound, else `max(min, 32)`.
    pub fn calc_alloc_size(&self, space: WordSpace) -> u64 {
        if let Some(size) = self.fixed_size(space) {
            return size;
        }
        if let Some(max) = self.max(space) {
            return max;
        }
        self.min(space).max(DEFAULT_ALLOC_SIZE)
    }

    /// Descriptor for consecutive values, summed in bytes.
    ///
    /// Bit-space parts are rounded up to whole bytes individually, matching
    /// how byte-aligned fields are laid out.
    pub fn sum(parts: Vec<SizeDescriptor<T>>) -> Self
    where
        T: 'static,
    {
        let fixed: Option<u64> = parts
            .iter()
            .map(|p| p.fixed_size(WordSpace::Byte))
            .sum();
        if let Some(size) = fixed {
            return SizeDescriptor::fixed(WordSpace::Byte, size);
        }
        let min = parts.iter().map(|p| p.min(WordSpace::Byte)).sum();
        let max = parts.iter().map(|p| p.max(WordSpace::Byte)).sum();
        SizeDescriptor::unknown(WordSpace::Byte, min, max, move |instance: &T| {
            parts
                .iter()
                .map(|p| p.calc_unknown(instance, WordSpace::Byte))
                .sum()
        })
    }
}

impl<T> Clone for SizeDescriptor<T> {
    fn clone(&self) -> Self {
        match self {
            SizeDescriptor::Fixed { space, size } => SizeDescriptor::Fixed {
                space: *space,
                size: *size,
            },
            SizeDescriptor::Unknown {
                space,
                min,
                max,
                sizer,
            } => SizeDescriptor::Unknown {
                space: *space,
                min: *min,
                max: *max,
                sizer: Arc::clone(sizer),
            },
        }
    }
}

impl<T> fmt::Debug for SizeDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeDescriptor::Fixed { space, size } => {
                f.debug_struct("Fixed").field("space", space).field("size", size).finish()
            }
            SizeDescriptor::Unknown { space, min, max, .. } => f
                .debug_struct("Unknown")
                .field("space", space)
                .field("min", min)
                .field("max", max)
                .finish(),
        }
    }
}
