use crate::error::RequestError;

/// Modbus unit identifier, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

/// Start and count tuple used when addressing registers
/// Cannot be constructed with invalid start/count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

/// Value and its address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Indexed<T> {
    /// Address of the value
    pub index: u16,
    /// Associated value
    pub value: T,
}

impl UnitId {
    /// Create a new UnitId
    pub const fn new(value: u8) -> Self {
        Self { value }
    }

    /// Wildcard address accepted by listeners that serve every device
    pub const fn wildcard() -> Self {
        Self {
            value: crate::constants::UNIT_ID_WILDCARD,
        }
    }

    /// Returns true if a device may be registered under this id (1..=247)
    pub fn is_assignable(&self) -> bool {
        (1..=crate::constants::MAX_UNIT_ID).contains(&self.value)
    }

    /// Returns true if this is the listener wildcard
    pub fn is_wildcard(&self) -> bool {
        self.value == crate::constants::UNIT_ID_WILDCARD
    }
}

/// Create the default UnitId of `0xFF`
impl Default for UnitId {
    fn default() -> Self {
        Self::wildcard()
    }
}

impl From<u8> for UnitId {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

impl AddressRange {
    /// Create a new address range
    pub fn try_from(start: u16, count: u16) -> Result<Self, RequestError> {
        if count == 0 {
            return Err(RequestError::CountOfZero);
        }

        let max_start = u16::MAX - (count - 1);

        if start > max_start {
            return Err(RequestError::AddressOverflow(start, count));
        }

        Ok(Self { start, count })
    }

    /// Create a range whose count may not exceed `limit`
    pub(crate) fn limited(start: u16, count: u16, limit: u16) -> Result<Self, RequestError> {
        let range = Self::try_from(start, count)?;
        if range.count > limit {
            return Err(RequestError::CountTooLarge(range.count, limit));
        }
        Ok(range)
    }

    /// Iterate over every address in the range
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        AddressIterator::new(self.start, self.count)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

pub(crate) struct AddressIterator {
    current: u16,
    remain: u16,
}

impl AddressIterator {
    pub(crate) fn new(current: u16, remain: u16) -> Self {
        Self { current, remain }
    }
}

impl Iterator for AddressIterator {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        match self.remain.checked_sub(1) {
            Some(x) => {
                let ret = self.current;
                // wrapping only matters after the last element, which is never observed
                self.current = self.current.wrapping_add(1);
                self.remain = x;
                Some(ret)
            }
            None => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remain as usize, Some(self.remain as usize))
    }
}

impl<T> Indexed<T> {
    /// Create a new indexed value
    pub fn new(index: u16, value: T) -> Self {
        Indexed { index, value }
    }
}

impl std::fmt::Display for Indexed<u16> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {:#06X}", self.index, self.value)
    }
}

/// Only `0xFF00` is ON, every other value is treated as OFF
pub(crate) fn coil_from_u16(value: u16) -> bool {
    value == crate::constants::coil::ON
}

pub(crate) fn coil_to_u16(value: bool) -> u16 {
    if value {
        crate::constants::coil::ON
    } else {
        crate::constants::coil::OFF
    }
}
