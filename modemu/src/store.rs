use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{DeviceError, StoreError};
use crate::timing::{TimingConfig, TimingSimulator};
use crate::types::UnitId;

/// Four sparse register spaces of one device
///
/// Addresses that were never written read as `0` / `false`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterBank {
    holding: BTreeMap<u16, u16>,
    input: BTreeMap<u16, u16>,
    coils: BTreeMap<u16, bool>,
    discrete: BTreeMap<u16, bool>,
}

impl RegisterBank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a holding register
    pub fn set_holding(&mut self, address: u16, value: u16) {
        self.holding.insert(address, value);
    }

    /// Set an input register
    pub fn set_input(&mut self, address: u16, value: u16) {
        self.input.insert(address, value);
    }

    /// Set a coil
    pub fn set_coil(&mut self, address: u16, value: bool) {
        self.coils.insert(address, value);
    }

    /// Set a discrete input
    pub fn set_discrete(&mut self, address: u16, value: bool) {
        self.discrete.insert(address, value);
    }

    /// Read `quantity` holding registers starting at `address`
    pub fn holding(&self, address: u16, quantity: u16) -> Vec<u16> {
        read_span(&self.holding, address, quantity)
    }

    /// Read `quantity` input registers starting at `address`
    pub fn input(&self, address: u16, quantity: u16) -> Vec<u16> {
        read_span(&self.input, address, quantity)
    }

    /// Read `quantity` coils starting at `address`
    pub fn coils(&self, address: u16, quantity: u16) -> Vec<bool> {
        read_span(&self.coils, address, quantity)
    }

    /// Read `quantity` discrete inputs starting at `address`
    pub fn discrete(&self, address: u16, quantity: u16) -> Vec<bool> {
        read_span(&self.discrete, address, quantity)
    }

    fn write_holding(&mut self, address: u16, values: &[u16]) {
        for (offset, value) in values.iter().enumerate() {
            self.holding
                .insert(address.wrapping_add(offset as u16), *value);
        }
    }
}

fn read_span<T: Copy + Default>(space: &BTreeMap<u16, T>, address: u16, quantity: u16) -> Vec<T> {
    crate::types::AddressIterator::new(address, quantity)
        .map(|x| space.get(&x).copied().unwrap_or_default())
        .collect()
}

/// Definition of a virtual device: unit id, initial registers and optional timing
#[derive(Clone, Debug)]
pub struct Device {
    unit_id: UnitId,
    registers: RegisterBank,
    timing: Option<TimingConfig>,
}

impl Device {
    /// Create a device with empty registers and no artificial delay
    pub fn new(unit_id: impl Into<UnitId>) -> Self {
        Self {
            unit_id: unit_id.into(),
            registers: RegisterBank::new(),
            timing: None,
        }
    }

    /// Replace the initial register contents
    pub fn with_registers(mut self, registers: RegisterBank) -> Self {
        self.registers = registers;
        self
    }

    /// Seed a holding register
    pub fn with_holding(mut self, address: u16, value: u16) -> Self {
        self.registers.set_holding(address, value);
        self
    }

    /// Seed an input register
    pub fn with_input(mut self, address: u16, value: u16) -> Self {
        self.registers.set_input(address, value);
        self
    }

    /// Seed a coil
    pub fn with_coil(mut self, address: u16, value: bool) -> Self {
        self.registers.set_coil(address, value);
        self
    }

    /// Seed a discrete input
    pub fn with_discrete(mut self, address: u16, value: bool) -> Self {
        self.registers.set_discrete(address, value);
        self
    }

    /// Apply artificial timing to every request addressed to this device
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Unit id the device answers to
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Initial register contents
    pub fn registers(&self) -> &RegisterBank {
        &self.registers
    }

    /// Timing configuration, if any
    pub fn timing(&self) -> Option<&TimingConfig> {
        self.timing.as_ref()
    }
}

struct DeviceState {
    bank: Mutex<RegisterBank>,
    timing: Option<Arc<TimingSimulator>>,
}

impl DeviceState {
    fn with_bank<R>(&self, action: impl FnOnce(&mut RegisterBank) -> R) -> R {
        let mut bank = self.bank.lock().unwrap_or_else(PoisonError::into_inner);
        action(&mut bank)
    }
}

/// Register spaces of every device in an engine, partitioned by unit id
///
/// Each device has its own lock, so a single read or write is atomic with respect
/// to its own device and never contends with other devices.
#[derive(Default)]
pub struct RegisterStore {
    devices: RwLock<BTreeMap<UnitId, Arc<DeviceState>>>,
}

impl RegisterStore {
    /// Create a store with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, rejecting reserved and duplicate unit ids
    pub fn insert(&self, device: Device) -> Result<(), DeviceError> {
        let unit_id = device.unit_id;
        if !unit_id.is_assignable() {
            return Err(DeviceError::InvalidUnitId(unit_id.value));
        }
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if devices.contains_key(&unit_id) {
            return Err(DeviceError::DuplicateUnitId(unit_id.value));
        }
        let state = DeviceState {
            bank: Mutex::new(device.registers),
            timing: device.timing.map(|x| Arc::new(TimingSimulator::new(x))),
        };
        devices.insert(unit_id, Arc::new(state));
        Ok(())
    }

    /// Remove a device, returning true if it existed
    pub fn remove(&self, unit_id: UnitId) -> bool {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&unit_id)
            .is_some()
    }

    /// Returns true if a device is registered under `unit_id`
    pub fn contains(&self, unit_id: UnitId) -> bool {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&unit_id)
    }

    /// Registered unit ids in ascending order
    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Timing simulator of a device, `None` if it has no timing configured
    pub fn timing(&self, unit_id: UnitId) -> Result<Option<Arc<TimingSimulator>>, StoreError> {
        Ok(self.device(unit_id)?.timing.clone())
    }

    /// Read holding registers
    pub fn read_holding(
        &self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, StoreError> {
        Ok(self.device(unit_id)?.with_bank(|x| x.holding(address, quantity)))
    }

    /// Read input registers
    pub fn read_input(
        &self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, StoreError> {
        Ok(self.device(unit_id)?.with_bank(|x| x.input(address, quantity)))
    }

    /// Write consecutive holding registers starting at `address`
    pub fn write_holding(
        &self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> Result<(), StoreError> {
        self.device(unit_id)?
            .with_bank(|x| x.write_holding(address, values));
        Ok(())
    }

    /// Read coils
    pub fn read_coils(
        &self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, StoreError> {
        Ok(self.device(unit_id)?.with_bank(|x| x.coils(address, quantity)))
    }

    /// Read discrete inputs
    pub fn read_discrete(
        &self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, StoreError> {
        Ok(self
            .device(unit_id)?
            .with_bank(|x| x.discrete(address, quantity)))
    }

    /// Write one coil
    pub fn write_coil(&self, unit_id: UnitId, address: u16, value: bool) -> Result<(), StoreError> {
        self.device(unit_id)?.with_bank(|x| x.set_coil(address, value));
        Ok(())
    }

    /// Set an input register, which is read-only on the wire
    pub fn set_input(&self, unit_id: UnitId, address: u16, value: u16) -> Result<(), StoreError> {
        self.device(unit_id)?.with_bank(|x| x.set_input(address, value));
        Ok(())
    }

    /// Set a discrete input, which is read-only on the wire
    pub fn set_discrete(
        &self,
        unit_id: UnitId,
        address: u16,
        value: bool,
    ) -> Result<(), StoreError> {
        self.device(unit_id)?
            .with_bank(|x| x.set_discrete(address, value));
        Ok(())
    }

    /// Copy of a device's current registers
    pub fn snapshot(&self, unit_id: UnitId) -> Result<RegisterBank, StoreError> {
        Ok(self.device(unit_id)?.with_bank(|x| x.clone()))
    }

    fn device(&self, unit_id: UnitId) -> Result<Arc<DeviceState>, StoreError> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&unit_id)
            .cloned()
            .ok_or(StoreError::DeviceNotFound(unit_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(devices: &[Device]) -> RegisterStore {
        let store = RegisterStore::new();
        for device in devices {
            store.insert(device.clone()).unwrap();
        }
        store
    }

    #[test]
    fn unwritten_addresses_read_as_default() {
        let store = store_with(&[Device::new(1).with_holding(1, 52)]);
        assert_eq!(store.read_holding(UnitId::new(1), 0, 3), Ok(vec![0, 52, 0]));
        assert_eq!(store.read_input(UnitId::new(1), 100, 2), Ok(vec![0, 0]));
        assert_eq!(store.read_coils(UnitId::new(1), 0, 2), Ok(vec![false, false]));
        assert_eq!(store.read_discrete(UnitId::new(1), 0, 1), Ok(vec![false]));
    }

    #[test]
    fn writes_create_sparse_entries() {
        let store = store_with(&[Device::new(1)]);
        let unit = UnitId::new(1);
        store.write_holding(unit, 10, &[7, 8, 9]).unwrap();
        store.write_coil(unit, 3, true).unwrap();
        assert_eq!(store.read_holding(unit, 9, 5), Ok(vec![0, 7, 8, 9, 0]));
        assert_eq!(store.read_coils(unit, 2, 3), Ok(vec![false, true, false]));
    }

    #[test]
    fn unknown_device_is_reported() {
        let store = store_with(&[Device::new(1)]);
        let unit = UnitId::new(2);
        assert_eq!(
            store.read_holding(unit, 0, 1),
            Err(StoreError::DeviceNotFound(unit))
        );
        assert_eq!(
            store.write_coil(unit, 0, true),
            Err(StoreError::DeviceNotFound(unit))
        );
    }

    #[test]
    fn register_spaces_are_partitioned_by_unit_id() {
        let store = store_with(&[Device::new(1), Device::new(2).with_holding(0, 99)]);
        store.write_holding(UnitId::new(1), 0, &[11]).unwrap();
        assert_eq!(store.read_holding(UnitId::new(1), 0, 1), Ok(vec![11]));
        assert_eq!(store.read_holding(UnitId::new(2), 0, 1), Ok(vec![99]));
    }

    #[test]
    fn rejects_reserved_and_duplicate_unit_ids() {
        let store = store_with(&[Device::new(5)]);
        assert_eq!(
            store.insert(Device::new(5)),
            Err(DeviceError::DuplicateUnitId(5))
        );
        assert_eq!(store.insert(Device::new(0)), Err(DeviceError::InvalidUnitId(0)));
        assert_eq!(
            store.insert(Device::new(255)),
            Err(DeviceError::InvalidUnitId(255))
        );
    }

    #[test]
    fn removed_devices_are_forgotten() {
        let store = store_with(&[Device::new(1), Device::new(3)]);
        assert!(store.remove(UnitId::new(1)));
        assert!(!store.remove(UnitId::new(1)));
        assert!(!store.contains(UnitId::new(1)));
        assert_eq!(store.unit_ids(), vec![UnitId::new(3)]);
    }

    #[test]
    fn timing_is_only_present_when_configured() {
        let store = store_with(&[
            Device::new(1),
            Device::new(2).with_timing(TimingConfig::default()),
        ]);
        assert!(store.timing(UnitId::new(1)).unwrap().is_none());
        assert!(store.timing(UnitId::new(2)).unwrap().is_some());
    }
}
