use std::{marker::PhantomData, ops::Range};

use tracing::debug;

use crate::error::StorageError;

pub const REGION_SIZE: usize = 512;

const MAX_FIELD_WIDTH: usize = 8;

pub trait Medium {
    fn capacity(&self) -> usize;

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;

    /// A single small write followed by a commit is assumed to land atomically.
    fn commit(&mut self) -> Result<(), StorageError>;
}

pub trait FieldValue: Copy {
    const WIDTH: usize;

    fn encode(self, out: &mut [u8]);

    fn decode(bytes: &[u8]) -> Self;
}

impl FieldValue for u8 {
    const WIDTH: usize = 1;

    fn encode(self, out: &mut [u8]) {
        out[0] = self;
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl FieldValue for bool {
    const WIDTH: usize = 1;

    fn encode(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl FieldValue for f64 {
    const WIDTH: usize = 8;

    fn encode(self, out: &mut [u8]) {
        out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..Self::WIDTH]);
        f64::from_le_bytes(raw)
    }
}

#[derive(Debug)]
pub struct Field<T> {
    name: &'static str,
    offset: usize,
    _value: PhantomData<T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T: FieldValue> Field<T> {
    pub const fn new(name: &'static str, offset: usize) -> Self {
        Self {
            name,
            offset,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + T::WIDTH
    }
}

pub mod layout {
    use super::Field;

    pub const MODE: Field<u8> = Field::new("mode", 0);
    pub const STATE: Field<u8> = Field::new("state", 1);
    pub const SETPOINT: Field<f64> = Field::new("setpoint", 2);
    pub const SETPOINT_HIGH: Field<f64> = Field::new("setpoint_high", 10);
    pub const SCREEN_IMPERIAL: Field<bool> = Field::new("screen_imperial", 40);
    pub const REMOTE_TEMPERATURE: Field<bool> = Field::new("remote_temperature", 41);
}

pub struct SettingsStore<M> {
    medium: M,
    mirror: Vec<u8>,
}

impl<M: Medium> SettingsStore<M> {
    /// Loads the settings region into the mirror. Any failure here is an
    /// [`StorageError::Init`], which callers treat as fatal.
    pub fn open(medium: M) -> Result<Self, StorageError> {
        let capacity = medium.capacity();
        if capacity < REGION_SIZE {
            return Err(StorageError::Init(format!(
                "medium holds {capacity} bytes, settings need {REGION_SIZE}"
            )));
        }

        let mut mirror = vec![0u8; REGION_SIZE];
        medium
            .read(0, &mut mirror)
            .map_err(|err| StorageError::Init(err.to_string()))?;

        Ok(Self { medium, mirror })
    }

    pub fn get<T: FieldValue>(&self, field: Field<T>) -> T {
        T::decode(&self.mirror[field.range()])
    }

    /// Writes through only if the encoding differs from the mirror; an
    /// unchanged value never reaches the medium. Returns whether a physical
    /// write happened. On failure the mirror keeps the old value.
    pub fn set<T: FieldValue>(&mut self, field: Field<T>, value: T) -> Result<bool, StorageError> {
        let mut buffer = [0u8; MAX_FIELD_WIDTH];
        let encoded = &mut buffer[..T::WIDTH];
        value.encode(encoded);

        let range = field.range();
        if self.mirror[range.clone()] == *encoded {
            debug!(field = field.name(), "settings write suppressed, value unchanged");
            return Ok(false);
        }

        self.medium.write(field.offset(), encoded)?;
        self.medium.commit()?;
        self.mirror[range].copy_from_slice(encoded);
        debug!(field = field.name(), offset = field.offset(), "settings written");
        Ok(true)
    }

    pub fn factory_reset(&mut self) -> Result<(), StorageError> {
        self.set(layout::SCREEN_IMPERIAL, false)?;
        self.set(layout::REMOTE_TEMPERATURE, false)?;
        Ok(())
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    pub fn into_medium(self) -> M {
        self.medium
    }
}
