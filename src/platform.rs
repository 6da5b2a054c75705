use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// Media capability the store is generic over: the [`embedded-storage`]
/// NOR flash traits plus a CRC provider. See README.md for an example
/// implementation.
///
/// Addresses handed to the store are byte offsets into this device, as
/// defined by the `NorFlash` contract; they need not be CPU addresses.
/// EEPROM-style parts implement the same traits with a small `ERASE_SIZE`.
///
/// [`embedded-storage`]: https://crates.io/crates/embedded-storage
pub trait Platform: Crc + NorFlash {}

impl<T: Crc + NorFlash> Platform for T {}

/// CRC engine paired with the flash device.
///
/// The store never interprets the value, it only compares results of this
/// function with each other, so any algorithm works as long as it is
/// deterministic and the same for every call. All store-internal calls pass
/// `u32::MAX` as `init` and hash one contiguous buffer.
///
/// [`crate::crc::crc32`] is a software fallback for targets without a
/// hardware unit.
pub trait Crc {
    fn crc32(init: u32, data: &[u8]) -> u32;
}

/// Geometry-aware rounding on top of the platform's word sizes.
pub(crate) trait AlignedOps: Platform {
    fn align_read(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_erase(size: usize) -> usize {
        align_ceil(size, Self::ERASE_SIZE)
    }
}

impl<T: Platform> AlignedOps for T {}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    size.div_ceil(alignment) * alignment
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32s3",
))]
mod chip {
    use crate::platform::Crc;
    use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};
    use esp_storage::{FlashStorage, FlashStorageError};

    /// On-chip flash paired with the ROM CRC engine.
    ///
    /// The ROM routine is not the software CRC-32/BZIP2 shipped in
    /// [`crate::crc`]; a ring written through this wrapper must always be
    /// read through it as well.
    pub struct ChipFlash {
        inner: FlashStorage,
    }

    impl ChipFlash {
        pub fn new() -> Self {
            Self {
                inner: FlashStorage::new(),
            }
        }
    }

    impl Default for ChipFlash {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ErrorType for ChipFlash {
        type Error = FlashStorageError;
    }

    impl ReadNorFlash for ChipFlash {
        const READ_SIZE: usize = FlashStorage::READ_SIZE;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            self.inner.read(offset, bytes)
        }

        fn capacity(&self) -> usize {
            self.inner.capacity()
        }
    }

    impl NorFlash for ChipFlash {
        const WRITE_SIZE: usize = FlashStorage::WRITE_SIZE;
        const ERASE_SIZE: usize = FlashStorage::ERASE_SIZE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            self.inner.erase(from, to)
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            self.inner.write(offset, bytes)
        }
    }

    impl Crc for ChipFlash {
        fn crc32(init: u32, data: &[u8]) -> u32 {
            esp_hal::rom::crc::crc32_be(init, data)
        }
    }

    impl Crc for &mut ChipFlash {
        fn crc32(init: u32, data: &[u8]) -> u32 {
            esp_hal::rom::crc::crc32_be(init, data)
        }
    }
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32s3",
))]
pub use chip::*;
