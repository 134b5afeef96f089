use embedded_storage::nor_flash::NorFlash;

/// See README.md for an example implementation.
pub trait Platform: PowerControl + NorFlash {}

impl<T: PowerControl + NorFlash> Platform for T {}

/// Optional low power hooks of the flash chip. Serial flash chips usually support a deep power
/// down mode; chips without one can rely on the default no-op implementations.
pub trait PowerControl {
    fn sleep(&mut self) {}

    fn wakeup(&mut self) {}
}

impl<T: PowerControl> PowerControl for &mut T {
    fn sleep(&mut self) {
        (**self).sleep()
    }

    fn wakeup(&mut self) {
        (**self).wakeup()
    }
}

/// Largest `READ_SIZE`/`WRITE_SIZE` supported for unaligned accesses.
pub(crate) const MAX_WORD_SIZE: usize = 16;

pub trait AlignedOps: Platform {
    fn align_read_floor(offset: usize) -> usize {
        align_floor(offset, Self::READ_SIZE)
    }

    fn align_write_floor(offset: usize) -> usize {
        align_floor(offset, Self::WRITE_SIZE)
    }

    fn is_read_aligned(offset: usize, len: usize) -> bool {
        offset.is_multiple_of(Self::READ_SIZE) && len.is_multiple_of(Self::READ_SIZE)
    }

    fn is_write_aligned(offset: usize, len: usize) -> bool {
        offset.is_multiple_of(Self::WRITE_SIZE) && len.is_multiple_of(Self::WRITE_SIZE)
    }
}

#[inline(always)]
pub(crate) const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::PowerControl;

    // the SPI flash of the ESP chips is shared with code execution and can't be powered down
    impl PowerControl for FlashStorage<'_> {}
}
