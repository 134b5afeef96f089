use crate::error::Error;
use crate::platform::Platform;
use crate::raw::MAX_RECORD_SIZE;
use crate::{Log, RecordAddress};

/// A fixed size value that can be appended to the log.
///
/// All records of a sector share one size, so `SIZE` has to be the same for every value of the
/// type. Integers are stored little endian.
pub trait Record: Sized {
    const SIZE: u8;

    /// Writes the value into `buf`, which is exactly `SIZE` bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Reads the value back from exactly `SIZE` bytes.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_record_for_int {
    ($($ty:ty),*) => {
        $(
            impl Record for $ty {
                const SIZE: u8 = size_of::<$ty>() as u8;

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut raw = [0u8; size_of::<$ty>()];
                    raw.copy_from_slice(buf);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_record_for_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl<const N: usize> Record for [u8; N] {
    const SIZE: u8 = {
        assert!(N >= 1 && N <= MAX_RECORD_SIZE as usize);
        N as u8
    };

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(buf);
        raw
    }
}

impl<T> Log<T>
where
    T: Platform,
{
    pub(crate) fn append_typed<R: Record>(&mut self, record: &R) -> Result<RecordAddress, Error> {
        let mut buf = [0u8; MAX_RECORD_SIZE as usize];
        let encoded = &mut buf[..R::SIZE as usize];
        record.encode(encoded);
        self.append_record(encoded)
    }

    pub(crate) fn load_typed<R: Record>(&mut self, address: RecordAddress) -> Result<R, Error> {
        let mut buf = [0u8; MAX_RECORD_SIZE as usize];
        let size = self.load_record(address, &mut buf)?;
        if size != R::SIZE as usize {
            return Err(Error::RecordSizeMismatch(size as u8));
        }
        Ok(R::decode(&buf[..size]))
    }
}
