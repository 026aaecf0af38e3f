/// A fixed-width scalar that can live in a struct's data section or in a
/// primitive list. All values are stored little-endian regardless of host.
pub trait Primitive: Copy {
    /// Width of the value in bytes.
    const SIZE: usize;

    /// Decodes a value from exactly `SIZE` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Encodes the value into exactly `SIZE` bytes.
    fn write_le(self, bytes: &mut [u8]);

    /// The value an absent field reads as.
    fn zero() -> Self;

    /// Integer type holding the value's bit pattern.
    type Bits: Copy;

    /// XORs the value's bits with `mask`. A field is stored masked with its
    /// default, so zeroed memory reads back as the default.
    fn mask(self, mask: Self::Bits) -> Self;
}

macro_rules! primitive_impl(
    ($typ:ty, $n:expr, $bits:ty, $to_bits:path, $from_bits:path) => (
        impl Primitive for $typ {
            const SIZE: usize = $n;
            type Bits = $bits;

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                <$typ>::from_le_bytes(raw)
            }

            #[inline]
            fn write_le(self, bytes: &mut [u8]) {
                bytes[..$n].copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn zero() -> Self {
                0 as $typ
            }

            #[inline]
            fn mask(self, mask: $bits) -> Self {
                $from_bits($to_bits(self) ^ mask)
            }
        }
    );
);

use core::convert::identity;

primitive_impl!(u8, 1, u8, identity, identity);
primitive_impl!(i8, 1, i8, identity, identity);
primitive_impl!(u16, 2, u16, identity, identity);
primitive_impl!(i16, 2, i16, identity, identity);
primitive_impl!(u32, 4, u32, identity, identity);
primitive_impl!(i32, 4, i32, identity, identity);
primitive_impl!(u64, 8, u64, identity, identity);
primitive_impl!(i64, 8, i64, identity, identity);
primitive_impl!(f32, 4, u32, f32::to_bits, f32::from_bits);
primitive_impl!(f64, 8, u64, f64::to_bits, f64::from_bits);

#[cfg(test)]
mod tests {
    use super::Primitive;

    #[test]
    fn little_endian_on_every_host() {
        let mut buf = [0u8; 8];
        0x0102030405060708u64.write_le(&mut buf);
        assert_eq!(buf, [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(u32::read_le(&buf[4..]), 0x01020304);
        assert_eq!(i16::read_le(&[0xfe, 0xff]), -2);
        (-0.5f32).write_le(&mut buf[..4]);
        assert_eq!(f32::read_le(&buf), -0.5);
    }

    #[test]
    fn zero_bits_read_back_as_the_default() {
        assert_eq!(0u16.mask(0xbeef), 0xbeef);
        assert_eq!((-7i32).mask(123).mask(123), -7);
        assert_eq!(0.0f64.mask(1.5f64.to_bits()), 1.5);
        assert_eq!(2.25f32.mask(0).to_bits(), 2.25f32.to_bits());
        assert_eq!(1.5f32.mask(1.5f32.to_bits()).to_bits(), 0);
    }
}
