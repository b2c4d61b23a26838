//! IEEE-754 binary16 decoding.

const SIGN_MASK: u16 = 0x8000;
const EXPONENT_MASK: u16 = 0x7c00;
const MANTISSA_MASK: u16 = 0x03ff;

/// Hidden bit of a normalized binary16 mantissa.
const IMPLICIT_BIT: u32 = 0x0400;

/// binary32 exponent bias minus binary16 exponent bias.
const REBIAS: i32 = 127 - 15;

/// Convert a binary16 bit pattern to the exactly equal `f32`.
///
/// Every binary16 value is representable in binary32, so the conversion is
/// lossless. NaN payloads are carried over in the high mantissa bits.
pub fn decode(bits: u16) -> f32 {
    let sign = u32::from(bits & SIGN_MASK) << 16;
    let exponent = u32::from((bits & EXPONENT_MASK) >> 10);
    let mantissa = u32::from(bits & MANTISSA_MASK);

    let out = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal: shift until the hidden bit appears, lowering the
            // exponent once per shift.
            let mut exp: i32 = 1;
            let mut m = mantissa;
            while m & IMPLICIT_BIT == 0 {
                m <<= 1;
                exp -= 1;
            }
            let m = m & u32::from(MANTISSA_MASK);
            sign | (((exp + REBIAS) as u32) << 23) | (m << 13)
        }
        (0x1f, _) => sign | 0x7f80_0000 | (mantissa << 13),
        _ => sign | (((exponent as i32 + REBIAS) as u32) << 23) | (mantissa << 13),
    };

    f32::from_bits(out)
}
