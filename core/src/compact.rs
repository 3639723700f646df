//! Compact "bits" encoding of a 256-bit proof-of-work target.
//!
//! The 32-bit compact form is a base-256 floating point number: the high byte
//! is the size in bytes of the value, the low three bytes are the most
//! significant bytes of the value. Bit 23 of the mantissa is a sign bit that
//! no valid target ever sets.

use primitive_types::U256;

/// A 256-bit unsigned proof-of-work target.
pub type Target = U256;

/// Sign bit of the 24-bit mantissa
pub const COMPACT_SIGN_BIT: u32 = 0x0080_0000;

/// Mantissa mask with the sign bit cleared
pub const COMPACT_MANTISSA_MASK: u32 = 0x007f_ffff;

/// Result of decoding a compact target.
///
/// `target` is always populated, but callers must treat it as unusable when
/// either `negative` or `overflow` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTarget {
    /// Decoded magnitude
    pub target: Target,
    /// Sign bit was set on a nonzero mantissa
    pub negative: bool,
    /// Significant mantissa bytes would land past bit 255
    pub overflow: bool,
}

impl CompactTarget {
    /// True when the value can be compared against hashes and limits.
    pub fn is_valid(&self) -> bool {
        !self.negative && !self.overflow
    }

    /// The decoded target, or `None` if it is negative or overflowed.
    pub fn valid_target(&self) -> Option<Target> {
        self.is_valid().then_some(self.target)
    }
}

/// Converte compact bits in target
pub fn bits_to_target(bits: u32) -> CompactTarget {
    let size = bits >> 24;
    let mut word = bits & COMPACT_MANTISSA_MASK;

    let target = if size <= 3 {
        word >>= 8 * (3 - size);
        Target::from(word)
    } else {
        let shift = 8 * (size as usize - 3);
        if shift >= 256 {
            Target::zero()
        } else {
            Target::from(word) << shift
        }
    };

    let negative = word != 0 && (bits & COMPACT_SIGN_BIT) != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

    CompactTarget {
        target,
        negative,
        overflow,
    }
}

/// Converte target in compact bits
///
/// Lossy: only the three most significant bytes survive. The sign bit of the
/// result is never set.
pub fn target_to_bits(target: &Target) -> u32 {
    let mut size = (target.bits() + 7) / 8;

    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (*target >> (8 * (size - 3))).low_u32()
    };

    // A set top bit would read back as negative: move to the next exponent
    if compact & COMPACT_SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// Parses a target from a big-endian hex string, with or without `0x`.
pub fn target_from_hex(s: &str) -> Result<Target, hex::FromHexError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{digits}");
        padded.as_str()
    } else {
        digits
    };

    let bytes = hex::decode(digits)?;
    if bytes.len() > 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    Ok(Target::from_big_endian(&bytes))
}

/// Formats a target as a 64-digit big-endian hex string.
pub fn target_to_hex(target: &Target) -> String {
    let mut bytes = [0u8; 32];
    target.to_big_endian(&mut bytes);
    hex::encode(bytes)
}
