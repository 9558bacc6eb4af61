//! Wire tags and compact-range boundaries.
//!
//! Everything here is plain data. [classify] maps a leading byte to its [WireTag]
//! so the readers can dispatch on a closed enum instead of raw byte ranges.

// ---- Hessian 2 ----

pub const BC_BINARY: u8 = b'B';
pub const BC_BINARY_CHUNK: u8 = b'A';
pub const BC_BINARY_DIRECT: u8 = 0x20;
pub const BINARY_DIRECT_MAX: usize = 0x0f;
pub const BC_BINARY_SHORT: u8 = 0x34;
pub const BINARY_SHORT_MAX: usize = 0x3ff;

pub const BC_CLASS_DEF: u8 = b'C';

pub const BC_DATE: u8 = 0x4a;
pub const BC_DATE_MINUTE: u8 = 0x4b;

pub const BC_DOUBLE: u8 = b'D';
pub const BC_DOUBLE_ZERO: u8 = 0x5b;
pub const BC_DOUBLE_ONE: u8 = 0x5c;
pub const BC_DOUBLE_BYTE: u8 = 0x5d;
pub const BC_DOUBLE_SHORT: u8 = 0x5e;
pub const BC_DOUBLE_MILL: u8 = 0x5f;

pub const BC_END: u8 = b'Z';

pub const BC_FALSE: u8 = b'F';
pub const BC_TRUE: u8 = b'T';

pub const BC_INT: u8 = b'I';
pub const INT_DIRECT_MIN: i32 = -0x10;
pub const INT_DIRECT_MAX: i32 = 0x2f;
pub const BC_INT_ZERO: u8 = 0x90;
pub const INT_BYTE_MIN: i32 = -0x800;
pub const INT_BYTE_MAX: i32 = 0x7ff;
pub const BC_INT_BYTE_ZERO: u8 = 0xc8;
pub const INT_SHORT_MIN: i32 = -0x40000;
pub const INT_SHORT_MAX: i32 = 0x3ffff;
pub const BC_INT_SHORT_ZERO: u8 = 0xd4;

pub const BC_LIST_VARIABLE: u8 = 0x55;
pub const BC_LIST_FIXED: u8 = b'V';
pub const BC_LIST_VARIABLE_UNTYPED: u8 = 0x57;
pub const BC_LIST_FIXED_UNTYPED: u8 = 0x58;
pub const BC_LIST_DIRECT: u8 = 0x70;
pub const BC_LIST_DIRECT_UNTYPED: u8 = 0x78;
pub const LIST_DIRECT_MAX: usize = 0x07;

pub const BC_LONG: u8 = b'L';
pub const LONG_DIRECT_MIN: i64 = -0x08;
pub const LONG_DIRECT_MAX: i64 = 0x0f;
pub const BC_LONG_ZERO: u8 = 0xe0;
pub const LONG_BYTE_MIN: i64 = -0x800;
pub const LONG_BYTE_MAX: i64 = 0x7ff;
pub const BC_LONG_BYTE_ZERO: u8 = 0xf8;
pub const LONG_SHORT_MIN: i64 = -0x40000;
pub const LONG_SHORT_MAX: i64 = 0x3ffff;
pub const BC_LONG_SHORT_ZERO: u8 = 0x3c;
pub const BC_LONG_INT: u8 = 0x59;

pub const BC_MAP: u8 = b'M';
pub const BC_MAP_UNTYPED: u8 = b'H';

pub const BC_NULL: u8 = b'N';

pub const BC_OBJECT: u8 = b'O';
pub const BC_OBJECT_DIRECT: u8 = 0x60;
pub const OBJECT_DIRECT_MAX: usize = 0x0f;

pub const BC_REF: u8 = 0x51;

pub const BC_STRING: u8 = b'S';
pub const BC_STRING_CHUNK: u8 = b'R';
pub const BC_STRING_DIRECT: u8 = 0x00;
pub const STRING_DIRECT_MAX: usize = 0x1f;
pub const BC_STRING_SHORT: u8 = 0x30;
pub const STRING_SHORT_MAX: usize = 0x3ff;

/// Largest number of UTF-16 units in one string chunk.
pub const STRING_CHUNK_MAX: usize = 0x8000;
/// Largest number of bytes in one binary chunk.
pub const BINARY_CHUNK_MAX: usize = 0x8000;

// envelope, only meaningful at the start of a message
pub const BC_VERSION: u8 = b'H';
pub const BC_CALL: u8 = b'C';
pub const BC_REPLY: u8 = b'R';
pub const BC_FAULT: u8 = b'F';

pub const VERSION_MAJOR: u8 = 0x02;
pub const VERSION_MINOR: u8 = 0x00;

// ---- Hessian 1 ----

pub const H1_CALL: u8 = b'c';
pub const H1_REPLY: u8 = b'r';
pub const H1_METHOD: u8 = b'm';
pub const H1_HEADER: u8 = b'H';
pub const H1_FAULT: u8 = b'f';
pub const H1_END: u8 = b'z';
pub const H1_DATE: u8 = b'd';
pub const H1_STRING: u8 = b'S';
pub const H1_STRING_CHUNK: u8 = b's';
pub const H1_BINARY: u8 = b'B';
pub const H1_BINARY_CHUNK: u8 = b'b';
pub const H1_LIST: u8 = b'V';
pub const H1_MAP: u8 = b'M';
pub const H1_TYPE: u8 = b't';
pub const H1_LENGTH: u8 = b'l';
pub const H1_REF: u8 = b'R';

pub const H1_VERSION_MAJOR: u8 = 0x01;
pub const H1_VERSION_MINOR: u8 = 0x00;

// ---- limits ----

/// Deepest nesting of composites a reader or writer will follow.
pub const MAX_NESTING: usize = 256;

/// Category of a Hessian 2 leading byte inside a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireTag {
    Null,
    True,
    False,

    IntDirect,
    IntByte,
    IntShort,
    Int,

    LongDirect,
    LongByte,
    LongShort,
    LongInt,
    Long,

    DoubleZero,
    DoubleOne,
    DoubleByte,
    DoubleShort,
    DoubleMill,
    Double,

    Date,
    DateMinute,

    StringDirect,
    StringShort,
    StringChunk,
    String,

    BinaryDirect,
    BinaryShort,
    BinaryChunk,
    Binary,

    ListVariable,
    ListFixed,
    ListDirect,
    ListVariableUntyped,
    ListFixedUntyped,
    ListDirectUntyped,

    Map,
    MapUntyped,

    ClassDef,
    ObjectDirect,
    Object,

    Ref,
    End,

    /// Bytes with no meaning at value position (`@`, `E`, `G`, `P`).
    Reserved,
}

impl WireTag {
    /// Tags that start a string value or chunk.
    pub fn is_string(self) -> bool {
        matches!(
            self,
            Self::StringDirect | Self::StringShort | Self::StringChunk | Self::String
        )
    }

    /// Tags that start a binary value or chunk.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Self::BinaryDirect | Self::BinaryShort | Self::BinaryChunk | Self::Binary
        )
    }

    /// Human readable kind, used in diagnostics.
    pub fn kind(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::True | Self::False => "boolean",
            Self::IntDirect | Self::IntByte | Self::IntShort | Self::Int => "int",
            Self::LongDirect | Self::LongByte | Self::LongShort | Self::LongInt | Self::Long => {
                "long"
            }
            Self::DoubleZero
            | Self::DoubleOne
            | Self::DoubleByte
            | Self::DoubleShort
            | Self::DoubleMill
            | Self::Double => "double",
            Self::Date | Self::DateMinute => "date",
            Self::StringDirect | Self::StringShort | Self::StringChunk | Self::String => "string",
            Self::BinaryDirect | Self::BinaryShort | Self::BinaryChunk | Self::Binary => "binary",
            Self::ListVariable
            | Self::ListFixed
            | Self::ListDirect
            | Self::ListVariableUntyped
            | Self::ListFixedUntyped
            | Self::ListDirectUntyped => "list",
            Self::Map | Self::MapUntyped => "map",
            Self::ClassDef => "class definition",
            Self::ObjectDirect | Self::Object => "object",
            Self::Ref => "ref",
            Self::End => "end",
            Self::Reserved => "reserved",
        }
    }
}

/// Map a leading byte to its tag category.
pub fn classify(tag: u8) -> WireTag {
    match tag {
        0x00..=0x1f => WireTag::StringDirect,
        0x20..=0x2f => WireTag::BinaryDirect,
        0x30..=0x33 => WireTag::StringShort,
        0x34..=0x37 => WireTag::BinaryShort,
        0x38..=0x3f => WireTag::LongShort,
        BC_BINARY_CHUNK => WireTag::BinaryChunk,
        BC_BINARY => WireTag::Binary,
        BC_CLASS_DEF => WireTag::ClassDef,
        BC_DOUBLE => WireTag::Double,
        BC_FALSE => WireTag::False,
        BC_MAP_UNTYPED => WireTag::MapUntyped,
        BC_INT => WireTag::Int,
        BC_DATE => WireTag::Date,
        BC_DATE_MINUTE => WireTag::DateMinute,
        BC_LONG => WireTag::Long,
        BC_MAP => WireTag::Map,
        BC_NULL => WireTag::Null,
        BC_OBJECT => WireTag::Object,
        BC_REF => WireTag::Ref,
        BC_STRING_CHUNK => WireTag::StringChunk,
        BC_STRING => WireTag::String,
        BC_TRUE => WireTag::True,
        BC_LIST_VARIABLE => WireTag::ListVariable,
        BC_LIST_FIXED => WireTag::ListFixed,
        BC_LIST_VARIABLE_UNTYPED => WireTag::ListVariableUntyped,
        BC_LIST_FIXED_UNTYPED => WireTag::ListFixedUntyped,
        BC_LONG_INT => WireTag::LongInt,
        BC_END => WireTag::End,
        BC_DOUBLE_ZERO => WireTag::DoubleZero,
        BC_DOUBLE_ONE => WireTag::DoubleOne,
        BC_DOUBLE_BYTE => WireTag::DoubleByte,
        BC_DOUBLE_SHORT => WireTag::DoubleShort,
        BC_DOUBLE_MILL => WireTag::DoubleMill,
        0x60..=0x6f => WireTag::ObjectDirect,
        0x70..=0x77 => WireTag::ListDirect,
        0x78..=0x7f => WireTag::ListDirectUntyped,
        0x80..=0xbf => WireTag::IntDirect,
        0xc0..=0xcf => WireTag::IntByte,
        0xd0..=0xd7 => WireTag::IntShort,
        0xd8..=0xef => WireTag::LongDirect,
        0xf0..=0xff => WireTag::LongByte,
        // '@', 'E', 'G', 'P'
        _ => WireTag::Reserved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_range(range: std::ops::RangeInclusive<u8>, expected: WireTag) {
        for tag in range {
            assert_eq!(classify(tag), expected, "tag 0x{:02x}", tag);
        }
    }

    #[test]
    fn test_compact_ranges() {
        assert_range(0x00..=0x1f, WireTag::StringDirect);
        assert_range(0x20..=0x2f, WireTag::BinaryDirect);
        assert_range(0x30..=0x33, WireTag::StringShort);
        assert_range(0x34..=0x37, WireTag::BinaryShort);
        assert_range(0x38..=0x3f, WireTag::LongShort);
        assert_range(0x60..=0x6f, WireTag::ObjectDirect);
        assert_range(0x70..=0x77, WireTag::ListDirect);
        assert_range(0x78..=0x7f, WireTag::ListDirectUntyped);
        assert_range(0x80..=0xbf, WireTag::IntDirect);
        assert_range(0xc0..=0xcf, WireTag::IntByte);
        assert_range(0xd0..=0xd7, WireTag::IntShort);
        assert_range(0xd8..=0xef, WireTag::LongDirect);
        assert_range(0xf0..=0xff, WireTag::LongByte);
    }

    #[test]
    fn test_letter_tags() {
        assert_eq!(classify(b'N'), WireTag::Null);
        assert_eq!(classify(b'T'), WireTag::True);
        assert_eq!(classify(b'F'), WireTag::False);
        assert_eq!(classify(b'Z'), WireTag::End);
        assert_eq!(classify(b'C'), WireTag::ClassDef);
        assert_eq!(classify(b'H'), WireTag::MapUntyped);
        assert_eq!(classify(b'M'), WireTag::Map);
        assert_eq!(classify(0x51), WireTag::Ref);
        assert_eq!(classify(0x59), WireTag::LongInt);
        assert_eq!(classify(0x4a), WireTag::Date);
        assert_eq!(classify(0x4b), WireTag::DateMinute);

        for reserved in [b'@', b'E', b'G', b'P'] {
            assert_eq!(classify(reserved), WireTag::Reserved);
        }
    }

    #[test]
    fn test_direct_bias() {
        // direct forms place zero in the middle of their tag range
        assert_eq!(classify((INT_DIRECT_MIN + BC_INT_ZERO as i32) as u8), WireTag::IntDirect);
        assert_eq!(classify((INT_DIRECT_MAX + BC_INT_ZERO as i32) as u8), WireTag::IntDirect);
        assert_eq!(classify((LONG_DIRECT_MIN + BC_LONG_ZERO as i64) as u8), WireTag::LongDirect);
        assert_eq!(classify((LONG_DIRECT_MAX + BC_LONG_ZERO as i64) as u8), WireTag::LongDirect);
    }
}
