use strum::{Display, EnumIter, EnumString};

use super::ty::{ScalarKind, Ty};

/// The type names a source program can spell. `int` is accepted as an alias
/// of `int32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum PrimitiveKind {
    #[strum(serialize = "int8")]
    Int8,
    #[strum(serialize = "int16")]
    Int16,
    #[strum(to_string = "int32", serialize = "int")]
    Int32,
    #[strum(serialize = "int64")]
    Int64,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "void")]
    Void,
}

impl PrimitiveKind {
    pub fn scalar_kind(self) -> ScalarKind {
        match self {
            PrimitiveKind::Int8
            | PrimitiveKind::Int16
            | PrimitiveKind::Int32
            | PrimitiveKind::Int64 => ScalarKind::Int,
            PrimitiveKind::Float | PrimitiveKind::Double => ScalarKind::Float,
            PrimitiveKind::Bool => ScalarKind::Bool,
            PrimitiveKind::Void => ScalarKind::Void,
        }
    }

    /// Width in bits
    pub fn width(self) -> u8 {
        match self {
            PrimitiveKind::Int8 => 8,
            PrimitiveKind::Int16 => 16,
            PrimitiveKind::Int32 | PrimitiveKind::Float => 32,
            PrimitiveKind::Int64 | PrimitiveKind::Double => 64,
            PrimitiveKind::Bool => 1,
            PrimitiveKind::Void => 0,
        }
    }

    /// Maps a scalar descriptor back onto a spellable type name. Returns `None`
    /// for widths the source language has no name for (e.g. a 16 bit float).
    pub fn from_scalar(kind: ScalarKind, width: u8) -> Option<Self> {
        match (kind, width) {
            (ScalarKind::Int, 8) => Some(PrimitiveKind::Int8),
            (ScalarKind::Int, 16) => Some(PrimitiveKind::Int16),
            (ScalarKind::Int, 32) => Some(PrimitiveKind::Int32),
            (ScalarKind::Int, 64) => Some(PrimitiveKind::Int64),
            (ScalarKind::Float, 32) => Some(PrimitiveKind::Float),
            (ScalarKind::Float, 64) => Some(PrimitiveKind::Double),
            (ScalarKind::Bool, _) => Some(PrimitiveKind::Bool),
            (ScalarKind::Void, _) => Some(PrimitiveKind::Void),
            _ => None,
        }
    }

    pub fn ty(self) -> Ty {
        Ty::scalar(self.scalar_kind(), self.width())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn parses_source_type_names() {
        assert_eq!(PrimitiveKind::from_str("int"), Ok(PrimitiveKind::Int32));
        assert_eq!(PrimitiveKind::from_str("int32"), Ok(PrimitiveKind::Int32));
        assert_eq!(PrimitiveKind::from_str("double"), Ok(PrimitiveKind::Double));
        assert!(PrimitiveKind::from_str("uint32").is_err());
        assert_eq!(PrimitiveKind::Int32.to_string(), "int32");
    }

    #[test]
    fn scalar_mapping_round_trips_for_every_name() {
        for primitive in PrimitiveKind::iter() {
            assert_eq!(
                PrimitiveKind::from_scalar(primitive.scalar_kind(), primitive.width()),
                Some(primitive)
            );
        }
    }

    #[test]
    fn int16_is_sixteen_bits_wide() {
        assert_eq!(PrimitiveKind::Int16.width(), 16);
        assert_eq!(PrimitiveKind::from_scalar(ScalarKind::Float, 16), None);
    }
}
