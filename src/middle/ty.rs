//! Scalar type descriptors produced by type inference. A node's type is a
//! [`TypeList`] since declarations, maps and functions may yield more than one
//! value.

use super::primitive::PrimitiveKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ScalarKind {
    Int,
    Float,
    Bool,
    Void,
}

/// One scalar value type. The array and pointer flags are independent: an
/// array argument rewritten into a pointer to its elements keeps `is_array`
/// and gains `is_pointer`, while a scalar passed by reference only has
/// `is_pointer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ty {
    pub kind: ScalarKind,
    /// Width in bits
    pub width: u8,
    pub is_array: bool,
    pub is_pointer: bool,
}

pub type TypeList = Vec<Ty>;

impl Ty {
    pub const BOOL: Ty = Ty::scalar(ScalarKind::Bool, 1);
    pub const INT32: Ty = Ty::scalar(ScalarKind::Int, 32);
    pub const FLOAT: Ty = Ty::scalar(ScalarKind::Float, 32);
    pub const VOID: Ty = Ty::scalar(ScalarKind::Void, 0);

    pub const fn scalar(kind: ScalarKind, width: u8) -> Self {
        Self {
            kind,
            width,
            is_array: false,
            is_pointer: false,
        }
    }

    /// The type of a single element, with both the array and pointer flags
    /// cleared
    pub fn element(self) -> Self {
        Self::scalar(self.kind, self.width)
    }

    pub fn array(self) -> Self {
        Self {
            is_array: true,
            ..self
        }
    }

    pub fn pointer(self) -> Self {
        Self {
            is_pointer: true,
            ..self
        }
    }

    pub fn is_scalar(self) -> bool {
        !self.is_array && !self.is_pointer
    }

    pub fn primitive(self) -> Option<PrimitiveKind> {
        PrimitiveKind::from_scalar(self.kind, self.width)
    }
}

/// Result type of arithmetic between two scalars. Floats win over everything
/// else, integers win over booleans, and the width is the wider of the two.
pub fn promote(lhs: Ty, rhs: Ty) -> Ty {
    let kind = if lhs.kind == ScalarKind::Float || rhs.kind == ScalarKind::Float {
        ScalarKind::Float
    } else if lhs.kind == rhs.kind {
        lhs.kind
    } else if lhs.kind == ScalarKind::Int || rhs.kind == ScalarKind::Int {
        ScalarKind::Int
    } else {
        lhs.kind
    };

    Ty::scalar(kind, lhs.width.max(rhs.width))
}

impl core::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.primitive() {
            Some(primitive) => primitive.to_string(),
            None => format!("{}{}", self.kind, self.width),
        };

        if self.is_pointer {
            write!(f, "*{name}")
        } else if self.is_array {
            write!(f, "[{name}]")
        } else {
            write!(f, "{name}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INT64: Ty = Ty::scalar(ScalarKind::Int, 64);
    const DOUBLE: Ty = Ty::scalar(ScalarKind::Float, 64);

    #[test]
    fn promotion_is_commutative() {
        let types = [Ty::INT32, INT64, Ty::FLOAT, DOUBLE];

        for a in types {
            for b in types {
                assert_eq!(promote(a, b), promote(b, a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn promotion_keeps_floats_and_widens() {
        let types = [Ty::INT32, INT64, Ty::FLOAT, DOUBLE];

        for a in types {
            for b in types {
                let promoted = promote(a, b);
                let either_float = a.kind == ScalarKind::Float || b.kind == ScalarKind::Float;

                assert_eq!(promoted.kind == ScalarKind::Float, either_float);
                assert_eq!(promoted.width, a.width.max(b.width));
            }
        }

        assert_eq!(promote(INT64, Ty::FLOAT), DOUBLE);
    }

    #[test]
    fn promotion_drops_array_and_pointer_flags() {
        let promoted = promote(Ty::INT32.array(), Ty::INT32.pointer());
        assert!(promoted.is_scalar());
    }

    #[test]
    fn displays_like_source_types() {
        assert_eq!(Ty::INT32.to_string(), "int32");
        assert_eq!(Ty::FLOAT.array().to_string(), "[float]");
        assert_eq!(Ty::INT32.array().pointer().to_string(), "*int32");
        assert_eq!(Ty::scalar(ScalarKind::Float, 16).to_string(), "float16");
    }
}
