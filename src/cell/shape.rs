//! The shape tag lattice
//!
//! A cell's shape says which representation it currently holds.
//! Shapes only ever widen: promotion adds capability and an attempt
//! to move down the lattice is a caller bug, not a conversion.

/// Allocation class of a cell body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyClass {
    /// String bytes plus cached numeric slots
    String,
    /// String/numeric slots plus magic chain, alias and class identity
    Extended,
    /// Ordered sequence of owned references
    List,
    /// Key-ordered mapping of owned references
    Map,
}

/// Shape tag: a cell's position in the promotion lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Undefined; no payload
    Empty,
    /// Inline integer in the head
    Int,
    /// Inline float in the head
    Float,
    /// String body
    Str,
    /// String body with an integer cache
    StrInt,
    /// String body with a float cache
    StrFloat,
    /// String/numeric slots plus metadata chain and class identity
    Extended,
    /// Aggregate: ordered sequence
    List,
    /// Aggregate: keyed mapping
    Map,
    /// Callable value (extended family)
    Callable,
    /// External handle (extended family)
    Handle,
}

impl Shape {
    /// Position in the lattice; top-tier shapes share a rank and are
    /// mutually incomparable
    pub fn rank(self) -> u8 {
        match self {
            Shape::Empty => 0,
            Shape::Int => 1,
            Shape::Float => 2,
            Shape::Str => 3,
            Shape::StrInt => 4,
            Shape::StrFloat => 5,
            Shape::Extended => 6,
            Shape::List | Shape::Map | Shape::Callable | Shape::Handle => 7,
        }
    }

    /// Lattice order: may a cell of this shape be promoted to `other`?
    pub fn le(self, other: Shape) -> bool {
        self == other || self.rank() < other.rank()
    }

    /// Allocation class of the body this shape requires, if any
    pub fn body_class(self) -> Option<BodyClass> {
        match self {
            Shape::Empty | Shape::Int | Shape::Float => None,
            Shape::Str | Shape::StrInt | Shape::StrFloat => Some(BodyClass::String),
            Shape::Extended | Shape::Callable | Shape::Handle => Some(BodyClass::Extended),
            Shape::List => Some(BodyClass::List),
            Shape::Map => Some(BodyClass::Map),
        }
    }

    pub fn is_aggregate(self) -> bool {
        matches!(self, Shape::List | Shape::Map)
    }

    /// Shapes that may sit directly on a static interned buffer
    pub fn supports_static_buffer(self) -> bool {
        matches!(self, Shape::Str | Shape::StrInt | Shape::StrFloat)
    }

    /// Join with "holds an integer": the narrowest shape ≥ self that
    /// can store an integer value
    pub fn with_integer(self) -> Shape {
        match self {
            Shape::Empty | Shape::Int => Shape::Int,
            // an inline float cell needs numeric slots for both
            Shape::Float => Shape::StrFloat,
            Shape::Str | Shape::StrInt => Shape::StrInt,
            other => other,
        }
    }

    /// Join with "holds a float"
    pub fn with_float(self) -> Shape {
        match self {
            Shape::Empty | Shape::Float => Shape::Float,
            Shape::Int => Shape::StrFloat,
            Shape::Str | Shape::StrInt | Shape::StrFloat => Shape::StrFloat,
            other => other,
        }
    }

    /// Join with "holds a string"
    pub fn with_string(self) -> Shape {
        match self {
            Shape::Empty | Shape::Str => Shape::Str,
            Shape::Int | Shape::StrInt => Shape::StrInt,
            Shape::Float | Shape::StrFloat => Shape::StrFloat,
            other => other,
        }
    }
}
