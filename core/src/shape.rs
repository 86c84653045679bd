//! Structural inspection of serializable values.
//!
//! Walks a value through its `Serialize` impl without building an intermediate representation,
//! so floats keep their identity. `serde_json::Value` has no room for NaN or infinities and would
//! fold them into `null`.

use serde::Serialize;
use serde::ser;

/// What a walk over one value found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Shape {
    /// `None` or `()`, or a sequence/tuple made only of those.
    pub null_like: bool,
    /// A NaN or infinite float occurs anywhere in the value.
    pub non_finite: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub(crate) struct ShapeError(String);

impl ser::Error for ShapeError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

pub(crate) fn inspect<T: Serialize + ?Sized>(value: &T) -> Result<Shape, ShapeError> {
    let mut walk = Walk::default();
    let kind = value.serialize(&mut walk)?;
    Ok(Shape {
        null_like: matches!(kind, Kind::Nothing | Kind::NothingSeq),
        non_finite: walk.non_finite,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Nothing,
    NothingSeq,
    Value,
}

#[derive(Debug, Default)]
struct Walk {
    non_finite: bool,
}

#[derive(Debug)]
struct Compound<'a> {
    walk: &'a mut Walk,
    /// `Some` for sequences and tuples: whether every element so far was `Nothing`.
    nothing_only: Option<bool>,
}

impl<'a> Compound<'a> {
    fn sequence(walk: &'a mut Walk) -> Self {
        Self { walk, nothing_only: Some(true) }
    }

    fn other(walk: &'a mut Walk) -> Self {
        Self { walk, nothing_only: None }
    }

    fn visit<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ShapeError> {
        let kind = value.serialize(&mut *self.walk)?;
        if let Some(only) = &mut self.nothing_only {
            *only &= kind == Kind::Nothing;
        }
        Ok(())
    }

    fn finish(self) -> Result<Kind, ShapeError> {
        Ok(match self.nothing_only {
            Some(true) => Kind::NothingSeq,
            _ => Kind::Value,
        })
    }
}

macro_rules! scalar {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> Result<Kind, ShapeError> {
                Ok(Kind::Value)
            }
        )*
    };
}

impl<'a> ser::Serializer for &'a mut Walk {
    type Ok = Kind;
    type Error = ShapeError;
    type SerializeSeq = Compound<'a>;
    type SerializeTuple = Compound<'a>;
    type SerializeTupleStruct = Compound<'a>;
    type SerializeTupleVariant = Compound<'a>;
    type SerializeMap = Compound<'a>;
    type SerializeStruct = Compound<'a>;
    type SerializeStructVariant = Compound<'a>;

    scalar! {
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8],
        serialize_unit_struct: &'static str,
    }

    fn serialize_f32(self, v: f32) -> Result<Kind, ShapeError> {
        self.non_finite |= !v.is_finite();
        Ok(Kind::Value)
    }

    fn serialize_f64(self, v: f64) -> Result<Kind, ShapeError> {
        self.non_finite |= !v.is_finite();
        Ok(Kind::Value)
    }

    fn serialize_none(self) -> Result<Kind, ShapeError> {
        Ok(Kind::Nothing)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Kind, ShapeError> {
        value.serialize(self)?;
        Ok(Kind::Value)
    }

    fn serialize_unit(self) -> Result<Kind, ShapeError> {
        Ok(Kind::Nothing)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<Kind, ShapeError> {
        Ok(Kind::Value)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Kind, ShapeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<Kind, ShapeError> {
        value.serialize(self)?;
        Ok(Kind::Value)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Compound<'a>, ShapeError> {
        Ok(Compound::sequence(self))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Compound<'a>, ShapeError> {
        Ok(Compound::sequence(self))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, ShapeError> {
        Ok(Compound::other(self))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, ShapeError> {
        Ok(Compound::other(self))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Compound<'a>, ShapeError> {
        Ok(Compound::other(self))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, ShapeError> {
        Ok(Compound::other(self))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, ShapeError> {
        Ok(Compound::other(self))
    }
}

impl ser::SerializeSeq for Compound<'_> {
    type Ok = Kind;
    type Error = ShapeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ShapeError> {
        self.visit(value)
    }

    fn end(self) -> Result<Kind, ShapeError> {
        self.finish()
    }
}

impl ser::SerializeTuple for Compound<'_> {
    type Ok = Kind;
    type Error = ShapeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ShapeError> {
        self.visit(value)
    }

    fn end(self) -> Result<Kind, ShapeError> {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for Compound<'_> {
    type Ok = Kind;
    type Error = ShapeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ShapeError> {
        self.visit(value)
    }

    fn end(self) -> Result<Kind, ShapeError> {
        self.finish()
    }
}

impl ser::SerializeTupleVariant for Compound<'_> {
    type Ok = Kind;
    type Error = ShapeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ShapeError> {
        self.visit(value)
    }

    fn end(self) -> Result<Kind, ShapeError> {
        self.finish()
    }
}

impl ser::SerializeMap for Compound<'_> {
    type Ok = Kind;
    type Error = ShapeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), ShapeError> {
        self.visit(key)
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ShapeError> {
        self.visit(value)
    }

    fn end(self) -> Result<Kind, ShapeError> {
        self.finish()
    }
}

impl ser::SerializeStruct for Compound<'_> {
    type Ok = Kind;
    type Error = ShapeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), ShapeError> {
        self.visit(value)
    }

    fn end(self) -> Result<Kind, ShapeError> {
        self.finish()
    }
}

impl ser::SerializeStructVariant for Compound<'_> {
    type Ok = Kind;
    type Error = ShapeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), ShapeError> {
        self.visit(value)
    }

    fn end(self) -> Result<Kind, ShapeError> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn nothing_markers_are_null_like() {
        assert!(inspect(&None::<f64>).unwrap().null_like);
        assert!(inspect(&()).unwrap().null_like);
        assert!(inspect(&vec![None::<u8>, None]).unwrap().null_like);
        assert!(inspect(&(None::<u8>, None::<String>)).unwrap().null_like);
        assert!(inspect(&Vec::<u8>::new()).unwrap().null_like);
    }

    #[test]
    fn non_finite_floats_are_values() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let shape = inspect(&value).unwrap();
            assert!(!shape.null_like);
            assert!(shape.non_finite);
        }
        assert!(!inspect(&vec![f64::NAN]).unwrap().null_like);
        assert!(!inspect(&Some(f32::NAN)).unwrap().null_like);
    }

    #[test]
    fn finds_non_finite_floats_when_nested() {
        let mut map = BTreeMap::new();
        map.insert("limit", vec![Some(1.0), Some(f64::INFINITY)]);
        assert!(inspect(&map).unwrap().non_finite);
        assert!(!inspect(&(1.5, "x", [2.0f32])).unwrap().non_finite);
    }

    #[test]
    fn nested_sequences_are_not_null_like() {
        assert!(!inspect(&vec![vec![None::<u8>]]).unwrap().null_like);
        assert!(!inspect(&vec![None, Some(1)]).unwrap().null_like);
    }
}
