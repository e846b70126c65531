//! Structs: a tuple layout with a name per field.

use super::tuple::TupleType;
use super::{PropertyValue, TypeProperty};
use crate::ndtype::{NdType, TypeVarMap};
use crate::shape::IndexRange;
use crate::{DTypeError, Result};
use std::fmt;

/// `{name0 : T0, name1 : T1, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    names: Vec<String>,
    tuple: TupleType,
}

fn check_names(names: &[String], nfields: usize) -> Result<()> {
    if names.len() != nfields {
        return Err(DTypeError::InvalidArgument(format!(
            "{} field names given for {} field types",
            names.len(),
            nfields
        )));
    }
    Ok(())
}

impl StructType {
    /// A struct with the standard layout.
    pub fn new(names: Vec<String>, fields: Vec<NdType>, variadic: bool) -> Result<Self> {
        check_names(&names, fields.len())?;
        Ok(StructType {
            names,
            tuple: TupleType::new(fields, variadic)?,
        })
    }

    /// A struct with caller-supplied field offsets, size and alignment.
    pub fn with_layout(
        names: Vec<String>,
        fields: Vec<NdType>,
        offsets: Vec<usize>,
        data_size: usize,
        alignment: usize,
    ) -> Result<Self> {
        check_names(&names, fields.len())?;
        Ok(StructType {
            names,
            tuple: TupleType::with_layout(fields, offsets, data_size, alignment)?,
        })
    }

    #[inline]
    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(String::as_str)
    }

    /// The positional layout shared with tuples.
    #[inline]
    pub fn tuple(&self) -> &TupleType {
        &self.tuple
    }

    /// Position of the first field called `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub(crate) fn matches(&self, candidate: &StructType, tvars: &mut TypeVarMap) -> bool {
        let n = self.names.len();
        candidate.names.len() >= n
            && self.names[..] == candidate.names[..n]
            && self.tuple.matches_fields(&candidate.tuple, tvars)
    }

    pub(crate) fn apply_linear_index(
        &self,
        this: &NdType,
        indices: &[IndexRange],
        current_i: usize,
        root: &NdType,
    ) -> Result<NdType> {
        self.tuple
            .apply_linear_index(this, indices, current_i, root, |selected, fields| {
                let names = selected.iter().map(|&i| self.names[i].clone()).collect();
                NdType::struct_type(names, fields)
            })
    }

    pub(crate) fn elwise_property_index(&self, tp: &NdType, name: &str) -> Result<usize> {
        self.field_index(name)
            .ok_or_else(|| DTypeError::UnknownProperty {
                tp: tp.to_string(),
                name: name.to_string(),
            })
    }

    pub(crate) fn elwise_property_type(&self, index: usize) -> Option<NdType> {
        self.tuple.field_type(index).map(NdType::value_type)
    }

    pub(crate) fn arrmeta_debug_print(
        &self,
        meta: &[u8],
        out: &mut dyn fmt::Write,
        indent: &str,
    ) -> fmt::Result {
        self.tuple
            .arrmeta_debug_print("struct", Some(&self.names), meta, out, indent)
    }
}

fn field_names_property(tp: &NdType) -> Result<PropertyValue> {
    let st = expect_struct(tp)?;
    Ok(PropertyValue::Names(st.names.clone()))
}

fn field_types_property(tp: &NdType) -> Result<PropertyValue> {
    let st = expect_struct(tp)?;
    Ok(PropertyValue::Types(st.tuple.fields().to_vec()))
}

fn arrmeta_offsets_property(tp: &NdType) -> Result<PropertyValue> {
    let st = expect_struct(tp)?;
    Ok(PropertyValue::Offsets(st.tuple.arrmeta_offsets().to_vec()))
}

fn expect_struct(tp: &NdType) -> Result<&StructType> {
    tp.as_struct()
        .ok_or_else(|| DTypeError::InvalidArgument(format!("{tp} is not a struct")))
}

/// Type-level properties of structs.
pub(crate) const STRUCT_TYPE_PROPERTIES: [TypeProperty; 3] = [
    TypeProperty {
        name: "field_names",
        getter: field_names_property,
    },
    TypeProperty {
        name: "field_types",
        getter: field_types_property,
    },
    TypeProperty {
        name: "arrmeta_offsets",
        getter: arrmeta_offsets_property,
    },
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_field_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_identifier(name) {
        return f.write_str(name);
    }
    f.write_str("'")?;
    for c in name.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("'")
}

impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, tp)) in self.names.iter().zip(self.tuple.fields()).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_field_name(f, name)?;
            write!(f, " : {tp}")?;
        }
        if self.tuple.is_variadic() {
            f.write_str(if self.names.is_empty() { "..." } else { ", ..." })?;
        }
        f.write_str("}")
    }
}
