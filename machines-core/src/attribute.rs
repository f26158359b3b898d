//! Attribute values and the types describing their shape.
//!
//! Values are persisted as `{"kind": ..., "payload": ...}` pairs so a decoder
//! can dispatch on `kind` before decoding the payload:
//!
//! ```json
//! {"kind": "enumerated", "payload": {"value": "Initial", "valid_values": ["Initial", "Suspended"]}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Source language of an expression or code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Swift,
    Vhdl,
    C,
    Cxx,
}

/// A named slot with a declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: AttributeType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Describes the shape an [`AttributeValue`] must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AttributeType {
    Bool,
    Integer,
    Float,
    Expression { language: Language },
    Line,
    Code { language: Language },
    Text,
    Collection { element: Box<AttributeType> },
    Complex { fields: Vec<Field> },
    Enumerated { valid_values: BTreeSet<String> },
    EnumerableCollection { valid_values: BTreeSet<String> },
    Table { columns: Vec<Field> },
}

impl AttributeType {
    pub fn expression(language: Language) -> Self {
        AttributeType::Expression { language }
    }

    pub fn code(language: Language) -> Self {
        AttributeType::Code { language }
    }

    pub fn collection(element: AttributeType) -> Self {
        AttributeType::Collection {
            element: Box::new(element),
        }
    }

    pub fn enumerated<I, S>(valid_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeType::Enumerated {
            valid_values: valid_values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn enumerable_collection<I, S>(valid_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeType::EnumerableCollection {
            valid_values: valid_values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn table(columns: Vec<Field>) -> Self {
        AttributeType::Table { columns }
    }

    /// Persisted kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeType::Bool => "bool",
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::Expression { .. } => "expression",
            AttributeType::Line => "line",
            AttributeType::Code { .. } => "code",
            AttributeType::Text => "text",
            AttributeType::Collection { .. } => "collection",
            AttributeType::Complex { .. } => "complex",
            AttributeType::Enumerated { .. } => "enumerated",
            AttributeType::EnumerableCollection { .. } => "enumerableCollection",
            AttributeType::Table { .. } => "table",
        }
    }

    /// Returns true for single-line scalar types, the only types a table cell may hold.
    pub fn is_line(&self) -> bool {
        matches!(
            self,
            AttributeType::Bool
                | AttributeType::Integer
                | AttributeType::Float
                | AttributeType::Expression { .. }
                | AttributeType::Line
                | AttributeType::Enumerated { .. }
        )
    }

    /// Compares shapes, ignoring the valid-choice sets of enumerated types.
    ///
    /// Valid choices are re-derived by triggers, so two enumerations over
    /// different choice sets still have the same shape.
    pub fn same_shape(&self, other: &AttributeType) -> bool {
        match (self, other) {
            (AttributeType::Collection { element: a }, AttributeType::Collection { element: b }) => {
                a.same_shape(b)
            }
            (AttributeType::Complex { fields: a }, AttributeType::Complex { fields: b })
            | (AttributeType::Table { columns: a }, AttributeType::Table { columns: b }) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(a, b)| a.name == b.name && a.ty.same_shape(&b.ty))
            }
            (AttributeType::Enumerated { .. }, AttributeType::Enumerated { .. })
            | (
                AttributeType::EnumerableCollection { .. },
                AttributeType::EnumerableCollection { .. },
            ) => true,
            (a, b) => a == b,
        }
    }

    /// Builds the empty value of this type.
    pub fn default_value(&self) -> AttributeValue {
        match self {
            AttributeType::Bool => AttributeValue::Bool(false),
            AttributeType::Integer => AttributeValue::Integer(0),
            AttributeType::Float => AttributeValue::Float(0.0),
            AttributeType::Expression { language } => AttributeValue::Expression {
                expression: String::new(),
                language: *language,
            },
            AttributeType::Line => AttributeValue::Line(String::new()),
            AttributeType::Code { language } => AttributeValue::Code {
                code: String::new(),
                language: *language,
            },
            AttributeType::Text => AttributeValue::Text(String::new()),
            AttributeType::Collection { element } => AttributeValue::Collection {
                values: Vec::new(),
                element: (**element).clone(),
            },
            AttributeType::Complex { fields } => AttributeValue::Complex {
                values: fields
                    .iter()
                    .map(|f| (f.name.clone(), f.ty.default_value()))
                    .collect(),
                fields: fields.clone(),
            },
            AttributeType::Enumerated { valid_values } => AttributeValue::Enumerated {
                value: valid_values.iter().next().cloned().unwrap_or_default(),
                valid_values: valid_values.clone(),
            },
            AttributeType::EnumerableCollection { valid_values } => {
                AttributeValue::EnumerableCollection {
                    values: BTreeSet::new(),
                    valid_values: valid_values.clone(),
                }
            }
            AttributeType::Table { columns } => AttributeValue::Table {
                rows: Vec::new(),
                columns: columns.clone(),
            },
        }
    }
}

/// A value stored under an attribute key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Expression {
        expression: String,
        language: Language,
    },
    Line(String),
    Code {
        code: String,
        language: Language,
    },
    Text(String),
    Collection {
        values: Vec<AttributeValue>,
        element: AttributeType,
    },
    Complex {
        values: BTreeMap<String, AttributeValue>,
        fields: Vec<Field>,
    },
    Enumerated {
        value: String,
        valid_values: BTreeSet<String>,
    },
    EnumerableCollection {
        values: BTreeSet<String>,
        valid_values: BTreeSet<String>,
    },
    Table {
        rows: Vec<Vec<AttributeValue>>,
        columns: Vec<Field>,
    },
}

// Floats compare by bit pattern so equality stays structural (NaN == NaN).
impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        use AttributeValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (
                Expression {
                    expression: a,
                    language: la,
                },
                Expression {
                    expression: b,
                    language: lb,
                },
            ) => a == b && la == lb,
            (Line(a), Line(b)) | (Text(a), Text(b)) => a == b,
            (
                Code {
                    code: a,
                    language: la,
                },
                Code {
                    code: b,
                    language: lb,
                },
            ) => a == b && la == lb,
            (
                Collection {
                    values: a,
                    element: ea,
                },
                Collection {
                    values: b,
                    element: eb,
                },
            ) => a == b && ea == eb,
            (
                Complex {
                    values: a,
                    fields: fa,
                },
                Complex {
                    values: b,
                    fields: fb,
                },
            ) => a == b && fa == fb,
            (
                Enumerated {
                    value: a,
                    valid_values: va,
                },
                Enumerated {
                    value: b,
                    valid_values: vb,
                },
            ) => a == b && va == vb,
            (
                EnumerableCollection {
                    values: a,
                    valid_values: va,
                },
                EnumerableCollection {
                    values: b,
                    valid_values: vb,
                },
            ) => a == b && va == vb,
            (
                Table {
                    rows: a,
                    columns: ca,
                },
                Table {
                    rows: b,
                    columns: cb,
                },
            ) => a == b && ca == cb,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl AttributeValue {
    pub fn line(s: impl Into<String>) -> Self {
        AttributeValue::Line(s.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        AttributeValue::Text(s.into())
    }

    pub fn expression(expression: impl Into<String>, language: Language) -> Self {
        AttributeValue::Expression {
            expression: expression.into(),
            language,
        }
    }

    pub fn code(code: impl Into<String>, language: Language) -> Self {
        AttributeValue::Code {
            code: code.into(),
            language,
        }
    }

    pub fn enumerated<I, S>(value: impl Into<String>, valid_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeValue::Enumerated {
            value: value.into(),
            valid_values: valid_values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn enumerable_collection<I, J, S, T>(values: I, valid_values: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        AttributeValue::EnumerableCollection {
            values: values.into_iter().map(Into::into).collect(),
            valid_values: valid_values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn collection(element: AttributeType, values: Vec<AttributeValue>) -> Self {
        AttributeValue::Collection { values, element }
    }

    pub fn table(columns: Vec<Field>, rows: Vec<Vec<AttributeValue>>) -> Self {
        AttributeValue::Table { rows, columns }
    }

    /// Persisted kind name, identical to the kind of [`Self::attribute_type`].
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Float(_) => "float",
            AttributeValue::Expression { .. } => "expression",
            AttributeValue::Line(_) => "line",
            AttributeValue::Code { .. } => "code",
            AttributeValue::Text(_) => "text",
            AttributeValue::Collection { .. } => "collection",
            AttributeValue::Complex { .. } => "complex",
            AttributeValue::Enumerated { .. } => "enumerated",
            AttributeValue::EnumerableCollection { .. } => "enumerableCollection",
            AttributeValue::Table { .. } => "table",
        }
    }

    /// Derives the type this value currently has.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::Bool(_) => AttributeType::Bool,
            AttributeValue::Integer(_) => AttributeType::Integer,
            AttributeValue::Float(_) => AttributeType::Float,
            AttributeValue::Expression { language, .. } => AttributeType::Expression {
                language: *language,
            },
            AttributeValue::Line(_) => AttributeType::Line,
            AttributeValue::Code { language, .. } => AttributeType::Code {
                language: *language,
            },
            AttributeValue::Text(_) => AttributeType::Text,
            AttributeValue::Collection { element, .. } => AttributeType::collection(element.clone()),
            AttributeValue::Complex { fields, .. } => AttributeType::Complex {
                fields: fields.clone(),
            },
            AttributeValue::Enumerated { valid_values, .. } => AttributeType::Enumerated {
                valid_values: valid_values.clone(),
            },
            AttributeValue::EnumerableCollection { valid_values, .. } => {
                AttributeType::EnumerableCollection {
                    valid_values: valid_values.clone(),
                }
            }
            AttributeValue::Table { columns, .. } => AttributeType::Table {
                columns: columns.clone(),
            },
        }
    }

    /// Returns true if this value has the shape `ty` describes.
    ///
    /// Choice membership is checked separately by [`Self::has_valid_choices`].
    pub fn conforms_to(&self, ty: &AttributeType) -> bool {
        match (self, ty) {
            (AttributeValue::Bool(_), AttributeType::Bool)
            | (AttributeValue::Integer(_), AttributeType::Integer)
            | (AttributeValue::Float(_), AttributeType::Float)
            | (AttributeValue::Line(_), AttributeType::Line)
            | (AttributeValue::Text(_), AttributeType::Text)
            | (AttributeValue::Enumerated { .. }, AttributeType::Enumerated { .. })
            | (
                AttributeValue::EnumerableCollection { .. },
                AttributeType::EnumerableCollection { .. },
            ) => true,
            (
                AttributeValue::Expression { language, .. },
                AttributeType::Expression { language: expected },
            )
            | (AttributeValue::Code { language, .. }, AttributeType::Code { language: expected }) => {
                language == expected
            }
            (AttributeValue::Collection { values, element }, AttributeType::Collection { element: expected }) => {
                element.same_shape(expected) && values.iter().all(|v| v.conforms_to(expected))
            }
            (AttributeValue::Complex { values, .. }, AttributeType::Complex { fields }) => {
                values.len() == fields.len()
                    && fields.iter().all(|f| {
                        values
                            .get(&f.name)
                            .map(|v| v.conforms_to(&f.ty))
                            .unwrap_or(false)
                    })
            }
            (AttributeValue::Table { rows, columns: own }, AttributeType::Table { columns }) => {
                AttributeType::table(own.clone()).same_shape(&AttributeType::table(columns.clone()))
                    && rows.iter().all(|row| row_conforms(row, columns))
            }
            _ => false,
        }
    }

    /// Returns true if every enumerated choice, at any depth, is one of its valid choices.
    pub fn has_valid_choices(&self) -> bool {
        match self {
            AttributeValue::Enumerated {
                value,
                valid_values,
            } => valid_values.contains(value),
            AttributeValue::EnumerableCollection {
                values,
                valid_values,
            } => values.is_subset(valid_values),
            AttributeValue::Collection { values, .. } => values.iter().all(Self::has_valid_choices),
            AttributeValue::Complex { values, .. } => values.values().all(Self::has_valid_choices),
            AttributeValue::Table { rows, .. } => {
                rows.iter().flatten().all(Self::has_valid_choices)
            }
            _ => true,
        }
    }

    /// Returns true if every float, at any depth, is finite.
    ///
    /// JSON has no NaN or infinity, so only finite floats survive encoding.
    pub fn is_finite(&self) -> bool {
        match self {
            AttributeValue::Float(f) => f.is_finite(),
            AttributeValue::Collection { values, .. } => values.iter().all(Self::is_finite),
            AttributeValue::Complex { values, .. } => values.values().all(Self::is_finite),
            AttributeValue::Table { rows, .. } => rows.iter().flatten().all(Self::is_finite),
            _ => true,
        }
    }

    /// Single-line textual form used by validation rules; `None` for block values.
    pub fn as_text(&self) -> Option<String> {
        match self {
            AttributeValue::Bool(b) => Some(b.to_string()),
            AttributeValue::Integer(i) => Some(i.to_string()),
            AttributeValue::Float(f) => Some(f.to_string()),
            AttributeValue::Expression { expression, .. } => Some(expression.clone()),
            AttributeValue::Line(s) | AttributeValue::Text(s) => Some(s.clone()),
            AttributeValue::Code { code, .. } => Some(code.clone()),
            AttributeValue::Enumerated { value, .. } => Some(value.clone()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Number of items or rows held by a block value.
    pub fn len(&self) -> Option<usize> {
        match self {
            AttributeValue::Collection { values, .. } => Some(values.len()),
            AttributeValue::Table { rows, .. } => Some(rows.len()),
            AttributeValue::Complex { values, .. } => Some(values.len()),
            AttributeValue::EnumerableCollection { values, .. } => Some(values.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.len() {
            Some(n) => n == 0,
            None => self.as_text().map(|s| s.is_empty()).unwrap_or(false),
        }
    }

    /// Table rows, if this is a table.
    pub fn rows(&self) -> Option<&[Vec<AttributeValue>]> {
        match self {
            AttributeValue::Table { rows, .. } => Some(rows),
            _ => None,
        }
    }

    /// Current choice of an enumerated value.
    pub fn choice(&self) -> Option<&str> {
        match self {
            AttributeValue::Enumerated { value, .. } => Some(value),
            _ => None,
        }
    }
}

pub(crate) fn row_conforms(row: &[AttributeValue], columns: &[Field]) -> bool {
    row.len() == columns.len() && row.iter().zip(columns).all(|(v, c)| v.conforms_to(&c.ty))
}
