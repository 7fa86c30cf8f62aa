//! Stored procedure parameters.

use crate::error::DbResult;
use crate::models::value::{FromValue, SqlType, Value, ValueKind};
use std::fmt;

/// A parameter of a callable statement: a plain IN value or an OUT/INOUT marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    In(Value),
    Out(OutParameter),
}

impl Param {
    /// The OUT marker, if this is one.
    pub fn as_out(&self) -> Option<&OutParameter> {
        match self {
            Self::Out(out) => Some(out),
            Self::In(_) => None,
        }
    }

    pub fn as_out_mut(&mut self) -> Option<&mut OutParameter> {
        match self {
            Self::Out(out) => Some(out),
            Self::In(_) => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In(value) => write!(f, "{}", value),
            Self::Out(out) => write!(f, "{}", out),
        }
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Self::In(value)
    }
}

macro_rules! impl_param_from {
    ($($t:ty),+ $(,)?) => {
        $(
            impl From<$t> for Param {
                fn from(value: $t) -> Self {
                    Self::In(value.into())
                }
            }
        )+
    };
}

impl_param_from!(bool, i32, i64, u32, f64, &str, String, Vec<u8>);

impl From<OutParameter> for Param {
    fn from(out: OutParameter) -> Self {
        Self::Out(out)
    }
}

/// Marker for an OUT or INOUT parameter of a stored procedure call.
///
/// The runner registers `sql_type` for output before execution, binds the
/// optional IN value, and stores the value reported by the driver into the
/// marker once the call has succeeded.
///
/// ```
/// use query_runner::models::{OutParameter, SqlType};
///
/// let out = OutParameter::new(SqlType::Integer);
/// assert!(out.value().is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OutParameter {
    sql_type: SqlType,
    target: ValueKind,
    in_value: Option<Value>,
    value: Option<Value>,
}

impl OutParameter {
    /// An OUT parameter of `sql_type`, read back as the matching value kind.
    pub fn new(sql_type: SqlType) -> Self {
        Self {
            sql_type,
            target: sql_type.value_kind(),
            in_value: None,
            value: None,
        }
    }

    /// An INOUT parameter: `in_value` is bound as input as well.
    pub fn inout(sql_type: SqlType, in_value: impl Into<Value>) -> Self {
        Self {
            in_value: Some(in_value.into()),
            ..Self::new(sql_type)
        }
    }

    /// Override the kind the retrieved value is converted to.
    pub fn with_target(mut self, target: ValueKind) -> Self {
        self.target = target;
        self
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn target(&self) -> ValueKind {
        self.target
    }

    pub fn in_value(&self) -> Option<&Value> {
        self.in_value.as_ref()
    }

    /// The retrieved value; `None` until a call has succeeded.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The retrieved value converted to `T`. `Ok(None)` until a call has succeeded.
    pub fn get<T: FromValue>(&self) -> DbResult<Option<T>> {
        self.value.clone().map(T::from_value).transpose()
    }

    /// Store the retrieved value, converted to the target kind.
    pub fn set_value(&mut self, value: Value) -> DbResult<()> {
        self.value = Some(value.convert_to(self.target)?);
        Ok(())
    }

    /// Clear the retrieved value so the marker can be reused.
    pub fn reset(&mut self) {
        self.value = None;
    }
}

impl fmt::Display for OutParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutParameter{{sql_type={:?}", self.sql_type)?;
        if let Some(in_value) = &self.in_value {
            write!(f, ", in={}", in_value)?;
        }
        if let Some(value) = &self.value {
            write!(f, ", value={}", value)?;
        }
        write!(f, "}}")
    }
}
