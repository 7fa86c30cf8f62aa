//! Parameter list macros.
//!
//! These macros build the positional parameter lists the runner binds,
//! converting each element with `From`, so literals of different types can be
//! mixed in one list.

/// Build a `Vec<Value>` of positional parameters.
///
/// # Example
///
/// ```
/// use query_runner::models::Value;
/// use query_runner::params;
///
/// let params = params![1, "bob", None::<i64>];
/// assert_eq!(params, vec![Value::Int(1), Value::from("bob"), Value::Null]);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::Value::from($value)),+]
    };
}

/// Build a `Vec<Param>` for calls, mixing plain values and OUT parameters.
///
/// # Example
///
/// ```
/// use query_runner::call_params;
/// use query_runner::models::{OutParameter, SqlType};
///
/// let params = call_params![7, OutParameter::new(SqlType::Integer)];
/// assert_eq!(params.len(), 2);
/// assert!(params[1].as_out().is_some());
/// ```
#[macro_export]
macro_rules! call_params {
    () => {
        ::std::vec::Vec::<$crate::models::Param>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::Param::from($value)),+]
    };
}

pub use call_params;
pub use params;
