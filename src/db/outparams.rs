//! Copying OUT parameter values back to the caller.

use crate::db::driver::CallableStatement;
use crate::error::DbResult;
use crate::models::Param;

/// Store the value of every OUT marker in `params`, left to right.
///
/// Only called after the statement executed successfully; positions holding
/// plain values are left alone.
pub fn retrieve_out_parameters<S>(stmt: &mut S, params: &mut [Param]) -> DbResult<()>
where
    S: CallableStatement + ?Sized,
{
    for (i, param) in params.iter_mut().enumerate() {
        if let Some(out) = param.as_out_mut() {
            out.set_value(stmt.out_value(i + 1)?)?;
        }
    }
    Ok(())
}
