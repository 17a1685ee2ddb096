use std::fmt::Debug;

use quarry_error::Result;

use super::DbFunctionDescriptor;
use crate::expr::scalar::ScalarValue;

/// Evaluates scalar database functions outside of the database.
///
/// Used when a function call has only constant or parameter inputs and the
/// host wants to compute the value up front.
pub trait ScalarFunctionExecutor: Debug + Sync + Send {
    fn execute(&self, function: &DbFunctionDescriptor, args: &[ScalarValue]) -> Result<ScalarValue>;
}
