//! Operator helpers for the VM.
//!
//! Each pops its operands, applies the operator from [`crate::operators`] and pushes
//! the result.

use super::VM;
use crate::{
    exception_private::RunResult,
    io::PrintWriter,
    operators::{CmpOperator, Operator, UnaryOperator, binary_op, compare, inplace_op, unary_op},
    resource::ResourceTracker,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<'_, T, P> {
    pub(super) fn binary_op(&mut self, op: Operator) -> RunResult<()> {
        let rhs = self.pop();
        let lhs = self.pop();
        let result = binary_op(op, lhs, rhs, self.heap, self.interns)?;
        self.push(result);
        Ok(())
    }

    /// `+=` and friends; lists are extended in place, everything else rebinds.
    pub(super) fn inplace_op(&mut self, op: Operator) -> RunResult<()> {
        let rhs = self.pop();
        let lhs = self.pop();
        let result = inplace_op(op, lhs, rhs, self.heap, self.interns)?;
        self.push(result);
        Ok(())
    }

    pub(super) fn compare_op(&mut self, op: CmpOperator) -> RunResult<()> {
        let rhs = self.pop();
        let lhs = self.pop();
        let result = compare(op, lhs, rhs, self.heap, self.interns)?;
        self.push(Value::Bool(result));
        Ok(())
    }

    pub(super) fn unary_op(&mut self, op: UnaryOperator) -> RunResult<()> {
        let value = self.pop();
        let result = unary_op(op, value, self.heap)?;
        self.push(result);
        Ok(())
    }
}
