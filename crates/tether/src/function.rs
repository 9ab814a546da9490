use serde::{Deserialize, Serialize};

use crate::{bytecode::Code, intern::StringId, signature::Signature};

/// A compiled `def` or `lambda`.
///
/// Functions are created once by the compiler and stored in [`Interns`](crate::intern::Interns),
/// runtime values refer to them by [`FunctionId`](crate::intern::FunctionId). Evaluated
/// default values and captured cells are per definition and live on the heap instead.
///
/// # Namespace Layout
///
/// ```text
/// [params...][other locals...]
/// ```
/// Variables shared with nested functions do not get a namespace slot (unless they
/// are parameters): they live in heap cells held by the frame, own cells first, then
/// the cells captured from enclosing functions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Function {
    /// The function name, `<lambda>` for lambdas.
    pub name: StringId,
    pub signature: Signature,
    pub code: Code,
    /// Number of namespace slots, parameters included.
    pub namespace_size: usize,
    /// One entry per own cell: the parameter slot whose value initializes it, if any.
    pub cell_param_slots: Vec<Option<usize>>,
    /// Number of cells captured from enclosing functions.
    pub free_var_count: usize,
}

impl Function {
    pub fn new(
        name: StringId,
        signature: Signature,
        code: Code,
        namespace_size: usize,
        cell_param_slots: Vec<Option<usize>>,
        free_var_count: usize,
    ) -> Self {
        Self {
            name,
            signature,
            code,
            namespace_size,
            cell_param_slots,
            free_var_count,
        }
    }

    /// Whether calls need cells captured at definition time.
    #[must_use]
    pub fn is_closure(&self) -> bool {
        self.free_var_count > 0
    }
}
