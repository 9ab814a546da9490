//! The AST shared by the parser, the scope pass and the compiler.
//!
//! The parser produces these nodes with every [`Identifier`] unresolved; `prepare`
//! then fills in scopes and slots in place, and the compiler turns the tree into bytecode.

use num_bigint::BigInt;

use crate::{
    builtins::Builtins,
    exception_public::CodeRange,
    fstring::FStringPart,
    intern::StringId,
    namespace::NamespaceId,
    operators::{CmpOperator, Operator, UnaryOperator},
};

/// Indicates which namespace a variable reference belongs to.
///
/// This is determined at prepare time based on Python's scoping rules:
/// - Variables assigned in a function are Local (unless declared `global` or `nonlocal`)
/// - Everything at module level, and names a function neither assigns nor finds in an
///   enclosing function, are Global
/// - Variables shared between a function and the functions nested in it are accessed
///   through Cells, both in the defining function and in the capturing ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum NameScope {
    /// Variable is in the current frame's local namespace
    #[default]
    Local,
    /// Variable is in the module-level global namespace
    Global,
    /// Variable accessed through a heap cell; the id indexes the frame's cells.
    Cell,
}

/// An identifier (variable or function name) with source location and scope information.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Identifier {
    pub position: CodeRange,
    pub name_id: StringId,
    opt_namespace_id: Option<NamespaceId>,
    pub scope: NameScope,
}

impl Identifier {
    /// Creates a new identifier with unknown scope (to be resolved during prepare phase).
    pub fn new(name_id: StringId, position: CodeRange) -> Self {
        Self {
            name_id,
            position,
            opt_namespace_id: None,
            scope: NameScope::Local,
        }
    }

    /// Records where the prepare phase resolved this identifier to.
    pub fn resolve(&mut self, namespace_id: NamespaceId, scope: NameScope) {
        self.opt_namespace_id = Some(namespace_id);
        self.scope = scope;
    }

    pub fn namespace_id(&self) -> NamespaceId {
        self.opt_namespace_id.expect("Identifier not prepared with namespace_id")
    }
}

/// Values that can be produced purely by the parser.
#[derive(Debug, Clone)]
pub(crate) enum Literal {
    None,
    Bool(bool),
    Int(i64),
    /// An integer literal too large for `i64`.
    LongInt(BigInt),
    Float(f64),
    Str(StringId),
}

/// An expression in the AST.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    /// A builtin name that no program code ever rebinds; set by the prepare phase.
    Builtin(Builtins),
    Name(Identifier),
    Call {
        callable: Box<ExprLoc>,
        args: CallArgs,
    },
    /// `object.attr(args)`, compiled to a single method call.
    AttrCall {
        object: Box<ExprLoc>,
        attr: StringId,
        args: CallArgs,
    },
    Attr {
        object: Box<ExprLoc>,
        attr: StringId,
    },
    Op {
        left: Box<ExprLoc>,
        op: Operator,
        right: Box<ExprLoc>,
    },
    /// A comparison chain: `a < b <= c` evaluates `b` once and short-circuits.
    CmpOp {
        left: Box<ExprLoc>,
        ops: Vec<(CmpOperator, ExprLoc)>,
    },
    And(Box<ExprLoc>, Box<ExprLoc>),
    Or(Box<ExprLoc>, Box<ExprLoc>),
    Not(Box<ExprLoc>),
    Unary {
        op: UnaryOperator,
        operand: Box<ExprLoc>,
    },
    List(Vec<ExprLoc>),
    Tuple(Vec<ExprLoc>),
    Dict(Vec<(ExprLoc, ExprLoc)>),
    Subscript {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    /// `lower:upper:step` inside a subscript.
    Slice {
        lower: Option<Box<ExprLoc>>,
        upper: Option<Box<ExprLoc>>,
        step: Option<Box<ExprLoc>>,
    },
    FString(Vec<FStringPart>),
    /// Conditional expression: `body if test else orelse`
    IfElse {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        orelse: Box<ExprLoc>,
    },
    Lambda(Box<FunctionDef>),
    ListComp {
        elt: Box<ExprLoc>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<ExprLoc>,
        value: Box<ExprLoc>,
        generators: Vec<Comprehension>,
    },
    Await(Box<ExprLoc>),
}

/// An expression with its source location.
#[derive(Debug, Clone)]
pub(crate) struct ExprLoc {
    pub position: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self { position, expr }
    }
}

/// Arguments of a call site: positional first, then keywords.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallArgs {
    pub args: Vec<ExprLoc>,
    pub kwargs: Vec<(StringId, ExprLoc)>,
}

/// One `for target in iter if cond` clause of a comprehension.
#[derive(Debug, Clone)]
pub(crate) struct Comprehension {
    pub target: Target,
    pub iter: ExprLoc,
    pub ifs: Vec<ExprLoc>,
}

/// The left hand side of an assignment or a `for` loop.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Name(Identifier),
    /// `a, (b, c) = ...`, also written with list brackets.
    Tuple(Vec<Target>, CodeRange),
    Subscript {
        object: ExprLoc,
        index: ExprLoc,
        position: CodeRange,
    },
    Attr {
        object: ExprLoc,
        attr: StringId,
        position: CodeRange,
    },
}

impl Target {
    pub fn position(&self) -> CodeRange {
        match self {
            Self::Name(ident) => ident.position,
            Self::Tuple(_, position) | Self::Subscript { position, .. } | Self::Attr { position, .. } => *position,
        }
    }
}

/// A function parameter with its optional default.
#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: StringId,
    pub default: Option<ExprLoc>,
}

/// Where the prepare phase placed a function's variables.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeInfo {
    /// Index into the scope analysis tables, assigned in source order.
    pub scope_index: usize,
    /// Names of the namespace slots; parameters come first.
    pub local_names: Vec<StringId>,
    /// Own cell variables, then free variables captured from enclosing functions.
    pub cell_names: Vec<StringId>,
    /// For each own cell variable, the parameter slot that initializes it.
    pub cell_param_slots: Vec<Option<usize>>,
    /// For each free variable, its cell index in the enclosing function's frame.
    pub free_var_sources: Vec<usize>,
}

impl ScopeInfo {
    pub fn own_cell_count(&self) -> usize {
        self.cell_param_slots.len()
    }

    pub fn free_var_count(&self) -> usize {
        self.free_var_sources.len()
    }
}

/// A `def` statement or a `lambda` expression.
#[derive(Debug, Clone)]
pub(crate) struct FunctionDef {
    /// The name being bound; lambdas use `<lambda>` and bind nothing.
    pub name: Identifier,
    pub params: Vec<Param>,
    pub body: Vec<Node>,
    pub position: CodeRange,
    pub is_lambda: bool,
    pub scope: ScopeInfo,
}

/// One `except [type [as name]]:` clause.
#[derive(Debug, Clone)]
pub(crate) struct ExceptHandler {
    pub exc_type: Option<ExprLoc>,
    pub name: Option<Identifier>,
    pub body: Vec<Node>,
    pub position: CodeRange,
}

#[derive(Debug, Clone)]
pub(crate) struct Try {
    pub body: Vec<Node>,
    pub handlers: Vec<ExceptHandler>,
    pub or_else: Vec<Node>,
    pub finally: Vec<Node>,
    pub position: CodeRange,
}

/// A statement.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Expr(ExprLoc),
    Return(Option<ExprLoc>, CodeRange),
    Raise(Option<ExprLoc>, CodeRange),
    Assert {
        test: ExprLoc,
        msg: Option<ExprLoc>,
    },
    /// `a = b = value`: targets are assigned left to right.
    Assign {
        targets: Vec<Target>,
        value: ExprLoc,
    },
    OpAssign {
        target: Target,
        op: Operator,
        value: ExprLoc,
    },
    If {
        test: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    While {
        test: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    For {
        target: Target,
        iter: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    Break(CodeRange),
    Continue(CodeRange),
    Pass,
    FunctionDef(Box<FunctionDef>),
    Global(Vec<StringId>, CodeRange),
    Nonlocal(Vec<StringId>, CodeRange),
    Try(Box<Try>),
}
