//! Abstract syntax tree consumed by the compiler
//!
//! The AST is the contract with the front end: the parser and surface
//! type checker live upstream and hand the compiler a fully-formed
//! `Program`. Nodes carry exactly the information the core needs —
//! class shape, method flags, parameter defaults — with surface types
//! already erased except for generic parameter descriptors, which are
//! recorded on the class for introspection.

mod expression;

pub use expression::{ArrowBody, BinaryOp, Expression, Literal, TemplatePart, UnaryOp};

/// A complete program: the top level is a list of class and function
/// declarations.
#[derive(Debug, Clone)]
pub struct Program {
    /// Top-level statements
    pub statements: Vec<Statement>,
}

impl Program {
    /// Create a program from top-level statements
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}

/// A statement
#[derive(Debug, Clone)]
pub enum Statement {
    /// Class declaration
    Class(ClassDecl),
    /// Function declaration
    Function(FunctionDecl),
    /// Variable declaration with initializer
    Var(VarDecl),
    /// Return, with optional value
    Return(Option<Expression>),
    /// Conditional
    If {
        /// Branch condition
        condition: Expression,
        /// Statements run when the condition is truthy
        then_branch: Vec<Statement>,
        /// Statements run otherwise
        else_branch: Option<Vec<Statement>>,
    },
    /// While loop
    While {
        /// Loop condition
        condition: Expression,
        /// Loop body
        body: Vec<Statement>,
    },
    /// C-style for loop
    For {
        /// Initializer statement (variable declaration or expression)
        init: Option<Box<Statement>>,
        /// Loop condition; absent means always true
        test: Option<Expression>,
        /// Update expression evaluated after each iteration
        update: Option<Expression>,
        /// Loop body
        body: Vec<Statement>,
    },
    /// Protected region with a catch clause
    Try {
        /// Protected statements
        block: Vec<Statement>,
        /// Handler
        catch: CatchClause,
    },
    /// Throw an exception value
    Throw(Expression),
    /// Expression evaluated for effect
    Expression(Expression),
}

/// Catch clause of a try statement
#[derive(Debug, Clone)]
pub struct CatchClause {
    /// Name the thrown value is bound to
    pub param: String,
    /// Handler body
    pub body: Vec<Statement>,
}

/// Variable declaration
#[derive(Debug, Clone)]
pub struct VarDecl {
    /// Variable name
    pub name: String,
    /// Initializer expression
    pub init: Expression,
}

/// Top-level function declaration
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    /// Function name
    pub name: String,
    /// Parameters in declaration order
    pub params: Vec<Param>,
    /// Function body
    pub body: Vec<Statement>,
    /// True for `async` functions
    pub is_async: bool,
}

/// A declared parameter, with an optional default expression evaluated
/// when the caller supplies `undefined`
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Default expression
    pub default: Option<Expression>,
}

impl Param {
    /// A plain parameter with no default
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
        }
    }

    /// A parameter with a default expression
    pub fn with_default(name: &str, default: Expression) -> Self {
        Self {
            name: name.to_string(),
            default: Some(default),
        }
    }
}

/// Class declaration
#[derive(Debug, Clone)]
pub struct ClassDecl {
    /// Class name
    pub name: String,
    /// Superclass name, if the class extends another
    pub superclass: Option<String>,
    /// Generic parameter descriptors (semantics owned by the front end)
    pub generic_params: Vec<GenericParam>,
    /// True for `abstract class`
    pub is_abstract: bool,
    /// Field declarations in declaration order
    pub fields: Vec<FieldDecl>,
    /// Method declarations, including the constructor (named `constructor`)
    pub methods: Vec<MethodDecl>,
    /// Accessor declarations
    pub accessors: Vec<AccessorDecl>,
}

impl ClassDecl {
    /// A class with the given name and no members
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: None,
            generic_params: Vec::new(),
            is_abstract: false,
            fields: Vec::new(),
            methods: Vec::new(),
            accessors: Vec::new(),
        }
    }
}

/// Generic parameter with an optional constraint name
#[derive(Debug, Clone)]
pub struct GenericParam {
    /// Parameter name (e.g. `T`)
    pub name: String,
    /// Constraint name (the `extends` bound), if any
    pub constraint: Option<String>,
}

/// Field declaration
#[derive(Debug, Clone)]
pub struct FieldDecl {
    /// Field name
    pub name: String,
    /// Initializer, run in declaration order during construction (or
    /// static initialization for static fields)
    pub initializer: Option<Expression>,
    /// True for `static` fields
    pub is_static: bool,
}

/// Method declaration
#[derive(Debug, Clone)]
pub struct MethodDecl {
    /// Method name; `constructor` declares the constructor
    pub name: String,
    /// Parameters in declaration order
    pub params: Vec<Param>,
    /// Body statements; `None` for abstract methods
    pub body: Option<Vec<Statement>>,
    /// True for `static` methods
    pub is_static: bool,
    /// True for `async` methods
    pub is_async: bool,
    /// True for `abstract` methods (no body, trap on dispatch)
    pub is_abstract: bool,
    /// True when the method is marked `override`
    pub is_override: bool,
}

impl MethodDecl {
    /// A plain instance method
    pub fn new(name: &str, params: Vec<Param>, body: Vec<Statement>) -> Self {
        Self {
            name: name.to_string(),
            params,
            body: Some(body),
            is_static: false,
            is_async: false,
            is_abstract: false,
            is_override: false,
        }
    }

    /// Mark this method `override`
    pub fn overriding(mut self) -> Self {
        self.is_override = true;
        self
    }

    /// Mark this method `async`
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Mark this method `static`
    pub fn statically(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// An abstract method (declared signature, no body)
    pub fn abstract_method(name: &str, params: Vec<Param>) -> Self {
        Self {
            name: name.to_string(),
            params,
            body: None,
            is_static: false,
            is_async: false,
            is_abstract: true,
            is_override: false,
        }
    }
}

/// Accessor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    /// Property getter
    Get,
    /// Property setter
    Set,
}

/// Accessor declaration
#[derive(Debug, Clone)]
pub struct AccessorDecl {
    /// Getter or setter
    pub kind: AccessorKind,
    /// Property name
    pub name: String,
    /// Setter parameter name (setters only)
    pub setter_param: Option<String>,
    /// Body statements; `None` for abstract accessors
    pub body: Option<Vec<Statement>>,
    /// True for `abstract` accessors
    pub is_abstract: bool,
}
