//! AST to executable-form compilation
//!
//! The pipeline walks a program AST in passes:
//!
//! 1. **Declare classes** — every class gets a registry descriptor, then
//!    superclass links are attached (forward references allowed).
//! 2. **Declare members** — every method, accessor, constructor, and
//!    top-level function signature reserves a handle in the function
//!    table, so bodies emitted later can reference peers and ancestors.
//!    `override` markers are validated once all signatures exist.
//! 3. **Emit bodies** — synchronous bodies lower to flat instruction
//!    lists; async bodies additionally get their await sites numbered
//!    and a resume table recorded.
//!
//! The registry is pre-seeded with `Error` and `TypeError`, compiled
//! through the same pipeline from synthesized declarations.

pub mod code;
pub mod lower;
pub mod registry;

use rustc_hash::FxHashMap;

use crate::ast::{
    self, AccessorKind, ClassDecl, Expression, MethodDecl, Param, Statement,
};
use crate::compiler::code::{ClassId, FnBody, FnId, FnKind};
use crate::compiler::lower::{BodyOpts, ConstructorInfo, Lowerer};
use crate::compiler::registry::{ClassRegistry, GenericParamDesc};
use crate::vm::program::Program;

/// Errors raised while loading a program.
///
/// Declaration-phase shape errors surface as parse errors, everything
/// later as type errors.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A class name was declared twice
    #[error("Parse Error: duplicate class '{0}'")]
    DuplicateClass(String),

    /// A class extends a name that is not a class
    #[error("Type Error: unknown superclass '{superclass}' of class '{class}'")]
    UnknownSuperclass {
        /// Declaring class
        class: String,
        /// The missing superclass name
        superclass: String,
    },

    /// `override` on a class with no superclass
    #[error("Parse Error: method '{method}' of class '{class}' is marked override but the class has no superclass")]
    OverrideWithoutSuperclass {
        /// Declaring class
        class: String,
        /// Offending method
        method: String,
    },

    /// `override` on a static method
    #[error("Parse Error: 'override' is not allowed on static method '{method}' of class '{class}'")]
    OverrideOnStatic {
        /// Declaring class
        class: String,
        /// Offending method
        method: String,
    },

    /// `override` on a constructor
    #[error("Parse Error: 'override' is not allowed on the constructor of class '{0}'")]
    OverrideOnConstructor(String),

    /// `override` with no same-named entry reachable through the chain
    #[error("Type Error: method '{method}' of class '{class}' is marked override but no ancestor declares it")]
    OverrideMismatch {
        /// Declaring class
        class: String,
        /// Offending method
        method: String,
    },

    /// Two members with the same name on one class
    #[error("Type Error: duplicate member '{method}' on class '{class}'")]
    DuplicateMethod {
        /// Declaring class
        class: String,
        /// Offending member
        method: String,
    },

    /// An abstract member on a concrete class
    #[error("Type Error: abstract member '{method}' on non-abstract class '{class}'")]
    AbstractMemberInConcreteClass {
        /// Declaring class
        class: String,
        /// Offending member
        method: String,
    },

    /// `new` on an abstract class
    #[error("Type Error: cannot create an instance of abstract class '{0}'")]
    AbstractInstantiation(String),

    /// Two top-level functions with the same name
    #[error("Type Error: duplicate function '{0}'")]
    DuplicateFunction(String),

    /// Unresolvable identifier
    #[error("Type Error: unknown identifier '{0}'")]
    UnknownIdentifier(String),

    /// `new` on an unknown class name
    #[error("Type Error: unknown class '{0}'")]
    UnknownClass(String),

    /// Unknown static member access
    #[error("Type Error: class '{class}' has no static member '{member}'")]
    UnknownStaticMember {
        /// Accessed class
        class: String,
        /// The missing member
        member: String,
    },

    /// `await` in a synchronous body
    #[error("Type Error: 'await' is only allowed inside an async method")]
    AwaitOutsideAsync,

    /// `super` where no superclass is in scope
    #[error("Type Error: 'super' used outside a class with a superclass")]
    SuperOutsideSubclass,

    /// `this` in a static or top-level body
    #[error("Type Error: 'this' used outside an instance member")]
    ThisOutsideMethod,

    /// A statement kind the top level does not accept
    #[error("Parse Error: only class and function declarations are allowed at the top level")]
    TopLevelStatement,

    /// A declaration nested inside a body
    #[error("Parse Error: class and function declarations are only allowed at the top level")]
    NestedDeclaration,

    /// Assignment to something that is not a storage location
    #[error("Type Error: invalid assignment target '{0}'")]
    InvalidAssignmentTarget(String),

    /// `super(...)` somewhere other than the first constructor statement
    #[error("Type Error: 'super(...)' must be the first statement of the constructor")]
    SuperNotFirst,
}

/// Compile a program AST into an executable [`Program`]
pub fn compile(program: &ast::Program) -> Result<Program, CompileError> {
    let builtins = builtin_class_decls();
    let mut compiler = Compiler::new();
    compiler.declare_classes(&builtins, program)?;
    compiler.declare_members()?;
    compiler.declare_functions(program)?;
    compiler.check_overrides()?;
    compiler.emit_bodies()?;
    compiler.finish()
}

/// Per-class declaration state carried between passes
struct DeclaredClass<'a> {
    decl: &'a ClassDecl,
    id: ClassId,
}

struct Compiler<'a> {
    registry: ClassRegistry,
    functions: Vec<Option<FnBody>>,
    fn_names: FxHashMap<String, FnId>,
    classes: Vec<DeclaredClass<'a>>,
    fn_decls: Vec<(&'a ast::FunctionDecl, FnId)>,
}

impl<'a> Compiler<'a> {
    fn new() -> Self {
        Self {
            registry: ClassRegistry::new(),
            functions: Vec::new(),
            fn_names: FxHashMap::default(),
            classes: Vec::new(),
            fn_decls: Vec::new(),
        }
    }

    /// Reserve a function-table slot for a body defined later
    fn reserve(&mut self) -> FnId {
        self.functions.push(None);
        self.functions.len() - 1
    }

    fn define(&mut self, id: FnId, body: FnBody) {
        self.functions[id] = Some(body);
    }

    // ── Pass 1: class declarations ──────────────────────────────────────

    fn declare_classes(
        &mut self,
        builtins: &'a [ClassDecl],
        program: &'a ast::Program,
    ) -> Result<(), CompileError> {
        let mut decls: Vec<&'a ClassDecl> = builtins.iter().collect();
        for statement in &program.statements {
            match statement {
                Statement::Class(decl) => decls.push(decl),
                Statement::Function(_) => {}
                _ => return Err(CompileError::TopLevelStatement),
            }
        }

        for decl in decls {
            let generic_params = decl
                .generic_params
                .iter()
                .map(|p| GenericParamDesc {
                    name: p.name.clone(),
                    constraint: p.constraint.clone(),
                })
                .collect();
            let id = self
                .registry
                .declare_class(&decl.name, decl.is_abstract, generic_params)?;
            self.classes.push(DeclaredClass { decl, id });
        }

        for DeclaredClass { decl, id } in &self.classes {
            if let Some(superclass) = &decl.superclass {
                self.registry.link_superclass(*id, superclass)?;
            }
        }
        Ok(())
    }

    // ── Pass 2: member signatures ───────────────────────────────────────

    fn declare_members(&mut self) -> Result<(), CompileError> {
        for index in 0..self.classes.len() {
            let DeclaredClass { decl, id } = &self.classes[index];
            let (decl, id) = (*decl, *id);

            for field in &decl.fields {
                if field.is_static {
                    let slot = self.registry.get(id).static_fields.len() as u16;
                    self.registry
                        .get_mut(id)
                        .static_fields
                        .insert(field.name.clone(), slot);
                } else {
                    self.registry.get_mut(id).field_names.push(field.name.clone());
                }
            }

            for method in &decl.methods {
                self.declare_method(decl, id, method)?;
            }

            for accessor in &decl.accessors {
                self.declare_accessor(decl, id, accessor)?;
            }

            if self.registry.get(id).constructor.is_none() {
                let handle = self.reserve();
                self.registry.get_mut(id).constructor = Some(handle);
            }

            if decl.fields.iter().any(|f| f.is_static && f.initializer.is_some()) {
                let handle = self.reserve();
                self.registry.get_mut(id).static_init = Some(handle);
            }
        }
        Ok(())
    }

    fn declare_method(
        &mut self,
        decl: &ClassDecl,
        id: ClassId,
        method: &MethodDecl,
    ) -> Result<(), CompileError> {
        if method.name == "constructor" {
            if method.is_override {
                return Err(CompileError::OverrideOnConstructor(decl.name.clone()));
            }
            if self.registry.get(id).constructor.is_some() {
                return Err(CompileError::DuplicateMethod {
                    class: decl.name.clone(),
                    method: method.name.clone(),
                });
            }
            let handle = self.reserve();
            self.registry.get_mut(id).constructor = Some(handle);
            return Ok(());
        }

        if method.is_static {
            if method.is_override {
                return Err(CompileError::OverrideOnStatic {
                    class: decl.name.clone(),
                    method: method.name.clone(),
                });
            }
            if self.registry.get(id).static_methods.contains_key(&method.name) {
                return Err(CompileError::DuplicateMethod {
                    class: decl.name.clone(),
                    method: method.name.clone(),
                });
            }
            let handle = self.reserve();
            self.registry
                .get_mut(id)
                .static_methods
                .insert(method.name.clone(), handle);
            return Ok(());
        }

        if self.registry.get(id).vtable.contains_key(&method.name) {
            return Err(CompileError::DuplicateMethod {
                class: decl.name.clone(),
                method: method.name.clone(),
            });
        }
        if method.is_abstract && !decl.is_abstract {
            return Err(CompileError::AbstractMemberInConcreteClass {
                class: decl.name.clone(),
                method: method.name.clone(),
            });
        }

        let handle = self.reserve();
        if method.is_abstract {
            let name = format!("{}::{}", decl.name, method.name);
            self.define(handle, FnBody::abstract_trap(name, id));
        }
        self.registry
            .get_mut(id)
            .vtable
            .insert(method.name.clone(), handle);
        Ok(())
    }

    fn declare_accessor(
        &mut self,
        decl: &ClassDecl,
        id: ClassId,
        accessor: &ast::AccessorDecl,
    ) -> Result<(), CompileError> {
        if accessor.is_abstract && !decl.is_abstract {
            return Err(CompileError::AbstractMemberInConcreteClass {
                class: decl.name.clone(),
                method: accessor.name.clone(),
            });
        }
        let table_has = match accessor.kind {
            AccessorKind::Get => self.registry.get(id).getters.contains_key(&accessor.name),
            AccessorKind::Set => self.registry.get(id).setters.contains_key(&accessor.name),
        };
        if table_has {
            return Err(CompileError::DuplicateMethod {
                class: decl.name.clone(),
                method: accessor.name.clone(),
            });
        }

        let handle = self.reserve();
        if accessor.is_abstract {
            let prefix = match accessor.kind {
                AccessorKind::Get => "get",
                AccessorKind::Set => "set",
            };
            let name = format!("{}::{}_{}", decl.name, prefix, accessor.name);
            self.define(handle, FnBody::abstract_trap(name, id));
        }
        match accessor.kind {
            AccessorKind::Get => {
                self.registry
                    .get_mut(id)
                    .getters
                    .insert(accessor.name.clone(), handle);
            }
            AccessorKind::Set => {
                self.registry
                    .get_mut(id)
                    .setters
                    .insert(accessor.name.clone(), handle);
            }
        }
        Ok(())
    }

    fn declare_functions(&mut self, program: &'a ast::Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            if let Statement::Function(decl) = statement {
                if self.fn_names.contains_key(&decl.name) {
                    return Err(CompileError::DuplicateFunction(decl.name.clone()));
                }
                let handle = self.reserve();
                self.fn_names.insert(decl.name.clone(), handle);
                self.fn_decls.push((decl, handle));
            }
        }
        Ok(())
    }

    fn check_overrides(&self) -> Result<(), CompileError> {
        for DeclaredClass { decl, id } in &self.classes {
            for method in &decl.methods {
                if method.is_override && !method.is_static && method.name != "constructor" {
                    self.registry.check_override(*id, &method.name)?;
                }
            }
        }
        Ok(())
    }

    // ── Pass 3: body emission ───────────────────────────────────────────

    fn emit_bodies(&mut self) -> Result<(), CompileError> {
        for index in 0..self.classes.len() {
            let DeclaredClass { decl, id } = &self.classes[index];
            let (decl, id) = (*decl, *id);
            self.emit_class(decl, id)?;
        }

        for index in 0..self.fn_decls.len() {
            let (decl, handle) = self.fn_decls[index];
            let body = self.lowerer().lower_body(
                &decl.params,
                &decl.body,
                BodyOpts {
                    name: decl.name.clone(),
                    kind: FnKind::Function,
                    owner: None,
                    is_async: decl.is_async,
                    has_receiver: false,
                    constructor: None,
                    setter_epilogue: false,
                },
            )?;
            self.define(handle, body);
        }
        Ok(())
    }

    fn emit_class(&mut self, decl: &ClassDecl, id: ClassId) -> Result<(), CompileError> {
        let superclass = self.registry.get(id).superclass;

        // Constructor: explicit body, or a synthesized one that chains to
        // the parent and runs the field initializers.
        let ctor_handle = self.registry.get(id).constructor.expect("constructor declared");
        let explicit = decl.methods.iter().find(|m| m.name == "constructor");
        let (params, body): (&[Param], &[Statement]) = match explicit {
            Some(method) => (
                &method.params,
                method.body.as_deref().unwrap_or_default(),
            ),
            None => (&[], &[]),
        };
        let ctor_body = self.lowerer().lower_body(
            params,
            body,
            BodyOpts {
                name: format!("{}::constructor", decl.name),
                kind: FnKind::Constructor,
                owner: Some(id),
                is_async: false,
                has_receiver: true,
                constructor: Some(ConstructorInfo {
                    superclass,
                    fields: &decl.fields,
                }),
                setter_epilogue: false,
            },
        )?;
        self.define(ctor_handle, ctor_body);

        // Methods
        for method in &decl.methods {
            if method.name == "constructor" || method.is_abstract {
                continue;
            }
            let handle = if method.is_static {
                self.registry.get(id).static_methods[&method.name]
            } else {
                self.registry.get(id).vtable[&method.name]
            };
            let body = self.lowerer().lower_body(
                &method.params,
                method.body.as_deref().unwrap_or_default(),
                BodyOpts {
                    name: format!("{}::{}", decl.name, method.name),
                    kind: if method.is_static {
                        FnKind::StaticMethod
                    } else {
                        FnKind::Method
                    },
                    owner: Some(id),
                    is_async: method.is_async,
                    has_receiver: !method.is_static,
                    constructor: None,
                    setter_epilogue: false,
                },
            )?;
            self.define(handle, body);
        }

        // Accessors
        for accessor in &decl.accessors {
            if accessor.is_abstract {
                continue;
            }
            let (handle, kind, prefix, params) = match accessor.kind {
                AccessorKind::Get => (
                    self.registry.get(id).getters[&accessor.name],
                    FnKind::Getter,
                    "get",
                    Vec::new(),
                ),
                AccessorKind::Set => (
                    self.registry.get(id).setters[&accessor.name],
                    FnKind::Setter,
                    "set",
                    vec![Param::new(
                        accessor.setter_param.as_deref().unwrap_or("value"),
                    )],
                ),
            };
            let body = self.lowerer().lower_body(
                &params,
                accessor.body.as_deref().unwrap_or_default(),
                BodyOpts {
                    name: format!("{}::{}_{}", decl.name, prefix, accessor.name),
                    kind,
                    owner: Some(id),
                    is_async: false,
                    has_receiver: true,
                    constructor: None,
                    setter_epilogue: matches!(accessor.kind, AccessorKind::Set),
                },
            )?;
            self.define(handle, body);
        }

        // Synthetic static constructor
        if let Some(handle) = self.registry.get(id).static_init {
            let body = self.lowerer().lower_static_init(decl, id)?;
            self.define(handle, body);
        }
        Ok(())
    }

    fn lowerer(&mut self) -> Lowerer<'_> {
        Lowerer::new(&self.registry, &self.fn_names, &mut self.functions)
    }

    fn finish(self) -> Result<Program, CompileError> {
        let functions = self
            .functions
            .into_iter()
            .map(|slot| slot.expect("every declared handle has a defined body"))
            .collect();
        Ok(Program::new(functions, self.registry, self.fn_names))
    }
}

/// Declarations for the pre-seeded error classes, compiled through the
/// ordinary pipeline: `Error` carries `name` and `message`, `TypeError`
/// refines `name`.
fn builtin_class_decls() -> Vec<ClassDecl> {
    let error = ClassDecl {
        name: "Error".to_string(),
        superclass: None,
        generic_params: Vec::new(),
        is_abstract: false,
        fields: vec![
            ast::FieldDecl {
                name: "name".to_string(),
                initializer: Some(Expression::string("Error")),
                is_static: false,
            },
            ast::FieldDecl {
                name: "message".to_string(),
                initializer: Some(Expression::string("")),
                is_static: false,
            },
        ],
        methods: vec![MethodDecl::new(
            "constructor",
            vec![Param::with_default("message", Expression::string(""))],
            vec![Statement::Expression(Expression::assign(
                Expression::member(Expression::This, "message"),
                Expression::ident("message"),
            ))],
        )],
        accessors: Vec::new(),
    };

    let type_error = ClassDecl {
        name: "TypeError".to_string(),
        superclass: Some("Error".to_string()),
        generic_params: Vec::new(),
        is_abstract: false,
        fields: vec![ast::FieldDecl {
            name: "name".to_string(),
            initializer: Some(Expression::string("TypeError")),
            is_static: false,
        }],
        methods: vec![MethodDecl::new(
            "constructor",
            vec![Param::with_default("message", Expression::string(""))],
            vec![Statement::Expression(Expression::call(
                Expression::Super,
                vec![Expression::ident("message")],
            ))],
        )],
        accessors: Vec::new(),
    };

    vec![error, type_error]
}
