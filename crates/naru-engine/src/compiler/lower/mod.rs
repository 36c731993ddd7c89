//! AST to instruction lowering
//!
//! One `Lowerer` instance lowers one body. Parameters bind by position
//! (receiver in slot 0 for instance members), default-parameter checks
//! are emitted in declaration order before the user body, constructors
//! splice field initializers right after the superclass call, and every
//! body ends with the default-return epilogue.
//!
//! Async bodies are lowered with numbered await sites: each `await`
//! emits an `Await` instruction carrying a fresh site number and records
//! the following instruction index in the body's resume table, which is
//! what the state machine's dispatch prologue jumps through on
//! resumption.

mod expr;
mod stmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{ArrowBody, ClassDecl, Expression, FieldDecl, Param, Statement};
use crate::compiler::code::{ClassId, Const, FnBody, FnId, FnKind, Instr};
use crate::compiler::registry::ClassRegistry;
use crate::compiler::CompileError;

/// Constructor-specific lowering input
pub(crate) struct ConstructorInfo<'a> {
    /// Superclass of the class under construction
    pub superclass: Option<ClassId>,
    /// Field declarations; instance initializers are spliced after the
    /// superclass call
    pub fields: &'a [FieldDecl],
}

/// Options describing the body being lowered
pub(crate) struct BodyOpts<'a> {
    /// Diagnostic name
    pub name: String,
    /// Body kind
    pub kind: FnKind,
    /// Owning class for members
    pub owner: Option<ClassId>,
    /// True for async bodies (enables await lowering)
    pub is_async: bool,
    /// True when slot 0 is the receiver
    pub has_receiver: bool,
    /// Present when lowering a constructor
    pub constructor: Option<ConstructorInfo<'a>>,
    /// True for setters: the epilogue returns the parameter instead of
    /// `undefined`, keeping the dispatch protocol uniform
    pub setter_epilogue: bool,
}

/// Names visible for capture from an enclosing body
#[derive(Clone)]
struct EnclosingEnv {
    names: FxHashSet<String>,
    has_this: bool,
}

/// How an identifier resolves at its use site
enum Resolution {
    Local(u16),
    Captured(u16),
    Function(FnId),
}

/// Lowers one body to a flat instruction list
pub(crate) struct Lowerer<'a> {
    registry: &'a ClassRegistry,
    fn_names: &'a FxHashMap<String, FnId>,
    functions: &'a mut Vec<Option<FnBody>>,
    code: Vec<Instr>,
    scopes: Vec<FxHashMap<String, u16>>,
    next_local: u16,
    captures: Vec<String>,
    enclosing: Option<EnclosingEnv>,
    kind: FnKind,
    owner: Option<ClassId>,
    is_async: bool,
    has_receiver: bool,
    resume_table: Vec<usize>,
}

impl<'a> Lowerer<'a> {
    /// Create a lowerer over the program's declaration tables
    pub fn new(
        registry: &'a ClassRegistry,
        fn_names: &'a FxHashMap<String, FnId>,
        functions: &'a mut Vec<Option<FnBody>>,
    ) -> Self {
        Self {
            registry,
            fn_names,
            functions,
            code: Vec::new(),
            scopes: Vec::new(),
            next_local: 0,
            captures: Vec::new(),
            enclosing: None,
            kind: FnKind::Function,
            owner: None,
            is_async: false,
            has_receiver: false,
            resume_table: Vec::new(),
        }
    }

    /// Lower a declared body (function, method, accessor, constructor)
    pub fn lower_body(
        mut self,
        params: &[Param],
        body: &[Statement],
        opts: BodyOpts<'_>,
    ) -> Result<FnBody, CompileError> {
        self.kind = opts.kind;
        self.owner = opts.owner;
        self.is_async = opts.is_async;
        self.has_receiver = opts.has_receiver;

        self.scopes.push(FxHashMap::default());
        if opts.has_receiver {
            self.next_local = 1;
        }
        let param_base = self.next_local;
        self.bind_params(params)?;

        match &opts.constructor {
            Some(info) => self.lower_constructor_body(info, body)?,
            None => {
                for statement in body {
                    self.lower_stmt(statement)?;
                }
            }
        }

        // Default return: reaching end-of-body yields undefined; setters
        // return their argument to unify the dispatch protocol.
        if opts.setter_epilogue {
            self.emit(Instr::LoadLocal(param_base));
        } else {
            self.emit(Instr::Const(Const::Undefined));
        }
        self.emit(Instr::Return);

        Ok(FnBody {
            name: opts.name,
            kind: opts.kind,
            owner: opts.owner,
            is_async: opts.is_async,
            arity: params.len(),
            has_receiver: opts.has_receiver,
            local_count: self.next_local as usize,
            code: self.code,
            resume_table: self.resume_table,
        })
    }

    /// Lower the synthetic static constructor of a class: static field
    /// initializers in declaration order.
    pub fn lower_static_init(
        mut self,
        decl: &ClassDecl,
        class: ClassId,
    ) -> Result<FnBody, CompileError> {
        self.kind = FnKind::StaticInit;
        self.owner = Some(class);
        self.scopes.push(FxHashMap::default());

        for field in &decl.fields {
            if !field.is_static {
                continue;
            }
            if let Some(initializer) = &field.initializer {
                let slot = self.registry.get(class).static_fields[&field.name];
                self.lower_expr(initializer)?;
                self.emit(Instr::SetStatic { class, slot });
                self.emit(Instr::Pop);
            }
        }

        self.emit(Instr::Const(Const::Undefined));
        self.emit(Instr::Return);

        Ok(FnBody {
            name: format!("{}::<static_init>", decl.name),
            kind: FnKind::StaticInit,
            owner: Some(class),
            is_async: false,
            arity: 0,
            has_receiver: false,
            local_count: self.next_local as usize,
            code: self.code,
            resume_table: Vec::new(),
        })
    }

    // ── Constructor emission ────────────────────────────────────────────
    //
    // Order: the field map is already allocated on `this` by the
    // instantiation instruction; the parent constructor runs next
    // (explicit `super(...)` first statement, or an inserted zero-arg
    // call); then the field initializers in declaration order; then the
    // remainder of the user body.

    fn lower_constructor_body(
        &mut self,
        info: &ConstructorInfo<'_>,
        body: &[Statement],
    ) -> Result<(), CompileError> {
        let is_super_call = |statement: &Statement| {
            matches!(
                statement,
                Statement::Expression(Expression::Call { callee, .. })
                    if matches!(&**callee, Expression::Super)
            )
        };
        let explicit_super = body.first().map_or(false, is_super_call);
        if body.iter().skip(1).any(is_super_call) {
            return Err(CompileError::SuperNotFirst);
        }

        let rest = if explicit_super {
            self.lower_stmt(&body[0])?;
            &body[1..]
        } else {
            if info.superclass.is_some() {
                self.emit(Instr::LoadLocal(0));
                self.emit(Instr::CallSuper { argc: 0 });
                self.emit(Instr::Pop);
            }
            body
        };

        for field in info.fields {
            if field.is_static {
                continue;
            }
            self.emit(Instr::LoadLocal(0));
            match &field.initializer {
                Some(initializer) => self.lower_expr(initializer)?,
                None => self.emit(Instr::Const(Const::Undefined)),
            }
            self.emit(Instr::SetProp(field.name.as_str().into()));
            self.emit(Instr::Pop);
        }

        for statement in rest {
            self.lower_stmt(statement)?;
        }
        Ok(())
    }

    // ── Parameters ──────────────────────────────────────────────────────

    fn bind_params(&mut self, params: &[Param]) -> Result<(), CompileError> {
        let mut slots = Vec::with_capacity(params.len());
        for param in params {
            slots.push(self.declare_local(&param.name));
        }
        // Default checks in declaration order, before the user body: a
        // caller-supplied undefined takes the default expression.
        for (param, slot) in params.iter().zip(slots) {
            if let Some(default) = &param.default {
                self.emit(Instr::LoadLocal(slot));
                self.emit(Instr::IsUndefined);
                let skip = self.emit_jump(Instr::JumpIfFalse(usize::MAX));
                self.lower_expr(default)?;
                self.emit(Instr::StoreLocal(slot));
                self.patch_jump(skip);
            }
        }
        Ok(())
    }

    // ── Arrow functions ─────────────────────────────────────────────────

    fn lower_arrow(&mut self, params: &[Param], body: &ArrowBody) -> Result<(), CompileError> {
        let env = self.environment();
        self.functions.push(None);
        let func = self.functions.len() - 1;

        let (fn_body, captured) = {
            let inner = Lowerer {
                registry: self.registry,
                fn_names: self.fn_names,
                functions: &mut *self.functions,
                code: Vec::new(),
                scopes: Vec::new(),
                next_local: 0,
                captures: Vec::new(),
                enclosing: Some(env),
                kind: FnKind::Arrow,
                owner: self.owner,
                is_async: false,
                has_receiver: false,
                resume_table: Vec::new(),
            };
            inner.lower_arrow_body(params, body)?
        };
        self.functions[func] = Some(fn_body);

        // Captures are loaded by value in first-use order.
        for name in &captured {
            self.emit_capture_value(name)?;
        }
        self.emit(Instr::MakeClosure {
            func,
            capture_count: captured.len() as u16,
        });
        Ok(())
    }

    fn lower_arrow_body(
        mut self,
        params: &[Param],
        body: &ArrowBody,
    ) -> Result<(FnBody, Vec<String>), CompileError> {
        self.scopes.push(FxHashMap::default());
        self.bind_params(params)?;

        match body {
            ArrowBody::Expression(expression) => {
                self.lower_expr(expression)?;
                self.emit(Instr::Return);
            }
            ArrowBody::Block(statements) => {
                for statement in statements {
                    self.lower_stmt(statement)?;
                }
                self.emit(Instr::Const(Const::Undefined));
                self.emit(Instr::Return);
            }
        }

        let fn_body = FnBody {
            name: "<arrow>".to_string(),
            kind: FnKind::Arrow,
            owner: self.owner,
            is_async: false,
            arity: params.len(),
            has_receiver: false,
            local_count: self.next_local as usize,
            code: self.code,
            resume_table: Vec::new(),
        };
        Ok((fn_body, self.captures))
    }

    /// Load one captured value in the enclosing body, for closure
    /// construction
    fn emit_capture_value(&mut self, name: &str) -> Result<(), CompileError> {
        if name == "this" {
            return self.emit_this();
        }
        match self.resolve(name) {
            Some(Resolution::Local(slot)) => self.emit(Instr::LoadLocal(slot)),
            Some(Resolution::Captured(index)) => self.emit(Instr::LoadCaptured(index)),
            Some(Resolution::Function(func)) => self.emit(Instr::MakeClosure {
                func,
                capture_count: 0,
            }),
            None => return Err(CompileError::UnknownIdentifier(name.to_string())),
        }
        Ok(())
    }

    // ── Name resolution ─────────────────────────────────────────────────

    fn environment(&self) -> EnclosingEnv {
        let mut names = FxHashSet::default();
        for scope in &self.scopes {
            names.extend(scope.keys().cloned());
        }
        names.extend(self.captures.iter().cloned());
        if let Some(env) = &self.enclosing {
            names.extend(env.names.iter().cloned());
        }
        let has_this = self.has_receiver
            || self.enclosing.as_ref().map_or(false, |env| env.has_this);
        EnclosingEnv { names, has_this }
    }

    fn resolve(&mut self, name: &str) -> Option<Resolution> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.get(name) {
                return Some(Resolution::Local(*slot));
            }
        }
        if let Some(env) = &self.enclosing {
            if let Some(index) = self.captures.iter().position(|c| c == name) {
                return Some(Resolution::Captured(index as u16));
            }
            if env.names.contains(name) {
                self.captures.push(name.to_string());
                return Some(Resolution::Captured((self.captures.len() - 1) as u16));
            }
        }
        if let Some(func) = self.fn_names.get(name) {
            return Some(Resolution::Function(*func));
        }
        None
    }

    /// True when the name denotes a runtime value in scope (local,
    /// capture, or capturable enclosing binding); such names shadow
    /// class and builtin namespaces.
    fn name_is_value(&self, name: &str) -> bool {
        if self.scopes.iter().any(|scope| scope.contains_key(name)) {
            return true;
        }
        if self.captures.iter().any(|c| c == name) {
            return true;
        }
        if let Some(env) = &self.enclosing {
            if env.names.contains(name) {
                return true;
            }
        }
        false
    }

    fn emit_this(&mut self) -> Result<(), CompileError> {
        if self.has_receiver {
            self.emit(Instr::LoadLocal(0));
            return Ok(());
        }
        if self
            .enclosing
            .as_ref()
            .map_or(false, |env| env.has_this)
        {
            let index = match self.captures.iter().position(|c| c == "this") {
                Some(index) => index,
                None => {
                    self.captures.push("this".to_string());
                    self.captures.len() - 1
                }
            };
            self.emit(Instr::LoadCaptured(index as u16));
            return Ok(());
        }
        Err(CompileError::ThisOutsideMethod)
    }

    fn declare_local(&mut self, name: &str) -> u16 {
        let slot = self.next_local;
        self.next_local += 1;
        self.scopes
            .last_mut()
            .expect("scope stack is never empty while lowering")
            .insert(name.to_string(), slot);
        slot
    }

    // ── Emission helpers ────────────────────────────────────────────────

    fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    /// Emit a jump with a placeholder target; returns its index for
    /// patching
    fn emit_jump(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    /// Point a previously emitted jump at the current position
    fn patch_jump(&mut self, at: usize) {
        let target = self.code.len();
        match &mut self.code[at] {
            Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => *t = target,
            Instr::EnterTry { catch } => *catch = target,
            other => panic!("patch target is not a jump: {:?}", other),
        }
    }
}
