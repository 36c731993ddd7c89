//! Expression lowering

use crate::ast::{BinaryOp, Expression, Literal, TemplatePart, UnaryOp};
use crate::compiler::code::{BinOp, Const, Instr};
use crate::compiler::CompileError;

use super::{Lowerer, Resolution};

impl<'a> Lowerer<'a> {
    pub(super) fn lower_expr(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Literal(literal) => {
                let constant = match literal {
                    Literal::Undefined => Const::Undefined,
                    Literal::Null => Const::Null,
                    Literal::Bool(b) => Const::Bool(*b),
                    Literal::Number(n) => Const::Number(*n),
                    Literal::String(s) => Const::String(s.as_str().into()),
                };
                self.emit(Instr::Const(constant));
            }

            Expression::Identifier(name) => match self.resolve(name) {
                Some(Resolution::Local(slot)) => self.emit(Instr::LoadLocal(slot)),
                Some(Resolution::Captured(index)) => self.emit(Instr::LoadCaptured(index)),
                Some(Resolution::Function(func)) => self.emit(Instr::MakeClosure {
                    func,
                    capture_count: 0,
                }),
                None => return Err(CompileError::UnknownIdentifier(name.clone())),
            },

            Expression::This => self.emit_this()?,

            // `super` is only meaningful as a call target; those forms
            // are handled inside call lowering.
            Expression::Super => return Err(CompileError::SuperOutsideSubclass),

            Expression::Binary { op, left, right } => self.lower_binary(*op, left, right)?,

            Expression::Unary { op, operand } => {
                self.lower_expr(operand)?;
                match op {
                    UnaryOp::Not => self.emit(Instr::Not),
                    UnaryOp::Neg => self.emit(Instr::Neg),
                }
            }

            Expression::Assign { target, value } => self.lower_assign(target, value)?,

            Expression::Call { callee, args } => self.lower_call(callee, args)?,

            Expression::Member { object, property } => self.lower_member(object, property)?,

            Expression::Index { object, index } => {
                self.lower_expr(object)?;
                self.lower_expr(index)?;
                self.emit(Instr::GetIndex);
            }

            Expression::Await(inner) => {
                if !self.is_async {
                    return Err(CompileError::AwaitOutsideAsync);
                }
                self.lower_expr(inner)?;
                let site = self.resume_table.len() as u16;
                self.emit(Instr::Await { site });
                // Resumption re-enters at the instruction after the
                // await, with the result (or re-raised error) applied.
                let resume = self.here();
                self.resume_table.push(resume);
            }

            Expression::New { class, args } => {
                let descriptor = self
                    .registry
                    .get_by_name(class)
                    .ok_or_else(|| CompileError::UnknownClass(class.clone()))?;
                if descriptor.is_abstract {
                    return Err(CompileError::AbstractInstantiation(class.clone()));
                }
                let id = descriptor.id;
                for arg in args {
                    self.lower_expr(arg)?;
                }
                self.emit(Instr::New {
                    class: id,
                    argc: args.len() as u8,
                });
            }

            Expression::Array(elements) => {
                for element in elements {
                    self.lower_expr(element)?;
                }
                self.emit(Instr::MakeArray(elements.len() as u16));
            }

            Expression::Object(entries) => {
                let keys: Vec<std::rc::Rc<str>> = entries
                    .iter()
                    .map(|(key, _)| key.as_str().into())
                    .collect();
                for (_, value) in entries {
                    self.lower_expr(value)?;
                }
                self.emit(Instr::MakeObject(keys.into()));
            }

            Expression::Arrow { params, body } => self.lower_arrow(params, body)?,

            Expression::Template(parts) => {
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => {
                            self.emit(Instr::Const(Const::String(text.as_str().into())))
                        }
                        TemplatePart::Expr(expression) => self.lower_expr(expression)?,
                    }
                }
                self.emit(Instr::Concat(parts.len() as u16));
            }

            Expression::Cast(inner) | Expression::Assert(inner) => self.lower_expr(inner)?,

            Expression::NonNull(inner) => {
                self.lower_expr(inner)?;
                self.emit(Instr::CheckNonNull);
            }
        }
        Ok(())
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<(), CompileError> {
        match op {
            BinaryOp::And => {
                self.lower_expr(left)?;
                self.emit(Instr::Dup);
                let short = self.emit_jump(Instr::JumpIfFalse(usize::MAX));
                self.emit(Instr::Pop);
                self.lower_expr(right)?;
                self.patch_jump(short);
            }
            BinaryOp::Or => {
                self.lower_expr(left)?;
                self.emit(Instr::Dup);
                let short = self.emit_jump(Instr::JumpIfTrue(usize::MAX));
                self.emit(Instr::Pop);
                self.lower_expr(right)?;
                self.patch_jump(short);
            }
            _ => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                let op = match op {
                    BinaryOp::Add => BinOp::Add,
                    BinaryOp::Sub => BinOp::Sub,
                    BinaryOp::Mul => BinOp::Mul,
                    BinaryOp::Div => BinOp::Div,
                    BinaryOp::Mod => BinOp::Mod,
                    BinaryOp::Eq => BinOp::Eq,
                    BinaryOp::Ne => BinOp::Ne,
                    BinaryOp::Lt => BinOp::Lt,
                    BinaryOp::Le => BinOp::Le,
                    BinaryOp::Gt => BinOp::Gt,
                    BinaryOp::Ge => BinOp::Ge,
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                };
                self.emit(Instr::Binary(op));
            }
        }
        Ok(())
    }

    fn lower_assign(
        &mut self,
        target: &Expression,
        value: &Expression,
    ) -> Result<(), CompileError> {
        match target {
            Expression::Identifier(name) => {
                self.lower_expr(value)?;
                self.emit(Instr::Dup);
                match self.resolve(name) {
                    Some(Resolution::Local(slot)) => self.emit(Instr::StoreLocal(slot)),
                    Some(Resolution::Captured(_)) | Some(Resolution::Function(_)) | None => {
                        return Err(CompileError::InvalidAssignmentTarget(name.clone()))
                    }
                }
            }

            Expression::Member { object, property } => {
                // Static field assignment when the object is a class name
                // not shadowed by a value binding.
                if let Expression::Identifier(name) = &**object {
                    if !self.name_is_value(name) {
                        if let Some(descriptor) = self.registry.get_by_name(name) {
                            let (class, slot) = self
                                .registry
                                .resolve_static_field(descriptor.id, property)
                                .ok_or_else(|| CompileError::UnknownStaticMember {
                                    class: name.clone(),
                                    member: property.clone(),
                                })?;
                            self.lower_expr(value)?;
                            self.emit(Instr::SetStatic { class, slot });
                            return Ok(());
                        }
                    }
                }
                self.lower_expr(object)?;
                self.lower_expr(value)?;
                self.emit(Instr::SetProp(property.as_str().into()));
            }

            Expression::Index { object, index } => {
                self.lower_expr(object)?;
                self.lower_expr(index)?;
                self.lower_expr(value)?;
                self.emit(Instr::SetIndex);
            }

            other => {
                return Err(CompileError::InvalidAssignmentTarget(format!("{:?}", other)))
            }
        }
        Ok(())
    }

    fn lower_call(
        &mut self,
        callee: &Expression,
        args: &[Expression],
    ) -> Result<(), CompileError> {
        match callee {
            // super(...) — parent constructor, constructor bodies only
            Expression::Super => {
                if !self.in_subclass_constructor() {
                    return Err(CompileError::SuperOutsideSubclass);
                }
                self.emit(Instr::LoadLocal(0));
                for arg in args {
                    self.lower_expr(arg)?;
                }
                self.emit(Instr::CallSuper {
                    argc: args.len() as u8,
                });
            }

            // super.m(...) — resolved starting at the parent class
            Expression::Member { object, property }
                if matches!(&**object, Expression::Super) =>
            {
                if !self.owner_has_superclass() {
                    return Err(CompileError::SuperOutsideSubclass);
                }
                self.emit_this()?;
                for arg in args {
                    self.lower_expr(arg)?;
                }
                self.emit(Instr::CallSuperMethod {
                    name: property.as_str().into(),
                    argc: args.len() as u8,
                });
            }

            Expression::Member { object, property } => {
                if let Expression::Identifier(name) = &**object {
                    if !self.name_is_value(name) {
                        // Static method call on a class name
                        if let Some(descriptor) = self.registry.get_by_name(name) {
                            let (class, func) = self
                                .registry
                                .resolve_static_method(descriptor.id, property)
                                .ok_or_else(|| CompileError::UnknownStaticMember {
                                    class: name.clone(),
                                    member: property.clone(),
                                })?;
                            for arg in args {
                                self.lower_expr(arg)?;
                            }
                            self.emit(Instr::CallStatic {
                                class,
                                func,
                                argc: args.len() as u8,
                            });
                            return Ok(());
                        }
                        // Promise namespace
                        if name == "Promise" {
                            return self.lower_promise_call(property, args);
                        }
                        return Err(CompileError::UnknownIdentifier(name.clone()));
                    }
                }
                // Late-bound method call on the receiver's class chain
                self.lower_expr(object)?;
                for arg in args {
                    self.lower_expr(arg)?;
                }
                self.emit(Instr::CallVirtual {
                    name: property.as_str().into(),
                    argc: args.len() as u8,
                });
            }

            Expression::Identifier(name) => match self.resolve(name) {
                Some(Resolution::Local(slot)) => {
                    self.emit(Instr::LoadLocal(slot));
                    for arg in args {
                        self.lower_expr(arg)?;
                    }
                    self.emit(Instr::CallValue {
                        argc: args.len() as u8,
                    });
                }
                Some(Resolution::Captured(index)) => {
                    self.emit(Instr::LoadCaptured(index));
                    for arg in args {
                        self.lower_expr(arg)?;
                    }
                    self.emit(Instr::CallValue {
                        argc: args.len() as u8,
                    });
                }
                Some(Resolution::Function(func)) => {
                    for arg in args {
                        self.lower_expr(arg)?;
                    }
                    self.emit(Instr::CallFn {
                        func,
                        argc: args.len() as u8,
                    });
                }
                None => return Err(CompileError::UnknownIdentifier(name.clone())),
            },

            other => {
                self.lower_expr(other)?;
                for arg in args {
                    self.lower_expr(arg)?;
                }
                self.emit(Instr::CallValue {
                    argc: args.len() as u8,
                });
            }
        }
        Ok(())
    }

    fn lower_promise_call(
        &mut self,
        method: &str,
        args: &[Expression],
    ) -> Result<(), CompileError> {
        match args.first() {
            Some(argument) => self.lower_expr(argument)?,
            None => self.emit(Instr::Const(Const::Undefined)),
        }
        let instr = match method {
            "resolve" => Instr::PromiseResolve,
            "reject" => Instr::PromiseReject,
            "all" => Instr::PromiseAll,
            "allSettled" => Instr::PromiseAllSettled,
            _ => {
                return Err(CompileError::UnknownStaticMember {
                    class: "Promise".to_string(),
                    member: method.to_string(),
                })
            }
        };
        self.emit(instr);
        Ok(())
    }

    fn lower_member(
        &mut self,
        object: &Expression,
        property: &str,
    ) -> Result<(), CompileError> {
        if let Expression::Identifier(name) = object {
            if !self.name_is_value(name) {
                if let Some(descriptor) = self.registry.get_by_name(name) {
                    let (class, slot) = self
                        .registry
                        .resolve_static_field(descriptor.id, property)
                        .ok_or_else(|| CompileError::UnknownStaticMember {
                            class: name.clone(),
                            member: property.to_string(),
                        })?;
                    self.emit(Instr::GetStatic { class, slot });
                    return Ok(());
                }
            }
        }
        self.lower_expr(object)?;
        self.emit(Instr::GetProp(property.into()));
        Ok(())
    }

    fn in_subclass_constructor(&self) -> bool {
        matches!(self.kind, crate::compiler::code::FnKind::Constructor)
            && self.owner_has_superclass()
    }

    fn owner_has_superclass(&self) -> bool {
        self.owner
            .map_or(false, |owner| self.registry.get(owner).superclass.is_some())
    }
}
