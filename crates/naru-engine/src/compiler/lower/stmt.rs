//! Statement lowering

use rustc_hash::FxHashMap;

use crate::ast::Statement;
use crate::compiler::code::{Const, Instr};
use crate::compiler::CompileError;

use super::Lowerer;

impl<'a> Lowerer<'a> {
    pub(super) fn lower_stmt(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Var(decl) => {
                self.lower_expr(&decl.init)?;
                let slot = self.declare_local(&decl.name);
                self.emit(Instr::StoreLocal(slot));
            }

            Statement::Expression(expression) => {
                self.lower_expr(expression)?;
                self.emit(Instr::Pop);
            }

            Statement::Return(value) => {
                match value {
                    Some(expression) => self.lower_expr(expression)?,
                    None => self.emit(Instr::Const(Const::Undefined)),
                }
                self.emit(Instr::Return);
            }

            Statement::Throw(expression) => {
                self.lower_expr(expression)?;
                self.emit(Instr::Throw);
            }

            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.lower_expr(condition)?;
                let to_else = self.emit_jump(Instr::JumpIfFalse(usize::MAX));
                self.lower_block(then_branch)?;
                match else_branch {
                    Some(statements) => {
                        let to_end = self.emit_jump(Instr::Jump(usize::MAX));
                        self.patch_jump(to_else);
                        self.lower_block(statements)?;
                        self.patch_jump(to_end);
                    }
                    None => self.patch_jump(to_else),
                }
            }

            Statement::While { condition, body } => {
                let start = self.here();
                self.lower_expr(condition)?;
                let exit = self.emit_jump(Instr::JumpIfFalse(usize::MAX));
                self.lower_block(body)?;
                self.emit(Instr::Jump(start));
                self.patch_jump(exit);
            }

            Statement::For {
                init,
                test,
                update,
                body,
            } => {
                self.scopes.push(FxHashMap::default());
                if let Some(init) = init {
                    self.lower_stmt(init)?;
                }
                let start = self.here();
                let exit = match test {
                    Some(test) => {
                        self.lower_expr(test)?;
                        Some(self.emit_jump(Instr::JumpIfFalse(usize::MAX)))
                    }
                    None => None,
                };
                self.lower_block(body)?;
                if let Some(update) = update {
                    self.lower_expr(update)?;
                    self.emit(Instr::Pop);
                }
                self.emit(Instr::Jump(start));
                if let Some(exit) = exit {
                    self.patch_jump(exit);
                }
                self.scopes.pop();
            }

            // A protected region. Control leaving via `await` resumes
            // inside the same region: the handler entry lives on the
            // frame's handler stack, which the machine persists across
            // suspension.
            Statement::Try { block, catch } => {
                let enter = self.emit_jump(Instr::EnterTry { catch: usize::MAX });
                self.lower_block(block)?;
                self.emit(Instr::LeaveTry);
                let to_end = self.emit_jump(Instr::Jump(usize::MAX));

                self.patch_jump(enter);
                self.scopes.push(FxHashMap::default());
                let slot = self.declare_local(&catch.param);
                self.emit(Instr::StoreLocal(slot));
                for statement in &catch.body {
                    self.lower_stmt(statement)?;
                }
                self.scopes.pop();
                self.patch_jump(to_end);
            }

            Statement::Class(_) | Statement::Function(_) => {
                return Err(CompileError::NestedDeclaration)
            }
        }
        Ok(())
    }

    pub(super) fn lower_block(&mut self, statements: &[Statement]) -> Result<(), CompileError> {
        self.scopes.push(FxHashMap::default());
        for statement in statements {
            self.lower_stmt(statement)?;
        }
        self.scopes.pop();
        Ok(())
    }
}
