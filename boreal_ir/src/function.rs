//! Function and basic block definitions with arena storage.

use crate::context::SymbolId;
use crate::error::CodegenError;
use crate::instruction::Inst;
use crate::operand::{Operand, VarId, Variable};
use crate::types::Type;

/// Reference to a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A basic block containing a sequence of instructions. Terminators are the
/// last instruction by construction.
#[derive(Debug, Default)]
pub struct Block {
    pub name: String,
    pub insts: Vec<Inst>,
}

/// A function in the boreal IR.
///
/// The function arena owns every variable; instructions refer to variables
/// by `VarId`. All allocations live for the function's lifetime.
#[derive(Debug)]
pub struct Function {
    pub name: SymbolId,
    /// File-local linkage (`.local` instead of `.globl`).
    pub internal: bool,
    pub args: Vec<VarId>,
    pub ret_ty: Type,
    pub variables: Vec<Variable>,
    pub blocks: Vec<Block>,
    /// Calls a returns-twice function (e.g. setjmp); disables locals
    /// coalescing in the frame builder.
    pub returns_twice: bool,
    /// Whether an external liveness pass has filled in kill sets and
    /// empty-live-range flags.
    pub liveness_computed: bool,
    error: Option<CodegenError>,
}

impl Function {
    pub fn new(name: SymbolId, ret_ty: Type) -> Self {
        Self {
            name,
            internal: false,
            args: Vec::new(),
            ret_ty,
            variables: Vec::new(),
            blocks: Vec::new(),
            returns_twice: false,
            liveness_computed: false,
            error: None,
        }
    }

    /// Create a variable with single-block life in `block` (or multi-block
    /// life when `block` is `None`).
    pub fn make_variable(&mut self, ty: Type, block: Option<BlockId>) -> VarId {
        let n = self.variables.len();
        self.make_named_variable(ty, block, format!("__{n}"))
    }

    pub fn make_named_variable(
        &mut self,
        ty: Type,
        block: Option<BlockId>,
        name: String,
    ) -> VarId {
        let id = VarId(self.variables.len() as u32);
        let mut var = Variable::new(ty, name);
        match block {
            Some(b) => var.local_use_block = Some(b),
            None => var.multi_block = true,
        }
        self.variables.push(var);
        id
    }

    /// Create an argument variable. Arguments live across blocks.
    pub fn make_arg(&mut self, ty: Type, name: String) -> VarId {
        let id = self.make_named_variable(ty, None, name);
        self.variables[id.index()].is_arg = true;
        self.args.push(id);
        id
    }

    pub fn make_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block { name: name.into(), insts: Vec::new() });
        id
    }

    pub fn push_inst(&mut self, block: BlockId, inst: Inst) {
        self.blocks[block.index()].insts.push(inst);
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id.index()]
    }

    /// The type of any operand.
    pub fn operand_ty(&self, op: &Operand) -> Type {
        match op {
            Operand::Var(v) => self.var(*v).ty,
            Operand::ConstInt { ty, .. } => *ty,
            Operand::ConstF32 { .. } => Type::F32,
            Operand::ConstF64 { .. } => Type::F64,
            Operand::ConstReloc { ty, .. } => *ty,
            Operand::Undef { ty } => *ty,
            Operand::Mem(mem) => mem.ty,
            Operand::Split { .. } => Type::I32,
        }
    }

    /// Record the first lowering error; later errors are dropped.
    pub fn set_error(&mut self, error: CodegenError) {
        if self.error.is_none() {
            log::debug!("lowering error: {error}");
            self.error = Some(error);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&CodegenError> {
        self.error.as_ref()
    }
}
