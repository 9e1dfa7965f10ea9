//! Global translation context: options, interned symbols, constant pools
//! and the random number generator.
//!
//! One context may back several per-function lowerings; the caller
//! serializes access (the pools intern under `&mut self`).

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::operand::Operand;

/// Interned symbol identifier. Indexes into the context symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Interned symbol table mapping names to `SymbolId`s.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: Vec<String>,
    lookup: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a symbol name, returning its `SymbolId`.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = SymbolId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), id);
        id
    }

    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.names[id.0 as usize]
    }
}

/// Translation pipeline selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    #[default]
    O2,
    /// Fast path: no register allocator, post-lowering colourer instead.
    Om1,
}

/// Instruction-set level for vector lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum InstructionSet {
    #[default]
    Sse2,
    Sse41,
}

/// Translation options (single level; no CLI here).
#[derive(Debug, Clone)]
pub struct Options {
    pub opt_level: OptLevel,
    pub instruction_set: InstructionSet,
    /// Selects the `gs:[0]` thread-pointer read over the helper call.
    pub use_sandboxing: bool,
    /// Prefix prepended to defined symbols by name mangling.
    pub test_prefix: String,
    pub do_nop_insertion: bool,
    pub nop_probability: f32,
    pub rand_seed: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::O2,
            instruction_set: InstructionSet::Sse2,
            use_sandboxing: false,
            test_prefix: String::new(),
            do_nop_insertion: false,
            nop_probability: 0.0,
            rand_seed: 1,
        }
    }
}

/// The only process-wide state: constant pools, options, symbols and RNG.
/// Always passed explicitly; lowering never reaches through ambient state.
pub struct GlobalContext {
    pub opts: Options,
    symbols: SymbolTable,
    f32_pool: Vec<f32>,
    f32_ids: HashMap<u32, u32>,
    f64_pool: Vec<f64>,
    f64_ids: HashMap<u64, u32>,
    rng: SmallRng,
}

impl GlobalContext {
    pub fn new(opts: Options) -> Self {
        let rng = SmallRng::seed_from_u64(opts.rand_seed);
        Self {
            opts,
            symbols: SymbolTable::new(),
            f32_pool: Vec::new(),
            f32_ids: HashMap::new(),
            f64_pool: Vec::new(),
            f64_ids: HashMap::new(),
            rng,
        }
    }

    pub fn intern(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn resolve(&self, id: SymbolId) -> &str {
        self.symbols.resolve(id)
    }

    /// Mangle a defined symbol name with the configured prefix.
    pub fn mangle_name(&self, name: &str) -> String {
        if self.opts.test_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}{}", self.opts.test_prefix, name)
        }
    }

    /// Intern an f32 into the constant pool; pooling is by bit pattern so
    /// NaN payloads and signed zeros stay distinct.
    pub fn get_const_f32(&mut self, value: f32) -> Operand {
        let bits = value.to_bits();
        let pool = *self.f32_ids.entry(bits).or_insert_with(|| {
            self.f32_pool.push(value);
            (self.f32_pool.len() - 1) as u32
        });
        Operand::ConstF32 { value, pool }
    }

    pub fn get_const_f64(&mut self, value: f64) -> Operand {
        let bits = value.to_bits();
        let pool = *self.f64_ids.entry(bits).or_insert_with(|| {
            self.f64_pool.push(value);
            (self.f64_pool.len() - 1) as u32
        });
        Operand::ConstF64 { value, pool }
    }

    pub fn f32_pool(&self) -> &[f32] {
        &self.f32_pool
    }

    pub fn f64_pool(&self) -> &[f64] {
        &self.f64_pool
    }

    /// Uniform sample in [0, 1) for probabilistic passes.
    pub fn random_probability(&mut self) -> f32 {
        self.rng.gen_range(0.0..1.0)
    }

    /// Uniform sample in [0, bound).
    pub fn random_below(&mut self, bound: u32) -> u32 {
        self.rng.gen_range(0..bound)
    }
}
