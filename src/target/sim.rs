//! In-memory inferior
//!
//! [`SimInferior`] implements all three collaborator traits over plain data:
//! a sparse byte-addressed memory, a symbol table, a handful of named
//! variables and per-thread frame stacks. The expression language is tiny:
//!
//! ```text
//! expr    := operand [ ("==" | "!=" | "<" | "<=" | ">" | ">=") operand ]
//! operand := integer | name | "*" name | "call" name
//! ```
//!
//! `*name` treats `name` as an 8-byte pointer to a 4-byte int. `call name`
//! runs a function in the target, which bumps the run generation and is
//! recorded in [`SimInferior::calls`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::{
    Address, CatchHook, ChainEntry, CompiledExpr, EvalError, EvalScope, Evaluation,
    ExpressionEvaluator, FrameId, HwResource, LocationResolver, MemoryRange, ModuleId,
    ModuleInfo, NativeEvent, Resolution, ResolveError, ResolvedMatch, SectionId, SectionInfo,
    TargetControl, TargetError, ThreadId, Value, WatchAccess,
};
use crate::breakpoint::LocationSpec;

/// Reads below this address fault
const NULL_PAGE: Address = 0x100;

/// x86 `int3`
const TRAP: u8 = 0xcc;

const DEFAULT_HW_SLOTS: usize = 4;
const DEFAULT_MAX_WATCH_LEN: usize = 8;

#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    address: Address,
    module: Option<ModuleId>,
}

#[derive(Debug, Clone)]
struct LineEntry {
    file: String,
    line: u32,
    address: Address,
    module: Option<ModuleId>,
}

#[derive(Debug, Clone)]
struct Variable {
    address: Address,
    size: usize,
    /// Frame-local variables are only valid while this frame is live
    frame: Option<FrameId>,
}

#[derive(Debug, Clone)]
struct VarRef {
    name: String,
    variable: Variable,
}

#[derive(Debug, Clone)]
enum Operand {
    Literal(i64),
    Var(VarRef),
    Deref(VarRef),
    Call(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Expr {
    Single(Operand),
    Compare(Operand, CmpOp, Operand),
}

impl Expr {
    fn frame_bound(&self) -> bool {
        let bound = |op: &Operand| match op {
            Operand::Var(v) | Operand::Deref(v) => v.variable.frame.is_some(),
            _ => false,
        };
        match self {
            Self::Single(op) => bound(op),
            Self::Compare(a, _, b) => bound(a) || bound(b),
        }
    }
}

/// Deterministic target used by tests and the scenario runner
#[derive(Debug)]
pub struct SimInferior {
    memory: HashMap<Address, u8>,
    protected: HashSet<Address>,
    writes: HashMap<Address, usize>,

    sections: BTreeMap<SectionId, SectionInfo>,
    mapped: HashSet<SectionId>,
    can_instrument_overlays: bool,

    modules: BTreeMap<ModuleId, ModuleInfo>,
    loaded: BTreeSet<ModuleId>,
    symbols: Vec<Symbol>,
    lines: Vec<LineEntry>,
    variables: BTreeMap<String, Variable>,

    stacks: BTreeMap<ThreadId, Vec<(FrameId, Address)>>,

    hw_capacity: HashMap<HwResource, usize>,
    max_watch_len: usize,
    hw_breakpoints: Vec<Address>,
    hw_watchpoints: Vec<(MemoryRange, WatchAccess)>,
    catch_hooks: Vec<CatchHook>,

    stopped_data_address: Option<Address>,
    native_event: Option<NativeEvent>,
    exception_type: Option<String>,
    exception_queries: usize,

    compiled: Vec<Expr>,
    compile_count: usize,

    generation: u64,
    calls: Vec<String>,
    global_single_step: bool,
    single_steps: Vec<ThreadId>,
    detached: bool,
}

impl Default for SimInferior {
    fn default() -> Self {
        Self::new()
    }
}

impl SimInferior {
    pub fn new() -> Self {
        Self {
            memory: HashMap::new(),
            protected: HashSet::new(),
            writes: HashMap::new(),
            sections: BTreeMap::new(),
            mapped: HashSet::new(),
            can_instrument_overlays: false,
            modules: BTreeMap::new(),
            loaded: BTreeSet::new(),
            symbols: Vec::new(),
            lines: Vec::new(),
            variables: BTreeMap::new(),
            stacks: BTreeMap::new(),
            hw_capacity: HashMap::new(),
            max_watch_len: DEFAULT_MAX_WATCH_LEN,
            hw_breakpoints: Vec::new(),
            hw_watchpoints: Vec::new(),
            catch_hooks: Vec::new(),
            stopped_data_address: None,
            native_event: None,
            exception_type: None,
            exception_queries: 0,
            compiled: Vec::new(),
            compile_count: 0,
            generation: 0,
            calls: Vec::new(),
            global_single_step: false,
            single_steps: Vec::new(),
            detached: false,
        }
    }

    // === Memory ===

    /// Poke memory directly, bypassing protection and the write log
    pub fn write_bytes(&mut self, address: Address, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(address + i as u64, *byte);
        }
    }

    pub fn bytes(&self, address: Address, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.memory.get(&(address + i)).copied().unwrap_or(0))
            .collect()
    }

    /// Make writes through `write_memory` fail at this address
    pub fn protect(&mut self, address: Address) {
        self.protected.insert(address);
    }

    pub fn unprotect(&mut self, address: Address) {
        self.protected.remove(&address);
    }

    /// How many `write_memory` calls touched this address
    pub fn write_count(&self, address: Address) -> usize {
        self.writes.get(&address).copied().unwrap_or(0)
    }

    /// Store an integer in a named variable
    pub fn set_value(&mut self, name: &str, value: i64) {
        if let Some(var) = self.variables.get(name).cloned() {
            let bytes = value.to_le_bytes();
            self.write_bytes(var.address, &bytes[..var.size.min(8)]);
        }
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        let var = self.variables.get(name)?;
        Some(decode_int(&self.bytes(var.address, var.size)))
    }

    // === Symbols and modules ===

    pub fn add_function(&mut self, name: &str, address: Address, module: Option<ModuleId>) {
        self.symbols.push(Symbol {
            name: name.to_string(),
            address,
            module,
        });
    }

    pub fn add_line(&mut self, file: &str, line: u32, address: Address, module: Option<ModuleId>) {
        self.lines.push(LineEntry {
            file: file.to_string(),
            line,
            address,
            module,
        });
    }

    /// Register and load a module
    pub fn add_module(&mut self, id: ModuleId, name: &str, shared: bool) {
        self.modules.insert(
            id,
            ModuleInfo {
                id,
                name: name.to_string(),
                shared,
            },
        );
        self.loaded.insert(id);
    }

    /// Symbols of an unloaded module stop resolving until it is loaded again
    pub fn unload_module(&mut self, id: ModuleId) {
        self.loaded.remove(&id);
    }

    pub fn load_module(&mut self, id: ModuleId) {
        if self.modules.contains_key(&id) {
            self.loaded.insert(id);
        }
    }

    pub fn add_variable(&mut self, name: &str, address: Address, size: usize) {
        self.variables.insert(
            name.to_string(),
            Variable {
                address,
                size,
                frame: None,
            },
        );
    }

    /// A variable that lives in one frame
    pub fn add_local(&mut self, name: &str, address: Address, size: usize, frame: FrameId) {
        self.variables.insert(
            name.to_string(),
            Variable {
                address,
                size,
                frame: Some(frame),
            },
        );
    }

    // === Sections ===

    pub fn add_overlay_section(&mut self, id: SectionId, vma: Address, lma: Address, size: u64) {
        self.sections.insert(
            id,
            SectionInfo {
                id,
                module: None,
                vma,
                lma,
                size,
                overlay: true,
            },
        );
    }

    pub fn map_overlay(&mut self, id: SectionId, mapped: bool) {
        if mapped {
            self.mapped.insert(id);
        } else {
            self.mapped.remove(&id);
        }
    }

    pub fn set_can_instrument_overlays(&mut self, enabled: bool) {
        self.can_instrument_overlays = enabled;
    }

    fn section_at(&self, address: Address) -> Option<SectionId> {
        self.sections
            .values()
            .find(|s| s.contains(address))
            .map(|s| s.id)
    }

    // === Frames ===

    /// Call into `frame`; execution returns to `return_address` in the caller
    pub fn push_frame(&mut self, thread: ThreadId, frame: FrameId, return_address: Address) {
        self.stacks
            .entry(thread)
            .or_default()
            .push((frame, return_address));
    }

    pub fn pop_frame(&mut self, thread: ThreadId) -> Option<FrameId> {
        self.stacks
            .get_mut(&thread)
            .and_then(|stack| stack.pop())
            .map(|(frame, _)| frame)
    }

    // === Hardware ===

    pub fn set_hw_capacity(&mut self, resource: HwResource, slots: usize) {
        self.hw_capacity.insert(resource, slots);
    }

    pub fn set_max_watch_len(&mut self, len: usize) {
        self.max_watch_len = len;
    }

    pub fn hw_breakpoints(&self) -> Vec<Address> {
        self.hw_breakpoints.clone()
    }

    pub fn hw_watchpoints(&self) -> Vec<(MemoryRange, WatchAccess)> {
        self.hw_watchpoints.clone()
    }

    pub fn catch_hooks(&self) -> Vec<CatchHook> {
        self.catch_hooks.clone()
    }

    // === Stop state ===

    pub fn set_stopped_data_address(&mut self, address: Option<Address>) {
        self.stopped_data_address = address;
    }

    pub fn set_native_event(&mut self, event: Option<NativeEvent>) {
        self.native_event = event;
    }

    pub fn set_exception_type(&mut self, name: Option<&str>) {
        self.exception_type = name.map(str::to_string);
    }

    pub fn exception_type_queries(&self) -> usize {
        self.exception_queries
    }

    pub fn compile_count(&self) -> usize {
        self.compile_count
    }

    /// Functions run by `call` expressions, oldest first
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Pretend the target ran and stopped again
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }

    pub fn global_single_step(&self) -> bool {
        self.global_single_step
    }

    pub fn single_steps(&self) -> &[ThreadId] {
        &self.single_steps
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    // === Expressions ===

    fn parse_operand(&self, token: &str, scope: &EvalScope) -> Result<Operand, EvalError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(syntax_error(token));
        }
        if let Some(name) = token.strip_prefix("call ") {
            let name = name.trim();
            if !self.symbols.iter().any(|s| s.name == name) {
                return Err(EvalError(format!("No symbol \"{}\" in current context.", name)));
            }
            return Ok(Operand::Call(name.to_string()));
        }
        if let Some(value) = parse_int(token) {
            return Ok(Operand::Literal(value));
        }
        if let Some(name) = token.strip_prefix('*') {
            return Ok(Operand::Deref(self.lookup(name.trim(), scope)?));
        }
        Ok(Operand::Var(self.lookup(token, scope)?))
    }

    fn lookup(&self, name: &str, scope: &EvalScope) -> Result<VarRef, EvalError> {
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(syntax_error(name));
        }
        let variable = self
            .variables
            .get(name)
            .filter(|v| match (v.frame, scope.frame) {
                (Some(local), Some(frame)) => local == frame,
                _ => true,
            })
            .ok_or_else(|| EvalError(format!("No symbol \"{}\" in current context.", name)))?;
        Ok(VarRef {
            name: name.to_string(),
            variable: variable.clone(),
        })
    }

    fn read_var(&self, var: &VarRef, len: usize) -> Result<(Vec<u8>, MemoryRange), EvalError> {
        if let Some(frame) = var.variable.frame {
            if !self.frame_is_live(frame) {
                return Err(EvalError(format!(
                    "No frame is currently executing for \"{}\".",
                    var.name
                )));
            }
        }
        let range = MemoryRange::new(var.variable.address, len);
        let bytes = self
            .peek(range)
            .map_err(|e| EvalError(e.to_string()))?;
        Ok((bytes, range))
    }

    fn peek(&self, range: MemoryRange) -> Result<Vec<u8>, TargetError> {
        if range.address < NULL_PAGE {
            return Err(TargetError::Memory(range.address));
        }
        Ok(self.bytes(range.address, range.len))
    }

    fn eval_operand(
        &mut self,
        op: &Operand,
        chain: &mut Vec<ChainEntry>,
    ) -> Result<Value, EvalError> {
        match op {
            Operand::Literal(n) => Ok(int_value(*n)),
            Operand::Var(var) => {
                let (bytes, range) = self.read_var(var, var.variable.size)?;
                let value = memory_value(bytes);
                chain.push(ChainEntry {
                    value: value.clone(),
                    memory: Some(range),
                });
                Ok(value)
            }
            Operand::Deref(var) => {
                let (bytes, range) = self.read_var(var, 8)?;
                let pointer = decode_int(&bytes) as Address;
                chain.push(ChainEntry {
                    value: memory_value(bytes),
                    memory: Some(range),
                });
                let target = MemoryRange::new(pointer, 4);
                let bytes = self.peek(target).map_err(|e| EvalError(e.to_string()))?;
                let value = memory_value(bytes);
                chain.push(ChainEntry {
                    value: value.clone(),
                    memory: Some(target),
                });
                Ok(value)
            }
            Operand::Call(name) => {
                self.calls.push(name.clone());
                self.generation += 1;
                Ok(int_value(0))
            }
        }
    }
}

fn syntax_error(near: &str) -> EvalError {
    EvalError(format!("A syntax error in expression, near `{}'.", near))
}

fn parse_int(token: &str) -> Option<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None if digits.chars().all(|c| c.is_ascii_digit()) => digits.parse().ok()?,
        None => return None,
    };
    Some(if negative { -value } else { value })
}

fn decode_int(bytes: &[u8]) -> i64 {
    match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        _ => {
            let mut buf = [0u8; 8];
            for (dst, src) in buf.iter_mut().zip(bytes) {
                *dst = *src;
            }
            i64::from_le_bytes(buf)
        }
    }
}

fn int_value(n: i64) -> Value {
    Value {
        type_name: "int".to_string(),
        contents: (n as i32).to_le_bytes().to_vec(),
        display: n.to_string(),
    }
}

fn memory_value(bytes: Vec<u8>) -> Value {
    let (type_name, display) = match bytes.len() {
        1 => ("char".to_string(), decode_int(&bytes).to_string()),
        2 => ("short".to_string(), decode_int(&bytes).to_string()),
        4 => ("int".to_string(), decode_int(&bytes).to_string()),
        8 => ("long".to_string(), decode_int(&bytes).to_string()),
        n => {
            let shown: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
            (format!("char[{}]", n), format!("{{{}}}", shown.join(", ")))
        }
    };
    Value {
        type_name,
        contents: bytes,
        display,
    }
}

fn split_comparison(text: &str) -> Option<(&str, CmpOp, &str)> {
    const OPS: [(&str, CmpOp); 6] = [
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ];
    OPS.iter().find_map(|(token, op)| {
        text.find(token)
            .map(|at| (&text[..at], *op, &text[at + token.len()..]))
    })
}

impl TargetControl for SimInferior {
    fn read_memory(&mut self, address: Address, len: usize) -> Result<Vec<u8>, TargetError> {
        self.peek(MemoryRange::new(address, len))
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<(), TargetError> {
        let range = address..address + data.len() as u64;
        if let Some(bad) = range.clone().find(|a| self.protected.contains(a) || *a < NULL_PAGE) {
            return Err(TargetError::Memory(bad));
        }
        for a in range {
            *self.writes.entry(a).or_default() += 1;
        }
        self.write_bytes(address, data);
        Ok(())
    }

    fn breakpoint_encoding(&self, _address: Address) -> Vec<u8> {
        vec![TRAP]
    }

    fn insert_hw_breakpoint(&mut self, address: Address) -> Result<(), TargetError> {
        if self.hw_breakpoints.len() >= self.hw_slot_capacity(HwResource::Breakpoint) {
            return Err(TargetError::NoHardwareSlot("breakpoint".to_string()));
        }
        self.hw_breakpoints.push(address);
        Ok(())
    }

    fn remove_hw_breakpoint(&mut self, address: Address) -> Result<(), TargetError> {
        if let Some(at) = self.hw_breakpoints.iter().position(|a| *a == address) {
            self.hw_breakpoints.remove(at);
        }
        Ok(())
    }

    fn insert_hw_watchpoint(
        &mut self,
        range: MemoryRange,
        access: WatchAccess,
    ) -> Result<(), TargetError> {
        if self.hw_watchpoints.len() >= self.hw_slot_capacity(HwResource::Watchpoint) {
            return Err(TargetError::NoHardwareSlot("watchpoint".to_string()));
        }
        if !self.region_ok_for_hw_watch(range) {
            return Err(TargetError::Unsupported(format!(
                "cannot watch {} bytes at {:#x}",
                range.len, range.address
            )));
        }
        self.hw_watchpoints.push((range, access));
        Ok(())
    }

    fn remove_hw_watchpoint(
        &mut self,
        range: MemoryRange,
        access: WatchAccess,
    ) -> Result<(), TargetError> {
        if let Some(at) = self
            .hw_watchpoints
            .iter()
            .position(|w| *w == (range, access))
        {
            self.hw_watchpoints.remove(at);
        }
        Ok(())
    }

    fn hw_slot_capacity(&self, resource: HwResource) -> usize {
        self.hw_capacity
            .get(&resource)
            .copied()
            .unwrap_or(DEFAULT_HW_SLOTS)
    }

    fn region_ok_for_hw_watch(&self, range: MemoryRange) -> bool {
        range.len > 0 && range.len <= self.max_watch_len
    }

    fn stopped_data_address(&self) -> Option<Address> {
        self.stopped_data_address
    }

    fn native_event(&self) -> Option<NativeEvent> {
        self.native_event.clone()
    }

    fn insert_catch_hook(&mut self, hook: CatchHook) -> Result<(), TargetError> {
        self.catch_hooks.push(hook);
        Ok(())
    }

    fn remove_catch_hook(&mut self, hook: CatchHook) -> Result<(), TargetError> {
        if let Some(at) = self.catch_hooks.iter().position(|h| *h == hook) {
            self.catch_hooks.remove(at);
        }
        Ok(())
    }

    fn current_exception_type(&mut self) -> Option<String> {
        self.exception_queries += 1;
        self.exception_type.clone()
    }

    fn section_info(&self, section: SectionId) -> Option<SectionInfo> {
        self.sections.get(&section).cloned()
    }

    fn section_is_mapped(&self, section: SectionId) -> bool {
        match self.sections.get(&section) {
            Some(info) if info.overlay => self.mapped.contains(&section),
            Some(_) => true,
            None => false,
        }
    }

    fn can_instrument_mapped_overlays(&self) -> bool {
        self.can_instrument_overlays
    }

    fn module_info(&self, module: ModuleId) -> Option<ModuleInfo> {
        self.modules.get(&module).cloned()
    }

    fn current_frame(&self, thread: ThreadId) -> Option<FrameId> {
        self.stacks
            .get(&thread)
            .and_then(|stack| stack.last())
            .map(|(frame, _)| *frame)
    }

    fn frame_is_live(&self, frame: FrameId) -> bool {
        self.stacks
            .values()
            .any(|stack| stack.iter().any(|(f, _)| *f == frame))
    }

    fn caller_of(&self, frame: FrameId) -> Option<(FrameId, Address)> {
        self.stacks.values().find_map(|stack| {
            let at = stack.iter().position(|(f, _)| *f == frame)?;
            let (_, return_address) = stack[at];
            let (caller, _) = *stack.get(at.checked_sub(1)?)?;
            Some((caller, return_address))
        })
    }

    fn run_generation(&self) -> u64 {
        self.generation
    }

    fn set_global_single_step(&mut self, enabled: bool) {
        self.global_single_step = enabled;
    }

    fn single_step(&mut self, thread: ThreadId) -> Result<(), TargetError> {
        if self.detached {
            return Err(TargetError::NotRunning);
        }
        self.single_steps.push(thread);
        self.generation += 1;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TargetError> {
        if self.detached {
            return Err(TargetError::NotRunning);
        }
        self.generation += 1;
        Ok(())
    }

    fn detach(&mut self) -> Result<(), TargetError> {
        self.detached = true;
        Ok(())
    }
}

impl LocationResolver for SimInferior {
    fn resolve(&mut self, spec: &LocationSpec) -> Result<Resolution, ResolveError> {
        let visible = |module: Option<ModuleId>| module.map_or(true, |m| self.loaded.contains(&m));
        let matches: Vec<ResolvedMatch> = match spec {
            LocationSpec::Address { address } => {
                let symbol = self.symbols.iter().find(|s| s.address == *address);
                vec![ResolvedMatch {
                    address: *address,
                    section: self.section_at(*address),
                    module: symbol.and_then(|s| s.module),
                    file: None,
                    line: None,
                    function: symbol.map(|s| s.name.clone()),
                }]
            }
            LocationSpec::Function { name } => self
                .symbols
                .iter()
                .filter(|s| s.name == *name && visible(s.module))
                .map(|s| ResolvedMatch {
                    address: s.address,
                    section: self.section_at(s.address),
                    module: s.module,
                    file: None,
                    line: None,
                    function: Some(s.name.clone()),
                })
                .collect(),
            LocationSpec::Line { file, line } => self
                .lines
                .iter()
                .filter(|l| {
                    l.line == *line
                        && (l.file == *file || l.file.ends_with(&format!("/{}", file)))
                        && visible(l.module)
                })
                .map(|l| ResolvedMatch {
                    address: l.address,
                    section: self.section_at(l.address),
                    module: l.module,
                    file: Some(l.file.clone()),
                    line: Some(l.line),
                    function: None,
                })
                .collect(),
        };
        if matches.is_empty() {
            return Err(ResolveError::NotFound(spec.to_string()));
        }
        Ok(Resolution {
            canonical: spec.to_string(),
            matches,
        })
    }
}

impl ExpressionEvaluator for SimInferior {
    fn compile(&mut self, text: &str, scope: &EvalScope) -> Result<CompiledExpr, EvalError> {
        self.compile_count += 1;
        let text = text.trim();
        let expr = match split_comparison(text) {
            Some((lhs, op, rhs)) => Expr::Compare(
                self.parse_operand(lhs, scope)?,
                op,
                self.parse_operand(rhs, scope)?,
            ),
            None => Expr::Single(self.parse_operand(text, scope)?),
        };
        let frame_bound = expr.frame_bound();
        self.compiled.push(expr);
        Ok(CompiledExpr {
            text: text.to_string(),
            handle: (self.compiled.len() - 1) as u64,
            frame_bound,
        })
    }

    fn evaluate(&mut self, expr: &CompiledExpr, _thread: ThreadId) -> Result<Evaluation, EvalError> {
        let parsed = self
            .compiled
            .get(expr.handle as usize)
            .cloned()
            .ok_or_else(|| EvalError(format!("stale expression handle for `{}'", expr.text)))?;
        let mut chain = Vec::new();
        let value = match parsed {
            Expr::Single(op) => self.eval_operand(&op, &mut chain)?,
            Expr::Compare(lhs, op, rhs) => {
                let a = decode_int(&self.eval_operand(&lhs, &mut chain)?.contents);
                let b = decode_int(&self.eval_operand(&rhs, &mut chain)?.contents);
                let result = match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                };
                int_value(result as i64)
            }
        };
        Ok(Evaluation { value, chain })
    }
}
