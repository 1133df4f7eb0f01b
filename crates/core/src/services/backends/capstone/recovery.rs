//! Whole-binary control-flow recovery by recursive descent.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use capstone::arch::x86::X86OperandType;
use capstone::arch::ArchOperand;
use capstone::{Capstone, InsnGroupId, RegId};

use super::convention::Signature;
use super::image::{Arch, ImageLayout};
use crate::model::FunctionDescriptor;

/// Longest instruction on any supported architecture.
const MAX_INSN_LEN: usize = 16;
/// Per-function decode budget; larger bodies are truncated (partial graph).
const MAX_FUNCTION_INSNS: usize = 16_384;
/// Upper bound on discovered functions.
const MAX_FUNCTIONS: usize = 65_536;
/// Upper bound on jump-table entries followed for one indirect jump.
const MAX_TABLE_ENTRIES: u64 = 512;
/// Spacing of synthetic extern functions.
const EXTERN_STRIDE: u64 = 0x10;

/// Mnemonics whose first operand is only read.
const X86_READ_ONLY: &[&str] = &["cmp", "test", "push", "call", "jmp", "bt"];
/// Mnemonics that read and write their first operand.
const X86_READ_MODIFY_WRITE: &[&str] = &[
    "add", "sub", "and", "or", "xor", "adc", "sbb", "imul", "shl", "sal", "shr", "sar", "rol",
    "ror", "inc", "dec", "neg", "not", "xadd", "xchg",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Normal,
    Call,
    Jump,
    CondJump,
    Return,
    Halt,
}

impl Flow {
    fn ends_block(self) -> bool {
        !matches!(self, Flow::Normal)
    }
}

/// Indexed memory operand that may be a jump table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TableRef {
    pub base: u64,
    pub stride: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Insn {
    pub address: u64,
    pub len: usize,
    pub mnemonic: String,
    pub op_str: String,
    pub flow: Flow,
    /// Direct branch or call target.
    pub target: Option<u64>,
    /// Pointer slot read by an indirect branch or call.
    pub indirect_slot: Option<u64>,
    pub table: Option<TableRef>,
    /// Address in a non-executable section referenced by an operand.
    pub data_ref: Option<u64>,
    /// `[ebp + N]` offset for 32-bit stack arguments.
    pub stack_arg: Option<i64>,
    /// Canonical (64-bit family) register names.
    pub reads: Vec<String>,
    pub writes: Vec<String>,
}

impl Insn {
    pub(crate) fn next(&self) -> u64 {
        self.address.saturating_add(self.len as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeKind {
    Fallthrough,
    Jump,
    ConditionalJump,
    IndirectJump,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edge {
    pub target: u64,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    /// Index of the terminating instruction in the owning function's `insns`.
    pub last: usize,
    pub successors: Vec<Edge>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecoveredFunction {
    pub descriptor: FunctionDescriptor,
    pub insns: Vec<Insn>,
    pub blocks: Vec<Block>,
    pub signature: Signature,
    /// Why the body could not be decoded at all.
    pub decode_error: Option<String>,
}

impl RecoveredFunction {
    fn external(name: String, address: u64) -> Self {
        let mut descriptor = FunctionDescriptor::new(name, address);
        descriptor.is_simprocedure = true;
        Self {
            descriptor,
            insns: Vec::new(),
            blocks: Vec::new(),
            signature: Signature::default(),
            decode_error: None,
        }
    }

    /// Addresses that some edge inside the function jumps to.
    pub(crate) fn branch_targets(&self) -> BTreeSet<u64> {
        self.blocks
            .iter()
            .flat_map(|b| b.successors.iter())
            .filter(|e| e.kind != EdgeKind::Fallthrough)
            .map(|e| e.target)
            .collect()
    }
}

/// Capstone handles for the image architecture (plus Thumb on 32-bit ARM).
pub(crate) struct Decoders {
    pub arch: Arch,
    pub primary: Capstone,
    pub thumb: Option<Capstone>,
}

impl Decoders {
    fn for_address(&self, addr: u64) -> (&Capstone, u64) {
        match (&self.thumb, addr & 1) {
            (Some(thumb), 1) => (thumb, addr & !1),
            _ => (&self.primary, addr),
        }
    }
}

#[derive(Debug, Clone)]
struct Seed {
    name: Option<String>,
    plt: bool,
}

/// Recover every function reachable from symbols, stubs, the entry point and
/// direct call targets. Functions are keyed (and enumerated) by entry address.
pub(crate) fn recover_functions(
    layout: &ImageLayout,
    decoders: &Decoders,
) -> BTreeMap<u64, RecoveredFunction> {
    let mut seeds: BTreeMap<u64, Seed> = BTreeMap::new();
    for sym in &layout.symbols {
        seeds.entry(sym.address).or_insert(Seed { name: Some(sym.name.clone()), plt: false });
    }
    for stub in &layout.plt_entries {
        seeds.insert(stub.address, Seed { name: Some(stub.name.clone()), plt: true });
    }
    if let Some(entry) = layout.entry {
        seeds.entry(entry).or_insert(Seed { name: Some("_start".into()), plt: false });
    }

    let mut functions = BTreeMap::new();
    let mut queue: VecDeque<u64> = seeds.keys().copied().collect();
    while let Some(addr) = queue.pop_front() {
        if functions.contains_key(&addr) {
            continue;
        }
        if functions.len() >= MAX_FUNCTIONS {
            tracing::debug!(limit = MAX_FUNCTIONS, "function budget exhausted");
            break;
        }
        let body = explore(layout, decoders, addr, &seeds);
        for target in &body.call_targets {
            if layout.code_section(*target).is_some() && !seeds.contains_key(target) {
                seeds.insert(*target, Seed { name: None, plt: false });
                queue.push_back(*target);
            }
        }

        let seed = seeds.get(&addr).cloned().unwrap_or(Seed { name: None, plt: false });
        let name = seed.name.unwrap_or_else(|| format!("sub_{addr:x}"));
        let mut descriptor = FunctionDescriptor::new(name, addr);
        descriptor.is_plt = seed.plt || layout.is_stub(addr) || is_import_thunk(layout, &body.insns);
        descriptor.is_alignment = !body.insns.is_empty() && body.insns.iter().all(is_padding);

        let blocks = build_blocks(&body.insns, &body.leaders, &body.indirect_targets);
        functions.insert(
            addr,
            RecoveredFunction {
                descriptor,
                insns: body.insns,
                blocks,
                signature: Signature::default(),
                decode_error: body.decode_error,
            },
        );
    }

    add_alignment_gaps(layout, decoders, &mut functions);

    if !layout.imports.is_empty() {
        add_externals(layout, &mut functions);
    }

    functions
}

/// Place one extern function per import past the last section.
fn add_externals(layout: &ImageLayout, functions: &mut BTreeMap<u64, RecoveredFunction>) {
    let Some(base) = layout.extern_base() else {
        tracing::debug!(imports = layout.imports.len(), "no address space left for externs");
        return;
    };
    for (idx, name) in layout.imports.iter().enumerate() {
        let Some(address) = (idx as u64)
            .checked_mul(EXTERN_STRIDE)
            .and_then(|offset| base.checked_add(offset))
        else {
            break;
        };
        functions.insert(address, RecoveredFunction::external(name.clone(), address));
    }
}

struct Body {
    insns: Vec<Insn>,
    leaders: BTreeSet<u64>,
    indirect_targets: BTreeMap<u64, Vec<u64>>,
    call_targets: Vec<u64>,
    decode_error: Option<String>,
}

fn explore(
    layout: &ImageLayout,
    decoders: &Decoders,
    entry: u64,
    known: &BTreeMap<u64, Seed>,
) -> Body {
    let mut insns: BTreeMap<u64, Insn> = BTreeMap::new();
    let mut leaders = BTreeSet::from([entry]);
    let mut indirect_targets = BTreeMap::new();
    let mut call_targets = Vec::new();
    let mut decode_error = None;
    let mut work = vec![entry];

    let other_function = |addr: u64| addr != entry && known.contains_key(&addr);

    while let Some(start) = work.pop() {
        let mut pc = start;
        loop {
            if insns.contains_key(&pc) || (pc != start && other_function(pc)) {
                break;
            }
            if insns.len() >= MAX_FUNCTION_INSNS {
                tracing::debug!(entry = %format_args!("0x{entry:x}"), "instruction budget exhausted");
                break;
            }
            let insn = match decode_at(layout, decoders, pc) {
                Ok(insn) => insn,
                Err(reason) => {
                    if pc == entry {
                        decode_error = Some(reason);
                    }
                    break;
                }
            };
            let next = insn.next();
            let (flow, target) = (insn.flow, insn.target);
            let resolved = if flow == Flow::Jump && target.is_none() {
                resolve_indirect(layout, &insn)
            } else {
                Vec::new()
            };
            insns.insert(pc, insn);

            match flow {
                Flow::Normal => pc = next,
                Flow::Call => {
                    call_targets.extend(target);
                    pc = next;
                }
                Flow::CondJump => {
                    if let Some(t) = target.filter(|t| !other_function(*t)) {
                        if layout.code_section(t).is_some() {
                            leaders.insert(t);
                            work.push(t);
                        }
                    }
                    leaders.insert(next);
                    work.push(next);
                    break;
                }
                Flow::Jump => {
                    if let Some(t) = target.filter(|t| !other_function(*t)) {
                        if layout.code_section(t).is_some() {
                            leaders.insert(t);
                            work.push(t);
                        }
                    }
                    if !resolved.is_empty() {
                        for t in resolved.iter().copied().filter(|t| !other_function(*t)) {
                            leaders.insert(t);
                            work.push(t);
                        }
                        indirect_targets.insert(pc, resolved);
                    }
                    break;
                }
                Flow::Return | Flow::Halt => break,
            }
        }
    }

    Body {
        insns: insns.into_values().collect(),
        leaders,
        indirect_targets,
        call_targets,
        decode_error,
    }
}

/// Targets of an indirect jump: a single pointer slot, or a jump table whose
/// entries all point into code.
fn resolve_indirect(layout: &ImageLayout, insn: &Insn) -> Vec<u64> {
    if let Some(slot) = insn.indirect_slot {
        if layout.import_slots.contains_key(&slot) {
            return Vec::new();
        }
        return layout
            .read_pointer(slot)
            .filter(|t| layout.code_section(*t).is_some())
            .into_iter()
            .collect();
    }
    let Some(table) = insn.table else { return Vec::new() };
    if layout.data_section(table.base).is_none() {
        return Vec::new();
    }
    let mut targets = Vec::new();
    for idx in 0..MAX_TABLE_ENTRIES {
        let Some(slot) = table.base.checked_add(idx * table.stride) else { break };
        let Some(target) = layout.read_pointer(slot) else { break };
        if layout.code_section(target).is_none() {
            break;
        }
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

fn build_blocks(
    insns: &[Insn],
    leaders: &BTreeSet<u64>,
    indirect_targets: &BTreeMap<u64, Vec<u64>>,
) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for (idx, insn) in insns.iter().enumerate() {
        let starts_block = match idx.checked_sub(1).map(|p| &insns[p]) {
            None => true,
            Some(prev) => {
                leaders.contains(&insn.address)
                    || prev.flow.ends_block()
                    || prev.next() != insn.address
            }
        };
        if starts_block {
            blocks.push(Block { last: idx, successors: Vec::new() });
        } else if let Some(block) = blocks.last_mut() {
            block.last = idx;
        }
    }

    let present: BTreeSet<u64> = insns.iter().map(|i| i.address).collect();
    for block in &mut blocks {
        let last = &insns[block.last];
        let fallthrough = Edge { target: last.next(), kind: EdgeKind::Fallthrough };
        let mut successors = Vec::new();
        match last.flow {
            Flow::Normal | Flow::Call => successors.push(fallthrough),
            Flow::CondJump => {
                if let Some(t) = last.target {
                    successors.push(Edge { target: t, kind: EdgeKind::ConditionalJump });
                }
                successors.push(fallthrough);
            }
            Flow::Jump => {
                if let Some(t) = last.target {
                    successors.push(Edge { target: t, kind: EdgeKind::Jump });
                }
                for t in indirect_targets.get(&last.address).into_iter().flatten() {
                    successors.push(Edge { target: *t, kind: EdgeKind::IndirectJump });
                }
            }
            Flow::Return | Flow::Halt => {}
        }
        // Edges leaving the function body are tail calls, not CFG edges.
        successors.retain(|e| present.contains(&e.target));
        block.successors = successors;
    }
    blocks
}

/// Decode runs of padding between recovered functions as alignment functions.
fn add_alignment_gaps(
    layout: &ImageLayout,
    decoders: &Decoders,
    functions: &mut BTreeMap<u64, RecoveredFunction>,
) {
    let mut covered: Vec<(u64, u64)> = functions
        .values()
        .flat_map(|f| f.insns.iter().map(|i| (i.address, i.next())))
        .collect();
    covered.sort_unstable();

    let mut gaps = Vec::new();
    for section in layout.sections.iter().filter(|s| s.executable && s.file_offset.is_some()) {
        let mut cursor = section.start;
        for (start, end) in covered.iter().filter(|(s, _)| section.contains(*s)) {
            if *start > cursor {
                gaps.push((cursor, *start));
            }
            cursor = cursor.max(*end);
        }
        if cursor < section.end && !covered.is_empty() {
            gaps.push((cursor, section.end));
        }
    }

    for (start, end) in gaps {
        let mut insns = Vec::new();
        let mut pc = start;
        while pc < end {
            match decode_at(layout, decoders, pc) {
                Ok(insn) if is_padding(&insn) && insn.next() <= end => {
                    pc = insn.next();
                    insns.push(insn);
                }
                _ => break,
            }
        }
        if pc != end || insns.is_empty() {
            continue;
        }
        let mut descriptor = FunctionDescriptor::new(format!("sub_{start:x}"), start);
        descriptor.is_alignment = true;
        let leaders = BTreeSet::from([start]);
        let blocks = build_blocks(&insns, &leaders, &BTreeMap::new());
        functions.entry(start).or_insert(RecoveredFunction {
            descriptor,
            insns,
            blocks,
            signature: Signature::default(),
            decode_error: None,
        });
    }
}

fn is_padding(insn: &Insn) -> bool {
    matches!(insn.mnemonic.as_str(), "nop" | "int3")
        || (insn.mnemonic == "xchg" && insn.op_str == "ax, ax")
}

/// A body whose first instruction jumps through an import slot is a thunk.
fn is_import_thunk(layout: &ImageLayout, insns: &[Insn]) -> bool {
    insns.first().is_some_and(|i| {
        i.flow == Flow::Jump && i.indirect_slot.is_some_and(|s| layout.import_slots.contains_key(&s))
    })
}

fn decode_at(layout: &ImageLayout, decoders: &Decoders, addr: u64) -> Result<Insn, String> {
    let (cs, real_addr) = decoders.for_address(addr);
    let code = layout
        .code_bytes(real_addr, MAX_INSN_LEN)
        .ok_or_else(|| format!("no file-backed code at 0x{addr:x}"))?;
    let decoded =
        cs.disasm_count(code, real_addr, 1).map_err(|e| format!("decode error at 0x{addr:x}: {e}"))?;
    let insn = decoded
        .iter()
        .next()
        .ok_or_else(|| format!("invalid instruction at 0x{addr:x}"))?;
    let detail = cs.insn_detail(&insn).map_err(|e| format!("no detail at 0x{addr:x}: {e}"))?;

    let mnemonic = insn.mnemonic().unwrap_or("").to_lowercase();
    let op_str = insn.op_str().unwrap_or("").to_string();
    let len = insn.bytes().len();
    let in_group = |group: u8| detail.groups().iter().any(|g| *g == InsnGroupId(group));

    let flow = if in_group(capstone::InsnGroupType::CS_GRP_CALL as u8) {
        Flow::Call
    } else if in_group(capstone::InsnGroupType::CS_GRP_RET as u8)
        || is_arm_return(decoders.arch, &mnemonic, &op_str)
    {
        Flow::Return
    } else if in_group(capstone::InsnGroupType::CS_GRP_JUMP as u8) {
        if is_conditional(decoders.arch, &mnemonic) {
            Flow::CondJump
        } else {
            Flow::Jump
        }
    } else if matches!(mnemonic.as_str(), "hlt" | "ud2") {
        Flow::Halt
    } else {
        Flow::Normal
    };

    // Keep the Thumb bit on branch targets so they decode in the right mode.
    let thumb_bit = addr & 1;
    let target = match flow {
        Flow::Call | Flow::Jump | Flow::CondJump => {
            decode_branch_target(&detail).map(|t| t | thumb_bit)
        }
        _ => None,
    };

    let mut insn = Insn {
        address: addr,
        len,
        mnemonic,
        op_str,
        flow,
        target,
        indirect_slot: None,
        table: None,
        data_ref: None,
        stack_arg: None,
        reads: Vec::new(),
        writes: Vec::new(),
    };
    if decoders.arch.is_x86() {
        analyze_x86_operands(cs, &detail, layout, &mut insn);
    }
    Ok(insn)
}

fn is_conditional(arch: Arch, mnemonic: &str) -> bool {
    match arch {
        Arch::X86 | Arch::X86_64 => {
            (mnemonic.starts_with('j') && mnemonic != "jmp") || mnemonic.starts_with("loop")
        }
        Arch::Arm64 => {
            mnemonic.starts_with("b.") || mnemonic.starts_with("cb") || mnemonic.starts_with("tb")
        }
        Arch::Arm => {
            mnemonic.starts_with("cb")
                || (mnemonic.starts_with('b') && !matches!(mnemonic, "b" | "bx" | "bl" | "blx" | "b.w"))
        }
    }
}

fn is_arm_return(arch: Arch, mnemonic: &str, op_str: &str) -> bool {
    match arch {
        Arch::Arm => {
            (mnemonic == "bx" && op_str == "lr")
                || (matches!(mnemonic, "pop" | "ldm" | "pop.w") && op_str.contains("pc"))
        }
        Arch::Arm64 => mnemonic == "ret",
        _ => false,
    }
}

fn decode_branch_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail.arch_detail().operands().iter().find_map(|op| match op {
        ArchOperand::X86Operand(op) => {
            if let X86OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        _ => None,
    })
}

/// Register def/use, data references and indirect slots for one x86 instruction.
fn analyze_x86_operands(
    cs: &Capstone,
    detail: &capstone::InsnDetail,
    layout: &ImageLayout,
    insn: &mut Insn,
) {
    let reg = |id: RegId| -> Option<String> {
        if id.0 == 0 {
            return None;
        }
        cs.reg_name(id).map(|name| canonical_register(&name))
    };
    let operands: Vec<X86OperandType> = detail
        .arch_detail()
        .operands()
        .into_iter()
        .filter_map(|op| match op {
            ArchOperand::X86Operand(op) => Some(op.op_type),
            _ => None,
        })
        .collect();

    let mnemonic = insn.mnemonic.as_str();
    let is_branch = matches!(insn.flow, Flow::Call | Flow::Jump | Flow::CondJump);
    let first_read_only = is_branch || X86_READ_ONLY.contains(&mnemonic);
    let first_rmw = X86_READ_MODIFY_WRITE.contains(&mnemonic)
        || mnemonic.starts_with("cmov")
        || (mnemonic == "imul" && operands.len() == 2);
    // `xor r, r` and `sub r, r` only define r.
    let zeroing = matches!(mnemonic, "xor" | "sub" | "pxor")
        && operands.len() == 2
        && matches!((&operands[0], &operands[1]), (X86OperandType::Reg(a), X86OperandType::Reg(b)) if a == b);

    for (idx, op) in operands.iter().enumerate() {
        match op {
            X86OperandType::Reg(id) => {
                let Some(name) = reg(*id) else { continue };
                if idx == 0 && !first_read_only {
                    if first_rmw && !zeroing {
                        insn.reads.push(name.clone());
                    }
                    insn.writes.push(name);
                } else if !zeroing {
                    insn.reads.push(name);
                }
            }
            X86OperandType::Mem(mem) => {
                let base = reg(mem.base());
                let index = reg(mem.index());
                let disp = mem.disp();
                insn.reads.extend(base.iter().cloned());
                insn.reads.extend(index.iter().cloned());

                let effective = match (base.as_deref(), index.as_deref()) {
                    (Some("rip"), None) => Some(insn.next().wrapping_add(disp as u64)),
                    (None, None) => Some(disp as u64),
                    _ => None,
                };
                if is_branch {
                    insn.indirect_slot = effective;
                    if base.is_none() && index.is_some() {
                        insn.table = Some(TableRef { base: disp as u64, stride: mem.scale() as u64 });
                    }
                } else if let Some(ea) = effective.filter(|ea| layout.data_section(*ea).is_some()) {
                    insn.data_ref = Some(ea);
                }
                if layout.arch == Arch::X86 && base.as_deref() == Some("rbp") && disp >= 8 {
                    insn.stack_arg = Some(disp);
                }
            }
            X86OperandType::Imm(value) => {
                let value = *value as u64;
                if !is_branch && insn.data_ref.is_none() && layout.data_section(value).is_some() {
                    insn.data_ref = Some(value);
                }
            }
            _ => {}
        }
    }
}

/// Map a sub-register to its 64-bit family name (`edi` -> `rdi`, `r8d` -> `r8`).
pub(crate) fn canonical_register(name: &str) -> String {
    let family = match name {
        "al" | "ah" | "ax" | "eax" | "rax" => "rax",
        "bl" | "bh" | "bx" | "ebx" | "rbx" => "rbx",
        "cl" | "ch" | "cx" | "ecx" | "rcx" => "rcx",
        "dl" | "dh" | "dx" | "edx" | "rdx" => "rdx",
        "sil" | "si" | "esi" | "rsi" => "rsi",
        "dil" | "di" | "edi" | "rdi" => "rdi",
        "bpl" | "bp" | "ebp" | "rbp" => "rbp",
        "spl" | "sp" | "esp" | "rsp" => "rsp",
        "ip" | "eip" | "rip" => "rip",
        other => {
            if let Some(rest) = other.strip_prefix('r') {
                let digits = rest.trim_end_matches(['b', 'w', 'd']);
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    return format!("r{digits}");
                }
            }
            other
        }
    };
    family.to_string()
}

#[cfg(test)]
mod tests {
    use super::super::image::{empty_layout, Format, SectionRange};
    use super::*;

    #[test]
    fn canonical_register_folds_sub_registers() {
        assert_eq!(canonical_register("edi"), "rdi");
        assert_eq!(canonical_register("dil"), "rdi");
        assert_eq!(canonical_register("r8d"), "r8");
        assert_eq!(canonical_register("r15b"), "r15");
        assert_eq!(canonical_register("xmm0"), "xmm0");
    }

    #[test]
    fn conditional_branches_are_recognized_per_arch() {
        assert!(is_conditional(Arch::X86_64, "jne"));
        assert!(!is_conditional(Arch::X86_64, "jmp"));
        assert!(is_conditional(Arch::Arm64, "b.eq"));
        assert!(is_conditional(Arch::Arm64, "cbz"));
        assert!(!is_conditional(Arch::Arm64, "b"));
        assert!(is_conditional(Arch::Arm, "bne"));
        assert!(!is_conditional(Arch::Arm, "bl"));
    }

    #[test]
    fn x86_loops_fall_through() {
        assert!(is_conditional(Arch::X86, "loop"));
        assert!(is_conditional(Arch::X86_64, "loope"));
        assert!(is_conditional(Arch::X86_64, "loopne"));
        assert!(is_conditional(Arch::X86_64, "jrcxz"));
    }

    #[test]
    fn externs_are_skipped_when_sections_reach_the_top_of_memory() {
        let mut layout = empty_layout(Format::Elf, Arch::X86_64);
        layout.sections.push(SectionRange {
            name: ".text".into(),
            start: 0xffff_ffff_ffff_f800,
            end: u64::MAX,
            file_offset: None,
            size: None,
            executable: true,
        });
        layout.imports.push("puts".into());
        assert_eq!(layout.extern_base(), None);

        let mut functions = BTreeMap::new();
        add_externals(&layout, &mut functions);
        assert!(functions.is_empty());
    }

    #[test]
    fn externs_follow_the_last_section() {
        let mut layout = empty_layout(Format::Elf, Arch::X86_64);
        layout.sections.push(SectionRange {
            name: ".text".into(),
            start: 0x1000,
            end: 0x1234,
            file_offset: None,
            size: None,
            executable: true,
        });
        layout.imports.extend(["puts".to_string(), "exit".to_string()]);

        let mut functions = BTreeMap::new();
        add_externals(&layout, &mut functions);
        let externs: Vec<(u64, &str)> =
            functions.values().map(|f| (f.descriptor.address, f.descriptor.name.as_str())).collect();
        assert_eq!(externs, vec![(0x2000, "puts"), (0x2010, "exit")]);
        assert!(functions.values().all(|f| f.descriptor.is_simprocedure));
    }

    #[test]
    fn instruction_end_saturates() {
        let insn = Insn {
            address: u64::MAX - 1,
            len: 4,
            mnemonic: "nop".into(),
            op_str: String::new(),
            flow: Flow::Normal,
            target: None,
            indirect_slot: None,
            table: None,
            data_ref: None,
            stack_arg: None,
            reads: Vec::new(),
            writes: Vec::new(),
        };
        assert_eq!(insn.next(), u64::MAX);
    }
}
