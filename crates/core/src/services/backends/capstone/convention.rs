//! Calling-convention recovery: parameter registers and return values.

use std::collections::{BTreeMap, HashSet};

use super::recovery::{Flow, Insn, RecoveredFunction};
use super::image::{Arch, Format, ImageLayout};

const SYSV64_ARGS: &[&str] = &["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const WIN64_ARGS: &[&str] = &["rcx", "rdx", "r8", "r9"];

/// Stack argument slots considered for cdecl; reads further up the frame are ignored.
const MAX_STACK_ARGS: i64 = 16;
/// Offset of the first cdecl argument from `ebp`.
const FIRST_STACK_ARG: i64 = 8;

/// Fixpoint bound for return propagation through tail calls.
const MAX_RETURN_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Convention {
    SysV64,
    Win64,
    Cdecl,
    #[default]
    Unknown,
}

impl Convention {
    pub(crate) fn for_image(format: Format, arch: Arch) -> Self {
        match (format, arch) {
            (Format::Pe, Arch::X86_64) => Convention::Win64,
            (_, Arch::X86_64) => Convention::SysV64,
            (_, Arch::X86) => Convention::Cdecl,
            _ => Convention::Unknown,
        }
    }

    fn arg_registers(self) -> &'static [&'static str] {
        match self {
            Convention::SysV64 => SYSV64_ARGS,
            Convention::Win64 => WIN64_ARGS,
            Convention::Cdecl | Convention::Unknown => &[],
        }
    }
}

/// Recovered prototype of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Signature {
    pub convention: Convention,
    pub params: Vec<String>,
    pub returns: bool,
}

/// Fill in `signature` for every function.
///
/// Arity is the union of what the body reads before writing and what call
/// sites set up before calling; a function returns a value when `rax` reaching
/// some `ret` was defined by the body or by a call to a returning function.
pub(crate) fn recover_signatures(
    layout: &ImageLayout,
    functions: &mut BTreeMap<u64, RecoveredFunction>,
) {
    let convention = Convention::for_image(layout.format, layout.arch);
    let args = convention.arg_registers();

    let mut arity: BTreeMap<u64, usize> = BTreeMap::new();
    for (addr, func) in functions.iter() {
        let own = match convention {
            Convention::Cdecl => stack_arity(&func.insns),
            _ => register_arity(&func.insns, args),
        };
        arity.insert(*addr, own);
    }

    if !args.is_empty() {
        for func in functions.values() {
            for (target, count) in call_site_arities(&func.insns, args) {
                if let Some(slot) = arity.get_mut(&target) {
                    *slot = (*slot).max(count);
                }
            }
        }
    }

    let mut returns: HashSet<u64> = HashSet::new();
    for _ in 0..MAX_RETURN_ROUNDS {
        let before = returns.len();
        for (addr, func) in functions.iter() {
            if !returns.contains(addr) && returns_value(&func.insns, &returns) {
                returns.insert(*addr);
            }
        }
        if returns.len() == before {
            break;
        }
    }

    for (addr, func) in functions.iter_mut() {
        let count = arity.get(addr).copied().unwrap_or(0);
        let params = match convention {
            Convention::Cdecl => {
                (0..count as i64).map(|i| format!("arg_{:x}", FIRST_STACK_ARG + i * 4)).collect()
            }
            _ => args.iter().take(count).map(|r| r.to_string()).collect(),
        };
        func.signature = Signature { convention, params, returns: returns.contains(addr) };
    }
}

/// Highest argument register read before being defined, plus one.
fn register_arity(insns: &[Insn], args: &[&str]) -> usize {
    let mut defined: HashSet<&str> = HashSet::new();
    let mut count = 0;
    for insn in insns {
        for read in &insn.reads {
            if let Some(idx) = args.iter().position(|a| a == read) {
                if !defined.contains(args[idx]) {
                    count = count.max(idx + 1);
                }
            }
        }
        if insn.flow == Flow::Call {
            // Argument registers are caller-saved.
            defined.extend(args.iter().copied());
        }
        for write in &insn.writes {
            if let Some(arg) = args.iter().find(|a| **a == write.as_str()) {
                defined.insert(*arg);
            }
        }
    }
    count
}

/// Number of `[ebp + 8 + 4k]` slots the body reads, up to `MAX_STACK_ARGS`.
fn stack_arity(insns: &[Insn]) -> usize {
    insns
        .iter()
        .filter_map(|i| i.stack_arg)
        .filter(|offset| (FIRST_STACK_ARG..FIRST_STACK_ARG + 4 * MAX_STACK_ARGS).contains(offset))
        .map(|offset| ((offset - FIRST_STACK_ARG) / 4 + 1) as usize)
        .max()
        .unwrap_or(0)
}

/// For each direct call, the argument registers written since the previous call.
fn call_site_arities(insns: &[Insn], args: &[&str]) -> Vec<(u64, usize)> {
    let mut sites = Vec::new();
    let mut staged = 0usize;
    let mut prev_end = None;
    for insn in insns {
        // A gap means a new basic block; nothing staged carries across it.
        if prev_end.is_some_and(|end| end != insn.address) {
            staged = 0;
        }
        prev_end = Some(insn.next());
        if insn.flow == Flow::Call {
            if let Some(target) = insn.target {
                sites.push((target, staged));
            }
            staged = 0;
            continue;
        }
        if matches!(insn.flow, Flow::Jump | Flow::CondJump | Flow::Return | Flow::Halt) {
            staged = 0;
            continue;
        }
        for write in &insn.writes {
            if let Some(idx) = args.iter().position(|a| a == write) {
                staged = staged.max(idx + 1);
            }
        }
    }
    sites
}

/// Whether `rax` is defined on the way to some `ret` (or a tail call to a
/// returning function).
fn returns_value(insns: &[Insn], returning: &HashSet<u64>) -> bool {
    let mut rax_defined = false;
    let mut prev_end = None;
    for insn in insns {
        if prev_end.is_some_and(|end| end != insn.address) {
            rax_defined = false;
        }
        prev_end = Some(insn.next());
        match insn.flow {
            Flow::Call => {
                rax_defined = insn.target.is_some_and(|t| returning.contains(&t));
            }
            Flow::Return if rax_defined => return true,
            Flow::Jump => {
                if insn.target.is_some_and(|t| returning.contains(&t)) {
                    return true;
                }
            }
            _ => {
                if insn.writes.iter().any(|w| w == "rax") {
                    rax_defined = true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insn(address: u64, flow: Flow, reads: &[&str], writes: &[&str]) -> Insn {
        Insn {
            address,
            len: 1,
            mnemonic: String::new(),
            op_str: String::new(),
            flow,
            target: None,
            indirect_slot: None,
            table: None,
            data_ref: None,
            stack_arg: None,
            reads: reads.iter().map(|r| r.to_string()).collect(),
            writes: writes.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[test]
    fn arity_counts_registers_read_before_written() {
        let body = vec![
            insn(0, Flow::Normal, &["rdi"], &["rax"]),
            insn(1, Flow::Normal, &["rax", "rsi"], &["rax"]),
            insn(2, Flow::Return, &[], &[]),
        ];
        assert_eq!(register_arity(&body, SYSV64_ARGS), 2);
        assert!(returns_value(&body, &HashSet::new()));
    }

    #[test]
    fn registers_defined_first_are_not_parameters() {
        let body = vec![
            insn(0, Flow::Normal, &[], &["rdx"]),
            insn(1, Flow::Normal, &["rdx"], &["rax"]),
            insn(2, Flow::Return, &[], &[]),
        ];
        assert_eq!(register_arity(&body, SYSV64_ARGS), 0);
    }

    #[test]
    fn call_sites_raise_callee_arity() {
        let mut call = insn(2, Flow::Call, &[], &[]);
        call.target = Some(0x40);
        let body = vec![
            insn(0, Flow::Normal, &[], &["rdi"]),
            insn(1, Flow::Normal, &[], &["rsi"]),
            call,
        ];
        assert_eq!(call_site_arities(&body, SYSV64_ARGS), vec![(0x40, 2)]);
    }

    #[test]
    fn return_flows_through_calls_to_returning_functions() {
        let mut call = insn(0, Flow::Call, &[], &[]);
        call.target = Some(0x40);
        let body =
            vec![call, insn(1, Flow::Normal, &["rsp"], &["rbp"]), insn(2, Flow::Return, &[], &[])];
        assert!(!returns_value(&body, &HashSet::new()));
        assert!(returns_value(&body, &HashSet::from([0x40])));
    }

    #[test]
    fn cdecl_arity_comes_from_frame_offsets() {
        let mut a = insn(0, Flow::Normal, &["rbp"], &["rax"]);
        a.stack_arg = Some(0xc);
        assert_eq!(stack_arity(&[a]), 2);
    }

    #[test]
    fn cdecl_arity_ignores_reads_past_the_argument_window() {
        let mut far = insn(0, Flow::Normal, &["rbp"], &["rax"]);
        far.stack_arg = Some(0x10_0000);
        let mut huge = insn(1, Flow::Normal, &["rbp"], &["rax"]);
        huge.stack_arg = Some(0x7fff_fff0);
        assert_eq!(stack_arity(&[far.clone(), huge]), 0);

        let mut last = insn(2, Flow::Normal, &["rbp"], &["rax"]);
        last.stack_arg = Some(FIRST_STACK_ARG + 4 * (MAX_STACK_ARGS - 1));
        assert_eq!(stack_arity(&[far, last]), MAX_STACK_ARGS as usize);
    }
}
