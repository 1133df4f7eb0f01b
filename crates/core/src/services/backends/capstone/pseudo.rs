//! Pseudo-C rendering of a recovered function.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use super::recovery::{canonical_register, Flow, Insn, RecoveredFunction};
use super::image::{Arch, ImageLayout};

const INDENT: &str = "    ";

/// Instructions that only maintain the frame and carry no dataflow worth showing.
fn is_frame_noise(insn: &Insn) -> bool {
    match insn.mnemonic.as_str() {
        "endbr64" | "endbr32" | "leave" | "nop" => true,
        "push" | "pop" => matches!(insn.op_str.as_str(), "rbp" | "ebp"),
        "mov" => matches!(insn.op_str.as_str(), "rbp, rsp" | "ebp, esp"),
        _ => false,
    }
}

/// Operands of the last `cmp`/`test`, consumed by conditional instructions.
#[derive(Debug, Clone)]
enum Condition {
    Compare(String, String),
    Test(String),
}

struct Renderer<'a> {
    layout: &'a ImageLayout,
    functions: &'a BTreeMap<u64, RecoveredFunction>,
    func: &'a RecoveredFunction,
    labels: BTreeSet<u64>,
    condition: Option<Condition>,
    out: String,
}

/// Render `func` as pseudo-C, or `None` when there is no body to show.
pub(crate) fn render(
    layout: &ImageLayout,
    functions: &BTreeMap<u64, RecoveredFunction>,
    func: &RecoveredFunction,
) -> Option<String> {
    if func.insns.is_empty() {
        return None;
    }
    let mut renderer = Renderer {
        layout,
        functions,
        func,
        labels: func.branch_targets(),
        condition: None,
        out: String::new(),
    };
    renderer.header();
    renderer.out.push_str("{\n");
    for insn in &func.insns {
        renderer.instruction(insn);
    }
    renderer.out.push_str("}\n");
    Some(renderer.out)
}

impl Renderer<'_> {
    fn header(&mut self) {
        let sig = &self.func.signature;
        let ret = if sig.returns { "long" } else { "void" };
        let params = if sig.params.is_empty() {
            "void".to_string()
        } else {
            sig.params.iter().map(|p| format!("long {p}")).collect::<Vec<_>>().join(", ")
        };
        let _ = writeln!(
            self.out,
            "// 0x{:x} {}\n{ret} {}({params})",
            self.func.descriptor.address,
            convention_name(self.func),
            self.func.descriptor.name
        );
    }

    fn line(&mut self, statement: &str, insn: &Insn) {
        let _ = write!(self.out, "{INDENT}{statement}");
        if let Some(text) = insn.data_ref.and_then(|addr| self.layout.preview_string(addr)) {
            let _ = write!(self.out, " // \"{text}\"");
        }
        self.out.push('\n');
    }

    fn instruction(&mut self, insn: &Insn) {
        if self.labels.contains(&insn.address) {
            let _ = writeln!(self.out, "label_{:x}:", insn.address);
            // Flags are per-path; a join point forgets them.
            self.condition = None;
        }
        if self.layout.arch.is_x86() {
            self.x86(insn);
        } else {
            self.generic(insn);
        }
    }

    fn x86(&mut self, insn: &Insn) {
        if is_frame_noise(insn) {
            return;
        }
        let ops = split_operands(&insn.op_str);
        let rendered: Vec<String> = ops.iter().map(|op| self.operand(op, insn)).collect();
        let operand = |idx: usize| -> String { rendered.get(idx).cloned().unwrap_or_default() };
        let mnemonic = insn.mnemonic.as_str();

        let statement = match (mnemonic, insn.flow) {
            (_, Flow::Call) => self.call(insn),
            (_, Flow::Return) => self.return_statement(),
            (_, Flow::CondJump) => {
                let cond = self.condition_text(&mnemonic[1..]);
                format!("if ({cond}) {}", self.jump_text(insn))
            }
            (_, Flow::Jump) => self.jump_text(insn),
            ("hlt", _) => "__halt();".to_string(),
            ("ud2", _) => "__builtin_trap();".to_string(),
            ("cmp", _) => {
                self.condition = Some(Condition::Compare(operand(0), operand(1)));
                return;
            }
            ("test", _) => {
                let (a, b) = (operand(0), operand(1));
                let expr = if a == b { a } else { format!("{a} & {b}") };
                self.condition = Some(Condition::Test(expr));
                return;
            }
            ("mov" | "movabs" | "movzx" | "movsx" | "movsxd" | "movss" | "movsd" | "movaps"
            | "movups" | "movq" | "movd", _) => {
                format!("{} = {};", operand(0), operand(1))
            }
            ("lea", _) => format!("{} = {};", operand(0), self.address_of(ops.get(1), insn)),
            ("xor" | "sub" | "pxor", _) if ops.len() == 2 && ops[0] == ops[1] => {
                format!("{} = 0;", operand(0))
            }
            ("add" | "sub" | "and" | "or" | "xor" | "shl" | "sal" | "shr" | "sar", _)
                if ops.len() == 2 =>
            {
                format!("{} {}= {};", operand(0), binary_operator(mnemonic), operand(1))
            }
            ("imul", _) if ops.len() == 2 => format!("{} *= {};", operand(0), operand(1)),
            ("imul", _) if ops.len() == 3 => {
                format!("{} = {} * {};", operand(0), operand(1), operand(2))
            }
            ("inc", _) => format!("{}++;", operand(0)),
            ("dec", _) => format!("{}--;", operand(0)),
            ("neg", _) => format!("{0} = -{0};", operand(0)),
            ("not", _) => format!("{0} = ~{0};", operand(0)),
            ("push", _) => format!("push({});", operand(0)),
            ("pop", _) => format!("{} = pop();", operand(0)),
            _ if mnemonic.starts_with("set") => {
                format!("{} = ({});", operand(0), self.condition_text(&mnemonic[3..]))
            }
            _ if mnemonic.starts_with("cmov") => format!(
                "if ({}) {} = {};",
                self.condition_text(&mnemonic[4..]),
                operand(0),
                operand(1)
            ),
            _ => format!("__asm(\"{}\");", asm_text(insn)),
        };
        self.line(&statement, insn);
    }

    /// Control flow only; everything else is inline assembly.
    fn generic(&mut self, insn: &Insn) {
        let statement = match insn.flow {
            Flow::Call => self.call(insn),
            Flow::Return => self.return_statement(),
            Flow::Jump => self.jump_text(insn),
            Flow::CondJump => {
                format!("if (__cond(\"{}\")) {}", asm_text(insn), self.jump_text(insn))
            }
            Flow::Halt | Flow::Normal => format!("__asm(\"{}\");", asm_text(insn)),
        };
        self.line(&statement, insn);
    }

    fn return_statement(&self) -> String {
        if self.func.signature.returns {
            "return rax;".to_string()
        } else {
            "return;".to_string()
        }
    }

    fn call(&mut self, insn: &Insn) -> String {
        self.condition = None;
        let callee = self.callee(insn);
        match callee {
            Some((name, Some(target))) => {
                let call = format!("{name}({});", target.signature.params.join(", "));
                if target.signature.returns {
                    format!("rax = {call}")
                } else {
                    call
                }
            }
            Some((name, None)) => format!("rax = {name}();"),
            None => {
                let ops = split_operands(&insn.op_str);
                let expr = ops.first().map(|op| self.operand(op, insn)).unwrap_or_default();
                format!("rax = (*{expr})();")
            }
        }
    }

    /// Callee name plus its recovered function when it is part of the model.
    fn callee(&self, insn: &Insn) -> Option<(String, Option<&RecoveredFunction>)> {
        if let Some(target) = insn.target {
            let name = self.function_name(target);
            return Some((name, self.functions.get(&target)));
        }
        let slot = insn.indirect_slot?;
        let name = self.layout.import_slots.get(&slot)?;
        let target = self.functions.values().find(|f| {
            f.descriptor.is_simprocedure && f.descriptor.name == *name
        });
        Some((name.clone(), target))
    }

    fn function_name(&self, addr: u64) -> String {
        self.functions
            .get(&addr)
            .map(|f| f.descriptor.name.clone())
            .unwrap_or_else(|| format!("sub_{addr:x}"))
    }

    fn jump_text(&self, insn: &Insn) -> String {
        match insn.target {
            Some(target) if self.labels.contains(&target) => format!("goto label_{target:x};"),
            Some(target) => {
                // Leaves the body: a tail call.
                let args = self
                    .functions
                    .get(&target)
                    .map(|f| f.signature.params.join(", "))
                    .unwrap_or_default();
                format!("return {}({args});", self.function_name(target))
            }
            None => {
                if let Some(name) = insn.indirect_slot.and_then(|s| self.layout.import_slots.get(&s))
                {
                    return format!("return {name}();");
                }
                let targets: Vec<String> = self
                    .func
                    .blocks
                    .iter()
                    .find(|b| self.func.insns[b.last].address == insn.address)
                    .map(|b| {
                        b.successors.iter().map(|e| format!("label_{:x}", e.target)).collect()
                    })
                    .unwrap_or_default();
                let ops = split_operands(&insn.op_str);
                let expr = ops.first().map(|op| self.operand(op, insn)).unwrap_or_default();
                if targets.is_empty() {
                    format!("goto *{expr};")
                } else {
                    format!("goto *{expr}; // {}", targets.join(", "))
                }
            }
        }
    }

    fn condition_text(&self, code: &str) -> String {
        let Some(condition) = &self.condition else {
            return format!("__flags_{code}");
        };
        let (lhs, rhs) = match condition {
            Condition::Compare(a, b) => (a.clone(), b.clone()),
            Condition::Test(expr) => (expr.clone(), "0".to_string()),
        };
        let op = match code {
            "e" | "z" => "==",
            "ne" | "nz" => "!=",
            "l" | "nge" | "b" | "nae" | "c" => "<",
            "le" | "ng" | "be" | "na" => "<=",
            "g" | "nle" | "a" | "nbe" => ">",
            "ge" | "nl" | "ae" | "nb" | "nc" => ">=",
            "s" => return format!("({lhs} - {rhs}) < 0"),
            "ns" => return format!("({lhs} - {rhs}) >= 0"),
            _ => return format!("__flags_{code}"),
        };
        format!("{lhs} {op} {rhs}")
    }

    /// Render one Intel-syntax operand as a C expression.
    fn operand(&self, op: &str, insn: &Insn) -> String {
        let Some((size, inner)) = memory_operand(op) else {
            if let Some(addr) = insn.data_ref.filter(|a| parse_immediate(op) == Some(*a)) {
                return format!("&g_{addr:x}");
            }
            return register_or_literal(op);
        };
        if let Some(addr) = insn.data_ref.filter(|_| inner.contains("rip") || is_absolute(inner)) {
            return format!("g_{addr:x}");
        }
        format!("*({} *)({})", c_type(size), address_expr(inner))
    }

    fn address_of(&self, op: Option<&&str>, insn: &Insn) -> String {
        let Some(op) = op else { return String::new() };
        if let Some(addr) = insn.data_ref {
            return format!("&g_{addr:x}");
        }
        match memory_operand(op) {
            Some((_, inner)) => address_expr(inner),
            None => register_or_literal(op),
        }
    }
}

fn convention_name(func: &RecoveredFunction) -> &'static str {
    use super::convention::Convention;
    match func.signature.convention {
        Convention::SysV64 => "sysv64",
        Convention::Win64 => "win64",
        Convention::Cdecl => "cdecl",
        Convention::Unknown => "unknown convention",
    }
}

fn binary_operator(mnemonic: &str) -> &'static str {
    match mnemonic {
        "add" => "+",
        "sub" => "-",
        "and" => "&",
        "or" => "|",
        "xor" => "^",
        "shl" | "sal" => "<<",
        _ => ">>",
    }
}

fn asm_text(insn: &Insn) -> String {
    let text = if insn.op_str.is_empty() {
        insn.mnemonic.clone()
    } else {
        format!("{} {}", insn.mnemonic, insn.op_str)
    };
    text.replace('"', "\\\"")
}

/// Split an operand list on top-level commas.
fn split_operands(op_str: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in op_str.char_indices() {
        match ch {
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(op_str[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let last = op_str[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// `qword ptr [rbp - 8]` -> `("qword", "rbp - 8")`.
fn memory_operand(op: &str) -> Option<(&str, &str)> {
    let open = op.find('[')?;
    let close = op.rfind(']')?;
    // The size keyword comes first; `ptr` and segment overrides such as `fs:` follow.
    let size = op[..open].split_whitespace().next().unwrap_or("");
    Some((size, op[open + 1..close].trim()))
}

fn is_absolute(inner: &str) -> bool {
    parse_immediate(inner).is_some()
}

fn parse_immediate(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn c_type(size: &str) -> &'static str {
    match size {
        "byte" => "uint8_t",
        "word" => "uint16_t",
        "dword" => "uint32_t",
        "qword" => "uint64_t",
        "xmmword" => "__int128",
        _ => "void",
    }
}

/// Canonicalize register tokens inside an address expression.
fn address_expr(inner: &str) -> String {
    inner.split(' ').map(register_or_literal).collect::<Vec<_>>().join(" ")
}

fn register_or_literal(token: &str) -> String {
    let canonical = canonical_register(token);
    if canonical != token || is_general_register(token) {
        canonical
    } else {
        token.to_string()
    }
}

fn is_general_register(token: &str) -> bool {
    matches!(token, "rax" | "rbx" | "rcx" | "rdx" | "rsi" | "rdi" | "rbp" | "rsp" | "rip")
}

/// Architecture name used in diagnostics.
pub(crate) fn arch_name(arch: Arch) -> &'static str {
    match arch {
        Arch::X86 => "x86",
        Arch::X86_64 => "x86-64",
        Arch::Arm => "arm",
        Arch::Arm64 => "aarch64",
    }
}
