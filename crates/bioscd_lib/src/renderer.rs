use std::collections::{BTreeMap, BTreeSet};

use crate::ScriptKind;
use crate::cursor::InstructionCursor;
use crate::decoder::ScriptVisitor;
use crate::isa::{
    Entry, Flow, InstructionSet, OperandKind, Revision, Value, branch_target, condition_end, instruction_set,
    read_value,
};

const INDENT: usize = 2;
const COMMENT_COLUMN: usize = 40;
const DB_CHUNK: usize = 16;

#[derive(Debug, Clone)]
enum Item {
    Op { offset: usize, bytes: Vec<u8>, event: bool },
    EndEvent,
    Trailing { offset: usize, bytes: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Else,
    While,
    Do,
    Switch,
    Case,
    For,
    Event,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    kind: BlockKind,
    end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprHead {
    If,
    While,
    DoWhile,
}

/// Condition run being collected for the block opener that precedes it.
#[derive(Debug)]
struct Expr {
    head: ExprHead,
    conds: Vec<String>,
    /// Set when the opener declares the byte length of its condition run.
    end: Option<usize>,
    depth: usize,
}

#[derive(Clone, Copy)]
struct Config {
    isa: &'static dyn InstructionSet,
    kind: ScriptKind,
    assembly: bool,
    base_offset: usize,
}

/// Visitor turning a decoded script into text.
///
/// Each subroutine is buffered until `visit_end_subroutine`, then rendered in two
/// passes: the first collects label targets so backward branches get labels too,
/// the second emits lines.
pub struct ScriptRenderer {
    cfg: Config,
    out: String,
    items: Vec<Item>,
    forced_closes: usize,
}

impl ScriptRenderer {
    pub fn new(revision: Revision, kind: ScriptKind, assembly: bool) -> Self {
        Self {
            cfg: Config {
                isa: instruction_set(revision),
                kind,
                assembly,
                base_offset: 0,
            },
            out: String::new(),
            items: Vec::new(),
            forced_closes: 0,
        }
    }

    /// Base added to buffer positions for absolute branch operands.
    pub fn with_base_offset(mut self, base_offset: usize) -> Self {
        self.cfg.base_offset = base_offset;
        self
    }

    pub fn output(&self) -> &str {
        &self.out
    }

    /// Blocks still open when their subroutine ended.
    pub fn forced_closes(&self) -> usize {
        self.forced_closes
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn render_subroutine(&mut self, index: usize) {
        let name = self.cfg.isa.procedure_name(self.cfg.kind, index);
        let mut pass = Pass::new(self.cfg);
        pass.run(&self.items);
        self.forced_closes += pass.forced;
        self.items.clear();

        self.out.push('\n');
        if self.cfg.assembly {
            self.out.push_str(&format!(".proc {name}\n"));
        } else {
            self.out.push_str(&format!("proc {name}() {{\n"));
        }
        for line in &pass.lines {
            self.out.push_str(line);
            self.out.push('\n');
        }
        self.out.push_str(if self.cfg.assembly { ".endproc\n" } else { "}\n" });
    }
}

impl ScriptVisitor for ScriptRenderer {
    fn visit_version(&mut self, revision: Revision) {
        self.cfg.isa = instruction_set(revision);
        let marker = if self.cfg.assembly { ".version" } else { "#version" };
        self.out.push_str(&format!("{marker} {revision}\n"));
    }

    fn visit_begin_script(&mut self, kind: ScriptKind) {
        self.cfg.kind = kind;
    }

    fn visit_begin_subroutine(&mut self, _index: usize, _offset: usize) {
        self.items.clear();
    }

    fn visit_opcode(&mut self, offset: usize, bytes: &[u8]) {
        self.items.push(Item::Op {
            offset,
            bytes: bytes.to_vec(),
            event: false,
        });
    }

    fn visit_begin_event_opcode(&mut self, offset: usize, bytes: &[u8]) {
        self.items.push(Item::Op {
            offset,
            bytes: bytes.to_vec(),
            event: true,
        });
    }

    fn visit_end_event_opcode(&mut self) {
        self.items.push(Item::EndEvent);
    }

    fn visit_trailing_data(&mut self, offset: usize, bytes: &[u8]) {
        self.items.push(Item::Trailing {
            offset,
            bytes: bytes.to_vec(),
        });
    }

    fn visit_end_subroutine(&mut self, index: usize) {
        self.render_subroutine(index);
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

/// Render state of one subroutine.
struct Pass {
    cfg: Config,
    lines: Vec<String>,
    blocks: Vec<Block>,
    expr: Option<Expr>,
    labels: BTreeMap<usize, String>,
    /// One entry per open event opcode, `true` when it opened a block.
    events: Vec<bool>,
    forced: usize,
}

impl Pass {
    fn new(cfg: Config) -> Self {
        Self {
            cfg,
            lines: Vec::new(),
            blocks: Vec::new(),
            expr: None,
            labels: BTreeMap::new(),
            events: Vec::new(),
            forced: 0,
        }
    }

    fn run(&mut self, items: &[Item]) {
        let end = self.discover_labels(items);
        let last_op = items.iter().rposition(|i| matches!(i, Item::Op { .. }));

        for (i, item) in items.iter().enumerate() {
            match item {
                Item::Op { offset, bytes, event } => self.op(*offset, bytes, *event, Some(i) == last_op),
                Item::EndEvent => self.end_event(),
                Item::Trailing { offset, bytes } => {
                    self.finish_expr();
                    self.close_ended(*offset);
                    self.trailing(*offset, bytes);
                }
            }
        }

        self.finish_expr();
        if !self.blocks.is_empty() {
            log::debug!("{} blocks still open at end of subroutine", self.blocks.len());
            self.forced += self.blocks.len();
        }
        while !self.blocks.is_empty() {
            self.close_top();
        }
        if let Some(label) = end.and_then(|e| self.labels.get(&e)).cloned() {
            self.label(&label);
        }
    }

    /// Registers labels for branch targets that land on an instruction or on the end
    /// of the subroutine. Structured output only labels goto targets.
    fn discover_labels(&mut self, items: &[Item]) -> Option<usize> {
        let mut starts = BTreeSet::new();
        let mut end = None;
        for item in items {
            if let Item::Op { offset, bytes, .. } = item {
                starts.insert(*offset);
                end = Some(offset + bytes.len());
            }
        }

        for item in items {
            let Item::Op { offset, bytes, event: false } = item else {
                continue;
            };
            let Some(entry) = self.cfg.isa.entry(bytes, false) else {
                continue;
            };
            if entry.signature.encoded_len() != bytes.len() {
                continue;
            }
            if !self.cfg.assembly && entry.flow != Flow::Goto {
                continue;
            }
            let Some(target) = branch_target(entry.signature, *offset, bytes, self.cfg.base_offset) else {
                continue;
            };
            if starts.contains(&target) || Some(target) == end {
                self.labels.entry(target).or_insert_with(|| format!("L{target:04X}"));
            }
        }
        end
    }

    fn depth(&self) -> usize {
        self.blocks.len()
    }

    fn indent(depth: usize) -> String {
        " ".repeat((depth + 1) * INDENT)
    }

    fn emit(&mut self, text: &str) {
        let line = format!("{}{text}", Self::indent(self.depth()));
        self.lines.push(line);
    }

    fn label(&mut self, name: &str) {
        if self.cfg.assembly {
            self.lines.push(format!("{name}:"));
        } else {
            self.emit(&format!("{name}:"));
        }
    }

    fn asm_line(&mut self, offset: usize, bytes: &[u8], text: &str) {
        let code = format!("{}{text}", Self::indent(self.depth()));
        self.lines.push(format!(
            "{code:<width$} ; {offset:04X}: {}",
            hex(bytes),
            width = COMMENT_COLUMN
        ));
    }

    /// Assembly mode prints the opcode; structured mode prints `text` if there is any.
    fn statement(&mut self, offset: usize, bytes: &[u8], entry: Entry, text: Option<String>) {
        if self.cfg.assembly {
            let args = self.args(offset, bytes, entry, true);
            let mnemonic = entry.signature.mnemonic;
            let line = if args.is_empty() {
                mnemonic.to_string()
            } else {
                format!("{mnemonic} {}", args.into_iter().map(|(_, s)| s).collect::<Vec<_>>().join(", "))
            };
            self.asm_line(offset, bytes, &line);
        } else if let Some(text) = text {
            self.emit(&text);
        }
    }

    fn push(&mut self, kind: BlockKind, target: Option<usize>) {
        let parent = self.blocks.last().map_or(usize::MAX, |b| b.end);
        let end = target.unwrap_or(parent).min(parent);
        self.blocks.push(Block { kind, end });
    }

    fn top_is(&self, kinds: &[BlockKind]) -> bool {
        self.blocks.last().is_some_and(|b| kinds.contains(&b.kind))
    }

    fn close_top(&mut self) {
        let Some(block) = self.blocks.pop() else {
            return;
        };
        if !self.cfg.assembly && block.kind != BlockKind::Case {
            self.emit("}");
        }
    }

    fn close_ended(&mut self, offset: usize) {
        while self.blocks.last().is_some_and(|b| b.end <= offset) {
            self.finish_expr();
            self.close_top();
        }
    }

    /// Replaces a closing brace at the current depth with `merged`, or emits `alone`.
    fn merge_closing(&mut self, merged: &str, alone: &str) {
        let indent = Self::indent(self.depth());
        self.replace_closing(&indent, format!("{indent}{merged}"), format!("{indent}{alone}"));
    }

    fn replace_closing(&mut self, indent: &str, merged: String, alone: String) {
        let closing = format!("{indent}}}");
        match self.lines.last_mut() {
            Some(last) if *last == closing => *last = merged,
            _ => self.lines.push(alone),
        }
    }

    fn finish_expr(&mut self) {
        let Some(expr) = self.expr.take() else {
            return;
        };
        let cond = if expr.conds.is_empty() {
            "true".to_string()
        } else {
            expr.conds.join(" && ")
        };
        let indent = Self::indent(expr.depth);
        match expr.head {
            ExprHead::If => self.lines.push(format!("{indent}if ({cond}) {{")),
            ExprHead::While => self.lines.push(format!("{indent}while ({cond}) {{")),
            ExprHead::DoWhile => self.replace_closing(
                &indent,
                format!("{indent}}} while ({cond});"),
                format!("{indent}while ({cond});"),
            ),
        }
    }

    fn op(&mut self, offset: usize, bytes: &[u8], event: bool, last: bool) {
        let entry = self.cfg.isa.entry(bytes, event);
        let flow = entry.map_or(Flow::Plain, |e| e.flow);
        let continuing = flow == Flow::Condition
            && self
                .expr
                .as_ref()
                .is_some_and(|e| e.end.is_none_or(|end| offset < end));

        if !continuing {
            self.finish_expr();
        }
        if let Some(label) = self.labels.get(&offset).cloned() {
            self.label(&label);
        }
        self.close_ended(offset);

        let entry = match entry {
            Some(e) if e.signature.encoded_len() == bytes.len() => e,
            Some(e) => {
                log::warn!(
                    "{} at 0x{offset:04x} is {} bytes, signature says {}",
                    e.signature.mnemonic,
                    bytes.len(),
                    e.signature.encoded_len()
                );
                return self.raw(offset, bytes);
            }
            None => {
                log::warn!("no {} entry for opcode at 0x{offset:04x}: {}", self.cfg.isa.revision(), hex(bytes));
                return self.raw(offset, bytes);
            }
        };

        if event {
            return self.event_header(offset, bytes, entry, last);
        }

        let sig = entry.signature;
        let target = branch_target(sig, offset, bytes, self.cfg.base_offset);
        match entry.flow {
            Flow::Condition if continuing => {
                let text = self.call(offset, bytes, entry);
                if let Some(expr) = self.expr.as_mut() {
                    expr.conds.push(text);
                }
            }
            Flow::If | Flow::While => {
                let (head, kind) = if entry.flow == Flow::If {
                    (ExprHead::If, BlockKind::If)
                } else {
                    (ExprHead::While, BlockKind::While)
                };
                self.statement(offset, bytes, entry, None);
                if !self.cfg.assembly {
                    self.expr = Some(Expr {
                        head,
                        conds: Vec::new(),
                        end: condition_end(sig, offset, bytes),
                        depth: self.depth(),
                    });
                }
                self.push(kind, target);
            }
            Flow::Else => {
                if self.top_is(&[BlockKind::If]) {
                    self.close_top();
                }
                if self.cfg.assembly {
                    self.statement(offset, bytes, entry, None);
                } else {
                    self.merge_closing("} else {", "else {");
                }
                self.push(BlockKind::Else, target);
            }
            Flow::EndIf | Flow::Next | Flow::EndWhile => {
                let kinds: &[BlockKind] = match entry.flow {
                    Flow::EndIf => &[BlockKind::If, BlockKind::Else],
                    Flow::Next => &[BlockKind::For],
                    _ => &[BlockKind::While],
                };
                if self.top_is(kinds) {
                    self.close_top();
                }
                self.statement(offset, bytes, entry, None);
            }
            Flow::EndSwitch => {
                while self.top_is(&[BlockKind::Case]) {
                    self.close_top();
                }
                if self.top_is(&[BlockKind::Switch]) {
                    self.close_top();
                }
                self.statement(offset, bytes, entry, None);
            }
            Flow::Do => {
                self.statement(offset, bytes, entry, Some("do {".to_string()));
                self.push(BlockKind::Do, target);
            }
            Flow::EndDo => {
                if self.top_is(&[BlockKind::Do]) {
                    self.close_top();
                }
                self.statement(offset, bytes, entry, None);
                if !self.cfg.assembly {
                    self.expr = Some(Expr {
                        head: ExprHead::DoWhile,
                        conds: Vec::new(),
                        end: condition_end(sig, offset, bytes),
                        depth: self.depth(),
                    });
                }
            }
            Flow::Switch | Flow::For => {
                let args = self.arg_list(offset, bytes, entry);
                let (word, kind) = if entry.flow == Flow::Switch {
                    ("switch", BlockKind::Switch)
                } else {
                    ("for", BlockKind::For)
                };
                self.statement(offset, bytes, entry, Some(format!("{word} ({args}) {{")));
                self.push(kind, target);
            }
            Flow::Case | Flow::Default => {
                if self.top_is(&[BlockKind::Case]) {
                    self.close_top();
                }
                let text = if entry.flow == Flow::Case {
                    format!("case {}:", self.arg_list(offset, bytes, entry))
                } else {
                    "default:".to_string()
                };
                self.statement(offset, bytes, entry, Some(text));
                let target = if entry.flow == Flow::Case { target } else { None };
                self.push(BlockKind::Case, target);
            }
            Flow::Goto => {
                let dest = match target {
                    Some(t) => self.target_name(t),
                    None => "?".to_string(),
                };
                self.statement(offset, bytes, entry, Some(format!("goto {dest};")));
            }
            Flow::Gosub | Flow::Fork => {
                let args = self.args(offset, bytes, entry, false);
                let callee = args.iter().position(|(k, _)| is_procedure(*k));
                let text = match callee {
                    Some(i) => {
                        let rest: Vec<&str> = args
                            .iter()
                            .enumerate()
                            .filter(|(j, _)| *j != i)
                            .map(|(_, (_, s))| s.as_str())
                            .collect();
                        let fork = if entry.flow == Flow::Fork { "fork " } else { "" };
                        format!("{fork}{}({});", args[i].1, rest.join(", "))
                    }
                    None => format!("{};", self.call(offset, bytes, entry)),
                };
                self.statement(offset, bytes, entry, Some(text));
            }
            Flow::Return => self.statement(offset, bytes, entry, Some("return;".to_string())),
            Flow::Break => self.statement(offset, bytes, entry, Some("break;".to_string())),
            Flow::End if last && !self.cfg.assembly => {}
            _ => {
                let text = format!("{};", self.call(offset, bytes, entry));
                self.statement(offset, bytes, entry, Some(text));
            }
        }
    }

    fn event_header(&mut self, offset: usize, bytes: &[u8], entry: Entry, last: bool) {
        let opens = matches!(entry.flow, Flow::Block | Flow::Single | Flow::Loop);
        self.events.push(opens);
        if entry.flow == Flow::End && last && !self.cfg.assembly {
            return;
        }

        let args = self.arg_list(offset, bytes, entry);
        let mnemonic = entry.signature.mnemonic;
        let text = match (opens, args.is_empty()) {
            (true, true) => format!("{mnemonic} {{"),
            (true, false) => format!("{mnemonic}({args}) {{"),
            (false, _) => format!("{mnemonic}({args});"),
        };
        self.statement(offset, bytes, entry, Some(text));
        if opens {
            self.blocks.push(Block {
                kind: BlockKind::Event,
                end: usize::MAX,
            });
        }
    }

    fn end_event(&mut self) {
        self.finish_expr();
        if self.events.pop() != Some(true) {
            return;
        }
        while let Some(block) = self.blocks.last().copied() {
            self.close_top();
            if block.kind == BlockKind::Event {
                break;
            }
        }
    }

    fn raw(&mut self, offset: usize, bytes: &[u8]) {
        let list = bytes.iter().map(|b| format!("0x{b:02X}")).collect::<Vec<_>>().join(", ");
        if self.cfg.assembly {
            self.asm_line(offset, bytes, &format!("db {list}"));
        } else {
            self.emit(&format!("raw({list});"));
        }
    }

    fn trailing(&mut self, offset: usize, bytes: &[u8]) {
        if !self.cfg.assembly {
            self.emit(&format!("// trailing data at 0x{offset:04X}: {}", hex(bytes)));
            return;
        }
        for (i, chunk) in bytes.chunks(DB_CHUNK).enumerate() {
            self.raw(offset + i * DB_CHUNK, chunk);
        }
    }

    fn target_name(&self, target: usize) -> String {
        self.labels
            .get(&target)
            .cloned()
            .unwrap_or_else(|| format!("0x{target:04X}"))
    }

    fn call(&self, offset: usize, bytes: &[u8], entry: Entry) -> String {
        format!("{}({})", entry.signature.mnemonic, self.arg_list(offset, bytes, entry))
    }

    fn arg_list(&self, offset: usize, bytes: &[u8], entry: Entry) -> String {
        self.args(offset, bytes, entry, false)
            .into_iter()
            .map(|(_, s)| s)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Operand texts in signature order. Framing operands are skipped unless `all`.
    fn args(&self, offset: usize, bytes: &[u8], entry: Entry, all: bool) -> Vec<(OperandKind, String)> {
        let sig = entry.signature;
        let Some(&opcode) = bytes.first() else {
            return Vec::new();
        };
        let mut cursor = InstructionCursor::new(bytes);
        let mut out = Vec::with_capacity(sig.operands.len());
        for (i, &kind) in sig.operands.iter().enumerate() {
            if !all && kind.is_framing() {
                continue;
            }
            cursor.seek(sig.operand_offset(i));
            let text = match self.cfg.isa.resolve_operand(self.cfg.kind, opcode, i, &mut cursor) {
                Some(name) => name,
                None => match read_value(kind, &mut cursor) {
                    Ok(value) => self.format_value(kind, value, offset, bytes, entry),
                    Err(_) => "?".to_string(),
                },
            };
            out.push((kind, text));
        }
        out
    }

    fn format_value(&self, kind: OperandKind, value: Value, offset: usize, bytes: &[u8], entry: Entry) -> String {
        if kind.is_branch() {
            if let Some(t) = branch_target(entry.signature, offset, bytes, self.cfg.base_offset) {
                return self.target_name(t);
            }
        }
        match (kind, value) {
            (OperandKind::Bits, Value::Unsigned(v)) => format!("0x{v:02X}"),
            (_, Value::Unsigned(v)) => v.to_string(),
            (_, Value::Signed(v)) => v.to_string(),
            (_, Value::Pair(a, b)) => format!("{a}, {b}"),
            (_, Value::Symbol(s)) if s.class.is_procedure() => {
                self.cfg.isa.procedure_name(self.cfg.kind, s.value as usize)
            }
            (_, Value::Symbol(s)) => self
                .cfg
                .isa
                .constants()
                .resolve(s.class, s.value)
                .unwrap_or_else(|| s.value.to_string()),
        }
    }
}

fn is_procedure(kind: OperandKind) -> bool {
    matches!(kind, OperandKind::Sym8(c) | OperandKind::Sym16(c) if c.is_procedure())
}
