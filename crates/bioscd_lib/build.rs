use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const REVISIONS: &[&str] = &["bio1", "bio2", "bio3", "biocv"];

const FLOWS: &[(&str, &str)] = &[
    ("-", "Plain"),
    ("cond", "Condition"),
    ("if", "If"),
    ("else", "Else"),
    ("endif", "EndIf"),
    ("while", "While"),
    ("ewhile", "EndWhile"),
    ("do", "Do"),
    ("edwhile", "EndDo"),
    ("switch", "Switch"),
    ("case", "Case"),
    ("default", "Default"),
    ("eswitch", "EndSwitch"),
    ("for", "For"),
    ("next", "Next"),
    ("goto", "Goto"),
    ("gosub", "Gosub"),
    ("return", "Return"),
    ("fork", "Fork"),
    ("break", "Break"),
    ("end", "End"),
    ("block", "Block"),
    ("single", "Single"),
    ("loop", "Loop"),
];

const OPERANDS: &[(&str, &str)] = &[
    ("u8", "U8"),
    ("u16", "U16"),
    ("i16", "I16"),
    ("pad", "Pad"),
    ("br8", "Br8"),
    ("br16", "Br16"),
    ("rel16", "Rel16"),
    ("abs16", "Abs16"),
    ("csz", "CondSize"),
    ("run8", "Run8"),
    ("bits", "Bits"),
    ("nib", "Nibbles"),
    ("ang12", "Angles"),
];

struct Class {
    name: String,
    kind: String,
}

struct Op {
    prefix: Option<u8>,
    code: u8,
    size: Option<usize>,
    flow: &'static str,
    mnemonic: String,
    operands: Vec<String>,
}

struct Sym {
    class: usize,
    value: u16,
    name: String,
}

#[derive(Default)]
struct Revision {
    opcodes: Vec<Op>,
    events: Vec<Op>,
    extended: Vec<Op>,
    symbols: Vec<Sym>,
}

fn workspace_root(crate_dir: &Path) -> PathBuf {
    crate_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("crate directory should be <root>/crates/<name>")
        .to_path_buf()
}

fn take_until_paren_close(s: &str) -> Option<&str> {
    let s = s.trim();
    let j = s.rfind(')')?;
    Some(s[..j].trim())
}

fn parse_number(s: &str) -> u32 {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).unwrap_or_else(|_| panic!("bad number {s}")),
        None => s.parse().unwrap_or_else(|_| panic!("bad number {s}")),
    }
}

fn flow_variant(token: &str) -> &'static str {
    FLOWS
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, v)| *v)
        .unwrap_or_else(|| panic!("unknown flow role {token}"))
}

fn operand_variant(token: &str, classes: &[Class]) -> String {
    if let Some((_, v)) = OPERANDS.iter().find(|(t, _)| *t == token) {
        return format!("OperandKind::{v}");
    }
    let (name, width) = if let Some(name) = token.strip_suffix("16") {
        (name, 16)
    } else if let Some(name) = token.strip_suffix('8') {
        (name, 8)
    } else {
        panic!("unknown operand {token}");
    };
    if !classes.iter().any(|c| c.name == name) {
        panic!("unknown symbol class in operand {token}");
    }
    if width == 16 {
        format!("OperandKind::Sym16(SymbolClass::{name})")
    } else {
        format!("OperandKind::Sym8(SymbolClass::{name})")
    }
}

fn parse_classes(src: &str) -> Vec<Class> {
    let mut classes = Vec::new();
    for line in src.lines() {
        let l = line.trim();
        let rest = match l.strip_prefix("CLASS(") {
            Some(v) => v,
            None => continue,
        };
        let inner = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        if parts.len() != 2 {
            panic!("malformed class line: {l}");
        }
        classes.push(Class {
            name: parts[0].to_string(),
            kind: parts[1].to_string(),
        });
    }
    classes
}

fn parse_signature(sig: &str, classes: &[Class]) -> Vec<String> {
    sig.trim()
        .trim_matches('"')
        .split_whitespace()
        .map(|t| operand_variant(t, classes))
        .collect()
}

fn parse_revision(name: &str, src: &str, classes: &[Class]) -> Revision {
    let mut rev = Revision::default();
    for line in src.lines() {
        let l = line.trim();
        if l.is_empty() || l.starts_with('#') {
            continue;
        }
        let (tag, rest) = match l.split_once('(') {
            Some(v) => v,
            None => continue,
        };
        let inner = match take_until_paren_close(rest) {
            Some(v) => v,
            None => continue,
        };
        let parts: Vec<&str> = inner.split(',').map(|p| p.trim()).collect();
        match tag {
            "OP" | "EVT" => {
                if parts.len() != 5 {
                    panic!("{name}: malformed line: {l}");
                }
                let op = Op {
                    prefix: None,
                    code: parse_number(parts[0]) as u8,
                    size: Some(parse_number(parts[1]) as usize),
                    flow: flow_variant(parts[2]),
                    mnemonic: parts[3].to_string(),
                    operands: parse_signature(parts[4], classes),
                };
                if tag == "OP" {
                    rev.opcodes.push(op);
                } else {
                    rev.events.push(op);
                }
            }
            "EXT" => {
                if parts.len() != 6 {
                    panic!("{name}: malformed line: {l}");
                }
                rev.extended.push(Op {
                    prefix: Some(parse_number(parts[0]) as u8),
                    code: parse_number(parts[1]) as u8,
                    size: if parts[2] == "?" { None } else { Some(parse_number(parts[2]) as usize) },
                    flow: flow_variant(parts[3]),
                    mnemonic: parts[4].to_string(),
                    operands: parse_signature(parts[5], classes),
                });
            }
            "SYM" => {
                if parts.len() != 3 {
                    panic!("{name}: malformed line: {l}");
                }
                let class = classes
                    .iter()
                    .position(|c| c.name == parts[0])
                    .unwrap_or_else(|| panic!("{name}: unknown symbol class {}", parts[0]));
                rev.symbols.push(Sym {
                    class,
                    value: parse_number(parts[1]) as u16,
                    name: parts[2].to_string(),
                });
            }
            _ => panic!("{name}: unknown directive {tag}"),
        }
    }

    rev.opcodes.sort_by_key(|o| o.code);
    rev.events.sort_by_key(|o| o.code);
    rev.extended.sort_by_key(|o| (o.prefix, o.code));
    rev.symbols.sort_by_key(|s| (s.class, s.value));

    for w in rev.opcodes.windows(2).chain(rev.events.windows(2)) {
        if w[0].code == w[1].code {
            panic!("{name}: opcode 0x{:02X} defined twice", w[0].code);
        }
    }
    for w in rev.extended.windows(2) {
        if w[0].prefix == w[1].prefix && w[0].code == w[1].code {
            panic!("{name}: extended opcode 0x{:02X} defined twice", w[0].code);
        }
    }
    for w in rev.symbols.windows(2) {
        if w[0].class == w[1].class && w[0].value == w[1].value {
            panic!("{name}: symbol value {} defined twice ({} / {})", w[0].value, w[0].name, w[1].name);
        }
    }
    rev
}

fn emit_signature(op: &Op, header_len: usize) -> String {
    format!(
        "Signature {{ mnemonic: \"{}\", header_len: {}, operands: &[{}] }}",
        op.mnemonic,
        header_len,
        op.operands.join(", ")
    )
}

fn emit_ops(out: &mut String, konst: &str, ops: &[Op]) {
    out.push_str(&format!("pub const {konst}: &[OpDef] = &[\n"));
    for op in ops {
        out.push_str(&format!(
            "    OpDef {{ code: 0x{:02X}, size: {}, flow: Flow::{}, signature: {} }},\n",
            op.code,
            op.size.unwrap_or(0),
            op.flow,
            emit_signature(op, 1)
        ));
    }
    out.push_str("];\n\n");
}

fn emit_extended(out: &mut String, konst: &str, ops: &[Op]) {
    out.push_str(&format!("pub const {konst}: &[ExtDef] = &[\n"));
    for op in ops {
        let size = match op.size {
            Some(s) => format!("Some({s})"),
            None => "None".to_string(),
        };
        out.push_str(&format!(
            "    ExtDef {{ prefix: 0x{:02X}, code: 0x{:02X}, size: {}, flow: Flow::{}, signature: {} }},\n",
            op.prefix.unwrap_or(0),
            op.code,
            size,
            op.flow,
            emit_signature(op, 2)
        ));
    }
    out.push_str("];\n\n");
}

fn emit_symbols(out: &mut String, konst: &str, syms: &[Sym], classes: &[Class]) {
    out.push_str(&format!("pub const {konst}: &[SymDef] = &[\n"));
    for s in syms {
        out.push_str(&format!(
            "    SymDef {{ class: SymbolClass::{}, value: 0x{:02X}, name: \"{}\" }},\n",
            classes[s.class].name, s.value, s.name
        ));
    }
    out.push_str("];\n\n");
}

fn emit_classes(out: &mut String, classes: &[Class]) {
    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]\n");
    out.push_str("pub enum SymbolClass {\n");
    for c in classes {
        out.push_str(&format!("    {},\n", c.name));
    }
    out.push_str("}\n\n");

    out.push_str("impl SymbolClass {\n");
    out.push_str("    pub const ALL: &'static [SymbolClass] = &[\n");
    for c in classes {
        out.push_str(&format!("        SymbolClass::{},\n", c.name));
    }
    out.push_str("    ];\n\n");

    out.push_str("    pub const fn name(self) -> &'static str {\n        match self {\n");
    for c in classes {
        out.push_str(&format!("            SymbolClass::{0} => \"{0}\",\n", c.name));
    }
    out.push_str("        }\n    }\n\n");

    for (method, kind) in [("is_bitmask", "bitmask"), ("is_procedure", "procedure")] {
        let members: Vec<String> = classes
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| format!("SymbolClass::{}", c.name))
            .collect();
        out.push_str(&format!("    pub const fn {method}(self) -> bool {{\n"));
        if members.is_empty() {
            out.push_str("        false\n");
        } else {
            out.push_str(&format!("        matches!(self, {})\n", members.join(" | ")));
        }
        out.push_str("    }\n\n");
    }
    out.push_str("}\n\n");
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let root = workspace_root(&manifest_dir);
    let isa_dir = root.join("isa");

    let classes_path = isa_dir.join("classes.def");
    println!("cargo:rerun-if-changed={}", classes_path.display());
    let classes_src = fs::read_to_string(&classes_path).expect("read classes.def");
    let classes = parse_classes(&classes_src);
    for c in &classes {
        if !matches!(c.kind.as_str(), "plain" | "bitmask" | "procedure") {
            panic!("unknown class kind {} for {}", c.kind, c.name);
        }
    }

    let mut out = String::new();
    emit_classes(&mut out, &classes);

    for name in REVISIONS {
        let path = isa_dir.join(format!("{name}.def"));
        println!("cargo:rerun-if-changed={}", path.display());
        let src = fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
        let rev = parse_revision(name, &src, &classes);

        let prefix = name.to_ascii_uppercase();
        emit_ops(&mut out, &format!("{prefix}_OPCODES"), &rev.opcodes);
        emit_ops(&mut out, &format!("{prefix}_EVENTS"), &rev.events);
        emit_extended(&mut out, &format!("{prefix}_EXTENDED"), &rev.extended);
        emit_symbols(&mut out, &format!("{prefix}_SYMBOLS"), &rev.symbols, &classes);
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let out_path = out_dir.join("isa_tables.rs");
    fs::write(out_path, out).expect("write generated instruction tables");
}
