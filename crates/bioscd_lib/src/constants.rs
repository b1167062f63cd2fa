use std::collections::HashMap;
use std::sync::OnceLock;

pub use crate::tables::SymbolClass;

/// One named value of a symbol class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymDef {
    pub class: SymbolClass,
    pub value: u16,
    pub name: &'static str,
}

/// A value tagged with the class it should be named through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub class: SymbolClass,
    pub value: u16,
}

impl SymbolClass {
    /// Values scanned when building the reverse map.
    pub fn domain(self) -> std::ops::Range<u16> {
        if self.is_bitmask() { 0..32 } else { 0..256 }
    }
}

/// Per-revision name tables.
///
/// Forward lookups go through the generated, sorted entries. The reverse map is
/// built on first use by probing every class domain through [`ConstantTable::resolve`],
/// so composite bitmask names resolve back as well.
pub struct ConstantTable {
    entries: &'static [SymDef],
    reverse: OnceLock<HashMap<String, u16>>,
}

impl ConstantTable {
    pub const fn new(entries: &'static [SymDef]) -> Self {
        Self {
            entries,
            reverse: OnceLock::new(),
        }
    }

    pub fn entries(&self) -> &'static [SymDef] {
        self.entries
    }

    pub fn lookup(&self, class: SymbolClass, value: u16) -> Option<&'static str> {
        self.entries
            .binary_search_by(|e| (e.class, e.value).cmp(&(class, value)))
            .ok()
            .map(|i| self.entries[i].name)
    }

    pub fn resolve(&self, class: SymbolClass, value: u16) -> Option<String> {
        if let Some(name) = self.lookup(class, value) {
            return Some(name.to_string());
        }
        if !class.is_bitmask() || value == 0 {
            return None;
        }
        let mut parts = Vec::new();
        for bit in 0..16 {
            let mask = 1u16 << bit;
            if value & mask != 0 {
                parts.push(self.lookup(class, mask)?);
            }
        }
        Some(parts.join(" | "))
    }

    pub fn resolve_name(&self, name: &str) -> Option<u16> {
        self.reverse.get_or_init(|| self.build_reverse()).get(name).copied()
    }

    fn build_reverse(&self) -> HashMap<String, u16> {
        let mut map: HashMap<String, u16> = HashMap::new();
        for &class in SymbolClass::ALL {
            if class.is_procedure() {
                continue;
            }
            for value in class.domain() {
                let Some(name) = self.resolve(class, value) else {
                    continue;
                };
                if name.contains(' ') || name.starts_with(|c: char| c.is_ascii_digit()) {
                    continue;
                }
                if let Some(previous) = map.insert(name.clone(), value) {
                    if previous != value {
                        panic!("constant {name} is produced by both {previous} and {value}");
                    }
                }
            }
        }
        log::debug!("built reverse constant map with {} names", map.len());
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRIES: &[SymDef] = &[
        SymDef { class: SymbolClass::Item, value: 1, name: "ITEM_KNIFE" },
        SymDef { class: SymbolClass::Item, value: 2, name: "ITEM_BERETTA" },
        SymDef { class: SymbolClass::Sat, value: 0x01, name: "SAT_PL" },
        SymDef { class: SymbolClass::Sat, value: 0x02, name: "SAT_EM" },
        SymDef { class: SymbolClass::Sat, value: 0x08, name: "SAT_OB" },
    ];

    const COLLIDING: &[SymDef] = &[
        SymDef { class: SymbolClass::Item, value: 1, name: "SAME" },
        SymDef { class: SymbolClass::Enemy, value: 7, name: "SAME" },
    ];

    #[test]
    fn plain_lookup() {
        let t = ConstantTable::new(ENTRIES);
        assert_eq!(t.resolve(SymbolClass::Item, 2).as_deref(), Some("ITEM_BERETTA"));
        assert_eq!(t.resolve(SymbolClass::Item, 3), None);
        assert_eq!(t.resolve(SymbolClass::Enemy, 1), None);
    }

    #[test]
    fn bitmask_composites() {
        let t = ConstantTable::new(ENTRIES);
        assert_eq!(t.resolve(SymbolClass::Sat, 0x03).as_deref(), Some("SAT_PL | SAT_EM"));
        assert_eq!(t.resolve(SymbolClass::Sat, 0x0b).as_deref(), Some("SAT_PL | SAT_EM | SAT_OB"));
        // bit 2 has no name
        assert_eq!(t.resolve(SymbolClass::Sat, 0x05), None);
        assert_eq!(t.resolve(SymbolClass::Sat, 0), None);
    }

    #[test]
    fn reverse_map_skips_composites() {
        let t = ConstantTable::new(ENTRIES);
        assert_eq!(t.resolve_name("ITEM_KNIFE"), Some(1));
        assert_eq!(t.resolve_name("SAT_OB"), Some(8));
        assert_eq!(t.resolve_name("SAT_PL | SAT_EM"), None);
        assert_eq!(t.resolve_name("NOPE"), None);
    }

    #[test]
    #[should_panic(expected = "SAME")]
    fn reverse_map_collision_panics() {
        let t = ConstantTable::new(COLLIDING);
        let _ = t.resolve_name("SAME");
    }
}
