use crate::prelude::*;
use object::{Object, ObjectSection, ObjectSymbol, ObjectSymbolTable, SymbolKind};
use std::fmt::Debug;

#[derive(Hash, PartialEq, Eq, Clone)]
pub struct Symbol {
    pub addr: u64,
    pub size: u64,
    pub name: String,
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Symbol {{ offset: {:x}, size: {:x}, name: {} }}",
            self.addr, self.size, self.name
        )
    }
}

/// A section copied out of an ELF file together with its stated address.
#[derive(Debug, Clone)]
pub struct SectionData {
    pub svma: u64,
    pub data: Vec<u8>,
}

/// What the finder needs from one ELF file on disk: function symbols to name
/// frames with, and call frame information to unwind through them.
///
/// All addresses are stated virtual memory addresses (file addresses).
#[derive(Debug, Default)]
pub struct ModuleImage {
    symbols: Vec<Symbol>,
    eh_frame: Option<SectionData>,
    text_svma: u64,
}

impl ModuleImage {
    pub fn parse(object: &object::File) -> Self {
        let mut symbols = Vec::new();

        if let Some(symbol_table) = object.symbol_table() {
            symbols.extend(symbol_table.symbols().filter_map(text_symbol));
        }
        if let Some(symbol_table) = object.dynamic_symbol_table() {
            symbols.extend(symbol_table.symbols().filter_map(text_symbol));
        }

        let section_data = |name: &str| {
            let section = object.section_by_name(name)?;
            let data = section.data().ok()?;
            Some(SectionData {
                svma: section.address(),
                data: data.to_owned(),
            })
        };

        Self {
            symbols: normalize_symbols(symbols),
            eh_frame: section_data(".eh_frame"),
            text_svma: object
                .section_by_name(".text")
                .map(|section| section.address())
                .unwrap_or_default(),
        }
    }

    #[cfg(test)]
    pub fn from_symbols(symbols: Vec<Symbol>) -> Self {
        Self {
            symbols: normalize_symbols(symbols),
            ..Default::default()
        }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn eh_frame(&self) -> Option<&SectionData> {
        self.eh_frame.as_ref()
    }

    pub fn text_svma(&self) -> u64 {
        self.text_svma
    }

    /// The function containing `svma`, if any.
    pub fn symbol_for(&self, svma: u64) -> Option<&Symbol> {
        let index = self.symbols.partition_point(|symbol| symbol.addr <= svma);
        let symbol = self.symbols.get(index.checked_sub(1)?)?;
        (svma < symbol.addr.saturating_add(symbol.size)).then_some(symbol)
    }
}

fn text_symbol<'data>(symbol: impl ObjectSymbol<'data>) -> Option<Symbol> {
    if symbol.kind() != SymbolKind::Text {
        return None;
    }
    Some(Symbol {
        addr: symbol.address(),
        size: symbol.size(),
        name: symbol.name().ok()?.to_string(),
    })
}

/// Sort symbols by address, drop unusable ones and give zero-sized symbols
/// (typically hand-written assembly) the range up to the next symbol, as perf
/// does.
fn normalize_symbols(mut symbols: Vec<Symbol>) -> Vec<Symbol> {
    symbols.retain(|symbol| {
        if symbol.name.is_empty() {
            return false;
        }

        // ARM ELF mapping symbols ($a, $d, $t, $x)
        if let [b'$', b'a' | b'd' | b't' | b'x', rest @ ..] = symbol.name.as_bytes() {
            if rest.is_empty() || rest.starts_with(b".") {
                trace!("Filtering out ARM ELF mapping symbol: {symbol:?}");
                return false;
            }
        }

        true
    });

    // Stable: for aliases, names from .symtab come before .dynsym ones.
    symbols.sort_by_key(|symbol| symbol.addr);
    symbols.dedup_by(|next, kept| next.addr == kept.addr && next.name == kept.name);

    for i in 0..symbols.len() {
        if symbols[i].size != 0 {
            continue;
        }
        let next_addr = symbols[i + 1..]
            .iter()
            .map(|symbol| symbol.addr)
            .find(|addr| *addr > symbols[i].addr);
        symbols[i].size = match next_addr {
            Some(next_addr) => next_addr - symbols[i].addr,
            None => {
                const PAGE_SIZE: u64 = 4096;
                let addr = symbols[i].addr;
                (addr.next_multiple_of(PAGE_SIZE) + PAGE_SIZE).saturating_sub(addr)
            }
        };
    }

    // Aliases share an address: keep the most public name of each.
    symbols.sort_by_key(|symbol| (symbol.addr, alias_rank(&symbol.name)));
    symbols.dedup_by_key(|symbol| symbol.addr);
    symbols
}

/// Lower is more public: exported names before `__`-prefixed ones, glibc's
/// hidden `__GI_` aliases last.
fn alias_rank(name: &str) -> (bool, usize) {
    let leading_underscores = name.bytes().take_while(|byte| *byte == b'_').count();
    (name.starts_with("__GI_"), leading_underscores)
}
