//! O65 object-file writer: 65816 object, 16- or 32-bit geometry
//! chosen by content width.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

use crate::diag::{Category, Diagnostics};
use crate::object::{LinkageWish, Object};
use crate::segment::{Segment, SegmentKind};

use super::{put_cstr, put_u16le, put_u32le, put_wide};

pub const MAGIC: &[u8; 6] = b"\x01\x00o65\x00";

const MODE_65816: u16 = 0x8000;
const MODE_OBJECT: u16 = 0x1000;
const MODE_32BIT: u16 = 0x2000;

const PROG_NAME: &str = "snescom";

/// Undefined-symbol table in first-seen order.
#[derive(Debug, Default)]
struct SymbolTable {
    index: HashMap<String, u32>,
    names: Vec<String>,
}

impl SymbolTable {
    fn add(&mut self, name: &str) {
        if self.index.contains_key(name) {
            return;
        }
        self.index.insert(name.to_string(), self.names.len() as u32);
        self.names.push(name.to_string());
    }

    fn find(&self, name: &str) -> u32 {
        self.index.get(name).copied().unwrap_or(0)
    }

    fn len(&self) -> u32 {
        self.names.len() as u32
    }
}

fn collect_symbols(seg: &Segment, syms: &mut SymbolTable) {
    for e in &seg.reloc.lobyte.relocs {
        syms.add(&e.name);
    }
    for e in &seg.reloc.absword.relocs {
        syms.add(&e.name);
    }
    for e in &seg.reloc.long.relocs {
        syms.add(&e.name);
    }
    for e in &seg.reloc.hibyte.relocs {
        syms.add(&e.name);
    }
    for e in &seg.reloc.segbyte.relocs {
        syms.add(&e.name);
    }
}

/// Writes `obj` as an O65 object file. Call after `close_segments`.
///
/// # Errors
/// Returns an error only when the byte sink fails.
pub fn write_o65<W: Write>(obj: &Object, out: &mut W, diag: &mut Diagnostics) -> io::Result<()> {
    // The symbol table is built up front so its size can join the
    // 32-bit test.
    let mut syms = SymbolTable::default();
    for kind in SegmentKind::ALL {
        collect_symbols(obj.segment(kind), &mut syms);
    }

    let over16 = |seg: &Segment| seg.base() > 0xffff || seg.size() > 0xffff;
    let use32 = SegmentKind::ALL.iter().any(|&k| over16(obj.segment(k))) || syms.len() > 0xffff;
    if use32 {
        diag.warning(Category::Use32, "Writing a 32-bit object file");
    }

    let mut mode = MODE_65816 | MODE_OBJECT;
    if use32 {
        mode |= MODE_32BIT;
    }

    out.write_all(MAGIC)?;
    put_u16le(out, mode)?;

    let code = obj.segment(SegmentKind::Code);
    let data = obj.segment(SegmentKind::Data);
    let zero = obj.segment(SegmentKind::Zero);
    let bss = obj.segment(SegmentKind::Bss);

    for seg in [code, data, bss, zero] {
        put_wide(out, seg.base(), use32)?;
        put_wide(out, seg.size(), use32)?;
    }
    // Stack size, 0 = undefined.
    put_wide(out, 0, use32)?;

    match obj.linkage() {
        LinkageWish::LinkInGroup(group) => put_numeric_header(out, 10, 1, group)?,
        LinkageWish::LinkThisPage(page) => put_numeric_header(out, 10, 2, page)?,
        LinkageWish::LinkAnywhere => {}
    }
    put_text_header(out, 2, &format!("{PROG_NAME} {}", env!("CARGO_PKG_VERSION")))?;
    out.write_all(&[0])?;

    out.write_all(&code.content())?;
    out.write_all(&data.content())?;

    put_wide(out, syms.len(), use32)?;
    for name in &syms.names {
        put_cstr(out, name)?;
    }

    put_relocs(code, &syms, out, diag)?;
    put_relocs(data, &syms, out, diag)?;

    for kind in SegmentKind::ALL {
        put_labels(obj.segment(kind), kind, out, use32)?;
    }
    Ok(())
}

fn put_numeric_header<W: Write>(out: &mut W, htype: u8, param: u8, value: u32) -> io::Result<()> {
    out.write_all(&[7, htype, param])?;
    put_u32le(out, value)
}

fn put_text_header<W: Write>(out: &mut W, htype: u8, text: &str) -> io::Result<()> {
    out.write_all(&[(text.len() + 3) as u8, htype])?;
    put_cstr(out, text)
}

/// One segment's relocation stream: entries sorted by patch address,
/// delta-encoded with 255 continuation bytes, terminated by `0x00`.
/// A symbolic entry landing on the same address as a fixup replaces
/// it.
fn put_relocs<W: Write>(
    seg: &Segment,
    syms: &SymbolTable,
    out: &mut W,
    diag: &mut Diagnostics,
) -> io::Result<()> {
    let mut entries = BTreeMap::<u32, Vec<u8>>::new();
    let table = &seg.reloc;

    for f in &table.lobyte.fixups {
        entries.insert(f.addr, vec![0x20 | f.seg.wire_id()]);
    }
    for f in &table.absword.fixups {
        entries.insert(f.addr, vec![0x80 | f.seg.wire_id()]);
    }
    for f in &table.long.fixups {
        entries.insert(f.addr, vec![0xc0 | f.seg.wire_id()]);
    }
    for f in &table.hibyte.fixups {
        entries.insert(f.addr, vec![0x40 | f.seg.wire_id(), f.extra]);
    }
    for f in &table.segbyte.fixups {
        let [lo, hi] = f.extra.to_le_bytes();
        entries.insert(f.addr, vec![0xa0 | f.seg.wire_id(), lo, hi]);
    }

    for e in &table.lobyte.relocs {
        entries.insert(e.addr, sym_entry(0x20, syms.find(&e.name), &[]));
    }
    for e in &table.absword.relocs {
        entries.insert(e.addr, sym_entry(0x80, syms.find(&e.name), &[]));
    }
    for e in &table.long.relocs {
        entries.insert(e.addr, sym_entry(0xc0, syms.find(&e.name), &[]));
    }
    for e in &table.hibyte.relocs {
        entries.insert(e.addr, sym_entry(0x40, syms.find(&e.name), &[e.extra]));
    }
    for e in &table.segbyte.relocs {
        entries.insert(e.addr, sym_entry(0xa0, syms.find(&e.name), &e.extra.to_le_bytes()));
    }

    let mut last = -1i64;
    for (&addr, payload) in &entries {
        let mut delta = i64::from(addr) - last;
        if delta <= 0 {
            diag.error(
                Category::RelocDelta,
                format!("Relocation delta not positive ({delta})"),
            );
        }
        while delta > 254 {
            out.write_all(&[255])?;
            delta -= 254;
        }
        out.write_all(&[(delta & 0xff) as u8])?;
        last = i64::from(addr);
        out.write_all(payload)?;
    }
    out.write_all(&[0])
}

fn sym_entry(kind: u8, index: u32, extra: &[u8]) -> Vec<u8> {
    let mut entry = vec![kind];
    entry.extend_from_slice(&((index & 0xffff) as u16).to_le_bytes());
    entry.extend_from_slice(extra);
    entry
}

/// Export table for one segment: count, then `name\0 seg_id address`
/// per label, in ascending scope level then name order.
fn put_labels<W: Write>(
    seg: &Segment,
    kind: SegmentKind,
    out: &mut W,
    use32: bool,
) -> io::Result<()> {
    let count = seg.labels().values().map(BTreeMap::len).sum::<usize>();
    put_wide(out, count as u32, use32)?;
    for list in seg.labels().values() {
        for (name, &addr) in list {
            put_cstr(out, name)?;
            out.write_all(&[kind.wire_id()])?;
            put_wide(out, addr, use32)?;
        }
    }
    Ok(())
}
