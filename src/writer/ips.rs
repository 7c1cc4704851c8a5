//! IPS patch writer with the DarkForce label/extern extension: label
//! and extern records ride on reserved pseudo-addresses next to the
//! "EOF" marker, where no ordinary patch can live.

use std::io::{self, Write};

use crate::diag::{Category, Diagnostics};
use crate::object::{LinkageWish, Object};
use crate::segment::{Segment, SegmentKind};

use super::{put_u16be, put_u24be};

const IPS_EOF_MARKER: u32 = 0x45_4f46;
const IPS_ADDRESS_EXTERN: u32 = 0x45_4f45;
const IPS_ADDRESS_GLOBAL: u32 = 0x45_4e47;

/// Largest payload chunk per patch record.
const CHUNK_LIMIT: u32 = 20_000;

/// Writes `obj` as an IPS patch. Call after `close_segments`. Fixups
/// are ignored: an IPS patch is never relocated.
///
/// # Errors
/// Returns an error only when the byte sink fails.
pub fn write_ips<W: Write>(obj: &Object, out: &mut W, diag: &mut Diagnostics) -> io::Result<()> {
    if obj.linkage() != LinkageWish::LinkAnywhere {
        diag.warning(
            Category::LinkageIgnored,
            "IPS file is never relocated - .link statement ignored",
        );
    }

    out.write_all(b"PATCH")?;
    for kind in [
        SegmentKind::Code,
        SegmentKind::Data,
        SegmentKind::Bss,
        SegmentKind::Zero,
    ] {
        write_segment(obj.segment(kind), out, diag)?;
    }
    out.write_all(b"EOF")
}

fn global_record(name: &str, addr: u32) -> Vec<u8> {
    let mut payload = name.as_bytes().to_vec();
    payload.push(0);
    payload.push((addr & 0xff) as u8);
    payload.push(((addr >> 8) & 0xff) as u8);
    payload.push(((addr >> 16) & 0x3f) as u8);
    payload
}

fn extern_record(addr: u32, name: &str, size: u8) -> Vec<u8> {
    let mut payload = global_record(name, addr);
    payload.push(size);
    payload
}

fn write_segment<W: Write>(seg: &Segment, out: &mut W, diag: &mut Diagnostics) -> io::Result<()> {
    let mut records = Vec::<(u32, Vec<u8>)>::new();

    for list in seg.labels().values() {
        for (name, &addr) in list {
            records.push((IPS_ADDRESS_GLOBAL, global_record(name, addr)));
        }
    }

    for e in &seg.reloc.lobyte.relocs {
        records.push((IPS_ADDRESS_EXTERN, extern_record(e.addr, &e.name, 1)));
    }
    for e in &seg.reloc.absword.relocs {
        records.push((IPS_ADDRESS_EXTERN, extern_record(e.addr, &e.name, 2)));
    }
    for e in &seg.reloc.long.relocs {
        records.push((IPS_ADDRESS_EXTERN, extern_record(e.addr, &e.name, 3)));
    }
    if !seg.reloc.hibyte.relocs.is_empty() {
        diag.error(
            Category::IpsUnsupported,
            "Hi-byte-type externs aren't supported in IPS format",
        );
    }
    if !seg.reloc.segbyte.relocs.is_empty() {
        diag.error(
            Category::IpsUnsupported,
            "Segment-type externs aren't supported in IPS format",
        );
    }

    for (addr, payload) in &records {
        put_u24be(out, *addr)?;
        put_u16be(out, payload.len() as u16)?;
        out.write_all(payload)?;
    }

    let mut addr = 0u32;
    while let Some((start, len)) = seg.find_next_blob(addr) {
        addr = start;
        let mut left = len;
        while left > 0 {
            let count = left.min(CHUNK_LIMIT);
            if addr == IPS_EOF_MARKER {
                diag.error(
                    Category::IpsUnsupported,
                    format!("IPS doesn't allow patches that go to ${addr:X}"),
                );
            } else if addr == IPS_ADDRESS_EXTERN {
                diag.error(
                    Category::IpsUnsupported,
                    format!("Address ${addr:X} is reserved for extern records"),
                );
            } else if addr == IPS_ADDRESS_GLOBAL {
                diag.error(
                    Category::IpsUnsupported,
                    format!("Address ${addr:X} is reserved for global-label records"),
                );
            } else if addr > 0xff_ffff {
                diag.error(
                    Category::IpsUnsupported,
                    format!("Address ${addr:X} is too big for IPS format"),
                );
            }
            put_u24be(out, addr & 0x3f_ffff)?;
            put_u16be(out, (count & 0xffff) as u16)?;
            out.write_all(&seg.content_at(addr, count))?;
            left -= count;
            addr = addr.wrapping_add(count);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::write_ips;
    use crate::diag::{Category, Diagnostics};
    use crate::object::{LinkageWish, Object};
    use crate::reloc::RelocKind;
    use crate::segment::SegmentKind;

    fn write(obj: &Object, diag: &mut Diagnostics) -> Vec<u8> {
        let mut out = Vec::new();
        write_ips(obj, &mut out, diag).expect("write");
        out
    }

    #[test]
    fn payload_records_split_at_holes() {
        let mut diag = Diagnostics::new();
        let mut obj = Object::new();
        obj.set_pos(0x100);
        obj.generate_byte(0x42);
        obj.set_pos(0x200);
        obj.generate_byte(0x43);
        obj.close_segments(false, &mut diag);

        let out = write(&obj, &mut diag);
        assert_eq!(
            out,
            [
                b'P', b'A', b'T', b'C', b'H',
                0x00, 0x01, 0x00, 0x00, 0x01, 0x42,
                0x00, 0x02, 0x00, 0x00, 0x01, 0x43,
                b'E', b'O', b'F',
            ]
        );
    }

    #[test]
    fn long_blobs_are_chunked() {
        let mut diag = Diagnostics::new();
        let mut obj = Object::new();
        for _ in 0..20_001 {
            obj.generate_byte(0xaa);
        }
        obj.close_segments(false, &mut diag);

        let out = write(&obj, &mut diag);
        // First record: addr 0, len 20000. Second: addr 20000, len 1.
        assert_eq!(&out[5..10], [0x00, 0x00, 0x00, 0x4e, 0x20]);
        let second = 10 + 20_000;
        assert_eq!(&out[second..second + 5], [0x00, 0x4e, 0x20, 0x00, 0x01]);
        assert_eq!(&out[second + 6..], b"EOF");
    }

    #[test]
    fn labels_and_externs_ride_reserved_addresses() {
        let mut diag = Diagnostics::new();
        let mut obj = Object::new();
        obj.start_scope();
        obj.define_label("main", &mut diag);
        obj.generate_byte(0xea);
        obj.add_extern(RelocKind::AbsWord, "ext", 0);
        obj.generate_byte(0);
        obj.generate_byte(0);
        obj.end_scope(&mut diag);
        obj.close_segments(false, &mut diag);

        let out = write(&obj, &mut diag);
        let mut expect = Vec::new();
        expect.extend_from_slice(b"PATCH");
        // Global-label record for "main" at address 0.
        expect.extend_from_slice(&[0x45, 0x4e, 0x47, 0x00, 0x08]);
        expect.extend_from_slice(b"main\x00");
        expect.extend_from_slice(&[0x00, 0x00, 0x00]);
        // Extern record for "ext" at address 1, two bytes wide.
        expect.extend_from_slice(&[0x45, 0x4f, 0x45, 0x00, 0x08]);
        expect.extend_from_slice(b"ext\x00");
        expect.extend_from_slice(&[0x01, 0x00, 0x00, 0x02]);
        // Payload: three code bytes at 0.
        expect.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x03, 0xea, 0x00, 0x00]);
        expect.extend_from_slice(b"EOF");
        assert_eq!(out, expect);
    }

    #[test]
    fn hibyte_and_segbyte_externs_are_rejected() {
        let mut diag = Diagnostics::new();
        let mut obj = Object::new();
        obj.add_extern(RelocKind::HiByte, "h", 0);
        obj.generate_byte(0);
        obj.set_segment(SegmentKind::Data);
        obj.add_extern(RelocKind::SegByte, "s", 0);
        obj.generate_byte(0);
        obj.close_segments(false, &mut diag);

        let _ = write(&obj, &mut diag);
        assert_eq!(diag.count(Category::IpsUnsupported), 2);
    }

    #[test]
    fn reserved_payload_addresses_are_diagnosed() {
        let mut diag = Diagnostics::new();
        let mut obj = Object::new();
        obj.set_pos(super::IPS_EOF_MARKER);
        obj.generate_byte(0x01);
        obj.close_segments(false, &mut diag);

        let _ = write(&obj, &mut diag);
        assert_eq!(diag.count(Category::IpsUnsupported), 1);
    }

    #[test]
    fn linkage_wish_is_warned_and_ignored() {
        let mut diag = Diagnostics::new();
        let mut obj = Object::new();
        obj.set_linkage(LinkageWish::LinkInGroup(1));
        obj.close_segments(false, &mut diag);

        let out = write(&obj, &mut diag);
        assert_eq!(out, b"PATCHEOF");
        assert_eq!(diag.count(Category::LinkageIgnored), 1);
    }
}
