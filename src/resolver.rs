//! Binds pending external references to labels as scopes close, and
//! applies whatever survives when the segments are closed for output.

use crate::diag::{Category, Diagnostics};
use crate::object::Object;
use crate::reloc::RelocKind;
use crate::segment::{FixupRef, Segment, SegmentKind};

/// Margin a first-pass REL8 distance must clear. Jumps that resolve
/// within the margin of the limit are reported so the outer assembly
/// loop can widen them on the reassembly pass.
const REL8_FIRST_PASS_MARGIN: i64 = 20;

/// Tries to bind every pending extern of `seg` that belongs to the
/// scope now ending (recorded level >= `cur_scope`). Enclosing levels
/// are searched from the innermost outward; within one level the
/// segments are searched in CODE, DATA, ZERO, BSS order. Externs that
/// stay unbound survive, in order, for an enclosing scope or for the
/// linker.
pub fn check_externs(obj: &mut Object, seg: SegmentKind, cur_scope: u32) {
    let externs = std::mem::take(&mut obj.segment_mut(seg).externs);
    let mut surviving = Vec::with_capacity(externs.len());

    for ext in externs {
        // Not its time yet; an inner scope recorded it for later.
        if ext.level < cur_scope {
            surviving.push(ext);
            continue;
        }

        let mut target = None;
        for scope in (0..cur_scope).rev() {
            if let Some(hit) = obj.find_label_at(&ext.name, scope) {
                target = Some(hit);
                break;
            }
        }

        match target {
            Some((target_seg, target_offset)) => {
                let segment = obj.segment_mut(seg);
                segment.mark_label_used(&ext.name);
                segment.fixups.push(FixupRef {
                    pos: ext.pos,
                    kind: ext.kind,
                    value: ext.value,
                    target_seg,
                    target_offset,
                });
            }
            None => surviving.push(ext),
        }
    }

    obj.segment_mut(seg).externs = surviving;
}

/// Closes one segment: unresolved externs are patched with their bare
/// value and become symbolic relocations; fixups are patched with
/// `value + target_offset` and become segment-targeted relocations.
/// Relative references never reach the relocation table; survivors and
/// out-of-range distances are diagnosed.
pub fn close_segment(seg: &mut Segment, already_reprocessed: bool, diag: &mut Diagnostics) {
    let externs = std::mem::take(&mut seg.externs);
    for ext in externs {
        let addr = ext.pos;
        let value = ext.value;
        match ext.kind {
            RelocKind::LoByte => {
                seg.reloc.lobyte.add_reloc(addr, ext.name, ());
                seg.set_byte(addr, (value & 0xff) as u8);
            }
            RelocKind::HiByte => {
                seg.reloc.hibyte.add_reloc(addr, ext.name, (value & 0xff) as u8);
                seg.set_byte(addr, ((value >> 8) & 0xff) as u8);
            }
            RelocKind::AbsWord => {
                seg.reloc.absword.add_reloc(addr, ext.name, ());
                seg.set_byte(addr, (value & 0xff) as u8);
                seg.set_byte(addr + 1, ((value >> 8) & 0xff) as u8);
            }
            RelocKind::Long => {
                seg.reloc.long.add_reloc(addr, ext.name, ());
                seg.set_byte(addr, (value & 0xff) as u8);
                seg.set_byte(addr + 1, ((value >> 8) & 0xff) as u8);
                seg.set_byte(addr + 2, ((value >> 16) & 0xff) as u8);
            }
            RelocKind::SegByte => {
                seg.reloc
                    .segbyte
                    .add_reloc(addr, ext.name, (value & 0xffff) as u16);
                seg.set_byte(addr, ((value >> 16) & 0xff) as u8);
            }
            RelocKind::Rel8 => {
                diag.error(
                    Category::UnresolvedRelative,
                    format!("Unresolved short relative '{}'", ext.name),
                );
            }
            RelocKind::Rel16 => {
                diag.error(
                    Category::UnresolvedRelative,
                    format!("Unresolved near relative '{}'", ext.name),
                );
            }
        }
    }

    let fixups = std::mem::take(&mut seg.fixups);
    for fix in fixups {
        let addr = fix.pos;
        let value = fix.value + i64::from(fix.target_offset);
        match fix.kind {
            RelocKind::LoByte => {
                seg.reloc.lobyte.add_fixup(fix.target_seg, addr, ());
                seg.set_byte(addr, (value & 0xff) as u8);
            }
            RelocKind::HiByte => {
                seg.reloc
                    .hibyte
                    .add_fixup(fix.target_seg, addr, (value & 0xff) as u8);
                seg.set_byte(addr, ((value >> 8) & 0xff) as u8);
            }
            RelocKind::AbsWord => {
                seg.reloc.absword.add_fixup(fix.target_seg, addr, ());
                seg.set_byte(addr, (value & 0xff) as u8);
                seg.set_byte(addr + 1, ((value >> 8) & 0xff) as u8);
            }
            RelocKind::Long => {
                seg.reloc.long.add_fixup(fix.target_seg, addr, ());
                seg.set_byte(addr, (value & 0xff) as u8);
                seg.set_byte(addr + 1, ((value >> 8) & 0xff) as u8);
                seg.set_byte(addr + 2, ((value >> 16) & 0xff) as u8);
            }
            RelocKind::SegByte => {
                seg.reloc
                    .segbyte
                    .add_fixup(fix.target_seg, addr, (value & 0xffff) as u16);
                seg.set_byte(addr, ((value >> 16) & 0xff) as u8);
            }
            RelocKind::Rel8 => {
                let diff = value - i64::from(addr) - 1;
                let margin = if already_reprocessed {
                    0
                } else {
                    REL8_FIRST_PASS_MARGIN
                };
                if diff < -0x80 + margin || diff >= 0x80 - margin {
                    diag.error(
                        Category::JumpOutOfRange,
                        format!("Short jump out of range ({diff})"),
                    );
                }
                seg.set_byte(addr, (diff & 0xff) as u8);
            }
            RelocKind::Rel16 => {
                let diff = value - i64::from(addr) - 2;
                if !(-0x8000..0x8000).contains(&diff) {
                    diag.error(
                        Category::JumpOutOfRange,
                        format!("Near jump out of range ({diff})"),
                    );
                }
                seg.set_byte(addr, (diff & 0xff) as u8);
                seg.set_byte(addr + 1, ((diff >> 8) & 0xff) as u8);
            }
        }
    }
}
