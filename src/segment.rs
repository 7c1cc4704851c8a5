use std::collections::{BTreeMap, HashSet};

use crate::data::DataArea;
use crate::diag::{Category, Diagnostics};
use crate::reloc::{RelocKind, RelocTable};

/// One of the four address spaces of an object file, with the ordinal
/// used in the wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentKind {
    #[default]
    Code,
    Data,
    Zero,
    Bss,
}

impl SegmentKind {
    /// Search order for label lookups and O65 output.
    pub const ALL: [Self; 4] = [Self::Code, Self::Data, Self::Zero, Self::Bss];

    #[must_use]
    pub fn wire_id(self) -> u8 {
        match self {
            Self::Code => 0,
            Self::Data => 1,
            Self::Zero => 2,
            Self::Bss => 3,
        }
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.wire_id())
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Code => "TEXT",
            Self::Data => "DATA",
            Self::Zero => "ZERO",
            Self::Bss => "BSS",
        }
    }
}

/// A reference to a not-yet-resolved symbol, recorded at its patch
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternRef {
    pub pos: u32,
    pub kind: RelocKind,
    pub value: i64,
    pub name: String,
    /// Scope depth at the time the reference was recorded.
    pub level: u32,
}

/// A reference bound to a segment-local offset during scope close. The
/// relocation table still gets an entry because the linker may move the
/// target segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixupRef {
    pub pos: u32,
    pub kind: RelocKind,
    pub value: i64,
    pub target_seg: SegmentKind,
    pub target_offset: u32,
}

/// Scope level to `name -> offset`, iterated by ascending level.
pub type LabelLevels = BTreeMap<u32, BTreeMap<String, u32>>;

/// One address space: a byte image with an emission cursor, the scoped
/// label map, pending externs, resolved fixups and the relocation
/// table filled at segment close.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    position: u32,
    data: DataArea,
    labels: LabelLevels,
    unused_labels: HashSet<String>,
    pub(crate) externs: Vec<ExternRef>,
    pub(crate) fixups: Vec<FixupRef>,
    pub reloc: RelocTable,
}

impl Segment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_byte(&mut self, byte: u8) {
        self.data.write_byte(self.position, byte);
        self.position = self.position.wrapping_add(1);
    }

    pub fn set_byte(&mut self, offset: u32, byte: u8) {
        self.data.write_byte(offset, byte);
    }

    #[must_use]
    pub fn get_byte(&self, offset: u32) -> u8 {
        self.data.get_byte(offset)
    }

    #[must_use]
    pub fn pos(&self) -> u32 {
        self.position
    }

    pub fn set_pos(&mut self, pos: u32) {
        self.position = pos;
    }

    #[must_use]
    pub fn base(&self) -> u32 {
        self.data.base()
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.data.size()
    }

    #[must_use]
    pub fn content(&self) -> Vec<u8> {
        self.data.content()
    }

    #[must_use]
    pub fn content_at(&self, addr: u32, len: u32) -> Vec<u8> {
        self.data.content_at(addr, len)
    }

    #[must_use]
    pub fn find_next_blob(&self, from: u32) -> Option<(u32, u32)> {
        self.data.find_next_blob(from)
    }

    /// Labels by ascending scope level, then name.
    #[must_use]
    pub fn labels(&self) -> &LabelLevels {
        &self.labels
    }

    pub fn define_label(&mut self, level: u32, name: &str, value: u32) {
        self.unused_labels.insert(name.to_string());
        self.labels
            .entry(level)
            .or_default()
            .insert(name.to_string(), value);
    }

    #[must_use]
    pub fn find_label_at(&self, name: &str, level: u32) -> Option<u32> {
        self.labels.get(&level)?.get(name).copied()
    }

    /// Searches every level in ascending order; the first match wins.
    #[must_use]
    pub fn find_label(&self, name: &str) -> Option<u32> {
        self.labels.values().find_map(|list| list.get(name).copied())
    }

    /// Visibility test only; never marks the label used.
    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        self.find_label(name).is_some()
    }

    pub fn undefine_label(&mut self, name: &str) {
        for list in self.labels.values_mut() {
            list.remove(name);
        }
    }

    /// Drops every label at `level`. A dropped label that was never
    /// referenced by the resolver produces an `unused-label` warning.
    pub fn clear_labels(&mut self, level: u32, diag: &mut Diagnostics) {
        let Some(list) = self.labels.remove(&level) else {
            return;
        };
        for name in list.keys() {
            if self.unused_labels.remove(name) {
                diag.warning(Category::UnusedLabel, format!("Unused label '{name}'"));
            }
        }
    }

    pub(crate) fn mark_label_used(&mut self, name: &str) {
        self.unused_labels.remove(name);
    }

    /// Records a reference to `name` at the current position.
    pub fn add_extern(&mut self, kind: RelocKind, name: &str, value: i64, scope: u32) {
        self.externs.push(ExternRef {
            pos: self.position,
            kind,
            value,
            name: name.to_string(),
            level: scope,
        });
    }

    #[must_use]
    pub fn externs(&self) -> &[ExternRef] {
        &self.externs
    }

    #[must_use]
    pub fn fixups(&self) -> &[FixupRef] {
        &self.fixups
    }
}

#[cfg(test)]
mod tests {
    use super::{Segment, SegmentKind};
    use crate::diag::{Category, Diagnostics};
    use crate::reloc::RelocKind;

    #[test]
    fn bytes_advance_position() {
        let mut seg = Segment::new();
        for byte in [0xa9, 0x00, 0x60] {
            seg.add_byte(byte);
        }
        assert_eq!(seg.pos(), 3);
        assert_eq!(seg.content(), vec![0xa9, 0x00, 0x60]);

        seg.set_pos(1);
        seg.add_byte(0xff);
        assert_eq!(seg.pos(), 2);
        assert_eq!(seg.content(), vec![0xa9, 0xff, 0x60]);
    }

    #[test]
    fn finds_labels_across_levels_in_level_order() {
        let mut seg = Segment::new();
        seg.define_label(2, "x", 0x20);
        seg.define_label(0, "x", 0x10);
        seg.define_label(1, "y", 0x30);

        assert_eq!(seg.find_label_at("x", 2), Some(0x20));
        assert_eq!(seg.find_label_at("x", 1), None);
        // Ascending level order, first found wins.
        assert_eq!(seg.find_label("x"), Some(0x10));
        assert_eq!(seg.find_label("y"), Some(0x30));
        assert!(!seg.has_label("z"));
    }

    #[test]
    fn undefine_removes_every_level() {
        let mut seg = Segment::new();
        seg.define_label(0, "x", 1);
        seg.define_label(3, "x", 2);
        seg.undefine_label("x");
        assert!(!seg.has_label("x"));
    }

    #[test]
    fn clearing_warns_about_unused_labels() {
        let mut diag = Diagnostics::new();
        let mut seg = Segment::new();
        seg.define_label(2, "used", 0);
        seg.define_label(2, "dead", 4);
        seg.mark_label_used("used");

        seg.clear_labels(2, &mut diag);
        assert_eq!(diag.count(Category::UnusedLabel), 1);
        assert!(!seg.has_label("used"));
        assert!(!seg.has_label("dead"));
    }

    #[test]
    fn clearing_respects_disabled_warning() {
        let mut diag = Diagnostics::new();
        diag.set_warning(Category::UnusedLabel, false);
        let mut seg = Segment::new();
        seg.define_label(2, "dead", 4);
        seg.clear_labels(2, &mut diag);
        assert_eq!(diag.count(Category::UnusedLabel), 0);
    }

    #[test]
    fn externs_record_position_and_scope() {
        let mut seg = Segment::new();
        seg.add_byte(0x20);
        seg.add_extern(RelocKind::AbsWord, "target", 1, 2);
        let ext = &seg.externs()[0];
        assert_eq!(ext.pos, 1);
        assert_eq!(ext.level, 2);
        assert_eq!(ext.value, 1);
    }

    #[test]
    fn wire_ids_are_stable() {
        assert_eq!(
            SegmentKind::ALL.map(SegmentKind::wire_id),
            [0, 1, 2, 3]
        );
        assert_eq!(SegmentKind::Code.name(), "TEXT");
    }
}
