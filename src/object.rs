use std::io::{self, Write};

use crate::diag::{Category, Diagnostics};
use crate::reloc::RelocKind;
use crate::segment::{Segment, SegmentKind};

/// Where the linker may place this object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkageWish {
    #[default]
    LinkAnywhere,
    LinkInGroup(u32),
    LinkThisPage(u32),
}

/// In-memory model of one assembled translation unit: four segments,
/// the active segment selector, the lexical scope depth and the
/// linkage wish. The front end drives this type in parse order; the
/// writers take a read-only view after `close_segments`.
#[derive(Debug, Clone, Default)]
pub struct Object {
    segments: [Segment; 4],
    cur_segment: SegmentKind,
    cur_scope: u32,
    linkage: LinkageWish,
}

impl Object {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn segment(&self, kind: SegmentKind) -> &Segment {
        &self.segments[kind.index()]
    }

    pub fn segment_mut(&mut self, kind: SegmentKind) -> &mut Segment {
        &mut self.segments[kind.index()]
    }

    #[must_use]
    pub fn cur_segment(&self) -> SegmentKind {
        self.cur_segment
    }

    pub fn set_segment(&mut self, kind: SegmentKind) {
        self.cur_segment = kind;
    }

    #[must_use]
    pub fn cur_scope(&self) -> u32 {
        self.cur_scope
    }

    #[must_use]
    pub fn linkage(&self) -> LinkageWish {
        self.linkage
    }

    pub fn set_linkage(&mut self, wish: LinkageWish) {
        self.linkage = wish;
    }

    fn seg(&self) -> &Segment {
        self.segment(self.cur_segment)
    }

    fn seg_mut(&mut self) -> &mut Segment {
        let kind = self.cur_segment;
        self.segment_mut(kind)
    }

    pub fn generate_byte(&mut self, byte: u8) {
        self.seg_mut().add_byte(byte);
    }

    #[must_use]
    pub fn pos(&self) -> u32 {
        self.seg().pos()
    }

    pub fn set_pos(&mut self, pos: u32) {
        self.seg_mut().set_pos(pos);
    }

    /// Records a reference to `name` in the current segment, tagged
    /// with the current scope depth.
    pub fn add_extern(&mut self, kind: RelocKind, name: &str, value: i64) {
        let scope = self.cur_scope;
        self.seg_mut().add_extern(kind, name, value, scope);
    }

    /// True when `name` is defined in any segment at any level. This is
    /// the visibility test used by the redefinition check; it never
    /// marks the label used.
    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        SegmentKind::ALL.iter().any(|&k| self.segment(k).has_label(name))
    }

    /// First match in CODE, DATA, ZERO, BSS order, any level.
    #[must_use]
    pub fn find_label(&self, name: &str) -> Option<(SegmentKind, u32)> {
        SegmentKind::ALL
            .iter()
            .find_map(|&k| self.segment(k).find_label(name).map(|v| (k, v)))
    }

    /// First match in CODE, DATA, ZERO, BSS order at exactly `level`.
    #[must_use]
    pub fn find_label_at(&self, name: &str, level: u32) -> Option<(SegmentKind, u32)> {
        SegmentKind::ALL
            .iter()
            .find_map(|&k| self.segment(k).find_label_at(name, level).map(|v| (k, v)))
    }

    pub fn define_label(&mut self, name: &str, diag: &mut Diagnostics) {
        let value = self.pos();
        self.define_label_value(name, value, diag);
    }

    /// Defines `name` at the scope its sigils select: a leading `+`
    /// pins it to the global level, each leading `&` climbs one
    /// enclosing scope, otherwise it lands one level inside the current
    /// depth. Redefining an existing name anywhere is an error and the
    /// definition is dropped.
    pub fn define_label_value(&mut self, name: &str, value: u32, diag: &mut Diagnostics) {
        let mut name = name;
        let mut scope = self.cur_scope.saturating_sub(1);
        if let Some(stripped) = name.strip_prefix('+') {
            name = stripped;
            scope = 0;
        }
        while let Some(stripped) = name.strip_prefix('&') {
            name = stripped;
            scope = scope.saturating_sub(1);
        }

        if self.has_label(name) {
            diag.error(
                Category::Redefinition,
                format!("Label '{name}' already defined"),
            );
            return;
        }
        self.seg_mut().define_label(scope, name, value);
    }

    pub fn undefine_label(&mut self, name: &str) {
        for seg in &mut self.segments {
            seg.undefine_label(name);
        }
    }

    pub fn start_scope(&mut self) {
        self.cur_scope += 1;
    }

    /// Closes the innermost scope: binds pending externs against the
    /// enclosing levels, then drops this level's labels. Levels 0 and 1
    /// are kept so the writers can publish them.
    pub fn end_scope(&mut self, diag: &mut Diagnostics) {
        let cur = self.cur_scope;
        for kind in SegmentKind::ALL {
            crate::resolver::check_externs(self, kind, cur);
        }
        if cur > 1 {
            for seg in &mut self.segments {
                seg.clear_labels(cur - 1, diag);
            }
        }
        self.cur_scope = cur.saturating_sub(1);
    }

    /// Applies everything still pending to the byte images and fills
    /// the relocation tables. Call once, after all scopes have ended;
    /// `already_reprocessed` marks a reassembly pass and drops the
    /// short-jump safety margin.
    pub fn close_segments(&mut self, already_reprocessed: bool, diag: &mut Diagnostics) {
        for seg in &mut self.segments {
            crate::resolver::close_segment(seg, already_reprocessed, diag);
        }
    }

    /// Resets to a freshly-constructed state. Multi-pass drivers call
    /// this between passes.
    pub fn clear_most(&mut self) {
        *self = Self::default();
    }

    /// Label and extern listing on stderr.
    pub fn dump(&self) {
        let _ = self.dump_to(&mut io::stderr());
    }

    pub fn dump_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for kind in SegmentKind::ALL {
            let seg = self.segment(kind);
            let mut first = true;
            for (&level, list) in seg.labels() {
                for (name, &addr) in list {
                    if first {
                        writeln!(out, "Labels in the {:>4} segment:", kind.name())?;
                        first = false;
                    }
                    write!(out, " {addr:04X} ")?;
                    for _ in 0..level {
                        write!(out, "+")?;
                    }
                    writeln!(out, "{name}")?;
                }
            }
        }
        for kind in SegmentKind::ALL {
            let seg = self.segment(kind);
            if seg.externs().is_empty() {
                continue;
            }
            writeln!(out, "Externs in the {:>4} segment:", kind.name())?;
            for ext in seg.externs() {
                write!(out, " {:04X} {} {}", ext.pos, ext.kind.tag(), ext.name)?;
                if ext.value != 0 {
                    write!(out, "{:+}", ext.value)?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }
}
