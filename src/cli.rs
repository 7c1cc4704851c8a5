use std::fmt::Write as _;

use anyhow::Context;
use clap::Parser;

use crate::format::o65::{parse_o65, O65File, RelocEntry, RelocTarget};
use crate::segment::SegmentKind;

/// Inspects O65 object files produced by the assembler.
#[derive(Debug, Parser)]
#[command(name = "snesobj", version)]
pub struct Args {
    /// Object file to inspect.
    #[arg(value_name = "OBJECT")]
    pub input: String,

    /// Print per-entry relocation and export detail.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Reads, parses and prints one object file.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed.
pub fn run(args: &Args) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input))?;
    let object = parse_o65(&bytes).map_err(|err| anyhow::anyhow!("{}: {err}", args.input))?;
    print!("{}", describe(&object, args.verbose));
    Ok(())
}

#[must_use]
pub fn describe(object: &O65File, verbose: bool) -> String {
    let mut out = String::new();
    let width = if object.use32() { 32 } else { 16 };
    let _ = writeln!(out, "mode {:#06x} ({width}-bit)", object.mode);
    for (name, base, size) in [
        ("code", object.code_base, object.code_size),
        ("data", object.data_base, object.data_size),
        ("bss", object.bss_base, object.bss_size),
        ("zero", object.zero_base, object.zero_size),
    ] {
        let _ = writeln!(out, "  {name:<4} base={base:#08x} size={size:#x}");
    }
    for header in &object.headers {
        if header.htype == 2 {
            let text = String::from_utf8_lossy(
                header.payload.strip_suffix(&[0]).unwrap_or(&header.payload),
            );
            let _ = writeln!(out, "assembler: {text}");
        } else if verbose {
            let _ = writeln!(out, "header type {}: {:02x?}", header.htype, header.payload);
        }
    }

    let _ = writeln!(out, "undefined symbols: {}", object.symbols.len());
    if verbose {
        for (index, name) in object.symbols.iter().enumerate() {
            let _ = writeln!(out, "  {index}: {name}");
        }
    }

    for (name, relocs) in [("code", &object.code_relocs), ("data", &object.data_relocs)] {
        let _ = writeln!(out, "{name} relocations: {}", relocs.len());
        if verbose {
            for entry in relocs {
                let _ = writeln!(out, "  {}", describe_reloc(object, entry));
            }
        }
    }

    for (kind, table) in SegmentKind::ALL.iter().zip(&object.exports) {
        if table.labels.is_empty() {
            continue;
        }
        let _ = writeln!(out, "exports in {}: {}", kind.name(), table.labels.len());
        if verbose {
            for label in &table.labels {
                let _ = writeln!(out, "  {:04X} {}", label.addr, label.name);
            }
        }
    }
    out
}

fn describe_reloc(object: &O65File, entry: &RelocEntry) -> String {
    let kind = match entry.kind {
        0x20 => "lo",
        0x40 => "hi",
        0x80 => "abs",
        0xa0 => "seg",
        0xc0 => "long",
        _ => "?",
    };
    let target = match entry.target {
        RelocTarget::Segment(id) => SegmentKind::ALL
            .iter()
            .find(|k| k.wire_id() == id)
            .map_or_else(|| format!("segment {id}"), |k| k.name().to_string()),
        RelocTarget::Symbol(index) => object
            .symbols
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| format!("symbol {index}")),
    };
    format!("{:04X} {kind} -> {target}", entry.addr)
}

#[cfg(test)]
mod tests {
    use super::{describe, Args};
    use clap::Parser;

    #[test]
    fn parses_verbose_flag() {
        let args = Args::parse_from(["snesobj", "-v", "main.o65"]);
        assert!(args.verbose);
        assert_eq!(args.input, "main.o65");
    }

    #[test]
    fn describes_written_object() {
        let mut diag = crate::diag::Diagnostics::new();
        let mut obj = crate::object::Object::new();
        obj.start_scope();
        obj.define_label("main", &mut diag);
        obj.generate_byte(0xea);
        obj.add_extern(crate::reloc::RelocKind::Long, "far_away", 0);
        obj.generate_byte(0);
        obj.generate_byte(0);
        obj.generate_byte(0);
        obj.end_scope(&mut diag);
        obj.close_segments(false, &mut diag);

        let mut image = Vec::new();
        crate::writer::o65::write_o65(&obj, &mut image, &mut diag).expect("write");
        let object = crate::format::o65::parse_o65(&image).expect("parse");

        let text = describe(&object, true);
        assert!(text.contains("mode 0x9000 (16-bit)"));
        assert!(text.contains("undefined symbols: 1"));
        assert!(text.contains("0: far_away"));
        assert!(text.contains("0001 long -> far_away"));
        assert!(text.contains("exports in TEXT: 1"));
        assert!(text.contains("0000 main"));
    }
}
