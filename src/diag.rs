use std::collections::BTreeSet;

/// Diagnostic categories, one per problem class the object back end
/// can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Redefinition,
    UnresolvedRelative,
    JumpOutOfRange,
    RelocDelta,
    IpsUnsupported,
    UnusedLabel,
    Use32,
    LinkageIgnored,
}

impl Category {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Redefinition => "redefinition",
            Self::UnresolvedRelative => "unresolved-relative",
            Self::JumpOutOfRange => "jump-out-of-range",
            Self::RelocDelta => "reloc-delta",
            Self::IpsUnsupported => "ips-unsupported",
            Self::UnusedLabel => "unused-label",
            Self::Use32 => "use32",
            Self::LinkageIgnored => "linkage-ignored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
}

/// Collects diagnostics and decides which warning categories may print.
///
/// Errors are always echoed to stderr and recorded. Warnings in a
/// disabled category are dropped entirely. Code generation continues
/// after every diagnostic; the driver checks `error_count` to decide
/// whether the output file is usable.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    disabled: BTreeSet<Category>,
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_warning(&mut self, category: Category, enabled: bool) {
        if enabled {
            self.disabled.remove(&category);
        } else {
            self.disabled.insert(category);
        }
    }

    #[must_use]
    pub fn may_warn(&self, category: Category) -> bool {
        !self.disabled.contains(&category)
    }

    pub fn error(&mut self, category: Category, message: impl Into<String>) {
        let message = message.into();
        eprintln!("Error: {message}");
        self.records.push(Diagnostic {
            severity: Severity::Error,
            category,
            message,
        });
    }

    pub fn warning(&mut self, category: Category, message: impl Into<String>) {
        if !self.may_warn(category) {
            return;
        }
        let message = message.into();
        eprintln!("Warning: {message}");
        self.records.push(Diagnostic {
            severity: Severity::Warning,
            category,
            message,
        });
    }

    #[must_use]
    pub fn count(&self, category: Category) -> usize {
        self.records.iter().filter(|d| d.category == category).count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    #[must_use]
    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }
}
