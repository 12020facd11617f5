//! Attribute and type filtering.
//!
//! Holds the built-in set of assembly-level, debugger, and compiler-internal
//! attributes that never reach the output image, plus the user-supplied
//! excluded-type list.

use std::path::Path;

use rustc_hash::FxHashSet;

use crate::Result;

/// Attributes dropped from every build.
///
/// Fully-qualified names; the set absorbs duplicate insertions.
static IGNORED_ATTRIBUTES: &[&str] = &[
    "System.Diagnostics.ConditionalAttribute",
    "System.Diagnostics.DebuggableAttribute",
    "System.Diagnostics.DebuggerBrowsableAttribute",
    "System.Diagnostics.DebuggerDisplayAttribute",
    "System.Diagnostics.DebuggerHiddenAttribute",
    "System.Diagnostics.DebuggerNonUserCodeAttribute",
    "System.Diagnostics.DebuggerStepThroughAttribute",
    "System.ParamArrayAttribute",
    "System.Reflection.AssemblyCompanyAttribute",
    "System.Reflection.AssemblyConfigurationAttribute",
    "System.Reflection.AssemblyCopyrightAttribute",
    "System.Reflection.AssemblyDefaultAliasAttribute",
    "System.Reflection.AssemblyDescriptionAttribute",
    "System.Reflection.AssemblyFileVersionAttribute",
    "System.Reflection.AssemblyInformationalVersionAttribute",
    "System.Reflection.AssemblyProductAttribute",
    "System.Reflection.AssemblyTitleAttribute",
    "System.Reflection.AssemblyTrademarkAttribute",
    "System.Reflection.DefaultMemberAttribute",
    "System.Runtime.CompilerServices.CompilationRelaxationsAttribute",
    "System.Runtime.CompilerServices.CompilerGeneratedAttribute",
    "System.Runtime.CompilerServices.ExtensionAttribute",
    "System.Runtime.CompilerServices.InternalsVisibleToAttribute",
    "System.Runtime.CompilerServices.IsReadOnlyAttribute",
    "System.Runtime.CompilerServices.MethodImplAttribute",
    "System.Runtime.CompilerServices.NullableAttribute",
    "System.Runtime.CompilerServices.NullableContextAttribute",
    "System.Runtime.CompilerServices.RefSafetyRulesAttribute",
    "System.Runtime.CompilerServices.RuntimeCompatibilityAttribute",
    "System.Runtime.InteropServices.ComVisibleAttribute",
    "System.Runtime.InteropServices.GuidAttribute",
    "System.Runtime.Versioning.TargetFrameworkAttribute",
    // The source tool lists this one twice; the set absorbs the duplicate.
    "System.Reflection.DefaultMemberAttribute",
];

/// The attribute/type filter of one build.
pub struct Filter {
    ignored_attributes: FxHashSet<String>,
    excluded_types: FxHashSet<String>,
}

impl Filter {
    /// Filter with the built-in ignored-attribute set and no excluded types.
    #[must_use]
    pub fn new() -> Self {
        let mut ignored_attributes = FxHashSet::default();
        for &name in IGNORED_ATTRIBUTES {
            ignored_attributes.insert(name.to_string());
        }
        Filter {
            ignored_attributes,
            excluded_types: FxHashSet::default(),
        }
    }

    /// Load the excluded-type list from a file.
    ///
    /// # Errors
    /// Returns an I/O error when the file cannot be read.
    pub fn load_excluded_types(&mut self, path: &Path) -> Result<()> {
        for name in parse_type_list(path)? {
            self.excluded_types.insert(name);
        }
        Ok(())
    }

    /// Add one excluded type by fully-qualified name.
    pub fn exclude_type(&mut self, full_name: &str) {
        self.excluded_types.insert(full_name.to_string());
    }

    /// True when an attribute type never reaches the output.
    #[must_use]
    pub fn is_attribute_ignored(&self, full_name: &str) -> bool {
        self.ignored_attributes.contains(full_name)
    }

    /// True when a type (or one of its declaring types) is excluded.
    #[must_use]
    pub fn is_type_excluded(&self, full_name: &str) -> bool {
        if self.excluded_types.contains(full_name) {
            return true;
        }
        // A nested type follows its declaring chain out of the image.
        full_name
            .char_indices()
            .filter(|&(_, c)| c == '+')
            .any(|(i, _)| self.excluded_types.contains(&full_name[..i]))
    }

    /// The ignored-attribute names.
    #[must_use]
    pub fn ignored_attributes(&self) -> &FxHashSet<String> {
        &self.ignored_attributes
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a type-list file: one fully-qualified name per line, `#` comments
/// and blank lines skipped.
///
/// # Errors
/// Returns an I/O error when the file cannot be read.
pub fn parse_type_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn duplicate_ignore_entries_are_absorbed() {
        let filter = Filter::new();
        assert!(filter.is_attribute_ignored("System.Reflection.DefaultMemberAttribute"));
        let count = IGNORED_ATTRIBUTES
            .iter()
            .filter(|&&name| name == "System.Reflection.DefaultMemberAttribute")
            .count();
        assert_eq!(count, 2);
        assert_eq!(filter.ignored_attributes().len(), IGNORED_ATTRIBUTES.len() - 1);
    }

    #[test]
    fn excluded_types_cover_nested_types() {
        let mut filter = Filter::new();
        filter.exclude_type("App.Diagnostics");
        assert!(filter.is_type_excluded("App.Diagnostics"));
        assert!(filter.is_type_excluded("App.Diagnostics+Formatter"));
        assert!(!filter.is_type_excluded("App.DiagnosticsHelper"));
    }

    #[test]
    fn type_list_parsing_skips_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "App.First").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  App.Second  ").unwrap();

        let names = parse_type_list(file.path()).unwrap();
        assert_eq!(names, ["App.First", "App.Second"]);
    }
}
