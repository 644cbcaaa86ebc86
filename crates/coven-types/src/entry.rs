use std::fmt;

/// Base bound for every value stored in a journal.
///
/// A journal's payload is a closed sum; each variant reports a stable tag
/// used for wire records and diagnostics, and whether it is a draft.
/// Drafts are internal protocol records (streaming chunks, completion
/// markers, acks): they are excluded from covenant validation and must
/// never appear on a windowing daemon's output path.
pub trait Entry: Clone + fmt::Debug + Send + Sync + 'static {
    /// Returns the variant name as a static string for wire records,
    /// error messages and logging.
    fn tag(&self) -> &'static str;

    /// Whether this variant is an internal draft record.
    fn is_draft(&self) -> bool {
        false
    }
}

/// Projection of a single variant out of a journal's entry sum.
///
/// Typed waits, windowing chunk selection and composite manifests all
/// select one variant of a closed sum. Implementations return `None` for
/// every other variant (fail closed).
pub trait FromEntry<T: Entry>: Sized + Send + 'static {
    fn from_entry(entry: &T) -> Option<Self>;
}

impl Entry for String {
    fn tag(&self) -> &'static str {
        "String"
    }
}
